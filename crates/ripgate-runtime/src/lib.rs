//! Process runtime for the ripgate gateway: certificate sources, the
//! dual-listener orchestrator and termination signals.

#![deny(unsafe_code)]

pub mod orchestrator;
pub mod signal;
pub mod tls;

pub use orchestrator::{
    ListenerOrchestrator, ListenerState, ListenerStatus, OrchestratorError, Protocol,
    RunningGateway,
};
pub use signal::termination_signal;
pub use tls::{CertificateError, CertificateSource, FileCertificateSource};
