//! HTTP surface of the ripgate gateway.
//!
//! Request rewriting ([`transform`]), probe answers ([`probes`]), streaming
//! upstream forwarding ([`forward`]), the embedding client and chunk
//! pipeline, and the axum [`Router`](axum::Router) that ties them together.

#![deny(unsafe_code)]

pub mod chunks;
pub mod embedding_client;
pub mod forward;
pub mod models;
pub mod probes;
pub mod server;
pub mod transform;

pub use chunks::{ChunkError, ChunkService};
pub use embedding_client::EmbeddingClient;
pub use probes::ProbeTable;
pub use server::{AppState, create_router};
pub use transform::{ClientMetadata, Plan, TransformPipeline};
