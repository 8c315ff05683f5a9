//! TLS certificate material and its sources.

mod material;
mod source;

pub use material::{CertificateError, CertificateMaterial};
pub use source::{CertificateSource, CertificateStore, CertificateWatcher, FileCertificateSource};

/// Select the process-wide rustls crypto provider.
///
/// Several TLS stacks in the dependency graph each enable a provider, so
/// rustls cannot pick one on its own. Repeated calls are harmless.
pub fn install_crypto_provider() {
    // Err only means a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();
}
