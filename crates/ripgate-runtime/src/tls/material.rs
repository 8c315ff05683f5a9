//! Certificate and key material.

use std::path::{Path, PathBuf};

use rustls::pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors loading or validating certificate material.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No certificate found in {}", path.display())]
    NoCertificate { path: PathBuf },

    #[error("Invalid certificate in {}: {reason}", path.display())]
    InvalidCertificate { path: PathBuf, reason: String },

    #[error("Invalid private key in {}: {reason}", path.display())]
    InvalidKey { path: PathBuf, reason: String },

    #[error("Failed to watch certificate files: {0}")]
    Watch(String),
}

/// A validated PEM certificate chain and private key.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateMaterial {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    /// Monotonic version assigned by the owning source.
    pub version: u64,
    /// SHA-256 over certificate and key; equal material has equal identity.
    pub identity: String,
}

impl CertificateMaterial {
    /// Validate PEM bytes and compute their identity.
    ///
    /// `cert_path` and `key_path` are only used in error messages.
    pub fn from_pem(
        cert_pem: Vec<u8>,
        key_pem: Vec<u8>,
        version: u64,
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<Self, CertificateError> {
        let mut found = false;
        for cert in CertificateDer::pem_slice_iter(&cert_pem) {
            cert.map_err(|e| CertificateError::InvalidCertificate {
                path: cert_path.to_path_buf(),
                reason: e.to_string(),
            })?;
            found = true;
        }
        if !found {
            return Err(CertificateError::NoCertificate {
                path: cert_path.to_path_buf(),
            });
        }

        PrivateKeyDer::from_pem_slice(&key_pem).map_err(|e| CertificateError::InvalidKey {
            path: key_path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut hasher = Sha256::new();
        hasher.update(&cert_pem);
        hasher.update(&key_pem);
        let identity = hex::encode(hasher.finalize());

        Ok(Self {
            cert_pem,
            key_pem,
            version,
            identity,
        })
    }

    /// Read and validate material from disk.
    pub fn read(cert_path: &Path, key_path: &Path, version: u64) -> Result<Self, CertificateError> {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|source| CertificateError::Read {
                path: path.to_path_buf(),
                source,
            })
        };
        Self::from_pem(read(cert_path)?, read(key_path)?, version, cert_path, key_path)
    }
}

// Keeps key bytes out of logs.
impl std::fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("version", &self.version)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
