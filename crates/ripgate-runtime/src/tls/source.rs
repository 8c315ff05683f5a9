//! Certificate sources.
//!
//! A source always holds valid material. Replacements are announced on a
//! `watch` channel: the producer never blocks, and a slow consumer only
//! ever sees the newest version.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::material::{CertificateError, CertificateMaterial};

/// Quiet period before reloading after a burst of file events.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(250);

/// Supplies TLS material and announces replacements.
pub trait CertificateSource: Send + Sync {
    /// Material currently in force.
    fn current(&self) -> Arc<CertificateMaterial>;

    /// Receiver whose value is the version of the newest material.
    fn changes(&self) -> watch::Receiver<u64>;
}

/// In-memory holder for the active material.
pub struct CertificateStore {
    current: RwLock<Arc<CertificateMaterial>>,
    notify: watch::Sender<u64>,
}

impl CertificateStore {
    #[must_use]
    pub fn new(initial: CertificateMaterial) -> Self {
        let (notify, _) = watch::channel(initial.version);
        Self {
            current: RwLock::new(Arc::new(initial)),
            notify,
        }
    }

    /// Install new material. Returns false when it is identical to the current one.
    pub fn install(&self, material: CertificateMaterial) -> bool {
        let version = material.version;
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if current.identity == material.identity {
                return false;
            }
            *current = Arc::new(material);
        }
        self.notify.send_replace(version);
        true
    }
}

impl CertificateSource for CertificateStore {
    fn current(&self) -> Arc<CertificateMaterial> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.notify.subscribe()
    }
}

/// Certificate and key read from PEM files.
pub struct FileCertificateSource {
    cert_path: PathBuf,
    key_path: PathBuf,
    store: CertificateStore,
    next_version: AtomicU64,
}

impl FileCertificateSource {
    /// Load the initial material. Failure here must stop startup.
    pub fn load(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Result<Self, CertificateError> {
        let cert_path = cert_path.into();
        let key_path = key_path.into();
        let material = CertificateMaterial::read(&cert_path, &key_path, 0)?;
        info!(cert = %cert_path.display(), identity = %material.identity, "Loaded TLS certificate");

        Ok(Self {
            cert_path,
            key_path,
            store: CertificateStore::new(material),
            next_version: AtomicU64::new(1),
        })
    }

    /// Re-read the files.
    ///
    /// Returns whether new material was installed. On error the previous
    /// material stays in force.
    pub fn reload(&self) -> Result<bool, CertificateError> {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let material = CertificateMaterial::read(&self.cert_path, &self.key_path, version)?;
        let identity = material.identity.clone();
        let installed = self.store.install(material);
        if installed {
            info!(version, identity = %identity, "Installed new TLS certificate");
        } else {
            debug!("Certificate files touched but unchanged");
        }
        Ok(installed)
    }

    /// Watch the certificate and key files and reload on change.
    ///
    /// The watch stops when the returned guard is dropped.
    pub fn watch(self: &Arc<Self>) -> Result<CertificateWatcher, CertificateError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let names: Vec<_> = [&self.cert_path, &self.key_path]
            .iter()
            .filter_map(|p| p.file_name().map(ToOwned::to_owned))
            .collect();

        let mut watcher = recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res
                && event
                    .paths
                    .iter()
                    .any(|p| p.file_name().is_some_and(|n| names.iter().any(|w| w == n)))
            {
                let _ = tx.send(());
            }
        })
        .map_err(|e| CertificateError::Watch(e.to_string()))?;

        for dir in self.watch_dirs() {
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| CertificateError::Watch(format!("{}: {e}", dir.display())))?;
            info!(dir = %dir.display(), "Watching for certificate changes");
        }

        let source = Arc::clone(self);
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Writers often replace cert and key in separate steps.
                tokio::time::sleep(RELOAD_DEBOUNCE).await;
                while rx.try_recv().is_ok() {}

                if let Err(e) = source.reload() {
                    warn!("Certificate reload failed, keeping current certificate: {e}");
                }
            }
        });

        Ok(CertificateWatcher {
            _watcher: watcher,
            task,
        })
    }

    fn watch_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = [&self.cert_path, &self.key_path]
            .iter()
            .map(|p| parent_dir(p))
            .collect();
        dirs.dedup();
        dirs
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

impl CertificateSource for FileCertificateSource {
    fn current(&self) -> Arc<CertificateMaterial> {
        self.store.current()
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.store.changes()
    }
}

/// Keeps a file watch alive.
pub struct CertificateWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for CertificateWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
