//! Dual-listener lifecycle: plaintext and TLS servers sharing one router.
//!
//! Key design decisions:
//! - **Bind-then-report**: both sockets are bound before anything serves
//! - **Readiness barrier**: `start` returns only once both listeners accept
//! - **Serialized reload**: certificate changes are handled one at a time by
//!   the supervisor task, which owns the live TLS handle
//! - **Fatal sibling exit**: if either listener stops on its own, the other
//!   is drained and the gateway reports the failure

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use axum::Router;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use ripgate_core::ListenConfig;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::tls::{CertificateMaterial, CertificateSource, install_crypto_provider};

/// Time allowed past the grace period before a server task is aborted.
const ABORT_MARGIN: Duration = Duration::from_secs(1);

/// Lifecycle of one listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Starting,
    Serving,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Plain,
    Tls,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "HTTP"),
            Self::Tls => write!(f, "HTTPS"),
        }
    }
}

/// Error from orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Failed to bind {protocol} listener on {address}: {source}")]
    Bind {
        protocol: Protocol,
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid TLS configuration: {0}")]
    Tls(String),

    #[error("{0} listener did not start accepting connections")]
    NotReady(Protocol),

    #[error("{protocol} listener exited unexpectedly: {reason}")]
    ListenerExited { protocol: Protocol, reason: String },

    #[error("Supervisor task failed: {0}")]
    Supervisor(String),
}

/// Point-in-time view of both listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerStatus {
    pub plain: ListenerState,
    pub tls: ListenerState,
    /// Number of TLS instances started after the first one.
    pub tls_generation: u64,
}

impl Default for ListenerStatus {
    fn default() -> Self {
        Self {
            plain: ListenerState::Starting,
            tls: ListenerState::Starting,
            tls_generation: 0,
        }
    }
}

#[derive(Default)]
struct StatusBoard {
    inner: RwLock<ListenerStatus>,
}

impl StatusBoard {
    fn set(&self, protocol: Protocol, state: ListenerState) {
        let mut status = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match protocol {
            Protocol::Plain => status.plain = state,
            Protocol::Tls => status.tls = state,
        }
    }

    fn bump_generation(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .tls_generation += 1;
    }

    fn snapshot(&self) -> ListenerStatus {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One running server instance.
struct ServerHandle {
    addr: SocketAddr,
    protocol: Protocol,
    handle: Handle,
    task: JoinHandle<io::Result<()>>,
    /// Certificate version served; unused for the plaintext listener.
    material_version: u64,
    /// Set once `task` has been awaited to completion.
    finished: bool,
}

/// Starts and supervises the plaintext and TLS listeners.
pub struct ListenerOrchestrator {
    router: Router,
    listen: ListenConfig,
    certs: Arc<dyn CertificateSource>,
}

impl ListenerOrchestrator {
    #[must_use]
    pub fn new(router: Router, listen: ListenConfig, certs: Arc<dyn CertificateSource>) -> Self {
        Self {
            router,
            listen,
            certs,
        }
    }

    /// Bind both listeners, wait until both accept, then hand control to a
    /// supervisor task.
    pub async fn start(self) -> Result<RunningGateway, OrchestratorError> {
        install_crypto_provider();

        let plain_listener = bind(Protocol::Plain, &self.listen.http_addr())?;
        let tls_listener = bind(Protocol::Tls, &self.listen.https_addr())?;

        let material = self.certs.current();
        let tls_config = rustls_config(&material).await?;

        let status = Arc::new(StatusBoard::default());
        let mut plain = spawn_plain(plain_listener, self.router.clone())?;
        let mut tls = spawn_tls(tls_listener, tls_config, self.router.clone(), &material)?;

        let (plain_ready, tls_ready) =
            tokio::join!(plain.handle.listening(), tls.handle.listening());
        if plain_ready.is_none() || tls_ready.is_none() {
            let failed = if plain_ready.is_none() {
                Protocol::Plain
            } else {
                Protocol::Tls
            };
            plain.handle.shutdown();
            tls.handle.shutdown();
            finish(&mut plain, Duration::ZERO).await;
            finish(&mut tls, Duration::ZERO).await;
            return Err(OrchestratorError::NotReady(failed));
        }

        status.set(Protocol::Plain, ListenerState::Serving);
        status.set(Protocol::Tls, ListenerState::Serving);
        info!(http = %plain.addr, https = %tls.addr, "Gateway listening");

        let lifecycle = CancellationToken::new();
        let plain_addr = plain.addr;
        let tls_addr = tls.addr;
        let supervisor = Supervisor {
            router: self.router,
            certs: self.certs,
            grace: self.listen.shutdown_grace,
            status: Arc::clone(&status),
            lifecycle: lifecycle.clone(),
        };
        let task = tokio::spawn(supervisor.run(plain, tls));

        Ok(RunningGateway {
            plain_addr,
            tls_addr,
            lifecycle,
            status,
            task,
        })
    }
}

/// A started gateway.
pub struct RunningGateway {
    plain_addr: SocketAddr,
    tls_addr: SocketAddr,
    lifecycle: CancellationToken,
    status: Arc<StatusBoard>,
    task: JoinHandle<Result<(), OrchestratorError>>,
}

impl RunningGateway {
    #[must_use]
    pub const fn plain_addr(&self) -> SocketAddr {
        self.plain_addr
    }

    /// Address of the TLS listener; reloads rebind the same address.
    #[must_use]
    pub const fn tls_addr(&self) -> SocketAddr {
        self.tls_addr
    }

    #[must_use]
    pub fn status(&self) -> ListenerStatus {
        self.status.snapshot()
    }

    /// Request a coordinated shutdown of both listeners.
    pub fn shutdown(&self) {
        self.lifecycle.cancel();
    }

    /// Resolves once shutdown was requested or a listener failed.
    pub async fn stopped(&self) {
        self.lifecycle.cancelled().await;
    }

    /// Wait for both listeners to finish draining.
    pub async fn wait(self) -> Result<(), OrchestratorError> {
        self.task
            .await
            .map_err(|e| OrchestratorError::Supervisor(e.to_string()))?
    }
}

struct Supervisor {
    router: Router,
    certs: Arc<dyn CertificateSource>,
    grace: Duration,
    status: Arc<StatusBoard>,
    lifecycle: CancellationToken,
}

impl Supervisor {
    async fn run(
        self,
        mut plain: ServerHandle,
        mut tls: ServerHandle,
    ) -> Result<(), OrchestratorError> {
        let mut changes = self.certs.changes();
        changes.borrow_and_update();
        let mut watching = true;

        let outcome = loop {
            tokio::select! {
                () = self.lifecycle.cancelled() => break Ok(()),
                res = &mut plain.task => {
                    plain.finished = true;
                    break Err(exited(Protocol::Plain, res));
                }
                res = &mut tls.task => {
                    tls.finished = true;
                    break Err(exited(Protocol::Tls, res));
                }
                changed = changes.changed(), if watching => {
                    if changed.is_err() {
                        debug!("Certificate source closed; reload disabled");
                        watching = false;
                        continue;
                    }
                    if let Err(e) = self.reload(&mut tls).await {
                        break Err(e);
                    }
                }
            }
        };

        match &outcome {
            Ok(()) => info!("Shutting down listeners"),
            Err(e) => error!("{e}; shutting down gateway"),
        }
        self.lifecycle.cancel();

        self.status.set(Protocol::Plain, ListenerState::Draining);
        self.status.set(Protocol::Tls, ListenerState::Draining);
        plain.handle.graceful_shutdown(Some(self.grace));
        tls.handle.graceful_shutdown(Some(self.grace));
        tokio::join!(finish(&mut plain, self.grace), finish(&mut tls, self.grace));
        self.status.set(Protocol::Plain, ListenerState::Stopped);
        self.status.set(Protocol::Tls, ListenerState::Stopped);

        info!("Gateway stopped");
        outcome
    }

    /// Replace the TLS listener with one serving the current material.
    ///
    /// Invalid material is rejected before the running listener is touched.
    async fn reload(&self, tls: &mut ServerHandle) -> Result<(), OrchestratorError> {
        let material = self.certs.current();
        if material.version == tls.material_version {
            return Ok(());
        }

        let config = match rustls_config(&material).await {
            Ok(config) => config,
            Err(e) => {
                warn!("Rejected new certificate, keeping current TLS listener: {e}");
                return Ok(());
            }
        };

        info!(addr = %tls.addr, version = material.version, "Reloading TLS listener");
        self.status.set(Protocol::Tls, ListenerState::Draining);
        tls.handle.graceful_shutdown(Some(self.grace));
        finish(tls, self.grace).await;

        let listener = bind(Protocol::Tls, &tls.addr.to_string())?;
        *tls = spawn_tls(listener, config, self.router.clone(), &material)?;
        if tls.handle.listening().await.is_none() {
            return Err(OrchestratorError::NotReady(Protocol::Tls));
        }

        self.status.set(Protocol::Tls, ListenerState::Serving);
        self.status.bump_generation();
        info!(addr = %tls.addr, "TLS listener reloaded");
        Ok(())
    }
}

fn bind(protocol: Protocol, address: &str) -> Result<TcpListener, OrchestratorError> {
    let bind_err = |source| OrchestratorError::Bind {
        protocol,
        address: address.to_string(),
        source,
    };
    let listener = TcpListener::bind(address).map_err(bind_err)?;
    listener.set_nonblocking(true).map_err(bind_err)?;
    debug!(%protocol, address, "Bound listener");
    Ok(listener)
}

async fn rustls_config(material: &CertificateMaterial) -> Result<RustlsConfig, OrchestratorError> {
    RustlsConfig::from_pem(material.cert_pem.clone(), material.key_pem.clone())
        .await
        .map_err(|e| OrchestratorError::Tls(e.to_string()))
}

fn local_addr(protocol: Protocol, listener: &TcpListener) -> Result<SocketAddr, OrchestratorError> {
    listener
        .local_addr()
        .map_err(|source| OrchestratorError::Bind {
            protocol,
            address: "<unknown>".to_string(),
            source,
        })
}

fn spawn_plain(listener: TcpListener, router: Router) -> Result<ServerHandle, OrchestratorError> {
    let addr = local_addr(Protocol::Plain, &listener)?;
    let handle = Handle::new();
    let server = axum_server::from_tcp(listener).handle(handle.clone());
    let task = tokio::spawn(server.serve(router.into_make_service()));

    Ok(ServerHandle {
        addr,
        protocol: Protocol::Plain,
        handle,
        task,
        material_version: 0,
        finished: false,
    })
}

fn spawn_tls(
    listener: TcpListener,
    config: RustlsConfig,
    router: Router,
    material: &CertificateMaterial,
) -> Result<ServerHandle, OrchestratorError> {
    let addr = local_addr(Protocol::Tls, &listener)?;
    let handle = Handle::new();
    let server = axum_server::from_tcp_rustls(listener, config).handle(handle.clone());
    let task = tokio::spawn(server.serve(router.into_make_service()));

    Ok(ServerHandle {
        addr,
        protocol: Protocol::Tls,
        handle,
        task,
        material_version: material.version,
        finished: false,
    })
}

/// Wait for a server task after shutdown was requested, aborting it if it
/// outlives the grace period.
async fn finish(server: &mut ServerHandle, grace: Duration) {
    if server.finished {
        return;
    }
    server.finished = true;

    match tokio::time::timeout(grace + ABORT_MARGIN, &mut server.task).await {
        Ok(Ok(Ok(()))) => debug!(protocol = %server.protocol, addr = %server.addr, "Listener closed"),
        Ok(Ok(Err(e))) => warn!(protocol = %server.protocol, "Listener ended with error: {e}"),
        Ok(Err(e)) => warn!(protocol = %server.protocol, "Listener task failed: {e}"),
        Err(_) => {
            warn!(protocol = %server.protocol, "Listener did not drain in time; aborting");
            server.task.abort();
        }
    }
}

fn exited(protocol: Protocol, res: Result<io::Result<()>, JoinError>) -> OrchestratorError {
    let reason = match res {
        Ok(Ok(())) => "server stopped without a shutdown request".to_string(),
        Ok(Err(e)) => e.to_string(),
        Err(e) => e.to_string(),
    };
    OrchestratorError::ListenerExited { protocol, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_board_transitions() {
        let board = StatusBoard::default();
        assert_eq!(board.snapshot(), ListenerStatus::default());

        board.set(Protocol::Tls, ListenerState::Draining);
        board.bump_generation();
        let status = board.snapshot();
        assert_eq!(status.plain, ListenerState::Starting);
        assert_eq!(status.tls, ListenerState::Draining);
        assert_eq!(status.tls_generation, 1);
    }

    #[test]
    fn test_bind_error_names_the_port() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let err = bind(Protocol::Tls, &addr).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("HTTPS"));
        assert!(message.contains(&addr));
    }

    #[test]
    fn test_exit_reasons() {
        let err = exited(Protocol::Plain, Ok(Err(io::Error::other("socket gone"))));
        assert!(err.to_string().contains("socket gone"));
        let err = exited(Protocol::Plain, Ok(Ok(())));
        assert!(matches!(err, OrchestratorError::ListenerExited { protocol: Protocol::Plain, .. }));
    }

    #[tokio::test]
    async fn test_failed_listener_stops_its_sibling() {
        use crate::tls::CertificateStore;

        let material = CertificateMaterial::from_pem(
            include_bytes!("../tests/fixtures/first-cert.pem").to_vec(),
            include_bytes!("../tests/fixtures/first-key.pem").to_vec(),
            0,
            std::path::Path::new("cert.pem"),
            std::path::Path::new("key.pem"),
        )
        .unwrap();

        let listener = bind(Protocol::Plain, "127.0.0.1:0").unwrap();
        let plain = spawn_plain(listener, Router::new()).unwrap();
        assert!(plain.handle.listening().await.is_some());
        let plain_addr = plain.addr;

        let tls = ServerHandle {
            addr: "127.0.0.1:0".parse().unwrap(),
            protocol: Protocol::Tls,
            handle: Handle::new(),
            task: tokio::spawn(async { Err::<(), _>(io::Error::other("socket died")) }),
            material_version: 0,
            finished: false,
        };

        let status = Arc::new(StatusBoard::default());
        status.set(Protocol::Plain, ListenerState::Serving);
        status.set(Protocol::Tls, ListenerState::Serving);
        let lifecycle = CancellationToken::new();
        let supervisor = Supervisor {
            router: Router::new(),
            certs: Arc::new(CertificateStore::new(material)),
            grace: Duration::from_secs(1),
            status: Arc::clone(&status),
            lifecycle: lifecycle.clone(),
        };

        let outcome = tokio::time::timeout(Duration::from_secs(5), supervisor.run(plain, tls))
            .await
            .expect("supervisor did not stop");

        match outcome {
            Err(OrchestratorError::ListenerExited { protocol, reason }) => {
                assert_eq!(protocol, Protocol::Tls);
                assert!(reason.contains("socket died"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(lifecycle.is_cancelled());
        let snapshot = status.snapshot();
        assert_eq!(snapshot.plain, ListenerState::Stopped);
        assert_eq!(snapshot.tls, ListenerState::Stopped);
        assert!(std::net::TcpStream::connect(plain_addr).is_err());
    }
}
