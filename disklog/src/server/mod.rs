//! Server module - TCP listener and lifecycle orchestration
//!
//! The server owns the listening socket, the connection registry and the
//! disk logger. Termination runs as its own task: close the listener, drain
//! every connection, then flush and close the log files.

mod connection;
mod registry;

pub use connection::{ClientConnection, ConnectionState, ReadLoop};
pub use registry::ConnectionRegistry;

use dlg_core::{DEFAULT_PORT, DiskLogError, Result};
use dlg_io::DiskLogger;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::TcpListener;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Server lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServerPhase {
    NotStarted,
    Started,
    Terminating,
    Terminated,
}

struct ServerState {
    phase: ServerPhase,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
    runtime: Option<Handle>,
}

struct ServerInner {
    state: Mutex<ServerState>,
    stop_tx: watch::Sender<bool>,
    terminated_tx: watch::Sender<bool>,
    registry: Arc<ConnectionRegistry>,
    logger: Arc<DiskLogger>,
}

/// Cloneable handle to one log collector instance.
#[derive(Clone)]
pub struct DiskLogServer {
    inner: Arc<ServerInner>,
}

/// Format `endpoint:port`, applying the defaults for an empty endpoint
/// (all interfaces) and a zero port.
#[must_use]
pub fn bind_address(endpoint: &str, port: u16) -> String {
    let port = if port == 0 { DEFAULT_PORT } else { port };
    let host = if endpoint.is_empty() {
        "0.0.0.0"
    } else {
        endpoint
    };

    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

impl DiskLogServer {
    /// Create a server persisting logs under `persist_path`.
    pub fn new(persist_path: impl Into<PathBuf>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let (terminated_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(ServerInner {
                state: Mutex::new(ServerState {
                    phase: ServerPhase::NotStarted,
                    local_addr: None,
                    accept_task: None,
                    runtime: None,
                }),
                stop_tx,
                terminated_tx,
                registry: Arc::new(ConnectionRegistry::new()),
                logger: Arc::new(DiskLogger::new(persist_path)),
            }),
        }
    }

    /// Bind `endpoint:port` and start accepting connections.
    ///
    /// Must be called from within a tokio runtime; that runtime also runs
    /// termination, so [`stop_server`](Self::stop_server) may be called from
    /// any thread. A hostname endpoint is resolved synchronously, off the
    /// async worker when the runtime is multi-threaded. Starting twice is a
    /// usage error. A failed bind leaves the server startable.
    pub fn start_server(&self, endpoint: &str, port: u16) -> Result<()> {
        let runtime = Handle::try_current()
            .map_err(|e| DiskLogError::Internal(format!("no tokio runtime: {}", e)))?;

        if self.inner.lock_state().phase != ServerPhase::NotStarted {
            return Err(DiskLogError::AlreadyStarted);
        }

        let addr = bind_address(endpoint, port);
        let bind = || std::net::TcpListener::bind(&addr);
        let listener = match runtime.runtime_flavor() {
            RuntimeFlavor::MultiThread => tokio::task::block_in_place(bind),
            _ => bind(),
        }
        .map_err(|e| {
            error!(target: "disklog::server", addr = %addr, error = %e, "Error listening");
            e
        })?;
        listener.set_nonblocking(true)?;

        let mut state = self.inner.lock_state();
        if state.phase != ServerPhase::NotStarted {
            return Err(DiskLogError::AlreadyStarted);
        }

        let listener = TcpListener::from_std(listener)?;
        let local_addr = listener.local_addr()?;

        info!(target: "disklog::server", addr = %local_addr, "Listening for connections");

        let stop_rx = self.inner.stop_tx.subscribe();
        let accept_task = runtime.spawn(accept_loop(
            listener,
            stop_rx,
            Arc::clone(&self.inner.registry),
            Arc::clone(&self.inner.logger),
        ));

        state.phase = ServerPhase::Started;
        state.local_addr = Some(local_addr);
        state.accept_task = Some(accept_task);
        state.runtime = Some(runtime);
        Ok(())
    }

    /// Begin termination. Returns immediately; use
    /// [`wait_for_termination`](Self::wait_for_termination) to wait for the
    /// drain to finish. Calling again while terminating is a no-op. Safe to
    /// call from threads outside the runtime.
    pub fn stop_server(&self) -> Result<()> {
        let (runtime, accept_task) = {
            let mut state = self.inner.lock_state();
            match state.phase {
                ServerPhase::NotStarted => return Err(DiskLogError::NotStarted),
                ServerPhase::Terminating | ServerPhase::Terminated => return Ok(()),
                ServerPhase::Started => {
                    let Some(runtime) = state.runtime.clone() else {
                        return Err(DiskLogError::Internal("started without a runtime".into()));
                    };
                    state.phase = ServerPhase::Terminating;
                    (runtime, state.accept_task.take())
                },
            }
        };

        runtime.spawn(Arc::clone(&self.inner).terminate(accept_task));
        Ok(())
    }

    /// Wait until a termination started by [`stop_server`](Self::stop_server)
    /// has completed.
    pub async fn wait_for_termination(&self) {
        let mut terminated_rx = self.inner.terminated_tx.subscribe();
        let _ = terminated_rx.wait_for(|done| *done).await;
        info!(target: "disklog::server", "Finished serving requests");
    }

    /// The bound address, or an empty string before the server is started.
    pub fn server_addr(&self) -> String {
        self.local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock_state().local_addr
    }

    pub fn phase(&self) -> ServerPhase {
        self.inner.lock_state().phase
    }

    /// Number of connections currently registered.
    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }
}

impl ServerInner {
    fn lock_state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn terminate(self: Arc<Self>, accept_task: Option<JoinHandle<()>>) {
        let addr = self.lock_state().local_addr;

        debug!(target: "disklog::server", "Closing listener");
        self.stop_tx.send_replace(true);
        if let Some(task) = accept_task {
            if let Err(e) = task.await {
                error!(target: "disklog::server", error = %e, "Accept loop panicked");
            }
        }

        info!(target: "disklog::server", "Waiting for open connections to complete");
        self.registry.terminate_all().await;

        let logger = Arc::clone(&self.logger);
        let closed = tokio::task::spawn_blocking(move || {
            logger.flush_all();
            logger.close_all();
        })
        .await;
        if let Err(e) = closed {
            error!(target: "disklog::server", error = %e, "Closing logs failed");
        }

        if let Some(addr) = addr {
            info!(target: "disklog::server", addr = %addr, "Termination completed");
        }

        self.lock_state().phase = ServerPhase::Terminated;
        self.terminated_tx.send_replace(true);
    }
}

/// Accept until the stop signal fires; dropping the listener on the way out
/// closes the socket.
async fn accept_loop(
    listener: TcpListener,
    mut stop_rx: watch::Receiver<bool>,
    registry: Arc<ConnectionRegistry>,
    logger: Arc<DiskLogger>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(target: "disklog::server", peer = %peer, "Client connected");
                    spawn_connection(stream, &registry, &logger);
                },
                Err(e) => {
                    error!(target: "disklog::server", error = %e, "Accept failed");
                },
            },
        }
    }

    drop(listener);
    trace!(target: "disklog::server", "Accept loop stopped");
}

fn spawn_connection(
    stream: tokio::net::TcpStream,
    registry: &Arc<ConnectionRegistry>,
    logger: &Arc<DiskLogger>,
) {
    let (conn, read_loop) = match ClientConnection::accept(stream, Arc::clone(logger)) {
        Ok(accepted) => accepted,
        Err(e) => {
            error!(target: "disklog::server", error = %e, "Failed to set up connection");
            return;
        },
    };

    registry.register(Arc::clone(&conn));

    let registry = Arc::clone(registry);
    tokio::spawn(async move {
        read_loop.run().await;
        registry.deregister(conn.id());
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_bind_address_defaults() {
        assert_eq!(bind_address("", 0), "0.0.0.0:6801");
        assert_eq!(bind_address("127.0.0.1", 0), "127.0.0.1:6801");
        assert_eq!(bind_address("localhost", 7000), "localhost:7000");
        assert_eq!(bind_address("::1", 7000), "[::1]:7000");
        assert_eq!(bind_address("[::1]", 7000), "[::1]:7000");
    }

    #[test]
    fn test_server_addr_empty_before_start() {
        let dir = tempdir().unwrap();
        let server = DiskLogServer::new(dir.path());

        assert_eq!(server.server_addr(), "");
        assert_eq!(server.phase(), ServerPhase::NotStarted);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_an_error() {
        let dir = tempdir().unwrap();
        let server = DiskLogServer::new(dir.path());

        let err = server.stop_server().unwrap_err();
        assert!(matches!(err, DiskLogError::NotStarted));
    }

    #[test]
    fn test_start_outside_runtime_is_an_error() {
        let dir = tempdir().unwrap();
        let server = DiskLogServer::new(dir.path());

        let err = server.start_server("127.0.0.1", 0).unwrap_err();
        assert!(matches!(err, DiskLogError::Internal(_)));
        assert_eq!(server.phase(), ServerPhase::NotStarted);
    }

    #[test]
    fn test_phase_ordering_is_monotonic() {
        assert!(ServerPhase::NotStarted < ServerPhase::Started);
        assert!(ServerPhase::Started < ServerPhase::Terminating);
        assert!(ServerPhase::Terminating < ServerPhase::Terminated);
    }
}
