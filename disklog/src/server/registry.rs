//! Connection registry - tracks live connections and drains them on shutdown

use super::connection::ClientConnection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace};

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u64, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conn: Arc<ClientConnection>) {
        trace!(
            target: "disklog::registry",
            id = conn.id(),
            peer = %conn.peer_addr(),
            "Connection registered"
        );
        self.lock().insert(conn.id(), conn);
    }

    /// Forget a connection whose read loop has finished on its own.
    pub fn deregister(&self, id: u64) -> Option<Arc<ClientConnection>> {
        self.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Close every registered connection and wait for all of their read
    /// loops to exit.
    ///
    /// Close requests go out to every connection before any wait begins, so
    /// the drain takes as long as the slowest connection rather than the sum
    /// of all of them. Connections registered while a drain is in progress
    /// are picked up by the next round.
    pub async fn terminate_all(&self) {
        loop {
            let connections: Vec<_> = self.lock().values().cloned().collect();
            if connections.is_empty() {
                break;
            }

            info!(
                target: "disklog::registry",
                count = connections.len(),
                "Requesting close on open connections"
            );

            for conn in &connections {
                if !conn.is_close_requested() {
                    conn.request_close();
                }
            }

            for conn in &connections {
                conn.wait_for_close().await;
                debug!(
                    target: "disklog::registry",
                    local = %conn.local_addr(),
                    peer = %conn.peer_addr(),
                    "Connection closed"
                );
            }

            {
                let mut registered = self.lock();
                for conn in &connections {
                    registered.remove(&conn.id());
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Arc<ClientConnection>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::server::connection::{ConnectionState, ReadLoop};
    use dlg_io::DiskLogger;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::{AsyncRead, DuplexStream, ReadBuf};

    fn new_connection(
        logger: &Arc<DiskLogger>,
    ) -> (Arc<ClientConnection>, ReadLoop<DuplexStream>, DuplexStream) {
        let (client, server) = tokio::io::duplex(1024);
        let (conn, read_loop) = ClientConnection::with_stream(
            server,
            SocketAddr::from(([127, 0, 0, 1], 6801)),
            SocketAddr::from(([127, 0, 0, 1], 40000)),
            Arc::clone(logger),
        );
        (conn, read_loop, client)
    }

    /// Never yields data and takes `delay` to release, like a socket that is
    /// slow to wind down.
    struct SlowStream {
        delay: Duration,
    }

    impl AsyncRead for SlowStream {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Pending
        }
    }

    impl Drop for SlowStream {
        fn drop(&mut self) {
            std::thread::sleep(self.delay);
        }
    }

    #[tokio::test]
    async fn test_register_and_deregister() {
        let dir = tempdir().unwrap();
        let logger = Arc::new(DiskLogger::new(dir.path()));
        let registry = ConnectionRegistry::new();

        let (a, _loop_a, _client_a) = new_connection(&logger);
        let (b, _loop_b, _client_b) = new_connection(&logger);
        registry.register(Arc::clone(&a));
        registry.register(Arc::clone(&b));
        assert_eq!(registry.len(), 2);

        assert!(registry.deregister(a.id()).is_some());
        assert!(registry.deregister(a.id()).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_terminate_all_waits_for_every_read_loop() {
        let dir = tempdir().unwrap();
        let logger = Arc::new(DiskLogger::new(dir.path()));
        let registry = ConnectionRegistry::new();

        let mut clients = Vec::new();
        let mut conns = Vec::new();
        for _ in 0..5 {
            let (conn, read_loop, client) = new_connection(&logger);
            registry.register(Arc::clone(&conn));
            read_loop.spawn();
            clients.push(client);
            conns.push(conn);
        }

        tokio::time::timeout(Duration::from_secs(5), registry.terminate_all())
            .await
            .unwrap();

        assert!(registry.is_empty());
        for conn in &conns {
            assert_eq!(conn.state(), ConnectionState::Terminated);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_terminate_all_with_staggered_shutdowns() {
        let dir = tempdir().unwrap();
        let logger = Arc::new(DiskLogger::new(dir.path()));
        let registry = ConnectionRegistry::new();

        let mut conns = Vec::new();
        for delay_ms in [0u64, 50, 150] {
            let (conn, read_loop) = ClientConnection::with_stream(
                SlowStream {
                    delay: Duration::from_millis(delay_ms),
                },
                SocketAddr::from(([127, 0, 0, 1], 6801)),
                SocketAddr::from(([127, 0, 0, 1], 40000)),
                Arc::clone(&logger),
            );
            registry.register(Arc::clone(&conn));
            read_loop.spawn();
            conns.push(conn);
        }

        registry.terminate_all().await;

        for conn in &conns {
            assert_eq!(conn.state(), ConnectionState::Terminated);
        }
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_terminate_all_with_already_finished_connection() {
        let dir = tempdir().unwrap();
        let logger = Arc::new(DiskLogger::new(dir.path()));
        let registry = ConnectionRegistry::new();

        let (done, done_loop, done_client) = new_connection(&logger);
        registry.register(Arc::clone(&done));
        drop(done_client);
        done_loop.run().await;
        assert_eq!(done.state(), ConnectionState::Terminated);

        let (live, live_loop, _live_client) = new_connection(&logger);
        registry.register(Arc::clone(&live));
        live_loop.spawn();

        tokio::time::timeout(Duration::from_secs(5), registry.terminate_all())
            .await
            .unwrap();
        assert_eq!(live.state(), ConnectionState::Terminated);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_terminate_all_on_empty_registry() {
        let registry = ConnectionRegistry::new();
        registry.terminate_all().await;
        assert!(registry.is_empty());
    }
}
