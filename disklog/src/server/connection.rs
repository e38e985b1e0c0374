//! Client connection - frame decoding and close lifecycle
//!
//! A connection is split in two halves: the shared [`ClientConnection`]
//! (state, addresses, close and done signals) that the registry holds on to,
//! and the [`ReadLoop`] that owns the socket and runs as its own task.
//! Closing is cooperative: `request_close` flips the state and wakes the read
//! loop, which drops the socket and marks the connection terminated.

use dlg_core::{DiskLogError, Result};
use dlg_io::DiskLogger;
use dlg_network::{ConnectionBuffer, Record, parse_record};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

const READ_CHUNK_SIZE: usize = 32 * 1024;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Connection lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Active,
    Terminating,
    Terminated,
}

pub struct ClientConnection {
    id: u64,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    state: Mutex<ConnectionState>,
    close_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

impl ClientConnection {
    /// Wrap an accepted socket.
    pub fn accept(
        stream: TcpStream,
        logger: Arc<DiskLogger>,
    ) -> Result<(Arc<Self>, ReadLoop<TcpStream>)> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        Ok(Self::with_stream(stream, local_addr, peer_addr, logger))
    }

    /// Wrap any byte stream. The read loop is returned unstarted so the
    /// caller can register the connection before any record is processed.
    pub fn with_stream<S>(
        stream: S,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        logger: Arc<DiskLogger>,
    ) -> (Arc<Self>, ReadLoop<S>)
    where
        S: AsyncRead + Unpin + Send + 'static,
    {
        let (close_tx, close_rx) = watch::channel(false);
        let (done_tx, _) = watch::channel(false);

        let conn = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            local_addr,
            peer_addr,
            state: Mutex::new(ConnectionState::Active),
            close_tx,
            done_tx,
        });

        let read_loop = ReadLoop {
            conn: Arc::clone(&conn),
            stream,
            logger,
            close_rx,
        };

        (conn, read_loop)
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[inline]
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    /// Ask the read loop to close the socket and exit. Only the first call
    /// while `Active` has any effect.
    pub fn request_close(&self) {
        let mut state = self.lock_state();
        if *state == ConnectionState::Active {
            *state = ConnectionState::Terminating;
            self.close_tx.send_replace(true);
            debug!(
                target: "disklog::connection",
                peer = %self.peer_addr,
                "Close requested"
            );
        }
    }

    pub fn is_close_requested(&self) -> bool {
        self.state() != ConnectionState::Active
    }

    /// Wait until the read loop has exited. Returns at once if it already has.
    pub async fn wait_for_close(&self) {
        if self.state() == ConnectionState::Terminated {
            return;
        }

        let mut done_rx = self.done_tx.subscribe();
        // The sender lives in `self`, so this only returns once `done` is set.
        let _ = done_rx.wait_for(|done| *done).await;
    }

    fn mark_terminated(&self) {
        let mut state = self.lock_state();
        *state = ConnectionState::Terminated;
        self.done_tx.send_replace(true);
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        // The guarded value is a plain enum, so a poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the socket half of a connection.
pub struct ReadLoop<S> {
    conn: Arc<ClientConnection>,
    stream: S,
    logger: Arc<DiskLogger>,
    close_rx: watch::Receiver<bool>,
}

impl<S> ReadLoop<S>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Read and decode until the peer goes away, a close is requested, or
    /// the stream turns out to be malformed. The socket is dropped exactly
    /// once, here, before the connection is marked terminated.
    pub async fn run(self) {
        let Self {
            conn,
            mut stream,
            logger,
            mut close_rx,
        } = self;

        let outcome = pump_frames(&conn, &mut stream, &logger, &mut close_rx).await;
        drop(stream);

        match outcome {
            Ok(()) => {
                debug!(
                    target: "disklog::connection",
                    peer = %conn.peer_addr,
                    "Connection closed"
                );
            },
            Err(e) if e.is_malformed_frame() => {
                warn!(
                    target: "disklog::connection",
                    peer = %conn.peer_addr,
                    error = %e,
                    "Failed to process stream, closing connection"
                );
            },
            Err(e) => {
                if conn.is_close_requested() {
                    trace!(
                        target: "disklog::connection",
                        peer = %conn.peer_addr,
                        error = %e,
                        "Read ended after close request"
                    );
                } else {
                    error!(
                        target: "disklog::connection",
                        peer = %conn.peer_addr,
                        error = %e,
                        "Failed to read"
                    );
                }
            },
        }

        conn.mark_terminated();
    }
}

async fn pump_frames<S>(
    conn: &ClientConnection,
    stream: &mut S,
    logger: &Arc<DiskLogger>,
    close_rx: &mut watch::Receiver<bool>,
) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = ConnectionBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = tokio::select! {
            biased;
            _ = close_rx.changed() => return Ok(()),
            read = stream.read(&mut chunk) => read?,
        };
        if n == 0 {
            return Ok(());
        }
        buffer.extend(&chunk[..n]);

        while let Some((record, used)) = parse_record(buffer.as_slice())? {
            forward_record(conn, logger, record).await;
            buffer.consume(used);
        }
        buffer.compact();
    }
}

/// Hand one record to the disk logger. A failed append drops the record;
/// the connection carries on.
async fn forward_record(conn: &ClientConnection, logger: &Arc<DiskLogger>, record: Record) {
    let logger = Arc::clone(logger);
    let appended = tokio::task::spawn_blocking(move || {
        let result = logger.append(&record.log_name, &record.message);
        (record.log_name, result)
    })
    .await;

    match appended {
        Ok((log_name, Ok(()))) => {
            trace!(
                target: "disklog::connection",
                peer = %conn.peer_addr,
                log_name = %log_name,
                "Record appended"
            );
        },
        Ok((log_name, Err(e))) => {
            warn!(
                target: "disklog::connection",
                peer = %conn.peer_addr,
                log_name = %log_name,
                error = %e,
                "Record dropped"
            );
        },
        Err(e) => {
            let e = DiskLogError::Internal(format!("append task failed: {}", e));
            error!(
                target: "disklog::connection",
                peer = %conn.peer_addr,
                error = %e,
                "Record dropped"
            );
        },
    }
}
