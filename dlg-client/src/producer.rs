//! Fire-and-forget producer.
//!
//! The collector never answers, so a producer only frames records and writes
//! them. A record is on the server's socket once [`LogProducer::flush`]
//! returns; whether it reached disk is not observable from here.
//!
//! ```rust,no_run
//! use dlg_client::{LogProducer, ProducerConfig};
//!
//! #[tokio::main]
//! async fn main() -> dlg_core::Result<()> {
//!     let mut producer = LogProducer::connect(ProducerConfig::new("127.0.0.1:6801")).await?;
//!     producer.send("app", b"service started").await?;
//!     producer.close().await
//! }
//! ```

use dlg_core::{DiskLogError, Result};
use dlg_network::encode_record;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Collector address, `host:port`
    pub addr: String,
    pub connect_timeout: Duration,
    /// Flush after every record instead of leaving it to the caller
    pub flush_each: bool,
}

impl ProducerConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(10),
            flush_each: true,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Buffer records until [`LogProducer::flush`] is called.
    pub fn with_batching(mut self) -> Self {
        self.flush_each = false;
        self
    }
}

pub struct LogProducer {
    stream: BufWriter<TcpStream>,
    peer_addr: SocketAddr,
    flush_each: bool,
    sent: u64,
}

impl LogProducer {
    pub async fn connect(config: ProducerConfig) -> Result<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&config.addr))
            .await
            .map_err(|_| {
                DiskLogError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", config.addr),
                ))
            })??;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;

        debug!(target: "dlg_client::producer", peer = %peer_addr, "Connected");

        Ok(Self {
            stream: BufWriter::new(stream),
            peer_addr,
            flush_each: config.flush_each,
            sent: 0,
        })
    }

    pub async fn connect_to(addr: &str) -> Result<Self> {
        Self::connect(ProducerConfig::new(addr)).await
    }

    #[inline]
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Records written so far.
    #[inline]
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Frame and send one record to `log_name`.
    pub async fn send(&mut self, log_name: &str, message: &[u8]) -> Result<()> {
        let frame = encode_record(log_name, message)?;
        self.stream.write_all(&frame).await?;
        self.sent += 1;
        if self.flush_each {
            self.stream.flush().await?;
        }
        Ok(())
    }

    /// Write pre-encoded bytes as-is, bypassing framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.stream.flush().await?;
        Ok(())
    }

    /// Flush pending records and shut down the write half.
    pub async fn close(mut self) -> Result<()> {
        self.stream.flush().await?;
        self.stream.shutdown().await?;
        debug!(
            target: "dlg_client::producer",
            peer = %self.peer_addr,
            sent = self.sent,
            "Closed"
        );
        Ok(())
    }
}
