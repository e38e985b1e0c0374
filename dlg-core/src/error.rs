use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiskLogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame length {declared:#010X} exceeds maximum of {max} bytes")]
    FrameTooLarge { declared: u32, max: usize },

    #[error("Frame body requires <logname>\\t<message> schema")]
    MissingSeparator,

    #[error("Frame carries an empty log name")]
    EmptyLogName,

    #[error("Log name is not valid UTF-8")]
    LogNameEncoding,

    #[error("Log name not usable as a file name: {0:?}")]
    InvalidLogName(String),

    #[error("Can't open {path}: {source}")]
    LogOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Write to {path} failed: {source}")]
    LogWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Server already started")]
    AlreadyStarted,

    #[error("Server not started")]
    NotStarted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DiskLogError {
    /// Errors that abandon the offending connection without affecting others.
    #[must_use]
    pub fn is_malformed_frame(&self) -> bool {
        matches!(
            self,
            Self::FrameTooLarge { .. }
                | Self::MissingSeparator
                | Self::EmptyLogName
                | Self::LogNameEncoding
        )
    }
}

pub type Result<T> = std::result::Result<T, DiskLogError>;
