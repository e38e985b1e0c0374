#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod error;

pub use error::{DiskLogError, Result};

/// Size of the big-endian length prefix in front of every frame body.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest frame body accepted on the wire (128 KiB).
pub const MAX_MESSAGE_SIZE: usize = 128 * 1024;

/// Separator between the log name and the message inside a frame body.
pub const RECORD_SEPARATOR: u8 = b'\t';

pub const DEFAULT_PORT: u16 = 6801;

/// Extension given to every per-log file under the base path.
pub const LOG_FILE_EXTENSION: &str = "log";
