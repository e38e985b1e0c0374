#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod server;
pub mod shutdown;

pub use config::Config;
pub use server::{DiskLogServer, ServerPhase, bind_address};
