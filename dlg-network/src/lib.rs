#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]

mod connection;
mod frame;

pub use connection::ConnectionBuffer;
pub use frame::{Record, encode_record, parse_record};
