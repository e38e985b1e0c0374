#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]

mod producer;

pub use producer::{LogProducer, ProducerConfig};
