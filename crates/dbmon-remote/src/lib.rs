//! Prometheus remote-write bridge
//!
//! Flattens gathered metric families into canonical time series
//! ([`encode()`]), serializes them into the remote-write protobuf schema
//! ([`prompb`]) and delivers them compressed and SigV4-signed
//! ([`client`]). Delivery is at-most-once per cycle; nothing is queued or
//! retried here.

pub mod client;
pub mod encode;
pub mod error;
pub mod prompb;

pub use client::RemoteWriteClient;
pub use encode::{encode, RemoteWriteBatch};
pub use error::{RemoteWriteError, Result};
