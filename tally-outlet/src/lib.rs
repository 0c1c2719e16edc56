//! The distributed outlet.
//!
//! A fleet of identical workers exports the raw samples of every tenant to the gauges API. The
//! sample space is split into `partitions` by the numeric metric key of each sample. In every
//! round, a worker visits all partitions and tries to acquire a lease for the pair of partition
//! and target bucket. Only the holder of the lease processes the pair:
//!
//!  1. Scan the sample store for keys of the target bucket and keep those of the partition.
//!  2. Group the samples by consumer.
//!  3. For each consumer, look up the API credentials, aggregate the samples per metric and submit
//!     the resulting gauges.
//!
//! Leases are never released. They expire after their TTL, which is at least one bucket interval,
//! so a bucket is processed at most once across the fleet. Failures of one consumer are logged and
//! counted, but never affect other consumers or the loop.
#![warn(missing_docs)]

mod config;
mod redis;
mod service;
mod store;

pub use self::config::*;
pub use self::redis::*;
pub use self::service::*;
pub use self::store::*;
