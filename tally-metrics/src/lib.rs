//! Metric protocol and aggregation for tally.
//!
//! This crate contains the building blocks shared by the self-metrics channel and the outlet:
//!
//! - [`Bucket`]: an in-memory window of observed values, identified by a [`MetricIdentity`].
//!   Buckets are reused across windows and never hold values of two windows at once.
//! - [`RawSample`]: a single observation written into the sample store by the receiver.
//! - [`aggregate`]: the algebra reducing a group of raw samples into [`Gauge`]s, according to the
//!   [`MetricKind`] of the group.
//! - [`Statistic`]: the summary statistics computed for distributions.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tally_common::time::UnixTimestamp;
//! use tally_metrics::{Bucket, MetricIdentity};
//!
//! let now = UnixTimestamp::from_secs(125);
//! let identity = MetricIdentity::new("app.requests", "web.1", Duration::from_secs(60), now);
//!
//! let mut bucket = Bucket::new(identity);
//! bucket.insert(now, 3.0);
//! bucket.insert(now, 5.0);
//!
//! assert_eq!(bucket.count(), 2);
//! assert_eq!(bucket.sum(), 8.0);
//! assert_eq!(bucket.identity().time, UnixTimestamp::from_secs(120));
//! ```
#![warn(missing_docs)]

mod aggregation;
mod bucket;
mod protocol;
mod statistics;

pub use self::aggregation::*;
pub use self::bucket::*;
pub use self::protocol::*;
pub use self::statistics::*;
