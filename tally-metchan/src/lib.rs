//! The self-metrics channel.
//!
//! Components of tally report their own measurements to a shared [`Channel`]. Observations are
//! aggregated in memory per name and source into windows of the flush interval. Once started,
//! the channel periodically summarizes all live windows and posts each summary to the gauges API
//! in its own request.
//!
//! The channel runs two threads connected by a bounded outbox:
//!
//!  - The flusher wakes up every flush interval and pushes a summary of every bucket into the
//!    outbox while holding the buffer lock. A full outbox blocks the flusher, and with it all
//!    producers, until the poster catches up.
//!  - The poster drains the outbox one summary at a time. Failed posts are logged and dropped.
//!
//! Without a configured URL the channel records nothing, but still prints observations to
//! standard output in verbose mode.
#![warn(missing_docs)]

mod channel;
mod config;
mod transport;

pub use self::channel::*;
pub use self::config::*;
pub use self::transport::*;
