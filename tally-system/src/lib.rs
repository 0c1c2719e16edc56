//! Lifecycle management for tally's long-running services.
//!
//! The [`Controller`] listens for process signals and broadcasts a [`Shutdown`] to every
//! [`ShutdownHandle`] obtained from it. Services select on [`ShutdownHandle::notified`] between
//! units of work and exit once it resolves.
#![warn(missing_docs)]

mod controller;

pub use self::controller::*;
