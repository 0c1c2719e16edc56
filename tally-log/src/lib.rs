//! Logging facade for tally.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with a [`LogConfig`]. The configuration
//! implements `serde` traits, so it can be obtained from configuration files.
//!
//! ```ignore
//! let config = tally_log::LogConfig::default();
//! tally_log::init(&config);
//! ```
//!
//! # Logging
//!
//! Use the five logging macros [`error!`], [`warn!`], [`info!`], [`debug!`] and [`trace!`].
//!
//! ## Conventions
//!
//! Log messages should start lowercase and end without punctuation. Prefer short and precise log
//! messages and attach context as structured fields:
//!
//! - [`error!`] for bugs and invalid behavior.
//! - [`warn!`] for undesirable behavior, such as a failed submission.
//! - [`info!`] for messages relevant to the operator.
//! - [`debug!`] for messages usually relevant to debugging.
//! - [`trace!`] for full auxiliary information.
//!
//! ```
//! tally_log::info!(partition = 3, "acquired outlet lease");
//! ```
//!
//! ## Logging Error Types
//!
//! To log errors together with all their causes, use the [`LogError`] wrapper:
//!
//! ```
//! use tally_log::LogError;
//!
//! if let Err(error) = std::env::var("FOO") {
//!     tally_log::warn!("env failed: {}", LogError(&error));
//! }
//! ```
//!
//! # Testing
//!
//! For unit tests, call [`init_test!`] at the beginning of the test. It captures output in the
//! test runner and enables trace logs for the calling crate only.

#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
mod test;
#[cfg(feature = "test")]
pub use test::*;

mod config;
pub use config::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{Level, debug, error, info, trace, warn};
