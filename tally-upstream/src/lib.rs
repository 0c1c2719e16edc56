//! Client for the gauges API of the external time-series service.
//!
//! Both the self-metrics channel and the outlet submit [`GaugeBatch`]es as JSON with basic
//! authentication. Any response outside the 2xx range is reported as
//! [`UpstreamError::Status`], carrying the response body if it could be read.
//!
//! [`GaugeBatch`]: tally_metrics::GaugeBatch
#![warn(missing_docs)]

mod client;
mod endpoint;

pub use self::client::*;
pub use self::endpoint::*;

pub use reqwest::StatusCode;
pub use url::{ParseError, Url};
