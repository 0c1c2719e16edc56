use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::Serialize;
use tally_metrics::GaugeBatch;
use thiserror::Error;
use url::Url;

use crate::{BasicAuth, StatusCode};

/// An error returned when submitting to the gauges API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The API responded with a status outside the 2xx range.
    #[error("upstream responded with status {status}: {body}")]
    Status {
        /// The response status.
        status: StatusCode,
        /// The response body, empty if it could not be read.
        body: String,
    },
    /// The request could not be sent or the client could not be built.
    #[error("could not send request")]
    Reqwest(#[from] reqwest::Error),
    /// The batch could not be serialized.
    #[error("failed to serialize payload")]
    Json(#[from] serde_json::Error),
}

impl UpstreamError {
    /// Returns `true` if the error indicates a network failure rather than a rejected request.
    pub fn is_network_error(&self) -> bool {
        match self {
            Self::Reqwest(error) => error.is_timeout() || error.is_connect(),
            Self::Status { .. } | Self::Json(_) => false,
        }
    }

    /// Returns the response status, if the API responded.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Options of the HTTP client.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Timeout from sending a request until receiving the full response.
    pub timeout: Duration,
    /// Timeout for establishing connections, including TLS handshakes.
    pub connection_timeout: Duration,
    /// The `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            connection_timeout: Duration::from_secs(3),
            user_agent: concat!("tally/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

/// Submits gauge batches to the API.
///
/// The client is cheap to clone and reuses connections across clones.
#[derive(Clone, Debug)]
pub struct GaugesClient {
    client: reqwest::Client,
}

impl GaugesClient {
    /// Creates a new client.
    pub fn new(options: &ClientOptions) -> Result<Self, UpstreamError> {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(options.connection_timeout)
            .timeout(options.timeout)
            .user_agent(options.user_agent.as_str())
            .gzip(true)
            .build()?;

        Ok(Self { client })
    }

    /// POSTs a batch of gauges as JSON to `url`.
    pub async fn submit<T: Serialize>(
        &self,
        url: &Url,
        auth: Option<&BasicAuth>,
        batch: &GaugeBatch<T>,
    ) -> Result<(), UpstreamError> {
        let body = serde_json::to_vec(batch)?;

        let mut request = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body);

        if let Some(auth) = auth {
            request = request.basic_auth(&auth.username, auth.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(UpstreamError::Status { status, body })
    }
}
