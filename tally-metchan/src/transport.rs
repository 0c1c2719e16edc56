use async_trait::async_trait;
use tally_metrics::{AggregatedMetric, GaugeBatch};
use tally_upstream::{Endpoint, GaugesClient, UpstreamError};

/// Delivers flushed summaries to their destination.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a single batch.
    async fn send(&self, batch: &GaugeBatch<AggregatedMetric>) -> Result<(), UpstreamError>;
}

/// Posts summaries to the gauges API.
#[derive(Debug)]
pub struct HttpTransport {
    client: GaugesClient,
    endpoint: Endpoint,
}

impl HttpTransport {
    /// Creates a transport posting to `endpoint`, authenticating with its user info.
    pub fn new(client: GaugesClient, endpoint: Endpoint) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &GaugeBatch<AggregatedMetric>) -> Result<(), UpstreamError> {
        self.client
            .submit(self.endpoint.url(), self.endpoint.auth(), batch)
            .await
    }
}
