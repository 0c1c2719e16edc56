use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tally_auth::Credentials;
use tally_metrics::{Gauge, GaugeBatch};
use tally_redis::RedisError;
use tally_upstream::{BasicAuth, GaugesClient, UpstreamError, Url};
use thiserror::Error;

use crate::ConsumerCredentials;

/// A raw sample as stored: field names mapped to values.
pub type Record = HashMap<String, String>;

/// An error returned by the sample store or lease service.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Redis could not be reached or rejected the command.
    #[error("failed to query the sample store")]
    Redis(#[from] RedisError),
}

/// An error returned when resolving the credentials of a consumer.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The directory has no credentials for the consumer.
    #[error("unknown consumer {0:?}")]
    NotFound(String),
    /// Redis could not be reached or rejected the command.
    #[error("failed to query the consumer directory")]
    Redis(#[from] RedisError),
}

/// Read access to raw samples written by the receivers.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Returns all keys matching a glob `pattern`.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Returns the record stored at `key`, or `None` if it no longer exists.
    async fn get(&self, key: &str) -> Result<Option<Record>, StoreError>;

    /// Returns the records of all `keys`, in the same order.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Record>>, StoreError> {
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            records.push(self.get(key).await?);
        }
        Ok(records)
    }
}

/// Fleet-wide mutual exclusion.
#[async_trait]
pub trait LeaseService: Send + Sync {
    /// Tries to acquire the lease `name` for `ttl`.
    ///
    /// Returns `false` if the lease is currently held, by this or any other worker.
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<bool, StoreError>;
}

/// Resolves consumers to their credentials at the gauges API.
#[async_trait]
pub trait ConsumerDirectory: Send + Sync {
    /// Returns the credentials of `consumer`.
    async fn lookup(&self, consumer: &str) -> Result<Credentials, DirectoryError>;
}

/// Submits aggregated gauges on behalf of a consumer.
#[async_trait]
pub trait MetricsApi: Send + Sync {
    /// Submits `batch` authenticated with `credentials`.
    async fn submit(
        &self,
        credentials: &Credentials,
        batch: &GaugeBatch<Gauge>,
    ) -> Result<(), UpstreamError>;
}

/// A directory with a fixed set of consumers.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    consumers: BTreeMap<String, Credentials>,
}

impl StaticDirectory {
    /// Creates a directory from configured credentials.
    pub fn new(consumers: &BTreeMap<String, ConsumerCredentials>) -> Self {
        let consumers = consumers
            .iter()
            .map(|(id, credentials)| (id.clone(), credentials.into()))
            .collect();

        Self { consumers }
    }
}

#[async_trait]
impl ConsumerDirectory for StaticDirectory {
    async fn lookup(&self, consumer: &str) -> Result<Credentials, DirectoryError> {
        self.consumers
            .get(consumer)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(consumer.to_owned()))
    }
}

/// Submits gauges to the HTTP gauges API with basic authentication.
#[derive(Clone, Debug)]
pub struct HttpMetricsApi {
    client: GaugesClient,
    url: Url,
}

impl HttpMetricsApi {
    /// Creates an API client posting to `url`.
    pub fn new(client: GaugesClient, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl MetricsApi for HttpMetricsApi {
    async fn submit(
        &self,
        credentials: &Credentials,
        batch: &GaugeBatch<Gauge>,
    ) -> Result<(), UpstreamError> {
        let auth = BasicAuth::new(credentials.user.as_str(), credentials.secret.as_str());
        self.client.submit(&self.url, Some(&auth), batch).await
    }
}
