use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_auth::Credentials;
use tally_metrics::Statistic;

/// The default endpoint of the gauges API.
pub const DEFAULT_API_URL: &str = "https://metrics-api.librato.com/v1/metrics";

/// Largest clock difference between two workers of a fleet that leases tolerate.
///
/// A bucket stays the target of a worker for one bucket interval, measured by its own clock. A
/// lease must therefore live for at least `bucket_interval` plus this margin.
pub const LEASE_CLOCK_SKEW: Duration = Duration::from_secs(30);

/// Credentials of a consumer in a static directory.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct ConsumerCredentials {
    /// User name at the gauges API.
    pub user: String,
    /// Password or API token.
    #[serde(default)]
    pub secret: String,
}

impl From<&ConsumerCredentials> for Credentials {
    fn from(value: &ConsumerCredentials) -> Self {
        Credentials::new(value.user.as_str(), value.secret.as_str())
    }
}

/// Where consumer credentials are looked up.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DirectoryConfig {
    /// Hashes named `<app_name>.consumer.<id>` in Redis.
    #[default]
    Redis,
    /// A fixed set of consumers.
    Static {
        /// Credentials by consumer id.
        consumers: BTreeMap<String, ConsumerCredentials>,
    },
}

/// Configuration of the outlet.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct OutletConfig {
    /// Run the outlet in this process.
    pub enabled: bool,

    /// Number of partitions the sample space is split into.
    ///
    /// All workers of a fleet must use the same value.
    pub partitions: u32,

    /// Lifetime of a partition lease in seconds.
    ///
    /// Must be at least `bucket_interval` plus [`LEASE_CLOCK_SKEW`], so that a bucket cannot be
    /// leased twice.
    pub lease_ttl: u64,

    /// Age of the bucket processed in a round, in seconds behind the current bucket.
    ///
    /// Gives receivers time to write all samples of a bucket before it is exported.
    pub delay: u64,

    /// Length of a bucket in seconds. Must match the receivers.
    pub bucket_interval: u64,

    /// Pause between two rounds in milliseconds.
    pub poll_interval: u64,

    /// Maximum number of consumers submitted concurrently within a partition.
    pub concurrency: usize,

    /// URL of the gauges API.
    pub api_url: String,

    /// Statistics reported for distributions.
    pub statistics: Vec<Statistic>,

    /// Where consumer credentials are looked up.
    pub directory: DirectoryConfig,
}

impl OutletConfig {
    /// Returns the lease lifetime.
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl)
    }

    /// Returns the processing delay.
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay)
    }

    /// Returns the bucket length.
    pub fn bucket_interval(&self) -> Duration {
        Duration::from_secs(self.bucket_interval)
    }

    /// Returns the pause between rounds.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }
}

impl Default for OutletConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            partitions: 1,
            lease_ttl: 120,
            delay: 60,
            bucket_interval: 60,
            poll_interval: 1000,
            concurrency: 1,
            api_url: DEFAULT_API_URL.to_owned(),
            statistics: Statistic::defaults(),
            directory: DirectoryConfig::default(),
        }
    }
}
