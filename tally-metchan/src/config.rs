use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration of the self-metrics channel.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MetchanConfig {
    /// URL of the gauges API, including credentials as user info.
    ///
    /// The channel only records and exports metrics if this is set.
    pub url: Option<String>,

    /// Print every observation to standard output.
    pub verbose: bool,

    /// Window size and flush interval in seconds.
    pub flush_interval: u64,

    /// Number of summaries that may wait for the poster before flushing blocks.
    pub outbox_capacity: usize,
}

impl MetchanConfig {
    /// Returns the flush interval as a duration.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval)
    }
}

impl Default for MetchanConfig {
    fn default() -> Self {
        Self {
            url: None,
            verbose: false,
            flush_interval: 60,
            outbox_capacity: 10,
        }
    }
}
