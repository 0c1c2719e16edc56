use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_common::time::UnixTimestamp;

/// The number of values a [`Bucket`] can hold before it has to reallocate.
///
/// Buckets retain their allocation when they roll over into a new window, so this is paid once
/// per bucket rather than once per window.
pub const BUCKET_CAPACITY: usize = 10_000;

/// Identifies the time window of a metric.
///
/// Two identities are equal if name, source, resolution and window start all match.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MetricIdentity {
    /// The full name of the metric, including the application namespace.
    pub name: String,
    /// The host or tenant the metric was observed on.
    pub source: String,
    /// The length of the time window.
    pub resolution: Duration,
    /// The start of the time window, a multiple of `resolution`.
    pub time: UnixTimestamp,
}

impl MetricIdentity {
    /// Creates the identity of the window that contains `now`.
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        resolution: Duration,
        now: UnixTimestamp,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            resolution,
            time: now.truncate(resolution),
        }
    }

    /// Returns the key under which buckets of this identity are stored.
    ///
    /// The key does not include the window, so consecutive windows of a metric share a key.
    pub fn key(&self) -> String {
        format!("{}:{}", self.name, self.source)
    }
}

/// A window of observed values for a single metric.
///
/// The bucket has no internal locking. Concurrent writers must guard it externally.
#[derive(Clone, Debug)]
pub struct Bucket {
    identity: MetricIdentity,
    values: Vec<f64>,
}

impl Bucket {
    /// Creates an empty bucket pre-sized to [`BUCKET_CAPACITY`] values.
    pub fn new(identity: MetricIdentity) -> Self {
        Self {
            identity,
            values: Vec::with_capacity(BUCKET_CAPACITY),
        }
    }

    /// Returns the identity of the current window.
    pub fn identity(&self) -> &MetricIdentity {
        &self.identity
    }

    /// Returns the values of the current window in insertion order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Appends `value` to the window containing `now`.
    ///
    /// If `now` falls into a different window than the one currently held, the bucket rolls over:
    /// all values are discarded while the allocation is kept.
    pub fn insert(&mut self, now: UnixTimestamp, value: f64) {
        let time = now.truncate(self.identity.resolution);
        if time != self.identity.time {
            self.identity.time = time;
            self.values.clear();
        }

        self.values.push(value);
    }

    /// Appends `value` to the window containing the current wall clock time.
    pub fn add(&mut self, value: f64) {
        self.insert(UnixTimestamp::now(), value);
    }

    /// Returns `true` if the current window holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of values in the current window.
    pub fn count(&self) -> usize {
        self.values.len()
    }

    /// Returns the sum of all values, or `0` if empty.
    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Returns the largest value, or `0` if empty.
    pub fn max(&self) -> f64 {
        self.values.iter().copied().reduce(f64::max).unwrap_or_default()
    }

    /// Returns the smallest value, or `0` if empty.
    pub fn min(&self) -> f64 {
        self.values.iter().copied().reduce(f64::min).unwrap_or_default()
    }

    /// Summarizes the current window.
    pub fn to_aggregate(&self) -> AggregatedMetric {
        AggregatedMetric {
            name: self.identity.name.clone(),
            measure_time: self.identity.time,
            source: self.identity.source.clone(),
            count: self.count(),
            sum: self.sum(),
            max: self.max(),
            min: self.min(),
        }
    }
}

/// A summary of a [`Bucket`] in the shape accepted by the gauges API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetric {
    /// Full name of the metric.
    pub name: String,
    /// Start of the window.
    pub measure_time: UnixTimestamp,
    /// Host or tenant the metric was observed on.
    pub source: String,
    /// Number of values.
    pub count: usize,
    /// Sum of all values.
    pub sum: f64,
    /// Largest value.
    pub max: f64,
    /// Smallest value.
    pub min: f64,
}

impl fmt::Display for AggregatedMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = &self.name;
        write!(
            f,
            "source={} sample#{name}.count={} sample#{name}.sum={} sample#{name}.max={} sample#{name}.min={}",
            self.source, self.count, self.sum, self.max, self.min
        )
    }
}
