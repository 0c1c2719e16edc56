use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use tally_common::time::UnixTimestamp;
use thiserror::Error;

/// Determines how a group of raw samples is aggregated.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum MetricKind {
    /// Values are summed up into `<name>.count`.
    Counter,
    /// The chronologically last value is reported as `<name>.last`.
    Last,
    /// Every configured [`Statistic`](crate::Statistic) is reported as `<name>.<statistic>`.
    Distribution,
    /// A kind that is not understood. Samples of this kind produce no output.
    Unknown(String),
}

impl MetricKind {
    /// Parses a kind, accepting the aliases used by older receivers.
    ///
    /// Unrecognized strings map to [`MetricKind::Unknown`].
    pub fn parse(s: &str) -> Self {
        match s {
            "counter" | "count" => Self::Counter,
            "last" | "sample" => Self::Last,
            "distribution" | "measure" => Self::Distribution,
            other => Self::Unknown(other.to_owned()),
        }
    }

    /// Returns the canonical name of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Counter => "counter",
            Self::Last => "last",
            Self::Distribution => "distribution",
            Self::Unknown(other) => other,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned when a record from the sample store cannot be interpreted.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum SampleError {
    /// The key does not have the shape `<metric_key>:<bucket>:<id>`.
    #[error("invalid sample key {0:?}")]
    InvalidKey(String),
    /// A required field is absent or empty.
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    /// The value is not a finite number.
    #[error("invalid sample value {0:?}")]
    InvalidValue(String),
    /// The observation time is not an integer.
    #[error("invalid sample time {0:?}")]
    InvalidTime(String),
}

/// The parsed key of a record in the sample store.
///
/// Keys have the format `<metric_key>:<bucket>:<id>`. The numeric `metric_key` groups samples of
/// the same metric and doubles as the partition hint. `bucket` is the unix timestamp of the
/// window the sample belongs to.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SampleKey {
    /// Identifies the metric within the tenant and selects the partition.
    pub metric_key: u64,
    /// The window the sample belongs to.
    pub bucket: UnixTimestamp,
    /// Unique identifier of the sample.
    pub id: String,
}

impl SampleKey {
    /// Returns a glob pattern matching all sample keys of the given bucket.
    pub fn pattern(bucket: UnixTimestamp) -> String {
        format!("*:{bucket}:*")
    }

    /// Returns `true` if this key is assigned to `partition` out of `partitions`.
    pub fn in_partition(&self, partition: u32, partitions: u32) -> bool {
        partitions > 0 && self.metric_key % u64::from(partitions) == u64::from(partition)
    }
}

impl FromStr for SampleKey {
    type Err = SampleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SampleError::InvalidKey(s.to_owned());

        let mut parts = s.splitn(3, ':');
        let metric_key = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let bucket = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let id = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;

        Ok(Self {
            metric_key,
            bucket,
            id: id.to_owned(),
        })
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.metric_key, self.bucket, self.id)
    }
}

/// A single observation written to the sample store by the receiver.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSample {
    /// Identifier of the tenant that submitted the sample.
    pub consumer: String,
    /// Groups samples of the same metric within a bucket.
    pub metric_key: u64,
    /// Name of the metric.
    pub name: String,
    /// Determines how samples of this metric are aggregated.
    pub kind: MetricKind,
    /// The source the metric was observed on, if any.
    pub source: Option<String>,
    /// Unit label reported as `display_units_long`, if any.
    pub label: Option<String>,
    /// The observed value.
    pub value: f64,
    /// The window the sample belongs to.
    pub bucket_time: UnixTimestamp,
    /// Observation time in unix milliseconds, if recorded by the receiver.
    pub time: Option<u64>,
}

impl RawSample {
    /// Interprets a record from the sample store.
    ///
    /// The record holds the fields `consumer`, `name`, `type`, `source`, `label`, `value` and
    /// optionally `time`. Metric key and bucket are taken from the store key.
    pub fn from_record(key: &str, record: &HashMap<String, String>) -> Result<Self, SampleError> {
        let key: SampleKey = key.parse()?;

        let field = |name: &'static str| {
            record
                .get(name)
                .map(String::as_str)
                .filter(|value| !value.is_empty())
        };
        let required = |name: &'static str| field(name).ok_or(SampleError::MissingField(name));

        let raw_value = required("value")?;
        let value = raw_value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| SampleError::InvalidValue(raw_value.to_owned()))?;

        let time = match field("time") {
            Some(raw) => Some(
                raw.trim()
                    .parse()
                    .map_err(|_| SampleError::InvalidTime(raw.to_owned()))?,
            ),
            None => None,
        };

        Ok(Self {
            consumer: required("consumer")?.to_owned(),
            metric_key: key.metric_key,
            name: required("name")?.to_owned(),
            kind: MetricKind::parse(required("type")?),
            source: field("source").map(str::to_owned),
            label: field("label").map(str::to_owned),
            value,
            bucket_time: key.bucket,
            time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[(&str, &str)]) -> HashMap<String, String> {
        fields
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_parse_kind_aliases() {
        assert_eq!(MetricKind::parse("counter"), MetricKind::Counter);
        assert_eq!(MetricKind::parse("count"), MetricKind::Counter);
        assert_eq!(MetricKind::parse("last"), MetricKind::Last);
        assert_eq!(MetricKind::parse("sample"), MetricKind::Last);
        assert_eq!(MetricKind::parse("distribution"), MetricKind::Distribution);
        assert_eq!(MetricKind::parse("measure"), MetricKind::Distribution);
        assert_eq!(
            MetricKind::parse("histogram"),
            MetricKind::Unknown("histogram".to_owned())
        );
    }

    #[test]
    fn test_parse_sample_key() {
        let key: SampleKey = "1042:1700000040:0b7c:extra".parse().unwrap();
        assert_eq!(key.metric_key, 1042);
        assert_eq!(key.bucket, UnixTimestamp::from_secs(1_700_000_040));
        assert_eq!(key.id, "0b7c:extra");
        assert_eq!(key.to_string(), "1042:1700000040:0b7c:extra");
    }

    #[test]
    fn test_parse_sample_key_invalid() {
        for key in ["", "abc:60:id", "7:later:id", "7:60", "7:60:"] {
            assert_eq!(
                key.parse::<SampleKey>(),
                Err(SampleError::InvalidKey(key.to_owned())),
                "{key}"
            );
        }
    }

    #[test]
    fn test_key_partition() {
        let key: SampleKey = "10:60:id".parse().unwrap();
        assert!(key.in_partition(2, 4));
        assert!(!key.in_partition(1, 4));
        assert!(key.in_partition(0, 1));
        assert!(!key.in_partition(0, 0));
    }

    #[test]
    fn test_pattern() {
        assert_eq!(SampleKey::pattern(UnixTimestamp::from_secs(120)), "*:120:*");
    }

    #[test]
    fn test_from_record() {
        let record = record(&[
            ("consumer", "c-17"),
            ("name", "db.latency"),
            ("type", "measure"),
            ("source", "db.1"),
            ("label", "milliseconds"),
            ("value", "12.5"),
            ("time", "1700000041250"),
        ]);

        let sample = RawSample::from_record("5:1700000040:abc", &record).unwrap();
        assert_eq!(
            sample,
            RawSample {
                consumer: "c-17".to_owned(),
                metric_key: 5,
                name: "db.latency".to_owned(),
                kind: MetricKind::Distribution,
                source: Some("db.1".to_owned()),
                label: Some("milliseconds".to_owned()),
                value: 12.5,
                bucket_time: UnixTimestamp::from_secs(1_700_000_040),
                time: Some(1_700_000_041_250),
            }
        );
    }

    #[test]
    fn test_from_record_optional_fields() {
        let record = record(&[
            ("consumer", "c-17"),
            ("name", "jobs"),
            ("type", "counter"),
            ("source", ""),
            ("value", "1"),
        ]);

        let sample = RawSample::from_record("5:60:abc", &record).unwrap();
        assert_eq!(sample.source, None);
        assert_eq!(sample.label, None);
        assert_eq!(sample.time, None);
    }

    #[test]
    fn test_from_record_invalid() {
        let valid = [
            ("consumer", "c-17"),
            ("name", "jobs"),
            ("type", "counter"),
            ("value", "1"),
        ];

        let missing = record(&valid[1..]);
        assert_eq!(
            RawSample::from_record("5:60:abc", &missing),
            Err(SampleError::MissingField("consumer"))
        );

        let mut bad_value = record(&valid);
        bad_value.insert("value".to_owned(), "NaN".to_owned());
        assert_eq!(
            RawSample::from_record("5:60:abc", &bad_value),
            Err(SampleError::InvalidValue("NaN".to_owned()))
        );

        let mut bad_time = record(&valid);
        bad_time.insert("time".to_owned(), "noon".to_owned());
        assert_eq!(
            RawSample::from_record("5:60:abc", &bad_time),
            Err(SampleError::InvalidTime("noon".to_owned()))
        );

        assert!(matches!(
            RawSample::from_record("five:60:abc", &record(&valid)),
            Err(SampleError::InvalidKey(_))
        ));
    }
}
