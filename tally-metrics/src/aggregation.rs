use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tally_common::time::UnixTimestamp;

use crate::{MetricKind, RawSample, Statistic, Summary};

/// The type tag of a [`Gauge`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GaugeType {
    /// A plain gauge value.
    #[default]
    Gauge,
}

/// Display attributes attached to a [`Gauge`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GaugeAttributes {
    /// Long form of the unit label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_units_long: Option<String>,
}

/// A single aggregated value submitted to the metrics API on behalf of a tenant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gauge {
    /// Name including the aggregation suffix, for example `db.latency.p95`.
    pub name: String,
    /// The aggregated value.
    pub value: f64,
    /// The source of the aggregated samples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Always [`GaugeType::Gauge`].
    #[serde(rename = "type")]
    pub ty: GaugeType,
    /// Start of the bucket the value was aggregated from.
    pub measure_time: UnixTimestamp,
    /// Display attributes.
    pub attributes: GaugeAttributes,
}

/// The request body of the gauges API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaugeBatch<T> {
    /// All gauges of the request.
    pub gauges: Vec<T>,
}

impl<T> GaugeBatch<T> {
    /// Creates a batch from the given gauges.
    pub fn new(gauges: Vec<T>) -> Self {
        Self { gauges }
    }

    /// Returns the number of gauges in the batch.
    pub fn len(&self) -> usize {
        self.gauges.len()
    }

    /// Returns `true` if the batch holds no gauges.
    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty()
    }
}

/// Reduces a group of samples sharing the same metric key into gauges.
///
/// The name, kind, source and label are taken from the first sample of the group. Depending on
/// the kind, this produces:
///
///  - [`MetricKind::Counter`]: `<name>.count`, the sum of all values.
///  - [`MetricKind::Last`]: `<name>.last`, the value of the sample observed last. Samples are
///    ordered by their observation time, falling back to the order of the group.
///  - [`MetricKind::Distribution`]: `<name>.<statistic>` for every requested statistic.
///  - [`MetricKind::Unknown`]: nothing.
pub fn aggregate(
    group: &[RawSample],
    statistics: &[Statistic],
    measure_time: UnixTimestamp,
) -> Vec<Gauge> {
    let Some(representative) = group.first() else {
        return Vec::new();
    };

    let gauge = |suffix: &str, value: f64| Gauge {
        name: format!("{}.{suffix}", representative.name),
        value,
        source: representative.source.clone(),
        ty: GaugeType::Gauge,
        measure_time,
        attributes: GaugeAttributes {
            display_units_long: representative.label.clone(),
        },
    };

    match &representative.kind {
        MetricKind::Counter => {
            let sum = group.iter().map(|sample| sample.value).sum();
            vec![gauge("count", sum)]
        }
        MetricKind::Last => last_value(group)
            .map(|value| vec![gauge("last", value)])
            .unwrap_or_default(),
        MetricKind::Distribution => {
            let values = chronological(group);
            let Some(summary) = Summary::new(&values) else {
                return Vec::new();
            };

            statistics
                .iter()
                .map(|&statistic| gauge(&statistic.to_string(), summary.get(statistic)))
                .collect()
        }
        MetricKind::Unknown(kind) => {
            tally_log::debug!(
                metric = representative.name.as_str(),
                kind = kind.as_str(),
                "dropping samples of unknown kind"
            );
            Vec::new()
        }
    }
}

/// Groups samples by metric key and aggregates every group.
///
/// Groups are emitted in ascending order of their metric key.
pub fn aggregate_all<I>(
    samples: I,
    statistics: &[Statistic],
    measure_time: UnixTimestamp,
) -> Vec<Gauge>
where
    I: IntoIterator<Item = RawSample>,
{
    let mut groups: BTreeMap<u64, Vec<RawSample>> = BTreeMap::new();
    for sample in samples {
        groups.entry(sample.metric_key).or_default().push(sample);
    }

    groups
        .values()
        .flat_map(|group| aggregate(group, statistics, measure_time))
        .collect()
}

/// Returns the value of the sample observed last.
///
/// Samples with an observation time win over samples without one. Ties resolve to the sample
/// that appears later in the group.
fn last_value(group: &[RawSample]) -> Option<f64> {
    group
        .iter()
        .enumerate()
        .max_by_key(|(index, sample)| (sample.time, *index))
        .map(|(_, sample)| sample.value)
}

/// Returns the values of the group in observation order.
fn chronological(group: &[RawSample]) -> Vec<f64> {
    let mut ordered: Vec<&RawSample> = group.iter().collect();
    // Stable, so samples without a time keep the order of the group.
    ordered.sort_by_key(|sample| sample.time);
    ordered.iter().map(|sample| sample.value).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample(kind: MetricKind, value: f64, time: Option<u64>) -> RawSample {
        RawSample {
            consumer: "c-1".to_owned(),
            metric_key: 1,
            name: "db.latency".to_owned(),
            kind,
            source: Some("db.1".to_owned()),
            label: Some("milliseconds".to_owned()),
            value,
            bucket_time: UnixTimestamp::from_secs(60),
            time,
        }
    }

    fn values(gauges: &[Gauge]) -> Vec<(&str, f64)> {
        gauges
            .iter()
            .map(|gauge| (gauge.name.as_str(), gauge.value))
            .collect()
    }

    const T: UnixTimestamp = UnixTimestamp::from_secs(60);

    #[test]
    fn test_counter() {
        let group = [
            sample(MetricKind::Counter, 1.0, None),
            sample(MetricKind::Counter, 2.0, None),
            sample(MetricKind::Counter, 3.0, None),
        ];

        let gauges = aggregate(&group, Statistic::DEFAULT, T);
        assert_eq!(values(&gauges), [("db.latency.count", 6.0)]);
    }

    #[test]
    fn test_last_store_order() {
        let group = [
            sample(MetricKind::Last, 5.0, None),
            sample(MetricKind::Last, 7.0, None),
        ];

        let gauges = aggregate(&group, Statistic::DEFAULT, T);
        assert_eq!(values(&gauges), [("db.latency.last", 7.0)]);
    }

    #[test]
    fn test_last_by_time() {
        let group = [
            sample(MetricKind::Last, 5.0, Some(61_500)),
            sample(MetricKind::Last, 7.0, Some(60_100)),
            sample(MetricKind::Last, 9.0, Some(61_500)),
            sample(MetricKind::Last, 1.0, Some(60_900)),
        ];

        let gauges = aggregate(&group, Statistic::DEFAULT, T);
        assert_eq!(values(&gauges), [("db.latency.last", 9.0)]);
    }

    #[test]
    fn test_distribution() {
        let group = [
            sample(MetricKind::Distribution, 1.0, None),
            sample(MetricKind::Distribution, 2.0, None),
            sample(MetricKind::Distribution, 3.0, None),
            sample(MetricKind::Distribution, 4.0, None),
        ];

        let gauges = aggregate(&group, Statistic::DEFAULT, T);
        assert_eq!(
            values(&gauges),
            [
                ("db.latency.min", 1.0),
                ("db.latency.median", 2.0),
                ("db.latency.p95", 4.0),
                ("db.latency.p99", 4.0),
                ("db.latency.max", 4.0),
                ("db.latency.mean", 2.5),
                ("db.latency.count", 4.0),
                ("db.latency.sum", 10.0),
            ]
        );
    }

    #[test]
    fn test_distribution_last_statistic() {
        let group = [
            sample(MetricKind::Distribution, 8.0, Some(3)),
            sample(MetricKind::Distribution, 2.0, Some(1)),
        ];

        let gauges = aggregate(&group, &[Statistic::Last], T);
        assert_eq!(values(&gauges), [("db.latency.last", 8.0)]);
    }

    #[test]
    fn test_unknown_kind() {
        tally_log::init_test!();

        let group = [sample(MetricKind::Unknown("histogram".to_owned()), 1.0, None)];
        assert!(aggregate(&group, Statistic::DEFAULT, T).is_empty());
    }

    #[test]
    fn test_empty_group() {
        assert!(aggregate(&[], Statistic::DEFAULT, T).is_empty());
    }

    #[test]
    fn test_aggregate_all_groups_by_metric_key() {
        let mut requests = sample(MetricKind::Counter, 2.0, None);
        requests.metric_key = 9;
        requests.name = "requests".to_owned();

        let mut queue = sample(MetricKind::Last, 3.0, None);
        queue.metric_key = 4;
        queue.name = "queue.depth".to_owned();

        let samples = vec![
            requests.clone(),
            queue,
            requests,
            sample(MetricKind::Unknown("set".to_owned()), 1.0, None),
        ];

        let gauges = aggregate_all(samples, Statistic::DEFAULT, T);
        assert_eq!(
            values(&gauges),
            [("queue.depth.last", 3.0), ("requests.count", 4.0)]
        );
    }

    #[test]
    fn test_gauge_serialization() {
        let mut unlabeled = sample(MetricKind::Counter, 1.0, None);
        unlabeled.source = None;
        unlabeled.label = None;

        let mut gauges = aggregate(&[sample(MetricKind::Counter, 2.0, None)], &[], T);
        gauges.extend(aggregate(&[unlabeled], &[], T));

        let batch = GaugeBatch::new(gauges);
        similar_asserts::assert_eq!(
            serde_json::to_value(&batch).unwrap(),
            json!({
                "gauges": [
                    {
                        "name": "db.latency.count",
                        "value": 2.0,
                        "source": "db.1",
                        "type": "gauge",
                        "measure_time": 60,
                        "attributes": {"display_units_long": "milliseconds"}
                    },
                    {
                        "name": "db.latency.count",
                        "value": 1.0,
                        "type": "gauge",
                        "measure_time": 60,
                        "attributes": {}
                    }
                ]
            })
        );
    }
}
