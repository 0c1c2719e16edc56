use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tally_common::time::UnixTimestamp;
use tally_metchan::{Channel, ChannelMetric};
use tally_metrics::{GaugeBatch, RawSample, SampleKey, aggregate_all};
use tally_system::ShutdownHandle;
use tally_upstream::UpstreamError;
use thiserror::Error;

use crate::{
    ConsumerDirectory, DirectoryError, LeaseService, MetricsApi, OutletConfig, SampleStore,
    StoreError,
};

/// Self-metrics reported by the outlet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutletMetrics {
    /// Number of gauges in a batch, recorded before the batch is submitted.
    Submitted,
    /// A consumer or partition failed to export.
    Error,
    /// Time in milliseconds to snapshot a partition.
    Snapshot,
    /// A partition lease was acquired by this worker.
    LeaseAcquired,
    /// Number of records skipped in a snapshot because they could not be parsed.
    SampleInvalid,
}

impl ChannelMetric for OutletMetrics {
    fn name(&self) -> &'static str {
        match self {
            Self::Submitted => "outlet.submitted",
            Self::Error => "outlet.error",
            Self::Snapshot => "outlet.snapshot",
            Self::LeaseAcquired => "outlet.lease.acquired",
            Self::SampleInvalid => "outlet.sample.invalid",
        }
    }
}

/// An error while exporting a partition or one of its consumers.
#[derive(Debug, Error)]
pub enum OutletError {
    /// The credentials of the consumer could not be resolved.
    #[error("failed to resolve consumer credentials")]
    Directory(#[from] DirectoryError),
    /// The gauges API rejected the batch or could not be reached.
    #[error("failed to submit gauges")]
    Submit(#[from] UpstreamError),
    /// The sample store or lease service failed.
    #[error("failed to read samples")]
    Store(#[from] StoreError),
}

impl OutletError {
    /// Returns `true` if the gauges API could not be reached.
    pub fn is_network_error(&self) -> bool {
        match self {
            Self::Submit(error) => error.is_network_error(),
            Self::Directory(_) | Self::Store(_) => false,
        }
    }

    /// Returns the status code of the gauges API, if it responded.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Submit(error) => error.status().map(|status| status.as_u16()),
            Self::Directory(_) | Self::Store(_) => None,
        }
    }
}

/// Outcome of processing one partition for one bucket.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PartitionReport {
    /// The lease is held by another worker, or by this worker in an earlier round.
    Skipped,
    /// The partition was exported.
    Exported {
        /// Number of consumers with samples in the partition.
        consumers: usize,
        /// Number of consumers that failed to export.
        failed: usize,
        /// Number of gauges submitted successfully.
        gauges: usize,
        /// Number of records skipped as invalid.
        invalid: usize,
    },
}

/// Backends used by the [`OutletService`].
#[derive(Clone)]
pub struct OutletBackends {
    /// Raw samples written by the receivers.
    pub store: Arc<dyn SampleStore>,
    /// Coordinates partitions across the fleet.
    pub leases: Arc<dyn LeaseService>,
    /// Credentials of consumers.
    pub directory: Arc<dyn ConsumerDirectory>,
    /// Destination of aggregated gauges.
    pub api: Arc<dyn MetricsApi>,
}

/// Periodically exports the samples of all partitions.
pub struct OutletService {
    config: OutletConfig,
    app_name: String,
    backends: OutletBackends,
    metchan: Arc<Channel>,
}

impl OutletService {
    /// Creates the service. Leases are namespaced by `app_name`.
    pub fn new(
        config: OutletConfig,
        app_name: &str,
        backends: OutletBackends,
        metchan: Arc<Channel>,
    ) -> Self {
        Self {
            config,
            app_name: app_name.to_owned(),
            backends,
            metchan,
        }
    }

    /// Runs rounds until shutdown is requested.
    ///
    /// A round in progress is always completed.
    pub async fn run(self, mut shutdown: ShutdownHandle) {
        tally_log::info!(
            partitions = self.config.partitions,
            concurrency = self.config.concurrency,
            "outlet started"
        );

        while shutdown.get().is_none() {
            self.run_round(UnixTimestamp::now()).await;

            tokio::select! {
                biased;

                _ = shutdown.notified() => break,
                _ = tokio::time::sleep(self.config.poll_interval()) => (),
            }
        }

        tally_log::info!("outlet stopped");
    }

    /// Returns the bucket exported in a round starting at `now`.
    pub fn target_bucket(&self, now: UnixTimestamp) -> Option<UnixTimestamp> {
        now.truncate(self.config.bucket_interval())
            .checked_sub(self.config.delay())
    }

    /// Visits every partition once and exports the target bucket of `now`.
    ///
    /// Returns the report of every partition in order. Failed partitions are logged and left out.
    pub async fn run_round(&self, now: UnixTimestamp) -> Vec<PartitionReport> {
        let Some(bucket) = self.target_bucket(now) else {
            return Vec::new();
        };

        let mut reports = Vec::with_capacity(self.config.partitions as usize);
        for partition in 0..self.config.partitions {
            match self.process_partition(partition, bucket).await {
                Ok(report) => reports.push(report),
                Err(error) => {
                    self.metchan.record(OutletMetrics::Error, 1.0);
                    tally_log::error!(
                        error = &error as &dyn Error,
                        partition,
                        bucket = bucket.as_secs(),
                        "failed to process partition"
                    );
                }
            }
        }

        reports
    }

    /// Exports `bucket` of `partition` if the lease for the pair can be acquired.
    pub async fn process_partition(
        &self,
        partition: u32,
        bucket: UnixTimestamp,
    ) -> Result<PartitionReport, OutletError> {
        let lease = format!("{}.outlet.{partition}.{bucket}", self.app_name);
        let acquired = self
            .backends
            .leases
            .acquire(&lease, self.config.lease_ttl())
            .await?;

        if !acquired {
            tally_log::trace!(partition, bucket = bucket.as_secs(), "partition leased");
            return Ok(PartitionReport::Skipped);
        }
        self.metchan.record(OutletMetrics::LeaseAcquired, 1.0);

        let start = Instant::now();
        let (samples, invalid) = self.snapshot(partition, bucket).await?;
        self.metchan.time_since(OutletMetrics::Snapshot, start);
        if invalid > 0 {
            self.metchan
                .record(OutletMetrics::SampleInvalid, invalid as f64);
        }

        let mut consumers: BTreeMap<String, Vec<RawSample>> = BTreeMap::new();
        for sample in samples {
            consumers
                .entry(sample.consumer.clone())
                .or_default()
                .push(sample);
        }

        let total = consumers.len();
        let results: Vec<_> = stream::iter(consumers)
            .map(|(consumer, samples)| async move {
                let result = self.export_consumer(&consumer, samples, bucket).await;
                if let Err(error) = &result {
                    self.metchan.record(OutletMetrics::Error, 1.0);
                    tally_log::warn!(
                        error = error as &dyn Error,
                        consumer = consumer.as_str(),
                        partition,
                        bucket = bucket.as_secs(),
                        network = error.is_network_error(),
                        status = error.status_code(),
                        "failed to export consumer"
                    );
                }
                result
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let failed = results.iter().filter(|result| result.is_err()).count();
        let gauges: usize = results.iter().flatten().sum();

        tally_log::debug!(
            partition,
            bucket = bucket.as_secs(),
            consumers = total,
            failed,
            gauges,
            "partition exported"
        );

        Ok(PartitionReport::Exported {
            consumers: total,
            failed,
            gauges,
            invalid,
        })
    }

    /// Reads all valid samples of the partition and counts the invalid ones.
    ///
    /// Keys that cannot be parsed have no partition and are counted by partition 0 only.
    async fn snapshot(
        &self,
        partition: u32,
        bucket: UnixTimestamp,
    ) -> Result<(Vec<RawSample>, usize), StoreError> {
        let partitions = self.config.partitions;
        let mut invalid = 0;

        let mut keys = Vec::new();
        for key in self.backends.store.scan(&SampleKey::pattern(bucket)).await? {
            match key.parse::<SampleKey>() {
                Ok(parsed) if parsed.bucket == bucket => {
                    if parsed.in_partition(partition, partitions) {
                        keys.push(key);
                    }
                }
                Ok(_) => (),
                Err(error) => {
                    if partition == 0 {
                        tally_log::debug!(error = &error as &dyn Error, "skipping sample");
                        invalid += 1;
                    }
                }
            }
        }

        let records = self.backends.store.get_many(&keys).await?;

        let mut samples = Vec::with_capacity(keys.len());
        for (key, record) in keys.iter().zip(records) {
            // Gone since the scan.
            let Some(record) = record else { continue };

            match RawSample::from_record(key, &record) {
                Ok(sample) => samples.push(sample),
                Err(error) => {
                    tally_log::debug!(
                        error = &error as &dyn Error,
                        key = key.as_str(),
                        "skipping sample"
                    );
                    invalid += 1;
                }
            }
        }

        Ok((samples, invalid))
    }

    /// Aggregates and submits the samples of one consumer. Returns the number of gauges sent.
    async fn export_consumer(
        &self,
        consumer: &str,
        samples: Vec<RawSample>,
        bucket: UnixTimestamp,
    ) -> Result<usize, OutletError> {
        let credentials = self.backends.directory.lookup(consumer).await?;

        let gauges = aggregate_all(samples, &self.config.statistics, bucket);
        if gauges.is_empty() {
            return Ok(0);
        }

        let batch = GaugeBatch::new(gauges);
        self.metchan
            .record(OutletMetrics::Submitted, batch.len() as f64);
        self.backends.api.submit(&credentials, &batch).await?;

        Ok(batch.len())
    }
}
