use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tally_common::time::UnixTimestamp;
use tally_metrics::{AggregatedMetric, Bucket, GaugeBatch, MetricIdentity};
use tally_upstream::{ClientOptions, Endpoint, GaugesClient, UpstreamError};
use thiserror::Error;

use crate::{HttpTransport, MetchanConfig, Transport};

/// An error returned when creating or starting a [`Channel`].
#[derive(Debug, Error)]
pub enum MetchanError {
    /// The configured URL is invalid.
    #[error("invalid metchan url")]
    InvalidUrl(#[from] tally_upstream::ParseError),
    /// The HTTP client could not be created.
    #[error("failed to create metchan client")]
    Client(#[from] UpstreamError),
    /// The flusher or poster could not be started.
    #[error("failed to start metchan workers")]
    Spawn(#[from] io::Error),
}

/// A metric reported to the [`Channel`].
///
/// Implement this on an enum to keep the names of a component's metrics in one place.
pub trait ChannelMetric {
    /// Returns the name of the metric without the application prefix.
    fn name(&self) -> &'static str;
}

/// State shared between the channel handle and its flusher.
struct Shared {
    app_name: String,
    source: String,
    flush_interval: Duration,
    verbose: bool,
    buffer: Mutex<HashMap<String, Bucket>>,
}

impl Shared {
    fn add(&self, name: String, source: String, value: f64) {
        let now = UnixTimestamp::now();
        let identity = MetricIdentity::new(name, source, self.flush_interval, now);

        let mut buffer = self.buffer.lock();
        match buffer.entry(identity.key()) {
            Entry::Occupied(mut entry) => entry.get_mut().insert(now, value),
            Entry::Vacant(entry) => entry.insert(Bucket::new(identity)).insert(now, value),
        }
    }

    /// Pushes a summary of every live bucket into the outbox.
    ///
    /// Returns `false` if the poster has stopped.
    fn flush(&self, outbox: &Sender<AggregatedMetric>) -> bool {
        let buffer = self.buffer.lock();
        for bucket in buffer.values().filter(|bucket| !bucket.is_empty()) {
            if outbox.send(bucket.to_aggregate()).is_err() {
                tally_log::error!("metchan outbox closed, dropping self metrics");
                return false;
            }
        }

        true
    }
}

struct Workers {
    shutdown: Sender<()>,
    flusher: JoinHandle<()>,
    poster: JoinHandle<()>,
}

/// Aggregates tally's own metrics and exports them to the gauges API.
///
/// All methods take `&self`, so the channel can be shared across threads with an [`Arc`].
pub struct Channel {
    shared: Arc<Shared>,
    transport: Option<Arc<dyn Transport>>,
    outbox_capacity: usize,
    output: Mutex<Box<dyn Write + Send>>,
    workers: Mutex<Option<Workers>>,
}

impl Channel {
    /// Creates a channel from configuration.
    ///
    /// The channel is enabled if a URL is configured. Credentials in the URL authenticate the
    /// requests and are removed from the URL.
    pub fn new(
        app_name: &str,
        config: &MetchanConfig,
        options: &ClientOptions,
    ) -> Result<Self, MetchanError> {
        let transport = match &config.url {
            Some(url) => {
                let endpoint: Endpoint = url.parse()?;
                let client = GaugesClient::new(options)?;
                Some(Arc::new(HttpTransport::new(client, endpoint)) as Arc<dyn Transport>)
            }
            None => None,
        };

        Ok(Self::with_transport(app_name, config, transport))
    }

    /// Creates a channel exporting through the given transport.
    ///
    /// The channel is disabled if `transport` is `None`.
    pub fn with_transport(
        app_name: &str,
        config: &MetchanConfig,
        transport: Option<Arc<dyn Transport>>,
    ) -> Self {
        let source = hostname::get()
            .ok()
            .and_then(|host| host.into_string().ok())
            .unwrap_or_default();

        let shared = Shared {
            app_name: app_name.to_owned(),
            source,
            flush_interval: config.flush_interval(),
            verbose: config.verbose,
            buffer: Mutex::new(HashMap::new()),
        };

        Self {
            shared: Arc::new(shared),
            transport,
            outbox_capacity: config.outbox_capacity,
            output: Mutex::new(Box::new(io::stdout())),
            workers: Mutex::new(None),
        }
    }

    /// Writes verbose measurement lines to `output` instead of stdout.
    pub fn with_output(mut self, output: impl Write + Send + 'static) -> Self {
        self.output = Mutex::new(Box::new(output));
        self
    }

    /// Returns `true` if observations are recorded and exported.
    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Returns the host name used as source of measurements.
    pub fn source(&self) -> &str {
        &self.shared.source
    }

    /// Records `value` under `<app_name>.<name>`.
    pub fn measure(&self, name: &str, value: f64) {
        let shared = &self.shared;
        if shared.verbose {
            let mut output = self.output.lock();
            writeln!(output, "source={} measure#{name}={value}", shared.source).ok();
        }

        if self.is_enabled() {
            let name = format!("{}.{name}", shared.app_name);
            shared.add(name, shared.source.clone(), value);
        }
    }

    /// Records the milliseconds elapsed since `start` under `<app_name>.<name>`.
    pub fn time(&self, name: &str, start: Instant) {
        self.measure(name, start.elapsed().as_millis() as f64);
    }

    /// Records a typed metric.
    pub fn record(&self, metric: impl ChannelMetric, value: f64) {
        self.measure(metric.name(), value);
    }

    /// Records the milliseconds elapsed since `start` for a typed metric.
    pub fn time_since(&self, metric: impl ChannelMetric, start: Instant) {
        self.time(metric.name(), start);
    }

    /// Counts a request received from `user`.
    ///
    /// The user becomes the source of `<app_name>.receiver.requests`, with `@` replaced by `_at_`.
    pub fn count_req(&self, user: &str) {
        if self.is_enabled() {
            let name = format!("{}.receiver.requests", self.shared.app_name);
            self.shared.add(name, user.replace('@', "_at_"), 1.0);
        }
    }

    /// Returns a summary of every live bucket, sorted by name and source.
    pub fn snapshot(&self) -> Vec<AggregatedMetric> {
        let buffer = self.shared.buffer.lock();
        let mut metrics: Vec<_> = buffer.values().map(Bucket::to_aggregate).collect();
        metrics.sort_by(|a, b| (&a.name, &a.source).cmp(&(&b.name, &b.source)));
        metrics
    }

    /// Starts the flusher and the poster.
    ///
    /// Does nothing if the channel is disabled or already running.
    pub fn start(&self) -> Result<(), MetchanError> {
        let Some(transport) = self.transport.clone() else {
            return Ok(());
        };

        let mut workers = self.workers.lock();
        if workers.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (outbox_tx, outbox_rx) = crossbeam_channel::bounded(self.outbox_capacity);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);

        let poster = thread::Builder::new()
            .name("metchan-poster".to_owned())
            .spawn(move || post_loop(runtime, transport, outbox_rx))?;

        let shared = Arc::clone(&self.shared);
        let flusher = thread::Builder::new()
            .name("metchan-flusher".to_owned())
            .spawn(move || flush_loop(shared, outbox_tx, shutdown_rx))?;

        tally_log::debug!(
            interval = self.shared.flush_interval.as_secs(),
            "started metchan"
        );

        *workers = Some(Workers {
            shutdown: shutdown_tx,
            flusher,
            poster,
        });

        Ok(())
    }

    /// Flushes all buckets one last time and waits until the poster has sent them.
    pub fn stop(&self) {
        let Some(workers) = self.workers.lock().take() else {
            return;
        };

        drop(workers.shutdown);
        if workers.flusher.join().is_err() {
            tally_log::error!("metchan flusher panicked");
        }
        if workers.poster.join().is_err() {
            tally_log::error!("metchan poster panicked");
        }

        tally_log::debug!("stopped metchan");
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("app_name", &self.shared.app_name)
            .field("source", &self.shared.source)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn flush_loop(shared: Arc<Shared>, outbox: Sender<AggregatedMetric>, shutdown: Receiver<()>) {
    let ticker = crossbeam_channel::tick(shared.flush_interval);

    loop {
        crossbeam_channel::select! {
            recv(ticker) -> _ => {
                if !shared.flush(&outbox) {
                    return;
                }
            }
            recv(shutdown) -> _ => break,
        }
    }

    shared.flush(&outbox);
}

fn post_loop(
    runtime: tokio::runtime::Runtime,
    transport: Arc<dyn Transport>,
    outbox: Receiver<AggregatedMetric>,
) {
    for metric in outbox.iter() {
        tally_log::trace!("posting self metric {metric}");

        let batch = GaugeBatch::new(vec![metric]);
        if let Err(error) = runtime.block_on(transport.send(&batch)) {
            tally_log::error!(
                error = &error as &dyn Error,
                "failed to post self metric"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tally_upstream::StatusCode;

    use super::*;

    #[derive(Default)]
    struct RecordingTransport {
        batches: Mutex<Vec<GaugeBatch<AggregatedMetric>>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, batch: &GaugeBatch<AggregatedMetric>) -> Result<(), UpstreamError> {
            self.batches.lock().push(batch.clone());
            if self.fail {
                return Err(UpstreamError::Status {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    body: String::new(),
                });
            }
            Ok(())
        }
    }

    enum TestMetrics {
        Submitted,
    }

    impl ChannelMetric for TestMetrics {
        fn name(&self) -> &'static str {
            match self {
                Self::Submitted => "outlet.submitted",
            }
        }
    }

    fn channel(transport: Option<Arc<RecordingTransport>>) -> Channel {
        let transport = transport.map(|t| t as Arc<dyn Transport>);
        Channel::with_transport("tally", &MetchanConfig::default(), transport)
    }

    #[test]
    fn test_disabled_records_nothing() {
        let channel = channel(None);
        channel.measure("outlet.submitted", 4.0);
        channel.count_req("user@example.com");

        assert!(!channel.is_enabled());
        assert!(channel.snapshot().is_empty());
        // Starting a disabled channel is a no-op.
        channel.start().unwrap();
        channel.stop();
    }

    #[derive(Clone, Default)]
    struct SharedOutput(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_verbose_prints_when_disabled() {
        let config = MetchanConfig {
            verbose: true,
            ..Default::default()
        };
        let output = SharedOutput::default();
        let channel =
            Channel::with_transport("tally", &config, None).with_output(output.clone());

        channel.measure("outlet.submitted", 4.5);
        channel.record(TestMetrics::Submitted, 2.0);

        let printed = String::from_utf8(output.0.lock().clone()).unwrap();
        let source = channel.source();
        assert_eq!(
            printed,
            format!(
                "source={source} measure#outlet.submitted=4.5\n\
                 source={source} measure#outlet.submitted=2\n"
            )
        );
        assert!(channel.snapshot().is_empty());
    }

    #[test]
    fn test_quiet_prints_nothing() {
        let output = SharedOutput::default();
        let channel = channel(Some(Arc::default())).with_output(output.clone());
        channel.measure("outlet.submitted", 1.0);

        assert!(output.0.lock().is_empty());
        assert_eq!(channel.snapshot().len(), 1);
    }

    #[test]
    fn test_disabled_without_url() {
        let channel = Channel::new(
            "tally",
            &MetchanConfig::default(),
            &ClientOptions::default(),
        )
        .unwrap();
        assert!(!channel.is_enabled());
    }

    #[test]
    fn test_invalid_url() {
        let config = MetchanConfig {
            url: Some("not a url".to_owned()),
            ..Default::default()
        };
        let result = Channel::new("tally", &config, &ClientOptions::default());
        assert!(matches!(result, Err(MetchanError::InvalidUrl(_))));
    }

    #[test]
    fn test_measure_aggregates() {
        let channel = channel(Some(Arc::default()));
        channel.measure("outlet.submitted", 4.0);
        channel.record(TestMetrics::Submitted, 6.0);

        let snapshot = channel.snapshot();
        assert_eq!(snapshot.len(), 1);

        let metric = &snapshot[0];
        assert_eq!(metric.name, "tally.outlet.submitted");
        assert_eq!(metric.source, channel.source());
        assert_eq!(metric.count, 2);
        assert_eq!(metric.sum, 10.0);
        assert_eq!(metric.max, 6.0);
        assert_eq!(metric.min, 4.0);
    }

    #[test]
    fn test_time() {
        let channel = channel(Some(Arc::default()));
        let start = Instant::now() - Duration::from_millis(25);
        channel.time("outlet.snapshot", start);

        let snapshot = channel.snapshot();
        assert_eq!(snapshot[0].name, "tally.outlet.snapshot");
        assert!(snapshot[0].sum >= 25.0);
    }

    #[test]
    fn test_count_req() {
        let channel = channel(Some(Arc::default()));
        channel.count_req("user@example.com");
        channel.count_req("user@example.com");
        channel.count_req("other");

        let snapshot = channel.snapshot();
        let requests: Vec<_> = snapshot
            .iter()
            .map(|m| (m.name.as_str(), m.source.as_str(), m.count))
            .collect();

        assert_eq!(
            requests,
            [
                ("tally.receiver.requests", "other", 1),
                ("tally.receiver.requests", "user_at_example.com", 2),
            ]
        );
    }

    #[test]
    fn test_concurrent_writers() {
        let channel = Arc::new(channel(Some(Arc::default())));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let channel = Arc::clone(&channel);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        channel.measure("receiver.accepted", 1.0);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = channel.snapshot();
        assert_eq!(snapshot.len(), 1);
        // Values may straddle a window boundary, but none may be lost within the live window.
        assert!(snapshot[0].count <= 8000);
        assert_eq!(snapshot[0].sum, snapshot[0].count as f64);
    }

    #[test]
    fn test_stop_flushes_and_posts() {
        tally_log::init_test!();

        let transport = Arc::new(RecordingTransport::default());
        let channel = channel(Some(Arc::clone(&transport)));
        channel.start().unwrap();

        channel.measure("outlet.submitted", 3.0);
        channel.count_req("ops@example.com");
        channel.stop();

        let mut names: Vec<_> = transport
            .batches
            .lock()
            .iter()
            .map(|batch| {
                assert_eq!(batch.len(), 1);
                batch.gauges[0].name.clone()
            })
            .collect();
        names.sort();

        assert_eq!(names, ["tally.outlet.submitted", "tally.receiver.requests"]);

        // Buckets are retained for reuse after flushing.
        assert_eq!(channel.snapshot().len(), 2);
    }

    #[test]
    fn test_failed_posts_are_dropped() {
        tally_log::init_test!();

        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let channel = channel(Some(Arc::clone(&transport)));
        channel.start().unwrap();
        channel.measure("outlet.error", 1.0);
        channel.stop();

        assert_eq!(transport.batches.lock().len(), 1);
    }

    #[test]
    fn test_flush_blocks_on_full_outbox() {
        let channel = channel(Some(Arc::default()));
        channel.measure("a", 1.0);
        channel.measure("b", 1.0);

        let (tx, rx) = crossbeam_channel::bounded(1);
        let shared = Arc::clone(&channel.shared);
        let flusher = thread::spawn(move || shared.flush(&tx));

        // The second summary only fits once the first was taken out.
        let first = rx.recv().unwrap();
        let second = rx.recv().unwrap();
        assert!(flusher.join().unwrap());
        assert_ne!(first.name, second.name);
    }

    #[test]
    fn test_flush_with_closed_outbox() {
        let channel = channel(Some(Arc::default()));
        channel.measure("a", 1.0);

        let (tx, rx) = crossbeam_channel::bounded(1);
        drop(rx);
        assert!(!channel.shared.flush(&tx));
    }

    #[test]
    fn test_config_defaults() {
        let config: MetchanConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.url, None);
        assert!(!config.verbose);
        assert_eq!(config.flush_interval(), Duration::from_secs(60));
        assert_eq!(config.outbox_capacity, 10);
    }
}
