use std::sync::Arc;

use crate::key::MetricKey;

/// Structured, in-process event hook for observability.
///
/// This crate is a library; emitting logs directly (e.g. `println!`) is not acceptable for
/// production. Instead, callers can provide an implementation that forwards these events to
/// `tracing`, `log`, metrics, or custom sinks.
///
/// Listeners are called on the hot path (`Overflow` fires once per dropped point) and should not
/// block. A panic raised by a listener is caught and discarded by the cache, so it never changes
/// the outcome of `store` or `drain`.
pub trait CacheEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: CacheEvent);
}

/// Structured events emitted by the cache and the drain worker.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// A point was dropped because the cache was full.
    Overflow { size: usize, max_cache_size: i64 },
    /// A drain pass found a snapshotted metric already removed by a concurrent pop.
    DrainRaceSkipped { metric: MetricKey },

    DrainWorkerStarted,
    DrainWorkerStopping,
    DrainWorkerPanicked,

    DrainCompleted { metrics: usize, points: usize },
    SinkWriteFailed { metric: MetricKey, points: usize, error: String },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl CacheEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: CacheEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn CacheEventListener> {
    Arc::new(NoopEventListener)
}

/// Metrics instrumentation and in-process scraping.
///
/// Emitting metrics is effectively a no-op until a recorder is installed, so the cache records
/// unconditionally.
pub mod cache_metrics {
    use ::metrics::{describe_counter, describe_gauge, Unit};

    #[cfg(feature = "prometheus")]
    use crate::cache::MetricCache;
    #[cfg(feature = "prometheus")]
    use crate::error::CacheError;
    #[cfg(feature = "prometheus")]
    use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

    // --- metric names ---
    //
    // Counters are exposed as `<name>_total` by the Prometheus exporter.

    pub const OVERFLOW: &str = "metricache_overflow";
    pub const STORED_POINTS: &str = "metricache_stored_points";
    pub const DRAINED_POINTS: &str = "metricache_drained_points";
    pub const DRAIN_RACE_SKIPS: &str = "metricache_drain_race_skips";
    pub const SINK_WRITE_FAILURES: &str = "metricache_sink_write_failures";

    pub const CACHE_SIZE: &str = "metricache_size";
    pub const CACHE_QUEUES: &str = "metricache_queues";

    /// Process-wide Prometheus recorder for the cache metrics, scraped in-process.
    ///
    /// No HTTP listener is started; the owner decides where the rendered text goes.
    #[cfg(feature = "prometheus")]
    #[derive(Debug, Clone)]
    pub struct InProcessPrometheus {
        handle: PrometheusHandle,
    }

    #[cfg(feature = "prometheus")]
    impl InProcessPrometheus {
        /// Describes the cache metrics and installs the global recorder. A process has at most
        /// one recorder; a second install fails with [`CacheError::AlreadyInitialized`].
        pub fn install() -> Result<Self, CacheError> {
            describe_all();
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| match e {
                    BuildError::FailedToSetGlobalRecorder(_) => {
                        CacheError::AlreadyInitialized("metrics recorder")
                    }
                    other => CacheError::RecorderInstall(other.to_string()),
                })?;
            Ok(InProcessPrometheus { handle })
        }

        /// Renders every recorded metric in the Prometheus text format.
        pub fn render(&self) -> String {
            self.handle.render()
        }

        /// Refreshes the size and queue gauges from `cache`, then renders only the
        /// `metricache_*` samples and their descriptions.
        pub fn scrape(&self, cache: &MetricCache) -> String {
            record_cache_shape(cache.size(), cache.len());
            let mut out = String::new();
            for line in self.render().lines().filter(|l| l.contains("metricache_")) {
                out.push_str(line);
                out.push('\n');
            }
            out
        }
    }

    #[inline]
    pub fn record_overflow() {
        ::metrics::counter!(OVERFLOW).increment(1);
    }

    #[inline]
    pub fn record_stored() {
        ::metrics::counter!(STORED_POINTS).increment(1);
    }

    #[inline]
    pub fn record_drain_race_skip() {
        ::metrics::counter!(DRAIN_RACE_SKIPS).increment(1);
    }

    #[inline]
    pub fn record_drained(points: u64) {
        if points > 0 {
            ::metrics::counter!(DRAINED_POINTS).increment(points);
        }
    }

    #[inline]
    pub fn record_sink_write_failure() {
        ::metrics::counter!(SINK_WRITE_FAILURES).increment(1);
    }

    #[inline]
    pub fn record_cache_shape(size: usize, queues: usize) {
        ::metrics::gauge!(CACHE_SIZE).set(size as f64);
        ::metrics::gauge!(CACHE_QUEUES).set(queues as f64);
    }

    /// Registers descriptions for every metric name. Called by [`InProcessPrometheus::install`];
    /// callers installing their own recorder can invoke it directly.
    pub fn describe_all() {
        describe_counter!(
            OVERFLOW,
            Unit::Count,
            "Datapoints dropped by MetricCache::store because the cache was full."
        );
        describe_counter!(
            STORED_POINTS,
            Unit::Count,
            "Datapoints accepted by MetricCache::store."
        );
        describe_counter!(
            DRAINED_POINTS,
            Unit::Count,
            "Datapoints removed from the cache by drain passes of the drain worker."
        );
        describe_counter!(
            DRAIN_RACE_SKIPS,
            Unit::Count,
            "Snapshotted metrics skipped during drain because a concurrent pop removed them first."
        );
        describe_counter!(
            SINK_WRITE_FAILURES,
            Unit::Count,
            "Backlogs lost because the downstream sink rejected them."
        );

        describe_gauge!(
            CACHE_SIZE,
            Unit::Count,
            "Buffered datapoints observed at the end of the last drain pass."
        );
        describe_gauge!(
            CACHE_QUEUES,
            Unit::Count,
            "Distinct metrics with a buffered backlog at the end of the last drain pass."
        );
    }
}
