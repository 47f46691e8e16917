//! Background drain worker: periodically drains the cache into a downstream [`BacklogSink`].
//!
//! Delivery is at-most-once. A backlog handed to the sink has already left the cache; if the
//! sink rejects it the points are lost and the failure is reported through events and metrics.

use crate::cache::MetricCache;
use crate::error::{CacheError, SinkError};
use crate::key::MetricKey;
use crate::telemetry::{cache_metrics, noop_event_listener, CacheEvent, CacheEventListener};
use crate::types::Backlog;

use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// The default interval between automatic drain passes (1 second).
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(1);

/// Downstream consumer of drained backlogs (typically the persistence writer).
pub trait BacklogSink: Send + Sync + 'static {
    fn write(&self, metric: &MetricKey, points: Backlog) -> Result<(), SinkError>;
}

impl<T: BacklogSink + ?Sized> BacklogSink for Arc<T> {
    fn write(&self, metric: &MetricKey, points: Backlog) -> Result<(), SinkError> {
        (**self).write(metric, points)
    }
}

impl<T: BacklogSink + ?Sized> BacklogSink for Box<T> {
    fn write(&self, metric: &MetricKey, points: Backlog) -> Result<(), SinkError> {
        (**self).write(metric, points)
    }
}

/// Configuration options for a [`DrainWorker`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between automatic drain passes.
    pub drain_interval: Duration,
    /// Name given to the background thread.
    pub thread_name: String,
    /// Structured event hook for observability (no-op by default).
    pub event_listener: Arc<dyn CacheEventListener>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            thread_name: "metricache-drain".to_string(),
            event_listener: noop_event_listener(),
        }
    }
}

/// Totals for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Metrics handed to the sink (including failed writes).
    pub metrics: usize,
    /// Points handed to the sink (including failed writes).
    pub points: usize,
    pub failed_writes: usize,
    /// Points lost because the sink rejected their backlog.
    pub lost_points: usize,
}

/// Runs one drain pass over `cache`, writing every yielded backlog to `sink`.
pub fn drain_into<S>(cache: &MetricCache, sink: &S, events: &dyn CacheEventListener) -> DrainReport
where
    S: BacklogSink + ?Sized,
{
    let mut report = DrainReport::default();
    for (metric, points) in cache.drain() {
        let count = points.len();
        report.metrics += 1;
        report.points += count;
        if let Err(e) = sink.write(&metric, points) {
            report.failed_writes += 1;
            report.lost_points += count;
            cache_metrics::record_sink_write_failure();
            events.on_event(CacheEvent::SinkWriteFailed {
                metric,
                points: count,
                error: e.to_string(),
            });
        }
    }

    cache_metrics::record_drained(report.points as u64);
    cache_metrics::record_cache_shape(cache.size(), cache.len());
    if report.metrics > 0 {
        events.on_event(CacheEvent::DrainCompleted {
            metrics: report.metrics,
            points: report.points,
        });
    }
    report
}

/// Commands sent to the background drain thread.
enum DrainCommand {
    Drain { ack: Option<mpsc::Sender<DrainReport>> },
    Shutdown { ack: Option<mpsc::Sender<DrainReport>> },
}

/// Background thread calling [`MetricCache::drain`] on a fixed interval.
///
/// Dropping the worker performs a final drain pass and joins the thread.
#[derive(Debug)]
pub struct DrainWorker {
    cmd_tx: mpsc::Sender<DrainCommand>,
    handle: Option<JoinHandle<()>>,
    events: Arc<dyn CacheEventListener>,
}

impl DrainWorker {
    /// Spawns the drain thread.
    ///
    /// # Errors
    /// Returns [`CacheError::BackgroundTaskError`] if the thread cannot be spawned.
    pub fn spawn<S: BacklogSink>(
        cache: Arc<MetricCache>,
        sink: S,
        config: WorkerConfig,
    ) -> Result<Self, CacheError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<DrainCommand>();
        let events = config.event_listener.clone();
        let drain_interval = config.drain_interval;

        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                events.on_event(CacheEvent::DrainWorkerStarted);
                loop {
                    match cmd_rx.recv_timeout(drain_interval) {
                        Ok(DrainCommand::Drain { ack }) => {
                            let report = drain_into(&cache, &sink, &*events);
                            if let Some(ack) = ack {
                                let _ = ack.send(report);
                            }
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            drain_into(&cache, &sink, &*events);
                        }
                        Ok(DrainCommand::Shutdown { ack }) => {
                            let report = drain_into(&cache, &sink, &*events);
                            if let Some(ack) = ack {
                                let _ = ack.send(report);
                            }
                            events.on_event(CacheEvent::DrainWorkerStopping);
                            break;
                        }
                        // Worker handle dropped without a shutdown command.
                        Err(mpsc::RecvTimeoutError::Disconnected) => {
                            events.on_event(CacheEvent::DrainWorkerStopping);
                            break;
                        }
                    }
                }
            })
            .map_err(|e| CacheError::BackgroundTaskError(format!("Failed to spawn drain worker: {}", e)))?;

        Ok(DrainWorker {
            cmd_tx,
            handle: Some(handle),
            events: config.event_listener,
        })
    }

    /// Triggers a drain pass and waits for its report.
    pub fn drain_now(&self) -> Result<DrainReport, CacheError> {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(DrainCommand::Drain { ack: Some(tx) })
            .map_err(|e| CacheError::BackgroundTaskError(format!("Failed to send drain command: {}", e)))?;
        rx.recv()
            .map_err(|e| CacheError::BackgroundTaskError(format!("Failed to receive drain report: {}", e)))
    }

    /// Stops the worker after a final drain pass and returns that pass's report.
    pub fn shutdown(mut self) -> Result<DrainReport, CacheError> {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(DrainCommand::Shutdown { ack: Some(tx) })
            .map_err(|e| CacheError::BackgroundTaskError(format!("Failed to send shutdown command: {}", e)))?;
        let report = rx
            .recv()
            .map_err(|e| CacheError::BackgroundTaskError(format!("Failed to receive final drain report: {}", e)));
        self.join();
        report
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                self.events.on_event(CacheEvent::DrainWorkerPanicked);
            }
        }
    }
}

impl Drop for DrainWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            // Ignore send errors: the thread may already have exited.
            let _ = self.cmd_tx.send(DrainCommand::Shutdown { ack: None });
            self.join();
        }
    }
}
