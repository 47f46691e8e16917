#![cfg(feature = "prometheus")]

use std::sync::{Arc, OnceLock};

use metricache::telemetry::cache_metrics::InProcessPrometheus;
use metricache::telemetry::NoopEventListener;
use metricache::writer::drain_into;
use metricache::{Backlog, BacklogSink, DataPoint, MetricCache, MetricKey, SinkError};

fn install_prometheus_once() -> &'static InProcessPrometheus {
    static PROM: OnceLock<InProcessPrometheus> = OnceLock::new();
    PROM.get_or_init(|| {
        InProcessPrometheus::install()
            .expect("failed to install in-process prometheus recorder")
    })
}

fn parse_sample(rendered: &str, metric: &str) -> Option<f64> {
    for line in rendered.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let key = parts.next()?;
        let val = parts.next()?;
        if key == metric || key.starts_with(metric) && key.as_bytes().get(metric.len()).copied() == Some(b'{') {
            if let Ok(v) = val.parse::<f64>() {
                return Some(v);
            }
        }
    }
    None
}

fn parse_counter(rendered: &str, base_name: &str) -> f64 {
    parse_sample(rendered, &format!("{}_total", base_name))
        .or_else(|| parse_sample(rendered, base_name))
        .unwrap_or(0.0)
}

#[derive(Debug)]
struct RejectingSink;

impl BacklogSink for RejectingSink {
    fn write(&self, metric: &MetricKey, _points: Backlog) -> Result<(), SinkError> {
        Err(format!("rejected {}", metric).into())
    }
}

/// Accepts every backlog and stores one follow-up point, so the cache is non-empty when the
/// drain pass records its size and queue gauges.
#[derive(Debug)]
struct RequeueingSink {
    cache: Arc<MetricCache>,
}

impl BacklogSink for RequeueingSink {
    fn write(&self, _metric: &MetricKey, _points: Backlog) -> Result<(), SinkError> {
        self.cache.store("prom.requeued", DataPoint::new(1, 1.0));
        Ok(())
    }
}

/// All assertions share one global recorder, so they live in a single test and compare deltas.
#[test]
fn emits_cache_counters_and_gauges() {
    let prom = install_prometheus_once();

    let before = prom.render();
    let before_overflow = parse_counter(&before, "metricache_overflow");
    let before_stored = parse_counter(&before, "metricache_stored_points");
    let before_skips = parse_counter(&before, "metricache_drain_race_skips");
    let before_failures = parse_counter(&before, "metricache_sink_write_failures");
    let before_drained = parse_counter(&before, "metricache_drained_points");

    let cache = Arc::new(MetricCache::new(4));
    for i in 0..10u64 {
        cache.store("prom.metric", DataPoint::new(i, i as f64));
    }

    cache.store("prom.other", DataPoint::new(0, 0.0));
    // Free the cache, then let a drain lose both of its snapshotted metrics to direct pops.
    let _ = cache.pop("prom.metric");
    cache.store("prom.a", DataPoint::new(0, 0.0));
    cache.store("prom.b", DataPoint::new(0, 0.0));
    let mut drain = cache.drain();
    let _ = cache.pop("prom.a");
    let _ = cache.pop("prom.b");
    assert!(drain.next().is_none());
    assert!(cache.is_empty());

    // A rejected backlog counts as drained and as one sink failure.
    cache.store("prom.fail", DataPoint::new(0, 0.0));
    cache.store("prom.fail", DataPoint::new(1, 0.0));
    let report = drain_into(&cache, &RejectingSink, &NoopEventListener);
    assert_eq!(report.failed_writes, 1);

    for i in 0..3u64 {
        cache.store("prom.ok", DataPoint::new(i, 0.0));
    }
    let sink = RequeueingSink { cache: Arc::clone(&cache) };
    let report = drain_into(&cache, &sink, &NoopEventListener);
    assert_eq!(report.points, 3);
    assert_eq!(report.failed_writes, 0);

    let after = prom.render();
    assert_eq!(parse_counter(&after, "metricache_overflow") - before_overflow, 7.0);
    assert_eq!(parse_counter(&after, "metricache_stored_points") - before_stored, 12.0);
    assert_eq!(parse_counter(&after, "metricache_drain_race_skips") - before_skips, 2.0);
    assert_eq!(parse_counter(&after, "metricache_sink_write_failures") - before_failures, 1.0);
    assert_eq!(parse_counter(&after, "metricache_drained_points") - before_drained, 5.0);
    // Gauges reflect the cache at the end of the last drain pass: the requeued point.
    assert_eq!(parse_sample(&after, "metricache_size"), Some(1.0));
    assert_eq!(parse_sample(&after, "metricache_queues"), Some(1.0));

    // `scrape` refreshes the gauges from the cache itself.
    cache.pop("prom.requeued").unwrap();
    let scraped = prom.scrape(&cache);
    assert!(scraped.lines().all(|l| l.contains("metricache_")));
    assert_eq!(parse_sample(&scraped, "metricache_size"), Some(0.0));
    assert_eq!(parse_sample(&scraped, "metricache_queues"), Some(0.0));
}
