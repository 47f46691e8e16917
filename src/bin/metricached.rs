//! Soak daemon for the metric cache.
//!
//! Loads configuration from (in precedence order): defaults, config file, environment variables
//! (`METRICACHE_*`), and CLI flags. Runs synthetic producer threads against a bounded cache while
//! a drain worker empties it into a counting sink, then reports the totals.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use config::{Config, Environment, File};
use metricache::capacity::UNBOUNDED;
use metricache::{
    BacklogSink, Backlog, DataPoint, DrainWorker, FixedCapacity, MetricCache, MetricKey, SinkError,
    StoreOutcome, WorkerConfig,
};

// ---------- CLI ----------

/// Metric cache soak daemon.
#[derive(Parser, Debug)]
#[command(name = "metricached", version, about)]
pub struct Cli {
    /// Path to config file (TOML). If omitted, `metricached.toml` is loaded when present.
    #[arg(long, env = "METRICACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Do not load any config file; use defaults + env + CLI only.
    #[arg(long, default_value_t = false)]
    pub no_config: bool,

    /// Load and validate config (file + env + CLI), print effective settings, then exit.
    #[arg(long, default_value_t = false)]
    pub validate_config: bool,

    /// Capacity bound in datapoints. Values <= 0 drop every point.
    #[arg(long, allow_negative_numbers = true)]
    pub max_cache_size: Option<i64>,

    /// Interval between drain passes, in milliseconds.
    #[arg(long)]
    pub drain_interval_ms: Option<u64>,

    /// Number of producer threads.
    #[arg(long)]
    pub producers: Option<usize>,

    /// Points stored by each producer.
    #[arg(long)]
    pub points_per_producer: Option<u64>,

    /// Number of distinct metric names producers spread their points over.
    #[arg(long)]
    pub metric_count: Option<usize>,

    /// Print the in-process Prometheus rendering after the run (requires the `prometheus` feature).
    #[arg(long, default_value_t = false)]
    pub print_metrics: bool,
}

// ---------- File/env config (all optional for partial config) ----------

/// Top-level daemon config as read from file + env. Every field optional for layering.
#[derive(Debug, Default, serde::Deserialize)]
pub struct DaemonFileConfig {
    pub max_cache_size: Option<i64>,
    pub drain_interval_ms: Option<u64>,
    pub producers: Option<usize>,
    pub points_per_producer: Option<u64>,
    pub metric_count: Option<usize>,
}

/// Effective daemon settings after layering.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonOptions {
    pub max_cache_size: i64,
    pub drain_interval: Duration,
    pub producers: usize,
    pub points_per_producer: u64,
    pub metric_count: usize,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            max_cache_size: UNBOUNDED,
            drain_interval: metricache::writer::DEFAULT_DRAIN_INTERVAL,
            producers: 4,
            points_per_producer: 10_000,
            metric_count: 100,
        }
    }
}

/// Load merged config. CLI overrides file/env.
fn load_daemon_config(cli: &Cli) -> Result<DaemonOptions, String> {
    let mut builder = Config::builder();

    if !cli.no_config {
        if let Some(ref path) = cli.config {
            if !path.exists() {
                return Err(format!("config file not found: {}", path.display()));
            }
            builder = builder.add_source(File::from(path.as_path()).required(true));
        } else {
            let default_path = PathBuf::from("metricached.toml");
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path.as_path()).required(false));
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("METRICACHE")
            .try_parsing(true)
            .ignore_empty(true),
    );

    let merged = builder.build().map_err(|e| e.to_string())?;
    let partial: DaemonFileConfig = merged.try_deserialize().map_err(|e| e.to_string())?;

    let mut options = DaemonOptions::default();
    merge_into_options(&mut options, &partial);
    merge_cli_into_options(&mut options, cli);
    validate_options(&options)?;
    Ok(options)
}

/// Merge file/env partial config onto `DaemonOptions`. Only overwrites fields that are `Some`.
fn merge_into_options(base: &mut DaemonOptions, partial: &DaemonFileConfig) {
    if let Some(n) = partial.max_cache_size {
        base.max_cache_size = n;
    }
    if let Some(ms) = partial.drain_interval_ms {
        base.drain_interval = Duration::from_millis(ms);
    }
    if let Some(n) = partial.producers {
        base.producers = n;
    }
    if let Some(n) = partial.points_per_producer {
        base.points_per_producer = n;
    }
    if let Some(n) = partial.metric_count {
        base.metric_count = n;
    }
}

fn merge_cli_into_options(base: &mut DaemonOptions, cli: &Cli) {
    merge_into_options(
        base,
        &DaemonFileConfig {
            max_cache_size: cli.max_cache_size,
            drain_interval_ms: cli.drain_interval_ms,
            producers: cli.producers,
            points_per_producer: cli.points_per_producer,
            metric_count: cli.metric_count,
        },
    );
}

fn validate_options(options: &DaemonOptions) -> Result<(), String> {
    if options.drain_interval.is_zero() {
        return Err("drain_interval_ms must be at least 1".to_string());
    }
    if options.producers == 0 {
        return Err("producers must be at least 1".to_string());
    }
    if options.metric_count == 0 {
        return Err("metric_count must be at least 1".to_string());
    }
    Ok(())
}

// ---------- Soak ----------

/// Sink that only counts what it receives.
#[derive(Debug, Default)]
struct CountingSink {
    metrics: AtomicU64,
    points: AtomicU64,
}

impl BacklogSink for CountingSink {
    fn write(&self, _metric: &MetricKey, points: Backlog) -> Result<(), SinkError> {
        self.metrics.fetch_add(1, Ordering::Relaxed);
        self.points.fetch_add(points.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SoakTotals {
    stored: u64,
    dropped: u64,
}

fn run_producer(cache: &MetricCache, producer: usize, options: &DaemonOptions) -> SoakTotals {
    let mut totals = SoakTotals::default();
    for i in 0..options.points_per_producer {
        let metric = format!(
            "soak.producer{}.metric{}",
            producer,
            (i as usize) % options.metric_count
        );
        match cache.store(&metric, DataPoint::new(i, i as f64)) {
            StoreOutcome::Stored => totals.stored += 1,
            StoreOutcome::Dropped => totals.dropped += 1,
        }
    }
    totals
}

fn run_soak(
    options: &DaemonOptions,
) -> Result<Arc<MetricCache>, Box<dyn std::error::Error + Send + Sync>> {
    let cache = Arc::new(MetricCache::with_capacity_source(Arc::new(FixedCapacity(
        options.max_cache_size,
    ))));
    let sink = Arc::new(CountingSink::default());
    let worker = DrainWorker::spawn(
        Arc::clone(&cache),
        Arc::clone(&sink),
        WorkerConfig {
            drain_interval: options.drain_interval,
            ..WorkerConfig::default()
        },
    )?;

    let started = Instant::now();
    let producers: Vec<_> = (0..options.producers)
        .map(|producer| {
            let cache = Arc::clone(&cache);
            let options = options.clone();
            thread::Builder::new()
                .name(format!("metricached-producer-{}", producer))
                .spawn(move || run_producer(&cache, producer, &options))
        })
        .collect::<Result<_, _>>()?;

    let mut totals = SoakTotals::default();
    for handle in producers {
        let t = handle
            .join()
            .map_err(|_| "producer thread panicked".to_string())?;
        totals.stored += t.stored;
        totals.dropped += t.dropped;
    }

    let final_pass = worker.shutdown()?;
    let elapsed = started.elapsed();

    println!("stored={}", totals.stored);
    println!("dropped={}", totals.dropped);
    println!("drained={}", sink.points.load(Ordering::Relaxed));
    println!("drained_metrics={}", sink.metrics.load(Ordering::Relaxed));
    println!("final_pass_points={}", final_pass.points);
    println!("remaining={}", cache.size());
    eprintln!("soak finished in {:.3}s", elapsed.as_secs_f64());
    Ok(cache)
}

#[cfg(feature = "prometheus")]
fn run_with_metrics(
    options: &DaemonOptions,
    print_metrics: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use metricache::telemetry::cache_metrics::InProcessPrometheus;

    let prom = if print_metrics {
        Some(InProcessPrometheus::install()?)
    } else {
        None
    };
    let cache = run_soak(options)?;
    if let Some(prom) = prom {
        print!("{}", prom.scrape(&cache));
    }
    Ok(())
}

#[cfg(not(feature = "prometheus"))]
fn run_with_metrics(
    options: &DaemonOptions,
    print_metrics: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if print_metrics {
        eprintln!("--print-metrics requires the `prometheus` feature; ignoring");
    }
    run_soak(options)?;
    Ok(())
}

// ---------- Main ----------

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let options = load_daemon_config(&cli).map_err(|e| {
        eprintln!("config error: {}", e);
        e
    })?;

    if cli.validate_config {
        println!("max_cache_size={}", options.max_cache_size);
        println!("drain_interval_ms={}", options.drain_interval.as_millis());
        println!("producers={}", options.producers);
        println!("points_per_producer={}", options.points_per_producer);
        println!("metric_count={}", options.metric_count);
        return Ok(());
    }

    run_with_metrics(&options, cli.print_metrics)
}
