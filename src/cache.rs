//! The bounded metric write buffer: `store`, `pop`, and `drain` over a single coarse lock.

use crate::capacity::{is_at_capacity, unbounded_capacity, CapacitySource, FixedCapacity};
use crate::drain::Drain;
use crate::error::CacheError;
use crate::key::MetricKey;
use crate::telemetry::{cache_metrics, CacheEvent, CacheEventListener};
use crate::types::{Backlog, DataPoint};

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

static GLOBAL: OnceLock<Arc<MetricCache>> = OnceLock::new();

/// Configuration options for a [`MetricCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Capacity bound in datapoints, read on every `store`.
    pub capacity: Arc<dyn CapacitySource>,
    /// Structured event hook. May also be installed after construction with
    /// [`MetricCache::set_event_listener`].
    pub event_listener: Option<Arc<dyn CacheEventListener>>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: unbounded_capacity(),
            event_listener: None,
        }
    }
}

/// Result of a [`MetricCache::store`] call. Dropping a point is policy, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    /// The cache was full; the point was discarded and the overflow counter incremented.
    Dropped,
}

impl StoreOutcome {
    pub fn is_stored(self) -> bool {
        self == StoreOutcome::Stored
    }
}

/// Bounded, thread-safe buffer of datapoints keyed by normalized metric name.
///
/// The backing map is private: the only mutators are [`store`](Self::store),
/// [`pop`](Self::pop) and [`drain`](Self::drain).
///
/// The capacity check in `store` reads the size counter without taking the lock, so under
/// concurrent producers the total may overshoot the bound by up to the number of racing `store`
/// calls. Likewise `drain` works from a snapshot of backlog lengths that may be stale by the
/// time each metric is popped.
#[derive(Debug)]
pub struct MetricCache {
    backlogs: Mutex<HashMap<MetricKey, Backlog>>,
    /// Sum of all backlog lengths. Only mutated while `backlogs` is locked.
    size: AtomicUsize,
    capacity: Arc<dyn CapacitySource>,
    event_listener: OnceLock<Arc<dyn CacheEventListener>>,
}

impl Default for MetricCache {
    fn default() -> Self {
        Self::with_config(CacheConfig::default())
    }
}

impl MetricCache {
    /// Creates a cache with a fixed capacity bound. A bound `<= 0` drops every point.
    pub fn new(max_cache_size: i64) -> Self {
        Self::with_capacity_source(Arc::new(FixedCapacity(max_cache_size)))
    }

    pub fn with_capacity_source(capacity: Arc<dyn CapacitySource>) -> Self {
        Self::with_config(CacheConfig {
            capacity,
            ..CacheConfig::default()
        })
    }

    pub fn with_config(config: CacheConfig) -> Self {
        let event_listener = OnceLock::new();
        if let Some(listener) = config.event_listener {
            let _ = event_listener.set(listener);
        }
        MetricCache {
            backlogs: Mutex::new(HashMap::new()),
            size: AtomicUsize::new(0),
            capacity: config.capacity,
            event_listener,
        }
    }

    /// Installs the process-wide cache. Fails if one is already installed.
    pub fn init_global(config: CacheConfig) -> Result<Arc<MetricCache>, CacheError> {
        let cache = Arc::new(MetricCache::with_config(config));
        GLOBAL
            .set(Arc::clone(&cache))
            .map_err(|_| CacheError::AlreadyInitialized("global MetricCache"))?;
        Ok(cache)
    }

    /// Returns the process-wide cache, if [`init_global`](Self::init_global) has run.
    pub fn global() -> Option<&'static Arc<MetricCache>> {
        GLOBAL.get()
    }

    /// Installs the event listener after construction. Only one listener can be installed;
    /// a second call fails with [`CacheError::AlreadyInitialized`].
    pub fn set_event_listener(&self, listener: Arc<dyn CacheEventListener>) -> Result<(), CacheError> {
        self.event_listener
            .set(listener)
            .map_err(|_| CacheError::AlreadyInitialized("cache event listener"))
    }

    /// Appends `point` to the backlog of the normalized `metric`.
    ///
    /// If the cache is full the point is dropped: the overflow counter is incremented once and
    /// [`StoreOutcome::Dropped`] is returned. Never fails, and never panics because of a
    /// panicking event listener.
    pub fn store(&self, metric: &str, point: impl Into<DataPoint>) -> StoreOutcome {
        let max_cache_size = self.capacity.max_cache_size();
        let size = self.size.load(Ordering::Relaxed);
        if is_at_capacity(size, max_cache_size) {
            cache_metrics::record_overflow();
            self.emit(CacheEvent::Overflow {
                size,
                max_cache_size,
            });
            return StoreOutcome::Dropped;
        }

        let key = MetricKey::new(metric);
        let point = point.into();
        {
            let mut backlogs = self.lock_backlogs();
            backlogs.entry(key).or_default().push(point);
            self.size.fetch_add(1, Ordering::Relaxed);
        }
        cache_metrics::record_stored();
        StoreOutcome::Stored
    }

    /// Removes and returns the whole backlog for `metric`.
    ///
    /// `metric` is looked up as given; it is not normalized. Returns
    /// [`CacheError::KeyNotFound`] if nothing is buffered for it, which is expected when a
    /// concurrent `pop` or `drain` got there first.
    pub fn pop(&self, metric: &str) -> Result<Backlog, CacheError> {
        let mut backlogs = self.lock_backlogs();
        match backlogs.remove(metric) {
            Some(points) => {
                self.size.fetch_sub(points.len(), Ordering::Relaxed);
                Ok(points)
            }
            None => Err(CacheError::KeyNotFound(metric.to_string())),
        }
    }

    /// Removes every backlog, most backlogged metric first.
    ///
    /// The returned iterator is lazy: each metric is popped only when the iterator reaches it.
    /// Metrics removed concurrently are skipped silently. Abandoning the iterator leaves the
    /// remaining metrics in the cache.
    pub fn drain(&self) -> Drain<'_> {
        Drain::new(self)
    }

    /// Total number of buffered datapoints (unguarded read).
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Number of metrics with a buffered backlog.
    pub fn len(&self) -> usize {
        self.lock_backlogs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_backlogs().is_empty()
    }

    /// Current capacity bound, as reported by the capacity source.
    pub fn capacity(&self) -> i64 {
        self.capacity.max_cache_size()
    }

    /// Whether the next `store` would be dropped (unguarded read).
    pub fn is_full(&self) -> bool {
        is_at_capacity(self.size(), self.capacity())
    }

    /// Snapshot of `(metric, backlog length)` for every buffered metric.
    pub(crate) fn backlog_lengths(&self) -> Vec<(MetricKey, usize)> {
        self.lock_backlogs()
            .iter()
            .map(|(metric, points)| (metric.clone(), points.len()))
            .collect()
    }

    // A panicking listener must not take `store` or `drain` down with it.
    pub(crate) fn emit(&self, event: CacheEvent) {
        if let Some(listener) = self.event_listener.get() {
            let _ = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
        }
    }

    // Guarded sections are a single map operation plus a counter update, so a poisoned lock
    // never hides partial state and is recovered instead of propagated.
    fn lock_backlogs(&self) -> MutexGuard<'_, HashMap<MetricKey, Backlog>> {
        self.backlogs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
