//! Capacity bound providers.
//!
//! The bound is measured in datapoints, not bytes, and is read on every `store`, so a
//! [`SharedCapacity`] adjusted at runtime takes effect immediately. A bound `<= 0` means the
//! cache is always full and every point is dropped.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Default bound when none is configured: effectively unbounded.
pub const UNBOUNDED: i64 = i64::MAX;

/// Supplies the current capacity bound.
pub trait CapacitySource: std::fmt::Debug + Send + Sync + 'static {
    fn max_cache_size(&self) -> i64;
}

/// A bound fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct FixedCapacity(pub i64);

impl CapacitySource for FixedCapacity {
    #[inline]
    fn max_cache_size(&self) -> i64 {
        self.0
    }
}

/// A bound that can be changed while the cache is in use. Clones share the same value.
#[derive(Debug, Clone)]
pub struct SharedCapacity {
    inner: Arc<AtomicI64>,
}

impl SharedCapacity {
    pub fn new(initial: i64) -> Self {
        Self {
            inner: Arc::new(AtomicI64::new(initial)),
        }
    }

    pub fn set(&self, max_cache_size: i64) {
        self.inner.store(max_cache_size, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl CapacitySource for SharedCapacity {
    #[inline]
    fn max_cache_size(&self) -> i64 {
        self.get()
    }
}

pub fn unbounded_capacity() -> Arc<dyn CapacitySource> {
    Arc::new(FixedCapacity(UNBOUNDED))
}

/// Returns true when `size` has reached `max_cache_size`.
#[inline]
pub(crate) fn is_at_capacity(size: usize, max_cache_size: i64) -> bool {
    if max_cache_size <= 0 {
        return true;
    }
    // usize -> u64 is lossless on supported targets.
    size as u64 >= max_cache_size as u64
}
