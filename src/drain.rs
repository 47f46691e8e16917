use crate::cache::MetricCache;
use crate::key::MetricKey;
use crate::telemetry::{cache_metrics, CacheEvent};
use crate::types::Backlog;

use std::iter::FusedIterator;

/// Lazy, single-pass iterator returned by [`MetricCache::drain`].
///
/// Built from a snapshot of backlog lengths sorted longest first (ties in no particular order).
/// Each metric is popped when the iterator reaches it, so a yielded backlog may hold points
/// stored after the snapshot, and metrics popped concurrently in the meantime are skipped.
#[derive(Debug)]
pub struct Drain<'a> {
    cache: &'a MetricCache,
    order: std::vec::IntoIter<(MetricKey, usize)>,
}

impl<'a> Drain<'a> {
    pub(crate) fn new(cache: &'a MetricCache) -> Self {
        let mut order = cache.backlog_lengths();
        order.sort_unstable_by(|a, b| b.1.cmp(&a.1));
        Drain {
            cache,
            order: order.into_iter(),
        }
    }

    /// Number of snapshotted metrics not yet visited.
    pub fn remaining(&self) -> usize {
        self.order.len()
    }
}

impl Iterator for Drain<'_> {
    type Item = (MetricKey, Backlog);

    fn next(&mut self) -> Option<Self::Item> {
        for (metric, _snapshot_len) in self.order.by_ref() {
            match self.cache.pop(metric.as_str()) {
                Ok(points) => return Some((metric, points)),
                Err(e) => {
                    // Only the vanish race can land here.
                    debug_assert!(e.is_key_not_found());
                    cache_metrics::record_drain_race_skip();
                    self.cache.emit(CacheEvent::DrainRaceSkipped { metric });
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.order.len()))
    }
}

impl FusedIterator for Drain<'_> {}
