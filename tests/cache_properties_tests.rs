use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use metricache::{CacheConfig, CacheEvent, CacheEventListener, DataPoint, FixedCapacity, MetricCache};

#[derive(Debug, Default)]
struct OverflowCounter {
    overflows: AtomicU64,
}

impl CacheEventListener for OverflowCounter {
    fn on_event(&self, event: CacheEvent) {
        if let CacheEvent::Overflow { .. } = event {
            self.overflows.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn counted_cache(max_cache_size: i64) -> (MetricCache, Arc<OverflowCounter>) {
    let counter = Arc::new(OverflowCounter::default());
    let cache = MetricCache::with_config(CacheConfig {
        capacity: Arc::new(FixedCapacity(max_cache_size)),
        event_listener: Some(counter.clone()),
    });
    (cache, counter)
}

// Metric paths built from a small alphabet so keys collide often, with random empty segments.
fn raw_metric() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c", ""]), 1..5)
        .prop_map(|segments| segments.join("."))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_stores_within_capacity_are_all_kept(
        metrics in prop::collection::vec(raw_metric(), 0..200)
    ) {
        let (cache, overflow) = counted_cache(metrics.len() as i64);
        for (i, metric) in metrics.iter().enumerate() {
            prop_assert!(cache.store(metric, DataPoint::new(i as u64, 0.0)).is_stored());
        }
        prop_assert_eq!(cache.size(), metrics.len());
        prop_assert_eq!(overflow.overflows.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn prop_overflow_counts_each_dropped_point(
        capacity in 0i64..50,
        attempts in 0usize..120,
    ) {
        let (cache, overflow) = counted_cache(capacity);
        for i in 0..attempts {
            cache.store("m.x", DataPoint::new(i as u64, 1.0));
        }
        let kept = attempts.min(capacity as usize);
        prop_assert_eq!(cache.size(), kept);
        prop_assert_eq!(overflow.overflows.load(Ordering::Relaxed) as usize, attempts - kept);
    }

    #[test]
    fn prop_drain_conserves_points_and_orders_by_length(
        metrics in prop::collection::vec(raw_metric(), 1..300)
    ) {
        let cache = MetricCache::new(i64::MAX);
        let mut expected: HashMap<String, Vec<DataPoint>> = HashMap::new();
        for (i, metric) in metrics.iter().enumerate() {
            let point = DataPoint::new(i as u64, i as f64);
            cache.store(metric, point);
            expected.entry(metricache::key::normalize(metric)).or_default().push(point);
        }
        let size_before = cache.size();

        let drained: Vec<_> = cache.drain().collect();
        let total: usize = drained.iter().map(|(_, points)| points.len()).sum();
        prop_assert_eq!(total, size_before);
        prop_assert_eq!(drained.len(), expected.len());
        for pair in drained.windows(2) {
            prop_assert!(pair[0].1.len() >= pair[1].1.len());
        }
        for (metric, points) in &drained {
            // Arrival order within each backlog is preserved.
            prop_assert_eq!(Some(points), expected.get(metric.as_str()));
        }
        prop_assert!(cache.is_empty());
        prop_assert_eq!(cache.size(), 0);
    }
}

#[test]
fn test_drain_yields_larger_backlog_first() {
    let cache = MetricCache::new(100);
    for i in 0..2 {
        cache.store("metric.b", DataPoint::new(i, 0.0));
    }
    for i in 0..5 {
        cache.store("metric.a", DataPoint::new(i, 0.0));
    }
    let order: Vec<_> = cache.drain().map(|(k, v)| (k.into_string(), v.len())).collect();
    assert_eq!(order, vec![("metric.a".to_string(), 5), ("metric.b".to_string(), 2)]);
}

#[test]
fn test_concurrent_store_and_drain_loses_nothing() {
    let cache = Arc::new(MetricCache::new(i64::MAX));
    let producers = 4;
    let points_per_producer = 5_000u64;
    let done = Arc::new(AtomicBool::new(false));

    let consumer = {
        let cache = Arc::clone(&cache);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut drained = 0usize;
            loop {
                let finished = done.load(Ordering::Acquire);
                drained += cache.drain().map(|(_, points)| points.len()).sum::<usize>();
                if finished {
                    break;
                }
            }
            drained
        })
    };

    // A second consumer racing the first through direct pops.
    let popper = {
        let cache = Arc::clone(&cache);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut popped = 0usize;
            let mut misses = 0usize;
            while !done.load(Ordering::Acquire) {
                for m in 0..8 {
                    match cache.pop(&format!("load.m{}", m)) {
                        Ok(points) => popped += points.len(),
                        Err(e) => {
                            assert!(e.is_key_not_found(), "unexpected pop error: {}", e);
                            misses += 1;
                        }
                    }
                }
            }
            (popped, misses)
        })
    };

    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..points_per_producer {
                    let metric = format!("load..m{}.", (i + p) % 8);
                    assert!(cache.store(&metric, DataPoint::new(i, p as f64)).is_stored());
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    done.store(true, Ordering::Release);

    let drained = consumer.join().unwrap();
    let (popped, _misses) = popper.join().unwrap();
    let leftover: usize = cache.drain().map(|(_, points)| points.len()).sum();

    assert_eq!(
        drained + popped + leftover,
        producers as usize * points_per_producer as usize
    );
    assert_eq!(cache.size(), 0);
}

#[test]
fn test_concurrent_overshoot_is_bounded_by_racing_producers() {
    let producers = 8;
    let capacity = 100i64;
    let cache = Arc::new(MetricCache::new(capacity));

    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..1_000u64 {
                    cache.store(&format!("p{}", p), DataPoint::new(i, 0.0));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let size = cache.size();
    assert!(size >= capacity as usize);
    assert!(
        size <= capacity as usize + producers - 1,
        "size {} overshot capacity {} by more than {} racing producers",
        size,
        capacity,
        producers - 1
    );
    let drained: usize = cache.drain().map(|(_, points)| points.len()).sum();
    assert_eq!(drained, size);
}
