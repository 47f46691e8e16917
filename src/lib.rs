#![doc = include_str!("../README.md")]
// Declare modules
pub mod cache;
pub mod capacity;
pub mod drain;
pub mod error;
pub mod key;
pub mod telemetry;
pub mod types;
pub mod writer;

/// The bounded metric write buffer.
pub use crate::cache::MetricCache;
/// Configuration options for the cache.
pub use crate::cache::CacheConfig;
/// Outcome of a store call (stored or dropped on overflow).
pub use crate::cache::StoreOutcome;
/// Capacity bound providers.
pub use crate::capacity::{CapacitySource, FixedCapacity, SharedCapacity};
/// Lazy most-backlogged-first drain iterator.
pub use crate::drain::Drain;
/// Error type for cache operations.
pub use crate::error::{CacheError, SinkError};
/// Canonical metric key.
pub use crate::key::MetricKey;
/// Structured event hook for observability.
pub use crate::telemetry::{CacheEvent, CacheEventListener};
/// A single buffered sample and its component types.
pub use crate::types::{Backlog, DataPoint, Timestamp, Value};
/// Background drain worker and its downstream sink trait.
pub use crate::writer::{BacklogSink, DrainReport, DrainWorker, WorkerConfig};
