use serde::{Deserialize, Serialize};

/// Timestamp type (opaque to the cache; callers typically use seconds or nanoseconds since epoch).
pub type Timestamp = u64;

/// Value type.
pub type Value = f64;

/// A single sample buffered under a metric. The cache never inspects either field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: Timestamp,
    pub value: Value,
}

impl DataPoint {
    pub fn new(timestamp: Timestamp, value: Value) -> Self {
        DataPoint { timestamp, value }
    }
}

impl From<(Timestamp, Value)> for DataPoint {
    fn from((timestamp, value): (Timestamp, Value)) -> Self {
        DataPoint { timestamp, value }
    }
}

/// Not-yet-persisted points for one metric, in arrival order.
pub type Backlog = Vec<DataPoint>;
