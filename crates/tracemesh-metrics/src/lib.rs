//! C3: an in-process metrics store. Windowed time-series under a `(category, name)` key,
//! plus single-value counters and gauges with TTL. No native time-series facility is
//! assumed; series are emulated with an ordered `BTreeMap<timestamp_ms, f64>` capped to a
//! bounded number of points per series.

mod series;
mod store;

pub use series::{Aggregation, Sample};
pub use store::{MetricKey, MetricsStore, RetentionPolicy};
