use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::series::Series;
use crate::{Aggregation, Sample};

/// A `(category, name)` pair identifying a series, counter, or gauge, e.g.
/// `("tools", "Edit.latency")`, formatted on demand as `metric:{category}:{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub category: String,
    pub name: String,
}

impl MetricKey {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }

    pub fn wire_name(&self) -> String {
        format!("metric:{}:{}", self.category, self.name)
    }
}

/// Retention window for a metric category, applied by [`MetricsStore::prune`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub realtime: Duration,
    pub session: Duration,
    pub tools: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            realtime: Duration::from_secs(60 * 60),
            session: Duration::from_secs(7 * 24 * 60 * 60),
            tools: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl RetentionPolicy {
    fn window_for(&self, category: &str) -> Duration {
        match category {
            "realtime" => self.realtime,
            "session" => self.session,
            "tools" => self.tools,
            _ => self.session,
        }
    }
}

struct Counter {
    value: i64,
    expires_at: Option<Instant>,
}

struct Gauge {
    value: f64,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    series: HashMap<MetricKey, Series>,
    counters: HashMap<MetricKey, Counter>,
    gauges: HashMap<MetricKey, Gauge>,
}

/// C3: in-process metrics, guarded by a single `parking_lot::Mutex` since all operations
/// are O(log n) map lookups -- lock contention is not expected to dominate over the
/// syscalls it would take to reach an external store.
pub struct MetricsStore {
    inner: Mutex<Inner>,
    retention: RetentionPolicy,
    default_ttl: Duration,
    now_ms: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::default(), Duration::from_secs(60 * 60))
    }
}

impl MetricsStore {
    pub fn new(retention: RetentionPolicy, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            retention,
            default_ttl,
            now_ms: Box::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Append a sample to a windowed series. `timestamp_ms` defaults to now when `None`.
    pub fn record(&self, category: &str, name: &str, value: f64, timestamp_ms: Option<i64>) {
        let key = MetricKey::new(category, name);
        let timestamp_ms = timestamp_ms.unwrap_or_else(|| (self.now_ms)());
        let mut inner = self.inner.lock();
        inner.series.entry(key).or_default().push(timestamp_ms, value);
    }

    /// Increment a counter with a TTL, creating it at `delta` if absent or expired.
    pub fn increment(&self, category: &str, name: &str, delta: i64) {
        let key = MetricKey::new(category, name);
        let ttl = self.default_ttl;
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let entry = inner.counters.entry(key).or_insert(Counter {
            value: 0,
            expires_at: Some(now + ttl),
        });
        if entry.expires_at.is_some_and(|expiry| expiry <= now) {
            entry.value = 0;
        }
        entry.value += delta;
        entry.expires_at = Some(now + ttl);
    }

    /// Set a gauge to `value` with a TTL, replacing any prior value (latest-wins).
    pub fn set_gauge(&self, category: &str, name: &str, value: f64) {
        let key = MetricKey::new(category, name);
        let mut inner = self.inner.lock();
        inner.gauges.insert(
            key,
            Gauge {
                value,
                expires_at: Some(Instant::now() + self.default_ttl),
            },
        );
    }

    /// Fast dashboard read: the latest value of every counter, gauge, and series point,
    /// optionally restricted to one category.
    pub fn get_latest(&self, category: Option<&str>) -> HashMap<MetricKey, f64> {
        let inner = self.inner.lock();
        let now = Instant::now();
        let mut out = HashMap::new();

        for (key, counter) in &inner.counters {
            if category.is_some_and(|c| c != key.category) {
                continue;
            }
            if counter.expires_at.is_some_and(|expiry| expiry <= now) {
                continue;
            }
            out.insert(key.clone(), counter.value as f64);
        }
        for (key, gauge) in &inner.gauges {
            if category.is_some_and(|c| c != key.category) {
                continue;
            }
            if gauge.expires_at.is_some_and(|expiry| expiry <= now) {
                continue;
            }
            out.insert(key.clone(), gauge.value);
        }
        for (key, series) in &inner.series {
            if category.is_some_and(|c| c != key.category) {
                continue;
            }
            if let Some(sample) = series.latest() {
                out.insert(key.clone(), sample.value);
            }
        }
        out
    }

    /// Ordered `(t, v)` pairs for a windowed series, optionally pre-aggregated.
    pub fn range(
        &self,
        category: &str,
        name: &str,
        lo_ms: i64,
        hi_ms: i64,
        aggregation: Option<Aggregation>,
    ) -> Vec<Sample> {
        let key = MetricKey::new(category, name);
        let inner = self.inner.lock();
        inner
            .series
            .get(&key)
            .map(|series| series.range(lo_ms, hi_ms, aggregation))
            .unwrap_or_default()
    }

    /// Drop series points and expired counters/gauges older than each category's
    /// retention window. Intended to run periodically from the supervisor loop.
    pub fn prune(&self) {
        let now_ms = (self.now_ms)();
        let now = Instant::now();
        let mut inner = self.inner.lock();

        for (key, series) in inner.series.iter_mut() {
            let window_ms = self.retention.window_for(&key.category).as_millis() as i64;
            series.retain_since(now_ms - window_ms);
        }
        inner.series.retain(|_, series| !series.is_empty());
        inner
            .counters
            .retain(|_, counter| counter.expires_at.is_none_or(|expiry| expiry > now));
        inner
            .gauges
            .retain(|_, gauge| gauge.expires_at.is_none_or(|expiry| expiry > now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_accumulates_within_ttl() {
        let store = MetricsStore::new(RetentionPolicy::default(), Duration::from_secs(60));
        store.increment("realtime", "active_sessions", 1);
        store.increment("realtime", "active_sessions", 1);
        let latest = store.get_latest(Some("realtime"));
        assert_eq!(
            latest.get(&MetricKey::new("realtime", "active_sessions")),
            Some(&2.0)
        );
    }

    #[test]
    fn set_gauge_is_latest_wins() {
        let store = MetricsStore::default();
        store.set_gauge("session", "acceptance_rate", 0.5);
        store.set_gauge("session", "acceptance_rate", 0.8);
        let latest = store.get_latest(None);
        assert_eq!(
            latest.get(&MetricKey::new("session", "acceptance_rate")),
            Some(&0.8)
        );
    }

    #[test]
    fn record_and_range_round_trip() {
        let store = MetricsStore::default();
        store.record("tools", "Edit.latency", 250.0, Some(1_000));
        store.record("tools", "Edit.latency", 300.0, Some(2_000));
        let points = store.range("tools", "Edit.latency", 0, 10_000, None);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, 250.0);
    }

    #[test]
    fn wire_name_matches_namespacing_convention() {
        let key = MetricKey::new("tools", "Edit.latency");
        assert_eq!(key.wire_name(), "metric:tools:Edit.latency");
    }
}
