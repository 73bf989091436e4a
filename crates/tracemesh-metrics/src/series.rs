use std::collections::BTreeMap;

/// Maximum number of points retained per time-series, regardless of retention window.
const MAX_POINTS_PER_SERIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp_ms: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    OneMinute,
    FiveMinutes,
    OneHour,
}

impl Aggregation {
    fn bucket_ms(self) -> i64 {
        match self {
            Aggregation::OneMinute => 60_000,
            Aggregation::FiveMinutes => 5 * 60_000,
            Aggregation::OneHour => 60 * 60_000,
        }
    }
}

/// A single windowed time-series, keyed externally by `(category, name)`. Points are kept
/// in timestamp order and evicted oldest-first once [`MAX_POINTS_PER_SERIES`] is exceeded,
/// independent of the category's retention window (which is enforced separately by
/// `MetricsStore::prune`).
#[derive(Debug, Clone, Default)]
pub struct Series {
    points: BTreeMap<i64, f64>,
}

impl Series {
    pub fn push(&mut self, timestamp_ms: i64, value: f64) {
        self.points.insert(timestamp_ms, value);
        while self.points.len() > MAX_POINTS_PER_SERIES {
            let oldest = *self.points.keys().next().expect("non-empty");
            self.points.remove(&oldest);
        }
    }

    pub fn retain_since(&mut self, cutoff_ms: i64) {
        self.points = self.points.split_off(&cutoff_ms);
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<Sample> {
        self.points.iter().next_back().map(|(&timestamp_ms, &value)| Sample {
            timestamp_ms,
            value,
        })
    }

    pub fn range(&self, lo_ms: i64, hi_ms: i64, aggregation: Option<Aggregation>) -> Vec<Sample> {
        let raw: Vec<Sample> = self
            .points
            .range(lo_ms..=hi_ms)
            .map(|(&timestamp_ms, &value)| Sample { timestamp_ms, value })
            .collect();

        let Some(aggregation) = aggregation else {
            return raw;
        };

        let bucket = aggregation.bucket_ms();
        let mut buckets: BTreeMap<i64, (f64, u64)> = BTreeMap::new();
        for sample in raw {
            let bucket_start = (sample.timestamp_ms / bucket) * bucket;
            let entry = buckets.entry(bucket_start).or_insert((0.0, 0));
            entry.0 += sample.value;
            entry.1 += 1;
        }
        buckets
            .into_iter()
            .map(|(timestamp_ms, (sum, count))| Sample {
                timestamp_ms,
                value: sum / count as f64,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_evicts_oldest_past_cap() {
        let mut series = Series::default();
        for i in 0..(MAX_POINTS_PER_SERIES + 10) {
            series.push(i as i64, i as f64);
        }
        assert_eq!(series.points.len(), MAX_POINTS_PER_SERIES);
        assert!(!series.points.contains_key(&0));
    }

    #[test]
    fn range_aggregates_into_buckets() {
        let mut series = Series::default();
        series.push(0, 10.0);
        series.push(30_000, 20.0);
        series.push(60_000, 40.0);

        let points = series.range(0, 60_000, Some(Aggregation::OneMinute));
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, 15.0);
        assert_eq!(points[1].value, 40.0);
    }

    #[test]
    fn retain_since_drops_older_points() {
        let mut series = Series::default();
        series.push(0, 1.0);
        series.push(1000, 2.0);
        series.retain_since(500);
        assert!(series.points.get(&0).is_none());
        assert_eq!(series.points.get(&1000), Some(&2.0));
    }
}
