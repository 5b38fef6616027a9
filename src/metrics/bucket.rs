//! # One metric's bounded time series.
//!
//! A [`MetricBucket`] keeps a ring of finalized per-interval aggregates plus the
//! interval currently being filled. Memory is bounded by `capacity` no matter how
//! many samples arrive.
//!
//! ```text
//! push(v, t):
//!   no open interval            → open at t, fold v
//!   t - open.start >= interval  → finalize open → ring (evict oldest if full)
//!                                 open at t, fold v
//!   otherwise                   → fold v into open
//! ```
//!
//! The accumulator keeps `sum`, `count`, `max` and `last`; the average is computed
//! as `sum / count` when read, never incrementally.

use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// How samples inside one interval are reduced to one value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Arithmetic mean (`sum / count`).
    Avg,
    /// Total.
    Sum,
    /// Largest sample.
    Max,
    /// Most recent sample.
    Last,
}

/// An immutable raw observation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// When it was observed.
    pub at: DateTime<Utc>,
    /// Observed value.
    pub value: f64,
}

/// One point of a series returned to readers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Start of the interval this point summarises.
    pub at: DateTime<Utc>,
    /// Aggregated value.
    pub value: f64,
    /// True for the live tail (interval still open).
    pub partial: bool,
}

#[derive(Clone, Copy, Debug)]
struct Accumulator {
    start: DateTime<Utc>,
    sum: f64,
    count: u64,
    max: f64,
    last: f64,
}

impl Accumulator {
    fn open(start: DateTime<Utc>) -> Self {
        Self {
            start,
            sum: 0.0,
            count: 0,
            max: f64::NEG_INFINITY,
            last: 0.0,
        }
    }

    fn fold(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.max = self.max.max(value);
        self.last = value;
    }

    fn value(&self, kind: Aggregation) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        match kind {
            Aggregation::Avg => self.sum / self.count as f64,
            Aggregation::Sum => self.sum,
            Aggregation::Max => self.max,
            Aggregation::Last => self.last,
        }
    }

    fn point(&self, kind: Aggregation, partial: bool) -> MetricPoint {
        MetricPoint {
            at: self.start,
            value: self.value(kind),
            partial,
        }
    }
}

/// Bounded ring of finalized aggregates plus an in-progress interval.
#[derive(Clone, Debug)]
pub struct MetricBucket {
    kind: Aggregation,
    interval: TimeDelta,
    capacity: usize,
    ring: VecDeque<MetricPoint>,
    open: Option<Accumulator>,
}

impl MetricBucket {
    /// Creates an empty bucket.
    ///
    /// `capacity` is clamped to at least 1. An `interval` that cannot be represented
    /// as a [`TimeDelta`] saturates to the largest one.
    pub fn new(kind: Aggregation, interval: std::time::Duration, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            kind,
            interval: TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX),
            capacity,
            ring: VecDeque::with_capacity(capacity),
            open: None,
        }
    }

    /// Aggregation kind.
    pub fn kind(&self) -> Aggregation {
        self.kind
    }

    /// Maximum number of finalized points retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Folds `sample` into the series.
    pub fn push(&mut self, sample: MetricSample) {
        let mut acc = match self.open.take() {
            None => Accumulator::open(sample.at),
            Some(acc) if sample.at - acc.start >= self.interval => {
                self.finalize(acc);
                Accumulator::open(sample.at)
            }
            Some(acc) => acc,
        };
        acc.fold(sample.value);
        self.open = Some(acc);
    }

    fn finalize(&mut self, acc: Accumulator) {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(acc.point(self.kind, false));
    }

    /// Finalized points (oldest first) followed by the live tail, if any.
    pub fn series(&self) -> Vec<MetricPoint> {
        let mut out = Vec::with_capacity(self.ring.len() + 1);
        out.extend(self.ring.iter().copied());
        if let Some(acc) = &self.open {
            out.push(acc.point(self.kind, true));
        }
        out
    }

    /// Number of finalized points.
    pub fn finalized_len(&self) -> usize {
        self.ring.len()
    }

    /// Drops all history and the open interval.
    pub fn clear(&mut self) {
        self.ring.clear();
        self.open = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn sample(secs: i64, value: f64) -> MetricSample {
        MetricSample {
            at: at(secs),
            value,
        }
    }

    fn finalize_one_interval(kind: Aggregation, values: &[f64]) -> f64 {
        let mut b = MetricBucket::new(kind, Duration::from_secs(60), 4);
        for (i, v) in values.iter().enumerate() {
            b.push(sample(i as i64, *v));
        }
        b.push(sample(120, 0.0));
        let s = b.series();
        assert!(!s[0].partial);
        s[0].value
    }

    #[test]
    fn aggregation_kinds_over_one_interval() {
        let values = [1.0, 2.0, 3.0];
        assert_eq!(finalize_one_interval(Aggregation::Sum, &values), 6.0);
        assert_eq!(finalize_one_interval(Aggregation::Avg, &values), 2.0);
        assert_eq!(finalize_one_interval(Aggregation::Max, &values), 3.0);
        assert_eq!(finalize_one_interval(Aggregation::Last, &values), 3.0);
    }

    #[test]
    fn keeps_only_capacity_most_recent_plus_tail() {
        let k = 3;
        let mut b = MetricBucket::new(Aggregation::Last, Duration::from_secs(1), k);
        for i in 0..10 {
            b.push(sample(i, i as f64));
        }
        let s = b.series();
        assert_eq!(b.finalized_len(), k);
        let values: Vec<f64> = s.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![6.0, 7.0, 8.0, 9.0]);
        assert!(s[..k].iter().all(|p| !p.partial));
        assert!(s[k].partial);
    }

    #[test]
    fn tail_reports_aggregate_so_far() {
        let mut b = MetricBucket::new(Aggregation::Avg, Duration::from_secs(60), 4);
        b.push(sample(0, 10.0));
        b.push(sample(5, 20.0));
        let s = b.series();
        assert_eq!(s.len(), 1);
        assert_eq!(s[0].value, 15.0);
        assert!(s[0].partial);
        assert_eq!(s[0].at, at(0));
    }

    #[test]
    fn fresh_interval_opens_at_the_late_sample() {
        let mut b = MetricBucket::new(Aggregation::Sum, Duration::from_secs(60), 4);
        b.push(sample(0, 1.0));
        b.push(sample(600, 2.0));
        let s = b.series();
        assert_eq!(s.len(), 2);
        assert_eq!(s[1].at, at(600));
    }

    #[test]
    fn clear_drops_everything() {
        let mut b = MetricBucket::new(Aggregation::Max, Duration::from_secs(1), 2);
        for i in 0..5 {
            b.push(sample(i, 1.0));
        }
        b.clear();
        assert!(b.series().is_empty());
    }
}
