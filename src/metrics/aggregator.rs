//! # Per-instance metrics aggregator.
//!
//! Holds one [`MetricBucket`] per [`Metric`] behind a single mutex. Writers (the
//! sampler tick) and readers (stats) contend only on this lock, never on the
//! supervisor registry lock. The critical section is an O(1) bucket update or a
//! copy of at most `capacity + 1` points.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bucket::{Aggregation, MetricBucket, MetricPoint, MetricSample};

/// Metrics tracked for every instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Engine memory in bytes (averaged).
    Memory,
    /// Dispatched route requests (summed).
    Requests,
    /// Executed scheduled jobs (summed).
    Jobs,
    /// Share of wall time spent inside the engine, percent (averaged).
    Cpu,
}

impl Metric {
    /// Every tracked metric, in snapshot order.
    pub const ALL: [Metric; 4] = [Metric::Memory, Metric::Requests, Metric::Jobs, Metric::Cpu];

    /// Aggregation used for this metric: counters sum, gauges average.
    pub fn aggregation(self) -> Aggregation {
        match self {
            Metric::Memory | Metric::Cpu => Aggregation::Avg,
            Metric::Requests | Metric::Jobs => Aggregation::Sum,
        }
    }

    fn index(self) -> usize {
        match self {
            Metric::Memory => 0,
            Metric::Requests => 1,
            Metric::Jobs => 2,
            Metric::Cpu => 3,
        }
    }
}

/// Series for every metric, as returned by [`MetricsAggregator::history`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// Memory series.
    pub memory: Vec<MetricPoint>,
    /// Requests series.
    pub requests: Vec<MetricPoint>,
    /// Jobs series.
    pub jobs: Vec<MetricPoint>,
    /// CPU series.
    pub cpu: Vec<MetricPoint>,
}

/// Bounded-memory multi-metric time series.
#[derive(Debug)]
pub struct MetricsAggregator {
    buckets: Mutex<[MetricBucket; 4]>,
}

impl MetricsAggregator {
    /// Creates an aggregator whose buckets finalize every `interval` and keep `capacity` points.
    pub fn new(interval: Duration, capacity: usize) -> Self {
        let bucket = |m: Metric| MetricBucket::new(m.aggregation(), interval, capacity);
        Self {
            buckets: Mutex::new(Metric::ALL.map(bucket)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, [MetricBucket; 4]> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Routes one sample to the named metric's bucket.
    pub fn push_sample(&self, metric: Metric, value: f64, at: DateTime<Utc>) {
        self.lock()[metric.index()].push(MetricSample { at, value });
    }

    /// Finalized points plus live tail for one metric.
    pub fn series(&self, metric: Metric) -> Vec<MetricPoint> {
        self.lock()[metric.index()].series()
    }

    /// All series, each trimmed to its `limit` most recent points.
    pub fn history(&self, limit: usize) -> History {
        let buckets = self.lock();
        let tail = |m: Metric| {
            let mut s = buckets[m.index()].series();
            let skip = s.len().saturating_sub(limit);
            s.drain(..skip);
            s
        };
        History {
            memory: tail(Metric::Memory),
            requests: tail(Metric::Requests),
            jobs: tail(Metric::Jobs),
            cpu: tail(Metric::Cpu),
        }
    }

    /// Resets every bucket.
    pub fn clear(&self) {
        for bucket in self.lock().iter_mut() {
            bucket.clear();
        }
    }
}
