//! Bounded-memory metrics.
//!
//! - [`MetricBucket`] one metric: ring of finalized interval aggregates + live tail
//! - [`MetricsAggregator`] the four per-instance buckets behind one lock
//!
//! With the default configuration (5 minute intervals, 288 points) a bucket
//! covers 24 hours without retaining raw samples.

mod aggregator;
mod bucket;

pub use aggregator::{History, Metric, MetricsAggregator};
pub use bucket::{Aggregation, MetricBucket, MetricPoint, MetricSample};
