//! Metrics sampler: one task per instance, pushing into the tenant's aggregator.
//!
//! Each tick records memory (gauge), requests and jobs (deltas since the previous
//! tick) and CPU (share of wall time spent inside engine calls, in percent).

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::instance::InstanceShared;
use crate::metrics::{Metric, MetricsAggregator};

pub(crate) fn spawn(
    shared: Arc<InstanceShared>,
    metrics: Arc<MetricsAggregator>,
    every: Duration,
    scope: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Counters::zero(Instant::now());

        loop {
            tokio::select! {
                biased;
                _ = scope.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let now = Counters::read(&shared, Instant::now());
            let at = Utc::now();
            metrics.push_sample(Metric::Memory, now.memory as f64, at);
            metrics.push_sample(
                Metric::Requests,
                now.requests.saturating_sub(last.requests) as f64,
                at,
            );
            metrics.push_sample(Metric::Jobs, now.jobs.saturating_sub(last.jobs) as f64, at);
            metrics.push_sample(Metric::Cpu, cpu_percent(&last, &now), at);
            last = now;
        }
    });
}

#[derive(Clone, Copy, Debug)]
struct Counters {
    at: Instant,
    memory: u64,
    requests: u64,
    jobs: u64,
    busy_micros: u64,
}

impl Counters {
    fn zero(at: Instant) -> Self {
        Self {
            at,
            memory: 0,
            requests: 0,
            jobs: 0,
            busy_micros: 0,
        }
    }

    fn read(shared: &InstanceShared, at: Instant) -> Self {
        Self {
            at,
            memory: shared.memory_bytes.load(Ordering::Relaxed),
            requests: shared.requests.load(Ordering::Relaxed),
            jobs: shared.jobs.load(Ordering::Relaxed),
            busy_micros: shared.busy_micros.load(Ordering::Relaxed),
        }
    }
}

fn cpu_percent(prev: &Counters, now: &Counters) -> f64 {
    let wall = now.at.saturating_duration_since(prev.at).as_micros() as f64;
    if wall <= 0.0 {
        return 0.0;
    }
    let busy = now.busy_micros.saturating_sub(prev.busy_micros) as f64;
    (busy / wall * 100.0).clamp(0.0, 100.0)
}
