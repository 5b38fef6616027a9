//! # Job scheduler of one instance.
//!
//! Each [`ScheduledJob`] gets a ticker task that enqueues [`Command::Job`] into the
//! instance mailbox every `every`. The job itself runs on the lifecycle task, so
//! a ticker never touches the engine. A full mailbox skips the tick.
//!
//! Tickers live under a child of the instance scope: they stop when the
//! scheduler is stopped or dropped, and when the run ends for any reason.

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::engine::{Command, InstanceControl, ScheduledJob};

pub(crate) struct Scheduler {
    token: CancellationToken,
}

impl Scheduler {
    pub(crate) fn start(
        jobs: Vec<ScheduledJob>,
        control: InstanceControl,
        scope: &CancellationToken,
    ) -> Self {
        let token = scope.child_token();
        for job in jobs {
            if job.every.is_zero() {
                tracing::warn!(job = %job.name, "ignoring job with zero period");
                continue;
            }
            tokio::spawn(tick(job, control.clone(), token.clone()));
        }
        Self { token }
    }

    /// Cancels every ticker. Jobs already queued still run.
    pub(crate) fn stop(&self) {
        self.token.cancel();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn tick(job: ScheduledJob, control: InstanceControl, token: CancellationToken) {
    let mut ticker = time::interval_at(Instant::now() + job.every, job.every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let cmd = Command::Job {
            name: job.name.clone(),
        };
        match control.try_send(cmd) {
            Ok(()) => {}
            Err(tokio::sync::mpsc::error::TrySendError::Full(())) => {
                tracing::debug!(job = %job.name, "mailbox full, skipping tick");
            }
            Err(tokio::sync::mpsc::error::TrySendError::Closed(())) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn job(name: &str, ms: u64) -> ScheduledJob {
        ScheduledJob {
            name: name.into(),
            every: Duration::from_millis(ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_enqueue_jobs_until_stopped() {
        let (control, mut rx) = InstanceControl::channel(16);
        let scope = CancellationToken::new();
        let scheduler = Scheduler::start(vec![job("tick", 100)], control, &scope);

        time::sleep(Duration::from_millis(350)).await;
        scheduler.stop();
        time::sleep(Duration::from_millis(500)).await;
        // Still alive here: stopping must not depend on the drop.
        drop(scheduler);

        let mut names = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            if let Command::Job { name } = cmd {
                names.push(name);
            }
        }
        assert_eq!(names, vec!["tick", "tick", "tick"]);
    }

    #[tokio::test(start_paused = true)]
    async fn scope_cancellation_stops_tickers() {
        let (control, mut rx) = InstanceControl::channel(16);
        let scope = CancellationToken::new();
        let _scheduler = Scheduler::start(vec![job("a", 100)], control, &scope);

        scope.cancel();
        time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }
}
