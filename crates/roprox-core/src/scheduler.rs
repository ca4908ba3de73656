//! Top-level coordinator for the staleness scanner and the eviction job.
//!
//! ```text
//! RUNNING --[probe tick]--> scan stale records   --> RUNNING
//! RUNNING --[evict tick]--> evict old failures   --> RUNNING
//! RUNNING --[cancelled]---> stop both timers     --> SHUTTING_DOWN
//! ```
//!
//! Both jobs run once right away, before the first tick. The two timers are
//! independent; the jobs work on disjoint predicates so their order does
//! not matter. A failing job is logged and retried on its next tick.
//!
//! A scan runs in its own task because it waits for room in the probe
//! queue. While one is in flight, probe ticks are skipped and eviction
//! ticks keep firing.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::jobs::{EvictionJob, StalenessScanner};
use crate::traits::ProxyStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    ShuttingDown,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::ShuttingDown => write!(f, "shutting-down"),
        }
    }
}

/// What the loop did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub scans: u64,
    pub scan_failures: u64,
    pub enqueued: u64,
    pub evictions: u64,
    pub eviction_failures: u64,
    pub evicted: u64,
}

pub struct Scheduler<S: ProxyStore> {
    scanner: StalenessScanner<S>,
    eviction: EvictionJob<S>,
    probe_interval: Duration,
    eviction_interval: Duration,
    state: SchedulerState,
    stats: SchedulerStats,
}

impl<S: ProxyStore> Scheduler<S> {
    pub fn new(
        scanner: StalenessScanner<S>,
        eviction: EvictionJob<S>,
        probe_interval: Duration,
        eviction_interval: Duration,
    ) -> Self {
        Self {
            scanner,
            eviction,
            probe_interval,
            eviction_interval,
            state: SchedulerState::Running,
            stats: SchedulerStats::default(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Run until `cancel` fires. Returns the final counters.
    pub async fn run(&mut self, cancel: CancellationToken) -> SchedulerStats {
        self.state = SchedulerState::Running;
        tracing::info!(
            probe_interval_secs = self.probe_interval.as_secs(),
            eviction_interval_secs = self.eviction_interval.as_secs(),
            "Scheduler started"
        );

        // Cold start: don't leave the pool idle for a whole interval.
        self.evict().await;
        let mut scan = self.start_scan(&cancel);

        let mut probe_tick = tokio::time::interval_at(
            Instant::now() + self.probe_interval,
            self.probe_interval,
        );
        probe_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut evict_tick = tokio::time::interval_at(
            Instant::now() + self.eviction_interval,
            self.eviction_interval,
        );
        evict_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                res = join_scan(&mut scan), if scan.is_some() => {
                    scan = None;
                    self.finish_scan(res);
                }
                _ = evict_tick.tick() => self.evict().await,
                _ = probe_tick.tick() => {
                    if scan.is_some() {
                        tracing::debug!("Previous scan still queueing, skipping probe tick");
                    } else {
                        scan = self.start_scan(&cancel);
                    }
                }
            }
        }

        // The scan sees the same token and stops enqueueing.
        if scan.is_some() {
            let res = join_scan(&mut scan).await;
            self.finish_scan(res);
        }

        self.state = SchedulerState::ShuttingDown;
        tracing::info!(
            scans = self.stats.scans,
            evictions = self.stats.evictions,
            "Scheduler stopped"
        );
        self.stats
    }

    fn start_scan(
        &mut self,
        cancel: &CancellationToken,
    ) -> Option<JoinHandle<Result<usize, AppError>>> {
        if cancel.is_cancelled() {
            return None;
        }
        self.stats.scans += 1;
        let scanner = self.scanner.clone();
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            scanner.scan_once(Utc::now(), &cancel).await
        }))
    }

    fn finish_scan(&mut self, res: Result<Result<usize, AppError>, JoinError>) {
        match res {
            Ok(Ok(n)) => {
                self.stats.enqueued += n as u64;
                if n > 0 {
                    tracing::info!(count = n, "Stale servers queued for health check");
                }
            }
            Ok(Err(e)) => {
                self.stats.scan_failures += 1;
                log_job_error("staleness scan", &e);
            }
            Err(e) => {
                self.stats.scan_failures += 1;
                tracing::error!(error = %e, "Staleness scan task panicked");
            }
        }
    }

    async fn evict(&mut self) {
        self.stats.evictions += 1;
        match self.eviction.evict_once(Utc::now()).await {
            Ok(n) => {
                self.stats.evicted += n;
                if n > 0 {
                    tracing::info!(count = n, "Stale servers evicted");
                }
            }
            Err(e) => {
                self.stats.eviction_failures += 1;
                log_job_error("eviction", &e);
            }
        }
    }
}

async fn join_scan(
    scan: &mut Option<JoinHandle<Result<usize, AppError>>>,
) -> Result<Result<usize, AppError>, JoinError> {
    match scan {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn log_job_error(job: &str, error: &AppError) {
    if error.is_transient() {
        tracing::warn!(%job, %error, "Job failed, retrying on next tick");
    } else {
        tracing::error!(%job, %error, "Job failed, retrying on next tick");
    }
}
