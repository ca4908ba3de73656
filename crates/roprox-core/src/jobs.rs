//! The two periodic maintenance jobs driven by the scheduler loop.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::EvictionFilter;
use crate::probe::ProbeQueue;
use crate::traits::ProxyStore;

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Feeds records not probed within `probe_interval` to the probe pool.
#[derive(Clone)]
pub struct StalenessScanner<S: ProxyStore> {
    store: S,
    queue: ProbeQueue,
    probe_interval: Duration,
}

impl<S: ProxyStore> StalenessScanner<S> {
    pub fn new(store: S, queue: ProbeQueue, probe_interval: Duration) -> Self {
        Self {
            store,
            queue,
            probe_interval,
        }
    }

    /// Query stale records and enqueue them oldest first.
    ///
    /// Enqueueing waits for room in the queue; if `cancel` fires meanwhile
    /// the scan stops early and reports how many records made it in.
    /// Returns the number of records enqueued.
    pub async fn scan_once(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<usize, AppError> {
        tracing::debug!("Collecting stale servers");
        let stale = self
            .store
            .select_stale(cutoff(now, self.probe_interval))
            .await?;
        let total = stale.len();
        tracing::debug!(count = total, "Stale servers pending for health check");

        let mut enqueued = 0;
        for record in stale {
            tokio::select! {
                res = self.queue.enqueue(record) => res?,
                () = cancel.cancelled() => {
                    tracing::info!(enqueued, total, "Stale scan interrupted by shutdown");
                    break;
                }
            }
            enqueued += 1;
        }

        Ok(enqueued)
    }
}

/// Deletes records that kept failing and stopped being reported by sources.
#[derive(Clone)]
pub struct EvictionJob<S: ProxyStore> {
    store: S,
    eviction_timeout: Duration,
    score_floor: Option<f64>,
}

impl<S: ProxyStore> EvictionJob<S> {
    pub fn new(store: S, eviction_timeout: Duration, score_floor: Option<f64>) -> Self {
        Self {
            store,
            eviction_timeout,
            score_floor,
        }
    }

    pub fn filter(&self, now: DateTime<Utc>) -> EvictionFilter {
        EvictionFilter::failed_since(cutoff(now, self.eviction_timeout))
            .with_score_below(self.score_floor)
    }

    /// Run one eviction pass. Returns the number of records deleted.
    pub async fn evict_once(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        tracing::debug!("Evicting stale servers");
        let evicted = self.store.delete_where(&self.filter(now)).await?;
        tracing::debug!(count = evicted, "Stale servers evicted");
        Ok(evicted)
    }
}
