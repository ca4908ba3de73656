//! Wires the store, checker, loaders and sources into a running pool.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::AppError;
use crate::ingest::IngestService;
use crate::jobs::{EvictionJob, StalenessScanner};
use crate::probe::{ProbePool, ProbeReporter, ProbeStats, TracingProbeReporter};
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::score::{ScorePolicy, SuccessRatio};
use crate::source::SourceSpec;
use crate::traits::{LivenessCheck, PageLoader, PageOpener, ProxyStore};

/// Totals reported once the service has stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub scheduler: SchedulerStats,
    pub probes: ProbeStats,
}

/// Result of a one-shot maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: u64,
    pub enqueued: usize,
    pub probes: ProbeStats,
}

pub struct ProxyPoolService<S, L, P, B, R = TracingProbeReporter> {
    store: S,
    checker: L,
    loader: P,
    browser: B,
    reporter: Arc<R>,
    policy: Arc<dyn ScorePolicy>,
    sources: Vec<Arc<dyn SourceSpec>>,
    config: SchedulerConfig,
    page_timeout: Duration,
}

impl<S, L, P, B> ProxyPoolService<S, L, P, B, TracingProbeReporter>
where
    S: ProxyStore,
    L: LivenessCheck,
    P: PageLoader,
    B: PageOpener,
{
    pub fn new(store: S, checker: L, loader: P, browser: B, config: SchedulerConfig) -> Self {
        Self {
            store,
            checker,
            loader,
            browser,
            reporter: Arc::new(TracingProbeReporter),
            policy: Arc::new(SuccessRatio),
            sources: Vec::new(),
            config,
            page_timeout: Duration::from_secs(60),
        }
    }
}

impl<S, L, P, B, R> ProxyPoolService<S, L, P, B, R>
where
    S: ProxyStore,
    L: LivenessCheck,
    P: PageLoader,
    B: PageOpener,
    R: ProbeReporter,
{
    pub fn with_sources(mut self, sources: Vec<Arc<dyn SourceSpec>>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_score_policy(mut self, policy: Arc<dyn ScorePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Upper bound on one browser-driven page visit.
    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    pub fn with_reporter<R2: ProbeReporter>(self, reporter: Arc<R2>) -> ProxyPoolService<S, L, P, B, R2> {
        ProxyPoolService {
            store: self.store,
            checker: self.checker,
            loader: self.loader,
            browser: self.browser,
            reporter,
            policy: self.policy,
            sources: self.sources,
            config: self.config,
            page_timeout: self.page_timeout,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn sources(&self) -> &[Arc<dyn SourceSpec>] {
        &self.sources
    }

    fn spawn_pool(&self) -> ProbePool {
        ProbePool::spawn(
            self.store.clone(),
            self.checker.clone(),
            Arc::clone(&self.policy),
            Arc::clone(&self.reporter),
            &self.config,
        )
    }

    fn eviction_job(&self) -> EvictionJob<S> {
        EvictionJob::new(
            self.store.clone(),
            self.config.eviction_timeout,
            self.config.eviction_score_floor,
        )
    }

    /// Run ingestion, probing and maintenance until `cancel` fires.
    ///
    /// On shutdown the ingestion tasks are stopped first, then the probe
    /// queue is closed and drained.
    pub async fn run(self, cancel: CancellationToken) -> Result<ShutdownReport, AppError> {
        self.config.validate()?;
        tracing::info!(
            pool_id = %self.config.pool_id,
            workers = self.config.probe_pool_size,
            sources = self.sources.len(),
            "Starting proxy pool"
        );

        let pool = self.spawn_pool();
        let ingest = Arc::new(IngestService::new(
            self.store.clone(),
            self.loader.clone(),
            self.browser.clone(),
            self.page_timeout,
        ));
        let ingest_tasks = ingest.spawn_all(self.sources.clone(), cancel.clone());

        let mut scheduler = Scheduler::new(
            StalenessScanner::new(self.store.clone(), pool.queue(), self.config.probe_interval),
            self.eviction_job(),
            self.config.probe_interval,
            self.config.eviction_interval,
        );
        let scheduler_stats = scheduler.run(cancel).await;

        for task in ingest_tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Ingestion task panicked");
            }
        }
        let probes = pool.shutdown().await;

        tracing::info!(
            probed = probes.probed,
            ok = probes.ok,
            failed = probes.failed,
            write_failures = probes.write_failures,
            "Proxy pool stopped"
        );
        Ok(ShutdownReport {
            scheduler: scheduler_stats,
            probes,
        })
    }

    /// One eviction pass and one staleness scan, then wait for every queued
    /// probe to finish.
    pub async fn sweep(&self, cancel: CancellationToken) -> Result<SweepReport, AppError> {
        self.config.validate()?;
        let pool = self.spawn_pool();

        let evicted = self.eviction_job().evict_once(Utc::now()).await?;
        let scanner =
            StalenessScanner::new(self.store.clone(), pool.queue(), self.config.probe_interval);
        let enqueued = scanner.scan_once(Utc::now(), &cancel).await?;

        let probes = pool.shutdown().await;
        Ok(SweepReport {
            evicted,
            enqueued,
            probes,
        })
    }
}
