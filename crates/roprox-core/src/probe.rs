//! Fixed-size pool of probe workers draining a bounded job queue.
//!
//! Producers (the staleness scanner) push records through a cloneable
//! [`ProbeQueue`]; `enqueue` waits while the queue is full. Each worker
//! takes one record at a time, runs the liveness check under the probe
//! timeout and writes the new status back through the store. At most
//! `probe_pool_size` checks run at once.
//!
//! [`ProbePool::shutdown`] closes the queue; workers finish everything
//! already queued before they exit.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::SchedulerConfig;
use crate::error::AppError;
use crate::models::{ProxyRecord, ProxyStatus, StatusUpdate};
use crate::score::ScorePolicy;
use crate::traits::{LivenessCheck, ProxyStore};

/// Events emitted by probe workers for monitoring/logging.
#[derive(Debug, Clone)]
pub enum ProbeEvent<'a> {
    WorkerStarted {
        worker: &'a str,
    },
    Probed {
        worker: &'a str,
        record: &'a ProxyRecord,
        status: ProxyStatus,
        timed_out: bool,
        elapsed: Duration,
    },
    /// The status write failed; the record keeps its previous status until
    /// the next scan picks it up again.
    WriteFailed {
        worker: &'a str,
        record: &'a ProxyRecord,
        error: &'a AppError,
    },
    /// The record was deleted while it was being probed.
    RecordVanished {
        worker: &'a str,
        record: &'a ProxyRecord,
    },
    WorkerStopped {
        worker: &'a str,
        probed: u64,
    },
}

/// Trait for receiving probe events (decoupled logging).
pub trait ProbeReporter: Send + Sync + 'static {
    fn report(&self, event: ProbeEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProbeReporter;

impl ProbeReporter for TracingProbeReporter {
    fn report(&self, event: ProbeEvent<'_>) {
        match event {
            ProbeEvent::WorkerStarted { worker } => {
                tracing::debug!(%worker, "Probe worker started");
            }
            ProbeEvent::Probed {
                worker,
                record,
                status,
                timed_out,
                elapsed,
            } => {
                tracing::debug!(
                    %worker,
                    host = %record.host,
                    port = record.port,
                    proxy_type = %record.proxy_type,
                    previous = %record.status,
                    %status,
                    timed_out,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Proxy probed"
                );
            }
            ProbeEvent::WriteFailed {
                worker,
                record,
                error,
            } => {
                tracing::error!(
                    %worker,
                    host = %record.host,
                    port = record.port,
                    %error,
                    "Failed to update proxy server status"
                );
            }
            ProbeEvent::RecordVanished { worker, record } => {
                tracing::debug!(%worker, host = %record.host, port = record.port, "Proxy evicted while probing");
            }
            ProbeEvent::WorkerStopped { worker, probed } => {
                tracing::debug!(%worker, probed, "Probe worker stopped");
            }
        }
    }
}

/// Totals since the pool was spawned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeStats {
    pub probed: u64,
    pub ok: u64,
    pub failed: u64,
    pub write_failures: u64,
}

#[derive(Default)]
struct Tracker {
    pending: AtomicUsize,
    idle: Notify,
    probed: AtomicU64,
    ok: AtomicU64,
    failed: AtomicU64,
    write_failures: AtomicU64,
}

impl Tracker {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn stats(&self) -> ProbeStats {
        ProbeStats {
            probed: self.probed.load(Ordering::Relaxed),
            ok: self.ok.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

struct PendingGuard<'a> {
    tracker: &'a Tracker,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    fn new(tracker: &'a Tracker) -> Self {
        tracker.pending.fetch_add(1, Ordering::AcqRel);
        Self {
            tracker,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.tracker.finish_one();
        }
    }
}

/// Producer handle for the probe job queue.
#[derive(Clone)]
pub struct ProbeQueue {
    tx: async_channel::Sender<ProxyRecord>,
    tracker: Arc<Tracker>,
}

impl ProbeQueue {
    /// Queue a record for probing, waiting while the queue is full.
    pub async fn enqueue(&self, record: ProxyRecord) -> Result<(), AppError> {
        // Counted before sending so a fast worker can't finish it first;
        // the guard undoes the count if the send fails or is cancelled.
        let guard = PendingGuard::new(&self.tracker);
        self.tx
            .send(record)
            .await
            .map_err(|_| AppError::QueueClosed)?;
        guard.disarm();
        Ok(())
    }
}

/// Fixed set of probe workers sharing one bounded queue.
pub struct ProbePool {
    queue: ProbeQueue,
    workers: Vec<JoinHandle<()>>,
}

impl ProbePool {
    /// Spawn `config.probe_pool_size` workers on the current runtime.
    pub fn spawn<S, L, R>(
        store: S,
        checker: L,
        policy: Arc<dyn ScorePolicy>,
        reporter: Arc<R>,
        config: &SchedulerConfig,
    ) -> Self
    where
        S: ProxyStore,
        L: LivenessCheck,
        R: ProbeReporter,
    {
        let (tx, rx) = async_channel::bounded(config.queue_capacity.max(1));
        let tracker = Arc::new(Tracker::default());

        let workers = (0..config.probe_pool_size.max(1))
            .map(|n| {
                let worker = ProbeWorker {
                    name: format!("{}-{}", config.pool_id, n),
                    store: store.clone(),
                    checker: checker.clone(),
                    policy: Arc::clone(&policy),
                    reporter: Arc::clone(&reporter),
                    tracker: Arc::clone(&tracker),
                    timeout: config.probe_timeout,
                };
                tokio::spawn(worker.run(rx.clone()))
            })
            .collect();

        Self {
            queue: ProbeQueue { tx, tracker },
            workers,
        }
    }

    pub fn queue(&self) -> ProbeQueue {
        self.queue.clone()
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Records queued or being probed.
    pub fn pending(&self) -> usize {
        self.queue.tracker.pending.load(Ordering::Acquire)
    }

    /// Wait until every record queued so far has been probed and written back.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.queue.tracker.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> ProbeStats {
        self.queue.tracker.stats()
    }

    /// Close the queue, let workers drain it, and wait for them to exit.
    pub async fn shutdown(self) -> ProbeStats {
        self.queue.tx.close();
        tracing::info!(
            workers = self.workers.len(),
            pending = self.pending(),
            "Draining probe queue"
        );
        for handle in self.workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Probe worker panicked");
            }
        }
        self.queue.tracker.stats()
    }
}

struct ProbeWorker<S, L, R> {
    name: String,
    store: S,
    checker: L,
    policy: Arc<dyn ScorePolicy>,
    reporter: Arc<R>,
    tracker: Arc<Tracker>,
    timeout: Duration,
}

impl<S, L, R> ProbeWorker<S, L, R>
where
    S: ProxyStore,
    L: LivenessCheck,
    R: ProbeReporter,
{
    async fn run(self, rx: async_channel::Receiver<ProxyRecord>) {
        self.reporter
            .report(ProbeEvent::WorkerStarted { worker: &self.name });

        let mut probed = 0u64;
        // recv() keeps yielding queued records after close until the queue is empty.
        while let Ok(record) = rx.recv().await {
            self.probe(&record).await;
            self.tracker.finish_one();
            probed += 1;
        }

        self.reporter.report(ProbeEvent::WorkerStopped {
            worker: &self.name,
            probed,
        });
    }

    async fn probe(&self, record: &ProxyRecord) {
        let started = Instant::now();
        let check = self
            .checker
            .check(record.proxy_type, &record.host, record.port);
        let (passed, timed_out) = match tokio::time::timeout(self.timeout, check).await {
            Ok(passed) => (passed, false),
            Err(_) => (false, true),
        };
        let elapsed = started.elapsed();

        let status = ProxyStatus::from_check(passed);
        let update = StatusUpdate {
            host: record.host.clone(),
            port: record.port,
            status,
            last_check: record.next_check_time(Utc::now()),
        };

        self.tracker.probed.fetch_add(1, Ordering::Relaxed);
        let counter = if passed {
            &self.tracker.ok
        } else {
            &self.tracker.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);

        match self.store.update_status(&update, self.policy.as_ref()).await {
            Ok(true) => self.reporter.report(ProbeEvent::Probed {
                worker: &self.name,
                record,
                status,
                timed_out,
                elapsed,
            }),
            Ok(false) => self.reporter.report(ProbeEvent::RecordVanished {
                worker: &self.name,
                record,
            }),
            Err(error) => {
                self.tracker.write_failures.fetch_add(1, Ordering::Relaxed);
                self.reporter.report(ProbeEvent::WriteFailed {
                    worker: &self.name,
                    record,
                    error: &error,
                });
            }
        }
    }
}
