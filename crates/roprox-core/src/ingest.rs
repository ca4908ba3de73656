//! Per-source ingestion: fetch, normalise and upsert candidate proxies.
//!
//! Every registered source gets its own task. A task runs one cycle right
//! away and then one every `refresh_interval` minutes until cancelled. A
//! failing URL or source only costs that cycle's candidates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::{CandidateProxy, ProxyKey};
use crate::source::{Capability, SourceSpec, scan_document};
use crate::traits::{FetchOptions, PageLoader, PageOpener, ProxyStore};

/// Outcome of one ingestion cycle for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub source: String,
    pub urls_failed: usize,
    /// Candidates yielded by the source before normalisation.
    pub found: usize,
    /// Distinct valid candidates written to the store.
    pub stored: usize,
    pub store_failures: usize,
}

pub struct IngestService<S, L, B> {
    store: S,
    loader: L,
    browser: B,
    page_timeout: Duration,
}

impl<S, L, B> IngestService<S, L, B>
where
    S: ProxyStore,
    L: PageLoader,
    B: PageOpener,
{
    pub fn new(store: S, loader: L, browser: B, page_timeout: Duration) -> Self {
        Self {
            store,
            loader,
            browser,
            page_timeout,
        }
    }

    /// Spawn one refresh task per source. Tasks stop when `cancel` fires.
    pub fn spawn_all(
        self: Arc<Self>,
        sources: Vec<Arc<dyn SourceSpec>>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        sources
            .into_iter()
            .map(|source| {
                let service = Arc::clone(&self);
                let cancel = cancel.clone();
                tokio::spawn(async move { service.run_source(source, cancel).await })
            })
            .collect()
    }

    /// Refresh one source on its own cadence until cancelled.
    pub async fn run_source(&self, source: Arc<dyn SourceSpec>, cancel: CancellationToken) {
        let every = Duration::from_secs(u64::from(source.refresh_interval().max(1)) * 60);
        tracing::info!(
            source = %source.uid(),
            kind = %source.capability().kind(),
            refresh_minutes = every.as_secs() / 60,
            "Source registered"
        );

        loop {
            let report = self.ingest_once(source.as_ref(), &cancel).await;
            tracing::info!(
                source = %report.source,
                found = report.found,
                stored = report.stored,
                urls_failed = report.urls_failed,
                store_failures = report.store_failures,
                "Ingestion cycle finished"
            );

            tokio::select! {
                () = tokio::time::sleep(every) => {}
                () = cancel.cancelled() => break,
            }
        }

        tracing::debug!(source = %source.uid(), "Source stopped");
    }

    /// One ingestion cycle: visit every URL, then upsert what was found.
    pub async fn ingest_once(
        &self,
        source: &dyn SourceSpec,
        cancel: &CancellationToken,
    ) -> IngestReport {
        let mut report = IngestReport {
            source: source.uid().to_string(),
            ..Default::default()
        };
        let mut candidates = Vec::new();

        for (url_idx, url) in source.urls().iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            match self.collect(source, url_idx, url, cancel).await {
                Ok(found) => {
                    tracing::debug!(source = %source.uid(), %url, count = found.len(), "Page scanned");
                    candidates.extend(found);
                }
                Err(e) => {
                    report.urls_failed += 1;
                    tracing::warn!(source = %source.uid(), %url, error = %e, "Failed to fetch proxy list");
                }
            }
        }

        report.found = candidates.len();
        let seen_at = Utc::now();
        for candidate in dedupe(source.uid(), candidates) {
            match self.store.upsert(&candidate, seen_at).await {
                Ok(()) => report.stored += 1,
                Err(e) => {
                    report.store_failures += 1;
                    tracing::error!(
                        source = %source.uid(),
                        host = %candidate.host,
                        port = candidate.port,
                        error = %e,
                        "Failed to store proxy server"
                    );
                }
            }
        }

        report
    }

    async fn collect(
        &self,
        source: &dyn SourceSpec,
        url_idx: usize,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidateProxy>, AppError> {
        match source.capability() {
            Capability::StaticHtml(cap) => {
                let options = FetchOptions {
                    use_master_proxy: source.use_master_proxy(),
                    legacy_encoding: cap.is_legacy_encoding(),
                };
                let html = self.loader.fetch_text(url, options).await?;
                Ok(scan_document(cap, &html, url_idx))
            }
            Capability::JsonPayload(cap) => {
                let options = FetchOptions {
                    use_master_proxy: source.use_master_proxy(),
                    legacy_encoding: false,
                };
                let payload = self.loader.fetch_bytes(url, options).await?;
                Ok(cap.parse_json(&payload))
            }
            Capability::DynamicPage(cap) => {
                let page = self
                    .browser
                    .open_page(url, source.use_master_proxy())
                    .await?;
                // A child token lets the timeout abort the session without
                // cancelling the whole service.
                let session = cancel.child_token();
                let result = tokio::select! {
                    res = tokio::time::timeout(
                        self.page_timeout,
                        cap.fetch(page.as_ref(), &session, url_idx, url),
                    ) => res.unwrap_or(Err(AppError::Timeout(self.page_timeout.as_secs()))),
                    () = cancel.cancelled() => Err(AppError::Cancelled),
                };
                session.cancel();
                page.close().await;
                result
            }
        }
    }
}

/// Normalise candidates and keep one per `(host, port)`, the last one winning.
fn dedupe(uid: &str, candidates: Vec<CandidateProxy>) -> Vec<CandidateProxy> {
    let mut by_key: HashMap<ProxyKey, CandidateProxy> = HashMap::new();
    for mut candidate in candidates {
        if candidate.source.trim().is_empty() {
            candidate.source = uid.to_string();
        }
        match candidate.normalize() {
            Some(c) => {
                by_key.insert(c.key(), c);
            }
            None => tracing::debug!(source = %uid, "Dropping invalid candidate"),
        }
    }
    let mut unique: Vec<_> = by_key.into_values().collect();
    unique.sort_by(|a, b| a.key().cmp(&b.key()));
    unique
}
