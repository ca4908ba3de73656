//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` or atomics for interior mutability,
//! allowing test assertions on recorded calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use scraper::{ElementRef, Selector};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::{
    CandidateProxy, EvictionFilter, ProxyKey, ProxyRecord, ProxyStatus, ProxyType, StatusUpdate,
};
use crate::probe::{ProbeEvent, ProbeReporter};
use crate::score::ScorePolicy;
use crate::source::{
    Capability, DynamicPageCapability, JsonPayloadCapability, SourceSpec, StaticHtmlCapability,
};
use crate::traits::{FetchOptions, LivenessCheck, PageDriver, PageLoader, PageOpener, ProxyStore};

/// A never-probed HTTP record seen just now.
pub fn make_test_record(host: &str, port: u16) -> ProxyRecord {
    let candidate = CandidateProxy::new("test", host, port, ProxyType::Http);
    ProxyRecord::from_candidate(&candidate, Utc::now())
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreFaults {
    select: Option<AppError>,
    upsert: Option<AppError>,
    update: Option<AppError>,
    delete: Option<AppError>,
}

/// In-memory proxy store with one-shot fault injection.
#[derive(Clone, Default)]
pub struct MockStore {
    records: Arc<Mutex<HashMap<ProxyKey, ProxyRecord>>>,
    faults: Arc<Mutex<StoreFaults>>,
    select_calls: Arc<AtomicUsize>,
    delete_calls: Arc<AtomicUsize>,
}

impl MockStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ProxyRecord) {
        self.records.lock().unwrap().insert(record.key(), record);
    }

    pub fn snapshot(&self, host: &str, port: u16) -> Option<ProxyRecord> {
        self.records
            .lock()
            .unwrap()
            .get(&ProxyKey::new(host, port))
            .cloned()
    }

    pub fn all(&self) -> Vec<ProxyRecord> {
        let mut all: Vec<_> = self.records.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|r| r.key());
        all
    }

    pub fn fail_next_select(&self, error: AppError) {
        self.faults.lock().unwrap().select = Some(error);
    }

    pub fn fail_next_upsert(&self, error: AppError) {
        self.faults.lock().unwrap().upsert = Some(error);
    }

    pub fn fail_next_update(&self, error: AppError) {
        self.faults.lock().unwrap().update = Some(error);
    }

    pub fn fail_next_delete(&self, error: AppError) {
        self.faults.lock().unwrap().delete = Some(error);
    }

    pub fn select_calls(&self) -> usize {
        self.select_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

impl ProxyStore for MockStore {
    async fn select_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<ProxyRecord>, AppError> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.faults.lock().unwrap().select.take() {
            return Err(e);
        }
        let mut stale: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.is_stale(older_than))
            .cloned()
            .collect();
        // None sorts before Some, matching NULLS FIRST.
        stale.sort_by_key(|r| r.last_check);
        Ok(stale)
    }

    async fn upsert(&self, candidate: &CandidateProxy, seen_at: DateTime<Utc>) -> Result<(), AppError> {
        if let Some(e) = self.faults.lock().unwrap().upsert.take() {
            return Err(e);
        }
        let mut records = self.records.lock().unwrap();
        records
            .entry(candidate.key())
            .and_modify(|r| {
                r.source = candidate.source.clone();
                r.proxy_type = candidate.proxy_type;
                if candidate.location.is_some() {
                    r.location = candidate.location.clone();
                }
                r.last_scanned = seen_at;
            })
            .or_insert_with(|| ProxyRecord::from_candidate(candidate, seen_at));
        Ok(())
    }

    async fn update_status(
        &self,
        update: &StatusUpdate,
        policy: &dyn ScorePolicy,
    ) -> Result<bool, AppError> {
        if let Some(e) = self.faults.lock().unwrap().update.take() {
            return Err(e);
        }
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(&ProxyKey::new(update.host.clone(), update.port)) else {
            return Ok(false);
        };
        record.status = update.status;
        record.last_check = Some(match record.last_check {
            Some(prev) if prev >= update.last_check => prev + TimeDelta::microseconds(1),
            _ => update.last_check,
        });
        match update.status {
            ProxyStatus::Ok => record.success_count += 1,
            _ => record.fail_count += 1,
        }
        record.score = policy.score(record.success_count, record.fail_count);
        Ok(true)
    }

    async fn delete_where(&self, filter: &EvictionFilter) -> Result<u64, AppError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.faults.lock().unwrap().delete.take() {
            return Err(e);
        }
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, r| !r.is_evictable(filter));
        Ok((before - records.len()) as u64)
    }

    async fn get(&self, host: &str, port: u16) -> Result<Option<ProxyRecord>, AppError> {
        Ok(self.snapshot(host, port))
    }

    async fn list(
        &self,
        status: Option<ProxyStatus>,
        limit: usize,
    ) -> Result<Vec<ProxyRecord>, AppError> {
        let mut listed: Vec<_> = self
            .all()
            .into_iter()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .collect();
        listed.sort_by(|a, b| b.score.total_cmp(&a.score));
        listed.truncate(limit);
        Ok(listed)
    }

    async fn count_by_status(&self, status: ProxyStatus) -> Result<i64, AppError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == status)
            .count() as i64)
    }
}

// ---------------------------------------------------------------------------
// MockChecker
// ---------------------------------------------------------------------------

/// Liveness check with a fixed verdict, optional per-host failures and delay.
#[derive(Clone)]
pub struct MockChecker {
    passes: bool,
    failing_hosts: Vec<String>,
    /// Verdicts handed out in order before falling back to `passes`.
    script: Arc<Mutex<VecDeque<bool>>>,
    delay: Option<Duration>,
    checked: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockChecker {
    fn with_verdict(passes: bool) -> Self {
        Self {
            passes,
            failing_hosts: Vec::new(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            delay: None,
            checked: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn passing() -> Self {
        Self::with_verdict(true)
    }

    pub fn failing() -> Self {
        Self::with_verdict(false)
    }

    /// Answer the next checks with `verdicts`, in order.
    pub fn scripted(verdicts: impl IntoIterator<Item = bool>) -> Self {
        let checker = Self::with_verdict(true);
        checker.script.lock().unwrap().extend(verdicts);
        checker
    }

    pub fn with_failing_host(mut self, host: &str) -> Self {
        self.failing_hosts.push(host.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.checked.lock().unwrap().len()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Hosts in the order they were checked.
    pub fn checked_hosts(&self) -> Vec<String> {
        self.checked.lock().unwrap().clone()
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl LivenessCheck for MockChecker {
    async fn check(&self, _proxy_type: ProxyType, host: &str, _port: u16) -> bool {
        self.checked.lock().unwrap().push(host.to_string());
        let scripted = self.script.lock().unwrap().pop_front();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(Arc::clone(&self.in_flight));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        scripted.unwrap_or(self.passes && !self.failing_hosts.iter().any(|h| h == host))
    }
}

// ---------------------------------------------------------------------------
// MockProbeReporter
// ---------------------------------------------------------------------------

/// Records the variant name of every probe event.
#[derive(Default)]
pub struct MockProbeReporter {
    labels: Mutex<Vec<String>>,
}

impl MockProbeReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.labels.lock().unwrap().clone()
    }
}

impl ProbeReporter for MockProbeReporter {
    fn report(&self, event: ProbeEvent<'_>) {
        let label = match event {
            ProbeEvent::WorkerStarted { .. } => "WorkerStarted",
            ProbeEvent::Probed { .. } => "Probed",
            ProbeEvent::WriteFailed { .. } => "WriteFailed",
            ProbeEvent::RecordVanished { .. } => "RecordVanished",
            ProbeEvent::WorkerStopped { .. } => "WorkerStopped",
        };
        self.labels.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// MockLoader
// ---------------------------------------------------------------------------

/// Page loader serving canned bodies by URL; unknown URLs return HTTP 404.
#[derive(Clone, Default)]
pub struct MockLoader {
    pages: Arc<Mutex<HashMap<String, String>>>,
    requests: Arc<Mutex<Vec<(String, FetchOptions)>>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
        self
    }

    pub fn requests(&self) -> Vec<(String, FetchOptions)> {
        self.requests.lock().unwrap().clone()
    }

    fn serve(&self, url: &str, options: FetchOptions) -> Result<String, AppError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), options));
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::HttpError(format!("HTTP 404 Not Found for {url}")))
    }
}

impl PageLoader for MockLoader {
    async fn fetch_text(&self, url: &str, options: FetchOptions) -> Result<String, AppError> {
        self.serve(url, options)
    }

    async fn fetch_bytes(&self, url: &str, options: FetchOptions) -> Result<Vec<u8>, AppError> {
        self.serve(url, options).map(String::into_bytes)
    }
}

// ---------------------------------------------------------------------------
// MockBrowser
// ---------------------------------------------------------------------------

/// Page opener handing out inert pages and counting open/close.
#[derive(Clone, Default)]
pub struct MockBrowser {
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PageOpener for MockBrowser {
    async fn open_page(
        &self,
        _url: &str,
        _use_master_proxy: bool,
    ) -> Result<Box<dyn PageDriver>, AppError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockPage {
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct MockPage {
    closed: Arc<AtomicUsize>,
}

impl PageDriver for MockPage {
    fn wait_for<'a>(&'a self, _selector: &'a str) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async { Ok(()) })
    }

    fn evaluate<'a>(
        &'a self,
        _expression: &'a str,
    ) -> BoxFuture<'a, Result<serde_json::Value, AppError>> {
        Box::pin(async { Ok(serde_json::Value::Null) })
    }

    fn press_key<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async { Ok(()) })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {
            self.closed.fetch_add(1, Ordering::SeqCst);
        })
    }
}

// ---------------------------------------------------------------------------
// Test sources
// ---------------------------------------------------------------------------

struct SourceMeta {
    uid: String,
    urls: Vec<String>,
    use_master_proxy: bool,
    refresh_interval: u32,
}

impl SourceMeta {
    fn new(uid: &str, url: &str) -> Self {
        Self {
            uid: uid.to_string(),
            urls: vec![url.to_string()],
            use_master_proxy: false,
            refresh_interval: 30,
        }
    }
}

/// HTML table source: `<td>host</td><td>port</td><td>anonymity</td>`,
/// transparent proxies filtered out.
pub struct TestHtmlSource {
    meta: SourceMeta,
    selectors: Vec<String>,
}

impl TestHtmlSource {
    pub fn new(uid: &str, selectors: Vec<&str>) -> Self {
        Self {
            meta: SourceMeta::new(uid, "http://html.test/list"),
            selectors: selectors.into_iter().map(String::from).collect(),
        }
    }

    pub fn with_urls(mut self, urls: Vec<&str>) -> Self {
        self.meta.urls = urls.into_iter().map(String::from).collect();
        self
    }

    pub fn with_master_proxy(mut self, enabled: bool) -> Self {
        self.meta.use_master_proxy = enabled;
        self
    }

    pub fn with_refresh_interval(mut self, minutes: u32) -> Self {
        self.meta.refresh_interval = minutes;
        self
    }
}

impl SourceSpec for TestHtmlSource {
    fn uid(&self) -> &str {
        &self.meta.uid
    }

    fn urls(&self) -> Vec<String> {
        self.meta.urls.clone()
    }

    fn use_master_proxy(&self) -> bool {
        self.meta.use_master_proxy
    }

    fn refresh_interval(&self) -> u32 {
        self.meta.refresh_interval
    }

    fn capability(&self) -> Capability<'_> {
        Capability::StaticHtml(self)
    }
}

impl StaticHtmlCapability for TestHtmlSource {
    fn list_selectors(&self) -> Vec<&str> {
        self.selectors.iter().map(String::as_str).collect()
    }

    fn scan_item(
        &self,
        _item_idx: usize,
        _url_idx: usize,
        row: ElementRef<'_>,
    ) -> Option<CandidateProxy> {
        let td = Selector::parse("td").ok()?;
        let cells: Vec<String> = row
            .select(&td)
            .map(|c| c.text().collect::<String>().trim().to_string())
            .collect();
        if cells.len() < 3 || cells[2] == "transparent" {
            return None;
        }
        let port = cells[1].parse().ok()?;
        Some(CandidateProxy::new(&self.meta.uid, &cells[0], port, ProxyType::Http))
    }
}

/// JSON source: `[{"host": "...", "port": 80, "type": "socks5"}]`.
pub struct TestJsonSource {
    meta: SourceMeta,
}

#[derive(Deserialize)]
struct JsonEntry {
    host: String,
    port: u16,
    #[serde(rename = "type", default)]
    proxy_type: Option<String>,
}

impl TestJsonSource {
    pub fn new(uid: &str) -> Self {
        Self {
            meta: SourceMeta::new(uid, "http://json.test/list"),
        }
    }

    pub fn with_urls(mut self, urls: Vec<&str>) -> Self {
        self.meta.urls = urls.into_iter().map(String::from).collect();
        self
    }
}

impl SourceSpec for TestJsonSource {
    fn uid(&self) -> &str {
        &self.meta.uid
    }

    fn urls(&self) -> Vec<String> {
        self.meta.urls.clone()
    }

    fn use_master_proxy(&self) -> bool {
        self.meta.use_master_proxy
    }

    fn refresh_interval(&self) -> u32 {
        self.meta.refresh_interval
    }

    fn capability(&self) -> Capability<'_> {
        Capability::JsonPayload(self)
    }
}

impl JsonPayloadCapability for TestJsonSource {
    fn parse_json(&self, payload: &[u8]) -> Vec<CandidateProxy> {
        let entries: Vec<JsonEntry> = serde_json::from_slice(payload).unwrap_or_default();
        entries
            .into_iter()
            .map(|e| {
                let proxy_type = e
                    .proxy_type
                    .and_then(|t| t.parse().ok())
                    .unwrap_or_default();
                CandidateProxy::new(&self.meta.uid, e.host, e.port, proxy_type)
            })
            .collect()
    }
}

/// Browser-driven source returning canned candidates, or hanging forever.
pub struct TestDynamicSource {
    meta: SourceMeta,
    candidates: Vec<CandidateProxy>,
    hang: bool,
}

impl TestDynamicSource {
    pub fn new(uid: &str, candidates: Vec<CandidateProxy>) -> Self {
        Self {
            meta: SourceMeta::new(uid, "http://dynamic.test/list"),
            candidates,
            hang: false,
        }
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

impl SourceSpec for TestDynamicSource {
    fn uid(&self) -> &str {
        &self.meta.uid
    }

    fn urls(&self) -> Vec<String> {
        self.meta.urls.clone()
    }

    fn use_master_proxy(&self) -> bool {
        self.meta.use_master_proxy
    }

    fn refresh_interval(&self) -> u32 {
        self.meta.refresh_interval
    }

    fn capability(&self) -> Capability<'_> {
        Capability::DynamicPage(self)
    }
}

impl DynamicPageCapability for TestDynamicSource {
    fn fetch<'a>(
        &'a self,
        page: &'a dyn PageDriver,
        _cancel: &'a CancellationToken,
        _url_idx: usize,
        _url: &'a str,
    ) -> BoxFuture<'a, Result<Vec<CandidateProxy>, AppError>> {
        Box::pin(async move {
            page.wait_for("table").await?;
            if self.hang {
                futures::future::pending::<()>().await;
            }
            Ok(self.candidates.clone())
        })
    }
}
