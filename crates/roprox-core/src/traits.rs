use std::future::Future;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::error::AppError;
use crate::models::{
    CandidateProxy, EvictionFilter, ProxyRecord, ProxyStatus, ProxyType, StatusUpdate,
};
use crate::score::ScorePolicy;

/// Persistent store of proxy records.
///
/// Every operation touches a single row or a single predicate and must be
/// atomic on its own; no cross-record transaction is assumed. Concurrent
/// ingestion and probe writes to the same key resolve last-write-wins.
pub trait ProxyStore: Send + Sync + Clone + 'static {
    /// Records not probed since `older_than` (never-probed first, then
    /// oldest `last_check` first).
    fn select_stale(
        &self,
        older_than: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<ProxyRecord>, AppError>> + Send;

    /// Insert a new record (status `UNK`) or refresh an existing one.
    ///
    /// Refreshing updates source, type, location and `last_scanned` but
    /// never status, counters, score or `last_check`.
    fn upsert(
        &self,
        candidate: &CandidateProxy,
        seen_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Write back a probe result. Returns `false` if the record no longer exists.
    ///
    /// Counters are bumped and `policy` scores the bumped counters under
    /// the same row lock, so concurrent write-backs for one key can't leave
    /// a score that disagrees with the stored counters.
    fn update_status(
        &self,
        update: &StatusUpdate,
        policy: &dyn ScorePolicy,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Delete all records matching the filter. Returns rows affected.
    fn delete_where(
        &self,
        filter: &EvictionFilter,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn get(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = Result<Option<ProxyRecord>, AppError>> + Send;

    /// List records, best score first.
    fn list(
        &self,
        status: Option<ProxyStatus>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ProxyRecord>, AppError>> + Send;

    fn count_by_status(
        &self,
        status: ProxyStatus,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;
}

/// Black-box liveness check of a single proxy.
pub trait LivenessCheck: Send + Sync + Clone + 'static {
    /// Returns true if the proxy accepted and relayed a request.
    fn check(
        &self,
        proxy_type: ProxyType,
        host: &str,
        port: u16,
    ) -> impl Future<Output = bool> + Send;
}

/// How a source page should be retrieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Route the request through the configured master proxy.
    pub use_master_proxy: bool,
    /// Decode the body as GBK unless the response declares a charset.
    pub legacy_encoding: bool,
}

/// Downloads source pages for the static-HTML and JSON capabilities.
pub trait PageLoader: Send + Sync + Clone + 'static {
    fn fetch_text(
        &self,
        url: &str,
        options: FetchOptions,
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    fn fetch_bytes(
        &self,
        url: &str,
        options: FetchOptions,
    ) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;
}

/// A live browser tab, driven by dynamic-page sources.
pub trait PageDriver: Send + Sync {
    /// Wait until an element matching `selector` is present.
    fn wait_for<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, Result<(), AppError>>;

    /// Evaluate a JavaScript expression and return its JSON value.
    fn evaluate<'a>(
        &'a self,
        expression: &'a str,
    ) -> BoxFuture<'a, Result<serde_json::Value, AppError>>;

    /// Send a key press (e.g. `"End"`) to the page.
    fn press_key<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), AppError>>;

    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Opens browser tabs for dynamic-page sources.
pub trait PageOpener: Send + Sync + Clone + 'static {
    fn open_page(
        &self,
        url: &str,
        use_master_proxy: bool,
    ) -> impl Future<Output = Result<Box<dyn PageDriver>, AppError>> + Send;
}

/// A page opener for deployments without a browser; dynamic sources fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBrowser;

impl PageOpener for NoBrowser {
    async fn open_page(
        &self,
        url: &str,
        _use_master_proxy: bool,
    ) -> Result<Box<dyn PageDriver>, AppError> {
        Err(AppError::BrowserError(format!(
            "no browser available to render {url}"
        )))
    }
}
