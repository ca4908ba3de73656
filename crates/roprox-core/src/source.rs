//! Contract implemented by every proxy list provider ("source").
//!
//! A source declares its identity, target URLs, whether it has to be
//! reached through the master proxy and how often it should be refreshed,
//! plus exactly one retrieval [`Capability`]. The ingestion path matches on
//! the capability and never inspects the concrete source type.

use std::fmt;

use futures::future::BoxFuture;
use scraper::ElementRef;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::CandidateProxy;
use crate::traits::PageDriver;

/// Base contract shared by all sources.
pub trait SourceSpec: Send + Sync {
    /// Unique identifier, stored as the `source` of every record it yields.
    fn uid(&self) -> &str;

    /// Pages listing free proxy servers.
    fn urls(&self) -> Vec<String>;

    /// Whether the provider is only reachable through the master proxy.
    fn use_master_proxy(&self) -> bool;

    /// Refresh cadence, in minutes.
    fn refresh_interval(&self) -> u32;

    fn capability(&self) -> Capability<'_>;
}

/// The one way a source retrieves its content.
pub enum Capability<'a> {
    StaticHtml(&'a dyn StaticHtmlCapability),
    JsonPayload(&'a dyn JsonPayloadCapability),
    DynamicPage(&'a dyn DynamicPageCapability),
}

impl Capability<'_> {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Capability::StaticHtml(_) => CapabilityKind::StaticHtml,
            Capability::JsonPayload(_) => CapabilityKind::JsonPayload,
            Capability::DynamicPage(_) => CapabilityKind::DynamicPage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    StaticHtml,
    JsonPayload,
    DynamicPage,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::StaticHtml => write!(f, "static-html"),
            CapabilityKind::JsonPayload => write!(f, "json"),
            CapabilityKind::DynamicPage => write!(f, "dynamic-page"),
        }
    }
}

/// Server-rendered HTML tables.
pub trait StaticHtmlCapability: Send + Sync {
    /// Whether the page uses the GBK legacy encoding.
    fn is_legacy_encoding(&self) -> bool {
        false
    }

    /// CSS selectors matching one element per proxy row.
    fn list_selectors(&self) -> Vec<&str>;

    /// Map one matched row to a candidate. `None` filters the row out.
    fn scan_item(
        &self,
        item_idx: usize,
        url_idx: usize,
        row: ElementRef<'_>,
    ) -> Option<CandidateProxy>;
}

/// JSON APIs.
pub trait JsonPayloadCapability: Send + Sync {
    fn parse_json(&self, payload: &[u8]) -> Vec<CandidateProxy>;
}

/// Pages that need a real browser (paging, lazy-rendered tables).
pub trait DynamicPageCapability: Send + Sync {
    /// Drive an already-opened page. Implementations should check `cancel`
    /// between interactive steps.
    fn fetch<'a>(
        &'a self,
        page: &'a dyn PageDriver,
        cancel: &'a CancellationToken,
        url_idx: usize,
        url: &'a str,
    ) -> BoxFuture<'a, Result<Vec<CandidateProxy>, AppError>>;
}

/// Run every list selector of `capability` against an HTML document.
///
/// Invalid selectors are logged and skipped.
pub fn scan_document(
    capability: &dyn StaticHtmlCapability,
    html: &str,
    url_idx: usize,
) -> Vec<CandidateProxy> {
    let document = scraper::Html::parse_document(html);
    let mut found = Vec::new();

    for raw in capability.list_selectors() {
        let selector = match scraper::Selector::parse(raw) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(selector = %raw, error = %e, "Invalid list selector");
                continue;
            }
        };
        found.extend(
            document
                .select(&selector)
                .enumerate()
                .filter_map(|(idx, row)| capability.scan_item(idx, url_idx, row)),
        );
    }

    found
}
