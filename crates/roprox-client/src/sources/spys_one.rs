use std::time::Duration;

use futures::future::BoxFuture;
use roprox_core::error::AppError;
use roprox_core::models::{CandidateProxy, ProxyType};
use roprox_core::source::{Capability, DynamicPageCapability, SourceSpec};
use roprox_core::traits::PageDriver;
use tokio_util::sync::CancellationToken;

const TABLE: &str = "body > table:nth-child(3) > tbody > tr:nth-child(5) > td > table > tbody";
const MAX_SCROLLS: usize = 50;

/// spys.one: a JavaScript-rendered table behind a page-size selector.
///
/// The page is switched to its largest page size, scrolled to the end so
/// every row renders, then each column is read in one script call.
#[derive(Debug, Clone)]
pub struct SpysOne {
    urls: Vec<String>,
    scroll_pause: Duration,
}

impl Default for SpysOne {
    fn default() -> Self {
        Self {
            urls: vec![
                "http://spys.one/en/anonymous-proxy-list/".to_string(),
                "http://spys.one/en/socks-proxy-list/".to_string(),
            ],
            scroll_pause: Duration::from_millis(500),
        }
    }
}

impl SpysOne {
    pub fn with_urls(urls: Vec<String>) -> Self {
        Self {
            urls,
            ..Self::default()
        }
    }

    async fn expand_page_size(&self, page: &dyn PageDriver) -> Result<usize, AppError> {
        page.wait_for("#xpp").await?;
        let max = page
            .evaluate(
                r#"(() => {
                    const s = document.querySelector('#xpp');
                    const last = s.options[s.options.length - 1];
                    s.value = last.value;
                    s.dispatchEvent(new Event('change'));
                    return last.textContent.trim();
                })()"#,
            )
            .await?;
        let max = max.as_str().unwrap_or_default();
        tracing::debug!(source = "SpysOne", max_rows = %max, "Page size expanded");
        max.parse()
            .map_err(|_| AppError::ParseError(format!("unexpected page size option: {max:?}")))
    }

    async fn scroll_to_end(
        &self,
        page: &dyn PageDriver,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let at_bottom = "(window.innerHeight + window.scrollY) >= document.body.scrollHeight";
        for n in 1..=MAX_SCROLLS {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            page.press_key("End").await?;
            if page.evaluate(at_bottom).await?.as_bool().unwrap_or(false) {
                tracing::debug!(source = "SpysOne", scrolls = n, "Reached page end");
                return Ok(());
            }
            tokio::time::sleep(self.scroll_pause).await;
        }
        Err(AppError::BrowserError(format!(
            "page end not reached after {MAX_SCROLLS} scrolls"
        )))
    }

    async fn column(&self, page: &dyn PageDriver, cells: &str) -> Result<Vec<String>, AppError> {
        let script = format!(
            "Array.from(document.querySelectorAll('{TABLE} > {cells}')).map(e => e.textContent)"
        );
        Ok(serde_json::from_value(page.evaluate(&script).await?)?)
    }

    async fn scrape(
        &self,
        page: &dyn PageDriver,
        cancel: &CancellationToken,
        url: &str,
    ) -> Result<Vec<CandidateProxy>, AppError> {
        let max = self.expand_page_size(page).await?;
        page.wait_for(&format!("{TABLE} > tr:nth-child(30)")).await?;
        self.scroll_to_end(page, cancel).await?;
        page.wait_for(&format!("{TABLE} > tr:nth-child({max})")).await?;

        let type_cells = if url.contains("socks-proxy-list") {
            "tr:not(:nth-child(2)) > td:nth-child(2)"
        } else {
            "tr > td:nth-child(2) > a"
        };
        let ip_port = self.column(page, "tr > td:nth-child(1) > font.spy14").await?;
        let types = self.column(page, type_cells).await?;
        let anonymity = self.column(page, "tr > td:nth-child(3) > a > font").await?;
        let locations = self.column(page, "tr > td:nth-child(4)").await?;

        Ok(parse_rows(&ip_port, &types, &anonymity, &locations))
    }
}

/// Zip the scraped columns into candidates, stopping at the shortest column.
fn parse_rows(
    ip_port: &[String],
    types: &[String],
    anonymity: &[String],
    locations: &[String],
) -> Vec<CandidateProxy> {
    let mut found = Vec::new();
    for (((addr, kind), anon), location) in ip_port
        .iter()
        .zip(types)
        .zip(anonymity)
        .zip(locations)
    {
        // NOA = not anonymous.
        if anon.trim().eq_ignore_ascii_case("NOA") {
            continue;
        }
        let kind = kind.trim().to_lowercase();
        let proxy_type = if kind.contains("http") {
            ProxyType::Http
        } else if kind.contains("socks5") {
            ProxyType::Socks5
        } else {
            tracing::debug!(source = "SpysOne", %kind, "Unsupported proxy type");
            continue;
        };
        let Some(candidate) = CandidateProxy::from_host_port("SpysOne", addr, proxy_type) else {
            tracing::warn!(source = "SpysOne", %addr, "Invalid ip:port, skipping");
            continue;
        };
        let location = location.replace('!', "");
        found.push(candidate.with_location(location.trim()));
    }
    found
}

impl SourceSpec for SpysOne {
    fn uid(&self) -> &str {
        "SpysOne"
    }

    fn urls(&self) -> Vec<String> {
        self.urls.clone()
    }

    fn use_master_proxy(&self) -> bool {
        true
    }

    fn refresh_interval(&self) -> u32 {
        30
    }

    fn capability(&self) -> Capability<'_> {
        Capability::DynamicPage(self)
    }
}

impl DynamicPageCapability for SpysOne {
    fn fetch<'a>(
        &'a self,
        page: &'a dyn PageDriver,
        cancel: &'a CancellationToken,
        _url_idx: usize,
        url: &'a str,
    ) -> BoxFuture<'a, Result<Vec<CandidateProxy>, AppError>> {
        Box::pin(self.scrape(page, cancel, url))
    }
}
