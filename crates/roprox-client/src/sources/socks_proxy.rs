use roprox_core::models::{CandidateProxy, ProxyType};
use roprox_core::source::{Capability, SourceSpec, StaticHtmlCapability};
use scraper::ElementRef;

use super::cell_text;

/// SOCKS servers listed on socks-proxy.net.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocksProxy;

impl SourceSpec for SocksProxy {
    fn uid(&self) -> &str {
        "SocksProxy"
    }

    fn urls(&self) -> Vec<String> {
        vec!["https://www.socks-proxy.net/".to_string()]
    }

    fn use_master_proxy(&self) -> bool {
        true
    }

    fn refresh_interval(&self) -> u32 {
        10
    }

    fn capability(&self) -> Capability<'_> {
        Capability::StaticHtml(self)
    }
}

impl StaticHtmlCapability for SocksProxy {
    fn list_selectors(&self) -> Vec<&str> {
        vec!["#proxylisttable tbody tr"]
    }

    /// Columns: IP, port, code, country, version, anonymity.
    fn scan_item(
        &self,
        _item_idx: usize,
        _url_idx: usize,
        row: ElementRef<'_>,
    ) -> Option<CandidateProxy> {
        let proxy_type = match cell_text(row, "td:nth-child(5)")?.to_lowercase().as_str() {
            "socks5" => ProxyType::Socks5,
            "socks4" => ProxyType::Socks4,
            _ => return None,
        };
        let anonymity = cell_text(row, "td:nth-child(6)").unwrap_or_default();
        if anonymity.eq_ignore_ascii_case("transparent") {
            return None;
        }

        let host = cell_text(row, "td:nth-child(1)")?;
        let port = cell_text(row, "td:nth-child(2)")?.parse().ok()?;
        let mut candidate = CandidateProxy::new(self.uid(), host, port, proxy_type);
        if let Some(country) = cell_text(row, "td:nth-child(4)").filter(|c| !c.is_empty()) {
            candidate = candidate.with_location(country);
        }
        Some(candidate)
    }
}
