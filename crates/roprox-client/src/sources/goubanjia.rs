use roprox_core::models::{CandidateProxy, ProxyType};
use roprox_core::source::{Capability, SourceSpec, StaticHtmlCapability};
use scraper::{ElementRef, Selector};

use super::cell_text;

/// HTTP proxies listed on goubanjia.com.
///
/// The IP cell is split over several inline elements, some of them hidden
/// decoys; the last visible fragment is the port.
#[derive(Debug, Clone, Copy, Default)]
pub struct GouBanJia;

impl SourceSpec for GouBanJia {
    fn uid(&self) -> &str {
        "GouBanJia"
    }

    fn urls(&self) -> Vec<String> {
        vec!["http://www.goubanjia.com/".to_string()]
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

fn is_hidden(fragment: ElementRef<'_>) -> bool {
    fragment.value().attr("style").is_some_and(|style| {
        let style: String = style.chars().filter(|c| !c.is_whitespace()).collect();
        style.to_lowercase().contains("display:none")
    })
}

impl StaticHtmlCapability for GouBanJia {
    fn list_selectors(&self) -> Vec<&str> {
        vec!["#services div div.row div div div table tbody tr"]
    }

    fn scan_item(
        &self,
        _item_idx: usize,
        _url_idx: usize,
        row: ElementRef<'_>,
    ) -> Option<CandidateProxy> {
        // "透明" = transparent.
        let anonymity = cell_text(row, "td:nth-child(2) a").unwrap_or_default();
        if anonymity.contains("透明") {
            return None;
        }

        let ip_cell = Selector::parse("td.ip").ok()?;
        let cell = row.select(&ip_cell).next()?;
        let mut fragments: Vec<String> = cell
            .child_elements()
            .filter(|f| !is_hidden(*f))
            .map(|f| f.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        let port = fragments.pop()?.trim_start_matches(':').parse().ok()?;
        let host = fragments.concat();
        Some(CandidateProxy::new(self.uid(), host, port, ProxyType::Http))
    }
}
