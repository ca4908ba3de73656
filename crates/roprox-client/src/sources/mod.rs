//! Free proxy list providers.

mod geonode;
mod goubanjia;
mod socks_proxy;
mod spys_one;

use std::sync::Arc;

use roprox_core::source::SourceSpec;
use scraper::{ElementRef, Selector};

pub use geonode::GeoNode;
pub use goubanjia::GouBanJia;
pub use socks_proxy::SocksProxy;
pub use spys_one::SpysOne;

/// Every built-in source with its default URLs.
pub fn default_sources() -> Vec<Arc<dyn SourceSpec>> {
    vec![
        Arc::new(SocksProxy),
        Arc::new(GouBanJia),
        Arc::new(SpysOne::default()),
        Arc::new(GeoNode::default()),
    ]
}

/// Trimmed text of the first element under `row` matching `css`.
pub(crate) fn cell_text(row: ElementRef<'_>, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    row.select(&selector)
        .next()
        .map(|cell| cell.text().collect::<String>().trim().to_string())
}
