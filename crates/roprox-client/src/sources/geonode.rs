use roprox_core::models::{CandidateProxy, ProxyType};
use roprox_core::source::{Capability, JsonPayloadCapability, SourceSpec};
use serde::Deserialize;

const API_URL: &str = "https://proxylist.geonode.com/api/proxy-list?limit=500&page=1&sort_by=lastChecked&sort_type=desc";

/// The proxylist.geonode.com JSON API.
#[derive(Debug, Clone)]
pub struct GeoNode {
    urls: Vec<String>,
}

impl Default for GeoNode {
    fn default() -> Self {
        Self {
            urls: vec![API_URL.to_string()],
        }
    }
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    data: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Entry {
    ip: String,
    port: PortField,
    #[serde(default)]
    protocols: Vec<String>,
    #[serde(default)]
    anonymity_level: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

/// The API has served ports both as strings and as numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortField {
    Number(u16),
    Text(String),
}

impl PortField {
    fn value(&self) -> Option<u16> {
        match self {
            PortField::Number(n) => Some(*n),
            PortField::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl SourceSpec for GeoNode {
    fn uid(&self) -> &str {
        "GeoNode"
    }

    fn urls(&self) -> Vec<String> {
        self.urls.clone()
    }

    fn use_master_proxy(&self) -> bool {
        false
    }

    fn refresh_interval(&self) -> u32 {
        30
    }

    fn capability(&self) -> Capability<'_> {
        Capability::JsonPayload(self)
    }
}

impl JsonPayloadCapability for GeoNode {
    fn parse_json(&self, payload: &[u8]) -> Vec<CandidateProxy> {
        let page: Page = match serde_json::from_slice(payload) {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(source = %self.uid(), error = %e, "Unexpected payload");
                return Vec::new();
            }
        };

        page.data
            .into_iter()
            .filter(|e| {
                !e.anonymity_level
                    .as_deref()
                    .is_some_and(|a| a.eq_ignore_ascii_case("transparent"))
            })
            .filter_map(|e| {
                // Prefer the strongest protocol the proxy advertises.
                let proxy_type = e
                    .protocols
                    .iter()
                    .filter_map(|p| p.parse::<ProxyType>().ok())
                    .max_by_key(|t| match t {
                        ProxyType::Socks5 => 3,
                        ProxyType::Socks4 => 2,
                        ProxyType::Https => 1,
                        ProxyType::Http => 0,
                    })?;
                let mut candidate =
                    CandidateProxy::new(self.uid(), e.ip, e.port.value()?, proxy_type);
                if let Some(country) = e.country.filter(|c| !c.is_empty()) {
                    candidate = candidate.with_location(country);
                }
                Some(candidate)
            })
            .collect()
    }
}
