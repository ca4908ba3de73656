use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Health of a proxy as of its last completed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProxyStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "UNK")]
    Unknown,
}

impl ProxyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyStatus::Ok => "OK",
            ProxyStatus::Fail => "FAIL",
            ProxyStatus::Unknown => "UNK",
        }
    }

    /// Status resulting from a completed liveness check.
    pub fn from_check(passed: bool) -> Self {
        if passed {
            ProxyStatus::Ok
        } else {
            ProxyStatus::Fail
        }
    }
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProxyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OK" => Ok(ProxyStatus::Ok),
            "FAIL" => Ok(ProxyStatus::Fail),
            "UNK" | "UNKNOWN" => Ok(ProxyStatus::Unknown),
            _ => Err(format!("Unknown proxy status: {}", s)),
        }
    }
}

/// Protocol spoken by a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks5 => "socks5",
        }
    }

    /// Proxy URL in `scheme://host:port` form.
    pub fn url(&self, host: &str, port: u16) -> String {
        format!("{}://{}:{}", self.as_str(), host, port)
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProxyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks4" => Ok(ProxyType::Socks4),
            "socks5" => Ok(ProxyType::Socks5),
            _ => Err(format!("Unknown proxy type: {}", s)),
        }
    }
}

/// Unique identity of a proxy in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxyKey {
    pub host: String,
    pub port: u16,
}

impl ProxyKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ProxyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A proxy server as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub source: String,
    pub host: String,
    pub port: u16,
    pub proxy_type: ProxyType,
    pub location: Option<String>,
    pub status: ProxyStatus,
    pub success_count: u32,
    pub fail_count: u32,
    pub score: f64,
    /// Completion time of the most recent probe; `None` until first probed.
    pub last_check: Option<DateTime<Utc>>,
    /// Last time any source reported this proxy.
    pub last_scanned: DateTime<Utc>,
}

impl ProxyRecord {
    /// A never-probed record created from a candidate seen at `seen_at`.
    pub fn from_candidate(candidate: &CandidateProxy, seen_at: DateTime<Utc>) -> Self {
        Self {
            source: candidate.source.clone(),
            host: candidate.host.clone(),
            port: candidate.port,
            proxy_type: candidate.proxy_type,
            location: candidate.location.clone(),
            status: ProxyStatus::Unknown,
            success_count: 0,
            fail_count: 0,
            score: 0.0,
            last_check: None,
            last_scanned: seen_at,
        }
    }

    pub fn key(&self) -> ProxyKey {
        ProxyKey::new(self.host.clone(), self.port)
    }

    pub fn url(&self) -> String {
        self.proxy_type.url(&self.host, self.port)
    }

    /// True if the record has not been probed since `cutoff`.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_check.is_none_or(|t| t <= cutoff)
    }

    /// True if the record matches an eviction predicate.
    pub fn is_evictable(&self, filter: &EvictionFilter) -> bool {
        self.status == filter.status
            && self.last_scanned <= filter.last_scanned_before
            && filter.score_below.is_none_or(|floor| self.score < floor)
    }

    /// Timestamp to record for a probe completing at `now`.
    ///
    /// Always strictly later than the previous `last_check`, even if the
    /// wall clock went backwards.
    pub fn next_check_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_check {
            Some(prev) if prev >= now => prev + TimeDelta::microseconds(1),
            _ => now,
        }
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.url(), self.status)
    }
}

/// A proxy reported by a source, before it is merged into the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateProxy {
    pub source: String,
    pub host: String,
    pub port: u16,
    pub proxy_type: ProxyType,
    pub location: Option<String>,
}

impl CandidateProxy {
    pub fn new(
        source: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        proxy_type: ProxyType,
    ) -> Self {
        Self {
            source: source.into(),
            host: host.into(),
            port,
            proxy_type,
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Parse a `host:port` pair as shown by most list providers.
    pub fn from_host_port(
        source: impl Into<String>,
        host_port: &str,
        proxy_type: ProxyType,
    ) -> Option<Self> {
        let (host, port) = host_port.trim().rsplit_once(':')?;
        let port = port.trim().parse().ok()?;
        Some(Self::new(source, host.trim(), port, proxy_type))
    }

    pub fn key(&self) -> ProxyKey {
        ProxyKey::new(self.host.clone(), self.port)
    }

    /// Clean up a candidate for storage. Returns `None` if it can't be stored.
    pub fn normalize(mut self) -> Option<Self> {
        self.host = self.host.trim().to_lowercase();
        if self.host.is_empty() || self.port == 0 || self.host.contains(char::is_whitespace) {
            return None;
        }
        self.source = self.source.trim().to_string();
        self.location = self
            .location
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        Some(self)
    }
}

/// Outcome of one probe, written back through the store adapter.
///
/// The store increments `success_count` or `fail_count` according to
/// `status` and rescores the record from the new counters in the same write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub host: String,
    pub port: u16,
    pub status: ProxyStatus,
    pub last_check: DateTime<Utc>,
}

/// Predicate selecting records for permanent deletion.
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionFilter {
    pub status: ProxyStatus,
    pub last_scanned_before: DateTime<Utc>,
    /// Optional extra guard: only evict records scoring below this value.
    pub score_below: Option<f64>,
}

impl EvictionFilter {
    /// Failing records not reported by any source since `cutoff`.
    pub fn failed_since(cutoff: DateTime<Utc>) -> Self {
        Self {
            status: ProxyStatus::Fail,
            last_scanned_before: cutoff,
            score_below: None,
        }
    }

    pub fn with_score_below(mut self, floor: Option<f64>) -> Self {
        self.score_below = floor;
        self
    }
}
