//! HTTP liveness check: fetch a probe URL through the proxy under test.

use std::time::Duration;

use reqwest::{Client, Proxy};
use roprox_core::models::ProxyType;
use roprox_core::traits::LivenessCheck;

/// Default URL fetched through each proxy.
const DEFAULT_TEST_URL: &str = "http://httpbin.org/ip";

#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Upper bound for one whole check, connect included.
    pub timeout: Duration,
    pub test_url: String,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            test_url: DEFAULT_TEST_URL.to_string(),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_test_url(mut self, url: impl Into<String>) -> Self {
        self.test_url = url.into();
        self
    }
}

/// Passes when the proxy relays a GET to the test URL with a 2xx answer.
#[derive(Debug, Clone, Default)]
pub struct HttpLivenessChecker {
    config: CheckerConfig,
}

impl HttpLivenessChecker {
    pub fn new(config: CheckerConfig) -> Self {
        Self { config }
    }

    fn client_for(&self, proxy_url: &str) -> Result<Client, reqwest::Error> {
        Client::builder()
            .proxy(Proxy::all(proxy_url)?)
            .timeout(self.config.timeout)
            .connect_timeout(self.config.timeout)
            .build()
    }
}

impl LivenessCheck for HttpLivenessChecker {
    async fn check(&self, proxy_type: ProxyType, host: &str, port: u16) -> bool {
        let proxy_url = proxy_type.url(host, port);
        let client = match self.client_for(&proxy_url) {
            Ok(client) => client,
            Err(e) => {
                tracing::debug!(proxy = %proxy_url, error = %e, "Unusable proxy address");
                return false;
            }
        };

        match client.get(&self.config.test_url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::debug!(proxy = %proxy_url, status = %response.status(), "Proxy check rejected");
                false
            }
            Err(e) => {
                tracing::debug!(proxy = %proxy_url, error = %e, "Proxy check failed");
                false
            }
        }
    }
}
