use std::time::Duration;

use reqwest::{Client, Proxy, Response};
use roprox_core::error::AppError;
use roprox_core::traits::{FetchOptions, PageLoader};
use url::Url;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Settings for downloading proxy list pages.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub timeout: Duration,
    pub user_agent: String,
    /// Proxy used for sources that can't be reached directly.
    pub master_proxy: Option<String>,
    /// Extra attempts after a transient failure.
    pub http_retry: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            master_proxy: None,
            http_retry: 3,
        }
    }
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_master_proxy(mut self, addr: Option<String>) -> Self {
        self.master_proxy = addr.filter(|a| !a.trim().is_empty());
        self
    }

    pub fn with_http_retry(mut self, retries: u32) -> Self {
        self.http_retry = retries;
        self
    }
}

/// HTTP page loader using reqwest.
///
/// Keeps two clients: one direct and, if a master proxy is configured, one
/// routed through it. Transient failures (connect errors, timeouts, 5xx)
/// are retried up to `http_retry` times with a linear backoff.
#[derive(Clone)]
pub struct ReqwestLoader {
    direct: Client,
    via_master: Option<Client>,
    timeout_secs: u64,
    retries: u32,
    backoff: Duration,
}

impl ReqwestLoader {
    pub fn new(config: &LoaderConfig) -> Result<Self, AppError> {
        let direct = Self::builder(config)
            .no_proxy()
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        let via_master = match &config.master_proxy {
            Some(addr) => {
                let proxy = Proxy::all(master_proxy_url(addr)?.as_str())
                    .map_err(|e| AppError::ConfigError(format!("Invalid master proxy: {e}")))?;
                let client = Self::builder(config)
                    .proxy(proxy)
                    .build()
                    .map_err(|e| AppError::HttpError(e.to_string()))?;
                Some(client)
            }
            None => None,
        };

        Ok(Self {
            direct,
            via_master,
            timeout_secs: config.timeout.as_secs(),
            retries: config.http_retry,
            backoff: Duration::from_millis(500),
        })
    }

    fn builder(config: &LoaderConfig) -> reqwest::ClientBuilder {
        Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
    }

    #[cfg(test)]
    fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn client(&self, use_master_proxy: bool) -> &Client {
        match (&self.via_master, use_master_proxy) {
            (Some(client), true) => client,
            (None, true) => {
                tracing::warn!("Source requires a master proxy but none is configured, going direct");
                &self.direct
            }
            _ => &self.direct,
        }
    }

    async fn get(&self, url: &str, use_master_proxy: bool) -> Result<Response, AppError> {
        let client = self.client(use_master_proxy);
        let mut attempt = 0;
        loop {
            match self.try_get(client, url).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    tracing::debug!(%url, attempt, error = %e, "Retrying page fetch");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_get(&self, client: &Client, url: &str) -> Result<Response, AppError> {
        let response = client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }
        Ok(response)
    }
}

/// Accepts `host:port` shorthand as well as full proxy URLs.
fn master_proxy_url(addr: &str) -> Result<Url, AppError> {
    let addr = addr.trim();
    let candidate = if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    };
    let url = Url::parse(&candidate)
        .map_err(|e| AppError::ConfigError(format!("Invalid master proxy '{addr}': {e}")))?;
    match url.scheme() {
        "http" | "https" | "socks4" | "socks4a" | "socks5" | "socks5h" => Ok(url),
        scheme => Err(AppError::ConfigError(format!(
            "Unsupported master proxy scheme '{scheme}'"
        ))),
    }
}

impl PageLoader for ReqwestLoader {
    async fn fetch_text(&self, url: &str, options: FetchOptions) -> Result<String, AppError> {
        let response = self.get(url, options.use_master_proxy).await?;
        let body = if options.legacy_encoding {
            // A charset in Content-Type still wins over the GBK default.
            response.text_with_charset("gbk").await
        } else {
            response.text().await
        };
        body.map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))
    }

    async fn fetch_bytes(&self, url: &str, options: FetchOptions) -> Result<Vec<u8>, AppError> {
        let response = self.get(url, options.use_master_proxy).await?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))
    }
}
