use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use futures::future::BoxFuture;
use roprox_core::error::AppError;
use roprox_core::traits::{PageDriver, PageOpener};

/// Headless Chromium driven over the Chrome DevTools Protocol.
///
/// One browser process serves every direct page. If a master proxy is
/// configured a second process is launched with `--proxy-server`, since
/// Chromium only takes proxy settings at startup. Each `open_page` call
/// opens a new tab; the caller closes it through [`PageDriver::close`].
#[derive(Clone)]
pub struct ChromiumBrowser {
    direct: Arc<Browser>,
    via_master: Option<Arc<Browser>>,
    wait_timeout: Duration,
}

impl ChromiumBrowser {
    /// Launch the browser(s). Requires a Chromium / Chrome binary.
    pub async fn launch(master_proxy: Option<&str>) -> Result<Self, AppError> {
        let direct = Self::start(None).await?;
        let via_master = match master_proxy {
            Some(addr) => Some(Self::start(Some(addr)).await?),
            None => None,
        };
        Ok(Self {
            direct,
            via_master,
            wait_timeout: Duration::from_secs(30),
        })
    }

    /// How long [`PageDriver::wait_for`] polls before giving up.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    async fn start(proxy_server: Option<&str>) -> Result<Arc<Browser>, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }
        if let Some(addr) = proxy_server {
            builder = builder.arg(format!("--proxy-server={addr}"));
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Arc::new(browser))
    }
}

/// Locate a usable Chrome/Chromium binary, `CHROME_BIN` first.
///
/// The snap wrapper strips headless flags, so the real binary inside the
/// snap is preferred. `None` leaves the lookup to chromiumoxide.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

impl PageOpener for ChromiumBrowser {
    async fn open_page(
        &self,
        url: &str,
        use_master_proxy: bool,
    ) -> Result<Box<dyn PageDriver>, AppError> {
        let browser = match (&self.via_master, use_master_proxy) {
            (Some(b), true) => b,
            (None, true) => {
                tracing::warn!(%url, "Source requires a master proxy but none is configured, going direct");
                &self.direct
            }
            _ => &self.direct,
        };
        let page = browser
            .new_page(url)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to navigate to {url}: {e}")))?;
        Ok(Box::new(ChromiumPage {
            page,
            wait_timeout: self.wait_timeout,
        }))
    }
}

struct ChromiumPage {
    page: Page,
    wait_timeout: Duration,
}

fn browser_err(action: &str, e: impl std::fmt::Display) -> AppError {
    AppError::BrowserError(format!("{action}: {e}"))
}

impl PageDriver for ChromiumPage {
    fn wait_for<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async move {
            let poll = async {
                while self.page.find_element(selector).await.is_err() {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
            };
            tokio::time::timeout(self.wait_timeout, poll)
                .await
                .map_err(|_| AppError::Timeout(self.wait_timeout.as_secs()))
        })
    }

    fn evaluate<'a>(
        &'a self,
        expression: &'a str,
    ) -> BoxFuture<'a, Result<serde_json::Value, AppError>> {
        Box::pin(async move {
            let result = self
                .page
                .evaluate(expression)
                .await
                .map_err(|e| browser_err("Script evaluation failed", e))?;
            result
                .into_value::<serde_json::Value>()
                .map_err(AppError::from)
        })
    }

    fn press_key<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async move {
            let body = self
                .page
                .find_element("body")
                .await
                .map_err(|e| browser_err("Page has no body", e))?;
            body.press_key(key)
                .await
                .map_err(|e| browser_err("Key press failed", e))?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.page.clone().close().await {
                tracing::debug!(error = %e, "Failed to close browser tab");
            }
        })
    }
}
