//! Headless browser seam. Session management, login flows, bidding and the
//! browser-rendered adapters only talk to these traits; `chromium` provides
//! the CDP-backed implementation.

pub mod chromium;
#[cfg(test)]
pub(crate) mod fake;

pub use chromium::ChromiumLauncher;

use async_trait::async_trait;
use auction_core::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Cookie as persisted inside an encrypted session blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

/// How a clickable control is located on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonMatch {
    /// A button, link or `role=button` element whose visible text contains this.
    Text(String),
    /// Same controls, but the trimmed visible text must equal this exactly.
    ExactText(String),
    /// A CSS selector.
    Selector(String),
}

impl ButtonMatch {
    pub fn text(text: impl Into<String>) -> Self {
        ButtonMatch::Text(text.into())
    }

    pub fn exact(text: impl Into<String>) -> Self {
        ButtonMatch::ExactText(text.into())
    }

    pub fn selector(selector: impl Into<String>) -> Self {
        ButtonMatch::Selector(selector.into())
    }
}

impl std::fmt::Display for ButtonMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ButtonMatch::Text(t) => write!(f, "text \"{t}\""),
            ButtonMatch::ExactText(t) => write!(f, "exact text \"{t}\""),
            ButtonMatch::Selector(s) => write!(f, "selector {s}"),
        }
    }
}

#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// Full rendered HTML.
    async fn content(&self) -> Result<String>;

    /// Visible text of the document body.
    async fn body_text(&self) -> Result<String>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Clicks the first visible match. `Ok(false)` when nothing matched.
    async fn click(&self, target: &ButtonMatch) -> Result<bool>;

    /// Types into the first visible element matching `selector`.
    async fn fill(&self, selector: &str, value: &str) -> Result<bool>;

    async fn is_visible(&self, target: &ButtonMatch) -> Result<bool>;

    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Isolated cookie jar and storage, one per user.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>>;

    async fn add_cookies(&self, cookies: &[StoredCookie]) -> Result<()>;

    async fn cookies(&self) -> Result<Vec<StoredCookie>>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn new_context(&self) -> Result<Arc<dyn BrowserContext>>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BrowserDriver>>;
}

/// The one browser process of the service, launched on first use.
pub struct SharedBrowser {
    launcher: Arc<dyn BrowserLauncher>,
    driver: Mutex<Option<Arc<dyn BrowserDriver>>>,
    settle: Duration,
}

impl SharedBrowser {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, settle: Duration) -> Self {
        Self {
            launcher,
            driver: Mutex::new(None),
            settle,
        }
    }

    /// Returns the running driver, launching it if this is the first caller.
    /// Concurrent first callers wait on the same launch.
    pub async fn driver(&self) -> Result<Arc<dyn BrowserDriver>> {
        let mut guard = self.driver.lock().await;
        if let Some(driver) = guard.as_ref() {
            return Ok(Arc::clone(driver));
        }

        info!("Launching shared browser");
        let driver = self.launcher.launch().await?;
        *guard = Some(Arc::clone(&driver));
        Ok(driver)
    }

    pub async fn is_launched(&self) -> bool {
        self.driver.lock().await.is_some()
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }

    /// Loads `url` in a throwaway context and returns the rendered HTML.
    #[instrument(skip(self))]
    pub async fn render(&self, url: &str) -> Result<String> {
        let driver = self.driver().await?;
        let context = driver.new_context().await?;

        let result = async {
            let page = context.new_page().await?;
            page.goto(url).await?;
            tokio::time::sleep(self.settle).await;
            let html = page.content().await?;
            debug!(bytes = html.len(), "Rendered page");
            Ok(html)
        }
        .await;

        if let Err(e) = context.close().await {
            warn!(error = %e, "Failed to close render context");
        }
        result
    }

    /// Closes the process. Callers close their contexts first.
    pub async fn shutdown(&self) -> Result<()> {
        let driver = self.driver.lock().await.take();
        if let Some(driver) = driver {
            info!("Closing shared browser");
            driver.close().await?;
        }
        Ok(())
    }
}
