use super::{BrowserContext, BrowserDriver, BrowserLauncher, BrowserPage, ButtonMatch, StoredCookie};
use async_trait::async_trait;
use auction_core::config::BrowserConfig;
use auction_core::{Error, Result};
use chromiumoxide::browser::{Browser, BrowserConfig as LaunchConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, CookieSameSite, TimeSinceEpoch};
use chromiumoxide::cdp::browser_protocol::storage::{GetCookiesParams, SetCookiesParams};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

fn cdp<E: std::fmt::Display>(e: E) -> Error {
    Error::Browser(e.to_string())
}

pub struct ChromiumLauncher {
    config: BrowserConfig,
    user_agent: String,
}

impl ChromiumLauncher {
    pub fn new(config: BrowserConfig, user_agent: impl Into<String>) -> Self {
        Self {
            config,
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    #[instrument(skip(self), fields(headless = self.config.headless))]
    async fn launch(&self) -> Result<Arc<dyn BrowserDriver>> {
        let mut builder = LaunchConfig::builder()
            .window_size(self.config.window_width, self.config.window_height)
            .request_timeout(Duration::from_secs(self.config.navigation_timeout_secs))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage");
        if !self.config.headless {
            builder = builder.with_head();
        }
        if self.config.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &self.config.executable {
            builder = builder.chrome_executable(path);
        }
        let launch_config = builder.build().map_err(Error::Browser)?;

        let (browser, mut handler) = Browser::launch(launch_config).await.map_err(cdp)?;
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Arc::new(ChromiumDriver {
            browser: Arc::new(Mutex::new(browser)),
            events,
            user_agent: self.user_agent.clone(),
        }))
    }
}

struct ChromiumDriver {
    browser: Arc<Mutex<Browser>>,
    events: JoinHandle<()>,
    user_agent: String,
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn new_context(&self) -> Result<Arc<dyn BrowserContext>> {
        let created = self
            .browser
            .lock()
            .await
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(cdp)?;

        Ok(Arc::new(ChromiumContext {
            browser: Arc::clone(&self.browser),
            id: created.result.browser_context_id,
            user_agent: self.user_agent.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        browser.close().await.map_err(cdp)?;
        if let Err(e) = browser.wait().await {
            debug!(error = %e, "Browser process did not exit cleanly");
        }
        self.events.abort();
        Ok(())
    }
}

struct ChromiumContext {
    browser: Arc<Mutex<Browser>>,
    id: BrowserContextId,
    user_agent: String,
}

fn to_cookie_param(cookie: &StoredCookie) -> Result<CookieParam> {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .domain(cookie.domain.clone())
        .path(cookie.path.clone())
        .http_only(cookie.http_only)
        .secure(cookie.secure);
    if let Some(expires) = cookie.expires.filter(|e| *e > 0.0) {
        builder = builder.expires(TimeSinceEpoch::new(expires));
    }
    if let Some(same_site) = cookie
        .same_site
        .as_deref()
        .and_then(|s| s.parse::<CookieSameSite>().ok())
    {
        builder = builder.same_site(same_site);
    }
    builder.build().map_err(Error::Browser)
}

#[async_trait]
impl BrowserContext for ChromiumContext {
    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(self.id.clone())
            .build()
            .map_err(Error::Browser)?;
        let page = self.browser.lock().await.new_page(params).await.map_err(cdp)?;
        page.set_user_agent(self.user_agent.as_str()).await.map_err(cdp)?;

        Ok(Arc::new(ChromiumPage {
            page,
            closed: AtomicBool::new(false),
        }))
    }

    async fn add_cookies(&self, cookies: &[StoredCookie]) -> Result<()> {
        if cookies.is_empty() {
            return Ok(());
        }
        let params = SetCookiesParams {
            cookies: cookies.iter().map(to_cookie_param).collect::<Result<Vec<_>>>()?,
            browser_context_id: Some(self.id.clone()),
        };
        self.browser.lock().await.execute(params).await.map_err(cdp)?;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<StoredCookie>> {
        let params = GetCookiesParams {
            browser_context_id: Some(self.id.clone()),
        };
        let response = self.browser.lock().await.execute(params).await.map_err(cdp)?;

        Ok(response
            .result
            .cookies
            .into_iter()
            .map(|c| StoredCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: Some(c.expires).filter(|e| *e > 0.0),
                http_only: c.http_only,
                secure: c.secure,
                same_site: c.same_site.map(|s| s.as_ref().to_string()),
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.browser
            .lock()
            .await
            .execute(DisposeBrowserContextParams::new(self.id.clone()))
            .await
            .map_err(cdp)?;
        Ok(())
    }
}

struct ChromiumPage {
    page: Page,
    closed: AtomicBool,
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Script that resolves `target` to the first visible element and either
/// clicks it or only reports whether it exists.
fn locate_script(target: &ButtonMatch, click: bool) -> String {
    let finder = match target {
        ButtonMatch::Text(text) => format!(
            "Array.from(document.querySelectorAll('button, a, [role=\"button\"], input[type=\"submit\"]'))\
             .find(n => visible(n) && (n.innerText || n.value || '').toLowerCase().includes({}))",
            js_string(&text.to_lowercase())
        ),
        ButtonMatch::ExactText(text) => format!(
            "Array.from(document.querySelectorAll('button, a, [role=\"button\"], input[type=\"submit\"]'))\
             .find(n => visible(n) && (n.innerText || n.value || '').trim() === {})",
            js_string(text)
        ),
        ButtonMatch::Selector(selector) => format!(
            "Array.from(document.querySelectorAll({})).find(n => visible(n))",
            js_string(selector)
        ),
    };
    let action = if click { "el.click(); " } else { "" };
    format!(
        "(() => {{ const visible = n => !!(n.offsetWidth || n.offsetHeight || n.getClientRects().length); \
         const el = {finder}; if (!el) return false; {action}return true; }})()"
    )
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await.map_err(cdp)?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await.map_err(cdp)?.unwrap_or_default())
    }

    async fn content(&self) -> Result<String> {
        self.page.content().await.map_err(cdp)
    }

    async fn body_text(&self) -> Result<String> {
        let value = self.evaluate("document.body ? document.body.innerText : ''").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self.page.evaluate(script).await.map_err(cdp)?;
        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    async fn click(&self, target: &ButtonMatch) -> Result<bool> {
        let value = self.evaluate(&locate_script(target, true)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<bool> {
        if !self.is_visible(&ButtonMatch::selector(selector)).await? {
            return Ok(false);
        }
        let element = match self.page.find_element(selector).await {
            Ok(element) => element,
            Err(_) => return Ok(false),
        };
        element.click().await.map_err(cdp)?;
        element.type_str(value).await.map_err(cdp)?;
        Ok(true)
    }

    async fn is_visible(&self, target: &ButtonMatch) -> Result<bool> {
        let value = self.evaluate(&locate_script(target, false)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.page.clone().close().await.map_err(cdp)?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
