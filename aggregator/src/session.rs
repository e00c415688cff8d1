use crate::browser::{BrowserContext, BrowserPage, SharedBrowser};
use crate::vault::SessionState;
use auction_core::{record_metric, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

/// Page a restored session is replayed onto before local storage is injected.
pub fn site_origin(site: &str) -> &'static str {
    match site {
        "goldin" => "https://goldin.co",
        "fanatics" => "https://www.fanaticscollect.com",
        "heritage" => "https://www.ha.com",
        "pristine" => "https://www.pristineauction.com",
        "rea" => "https://www.robertedwardauctions.com",
        _ => "about:blank",
    }
}

/// Script that writes one local storage entry, with both sides JSON-escaped.
pub(crate) fn set_item_script(key: &str, value: &str) -> String {
    let quote = |s: &str| serde_json::Value::String(s.to_string()).to_string();
    format!("localStorage.setItem({}, {})", quote(key), quote(value))
}

struct UserContext {
    context: Arc<dyn BrowserContext>,
    page: Arc<dyn BrowserPage>,
}

impl UserContext {
    async fn close(self) {
        if !self.page.is_closed() {
            if let Err(e) = self.page.close().await {
                debug!(error = %e, "Page already gone");
            }
        }
        if let Err(e) = self.context.close().await {
            warn!(error = %e, "Failed to close browser context");
        }
    }
}

type Key = (i64, String);
type Slot = Arc<Mutex<Option<UserContext>>>;

/// Exclusive use of one user's authenticated page. Other callers for the
/// same (user, site) wait until the lease is dropped.
pub struct SessionLease {
    context: Arc<dyn BrowserContext>,
    page: Arc<dyn BrowserPage>,
    guard: OwnedMutexGuard<Option<UserContext>>,
}

impl SessionLease {
    pub fn page(&self) -> &Arc<dyn BrowserPage> {
        &self.page
    }

    pub fn context(&self) -> &Arc<dyn BrowserContext> {
        &self.context
    }

    /// Tears down this user's context while still holding the lease.
    pub async fn invalidate(mut self) {
        if let Some(user) = self.guard.take() {
            user.close().await;
        }
    }
}

/// Per-user authenticated contexts on the one shared browser process.
pub struct SessionManager {
    browser: Arc<SharedBrowser>,
    slots: StdMutex<HashMap<Key, Slot>>,
}

impl SessionManager {
    pub fn new(browser: Arc<SharedBrowser>) -> Self {
        Self {
            browser,
            slots: StdMutex::new(HashMap::new()),
        }
    }

    pub fn browser(&self) -> &Arc<SharedBrowser> {
        &self.browser
    }

    fn slot(&self, user_id: i64, site: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(slots.entry((user_id, site.to_string())).or_default())
    }

    fn all_slots(&self) -> Vec<Slot> {
        let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.values().cloned().collect()
    }

    /// Returns the user's context, reusing a live one (recreating only a
    /// closed page) or building a new one from `state`: cookies first, then
    /// one navigation to the site origin to inject local storage.
    /// Get-or-create runs under the per-user lock.
    #[instrument(skip(self, state))]
    pub async fn acquire(&self, user_id: i64, site: &str, state: &SessionState) -> Result<SessionLease> {
        let mut guard = self.slot(user_id, site).lock_owned().await;

        if let Some(user) = guard.as_mut() {
            if user.page.is_closed() {
                debug!("Recreating closed page");
                user.page = user.context.new_page().await?;
            }
            return Ok(SessionLease {
                context: Arc::clone(&user.context),
                page: Arc::clone(&user.page),
                guard,
            });
        }

        let driver = self.browser.driver().await?;
        let context = driver.new_context().await?;
        let restored = restore(&context, site, state).await;
        let page = match restored {
            Ok(page) => page,
            Err(e) => {
                if let Err(close_err) = context.close().await {
                    warn!(error = %close_err, "Failed to close half-built context");
                }
                return Err(e);
            }
        };
        info!(cookies = state.cookies.len(), storage_keys = state.local_storage.len(), "Created authenticated context");

        *guard = Some(UserContext {
            context: Arc::clone(&context),
            page: Arc::clone(&page),
        });
        record_metric!(gauge, "browser_contexts", self.open_contexts().await);
        Ok(SessionLease { context, page, guard })
    }

    /// Drops the user's page and context; other users and the browser stay up.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, user_id: i64, site: &str) {
        let existing = {
            let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slots.remove(&(user_id, site.to_string()))
        };
        if let Some(slot) = existing {
            if let Some(user) = slot.lock().await.take() {
                user.close().await;
                info!("Invalidated browser context");
            }
        }
    }

    pub async fn has_context(&self, user_id: i64, site: &str) -> bool {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slots.get(&(user_id, site.to_string())).cloned()
        };
        match slot {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    pub async fn open_contexts(&self) -> usize {
        let mut open = 0;
        for slot in self.all_slots() {
            if let Ok(guard) = slot.try_lock() {
                open += usize::from(guard.is_some());
            } else {
                // Leased right now, so it is open.
                open += 1;
            }
        }
        open
    }

    /// Closes every user context, then the browser process.
    pub async fn shutdown(&self) -> Result<()> {
        let slots: Vec<Slot> = {
            let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slots.drain().map(|(_, slot)| slot).collect()
        };
        let count = slots.len();
        for slot in slots {
            if let Some(user) = slot.lock().await.take() {
                user.close().await;
            }
        }
        info!(contexts = count, "Closed user contexts");
        self.browser.shutdown().await
    }
}

async fn restore(context: &Arc<dyn BrowserContext>, site: &str, state: &SessionState) -> Result<Arc<dyn BrowserPage>> {
    if !state.cookies.is_empty() {
        context.add_cookies(&state.cookies).await?;
    }
    let page = context.new_page().await?;
    if !state.local_storage.is_empty() {
        page.goto(site_origin(site)).await?;
        for (key, value) in &state.local_storage {
            page.evaluate(&set_item_script(key, value)).await?;
        }
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;
    use crate::vault::tests::state;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn manager(fake: &FakeBrowser) -> SessionManager {
        SessionManager::new(Arc::new(SharedBrowser::new(fake.launcher(), Duration::ZERO)))
    }

    #[tokio::test]
    async fn new_context_replays_cookies_and_storage() {
        let fake = FakeBrowser::new();
        let sessions = manager(&fake);

        let lease = sessions.acquire(7, "goldin", &state()).await.unwrap();
        drop(lease);

        assert_eq!(fake.cookies().len(), 1);
        assert_eq!(fake.current_url(), "https://goldin.co");
        assert_eq!(fake.scripts(), vec![r#"localStorage.setItem("token", "t-1")"#.to_string()]);
        assert!(sessions.has_context(7, "goldin").await);
    }

    #[tokio::test]
    async fn live_context_is_reused_and_closed_page_recreated() {
        let fake = FakeBrowser::new();
        let sessions = manager(&fake);

        let first = sessions.acquire(7, "goldin", &state()).await.unwrap();
        first.page().close().await.unwrap();
        drop(first);
        let second = sessions.acquire(7, "goldin", &state()).await.unwrap();

        assert!(!second.page().is_closed());
        assert_eq!(fake.contexts_created(), 1);
        assert_eq!(fake.pages_created(), 2);
    }

    #[tokio::test]
    async fn concurrent_acquires_build_one_context() {
        let fake = FakeBrowser::new();
        let sessions = manager(&fake);
        let state = state();

        // Each lease is dropped inside its own future; the second caller
        // waits on the per-user lock and then reuses the first context.
        async fn use_once(sessions: &SessionManager, state: &SessionState) -> Result<String> {
            let lease = sessions.acquire(9, "goldin", state).await?;
            lease.page().body_text().await
        }
        let (first, second) = tokio::join!(use_once(&sessions, &state), use_once(&sessions, &state));
        first.unwrap();
        second.unwrap();
        drop(sessions.acquire(10, "goldin", &state).await.unwrap());

        assert_eq!(fake.contexts_created(), 2);
        assert_eq!(fake.launches(), 1);
    }

    #[tokio::test]
    async fn invalidate_touches_only_that_user() {
        let fake = FakeBrowser::new();
        let sessions = manager(&fake);
        drop(sessions.acquire(7, "goldin", &state()).await.unwrap());
        drop(sessions.acquire(8, "goldin", &state()).await.unwrap());

        sessions.invalidate(7, "goldin").await;

        assert!(!sessions.has_context(7, "goldin").await);
        assert!(sessions.has_context(8, "goldin").await);
        assert_eq!(fake.open_contexts(), 1);
        assert!(sessions.browser().is_launched().await);

        sessions.shutdown().await.unwrap();
        assert_eq!(fake.open_contexts(), 0);
        assert!(!sessions.browser().is_launched().await);
    }
}
