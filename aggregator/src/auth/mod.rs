//! Automated site logins. A successful login becomes the credential's only
//! active session; a rejected one marks the credential invalid.

mod fanatics;
mod goldin;

pub use fanatics::FanaticsLogin;
pub use goldin::GoldinLogin;

use crate::browser::{BrowserContext, BrowserPage, ButtonMatch};
use crate::session::SessionManager;
use crate::vault::{normalize_site, CredentialVault, Secrets, SessionState};
use async_trait::async_trait;
use auction_core::{record_metric, Error, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Inline error banners both sites render after a rejected step.
pub(crate) const ALERT_SELECTOR: &str = "[role=\"alert\"], .error, .error-message, .text-red, .text-red-500, .text-danger";

#[async_trait]
pub trait LoginFlow: Send + Sync {
    fn site(&self) -> &'static str;

    /// Drives the sign-in UI on a fresh page. Rejections come back as
    /// [`Error::Auth`] carrying the reason shown to the operator.
    async fn login(&self, page: &dyn BrowserPage, secrets: &Secrets) -> Result<()>;
}

pub fn login_flow(site: &str, settle: Duration) -> Option<Box<dyn LoginFlow>> {
    match site {
        "goldin" => Some(Box::new(GoldinLogin::new(settle))),
        "fanatics" => Some(Box::new(FanaticsLogin::new(settle))),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub success: bool,
    pub message: String,
}

impl LoginOutcome {
    fn ok() -> Self {
        Self {
            success: true,
            message: "Login successful".to_string(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Text of the first visible alert banner, empty when there is none.
pub(crate) async fn alert_text(page: &dyn BrowserPage) -> Result<String> {
    let script = format!(
        "(() => {{ const el = Array.from(document.querySelectorAll({})).find(n => (n.innerText || '').trim()); \
         return el ? el.innerText.trim() : ''; }})()",
        serde_json::Value::String(ALERT_SELECTOR.to_string())
    );
    let value = page.evaluate(&script).await?;
    Ok(value.as_str().unwrap_or_default().trim().to_string())
}

/// Clicks the first of `candidates` that is on the page.
pub(crate) async fn click_first(page: &dyn BrowserPage, candidates: &[ButtonMatch]) -> Result<bool> {
    for candidate in candidates {
        if page.click(candidate).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

const LOCAL_STORAGE_SCRIPT: &str = "JSON.stringify(localStorage)";

async fn capture_state(context: &dyn BrowserContext, page: &dyn BrowserPage) -> Result<SessionState> {
    let cookies = context.cookies().await?;
    let local_storage = match page.evaluate(LOCAL_STORAGE_SCRIPT).await? {
        serde_json::Value::String(json) => serde_json::from_str::<BTreeMap<String, String>>(&json).unwrap_or_default(),
        _ => BTreeMap::new(),
    };
    Ok(SessionState {
        cookies,
        local_storage,
        timestamp: Utc::now(),
    })
}

/// Login and logout on top of the vault and the session manager.
pub struct AuthService {
    vault: Arc<CredentialVault>,
    sessions: Arc<SessionManager>,
}

impl AuthService {
    pub fn new(vault: Arc<CredentialVault>, sessions: Arc<SessionManager>) -> Self {
        Self { vault, sessions }
    }

    /// Runs the site's login flow in a throwaway context. Rejections and
    /// browser failures are reported in the outcome and recorded on the
    /// credential; store failures propagate.
    #[instrument(skip(self))]
    pub async fn login(&self, user_id: i64, site: &str) -> Result<LoginOutcome> {
        let site = normalize_site(site)?;
        let credential = self.vault.credential(user_id, &site).await?;
        let Some(flow) = login_flow(&site, self.sessions.browser().settle()) else {
            return Ok(LoginOutcome::failed(format!("automated login not supported for {site}")));
        };
        let secrets = self.vault.decrypt(&credential)?;

        let attempt = async {
            let driver = self.sessions.browser().driver().await?;
            let context = driver.new_context().await?;
            let result = async {
                let page = context.new_page().await?;
                flow.login(page.as_ref(), &secrets).await?;
                capture_state(context.as_ref(), page.as_ref()).await
            }
            .await;
            if let Err(e) = context.close().await {
                warn!(error = %e, "Failed to close login context");
            }
            result
        }
        .await;

        match attempt {
            Ok(state) => {
                self.vault.save_session(credential.id, &state).await?;
                self.vault.mark_verified(credential.id).await?;
                // A cached context still carries the previous session.
                self.sessions.invalidate(user_id, &site).await;
                record_metric!(counter, "login_attempts_total", 1, "site" = site.clone(), "outcome" = "success");
                info!(site = flow.site(), cookies = state.cookies.len(), "Login succeeded");
                Ok(LoginOutcome::ok())
            }
            Err(Error::Auth { reason, .. }) => {
                self.vault.mark_invalid(credential.id, &reason).await?;
                record_metric!(counter, "login_attempts_total", 1, "site" = site.clone(), "outcome" = "rejected");
                warn!(%reason, "Login rejected");
                Ok(LoginOutcome::failed(reason))
            }
            Err(e @ (Error::Browser(_) | Error::SessionExpired { .. })) => {
                let reason = format!("Login error: {e}");
                self.vault.mark_invalid(credential.id, &reason).await?;
                record_metric!(counter, "login_attempts_total", 1, "site" = site.clone(), "outcome" = "error");
                warn!(error = %e, "Login failed");
                Ok(LoginOutcome::failed(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Deactivates every session of the credential and drops its context.
    #[instrument(skip(self))]
    pub async fn logout(&self, user_id: i64, site: &str) -> Result<u64> {
        let site = normalize_site(site)?;
        let credential = self.vault.credential(user_id, &site).await?;
        let deactivated = self.vault.deactivate_sessions(credential.id).await?;
        self.sessions.invalidate(user_id, &site).await;
        info!(deactivated, "Logged out");
        Ok(deactivated)
    }
}
