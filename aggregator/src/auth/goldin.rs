use super::{alert_text, click_first, LoginFlow};
use crate::browser::{BrowserPage, ButtonMatch};
use crate::vault::Secrets;
use async_trait::async_trait;
use auction_core::{Error, Result};
use std::time::Duration;
use tracing::{debug, instrument};

const LOGIN_URL: &str = "https://goldin.co/signIn";
const EMAIL_INPUT: &str = "input[type=\"email\"]";
const PASSWORD_INPUT: &str = "input[type=\"password\"]";
const SITE: &str = "goldin";

/// Two-step sign-in: email, Continue, then password on the same page.
pub struct GoldinLogin {
    settle: Duration,
}

impl GoldinLogin {
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }
}

#[async_trait]
impl LoginFlow for GoldinLogin {
    fn site(&self) -> &'static str {
        SITE
    }

    #[instrument(skip_all)]
    async fn login(&self, page: &dyn BrowserPage, secrets: &Secrets) -> Result<()> {
        page.goto(LOGIN_URL).await?;
        tokio::time::sleep(self.settle).await;
        if page.click(&ButtonMatch::text("Accept")).await? {
            debug!("Dismissed cookie banner");
        }

        if !page.fill(EMAIL_INPUT, &secrets.username).await? {
            return Err(Error::auth(SITE, "Could not find email input"));
        }
        let continued = click_first(
            page,
            &[ButtonMatch::text("Continue"), ButtonMatch::selector("button[type=\"submit\"]")],
        )
        .await?;
        if !continued {
            return Err(Error::auth(SITE, "Could not find continue button"));
        }
        tokio::time::sleep(self.settle).await;

        if !page.fill(PASSWORD_INPUT, &secrets.password).await? {
            let alert = alert_text(page).await?;
            let reason = if alert.is_empty() {
                "Could not find password input - email may not be registered".to_string()
            } else {
                alert
            };
            return Err(Error::auth(SITE, reason));
        }

        let submitted = click_first(
            page,
            &[
                ButtonMatch::text("Continue"),
                ButtonMatch::text("Sign In"),
                ButtonMatch::text("Log In"),
                ButtonMatch::selector("button[type=\"submit\"]"),
            ],
        )
        .await?;
        if !submitted {
            return Err(Error::auth(SITE, "Could not find submit button"));
        }
        tokio::time::sleep(self.settle * 2).await;

        let alert = alert_text(page).await?;
        if !alert.is_empty() {
            return Err(Error::auth(SITE, format!("Login failed: {alert}")));
        }
        let url = page.current_url().await?.to_lowercase();
        if url.contains("signin") || url.contains("sign-in") {
            return Err(Error::auth(SITE, "Login failed - incorrect credentials"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{Effect, FakeBrowser};
    use crate::browser::BrowserLauncher;

    fn secrets() -> Secrets {
        Secrets {
            username: "collector@example.com".into(),
            password: "hunter2".into(),
        }
    }

    async fn attempt(fake: &FakeBrowser) -> Result<()> {
        let driver = fake.launch().await?;
        let context = driver.new_context().await?;
        let page = context.new_page().await?;
        GoldinLogin::new(Duration::ZERO).login(page.as_ref(), &secrets()).await
    }

    fn reason(result: Result<()>) -> String {
        match result {
            Err(Error::Auth { reason, .. }) => reason,
            other => panic!("expected auth rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unregistered_email_has_no_password_step() {
        let fake = FakeBrowser::new();
        fake.show(ButtonMatch::selector(EMAIL_INPUT));
        fake.show(ButtonMatch::text("Continue"));

        assert_eq!(
            reason(attempt(&fake).await),
            "Could not find password input - email may not be registered"
        );
    }

    #[tokio::test]
    async fn staying_on_sign_in_page_is_a_rejection() {
        let fake = FakeBrowser::new();
        fake.show(ButtonMatch::selector(EMAIL_INPUT));
        fake.show(ButtonMatch::selector(PASSWORD_INPUT));
        fake.show(ButtonMatch::selector("button[type=\"submit\"]"));

        assert_eq!(reason(attempt(&fake).await), "Login failed - incorrect credentials");
        assert_eq!(fake.clicks().len(), 2);
    }

    #[tokio::test]
    async fn cookie_banner_is_dismissed_first() {
        let fake = FakeBrowser::new();
        fake.show(ButtonMatch::text("Accept all"));
        fake.show(ButtonMatch::selector(EMAIL_INPUT));
        fake.show(ButtonMatch::selector(PASSWORD_INPUT));
        fake.show(ButtonMatch::text("Continue"));
        fake.on_click("Continue", vec![Effect::SetUrl("https://goldin.co/".into())]);

        attempt(&fake).await.unwrap();
        assert_eq!(fake.clicks()[0], "Accept all");
    }
}
