use super::{click_first, LoginFlow};
use crate::browser::{BrowserPage, ButtonMatch};
use crate::vault::Secrets;
use async_trait::async_trait;
use auction_core::{Error, Result};
use std::time::Duration;
use tracing::instrument;

const HOME_URL: &str = "https://www.fanaticscollect.com/";
const SITE: &str = "fanatics";

const EMAIL_INPUTS: &[&str] = &[
    "input[type=\"email\"]",
    "input[name=\"email\"]",
    "input[id=\"email\"]",
    "input[autocomplete=\"email\"]",
    "input[placeholder*=\"email\" i]",
];
const PASSWORD_INPUTS: &[&str] = &["input[type=\"password\"]", "input[name=\"password\"]"];

/// Sign-in behind the "LOG IN" header button. The form is guarded by
/// bot detection; a missing email field usually means a challenge page.
pub struct FanaticsLogin {
    settle: Duration,
}

impl FanaticsLogin {
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }
}

async fn fill_first(page: &dyn BrowserPage, selectors: &[&str], value: &str) -> Result<bool> {
    for selector in selectors {
        if page.fill(selector, value).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn log_in_button() -> ButtonMatch {
    ButtonMatch::exact("LOG IN")
}

#[async_trait]
impl LoginFlow for FanaticsLogin {
    fn site(&self) -> &'static str {
        SITE
    }

    #[instrument(skip_all)]
    async fn login(&self, page: &dyn BrowserPage, secrets: &Secrets) -> Result<()> {
        page.goto(HOME_URL).await?;
        tokio::time::sleep(self.settle).await;

        if !page.click(&log_in_button()).await? {
            return Err(Error::auth(SITE, "Could not find LOG IN button on Fanatics Collect"));
        }
        tokio::time::sleep(self.settle).await;

        if !fill_first(page, EMAIL_INPUTS, &secrets.username).await? {
            return Err(Error::auth(
                SITE,
                "Fanatics login blocked - anti-bot protection detected. Manual login required via browser.",
            ));
        }
        click_first(
            page,
            &[
                ButtonMatch::selector("button[type=\"submit\"]"),
                ButtonMatch::text("Continue"),
                ButtonMatch::text("Next"),
                ButtonMatch::text("Sign In"),
            ],
        )
        .await?;
        tokio::time::sleep(self.settle).await;

        if !fill_first(page, PASSWORD_INPUTS, &secrets.password).await? {
            return Err(Error::auth(SITE, "Could not find password field"));
        }
        let submitted = click_first(
            page,
            &[
                ButtonMatch::selector("button[type=\"submit\"]"),
                ButtonMatch::text("Sign In"),
                ButtonMatch::text("Log In"),
            ],
        )
        .await?;
        if !submitted {
            return Err(Error::auth(SITE, "Could not find submit button"));
        }
        tokio::time::sleep(self.settle * 2).await;

        // Logged-in headers swap the LOG IN button for the account menu.
        page.goto(HOME_URL).await?;
        tokio::time::sleep(self.settle).await;
        if page.is_visible(&log_in_button()).await? {
            return Err(Error::auth(SITE, "Login failed. Please verify your Fanatics credentials."));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{Effect, FakeBrowser};
    use crate::browser::BrowserLauncher;
    use pretty_assertions::assert_eq;

    async fn attempt(fake: &FakeBrowser) -> Result<()> {
        let driver = fake.launch().await?;
        let context = driver.new_context().await?;
        let page = context.new_page().await?;
        let secrets = Secrets {
            username: "collector@example.com".into(),
            password: "hunter2".into(),
        };
        FanaticsLogin::new(Duration::ZERO).login(page.as_ref(), &secrets).await
    }

    fn reason(result: Result<()>) -> String {
        match result {
            Err(Error::Auth { reason, .. }) => reason,
            other => panic!("expected auth rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn challenge_page_is_reported_as_blocked() {
        let fake = FakeBrowser::new();
        fake.show(ButtonMatch::text("LOG IN"));

        assert!(reason(attempt(&fake).await).starts_with("Fanatics login blocked"));
    }

    #[tokio::test]
    async fn falls_back_through_email_selectors() {
        let fake = FakeBrowser::new();
        fake.show(ButtonMatch::text("LOG IN"));
        fake.show(ButtonMatch::selector("input[autocomplete=\"email\"]"));
        fake.show(ButtonMatch::selector("input[type=\"password\"]"));
        fake.show(ButtonMatch::selector("button[type=\"submit\"]"));
        fake.on_click("button[type=\"submit\"]", vec![Effect::Hide(ButtonMatch::text("LOG IN"))]);

        attempt(&fake).await.unwrap();
        assert_eq!(
            fake.fills(),
            vec![
                ("input[autocomplete=\"email\"]".to_string(), "collector@example.com".to_string()),
                ("input[type=\"password\"]".to_string(), "hunter2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn log_in_button_still_present_means_rejected() {
        let fake = FakeBrowser::new();
        fake.show(ButtonMatch::text("LOG IN"));
        fake.show(ButtonMatch::selector("input[type=\"email\"]"));
        fake.show(ButtonMatch::selector("input[type=\"password\"]"));
        fake.show(ButtonMatch::text("Sign In"));

        assert_eq!(
            reason(attempt(&fake).await),
            "Login failed. Please verify your Fanatics credentials."
        );
    }
}
