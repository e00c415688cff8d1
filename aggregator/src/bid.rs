//! Bid submission through the site UI. There is no API for placing bids,
//! so the executor walks the bid dialog with a user's authenticated page
//! and reads the outcome back from the rendered text.

use crate::auth::{alert_text, click_first};
use crate::browser::{BrowserPage, ButtonMatch};
use crate::session::{site_origin, SessionManager};
use crate::vault::{normalize_site, CredentialVault};
use auction_core::{record_metric, Error, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

const BIDDING_SITES: &[&str] = &["goldin"];

const AMOUNT_INPUTS: &[&str] = &["input[placeholder*=\"Amount\" i]", "input[type=\"number\"]"];

const SUCCESS_MARKERS: &[&str] = &[
    "highest bidder",
    "high bidder",
    "bid placed",
    "successful",
    "confirmed",
    "your bid",
];

const FAILURE_MARKERS: &[&str] = &["unsuccessful", "not successful", "bid failed"];

const SIGN_IN_PROMPT: &str = "must be signed in";

/// Steps of the bid dialog, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStage {
    ItemPage,
    BidDialogOpen,
    AmountEntered,
    Submitted,
    Confirmed,
}

/// Why a bid stopped before the site gave a definitive answer, or the
/// site's own rejection message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum BidFailure {
    #[error("item not found")]
    ItemNotFound,
    #[error("dialog did not open")]
    DialogDidNotOpen,
    #[error("amount input not found")]
    AmountInputNotFound,
    #[error("submit control not found")]
    SubmitControlNotFound,
    #[error("confirm control not found")]
    ConfirmControlNotFound,
    #[error("rejected by site: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BidOutcome {
    Success { message: String },
    Outbid { message: String },
    /// `stage` is the last step that completed.
    Failed { stage: BidStage, reason: BidFailure },
}

impl BidOutcome {
    fn label(&self) -> &'static str {
        match self {
            BidOutcome::Success { .. } => "success",
            BidOutcome::Outbid { .. } => "outbid",
            BidOutcome::Failed { .. } => "failed",
        }
    }
}

/// Reading of the page after confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Success(String),
    Outbid(String),
    Rejected(String),
    SignedOut,
    Unclear,
}

fn excerpt(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(200).collect()
}

/// "outbid" and the failure markers win over the success markers since
/// those notices also say "your bid" or "successful".
fn classify(body: &str, alert: &str) -> Verdict {
    let lower = body.to_lowercase();
    if lower.contains("outbid") {
        return Verdict::Outbid(excerpt(body));
    }
    if FAILURE_MARKERS.iter().any(|marker| lower.contains(marker)) {
        let message = if alert.is_empty() { excerpt(body) } else { alert.to_string() };
        return Verdict::Rejected(message);
    }
    if SUCCESS_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return Verdict::Success(excerpt(body));
    }
    if !alert.is_empty() {
        return Verdict::Rejected(alert.to_string());
    }
    if lower.contains(SIGN_IN_PROMPT) {
        return Verdict::SignedOut;
    }
    Verdict::Unclear
}

/// Internal result of one pass through the dialog.
enum Walk {
    Done(BidOutcome),
    SignedOut,
    Unclear(String),
}

pub struct BidExecutor {
    vault: Arc<CredentialVault>,
    sessions: Arc<SessionManager>,
}

impl BidExecutor {
    pub fn new(vault: Arc<CredentialVault>, sessions: Arc<SessionManager>) -> Self {
        Self { vault, sessions }
    }

    /// Places `amount` on `item_url` as `user_id`.
    ///
    /// Errors with [`Error::SessionExpired`] when there is no active session
    /// or the site asks to sign in (the session is deactivated and the
    /// context dropped), and with [`Error::ActionAmbiguous`] when the page
    /// after confirming matches no known phrase.
    #[instrument(skip(self))]
    pub async fn place_bid(&self, user_id: i64, site: &str, item_url: &str, amount: Decimal) -> Result<BidOutcome> {
        let site = normalize_site(site)?;
        if !BIDDING_SITES.contains(&site.as_str()) {
            return Err(Error::Validation(format!("automated bidding not supported for {site}")));
        }
        if amount <= Decimal::ZERO {
            return Err(Error::Validation("bid amount must be positive".to_string()));
        }
        if !item_url.starts_with(site_origin(&site)) {
            return Err(Error::Validation(format!("{item_url} is not a {site} item url")));
        }

        let credential = self.vault.credential(user_id, &site).await?;
        let Some((_, state)) = self.vault.active_session(credential.id).await? else {
            return Err(Error::SessionExpired { site });
        };

        let lease = self.sessions.acquire(user_id, &site, &state).await?;
        let walked = walk(lease.page().as_ref(), item_url, amount, self.sessions.browser().settle()).await;

        let outcome = match walked {
            Ok(Walk::Done(outcome)) => outcome,
            Ok(Walk::SignedOut) => {
                warn!("Site asked to sign in; dropping session");
                self.vault.deactivate_sessions(credential.id).await?;
                lease.invalidate().await;
                record_metric!(counter, "bid_outcomes_total", 1, "site" = site.clone(), "outcome" = "session_expired");
                return Err(Error::SessionExpired { site });
            }
            Ok(Walk::Unclear(page)) => {
                record_metric!(counter, "bid_outcomes_total", 1, "site" = site.clone(), "outcome" = "unclear");
                return Err(Error::ActionAmbiguous(page));
            }
            Err(e) => {
                if matches!(e, Error::Browser(_)) {
                    lease.invalidate().await;
                }
                return Err(e);
            }
        };

        record_metric!(counter, "bid_outcomes_total", 1, "site" = site.clone(), "outcome" = outcome.label());
        if let BidOutcome::Failed { stage, reason } = &outcome {
            warn!(?stage, %reason, "Bid stopped");
        }
        info!(outcome = outcome.label(), "Bid finished");
        Ok(outcome)
    }
}

fn failed(stage: BidStage, reason: BidFailure) -> Walk {
    Walk::Done(BidOutcome::Failed { stage, reason })
}

async fn signed_out(page: &dyn BrowserPage) -> Result<bool> {
    Ok(page.body_text().await?.to_lowercase().contains(SIGN_IN_PROMPT))
}

async fn walk(page: &dyn BrowserPage, item_url: &str, amount: Decimal, settle: Duration) -> Result<Walk> {
    page.goto(item_url).await?;
    tokio::time::sleep(settle).await;
    page.click(&ButtonMatch::text("Accept")).await?;
    if page.body_text().await?.to_lowercase().contains("lot not found") {
        return Ok(failed(BidStage::ItemPage, BidFailure::ItemNotFound));
    }

    if !page.click(&ButtonMatch::text("Place Bid")).await? {
        if signed_out(page).await? {
            return Ok(Walk::SignedOut);
        }
        return Ok(failed(BidStage::ItemPage, BidFailure::DialogDidNotOpen));
    }
    tokio::time::sleep(settle).await;
    if signed_out(page).await? {
        return Ok(Walk::SignedOut);
    }

    let amount_text = amount.round_dp(2).normalize().to_string();
    let mut entered = false;
    for selector in AMOUNT_INPUTS {
        if page.fill(selector, &amount_text).await? {
            entered = true;
            break;
        }
    }
    if !entered {
        return Ok(failed(BidStage::BidDialogOpen, BidFailure::AmountInputNotFound));
    }

    let submitted = click_first(
        page,
        &[
            ButtonMatch::selector("[role=\"dialog\"] button[type=\"submit\"]"),
            ButtonMatch::exact("Place Bid"),
            ButtonMatch::exact("Submit Bid"),
        ],
    )
    .await?;
    if !submitted {
        return Ok(failed(BidStage::AmountEntered, BidFailure::SubmitControlNotFound));
    }
    tokio::time::sleep(settle).await;

    let confirmed = click_first(
        page,
        &[ButtonMatch::text("Confirm"), ButtonMatch::selector("[data-testid*=\"confirm\"]")],
    )
    .await?;
    if !confirmed {
        return Ok(failed(BidStage::Submitted, BidFailure::ConfirmControlNotFound));
    }
    tokio::time::sleep(settle * 2).await;

    let body = page.body_text().await?;
    let alert = alert_text(page).await?;
    Ok(match classify(&body, &alert) {
        Verdict::Success(message) => Walk::Done(BidOutcome::Success { message }),
        Verdict::Outbid(message) => Walk::Done(BidOutcome::Outbid { message }),
        Verdict::Rejected(message) => failed(BidStage::Confirmed, BidFailure::Rejected(message)),
        Verdict::SignedOut => Walk::SignedOut,
        Verdict::Unclear => Walk::Unclear(excerpt(&body)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{Effect, FakeBrowser};
    use crate::browser::SharedBrowser;
    use crate::store::MemoryStore;
    use crate::vault::tests::{state, vault};
    use pretty_assertions::assert_eq;

    const ITEM: &str = "https://goldin.co/item/2003-topps-chrome-lebron-james-psa-10";
    const DIALOG_SUBMIT: &str = "[role=\"dialog\"] button[type=\"submit\"]";

    struct Fixture {
        fake: FakeBrowser,
        vault: Arc<CredentialVault>,
        sessions: Arc<SessionManager>,
        executor: BidExecutor,
    }

    async fn fixture(with_session: bool) -> Fixture {
        let fake = FakeBrowser::new();
        let vault = Arc::new(vault(Arc::new(MemoryStore::new())));
        vault.store(7, "goldin", "collector@example.com", "pw").await.unwrap();
        if with_session {
            let credential = vault.credential(7, "goldin").await.unwrap();
            vault.save_session(credential.id, &state()).await.unwrap();
        }
        let sessions = Arc::new(SessionManager::new(Arc::new(SharedBrowser::new(
            fake.launcher(),
            Duration::ZERO,
        ))));
        let executor = BidExecutor::new(Arc::clone(&vault), Arc::clone(&sessions));
        Fixture {
            fake,
            vault,
            sessions,
            executor,
        }
    }

    /// Item page whose dialog opens, accepts an amount, and shows Confirm.
    fn dialog(fake: &FakeBrowser, after_confirm: &str) {
        fake.show(ButtonMatch::text("Place Bid"));
        fake.on_click(
            "Place Bid",
            vec![
                Effect::Show(ButtonMatch::selector(AMOUNT_INPUTS[0])),
                Effect::Show(ButtonMatch::selector(DIALOG_SUBMIT)),
            ],
        );
        fake.on_click(DIALOG_SUBMIT, vec![Effect::Show(ButtonMatch::text("Confirm"))]);
        fake.on_click("Confirm", vec![Effect::SetBody(after_confirm.to_string())]);
    }

    fn amount() -> Decimal {
        Decimal::new(15000, 2)
    }

    #[tokio::test]
    async fn walks_the_dialog_to_success() {
        let fx = fixture(true).await;
        dialog(&fx.fake, "Congratulations! You are the highest bidder.");

        let outcome = fx.executor.place_bid(7, "goldin", ITEM, amount()).await.unwrap();

        assert!(matches!(outcome, BidOutcome::Success { .. }), "{outcome:?}");
        assert_eq!(
            fx.fake.fills(),
            vec![(AMOUNT_INPUTS[0].to_string(), "150".to_string())]
        );
        assert_eq!(
            fx.fake.clicks(),
            vec!["Place Bid".to_string(), DIALOG_SUBMIT.to_string(), "Confirm".to_string()]
        );
        assert!(fx.sessions.has_context(7, "goldin").await);
    }

    #[tokio::test]
    async fn outbid_is_a_definitive_outcome() {
        let fx = fixture(true).await;
        dialog(&fx.fake, "Your bid was accepted but you have been outbid.");

        let outcome = fx.executor.place_bid(7, "goldin", ITEM, amount()).await.unwrap();
        assert!(matches!(outcome, BidOutcome::Outbid { .. }), "{outcome:?}");
    }

    #[tokio::test]
    async fn missing_confirm_reports_the_stage() {
        let fx = fixture(true).await;
        dialog(&fx.fake, "");
        fx.fake.on_click(DIALOG_SUBMIT, vec![]);

        let outcome = fx.executor.place_bid(7, "goldin", ITEM, amount()).await.unwrap();
        assert_eq!(
            outcome,
            BidOutcome::Failed {
                stage: BidStage::Submitted,
                reason: BidFailure::ConfirmControlNotFound,
            }
        );
    }

    #[tokio::test]
    async fn unmatched_page_text_is_ambiguous() {
        let fx = fixture(true).await;
        dialog(&fx.fake, "Processing...");

        let err = fx.executor.place_bid(7, "goldin", ITEM, amount()).await.unwrap_err();
        assert!(matches!(err, Error::ActionAmbiguous(ref page) if page == "Processing..."));
    }

    #[tokio::test]
    async fn sign_in_prompt_expires_the_session() {
        let fx = fixture(true).await;
        fx.fake.show(ButtonMatch::text("Place Bid"));
        fx.fake
            .on_click("Place Bid", vec![Effect::SetBody("You must be signed in to bid.".into())]);

        let err = fx.executor.place_bid(7, "goldin", ITEM, amount()).await.unwrap_err();

        assert!(matches!(err, Error::SessionExpired { .. }));
        let credential = fx.vault.credential(7, "goldin").await.unwrap();
        assert!(fx.vault.active_session(credential.id).await.unwrap().is_none());
        assert!(!fx.sessions.has_context(7, "goldin").await);
        assert_eq!(fx.fake.open_contexts(), 0);
    }

    #[tokio::test]
    async fn no_active_session_means_login_required() {
        let fx = fixture(false).await;

        let err = fx.executor.place_bid(7, "goldin", ITEM, amount()).await.unwrap_err();

        assert!(matches!(err, Error::SessionExpired { ref site } if site == "goldin"));
        assert_eq!(fx.fake.launches(), 0);
    }

    #[tokio::test]
    async fn unknown_lot_and_closed_dialog() {
        let fx = fixture(true).await;
        fx.fake.set_body("Lot Not Found");
        let outcome = fx.executor.place_bid(7, "goldin", ITEM, amount()).await.unwrap();
        assert_eq!(
            outcome,
            BidOutcome::Failed {
                stage: BidStage::ItemPage,
                reason: BidFailure::ItemNotFound,
            }
        );

        fx.fake.set_body("");
        let outcome = fx.executor.place_bid(7, "goldin", ITEM, amount()).await.unwrap();
        assert_eq!(
            outcome,
            BidOutcome::Failed {
                stage: BidStage::ItemPage,
                reason: BidFailure::DialogDidNotOpen,
            }
        );
    }

    #[tokio::test]
    async fn input_is_validated_before_touching_the_browser() {
        let fx = fixture(true).await;
        for (site, url, amount) in [
            ("fanatics", ITEM, amount()),
            ("goldin", "https://evil.example/item/1", amount()),
            ("goldin", ITEM, Decimal::ZERO),
        ] {
            let err = fx.executor.place_bid(7, site, url, amount).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{site} {url} {amount}");
        }
        assert_eq!(fx.fake.launches(), 0);
    }

    #[test]
    fn classification_order() {
        assert_eq!(classify("You have been outbid", ""), Verdict::Outbid("You have been outbid".into()));
        assert_eq!(classify("Bid unsuccessful", ""), Verdict::Rejected("Bid unsuccessful".into()));
        assert_eq!(classify("Bid placed!", "Server busy"), Verdict::Success("Bid placed!".into()));
        assert_eq!(classify("", "Bid must exceed $150"), Verdict::Rejected("Bid must exceed $150".into()));
        assert_eq!(classify("You must be signed in", ""), Verdict::SignedOut);
        assert_eq!(classify("Loading", ""), Verdict::Unclear);
    }
}
