//! Scripted in-memory browser for exercising flows without Chrome.

use super::{BrowserContext, BrowserDriver, BrowserLauncher, BrowserPage, ButtonMatch, StoredCookie};
use async_trait::async_trait;
use auction_core::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub enum Effect {
    Show(ButtonMatch),
    Hide(ButtonMatch),
    SetBody(String),
    SetUrl(String),
}

#[derive(Default)]
struct State {
    launches: usize,
    contexts_created: usize,
    open_contexts: usize,
    pages_created: usize,
    html: String,
    body: String,
    url: String,
    visible: Vec<ButtonMatch>,
    on_click: HashMap<String, Vec<Effect>>,
    clicks: Vec<String>,
    fills: Vec<(String, String)>,
    scripts: Vec<String>,
    eval_rules: Vec<(String, serde_json::Value)>,
    cookies: Vec<StoredCookie>,
    fail_launch: bool,
}

#[derive(Clone, Default)]
pub struct FakeBrowser {
    state: Arc<Mutex<State>>,
}

fn matches(visible: &ButtonMatch, target: &ButtonMatch) -> bool {
    match (visible, target) {
        (ButtonMatch::Text(v), ButtonMatch::Text(t)) => {
            v.to_lowercase().contains(&t.to_lowercase())
        }
        (ButtonMatch::Text(v), ButtonMatch::ExactText(t)) => v.trim() == t,
        (ButtonMatch::Selector(v), ButtonMatch::Selector(t)) => v == t,
        _ => false,
    }
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn launcher(&self) -> Arc<dyn BrowserLauncher> {
        Arc::new(self.clone())
    }

    pub fn set_html(&self, html: &str) {
        self.with(|s| s.html = html.to_string());
    }

    pub fn set_body(&self, body: &str) {
        self.with(|s| s.body = body.to_string());
    }

    /// Result for scripts containing `needle`. Unmatched scripts yield null.
    pub fn set_eval_for(&self, needle: &str, value: serde_json::Value) {
        self.with(|s| s.eval_rules.push((needle.to_string(), value)));
    }

    pub fn fail_launch(&self) {
        self.with(|s| s.fail_launch = true);
    }

    pub fn show(&self, target: ButtonMatch) {
        self.with(|s| s.visible.push(target));
    }

    /// Effects applied when a visible control whose key equals `label` is clicked.
    pub fn on_click(&self, label: &str, effects: Vec<Effect>) {
        self.with(|s| s.on_click.insert(label.to_string(), effects));
    }

    pub fn launches(&self) -> usize {
        self.with(|s| s.launches)
    }

    pub fn contexts_created(&self) -> usize {
        self.with(|s| s.contexts_created)
    }

    pub fn open_contexts(&self) -> usize {
        self.with(|s| s.open_contexts)
    }

    pub fn pages_created(&self) -> usize {
        self.with(|s| s.pages_created)
    }

    pub fn clicks(&self) -> Vec<String> {
        self.with(|s| s.clicks.clone())
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.with(|s| s.fills.clone())
    }

    pub fn scripts(&self) -> Vec<String> {
        self.with(|s| s.scripts.clone())
    }

    pub fn cookies(&self) -> Vec<StoredCookie> {
        self.with(|s| s.cookies.clone())
    }

    pub fn current_url(&self) -> String {
        self.with(|s| s.url.clone())
    }
}

fn label(target: &ButtonMatch) -> String {
    match target {
        ButtonMatch::Text(t) | ButtonMatch::ExactText(t) | ButtonMatch::Selector(t) => t.clone(),
    }
}

#[async_trait]
impl BrowserLauncher for FakeBrowser {
    async fn launch(&self) -> Result<Arc<dyn BrowserDriver>> {
        self.with(|s| {
            if s.fail_launch {
                return Err(Error::Browser("chrome not installed".into()));
            }
            s.launches += 1;
            Ok(())
        })?;
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn new_context(&self) -> Result<Arc<dyn BrowserContext>> {
        self.with(|s| {
            s.contexts_created += 1;
            s.open_contexts += 1;
        });
        Ok(Arc::new(FakeContext {
            browser: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct FakeContext {
    browser: FakeBrowser,
    closed: AtomicBool,
}

#[async_trait]
impl BrowserContext for FakeContext {
    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>> {
        self.browser.with(|s| s.pages_created += 1);
        Ok(Arc::new(FakePage {
            browser: self.browser.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn add_cookies(&self, cookies: &[StoredCookie]) -> Result<()> {
        self.browser.with(|s| s.cookies.extend_from_slice(cookies));
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<StoredCookie>> {
        Ok(self.browser.cookies())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.browser.with(|s| s.open_contexts -= 1);
        }
        Ok(())
    }
}

pub struct FakePage {
    browser: FakeBrowser,
    closed: AtomicBool,
}

impl FakePage {
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.browser.with(|s| s.url = url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.browser.current_url())
    }

    async fn content(&self) -> Result<String> {
        Ok(self.browser.with(|s| s.html.clone()))
    }

    async fn body_text(&self) -> Result<String> {
        Ok(self.browser.with(|s| s.body.clone()))
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        Ok(self.browser.with(|s| {
            s.scripts.push(script.to_string());
            s.eval_rules
                .iter()
                .find(|(needle, _)| script.contains(needle.as_str()))
                .map(|(_, value)| value.clone())
                .unwrap_or(serde_json::Value::Null)
        }))
    }

    async fn click(&self, target: &ButtonMatch) -> Result<bool> {
        Ok(self.browser.with(|s| {
            let Some(hit) = s.visible.iter().find(|v| matches(v, target)).cloned() else {
                return false;
            };
            let key = label(&hit);
            s.clicks.push(key.clone());
            for effect in s.on_click.get(&key).cloned().unwrap_or_default() {
                match effect {
                    Effect::Show(m) => s.visible.push(m),
                    Effect::Hide(m) => s.visible.retain(|v| v != &m),
                    Effect::SetBody(body) => s.body = body,
                    Effect::SetUrl(url) => s.url = url,
                }
            }
            true
        }))
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<bool> {
        let target = ButtonMatch::selector(selector);
        Ok(self.browser.with(|s| {
            if s.visible.iter().any(|v| v == &target) {
                s.fills.push((selector.to_string(), value.to_string()));
                true
            } else {
                false
            }
        }))
    }

    async fn is_visible(&self, target: &ButtonMatch) -> Result<bool> {
        Ok(self.browser.with(|s| s.visible.iter().any(|v| matches(v, target))))
    }

    async fn close(&self) -> Result<()> {
        self.mark_closed();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
