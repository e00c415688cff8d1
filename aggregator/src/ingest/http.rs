use auction_core::backoff::{retry_with_backoff, RetryPolicy};
use auction_core::config::ScrapingConfig;
use auction_core::rate_limit::RateLimiter;
use auction_core::{Error, Result};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// HTTP transport owned by one adapter. Every request waits on the adapter's
/// limiter and runs under the retry policy; non-2xx responses become
/// `UpstreamStatus`.
#[derive(Clone)]
pub struct HttpFetcher {
    source_name: &'static str,
    client: Client,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(source_name: &'static str, config: &ScrapingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            source_name,
            client,
            limiter: RateLimiter::new(config.requests_per_second)?,
            retry: config.retry_policy(),
        })
    }

    pub fn source_name(&self) -> &'static str {
        self.source_name
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Sends the request produced by `build` and returns the body text.
    /// `build` runs again for every retry.
    pub async fn send<F>(&self, operation: &str, build: F) -> Result<String>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let build = &build;
        let name = format!("{}.{}", self.source_name, operation);

        retry_with_backoff(
            move || async move {
                self.limiter.acquire().await;
                let response = build(&self.client).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(Error::UpstreamStatus {
                        source_name: self.source_name.to_string(),
                        status: status.as_u16(),
                    });
                }
                let body = response.text().await?;
                debug!(source = self.source_name, bytes = body.len(), "Fetched response");
                Ok(body)
            },
            &self.retry,
            &name,
        )
        .await
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        self.send("get", |client| client.get(url)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_text(url).await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn post_json<B, T>(&self, url: &str, payload: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let body = self
            .send("post", |client| {
                client
                    .post(url)
                    .header("Accept", "application/json")
                    .json(payload)
            })
            .await?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("source_name", &self.source_name)
            .field("limiter", &self.limiter)
            .finish()
    }
}
