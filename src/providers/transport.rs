use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::auth::Token;
use crate::error::{FlakeLensError, Result};

/// Bounded retry policy for rate-limited requests.
///
/// The schedule is a fixed delay between attempts; `max_attempts` counts the
/// first request, so the default of two means one retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Delay before the given retry, or `None` once attempts are exhausted.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(60))
    }
}

/// Cooperative pause applied between changes when quota runs low.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPause {
    pub threshold: u64,
    pub pause: Duration,
}

impl Default for RateLimitPause {
    fn default() -> Self {
        Self {
            threshold: 10,
            pause: Duration::from_secs(10),
        }
    }
}

/// How the token is presented to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>` (GitHub)
    Bearer,
    /// `PRIVATE-TOKEN: <token>` (GitLab)
    PrivateToken,
}

/// Everything needed to build a [`RestClient`].
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub token: Option<Token>,
    pub auth: AuthScheme,
    pub rate_limit_header: &'static str,
    pub retry: RetryPolicy,
    pub accept_invalid_certs: bool,
}

/// JSON-over-HTTP client shared by the platform providers.
///
/// Tracks the remaining request quota reported by the last response.
pub struct RestClient {
    client: Client,
    options: TransportOptions,
    remaining: Mutex<Option<u64>>,
}

impl RestClient {
    pub fn new(options: TransportOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("flakelens/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()
            .map_err(|e| FlakeLensError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            options,
            remaining: Mutex::new(None),
        })
    }

    fn auth_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.options.token, self.options.auth) {
            (Some(token), AuthScheme::Bearer) => request.bearer_auth(token.as_str()),
            (Some(token), AuthScheme::PrivateToken) => {
                request.header("PRIVATE-TOKEN", token.as_str())
            }
            (None, _) => request,
        }
    }

    /// Remaining request quota from the most recent response, if reported.
    pub fn rate_limit_remaining(&self) -> Option<u64> {
        self.remaining.lock().map(|guard| *guard).unwrap_or(None)
    }

    /// Sleeps for the configured pause when the quota is nearly exhausted.
    pub async fn pause_if_near_limit(&self, policy: &RateLimitPause) {
        if let Some(remaining) = self.rate_limit_remaining() {
            if remaining < policy.threshold {
                warn!(
                    "Rate limit low ({remaining} requests left), waiting {}s...",
                    policy.pause.as_secs()
                );
                tokio::time::sleep(policy.pause).await;
            }
        }
    }

    fn record_remaining(&self, response: &reqwest::Response) {
        let remaining = response
            .headers()
            .get(self.options.rate_limit_header)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        if let Ok(mut guard) = self.remaining.lock() {
            *guard = remaining;
        }
    }

    /// GETs a JSON document, retrying only on rate-limit responses.
    ///
    /// Transport failures and other HTTP errors are returned to the caller of
    /// this specific fetch.
    pub async fn get_json<T>(&self, url: &Url) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let mut attempt = 1;
        loop {
            debug!("GET {url} (attempt {attempt})");

            let response = self
                .auth_request(self.client.get(url.clone()))
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await?;

            self.record_remaining(&response);
            let status = response.status();

            if status.is_success() {
                return Ok(response.json().await?);
            }

            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            if !is_rate_limited(status, &message) {
                return Err(FlakeLensError::ApiError {
                    status: status.as_u16(),
                    message,
                });
            }

            let Some(delay) = self.options.retry.delay_before(attempt) else {
                return Err(FlakeLensError::ApiErrorAfterRetries {
                    status: status.as_u16(),
                    attempts: attempt,
                });
            };

            warn!(
                "Rate limit exceeded (status {status}). Waiting {}s before retry {}/{}...",
                delay.as_secs(),
                attempt + 1,
                self.options.retry.max_attempts
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && body.to_lowercase().contains("rate limit"))
}

/// Parses a configured base URL and joins the API prefix onto it.
///
/// The result always ends in `/` so relative joins append instead of
/// replacing the last path segment.
pub fn api_base(base_url: &str, prefix: &str) -> Result<Url> {
    let mut base = Url::parse(base_url)
        .map_err(|e| FlakeLensError::Config(format!("Invalid base URL: {e}")))?;

    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    let mut api = base
        .join(prefix)
        .map_err(|e| FlakeLensError::Config(format!("Invalid API base URL: {e}")))?;

    if !api.path().ends_with('/') {
        let path = format!("{}/", api.path());
        api.set_path(&path);
    }

    Ok(api)
}

/// Joins a relative path onto an API base URL.
pub fn endpoint(api: &Url, path: &str) -> Result<Url> {
    api.join(path)
        .map_err(|e| FlakeLensError::Config(format!("Invalid endpoint URL '{path}': {e}")))
}
