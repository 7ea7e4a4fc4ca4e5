//! HTTP client for vendor APIs
//!
//! Wraps `reqwest::Client` with the vendor's base URL and credentials, a
//! request timeout, and bounded exponential backoff for transient failures
//! (network errors, 429 and 5xx responses).

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use serde_json::Value;

/// How requests are authenticated
#[derive(Debug, Clone)]
pub enum Auth {
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

/// JSON API client bound to one vendor
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    auth: Auth,
    retry: RetryConfig,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, auth: Auth, retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(retry.timeout)
            .user_agent(concat!("price_crawler/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` (relative to the base URL) and parse the body as JSON
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut attempt = 0;
        loop {
            match self.get_once(&url, query).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    log::warn!(
                        "Request to {} failed ({}), retrying in {:?} ({}/{})",
                        url,
                        e,
                        delay,
                        attempt + 1,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once(&self, url: &str, query: &[(&str, String)]) -> Result<Value> {
        let mut request = self.client.get(url).query(query);
        request = match &self.auth {
            Auth::None => request,
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::HttpStatus {
                status: response.status(),
                url: url.to_string(),
            });
        }
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}
