//! HTTP retrieval collaborator.
//!
//! The transport performs no retries and imposes no timeout of its own;
//! bounding latency is the fallback fetcher's job.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::FetchError;

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;

    async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        let text = self.fetch_text(url).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// `Fetcher` backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        Ok(self.get(url).await?.text().await?)
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        let text = self.get(url).await?.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}
