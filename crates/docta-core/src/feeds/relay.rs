//! Server side of the feed chains: fetch the upstream XML the client
//! pipelines consume.

use std::sync::Arc;

use docta_proto::config::RelayConfig;
use tracing::info;

use crate::error::FetchError;
use crate::fallback::{FallbackFetcher, Source};
use crate::transport::Fetcher;

pub struct FeedRelay {
    fetcher: Arc<dyn Fetcher>,
    fallback: FallbackFetcher,
    news_chain: Vec<Source>,
    videos: Source,
}

impl FeedRelay {
    pub fn new(fetcher: Arc<dyn Fetcher>, fallback: FallbackFetcher, config: &RelayConfig) -> Self {
        Self {
            fetcher,
            fallback,
            news_chain: vec![
                Source::new("publisher", config.news_primary.clone()),
                Source::new("google-news", config.news_fallback.clone()),
            ],
            videos: Source::new("playlist", config.video_feed_url()),
        }
    }

    /// Publisher feed, or the search feed when the publisher is down.
    pub async fn news(&self) -> Result<String, FetchError> {
        let fetcher = &self.fetcher;
        let fetched = self
            .fallback
            .first_success(&self.news_chain, |source| {
                let fetcher = Arc::clone(fetcher);
                async move { fetcher.fetch_text(&source.url).await }
            })
            .await?;
        info!(
            "[relay] news served from {}",
            self.news_chain[fetched.source_index].label
        );
        Ok(fetched.value)
    }

    pub async fn videos(&self) -> Result<String, FetchError> {
        let fetcher = &self.fetcher;
        let fetched = self
            .fallback
            .first_success(std::slice::from_ref(&self.videos), |source| {
                let fetcher = Arc::clone(fetcher);
                async move { fetcher.fetch_text(&source.url).await }
            })
            .await?;
        Ok(fetched.value)
    }
}
