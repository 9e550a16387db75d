//! News and video feed acquisition.
//!
//! Each feed kind has a [`FeedParser`]; a [`FeedPipeline`] couples a parser
//! with its endpoint and folds every refresh into the shared state.  Entry
//! lists are replaced wholesale on success and left untouched on failure.

pub mod extract;
pub mod news;
pub mod relay;
pub mod video;

use std::sync::Arc;
use std::time::Duration;

use docta_proto::protocol::{FeedState, StationState};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::state::StateManager;
use crate::transport::Fetcher;

pub use news::NewsParser;
pub use relay::FeedRelay;
pub use video::VideoParser;

pub trait FeedParser: Send + Sync + 'static {
    type Entry: Clone + Send + Sync + 'static;

    /// Short name used in logs.
    const NAME: &'static str;

    fn parse(&self, xml: &str) -> Result<Vec<Self::Entry>, FetchError>;

    /// Where this feed lives in the station state.
    fn slot(state: &mut StationState) -> &mut FeedState<Self::Entry>;
}

pub struct FeedPipeline<P: FeedParser> {
    parser: P,
    url: String,
    fetcher: Arc<dyn Fetcher>,
    attempt_timeout: Option<Duration>,
    state: Arc<StateManager>,
    refresh_lock: Mutex<()>,
}

impl<P: FeedParser> FeedPipeline<P> {
    pub fn new(
        parser: P,
        url: impl Into<String>,
        fetcher: Arc<dyn Fetcher>,
        attempt_timeout: Option<Duration>,
        state: Arc<StateManager>,
    ) -> Self {
        Self {
            parser,
            url: url.into(),
            fetcher,
            attempt_timeout,
            state,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch, parse and publish once.  Concurrent callers queue up behind the
    /// refresh in progress, which is bounded by the attempt timeout.  Returns
    /// the number of entries published.
    pub async fn refresh(&self, manual: bool) -> Result<usize, FetchError> {
        let _guard = self.refresh_lock.lock().await;
        self.state
            .update(|s| P::slot(s).begin_refresh(manual))
            .await;

        let result = match self.fetch().await {
            Ok(xml) => self.parser.parse(&xml),
            Err(e) => Err(e),
        };

        match result {
            Ok(entries) => {
                let count = entries.len();
                self.state.update(|s| P::slot(s).complete(entries)).await;
                debug!("[feeds] {}: {} entries", P::NAME, count);
                Ok(count)
            }
            Err(e) => {
                warn!("[feeds] {} refresh failed, keeping previous entries: {}", P::NAME, e);
                let reason = e.to_string();
                self.state.update(|s| P::slot(s).fail(reason)).await;
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> Result<String, FetchError> {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, self.fetcher.fetch_text(&self.url))
                .await
                .unwrap_or(Err(FetchError::Timeout(limit))),
            None => self.fetcher.fetch_text(&self.url).await,
        }
    }

    /// Refresh now, then every `interval` if one is given, until `cancel`
    /// fires.  A refresh in flight at cancellation is abandoned.
    pub fn spawn(self: Arc<Self>, interval: Option<Duration>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let Some(period) = interval else {
                info!("[feeds] {}: one-shot fetch", P::NAME);
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = self.refresh(false) => {}
                }
                return;
            };

            info!("[feeds] {}: refreshing every {:?}", P::NAME, period);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.refresh(false) => {}
                }
            }
            debug!("[feeds] {} refresher stopped", P::NAME);
        })
    }
}
