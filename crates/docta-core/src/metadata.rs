//! Now-playing metadata poller.
//!
//! Resolves the current track from the stream's stats endpoint through a
//! chain of intermediaries, once on start and then on a fixed interval.  A
//! failed chain never resets the displayed track.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use docta_proto::config::MetadataConfig;
use docta_proto::protocol::TrackInfo;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::fallback::{FallbackFetcher, Fetched};
use crate::state::StateManager;
use crate::transport::Fetcher;

/// Separator between artist and title in the stats `songtitle` field.
pub const TITLE_SEPARATOR: &str = " - ";

const SONG_TITLE_FIELD: &str = "songtitle";

/// One intermediary in the metadata chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataSource {
    pub label: String,
    pub url: String,
    pub unwrap_field: Option<String>,
}

impl fmt::Display for MetadataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Expand the configured intermediaries against the stats URL.
pub fn build_chain(config: &MetadataConfig) -> Vec<MetadataSource> {
    let encoded = urlencoding::encode(&config.stats_url);
    config
        .sources
        .iter()
        .map(|s| MetadataSource {
            label: s.label.clone(),
            url: s.url_template.replace("{url}", &encoded),
            unwrap_field: s.unwrap_field.clone(),
        })
        .collect()
}

/// Peel an intermediary envelope.  The wrapped payload is usually a JSON
/// document serialised into a string field, so it gets parsed again.
pub fn decode_envelope(value: Value, unwrap_field: Option<&str>) -> Result<Value, FetchError> {
    let Some(field) = unwrap_field else {
        return Ok(value);
    };
    match value.get(field) {
        Some(Value::String(inner)) => Ok(serde_json::from_str(inner)?),
        Some(Value::Null) | None => Err(FetchError::Parse(format!(
            "envelope has no '{field}' field"
        ))),
        Some(other) => Ok(other.clone()),
    }
}

/// Split a raw song title into artist and title.
///
/// `"Artist - Part1 - Part2"` keeps everything after the first separator as
/// the title; a title without separator is attributed to `identity`.
pub fn parse_song_title(raw: &str, identity: &str) -> TrackInfo {
    let parts: Vec<&str> = raw.split(TITLE_SEPARATOR).collect();
    if parts.len() >= 2 {
        TrackInfo::new(parts[0], parts[1..].join(TITLE_SEPARATOR))
    } else {
        TrackInfo::new(identity, raw)
    }
}

/// Extract the track from a stats document.  `None` when the stream reports
/// no title, which is not an error.
pub fn track_from_stats(stats: &Value, identity: &str) -> Option<TrackInfo> {
    stats
        .get(SONG_TITLE_FIELD)
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(|t| parse_song_title(t, identity))
}

pub struct MetadataPoller {
    fetcher: Arc<dyn Fetcher>,
    fallback: FallbackFetcher,
    chain: Vec<MetadataSource>,
    identity: String,
    interval: Duration,
    state: Arc<StateManager>,
}

impl MetadataPoller {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        fallback: FallbackFetcher,
        chain: Vec<MetadataSource>,
        identity: impl Into<String>,
        interval: Duration,
        state: Arc<StateManager>,
    ) -> Self {
        Self {
            fetcher,
            fallback,
            chain,
            identity: identity.into(),
            interval,
            state,
        }
    }

    /// Resolve the current track once, without touching state.
    pub async fn poll_once(&self) -> Result<Fetched<Option<TrackInfo>>, FetchError> {
        self.fallback
            .first_success(&self.chain, |source| {
                let fetcher = Arc::clone(&self.fetcher);
                let identity = self.identity.clone();
                async move {
                    let raw = fetcher.fetch_json(&source.url).await?;
                    let stats = decode_envelope(raw, source.unwrap_field.as_deref())?;
                    Ok(track_from_stats(&stats, &identity))
                }
            })
            .await
    }

    /// Fold one poll result into state.  Failures keep the last good track.
    pub async fn apply(&self, outcome: Result<Fetched<Option<TrackInfo>>, FetchError>) {
        match outcome {
            Ok(fetched) => {
                let source = &self.chain[fetched.source_index].label;
                match fetched.value {
                    Some(track) => {
                        self.state.set_track(track, source).await;
                    }
                    None => {
                        debug!("[metadata] {} reported no song title", source);
                        self.state.mark_metadata_reachable(source).await;
                    }
                }
            }
            Err(e) => {
                let failures = self.state.record_metadata_failure().await;
                warn!(
                    "[metadata] all sources failed ({} in a row), keeping last track: {}",
                    failures, e
                );
            }
        }
    }

    pub async fn tick(&self) {
        let outcome = self.poll_once().await;
        self.apply(outcome).await;
    }

    /// Poll now and then every `interval` until `cancel` fires.  A poll in
    /// flight at cancellation is dropped before it can touch state.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "[metadata] polling every {:?} via {} source(s)",
                self.interval,
                self.chain.len()
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.tick() => {}
                }
            }
            debug!("[metadata] poller stopped");
        })
    }
}
