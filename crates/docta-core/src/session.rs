/// StationSession: single-owner event loop for one listening session.
///
/// Owns the playback state machine, the cast resolver and the background
/// acquisition tasks.  Everything that wants to act on the session (HTTP
/// handlers, the media element's error callback) sends a `SessionEvent`.
///
/// Background work is tied to one `CancellationToken`: the metadata poller,
/// the periodic news refresher, the one-shot video fetch and any manual
/// refreshes.  `teardown()` cancels the token and waits for every one of
/// them, so nothing mutates state after the session is gone.
///
/// A failed play attempt already accounts for the stream errors the element
/// raised while it was in flight, so those are dropped instead of being
/// applied after the attempt has settled.
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use docta_proto::config::Config;
use docta_proto::protocol::{Command, StreamEndpoint};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cast::{CastResolver, ReceiverFramework};
use crate::fallback::FallbackFetcher;
use crate::feeds::{FeedParser, FeedPipeline, NewsParser, VideoParser};
use crate::metadata::{build_chain, MetadataPoller};
use crate::playback::{MediaElement, PlaybackSession};
use crate::state::StateManager;
use crate::transport::Fetcher;

// ── SessionEvent ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SessionEvent {
    /// A command from the HTTP API or an embedding caller.
    Command(Command),
    /// The media element reported a stream or decode error.
    MediaError(String),
    Shutdown,
}

// ── StationSession ────────────────────────────────────────────────────────────

pub struct StationSession {
    config: Config,
    state: Arc<StateManager>,
    fetcher: Arc<dyn Fetcher>,
    playback: PlaybackSession,
    cast: CastResolver,
    news: Arc<FeedPipeline<NewsParser>>,
    videos: Arc<FeedPipeline<VideoParser>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl StationSession {
    pub fn new(
        config: Config,
        media: Arc<dyn MediaElement>,
        fetcher: Arc<dyn Fetcher>,
        receiver: Option<Arc<dyn ReceiverFramework>>,
        state: Arc<StateManager>,
    ) -> Self {
        let playback = PlaybackSession::new(
            media,
            StreamEndpoint::from_station(&config.station),
            config.playback.default_volume,
            Duration::from_millis(config.playback.autoplay_delay_ms),
            state.clone(),
        );
        let news = Arc::new(FeedPipeline::new(
            NewsParser::new(config.feeds.default_news_source.clone()),
            config.feeds.news_url.clone(),
            fetcher.clone(),
            config.fetch.attempt_timeout(),
            state.clone(),
        ));
        let videos = Arc::new(FeedPipeline::new(
            VideoParser,
            config.feeds.video_url.clone(),
            fetcher.clone(),
            config.fetch.attempt_timeout(),
            state.clone(),
        ));
        let cast = CastResolver::new(receiver, &config.station);

        Self {
            config,
            state,
            fetcher,
            playback,
            cast,
            news,
            videos,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state)
    }

    /// Token cancelled on teardown.  Callers may cancel it to stop the
    /// background tasks early.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the background tasks, then bind the stream and try to autoplay.
    pub async fn start(&mut self) {
        let poller = MetadataPoller::new(
            self.fetcher.clone(),
            FallbackFetcher::new(self.config.fetch.attempt_timeout()),
            build_chain(&self.config.metadata),
            self.config.station.location.clone(),
            Duration::from_secs(self.config.metadata.poll_interval_secs.max(1)),
            self.state.clone(),
        );
        self.tasks.push(poller.spawn(self.cancel.child_token()));

        let news_every = match self.config.feeds.news_refresh_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        self.tasks
            .push(self.news.clone().spawn(news_every, self.cancel.child_token()));
        self.tasks
            .push(self.videos.clone().spawn(None, self.cancel.child_token()));

        let state = self.playback.mount().await;
        info!("StationSession: mounted, playback {:?}", state);
    }

    /// Run until `Shutdown` or until every sender is dropped, then tear down.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<SessionEvent>) {
        info!("StationSession: starting event loop");
        let mut backlog = VecDeque::new();
        self.start().await;
        if self.playback.rejected_plays() > 0 {
            drop_play_errors(&mut event_rx, &mut backlog);
        }

        loop {
            let evt = match backlog.pop_front() {
                Some(evt) => Some(evt),
                None => tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    evt = event_rx.recv() => evt,
                },
            };
            match evt {
                None => {
                    info!("StationSession: event channel closed, shutting down");
                    break;
                }
                Some(SessionEvent::Shutdown) => {
                    info!("StationSession: shutdown requested");
                    break;
                }
                Some(SessionEvent::Command(cmd)) => {
                    debug!("StationSession: command {:?}", cmd);
                    let rejected = self.playback.rejected_plays();
                    self.handle_command(cmd).await;
                    if self.playback.rejected_plays() != rejected {
                        drop_play_errors(&mut event_rx, &mut backlog);
                    }
                }
                Some(SessionEvent::MediaError(reason)) => {
                    self.playback.on_media_error(&reason).await;
                }
            }
        }

        self.teardown().await;
    }

    pub async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::TogglePlay => {
                if let Err(e) = self.playback.toggle().await {
                    error!("StationSession: playback could not start: {}", e);
                }
            }
            Command::SetVolume { value } => {
                if let Err(e) = self.playback.set_volume(value).await {
                    error!("StationSession: volume change failed: {}", e);
                }
            }
            Command::Cast => self.cast().await,
            Command::RefreshNews => self.spawn_refresh(self.news.clone()),
            Command::RetryVideos => self.spawn_refresh(self.videos.clone()),
            Command::GetState => {
                // State is broadcast on every change
            }
        }
    }

    async fn cast(&mut self) {
        let track = self.state.get_state().await.track;
        let outcome = self
            .cast
            .resolve(self.playback.media(), self.playback.endpoint(), &track)
            .await;
        info!("StationSession: cast outcome {:?}", outcome);

        if outcome.pauses_local() {
            self.playback.pause_local().await;
        }
        if let Some(notice) = outcome.notice() {
            self.state.publish_notice(notice).await;
        }
        self.state.set_last_cast(outcome).await;
    }

    /// Manual refreshes run beside the loop so a slow feed never blocks
    /// playback commands.
    fn spawn_refresh<P: FeedParser>(&mut self, pipeline: Arc<FeedPipeline<P>>) {
        self.tasks.retain(|t| !t.is_finished());
        let cancel = self.cancel.child_token();
        self.tasks.push(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = pipeline.refresh(true) => {}
            }
        }));
    }

    /// Cancel every background task and wait for all of them to finish.
    pub async fn teardown(&mut self) {
        info!("StationSession: teardown, stopping {} task(s)", self.tasks.len());
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("StationSession: background task panicked: {}", e);
            }
        }
    }
}

/// Pull everything queued while a rejected play attempt ran.  Media errors among
/// them belong to that attempt and are discarded; other events keep their
/// order in `backlog`.
fn drop_play_errors(
    event_rx: &mut mpsc::Receiver<SessionEvent>,
    backlog: &mut VecDeque<SessionEvent>,
) {
    while let Ok(evt) = event_rx.try_recv() {
        match evt {
            SessionEvent::MediaError(reason) => {
                debug!("StationSession: media error during play attempt: {}", reason);
            }
            other => backlog.push_back(other),
        }
    }
}
