//! Playback session state machine.
//!
//! ```text
//!            mount / toggle           play ok
//!   Idle ─────────────────▶ Loading ───────────▶ Playing
//!    ▲    autoplay refused     │                   │ toggle
//!    └─────────────────────────┤                   ▼
//!                              │ retry fails     Paused ── toggle ──▶ Loading
//!                              ▼
//!                            Failed ◀── media error (any state)
//! ```
//!
//! Only a manual play that fails its single retry produces a user notice.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docta_proto::protocol::{NoticeKind, PlaybackState, StreamEndpoint, UserNotice};
use tracing::{debug, info, warn};

use crate::cast::{PlatformPicker, RemotePlayback};
use crate::error::PlaybackError;
use crate::state::StateManager;

/// How much of the stream the element has buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

/// The audio output the session drives.
#[async_trait]
pub trait MediaElement: Send + Sync {
    async fn bind(&self, endpoint: &StreamEndpoint) -> Result<(), PlaybackError>;

    /// Start or resume.  Resolves once audio is actually flowing and rejects
    /// when the platform refuses or the stream cannot start.
    async fn play(&self) -> Result<(), PlaybackError>;

    async fn pause(&self) -> Result<(), PlaybackError>;

    /// Re-open the bound source from scratch.
    async fn load(&self) -> Result<(), PlaybackError>;

    async fn set_volume(&self, volume: f32) -> Result<(), PlaybackError>;

    async fn ready_state(&self) -> ReadyState;

    fn remote_playback(&self) -> Option<&dyn RemotePlayback> {
        None
    }

    fn platform_picker(&self) -> Option<&dyn PlatformPicker> {
        None
    }
}

pub struct PlaybackSession {
    media: Arc<dyn MediaElement>,
    endpoint: StreamEndpoint,
    autoplay_delay: Duration,
    state: Arc<StateManager>,
    current: PlaybackState,
    volume: f32,
    rejected_plays: u64,
}

impl PlaybackSession {
    pub fn new(
        media: Arc<dyn MediaElement>,
        endpoint: StreamEndpoint,
        volume: f32,
        autoplay_delay: Duration,
        state: Arc<StateManager>,
    ) -> Self {
        Self {
            media,
            endpoint,
            autoplay_delay,
            state,
            current: PlaybackState::Idle,
            volume: volume.clamp(0.0, 1.0),
            rejected_plays: 0,
        }
    }

    pub fn media(&self) -> &dyn MediaElement {
        self.media.as_ref()
    }

    pub fn endpoint(&self) -> &StreamEndpoint {
        &self.endpoint
    }

    pub fn current(&self) -> PlaybackState {
        self.current
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Number of `play()` calls the element has rejected so far.
    pub fn rejected_plays(&self) -> u64 {
        self.rejected_plays
    }

    async fn transition(&mut self, next: PlaybackState) {
        if self.current != next {
            debug!("[playback] {:?} → {:?}", self.current, next);
        }
        self.current = next;
        self.state.set_playback(next).await;
    }

    /// Bind the stream, wait the settle delay and try to autoplay.  A refused
    /// autoplay is expected on some platforms and lands in `Idle` silently.
    pub async fn mount(&mut self) -> PlaybackState {
        if let Err(e) = self.media.bind(&self.endpoint).await {
            warn!("[playback] could not bind {}: {}", self.endpoint.url, e);
            self.transition(PlaybackState::Failed).await;
            return self.current;
        }
        if let Err(e) = self.media.set_volume(self.volume).await {
            debug!("[playback] initial volume not applied: {}", e);
        }

        tokio::time::sleep(self.autoplay_delay).await;

        self.transition(PlaybackState::Loading).await;
        match self.media.play().await {
            Ok(()) => self.transition(PlaybackState::Playing).await,
            Err(e) => {
                self.rejected_plays += 1;
                info!("[playback] autoplay refused, waiting for the user: {}", e);
                self.transition(PlaybackState::Idle).await;
            }
        }
        self.current
    }

    /// Play/pause button.  A failed play is retried exactly once after a
    /// reload; a second failure is reported to the user and not retried.
    pub async fn toggle(&mut self) -> Result<PlaybackState, PlaybackError> {
        if self.current == PlaybackState::Playing {
            self.media.pause().await?;
            self.transition(PlaybackState::Paused).await;
            return Ok(self.current);
        }

        if self.media.ready_state().await == ReadyState::HaveNothing {
            debug!("[playback] nothing buffered, reloading before play");
            if let Err(e) = self.media.load().await {
                debug!("[playback] reload failed: {}", e);
            }
        }

        self.transition(PlaybackState::Loading).await;
        if let Err(first) = self.media.play().await {
            self.rejected_plays += 1;
            warn!("[playback] play failed, retrying once: {}", first);
            if let Err(e) = self.media.load().await {
                debug!("[playback] reload failed: {}", e);
            }
            if let Err(second) = self.media.play().await {
                self.rejected_plays += 1;
                warn!("[playback] retry failed: {}", second);
                self.transition(PlaybackState::Failed).await;
                self.state
                    .publish_notice(UserNotice::new(NoticeKind::PlaybackFailed))
                    .await;
                return Err(second);
            }
        }

        self.transition(PlaybackState::Playing).await;
        Ok(self.current)
    }

    /// Clamp and apply immediately.  The playback state is not touched.
    pub async fn set_volume(&mut self, volume: f32) -> Result<f32, PlaybackError> {
        let volume = volume.clamp(0.0, 1.0);
        self.media.set_volume(volume).await?;
        self.volume = volume;
        self.state.set_volume(volume).await;
        Ok(volume)
    }

    /// The element reported a stream or decode error.
    pub async fn on_media_error(&mut self, reason: &str) {
        warn!("[playback] media error: {}", reason);
        self.transition(PlaybackState::Failed).await;
    }

    /// Hand the audio over to a remote device.
    pub async fn pause_local(&mut self) {
        if !matches!(self.current, PlaybackState::Playing | PlaybackState::Loading) {
            return;
        }
        match self.media.pause().await {
            Ok(()) => self.transition(PlaybackState::Paused).await,
            Err(e) => warn!("[playback] could not pause for cast: {}", e),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use docta_proto::config::StationConfig;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scriptable media element.  `play()` pops results from a queue and
    /// succeeds once the queue is empty.
    pub(crate) struct FakeMedia {
        pub play_results: Mutex<VecDeque<Result<(), PlaybackError>>>,
        pub ready: Mutex<ReadyState>,
        pub calls: Mutex<Vec<&'static str>>,
        pub volume: Mutex<Option<f32>>,
    }

    impl FakeMedia {
        pub(crate) fn new(play_results: Vec<Result<(), PlaybackError>>) -> Self {
            Self {
                play_results: Mutex::new(play_results.into()),
                ready: Mutex::new(ReadyState::HaveEnoughData),
                calls: Mutex::new(Vec::new()),
                volume: Mutex::new(None),
            }
        }

        pub(crate) fn count(&self, name: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| **c == name).count()
        }

        fn record(&self, name: &'static str) {
            self.calls.lock().unwrap().push(name);
        }
    }

    #[async_trait]
    impl MediaElement for FakeMedia {
        async fn bind(&self, _endpoint: &StreamEndpoint) -> Result<(), PlaybackError> {
            self.record("bind");
            Ok(())
        }

        async fn play(&self) -> Result<(), PlaybackError> {
            self.record("play");
            self.play_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        async fn pause(&self) -> Result<(), PlaybackError> {
            self.record("pause");
            Ok(())
        }

        async fn load(&self) -> Result<(), PlaybackError> {
            self.record("load");
            Ok(())
        }

        async fn set_volume(&self, volume: f32) -> Result<(), PlaybackError> {
            *self.volume.lock().unwrap() = Some(volume);
            Ok(())
        }

        async fn ready_state(&self) -> ReadyState {
            *self.ready.lock().unwrap()
        }
    }

    fn rejected() -> Result<(), PlaybackError> {
        Err(PlaybackError::Rejected("NotAllowedError".into()))
    }

    fn session(media: Arc<FakeMedia>) -> (PlaybackSession, Arc<StateManager>) {
        let station = StationConfig::default();
        let state = Arc::new(StateManager::new(&station, 1.0));
        let session = PlaybackSession::new(
            media,
            StreamEndpoint::from_station(&station),
            1.0,
            Duration::from_millis(1000),
            state.clone(),
        );
        (session, state)
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoplay_rejection_then_manual_play() {
        let media = Arc::new(FakeMedia::new(vec![rejected()]));
        let (mut session, state) = session(media.clone());

        let started = tokio::time::Instant::now();
        assert_eq!(session.mount().await, PlaybackState::Idle);
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert!(state.get_state().await.notice.is_none(), "autoplay refusal is silent");

        assert_eq!(session.toggle().await.unwrap(), PlaybackState::Playing);
        assert_eq!(state.get_state().await.playback, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_two_failures_then_failed_without_third_attempt() {
        let media = Arc::new(FakeMedia::new(vec![rejected(), rejected(), Ok(())]));
        let (mut session, state) = session(media.clone());

        assert!(session.toggle().await.is_err());
        assert_eq!(session.current(), PlaybackState::Failed);
        assert_eq!(media.count("play"), 2);
        assert_eq!(media.count("load"), 1);

        let snapshot = state.get_state().await;
        assert_eq!(snapshot.playback, PlaybackState::Failed);
        assert_eq!(snapshot.notice.map(|n| n.kind), Some(NoticeKind::PlaybackFailed));
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let media = Arc::new(FakeMedia::new(vec![rejected()]));
        let (mut session, state) = session(media.clone());

        assert_eq!(session.toggle().await.unwrap(), PlaybackState::Playing);
        assert_eq!(media.count("play"), 2);
        assert_eq!(session.rejected_plays(), 1);
        assert!(state.get_state().await.notice.is_none());
    }

    #[tokio::test]
    async fn test_empty_element_is_reloaded_first() {
        let media = Arc::new(FakeMedia::new(vec![]));
        *media.ready.lock().unwrap() = ReadyState::HaveNothing;
        let (mut session, _state) = session(media.clone());

        session.toggle().await.unwrap();
        assert_eq!(*media.calls.lock().unwrap(), vec!["load", "play"]);
    }

    #[tokio::test]
    async fn test_toggle_pauses_when_playing() {
        let media = Arc::new(FakeMedia::new(vec![]));
        let (mut session, _state) = session(media.clone());

        session.toggle().await.unwrap();
        assert_eq!(session.toggle().await.unwrap(), PlaybackState::Paused);
        assert_eq!(session.toggle().await.unwrap(), PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_media_error_forces_failed() {
        let media = Arc::new(FakeMedia::new(vec![]));
        let (mut session, state) = session(media);

        session.toggle().await.unwrap();
        session.on_media_error("stream ended").await;
        assert_eq!(state.get_state().await.playback, PlaybackState::Failed);
        assert!(state.get_state().await.notice.is_none());
    }

    #[tokio::test]
    async fn test_volume_does_not_change_state() {
        let media = Arc::new(FakeMedia::new(vec![]));
        let (mut session, state) = session(media.clone());

        session.toggle().await.unwrap();
        assert_eq!(session.set_volume(1.7).await.unwrap(), 1.0);
        assert_eq!(session.set_volume(0.25).await.unwrap(), 0.25);
        assert_eq!(*media.volume.lock().unwrap(), Some(0.25));

        let snapshot = state.get_state().await;
        assert_eq!(snapshot.playback, PlaybackState::Playing);
        assert_eq!(snapshot.volume, 0.25);
    }
}
