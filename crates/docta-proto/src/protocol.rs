use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StationConfig;

/// Messages accepted by the session (HTTP API or embedded callers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    TogglePlay,
    SetVolume { value: f32 },
    Cast,
    RefreshNews,
    RetryVideos,
    GetState,
}

/// Broadcast to every listener whenever the station state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum StateEvent {
    StateUpdated { rev: u64 },
    TrackChanged { track: TrackInfo },
    Notice { notice: UserNotice },
    /// WARN/ERROR log line forwarded from the tracing subscriber.
    Log { message: String },
}

/// The live audio source.  Bound once per session and never reassigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEndpoint {
    pub url: String,
    pub mime_type: String,
}

impl StreamEndpoint {
    pub fn new(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn from_station(station: &StationConfig) -> Self {
        Self::new(station.stream_url.clone(), station.mime_type.clone())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Nothing playing; also where a rejected autoplay lands.
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    /// Stream error or a manual play that failed its single retry.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub artist: String,
    pub title: String,
}

impl TrackInfo {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
        }
    }

    /// Station identity shown until the first successful metadata poll.
    pub fn placeholder(station: &StationConfig) -> Self {
        Self::new(station.location.clone(), station.name.clone())
    }
}

/// Bookkeeping that lets a client tell how old the current track is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataStatus {
    pub updated_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsEntry {
    pub title: String,
    pub link: String,
    /// `pubDate` exactly as published.
    pub published_raw: Option<String>,
    pub published_at: Option<DateTime<FixedOffset>>,
    pub source: String,
    /// Plain-text description for list previews.
    pub body_text: String,
    /// Original description HTML for full-article display.
    pub body_html: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoEntry {
    pub id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
}

impl VideoEntry {
    pub fn embed_url(&self) -> String {
        format!("https://www.youtube.com/embed/{}?autoplay=1", self.id)
    }

    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.id)
    }
}

/// One feed's display state.  Entries are only ever replaced as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedState<T> {
    pub entries: Vec<T>,
    pub loading: bool,
    pub error: Option<String>,
    pub loaded_once: bool,
    pub last_success: Option<DateTime<Utc>>,
}

impl<T> Default for FeedState<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            loading: true,
            error: None,
            loaded_once: false,
            last_success: None,
        }
    }
}

impl<T> FeedState<T> {
    /// Mark a refresh as started.  Background refreshes of an already loaded
    /// feed do not show a loading indicator.
    pub fn begin_refresh(&mut self, manual: bool) {
        self.loading = !self.loaded_once || manual;
    }

    pub fn complete(&mut self, entries: Vec<T>) {
        self.entries = entries;
        self.error = None;
        self.loading = false;
        self.loaded_once = true;
        self.last_success = Some(Utc::now());
    }

    /// Record a failed refresh; the previous entries stay on display.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.error = Some(reason.into());
        self.loading = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeKind {
    PlaybackFailed,
    NoCastDevices,
    CastUnsupported,
}

/// A message that must interrupt the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserNotice {
    pub kind: NoticeKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl UserNotice {
    pub fn new(kind: NoticeKind) -> Self {
        let message = match kind {
            NoticeKind::PlaybackFailed => {
                "No se pudo iniciar la reproducción. Verifica tu conexión."
            }
            NoticeKind::NoCastDevices => "No hay dispositivos de transmisión disponibles.",
            NoticeKind::CastUnsupported => {
                "Tu dispositivo no soporta transmisión directa. Prueba desde Chrome en PC/Android o Safari en iOS."
            }
        };
        Self {
            kind,
            message: message.to_string(),
            at: Utc::now(),
        }
    }
}

/// Result of one user-initiated cast request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome")]
pub enum CastOutcome {
    /// A receiver session is playing the stream; local playback should pause.
    Casting { device: Option<String> },
    SessionCancelled,
    PromptShown,
    PromptCancelled,
    NoDevices,
    PickerShown,
    Unsupported,
    Failed { reason: String },
}

impl CastOutcome {
    /// Only outcomes the user can act on produce a notice.
    pub fn notice(&self) -> Option<UserNotice> {
        match self {
            CastOutcome::NoDevices => Some(UserNotice::new(NoticeKind::NoCastDevices)),
            CastOutcome::Unsupported => Some(UserNotice::new(NoticeKind::CastUnsupported)),
            _ => None,
        }
    }

    pub fn pauses_local(&self) -> bool {
        matches!(self, CastOutcome::Casting { .. })
    }
}

/// Full state of one station session.  `rev` increases on every change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationState {
    #[serde(default)]
    pub rev: u64,
    pub endpoint: StreamEndpoint,
    pub playback: PlaybackState,
    pub volume: f32,
    pub track: TrackInfo,
    #[serde(default)]
    pub metadata: MetadataStatus,
    #[serde(default)]
    pub news: FeedState<NewsEntry>,
    #[serde(default)]
    pub videos: FeedState<VideoEntry>,
    pub notice: Option<UserNotice>,
    pub last_cast: Option<CastOutcome>,
}

impl StationState {
    pub fn new(station: &StationConfig, volume: f32) -> Self {
        Self {
            rev: 1,
            endpoint: StreamEndpoint::from_station(station),
            playback: PlaybackState::Idle,
            volume: volume.clamp(0.0, 1.0),
            track: TrackInfo::placeholder(station),
            metadata: MetadataStatus::default(),
            news: FeedState::default(),
            videos: FeedState::default(),
            notice: None,
            last_cast: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::to_string(&Command::SetVolume { value: 0.4 }).unwrap();
        assert_eq!(json, r#"{"cmd":"SetVolume","value":0.4}"#);
        let cmd: Command = serde_json::from_str(r#"{"cmd":"Cast"}"#).unwrap();
        assert_eq!(cmd, Command::Cast);
    }

    #[test]
    fn test_feed_state_keeps_entries_on_failure() {
        let mut feed: FeedState<u32> = FeedState::default();
        assert!(feed.loading);

        feed.begin_refresh(false);
        feed.complete(vec![1, 2, 3]);
        assert!(!feed.loading);
        assert!(feed.loaded_once);

        feed.begin_refresh(false);
        assert!(!feed.loading, "background refresh of loaded feed is silent");
        feed.fail("HTTP 500");
        assert_eq!(feed.entries, vec![1, 2, 3]);
        assert_eq!(feed.error.as_deref(), Some("HTTP 500"));

        feed.begin_refresh(true);
        assert!(feed.loading, "manual retry shows loading");
        feed.complete(vec![4]);
        assert_eq!(feed.entries, vec![4]);
        assert!(feed.error.is_none());
    }

    #[test]
    fn test_placeholder_track_uses_station_identity() {
        let station = StationConfig::default();
        let track = TrackInfo::placeholder(&station);
        assert_eq!(track.artist, "EL COLORADO FORMOSA");
        assert_eq!(track.title, "LA DOCTA FM 99.3");
    }

    #[test]
    fn test_cast_outcome_notices() {
        assert!(CastOutcome::NoDevices.notice().is_some());
        assert!(CastOutcome::Unsupported.notice().is_some());
        assert!(CastOutcome::PromptCancelled.notice().is_none());
        assert!(CastOutcome::SessionCancelled.notice().is_none());
        assert!(CastOutcome::Failed { reason: "x".into() }.notice().is_none());
        assert!(CastOutcome::Casting { device: None }.pauses_local());
    }

    #[test]
    fn test_video_urls() {
        let video = VideoEntry {
            id: "abc123".into(),
            title: "t".into(),
            thumbnail_url: None,
        };
        assert_eq!(video.embed_url(), "https://www.youtube.com/embed/abc123?autoplay=1");
        assert_eq!(video.watch_url(), "https://www.youtube.com/watch?v=abc123");
    }
}
