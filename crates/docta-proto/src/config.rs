use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Identity of the one station this client plays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_station_name")]
    pub name: String,
    /// Second identity line; doubles as the artist when the stream reports
    /// a bare title.
    #[serde(default = "default_station_location")]
    pub location: String,
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    /// Absolute URL of the station logo, sent as cast artwork.
    #[serde(default = "default_artwork_url")]
    pub artwork_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Settle delay between binding the stream and the autoplay attempt.
    #[serde(default = "default_autoplay_delay_ms")]
    pub autoplay_delay_ms: u64,
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// How long `play()` may wait for audio before it is treated as rejected.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Shoutcast-style stats endpoint reporting `songtitle`.
    #[serde(default = "default_stats_url")]
    pub stats_url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Intermediaries tried in order.  `{url}` is replaced by the encoded stats URL.
    #[serde(default = "default_metadata_sources")]
    pub sources: Vec<MetadataSourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataSourceConfig {
    pub label: String,
    pub url_template: String,
    /// When set, the response is an envelope whose string field holds the
    /// stats JSON, which is parsed a second time.
    #[serde(default)]
    pub unwrap_field: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedsConfig {
    #[serde(default = "default_news_url")]
    pub news_url: String,
    #[serde(default = "default_video_url")]
    pub video_url: String,
    #[serde(default = "default_news_refresh_secs")]
    pub news_refresh_secs: u64,
    /// Source label for news items that carry no `<source>` element.
    #[serde(default = "default_news_source")]
    pub default_news_source: String,
}

/// Upstream feeds relayed by the daemon's `/api/news` and `/api/videos`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_news_primary")]
    pub news_primary: String,
    #[serde(default = "default_news_fallback")]
    pub news_fallback: String,
    #[serde(default = "default_playlist_id")]
    pub playlist_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Upper bound for a single source attempt.  `0` leaves attempts unbounded.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            name: default_station_name(),
            location: default_station_location(),
            stream_url: default_stream_url(),
            mime_type: default_mime_type(),
            artwork_url: default_artwork_url(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            autoplay_delay_ms: default_autoplay_delay_ms(),
            default_volume: default_volume(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            stats_url: default_stats_url(),
            poll_interval_secs: default_poll_interval_secs(),
            sources: default_metadata_sources(),
        }
    }
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            news_url: default_news_url(),
            video_url: default_video_url(),
            news_refresh_secs: default_news_refresh_secs(),
            default_news_source: default_news_source(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            news_primary: default_news_primary(),
            news_fallback: default_news_fallback(),
            playlist_id: default_playlist_id(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: default_attempt_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl RelayConfig {
    pub fn video_feed_url(&self) -> String {
        format!(
            "https://www.youtube.com/feeds/videos.xml?playlist_id={}",
            self.playlist_id
        )
    }
}

impl FetchConfig {
    pub fn attempt_timeout(&self) -> Option<std::time::Duration> {
        match self.attempt_timeout_secs {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }
}

fn default_station_name() -> String {
    "LA DOCTA FM 99.3".to_string()
}

fn default_station_location() -> String {
    "EL COLORADO FORMOSA".to_string()
}

fn default_stream_url() -> String {
    "https://stream.listafm.com.ar:8028/;".to_string()
}

fn default_mime_type() -> String {
    "audio/mpeg".to_string()
}

fn default_artwork_url() -> String {
    "https://ladoctafm.com.ar/ladocta-logo.jpg".to_string()
}

fn default_autoplay_delay_ms() -> u64 {
    1000
}

fn default_volume() -> f32 {
    1.0
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_stats_url() -> String {
    "https://stream.listafm.com.ar:8028/stats?sid=1&json=1".to_string()
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_metadata_sources() -> Vec<MetadataSourceConfig> {
    vec![
        MetadataSourceConfig {
            label: "corsproxy".to_string(),
            url_template: "https://corsproxy.io/?{url}".to_string(),
            unwrap_field: None,
        },
        MetadataSourceConfig {
            label: "allorigins".to_string(),
            url_template: "https://api.allorigins.win/get?url={url}".to_string(),
            unwrap_field: Some("contents".to_string()),
        },
    ]
}

fn default_news_url() -> String {
    format!("http://{}:{}/api/news", default_bind_address(), default_port())
}

fn default_video_url() -> String {
    format!("http://{}:{}/api/videos", default_bind_address(), default_port())
}

fn default_news_refresh_secs() -> u64 {
    900
}

fn default_news_source() -> String {
    "El Comercial".to_string()
}

fn default_news_primary() -> String {
    "https://www.elcomercial.com.ar/rss/".to_string()
}

fn default_news_fallback() -> String {
    "https://news.google.com/rss/search?q=Formosa+Argentina&hl=es-419&gl=AR&ceid=AR:es-419"
        .to_string()
}

fn default_playlist_id() -> String {
    "PL4fGSI1pDJn4Kd7YEG9LbUqvt64PLs9Fo".to_string()
}

fn default_attempt_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
        .to_string()
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8993
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`, writing a default config there if none exists yet.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
