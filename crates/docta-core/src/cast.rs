//! Cast target resolution.
//!
//! Capabilities are probed in a fixed order on every request and never
//! cached: a receiver framework, the media element's remote playback, the
//! platform route picker, and finally nothing.  The first one present is the
//! only one used.

use std::sync::Arc;

use async_trait::async_trait;
use docta_proto::config::StationConfig;
use docta_proto::protocol::{CastOutcome, StreamEndpoint, TrackInfo};
use tracing::{debug, info, warn};

use crate::error::CastError;
use crate::playback::MediaElement;

/// What a receiver is asked to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastMedia {
    pub content_id: String,
    pub content_type: String,
    pub artist: String,
    pub title: String,
    pub images: Vec<String>,
}

impl CastMedia {
    pub fn new(endpoint: &StreamEndpoint, track: &TrackInfo, artwork_url: &str) -> Self {
        Self {
            content_id: endpoint.url.clone(),
            content_type: endpoint.mime_type.clone(),
            artist: track.artist.clone(),
            title: track.title.clone(),
            images: vec![artwork_url.to_string()],
        }
    }
}

/// Third-party receiver SDK (e.g. a Cast sender library).
#[async_trait]
pub trait ReceiverFramework: Send + Sync {
    /// Whether the SDK has finished loading and can open sessions.
    fn is_available(&self) -> bool;

    /// Let the user pick a receiver and open a session on it.
    async fn request_session(&self) -> Result<Box<dyn ReceiverSession>, CastError>;
}

#[async_trait]
pub trait ReceiverSession: Send + Sync {
    fn device_name(&self) -> Option<String>;

    async fn load_media(&self, media: &CastMedia) -> Result<(), CastError>;
}

/// Remote playback exposed by the media element itself.
#[async_trait]
pub trait RemotePlayback: Send + Sync {
    async fn watch_availability(&self) -> Result<bool, CastError>;

    async fn prompt(&self) -> Result<(), CastError>;
}

/// OS-level audio route picker.
#[async_trait]
pub trait PlatformPicker: Send + Sync {
    async fn show_picker(&self) -> Result<(), CastError>;
}

/// The capability selected for one request.
pub enum CastCapability<'a> {
    Receiver(&'a dyn ReceiverFramework),
    RemotePlayback(&'a dyn RemotePlayback),
    PlatformPicker(&'a dyn PlatformPicker),
    Unsupported,
}

impl CastCapability<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            CastCapability::Receiver(_) => "receiver",
            CastCapability::RemotePlayback(_) => "remote-playback",
            CastCapability::PlatformPicker(_) => "platform-picker",
            CastCapability::Unsupported => "unsupported",
        }
    }
}

pub struct CastResolver {
    receiver: Option<Arc<dyn ReceiverFramework>>,
    artwork_url: String,
}

impl CastResolver {
    pub fn new(receiver: Option<Arc<dyn ReceiverFramework>>, station: &StationConfig) -> Self {
        Self {
            receiver,
            artwork_url: station.artwork_url.clone(),
        }
    }

    pub fn probe<'a>(&'a self, media: &'a dyn MediaElement) -> CastCapability<'a> {
        if let Some(receiver) = self.receiver.as_deref().filter(|r| r.is_available()) {
            return CastCapability::Receiver(receiver);
        }
        if let Some(remote) = media.remote_playback() {
            return CastCapability::RemotePlayback(remote);
        }
        if let Some(picker) = media.platform_picker() {
            return CastCapability::PlatformPicker(picker);
        }
        CastCapability::Unsupported
    }

    /// Handle one cast request.  The caller pauses local playback when the
    /// outcome asks for it and surfaces the outcome's notice, if any.
    pub async fn resolve(
        &self,
        media: &dyn MediaElement,
        endpoint: &StreamEndpoint,
        track: &TrackInfo,
    ) -> CastOutcome {
        let capability = self.probe(media);
        info!("[cast] using {}", capability.name());

        match capability {
            CastCapability::Receiver(receiver) => {
                let session = match receiver.request_session().await {
                    Ok(session) => session,
                    Err(CastError::Cancelled) => {
                        debug!("[cast] receiver selection cancelled");
                        return CastOutcome::SessionCancelled;
                    }
                    Err(e) => {
                        warn!("[cast] session request failed: {}", e);
                        return CastOutcome::Failed { reason: e.to_string() };
                    }
                };
                let cast_media = CastMedia::new(endpoint, track, &self.artwork_url);
                match session.load_media(&cast_media).await {
                    Ok(()) => CastOutcome::Casting {
                        device: session.device_name(),
                    },
                    Err(e) => {
                        warn!("[cast] receiver could not load the stream: {}", e);
                        CastOutcome::Failed { reason: e.to_string() }
                    }
                }
            }

            CastCapability::RemotePlayback(remote) => {
                // Availability is informational; the prompt is shown regardless
                match remote.watch_availability().await {
                    Ok(available) => debug!("[cast] remote devices available: {}", available),
                    Err(e) => debug!("[cast] availability unknown: {}", e),
                }
                match remote.prompt().await {
                    Ok(()) => CastOutcome::PromptShown,
                    Err(CastError::NoDevices) => CastOutcome::NoDevices,
                    Err(CastError::Cancelled) => CastOutcome::PromptCancelled,
                    Err(e) => {
                        warn!("[cast] remote playback prompt failed: {}", e);
                        CastOutcome::Failed { reason: e.to_string() }
                    }
                }
            }

            CastCapability::PlatformPicker(picker) => match picker.show_picker().await {
                Ok(()) => CastOutcome::PickerShown,
                Err(e) => {
                    warn!("[cast] route picker failed: {}", e);
                    CastOutcome::Failed { reason: e.to_string() }
                }
            },

            CastCapability::Unsupported => CastOutcome::Unsupported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlaybackError;
    use crate::playback::ReadyState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Counters {
        sessions: AtomicUsize,
        prompts: AtomicUsize,
        pickers: AtomicUsize,
    }

    struct FakeReceiver {
        available: bool,
        result: Result<(), CastError>,
        loaded: Arc<Mutex<Option<CastMedia>>>,
        counters: Arc<Counters>,
    }

    struct FakeSession {
        loaded: Arc<Mutex<Option<CastMedia>>>,
    }

    #[async_trait]
    impl ReceiverSession for FakeSession {
        fn device_name(&self) -> Option<String> {
            Some("Living Room".into())
        }

        async fn load_media(&self, media: &CastMedia) -> Result<(), CastError> {
            *self.loaded.lock().unwrap() = Some(media.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl ReceiverFramework for FakeReceiver {
        fn is_available(&self) -> bool {
            self.available
        }

        async fn request_session(&self) -> Result<Box<dyn ReceiverSession>, CastError> {
            self.counters.sessions.fetch_add(1, Ordering::SeqCst);
            self.result.clone()?;
            Ok(Box::new(FakeSession {
                loaded: self.loaded.clone(),
            }))
        }
    }

    struct FakeRemote {
        prompt_result: Result<(), CastError>,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl RemotePlayback for FakeRemote {
        async fn watch_availability(&self) -> Result<bool, CastError> {
            Ok(false)
        }

        async fn prompt(&self) -> Result<(), CastError> {
            self.counters.prompts.fetch_add(1, Ordering::SeqCst);
            self.prompt_result.clone()
        }
    }

    struct FakePicker {
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl PlatformPicker for FakePicker {
        async fn show_picker(&self) -> Result<(), CastError> {
            self.counters.pickers.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Element {
        remote: Option<FakeRemote>,
        picker: Option<FakePicker>,
    }

    #[async_trait]
    impl MediaElement for Element {
        async fn bind(&self, _endpoint: &StreamEndpoint) -> Result<(), PlaybackError> {
            Ok(())
        }
        async fn play(&self) -> Result<(), PlaybackError> {
            Ok(())
        }
        async fn pause(&self) -> Result<(), PlaybackError> {
            Ok(())
        }
        async fn load(&self) -> Result<(), PlaybackError> {
            Ok(())
        }
        async fn set_volume(&self, _volume: f32) -> Result<(), PlaybackError> {
            Ok(())
        }
        async fn ready_state(&self) -> ReadyState {
            ReadyState::HaveEnoughData
        }
        fn remote_playback(&self) -> Option<&dyn RemotePlayback> {
            self.remote.as_ref().map(|r| r as &dyn RemotePlayback)
        }
        fn platform_picker(&self) -> Option<&dyn PlatformPicker> {
            self.picker.as_ref().map(|p| p as &dyn PlatformPicker)
        }
    }

    fn element(counters: &Arc<Counters>, remote: Option<Result<(), CastError>>, picker: bool) -> Element {
        Element {
            remote: remote.map(|prompt_result| FakeRemote {
                prompt_result,
                counters: counters.clone(),
            }),
            picker: picker.then(|| FakePicker {
                counters: counters.clone(),
            }),
        }
    }

    fn receiver(counters: &Arc<Counters>, available: bool, result: Result<(), CastError>) -> FakeReceiver {
        FakeReceiver {
            available,
            result,
            loaded: Arc::new(Mutex::new(None)),
            counters: counters.clone(),
        }
    }

    async fn resolve(resolver: &CastResolver, media: &Element) -> CastOutcome {
        let station = StationConfig::default();
        resolver
            .resolve(
                media,
                &StreamEndpoint::from_station(&station),
                &TrackInfo::new("Los Kjarkas", "Llorando se fue"),
            )
            .await
    }

    #[tokio::test]
    async fn test_receiver_used_exclusively() {
        let counters = Arc::new(Counters::default());
        let fake = receiver(&counters, true, Ok(()));
        let loaded = fake.loaded.clone();
        let resolver = CastResolver::new(Some(Arc::new(fake)), &StationConfig::default());
        let media = element(&counters, Some(Ok(())), true);

        let outcome = resolve(&resolver, &media).await;
        assert_eq!(
            outcome,
            CastOutcome::Casting {
                device: Some("Living Room".into())
            }
        );
        assert!(outcome.pauses_local());
        assert_eq!(counters.sessions.load(Ordering::SeqCst), 1);
        assert_eq!(counters.prompts.load(Ordering::SeqCst), 0);
        assert_eq!(counters.pickers.load(Ordering::SeqCst), 0);

        let sent = loaded.lock().unwrap().clone().unwrap();
        assert_eq!(sent.content_id, StationConfig::default().stream_url);
        assert_eq!(sent.content_type, "audio/mpeg");
        assert_eq!(sent.artist, "Los Kjarkas");
        assert_eq!(sent.images, vec![StationConfig::default().artwork_url]);
    }

    #[tokio::test]
    async fn test_receiver_cancel_is_silent() {
        let counters = Arc::new(Counters::default());
        let resolver = CastResolver::new(
            Some(Arc::new(receiver(&counters, true, Err(CastError::Cancelled)))),
            &StationConfig::default(),
        );
        let media = element(&counters, Some(Ok(())), false);

        let outcome = resolve(&resolver, &media).await;
        assert_eq!(outcome, CastOutcome::SessionCancelled);
        assert!(outcome.notice().is_none());
        assert_eq!(counters.prompts.load(Ordering::SeqCst), 0, "no fallthrough");
    }

    #[tokio::test]
    async fn test_unavailable_receiver_falls_to_remote_playback() {
        let counters = Arc::new(Counters::default());
        let resolver = CastResolver::new(
            Some(Arc::new(receiver(&counters, false, Ok(())))),
            &StationConfig::default(),
        );
        let media = element(&counters, Some(Err(CastError::NoDevices)), true);

        let outcome = resolve(&resolver, &media).await;
        assert_eq!(outcome, CastOutcome::NoDevices);
        assert!(outcome.notice().is_some());
        assert_eq!(counters.sessions.load(Ordering::SeqCst), 0);
        assert_eq!(counters.prompts.load(Ordering::SeqCst), 1);
        assert_eq!(counters.pickers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prompt_cancel_is_silent() {
        let counters = Arc::new(Counters::default());
        let resolver = CastResolver::new(None, &StationConfig::default());
        let media = element(&counters, Some(Err(CastError::Cancelled)), false);

        let outcome = resolve(&resolver, &media).await;
        assert_eq!(outcome, CastOutcome::PromptCancelled);
        assert!(outcome.notice().is_none());
    }

    #[tokio::test]
    async fn test_platform_picker() {
        let counters = Arc::new(Counters::default());
        let resolver = CastResolver::new(None, &StationConfig::default());
        let media = element(&counters, None, true);

        assert_eq!(resolve(&resolver, &media).await, CastOutcome::PickerShown);
        assert_eq!(counters.pickers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsupported() {
        let counters = Arc::new(Counters::default());
        let resolver = CastResolver::new(None, &StationConfig::default());
        let media = element(&counters, None, false);

        let outcome = resolve(&resolver, &media).await;
        assert_eq!(outcome, CastOutcome::Unsupported);
        assert!(outcome.notice().is_some());
    }
}
