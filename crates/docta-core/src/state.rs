use chrono::Utc;
use docta_proto::config::StationConfig;
use docta_proto::protocol::{
    CastOutcome, PlaybackState, StateEvent, StationState, TrackInfo, UserNotice,
};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Shared, in-memory station state.  Nothing here survives a restart.
///
/// Every mutation bumps `rev` and broadcasts `StateEvent::StateUpdated` so
/// listeners can tell when they missed an update.
pub struct StateManager {
    state: Arc<RwLock<StationState>>,
    events: broadcast::Sender<StateEvent>,
}

impl StateManager {
    pub fn new(station: &StationConfig, volume: f32) -> Self {
        let (events, _) = broadcast::channel(100);
        Self::with_sender(station, volume, events)
    }

    /// Build on an existing channel, e.g. one the log layer already feeds.
    pub fn with_sender(
        station: &StationConfig,
        volume: f32,
        events: broadcast::Sender<StateEvent>,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(StationState::new(station, volume))),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<StateEvent> {
        self.events.clone()
    }

    pub async fn get_state(&self) -> StationState {
        self.state.read().await.clone()
    }

    /// Apply `f` under the write lock, bump `rev` and notify listeners.
    pub async fn update<R>(&self, f: impl FnOnce(&mut StationState) -> R) -> R {
        let (result, rev) = {
            let mut state = self.state.write().await;
            let result = f(&mut *state);
            state.rev += 1;
            (result, state.rev)
        };
        // No receivers is fine
        let _ = self.events.send(StateEvent::StateUpdated { rev });
        result
    }

    pub async fn set_playback(&self, playback: PlaybackState) {
        self.update(|s| s.playback = playback).await;
    }

    pub async fn set_volume(&self, volume: f32) {
        self.update(|s| s.volume = volume.clamp(0.0, 1.0)).await;
    }

    /// Replace the track wholesale.  Returns whether it actually changed.
    pub async fn set_track(&self, track: TrackInfo, source: &str) -> bool {
        let changed = self
            .update(|s| {
                s.metadata.updated_at = Some(Utc::now());
                s.metadata.consecutive_failures = 0;
                s.metadata.last_source = Some(source.to_string());
                if s.track == track {
                    false
                } else {
                    s.track = track.clone();
                    true
                }
            })
            .await;
        if changed {
            debug!("track → {} - {}", track.artist, track.title);
            let _ = self.events.send(StateEvent::TrackChanged { track });
        }
        changed
    }

    /// A poll succeeded but carried no title; the current track stays.
    pub async fn mark_metadata_reachable(&self, source: &str) {
        self.update(|s| {
            s.metadata.updated_at = Some(Utc::now());
            s.metadata.consecutive_failures = 0;
            s.metadata.last_source = Some(source.to_string());
        })
        .await;
    }

    /// Count a failed poll.  The current track is deliberately left as is.
    pub async fn record_metadata_failure(&self) -> u32 {
        self.update(|s| {
            s.metadata.consecutive_failures += 1;
            s.metadata.consecutive_failures
        })
        .await
    }

    pub async fn publish_notice(&self, notice: UserNotice) {
        self.update(|s| s.notice = Some(notice.clone())).await;
        let _ = self.events.send(StateEvent::Notice { notice });
    }

    pub async fn set_last_cast(&self, outcome: CastOutcome) {
        self.update(|s| s.last_cast = Some(outcome)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docta_proto::protocol::NoticeKind;

    #[tokio::test]
    async fn test_rev_increments_and_broadcasts() {
        let manager = StateManager::new(&StationConfig::default(), 0.5);
        let mut rx = manager.subscribe();
        let before = manager.get_state().await.rev;

        manager.set_playback(PlaybackState::Playing).await;

        let state = manager.get_state().await;
        assert_eq!(state.rev, before + 1);
        assert_eq!(state.playback, PlaybackState::Playing);
        match rx.recv().await.unwrap() {
            StateEvent::StateUpdated { rev } => assert_eq!(rev, before + 1),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_set_track_reports_changes_only() {
        let manager = StateManager::new(&StationConfig::default(), 0.5);
        let track = TrackInfo::new("Artist", "Song");
        assert!(manager.set_track(track.clone(), "corsproxy").await);
        assert!(!manager.set_track(track, "corsproxy").await);

        let state = manager.get_state().await;
        assert_eq!(state.metadata.last_source.as_deref(), Some("corsproxy"));
        assert!(state.metadata.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_failures_accumulate_and_reset() {
        let manager = StateManager::new(&StationConfig::default(), 0.5);
        assert_eq!(manager.record_metadata_failure().await, 1);
        assert_eq!(manager.record_metadata_failure().await, 2);
        manager.mark_metadata_reachable("allorigins").await;
        assert_eq!(manager.get_state().await.metadata.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_volume_is_clamped() {
        let manager = StateManager::new(&StationConfig::default(), 3.0);
        assert_eq!(manager.get_state().await.volume, 1.0);
        manager.set_volume(-1.0).await;
        assert_eq!(manager.get_state().await.volume, 0.0);
    }

    #[tokio::test]
    async fn test_notice_is_stored_and_broadcast() {
        let manager = StateManager::new(&StationConfig::default(), 0.5);
        let mut rx = manager.subscribe();
        manager
            .publish_notice(UserNotice::new(NoticeKind::PlaybackFailed))
            .await;
        assert_eq!(
            manager.get_state().await.notice.map(|n| n.kind),
            Some(NoticeKind::PlaybackFailed)
        );
        // StateUpdated first, then the notice itself
        assert!(matches!(rx.recv().await.unwrap(), StateEvent::StateUpdated { .. }));
        assert!(matches!(rx.recv().await.unwrap(), StateEvent::Notice { .. }));
    }
}
