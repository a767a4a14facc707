use crate::catalog::{distinct_ids, find_in, LikedSet, ListKind, TrackCatalog, TrackList};
use crate::model::{Profile, Track};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Local view of remote playback.
///
/// `rev` is a monotonically increasing counter bumped on every write, whether
/// the write came from a poll or from a confirmed transport command.  A poll
/// issued at one revision must not overwrite a newer one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaybackState {
    pub rev: u64,
    pub current_track: Option<Track>,
    pub is_active: bool,
    /// Survives polls that don't report a device.
    pub active_device_id: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PlaybackState {
    pub fn current_track_id(&self) -> Option<&str> {
        self.current_track.as_ref().and_then(Track::id)
    }

    /// True when `track_id` is the track currently playing.
    pub fn is_playing_track(&self, track_id: &str) -> bool {
        self.is_active && self.current_track_id() == Some(track_id)
    }
}

/// Everything a session shows: the three lists, the liked set, playback and
/// the profile header.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardState {
    /// Bumped on every change.
    pub rev: u64,
    pub profile: Option<Profile>,
    pub top_tracks: TrackList,
    pub recommendations: TrackList,
    pub recently_played: TrackList,
    pub liked: LikedSet,
    pub playback: PlaybackState,
    /// Initial fetch (or a refresh) still outstanding.
    pub loading: bool,
    /// Playback poll loop running.
    pub polling: bool,
    /// Credential was rejected; the session is over until restarted.
    pub auth_expired: bool,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            rev: 0,
            profile: None,
            top_tracks: TrackList::empty(ListKind::TopTracks),
            recommendations: TrackList::empty(ListKind::Recommendations),
            recently_played: TrackList::empty(ListKind::RecentlyPlayed),
            liked: LikedSet::new(),
            playback: PlaybackState::default(),
            loading: false,
            polling: false,
            auth_expired: false,
        }
    }
}

impl DashboardState {
    /// Catalog lookup order: top tracks, recommendations, recently played.
    pub fn catalogs(&self) -> [&dyn TrackCatalog; 3] {
        [
            &self.top_tracks,
            &self.recommendations,
            &self.recently_played,
        ]
    }

    pub fn find_track(&self, track_id: &str) -> Option<&Track> {
        find_in(&self.catalogs(), track_id)
    }

    /// Distinct ids across all three lists.
    pub fn all_track_ids(&self) -> Vec<String> {
        distinct_ids(&self.catalogs())
    }
}

/// Shared handle to the session state.
///
/// The session core is the only writer; the HTTP API reads snapshots.
pub struct StateManager {
    state: Arc<RwLock<DashboardState>>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(DashboardState::default())),
        }
    }

    pub async fn get_state(&self) -> DashboardState {
        self.state.read().await.clone()
    }

    pub async fn playback(&self) -> PlaybackState {
        self.state.read().await.playback.clone()
    }

    pub async fn liked(&self) -> LikedSet {
        self.state.read().await.liked.clone()
    }

    pub async fn find_track(&self, track_id: &str) -> Option<Track> {
        self.state.read().await.find_track(track_id).cloned()
    }

    /// Start of a new session: clear everything, raise the loading flag.
    pub async fn begin_session(&self) {
        let mut state = self.state.write().await;
        let rev = state.rev + 1;
        let playback_rev = state.playback.rev + 1;
        *state = DashboardState {
            rev,
            loading: true,
            polling: true,
            playback: PlaybackState {
                rev: playback_rev,
                ..PlaybackState::default()
            },
            ..DashboardState::default()
        };
    }

    pub async fn end_session(&self, auth_expired: bool) {
        let mut state = self.state.write().await;
        state.polling = false;
        state.loading = false;
        state.auth_expired = auth_expired;
        state.rev += 1;
    }

    pub async fn set_profile(&self, profile: Profile) {
        let mut state = self.state.write().await;
        state.profile = Some(profile);
        state.rev += 1;
    }

    pub async fn set_top_tracks(&self, tracks: TrackList) {
        let mut state = self.state.write().await;
        state.top_tracks = tracks;
        state.rev += 1;
    }

    pub async fn set_recommendations(&self, tracks: TrackList) {
        let mut state = self.state.write().await;
        state.recommendations = tracks;
        state.rev += 1;
    }

    pub async fn set_recently_played(&self, tracks: TrackList) {
        let mut state = self.state.write().await;
        state.recently_played = tracks;
        state.rev += 1;
    }

    pub async fn set_liked(&self, liked: LikedSet) {
        let mut state = self.state.write().await;
        if state.liked == liked {
            return;
        }
        state.liked = liked;
        state.rev += 1;
    }

    pub async fn set_loading(&self, loading: bool) {
        let mut state = self.state.write().await;
        if state.loading == loading {
            return;
        }
        state.loading = loading;
        state.rev += 1;
    }

    /// Replace the playback view wholesale.  The caller's `rev` is ignored;
    /// the stored revision always advances by one.
    pub async fn set_playback(&self, playback: PlaybackState) -> u64 {
        let mut state = self.state.write().await;
        let rev = state.playback.rev + 1;
        state.playback = PlaybackState {
            rev,
            updated_at: Some(Utc::now()),
            ..playback
        };
        state.rev += 1;
        rev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str) -> Track {
        Track {
            id: Some(id.to_string()),
            ..Track::default()
        }
    }

    #[tokio::test]
    async fn test_set_playback_advances_revision() {
        let manager = StateManager::new();
        let before = manager.playback().await.rev;

        let rev = manager
            .set_playback(PlaybackState {
                rev: 0,
                current_track: Some(track("t1")),
                is_active: true,
                ..PlaybackState::default()
            })
            .await;

        let playback = manager.playback().await;
        assert_eq!(rev, before + 1);
        assert_eq!(playback.rev, rev);
        assert!(playback.is_playing_track("t1"));
        assert!(playback.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_begin_session_resets_lists_but_not_revisions() {
        let manager = StateManager::new();
        manager
            .set_top_tracks(TrackList::new(ListKind::TopTracks, vec![track("t1")]))
            .await;
        manager.set_playback(PlaybackState::default()).await;
        let before = manager.get_state().await;

        manager.begin_session().await;
        let after = manager.get_state().await;
        assert!(after.top_tracks.is_empty());
        assert!(after.loading);
        assert!(after.polling);
        assert!(after.rev > before.rev);
        assert!(after.playback.rev > before.playback.rev);
    }

    #[test]
    fn test_find_track_prefers_top_tracks() {
        let mut top_version = track("t1");
        top_version.name = "top".into();
        let mut recent_version = track("t1");
        recent_version.name = "recent".into();

        let state = DashboardState {
            top_tracks: TrackList::new(ListKind::TopTracks, vec![top_version]),
            recently_played: TrackList::recently_played(vec![recent_version, track("t2")]),
            ..DashboardState::default()
        };
        assert_eq!(state.find_track("t1").map(|t| t.name.as_str()), Some("top"));
        assert_eq!(state.all_track_ids(), vec!["t1", "t2"]);
    }
}
