//! Scripted in-memory stand-in for the remote service.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use feed_proto::model::{Artist, Device, ExternalUrls, PlaybackSnapshot, Profile, Track};
use reqwest::StatusCode;

use crate::client::{RemoteMusicService, ServiceError, ServiceResult};

pub fn track(id: &str, artist: &str, popularity: u32) -> Track {
    Track {
        id: Some(id.to_string()),
        name: format!("Track {id}"),
        artists: vec![Artist {
            id: Some(artist.to_string()),
            name: format!("Artist {artist}"),
        }],
        popularity,
        uri: format!("spotify:track:{id}"),
        external_urls: ExternalUrls {
            spotify: Some(format!("https://open.example/track/{id}")),
            ..ExternalUrls::default()
        },
        ..Track::default()
    }
}

pub fn device(id: &str, device_type: &str, is_active: bool) -> Device {
    Device {
        id: Some(id.to_string()),
        name: format!("Device {id}"),
        device_type: device_type.to_string(),
        is_active,
    }
}

#[derive(Default)]
pub struct MockService {
    profile: Mutex<Option<Profile>>,
    top_tracks: Mutex<Vec<Track>>,
    artist_tracks: Mutex<HashMap<String, Vec<Track>>>,
    failing_artists: Mutex<HashSet<String>>,
    recently_played: Mutex<Vec<Track>>,
    saved: Mutex<HashSet<String>>,
    /// A contains-chunk holding any of these ids fails.
    failing_contains: Mutex<HashSet<String>>,
    contains_batches: Mutex<Vec<usize>>,
    playback: Mutex<Option<PlaybackSnapshot>>,
    devices: Mutex<Vec<Device>>,
    fail_play: AtomicBool,
    fail_pause: AtomicBool,
    fail_mutations: AtomicBool,
    unauthorized: AtomicBool,
    hold_top_tracks: AtomicBool,
    top_tracks_gate: Notify,
    hold_playback: AtomicBool,
    playback_gate: Notify,
    calls: Mutex<Vec<String>>,
}

fn server_error() -> ServiceError {
    ServiceError::Status(StatusCode::INTERNAL_SERVER_ERROR)
}

impl MockService {
    pub fn set_profile(&self, profile: Profile) {
        *self.profile.lock().unwrap() = Some(profile);
    }

    pub fn set_top_tracks(&self, tracks: Vec<Track>) {
        *self.top_tracks.lock().unwrap() = tracks;
    }

    pub fn set_artist_tracks(&self, artist_id: &str, tracks: Vec<Track>) {
        self.artist_tracks
            .lock()
            .unwrap()
            .insert(artist_id.to_string(), tracks);
    }

    pub fn fail_artist(&self, artist_id: &str) {
        self.failing_artists
            .lock()
            .unwrap()
            .insert(artist_id.to_string());
    }

    pub fn set_recently_played(&self, tracks: Vec<Track>) {
        *self.recently_played.lock().unwrap() = tracks;
    }

    pub fn set_saved(&self, ids: &[&str]) {
        let mut saved = self.saved.lock().unwrap();
        saved.extend(ids.iter().map(|s| s.to_string()));
    }

    pub fn is_saved(&self, id: &str) -> bool {
        self.saved.lock().unwrap().contains(id)
    }

    pub fn fail_contains_for(&self, id: &str) {
        self.failing_contains.lock().unwrap().insert(id.to_string());
    }

    pub fn contains_batch_sizes(&self) -> Vec<usize> {
        self.contains_batches.lock().unwrap().clone()
    }

    pub fn set_playback(&self, snapshot: Option<PlaybackSnapshot>) {
        *self.playback.lock().unwrap() = snapshot;
    }

    pub fn set_devices(&self, devices: Vec<Device>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn fail_play(&self) {
        self.fail_play.store(true, Ordering::SeqCst);
    }

    pub fn fail_pause(&self) {
        self.fail_pause.store(true, Ordering::SeqCst);
    }

    pub fn fail_mutations(&self) {
        self.fail_mutations.store(true, Ordering::SeqCst);
    }

    /// Every call from now on answers 401.
    pub fn reject_credential(&self) {
        self.unauthorized.store(true, Ordering::SeqCst);
    }

    /// `top_tracks` blocks until released.
    pub fn hold_top_tracks(&self) {
        self.hold_top_tracks.store(true, Ordering::SeqCst);
    }

    /// `playback` blocks until released, then answers with whatever
    /// snapshot is set at that point.
    pub fn hold_playback(&self) {
        self.hold_playback.store(true, Ordering::SeqCst);
    }

    pub fn release_playback(&self) {
        self.hold_playback.store(false, Ordering::SeqCst);
        self.playback_gate.notify_one();
    }

    /// Calls made so far, in order, excluding membership checks.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) -> ServiceResult<()> {
        self.calls.lock().unwrap().push(call.into());
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(ServiceError::Unauthorized);
        }
        Ok(())
    }
}

impl RemoteMusicService for MockService {
    async fn profile(&self) -> ServiceResult<Profile> {
        self.record("profile")?;
        self.profile.lock().unwrap().clone().ok_or_else(server_error)
    }

    async fn top_tracks(&self, limit: usize) -> ServiceResult<Vec<Track>> {
        self.record("top_tracks")?;
        if self.hold_top_tracks.load(Ordering::SeqCst) {
            self.top_tracks_gate.notified().await;
        }
        let tracks = self.top_tracks.lock().unwrap();
        Ok(tracks.iter().take(limit).cloned().collect())
    }

    async fn artist_top_tracks(&self, artist_id: &str) -> ServiceResult<Vec<Track>> {
        self.record(format!("artist:{artist_id}"))?;
        if self.failing_artists.lock().unwrap().contains(artist_id) {
            return Err(server_error());
        }
        Ok(self
            .artist_tracks
            .lock()
            .unwrap()
            .get(artist_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn recently_played(&self, limit: usize) -> ServiceResult<Vec<Track>> {
        self.record("recently_played")?;
        let tracks = self.recently_played.lock().unwrap();
        Ok(tracks.iter().take(limit).cloned().collect())
    }

    async fn saved_tracks_contain(&self, ids: &[String]) -> ServiceResult<Vec<bool>> {
        self.contains_batches.lock().unwrap().push(ids.len());
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(ServiceError::Unauthorized);
        }
        let failing = self.failing_contains.lock().unwrap();
        if ids.iter().any(|id| failing.contains(id)) {
            return Err(server_error());
        }
        let saved = self.saved.lock().unwrap();
        Ok(ids.iter().map(|id| saved.contains(id)).collect())
    }

    async fn save_track(&self, track_id: &str) -> ServiceResult<()> {
        self.record(format!("save:{track_id}"))?;
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        self.saved.lock().unwrap().insert(track_id.to_string());
        Ok(())
    }

    async fn remove_saved_track(&self, track_id: &str) -> ServiceResult<()> {
        self.record(format!("remove:{track_id}"))?;
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        self.saved.lock().unwrap().remove(track_id);
        Ok(())
    }

    async fn playback(&self) -> ServiceResult<Option<PlaybackSnapshot>> {
        self.record("playback")?;
        if self.hold_playback.load(Ordering::SeqCst) {
            self.playback_gate.notified().await;
        }
        Ok(self.playback.lock().unwrap().clone())
    }

    async fn devices(&self) -> ServiceResult<Vec<Device>> {
        self.record("devices")?;
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn transfer_playback(&self, device_id: &str) -> ServiceResult<()> {
        self.record(format!("transfer:{device_id}"))?;
        for d in self.devices.lock().unwrap().iter_mut() {
            d.is_active = d.id.as_deref() == Some(device_id);
        }
        Ok(())
    }

    async fn play(&self, uri: &str, device_id: Option<&str>) -> ServiceResult<()> {
        self.record(format!("play:{}@{}", uri, device_id.unwrap_or("-")))?;
        if self.fail_play.load(Ordering::SeqCst) {
            return Err(ServiceError::Forbidden("PREMIUM_REQUIRED".into()));
        }
        Ok(())
    }

    async fn pause(&self, device_id: Option<&str>) -> ServiceResult<()> {
        self.record(format!("pause@{}", device_id.unwrap_or("-")))?;
        if self.fail_pause.load(Ordering::SeqCst) {
            return Err(ServiceError::Forbidden("PREMIUM_REQUIRED".into()));
        }
        Ok(())
    }
}
