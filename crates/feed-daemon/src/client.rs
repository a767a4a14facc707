//! Remote Web API client.
//!
//! `RemoteMusicService` is the seam the synthesizer and reconcilers talk to;
//! `WebApiClient` is the reqwest implementation.  Tests substitute a scripted
//! service.

use std::future::Future;
use std::time::Duration;

use feed_proto::config::ApiConfig;
use feed_proto::model::{
    ArtistTopTracks, Device, DeviceList, Paging, PlayHistory, PlaybackSnapshot, Profile, Track,
};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The bearer credential was rejected.  The session cannot recover
    /// without a new token.
    #[error("credential rejected by remote service")]
    Unauthorized,
    /// Typically a playback command without a premium entitlement.
    #[error("remote service refused the request: {0}")]
    Forbidden(String),
    #[error("remote service returned {0}")]
    Status(StatusCode),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ServiceError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// The remote endpoints the session needs.
pub trait RemoteMusicService: Send + Sync + 'static {
    /// `GET /me`
    fn profile(&self) -> impl Future<Output = ServiceResult<Profile>> + Send;

    /// `GET /me/top/tracks?time_range=long_term`
    fn top_tracks(&self, limit: usize) -> impl Future<Output = ServiceResult<Vec<Track>>> + Send;

    /// `GET /artists/{id}/top-tracks?market=..`
    fn artist_top_tracks(
        &self,
        artist_id: &str,
    ) -> impl Future<Output = ServiceResult<Vec<Track>>> + Send;

    /// `GET /me/player/recently-played`, unwrapped to the tracks in play
    /// order.  Repeats are left in.
    fn recently_played(
        &self,
        limit: usize,
    ) -> impl Future<Output = ServiceResult<Vec<Track>>> + Send;

    /// `GET /me/tracks/contains`: one flag per id, in submission order.
    fn saved_tracks_contain(
        &self,
        ids: &[String],
    ) -> impl Future<Output = ServiceResult<Vec<bool>>> + Send;

    /// `PUT /me/tracks`
    fn save_track(&self, track_id: &str) -> impl Future<Output = ServiceResult<()>> + Send;

    /// `DELETE /me/tracks`
    fn remove_saved_track(&self, track_id: &str)
        -> impl Future<Output = ServiceResult<()>> + Send;

    /// `GET /me/player`.  `None` when nothing is playing (204).
    fn playback(&self) -> impl Future<Output = ServiceResult<Option<PlaybackSnapshot>>> + Send;

    /// `GET /me/player/devices`
    fn devices(&self) -> impl Future<Output = ServiceResult<Vec<Device>>> + Send;

    /// `PUT /me/player` without starting playback.
    fn transfer_playback(&self, device_id: &str)
        -> impl Future<Output = ServiceResult<()>> + Send;

    /// `PUT /me/player/play` with a single track uri.
    fn play(
        &self,
        uri: &str,
        device_id: Option<&str>,
    ) -> impl Future<Output = ServiceResult<()>> + Send;

    /// `PUT /me/player/pause`
    fn pause(&self, device_id: Option<&str>) -> impl Future<Output = ServiceResult<()>> + Send;
}

pub struct WebApiClient {
    http: reqwest::Client,
    base_url: String,
    market: String,
    token: String,
}

impl WebApiClient {
    pub fn new(api: &ApiConfig, token: impl Into<String>) -> ServiceResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("tastefeed/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(api.request_timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            http,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            market: api.market.clone(),
            token: token.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    async fn check(response: Response) -> ServiceResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::UNAUTHORIZED => Err(ServiceError::Unauthorized),
            StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                Err(ServiceError::Forbidden(body))
            }
            _ => Err(ServiceError::Status(status)),
        }
    }

    /// GET a JSON body.  `Ok(None)` for 204 or an empty body.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ServiceResult<Option<T>> {
        debug!("GET {}", path);
        let response = self.request(Method::GET, path).query(query).send().await?;
        let response = Self::check(response).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ServiceError::Decode(format!("{}: {}", path, e)))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> ServiceResult<()> {
        debug!("{} {}", method, path);
        let builder = self.request(method, path).query(query);
        // The remote insists on a Content-Length even for bodiless PUTs.
        let builder = match body {
            Some(json) => builder.json(&json),
            None => builder.body(Vec::<u8>::new()),
        };
        Self::check(builder.send().await?).await?;
        Ok(())
    }
}

fn device_query(device_id: Option<&str>) -> Vec<(&str, &str)> {
    device_id.map(|id| vec![("device_id", id)]).unwrap_or_default()
}

impl RemoteMusicService for WebApiClient {
    async fn profile(&self) -> ServiceResult<Profile> {
        self.get_json("/me", &[])
            .await?
            .ok_or_else(|| ServiceError::Decode("/me: empty body".to_string()))
    }

    async fn top_tracks(&self, limit: usize) -> ServiceResult<Vec<Track>> {
        let limit = limit.to_string();
        let page: Option<Paging<Track>> = self
            .get_json(
                "/me/top/tracks",
                &[("limit", limit.as_str()), ("time_range", "long_term")],
            )
            .await?;
        Ok(page.map(|p| p.items).unwrap_or_default())
    }

    async fn artist_top_tracks(&self, artist_id: &str) -> ServiceResult<Vec<Track>> {
        let path = format!("/artists/{}/top-tracks", artist_id);
        let body: Option<ArtistTopTracks> = self
            .get_json(&path, &[("market", self.market.as_str())])
            .await?;
        Ok(body.map(|b| b.tracks).unwrap_or_default())
    }

    async fn recently_played(&self, limit: usize) -> ServiceResult<Vec<Track>> {
        let limit = limit.to_string();
        let page: Option<Paging<PlayHistory>> = self
            .get_json("/me/player/recently-played", &[("limit", limit.as_str())])
            .await?;
        Ok(page
            .map(|p| p.items.into_iter().filter_map(|h| h.track).collect())
            .unwrap_or_default())
    }

    async fn saved_tracks_contain(&self, ids: &[String]) -> ServiceResult<Vec<bool>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.join(",");
        let flags: Option<Vec<bool>> = self
            .get_json("/me/tracks/contains", &[("ids", joined.as_str())])
            .await?;
        Ok(flags.unwrap_or_default())
    }

    async fn save_track(&self, track_id: &str) -> ServiceResult<()> {
        self.send(Method::PUT, "/me/tracks", &[("ids", track_id)], None)
            .await
    }

    async fn remove_saved_track(&self, track_id: &str) -> ServiceResult<()> {
        self.send(Method::DELETE, "/me/tracks", &[("ids", track_id)], None)
            .await
    }

    async fn playback(&self) -> ServiceResult<Option<PlaybackSnapshot>> {
        self.get_json("/me/player", &[]).await
    }

    async fn devices(&self) -> ServiceResult<Vec<Device>> {
        let list: Option<DeviceList> = self.get_json("/me/player/devices", &[]).await?;
        Ok(list.map(|l| l.devices).unwrap_or_default())
    }

    async fn transfer_playback(&self, device_id: &str) -> ServiceResult<()> {
        let body = serde_json::json!({ "device_ids": [device_id], "play": false });
        self.send(Method::PUT, "/me/player", &[], Some(body)).await
    }

    async fn play(&self, uri: &str, device_id: Option<&str>) -> ServiceResult<()> {
        let body = serde_json::json!({ "uris": [uri] });
        self.send(
            Method::PUT,
            "/me/player/play",
            &device_query(device_id),
            Some(body),
        )
        .await
    }

    async fn pause(&self, device_id: Option<&str>) -> ServiceResult<()> {
        self.send(Method::PUT, "/me/player/pause", &device_query(device_id), None)
            .await
    }
}
