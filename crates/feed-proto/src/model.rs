//! Wire types for the remote Web API.
//!
//! Every struct tolerates missing fields: the remote omits or nulls fields for
//! local files, podcasts and region-restricted items, and a partially filled
//! record is more useful than a failed page.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Track {
    /// Catalog identifier.  `None` for local files and some relinked items.
    pub id: Option<String>,
    pub name: String,
    pub artists: Vec<Artist>,
    pub album: Album,
    /// Popularity score, 0-100.
    pub popularity: u32,
    /// Playable locator (`spotify:track:...`).
    pub uri: String,
    pub external_urls: ExternalUrls,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Artist {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Album {
    pub name: String,
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Image {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ExternalUrls {
    pub spotify: Option<String>,
    /// Links under any other key, ordered by key.
    #[serde(flatten)]
    pub other: BTreeMap<String, String>,
}

impl Track {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Identifier of the first-listed artist.
    pub fn primary_artist_id(&self) -> Option<&str> {
        self.artists
            .first()
            .and_then(|a| a.id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn primary_artist_name(&self) -> Option<&str> {
        self.artists.first().map(|a| a.name.as_str())
    }

    /// Link to the track on the service's own web player, else the link
    /// under the lowest-sorting other key.
    pub fn web_url(&self) -> Option<&str> {
        self.external_urls
            .spotify
            .as_deref()
            .or_else(|| self.external_urls.other.values().next().map(String::as_str))
    }

    pub fn art_url(&self) -> Option<&str> {
        self.album.images.first().map(|i| i.url.as_str())
    }
}

/// `GET /me`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Profile {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub images: Vec<Image>,
}

impl Profile {
    pub fn image_url(&self) -> Option<&str> {
        self.images.first().map(|i| i.url.as_str())
    }
}

/// `GET /me/player/devices` entry.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Device {
    pub id: Option<String>,
    pub name: String,
    /// Device class as reported by the remote, e.g. `Computer`, `Smartphone`,
    /// `Speaker`.
    #[serde(rename = "type")]
    pub device_type: String,
    pub is_active: bool,
}

impl Device {
    /// Computers and phones are the classes that reliably accept transport
    /// commands.
    pub fn is_preferred_class(&self) -> bool {
        self.device_type.eq_ignore_ascii_case("computer")
            || self.device_type.eq_ignore_ascii_case("smartphone")
    }
}

/// `GET /me/player` body (absent on 204).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct PlaybackSnapshot {
    pub device: Option<Device>,
    pub is_playing: bool,
    pub item: Option<Track>,
}

// ── Response envelopes ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Paging<T> {
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ArtistTopTracks {
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PlayHistory {
    pub track: Option<Track>,
    pub played_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DeviceList {
    pub devices: Vec<Device>,
}
