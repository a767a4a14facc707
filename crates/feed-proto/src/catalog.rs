//! Track lists and the liked-track set held by a session.
//!
//! Both are snapshots: a refetch or a reconciliation pass builds a new value
//! and swaps it in whole.  Nothing here is mutated in place.

use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::sync::Arc;

use crate::model::Track;

/// Which of the three session lists a catalog is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    TopTracks,
    Recommendations,
    RecentlyPlayed,
}

/// Read access shared by every session list.
pub trait TrackCatalog {
    fn kind(&self) -> ListKind;

    fn tracks(&self) -> &[Track];

    fn find(&self, track_id: &str) -> Option<&Track> {
        self.tracks().iter().find(|t| t.id() == Some(track_id))
    }

    fn track_ids(&self) -> Vec<&str> {
        self.tracks().iter().filter_map(Track::id).collect()
    }
}

/// Resolve `track_id` against several catalogs; the first catalog holding it
/// wins.
pub fn find_in<'a>(catalogs: &[&'a dyn TrackCatalog], track_id: &str) -> Option<&'a Track> {
    catalogs.iter().copied().find_map(|c| c.find(track_id))
}

/// Distinct identifiers across `catalogs`, in first-seen order.
pub fn distinct_ids(catalogs: &[&dyn TrackCatalog]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for catalog in catalogs {
        for id in catalog.track_ids() {
            if seen.insert(id) {
                ids.push(id.to_string());
            }
        }
    }
    ids
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackList {
    kind: ListKind,
    tracks: Vec<Track>,
}

impl TrackList {
    pub const CAPACITY: usize = 50;

    pub fn empty(kind: ListKind) -> Self {
        Self {
            kind,
            tracks: Vec::new(),
        }
    }

    /// Build a list, keeping at most `CAPACITY` entries.
    pub fn new(kind: ListKind, mut tracks: Vec<Track>) -> Self {
        tracks.truncate(Self::CAPACITY);
        Self { kind, tracks }
    }

    /// Build the recently-played list.  Replays show up as repeated entries
    /// in the remote history; only the first occurrence of each id is kept.
    pub fn recently_played(tracks: Vec<Track>) -> Self {
        let mut seen = HashSet::new();
        let deduped = tracks
            .into_iter()
            .filter(|t| match t.id() {
                Some(id) => seen.insert(id.to_string()),
                None => true,
            })
            .collect();
        Self::new(ListKind::RecentlyPlayed, deduped)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Track> {
        self.tracks.iter()
    }
}

impl TrackCatalog for TrackList {
    fn kind(&self) -> ListKind {
        self.kind
    }

    fn tracks(&self) -> &[Track] {
        &self.tracks
    }
}

/// Set of track ids the user has saved.
///
/// Cloning is cheap; every change produces a new set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LikedSet(Arc<HashSet<String>>);

impl LikedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.0.contains(track_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn with(&self, track_id: &str) -> Self {
        if self.contains(track_id) {
            return self.clone();
        }
        let mut set = (*self.0).clone();
        set.insert(track_id.to_string());
        Self(Arc::new(set))
    }

    pub fn without(&self, track_id: &str) -> Self {
        if !self.contains(track_id) {
            return self.clone();
        }
        let mut set = (*self.0).clone();
        set.remove(track_id);
        Self(Arc::new(set))
    }

    /// Union with `ids`.  Never drops an existing member.
    pub fn union<I, S>(&self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = (*self.0).clone();
        let before = set.len();
        set.extend(ids.into_iter().map(Into::into));
        if set.len() == before {
            return self.clone();
        }
        Self(Arc::new(set))
    }

    /// Sorted copy of the members, for stable output.
    pub fn to_sorted_vec(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.0.iter().cloned().collect();
        ids.sort();
        ids
    }
}

impl<S: Into<String>> FromIterator<S> for LikedSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(Arc::new(iter.into_iter().map(Into::into).collect()))
    }
}

impl Serialize for LikedSet {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        self.to_sorted_vec().serialize(serializer)
    }
}
