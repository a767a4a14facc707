//! Recommendation synthesis.
//!
//! Expands the user's top tracks into a candidate pool through the top
//! tracks of their leading artists, removes everything the user already
//! knows, and ranks what is left by popularity.

use std::collections::HashSet;

use feed_proto::catalog::{LikedSet, ListKind, TrackCatalog, TrackList};
use feed_proto::config::FeedConfig;
use feed_proto::model::Track;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::client::RemoteMusicService;
use crate::liked::check_membership;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisReport {
    pub seeds: usize,
    pub failed_seeds: usize,
    /// Candidates after flattening, before any filtering.
    pub raw_candidates: usize,
    /// Candidates surviving the local exclusion set.
    pub after_local_filter: usize,
    /// Candidates surviving the remote liked check.
    pub after_remote_filter: usize,
    pub skipped_liked_chunks: usize,
    /// The previous pool was kept (no top tracks, or every seed failed).
    pub kept_previous: bool,
    pub unauthorized: bool,
}

/// Up to `limit` distinct primary-artist ids from the first `limit` top
/// tracks.
pub fn seed_artists(top: &TrackList, limit: usize) -> Vec<String> {
    let mut seeds: Vec<String> = Vec::new();
    for track in top.iter().take(limit) {
        if let Some(id) = track.primary_artist_id() {
            if !seeds.iter().any(|s| s == id) {
                seeds.push(id.to_string());
            }
        }
    }
    seeds
}

/// Ids that must not appear in a fresh pool.
pub fn exclusion_set(top: &TrackList, recent: &TrackList, liked: &LikedSet) -> HashSet<String> {
    top.track_ids()
        .into_iter()
        .chain(recent.track_ids())
        .chain(liked.iter())
        .map(str::to_string)
        .collect()
}

/// Flatten per-artist batches, dropping id-less tracks, in-batch duplicates
/// (first wins) and excluded ids.
pub fn filter_candidates(batches: Vec<Vec<Track>>, excluded: &HashSet<String>) -> Vec<Track> {
    let mut seen = HashSet::new();
    batches
        .into_iter()
        .flatten()
        .filter(|t| match t.id() {
            Some(id) => seen.insert(id.to_string()) && !excluded.contains(id),
            None => false,
        })
        .collect()
}

/// Stable sort by popularity, highest first, then cap.
pub fn rank(mut candidates: Vec<Track>, capacity: usize) -> Vec<Track> {
    candidates.sort_by(|a, b| b.popularity.cmp(&a.popularity));
    candidates.truncate(capacity.min(TrackList::CAPACITY));
    candidates
}

/// Build a new recommendations list.  Never fails: on total failure the
/// `previous` pool comes back unchanged.
#[cfg(test)]
pub async fn synthesize<S: RemoteMusicService>(
    service: &S,
    top: &TrackList,
    recent: &TrackList,
    liked: &LikedSet,
    previous: &TrackList,
    feed: &FeedConfig,
) -> TrackList {
    synthesize_with_report(service, top, recent, liked, previous, feed)
        .await
        .0
}

pub async fn synthesize_with_report<S: RemoteMusicService>(
    service: &S,
    top: &TrackList,
    recent: &TrackList,
    liked: &LikedSet,
    previous: &TrackList,
    feed: &FeedConfig,
) -> (TrackList, SynthesisReport) {
    let mut report = SynthesisReport::default();

    if top.is_empty() {
        info!("synthesis skipped: no top tracks");
        report.kept_previous = true;
        return (previous.clone(), report);
    }

    let seeds = seed_artists(top, feed.seed_tracks);
    report.seeds = seeds.len();
    if seeds.is_empty() {
        info!("synthesis: top tracks carry no artist ids, pool is empty");
        return (TrackList::empty(ListKind::Recommendations), report);
    }
    debug!("synthesis seeds: {:?}", seeds);

    let results = join_all(seeds.iter().map(|id| service.artist_top_tracks(id))).await;
    let mut batches = Vec::with_capacity(results.len());
    for (seed, result) in seeds.iter().zip(results) {
        match result {
            Ok(tracks) => batches.push(tracks),
            Err(e) => {
                warn!("top tracks for artist {} failed: {}", seed, e);
                report.unauthorized |= e.is_unauthorized();
                report.failed_seeds += 1;
            }
        }
    }

    if report.failed_seeds == seeds.len() {
        warn!("synthesis failed for every seed artist; keeping previous pool");
        report.kept_previous = true;
        return (previous.clone(), report);
    }

    let mut excluded = exclusion_set(top, recent, liked);
    report.raw_candidates = batches.iter().map(Vec::len).sum();
    let candidates = filter_candidates(batches, &excluded);
    report.after_local_filter = candidates.len();

    let ids: Vec<String> = candidates
        .iter()
        .filter_map(Track::id)
        .map(str::to_string)
        .collect();
    let check = check_membership(service, &ids, feed.effective_batch_size()).await;
    report.skipped_liked_chunks = check.failed_chunks;
    report.unauthorized |= check.unauthorized;
    excluded.extend(check.confirmed);

    let candidates: Vec<Track> = candidates
        .into_iter()
        .filter(|t| t.id().map(|id| !excluded.contains(id)).unwrap_or(false))
        .collect();
    report.after_remote_filter = candidates.len();

    let pool = rank(candidates, feed.pool_capacity);
    info!(
        "synthesis: {} seeds ({} failed), {} raw -> {} local -> {} remote ({} chunks skipped) -> {} ranked",
        report.seeds,
        report.failed_seeds,
        report.raw_candidates,
        report.after_local_filter,
        report.after_remote_filter,
        report.skipped_liked_chunks,
        pool.len()
    );

    (TrackList::new(ListKind::Recommendations, pool), report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{track, MockService};

    fn top(tracks: Vec<Track>) -> TrackList {
        TrackList::new(ListKind::TopTracks, tracks)
    }

    fn recent(tracks: Vec<Track>) -> TrackList {
        TrackList::recently_played(tracks)
    }

    fn empty_recs() -> TrackList {
        TrackList::empty(ListKind::Recommendations)
    }

    fn ids(list: &TrackList) -> Vec<&str> {
        list.track_ids()
    }

    #[tokio::test]
    async fn test_single_artist_scenario() {
        let service = MockService::default();
        service.set_artist_tracks(
            "A",
            vec![
                track("T1", "A", 80),
                track("T3", "A", 70),
                track("T4", "A", 95),
            ],
        );
        let top = top(vec![track("T1", "A", 80), track("T2", "A", 90)]);

        let pool = synthesize(
            &service,
            &top,
            &recent(vec![]),
            &LikedSet::new(),
            &empty_recs(),
            &FeedConfig::default(),
        )
        .await;

        assert_eq!(ids(&pool), vec!["T4", "T3"]);
    }

    #[test]
    fn test_seed_artists_dedupe_and_limit() {
        let mut no_artist = track("x", "", 0);
        no_artist.artists.clear();
        let top = top(vec![
            track("1", "A", 0),
            track("2", "B", 0),
            no_artist,
            track("3", "A", 0),
            track("4", "C", 0),
            track("5", "D", 0),
        ]);
        // Only the first five tracks are considered.
        assert_eq!(seed_artists(&top, 5), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_filter_drops_missing_ids_and_duplicates() {
        let mut anonymous = track("", "A", 99);
        anonymous.id = None;
        let excluded: HashSet<String> = ["x".to_string()].into_iter().collect();
        let mut dup = track("a", "B", 1);
        dup.name = "second".into();

        let out = filter_candidates(
            vec![
                vec![track("a", "A", 10), anonymous, track("x", "A", 50)],
                vec![dup, track("b", "B", 20)],
            ],
            &excluded,
        );
        let names: Vec<_> = out.iter().map(|t| (t.id().unwrap(), t.name.as_str())).collect();
        assert_eq!(names, vec![("a", "Track a"), ("b", "Track b")]);
    }

    #[test]
    fn test_rank_is_stable() {
        let ranked = rank(
            vec![
                track("a", "A", 50),
                track("b", "A", 70),
                track("c", "A", 50),
                track("d", "A", 70),
            ],
            50,
        );
        let order: Vec<_> = ranked.iter().filter_map(Track::id).collect();
        assert_eq!(order, vec!["b", "d", "a", "c"]);
    }

    #[tokio::test]
    async fn test_pool_properties() {
        let service = MockService::default();
        for artist in ["A", "B", "C", "D", "E"] {
            let tracks = (0..20)
                .map(|i| track(&format!("{artist}{i}"), artist, (i * 7 % 101) as u32))
                .collect();
            service.set_artist_tracks(artist, tracks);
        }
        // B's catalogue overlaps A's.
        service.set_artist_tracks(
            "B",
            (0..20).map(|i| track(&format!("A{i}"), "B", 60)).collect(),
        );
        let top = top(
            ["A", "B", "C", "D", "E"]
                .iter()
                .enumerate()
                .map(|(i, a)| track(&format!("top{i}"), a, 90))
                .collect(),
        );
        let recent = recent(vec![track("C3", "C", 0), track("C3", "C", 0)]);
        let liked: LikedSet = ["D4"].into_iter().collect();
        service.set_saved(&["E5"]);

        let excluded = {
            let mut e = exclusion_set(&top, &recent, &liked);
            e.insert("E5".to_string());
            e
        };
        let pool = synthesize(
            &service,
            &top,
            &recent,
            &liked,
            &empty_recs(),
            &FeedConfig::default(),
        )
        .await;

        assert!(pool.len() <= TrackList::CAPACITY);
        let ids = pool.track_ids();
        let distinct: HashSet<_> = ids.iter().collect();
        assert_eq!(distinct.len(), ids.len());
        assert!(ids.iter().all(|id| !excluded.contains(*id)));
        assert!(pool
            .tracks()
            .windows(2)
            .all(|w| w[0].popularity >= w[1].popularity));
    }

    #[tokio::test]
    async fn test_remote_liked_candidates_are_excluded() {
        let service = MockService::default();
        service.set_artist_tracks("A", vec![track("n1", "A", 10), track("n2", "A", 20)]);
        service.set_saved(&["n2"]);

        let pool = synthesize(
            &service,
            &top(vec![track("t", "A", 0)]),
            &recent(vec![]),
            &LikedSet::new(),
            &empty_recs(),
            &FeedConfig::default(),
        )
        .await;
        assert_eq!(ids(&pool), vec!["n1"]);
    }

    #[tokio::test]
    async fn test_failed_liked_check_keeps_candidates() {
        let service = MockService::default();
        service.set_artist_tracks("A", vec![track("n1", "A", 10), track("n2", "A", 20)]);
        service.set_saved(&["n2"]);
        service.fail_contains_for("n2");

        let (pool, report) = synthesize_with_report(
            &service,
            &top(vec![track("t", "A", 0)]),
            &recent(vec![]),
            &LikedSet::new(),
            &empty_recs(),
            &FeedConfig::default(),
        )
        .await;
        assert_eq!(ids(&pool), vec!["n2", "n1"]);
        assert_eq!(report.skipped_liked_chunks, 1);
    }

    #[tokio::test]
    async fn test_one_failing_artist_degrades_partially() {
        let service = MockService::default();
        service.set_artist_tracks("A", vec![track("a1", "A", 10)]);
        service.fail_artist("B");

        let (pool, report) = synthesize_with_report(
            &service,
            &top(vec![track("t1", "A", 0), track("t2", "B", 0)]),
            &recent(vec![]),
            &LikedSet::new(),
            &empty_recs(),
            &FeedConfig::default(),
        )
        .await;
        assert_eq!(ids(&pool), vec!["a1"]);
        assert_eq!(report.failed_seeds, 1);
        assert!(!report.kept_previous);
    }

    #[tokio::test]
    async fn test_total_failure_keeps_previous_pool() {
        let service = MockService::default();
        service.fail_artist("A");
        let previous = TrackList::new(ListKind::Recommendations, vec![track("old", "Z", 5)]);

        let (pool, report) = synthesize_with_report(
            &service,
            &top(vec![track("t1", "A", 0)]),
            &recent(vec![]),
            &LikedSet::new(),
            &previous,
            &FeedConfig::default(),
        )
        .await;
        assert_eq!(pool, previous);
        assert!(report.kept_previous);
    }

    #[tokio::test]
    async fn test_empty_top_tracks_keeps_previous_pool() {
        let service = MockService::default();
        let previous = TrackList::new(ListKind::Recommendations, vec![track("old", "Z", 5)]);

        let pool = synthesize(
            &service,
            &top(vec![]),
            &recent(vec![]),
            &LikedSet::new(),
            &previous,
            &FeedConfig::default(),
        )
        .await;
        assert_eq!(pool, previous);
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_seed_artists_gives_empty_pool() {
        let service = MockService::default();
        let mut bare = track("t1", "", 0);
        bare.artists.clear();
        let previous = TrackList::new(ListKind::Recommendations, vec![track("old", "Z", 5)]);

        let pool = synthesize(
            &service,
            &top(vec![bare]),
            &recent(vec![]),
            &LikedSet::new(),
            &previous,
            &FeedConfig::default(),
        )
        .await;
        assert!(pool.is_empty());
    }
}
