//! Liked-track reconciliation.
//!
//! The local liked set is a cache of the remote "saved" predicate.  A pass
//! asks the remote about every known id in batches and only ever adds what
//! it confirms; a batch that fails leaves its ids exactly as they were.
//! Removal happens through an explicit toggle and nothing else.

use std::collections::HashSet;

use feed_proto::catalog::LikedSet;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::client::{RemoteMusicService, ServiceResult};

/// Result of asking the remote which of a set of ids are saved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MembershipCheck {
    pub confirmed: HashSet<String>,
    pub chunks: usize,
    pub failed_chunks: usize,
    /// At least one chunk failed because the credential was rejected.
    pub unauthorized: bool,
}

/// Query saved-membership for `ids` in chunks of at most `batch_size`,
/// concurrently.  Failed or malformed chunks are skipped.
pub async fn check_membership<S: RemoteMusicService>(
    service: &S,
    ids: &[String],
    batch_size: usize,
) -> MembershipCheck {
    let chunks: Vec<&[String]> = ids.chunks(batch_size.max(1)).collect();
    let results = join_all(chunks.iter().map(|c| service.saved_tracks_contain(c))).await;

    let mut check = MembershipCheck {
        chunks: chunks.len(),
        ..MembershipCheck::default()
    };

    for (chunk, result) in chunks.iter().zip(results) {
        match result {
            Ok(flags) if flags.len() == chunk.len() => {
                check.confirmed.extend(
                    chunk
                        .iter()
                        .zip(flags)
                        .filter(|(_, saved)| *saved)
                        .map(|(id, _)| id.clone()),
                );
            }
            Ok(flags) => {
                warn!(
                    "membership check returned {} flags for {} ids; skipping chunk",
                    flags.len(),
                    chunk.len()
                );
                check.failed_chunks += 1;
            }
            Err(e) => {
                warn!("membership check for {} ids failed: {}", chunk.len(), e);
                check.unauthorized |= e.is_unauthorized();
                check.failed_chunks += 1;
            }
        }
    }

    check
}

/// Refresh `current` against the remote for `all_known_ids`.
///
/// The result is always a superset of `current`.
#[cfg(test)]
pub async fn reconcile<S: RemoteMusicService>(
    service: &S,
    all_known_ids: &[String],
    current: &LikedSet,
    batch_size: usize,
) -> LikedSet {
    reconcile_with_report(service, all_known_ids, current, batch_size)
        .await
        .0
}

pub async fn reconcile_with_report<S: RemoteMusicService>(
    service: &S,
    all_known_ids: &[String],
    current: &LikedSet,
    batch_size: usize,
) -> (LikedSet, MembershipCheck) {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for id in all_known_ids {
        if !id.is_empty() && seen.insert(id.as_str()) {
            ids.push(id.clone());
        }
    }

    if ids.is_empty() {
        return (current.clone(), MembershipCheck::default());
    }

    let check = check_membership(service, &ids, batch_size).await;
    let merged = current.union(check.confirmed.iter().cloned());

    info!(
        "liked reconciliation: {} ids in {} chunks ({} failed), {} confirmed, {} -> {} liked",
        ids.len(),
        check.chunks,
        check.failed_chunks,
        check.confirmed.len(),
        current.len(),
        merged.len()
    );

    (merged, check)
}

/// Flip `track_id`'s saved state on the remote, then locally.
///
/// On failure nothing changes locally.
pub async fn toggle_like<S: RemoteMusicService>(
    service: &S,
    track_id: &str,
    current: &LikedSet,
) -> ServiceResult<LikedSet> {
    if current.contains(track_id) {
        debug!("unliking {}", track_id);
        service.remove_saved_track(track_id).await?;
        Ok(current.without(track_id))
    } else {
        debug!("liking {}", track_id);
        service.save_track(track_id).await?;
        Ok(current.with(track_id))
    }
}
