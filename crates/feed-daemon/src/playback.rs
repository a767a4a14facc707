//! Playback reconciliation: merging polled remote playback state with
//! locally issued transport commands.
//!
//! Both halves are pure with respect to session state.  `apply_poll` turns a
//! poll result into the next `PlaybackState`; `play_pause` runs the device
//! selection and transport sequence and reports what should be written.
//! Local state is only written after the remote confirmed a command.

use feed_proto::catalog::{find_in, TrackCatalog};
use feed_proto::model::{Device, PlaybackSnapshot, Track};
use feed_proto::protocol::FallbackReason;
use feed_proto::state::PlaybackState;
use tracing::{debug, info, warn};

use crate::client::{RemoteMusicService, ServiceError};

#[derive(Debug)]
pub enum PollOutcome {
    /// 204, or a body without a current item.
    Nothing { device_id: Option<String> },
    Playing(PlaybackSnapshot),
    Failed(ServiceError),
}

pub async fn poll_once<S: RemoteMusicService>(service: &S) -> PollOutcome {
    match service.playback().await {
        Ok(None) => PollOutcome::Nothing { device_id: None },
        Ok(Some(snapshot)) if snapshot.item.is_none() => PollOutcome::Nothing {
            device_id: snapshot.device.and_then(|d| d.id),
        },
        Ok(Some(snapshot)) => PollOutcome::Playing(snapshot),
        Err(e) => {
            debug!("playback poll failed: {}", e);
            PollOutcome::Failed(e)
        }
    }
}

/// Next playback view after a poll.
///
/// The reported item is swapped for the richer local record when any
/// catalog holds it.  The device id is only overwritten when the poll
/// reports one.
pub fn apply_poll(
    current: &PlaybackState,
    outcome: &PollOutcome,
    catalogs: &[&dyn TrackCatalog],
) -> PlaybackState {
    match outcome {
        PollOutcome::Nothing { device_id } => PlaybackState {
            current_track: None,
            is_active: false,
            active_device_id: device_id.clone().or_else(|| current.active_device_id.clone()),
            ..current.clone()
        },
        PollOutcome::Failed(_) => PlaybackState {
            current_track: None,
            is_active: false,
            ..current.clone()
        },
        PollOutcome::Playing(snapshot) => {
            let reported = snapshot.item.as_ref();
            let track = reported.and_then(|item| {
                item.id()
                    .and_then(|id| find_in(catalogs, id))
                    .or(Some(item))
                    .cloned()
            });
            let device_id = snapshot
                .device
                .as_ref()
                .and_then(|d| d.id.clone())
                .or_else(|| current.active_device_id.clone());
            PlaybackState {
                current_track: track,
                is_active: snapshot.is_playing,
                active_device_id: device_id,
                ..current.clone()
            }
        }
    }
}

/// True when two views show the same thing, ignoring bookkeeping.
pub fn same_view(a: &PlaybackState, b: &PlaybackState) -> bool {
    a.current_track == b.current_track
        && a.is_active == b.is_active
        && a.active_device_id == b.active_device_id
}

/// Pick the device to control: the active one, else a computer or phone.
pub fn select_device(devices: &[Device]) -> Option<&Device> {
    let usable = || devices.iter().filter(|d| d.id.is_some());
    usable()
        .find(|d| d.is_active)
        .or_else(|| usable().find(|d| d.is_preferred_class()))
}

#[derive(Debug)]
pub enum TransportOutcome {
    /// The remote accepted the command; write this state.
    Applied(PlaybackState),
    /// Remote control isn't possible; open the track on the web instead.
    /// Playback state stays as it was.
    OpenExternally {
        url: Option<String>,
        reason: FallbackReason,
        error: Option<ServiceError>,
    },
}

impl TransportOutcome {
    fn fallback(track: &Track, reason: FallbackReason, error: Option<ServiceError>) -> Self {
        Self::OpenExternally {
            url: track.web_url().map(str::to_string),
            reason,
            error,
        }
    }
}

/// Toggle playback of `track`: pause it if it is what's playing, otherwise
/// start it on the best available device.
pub async fn play_pause<S: RemoteMusicService>(
    service: &S,
    track: &Track,
    current: &PlaybackState,
) -> TransportOutcome {
    let devices = match service.devices().await {
        Ok(devices) => devices,
        Err(e) => {
            warn!("device listing failed: {}", e);
            return TransportOutcome::fallback(track, FallbackReason::DevicesUnavailable, Some(e));
        }
    };

    let Some(device) = select_device(&devices) else {
        info!("no playback device available; opening {:?} on the web", track.name);
        return TransportOutcome::fallback(track, FallbackReason::NoDevice, None);
    };
    let device_id = device.id.clone().unwrap_or_default();

    if !device.is_active {
        debug!("transferring playback to {} ({})", device.name, device_id);
        if let Err(e) = service.transfer_playback(&device_id).await {
            warn!("transfer to {} failed: {}", device_id, e);
        }
    }

    let is_current = track
        .id()
        .map(|id| current.is_playing_track(id))
        .unwrap_or(false);

    if is_current {
        return match service.pause(Some(&device_id)).await {
            Ok(()) => TransportOutcome::Applied(PlaybackState {
                is_active: false,
                active_device_id: Some(device_id),
                ..current.clone()
            }),
            Err(e) => {
                warn!("pause rejected: {}", e);
                TransportOutcome::fallback(track, FallbackReason::PauseRejected, Some(e))
            }
        };
    }

    match service.play(&track.uri, Some(&device_id)).await {
        Ok(()) => TransportOutcome::Applied(PlaybackState {
            current_track: Some(track.clone()),
            is_active: true,
            active_device_id: Some(device_id),
            ..current.clone()
        }),
        Err(e) => {
            warn!("play rejected: {}", e);
            TransportOutcome::fallback(track, FallbackReason::PlayRejected, Some(e))
        }
    }
}
