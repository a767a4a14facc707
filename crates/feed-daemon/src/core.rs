/// SessionCore: single-owner event loop for all mutable session state.
///
/// Every remote call runs in a spawned task that posts its result back as a
/// `SessionEvent`; only this loop writes to the `StateManager`.  Each write is
/// followed by a `BroadcastMessage::StateUpdated`.
///
/// A session is tagged with a generation number.  Ending a session bumps it,
/// so results from requests issued by an earlier session are dropped on
/// arrival rather than cancelled in flight.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use feed_proto::catalog::{LikedSet, ListKind, TrackList};
use feed_proto::config::Config;
use feed_proto::model::{Profile, Track};
use feed_proto::protocol::Command;
use feed_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::client::{RemoteMusicService, ServiceResult};
use crate::liked::{reconcile_with_report, toggle_like, MembershipCheck};
use crate::playback::{apply_poll, play_pause, poll_once, same_view, PollOutcome, TransportOutcome};
use crate::synth::{synthesize_with_report, SynthesisReport};
use crate::BroadcastMessage;

// ── SessionEvent ──────────────────────────────────────────────────────────────

/// Results of the three fetches issued at session start.
#[derive(Debug)]
pub struct InitialFetch {
    pub profile: ServiceResult<Profile>,
    pub top_tracks: ServiceResult<Vec<Track>>,
    pub recently_played: ServiceResult<Vec<Track>>,
}

/// All inputs into the SessionCore loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// A command from the HTTP API or startup.
    Command(Command),
    /// Poll timer fired.
    PollTick,
    LoadingTimeout {
        generation: u64,
    },
    Initialized {
        generation: u64,
        fetch: InitialFetch,
    },
    RecentFetched {
        generation: u64,
        result: ServiceResult<Vec<Track>>,
    },
    Synthesized {
        generation: u64,
        pool: TrackList,
        report: SynthesisReport,
    },
    Reconciled {
        generation: u64,
        /// Toggle sequence number when the pass was issued.
        started_seq: u64,
        check: MembershipCheck,
    },
    LikeToggled {
        generation: u64,
        track_id: String,
        result: ServiceResult<LikedSet>,
    },
    Polled {
        generation: u64,
        /// Playback revision when the poll was issued.
        issued_rev: u64,
        outcome: PollOutcome,
    },
    TransportDone {
        generation: u64,
        track_id: String,
        outcome: TransportOutcome,
    },
    /// Shutdown requested.
    Shutdown,
}

/// A poll result may only be written if no transport command is pending and
/// nothing has written playback since the poll was issued.
pub fn poll_is_stale(issued_rev: u64, current_rev: u64, transport_pending: bool) -> bool {
    transport_pending || issued_rev != current_rev
}

// ── SessionCore ───────────────────────────────────────────────────────────────

pub struct SessionCore<S: RemoteMusicService> {
    config: Config,
    service: Arc<S>,
    state_manager: Arc<StateManager>,
    /// Channel to post task results back into our own event loop.
    event_tx: mpsc::Sender<SessionEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    generation: u64,
    /// true between StartSession and Logout / auth expiry.
    active: bool,
    poll_task: Option<JoinHandle<()>>,
    poll_in_flight: bool,
    transport_pending: bool,
    /// Track ids with a like/unlike request outstanding.
    toggles_in_flight: HashSet<String>,
    /// Toggles that arrived while one for the same id was outstanding.
    queued_toggles: HashMap<String, usize>,
    /// Bumped every time a toggle is issued.
    toggle_seq: u64,
    /// Sequence number of the latest toggle per track id.
    last_toggle: HashMap<String, u64>,
}

impl<S: RemoteMusicService> SessionCore<S> {
    pub fn new(
        config: Config,
        service: Arc<S>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            config,
            service,
            state_manager: Arc::new(StateManager::new()),
            event_tx,
            broadcast_tx,
            generation: 0,
            active: false,
            poll_task: None,
            poll_in_flight: false,
            transport_pending: false,
            toggles_in_flight: HashSet::new(),
            queued_toggles: HashMap::new(),
            toggle_seq: 0,
            last_toggle: HashMap::new(),
        }
    }

    /// Borrow the state manager (for use by the HTTP server).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run the event loop.  Returns when a `Shutdown` event is received or
    /// every sender has gone away.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<SessionEvent>) -> anyhow::Result<()> {
        info!("SessionCore: starting event loop");

        loop {
            match event_rx.recv().await {
                None => {
                    info!("SessionCore: event channel closed, shutting down");
                    break;
                }
                Some(SessionEvent::Shutdown) => {
                    info!("SessionCore: shutdown requested");
                    break;
                }
                Some(evt) => self.handle_event(evt).await,
            }
        }

        self.stop_polling();
        Ok(())
    }

    async fn handle_event(&mut self, evt: SessionEvent) {
        match evt {
            SessionEvent::Command(cmd) => {
                info!("SessionCore: command {:?}", cmd);
                self.handle_command(cmd).await;
            }
            SessionEvent::PollTick => self.on_poll_tick().await,
            SessionEvent::LoadingTimeout { generation } => {
                if generation == self.generation {
                    debug!("SessionCore: loading timeout");
                    self.state_manager.set_loading(false).await;
                    self.notify();
                }
            }
            SessionEvent::Initialized { generation, fetch } => {
                if self.is_current(generation) {
                    self.on_initialized(fetch).await;
                }
            }
            SessionEvent::RecentFetched { generation, result } => {
                if self.is_current(generation) {
                    self.on_recent_fetched(result).await;
                }
            }
            SessionEvent::Synthesized {
                generation,
                pool,
                report,
            } => {
                if self.is_current(generation) {
                    self.on_synthesized(pool, report).await;
                }
            }
            SessionEvent::Reconciled {
                generation,
                started_seq,
                check,
            } => {
                if self.is_current(generation) {
                    self.on_reconciled(started_seq, check).await;
                }
            }
            SessionEvent::LikeToggled {
                generation,
                track_id,
                result,
            } => {
                if self.is_current(generation) {
                    self.on_like_toggled(track_id, result).await;
                }
            }
            SessionEvent::Polled {
                generation,
                issued_rev,
                outcome,
            } => {
                if generation == self.generation {
                    self.poll_in_flight = false;
                }
                if self.is_current(generation) {
                    self.on_polled(issued_rev, outcome).await;
                }
            }
            SessionEvent::TransportDone {
                generation,
                track_id,
                outcome,
            } => {
                if generation == self.generation {
                    self.transport_pending = false;
                }
                if self.is_current(generation) {
                    self.on_transport_done(track_id, outcome).await;
                }
            }
            SessionEvent::Shutdown => {}
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        if self.active && generation == self.generation {
            return true;
        }
        debug!(
            "SessionCore: dropping result for generation {} (current {}, active {})",
            generation, self.generation, self.active
        );
        false
    }

    fn notify(&self) {
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::StartSession => self.start_session().await,
            Command::Logout => {
                if self.active {
                    self.end_session(false).await;
                }
            }
            _ if !self.active => {
                warn!("SessionCore: no active session, ignoring {:?}", cmd);
            }
            Command::Refresh => self.spawn_recent_fetch(),
            Command::ToggleLike { track_id } => self.request_toggle(track_id).await,
            Command::PlayPause { track_id } => self.request_play_pause(track_id).await,
        }
    }

    async fn start_session(&mut self) {
        if self.active {
            info!("SessionCore: restarting session");
            self.end_session(false).await;
        }

        self.generation += 1;
        self.active = true;
        info!("SessionCore: session {} started", self.generation);
        self.state_manager.begin_session().await;
        self.notify();

        self.spawn_initial_fetch();
        self.spawn_loading_timeout();
        self.start_polling();
    }

    /// Stop polling and drop every outstanding request's result.
    async fn end_session(&mut self, auth_expired: bool) {
        info!(
            "SessionCore: session {} ended (auth_expired={})",
            self.generation, auth_expired
        );
        self.active = false;
        self.generation += 1;
        self.stop_polling();
        self.poll_in_flight = false;
        self.transport_pending = false;
        self.toggles_in_flight.clear();
        self.queued_toggles.clear();
        self.last_toggle.clear();

        self.state_manager.end_session(auth_expired).await;
        self.notify();
        if auth_expired {
            let _ = self.broadcast_tx.send(BroadcastMessage::AuthExpired);
        }
    }

    async fn expire_session(&mut self) {
        if self.active {
            error!("SessionCore: credential rejected, ending session");
            self.end_session(true).await;
        }
    }

    // ── initialisation ────────────────────────────────────────────────────────

    fn spawn_initial_fetch(&self) {
        let service = Arc::clone(&self.service);
        let tx = self.event_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let (profile, top_tracks, recently_played) = tokio::join!(
                service.profile(),
                service.top_tracks(TrackList::CAPACITY),
                service.recently_played(TrackList::CAPACITY),
            );
            let fetch = InitialFetch {
                profile,
                top_tracks,
                recently_played,
            };
            let _ = tx.send(SessionEvent::Initialized { generation, fetch }).await;
        });
    }

    fn spawn_loading_timeout(&self) {
        let tx = self.event_tx.clone();
        let generation = self.generation;
        let timeout = Duration::from_secs(self.config.session.loading_timeout_secs);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(SessionEvent::LoadingTimeout { generation }).await;
        });
    }

    async fn on_initialized(&mut self, fetch: InitialFetch) {
        let mut unauthorized = false;

        match fetch.profile {
            Ok(profile) => {
                info!("SessionCore: profile {:?}", profile.display_name);
                self.state_manager.set_profile(profile).await;
            }
            Err(e) => {
                warn!("SessionCore: profile fetch failed: {}", e);
                unauthorized |= e.is_unauthorized();
            }
        }
        match fetch.top_tracks {
            Ok(tracks) => {
                info!("SessionCore: {} top tracks", tracks.len());
                self.state_manager
                    .set_top_tracks(TrackList::new(ListKind::TopTracks, tracks))
                    .await;
            }
            Err(e) => {
                warn!("SessionCore: top tracks fetch failed: {}", e);
                unauthorized |= e.is_unauthorized();
            }
        }
        match fetch.recently_played {
            Ok(tracks) => {
                let list = TrackList::recently_played(tracks);
                info!("SessionCore: {} recently played", list.len());
                self.state_manager.set_recently_played(list).await;
            }
            Err(e) => {
                warn!("SessionCore: recently played fetch failed: {}", e);
                unauthorized |= e.is_unauthorized();
            }
        }

        if unauthorized {
            self.expire_session().await;
            return;
        }

        self.state_manager.set_loading(false).await;
        self.notify();
        self.spawn_synthesis().await;
    }

    async fn spawn_synthesis(&self) {
        let state = self.state_manager.get_state().await;
        let service = Arc::clone(&self.service);
        let tx = self.event_tx.clone();
        let generation = self.generation;
        let feed = self.config.feed.clone();
        tokio::spawn(async move {
            let (pool, report) = synthesize_with_report(
                service.as_ref(),
                &state.top_tracks,
                &state.recently_played,
                &state.liked,
                &state.recommendations,
                &feed,
            )
            .await;
            let _ = tx
                .send(SessionEvent::Synthesized {
                    generation,
                    pool,
                    report,
                })
                .await;
        });
    }

    async fn on_synthesized(&mut self, pool: TrackList, report: SynthesisReport) {
        debug!("SessionCore: synthesis report {:?}", report);
        if report.unauthorized {
            self.expire_session().await;
            return;
        }
        if !report.kept_previous {
            self.state_manager.set_recommendations(pool).await;
            self.notify();
        }
        self.spawn_reconcile().await;
    }

    fn spawn_recent_fetch(&self) {
        let service = Arc::clone(&self.service);
        let tx = self.event_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = service.recently_played(TrackList::CAPACITY).await;
            let _ = tx
                .send(SessionEvent::RecentFetched { generation, result })
                .await;
        });
    }

    async fn on_recent_fetched(&mut self, result: ServiceResult<Vec<Track>>) {
        match result {
            Ok(tracks) => {
                self.state_manager
                    .set_recently_played(TrackList::recently_played(tracks))
                    .await;
                self.notify();
                self.spawn_reconcile().await;
            }
            Err(e) if e.is_unauthorized() => self.expire_session().await,
            Err(e) => warn!("SessionCore: recently played refresh failed: {}", e),
        }
    }

    // ── liked tracks ──────────────────────────────────────────────────────────

    async fn spawn_reconcile(&self) {
        let state = self.state_manager.get_state().await;
        let ids = state.all_track_ids();
        let service = Arc::clone(&self.service);
        let tx = self.event_tx.clone();
        let generation = self.generation;
        let started_seq = self.toggle_seq;
        let batch_size = self.config.feed.effective_batch_size();
        tokio::spawn(async move {
            let (_, check) =
                reconcile_with_report(service.as_ref(), &ids, &state.liked, batch_size).await;
            let _ = tx
                .send(SessionEvent::Reconciled {
                    generation,
                    started_seq,
                    check,
                })
                .await;
        });
    }

    /// Merge confirmed ids into the live set, skipping any id whose toggle
    /// is outstanding or was issued after the pass started.
    async fn on_reconciled(&mut self, started_seq: u64, check: MembershipCheck) {
        if check.unauthorized {
            self.expire_session().await;
            return;
        }

        let live = self.state_manager.liked().await;
        let confirmed: Vec<String> = check
            .confirmed
            .into_iter()
            .filter(|id| {
                !self.toggles_in_flight.contains(id)
                    && self
                        .last_toggle
                        .get(id)
                        .map_or(true, |seq| *seq <= started_seq)
            })
            .collect();
        let merged = live.union(confirmed);
        if merged != live {
            info!("SessionCore: liked set {} -> {}", live.len(), merged.len());
            self.state_manager.set_liked(merged).await;
            self.notify();
        }
    }

    async fn request_toggle(&mut self, track_id: String) {
        if self.toggles_in_flight.contains(&track_id) {
            debug!("SessionCore: toggle for {} queued", track_id);
            *self.queued_toggles.entry(track_id).or_default() += 1;
            return;
        }
        self.spawn_toggle(track_id).await;
    }

    async fn spawn_toggle(&mut self, track_id: String) {
        self.toggle_seq += 1;
        self.last_toggle.insert(track_id.clone(), self.toggle_seq);
        self.toggles_in_flight.insert(track_id.clone());

        let current = self.state_manager.liked().await;
        let service = Arc::clone(&self.service);
        let tx = self.event_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = toggle_like(service.as_ref(), &track_id, &current).await;
            let _ = tx
                .send(SessionEvent::LikeToggled {
                    generation,
                    track_id,
                    result,
                })
                .await;
        });
    }

    async fn on_like_toggled(&mut self, track_id: String, result: ServiceResult<LikedSet>) {
        self.toggles_in_flight.remove(&track_id);

        match result {
            Ok(flipped) => {
                // Only this id's membership comes from the result; the rest of
                // the live set may have moved on since the toggle was issued.
                let live = self.state_manager.liked().await;
                let next = if flipped.contains(&track_id) {
                    live.with(&track_id)
                } else {
                    live.without(&track_id)
                };
                self.state_manager.set_liked(next).await;
                self.notify();
            }
            Err(e) if e.is_unauthorized() => {
                self.expire_session().await;
                return;
            }
            Err(e) => warn!("SessionCore: toggle for {} failed: {}", track_id, e),
        }

        if let Some(count) = self.queued_toggles.get_mut(&track_id) {
            *count -= 1;
            if *count == 0 {
                self.queued_toggles.remove(&track_id);
            }
            self.spawn_toggle(track_id).await;
        }
    }

    // ── playback ──────────────────────────────────────────────────────────────

    fn start_polling(&mut self) {
        self.stop_polling();
        let tx = self.event_tx.clone();
        let period = Duration::from_secs(self.config.playback.poll_interval_secs.max(1));
        self.poll_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(SessionEvent::PollTick).await.is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_polling(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }

    async fn on_poll_tick(&mut self) {
        if !self.active || self.poll_in_flight || self.transport_pending {
            return;
        }
        self.poll_in_flight = true;

        let issued_rev = self.state_manager.playback().await.rev;
        let service = Arc::clone(&self.service);
        let tx = self.event_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let outcome = poll_once(service.as_ref()).await;
            let _ = tx
                .send(SessionEvent::Polled {
                    generation,
                    issued_rev,
                    outcome,
                })
                .await;
        });
    }

    async fn on_polled(&mut self, issued_rev: u64, outcome: PollOutcome) {
        if let PollOutcome::Failed(e) = &outcome {
            if e.is_unauthorized() {
                self.expire_session().await;
                return;
            }
        }

        let state = self.state_manager.get_state().await;
        if poll_is_stale(issued_rev, state.playback.rev, self.transport_pending) {
            debug!(
                "SessionCore: discarding stale poll (issued at rev {}, now {})",
                issued_rev, state.playback.rev
            );
            return;
        }

        let next = apply_poll(&state.playback, &outcome, &state.catalogs());
        if !same_view(&state.playback, &next) {
            debug!(
                "SessionCore: playback {:?} active={}",
                next.current_track_id(),
                next.is_active
            );
            self.state_manager.set_playback(next).await;
            self.notify();
        }
    }

    async fn request_play_pause(&mut self, track_id: String) {
        if self.transport_pending {
            info!("SessionCore: transport command pending, ignoring {}", track_id);
            return;
        }
        let state = self.state_manager.get_state().await;
        let Some(track) = state.find_track(&track_id).cloned() else {
            warn!("SessionCore: play/pause for unknown track {}", track_id);
            return;
        };
        self.transport_pending = true;

        let current = state.playback;
        let service = Arc::clone(&self.service);
        let tx = self.event_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let outcome = play_pause(service.as_ref(), &track, &current).await;
            let _ = tx
                .send(SessionEvent::TransportDone {
                    generation,
                    track_id,
                    outcome,
                })
                .await;
        });
    }

    async fn on_transport_done(&mut self, track_id: String, outcome: TransportOutcome) {
        match outcome {
            TransportOutcome::Applied(next) => {
                self.state_manager.set_playback(next).await;
                self.notify();
            }
            TransportOutcome::OpenExternally { error: Some(e), .. } if e.is_unauthorized() => {
                self.expire_session().await;
            }
            TransportOutcome::OpenExternally { url, reason, .. } => match url {
                Some(url) => {
                    info!("SessionCore: {} handed to web player ({:?})", track_id, reason);
                    let _ = self.broadcast_tx.send(BroadcastMessage::OpenExternal(url));
                }
                None => warn!(
                    "SessionCore: {} cannot be played ({:?}) and has no web link",
                    track_id, reason
                ),
            },
        }
    }
}
