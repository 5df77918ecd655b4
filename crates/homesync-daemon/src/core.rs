/// SyncCore: single-owner event loop for the playback timeline.
///
/// Every input (HTTP control calls, WebSocket connects/messages/disconnects,
/// scheduler ticks, finished audio reads) arrives as a `SyncEvent` on one
/// mpsc channel.  SyncCore owns the `Timeline`, the `ClientRegistry` and the
/// `AudioStore` exclusively; nothing else touches them, so every mutation is
/// serialized by construction.
///
/// After each applied mutation SyncCore broadcasts the matching event:
/// `trackChange` for auto-advance and select, `playbackState` for
/// play/pause/stop.  The heartbeat tick broadcasts a full `sync` snapshot.
///
/// Position reads always run the auto-advance check first, so a read taken
/// past the end of a track sees the next track rather than a wrapped
/// position inside the old one.
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use homesync_proto::catalog::Catalog;
use homesync_proto::protocol::{
    ControlAction, ControlResponse, Inbound, Outbound, PlaybackUpdate, Role, Snapshot,
    StatusResponse, TrackChange, TrackInfo, TrackList, TrackListing, TrackSummary,
    TracksResponse,
};
use homesync_proto::timeline::{format_time, now_ms, PlayState, Timeline, Transition};
use homesync_proto::SyncError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::audio::{AudioPayload, AudioStore};
use crate::registry::{ClientId, ClientRegistry, Frame};
use crate::scheduler::Scheduler;

// ── SyncEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the SyncCore loop.
#[derive(Debug)]
pub enum SyncEvent {
    /// Admin control call from the HTTP API.
    Control {
        action: ControlAction,
        reply: oneshot::Sender<ControlResponse>,
    },
    Status {
        reply: oneshot::Sender<StatusResponse>,
    },
    Tracks {
        reply: oneshot::Sender<TracksResponse>,
    },
    CurrentAudio {
        reply: oneshot::Sender<Option<AudioPayload>>,
    },
    ClientConnected {
        id: ClientId,
        peer: Option<SocketAddr>,
        tx: mpsc::Sender<Frame>,
    },
    ClientMessage {
        id: ClientId,
        message: Inbound,
    },
    ClientDisconnected {
        id: ClientId,
    },
    /// Scheduler: check whether the current track has run out.
    AdvanceTick,
    /// Scheduler: rebroadcast the full state.
    HeartbeatTick,
    /// A spawned file read finished.
    AudioLoaded {
        track_id: usize,
        data: Bytes,
    },
    /// A spawned file read failed.
    AudioFailed {
        track_id: usize,
    },
    Shutdown,
}

/// Timer cadence for `SyncCore::run`.
#[derive(Debug, Clone, Copy)]
pub struct Intervals {
    pub advance: Duration,
    pub heartbeat: Duration,
}

// ── SyncCore ──────────────────────────────────────────────────────────────────

pub struct SyncCore {
    catalog: Arc<Catalog>,
    timeline: Timeline,
    registry: ClientRegistry,
    audio: AudioStore,
    /// Used to post finished audio reads back into our own loop.
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncCore {
    pub fn new(catalog: Arc<Catalog>, event_tx: mpsc::Sender<SyncEvent>, now: u64) -> Self {
        Self {
            catalog,
            timeline: Timeline::new(now),
            registry: ClientRegistry::new(),
            audio: AudioStore::new(),
            event_tx,
        }
    }

    /// Start playback at launch, as a freshly booted radio does.
    pub fn autoplay(&mut self, now: u64) {
        if self.timeline.play(&self.catalog, now).is_applied() {
            info!("Radio is PLAYING automatically");
        }
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or every sender has been dropped.
    pub async fn run(
        mut self,
        mut event_rx: mpsc::Receiver<SyncEvent>,
        intervals: Intervals,
    ) -> anyhow::Result<()> {
        info!("SyncCore: starting event loop");
        match self.timeline.current_track(&self.catalog) {
            Ok(track) => {
                info!("Current track: {}", track.name);
                self.audio.request(track, &self.event_tx);
            }
            Err(e) => warn!("SyncCore: {}", e),
        }

        let scheduler = Scheduler::start(
            self.event_tx.clone(),
            intervals.advance,
            intervals.heartbeat,
        );

        while let Some(evt) = event_rx.recv().await {
            if self.handle_event(evt, now_ms()).is_break() {
                break;
            }
        }

        scheduler.shutdown().await;
        self.registry.close_all();
        info!("SyncCore: stopped");
        Ok(())
    }

    pub fn handle_event(&mut self, evt: SyncEvent, now: u64) -> ControlFlow<()> {
        match evt {
            SyncEvent::Shutdown => {
                info!("SyncCore: shutdown requested");
                return ControlFlow::Break(());
            }
            SyncEvent::Control { action, reply } => {
                let response = self.control(action, now);
                let _ = reply.send(response);
            }
            SyncEvent::Status { reply } => {
                let _ = reply.send(self.status(now));
            }
            SyncEvent::Tracks { reply } => {
                let _ = reply.send(self.track_listing());
            }
            SyncEvent::CurrentAudio { reply } => {
                let _ = reply.send(self.audio.current().cloned());
            }
            SyncEvent::ClientConnected { id, peer, tx } => {
                self.on_connect(id, peer, tx, now);
            }
            SyncEvent::ClientMessage { id, message } => {
                self.on_message(id, message, now);
            }
            SyncEvent::ClientDisconnected { id } => {
                self.registry.unregister(id);
            }
            SyncEvent::AdvanceTick => {
                self.refresh(now);
                self.log_status(now);
            }
            SyncEvent::HeartbeatTick => {
                let sync = Outbound::Sync(self.snapshot(now));
                self.registry.broadcast(&sync);
            }
            SyncEvent::AudioLoaded { track_id, data } => {
                let accepted = match self.catalog.get_by_id(track_id) {
                    Some(track) => self.audio.loaded(track, data),
                    None => false,
                };
                if !accepted {
                    debug!("Discarding stale audio for track {}", track_id);
                }
            }
            SyncEvent::AudioFailed { track_id } => {
                self.audio.failed(track_id);
            }
        }
        ControlFlow::Continue(())
    }

    // ── auto-advance ──────────────────────────────────────────────────────────

    /// Run the auto-advance check, broadcasting `trackChange` if it fired.
    /// Returns whether the track changed.
    pub fn refresh(&mut self, now: u64) -> bool {
        let Some(advance) = self.timeline.advance_if_elapsed(&self.catalog, now) else {
            return false;
        };
        let from = self.catalog.get(advance.from_index).map(|t| t.name.as_str());
        let to = self.catalog.get(advance.to_index).map(|t| t.name.as_str());
        info!(
            "Auto-switched: {} -> {}",
            from.unwrap_or("None"),
            to.unwrap_or("None")
        );
        self.on_track_changed(now);
        true
    }

    fn on_track_changed(&mut self, now: u64) {
        if let Ok(track) = self.timeline.current_track(&self.catalog) {
            self.audio.request(track, &self.event_tx);
        }
        let change = Outbound::TrackChange(self.track_change(now));
        self.registry.broadcast(&change);
    }

    // ── control surface ───────────────────────────────────────────────────────

    pub fn control(&mut self, action: ControlAction, now: u64) -> ControlResponse {
        self.refresh(now);

        let (success, message) = match action {
            ControlAction::Stop => {
                let applied = self.timeline.stop(now).is_applied();
                let msg = format!("Radio STOPPED and RESET - Track: {}", self.current_name());
                self.broadcast_playback(now);
                (applied, msg)
            }
            _ if self.catalog.is_empty() => (false, SyncError::EmptyCatalog.to_string()),
            ControlAction::Play => match self.timeline.play(&self.catalog, now) {
                Transition::Applied => {
                    let msg = format!("Radio RESUMED - Now playing: {}", self.current_name());
                    self.broadcast_playback(now);
                    (true, msg)
                }
                Transition::NotApplied => (false, "Radio was already playing".to_string()),
            },
            ControlAction::Pause => match self.timeline.pause(&self.catalog, now) {
                Transition::Applied => {
                    let msg = format!(
                        "Radio PAUSED - Was playing: {} at position {}",
                        self.current_name(),
                        format_time(self.timeline.paused_offset_ms())
                    );
                    self.broadcast_playback(now);
                    (true, msg)
                }
                Transition::NotApplied => (false, "Radio was already paused".to_string()),
            },
            ControlAction::Select { track_id: None } => {
                (false, "Invalid track selection - no trackId".to_string())
            }
            ControlAction::Select {
                track_id: Some(index),
            } => match self.timeline.select_track(&self.catalog, index, now) {
                Ok(Transition::Applied) => {
                    let msg = format!("TRACK SELECTED: {} (ID: {})", self.current_name(), index);
                    self.on_track_changed(now);
                    (true, msg)
                }
                Ok(Transition::NotApplied) => (false, SyncError::EmptyCatalog.to_string()),
                Err(e) => (false, format!("Invalid track selection - {}", e)),
            },
        };

        if success {
            info!("ADMIN ACTION {:?}: {}", action, message);
        } else {
            warn!("ADMIN ACTION {:?}: {}", action, message);
        }

        ControlResponse {
            success,
            message,
            is_playing: self.timeline.is_playing(),
            current_track: self
                .timeline
                .current_track(&self.catalog)
                .ok()
                .map(|t| t.name.clone()),
            current_track_index: self.timeline.current_index(),
            start_time: self.timeline.epoch_start_ms(),
            clients: self.registry.stats(),
        }
    }

    fn current_name(&self) -> String {
        self.timeline
            .current_track(&self.catalog)
            .map(|t| t.name.clone())
            .unwrap_or_else(|_| "None".to_string())
    }

    fn broadcast_playback(&mut self, now: u64) {
        let update = Outbound::PlaybackState(self.playback_update(now));
        self.registry.broadcast(&update);
    }

    // ── clients ───────────────────────────────────────────────────────────────

    fn on_connect(
        &mut self,
        id: ClientId,
        peer: Option<SocketAddr>,
        tx: mpsc::Sender<Frame>,
        now: u64,
    ) {
        self.registry.register(id, peer, tx);
        let initial = Outbound::Initial(self.snapshot(now));
        self.registry.send(id, &initial);

        if let Some(audio) = self.audio.current() {
            info!(
                "Sending audio data to client {}: {} KB",
                id,
                audio.data.len() / 1024
            );
            self.registry.send_frame(id, Frame::Binary(audio.data.clone()));
        }
    }

    fn on_message(&mut self, id: ClientId, message: Inbound, now: u64) {
        let role = self.registry.role(id).unwrap_or_default();
        debug!("Client {} ({}) sent {:?}", id, role, message);
        match message {
            Inbound::Identify { role } => {
                self.registry.identify(id, role.unwrap_or(Role::Listener));
            }
            Inbound::RequestSync => {
                let sync = Outbound::Sync(self.snapshot(now));
                self.registry.send(id, &sync);
            }
            Inbound::GetTrackList => {
                let tracks = Outbound::Tracks(TrackList {
                    tracks: self.catalog.tracks().iter().map(TrackListing::from).collect(),
                    clients: self.registry.stats(),
                });
                self.registry.send(id, &tracks);
            }
            Inbound::GetPlaybackState => {
                let update = Outbound::PlaybackState(self.playback_update(now));
                self.registry.send(id, &update);
            }
            Inbound::Unknown => {
                warn!("Client {} sent a message with an unknown type, ignoring", id);
            }
        }
    }

    // ── state views ───────────────────────────────────────────────────────────

    /// Full state, after running the auto-advance check.
    pub fn snapshot(&mut self, now: u64) -> Snapshot {
        self.refresh(now);
        let track = self.timeline.current_track(&self.catalog).ok();
        Snapshot {
            track_id: track.map(|t| t.id),
            track_name: track.map(|t| t.name.clone()),
            is_playing: self.timeline.is_playing(),
            server_time: now,
            start_time: self.timeline.epoch_start_ms(),
            current_position: self.timeline.position_ms(&self.catalog, now),
            track_duration: self.timeline.duration_ms(&self.catalog),
            tracks: self.catalog.tracks().iter().map(TrackSummary::from).collect(),
            clients: self.registry.stats(),
        }
    }

    fn track_change(&self, now: u64) -> TrackChange {
        let track = self.timeline.current_track(&self.catalog).ok();
        TrackChange {
            track_id: track.map(|t| t.id),
            track_name: track.map(|t| t.name.clone()),
            server_time: now,
            start_time: self.timeline.epoch_start_ms(),
            clients: self.registry.stats(),
        }
    }

    fn playback_update(&mut self, now: u64) -> PlaybackUpdate {
        self.refresh(now);
        PlaybackUpdate {
            is_playing: self.timeline.is_playing(),
            track_id: self.timeline.current_track(&self.catalog).ok().map(|t| t.id),
            server_time: now,
            current_position: self.timeline.position_ms(&self.catalog, now),
            start_time: self.timeline.epoch_start_ms(),
            clients: self.registry.stats(),
        }
    }

    pub fn status(&mut self, now: u64) -> StatusResponse {
        self.refresh(now);
        let position_ms = self.timeline.position_ms(&self.catalog, now);
        StatusResponse {
            is_playing: self.timeline.is_playing(),
            current_track: self
                .timeline
                .current_track(&self.catalog)
                .ok()
                .map(TrackInfo::from),
            current_track_index: self.timeline.current_index(),
            current_position: self.timeline.position_fraction(&self.catalog, now),
            current_time_seconds: round_secs(position_ms),
            paused_position: round_secs(self.timeline.paused_offset_ms()),
            start_time: self.timeline.epoch_start_ms(),
            total_tracks: self.catalog.len(),
            clients: self.registry.stats(),
        }
    }

    pub fn track_listing(&self) -> TracksResponse {
        TracksResponse {
            tracks: self.catalog.tracks().iter().map(TrackInfo::from).collect(),
            current_track_index: self.timeline.current_index(),
            total: self.catalog.len(),
        }
    }

    fn log_status(&self, now: u64) {
        let stats = self.registry.stats();
        let clients = format!(
            "{} clients ({} listeners, {} admins, {} unknown)",
            stats.total, stats.listeners, stats.admins, stats.unknown
        );
        let state = match self.timeline.state() {
            PlayState::Playing => "PLAYING",
            PlayState::Paused => "PAUSED",
            PlayState::Stopped => "STOPPED",
        };
        match self.timeline.current_track(&self.catalog) {
            Ok(track) => {
                let position = self.timeline.position_ms(&self.catalog, now);
                let progress = position as f64 / track.duration_ms as f64 * 100.0;
                debug!(
                    "{} | [{}/{}] {} | {}/{} ({:.1}%) | {}",
                    state,
                    self.timeline.current_index() + 1,
                    self.catalog.len(),
                    track.name,
                    format_time(position),
                    format_time(track.duration_ms),
                    progress,
                    clients
                );
            }
            Err(_) => debug!("{} | NO TRACK LOADED | {}", state, clients),
        }
    }
}

fn round_secs(ms: u64) -> u64 {
    (ms + 500) / 1000
}
