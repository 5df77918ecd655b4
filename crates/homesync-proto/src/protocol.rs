//! Wire types shared by the daemon and its clients.
//!
//! WebSocket traffic is JSON text frames tagged by a `type` field, with
//! camelCase field names.  The HTTP control/status API reuses the same
//! conventions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catalog::Track;

/// What a connection says it is.  Only affects the displayed counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Listener,
    Admin,
    /// Also what any unrecognised role string maps to.
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Unknown => "unknown",
            Role::Listener => "listener",
            Role::Admin => "admin",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClientStats {
    pub total: usize,
    pub listeners: usize,
    pub admins: usize,
    pub unknown: usize,
}

/// Messages sent from a client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Inbound {
    Identify {
        /// Absent means listener.
        #[serde(default, alias = "clientType")]
        role: Option<Role>,
    },
    RequestSync,
    GetTrackList,
    GetPlaybackState,
    /// Any tag we don't know about.  Logged and ignored.
    #[serde(other)]
    Unknown,
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackSummary {
    pub id: usize,
    pub name: String,
}

impl From<&Track> for TrackSummary {
    fn from(t: &Track) -> Self {
        Self {
            id: t.id,
            name: t.name.clone(),
        }
    }
}

/// Full timeline state.  Sent as `initial` on connect and as `sync` on the
/// heartbeat; clients treat it as authoritative over their own extrapolation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub track_id: Option<usize>,
    pub track_name: Option<String>,
    pub is_playing: bool,
    pub server_time: u64,
    pub start_time: u64,
    /// Milliseconds into the current track.
    pub current_position: u64,
    pub track_duration: u64,
    pub tracks: Vec<TrackSummary>,
    pub clients: ClientStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackChange {
    pub track_id: Option<usize>,
    pub track_name: Option<String>,
    pub server_time: u64,
    pub start_time: u64,
    pub clients: ClientStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackUpdate {
    pub is_playing: bool,
    pub track_id: Option<usize>,
    pub server_time: u64,
    pub current_position: u64,
    pub start_time: u64,
    pub clients: ClientStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackListing {
    pub id: usize,
    pub name: String,
    #[serde(rename = "sizeMB")]
    pub size_mb: f64,
    pub duration_sec: u64,
}

impl From<&Track> for TrackListing {
    fn from(t: &Track) -> Self {
        Self {
            id: t.id,
            name: t.name.clone(),
            size_mb: t.size_mb(),
            duration_sec: t.duration_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackList {
    pub tracks: Vec<TrackListing>,
    pub clients: ClientStats,
}

/// Messages sent from the daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    Initial(Snapshot),
    Sync(Snapshot),
    TrackChange(TrackChange),
    PlaybackState(PlaybackUpdate),
    Tracks(TrackList),
}

impl Outbound {
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Initial(_) => "initial",
            Outbound::Sync(_) => "sync",
            Outbound::TrackChange(_) => "trackChange",
            Outbound::PlaybackState(_) => "playbackState",
            Outbound::Tracks(_) => "tracks",
        }
    }
}

// ── HTTP control surface ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    #[serde(default)]
    pub track_id: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Play,
    Pause,
    Stop,
    /// `None` when the request carried no `trackId`; rejected by the core.
    Select { track_id: Option<usize> },
}

impl ControlAction {
    /// Pair the `:action` path segment with the request body.
    pub fn parse(action: &str, request: &ControlRequest) -> Result<Self, String> {
        match action.to_ascii_lowercase().as_str() {
            "play" => Ok(ControlAction::Play),
            "pause" => Ok(ControlAction::Pause),
            "stop" => Ok(ControlAction::Stop),
            "select" => Ok(ControlAction::Select {
                track_id: request.track_id,
            }),
            other => Err(format!("Unknown action: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
    pub is_playing: bool,
    /// Name of the current track.
    pub current_track: Option<String>,
    pub current_track_index: usize,
    pub start_time: u64,
    pub clients: ClientStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackInfo {
    pub id: usize,
    pub name: String,
    pub filename: String,
    /// Seconds.
    pub duration: u64,
}

impl From<&Track> for TrackInfo {
    fn from(t: &Track) -> Self {
        Self {
            id: t.id,
            name: t.name.clone(),
            filename: t.filename.clone(),
            duration: t.duration_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub is_playing: bool,
    pub current_track: Option<TrackInfo>,
    pub current_track_index: usize,
    /// Fraction of the current track, `[0, 1)`.
    pub current_position: f64,
    pub current_time_seconds: u64,
    /// Seconds.
    pub paused_position: u64,
    pub start_time: u64,
    pub total_tracks: usize,
    pub clients: ClientStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TracksResponse {
    pub tracks: Vec<TrackInfo>,
    pub current_track_index: usize,
    pub total: usize,
}
