//! The authoritative playback clock.
//!
//! Position is never counted up by a timer.  It is derived on demand from the
//! wall-clock time at which the current track (virtually) started:
//!
//! ```text
//!   playing:  position = (now - epoch_start_ms) mod duration_ms
//!   otherwise position = paused_offset_ms
//! ```
//!
//! Because of the modulo, callers must run [`Timeline::advance_if_elapsed`]
//! before reading a position, otherwise a read taken past the end of a track
//! wraps around inside the same track.
//!
//! Every method takes `now` (milliseconds since the Unix epoch) explicitly and
//! the catalog by reference; the timeline itself performs no I/O.

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, Track};
use crate::error::SyncError;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlayState {
    /// Position pinned at 0.
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Outcome of a transition that can legitimately do nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    NotApplied,
}

impl Transition {
    pub fn is_applied(self) -> bool {
        self == Transition::Applied
    }
}

/// Result of a successful auto-advance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    pub from_index: usize,
    pub to_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    epoch_start_ms: u64,
    state: PlayState,
    current_index: usize,
    paused_offset_ms: u64,
}

impl Timeline {
    /// A stopped timeline on the first track.
    pub fn new(now: u64) -> Self {
        Self {
            epoch_start_ms: now,
            state: PlayState::Stopped,
            current_index: 0,
            paused_offset_ms: 0,
        }
    }

    pub fn epoch_start_ms(&self) -> u64 {
        self.epoch_start_ms
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn paused_offset_ms(&self) -> u64 {
        self.paused_offset_ms
    }

    /// The current track, or `EmptyCatalog` for the "no track" sentinel.
    pub fn current_track<'a>(&self, catalog: &'a Catalog) -> Result<&'a Track, SyncError> {
        catalog
            .get(self.current_index)
            .ok_or(SyncError::EmptyCatalog)
    }

    /// Duration of the current track, 0 when there is none.
    pub fn duration_ms(&self, catalog: &Catalog) -> u64 {
        self.current_track(catalog)
            .map(|t| t.duration_ms)
            .unwrap_or(0)
    }

    pub fn position_ms(&self, catalog: &Catalog, now: u64) -> u64 {
        let duration = self.duration_ms(catalog);
        if duration == 0 {
            return 0;
        }
        if self.is_playing() {
            now.saturating_sub(self.epoch_start_ms) % duration
        } else {
            self.paused_offset_ms % duration
        }
    }

    /// Position as a fraction of the track, in `[0, 1)`.
    pub fn position_fraction(&self, catalog: &Catalog, now: u64) -> f64 {
        let duration = self.duration_ms(catalog);
        if duration == 0 {
            return 0.0;
        }
        self.position_ms(catalog, now) as f64 / duration as f64
    }

    pub fn play(&mut self, catalog: &Catalog, now: u64) -> Transition {
        if catalog.is_empty() || self.is_playing() {
            return Transition::NotApplied;
        }
        self.epoch_start_ms = if self.paused_offset_ms > 0 {
            now.saturating_sub(self.paused_offset_ms)
        } else {
            now
        };
        self.state = PlayState::Playing;
        Transition::Applied
    }

    pub fn pause(&mut self, catalog: &Catalog, now: u64) -> Transition {
        if catalog.is_empty() || !self.is_playing() {
            return Transition::NotApplied;
        }
        self.paused_offset_ms = self.position_ms(catalog, now);
        self.state = PlayState::Paused;
        Transition::Applied
    }

    /// Unconditional reset to position 0.  Applies even with no tracks.
    pub fn stop(&mut self, now: u64) -> Transition {
        self.state = PlayState::Stopped;
        self.epoch_start_ms = now;
        self.paused_offset_ms = 0;
        Transition::Applied
    }

    /// Jump to the start of track `index`.  The play state is left alone:
    /// selecting never starts or stops playback by itself.
    pub fn select_track(
        &mut self,
        catalog: &Catalog,
        index: usize,
        now: u64,
    ) -> Result<Transition, SyncError> {
        if catalog.is_empty() {
            return Ok(Transition::NotApplied);
        }
        if index >= catalog.len() {
            return Err(SyncError::InvalidTrackIndex {
                index,
                len: catalog.len(),
            });
        }
        self.current_index = index;
        self.epoch_start_ms = now;
        self.paused_offset_ms = 0;
        Ok(Transition::Applied)
    }

    /// Roll over to the next track once the current one has run out.
    ///
    /// Advances by exactly one track per call, however far past the end of
    /// the track `now` is.
    pub fn advance_if_elapsed(&mut self, catalog: &Catalog, now: u64) -> Option<Advance> {
        if !self.is_playing() || catalog.is_empty() {
            return None;
        }
        let duration = self.duration_ms(catalog);
        if now.saturating_sub(self.epoch_start_ms) < duration {
            return None;
        }
        let from_index = self.current_index;
        self.current_index = (self.current_index + 1) % catalog.len();
        self.epoch_start_ms = now;
        self.paused_offset_ms = 0;
        Some(Advance {
            from_index,
            to_index: self.current_index,
        })
    }
}

/// `m:ss` rendering used in status lines.
pub fn format_time(ms: u64) -> String {
    let total_secs = ms / 1000;
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}
