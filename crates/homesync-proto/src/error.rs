use thiserror::Error;

/// Failures reported by timeline transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("track index {index} out of range (catalog has {len} tracks)")]
    InvalidTrackIndex { index: usize, len: usize },
    #[error("no tracks available")]
    EmptyCatalog,
}
