//! Shared types for the HomeSync daemon: configuration, the track catalog,
//! the playback timeline and the wire protocol.

pub mod catalog;
pub mod config;
pub mod error;
pub mod platform;
pub mod protocol;
pub mod timeline;

pub use error::SyncError;
