//! In-memory copy of the current track's audio file.
//!
//! Files are read on a spawned task and handed back to the core loop as a
//! `SyncEvent::AudioLoaded`, so the loop itself never blocks on disk I/O.

use axum::body::Bytes;
use homesync_proto::catalog::Track;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::SyncEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct AudioPayload {
    pub track_id: usize,
    pub content_type: &'static str,
    pub data: Bytes,
}

#[derive(Default)]
pub struct AudioStore {
    current: Option<AudioPayload>,
    /// Track whose read is in flight.
    pending: Option<usize>,
}

impl AudioStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&AudioPayload> {
        self.current.as_ref()
    }

    /// Start loading `track` unless it is already loaded or loading.
    pub fn request(&mut self, track: &Track, event_tx: &mpsc::Sender<SyncEvent>) {
        if self.current.as_ref().map(|p| p.track_id) == Some(track.id)
            || self.pending == Some(track.id)
        {
            return;
        }
        // Stale audio must never be served for a different track
        self.current = None;
        self.pending = Some(track.id);

        let track_id = track.id;
        let path = track.path.clone();
        let name = track.name.clone();
        let tx = event_tx.clone();
        tokio::spawn(async move {
            match tokio::fs::read(&path).await {
                Ok(data) => {
                    info!("Preloaded: {} ({} KB)", name, data.len() / 1024);
                    let _ = tx
                        .send(SyncEvent::AudioLoaded {
                            track_id,
                            data: Bytes::from(data),
                        })
                        .await;
                }
                Err(e) => {
                    warn!("Error reading audio file {:?}: {}", path, e);
                    let _ = tx.send(SyncEvent::AudioFailed { track_id }).await;
                }
            }
        });
    }

    /// Forget a failed read so the next request for the track tries again.
    pub fn failed(&mut self, track_id: usize) {
        if self.pending == Some(track_id) {
            self.pending = None;
        }
    }

    /// Accept a finished read if it is for the track we are waiting on.
    pub fn loaded(&mut self, track: &Track, data: Bytes) -> bool {
        if self.pending != Some(track.id) {
            return false;
        }
        self.pending = None;
        self.current = Some(AudioPayload {
            track_id: track.id,
            content_type: track.content_type(),
            data,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn track(id: usize, path: PathBuf) -> Track {
        Track {
            id,
            name: format!("t{}", id),
            filename: format!("t{}.mp3", id),
            duration_ms: 1000,
            size_bytes: 3,
            path,
        }
    }

    #[tokio::test]
    async fn test_request_reads_file_and_reports_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("t0.mp3");
        std::fs::write(&path, b"ID3").unwrap();
        let t = track(0, path);

        let (tx, mut rx) = mpsc::channel(4);
        let mut store = AudioStore::new();
        store.request(&t, &tx);
        // A second request for the same track is a no-op
        store.request(&t, &tx);

        let data = match rx.recv().await {
            Some(SyncEvent::AudioLoaded { track_id, data }) => {
                assert_eq!(track_id, 0);
                data
            }
            other => panic!("unexpected event {:?}", other),
        };
        assert!(store.loaded(&t, data));
        let payload = store.current().unwrap();
        assert_eq!(payload.data, Bytes::from_static(b"ID3"));
        assert_eq!(payload.content_type, "audio/mpeg");
    }

    #[tokio::test]
    async fn test_failed_read_is_retried() {
        let (tx, mut rx) = mpsc::channel(4);
        let t = track(0, PathBuf::from("/definitely/not/here.mp3"));
        let mut store = AudioStore::new();

        store.request(&t, &tx);
        match rx.recv().await {
            Some(SyncEvent::AudioFailed { track_id }) => store.failed(track_id),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(store.current().is_none());

        // Not stuck as pending: a new request reads the file again
        store.request(&t, &tx);
        assert!(matches!(
            rx.recv().await,
            Some(SyncEvent::AudioFailed { track_id: 0 })
        ));
    }

    #[tokio::test]
    async fn test_stale_load_is_ignored() {
        let (tx, _rx) = mpsc::channel(4);
        let missing = PathBuf::from("/definitely/not/here.mp3");
        let first = track(0, missing.clone());
        let second = track(1, missing);

        let mut store = AudioStore::new();
        store.request(&first, &tx);
        store.request(&second, &tx);
        assert!(!store.loaded(&first, Bytes::from_static(b"old")));
        assert!(store.current().is_none());
        assert!(store.loaded(&second, Bytes::from_static(b"new")));
        assert_eq!(store.current().unwrap().track_id, 1);
    }
}
