//! Track catalog and the directory loader that fills it.
//!
//! The catalog is built once at startup and never mutated afterwards.  Track
//! ids are sequential and equal to the track's position in the catalog.

use lofty::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::LibraryConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: usize,
    /// Display name: the file name without its extension.
    pub name: String,
    pub filename: String,
    /// Approximate duration, always at least 1 ms.
    pub duration_ms: u64,
    pub size_bytes: u64,
    pub path: PathBuf,
}

impl Track {
    pub fn duration_secs(&self) -> u64 {
        (self.duration_ms + 500) / 1000
    }

    /// Size in megabytes rounded to one decimal.
    pub fn size_mb(&self) -> f64 {
        (self.size_bytes as f64 / 1024.0 / 1024.0 * 10.0).round() / 10.0
    }

    /// MIME type guessed from the file extension.
    pub fn content_type(&self) -> &'static str {
        let ext = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("mp3") => "audio/mpeg",
            Some("ogg") | Some("oga") => "audio/ogg",
            Some("flac") => "audio/flac",
            Some("wav") => "audio/wav",
            Some("m4a") => "audio/mp4",
            _ => "application/octet-stream",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tracks: Vec<Track>,
}

impl Catalog {
    /// Build a catalog, renumbering ids so they match positions.
    pub fn new(tracks: Vec<Track>) -> Self {
        let tracks = tracks
            .into_iter()
            .enumerate()
            .map(|(id, mut t)| {
                t.id = id;
                t.duration_ms = t.duration_ms.max(1);
                t
            })
            .collect();
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn get_by_id(&self, id: usize) -> Option<&Track> {
        // ids are positions, but don't rely on it for lookups
        self.tracks.iter().find(|t| t.id == id)
    }
}

/// Duration estimate from file size, assuming a constant bitrate.
pub fn estimate_duration_ms(size_bytes: u64, bitrate_bps: u32) -> u64 {
    let kbits_per_ms = u64::from(bitrate_bps.max(1000)) / 1000;
    (size_bytes * 8 / kbits_per_ms).max(1)
}

/// Scan `config.music_dir` (non-recursively) for audio files.
///
/// A missing directory is not an error: the daemon starts with an empty
/// catalog and every control operation becomes a no-op.
pub fn load_catalog(config: &LibraryConfig) -> anyhow::Result<Catalog> {
    let dir = &config.music_dir;
    if !dir.is_dir() {
        warn!("Music directory {:?} not found, starting with no tracks", dir);
        return Ok(Catalog::default());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && has_extension(p, &config.extensions))
        .collect();
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut tracks = Vec::with_capacity(paths.len());
    for (id, path) in paths.into_iter().enumerate() {
        let size_bytes = match std::fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(e) => {
                warn!("Skipping {:?}: {}", path, e);
                continue;
            }
        };
        let duration_ms = probe_duration_ms(&path)
            .unwrap_or_else(|| estimate_duration_ms(size_bytes, config.default_bitrate));
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.clone());

        debug!("Track {}: {} ({}s)", id, name, duration_ms / 1000);
        tracks.push(Track {
            id,
            name,
            filename,
            duration_ms,
            size_bytes,
            path,
        });
    }

    let catalog = Catalog::new(tracks);
    if catalog.is_empty() {
        warn!("No music files found in {:?}", dir);
    } else {
        info!("Loaded {} music files from {:?}", catalog.len(), dir);
    }
    Ok(catalog)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

fn probe_duration_ms(path: &Path) -> Option<u64> {
    match lofty::read_from_path(path) {
        Ok(tagged) => {
            let ms = tagged.properties().duration().as_millis() as u64;
            (ms > 0).then_some(ms)
        }
        Err(e) => {
            debug!("Duration probe failed for {:?}: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn track(name: &str, duration_ms: u64) -> Track {
        Track {
            id: 0,
            name: name.to_string(),
            filename: format!("{}.mp3", name),
            duration_ms,
            size_bytes: 0,
            path: PathBuf::from(format!("{}.mp3", name)),
        }
    }

    fn library(dir: &Path) -> LibraryConfig {
        LibraryConfig {
            music_dir: dir.to_path_buf(),
            ..LibraryConfig::default()
        }
    }

    #[test]
    fn test_catalog_renumbers_ids() {
        let catalog = Catalog::new(vec![track("a", 1000), track("b", 0)]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(1).unwrap().id, 1);
        assert_eq!(catalog.get_by_id(1).unwrap().name, "b");
        // zero durations are bumped so modulo arithmetic stays defined
        assert_eq!(catalog.get(1).unwrap().duration_ms, 1);
        assert!(catalog.get_by_id(2).is_none());
    }

    #[test]
    fn test_estimate_duration_at_128kbps() {
        // 16000 bytes = 128000 bits = 1 s at 128 kbps
        assert_eq!(estimate_duration_ms(16_000, 128_000), 1000);
        assert_eq!(estimate_duration_ms(0, 128_000), 1);
    }

    #[test]
    fn test_track_display_helpers() {
        let mut t = track("song", 125_400);
        t.size_bytes = 3 * 1024 * 1024 + 200 * 1024;
        assert_eq!(t.duration_secs(), 125);
        assert_eq!(t.size_mb(), 3.2);
        assert_eq!(t.content_type(), "audio/mpeg");
    }

    #[test]
    fn test_load_catalog_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b-side.OGG"), vec![0u8; 32_000]).unwrap();
        std::fs::write(dir.path().join("a-side.mp3"), vec![0u8; 16_000]).unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"not audio").unwrap();
        std::fs::create_dir(dir.path().join("nested.mp3")).unwrap();

        let catalog = load_catalog(&library(dir.path())).unwrap();
        let names: Vec<_> = catalog.tracks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a-side", "b-side"]);

        // Zero-filled files can't be probed, so the size estimate kicks in
        assert_eq!(catalog.get(0).unwrap().duration_ms, 1000);
        assert_eq!(catalog.get(1).unwrap().duration_ms, 2000);
        assert_eq!(catalog.get(1).unwrap().filename, "b-side.OGG");
        assert_eq!(catalog.get(1).unwrap().content_type(), "audio/ogg");
    }

    #[test]
    fn test_missing_music_dir_is_empty_catalog() {
        let dir = TempDir::new().unwrap();
        let catalog = load_catalog(&library(&dir.path().join("nope"))).unwrap();
        assert!(catalog.is_empty());
    }
}
