use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Where tracks come from and how their durations are estimated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    #[serde(default = "platform::music_dir")]
    pub music_dir: PathBuf,
    /// File extensions (without the dot) picked up by the scan.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Bitrate in bits per second used when the real duration can't be read.
    #[serde(default = "default_bitrate")]
    pub default_bitrate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_advance_interval_ms")]
    pub advance_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Start the timeline playing as soon as the daemon is up.
    #[serde(default = "default_autoplay")]
    pub autoplay: bool,
    /// Outbound frames queued per connection before sends start being dropped.
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
}

impl SyncConfig {
    pub fn advance_interval(&self) -> Duration {
        Duration::from_millis(self.advance_interval_ms.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            music_dir: platform::music_dir(),
            extensions: default_extensions(),
            default_bitrate: default_bitrate(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            advance_interval_ms: default_advance_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            autoplay: default_autoplay(),
            client_buffer: default_client_buffer(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3002
}

fn default_extensions() -> Vec<String> {
    vec!["mp3".to_string(), "ogg".to_string()]
}

fn default_bitrate() -> u32 {
    128_000
}

fn default_advance_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_interval_ms() -> u64 {
    5000
}

fn default_autoplay() -> bool {
    true
}

fn default_client_buffer() -> usize {
    64
}

impl Config {
    /// Load the config file, writing the defaults out on first run.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        match std::env::var_os(platform::CONFIG_ENV) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => platform::config_dir().join("config.toml"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            library: LibraryConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.http.port, 3002);
        assert_eq!(config.http.bind_address, "0.0.0.0");
        assert_eq!(config.library.extensions, vec!["mp3", "ogg"]);
        assert_eq!(config.library.default_bitrate, 128_000);
        assert_eq!(config.sync.advance_interval(), Duration::from_secs(1));
        assert_eq!(config.sync.heartbeat_interval(), Duration::from_secs(5));
        assert!(config.sync.autoplay);
        assert!(config.library.music_dir.ends_with("homesync/music"));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
            [http]
            port = 4000

            [sync]
            heartbeat_interval_ms = 2500
            autoplay = false
            "#,
        )
        .unwrap();
        assert_eq!(config.http.port, 4000);
        assert_eq!(config.http.bind_address, "0.0.0.0");
        assert_eq!(config.sync.heartbeat_interval_ms, 2500);
        assert_eq!(config.sync.advance_interval_ms, 1000);
        assert!(!config.sync.autoplay);
        assert_eq!(config.sync.client_buffer, 64);
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let config = Config::from_toml_str("[sync]\nadvance_interval_ms = 0\n").unwrap();
        assert_eq!(config.sync.advance_interval(), Duration::from_millis(1));
    }
}
