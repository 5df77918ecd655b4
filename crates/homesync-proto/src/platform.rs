use std::path::PathBuf;

/// Environment variable that points at an alternative config file.
pub const CONFIG_ENV: &str = "HOMESYNC_CONFIG";

const APP_DIR: &str = "homesync";

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/homesync/ (XDG standard)
    // instead of macOS Application Support for consistency
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        // Portable installs keep their data beside the executable
        if let Some(portable) = beside_exe("data") {
            return portable;
        }

        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Some(portable) = beside_exe("config.toml") {
            if let Some(dir) = portable.parent() {
                return dir.to_path_buf();
            }
        }
    }

    // On macOS and Linux, always use ~/.config/homesync/
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

/// Default location of the music library.
pub fn music_dir() -> PathBuf {
    data_dir().join("music")
}

pub fn log_path() -> PathBuf {
    data_dir().join("daemon.log")
}

#[cfg(windows)]
fn beside_exe(name: &str) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let p = current_exe.parent()?.join(name);
    p.exists().then_some(p)
}
