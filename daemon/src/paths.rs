/// Data file locations.
///
/// Both files live under %APPDATA%\MuteBackground\:
///   - config.toml  Settings and the remembered process names. Written by the
///                  tray and by the daemon when a process is selected.
///   - status.toml  Written by the daemon, read by the tray.
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "MuteBackground";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the application data directory: %APPDATA%\MuteBackground\
pub fn app_data_dir() -> Result<PathBuf> {
    let appdata = std::env::var_os("APPDATA").context("APPDATA environment variable not set")?;
    Ok(PathBuf::from(appdata).join(APP_DIR_NAME))
}

/// Default config location: %APPDATA%\MuteBackground\config.toml
pub fn config_file_path() -> Result<PathBuf> {
    Ok(app_data_dir()?.join(CONFIG_FILE_NAME))
}

/// The status file sits next to whichever config file is in use, so a
/// `--config` override keeps both together.
pub fn status_file_path(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) => dir.join(STATUS_FILE_NAME),
        None => PathBuf::from(STATUS_FILE_NAME),
    }
}
