use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::event::DaemonEvent;

pub const MIN_POLL_INTERVAL_MS: u64 = 100;
pub const MAX_POLL_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_PAUSE_HOTKEY: &str = "Pause";

/// Persisted settings, stored in %APPDATA%\MuteBackground\config.toml.
///
/// The tray/UI writes this file; the daemon reads it at startup, reloads it on
/// change and writes it back when a process name is added to `history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Executable names the user has selected at least once.
    #[serde(default)]
    pub history: BTreeSet<String>,
    /// Track live processes whose name is in `history` without user action.
    #[serde(default = "default_true")]
    pub auto_match: bool,
    /// Mute only when every window is minimized, instead of whenever the
    /// process is not in the foreground.
    #[serde(default)]
    pub minimize_only: bool,
    /// Exit once the last tracked process has exited.
    #[serde(default)]
    pub auto_close: bool,
    /// Delay between reconciliation ticks. Clamped to [100, 10000] ms.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Key that toggles pause. An unrecognised name (e.g. "") disables it.
    #[serde(default = "default_pause_hotkey")]
    pub pause_hotkey: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history: BTreeSet::new(),
            auto_match: true,
            minimize_only: false,
            auto_close: false,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            pause_hotkey: DEFAULT_PAUSE_HOTKEY.to_string(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS),
        )
    }

    /// Adds `name` to the history. Returns `true` if it was not there yet.
    pub fn remember(&mut self, name: &str) -> bool {
        if self.history.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            return false;
        }
        self.history.insert(name.to_string())
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Writes `config` to `path` as TOML, creating the parent directory if needed.
pub fn save(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))
}

/// Watches the parent directory of `path` and sends `ConfigReloaded` whenever
/// the config file is created or modified and still parses.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "Failed to create config watcher");
            return;
        }
    };

    // The directory rather than the file, so atomic saves (write-new + rename)
    // are seen too.
    let dir = watch_dir(&path);
    if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
        error!(error = %e, dir = %dir.display(), "Failed to watch config directory");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| is_config_file(p, &path));
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            match load_or_default(&path) {
                Ok(config) => {
                    if tx.send(DaemonEvent::ConfigReloaded(config)).await.is_err() {
                        break;
                    }
                }
                // Keep running on the last good config.
                Err(e) => warn!(error = %format!("{e:#}"), "Failed to reload config"),
            }
        }
    }
}

/// Directory holding `path`. A bare file name lives in the working directory.
fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Whether a path reported by the (non-recursive) directory watch is the
/// config file. The watcher may spell the directory differently from
/// `config_path`, e.g. `./config.toml` for `config.toml`.
fn is_config_file(event_path: &Path, config_path: &Path) -> bool {
    event_path.file_name() == config_path.file_name()
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_pause_hotkey() -> String {
    DEFAULT_PAUSE_HOTKEY.to_string()
}
