use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, warn};

use crate::config::Config;
use crate::monitor::MonitorSnapshot;
use crate::reconcile::Mode;

/// One tracked process as shown by the tray.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ProcessView {
    pub pid: u32,
    pub name: String,
    pub muted: bool,
}

/// Everything the tray/UI needs to draw itself, written by the daemon to
/// %APPDATA%\MuteBackground\status.toml. The UI reads it and never writes it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DisplayModel {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub paused: bool,
    /// Human-readable policy line, e.g. "Mute when minimized".
    pub policy: String,
    pub auto_match: bool,
    pub auto_close: bool,
    pub history: Vec<String>,
    /// Processes whose exit triggered auto-close, for a farewell message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ended: Vec<String>,
    /// RFC 3339 time at which `ended` was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    // Last: serialized as an array of tables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tracked: Vec<ProcessView>,
}

/// Projects the monitor state and config into the tray's display model.
pub fn render_state(snapshot: &MonitorSnapshot, config: &Config) -> DisplayModel {
    let policy = if config.minimize_only {
        "Mute when minimized"
    } else {
        "Mute when in background"
    };
    DisplayModel {
        version: env!("CARGO_PKG_VERSION").to_string(),
        paused: snapshot.mode == Mode::Paused,
        policy: policy.to_string(),
        auto_match: config.auto_match,
        auto_close: config.auto_close,
        history: config.history.iter().cloned().collect(),
        ended: Vec::new(),
        ended_at: None,
        tracked: snapshot
            .tracked
            .iter()
            .map(|t| ProcessView {
                pid: t.pid,
                name: t.name.clone(),
                muted: t.muted,
            })
            .collect(),
    }
}

impl DisplayModel {
    /// Records the processes whose exit closed the daemon.
    pub fn with_ended(mut self, ended: Vec<String>) -> Self {
        self.ended = ended;
        self.ended_at = Some(chrono::Local::now().to_rfc3339());
        self
    }

    /// One-line summary for the tray tooltip / log.
    pub fn summary(&self) -> String {
        if self.paused {
            return "Paused".to_string();
        }
        match self.tracked.len() {
            0 => "Waiting for a process".to_string(),
            1 => format!("Watching {}", self.tracked[0].name),
            n => format!("Watching {n} processes"),
        }
    }
}

/// Serializes `model` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Failures are logged; a status write never stops the daemon.
pub fn write_status(path: &Path, model: &DisplayModel) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!(error = %e, dir = %parent.display(), "Failed to create status directory");
            return;
        }
    }
    match toml::to_string_pretty(model) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!(error = %e, "Failed to write status file");
            }
        }
        Err(e) => error!(error = %e, "Failed to serialize status"),
    }
}
