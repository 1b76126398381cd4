/// The per-tick reconciliation state machine.
///
/// A [`Reconciler`] owns the tracked-process registry together with the audio
/// and window backends. Each [`tick`](Reconciler::tick) brings the mute state
/// of every tracked process in line with the configured window policy, calling
/// the backend only when the desired value differs from the last one applied.
///
/// Invariant: a process leaves the registry unmuted. Pausing, untracking and
/// [`restore_all`](Reconciler::restore_all) unmute every process this
/// reconciler muted; a process that exits needs nothing. An unmute that fails
/// is retried on every tick until it succeeds or the process exits.
use std::collections::HashSet;
use tracing::{debug, info, trace, warn};

use crate::audio::AudioSessionBackend;
use crate::config::Config;
use crate::error::BackendError;
use crate::history;
use crate::registry::ProcessAudioRegistry;
use crate::window::{WindowStateResolver, WindowSystem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Active,
    Paused,
}

#[derive(Debug, PartialEq)]
pub enum TickOutcome {
    Continue,
    /// The last tracked process exited with auto-close on. Carries the names
    /// of the processes that ended this tick.
    AutoClose(Vec<String>),
}

pub struct Reconciler<A, W> {
    audio: A,
    windows: WindowStateResolver<W>,
    registry: ProcessAudioRegistry,
    config: Config,
    mode: Mode,
    /// Pids the user untracked by hand; auto-match leaves them alone until
    /// they exit.
    dismissed: HashSet<u32>,
    /// Untracked pids still registered because their unmute failed. The
    /// policy skips them; each tick retries the unmute.
    releasing: HashSet<u32>,
}

impl<A: AudioSessionBackend, W: WindowSystem> Reconciler<A, W> {
    pub fn new(audio: A, windows: W, config: Config) -> Self {
        Self {
            audio,
            windows: WindowStateResolver::new(windows),
            registry: ProcessAudioRegistry::new(),
            config,
            mode: Mode::Active,
            dismissed: HashSet::new(),
            releasing: HashSet::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn registry(&self) -> &ProcessAudioRegistry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    /// Runs one reconciliation pass.
    pub fn tick(&mut self) -> TickOutcome {
        let sessions = match self.audio.enumerate_sessions() {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(error = %err, "Failed to enumerate audio sessions; skipping tick");
                return TickOutcome::Continue;
            }
        };

        let live: HashSet<u32> = sessions.iter().map(|s| s.pid).collect();
        self.dismissed.retain(|pid| live.contains(pid));

        // Auto-match runs while paused too, so a relaunched game is picked up
        // before the user resumes.
        if self.config.auto_match {
            for (pid, name) in
                history::find_new_matches(&sessions, &self.config.history, &self.registry)
            {
                if self.dismissed.contains(&pid) {
                    continue;
                }
                info!(pid, name = %name, "Tracking remembered process");
                self.registry.add(pid, name);
            }
        }

        let mut ended = Vec::new();
        for pid in self.registry.pids() {
            if live.contains(&pid) {
                continue;
            }
            if let Some(gone) = self.registry.remove(pid) {
                info!(pid, name = %gone.name, "Tracked process exited");
                ended.push(gone.name);
            }
        }

        self.releasing.retain(|pid| live.contains(pid));

        if !ended.is_empty() && self.registry.is_empty() && self.config.auto_close {
            return TickOutcome::AutoClose(ended);
        }

        let mut releasing: Vec<u32> = self.releasing.iter().copied().collect();
        releasing.sort_unstable();
        for pid in releasing {
            self.release(pid);
        }

        if self.mode == Mode::Paused {
            // Unmutes that failed when pausing.
            self.restore_all();
            return TickOutcome::Continue;
        }

        let Some(foreground) = self.windows.foreground_pid() else {
            trace!("No foreground window; no decision this tick");
            return TickOutcome::Continue;
        };

        let mut pids = self.registry.pids();
        pids.retain(|pid| !self.releasing.contains(pid));
        pids.sort_unstable();
        for pid in pids {
            let desired = if self.config.minimize_only {
                match self.windows.is_minimized(pid) {
                    Ok(minimized) => minimized,
                    Err(err) => {
                        warn!(pid, error = %err, "Failed to read window state");
                        continue;
                    }
                }
            } else {
                pid != foreground
            };
            self.apply(pid, desired);
        }

        TickOutcome::Continue
    }

    /// Switches to Paused and immediately unmutes everything this reconciler
    /// muted.
    pub fn pause(&mut self) {
        if self.mode == Mode::Paused {
            return;
        }
        self.mode = Mode::Paused;
        info!("Paused");
        self.restore_all();
    }

    /// Switches back to Active. The next tick re-decides every process.
    pub fn resume(&mut self) {
        if self.mode == Mode::Active {
            return;
        }
        self.mode = Mode::Active;
        info!("Resumed");
    }

    pub fn toggle_pause(&mut self) {
        match self.mode {
            Mode::Active => self.pause(),
            Mode::Paused => self.resume(),
        }
    }

    /// Starts tracking `pid` on the user's behalf and remembers its name.
    ///
    /// The name is taken from the live session list, so a pid without an
    /// audio session is rejected.
    pub fn track(&mut self, pid: u32) -> Result<String, BackendError> {
        let sessions = self.audio.enumerate_sessions()?;
        let session = sessions
            .into_iter()
            .find(|s| s.pid == pid)
            .ok_or(BackendError::SessionNotFound(pid))?;

        self.dismissed.remove(&pid);
        self.releasing.remove(&pid);
        if self.registry.add(pid, session.name.clone()) {
            info!(pid, name = %session.name, tracked = self.registry.len(), "Tracking selected process");
        }
        self.config.remember(&session.name);
        Ok(session.name)
    }

    /// Stops tracking `pid`, unmuting it first if it was muted. Returns
    /// `false` if it was not tracked.
    ///
    /// If the unmute fails the pid stays registered, exempt from the policy,
    /// until a later tick manages to unmute it. Either way it is not
    /// auto-matched again while it lives, even if its name is in the history.
    pub fn untrack(&mut self, pid: u32) -> bool {
        if !self.registry.contains(pid) {
            return false;
        }
        self.dismissed.insert(pid);
        self.release(pid);
        true
    }

    /// Unmutes every tracked process whose last applied state is muted.
    /// Processes never muted get no call. Failures stay marked muted so the
    /// next pass retries them.
    pub fn restore_all(&mut self) {
        for pid in self.registry.muted_pids() {
            let _ = self.restore(pid);
        }
    }

    /// Removes an untracked pid once nothing of ours is left muted on it.
    fn release(&mut self, pid: u32) {
        match self.restore(pid) {
            Ok(()) => {
                self.releasing.remove(&pid);
                if let Some(p) = self.registry.remove(pid) {
                    info!(pid, name = %p.name, "Stopped tracking process");
                }
            }
            Err(_) => {
                if self.releasing.insert(pid) {
                    info!(pid, "Untrack deferred until audio is restored");
                }
            }
        }
    }

    /// Unmutes `pid` if we muted it. `Ok` means nothing of ours is left muted.
    fn restore(&mut self, pid: u32) -> Result<(), BackendError> {
        if self.registry.get(pid).and_then(|p| p.last_muted) != Some(true) {
            return Ok(());
        }
        match self.audio.set_mute(pid, false) {
            Ok(()) => {
                self.registry.set_last_muted(pid, false);
                debug!(pid, "Restored audio");
                Ok(())
            }
            // Exited since the last tick; nothing left to unmute.
            Err(BackendError::SessionNotFound(_)) => {
                debug!(pid, "Process gone before restore");
                Ok(())
            }
            Err(err) => {
                warn!(pid, error = %err, "Failed to restore audio");
                Err(err)
            }
        }
    }

    /// Applies `muted` to `pid` unless it is already the last applied value.
    fn apply(&mut self, pid: u32, muted: bool) {
        if self.registry.get(pid).and_then(|p| p.last_muted) == Some(muted) {
            return;
        }
        match self.audio.set_mute(pid, muted) {
            Ok(()) => {
                self.registry.set_last_muted(pid, muted);
                debug!(pid, muted, "Applied mute");
            }
            // last_muted stays as it was so the next tick retries.
            Err(err) => warn!(pid, muted, error = %err, "Failed to set mute"),
        }
    }
}
