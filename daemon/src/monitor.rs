/// Runs the reconciler on a dedicated OS thread.
///
/// The thread owns the registry and both backends outright (COM objects must
/// stay on the thread that created them), so the backends are built inside it
/// by a factory closure. Everything else talks to it through [`Command`]s; the
/// inter-tick wait is a `recv_timeout` on that queue, so pause and stop take
/// effect as soon as they arrive instead of after a full tick delay.
///
/// Whatever ends the loop (stop, auto-close, the handle being dropped), the
/// thread unmutes every process it muted before exiting.
use anyhow::{Context, Result};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::audio::AudioSessionBackend;
use crate::config::Config;
use crate::error::BackendError;
use crate::event::DaemonEvent;
use crate::reconcile::{Mode, Reconciler, TickOutcome};
use crate::window::WindowSystem;

#[derive(Debug)]
pub enum Command {
    /// Track a pid chosen by the user.
    Track(u32),
    /// Stop tracking a pid, unmuting it first.
    Untrack(u32),
    Pause,
    Resume,
    TogglePause,
    UpdateConfig(Config),
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntry {
    pub pid: u32,
    pub name: String,
    /// Last applied mute state; `false` until the first decision.
    pub muted: bool,
}

/// Read-only view of the monitor, republished whenever it changes.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSnapshot {
    pub mode: Mode,
    /// Sorted by pid.
    pub tracked: Vec<TrackedEntry>,
}

impl Default for MonitorSnapshot {
    fn default() -> Self {
        Self {
            mode: Mode::Active,
            tracked: Vec::new(),
        }
    }
}

pub struct MonitorHandle {
    commands: std_mpsc::Sender<Command>,
    snapshot: Arc<Mutex<MonitorSnapshot>>,
    thread: JoinHandle<()>,
}

impl MonitorHandle {
    /// Queues `command`. Returns `false` if the monitor has already exited.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        match self.snapshot.lock() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Asks the monitor to stop without waiting for it.
    pub fn request_stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// Blocks until the thread has exited. Call after [`request_stop`] or
    /// once [`DaemonEvent::MonitorStopped`] has been seen, and keep draining
    /// events in between so the thread never blocks on a full channel.
    ///
    /// [`request_stop`]: MonitorHandle::request_stop
    pub fn join(self) {
        if self.thread.join().is_err() {
            error!("Monitor thread panicked");
        }
    }
}

/// Spawns the monitor thread.
///
/// `backends` runs on the new thread and builds the audio and window
/// backends; if it fails the thread reports [`DaemonEvent::MonitorStopped`]
/// and exits. `initial` commands are applied before the first tick.
pub fn start<A, W, F>(
    config: Config,
    initial: Vec<Command>,
    backends: F,
    events: mpsc::Sender<DaemonEvent>,
) -> Result<MonitorHandle>
where
    A: AudioSessionBackend + 'static,
    W: WindowSystem + 'static,
    F: FnOnce() -> Result<(A, W), BackendError> + Send + 'static,
{
    let (tx, rx) = std_mpsc::channel::<Command>();
    for command in initial {
        let _ = tx.send(command);
    }
    let snapshot = Arc::new(Mutex::new(MonitorSnapshot::default()));
    let published = Arc::clone(&snapshot);

    let thread = std::thread::Builder::new()
        .name("mute-monitor".into())
        .spawn(move || {
            let (audio, windows) = match backends() {
                Ok(backends) => backends,
                Err(e) => {
                    error!(error = %e, "Failed to initialise audio/window backends");
                    let _ = events.blocking_send(DaemonEvent::MonitorStopped);
                    return;
                }
            };
            let mut worker = Worker {
                reconciler: Reconciler::new(audio, windows, config),
                commands: rx,
                snapshot: published,
                events,
                last_published: MonitorSnapshot::default(),
            };
            // Dropping the worker restores audio and reports MonitorStopped.
            worker.run();
        })
        .context("Failed to spawn monitor thread")?;

    Ok(MonitorHandle {
        commands: tx,
        snapshot,
        thread,
    })
}

struct Worker<A: AudioSessionBackend, W: WindowSystem> {
    reconciler: Reconciler<A, W>,
    commands: std_mpsc::Receiver<Command>,
    snapshot: Arc<Mutex<MonitorSnapshot>>,
    events: mpsc::Sender<DaemonEvent>,
    last_published: MonitorSnapshot,
}

/// What the loop should do after handling a command.
enum Flow {
    Continue,
    Stop,
}

impl<A: AudioSessionBackend, W: WindowSystem> Worker<A, W> {
    fn run(&mut self) {
        info!("Monitor started");

        // Commands queued before start (e.g. from the command line) apply
        // before the first tick.
        while let Ok(command) = self.commands.try_recv() {
            if let Flow::Stop = self.handle(command) {
                return;
            }
        }

        loop {
            if let TickOutcome::AutoClose(ended) = self.reconciler.tick() {
                info!(ended = ?ended, "All tracked processes ended; closing");
                self.publish();
                let _ = self.events.blocking_send(DaemonEvent::ProcessesEnded(ended));
                return;
            }
            self.publish();

            let deadline = Instant::now() + self.reconciler.config().poll_interval();
            loop {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match self.commands.recv_timeout(timeout) {
                    Ok(command) => {
                        if let Flow::Stop = self.handle(command) {
                            return;
                        }
                        self.publish();
                    }
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        }
    }

    fn handle(&mut self, command: Command) -> Flow {
        match command {
            Command::Track(pid) => match self.reconciler.track(pid) {
                Ok(name) => {
                    let _ = self
                        .events
                        .blocking_send(DaemonEvent::ProcessSelected { pid, name });
                }
                Err(e) => warn!(pid, error = %e, "Cannot track process"),
            },
            Command::Untrack(pid) => {
                if !self.reconciler.untrack(pid) {
                    warn!(pid, "Cannot untrack process that is not tracked");
                }
            }
            Command::Pause => self.reconciler.pause(),
            Command::Resume => self.reconciler.resume(),
            Command::TogglePause => self.reconciler.toggle_pause(),
            Command::UpdateConfig(config) => self.reconciler.set_config(config),
            Command::Stop => return Flow::Stop,
        }
        Flow::Continue
    }

    fn publish(&mut self) {
        let mut tracked: Vec<TrackedEntry> = self
            .reconciler
            .registry()
            .all()
            .map(|p| TrackedEntry {
                pid: p.pid,
                name: p.name.clone(),
                muted: p.last_muted.unwrap_or(false),
            })
            .collect();
        tracked.sort_by_key(|e| e.pid);
        let current = MonitorSnapshot {
            mode: self.reconciler.mode(),
            tracked,
        };
        if current == self.last_published {
            return;
        }

        match self.snapshot.lock() {
            Ok(mut s) => *s = current.clone(),
            Err(poisoned) => *poisoned.into_inner() = current.clone(),
        }
        self.last_published = current.clone();
        let _ = self.events.blocking_send(DaemonEvent::StateChanged(current));
    }
}

/// Restores audio however the loop ends, including a panic inside a tick.
impl<A: AudioSessionBackend, W: WindowSystem> Drop for Worker<A, W> {
    fn drop(&mut self) {
        self.reconciler.restore_all();
        self.publish();
        info!("Monitor stopped; audio restored");
        let _ = self.events.blocking_send(DaemonEvent::MonitorStopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeAudio, FakeWindows};
    use std::time::Duration;

    fn config(history: &[&str], poll_interval_ms: u64) -> Config {
        Config {
            history: history.iter().map(|n| n.to_string()).collect(),
            poll_interval_ms,
            ..Config::default()
        }
    }

    fn spawn(
        audio: &FakeAudio,
        windows: &FakeWindows,
        config: Config,
        initial: Vec<Command>,
    ) -> (MonitorHandle, mpsc::Receiver<DaemonEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let (a, w) = (audio.clone(), windows.clone());
        let handle = start(config, initial, move || Ok((a, w)), tx).unwrap();
        (handle, rx)
    }

    fn stop(handle: MonitorHandle) {
        handle.request_stop();
        handle.join();
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    /// Drains events until one matches `pred`.
    fn wait_for_event(
        rx: &mut mpsc::Receiver<DaemonEvent>,
        mut pred: impl FnMut(&DaemonEvent) -> bool,
    ) -> bool {
        wait_until(|| {
            while let Ok(event) = rx.try_recv() {
                if pred(&event) {
                    return true;
                }
            }
            false
        })
    }

    #[test]
    fn stop_restores_muted_processes() {
        let audio = FakeAudio::with_sessions(&[(1, "a.exe"), (2, "b.exe")]);
        let windows = FakeWindows::new();
        windows.focus(Some(2));
        let (handle, _rx) = spawn(&audio, &windows, config(&["a.exe", "b.exe"], 100), vec![]);

        assert!(wait_until(|| handle.snapshot().tracked.iter().any(|e| e.muted)));
        stop(handle);

        assert_eq!(audio.calls_for(1), vec![true, false]);
        assert_eq!(audio.calls_for(2), vec![false]);
    }

    #[test]
    fn pause_is_applied_without_waiting_for_the_next_tick() {
        let audio = FakeAudio::with_sessions(&[(1, "a.exe")]);
        let windows = FakeWindows::new();
        windows.focus(Some(9));
        // Longest allowed interval: only the first tick runs during this test.
        let (handle, _rx) = spawn(&audio, &windows, config(&["a.exe"], 10_000), vec![]);
        assert!(wait_until(|| audio.calls_for(1) == vec![true]));

        let sent = Instant::now();
        handle.send(Command::Pause);
        assert!(wait_until(|| audio.calls_for(1) == vec![true, false]));
        assert!(sent.elapsed() < Duration::from_secs(2));
        assert_eq!(handle.snapshot().mode, Mode::Paused);

        stop(handle);
        // Already unmuted by the pause; shutdown has nothing to do.
        assert_eq!(audio.calls_for(1), vec![true, false]);
    }

    #[test]
    fn stop_interrupts_the_inter_tick_wait() {
        let audio = FakeAudio::new();
        let windows = FakeWindows::new();
        let (handle, mut rx) = spawn(&audio, &windows, config(&[], 10_000), vec![]);

        let sent = Instant::now();
        handle.request_stop();
        assert!(wait_for_event(&mut rx, |e| matches!(e, DaemonEvent::MonitorStopped)));
        assert!(sent.elapsed() < Duration::from_secs(2));
        handle.join();
    }

    #[test]
    fn auto_close_reports_ended_processes() {
        let audio = FakeAudio::with_sessions(&[(7, "game.exe")]);
        let windows = FakeWindows::new();
        windows.focus(Some(9));
        let cfg = Config { auto_close: true, ..config(&["game.exe"], 100) };
        let (handle, mut rx) = spawn(&audio, &windows, cfg, vec![]);
        assert!(wait_until(|| audio.calls_for(7) == vec![true]));

        audio.exit(7);
        let mut ended = Vec::new();
        assert!(wait_for_event(&mut rx, |e| match e {
            DaemonEvent::ProcessesEnded(names) => {
                ended = names.clone();
                true
            }
            _ => false,
        }));
        assert_eq!(ended, vec!["game.exe".to_string()]);
        assert!(wait_for_event(&mut rx, |e| matches!(e, DaemonEvent::MonitorStopped)));
        handle.join();

        // The process was gone; nothing to restore.
        assert_eq!(audio.calls_for(7), vec![true]);
    }

    #[test]
    fn initial_track_command_reports_selection() {
        let audio = FakeAudio::with_sessions(&[(5, "novel.exe")]);
        let windows = FakeWindows::new();
        let (handle, mut rx) = spawn(&audio, &windows, config(&[], 100), vec![Command::Track(5)]);

        let mut selected = None;
        assert!(wait_for_event(&mut rx, |e| match e {
            DaemonEvent::ProcessSelected { pid, name } => {
                selected = Some((*pid, name.clone()));
                true
            }
            _ => false,
        }));
        assert_eq!(selected, Some((5, "novel.exe".to_string())));
        assert!(wait_until(|| handle.snapshot().tracked.len() == 1));
        stop(handle);
    }

    #[test]
    fn state_changes_are_published_as_events() {
        let audio = FakeAudio::with_sessions(&[(1, "a.exe")]);
        let windows = FakeWindows::new();
        windows.focus(Some(9));
        let (handle, mut rx) = spawn(&audio, &windows, config(&["a.exe"], 100), vec![]);

        assert!(wait_for_event(&mut rx, |e| matches!(
            e,
            DaemonEvent::StateChanged(s) if s.tracked.first().is_some_and(|t| t.muted)
        )));
        handle.send(Command::TogglePause);
        assert!(wait_for_event(&mut rx, |e| matches!(
            e,
            DaemonEvent::StateChanged(s) if s.mode == Mode::Paused
        )));
        stop(handle);
    }

    #[test]
    fn untrack_unmutes_and_keeps_auto_match_away() {
        let audio = FakeAudio::with_sessions(&[(1, "a.exe")]);
        let windows = FakeWindows::new();
        windows.focus(Some(9));
        let (handle, _rx) = spawn(&audio, &windows, config(&["a.exe"], 100), vec![]);
        assert!(wait_until(|| audio.calls_for(1) == vec![true]));

        handle.send(Command::Untrack(1));
        assert!(wait_until(|| handle.snapshot().tracked.is_empty()));
        assert_eq!(audio.calls_for(1), vec![true, false]);

        // Several more ticks: the name is still in history but pid 1 stays out.
        std::thread::sleep(Duration::from_millis(350));
        assert!(handle.snapshot().tracked.is_empty());
        stop(handle);
        assert_eq!(audio.calls_for(1), vec![true, false]);
    }

    #[test]
    fn backend_failure_stops_the_monitor() {
        let (tx, mut rx) = mpsc::channel(8);
        let handle = start::<FakeAudio, FakeWindows, _>(
            Config::default(),
            vec![],
            || Err(BackendError::Unsupported("test backend")),
            tx,
        )
        .unwrap();
        assert!(wait_for_event(&mut rx, |e| matches!(e, DaemonEvent::MonitorStopped)));
        handle.join();
    }
}
