//! In-memory audio and window backends for exercising the reconciler and the
//! monitor thread without an OS.
//!
//! Each fake is a cheap handle around shared state, so a test can keep one
//! clone to script the world and inspect calls while another clone is owned
//! by the code under test (possibly on another thread).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::audio::{AudioSession, AudioSessionBackend};
use crate::error::BackendError;
use crate::window::{WindowId, WindowSystem};

#[derive(Default)]
struct AudioState {
    sessions: Vec<AudioSession>,
    calls: Vec<(u32, bool)>,
    failing_pids: HashSet<u32>,
    enumerate_fails: bool,
}

#[derive(Clone, Default)]
pub struct FakeAudio {
    state: Arc<Mutex<AudioState>>,
}

impl FakeAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sessions(sessions: &[(u32, &str)]) -> Self {
        let audio = Self::new();
        for &(pid, name) in sessions {
            audio.spawn(pid, name);
        }
        audio
    }

    /// A process starts playing audio.
    pub fn spawn(&self, pid: u32, name: &str) {
        self.state.lock().unwrap().sessions.push(AudioSession {
            pid,
            name: name.to_string(),
        });
    }

    /// A process exits; all its sessions disappear.
    pub fn exit(&self, pid: u32) {
        self.state.lock().unwrap().sessions.retain(|s| s.pid != pid);
    }

    pub fn fail_mute_for(&self, pid: u32) {
        self.state.lock().unwrap().failing_pids.insert(pid);
    }

    pub fn heal(&self, pid: u32) {
        self.state.lock().unwrap().failing_pids.remove(&pid);
    }

    pub fn set_enumerate_fails(&self, fails: bool) {
        self.state.lock().unwrap().enumerate_fails = fails;
    }

    /// Every successful `set_mute` call, in order.
    pub fn calls(&self) -> Vec<(u32, bool)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, pid: u32) -> Vec<bool> {
        self.calls()
            .into_iter()
            .filter(|(p, _)| *p == pid)
            .map(|(_, m)| m)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }
}

impl AudioSessionBackend for FakeAudio {
    fn enumerate_sessions(&mut self) -> Result<Vec<AudioSession>, BackendError> {
        let state = self.state.lock().unwrap();
        if state.enumerate_fails {
            return Err(BackendError::os("GetSessionEnumerator", "device lost"));
        }
        Ok(state.sessions.clone())
    }

    fn set_mute(&mut self, pid: u32, muted: bool) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_pids.contains(&pid) {
            return Err(BackendError::os("ISimpleAudioVolume::SetMute", "access denied"));
        }
        if !state.sessions.iter().any(|s| s.pid == pid) {
            return Err(BackendError::SessionNotFound(pid));
        }
        state.calls.push((pid, muted));
        Ok(())
    }
}

#[derive(Default)]
struct WindowState {
    foreground: Option<u32>,
    /// pid → [(window, iconic)]
    windows: HashMap<u32, Vec<(WindowId, bool)>>,
    next_id: isize,
    /// Pids whose window enumeration errors.
    failing_pids: HashSet<u32>,
}

#[derive(Clone, Default)]
pub struct FakeWindows {
    state: Arc<Mutex<WindowState>>,
}

impl FakeWindows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focus(&self, pid: Option<u32>) {
        self.state.lock().unwrap().foreground = pid;
    }

    /// Gives `pid` a visible top-level window and returns its handle.
    pub fn open_window(&self, pid: u32, iconic: bool) -> WindowId {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = WindowId(state.next_id);
        state.windows.entry(pid).or_default().push((id, iconic));
        id
    }

    pub fn fail_windows_for(&self, pid: u32) {
        self.state.lock().unwrap().failing_pids.insert(pid);
    }

    pub fn set_iconic(&self, window: WindowId, iconic: bool) {
        let mut state = self.state.lock().unwrap();
        for entry in state.windows.values_mut().flatten() {
            if entry.0 == window {
                entry.1 = iconic;
            }
        }
    }
}

impl WindowSystem for FakeWindows {
    fn foreground_pid(&self) -> Option<u32> {
        self.state.lock().unwrap().foreground
    }

    fn visible_top_level_windows(&self, pid: u32) -> Result<Vec<WindowId>, BackendError> {
        let state = self.state.lock().unwrap();
        if state.failing_pids.contains(&pid) {
            return Err(BackendError::os("EnumWindows", "access denied"));
        }
        Ok(state
            .windows
            .get(&pid)
            .map(|ws| ws.iter().map(|(w, _)| *w).collect())
            .unwrap_or_default())
    }

    fn is_iconic(&self, window: WindowId) -> bool {
        self.state
            .lock()
            .unwrap()
            .windows
            .values()
            .flatten()
            .any(|(w, iconic)| *w == window && *iconic)
    }
}
