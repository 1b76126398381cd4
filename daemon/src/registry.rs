use std::collections::HashMap;

/// A process whose audio is being managed.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedProcess {
    pub pid: u32,
    /// Executable name, used for history matching only.
    pub name: String,
    /// Last mute value actually applied through the backend; `None` until the
    /// first successful call.
    pub last_muted: Option<bool>,
}

/// Tracked processes keyed by pid.
///
/// Owned by the monitor thread; nothing else mutates it.
#[derive(Debug, Default)]
pub struct ProcessAudioRegistry {
    processes: HashMap<u32, TrackedProcess>,
}

impl ProcessAudioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `pid`. Returns `false` (and changes nothing) if it is
    /// already tracked.
    pub fn add(&mut self, pid: u32, name: impl Into<String>) -> bool {
        if self.processes.contains_key(&pid) {
            return false;
        }
        self.processes.insert(
            pid,
            TrackedProcess {
                pid,
                name: name.into(),
                last_muted: None,
            },
        );
        true
    }

    /// Stops tracking `pid`. Restoring the mute state first is the caller's job.
    pub fn remove(&mut self, pid: u32) -> Option<TrackedProcess> {
        self.processes.remove(&pid)
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.processes.contains_key(&pid)
    }

    pub fn get(&self, pid: u32) -> Option<&TrackedProcess> {
        self.processes.get(&pid)
    }

    pub fn all(&self) -> impl Iterator<Item = &TrackedProcess> {
        self.processes.values()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.processes.keys().copied().collect()
    }

    pub fn set_last_muted(&mut self, pid: u32, muted: bool) {
        if let Some(process) = self.processes.get_mut(&pid) {
            process.last_muted = Some(muted);
        }
    }

    /// Pids whose last applied state is muted, i.e. the ones a restore must touch.
    pub fn muted_pids(&self) -> Vec<u32> {
        self.processes
            .values()
            .filter(|p| p.last_muted == Some(true))
            .map(|p| p.pid)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
