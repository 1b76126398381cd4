use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Resolves pids to executable names using the OS process list.
///
/// Audio sessions only report the owning pid, so every enumeration goes
/// through here to label them.
pub struct ProcessNames {
    sys: System,
}

impl ProcessNames {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }

    /// Refreshes the entries for `pids` only and drops processes that exited.
    pub fn refresh(&mut self, pids: &[u32]) {
        let pids: Vec<Pid> = pids.iter().map(|&p| Pid::from_u32(p)).collect();
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::new(),
        );
    }

    /// Executable name of `pid` as of the last [`refresh`](Self::refresh).
    pub fn name_of(&self, pid: u32) -> Option<String> {
        self.sys
            .process(Pid::from_u32(pid))
            .map(|p| p.name().to_string_lossy().into_owned())
    }
}

impl Default for ProcessNames {
    fn default() -> Self {
        Self::new()
    }
}
