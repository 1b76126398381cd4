/// Foreground and minimized-state queries for a process's top-level windows.
///
/// [`WindowSystem`] is the raw OS surface; [`WindowStateResolver`] turns it
/// into the two questions the mute policy asks.
///
/// On non-Windows platforms [`SystemWindows`] compiles but reports no
/// foreground window, so the loop never makes a decision.
use crate::error::BackendError;

/// Opaque top-level window handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub isize);

pub trait WindowSystem {
    /// Pid owning the current foreground window, if one resolves.
    fn foreground_pid(&self) -> Option<u32>;

    /// Visible top-level windows owned by `pid`.
    fn visible_top_level_windows(&self, pid: u32) -> Result<Vec<WindowId>, BackendError>;

    fn is_iconic(&self, window: WindowId) -> bool;
}

pub struct WindowStateResolver<W> {
    windows: W,
}

impl<W: WindowSystem> WindowStateResolver<W> {
    pub fn new(windows: W) -> Self {
        Self { windows }
    }

    pub fn foreground_pid(&self) -> Option<u32> {
        self.windows.foreground_pid()
    }

    /// True iff the foreground window belongs to `pid`. No foreground window
    /// means false.
    pub fn is_foreground(&self, pid: u32) -> bool {
        self.windows.foreground_pid() == Some(pid)
    }

    /// True iff `pid` has at least one visible top-level window and every one
    /// of them is iconic.
    ///
    /// A process with no visible window counts as not minimized, so a
    /// tray-only or hidden process is never muted under the minimize policy.
    pub fn is_minimized(&self, pid: u32) -> Result<bool, BackendError> {
        let windows = self.windows.visible_top_level_windows(pid)?;
        if windows.is_empty() {
            return Ok(false);
        }
        Ok(windows.iter().all(|&w| self.windows.is_iconic(w)))
    }
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use windows::Win32::Foundation::{BOOL, HWND, LPARAM, TRUE};
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetForegroundWindow, GetWindowThreadProcessId, IsIconic, IsWindowVisible,
    };

    use super::{WindowId, WindowSystem};
    use crate::error::BackendError;

    /// Win32 window queries. Stateless; every call asks the OS afresh.
    #[derive(Debug, Default)]
    pub struct SystemWindows;

    struct EnumState {
        pid: u32,
        found: Vec<WindowId>,
    }

    unsafe extern "system" fn collect_visible(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let state = &mut *(lparam.0 as *mut EnumState);
        if IsWindowVisible(hwnd).as_bool() {
            let mut owner: u32 = 0;
            GetWindowThreadProcessId(hwnd, Some(&mut owner));
            if owner == state.pid {
                state.found.push(WindowId(hwnd.0));
            }
        }
        TRUE
    }

    impl WindowSystem for SystemWindows {
        fn foreground_pid(&self) -> Option<u32> {
            unsafe {
                let hwnd = GetForegroundWindow();
                if hwnd.is_invalid() {
                    return None;
                }
                let mut pid: u32 = 0;
                GetWindowThreadProcessId(hwnd, Some(&mut pid));
                (pid != 0).then_some(pid)
            }
        }

        fn visible_top_level_windows(&self, pid: u32) -> Result<Vec<WindowId>, BackendError> {
            let mut state = EnumState { pid, found: Vec::new() };
            unsafe {
                EnumWindows(
                    Some(collect_visible),
                    LPARAM(&mut state as *mut EnumState as isize),
                )
                .map_err(|e| BackendError::os("EnumWindows", e))?;
            }
            Ok(state.found)
        }

        fn is_iconic(&self, window: WindowId) -> bool {
            unsafe { IsIconic(HWND(window.0)).as_bool() }
        }
    }
}

#[cfg(windows)]
pub use imp::SystemWindows;

// ── Non-Windows stub ──────────────────────────────────────────────────────────

#[cfg(not(windows))]
#[derive(Debug, Default)]
pub struct SystemWindows;

#[cfg(not(windows))]
impl WindowSystem for SystemWindows {
    fn foreground_pid(&self) -> Option<u32> {
        None
    }

    fn visible_top_level_windows(&self, _pid: u32) -> Result<Vec<WindowId>, BackendError> {
        Err(BackendError::Unsupported("Window state queries"))
    }

    fn is_iconic(&self, _window: WindowId) -> bool {
        false
    }
}
