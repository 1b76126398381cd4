/// Global pause hotkey using a low-level Windows keyboard hook (`WH_KEYBOARD_LL`).
///
/// The hook lives on its own OS thread with a Windows message pump, so the key
/// works while a full-screen game has focus. Each press sends
/// [`DaemonEvent::PauseToggled`]; the daemon forwards it to the monitor.
///
/// On non-Windows platforms the public API compiles but is a no-op at runtime.
use anyhow::Result;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use tokio::sync::mpsc;

use crate::event::DaemonEvent;

/// Virtual-key code the hook reacts to (0 = disabled).
static PAUSE_VK: AtomicU32 = AtomicU32::new(0);

/// Where key presses are delivered. Set once by [`start`].
static PAUSE_TX: OnceLock<mpsc::Sender<DaemonEvent>> = OnceLock::new();

const VK_PAUSE: u32 = 0x13;
const VK_SCROLL: u32 = 0x91;
const VK_F1: u32 = 0x70;

/// Converts a key name to a Windows virtual-key code.
///
/// Accepts `F1`–`F12`, `Pause`, `ScrollLock`, and single ASCII letters or
/// digits, case-insensitively. Anything else is `None`.
pub fn parse_vk(name: &str) -> Option<u32> {
    let upper = name.trim().to_ascii_uppercase();
    match upper.as_str() {
        "PAUSE" | "BREAK" => return Some(VK_PAUSE),
        "SCROLLLOCK" | "SCROLL" => return Some(VK_SCROLL),
        _ => {}
    }

    if let Some(n) = upper.strip_prefix('F').and_then(|n| n.parse::<u32>().ok()) {
        return (1..=12).contains(&n).then(|| VK_F1 + n - 1);
    }

    let mut chars = upper.chars();
    match (chars.next(), chars.next()) {
        // 'A'..'Z' and '0'..'9' share their ASCII values with the VK codes.
        (Some(c), None) if c.is_ascii_alphanumeric() => Some(c as u32),
        _ => None,
    }
}

/// Handle to the running hook thread.
pub struct HotkeyHandle {
    #[cfg(windows)]
    thread: std::thread::JoinHandle<()>,
    /// Thread ID of the message-pump thread, used to post `WM_QUIT`.
    #[cfg(windows)]
    thread_id: u32,
}

impl HotkeyHandle {
    /// Rebinds the pause key. An unrecognised name disables it.
    pub fn update_key(&self, key_name: &str) {
        set_key(key_name);
    }

    /// Stops the hook thread and waits for it to exit.
    pub fn stop(self) {
        #[cfg(windows)]
        {
            imp::post_quit(self.thread_id);
            let _ = self.thread.join();
        }
    }
}

fn set_key(key_name: &str) {
    let vk = parse_vk(key_name).unwrap_or(0);
    if vk == 0 && !key_name.is_empty() {
        tracing::warn!(key = key_name, "Unrecognised pause hotkey; hotkey disabled");
    }
    PAUSE_VK.store(vk, Ordering::Relaxed);
}

/// Installs the keyboard hook on a dedicated thread.
///
/// Presses are forwarded with a non-blocking `try_send`; if the channel is
/// full the press is dropped.
pub fn start(key_name: &str, tx: mpsc::Sender<DaemonEvent>) -> Result<HotkeyHandle> {
    set_key(key_name);
    // A second start (test binaries) keeps the first sender.
    let _ = PAUSE_TX.set(tx);

    #[cfg(windows)]
    {
        use anyhow::Context;

        let (id_tx, id_rx) = std::sync::mpsc::sync_channel::<u32>(1);
        let thread = std::thread::Builder::new()
            .name("pause-hotkey".into())
            .spawn(move || imp::run_message_pump(id_tx))
            .context("Failed to spawn hotkey thread")?;
        let thread_id = id_rx
            .recv()
            .context("Hotkey thread exited before reporting its id")?;
        Ok(HotkeyHandle { thread, thread_id })
    }

    #[cfg(not(windows))]
    Ok(HotkeyHandle {})
}

#[cfg(windows)]
mod imp {
    use std::sync::atomic::Ordering;
    use std::sync::mpsc as std_mpsc;

    use tracing::{debug, error};
    use windows::Win32::Foundation::{HINSTANCE, LPARAM, LRESULT, WPARAM};
    use windows::Win32::System::Threading::GetCurrentThreadId;
    use windows::Win32::UI::WindowsAndMessaging::{
        CallNextHookEx, DispatchMessageW, GetMessageW, PostThreadMessageW, SetWindowsHookExW,
        UnhookWindowsHookEx, KBDLLHOOKSTRUCT, MSG, WH_KEYBOARD_LL, WM_KEYDOWN, WM_QUIT,
    };

    use super::{PAUSE_TX, PAUSE_VK};
    use crate::event::DaemonEvent;

    unsafe extern "system" fn keyboard_proc(n_code: i32, w_param: WPARAM, l_param: LPARAM) -> LRESULT {
        if n_code >= 0 && w_param.0 as u32 == WM_KEYDOWN {
            let kb = &*(l_param.0 as *const KBDLLHOOKSTRUCT);
            let target = PAUSE_VK.load(Ordering::Relaxed);
            if target != 0 && kb.vkCode == target {
                if let Some(tx) = PAUSE_TX.get() {
                    let _ = tx.try_send(DaemonEvent::PauseToggled);
                }
            }
        }
        CallNextHookEx(None, n_code, w_param, l_param)
    }

    /// Installs the hook, pumps messages until `WM_QUIT`, then removes it.
    /// The thread id goes to `id_tx` first so the handle can post `WM_QUIT`.
    pub fn run_message_pump(id_tx: std_mpsc::SyncSender<u32>) {
        unsafe {
            let _ = id_tx.send(GetCurrentThreadId());
            drop(id_tx);

            let hook = match SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_proc), HINSTANCE::default(), 0) {
                Ok(hook) => hook,
                Err(e) => {
                    error!(error = %e, "SetWindowsHookExW failed; pause hotkey unavailable");
                    return;
                }
            };

            let mut msg = MSG::default();
            // >0 = message, 0 = WM_QUIT, <0 = error.
            while GetMessageW(&mut msg, None, 0, 0).0 > 0 {
                DispatchMessageW(&msg);
            }

            let _ = UnhookWindowsHookEx(hook);
            debug!("Hotkey thread exited");
        }
    }

    pub fn post_quit(thread_id: u32) {
        unsafe {
            let _ = PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_keys_map_to_contiguous_codes() {
        for n in 1u32..=12 {
            assert_eq!(parse_vk(&format!("F{n}")), Some(0x6F + n), "F{n}");
        }
        assert_eq!(parse_vk("f9"), parse_vk("F9"));
    }

    #[test]
    fn out_of_range_function_keys_are_rejected() {
        assert_eq!(parse_vk("F0"), None);
        assert_eq!(parse_vk("F13"), None);
        assert_eq!(parse_vk("Fx"), None);
    }

    #[test]
    fn pause_and_scroll_lock_names() {
        assert_eq!(parse_vk("Pause"), Some(VK_PAUSE));
        assert_eq!(parse_vk("break"), Some(VK_PAUSE));
        assert_eq!(parse_vk("ScrollLock"), Some(VK_SCROLL));
    }

    #[test]
    fn letters_and_digits_use_ascii_codes() {
        assert_eq!(parse_vk("m"), Some('M' as u32));
        assert_eq!(parse_vk("Z"), Some(0x5A));
        assert_eq!(parse_vk("0"), Some(0x30));
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(parse_vk(""), None);
        assert_eq!(parse_vk("Escape"), None);
        assert_eq!(parse_vk("AB"), None);
        assert_eq!(parse_vk("!"), None);
    }

    /// Only this test calls `start`, so at most one hook is installed per
    /// test binary.
    #[test]
    fn start_update_stop_lifecycle() {
        let (tx, _rx) = mpsc::channel::<DaemonEvent>(4);
        let handle = start("Pause", tx).unwrap();
        assert_eq!(PAUSE_VK.load(Ordering::Relaxed), VK_PAUSE);

        handle.update_key("F10");
        assert_eq!(PAUSE_VK.load(Ordering::Relaxed), 0x79);

        handle.update_key("");
        assert_eq!(PAUSE_VK.load(Ordering::Relaxed), 0);

        handle.stop();
    }
}
