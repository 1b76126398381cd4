use crate::config::Config;
use crate::console::ConsoleCommand;
use crate::monitor::MonitorSnapshot;

pub enum DaemonEvent {
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// The user selected a process by hand; its name belongs in the history.
    ProcessSelected { pid: u32, name: String },
    /// The tracked set or mode changed; the status file is stale.
    StateChanged(MonitorSnapshot),
    /// Every tracked process exited and auto-close is on. Carries the names
    /// of the processes that ended.
    ProcessesEnded(Vec<String>),
    /// The pause hotkey was pressed.
    PauseToggled,
    /// The monitor thread has restored all mutes and exited.
    MonitorStopped,
    /// A line typed at the console.
    Console(ConsoleCommand),
    /// Ctrl+C received; stop the monitor and exit.
    Shutdown,
}
