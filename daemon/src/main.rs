mod audio;
mod config;
mod console;
mod error;
mod event;
mod history;
mod hotkey;
mod monitor;
mod paths;
mod process;
mod reconcile;
mod registry;
mod status;
#[cfg(test)]
mod test_utils;
mod window;

use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::audio::{AudioSessionBackend, SystemAudio};
use crate::console::ConsoleCommand;
use crate::error::BackendError;
use crate::event::DaemonEvent;
use crate::monitor::{Command, MonitorSnapshot};
use crate::window::{SystemWindows, WindowStateResolver};

/// Mutes the audio of processes you are not looking at.
#[derive(Parser, Debug)]
#[command(name = "mutebg-daemon", version)]
struct Cli {
    /// Print the processes that currently own an audio session, then exit.
    #[arg(long)]
    list: bool,

    /// Track this process id from startup. Repeatable.
    #[arg(long = "track", value_name = "PID")]
    track: Vec<u32>,

    /// Start paused.
    #[arg(long)]
    paused: bool,

    /// Config file to use instead of %APPDATA%\MuteBackground\config.toml.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Command-line stand-in for the process picker.
fn list_sessions() -> anyhow::Result<()> {
    let mut audio = SystemAudio::new()?;
    let windows = WindowStateResolver::new(SystemWindows);
    let mut sessions = audio.enumerate_sessions()?;
    sessions.sort_by_key(|s| s.pid);
    sessions.dedup_by_key(|s| s.pid);

    if sessions.is_empty() {
        println!("No process is playing audio.");
        return Ok(());
    }
    println!("{:>8}  NAME", "PID");
    for s in sessions {
        let marker = if windows.is_foreground(s.pid) { "  (foreground)" } else { "" };
        println!("{:>8}  {}{marker}", s.pid, s.name);
    }
    Ok(())
}

fn print_status(model: &status::DisplayModel) {
    println!("{} ({})", model.summary(), model.policy);
    for p in &model.tracked {
        let state = if p.muted { "muted" } else { "audible" };
        println!("{:>8}  {}  {state}", p.pid, p.name);
    }
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    if cli.list {
        if let Err(e) = list_sessions() {
            error!(error = %format!("{e:#}"), "Failed to list audio sessions");
            std::process::exit(1);
        }
        return;
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => match paths::config_file_path() {
            Ok(path) => path,
            Err(e) => {
                error!(error = %format!("{e:#}"), "Failed to resolve config path");
                std::process::exit(1);
            }
        },
    };
    let mut config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        error!(error = %format!("{e:#}"), "Failed to load config; using defaults");
        config::Config::default()
    });
    let status_path = paths::status_file_path(&config_path);

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(32);

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(config_path.clone(), event_tx.clone()));

    let hotkey = match hotkey::start(&config.pause_hotkey, event_tx.clone()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "Pause hotkey unavailable");
            None
        }
    };

    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    tokio::spawn(console::read_commands(tokio::io::stdin(), event_tx.clone()));

    let mut initial: Vec<Command> = cli.track.iter().map(|&pid| Command::Track(pid)).collect();
    if cli.paused {
        initial.push(Command::Pause);
    }

    let monitor = match monitor::start(
        config.clone(),
        initial,
        || -> Result<_, BackendError> { Ok((SystemAudio::new()?, SystemWindows)) },
        event_tx.clone(),
    ) {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Failed to start monitor");
            std::process::exit(1);
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), config = %config_path.display(), "mutebg-daemon started");

    let mut snapshot = MonitorSnapshot::default();
    let mut ended: Option<Vec<String>> = None;
    status::write_status(&status_path, &status::render_state(&snapshot, &config));

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            DaemonEvent::ConfigReloaded(new_config) => {
                // Our own saves come back through the watcher too.
                if new_config == config {
                    continue;
                }
                info!("Config reloaded");
                if let Some(h) = &hotkey {
                    h.update_key(&new_config.pause_hotkey);
                }
                monitor.send(Command::UpdateConfig(new_config.clone()));
                config = new_config;
                status::write_status(&status_path, &status::render_state(&snapshot, &config));
            }

            DaemonEvent::ProcessSelected { pid, name } => {
                if config.remember(&name) {
                    info!(pid, name = %name, "Remembering process");
                    if let Err(e) = config::save(&config_path, &config) {
                        error!(error = %format!("{e:#}"), "Failed to save config");
                    }
                    status::write_status(&status_path, &status::render_state(&snapshot, &config));
                }
            }

            DaemonEvent::StateChanged(new_snapshot) => {
                snapshot = new_snapshot;
                let model = status::render_state(&snapshot, &config);
                info!(status = %model.summary(), "State changed");
                status::write_status(&status_path, &model);
            }

            DaemonEvent::ProcessesEnded(names) => {
                info!(ended = ?names, "Every tracked process has ended");
                ended = Some(names);
            }

            DaemonEvent::PauseToggled => {
                monitor.send(Command::TogglePause);
            }

            DaemonEvent::Console(command) => match command {
                ConsoleCommand::Track(pid) => {
                    monitor.send(Command::Track(pid));
                }
                ConsoleCommand::Untrack(pid) => {
                    monitor.send(Command::Untrack(pid));
                }
                ConsoleCommand::Pause => {
                    monitor.send(Command::Pause);
                }
                ConsoleCommand::Resume => {
                    monitor.send(Command::Resume);
                }
                ConsoleCommand::Status => print_status(&status::render_state(&monitor.snapshot(), &config)),
                ConsoleCommand::ClearHistory => {
                    config.clear_history();
                    info!("History cleared");
                    if let Err(e) = config::save(&config_path, &config) {
                        error!(error = %format!("{e:#}"), "Failed to save config");
                    }
                    monitor.send(Command::UpdateConfig(config.clone()));
                    status::write_status(&status_path, &status::render_state(&snapshot, &config));
                }
                ConsoleCommand::Quit => {
                    info!("Shutting down");
                    monitor.request_stop();
                }
            },

            DaemonEvent::Shutdown => {
                info!("Shutting down");
                monitor.request_stop();
            }

            DaemonEvent::MonitorStopped => break,
        }
    }

    // The monitor restored every mute before reporting MonitorStopped.
    monitor.join();

    let mut model = status::render_state(&snapshot, &config);
    if let Some(names) = ended {
        model = model.with_ended(names);
    }
    status::write_status(&status_path, &model);

    if let Some(h) = hotkey {
        h.stop();
    }
    info!("Exited");
}
