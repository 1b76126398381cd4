/// Line commands on stdin, the terminal counterpart of the tray menu.
///
///   track <pid>     start managing a process (and remember its name)
///   untrack <pid>   stop managing it; its audio is restored
///   pause | resume
///   status          print the tracked processes
///   forget          clear the remembered process names
///   quit
use anyhow::{anyhow, bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::DaemonEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Track(u32),
    Untrack(u32),
    Pause,
    Resume,
    Status,
    ClearHistory,
    Quit,
}

/// Parses one input line. Blank lines are `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "track" => ConsoleCommand::Track(pid_arg(words.next())?),
        "untrack" => ConsoleCommand::Untrack(pid_arg(words.next())?),
        "pause" => ConsoleCommand::Pause,
        "resume" => ConsoleCommand::Resume,
        "status" => ConsoleCommand::Status,
        "forget" => ConsoleCommand::ClearHistory,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => bail!("unknown command `{other}`"),
    };

    if let Some(extra) = words.next() {
        bail!("unexpected argument `{extra}`");
    }
    Ok(Some(command))
}

fn pid_arg(word: Option<&str>) -> Result<u32> {
    let word = word.ok_or_else(|| anyhow!("missing pid"))?;
    word.parse::<u32>()
        .with_context(|| format!("`{word}` is not a pid"))
}

/// Forwards parsed lines from `input` as [`DaemonEvent::Console`] until EOF
/// or until the daemon stops listening. Bad lines are logged and skipped.
pub async fn read_commands<R: AsyncRead + Unpin>(input: R, tx: mpsc::Sender<DaemonEvent>) {
    let mut lines = BufReader::new(input).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Console read failed");
                break;
            }
        };
        match parse_line(&line) {
            Ok(Some(command)) => {
                if tx.send(DaemonEvent::Console(command)).await.is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(input = %line.trim(), "{e:#}"),
        }
    }
    // Running detached (no terminal) closes stdin immediately; keep going.
    debug!("Console input closed");
}
