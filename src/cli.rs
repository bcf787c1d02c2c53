//! Operator console (REPL)
//!
//! Runs `rustyline` on a dedicated thread and forwards parsed commands to
//! the bridge event loop.

use anyhow::Result;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bridge::ConsoleCommand;

const PROMPT: &str = "deej> ";

/// Parse one console line; `None` for unknown input
pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "rescan" => Some(ConsoleCommand::Rescan),
        "status" => Some(ConsoleCommand::Status),
        "sessions" => Some(ConsoleCommand::Sessions),
        "refresh" => Some(ConsoleCommand::Refresh),
        "quit" | "exit" => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

pub fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  {}    reconnect to the serial device", "rescan".cyan());
    println!("  {}    connection status and cache summary", "status".cyan());
    println!("  {}  list cached audio sessions", "sessions".cyan());
    println!("  {}   re-query the session list", "refresh".cyan());
    println!("  {}      stop the bridge", "quit".cyan());
}

/// Spawn the console thread
///
/// The returned receiver closes when the console ends (EOF or quit).
pub fn spawn_console() -> Result<mpsc::UnboundedReceiver<ConsoleCommand>> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::Builder::new()
        .name("console".into())
        .spawn(move || match DefaultEditor::new() {
            Ok(mut rl) => run_repl(&mut rl, tx),
            Err(e) => warn!("Operator console unavailable: {}", e),
        })?;

    Ok(rx)
}

fn run_repl(rl: &mut DefaultEditor, tx: mpsc::UnboundedSender<ConsoleCommand>) {
    print_help();
    loop {
        let line = match rl.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                let _ = tx.send(ConsoleCommand::Quit);
                break;
            }
            Err(e) => {
                debug!("Console read failed: {}", e);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line.as_str());

        match parse_command(&line) {
            Some(command) => {
                if tx.send(command).is_err() || command == ConsoleCommand::Quit {
                    break;
                }
            }
            None => print_help(),
        }
    }
}
