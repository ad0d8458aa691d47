//! Line-based control surface on stdin.
//!
//! Stands in for the menu bar and hotkeys: dictation signals, status queries
//! and model management are typed as simple commands.

use hushtype_model_prep::DictationEvent;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::setup::App;

const HELP: &str = "commands: start | dictate | done | status | models | cancel | remove <model> | help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    DictationStarted,
    DictationEnded,
    Status,
    Models,
    Cancel,
    Remove(String),
    Help,
    Quit,
}

/// Parse one input line. Empty lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(None);
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "start" => Command::Start,
        "dictate" | "pause" => Command::DictationStarted,
        "done" | "resume" => Command::DictationEnded,
        "status" => Command::Status,
        "models" | "list" => Command::Models,
        "cancel" => Command::Cancel,
        "remove" | "rm" => match parts.next() {
            Some(name) => Command::Remove(name.to_string()),
            None => return Err("usage: remove <model>".to_string()),
        },
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command '{}'", other)),
    };

    if parts.next().is_some() {
        return Err(format!("too many arguments for '{}'", word));
    }

    Ok(Some(command))
}

/// Run one command. Returns false when the app should exit.
pub fn execute(app: &App, command: Command) -> bool {
    let coordinator = &app.coordinator;
    match command {
        Command::Start => println!("{}", coordinator.start()),
        Command::DictationStarted => app.signal_dictation(DictationEvent::Started),
        Command::DictationEnded => app.signal_dictation(DictationEvent::Ended),
        Command::Status => {
            let message = coordinator
                .status_message()
                .unwrap_or_else(|| "Idle".to_string());
            let eta = coordinator
                .estimated_time_remaining()
                .map(|d| format!(", about {}s left", d.as_secs()))
                .unwrap_or_default();
            println!(
                "{} (overall {:.0}%{})",
                message,
                coordinator.overall_progress() * 100.0,
                eta
            );
        }
        Command::Models => {
            for model in coordinator.models() {
                let detail = match &model.error {
                    Some(error) => format!(" - {}", error),
                    None => String::new(),
                };
                println!(
                    "{:<24} {:<12} {:>5.1}%{}",
                    model.name,
                    model.phase.to_string(),
                    model.total_progress * 100.0,
                    detail
                );
            }
        }
        Command::Cancel => coordinator.cancel(),
        Command::Remove(name) => match coordinator.remove_model(&name) {
            Ok(()) => println!("removed {}", name),
            Err(e) => println!("cannot remove {}: {}", name, e),
        },
        Command::Help => println!("{}", HELP),
        Command::Quit => return false,
    }
    true
}

/// Read commands from stdin until `quit`, end of input, or Ctrl-C.
pub async fn run(app: &App) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        };

        match parse_command(&line) {
            Ok(Some(command)) => {
                if !execute(app, command) {
                    break;
                }
            }
            Ok(None) => {}
            Err(message) => println!("{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        let test_cases = vec![
            ("start", Ok(Some(Command::Start))),
            ("  STATUS  ", Ok(Some(Command::Status))),
            ("dictate", Ok(Some(Command::DictationStarted))),
            ("pause", Ok(Some(Command::DictationStarted))),
            ("done", Ok(Some(Command::DictationEnded))),
            ("models", Ok(Some(Command::Models))),
            ("cancel", Ok(Some(Command::Cancel))),
            (
                "remove whisper-small",
                Ok(Some(Command::Remove("whisper-small".into()))),
            ),
            ("q", Ok(Some(Command::Quit))),
            ("", Ok(None)),
            ("   ", Ok(None)),
        ];

        for (input, expected) in test_cases {
            assert_eq!(parse_command(input), expected, "input: {:?}", input);
        }
    }

    #[test]
    fn test_parse_command_errors() {
        assert_eq!(
            parse_command("remove"),
            Err("usage: remove <model>".to_string())
        );
        assert_eq!(
            parse_command("download all"),
            Err("unknown command 'download'".to_string())
        );
        assert_eq!(
            parse_command("status now"),
            Err("too many arguments for 'status'".to_string())
        );
    }
}
