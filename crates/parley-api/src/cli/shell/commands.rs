//! Command parsing for the shell channel.
//!
//! Slash commands control the shell itself; `exit` and `quit` also work
//! without the slash. Anything else is sent to the bot.

use console::style;

#[derive(Debug, PartialEq)]
pub enum ShellCommand {
    /// Show available commands.
    Help,
    /// Show this conversation's events.
    History,
    /// Show this conversation's sessions.
    Sessions,
    /// Switch to a fresh conversation id.
    Restart,
    /// Leave the shell.
    Exit,
    /// Unknown slash command.
    Unknown(String),
}

/// Parse user input as a shell command.
///
/// Returns `None` if the input should be dispatched as a message.
pub fn parse(input: &str) -> Option<ShellCommand> {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit") {
        return Some(ShellCommand::Exit);
    }
    if !trimmed.starts_with('/') {
        return None;
    }

    let cmd = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();

    match cmd.as_str() {
        "/help" | "/h" | "/?" => Some(ShellCommand::Help),
        "/history" => Some(ShellCommand::History),
        "/sessions" => Some(ShellCommand::Sessions),
        "/restart" | "/new" => Some(ShellCommand::Restart),
        "/exit" | "/quit" | "/q" => Some(ShellCommand::Exit),
        other => Some(ShellCommand::Unknown(other.to_string())),
    }
}

/// Print the help text listing all available commands.
pub fn print_help() {
    println!();
    println!("  {}", style("Available commands:").bold());
    println!();
    println!("  {}      {}", style("/help").cyan(), "Show this help message");
    println!("  {}   {}", style("/history").cyan(), "Show this conversation's events");
    println!("  {}  {}", style("/sessions").cyan(), "Show this conversation's sessions");
    println!("  {}   {}", style("/restart").cyan(), "Start a new conversation");
    println!("  {}      {}", style("/exit").cyan(), "Leave the shell (also: exit, quit)");
    println!();
    println!("  {}", style("Ctrl+D to exit").dim());
    println!();
}
