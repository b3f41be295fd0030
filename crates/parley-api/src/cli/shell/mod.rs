//! Interactive terminal channel.
//!
//! Reads lines from the terminal, dispatches them as inbound events on the
//! `shell` channel, and prints the bot events that come back.

pub mod commands;
pub mod input;

use console::style;
use parley_types::event::{new_conversation_id, InboundEvent};

use crate::cli::history;
use crate::state::AppState;
use commands::ShellCommand;
use input::{InputEvent, ShellInput};

/// Channel name recorded on events produced by the shell.
pub const SHELL_CHANNEL: &str = "shell";

/// Run the shell until the user exits.
pub async fn run_shell(state: &AppState, conv_id: Option<String>) -> anyhow::Result<()> {
    let mut conv_id = conv_id.unwrap_or_else(new_conversation_id);
    tracing::info!(%conv_id, "shell started");

    println!();
    println!("  {}", style("Parley interactive shell").bold());
    println!(
        "  {} {}",
        style("Conversation:").dim(),
        style(&conv_id).cyan()
    );
    println!(
        "  {}",
        style("Type /help for commands, exit or quit to stop.").dim()
    );
    println!();

    let prompt = format!("  {} ", style("You >").green().bold());
    let (mut shell_input, _writer) = ShellInput::new(prompt)
        .map_err(|e| anyhow::anyhow!("Failed to initialize input: {e}"))?;

    loop {
        match shell_input.read_line().await {
            InputEvent::Eof => {
                println!("\n  {}", style("Exiting...").dim());
                break;
            }
            InputEvent::Interrupted => {
                println!("\n  {}", style("Press Ctrl+D or type exit to leave.").dim());
                continue;
            }
            InputEvent::Message(text) => {
                if text.is_empty() {
                    continue;
                }

                if let Some(cmd) = commands::parse(&text) {
                    match cmd {
                        ShellCommand::Help => commands::print_help(),
                        ShellCommand::History => {
                            history::show_history(state.store(), &conv_id, false).await?;
                        }
                        ShellCommand::Sessions => {
                            let gap = state.config.dispatch.session_gap();
                            history::show_sessions(state.store(), &conv_id, gap, false).await?;
                        }
                        ShellCommand::Restart => {
                            conv_id = new_conversation_id();
                            tracing::info!(%conv_id, "shell restarted");
                            println!(
                                "\n  {} Started new conversation with ID: {}\n",
                                style("*").cyan().bold(),
                                style(&conv_id).cyan()
                            );
                        }
                        ShellCommand::Exit => {
                            println!("\n  {}", style("Exiting...").dim());
                            break;
                        }
                        ShellCommand::Unknown(name) => {
                            println!(
                                "\n  {} Unknown command: {}. Type /help for available commands.\n",
                                style("?").yellow().bold(),
                                style(name).dim()
                            );
                        }
                    }
                    continue;
                }

                let inbound = InboundEvent::new(conv_id.clone(), SHELL_CHANNEL, text);
                match state.dispatcher.handle(inbound).await {
                    Ok(replies) => {
                        for reply in &replies {
                            println!(
                                "  {} {}",
                                style("Bot >").cyan().bold(),
                                reply.text.as_deref().unwrap_or_default()
                            );
                        }
                    }
                    Err(e) => {
                        println!(
                            "  {} Error processing event: {e}",
                            style("!").red().bold()
                        );
                    }
                }
            }
        }
    }

    shell_input.finish();
    Ok(())
}
