//! Parley CLI and webhook server entry point.
//!
//! Binary name: `parley`
//!
//! Parses CLI arguments, loads `parley.toml`, opens the configured event
//! backend, then runs the shell, the webhook server, or a history command.

mod bot;
mod cli;
mod http;
mod state;

use std::time::Duration;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use parley_core::backend::BoxEventBackend;
use parley_core::store::EventStore;
use parley_infra::backend::open_backend;
use parley_infra::config::load_config;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,parley=debug",
        _ => "trace",
    };
    parley_observe::tracing_setup::init_tracing(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    // Shell completions don't need a backend
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "parley", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config).await;
    let result = run(cli, config).await;

    parley_observe::tracing_setup::shutdown_tracing();
    result
}

async fn run(cli: Cli, config: parley_types::config::ParleyConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Shell { conv_id, bot } => {
            let state = AppState::init(config, bot).await?;
            cli::shell::run_shell(&state, conv_id).await?;
        }

        Commands::Serve { port, host, bot } => {
            let state = AppState::init(config, bot).await?;
            let webhooks: Vec<String> = state
                .config
                .channels
                .iter()
                .filter(|c| c.kind == http::handlers::webhook::WEBHOOK_TYPE)
                .map(|c| c.name.clone())
                .collect();
            if webhooks.is_empty() {
                tracing::warn!("no webhook channels configured; only /health will respond");
            }

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            println!(
                "  {} Parley listening on {}",
                console::style("*").bold(),
                console::style(format!("http://{addr}")).cyan()
            );
            for name in &webhooks {
                println!(
                    "  {} POST /channels/{}",
                    console::style("-").dim(),
                    console::style(name).cyan()
                );
            }
            println!("  {}", console::style("Press Ctrl+C to stop").dim());

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            println!("\n  Server stopped.");
        }

        Commands::History { conv_id } => {
            let store = read_only_store(&config).await?;
            cli::history::show_history(&store, &conv_id, cli.json).await?;
        }

        Commands::Sessions { conv_id, gap } => {
            let store = read_only_store(&config).await?;
            let gap = gap
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.dispatch.session_gap());
            cli::history::show_sessions(&store, &conv_id, gap, cli.json).await?;
        }

        Commands::Conversations => {
            let store = read_only_store(&config).await?;
            cli::history::list_conversations(&store, cli.json).await?;
        }

        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Open the configured backend without handlers for the history commands.
async fn read_only_store(config: &parley_types::config::ParleyConfig) -> anyhow::Result<EventStore> {
    let backend: BoxEventBackend = open_backend(&config.storage).await?;
    Ok(EventStore::new(backend))
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
