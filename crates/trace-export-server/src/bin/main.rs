//! trace-export entry point
//!
//! Serves the webhook endpoint, or replays a stored delivery offline.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trace_export_server::replay::replay_files;
use trace_export_server::{build_state, create_router, init_tracing, ServiceConfig, SpanSink};

#[derive(Parser)]
#[command(name = "trace-export")]
#[command(about = "Retroactive traces for GitHub Actions workflow runs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        #[command(flatten)]
        config: ServiceConfig,
    },

    /// Reconstruct a stored webhook payload and print the span tree
    Replay {
        /// Path to the workflow_run webhook body (JSON)
        #[arg(short, long)]
        payload: PathBuf,

        /// Path to the jobs API response (JSON)
        #[arg(short, long)]
        jobs: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => serve(config).await?,

        Commands::Replay { payload, jobs } => {
            let replay = replay_files(&payload, jobs.as_deref()).await?;
            print!("{}", replay.render());

            match replay.result {
                Ok(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    config.validate()?;
    let addr = config.listen_addr()?;

    let sink = SpanSink::from_config(&config)?;
    let state = Arc::new(build_state(&config, sink.emitter()));

    let shutdown = CancellationToken::new();
    let schedule = match &config.properties_url {
        Some(url) => {
            tracing::info!(properties_url = %url, "starting property cache refresh");
            Some(
                state
                    .cache
                    .schedule_refresh(shutdown.child_token(), config.cache_refresh_interval()),
            )
        }
        None => {
            tracing::info!("PROPERTIES_URL not set, scheduled cache refresh disabled");
            None
        }
    };

    let router = create_router(state);

    tracing::info!("Starting trace-export on {}", addr);
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(schedule) = schedule {
        if let Err(e) = schedule.join().await {
            tracing::warn!("Refresh schedule ended abnormally: {}", e);
        }
    }
    sink.shutdown();

    tracing::info!("trace-export stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("shutdown signal received"),
            Err(e) => {
                tracing::warn!("Failed to listen for shutdown signal: {}", e);
                shutdown.cancelled().await;
            }
        },
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
