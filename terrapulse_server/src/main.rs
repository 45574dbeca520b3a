use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use log::{error, info, warn};
use terrapulse_server::config::Args;
use terrapulse_server::database::{MemoryStore, PgStore};
use terrapulse_server::http::{router, AppState};
use terrapulse_server::program::{RewardProgram, SimulatedProgram};
use terrapulse_server::store::Store;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    pretty_env_logger::init();

    let args = Args::parse();
    match serve(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn serve(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn Store> = match (&args.database_url, args.in_memory) {
        (Some(url), false) => Arc::new(PgStore::connect(url)?),
        _ => {
            warn!("Using the in-memory store, nothing will be persisted");
            Arc::new(MemoryStore::new())
        }
    };

    let program = Arc::new(SimulatedProgram::new());
    program.initialize(&args.admin_key, args.rates()).await?;
    info!("Reward program ready with rates {:?}", args.rates());

    let state = AppState::new(store, program, args.admin_key.clone());

    if let Some(interval) = args.sync_interval() {
        let sync = state.sync.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = sync.run().await {
                    error!("Scheduled ledger sync failed: {err}");
                }
            }
        });
        info!("Ledger sync scheduled every {}s", interval.as_secs());
    }

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!("Listening on http://{}", args.bind);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Could not listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
