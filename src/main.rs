// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `index-sync` command line entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use index_sync::{transform, ElasticClient, MongoSource, RunSummary, SyncRunner};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(&cli).await {
        Ok(summary) if summary.completed => ExitCode::SUCCESS,
        Ok(summary) => {
            warn!(
                start_after = %summary.checkpoint,
                "Sync interrupted; rerun with --start-after to resume"
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> index_sync::Result<RunSummary> {
    let config = cli.to_config()?;
    let hook = transform::load(config.transform.script.as_deref())?;

    let source = Arc::new(MongoSource::connect(&config.source).await?);
    let index = Arc::new(ElasticClient::connect(&config.index).await?);
    info!(
        collection = %config.source.collection,
        index = %config.index.index,
        version = index.version(),
        "Connected"
    );

    let mut runner = SyncRunner::new(&config, source, index, hook)?;

    let stop = runner.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            stop.stop();
        }
    });

    runner.run().await
}
