//! Live keyword tally service.
//!
//! Wires the tally store, the filtered-stream consumer, the periodic
//! broadcaster and the snapshot query server together, then runs until
//! SIGINT or SIGTERM.
//!
//! # Startup Sequence
//!
//! 1. Parse flags, load the env file, initialize structured logging
//! 2. Validate configuration and credentials
//! 3. Create the tally store from the tracked options
//! 4. Bind the query server listener
//! 5. Open the filtered stream (fatal if it cannot be established)
//! 6. Spawn the consumer, broadcaster and query server tasks
//! 7. Wait for a termination signal, cancel, drain with a grace period
//!
//! Any failure in steps 2 to 5 exits non-zero before a task starts.

mod config;
mod error;
mod logging;
mod shutdown;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tally_api::{AppState, SnapshotResponder};
use tally_broadcast::{Broadcaster, LocalSink, PublishTarget, PusherSink};
use tally_core::TallyStore;
use tally_stream::{FilteredStream, StreamConsumer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{AppConfig, Cli};
use crate::error::ServerError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let env_file = config::load_env_file(cli.env_file.as_deref());
    // second pass so flags also fall back to variables from the env file
    let cli = Cli::parse();

    logging::init(cli.log_json);
    info!(version = env!("CARGO_PKG_VERSION"), "tally-server starting");

    match env_file {
        Ok(Some(path)) => info!(path = %path.display(), "env file loaded"),
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    }

    match run(&cli).await {
        Ok(()) => {
            info!("tally-server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<(), ServerError> {
    // 2. Configuration.
    let config = AppConfig::from_env(cli)?;
    info!(
        options = ?config.options.as_slice(),
        host = %config.server.host,
        port = config.server.port,
        broadcast_interval_ms = u64::try_from(config.broadcast.interval.as_millis()).unwrap_or(u64::MAX),
        channel = %config.broadcast.channel,
        event = %config.broadcast.event,
        reconnect_max_retries = config.reconnect.max_retries,
        "configuration loaded"
    );

    // 3. Tally store.
    let store = Arc::new(TallyStore::with_options(config.options.clone()));

    // 4. Listener.
    let listener = tally_api::bind(&config.server).await?;

    // 5. Filtered stream.
    let source = FilteredStream::new(config.twitter, &config.options, config.stall_timeout)
        .map_err(ServerError::StreamEstablishment)?;
    let mut consumer = StreamConsumer::new(source, Arc::clone(&store), config.reconnect);
    consumer
        .establish()
        .await
        .map_err(ServerError::StreamEstablishment)?;

    // 6. Tasks.
    let local = LocalSink::new();
    let sinks = vec![
        PublishTarget::Pusher(PusherSink::new(config.pusher)?),
        PublishTarget::Local(local.clone()),
    ];
    let broadcaster = Broadcaster::new(Arc::clone(&store), sinks, config.broadcast);

    let cancel = CancellationToken::new();
    let app_state = Arc::new(AppState::new(
        SnapshotResponder::new(Arc::clone(&store)),
        local.sender(),
        consumer.state_receiver(),
        cancel.clone(),
    ));

    let consumer_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match consumer.run(cancel).await {
                Ok(report) => info!(
                    events = report.events,
                    matches = report.matches,
                    reconnects = report.reconnects,
                    "stream consumer finished"
                ),
                // counts stay queryable; only ingestion has stopped
                Err(e) => error!(error = %e, "stream consumer stopped"),
            }
        }
    });

    let broadcaster_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            broadcaster.run(cancel).await;
        }
    });

    let server_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tally_api::serve(listener, app_state, cancel).await {
                error!(error = %e, "query server failed");
            }
        }
    });

    info!("tally-server running");

    // 7. Shutdown.
    shutdown::wait_for_signal().await;
    info!("shutdown signal received, stopping tasks");
    cancel.cancel();

    shutdown::drain(
        vec![
            ("stream-consumer", consumer_task),
            ("broadcaster", broadcaster_task),
            ("query-server", server_task),
        ],
        config.shutdown_grace,
    )
    .await;

    Ok(())
}
