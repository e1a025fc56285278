//! Serve command: runs the service in the foreground.
//!
//! Wires together:
//! - signal handler (SIGTERM/SIGINT for shutdown)
//! - the engine over the file store
//! - the scheduler ticking over all connected users
//! - the HTTP server for pushes and the connect flow

use std::sync::Arc;
use std::time::Duration;

use calbot_core::SystemClock;
use calbot_server::{Scheduler, SchedulerConfig, SignalHandler, router, serve};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::ClientResult;

use super::build_engine;

/// Runs until a shutdown signal is received.
pub async fn run(config: &ClientConfig) -> ClientResult<()> {
    config.validate()?;
    let engine = build_engine(config)?;

    let signal_handler = SignalHandler::new();
    signal_handler.spawn_listener()?;

    let users = engine.repository().connected_users()?;
    info!(users = users.len(), "starting calbot");

    let scheduler = Scheduler::new(
        SchedulerConfig::new(engine.config().tick_period),
        Arc::new(SystemClock),
    );
    let scheduler_handle = scheduler.handle();

    let tick_engine = engine.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler
            .run(move |now| {
                let engine = tick_engine.clone();
                async move { engine.tick_all(now).await }
            })
            .await;
    });

    let listener = TcpListener::bind(&config.server.bind).await?;
    let shutdown = signal_handler.shutdown();
    serve(listener, router(engine.clone()), shutdown.wait()).await?;

    info!("shutting down");
    if let Err(e) = scheduler_handle.stop().await {
        warn!(error = %e, "failed to send stop command to scheduler");
    }

    // Let an in-progress tick finish.
    if tokio::time::timeout(Duration::from_secs(5), scheduler_task)
        .await
        .is_err()
    {
        warn!("scheduler did not stop in time");
    }

    info!("calbot stopped");
    Ok(())
}
