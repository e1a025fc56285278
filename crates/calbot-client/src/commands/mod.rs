//! Subcommand implementations.

pub mod config;
pub mod connect;
pub mod serve;

use std::sync::Arc;

use calbot_core::{Clock, FileStore, KvStore, SystemClock};
use calbot_providers::google::GoogleProvider;
use calbot_server::{Engine, HttpSink, LogSink, NotificationSink, Repository};
use tracing::info;

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// Builds the engine over the file store in the configured data directory.
pub fn build_engine(config: &ClientConfig) -> ClientResult<Arc<Engine>> {
    let engine_config = config.engine_config()?;
    let google_config = config.google_config(engine_config.redirect_url())?;

    let data_dir = config.data_dir();
    let store: Arc<dyn KvStore> = Arc::new(FileStore::open(&data_dir)?);
    info!(path = %data_dir.display(), "opened store");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let provider = Arc::new(GoogleProvider::new(google_config, store.clone(), clock.clone())?);
    let sink = build_sink(config)?;

    Ok(Arc::new(Engine::google(
        engine_config,
        provider,
        sink,
        Repository::new(store),
        clock,
    )))
}

fn build_sink(config: &ClientConfig) -> ClientResult<Arc<dyn NotificationSink>> {
    let bot = &config.bot;
    match bot.post_url.as_deref().filter(|_| !bot.dry_run) {
        Some(url) => {
            let mut sink = HttpSink::new(url, &bot.username)?;
            if let Some(token) = bot.resolve_token()? {
                sink = sink.with_token(token);
            }
            Ok(Arc::new(sink))
        }
        None => {
            info!("no bot endpoint configured, notifications are only logged");
            Ok(Arc::new(LogSink))
        }
    }
}
