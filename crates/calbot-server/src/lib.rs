//! The calbot sync engine and its HTTP surface.
//!
//! This crate keeps a per-user cache of upcoming calendar events in sync with
//! the provider and announces events shortly before they start:
//! - push notifications arrive on the webhook and trigger a reconcile
//! - a single scheduler ticks over every connected user, sending reminders
//!   and renewing push channels before they expire
//! - the OAuth connect flow registers new users
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use calbot_core::{MemoryStore, SystemClock};
//! use calbot_providers::google::{GoogleConfig, GoogleProvider, OAuthCredentials};
//! use calbot_server::{Engine, EngineConfig, LogSink, Repository};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let clock = Arc::new(SystemClock);
//! let config = EngineConfig::new("https://chat.example/plugins/calendar");
//! let credentials = OAuthCredentials::new("client-id", "client-secret");
//! let google = GoogleConfig::new(credentials, config.redirect_url());
//! let provider = Arc::new(GoogleProvider::new(google, store.clone(), clock.clone())?);
//!
//! let engine = Engine::google(config, provider, Arc::new(LogSink), Repository::new(store), clock);
//! println!("{}", engine.connect_url("u1"));
//! # Ok(())
//! # }
//! ```

mod cache;
mod config;
mod engine;
mod error;
mod http;
mod notify;
mod repository;
mod scheduler;
mod signals;
mod watch;

pub use cache::{CACHE_KEY_SUFFIX, EventCache, ReconcileStats};
pub use config::EngineConfig;
pub use engine::{Engine, OAuthConnector, PushOutcome};
pub use error::{ServerError, ServerResult};
pub use http::{USER_ID_HEADER, router, serve};
pub use notify::{
    Attachment, EVENT_COLOR, HttpSink, LogSink, Notification, NotificationSink, WELCOME_MESSAGE,
};
pub use repository::{OAUTH_STATE_KEY_SUFFIX, REGISTRY_KEY, Repository, WATCH_KEY_SUFFIX};
pub use scheduler::{
    Scheduler, SchedulerCommand, SchedulerConfig, SchedulerHandle, SchedulerState,
    SharedSchedulerState, TickReport, new_scheduler_state,
};
pub use signals::{ShutdownSignal, SignalHandler};
pub use watch::{
    ChannelOutcome, OrphanedChannel, PushDecision, SYNC_STATE, WatchManager, WatchRecord,
    WatchState, WatchSubscription,
};
