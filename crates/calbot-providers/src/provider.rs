//! CalendarProvider trait definition.
//!
//! The engine talks to the calendar backend only through [`CalendarProvider`].
//! Implementations look up and refresh the user's credential themselves, so
//! every call is addressed by user id.

use std::future::Future;
use std::pin::Pin;

use calbot_core::TimeWindow;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;
use crate::raw_event::RawEvent;

/// A boxed future for async trait methods, keeping the trait object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What an event listing should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventQuery {
    /// Events starting inside `window`. Used when no cursor exists yet.
    Bootstrap { window: TimeWindow },
    /// Events modified at or after `since`, cancellations included, that
    /// start before `until`.
    Incremental {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    },
}

impl EventQuery {
    /// `[now, now + horizon)`.
    pub fn bootstrap(now: DateTime<Utc>, horizon: Duration) -> Self {
        Self::Bootstrap {
            window: TimeWindow::from_duration(now, horizon),
        }
    }

    /// Changes since `since`, bounded by `now + horizon`.
    pub fn incremental(since: DateTime<Utc>, now: DateTime<Utc>, horizon: Duration) -> Self {
        Self::Incremental {
            since,
            until: now + horizon,
        }
    }

    /// Picks the mode from the stored cursor.
    pub fn for_cursor(cursor: Option<DateTime<Utc>>, now: DateTime<Utc>, horizon: Duration) -> Self {
        match cursor {
            Some(since) => Self::incremental(since, now, horizon),
            None => Self::bootstrap(now, horizon),
        }
    }

    pub fn is_incremental(&self) -> bool {
        matches!(self, Self::Incremental { .. })
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Self::Bootstrap { .. } => "bootstrap",
            Self::Incremental { .. } => "incremental",
        }
    }
}

/// A push channel confirmed by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchChannel {
    /// Identifier chosen by us when opening the channel.
    pub channel_id: String,
    /// Identifier of the watched resource, chosen by the provider.
    pub resource_id: String,
    pub expiry: DateTime<Utc>,
}

/// The calendar backend as seen by the engine.
pub trait CalendarProvider: Send + Sync {
    /// Returns the name/type of this provider (e.g., "google").
    fn name(&self) -> &str;

    /// Lists events for `user_id`. Pagination is handled internally.
    fn list_events<'a>(
        &'a self,
        user_id: &'a str,
        query: EventQuery,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>>;

    /// Opens a push channel delivering change notifications to `callback_url`.
    fn watch<'a>(
        &'a self,
        user_id: &'a str,
        callback_url: &'a str,
        channel_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<WatchChannel>>;

    /// Closes a push channel.
    fn stop_watch<'a>(
        &'a self,
        user_id: &'a str,
        channel_id: &'a str,
        resource_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>>;
}
