//! Calendar backend access for the calendar bot.
//!
//! - [`CalendarProvider`] - the seam between the engine and a calendar backend
//! - [`EventQuery`] - bootstrap or incremental listing
//! - [`RawEvent`] - an event as fetched, before reconciliation
//! - [`ProviderError`] / [`ErrorClass`] - failure taxonomy
//! - [`google`] - Google Calendar implementation with OAuth and per-user
//!   credential storage
//!
//! ```text
//! ┌──────────────────┐
//! │ Google Calendar  │
//! └────────┬─────────┘
//!          │ HTTPS (bearer token per user)
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │  GoogleProvider  │────▶│ CredentialStore  │──▶ KvStore
//! └────────┬─────────┘     └──────────────────┘
//!          │ CalendarProvider
//!          ▼
//!   Vec<RawEvent> / WatchChannel
//! ```

pub mod error;
pub mod google;
pub mod provider;
pub mod raw_event;

pub use error::{ErrorClass, ProviderError, ProviderErrorCode, ProviderResult};
pub use provider::{BoxFuture, CalendarProvider, EventQuery, WatchChannel};
pub use raw_event::RawEvent;
