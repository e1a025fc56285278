//! Events as returned by the provider, before reconciliation.
//!
//! Cancelled entries from an incremental fetch usually carry nothing but an
//! id and a status, so start and end are optional here and only required once
//! an event is turned into a cached [`Event`].

use calbot_core::{Event, EventStatus, EventTime};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a fetched batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub status: EventStatus,
    pub summary: Option<String>,
    pub html_link: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    /// Provider-side last-modified time.
    pub updated: Option<DateTime<Utc>>,
}

impl RawEvent {
    /// Creates a confirmed event spanning `start..end`.
    pub fn new(id: impl Into<String>, start: EventTime, end: EventTime) -> Self {
        Self {
            id: id.into(),
            status: EventStatus::Confirmed,
            summary: None,
            html_link: None,
            start: Some(start),
            end: Some(end),
            updated: None,
        }
    }

    /// Creates a cancellation tombstone.
    pub fn cancelled(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: EventStatus::Cancelled,
            summary: None,
            html_link: None,
            start: None,
            end: None,
            updated: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == EventStatus::Cancelled
    }

    /// Converts into a cache entry. Returns `None` when a boundary is missing.
    pub fn to_event(&self) -> Option<Event> {
        let (start, end) = match (&self.start, &self.end) {
            (Some(start), Some(end)) => (start.clone(), end.clone()),
            _ => return None,
        };
        Some(Event {
            id: self.id.clone(),
            html_link: self.html_link.clone(),
            start,
            end,
            summary: self.summary.clone(),
            status: self.status,
        })
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_html_link(mut self, html_link: impl Into<String>) -> Self {
        self.html_link = Some(html_link.into());
        self
    }

    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_updated(mut self, updated: DateTime<Utc>) -> Self {
        self.updated = Some(updated);
        self
    }
}
