//! Cached calendar event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::{EventTime, TimeWindow};

/// Provider-side status of an event. `Cancelled` is a tombstone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventStatus {
    /// Parses a provider status string. Unknown values count as confirmed.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("cancelled") {
            Self::Cancelled
        } else if value.eq_ignore_ascii_case("tentative") {
            Self::Tentative
        } else {
            Self::Confirmed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Tentative => "tentative",
            Self::Cancelled => "cancelled",
        }
    }
}

/// An event as kept in a user's cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Provider-assigned identifier, unique within the calendar.
    pub id: String,
    /// Link to the event in the provider's web UI.
    pub html_link: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub summary: Option<String>,
    pub status: EventStatus,
}

impl Event {
    /// Creates a confirmed event with no title or link.
    pub fn new(id: impl Into<String>, start: EventTime, end: EventTime) -> Self {
        Self {
            id: id.into(),
            html_link: None,
            start,
            end,
            summary: None,
            status: EventStatus::Confirmed,
        }
    }

    /// Returns the effective title, falling back to "(No title)" if empty.
    pub fn effective_title(&self) -> &str {
        self.summary
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("(No title)")
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == EventStatus::Cancelled
    }

    /// True if the event starts inside `window`. All-day events never do.
    pub fn starts_within(&self, window: &TimeWindow) -> bool {
        window.contains_event_time(&self.start)
    }

    /// True once the event's end lies before `now`.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end.to_utc_datetime() < now
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
}
