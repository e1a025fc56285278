//! Per-user event cache and the reconciliation of fetched batches into it.
//!
//! The cache is persisted as a single JSON value under `<userID>_eventcache`.
//! Callers reconcile into a copy and only replace the stored value once the
//! write succeeded, so a failed pass leaves the previous cache and cursor in
//! effect.

use std::collections::BTreeSet;

use calbot_core::{Event, TimeWindow};
use calbot_providers::RawEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Key suffix for stored caches.
pub const CACHE_KEY_SUFFIX: &str = "_eventcache";

/// Cached events for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCache {
    pub owner: String,

    /// Incremental watermark. `None` until the first successful pass.
    pub last_sync_cursor: Option<DateTime<Utc>>,

    /// Events in insertion order; ids are unique.
    events: Vec<Event>,

    /// Ids already announced, or claimed for a delivery in progress.
    #[serde(default)]
    notified: BTreeSet<String>,

    /// A reconnect prompt was sent since the last successful pass.
    #[serde(default)]
    pub reconnect_prompted: bool,
}

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
    /// Non-cancelled events dropped for lacking a start or end.
    pub skipped: usize,
}

impl ReconcileStats {
    pub fn changed(&self) -> usize {
        self.inserted + self.updated + self.removed
    }
}

impl EventCache {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            last_sync_cursor: None,
            events: Vec::new(),
            notified: BTreeSet::new(),
            reconnect_prompted: false,
        }
    }

    pub fn key(user_id: &str) -> String {
        format!("{}{}", user_id, CACHE_KEY_SUFFIX)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn get(&self, id: &str) -> Option<&Event> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_notified(&self, id: &str) -> bool {
        self.notified.contains(id)
    }

    pub fn mark_notified(&mut self, id: &str) {
        self.notified.insert(id.to_string());
    }

    /// Releases a mark so the event is offered again on the next scan.
    pub fn clear_notified(&mut self, id: &str) {
        self.notified.remove(id);
    }

    /// Applies a fetched batch and advances the cursor to `fetched_at`.
    ///
    /// Cancellations remove the entry, known ids are replaced in place and
    /// new ids are appended. A changed start time clears the notified mark.
    /// Entries of the batch are applied in order, so a repeated id ends up
    /// with its last version.
    pub fn reconcile(&mut self, batch: &[RawEvent], fetched_at: DateTime<Utc>) -> ReconcileStats {
        let mut stats = ReconcileStats::default();

        for raw in batch {
            if raw.is_cancelled() {
                if let Some(pos) = self.position(&raw.id) {
                    self.events.remove(pos);
                    stats.removed += 1;
                    trace!(event_id = %raw.id, "removed cancelled event");
                }
                self.notified.remove(&raw.id);
                continue;
            }

            let Some(event) = raw.to_event() else {
                warn!(
                    user_id = %self.owner,
                    event_id = %raw.id,
                    "skipping event without start or end"
                );
                stats.skipped += 1;
                continue;
            };

            match self.position(&event.id) {
                Some(pos) => {
                    if self.events[pos].start != event.start {
                        self.notified.remove(&event.id);
                    }
                    self.events[pos] = event;
                    stats.updated += 1;
                }
                None => {
                    self.events.push(event);
                    stats.inserted += 1;
                }
            }
        }

        self.last_sync_cursor = Some(fetched_at);
        debug!(
            user_id = %self.owner,
            inserted = stats.inserted,
            updated = stats.updated,
            removed = stats.removed,
            skipped = stats.skipped,
            "reconciled batch"
        );
        stats
    }

    /// Events to announce for `window`: not cancelled, timed, starting in the
    /// window and not yet notified.
    pub fn due(&self, window: &TimeWindow) -> Vec<Event> {
        self.events
            .iter()
            .filter(|e| !e.is_cancelled() && e.starts_within(window) && !self.is_notified(&e.id))
            .cloned()
            .collect()
    }

    /// Drops events that ended before `now` along with their notified marks.
    pub fn evict_finished(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.events.len();
        let notified = &mut self.notified;
        self.events.retain(|e| {
            if e.has_ended(now) {
                notified.remove(&e.id);
                false
            } else {
                true
            }
        });
        before - self.events.len()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.events.iter().position(|e| e.id == id)
    }
}
