//! Push-channel subscriptions.
//!
//! Each user has at most one active channel. Renewal opens the new channel
//! first, records it, and only then stops the previous one, so there is never
//! a gap without a channel. Channels that could not be stopped are remembered
//! in the record as orphans.

use std::fmt;
use std::sync::Arc;

use calbot_core::{Clock, InFlight};
use calbot_providers::{CalendarProvider, ErrorClass};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::ServerResult;
use crate::repository::Repository;

/// An open push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSubscription {
    pub owner_user_id: String,
    /// Chosen by us, UUID v4.
    pub channel_id: String,
    /// Chosen by the provider.
    pub resource_id: String,
    pub expiry: DateTime<Utc>,
}

impl WatchSubscription {
    /// True when `expiry - now <= margin`.
    pub fn should_renew(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expiry - now <= margin
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    Active,
    #[default]
    Stopped,
}

/// A channel we failed to close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedChannel {
    pub channel_id: String,
    pub resource_id: String,
    pub orphaned_at: DateTime<Utc>,
    pub reason: String,
}

/// Stored per user under `<userID>_calendarinfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRecord {
    pub state: WatchState,
    pub subscription: Option<WatchSubscription>,
    #[serde(default)]
    pub orphaned_channels: Vec<OrphanedChannel>,
}

impl WatchRecord {
    /// The subscription if the record is active.
    pub fn active(&self) -> Option<&WatchSubscription> {
        match self.state {
            WatchState::Active => self.subscription.as_ref(),
            WatchState::Stopped => None,
        }
    }

    /// Appends an orphan, dropping the oldest entries beyond `cap`.
    pub fn push_orphan(&mut self, orphan: OrphanedChannel, cap: usize) {
        self.orphaned_channels.push(orphan);
        if self.orphaned_channels.len() > cap {
            let excess = self.orphaned_channels.len() - cap;
            self.orphaned_channels.drain(..excess);
        }
    }
}

/// Result of a subscribe or renew call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Opened(WatchSubscription),
    /// Another renewal for the same user was already running.
    Skipped,
}

/// What to do with an inbound push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushDecision {
    /// Matching channel reporting a change.
    Reconcile,
    /// Matching channel, `sync` handshake.
    Handshake,
    /// Unknown or superseded channel; a stop was issued for it.
    Stale,
}

impl fmt::Display for PushDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reconcile => "reconcile",
            Self::Handshake => "handshake",
            Self::Stale => "stale",
        })
    }
}

/// Resource state sent with the initial handshake of a new channel.
pub const SYNC_STATE: &str = "sync";

/// Owns the lifecycle of users' push channels.
#[derive(Clone)]
pub struct WatchManager {
    provider: Arc<dyn CalendarProvider>,
    repo: Repository,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
    in_flight: InFlight,
}

impl WatchManager {
    pub fn new(
        provider: Arc<dyn CalendarProvider>,
        repo: Repository,
        config: Arc<EngineConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            repo,
            config,
            clock,
            in_flight: InFlight::new(),
        }
    }

    /// Opens a channel for `user_id`. An existing active channel is replaced
    /// the same way a renewal replaces it.
    pub async fn subscribe(&self, user_id: &str) -> ServerResult<ChannelOutcome> {
        self.replace_channel(user_id, "resubscribed").await
    }

    /// Replaces the user's channel with a fresh one.
    pub async fn renew(&self, user_id: &str) -> ServerResult<ChannelOutcome> {
        self.replace_channel(user_id, "renewed").await
    }

    /// Renews when the active subscription is inside the renewal margin, and
    /// subscribes a registered user that has no active channel, e.g. after a
    /// connect whose subscribe failed.
    pub async fn renew_if_due(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> ServerResult<Option<ChannelOutcome>> {
        let record = self.repo.load_watch(user_id)?;
        match record.active() {
            Some(sub) if sub.should_renew(now, self.config.renewal_margin) => {
                debug!(user_id, "subscription due for renewal");
                self.renew(user_id).await.map(Some)
            }
            Some(_) => Ok(None),
            None if self.repo.is_registered(user_id)? => {
                info!(user_id, "registered user has no channel, subscribing");
                self.subscribe(user_id).await.map(Some)
            }
            None => Ok(None),
        }
    }

    async fn replace_channel(&self, user_id: &str, reason: &str) -> ServerResult<ChannelOutcome> {
        let Some(_guard) = self.in_flight.try_begin(user_id) else {
            debug!(user_id, "channel replacement already in flight");
            return Ok(ChannelOutcome::Skipped);
        };

        let mut record = self.repo.load_watch(user_id)?;
        let previous = record.active().cloned();

        let channel_id = Uuid::new_v4().to_string();
        let callback_url = self.config.callback_url(user_id);
        let channel = self
            .provider
            .watch(user_id, &callback_url, &channel_id)
            .await?;

        let subscription = WatchSubscription {
            owner_user_id: user_id.to_string(),
            channel_id: channel.channel_id,
            resource_id: channel.resource_id,
            expiry: channel.expiry,
        };

        record.state = WatchState::Active;
        record.subscription = Some(subscription.clone());
        if let Err(e) = self.repo.save_watch(user_id, &record) {
            warn!(user_id, channel_id = %subscription.channel_id, error = %e,
                "failed to record new channel, discarding it");
            self.discard_uncommitted(user_id, &subscription).await;
            return Err(e);
        }

        info!(
            user_id,
            channel_id = %subscription.channel_id,
            expiry = %subscription.expiry,
            "opened push channel"
        );

        if let Some(old) = previous
            && old.channel_id != subscription.channel_id
        {
            self.stop_or_orphan(user_id, &old, reason).await;
        }

        Ok(ChannelOutcome::Opened(subscription))
    }

    /// Stops a channel that was opened but could not be recorded.
    async fn discard_uncommitted(&self, user_id: &str, sub: &WatchSubscription) {
        match self
            .provider
            .stop_watch(user_id, &sub.channel_id, &sub.resource_id)
            .await
        {
            Ok(()) => debug!(user_id, channel_id = %sub.channel_id, "stopped unrecorded channel"),
            Err(e) => {
                warn!(user_id, channel_id = %sub.channel_id, error = %e,
                    "failed to stop unrecorded channel");
                let mut record = match self.repo.load_watch(user_id) {
                    Ok(record) => record,
                    Err(_) => return,
                };
                record.push_orphan(self.orphan(sub, "unrecorded"), self.config.orphan_cap);
                if let Err(e) = self.repo.save_watch(user_id, &record) {
                    debug!(user_id, error = %e, "could not record orphaned channel");
                }
            }
        }
    }

    /// Stops the superseded channel. The new channel is already committed,
    /// so failures here are only recorded.
    async fn stop_or_orphan(&self, user_id: &str, old: &WatchSubscription, reason: &str) {
        let Err(e) = self
            .provider
            .stop_watch(user_id, &old.channel_id, &old.resource_id)
            .await
        else {
            debug!(user_id, channel_id = %old.channel_id, "stopped previous channel");
            return;
        };

        warn!(user_id, channel_id = %old.channel_id, error = %e,
            "failed to stop previous channel, recording orphan");
        let orphan = self.orphan(old, &format!("{}: {}", reason, e.code()));
        let saved = self.repo.load_watch(user_id).and_then(|mut record| {
            record.push_orphan(orphan, self.config.orphan_cap);
            self.repo.save_watch(user_id, &record)
        });
        if let Err(e) = saved {
            warn!(user_id, channel_id = %old.channel_id, error = %e, "could not record orphaned channel");
        }
    }

    /// Stops the active channel and marks the record stopped.
    pub async fn stop(&self, user_id: &str) -> ServerResult<()> {
        let mut record = self.repo.load_watch(user_id)?;
        if let Some(sub) = record.active().cloned() {
            if let Err(e) = self
                .provider
                .stop_watch(user_id, &sub.channel_id, &sub.resource_id)
                .await
            {
                warn!(user_id, channel_id = %sub.channel_id, error = %e, "failed to stop channel");
                record.push_orphan(self.orphan(&sub, "stopped"), self.config.orphan_cap);
            }
        }
        record.state = WatchState::Stopped;
        record.subscription = None;
        self.repo.save_watch(user_id, &record)?;
        info!(user_id, "watch stopped");
        Ok(())
    }

    /// Decides how to treat a push received for `user_id`.
    ///
    /// A push for a channel other than the active one gets that channel
    /// stopped. A `sync` handshake never triggers a stop, since it may arrive
    /// before the new channel has been recorded.
    pub async fn validate_push(
        &self,
        user_id: &str,
        channel_id: &str,
        resource_id: &str,
        state: &str,
    ) -> ServerResult<PushDecision> {
        let record = self.repo.load_watch(user_id)?;
        let matches = record
            .active()
            .is_some_and(|sub| sub.channel_id == channel_id);

        if state == SYNC_STATE {
            debug!(user_id, channel_id, matches, "sync handshake");
            return Ok(PushDecision::Handshake);
        }

        if matches {
            return Ok(PushDecision::Reconcile);
        }

        info!(user_id, channel_id, "push from stale channel, stopping it");
        if let Err(e) = self
            .provider
            .stop_watch(user_id, channel_id, resource_id)
            .await
        {
            match e.class() {
                ErrorClass::Transient => {
                    info!(user_id, channel_id, error = %e, "failed to stop stale channel")
                }
                _ => warn!(user_id, channel_id, error = %e, "failed to stop stale channel"),
            }
        }
        Ok(PushDecision::Stale)
    }

    fn orphan(&self, sub: &WatchSubscription, reason: &str) -> OrphanedChannel {
        OrphanedChannel {
            channel_id: sub.channel_id.clone(),
            resource_id: sub.resource_id.clone(),
            orphaned_at: self.clock.now(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 5, h, m, 0).unwrap()
    }

    fn sub(channel: &str, expiry: DateTime<Utc>) -> WatchSubscription {
        WatchSubscription {
            owner_user_id: "u1".to_string(),
            channel_id: channel.to_string(),
            resource_id: format!("res-{}", channel),
            expiry,
        }
    }

    #[test]
    fn should_renew_inside_margin() {
        let s = sub("c1", at(12, 0));
        let margin = Duration::minutes(10);
        assert!(!s.should_renew(at(11, 49), margin));
        assert!(s.should_renew(at(11, 50), margin));
        assert!(s.should_renew(at(12, 30), margin));
    }

    #[test]
    fn stopped_record_has_no_active_subscription() {
        let record = WatchRecord {
            state: WatchState::Stopped,
            subscription: Some(sub("c1", at(12, 0))),
            orphaned_channels: vec![],
        };
        assert!(record.active().is_none());
        assert!(WatchRecord::default().active().is_none());
    }

    #[test]
    fn orphans_are_bounded() {
        let mut record = WatchRecord::default();
        for i in 0..5 {
            record.push_orphan(
                OrphanedChannel {
                    channel_id: format!("c{}", i),
                    resource_id: "r".to_string(),
                    orphaned_at: at(9, i),
                    reason: "test".to_string(),
                },
                3,
            );
        }
        let ids: Vec<_> = record
            .orphaned_channels
            .iter()
            .map(|o| o.channel_id.as_str())
            .collect();
        assert_eq!(ids, vec!["c2", "c3", "c4"]);
    }
}
