//! Engine configuration.

use std::time::Duration;

use crate::error::{ServerError, ServerResult};

/// Immutable engine settings, built once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Public base URL of this service, e.g. `https://chat.example/plugins/calendar`.
    pub site_url: String,

    /// Path of the inbound push endpoint.
    pub webhook_path: String,

    /// Scheduler tick period; also the width of the notification window.
    pub tick_period: Duration,

    /// How long before the start an event is announced.
    pub notification_lead: chrono::Duration,

    /// A subscription this close to expiry is renewed.
    pub renewal_margin: chrono::Duration,

    /// How far ahead event listings reach.
    pub bootstrap_horizon: chrono::Duration,

    /// Maximum orphaned channels remembered per user.
    pub orphan_cap: usize,
}

impl EngineConfig {
    pub const DEFAULT_WEBHOOK_PATH: &'static str = "/watch";

    pub fn new(site_url: impl Into<String>) -> Self {
        Self {
            site_url: site_url.into().trim_end_matches('/').to_string(),
            webhook_path: Self::DEFAULT_WEBHOOK_PATH.to_string(),
            tick_period: Duration::from_secs(60),
            notification_lead: chrono::Duration::minutes(10),
            renewal_margin: chrono::Duration::minutes(10),
            bootstrap_horizon: chrono::Duration::hours(1),
            orphan_cap: 20,
        }
    }

    pub fn with_webhook_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.webhook_path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        self
    }

    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub fn with_notification_lead(mut self, lead: chrono::Duration) -> Self {
        self.notification_lead = lead;
        self
    }

    pub fn with_renewal_margin(mut self, margin: chrono::Duration) -> Self {
        self.renewal_margin = margin;
        self
    }

    pub fn with_bootstrap_horizon(mut self, horizon: chrono::Duration) -> Self {
        self.bootstrap_horizon = horizon;
        self
    }

    pub fn with_orphan_cap(mut self, cap: usize) -> Self {
        self.orphan_cap = cap;
        self
    }

    /// Tick period as a calendar duration.
    pub fn period(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.tick_period).unwrap_or(chrono::Duration::MAX)
    }

    /// Lead time in whole minutes, as shown to users.
    pub fn lead_minutes(&self) -> i64 {
        self.notification_lead.num_minutes()
    }

    /// Address Google pushes change notifications for `user_id` to.
    pub fn callback_url(&self, user_id: &str) -> String {
        format!(
            "{}{}?userID={}",
            self.site_url,
            self.webhook_path,
            urlencoding::encode(user_id)
        )
    }

    /// Where users start the connect flow.
    pub fn connect_url(&self) -> String {
        format!("{}/oauth/connect", self.site_url)
    }

    /// OAuth redirect target.
    pub fn redirect_url(&self) -> String {
        format!("{}/oauth/complete", self.site_url)
    }

    pub fn validate(&self) -> ServerResult<()> {
        let site = url::Url::parse(&self.site_url)
            .map_err(|e| ServerError::config(format!("invalid site URL {}: {}", self.site_url, e)))?;
        if !matches!(site.scheme(), "http" | "https") {
            return Err(ServerError::config("site URL must be http or https"));
        }

        if self.tick_period.is_zero() {
            return Err(ServerError::config("tick period must be positive"));
        }
        if self.notification_lead < chrono::Duration::zero() {
            return Err(ServerError::config("notification lead must not be negative"));
        }
        if self.renewal_margin <= self.period() {
            return Err(ServerError::config(format!(
                "renewal margin ({}s) must exceed the tick period ({}s)",
                self.renewal_margin.num_seconds(),
                self.tick_period.as_secs()
            )));
        }
        if self.bootstrap_horizon <= chrono::Duration::zero() {
            return Err(ServerError::config("bootstrap horizon must be positive"));
        }
        Ok(())
    }
}
