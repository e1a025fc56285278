//! The calendar sync engine.
//!
//! [`Engine`] owns everything one process needs to serve all connected users:
//! the provider, the store, the notification sink and the watch manager. The
//! HTTP layer and the scheduler only call into it.

use std::sync::Arc;

use calbot_core::{Clock, KeyedLocks, TimeWindow};
use calbot_providers::google::{ConnectState, GoogleProvider};
use calbot_providers::{BoxFuture, CalendarProvider, ErrorClass, EventQuery, ProviderResult};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::cache::{EventCache, ReconcileStats};
use crate::config::EngineConfig;
use crate::error::{ServerError, ServerResult};
use crate::notify::{Notification, NotificationSink};
use crate::repository::Repository;
use crate::scheduler::TickReport;
use crate::watch::{PushDecision, WatchManager};

/// The authorization side of a provider.
pub trait OAuthConnector: Send + Sync {
    /// Consent URL for a connect attempt.
    fn authorization_url(&self, state: &ConnectState) -> String;

    /// Exchanges an authorization code and stores the credential.
    fn exchange<'a>(&'a self, user_id: &'a str, code: &'a str) -> BoxFuture<'a, ProviderResult<()>>;

    /// Forgets the user's credential.
    fn disconnect(&self, user_id: &str) -> ProviderResult<()>;
}

impl OAuthConnector for GoogleProvider {
    fn authorization_url(&self, state: &ConnectState) -> String {
        GoogleProvider::authorization_url(self, state)
    }

    fn exchange<'a>(&'a self, user_id: &'a str, code: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.connect_with_code(user_id, code).await?;
            Ok(())
        })
    }

    fn disconnect(&self, user_id: &str) -> ProviderResult<()> {
        self.credentials().delete(user_id)
    }
}

/// What happened to an inbound push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Reconciled(ReconcileStats),
    /// The reconcile failed with a non-store error; logged and dropped.
    Failed,
    Handshake,
    Stale,
}

pub struct Engine {
    config: Arc<EngineConfig>,
    provider: Arc<dyn CalendarProvider>,
    connector: Arc<dyn OAuthConnector>,
    sink: Arc<dyn NotificationSink>,
    repo: Repository,
    watches: WatchManager,
    locks: KeyedLocks,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn CalendarProvider>,
        connector: Arc<dyn OAuthConnector>,
        sink: Arc<dyn NotificationSink>,
        repo: Repository,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = Arc::new(config);
        let watches = WatchManager::new(provider.clone(), repo.clone(), config.clone(), clock.clone());
        Self {
            config,
            provider,
            connector,
            sink,
            repo,
            watches,
            locks: KeyedLocks::new(),
            clock,
        }
    }

    /// Wires an engine around a Google provider.
    pub fn google(
        config: EngineConfig,
        provider: Arc<GoogleProvider>,
        sink: Arc<dyn NotificationSink>,
        repo: Repository,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(config, provider.clone(), provider, sink, repo, clock)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn watches(&self) -> &WatchManager {
        &self.watches
    }

    /// The link a user follows to connect their calendar.
    pub fn connect_url(&self, user_id: &str) -> String {
        debug!(user_id, "issuing connect URL");
        self.config.connect_url()
    }

    /// Starts a connect attempt and returns the consent URL to redirect to.
    pub fn begin_connect(&self, user_id: &str) -> ServerResult<String> {
        let state = ConnectState::generate(user_id);
        self.repo.put_oauth_state(user_id, state.as_str())?;
        debug!(user_id, "stored connect state");
        Ok(self.connector.authorization_url(&state))
    }

    /// Finishes a connect attempt. Returns the connected user id.
    ///
    /// Failures after the code exchange are also reported to the user
    /// through the sink.
    pub async fn complete_oauth(&self, code: &str, state: &str) -> ServerResult<String> {
        let state = ConnectState::from_value(state);
        let user_id = state
            .user_id()
            .ok_or_else(|| ServerError::oauth_state("state carries no user id"))?
            .to_string();

        match self.repo.take_oauth_state(&user_id)? {
            Some(stored) if stored == state.as_str() => {}
            Some(_) => return Err(ServerError::oauth_state("state does not match")),
            None => return Err(ServerError::oauth_state("no connect in progress")),
        }

        self.connector.exchange(&user_id, code).await?;

        if let Err(e) = self.finish_connect(&user_id).await {
            self.log_failure(&user_id, "connect", &e);
            if let Err(send_err) = self
                .sink
                .send(&user_id, &Notification::connect_failed(&e))
                .await
            {
                warn!(user_id, error = %send_err, "failed to report connect failure");
            }
            return Err(e);
        }

        info!(user_id, "user connected");
        Ok(user_id)
    }

    async fn finish_connect(&self, user_id: &str) -> ServerResult<()> {
        self.repo.register(user_id)?;
        {
            let _guard = self.locks.lock(user_id).await;
            self.repo.save_cache(&EventCache::new(user_id))?;
        }
        self.reconcile_user(user_id).await?;
        self.watches.subscribe(user_id).await?;
        self.sink.send(user_id, &Notification::welcome()).await
    }

    /// Fetches changes for `user_id` and folds them into the cache.
    ///
    /// Without a cursor this is a bootstrap over the horizon; otherwise only
    /// events updated since the cursor are fetched. The stored cache is only
    /// replaced once the whole pass succeeded.
    pub async fn reconcile_user(&self, user_id: &str) -> ServerResult<ReconcileStats> {
        let _guard = self.locks.lock(user_id).await;

        let stored = self.repo.load_cache(user_id)?;
        let now = self.clock.now();
        let query = EventQuery::for_cursor(stored.last_sync_cursor, now, self.config.bootstrap_horizon);
        let mode = query.mode();

        let batch = self.provider.list_events(user_id, query).await?;

        let mut cache = stored;
        let stats = cache.reconcile(&batch, now);
        cache.reconnect_prompted = false;
        self.repo.save_cache(&cache)?;

        debug!(
            user_id,
            mode,
            fetched = batch.len(),
            changed = stats.changed(),
            "reconciled"
        );
        Ok(stats)
    }

    /// Handles a change notification. Only store failures are returned;
    /// other failures are logged and the push is acknowledged.
    pub async fn handle_push(
        &self,
        user_id: &str,
        channel_id: &str,
        resource_id: &str,
        state: &str,
    ) -> ServerResult<PushOutcome> {
        let decision = self
            .watches
            .validate_push(user_id, channel_id, resource_id, state)
            .await?;
        debug!(user_id, channel_id, state, %decision, "push received");

        match decision {
            PushDecision::Handshake => Ok(PushOutcome::Handshake),
            PushDecision::Stale => Ok(PushOutcome::Stale),
            PushDecision::Reconcile => match self.reconcile_user(user_id).await {
                Ok(stats) => Ok(PushOutcome::Reconciled(stats)),
                Err(e) if e.is_store() => {
                    self.log_failure(user_id, "reconcile", &e);
                    Err(e)
                }
                Err(e) => {
                    self.report_failure(user_id, "reconcile", &e).await;
                    Ok(PushOutcome::Failed)
                }
            },
        }
    }

    /// One scheduler pass for one user. Returns the notifications delivered.
    ///
    /// The pass first catches up with the provider; a failed fetch is logged
    /// and the scan runs over the cache as it was. Due events are marked and
    /// persisted before they are sent, so an event is announced at most once
    /// even when the store fails afterwards. A failed send releases the mark.
    pub async fn tick_user(&self, user_id: &str, now: DateTime<Utc>) -> ServerResult<usize> {
        if let Err(e) = self.reconcile_user(user_id).await {
            self.report_failure(user_id, "reconcile", &e).await;
        }

        let delivered = {
            let _guard = self.locks.lock(user_id).await;
            let mut cache = self.repo.load_cache(user_id)?;

            let window = TimeWindow::notification(now, self.config.notification_lead, self.config.period());
            let due = cache.due(&window);
            if !due.is_empty() {
                for event in &due {
                    cache.mark_notified(&event.id);
                }
                self.repo.save_cache(&cache)?;
            }

            let mut delivered = 0;
            let mut released = 0;
            for event in &due {
                let notification = Notification::event_reminder(event, self.config.lead_minutes());
                match self.sink.send(user_id, &notification).await {
                    Ok(()) => {
                        delivered += 1;
                        debug!(user_id, event_id = %event.id, "event announced");
                    }
                    Err(e) => {
                        self.log_failure(user_id, "notify", &e);
                        cache.clear_notified(&event.id);
                        released += 1;
                    }
                }
            }

            let evicted = cache.evict_finished(now);
            if released > 0 || evicted > 0 {
                self.repo.save_cache(&cache)?;
            }
            delivered
        };

        self.watches.renew_if_due(user_id, now).await?;
        Ok(delivered)
    }

    /// One scheduler pass over every connected user. A failing user is
    /// logged and does not stop the pass.
    pub async fn tick_all(&self, now: DateTime<Utc>) -> TickReport {
        let users = match self.repo.connected_users() {
            Ok(users) => users,
            Err(e) => {
                error!(error = %e, "failed to load connected users");
                return TickReport {
                    failed: 1,
                    ..Default::default()
                };
            }
        };

        let mut report = TickReport {
            users: users.len(),
            ..Default::default()
        };
        for user_id in &users {
            match self.tick_user(user_id, now).await {
                Ok(n) => report.notified += n,
                Err(e) => {
                    self.report_failure(user_id, "tick", &e).await;
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Removes every trace of the user: channel, credential, cache and
    /// registry entry.
    pub async fn disconnect(&self, user_id: &str) -> ServerResult<()> {
        if let Err(e) = self.watches.stop(user_id).await {
            self.log_failure(user_id, "stop watch", &e);
        }
        self.connector.disconnect(user_id)?;

        {
            let _guard = self.locks.lock(user_id).await;
            self.repo.delete_cache(user_id)?;
            self.repo.delete_watch(user_id)?;
            self.repo.unregister(user_id)?;
        }
        self.locks.forget(user_id);
        info!(user_id, "user disconnected");
        Ok(())
    }

    /// Number of users with a per-user lock entry.
    pub fn tracked_users(&self) -> usize {
        self.locks.len()
    }

    /// Logs a failure and, when the credential is no longer accepted, asks
    /// the user to reconnect.
    async fn report_failure(&self, user_id: &str, operation: &str, err: &ServerError) {
        self.log_failure(user_id, operation, err);
        if err.class() == ErrorClass::Unauthorized {
            self.prompt_reconnect(user_id).await;
        }
    }

    /// Sends the reconnect prompt once until the next successful pass.
    async fn prompt_reconnect(&self, user_id: &str) {
        let _guard = self.locks.lock(user_id).await;
        let mut cache = match self.repo.load_cache(user_id) {
            Ok(cache) => cache,
            Err(e) => {
                warn!(user_id, error = %e, "cannot load cache for reconnect prompt");
                return;
            }
        };
        if cache.reconnect_prompted {
            return;
        }

        let prompt = Notification::reconnect(&self.config.connect_url());
        if let Err(e) = self.sink.send(user_id, &prompt).await {
            warn!(user_id, error = %e, "failed to send reconnect prompt");
            return;
        }
        cache.reconnect_prompted = true;
        if let Err(e) = self.repo.save_cache(&cache) {
            warn!(user_id, error = %e, "failed to record reconnect prompt");
        }
    }

    fn log_failure(&self, user_id: &str, operation: &str, err: &ServerError) {
        match err.class() {
            ErrorClass::Transient => info!(user_id, operation, error = %err, "transient failure"),
            ErrorClass::Unauthorized => {
                warn!(user_id, operation, error = %err, "not authorized, user must reconnect")
            }
            ErrorClass::Protocol | ErrorClass::Store => {
                error!(user_id, operation, error = %err, class = %err.class(), "operation failed")
            }
        }
    }
}
