//! Google Calendar provider implementation.
//!
//! Implements [`CalendarProvider`] on top of [`GoogleCalendarClient`]. Every
//! call first obtains a usable access token for the user, refreshing and
//! persisting it when it is close to expiry.

use std::sync::Arc;

use calbot_core::{Clock, KvStore};
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{BoxFuture, CalendarProvider, EventQuery, WatchChannel};
use crate::raw_event::RawEvent;

use super::client::GoogleCalendarClient;
use super::config::GoogleConfig;
use super::oauth::{ConnectState, OAuthClient};
use super::tokens::{Credential, CredentialStore};

const PROVIDER_NAME: &str = "google";

/// Google Calendar provider serving every connected user.
pub struct GoogleProvider {
    config: GoogleConfig,
    client: GoogleCalendarClient,
    oauth: OAuthClient,
    credentials: CredentialStore,
    clock: Arc<dyn Clock>,
}

impl GoogleProvider {
    pub fn new(
        config: GoogleConfig,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> ProviderResult<Self> {
        config.validate().map_err(ProviderError::configuration)?;

        let client = GoogleCalendarClient::new(&config)?;
        let oauth = OAuthClient::new(&config)?;

        Ok(Self {
            config,
            client,
            oauth,
            credentials: CredentialStore::new(store),
            clock,
        })
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Consent URL for a connect attempt carrying `state`.
    pub fn authorization_url(&self, state: &ConnectState) -> String {
        self.oauth.authorization_url(state)
    }

    /// Exchanges an authorization code and stores the resulting credential.
    pub async fn connect_with_code(&self, user_id: &str, code: &str) -> ProviderResult<Credential> {
        let grant = self
            .oauth
            .exchange_code(code)
            .await
            .map_err(|e| e.with_provider(PROVIDER_NAME))?;

        let _guard = self.credentials.lock(user_id).await;
        let mut credential = Credential::from_grant(user_id, grant, self.clock.now());

        // Google omits the refresh token when consent was already granted.
        if credential.refresh_token.is_none()
            && let Some(previous) = self.credentials.get(user_id)?
        {
            credential.refresh_token = previous.refresh_token;
        }

        if !credential.scopes.is_empty() && !credential.has_scopes(&self.config.scopes) {
            warn!(user_id, scopes = ?credential.scopes, "granted scopes differ from requested");
        }

        self.credentials.put(&credential)?;
        info!(user_id, "stored new credential");
        Ok(credential)
    }

    /// Returns a usable access token for `user_id`.
    ///
    /// A token inside the refresh margin is refreshed and the new credential
    /// is persisted before the token is handed out. Refreshes for one user
    /// are serialized.
    pub async fn access_token(&self, user_id: &str) -> ProviderResult<String> {
        let _guard = self.credentials.lock(user_id).await;

        let mut credential = self.credentials.get(user_id)?.ok_or_else(|| {
            ProviderError::authentication(format!("user {} is not connected", user_id))
                .with_provider(PROVIDER_NAME)
        })?;

        let now = self.clock.now();
        if !credential.needs_refresh(now, self.config.refresh_margin) {
            return Ok(credential.access_token);
        }

        let refresh_token = credential.refresh_token.as_deref().ok_or_else(|| {
            ProviderError::authentication("access token expired and no refresh token stored")
                .with_provider(PROVIDER_NAME)
        })?;

        debug!(user_id, "refreshing access token");
        let grant = self
            .oauth
            .refresh(refresh_token)
            .await
            .map_err(|e| e.with_provider(PROVIDER_NAME))?;

        credential.apply_refresh(grant, now);
        self.credentials.put(&credential)?;
        Ok(credential.access_token)
    }

    async fn list_events_impl(
        &self,
        user_id: &str,
        query: EventQuery,
    ) -> ProviderResult<Vec<RawEvent>> {
        let token = self.access_token(user_id).await?;
        self.client
            .list_events(&token, &self.config.calendar_id, &query)
            .await
            .map_err(|e| e.with_provider(PROVIDER_NAME))
    }

    async fn watch_impl(
        &self,
        user_id: &str,
        callback_url: &str,
        channel_id: &str,
    ) -> ProviderResult<WatchChannel> {
        let token = self.access_token(user_id).await?;
        self.client
            .watch(&token, &self.config.calendar_id, callback_url, channel_id)
            .await
            .map_err(|e| e.with_provider(PROVIDER_NAME))
    }

    async fn stop_watch_impl(
        &self,
        user_id: &str,
        channel_id: &str,
        resource_id: &str,
    ) -> ProviderResult<()> {
        let token = self.access_token(user_id).await?;
        self.client
            .stop(&token, channel_id, resource_id)
            .await
            .map_err(|e| e.with_provider(PROVIDER_NAME))
    }
}

impl CalendarProvider for GoogleProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn list_events<'a>(
        &'a self,
        user_id: &'a str,
        query: EventQuery,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
        Box::pin(self.list_events_impl(user_id, query))
    }

    fn watch<'a>(
        &'a self,
        user_id: &'a str,
        callback_url: &'a str,
        channel_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<WatchChannel>> {
        Box::pin(self.watch_impl(user_id, callback_url, channel_id))
    }

    fn stop_watch<'a>(
        &'a self,
        user_id: &'a str,
        channel_id: &'a str,
        resource_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(self.stop_watch_impl(user_id, channel_id, resource_id))
    }
}
