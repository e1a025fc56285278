//! Per-user OAuth credentials and their storage.
//!
//! Credentials live in the key-value store under `<userID>_usertoken`. All
//! refreshes for one user go through [`CredentialStore::lock`], so only one
//! task at a time rewrites a user's credential.

use std::sync::Arc;

use calbot_core::{KeyedLocks, KvStore, KvStoreExt};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::error::ProviderResult;

/// Key suffix for stored credentials.
pub const CREDENTIAL_KEY_SUFFIX: &str = "_usertoken";

/// A user's delegated-access token pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub user_id: String,

    /// The access token for API requests.
    pub access_token: String,

    /// Used to obtain new access tokens. Google only returns it on the
    /// first consent, so a refresh never clears it.
    pub refresh_token: Option<String>,

    /// When the access token expires. `None` means unknown.
    pub expires_at: Option<DateTime<Utc>>,

    /// The OAuth scopes that were granted.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// When the access token was last obtained.
    pub last_refresh: DateTime<Utc>,
}

impl Credential {
    /// Builds a credential from a token grant received at `now`.
    pub fn from_grant(user_id: impl Into<String>, grant: TokenGrant, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: grant.expires_in.map(|secs| now + Duration::seconds(secs)),
            scopes: grant.scopes,
            last_refresh: now,
        }
    }

    /// True when the access token expires within `margin` of `now`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - now <= margin,
            None => false,
        }
    }

    /// Applies a refresh grant. The refresh token is only replaced when the
    /// grant carries a new one.
    pub fn apply_refresh(&mut self, grant: TokenGrant, now: DateTime<Utc>) {
        self.access_token = grant.access_token;
        self.expires_at = grant.expires_in.map(|secs| now + Duration::seconds(secs));
        if grant.refresh_token.is_some() {
            self.refresh_token = grant.refresh_token;
        }
        if !grant.scopes.is_empty() {
            self.scopes = grant.scopes;
        }
        self.last_refresh = now;
    }

    /// Returns true if the credential has the required scopes.
    pub fn has_scopes(&self, required: &[String]) -> bool {
        required.iter().all(|scope| self.scopes.contains(scope))
    }
}

/// Tokens returned by the OAuth token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds.
    pub expires_in: Option<i64>,
    pub scopes: Vec<String>,
}

/// Credential persistence keyed by user id.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    store: Arc<dyn KvStore>,
    locks: Arc<KeyedLocks>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    pub fn key(user_id: &str) -> String {
        format!("{}{}", user_id, CREDENTIAL_KEY_SUFFIX)
    }

    /// Returns the stored credential, or `None` if the user never connected.
    pub fn get(&self, user_id: &str) -> ProviderResult<Option<Credential>> {
        Ok(self.store.get_json(&Self::key(user_id))?)
    }

    pub fn put(&self, credential: &Credential) -> ProviderResult<()> {
        self.store
            .set_json(&Self::key(&credential.user_id), credential)?;
        debug!(user_id = %credential.user_id, "stored credential");
        Ok(())
    }

    pub fn delete(&self, user_id: &str) -> ProviderResult<()> {
        self.store.delete(&Self::key(user_id))?;
        self.locks.forget(user_id);
        Ok(())
    }

    /// Serializes credential updates for `user_id`.
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calbot_core::MemoryStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 5, 9, 0, 0).unwrap()
    }

    fn grant(access: &str, refresh: Option<&str>) -> TokenGrant {
        TokenGrant {
            access_token: access.to_string(),
            refresh_token: refresh.map(String::from),
            expires_in: Some(3600),
            scopes: vec!["scope1".to_string()],
        }
    }

    #[test]
    fn needs_refresh_inside_margin() {
        let cred = Credential::from_grant("alice", grant("a1", Some("r1")), now());
        let margin = Duration::seconds(60);

        assert!(!cred.needs_refresh(now(), margin));
        assert!(!cred.needs_refresh(now() + Duration::seconds(3539), margin));
        assert!(cred.needs_refresh(now() + Duration::seconds(3540), margin));
        assert!(cred.needs_refresh(now() + Duration::hours(2), margin));
    }

    #[test]
    fn credential_without_expiry_never_refreshes() {
        let mut g = grant("a1", Some("r1"));
        g.expires_in = None;
        let cred = Credential::from_grant("alice", g, now());
        assert!(!cred.needs_refresh(now() + Duration::days(30), Duration::seconds(60)));
    }

    #[test]
    fn refresh_keeps_refresh_token_when_absent() {
        let mut cred = Credential::from_grant("alice", grant("a1", Some("r1")), now());
        let later = now() + Duration::minutes(59);
        cred.apply_refresh(grant("a2", None), later);

        assert_eq!(cred.access_token, "a2");
        assert_eq!(cred.refresh_token.as_deref(), Some("r1"));
        assert_eq!(cred.expires_at, Some(later + Duration::seconds(3600)));
        assert_eq!(cred.last_refresh, later);
    }

    #[test]
    fn scope_check() {
        let cred = Credential::from_grant("alice", grant("a1", None), now());
        assert!(cred.has_scopes(&["scope1".to_string()]));
        assert!(!cred.has_scopes(&["scope2".to_string()]));
    }

    #[test]
    fn store_put_get_delete() {
        let store = CredentialStore::new(Arc::new(MemoryStore::new()));
        assert!(store.get("alice").unwrap().is_none());

        let cred = Credential::from_grant("alice", grant("a1", Some("r1")), now());
        store.put(&cred).unwrap();
        assert_eq!(store.get("alice").unwrap(), Some(cred));
        assert!(store.get("bob").unwrap().is_none());

        store.delete("alice").unwrap();
        assert!(store.get("alice").unwrap().is_none());
    }

    #[test]
    fn credential_key_format() {
        assert_eq!(CredentialStore::key("u123"), "u123_usertoken");
    }
}
