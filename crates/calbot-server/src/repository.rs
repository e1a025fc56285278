//! Typed access to the engine's keys in the key-value store.
//!
//! | key                      | value         |
//! |--------------------------|---------------|
//! | `<userID>_calendarinfo`  | [`WatchRecord`] |
//! | `<userID>_eventcache`    | [`EventCache`]  |
//! | `<userID>_oauthstate`    | pending connect state |
//! | `connected_users`        | registry of connected user ids |
//!
//! Credentials (`<userID>_usertoken`) belong to the provider's credential
//! store and are not touched here.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use calbot_core::{KvStore, KvStoreExt};
use tracing::debug;

use crate::cache::EventCache;
use crate::error::ServerResult;
use crate::watch::WatchRecord;

pub const REGISTRY_KEY: &str = "connected_users";
pub const WATCH_KEY_SUFFIX: &str = "_calendarinfo";
pub const OAUTH_STATE_KEY_SUFFIX: &str = "_oauthstate";

#[derive(Debug, Clone)]
pub struct Repository {
    store: Arc<dyn KvStore>,
    registry_lock: Arc<Mutex<()>>,
}

impl Repository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            registry_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Returns the user's cache, or an empty one if none is stored.
    pub fn load_cache(&self, user_id: &str) -> ServerResult<EventCache> {
        Ok(self
            .store
            .get_json(&EventCache::key(user_id))?
            .unwrap_or_else(|| EventCache::new(user_id)))
    }

    pub fn save_cache(&self, cache: &EventCache) -> ServerResult<()> {
        self.store.set_json(&EventCache::key(&cache.owner), cache)?;
        Ok(())
    }

    pub fn delete_cache(&self, user_id: &str) -> ServerResult<()> {
        self.store.delete(&EventCache::key(user_id))?;
        Ok(())
    }

    /// Returns the user's watch record, or an unsubscribed one.
    pub fn load_watch(&self, user_id: &str) -> ServerResult<WatchRecord> {
        Ok(self
            .store
            .get_json(&watch_key(user_id))?
            .unwrap_or_default())
    }

    pub fn save_watch(&self, user_id: &str, record: &WatchRecord) -> ServerResult<()> {
        self.store.set_json(&watch_key(user_id), record)?;
        Ok(())
    }

    pub fn delete_watch(&self, user_id: &str) -> ServerResult<()> {
        self.store.delete(&watch_key(user_id))?;
        Ok(())
    }

    pub fn put_oauth_state(&self, user_id: &str, state: &str) -> ServerResult<()> {
        self.store.set_json(&oauth_state_key(user_id), &state)?;
        Ok(())
    }

    /// Returns and removes the pending connect state.
    pub fn take_oauth_state(&self, user_id: &str) -> ServerResult<Option<String>> {
        let key = oauth_state_key(user_id);
        let state: Option<String> = self.store.get_json(&key)?;
        if state.is_some() {
            self.store.delete(&key)?;
        }
        Ok(state)
    }

    /// Connected user ids in sorted order.
    pub fn connected_users(&self) -> ServerResult<Vec<String>> {
        Ok(self.load_registry()?.into_iter().collect())
    }

    pub fn is_registered(&self, user_id: &str) -> ServerResult<bool> {
        Ok(self.load_registry()?.contains(user_id))
    }

    /// Adds `user_id` to the registry. Returns false if it was already there.
    pub fn register(&self, user_id: &str) -> ServerResult<bool> {
        let _guard = self.registry_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut users = self.load_registry()?;
        if !users.insert(user_id.to_string()) {
            return Ok(false);
        }
        self.store.set_json(REGISTRY_KEY, &users)?;
        debug!(user_id, count = users.len(), "registered user");
        Ok(true)
    }

    /// Removes `user_id` from the registry. Returns false if it was absent.
    pub fn unregister(&self, user_id: &str) -> ServerResult<bool> {
        let _guard = self.registry_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut users = self.load_registry()?;
        if !users.remove(user_id) {
            return Ok(false);
        }
        self.store.set_json(REGISTRY_KEY, &users)?;
        debug!(user_id, count = users.len(), "unregistered user");
        Ok(true)
    }

    fn load_registry(&self) -> ServerResult<BTreeSet<String>> {
        Ok(self.store.get_json(REGISTRY_KEY)?.unwrap_or_default())
    }
}

fn watch_key(user_id: &str) -> String {
    format!("{}{}", user_id, WATCH_KEY_SUFFIX)
}

fn oauth_state_key(user_id: &str) -> String {
    format!("{}{}", user_id, OAUTH_STATE_KEY_SUFFIX)
}
