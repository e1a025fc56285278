//! Shared fakes for the engine integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use calbot_core::{EventTime, KvStore, ManualClock, MemoryStore, StoreError, StoreResult};
use calbot_providers::google::ConnectState;
use calbot_providers::{
    BoxFuture, CalendarProvider, EventQuery, ProviderError, ProviderResult, RawEvent, WatchChannel,
};
use calbot_server::{
    Engine, EngineConfig, Notification, NotificationSink, Repository, ServerError, ServerResult,
};
use chrono::{DateTime, TimeZone, Utc};

pub const SITE_URL: &str = "https://chat.example/plugins/calendar";

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, 5, h, m, 0).unwrap()
}

pub fn timed(id: &str, start: DateTime<Utc>) -> RawEvent {
    RawEvent::new(
        id,
        EventTime::from_utc(start),
        EventTime::from_utc(start + chrono::Duration::minutes(30)),
    )
    .with_summary(id.to_uppercase())
}

/// Scripted provider. Listings pop batches from a queue; an empty queue
/// yields an empty batch.
#[derive(Default)]
pub struct FakeProvider {
    batches: Mutex<VecDeque<Vec<RawEvent>>>,
    pub queries: Mutex<Vec<EventQuery>>,
    pub list_delay: Mutex<Option<Duration>>,
    pub fail_list: AtomicBool,
    pub revoked: AtomicBool,

    channel_seq: AtomicUsize,
    pub channel_expiry: Mutex<Option<DateTime<Utc>>>,
    pub watch_delay: Mutex<Option<Duration>>,
    pub watches: Mutex<Vec<(String, String)>>,
    pub fail_watch: AtomicBool,

    pub stops: Mutex<Vec<(String, String)>>,
    pub fail_stop: AtomicBool,

    pub exchanged: Mutex<Vec<(String, String)>>,
    pub fail_exchange: AtomicBool,
    pub disconnected: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        let provider = Self::default();
        *provider.channel_expiry.lock().unwrap() = Some(at(23, 0));
        Arc::new(provider)
    }

    pub fn push_batch(&self, batch: Vec<RawEvent>) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn stopped(&self) -> Vec<(String, String)> {
        self.stops.lock().unwrap().clone()
    }

    pub fn watch_count(&self) -> usize {
        self.watches.lock().unwrap().len()
    }

    async fn list(&self, query: EventQuery) -> ProviderResult<Vec<RawEvent>> {
        self.queries.lock().unwrap().push(query);
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.revoked.load(Ordering::SeqCst) {
            return Err(ProviderError::authentication("token has been revoked"));
        }
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(ProviderError::network("connection reset"));
        }
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn open(&self, callback_url: &str, channel_id: &str) -> ProviderResult<WatchChannel> {
        let delay = *self.watch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_watch.load(Ordering::SeqCst) {
            return Err(ProviderError::server("backend unavailable"));
        }
        self.watches
            .lock()
            .unwrap()
            .push((channel_id.to_string(), callback_url.to_string()));
        let n = self.channel_seq.fetch_add(1, Ordering::SeqCst);
        Ok(WatchChannel {
            channel_id: channel_id.to_string(),
            resource_id: format!("res-{}", n),
            expiry: (*self.channel_expiry.lock().unwrap()).unwrap_or_else(|| at(23, 0)),
        })
    }
}

impl CalendarProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    fn list_events<'a>(
        &'a self,
        _user_id: &'a str,
        query: EventQuery,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
        Box::pin(self.list(query))
    }

    fn watch<'a>(
        &'a self,
        _user_id: &'a str,
        callback_url: &'a str,
        channel_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<WatchChannel>> {
        Box::pin(self.open(callback_url, channel_id))
    }

    fn stop_watch<'a>(
        &'a self,
        _user_id: &'a str,
        channel_id: &'a str,
        resource_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.stops
                .lock()
                .unwrap()
                .push((channel_id.to_string(), resource_id.to_string()));
            if self.fail_stop.load(Ordering::SeqCst) {
                return Err(ProviderError::network("stop timed out"));
            }
            Ok(())
        })
    }
}

impl calbot_server::OAuthConnector for FakeProvider {
    fn authorization_url(&self, state: &ConnectState) -> String {
        format!("https://accounts.example/auth?state={}", state.as_str())
    }

    fn exchange<'a>(&'a self, user_id: &'a str, code: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            if self.fail_exchange.load(Ordering::SeqCst) {
                return Err(ProviderError::authentication("invalid_grant"));
            }
            self.exchanged
                .lock()
                .unwrap()
                .push((user_id.to_string(), code.to_string()));
            Ok(())
        })
    }

    fn disconnect(&self, user_id: &str) -> ProviderResult<()> {
        self.disconnected.lock().unwrap().push(user_id.to_string());
        Ok(())
    }
}

/// Sink that records every delivery.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(String, Notification)>>,
    pub fail: AtomicBool,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .flat_map(|(_, n)| n.attachments.into_iter().map(|a| a.title))
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn send<'a>(
        &'a self,
        user_id: &'a str,
        notification: &'a Notification,
    ) -> BoxFuture<'a, ServerResult<()>> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ServerError::notify("chat unavailable"));
            }
            self.sent
                .lock()
                .unwrap()
                .push((user_id.to_string(), notification.clone()));
            Ok(())
        })
    }
}

/// Memory store whose writes can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }
}

impl KvStore for FlakyStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("write to {} refused", key)));
        }
        self.inner.set(key, value)
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("delete of {} refused", key)));
        }
        self.inner.delete(key)
    }
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub provider: Arc<FakeProvider>,
    pub sink: Arc<RecordingSink>,
    pub store: Arc<FlakyStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_config(now, EngineConfig::new(SITE_URL))
    }

    pub fn with_config(now: DateTime<Utc>, config: EngineConfig) -> Self {
        let provider = FakeProvider::new();
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(FlakyStore::default());
        let clock = Arc::new(ManualClock::new(now));
        let engine = Engine::new(
            config,
            provider.clone(),
            provider.clone(),
            sink.clone(),
            Repository::new(store.clone()),
            clock.clone(),
        );
        Self {
            engine: Arc::new(engine),
            provider,
            sink,
            store,
            clock,
        }
    }

    pub fn repo(&self) -> &Repository {
        self.engine.repository()
    }

    /// Registers `user_id` and opens a channel, as a completed connect would.
    pub async fn connect(&self, user_id: &str) -> String {
        self.repo().register(user_id).unwrap();
        match self.engine.watches().subscribe(user_id).await.unwrap() {
            calbot_server::ChannelOutcome::Opened(sub) => sub.channel_id,
            calbot_server::ChannelOutcome::Skipped => panic!("subscribe skipped"),
        }
    }
}
