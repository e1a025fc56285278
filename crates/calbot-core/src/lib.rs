//! Core types: events, time, clock, key-value store, keyed locks, tracing

pub mod clock;
pub mod event;
pub mod locks;
pub mod store;
pub mod time;
pub mod tracing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use event::{Event, EventStatus};
pub use locks::{InFlight, InFlightGuard, KeyedLocks};
pub use store::{FileStore, KvStore, KvStoreExt, MemoryStore, StoreError, StoreResult};
pub use time::{EventTime, NOTIFICATION_SLACK_MINUTES, TimeWindow, truncate_to_minute};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
