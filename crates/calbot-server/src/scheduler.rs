//! Periodic tick driver.
//!
//! One scheduler serves every connected user. Each tick reads the injected
//! [`Clock`] and calls the tick function with that instant. Commands arrive
//! through a cloneable [`SchedulerHandle`]:
//! - `TickNow` runs a tick immediately
//! - `Pause` / `Resume` suspend periodic ticks
//! - `Stop` ends the loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use calbot_core::Clock;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between ticks.
    pub tick_period: Duration,
    /// Whether the first tick runs right away instead of after one period.
    pub tick_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(60),
            tick_on_start: true,
        }
    }
}

impl SchedulerConfig {
    pub fn new(tick_period: Duration) -> Self {
        Self {
            tick_period,
            ..Default::default()
        }
    }

    /// Builder: run the first tick immediately or not.
    pub fn with_tick_on_start(mut self, tick_on_start: bool) -> Self {
        self.tick_on_start = tick_on_start;
        self
    }
}

/// Outcome of one tick across all users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub users: usize,
    pub failed: usize,
    pub notified: usize,
}

/// Commands that can be sent to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    TickNow,
    Pause,
    Resume,
    Stop,
}

/// Run statistics.
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    pub paused: bool,
    /// Ticks completed since start.
    pub ticks: u64,
    /// Per-user failures accumulated over all ticks.
    pub failures: u64,
    /// Notifications delivered over all ticks.
    pub notified: u64,
    /// Clock time of the last tick.
    pub last_tick: Option<DateTime<Utc>>,
    /// Report of the last tick.
    pub last_report: Option<TickReport>,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&mut self, at: DateTime<Utc>, report: TickReport) {
        self.ticks += 1;
        self.failures += report.failed as u64;
        self.notified += report.notified as u64;
        self.last_tick = Some(at);
        self.last_report = Some(report);
    }
}

/// Shared scheduler state.
pub type SharedSchedulerState = Arc<RwLock<SchedulerState>>;

pub fn new_scheduler_state() -> SharedSchedulerState {
    Arc::new(RwLock::new(SchedulerState::new()))
}

/// Drives periodic ticks.
pub struct Scheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    state: SharedSchedulerState,
    command_tx: mpsc::Sender<SchedulerCommand>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        Self {
            config,
            clock,
            state: new_scheduler_state(),
            command_tx,
            command_rx,
        }
    }

    /// Returns a handle for sending commands to the scheduler.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            command_tx: self.command_tx.clone(),
            state: self.state.clone(),
        }
    }

    pub fn state(&self) -> SharedSchedulerState {
        self.state.clone()
    }

    /// Runs until `Stop` is received or every handle is dropped.
    ///
    /// `tick_fn` is called with the clock's current time. A slow tick delays
    /// the next one rather than causing a burst.
    pub async fn run<F, Fut>(self, tick_fn: F)
    where
        F: Fn(DateTime<Utc>) -> Fut + Send + Sync,
        Fut: Future<Output = TickReport> + Send,
    {
        let Self {
            config,
            clock,
            state,
            command_tx,
            mut command_rx,
        } = self;
        // Only external handles keep the loop alive.
        drop(command_tx);

        info!(
            period_secs = config.tick_period.as_secs(),
            "scheduler started"
        );

        let start = if config.tick_on_start {
            tokio::time::Instant::now()
        } else {
            tokio::time::Instant::now() + config.tick_period
        };
        let mut ticker = tokio::time::interval_at(start, config.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if state.read().await.paused {
                        debug!("scheduler paused, skipping tick");
                        continue;
                    }
                    run_tick(&clock, &state, &tick_fn).await;
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::TickNow) => {
                            debug!("received TickNow command");
                            run_tick(&clock, &state, &tick_fn).await;
                        }
                        Some(SchedulerCommand::Pause) => {
                            info!("scheduler paused");
                            state.write().await.paused = true;
                        }
                        Some(SchedulerCommand::Resume) => {
                            info!("scheduler resumed");
                            state.write().await.paused = false;
                        }
                        Some(SchedulerCommand::Stop) | None => {
                            info!("scheduler stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}

async fn run_tick<F, Fut>(clock: &Arc<dyn Clock>, state: &SharedSchedulerState, tick_fn: &F)
where
    F: Fn(DateTime<Utc>) -> Fut,
    Fut: Future<Output = TickReport>,
{
    let now = clock.now();
    let report = tick_fn(now).await;
    if report.failed > 0 {
        warn!(
            users = report.users,
            failed = report.failed,
            "tick finished with failures"
        );
    } else {
        debug!(users = report.users, notified = report.notified, "tick finished");
    }
    state.write().await.record_tick(now, report);
}

/// Handle for sending commands to a running scheduler.
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    state: SharedSchedulerState,
}

impl SchedulerHandle {
    pub async fn tick_now(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::TickNow).await
    }

    pub async fn pause(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::Resume).await
    }

    pub async fn stop(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::Stop).await
    }

    /// Returns a snapshot of the run statistics.
    pub async fn state(&self) -> SchedulerState {
        self.state.read().await.clone()
    }

    pub async fn is_paused(&self) -> bool {
        self.state.read().await.paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calbot_core::ManualClock;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 5, 9, 0, 0).unwrap()
    }

    type Seen = Arc<Mutex<Vec<DateTime<Utc>>>>;

    fn spawn(
        config: SchedulerConfig,
        clock: Arc<ManualClock>,
    ) -> (SchedulerHandle, Seen, tokio::task::JoinHandle<()>) {
        let scheduler = Scheduler::new(config, clock);
        let handle = scheduler.handle();
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_task = seen.clone();

        let task = tokio::spawn(async move {
            scheduler
                .run(move |now| {
                    let seen = seen_in_task.clone();
                    async move {
                        seen.lock().unwrap().push(now);
                        TickReport {
                            users: 2,
                            failed: 1,
                            notified: 3,
                        }
                    }
                })
                .await;
        });
        (handle, seen, task)
    }

    #[test]
    fn state_accumulates_reports() {
        let mut state = SchedulerState::new();
        let report = TickReport {
            users: 3,
            failed: 1,
            notified: 2,
        };
        state.record_tick(t0(), report);
        state.record_tick(t0(), report);

        assert_eq!(state.ticks, 2);
        assert_eq!(state.failures, 2);
        assert_eq!(state.notified, 4);
        assert_eq!(state.last_tick, Some(t0()));
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_use_injected_clock() {
        let clock = Arc::new(ManualClock::new(t0()));
        let (handle, seen, task) = spawn(SchedulerConfig::new(Duration::from_secs(60)), clock.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*seen.lock().unwrap(), vec![t0()]);

        clock.advance(chrono::Duration::minutes(1));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(seen.lock().unwrap()[1], t0() + chrono::Duration::minutes(1));

        let state = handle.state().await;
        assert_eq!(state.ticks, 2);
        assert_eq!(state.failures, 2);

        handle.stop().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn commands_control_the_loop() {
        let clock = Arc::new(ManualClock::new(t0()));
        let config = SchedulerConfig::new(Duration::from_secs(60)).with_tick_on_start(false);
        let (handle, seen, task) = spawn(config, clock);

        handle.tick_now().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);

        handle.pause().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_paused().await);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);

        handle.resume().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_paused().await);

        handle.stop().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn dropping_every_handle_stops_the_loop() {
        let clock = Arc::new(ManualClock::new(t0()));
        let config = SchedulerConfig::new(Duration::from_secs(3600)).with_tick_on_start(false);
        let (handle, _seen, task) = spawn(config, clock);

        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
