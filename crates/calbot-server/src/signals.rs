//! Shutdown signalling.
//!
//! SIGTERM and SIGINT (Ctrl+C elsewhere) flip a watch flag. The HTTP server
//! drains on it and `serve` then stops the scheduler.

use tokio::sync::watch;
use tracing::info;

use crate::error::ServerResult;

pub struct SignalHandler {
    tx: watch::Sender<bool>,
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHandler {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Installs the OS signal handlers and spawns the listener task.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(unix)]
    pub fn spawn_listener(&self) -> ServerResult<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate())?;
        let mut int = signal(SignalKind::interrupt())?;
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let name = tokio::select! {
                _ = term.recv() => "SIGTERM",
                _ = int.recv() => "SIGINT",
            };
            info!(signal = name, "shutdown requested");
            tx.send_replace(true);
        });
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn spawn_listener(&self) -> ServerResult<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(signal = "ctrl-c", "shutdown requested");
                tx.send_replace(true);
            }
        });
        Ok(())
    }

    /// Resolves once shutdown has been requested.
    pub fn shutdown(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// Requests shutdown without an OS signal.
    pub fn trigger_shutdown(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Waits until shutdown is requested or the handler is dropped.
    pub async fn wait(mut self) {
        let _ = self.rx.wait_for(|down| *down).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_flips_the_flag() {
        let handler = SignalHandler::new();
        assert!(!handler.is_shutdown());
        handler.trigger_shutdown();
        assert!(handler.is_shutdown());
    }

    #[tokio::test]
    async fn waiters_wake_on_trigger() {
        let handler = SignalHandler::new();
        let first = handler.shutdown();
        let second = first.clone();

        let task = tokio::spawn(async move {
            first.wait().await;
            second.wait().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handler.trigger_shutdown();

        let joined = tokio::time::timeout(Duration::from_millis(500), task).await;
        assert!(joined.is_ok());
    }

    #[tokio::test]
    async fn late_subscriber_sees_earlier_trigger() {
        let handler = SignalHandler::new();
        handler.trigger_shutdown();
        tokio::time::timeout(Duration::from_millis(100), handler.shutdown().wait())
            .await
            .unwrap();
    }
}
