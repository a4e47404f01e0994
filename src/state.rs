use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::models::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            LogLevel::Info => write!(f, "{}", self.message),
            LogLevel::Warn => write!(f, "WARNING: {}", self.message),
            LogLevel::Error => write!(f, "ERROR: {}", self.message),
        }
    }
}

/// Session snapshot plus the append-only log, shared between the worker and
/// whoever is watching. Locks are held only for the duration of a copy.
#[derive(Clone, Default)]
pub struct SessionTracker {
    state: Arc<Mutex<SessionState>>,
    log: Arc<Mutex<Vec<LogLine>>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SessionState {
        lock(&self.state).clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut SessionState)) {
        let mut state = lock(&self.state);
        f(&mut state);
        if !state.running {
            state.paused = false;
        }
    }

    pub fn lines(&self) -> Vec<LogLine> {
        lock(&self.log).clone()
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.push(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.push(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.push(LogLevel::Error, message);
    }

    fn push(&self, level: LogLevel, message: String) {
        lock(&self.log).push(LogLine { level, message });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cooperative cancellation flag. Set from any thread, observed by the worker
/// at its checkpoints.
#[derive(Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `stop` has been called.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            let stopped = *rx.borrow_and_update();
            if stopped || rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn log_is_append_only_and_ordered() {
        let tracker = SessionTracker::new();
        tracker.info("one");
        tracker.warn("two");
        tracker.error("three");

        let lines = tracker.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].level, LogLevel::Warn);
        assert_eq!(lines[2].to_string(), "ERROR: three");
    }

    #[test]
    fn stopping_clears_paused() {
        let tracker = SessionTracker::new();
        tracker.update(|s| {
            s.running = true;
            s.paused = true;
        });
        assert!(tracker.snapshot().paused);

        tracker.update(|s| s.running = false);
        let state = tracker.snapshot();
        assert!(!state.running);
        assert!(!state.paused);
    }

    #[tokio::test]
    async fn stop_signal_wakes_waiters() {
        let stop = StopSignal::new();
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.stopped().await })
        };

        assert!(!stop.is_stopped());
        std::thread::spawn({
            let stop = stop.clone();
            move || stop.stop()
        })
        .join()
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(stop.is_stopped());
        // already stopped resolves immediately
        stop.stopped().await;
    }
}
