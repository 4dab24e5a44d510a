//! Background sync triggers: a debounced push after local writes, a periodic
//! timer, and the pull-on-start check.

use crate::model::ActionEntry;
use crate::mutation::ChangeListener;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

enum Signal {
    Poke,
    Flush,
    Stop,
}

/// Coalesces bursts of triggers into one call of `action`, run once the
/// triggers have been quiet for `window`.
pub struct Debouncer {
    tx: Sender<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn spawn<F>(window: Duration, mut action: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let mut deadline: Option<Instant> = None;
            loop {
                let signal = match deadline {
                    Some(at) => {
                        let wait = at.saturating_duration_since(Instant::now());
                        match rx.recv_timeout(wait) {
                            Ok(signal) => signal,
                            Err(RecvTimeoutError::Timeout) => {
                                deadline = None;
                                action();
                                continue;
                            }
                            Err(RecvTimeoutError::Disconnected) => Signal::Stop,
                        }
                    }
                    None => rx.recv().unwrap_or(Signal::Stop),
                };
                match signal {
                    Signal::Poke => deadline = Some(Instant::now() + window),
                    Signal::Flush => {
                        if deadline.take().is_some() {
                            action();
                        }
                    }
                    Signal::Stop => {
                        if deadline.take().is_some() {
                            action();
                        }
                        break;
                    }
                }
            }
        });
        Self {
            tx,
            handle: Some(handle),
        }
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(Signal::Poke);
    }

    /// Run a pending action now instead of waiting out the window.
    pub fn flush(&self) {
        let _ = self.tx.send(Signal::Flush);
    }

    /// Listener that triggers on every committed change.
    #[must_use]
    pub fn listener(&self) -> Arc<dyn ChangeListener> {
        Arc::new(DebounceListener {
            tx: std::sync::Mutex::new(self.tx.clone()),
        })
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct DebounceListener {
    tx: std::sync::Mutex<Sender<Signal>>,
}

impl ChangeListener for DebounceListener {
    fn on_change(&self, entries: &[ActionEntry]) {
        if entries.is_empty() {
            return;
        }
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(Signal::Poke);
        }
    }
}

/// Runs `action` every `interval` until stopped or dropped.
pub struct Periodic {
    tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Periodic {
    pub fn spawn<F>(interval: Duration, mut action: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            while let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(interval) {
                action();
            }
        });
        Self {
            tx,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Periodic {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Whether a command starting now should pull first.
#[must_use]
pub fn should_pull_on_start(
    last_pull_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval: Duration,
    on_start: bool,
) -> bool {
    if !on_start {
        return false;
    }
    let Some(last) = last_pull_at else {
        return true;
    };
    let interval =
        chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::days(36_500));
    now.signed_duration_since(last) >= interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn burst_collapses_into_one_run() {
        let (count, action) = counter();
        let debouncer = Debouncer::spawn(Duration::from_millis(40), action);
        for _ in 0..10 {
            debouncer.trigger();
        }
        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_flushes_pending_work() {
        let (count, action) = counter();
        let debouncer = Debouncer::spawn(Duration::from_secs(60), action);
        debouncer.trigger();
        drop(debouncer);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn idle_debouncer_never_runs() {
        let (count, action) = counter();
        let debouncer = Debouncer::spawn(Duration::from_millis(5), action);
        debouncer.flush();
        drop(debouncer);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn periodic_stops() {
        let (count, action) = counter();
        let timer = Periodic::spawn(Duration::from_millis(10), action);
        thread::sleep(Duration::from_millis(60));
        timer.stop();
        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 1);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn pull_on_start_respects_interval() {
        let now = Utc::now();
        let five_min = Duration::from_secs(300);
        assert!(should_pull_on_start(None, now, five_min, true));
        assert!(!should_pull_on_start(None, now, five_min, false));
        let recent = Some(now - chrono::Duration::seconds(10));
        assert!(!should_pull_on_start(recent, now, five_min, true));
        let stale = Some(now - chrono::Duration::seconds(301));
        assert!(should_pull_on_start(stale, now, five_min, true));
    }
}
