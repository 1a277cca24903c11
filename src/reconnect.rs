//! Reconnect scheduling
//!
//! Owns the backoff attempt counter and the single pending reconnect timer.
//! The counter is reset when a connection is established and incremented
//! each time an attempt is scheduled; both happen through atomics so the
//! reset on connect and the increment on loss are totally ordered.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backoff::BackoffPolicy;

pub struct ReconnectScheduler {
    policy: BackoffPolicy,
    attempts: AtomicU32,
    /// Timer that has not fired yet. A fired timer removes itself before
    /// running its attempt, so an attempt may schedule its own successor.
    pending: Arc<Mutex<Option<JoinHandle<()>>>>,
    cancelled: AtomicBool,
}

impl ReconnectScheduler {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: AtomicU32::new(0),
            pending: Arc::new(Mutex::new(None)),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Run `attempt` after the backoff delay for the current attempt count.
    ///
    /// Replaces any attempt still waiting on its timer. Returns the delay, or
    /// None if the scheduler has been cancelled.
    pub async fn schedule<F, Fut>(&self, attempt: F) -> Option<Duration>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut pending = self.pending.lock().await;
        if self.cancelled.load(Ordering::SeqCst) {
            return None;
        }

        let count = self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = self.policy.delay(count);

        if let Some(previous) = pending.take() {
            debug!("Replacing pending reconnect");
            previous.abort();
        }

        info!(
            attempt = count,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        let slot = Arc::clone(&self.pending);
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Only this timer's own handle can be stored here: a replaced
            // timer is aborted while it waits for the lock.
            slot.lock().await.take();
            attempt().await;
        }));

        Some(delay)
    }

    /// A connection was established.
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// Number of attempts scheduled since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Abort any pending attempt and refuse new ones.
    pub async fn cancel(&self) {
        let mut pending = self.pending.lock().await;
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = pending.take() {
            task.abort();
        }
    }
}
