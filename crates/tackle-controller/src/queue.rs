//! Keyed work queue
//!
//! Workers pull workflow names from the queue and hand them back with
//! `done`. A name is held at most once: adding a queued name is a no-op,
//! and adding a name that a worker is processing marks it dirty so it is
//! queued again after `done`. This gives at-most-one reconcile per name
//! while never dropping a notification.
//!
//! Delayed adds keep a single pending deadline per name, the earliest
//! one requested.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<String>,
    /// Names waiting to be processed, queued or not
    dirty: HashSet<String>,
    processing: HashSet<String>,
    /// Earliest pending delayed add per name
    waiting: HashMap<String, Instant>,
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
    backoff_base: Duration,
    backoff_max: Duration,
}

/// Deduplicating work queue with delayed and rate-limited adds
#[derive(Debug, Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    /// Create a queue whose retry delay grows from `backoff_base` up to `backoff_max`
    pub fn new(backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                backoff_base,
                backoff_max,
            }),
        }
    }

    /// Queue `key` for processing
    pub async fn add(&self, key: &str) {
        let mut state = self.inner.state.lock().await;
        if state.shutting_down || !state.dirty.insert(key.to_string()) {
            return;
        }
        if state.processing.contains(key) {
            trace!(key, "Key is being processed, deferring");
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Queue `key` once `delay` has elapsed
    ///
    /// A key already waiting for an earlier or equal deadline is left
    /// alone; an earlier deadline replaces a later one.
    pub async fn add_after(&self, key: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(key).await;
            return;
        }

        let deadline = Instant::now() + delay;
        {
            let mut state = self.inner.state.lock().await;
            if state.shutting_down {
                return;
            }
            match state.waiting.get(key) {
                Some(pending) if *pending <= deadline => {
                    trace!(key, "Key already waiting for an earlier deadline");
                    return;
                }
                _ => {
                    state.waiting.insert(key.to_string(), deadline);
                }
            }
        }

        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut state = queue.inner.state.lock().await;
                if state.waiting.get(&key) != Some(&deadline) {
                    return;
                }
                state.waiting.remove(&key);
            }
            queue.add(&key).await;
        });
    }

    /// Number of keys waiting on a delayed add
    pub async fn waiting(&self) -> usize {
        self.inner.state.lock().await.waiting.len()
    }

    /// Queue `key` after its current backoff delay and count the failure
    pub async fn add_rate_limited(&self, key: &str) {
        let delay = {
            let mut state = self.inner.state.lock().await;
            let failures = state.failures.entry(key.to_string()).or_insert(0);
            *failures += 1;
            self.backoff(*failures)
        };
        trace!(key, delay = ?delay, "Rate limited requeue");
        self.add_after(key, delay).await;
    }

    /// Reset the failure count of `key`
    pub async fn forget(&self, key: &str) {
        self.inner.state.lock().await.failures.remove(key);
    }

    /// Failures recorded for `key` since it was last forgotten
    pub async fn retries(&self, key: &str) -> u32 {
        self.inner
            .state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next key; `None` once the queue is shut down
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock().await;
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as processed, queueing it again if it was added meanwhile
    pub async fn done(&self, key: &str) {
        let mut state = self.inner.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.to_string());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake every waiting worker
    pub async fn shutdown(&self) {
        self.inner.state.lock().await.shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().await.shutting_down
    }

    /// Number of keys ready to be picked up
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Delay for the `failures`-th consecutive failure
    fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.inner
            .backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.inner.backoff_max)
    }
}
