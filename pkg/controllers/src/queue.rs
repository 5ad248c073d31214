use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use pkg_types::ObjectKey;

const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Exponential backoff for the n-th consecutive failure: 100ms, 200ms, ... up to 30s.
pub fn backoff_for(failures: u32) -> Duration {
    BACKOFF_BASE
        .checked_mul(2u32.saturating_pow(failures))
        .map_or(BACKOFF_CAP, |d| d.min(BACKOFF_CAP))
}

/// Deduplicating work queue with rate-limited requeue.
///
/// A key is queued at most once. Keys requeued after a failure wait out
/// their backoff before they become ready again.
#[derive(Default)]
pub struct WorkQueue {
    ready: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    delayed: HashMap<ObjectKey, Instant>,
    failures: HashMap<ObjectKey, u32>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: ObjectKey) {
        self.delayed.remove(&key);
        if self.queued.insert(key.clone()) {
            self.ready.push_back(key);
        }
    }

    /// Queue `key` again once its backoff has elapsed.
    pub fn add_rate_limited(&mut self, key: ObjectKey) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let delay = backoff_for(*failures);
        *failures = failures.saturating_add(1);
        if !self.queued.contains(&key) {
            self.delayed.insert(key, Instant::now() + delay);
        }
        delay
    }

    /// Reset the failure count of `key`.
    pub fn forget(&mut self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Next ready key, promoting delayed keys whose time has come.
    pub fn pop(&mut self) -> Option<ObjectKey> {
        let now = Instant::now();
        let due: Vec<ObjectKey> = self
            .delayed
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in due {
            self.add(key);
        }
        let key = self.ready.pop_front()?;
        self.queued.remove(&key);
        Some(key)
    }

    /// When the earliest delayed key becomes ready.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.delayed.values().min().copied()
    }

    pub fn len(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
