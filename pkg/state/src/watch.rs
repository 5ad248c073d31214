use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::broadcast;

use pkg_constants::state::EVENT_CHANNEL_CAPACITY;
use pkg_types::object::parse_storage_key;

/// Type of event in the watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// A single watch event representing a state change.
///
/// Updates and deletes carry the previous value so that consumers can
/// compare old and new objects (phase transitions, namespace moves).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub seq: u64,
    pub event_type: EventType,
    pub key: String,
    #[serde(default)]
    pub prev_value: Option<Vec<u8>>,
    #[serde(default)]
    pub value: Option<Vec<u8>>,
}

impl WatchEvent {
    /// Object kind, taken from the `/registry/<kind>/...` key.
    pub fn kind(&self) -> Option<&str> {
        parse_storage_key(&self.key).map(|(kind, _)| kind)
    }

    pub fn decode_prev<T: DeserializeOwned>(&self) -> Option<T> {
        self.prev_value
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }

    pub fn decode_value<T: DeserializeOwned>(&self) -> Option<T> {
        self.value
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

/// In-memory event log that tracks all state mutations with monotonic sequence numbers.
/// Clients subscribe to receive every new event and filter by kind themselves.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<RwLock<EventLogInner>>,
    sender: broadcast::Sender<WatchEvent>,
}

struct EventLogInner {
    seq: u64,
    /// Ring buffer of recent events (capped)
    events: VecDeque<WatchEvent>,
    max_events: usize,
}

impl EventLog {
    /// Create a new event log with the given capacity for recent events.
    pub fn new(max_events: usize) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(EventLogInner {
                seq: 0,
                events: VecDeque::with_capacity(max_events),
                max_events,
            })),
            sender,
        }
    }

    /// Record a new event. Called by StateStore on every write.
    pub async fn emit(
        &self,
        event_type: EventType,
        key: String,
        prev_value: Option<Vec<u8>>,
        value: Option<Vec<u8>>,
    ) {
        let mut inner = self.inner.write().await;
        inner.seq += 1;
        let event = WatchEvent {
            seq: inner.seq,
            event_type,
            key,
            prev_value,
            value,
        };
        if inner.events.len() >= inner.max_events {
            inner.events.pop_front();
        }
        inner.events.push_back(event.clone());
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub async fn current_seq(&self) -> u64 {
        self.inner.read().await.seq
    }

    /// Get all retained events since the given sequence number.
    pub async fn events_since(&self, from_seq: u64) -> Vec<WatchEvent> {
        let inner = self.inner.read().await;
        inner
            .events
            .iter()
            .filter(|e| e.seq > from_seq)
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.sender.subscribe()
    }
}
