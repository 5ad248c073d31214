pub mod backend;
pub mod client;
pub mod patch;
pub mod watch;

pub use backend::{KvBackend, MemoryBackend, SlateBackend};
pub use client::StateStore;
pub use watch::{EventLog, EventType, WatchEvent};
