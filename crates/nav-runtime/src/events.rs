//! Streaming lifecycle events, broadcast from the coordinator to anyone
//! watching (dashboard, logging, future gameplay consumers).

use nav_core::coords::SectionAddress;
use tokio::sync::broadcast;

/// Why an unload attempt was deferred rather than completed this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnloadDeferReason {
    /// `acquire_write` raced an active reader and its spin budget ran out
    /// before the reader released (the reader is "holding the lock").
    Locked,
    /// `acquire_write` found another writer already holding intent or the
    /// exclusive lock (the slot is pinned by someone else's in-flight edit).
    StillPinned,
    /// The load that would have populated the slot hasn't completed yet.
    StillLoading,
}

/// Why a blob load ultimately failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssetLoadFailureKind {
    Io(String),
    Corrupt(String),
    VersionMismatch,
}

/// Section lifecycle events emitted by [`crate::streaming::StreamingSystem`].
#[derive(Clone, Debug)]
pub enum StreamingEvent {
    SectionLoaded(SectionAddress),
    SectionUnloaded(SectionAddress),
    UnloadDeferred(SectionAddress, UnloadDeferReason),
    AssetLoadFailed(SectionAddress, AssetLoadFailureKind),
}

/// Broadcasts [`StreamingEvent`]s to every subscriber. A thin wrapper around
/// `tokio::sync::broadcast` so the streaming system doesn't need to know
/// about channel capacity or lagged-receiver handling directly.
pub struct EventBus {
    tx: broadcast::Sender<StreamingEvent>,
}

impl EventBus {
    /// `capacity` bounds how many events a slow subscriber may lag behind
    /// before it starts missing them (`broadcast::error::RecvError::Lagged`).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: StreamingEvent) {
        // Best-effort: no subscribers yet is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamingEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
