//! Live web dashboard — near-real-time streaming events & perf stats.
//!
//! Design contract with the coordinator thread:
//!   • Metrics: atomic fetch_add (~10 ns, zero-alloc, never blocks).
//!   • Event log: forwarded from the streaming system's broadcast channel by
//!     its own tokio task, published via `tokio::sync::watch` (non-blocking
//!     send, overwrites previous value — if the dashboard is slow it just
//!     sees the latest snapshot, never stalling the coordinator).
//!   • The web server runs on its own tokio tasks and never touches the
//!     `StreamingSystem` or `Registry` directly.

pub mod metrics;
pub mod server;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::events::{AssetLoadFailureKind, StreamingEvent, UnloadDeferReason};

pub use metrics::Metrics;

/// How many recent events the dashboard keeps around for new connections.
const EVENT_LOG_CAPACITY: usize = 200;

// ── Dashboard state (shared between server, connections, and the forwarder) ─

/// Central state shared via `Arc<DashboardState>`.
pub struct DashboardState {
    pub metrics: Metrics,
    sections_resident: AtomicU64,
    log_tx: watch::Sender<EventLogSnapshot>,
}

impl DashboardState {
    pub fn new() -> Self {
        let (log_tx, _) = watch::channel(EventLogSnapshot::empty());
        Self {
            metrics: Metrics::new(),
            sections_resident: AtomicU64::new(0),
            log_tx,
        }
    }

    /// Updated by the coordinator after each `tick` (current registry
    /// occupancy, not a monotonic counter).
    pub fn set_sections_resident(&self, count: u64) {
        self.sections_resident.store(count, Relaxed);
    }

    pub fn sections_resident(&self) -> u64 {
        self.sections_resident.load(Relaxed)
    }

    /// Create a new receiver for event log snapshots (one per WebSocket client).
    pub fn subscribe_log(&self) -> watch::Receiver<EventLogSnapshot> {
        self.log_tx.subscribe()
    }

    fn push_event(&self, record: EventRecord) {
        self.log_tx.send_if_modified(|snapshot| {
            if snapshot.events.len() == EVENT_LOG_CAPACITY {
                snapshot.events.pop_front();
            }
            snapshot.events.push_back(record);
            true
        });
    }
}

impl Default for DashboardState {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains `events` and appends a record to `state`'s log for every one,
/// updating the relevant counter along the way. Runs on its own tokio task
/// for the lifetime of the dashboard; exits once the sender side closes.
pub async fn forward_events(state: std::sync::Arc<DashboardState>, mut events: broadcast::Receiver<StreamingEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                match &event {
                    StreamingEvent::SectionLoaded(_) => state.metrics.section_loaded(),
                    StreamingEvent::SectionUnloaded(_) => state.metrics.section_unloaded(),
                    StreamingEvent::UnloadDeferred(..) => state.metrics.unload_deferred(),
                    StreamingEvent::AssetLoadFailed(..) => state.metrics.load_failed(),
                }
                state.push_event(EventRecord::from(&event));
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

// ── Event log types ──────────────────────────────────────────────────────

#[derive(Clone, Serialize, Default)]
pub struct EventLogSnapshot {
    pub events: VecDeque<EventRecord>,
}

impl EventLogSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Clone, Serialize)]
pub struct EventRecord {
    pub kind: String,
    pub scene_id: String,
    pub section_id: u32,
    pub detail: Option<String>,
}

impl From<&StreamingEvent> for EventRecord {
    fn from(event: &StreamingEvent) -> Self {
        let (kind, addr, detail) = match event {
            StreamingEvent::SectionLoaded(addr) => ("section_loaded", *addr, None),
            StreamingEvent::SectionUnloaded(addr) => ("section_unloaded", *addr, None),
            StreamingEvent::UnloadDeferred(addr, reason) => (
                "unload_deferred",
                *addr,
                Some(
                    match reason {
                        UnloadDeferReason::StillPinned => "still_pinned",
                        UnloadDeferReason::StillLoading => "still_loading",
                        UnloadDeferReason::Locked => "locked",
                    }
                    .to_string(),
                ),
            ),
            StreamingEvent::AssetLoadFailed(addr, kind) => (
                "asset_load_failed",
                *addr,
                Some(match kind {
                    AssetLoadFailureKind::Io(msg) => format!("io: {msg}"),
                    AssetLoadFailureKind::Corrupt(msg) => format!("corrupt: {msg}"),
                    AssetLoadFailureKind::VersionMismatch => "version_mismatch".to_string(),
                }),
            ),
        };
        Self {
            kind: kind.to_string(),
            scene_id: addr.scene.to_string(),
            section_id: addr.section.0,
            detail,
        }
    }
}
