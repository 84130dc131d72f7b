//! Drives the per-section streaming lifecycle state machine (§4.C8).
//!
//! `request_load`/`request_unload` only enqueue; all structural mutation of
//! the registry — growing it, installing or clearing a slot — happens
//! inside `tick`, on whichever thread calls it. That thread is the
//! coordinator; nothing else may call `tick` concurrently with itself.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use nav_core::blob::BlobAssetReference;
use nav_core::coords::SectionAddress;
use nav_core::error::{NavError, Result as NavResult};
use nav_core::registry::Registry;
use tokio::sync::broadcast;

use crate::asset_provider::{AssetProvider, BlobLoader};
use crate::events::{AssetLoadFailureKind, EventBus, StreamingEvent, UnloadDeferReason};

/// Opaque per-section entity occupancy column. Pathfinding and gameplay own
/// its real contents; the streaming system only reserves the slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityHandle(pub Option<u64>);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionState {
    NotLoaded,
    RequestedLoad,
    Loaded,
    RequestedUnload,
}

type ReadyQueue = Arc<Mutex<VecDeque<(SectionAddress, Option<NavResult<BlobAssetReference>>)>>>;

pub struct StreamingSystem<L: BlobLoader> {
    provider: AssetProvider<L>,
    registry: Arc<Registry<SectionAddress>>,
    events: EventBus,
    entries: HashMap<SectionAddress, SectionState>,
    load_queue: VecDeque<SectionAddress>,
    unload_queue: VecDeque<SectionAddress>,
    ready: ReadyQueue,
    max_spins: u32,
}

impl<L: BlobLoader> StreamingSystem<L> {
    /// Registers the two startup columns (§6: a `BlobAssetReference<Section>`
    /// and an opaque `EntityHandle`) on `registry` and wires up a provider.
    pub fn new(loader: L, registry: Arc<Registry<SectionAddress>>, max_spins: u32) -> nav_core::error::Result<Self> {
        registry.register_type::<Option<BlobAssetReference>>()?;
        registry.register_type::<Option<EntityHandle>>()?;
        Ok(Self {
            provider: AssetProvider::new(loader),
            registry,
            events: EventBus::default(),
            entries: HashMap::new(),
            load_queue: VecDeque::new(),
            unload_queue: VecDeque::new(),
            ready: Arc::new(Mutex::new(VecDeque::new())),
            max_spins,
        })
    }

    pub fn registry(&self) -> &Arc<Registry<SectionAddress>> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamingEvent> {
        self.events.subscribe()
    }

    pub fn state(&self, addr: SectionAddress) -> SectionState {
        self.entries.get(&addr).copied().unwrap_or(SectionState::NotLoaded)
    }

    /// Number of sections currently installed in the registry (`Loaded`).
    /// Cheap (a linear scan over in-flight bookkeeping, not the registry
    /// itself) — intended for periodic dashboard reporting, not a hot path.
    pub fn loaded_count(&self) -> usize {
        self.entries.values().filter(|s| **s == SectionState::Loaded).count()
    }

    /// Enqueues a load. Not processed until the next `tick`.
    pub fn request_load(&mut self, addr: SectionAddress) {
        self.load_queue.push_back(addr);
    }

    /// Enqueues an unload. Not processed until the next `tick`.
    pub fn request_unload(&mut self, addr: SectionAddress) {
        self.unload_queue.push_back(addr);
    }

    /// Advances the state machine by one frame. Call once per tick, always
    /// from the same thread.
    pub fn tick(&mut self) {
        self.provider.poll_completions();
        self.drain_load_requests();
        self.drain_ready();
        self.drain_unload_requests();
    }

    fn drain_load_requests(&mut self) {
        let pending: Vec<_> = self.load_queue.drain(..).collect();
        for addr in pending {
            let state = self.entries.entry(addr).or_insert(SectionState::NotLoaded);
            if *state != SectionState::NotLoaded {
                continue;
            }
            *state = SectionState::RequestedLoad;
            self.registry.register_key(addr);

            let ready = Arc::clone(&self.ready);
            self.provider.check_out_async(
                &addr.resource_key(),
                Box::new(move |blob| {
                    ready.lock().expect("ready queue poisoned").push_back((addr, blob));
                }),
            );
        }
    }

    fn drain_ready(&mut self) {
        let items: Vec<_> = self.ready.lock().expect("ready queue poisoned").drain(..).collect();
        for (addr, result) in items {
            match result {
                Some(Ok(blob)) => match self.registry.acquire_write::<Option<BlobAssetReference>>(&addr, self.max_spins) {
                    Ok(mut slot) => {
                        *slot = Some(blob);
                        drop(slot);
                        self.entries.insert(addr, SectionState::Loaded);
                        self.events.publish(StreamingEvent::SectionLoaded(addr));
                    }
                    Err(_) => {
                        // Couldn't install this tick (contended slot); the
                        // entry is still `RequestedLoad`, the checkout we
                        // already hold is simply re-queued for next tick.
                        let ready = Arc::clone(&self.ready);
                        ready.lock().expect("ready queue poisoned").push_back((addr, Some(Ok(blob))));
                    }
                },
                Some(Err(e)) => {
                    self.entries.insert(addr, SectionState::NotLoaded);
                    let kind = match e {
                        NavError::AssetIoError(msg) => AssetLoadFailureKind::Io(msg),
                        NavError::VersionMismatch { .. } => AssetLoadFailureKind::VersionMismatch,
                        NavError::CorruptBlob(msg) => AssetLoadFailureKind::Corrupt(msg),
                        other => AssetLoadFailureKind::Corrupt(other.to_string()),
                    };
                    self.events.publish(StreamingEvent::AssetLoadFailed(addr, kind));
                }
                None => {
                    // Forced cancellation racing the in-flight load (unload
                    // or a release that dropped ref_count to zero): not a
                    // failure, just give up on the pending request.
                    self.entries.insert(addr, SectionState::NotLoaded);
                }
            }
        }
    }

    fn drain_unload_requests(&mut self) {
        let pending: Vec<_> = self.unload_queue.drain(..).collect();
        for addr in pending {
            match self.state(addr) {
                SectionState::NotLoaded => continue,
                SectionState::RequestedLoad => {
                    self.events.publish(StreamingEvent::UnloadDeferred(addr, UnloadDeferReason::StillLoading));
                    self.unload_queue.push_back(addr);
                    continue;
                }
                SectionState::Loaded | SectionState::RequestedUnload => {}
            }
            self.entries.insert(addr, SectionState::RequestedUnload);

            match self.registry.acquire_write::<Option<BlobAssetReference>>(&addr, self.max_spins) {
                Ok(mut slot) => {
                    *slot = None;
                    drop(slot);
                    self.provider.release(&addr.resource_key());
                    self.entries.insert(addr, SectionState::NotLoaded);
                    self.events.publish(StreamingEvent::SectionUnloaded(addr));
                }
                // Another writer already holds intent or the exclusive lock.
                Err(NavError::Inaccessible) => {
                    self.events.publish(StreamingEvent::UnloadDeferred(addr, UnloadDeferReason::StillPinned));
                    self.unload_queue.push_back(addr);
                }
                // Intent was acquired but an active reader never drained in time.
                Err(NavError::RaceAborted) => {
                    self.events.publish(StreamingEvent::UnloadDeferred(addr, UnloadDeferReason::Locked));
                    self.unload_queue.push_back(addr);
                }
                Err(_) => {
                    self.unload_queue.push_back(addr);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_provider::FsBlobLoader;
    use nav_core::blob::{MovementFlags, Node, SectionBuilder, NODES_PER_CHUNK};
    use nav_core::coords::{ChunkMorton, SceneId, SectionKey};

    fn sample_addr() -> SectionAddress {
        SectionAddress::new(SceneId::from_bytes([7; 16]), SectionKey::new(0, 0, 0).pack().unwrap())
    }

    fn write_sample_blob(dir: &tempfile::TempDir, addr: SectionAddress) {
        let mut builder = SectionBuilder::new();
        let nodes = [Node { y: 0.0, exit_mask: MovementFlags::empty() }; NODES_PER_CHUNK];
        builder.push_chunk(ChunkMorton(1), nodes);
        let bytes = builder.build().unwrap();
        let path = dir.path().join(addr.resource_key());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    async fn tick_until<L: BlobLoader>(system: &mut StreamingSystem<L>, addr: SectionAddress, target: SectionState) {
        for _ in 0..200 {
            system.tick();
            if system.state(addr) == target {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        panic!("state never reached {target:?}, stuck at {:?}", system.state(addr));
    }

    #[tokio::test]
    async fn load_read_unload_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let addr = sample_addr();
        write_sample_blob(&dir, addr);

        let loader = FsBlobLoader { root: dir.path().to_path_buf() };
        let registry = Arc::new(Registry::new());
        let mut system = StreamingSystem::new(loader, Arc::clone(&registry), 16).unwrap();
        let mut events = system.subscribe();

        system.request_load(addr);
        tick_until(&mut system, addr, SectionState::Loaded).await;
        assert!(matches!(events.try_recv(), Ok(StreamingEvent::SectionLoaded(a)) if a == addr));

        let read = registry.acquire_read::<Option<BlobAssetReference>>(&addr).unwrap();
        let blob = read.as_ref().expect("slot installed");
        assert_eq!(blob.section().find_chunk(ChunkMorton(1)).unwrap().morton_code(), ChunkMorton(1));

        system.request_unload(addr);
        system.tick();
        assert_eq!(system.state(addr), SectionState::RequestedUnload);
        assert!(matches!(
            events.try_recv(),
            Ok(StreamingEvent::UnloadDeferred(a, UnloadDeferReason::Locked)) if a == addr
        ));

        drop(read);
        tick_until(&mut system, addr, SectionState::NotLoaded).await;
        assert!(matches!(events.try_recv(), Ok(StreamingEvent::SectionUnloaded(a)) if a == addr));
        assert!(!system.provider.is_loaded(&addr.resource_key()));
        assert!(registry.acquire_read::<Option<BlobAssetReference>>(&addr).unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_blob_emits_asset_load_failed() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FsBlobLoader { root: dir.path().to_path_buf() };
        let registry = Arc::new(Registry::new());
        let mut system = StreamingSystem::new(loader, registry, 16).unwrap();
        let mut events = system.subscribe();
        let addr = sample_addr();

        system.request_load(addr);
        for _ in 0..200 {
            system.tick();
            if system.state(addr) == SectionState::NotLoaded
                && matches!(events.try_recv(), Ok(StreamingEvent::AssetLoadFailed(a, _)) if a == addr)
            {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        panic!("expected AssetLoadFailed, got state {:?}", system.state(addr));
    }
}
