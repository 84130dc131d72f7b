//! End-to-end exercise of the two crates together: bake a section to a temp
//! file, stream it through the coordinator, hold a reader across an unload
//! attempt, then release and confirm cleanup.

use std::sync::Arc;

use nav_core::baker::test_support::FlatPlaneProbe;
use nav_core::baker::{bake_section, BakeParams};
use nav_core::blob::BlobAssetReference;
use nav_core::coords::{SceneId, SectionAddress, SectionKey};
use nav_core::lattice::section_extents;
use nav_core::registry::Registry;
use nav_runtime::asset_provider::FsBlobLoader;
use nav_runtime::events::{StreamingEvent, UnloadDeferReason};
use nav_runtime::streaming::{SectionState, StreamingSystem};

fn bake_into(dir: &tempfile::TempDir, key: SectionKey, scene: SceneId) -> SectionAddress {
    let (ext_x, _ext_y, ext_z) = section_extents();
    let probe = FlatPlaneProbe::new(0.0, (-1.0, ext_x + 1.0), (-1.0, ext_z + 1.0));
    let bytes = bake_section(key, &probe, &BakeParams::default()).expect("flat plane bakes");
    let addr = SectionAddress::new(scene, key.pack().unwrap());
    let path = dir.path().join(addr.resource_key());
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
    addr
}

async fn tick_until(system: &mut StreamingSystem<FsBlobLoader>, addr: SectionAddress, target: SectionState) {
    for _ in 0..300 {
        system.tick();
        if system.state(addr) == target {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    panic!("state never reached {target:?}, stuck at {:?}", system.state(addr));
}

#[tokio::test]
async fn load_read_unload_across_the_crate_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let addr = bake_into(&dir, SectionKey::new(0, 0, 0), SceneId::from_bytes([3; 16]));

    let loader = FsBlobLoader { root: dir.path().to_path_buf() };
    let registry = Arc::new(Registry::new());
    let mut system = StreamingSystem::new(loader, Arc::clone(&registry), 16).unwrap();
    let mut events = system.subscribe();

    system.request_load(addr);
    tick_until(&mut system, addr, SectionState::Loaded).await;
    assert!(matches!(events.try_recv(), Ok(StreamingEvent::SectionLoaded(a)) if a == addr));

    let read = registry.acquire_read::<Option<BlobAssetReference>>(&addr).unwrap();
    assert!(read.is_some());

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
    assert!(registry.acquire_read::<Option<BlobAssetReference>>(&addr).unwrap().is_none());
}
