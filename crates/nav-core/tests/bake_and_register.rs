//! End-to-end tests that cross module boundaries: bake a section from a
//! synthetic probe, validate the resulting blob, and install it into a
//! registry slot the way the runtime's streaming system does.

use nav_core::baker::test_support::FlatPlaneProbe;
use nav_core::baker::{bake_section, BakeParams};
use nav_core::blob::{BlobAssetReference, Section};
use nav_core::coords::{SceneId, SectionAddress, SectionKey};
use nav_core::lattice::section_extents;
use nav_core::registry::Registry;
use std::sync::Arc;

fn addr_for(key: SectionKey) -> SectionAddress {
    SectionAddress::new(SceneId::from_bytes([9; 16]), key.pack().unwrap())
}

// ---------------------------------------------------------------------------
// Bake -> blob -> zero-copy read
// ---------------------------------------------------------------------------

#[test]
fn baked_section_round_trips_through_blob_validation() {
    let key = SectionKey::new(0, 0, 0);
    let (ext_x, _ext_y, ext_z) = section_extents();
    let probe = FlatPlaneProbe::new(0.0, (-1.0, ext_x + 1.0), (-1.0, ext_z + 1.0));
    let bytes = bake_section(key, &probe, &BakeParams::default()).expect("flat plane bakes a section");

    let section = Section::from_bytes(&bytes).expect("baked bytes are a valid section");
    assert!(section.chunk_count() > 0);

    for i in 0..section.chunk_count() - 1 {
        let a = section.chunk_at(i).unwrap().morton_code();
        let b = section.chunk_at(i + 1).unwrap().morton_code();
        assert!(a.0 < b.0, "chunks must stay sorted after baking");
    }
}

// ---------------------------------------------------------------------------
// Bake -> BlobAssetReference -> Registry slot
// ---------------------------------------------------------------------------

#[test]
fn baked_blob_installs_into_a_registry_column() {
    let key = SectionKey::new(1, 0, -1);
    let (ext_x, _ext_y, ext_z) = section_extents();
    let probe = FlatPlaneProbe::new(0.0, (-1.0, ext_x + 1.0), (-1.0, ext_z + 1.0));
    let bytes = bake_section(key, &probe, &BakeParams::default()).expect("flat plane bakes a section");
    let blob = BlobAssetReference::new(Arc::from(bytes)).expect("baked bytes validate");

    let registry: Registry<SectionAddress> = Registry::new();
    registry.register_type::<Option<BlobAssetReference>>().unwrap();
    let addr = addr_for(key);
    registry.register_key(addr);

    {
        let mut slot = registry.acquire_write::<Option<BlobAssetReference>>(&addr, 16).unwrap();
        *slot = Some(blob.clone());
    }

    let read = registry.acquire_read::<Option<BlobAssetReference>>(&addr).unwrap();
    let installed = read.as_ref().expect("slot was installed");
    assert_eq!(installed.section().chunk_count(), blob.section().chunk_count());
}

// ---------------------------------------------------------------------------
// Determinism across an entire bake-to-registry pipeline
// ---------------------------------------------------------------------------

#[test]
fn repeated_bakes_of_the_same_geometry_produce_identical_blobs() {
    let key = SectionKey::new(0, 0, 0);
    let (ext_x, _ext_y, ext_z) = section_extents();
    let probe = FlatPlaneProbe::new(0.0, (-1.0, ext_x + 1.0), (-1.0, ext_z + 1.0));
    let params = BakeParams::default();

    let first = bake_section(key, &probe, &params).unwrap();
    let second = bake_section(key, &probe, &params).unwrap();
    assert_eq!(first, second);
}
