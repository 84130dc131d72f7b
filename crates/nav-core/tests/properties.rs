//! Randomized property checks for the invariants spec.md §8 labels
//! "property-based" (1-3), complementing the exhaustive/sample unit tests
//! colocated with each module.

use nav_core::coords::{ChunkIdx, ChunkMorton, NodeIdx, NodeMorton, SectionKey};
use nav_core::lattice::{graph_to_world_base, world_to_graph, Vec3};
use proptest::prelude::*;

proptest! {
    /// Invariant 1: `UnpackSectionId(PackSectionId(k)) == k` for every axis
    /// in `[-512, 511]`.
    #[test]
    fn section_id_pack_unpack_is_bijective(
        sx in -512i32..=511,
        sy in -512i32..=511,
        sz in -512i32..=511,
    ) {
        let key = SectionKey::new(sx, sy, sz);
        let id = key.pack().expect("in-range key always packs");
        prop_assert_eq!(id.unpack(), key);
    }

    /// Invariant 2 (chunk half): `DecodeMortonToChunk(EncodeChunkToMorton(c)) == c`
    /// for every axis in `[0, 31]`.
    #[test]
    fn chunk_morton_pack_unpack_is_bijective(
        cx in 0u8..32,
        cy in 0u8..32,
        cz in 0u8..32,
    ) {
        let idx = ChunkIdx::new(cx, cy, cz);
        let morton: ChunkMorton = idx.pack();
        prop_assert_eq!(morton.unpack(), idx);
    }

    /// Invariant 2 (node half): same bijection over `[0, 15]^2`.
    #[test]
    fn node_morton_pack_unpack_is_bijective(nx in 0u8..16, nz in 0u8..16) {
        let idx = NodeIdx::new(nx, nz);
        let morton: NodeMorton = idx.pack();
        prop_assert_eq!(morton.unpack(), idx);
    }

    /// Invariant 3 (fixed-point form): snapping an already-snapped vertex
    /// must reproduce the same lattice coordinates with a near-zero residual
    /// offset, for any position within a representable section's bounds.
    #[test]
    fn snapping_a_snapped_vertex_is_a_fixed_point(
        x in -400.0f32..400.0,
        y in 0.0f32..200.0,
        z in -400.0f32..400.0,
    ) {
        let (section, chunk, node, _offset) = world_to_graph(Vec3::new(x, y, z));
        let snapped = graph_to_world_base(section, chunk, node);

        let (section2, chunk2, node2, offset2) = world_to_graph(snapped);
        prop_assert_eq!(section2, section);
        prop_assert_eq!(chunk2, chunk);
        prop_assert_eq!(node2, node);
        prop_assert!(offset2.x.abs() < 1e-3 && offset2.z.abs() < 1e-3);
    }
}
