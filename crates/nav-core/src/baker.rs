//! Geometry → section blob baking: height sampling, capsule clearance, and
//! the two-pass hex connectivity computation (existence, then core/reachable
//! filtering).

use crate::blob::{canonical_nan, MovementFlags, Node, SectionBuilder, NODES_PER_CHUNK};
use crate::coords::{ChunkIdx, ChunkMorton, NodeIdx, SectionKey};
use crate::lattice::{self, Vec3, CHUNK_HEIGHT, CHUNKS_PER_SECTION_XZ, CHUNKS_PER_SECTION_Y,
    NODES_PER_CHUNK_AXIS, NODE_SIZE};

/// Opaque collider identifier returned by [`GeometryProbe::capsule_overlap`].
pub type ColliderId = u64;

/// A single raycast hit point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitPoint {
    pub position: Vec3,
    pub collider: ColliderId,
}

/// The physics/geometry interface the baker consumes. Implementations are
/// expected to forward to an engine's physics world; this crate never
/// implements collision itself.
pub trait GeometryProbe {
    fn box_overlap(&self, center: Vec3, half_extents: Vec3, mask: u32) -> bool;
    fn raycast_column(&self, origin: Vec3, down_length: f32, mask: u32) -> Option<HitPoint>;
    fn capsule_overlap(&self, bottom: Vec3, top: Vec3, radius: f32, mask: u32) -> Option<ColliderId>;
}

/// Tunables for a single bake pass.
#[derive(Debug, Clone, Copy)]
pub struct BakeParams {
    pub geometry_mask: u32,
    pub obstacle_mask: u32,
    pub capsule_height: f32,
    pub capsule_radius: f32,
    pub ground_clearance: f32,
    pub max_slope: f32,
}

impl Default for BakeParams {
    fn default() -> Self {
        Self {
            geometry_mask: 0xFFFF_FFFF,
            obstacle_mask: 0xFFFF_FFFF,
            capsule_height: 2.0,
            capsule_radius: 0.10,
            ground_clearance: 0.05,
            max_slope: 0.25,
        }
    }
}

const CHUNKS_PER_SECTION: usize = (CHUNKS_PER_SECTION_XZ * CHUNKS_PER_SECTION_XZ * CHUNKS_PER_SECTION_Y) as usize;

/// A single chunk's worth of scanned heights, dense in NodeMorton order; `y`
/// is `NaN` where the node does not exist.
struct ChunkHeights {
    idx: ChunkIdx,
    heights: [f32; NODES_PER_CHUNK],
}

/// Probes a flat 16x16 node patch within one chunk and records heights.
///
/// Scans raycasts downward from the top of the chunk and accepts a hit only
/// if the capsule clearance check above it also passes (§4.C7 step 2).
fn scan_chunk(
    section: SectionKey,
    chunk: ChunkIdx,
    probe: &dyn GeometryProbe,
    params: &BakeParams,
) -> Option<ChunkHeights> {
    let chunk_top_y = lattice::graph_to_world_base(section, chunk, NodeIdx::new(0, 0)).y + CHUNK_HEIGHT;
    let mut heights = [canonical_nan(); NODES_PER_CHUNK];
    let mut any_finite = false;

    for morton in 0..NODES_PER_CHUNK {
        let node_idx = ChunkMorton(morton as u16).unpack();
        let base = lattice::graph_to_world_base(section, chunk, node_idx);
        let origin = Vec3::new(base.x, chunk_top_y, base.z);

        let Some(hit) = probe.raycast_column(origin, CHUNK_HEIGHT, params.geometry_mask) else {
            continue;
        };

        let up = Vec3::new(0.0, 1.0, 0.0);
        let bottom = add(hit.position, scale(up, params.capsule_radius + params.ground_clearance));
        let top = add(
            hit.position,
            scale(up, params.capsule_height - params.capsule_radius + params.ground_clearance),
        );
        let obstructed = matches!(
            probe.capsule_overlap(
                bottom,
                top,
                params.capsule_radius,
                params.geometry_mask | params.obstacle_mask,
            ),
            Some(c) if c != hit.collider
        );

        if !obstructed {
            heights[morton] = hit.position.y;
            any_finite = true;
        }
    }

    any_finite.then_some(ChunkHeights { idx: chunk, heights })
}

fn add(a: Vec3, b: Vec3) -> Vec3 {
    Vec3::new(a.x + b.x, a.y + b.y, a.z + b.z)
}

fn scale(a: Vec3, s: f32) -> Vec3 {
    Vec3::new(a.x * s, a.y * s, a.z * s)
}

/// Looks up a scanned height at a specific node in a specific chunk, probing
/// three candidate `chunk_y` layers if asked to cross a Y boundary.
///
/// Used by pass-1 connectivity: Y-adjacent chunks may belong to the same or
/// a different section (Y wraps freely across section boundaries).
fn lookup_height(
    scanned: &std::collections::HashMap<(SectionKey, ChunkIdx), ChunkHeights>,
    section: SectionKey,
    chunk: ChunkIdx,
    node: NodeIdx,
) -> Option<f32> {
    let entry = scanned.get(&(section, chunk))?;
    let h = entry.heights[node.pack().0 as usize];
    (!h.is_nan()).then_some(h)
}

/// Bakes a single section. Returns `None` if the section has no navigable
/// geometry (pruned, or every scanned chunk came back empty).
///
/// Implements §4.C7 end to end: section prune, per-chunk height scan, empty
/// chunk drop, pass-1 hex existence, pass-2 core/reachable filter, and
/// serialisation via [`crate::blob::SectionBuilder`].
pub fn bake_section(
    section_key: SectionKey,
    probe: &dyn GeometryProbe,
    params: &BakeParams,
) -> Option<Vec<u8>> {
    let (ext_x, ext_y, ext_z) = lattice::section_extents();
    let center = Vec3::new(ext_x / 2.0, ext_y / 2.0, ext_z / 2.0);
    let half = Vec3::new(ext_x / 2.0 + 0.1, ext_y / 2.0 + 0.1, ext_z / 2.0 + 0.1);
    if !probe.box_overlap(center, half, params.geometry_mask) {
        return None;
    }

    let mut scanned: std::collections::HashMap<(SectionKey, ChunkIdx), ChunkHeights> =
        std::collections::HashMap::with_capacity(CHUNKS_PER_SECTION);

    for cy in 0..CHUNKS_PER_SECTION_Y as u8 {
        for cx in 0..CHUNKS_PER_SECTION_XZ as u8 {
            for cz in 0..CHUNKS_PER_SECTION_XZ as u8 {
                let chunk = ChunkIdx::new(cx, cy, cz);
                let chunk_center = chunk_world_center(section_key, chunk);
                let chunk_half = Vec3::new(
                    NODES_PER_CHUNK_AXIS as f32 * NODE_SIZE / 2.0,
                    CHUNK_HEIGHT / 2.0,
                    NODES_PER_CHUNK_AXIS as f32 * NODE_SIZE / 2.0,
                );
                if !probe.box_overlap(chunk_center, chunk_half, params.geometry_mask) {
                    continue;
                }
                if let Some(heights) = scan_chunk(section_key, chunk, probe, params) {
                    scanned.insert((section_key, chunk), heights);
                }
            }
        }
    }

    if scanned.is_empty() {
        return None;
    }

    // Pass 1: hex existence.
    let mut exit_masks: std::collections::HashMap<(SectionKey, ChunkIdx, NodeIdx), MovementFlags> =
        std::collections::HashMap::new();

    let active_keys: Vec<(SectionKey, ChunkIdx)> = scanned.keys().copied().collect();
    for &(section, chunk) in &active_keys {
        let entry = &scanned[&(section, chunk)];
        for morton in 0..NODES_PER_CHUNK {
            let h = entry.heights[morton];
            if h.is_nan() {
                continue;
            }
            let node = ChunkMorton(morton as u16).unpack();
            let flags = pass1_connectivity(&scanned, section, chunk, node, h, params);
            exit_masks.insert((section, chunk, node), flags);
        }
    }

    // Pass 2: core / reachable filter.
    for &(section, chunk) in &active_keys {
        let entry = &scanned[&(section, chunk)];
        for morton in 0..NODES_PER_CHUNK {
            let h = entry.heights[morton];
            if h.is_nan() {
                continue;
            }
            let node = ChunkMorton(morton as u16).unpack();
            let key = (section, chunk, node);
            let flags = exit_masks[&key];
            if flags.is_core() {
                continue;
            }
            let has_core_neighbor = has_core_neighbor(&scanned, &mut exit_masks, section, chunk, node, h, flags, params);
            if !has_core_neighbor {
                exit_masks.get_mut(&key).unwrap().set_unreachable();
            }
        }
    }

    // Emit: only chunks belonging to this section_key, sorted by morton.
    let mut builder = SectionBuilder::new();
    let mut own_chunks: Vec<ChunkIdx> = active_keys
        .iter()
        .filter(|&&(s, _)| s == section_key)
        .map(|&(_, c)| c)
        .collect();
    own_chunks.sort_by_key(|c| c.pack().0);

    if own_chunks.is_empty() {
        return None;
    }

    for chunk in own_chunks {
        let entry = &scanned[&(section_key, chunk)];
        let mut nodes = [Node { y: canonical_nan(), exit_mask: MovementFlags::unreachable() }; NODES_PER_CHUNK];
        for morton in 0..NODES_PER_CHUNK {
            let h = entry.heights[morton];
            if h.is_nan() {
                continue;
            }
            let node_idx = ChunkMorton(morton as u16).unpack();
            let flags = exit_masks[&(section_key, chunk, node_idx)];
            nodes[morton] = Node { y: h, exit_mask: flags };
        }
        builder.push_chunk(chunk.pack(), nodes);
    }

    builder.build()
}

fn chunk_world_center(section: SectionKey, chunk: ChunkIdx) -> Vec3 {
    let corner = lattice::graph_to_world_base(section, chunk, NodeIdx::new(0, 0));
    Vec3::new(
        corner.x + NODES_PER_CHUNK_AXIS as f32 * NODE_SIZE / 2.0,
        corner.y + CHUNK_HEIGHT / 2.0,
        corner.z + NODES_PER_CHUNK_AXIS as f32 * NODE_SIZE / 2.0,
    )
}

fn global_coords(section: SectionKey, chunk: ChunkIdx, node: NodeIdx) -> (i64, i64, i64) {
    lattice::join_global(section, chunk, node)
}

fn pass1_connectivity(
    scanned: &std::collections::HashMap<(SectionKey, ChunkIdx), ChunkHeights>,
    section: SectionKey,
    chunk: ChunkIdx,
    node: NodeIdx,
    h: f32,
    params: &BakeParams,
) -> MovementFlags {
    let mut flags = MovementFlags::empty();
    let (gx, gz, chunk_y) = global_coords(section, chunk, node);
    let row = lattice::offsets_for_row(gz);

    for offset in row {
        if let Some((h2, verticality)) = probe_neighbor(scanned, gx, gz, chunk_y, offset.dgx, offset.dgz, h, params) {
            let _ = h2;
            flags.set_direction(offset.direction);
            flags.set_verticality(offset.direction, verticality);
        }
    }
    flags
}

/// Tries `Δy ∈ {0, +1, -1}` candidate chunk layers in that order and returns
/// the first one whose neighbour node is finite and within `max_slope`,
/// together with the neighbour's resolved lattice address.
///
/// Shared by [`probe_neighbor`] (pass 1) and [`has_core_neighbor`] (pass 2)
/// so both passes land on the same Y layer for a stepped neighbour.
fn resolve_neighbor(
    scanned: &std::collections::HashMap<(SectionKey, ChunkIdx), ChunkHeights>,
    gx: i64,
    gz: i64,
    chunk_y: i64,
    dgx: i64,
    dgz: i64,
    h: f32,
    params: &BakeParams,
) -> Option<(SectionKey, ChunkIdx, NodeIdx, f32, i64)> {
    for dy in [0i64, 1, -1] {
        let (section, chunk, node) = split_wrapping(gx + dgx, gz + dgz, chunk_y + dy);
        if let Some(h2) = lookup_height(scanned, section, chunk, node) {
            if (h2 - h).abs() <= params.max_slope {
                return Some((section, chunk, node, h2, dy));
            }
        }
    }
    None
}

fn probe_neighbor(
    scanned: &std::collections::HashMap<(SectionKey, ChunkIdx), ChunkHeights>,
    gx: i64,
    gz: i64,
    chunk_y: i64,
    dgx: i64,
    dgz: i64,
    h: f32,
    params: &BakeParams,
) -> Option<(f32, crate::blob::Verticality)> {
    use crate::blob::Verticality;
    let (_, _, _, h2, dy) = resolve_neighbor(scanned, gx, gz, chunk_y, dgx, dgz, h, params)?;
    let verticality = if dy == 1 {
        Verticality::StepUp
    } else if dy == -1 {
        Verticality::StepDown
    } else {
        Verticality::Same
    };
    Some((h2, verticality))
}

fn split_wrapping(gx: i64, gz: i64, chunk_y: i64) -> (SectionKey, ChunkIdx, NodeIdx) {
    lattice::split_global(gx, gz, chunk_y)
}

fn has_core_neighbor(
    scanned: &std::collections::HashMap<(SectionKey, ChunkIdx), ChunkHeights>,
    exit_masks: &mut std::collections::HashMap<(SectionKey, ChunkIdx, NodeIdx), MovementFlags>,
    section: SectionKey,
    chunk: ChunkIdx,
    node: NodeIdx,
    h: f32,
    flags: MovementFlags,
    params: &BakeParams,
) -> bool {
    let (gx, gz, chunk_y) = global_coords(section, chunk, node);
    let row = lattice::offsets_for_row(gz);

    for offset in row {
        if !flags.has_direction(offset.direction) {
            continue;
        }
        let Some((n_section, n_chunk, n_node, _, _)) =
            resolve_neighbor(scanned, gx, gz, chunk_y, offset.dgx, offset.dgz, h, params)
        else {
            continue;
        };
        let key = (n_section, n_chunk, n_node);
        let neighbor_flags = match exit_masks.get(&key) {
            Some(&f) => f,
            None => {
                // Neighbour's source chunk was never scanned as part of this
                // section sweep; recompute its connectivity on demand and
                // cache it so repeated lookups don't redo the work.
                let h = match lookup_height(scanned, n_section, n_chunk, n_node) {
                    Some(h) => h,
                    None => continue,
                };
                let recomputed = pass1_connectivity(scanned, n_section, n_chunk, n_node, h, params);
                exit_masks.insert(key, recomputed);
                recomputed
            }
        };
        if neighbor_flags.is_core() {
            return true;
        }
    }
    false
}

/// A deterministic in-memory [`GeometryProbe`] double: a flat plane at a
/// fixed height, bounded to `[x_min, x_max) x [z_min, z_max)`. Used by tests
/// and by the demo bake in `nav-runtime`, where there's no real physics
/// world to probe.
pub mod test_support {
    use super::*;

    pub struct FlatPlaneProbe {
        pub ground_y: f32,
        pub x_range: (f32, f32),
        pub z_range: (f32, f32),
    }

    impl FlatPlaneProbe {
        pub fn new(ground_y: f32, x_range: (f32, f32), z_range: (f32, f32)) -> Self {
            Self { ground_y, x_range, z_range }
        }

        fn in_bounds(&self, x: f32, z: f32) -> bool {
            x >= self.x_range.0 && x < self.x_range.1 && z >= self.z_range.0 && z < self.z_range.1
        }
    }

    impl GeometryProbe for FlatPlaneProbe {
        fn box_overlap(&self, center: Vec3, half_extents: Vec3, _mask: u32) -> bool {
            let lo_x = center.x - half_extents.x;
            let hi_x = center.x + half_extents.x;
            let lo_z = center.z - half_extents.z;
            let hi_z = center.z + half_extents.z;
            hi_x >= self.x_range.0 && lo_x <= self.x_range.1 && hi_z >= self.z_range.0 && lo_z <= self.z_range.1
                && center.y - half_extents.y <= self.ground_y
                && center.y + half_extents.y >= self.ground_y
        }

        fn raycast_column(&self, origin: Vec3, down_length: f32, _mask: u32) -> Option<HitPoint> {
            if !self.in_bounds(origin.x, origin.z) {
                return None;
            }
            if origin.y - down_length > self.ground_y || origin.y < self.ground_y {
                return None;
            }
            Some(HitPoint { position: Vec3::new(origin.x, self.ground_y, origin.z), collider: 1 })
        }

        fn capsule_overlap(&self, _bottom: Vec3, _top: Vec3, _radius: f32, _mask: u32) -> Option<ColliderId> {
            None
        }
    }
}
