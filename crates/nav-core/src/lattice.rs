//! World-space ↔ graph-space mapping on the staggered (hex-like) lattice,
//! and the fixed stagger/direction tables shared by the baker and any
//! runtime neighbour walker.
//!
//! The stagger tables are the single largest source of off-by-one bugs in
//! the reference system this engine is modeled on; they live in exactly one
//! place so the baker and downstream consumers can never disagree.

use crate::coords::{ChunkAddress, ChunkIdx, NodeIdx, SceneId, SectionKey};
use crate::error::Result;

/// X spacing between adjacent nodes in the same row.
pub const NODE_SIZE: f32 = 0.5;
/// Z spacing between adjacent rows: `NODE_SIZE * sqrt(3) / 2`.
pub const NODE_SPACING_Z: f32 = 0.4330127;
/// Nodes along one axis of a chunk (chunks hold 16x16 = 256 nodes, XZ only).
pub const NODES_PER_CHUNK_AXIS: i64 = 16;
/// Chunks along the horizontal axes of a section.
pub const CHUNKS_PER_SECTION_XZ: i64 = 32;
/// Chunks along the vertical axis of a section.
pub const CHUNKS_PER_SECTION_Y: i64 = 4;
/// World-space height of one chunk layer.
pub const CHUNK_HEIGHT: f32 = 4.0;
/// Maximum height delta between neighbour nodes that still counts as connected.
pub const MAX_SLOPE_HEIGHT: f32 = 0.25;

/// Nodes per section axis, horizontal: `32 * 16`.
const NODES_PER_SECTION_XZ: i64 = CHUNKS_PER_SECTION_XZ * NODES_PER_CHUNK_AXIS;

/// Section world extents in world units: `(x, y, z)`.
pub const fn section_extents() -> (f32, f32, f32) {
    (
        CHUNKS_PER_SECTION_XZ as f32 * NODES_PER_CHUNK_AXIS as f32 * NODE_SIZE,
        CHUNKS_PER_SECTION_Y as f32 * CHUNK_HEIGHT,
        CHUNKS_PER_SECTION_XZ as f32 * NODES_PER_CHUNK_AXIS as f32 * NODE_SPACING_Z,
    )
}

/// A plain 3-component float vector; `nav-core` intentionally has no
/// dependency on a general math crate, mirroring the teacher engine's
/// minimal-dependency style.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

/// One of the twelve named compass slots in [`crate::blob::MovementFlags`].
/// Only six are ever set by this engine (the primary hex neighbours); the
/// rest are reserved-zero slots left for a finer-grained future hex
/// subdivision and are never produced by the baker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    N = 0,
    NE = 1,
    EN = 2,
    E = 3,
    ES = 4,
    SE = 5,
    S = 6,
    SW = 7,
    WS = 8,
    W = 9,
    WN = 10,
    NW = 11,
}

impl Direction {
    pub const fn bit_index(self) -> u32 {
        self as u8 as u32
    }

    /// The six primary hex directions the baker ever sets, in a fixed order.
    pub const PRIMARY: [Direction; 6] = [
        Direction::NE,
        Direction::NW,
        Direction::E,
        Direction::W,
        Direction::SW,
        Direction::SE,
    ];
}

/// One of the six primary-neighbour offsets for a given lattice row parity,
/// paired with the compass bit it corresponds to.
#[derive(Debug, Clone, Copy)]
pub struct NeighborOffset {
    pub direction: Direction,
    pub dgx: i64,
    pub dgz: i64,
}

/// Stagger offset table for even global rows (`gz % 2 == 0`).
pub const EVEN_ROW_OFFSETS: [NeighborOffset; 6] = [
    NeighborOffset { direction: Direction::NE, dgx: 0, dgz: 1 },
    NeighborOffset { direction: Direction::NW, dgx: -1, dgz: 1 },
    NeighborOffset { direction: Direction::W, dgx: -1, dgz: 0 },
    NeighborOffset { direction: Direction::E, dgx: 1, dgz: 0 },
    NeighborOffset { direction: Direction::SW, dgx: -1, dgz: -1 },
    NeighborOffset { direction: Direction::SE, dgx: 0, dgz: -1 },
];

/// Stagger offset table for odd global rows (`gz % 2 == 1`).
pub const ODD_ROW_OFFSETS: [NeighborOffset; 6] = [
    NeighborOffset { direction: Direction::NE, dgx: 0, dgz: 1 },
    NeighborOffset { direction: Direction::NW, dgx: 1, dgz: 1 },
    NeighborOffset { direction: Direction::W, dgx: -1, dgz: 0 },
    NeighborOffset { direction: Direction::E, dgx: 1, dgz: 0 },
    NeighborOffset { direction: Direction::SW, dgx: 1, dgz: -1 },
    NeighborOffset { direction: Direction::SE, dgx: 0, dgz: -1 },
];

/// Picks the stagger table for a given global row index.
pub const fn offsets_for_row(gz: i64) -> &'static [NeighborOffset; 6] {
    if gz.rem_euclid(2) == 0 {
        &EVEN_ROW_OFFSETS
    } else {
        &ODD_ROW_OFFSETS
    }
}

/// Euclidean floor division: `a.div_euclid(b)`. Negative `a` normalises the
/// remainder into `[0, b)` rather than truncating toward zero.
fn floor_div(a: i64, b: i64) -> i64 {
    a.div_euclid(b)
}

/// Global lattice coordinates: an unbounded column/row index plus a y chunk
/// layer index, before being split into section/chunk/node tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GlobalNode {
    gx: i64,
    gz: i64,
    chunk_y: i64,
}

/// X offset applied to an entire row, depending on its parity.
fn row_x_offset(gz: i64) -> f32 {
    if gz.rem_euclid(2) == 1 {
        0.5 * NODE_SIZE
    } else {
        0.0
    }
}

/// World-space position of lattice vertex `(gx, gz)` in its row.
fn global_node_world_xz(gx: i64, gz: i64) -> (f32, f32) {
    let x = gx as f32 * NODE_SIZE + row_x_offset(gz);
    let z = gz as f32 * NODE_SPACING_Z;
    (x, z)
}

/// The offset within a world position after it has been snapped to a
/// lattice vertex: `pos - graph_to_world_base(world_to_graph(pos))`.
pub type NodeOffset = Vec3;

/// Splits a global lattice coordinate into section key, chunk index, and
/// node index, using Euclidean (floor) division so negative coordinates
/// wrap correctly.
pub(crate) fn split_global(gx: i64, gz: i64, chunk_y: i64) -> (SectionKey, ChunkIdx, NodeIdx) {
    let sx = floor_div(gx, NODES_PER_SECTION_XZ);
    let local_x = gx - sx * NODES_PER_SECTION_XZ;
    let cx = (local_x / NODES_PER_CHUNK_AXIS) as u8;
    let nx = (local_x % NODES_PER_CHUNK_AXIS) as u8;

    let sz = floor_div(gz, NODES_PER_SECTION_XZ);
    let local_z = gz - sz * NODES_PER_SECTION_XZ;
    let cz = (local_z / NODES_PER_CHUNK_AXIS) as u8;
    let nz = (local_z % NODES_PER_CHUNK_AXIS) as u8;

    let sy = floor_div(chunk_y, CHUNKS_PER_SECTION_Y);
    let cy = (chunk_y - sy * CHUNKS_PER_SECTION_Y) as u8;

    (SectionKey::new(sx, sy, sz), ChunkIdx::new(cx, cy, cz), NodeIdx::new(nx, nz))
}

/// Joins a section key, chunk index, and node index back into global lattice
/// coordinates.
pub(crate) fn join_global(section: SectionKey, chunk: ChunkIdx, node: NodeIdx) -> (i64, i64, i64) {
    let gx = section.sx as i64 * NODES_PER_SECTION_XZ
        + chunk.cx as i64 * NODES_PER_CHUNK_AXIS
        + node.nx as i64;
    let gz = section.sz as i64 * NODES_PER_SECTION_XZ
        + chunk.cz as i64 * NODES_PER_CHUNK_AXIS
        + node.nz as i64;
    let chunk_y = section.sy as i64 * CHUNKS_PER_SECTION_Y + chunk.cy as i64;
    (gx, gz, chunk_y)
}

/// Finds the lattice vertex nearest to `pos` and returns its address plus
/// the residual offset (`pos - snapped_vertex`).
///
/// Tests the two candidate rows bracketing `pos.z`, applies each row's
/// parity-dependent X offset, rounds X, and picks whichever candidate is
/// closer in the XZ plane. Ties favour the lower row.
pub fn world_to_graph(pos: Vec3) -> (SectionKey, ChunkIdx, NodeIdx, NodeOffset) {
    let row0 = (pos.z / NODE_SPACING_Z).floor() as i64;
    let row1 = row0 + 1;

    let candidate = |gz: i64| -> (i64, i64, f32) {
        let offset = row_x_offset(gz);
        let gx = ((pos.x - offset) / NODE_SIZE).round() as i64;
        let (wx, wz) = global_node_world_xz(gx, gz);
        let dx = pos.x - wx;
        let dz = pos.z - wz;
        (gx, gz, dx * dx + dz * dz)
    };

    let (gx0, gz0, d0) = candidate(row0);
    let (gx1, gz1, d1) = candidate(row1);

    let (gx, gz) = if d1 < d0 { (gx1, gz1) } else { (gx0, gz0) };

    let chunk_y = (pos.y / CHUNK_HEIGHT).floor() as i64;
    let (section, chunk, node) = split_global(gx, gz, chunk_y);

    let snapped = graph_to_world_base(section, chunk, node);
    let offset = pos.sub(snapped);

    (section, chunk, node, offset)
}

/// Reconstructs the world-space lattice vertex (not a cell centre) for a
/// section/chunk/node triple.
pub fn graph_to_world_base(section: SectionKey, chunk: ChunkIdx, node: NodeIdx) -> Vec3 {
    let (gx, gz, chunk_y) = join_global(section, chunk, node);
    let (x, z) = global_node_world_xz(gx, gz);
    let y = chunk_y as f32 * CHUNK_HEIGHT;
    Vec3::new(x, y, z)
}

/// Builds the fully-qualified [`ChunkAddress`] for a chunk.
pub fn get_chunk_address(scene: SceneId, section: SectionKey, chunk: ChunkIdx) -> Result<ChunkAddress> {
    let section_id = section.pack()?;
    Ok(ChunkAddress { scene, section: section_id, chunk: chunk.pack() })
}

/// The neighbour lattice vertex reached by stepping `offset` from
/// `(gx, gz, chunk_y)`, split back into section/chunk/node form. `chunk_y`
/// wraps freely across section boundaries (pass 1 of the baker probes three
/// `chunk_y` candidates around the source node).
pub fn step_neighbor(
    gx: i64,
    gz: i64,
    chunk_y: i64,
    offset: &NeighborOffset,
) -> (SectionKey, ChunkIdx, NodeIdx) {
    split_global(gx + offset.dgx, gz + offset.dgz, chunk_y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staggered_snap_scenario_a() {
        let pos = Vec3::new(0.75, 0.0, 0.4330127);
        let (section, chunk, node, offset) = world_to_graph(pos);
        let (gx, gz, chunk_y) = join_global(section, chunk, node);
        assert_eq!((gx, gz, chunk_y), (1, 1, 0));

        let snapped = graph_to_world_base(section, chunk, node);
        assert!((snapped.x - 0.75).abs() < 1e-5);
        assert!((snapped.z - 0.4330127).abs() < 1e-5);
        assert!(offset.x.abs() < 1e-4 && offset.z.abs() < 1e-4);
    }

    #[test]
    fn world_to_graph_then_back_is_idempotent() {
        for &(x, y, z) in &[
            (0.0_f32, 0.0_f32, 0.0_f32),
            (12.3, 4.0, -7.8),
            (-50.25, 16.0, 33.9),
            (200.1, -8.0, -200.1),
        ] {
            let pos = Vec3::new(x, y, z);
            let (section, chunk, node, offset) = world_to_graph(pos);
            let snapped = graph_to_world_base(section, chunk, node);
            let reconstructed = Vec3::new(snapped.x + offset.x, snapped.y + offset.y, snapped.z + offset.z);
            assert!((reconstructed.x - pos.x).abs() < 1e-3);
            assert!((reconstructed.z - pos.z).abs() < 1e-3);

            // Re-snapping the snapped vertex must be a fixed point.
            let (section2, chunk2, node2, offset2) = world_to_graph(snapped);
            assert_eq!(section, section2);
            assert_eq!(chunk, chunk2);
            assert_eq!(node, node2);
            assert!(offset2.x.abs() < 1e-4 && offset2.z.abs() < 1e-4);
        }
    }

    #[test]
    fn row_parity_determines_offset_table() {
        assert_eq!(offsets_for_row(0)[0].direction.bit_index(), Direction::NE.bit_index());
        assert_ne!(EVEN_ROW_OFFSETS[1].dgx, ODD_ROW_OFFSETS[1].dgx);
    }

    #[test]
    fn negative_coordinates_use_floor_division() {
        // A node one step left of the origin chunk must land in section -1,
        // not wrap via truncation into a bogus local index.
        let (section, chunk, node) = split_global(-1, 0, 0);
        assert_eq!(section.sx, -1);
        assert_eq!(chunk.cx, 31);
        assert_eq!(node.nx, 15);
    }
}
