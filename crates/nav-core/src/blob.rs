//! Immutable, zero-copy blob format for a baked section: `Section { chunks[],
//! chunk_lookup[] }`, a small disk header, and the relocating builder that
//! produces the serialised bytes.
//!
//! The raw `Raw*` structs are `#[repr(C)]` + [`bytemuck::Pod`] so a validated
//! byte slice can be reinterpreted in place with no copies; the friendly
//! `Section`/`Chunk`/`Node` wrappers sit on top and never allocate.

use crate::coords::ChunkMorton;
use crate::error::{NavError, Result};
use crate::lattice::Direction;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

/// Canonical NaN bit pattern used by the builder so bakes are byte-for-byte
/// reproducible across platforms (NaN canonicalisation is otherwise
/// implementation-defined).
pub const CANONICAL_NAN_BITS: u32 = 0x7FC0_0000;

pub fn canonical_nan() -> f32 {
    f32::from_bits(CANONICAL_NAN_BITS)
}

const BLOB_VERSION: u32 = 0;
const SECTION_TYPE_ID: u32 = 1;
pub const NODES_PER_CHUNK: usize = 256;
pub const CHUNK_LOOKUP_LEN: usize = ChunkMorton::LOOKUP_LEN;

/// On-disk header preceding the serialised `RawSection` root.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct BlobHeader {
    version: u32,
    total_length: u32,
    type_id: u32,
    _reserved: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<BlobHeader>();

/// A relative offset + length pair: `offset` is the byte distance from the
/// start of this `RawBlobArray` struct to the start of its element data.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RawBlobArray {
    offset: u32,
    len: u32,
}

impl RawBlobArray {
    fn data_range(&self, struct_pos: usize, elem_size: usize) -> Result<std::ops::Range<usize>> {
        let start = struct_pos
            .checked_add(self.offset as usize)
            .ok_or_else(|| NavError::CorruptBlob("blob array offset overflow".into()))?;
        let end = start
            .checked_add(self.len as usize * elem_size)
            .ok_or_else(|| NavError::CorruptBlob("blob array length overflow".into()))?;
        Ok(start..end)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RawSection {
    morton_code: i32,
    chunks: RawBlobArray,
    chunk_lookup: RawBlobArray,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RawChunk {
    morton_code: u16,
    _pad: u16,
    nodes: RawBlobArray,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq)]
pub struct RawNode {
    pub y: f32,
    pub exit_mask: u64,
}

/// Per-direction slope relationship between a node and a set neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verticality {
    Same,
    StepUp,
    StepDown,
}

/// Friendly view over a [`RawNode`]'s `exit_mask` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MovementFlags(pub u64);

const UNREACHABLE_BIT: u64 = 1 << 63;
const PRIMARY_MASK: u64 = 0xFFF;

impl MovementFlags {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn unreachable() -> Self {
        Self(UNREACHABLE_BIT)
    }

    pub fn has_direction(self, dir: Direction) -> bool {
        self.0 & (1 << dir.bit_index()) != 0
    }

    pub fn set_direction(&mut self, dir: Direction) {
        self.0 |= 1 << dir.bit_index();
    }

    pub fn verticality(self, dir: Direction) -> Verticality {
        let shift = 12 + dir.bit_index() * 2;
        match (self.0 >> shift) & 0b11 {
            0b01 => Verticality::StepUp,
            0b10 => Verticality::StepDown,
            _ => Verticality::Same,
        }
    }

    pub fn set_verticality(&mut self, dir: Direction, v: Verticality) {
        let shift = 12 + dir.bit_index() * 2;
        let bits: u64 = match v {
            Verticality::Same => 0b00,
            Verticality::StepUp => 0b01,
            Verticality::StepDown => 0b10,
        };
        self.0 = (self.0 & !(0b11 << shift)) | (bits << shift);
    }

    pub fn is_unreachable(self) -> bool {
        self.0 & UNREACHABLE_BIT != 0
    }

    pub fn set_unreachable(&mut self) {
        self.0 |= UNREACHABLE_BIT;
    }

    /// Number of set bits among the twelve direction-existence slots.
    pub fn primary_popcount(self) -> u32 {
        (self.0 & PRIMARY_MASK).count_ones()
    }

    /// Core iff all six primary directions (per [`Direction::PRIMARY`]) are set.
    pub fn is_core(self) -> bool {
        Direction::PRIMARY.iter().all(|&d| self.has_direction(d))
    }
}

/// A node's height and movement flags. `y.is_nan()` means the node does not
/// exist at this lattice vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub y: f32,
    pub exit_mask: MovementFlags,
}

impl Node {
    pub fn is_empty(self) -> bool {
        self.y.is_nan()
    }

    fn from_raw(raw: RawNode) -> Self {
        Self { y: raw.y, exit_mask: MovementFlags(raw.exit_mask) }
    }

    fn to_raw(self) -> RawNode {
        RawNode { y: self.y, exit_mask: self.exit_mask.0 }
    }
}

/// Zero-copy, non-owning view into validated section bytes.
///
/// The caller must keep the backing buffer alive for as long as the
/// reference is used — this wrapper borrows it.
#[derive(Debug, Clone, Copy)]
pub struct Section<'a> {
    bytes: &'a [u8],
    root: RawSection,
    root_pos: usize,
}

/// Zero-copy view into a single chunk's bytes, borrowed from a [`Section`].
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    bytes: &'a [u8],
    root: RawChunk,
    root_pos: usize,
}

fn read_struct<T: Pod>(bytes: &[u8], pos: usize) -> Result<T> {
    let end = pos
        .checked_add(std::mem::size_of::<T>())
        .ok_or_else(|| NavError::CorruptBlob("struct read past end".into()))?;
    let slice = bytes
        .get(pos..end)
        .ok_or_else(|| NavError::CorruptBlob("struct read out of bounds".into()))?;
    Ok(*bytemuck::from_bytes(slice))
}

fn read_slice<'a, T: Pod>(bytes: &'a [u8], range: std::ops::Range<usize>) -> Result<&'a [T]> {
    let slice = bytes
        .get(range)
        .ok_or_else(|| NavError::CorruptBlob("array read out of bounds".into()))?;
    bytemuck::try_cast_slice(slice)
        .map_err(|e| NavError::CorruptBlob(format!("misaligned blob array: {e}")))
}

impl<'a> Section<'a> {
    /// Validates `bytes` as a section blob and returns a zero-copy view.
    ///
    /// Checks, in order: minimum length, header version, and declared total
    /// length against the actual buffer length (§4.C5 steps 1–3), then the
    /// structural invariants from §4.C5's property list (sorted unique
    /// chunk mortons, `chunk_lookup` agreement, node array lengths).
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE + std::mem::size_of::<RawSection>() {
            return Err(NavError::CorruptBlob("buffer shorter than header + root".into()));
        }
        let header: BlobHeader = read_struct(bytes, 0)?;
        if header.version != BLOB_VERSION {
            return Err(NavError::VersionMismatch { expected: BLOB_VERSION, found: header.version });
        }
        if header.total_length as usize > bytes.len() {
            return Err(NavError::CorruptBlob(format!(
                "declared total_length {} exceeds buffer length {}",
                header.total_length,
                bytes.len()
            )));
        }
        if header.type_id != SECTION_TYPE_ID {
            return Err(NavError::CorruptBlob(format!("unexpected type id {}", header.type_id)));
        }

        let root_pos = HEADER_SIZE;
        let root: RawSection = read_struct(bytes, root_pos)?;
        let section = Self { bytes, root, root_pos };
        section.validate()?;
        Ok(section)
    }

    fn validate(&self) -> Result<()> {
        if self.root.chunks.len == 0 {
            return Err(NavError::CorruptBlob("section has zero chunks".into()));
        }
        let chunks = self.raw_chunks()?;
        let lookup = self.raw_lookup()?;
        if lookup.len() != CHUNK_LOOKUP_LEN {
            return Err(NavError::CorruptBlob(format!(
                "chunk_lookup length {} != {}",
                lookup.len(),
                CHUNK_LOOKUP_LEN
            )));
        }

        let mut last_morton: Option<u16> = None;
        for (k, chunk) in chunks.iter().enumerate() {
            if let Some(last) = last_morton {
                if chunk.morton_code <= last {
                    return Err(NavError::CorruptBlob("chunks not strictly ascending by morton_code".into()));
                }
            }
            last_morton = Some(chunk.morton_code);

            if chunk.nodes.len as usize != NODES_PER_CHUNK {
                return Err(NavError::CorruptBlob(format!(
                    "chunk {k} node array length {} != {NODES_PER_CHUNK}",
                    chunk.nodes.len
                )));
            }
            let elem_pos = self.root_pos
                + offset_of_chunks()
                + self.root.chunks.offset as usize
                + k * std::mem::size_of::<RawChunk>();
            let node_range = chunk
                .nodes
                .data_range(elem_pos + offset_of_nodes(), std::mem::size_of::<RawNode>())?;
            read_slice::<RawNode>(self.bytes, node_range)?;
        }

        for (morton, &entry) in lookup.iter().enumerate() {
            if entry == -1 {
                continue;
            }
            let k = entry as usize;
            let chunk = chunks
                .get(k)
                .ok_or_else(|| NavError::CorruptBlob("chunk_lookup index out of range".into()))?;
            if chunk.morton_code as usize != morton {
                return Err(NavError::CorruptBlob("chunk_lookup/morton_code disagreement".into()));
            }
        }
        Ok(())
    }

    fn raw_chunks(&self) -> Result<&'a [RawChunk]> {
        let range = self.root.chunks.data_range(self.root_pos + offset_of_chunks(), std::mem::size_of::<RawChunk>())?;
        read_slice(self.bytes, range)
    }

    fn raw_lookup(&self) -> Result<&'a [i16]> {
        let range = self
            .root
            .chunk_lookup
            .data_range(self.root_pos + offset_of_chunk_lookup(), std::mem::size_of::<i16>())?;
        read_slice(self.bytes, range)
    }

    pub fn morton_code(&self) -> i32 {
        self.root.morton_code
    }

    pub fn chunk_count(&self) -> usize {
        self.root.chunks.len as usize
    }

    pub fn chunk_at(&self, k: usize) -> Option<Chunk<'a>> {
        let chunks = self.raw_chunks().ok()?;
        let raw = *chunks.get(k)?;
        let elem_pos = self.root_pos
            + offset_of_chunks()
            + self.root.chunks.offset as usize
            + k * std::mem::size_of::<RawChunk>();
        Some(Chunk { bytes: self.bytes, root: raw, root_pos: elem_pos })
    }

    /// Looks up a chunk by its Morton code via `chunk_lookup`, `O(1)`.
    pub fn find_chunk(&self, morton: ChunkMorton) -> Option<Chunk<'a>> {
        let lookup = self.raw_lookup().ok()?;
        let entry = *lookup.get(morton.0 as usize)?;
        if entry < 0 {
            return None;
        }
        self.chunk_at(entry as usize)
    }
}

/// Non-owning, reference-counted handle to a validated section blob.
///
/// Wraps the shared backing buffer; the zero-copy [`Section`] view is
/// re-derived from it on each access rather than stored, so the handle
/// itself carries no lifetime parameter and can be cloned, stashed in a
/// registry column, or moved across an async boundary freely. Re-deriving
/// only re-reads the header and root struct — validation happened once, at
/// construction.
#[derive(Debug, Clone)]
pub struct BlobAssetReference {
    buffer: Arc<[u8]>,
}

impl BlobAssetReference {
    /// Validates `buffer` as a section blob (§4.C5) and wraps it.
    pub fn new(buffer: Arc<[u8]>) -> Result<Self> {
        Section::from_bytes(&buffer)?;
        Ok(Self { buffer })
    }

    /// The zero-copy view into this reference's backing buffer.
    pub fn section(&self) -> Section<'_> {
        Section::from_bytes(&self.buffer).expect("buffer validated at construction")
    }

    pub fn buffer(&self) -> &Arc<[u8]> {
        &self.buffer
    }
}

fn offset_of_chunks() -> usize {
    std::mem::offset_of!(RawSection, chunks)
}

fn offset_of_chunk_lookup() -> usize {
    std::mem::offset_of!(RawSection, chunk_lookup)
}

fn offset_of_nodes() -> usize {
    std::mem::offset_of!(RawChunk, nodes)
}

impl<'a> Chunk<'a> {
    pub fn morton_code(&self) -> ChunkMorton {
        ChunkMorton(self.root.morton_code)
    }

    fn raw_nodes(&self) -> Result<&'a [RawNode]> {
        let range = self
            .root
            .nodes
            .data_range(self.root_pos + offset_of_nodes(), std::mem::size_of::<RawNode>())?;
        read_slice(self.bytes, range)
    }

    /// Node at dense index `i` (must be `< NODES_PER_CHUNK`, Morton-ordered).
    pub fn node(&self, i: usize) -> Option<Node> {
        let nodes = self.raw_nodes().ok()?;
        nodes.get(i).copied().map(Node::from_raw)
    }

    pub fn nodes_len(&self) -> usize {
        self.root.nodes.len as usize
    }
}

/// Relocating builder for a `Section` blob. Regions are appended in layout
/// order (header, root, chunk array, each chunk's node array, chunk lookup);
/// `RawBlobArray` offsets are patched once each region's final position is
/// known, matching the 32-bit relative-pointer builder contract.
pub struct SectionBuilder {
    chunks: Vec<(u16, [Node; NODES_PER_CHUNK])>,
}

impl SectionBuilder {
    pub fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Adds a chunk's dense 256-node array, keyed by its Morton code. Chunks
    /// must be added in ascending Morton order (the baker already produces
    /// them sorted; this builder does not re-sort).
    pub fn push_chunk(&mut self, morton: ChunkMorton, nodes: [Node; NODES_PER_CHUNK]) {
        self.chunks.push((morton.0, nodes));
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Serialises into the final byte buffer. Returns `None` if no chunks
    /// were pushed (an empty section is never written to disk, per §4.C7
    /// step 3).
    pub fn build(self) -> Option<Vec<u8>> {
        if self.chunks.is_empty() {
            return None;
        }

        let mut buf = vec![0u8; HEADER_SIZE + std::mem::size_of::<RawSection>()];
        let root_pos = HEADER_SIZE;

        // Chunk array immediately follows the root.
        let chunks_struct_pos = root_pos + offset_of_chunks();
        let chunks_data_pos = buf.len();
        buf.resize(chunks_data_pos + self.chunks.len() * std::mem::size_of::<RawChunk>(), 0);

        // Node arrays follow the chunk array, one per chunk, in order.
        let mut node_data_positions = Vec::with_capacity(self.chunks.len());
        for (_, nodes) in &self.chunks {
            let pos = buf.len();
            node_data_positions.push(pos);
            let raw_nodes: Vec<RawNode> = nodes.iter().map(|n| n.to_raw()).collect();
            buf.extend_from_slice(bytemuck::cast_slice(&raw_nodes));
        }

        // chunk_lookup follows all node arrays.
        let lookup_struct_pos = root_pos + offset_of_chunk_lookup();
        let lookup_data_pos = buf.len();
        let mut lookup = vec![-1i16; CHUNK_LOOKUP_LEN];
        for (k, (morton, _)) in self.chunks.iter().enumerate() {
            lookup[*morton as usize] = k as i16;
        }
        buf.extend_from_slice(bytemuck::cast_slice(&lookup));

        // Write the chunk structs now that node offsets are known.
        for (k, (morton, _)) in self.chunks.iter().enumerate() {
            let chunk_struct_pos = chunks_data_pos + k * std::mem::size_of::<RawChunk>();
            let nodes_struct_pos = chunk_struct_pos + offset_of_nodes();
            let raw = RawChunk {
                morton_code: *morton,
                _pad: 0,
                nodes: RawBlobArray {
                    offset: (node_data_positions[k] - nodes_struct_pos) as u32,
                    len: NODES_PER_CHUNK as u32,
                },
            };
            buf[chunk_struct_pos..chunk_struct_pos + std::mem::size_of::<RawChunk>()]
                .copy_from_slice(bytemuck::bytes_of(&raw));
        }

        let root = RawSection {
            morton_code: 0,
            chunks: RawBlobArray {
                offset: (chunks_data_pos - chunks_struct_pos) as u32,
                len: self.chunks.len() as u32,
            },
            chunk_lookup: RawBlobArray {
                offset: (lookup_data_pos - lookup_struct_pos) as u32,
                len: CHUNK_LOOKUP_LEN as u32,
            },
        };
        buf[root_pos..root_pos + std::mem::size_of::<RawSection>()]
            .copy_from_slice(bytemuck::bytes_of(&root));

        let header = BlobHeader {
            version: BLOB_VERSION,
            total_length: buf.len() as u32,
            type_id: SECTION_TYPE_ID,
            _reserved: 0,
        };
        buf[0..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));

        Some(buf)
    }
}

impl Default for SectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_node() -> Node {
        Node { y: canonical_nan(), exit_mask: MovementFlags::unreachable() }
    }

    #[test]
    fn builder_roundtrip_single_chunk() {
        let mut builder = SectionBuilder::new();
        let mut nodes = [empty_node(); NODES_PER_CHUNK];
        nodes[0] = Node { y: 1.5, exit_mask: MovementFlags(0b101) };
        builder.push_chunk(ChunkMorton(7), nodes);
        let bytes = builder.build().unwrap();

        let section = Section::from_bytes(&bytes).unwrap();
        assert_eq!(section.chunk_count(), 1);
        let chunk = section.find_chunk(ChunkMorton(7)).unwrap();
        assert_eq!(chunk.morton_code(), ChunkMorton(7));
        let node0 = chunk.node(0).unwrap();
        assert_eq!(node0.y, 1.5);
        assert!(chunk.node(1).unwrap().is_empty());
        assert!(section.find_chunk(ChunkMorton(8)).is_none());
    }

    #[test]
    fn chunk_lookup_scenario_c() {
        let mut builder = SectionBuilder::new();
        builder.push_chunk(ChunkMorton(7), [empty_node(); NODES_PER_CHUNK]);
        builder.push_chunk(ChunkMorton(42), [empty_node(); NODES_PER_CHUNK]);
        let bytes = builder.build().unwrap();
        let section = Section::from_bytes(&bytes).unwrap();

        assert_eq!(section.find_chunk(ChunkMorton(7)).unwrap().morton_code(), ChunkMorton(7));
        assert_eq!(section.find_chunk(ChunkMorton(42)).unwrap().morton_code(), ChunkMorton(42));
        assert!(section.find_chunk(ChunkMorton(0)).is_none());
        assert!(section.find_chunk(ChunkMorton(100)).is_none());
    }

    #[test]
    fn empty_builder_yields_no_blob() {
        assert!(SectionBuilder::new().build().is_none());
    }

    #[test]
    fn version_mismatch_is_detected() {
        let mut builder = SectionBuilder::new();
        builder.push_chunk(ChunkMorton(0), [empty_node(); NODES_PER_CHUNK]);
        let mut bytes = builder.build().unwrap();
        bytes[0] = 9; // corrupt the version word (little-endian low byte)
        assert!(matches!(Section::from_bytes(&bytes), Err(NavError::VersionMismatch { .. })));
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let mut builder = SectionBuilder::new();
        builder.push_chunk(ChunkMorton(0), [empty_node(); NODES_PER_CHUNK]);
        let bytes = builder.build().unwrap();
        assert!(Section::from_bytes(&bytes[..bytes.len() - 4]).is_err());
    }

    #[test]
    fn movement_flags_primary_and_unreachable() {
        let mut flags = MovementFlags::empty();
        for d in Direction::PRIMARY {
            flags.set_direction(d);
        }
        assert!(flags.is_core());
        assert_eq!(flags.primary_popcount(), 6);
        assert!(!flags.is_unreachable());
        flags.set_unreachable();
        assert!(flags.is_unreachable());
    }

    #[test]
    fn blob_asset_reference_shares_validated_bytes() {
        let mut builder = SectionBuilder::new();
        builder.push_chunk(ChunkMorton(7), [empty_node(); NODES_PER_CHUNK]);
        let bytes = builder.build().unwrap();

        let reference = BlobAssetReference::new(Arc::from(bytes)).unwrap();
        let clone = reference.clone();
        assert_eq!(reference.section().chunk_count(), 1);
        assert_eq!(clone.section().find_chunk(ChunkMorton(7)).unwrap().morton_code(), ChunkMorton(7));
        assert!(Arc::ptr_eq(reference.buffer(), clone.buffer()));
    }

    #[test]
    fn wrong_node_array_length_is_rejected() {
        let mut builder = SectionBuilder::new();
        builder.push_chunk(ChunkMorton(0), [empty_node(); NODES_PER_CHUNK]);
        let mut bytes = builder.build().unwrap();

        let chunk_struct_pos = HEADER_SIZE + std::mem::size_of::<RawSection>();
        let len_pos = chunk_struct_pos + offset_of_nodes() + std::mem::offset_of!(RawBlobArray, len);
        bytes[len_pos..len_pos + 4].copy_from_slice(&(NODES_PER_CHUNK as u32 - 1).to_ne_bytes());

        assert!(matches!(Section::from_bytes(&bytes), Err(NavError::CorruptBlob(_))));
    }

    #[test]
    fn movement_flags_verticality_roundtrip() {
        let mut flags = MovementFlags::empty();
        flags.set_verticality(Direction::NE, Verticality::StepUp);
        flags.set_verticality(Direction::SW, Verticality::StepDown);
        assert_eq!(flags.verticality(Direction::NE), Verticality::StepUp);
        assert_eq!(flags.verticality(Direction::SW), Verticality::StepDown);
        assert_eq!(flags.verticality(Direction::E), Verticality::Same);
    }
}
