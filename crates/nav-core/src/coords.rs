//! Identifiers for the three spatial tiers (section, chunk, node) and the
//! scene-scoped addresses built from them.

use crate::error::{NavError, Result};
use crate::morton;
use std::fmt;

/// Section axis range, inclusive on both ends; biased by 512 when packed.
const SECTION_AXIS_MIN: i32 = -512;
const SECTION_AXIS_MAX: i32 = 511;
const SECTION_BIAS: i32 = 512;

/// A signed section coordinate triple. Each axis must lie in `[-512, 511]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionKey {
    pub sx: i32,
    pub sy: i32,
    pub sz: i32,
}

impl SectionKey {
    pub const fn new(sx: i32, sy: i32, sz: i32) -> Self {
        Self { sx, sy, sz }
    }

    fn check_axis(v: i32) -> Result<()> {
        if v < SECTION_AXIS_MIN || v > SECTION_AXIS_MAX {
            return Err(NavError::OutOfRange(format!(
                "section axis {v} outside [{SECTION_AXIS_MIN}, {SECTION_AXIS_MAX}]"
            )));
        }
        Ok(())
    }

    /// Packs this key into its 30-bit Morton `SectionId`.
    pub fn pack(self) -> Result<SectionId> {
        Self::check_axis(self.sx)?;
        Self::check_axis(self.sy)?;
        Self::check_axis(self.sz)?;
        let bx = (self.sx + SECTION_BIAS) as u16;
        let by = (self.sy + SECTION_BIAS) as u16;
        let bz = (self.sz + SECTION_BIAS) as u16;
        Ok(SectionId(morton::encode_3d_10bits(bx, by, bz)))
    }
}

/// 30-bit Morton interleave of a biased [`SectionKey`], stored in a `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionId(pub u32);

impl SectionId {
    /// Unpacks back into the signed `(sx, sy, sz)` triple.
    pub const fn unpack(self) -> SectionKey {
        let (bx, by, bz) = morton::decode_3d_10bits(self.0);
        SectionKey {
            sx: bx as i32 - SECTION_BIAS,
            sy: by as i32 - SECTION_BIAS,
            sz: bz as i32 - SECTION_BIAS,
        }
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque 128-bit scene identifier, rendered as 32 lowercase hex digits in
/// resource keys (see §6 of the spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneId(pub [u8; 16]);

impl SceneId {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for SceneId {
    type Err = NavError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 32 {
            return Err(NavError::OutOfRange(format!(
                "scene id must be 32 hex digits, got {} chars",
                s.len()
            )));
        }
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let hex = &s[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(hex, 16)
                .map_err(|_| NavError::OutOfRange(format!("invalid hex in scene id: {hex}")))?;
        }
        Ok(Self(bytes))
    }
}

/// The user-facing, globally unique key for a baked section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionAddress {
    pub scene: SceneId,
    pub section: SectionId,
}

impl SectionAddress {
    pub const fn new(scene: SceneId, section: SectionId) -> Self {
        Self { scene, section }
    }

    /// The resource key under which this section's bytes live: see §6.
    pub fn resource_key(&self) -> String {
        format!("Data/SubScene_{}/Section_{}", self.scene, self.section)
    }
}

/// Chunk index within a section: `cx, cz` in `[0, 31]`, `cy` in `[0, 3]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkIdx {
    pub cx: u8,
    pub cy: u8,
    pub cz: u8,
}

impl ChunkIdx {
    pub const fn new(cx: u8, cy: u8, cz: u8) -> Self {
        Self { cx, cy, cz }
    }

    /// Packs into the 15-bit chunk Morton code (uniform 5 bits/axis; the
    /// `cy` axis only uses its low 2 bits, wasting bits for uniformity).
    pub const fn pack(self) -> ChunkMorton {
        ChunkMorton(morton::encode_3d_5bits(self.cx, self.cy, self.cz))
    }
}

/// 15-bit 3D Morton code of a [`ChunkIdx`]. Spans `[0, 32767]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkMorton(pub u16);

impl ChunkMorton {
    pub const LOOKUP_LEN: usize = 1 << 15;

    pub const fn unpack(self) -> ChunkIdx {
        let (cx, cy, cz) = morton::decode_3d_5bits(self.0);
        ChunkIdx { cx, cy, cz }
    }
}

/// Fully qualifies a single chunk within a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkAddress {
    pub scene: SceneId,
    pub section: SectionId,
    pub chunk: ChunkMorton,
}

/// Node index within a chunk: `nx, nz` in `[0, 15]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIdx {
    pub nx: u8,
    pub nz: u8,
}

impl NodeIdx {
    pub const fn new(nx: u8, nz: u8) -> Self {
        Self { nx, nz }
    }

    pub const fn pack(self) -> NodeMorton {
        NodeMorton(morton::encode_2d_4bits(self.nx, self.nz))
    }
}

/// 8-bit 2D Morton code of a [`NodeIdx`]. Spans `[0, 255]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeMorton(pub u8);

impl NodeMorton {
    pub const NODES_PER_CHUNK: usize = 256;

    pub const fn unpack(self) -> NodeIdx {
        let (nx, nz) = morton::decode_2d_4bits(self.0);
        NodeIdx { nx, nz }
    }
}

/// Fully qualifies a single lattice vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    pub scene: SceneId,
    pub section: SectionId,
    pub chunk: ChunkMorton,
    pub node: NodeMorton,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_id_bijection() {
        let key = SectionKey::new(-3, 0, 5);
        let id = key.pack().unwrap();
        assert_eq!(id.unpack(), key);
    }

    #[test]
    fn section_id_out_of_range() {
        let key = SectionKey::new(-513, 0, 0);
        assert!(matches!(key.pack(), Err(NavError::OutOfRange(_))));
    }

    #[test]
    fn section_id_bijection_exhaustive_sample() {
        for sx in [-512i32, -1, 0, 1, 511] {
            for sy in [-512i32, 0, 511] {
                for sz in [-512i32, 0, 511] {
                    let key = SectionKey::new(sx, sy, sz);
                    assert_eq!(key.pack().unwrap().unpack(), key);
                }
            }
        }
    }

    #[test]
    fn chunk_morton_roundtrip_exhaustive() {
        for cx in 0..32u8 {
            for cy in 0..4u8 {
                for cz in 0..32u8 {
                    let idx = ChunkIdx::new(cx, cy, cz);
                    assert_eq!(idx.pack().unpack(), idx);
                }
            }
        }
    }

    #[test]
    fn node_morton_roundtrip_exhaustive() {
        for nx in 0..16u8 {
            for nz in 0..16u8 {
                let idx = NodeIdx::new(nx, nz);
                assert_eq!(idx.pack().unpack(), idx);
            }
        }
    }

    #[test]
    fn scene_id_display_roundtrip() {
        let scene = SceneId::from_bytes([0xab; 16]);
        let s = scene.to_string();
        assert_eq!(s.len(), 32);
        let parsed: SceneId = s.parse().unwrap();
        assert_eq!(parsed, scene);
    }

    #[test]
    fn resource_key_format() {
        let scene = SceneId::from_bytes([0u8; 16]);
        let section = SectionKey::new(0, 0, 0).pack().unwrap();
        let addr = SectionAddress::new(scene, section);
        assert_eq!(
            addr.resource_key(),
            format!("Data/SubScene_{}/Section_{}", "0".repeat(32), 0)
        );
    }
}
