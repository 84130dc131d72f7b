//! Read-only manifest of baked subscenes and their sections (§6).
//!
//! Produced by editor tooling, consumed here as-is; rebuilding it is
//! explicitly out of scope. This module only parses and indexes it.
//!
//! `nav-core`'s address types carry no serde impls (they're pure-computation
//! types with no opinion on wire formats), so the wire shape here is the
//! plain `scene_id` hex string + decimal `section_id` pair from §6, resolved
//! into a `SectionAddress` on demand.

use std::path::Path;

use nav_core::coords::{SceneId, SectionAddress, SectionId};
use nav_core::error::{NavError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionDefinition {
    pub scene_id: String,
    pub section_id: u32,
    pub resource_key: String,
}

impl SectionDefinition {
    pub fn address(&self) -> Result<SectionAddress> {
        let scene: SceneId = self.scene_id.parse()?;
        Ok(SectionAddress::new(scene, SectionId(self.section_id)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsceneDefinition {
    pub scene_id: String,
    pub scene_path: String,
    pub sections: Vec<SectionDefinition>,
}

/// All subscenes known to the loader, flattened for lookup by address.
#[derive(Debug, Default)]
pub struct Manifest {
    subscenes: Vec<SubsceneDefinition>,
}

impl Manifest {
    pub fn from_subscenes(subscenes: Vec<SubsceneDefinition>) -> Self {
        Self { subscenes }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| NavError::AssetIoError(format!("{}: {e}", path.display())))?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self> {
        let subscenes: Vec<SubsceneDefinition> = serde_json::from_str(text)
            .map_err(|e| NavError::CorruptBlob(format!("manifest parse error: {e}")))?;
        Ok(Self::from_subscenes(subscenes))
    }

    pub fn subscenes(&self) -> &[SubsceneDefinition] {
        &self.subscenes
    }

    /// Finds the resource key for a section address, if the manifest knows it.
    pub fn resource_key(&self, addr: SectionAddress) -> Option<&str> {
        self.subscenes
            .iter()
            .flat_map(|s| &s.sections)
            .find(|s| s.address().ok() == Some(addr))
            .map(|s| s.resource_key.as_str())
    }

    pub fn section_count(&self) -> usize {
        self.subscenes.iter().map(|s| s.sections.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nav_core::coords::SectionKey;

    #[test]
    fn round_trips_through_json() {
        let scene = SceneId::from_bytes([1; 16]);
        let section = SectionKey::new(0, 0, 0).pack().unwrap();
        let addr = SectionAddress::new(scene, section);
        let manifest = Manifest::from_subscenes(vec![SubsceneDefinition {
            scene_id: scene.to_string(),
            scene_path: "Scenes/Overworld".into(),
            sections: vec![SectionDefinition {
                scene_id: scene.to_string(),
                section_id: section.0,
                resource_key: addr.resource_key(),
            }],
        }]);

        let json = serde_json::to_string(manifest.subscenes()).unwrap();
        let parsed = Manifest::load_from_str(&json).unwrap();
        assert_eq!(parsed.section_count(), 1);
        assert_eq!(parsed.resource_key(addr), Some(addr.resource_key()).as_deref());
    }

    #[test]
    fn unknown_address_returns_none() {
        let manifest = Manifest::default();
        let addr = SectionAddress::new(SceneId::from_bytes([0; 16]), SectionKey::new(0, 0, 0).pack().unwrap());
        assert_eq!(manifest.resource_key(addr), None);
    }
}
