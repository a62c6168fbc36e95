//! JSON metadata describing how an extracted object is laid out in game memory.
//!
//! # Examples
//! ```rust no_run
//! use migoto_model::metadata::ObjectMetadata;
//!
//! let metadata = ObjectMetadata::from_file("out/0000aaaa/Metadata.json")?;
//! for component in &metadata.components {
//!     println!("{} vertices at {}", component.vertex_count, component.vertex_offset);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
use std::{collections::BTreeMap, path::Path};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::{
    component::{MeshComponent, MeshObject},
    error::LoadMetadataError,
    extractor::PoseFormat,
    shapekeys::ShapeKeys,
};

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub ib_hash: SmolStr,
    pub vb0_hash: SmolStr,
    pub vb1_hash: SmolStr,
    pub vertex_count: u32,
    pub index_count: u32,
    pub components: Vec<ComponentMetadata>,
    #[serde(default)]
    pub shapekeys: ShapeKeyMetadata,
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ComponentMetadata {
    pub pose_format: PoseFormat,
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
    pub vg_offset: u32,
    pub vg_count: u32,
}

/// Fields are zero or empty for objects without shape keys.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeKeyMetadata {
    pub offsets_hash: SmolStr,
    pub scale_hash: SmolStr,
    /// The number of populated shape key entries.
    pub vertex_count: u32,
    pub dispatch_y: u32,
    /// The sum of the first 4 shape key offsets.
    pub checksum: u32,
}

/// The texture hashes used by each component by slot.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextureUsage(pub IndexMap<String, BTreeMap<String, Vec<String>>>);

impl ObjectMetadata {
    pub fn from_object(object: &MeshObject) -> Self {
        Self {
            ib_hash: object.ib_hash.clone(),
            vb0_hash: object.vb0_hash.clone(),
            vb1_hash: object.vb1_hash.clone(),
            vertex_count: object.vertex_count,
            index_count: object.index_count,
            components: object
                .components
                .iter()
                .map(ComponentMetadata::from_component)
                .collect(),
            shapekeys: object
                .shapekeys
                .as_ref()
                .map(ShapeKeyMetadata::from_shapekeys)
                .unwrap_or_default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, LoadMetadataError> {
        serde_json::from_str(json).map_err(Into::into)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadMetadataError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Pretty printed JSON with 4 space indentation.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        to_json_pretty(self)
    }
}

impl ComponentMetadata {
    fn from_component(component: &MeshComponent) -> Self {
        Self {
            pose_format: component.pose_format,
            vertex_offset: component.vertex_offset,
            vertex_count: component.vertex_count,
            index_offset: component.index_offset,
            index_count: component.index_count,
            vg_offset: component.vg_offset,
            vg_count: component.vg_count,
        }
    }
}

impl ShapeKeyMetadata {
    fn from_shapekeys(shapekeys: &ShapeKeys) -> Self {
        Self {
            offsets_hash: shapekeys.offsets_hash.clone(),
            scale_hash: shapekeys.scale_hash.clone(),
            vertex_count: shapekeys.index.entry_count() as u32,
            dispatch_y: shapekeys.dispatch_y,
            checksum: shapekeys.index.checksum(),
        }
    }
}

impl TextureUsage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        to_json_pretty(self)
    }
}

pub(crate) fn to_json_pretty<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut bytes = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut bytes, formatter);
    value.serialize(&mut serializer)?;
    // The serializer only writes valid UTF-8.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
