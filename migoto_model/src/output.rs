//! Convert merged objects into the files written for each object.
use std::path::PathBuf;

use indexmap::IndexMap;
use log::info;
use migoto_lib::{
    buffer::ByteBuffer, filename::ResourceDescriptor, index::IndexBuffer,
    vertex_format::VertexFormat,
};
use smol_str::SmolStr;

use crate::{
    component::MeshObject,
    error::ExtractError,
    metadata::{ObjectMetadata, TextureUsage},
};

/// Rules for excluding textures from the output.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct TextureFilter {
    /// The minimum file size in bytes or `0` to keep textures of any size.
    pub min_file_size: u64,
    /// File extensions like `jpg` to exclude.
    pub exclude_extensions: Vec<String>,
    /// Exclude textures bound to the same slot with the same hash in every component.
    /// Objects with a single component are not affected.
    pub exclude_same_slot_hash_textures: bool,
}

impl TextureFilter {
    /// The remaining textures for each component.
    pub fn filter(
        &self,
        components: &[&IndexMap<String, ResourceDescriptor>],
    ) -> Result<Vec<Vec<ResourceDescriptor>>, ExtractError> {
        let mut slot_hash_counts: IndexMap<&str, usize> = IndexMap::new();
        for textures in components {
            for slot_hash in textures.keys() {
                *slot_hash_counts.entry(slot_hash).or_default() += 1;
            }
        }

        components
            .iter()
            .map(|textures| {
                let mut filtered = Vec::new();
                for (slot_hash, texture) in textures.iter() {
                    if self
                        .exclude_extensions
                        .iter()
                        .any(|e| e.as_str() == texture.ext.as_str())
                    {
                        continue;
                    }

                    if self.min_file_size != 0 {
                        let size = texture.len().map_err(|e| ExtractError::Io {
                            path: texture.path.clone(),
                            source: e,
                        })?;
                        if size < self.min_file_size {
                            continue;
                        }
                    }

                    if self.exclude_same_slot_hash_textures
                        && components.len() > 1
                        && slot_hash_counts.get(slot_hash.as_str()) == Some(&components.len())
                    {
                        continue;
                    }

                    filtered.push(texture.clone());
                }
                Ok(filtered)
            })
            .collect()
    }
}

/// The encoded buffers of a single component.
#[derive(Debug, Clone)]
pub struct ComponentData {
    pub fmt: VertexFormat,
    pub vb: Vec<u8>,
    pub ib: Vec<u8>,
    pub textures: Vec<ResourceDescriptor>,
}

impl ComponentData {
    pub fn new(
        vertex_buffer: &ByteBuffer,
        index_buffer: &IndexBuffer,
        textures: Vec<ResourceDescriptor>,
    ) -> Result<Self, ExtractError> {
        Ok(Self {
            // Tools importing the fmt expect a single channel index format.
            fmt: VertexFormat::new(vertex_buffer.layout().clone(), index_buffer.index_format()?),
            vb: vertex_buffer.to_bytes(),
            ib: index_buffer.to_bytes()?,
            textures,
        })
    }
}

/// A texture file used by one or more components.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TextureFile {
    pub path: PathBuf,
    /// Sorted component indices.
    pub components: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct ObjectData {
    pub metadata: ObjectMetadata,
    pub components: Vec<ComponentData>,
}

impl ObjectData {
    /// The texture hashes for each slot by component name like `Component 0`.
    pub fn texture_usage(&self) -> TextureUsage {
        TextureUsage(
            self.components
                .iter()
                .enumerate()
                .map(|(i, component)| {
                    let mut slots = std::collections::BTreeMap::<String, Vec<String>>::new();
                    for texture in &component.textures {
                        slots.entry(texture.slot()).or_default().push(format!(
                            "{}-{}",
                            texture.hash.as_deref().unwrap_or_default(),
                            texture.shaders_string()
                        ));
                    }
                    (format!("Component {i}"), slots)
                })
                .collect(),
        )
    }

    /// The unique texture files by hash.
    pub fn texture_files(&self) -> IndexMap<SmolStr, TextureFile> {
        let mut files: IndexMap<SmolStr, TextureFile> = IndexMap::new();
        for (i, component) in self.components.iter().enumerate() {
            for texture in &component.textures {
                let hash = texture.hash.clone().unwrap_or_default();
                let file = files.entry(hash).or_insert_with(|| TextureFile {
                    path: texture.path.clone(),
                    components: Vec::new(),
                });
                if !file.components.contains(&i) {
                    file.components.push(i);
                }
            }
        }
        for file in files.values_mut() {
            file.components.sort();
        }
        files
    }
}

/// Encode the buffers and metadata of each object.
#[tracing::instrument(skip_all)]
pub fn build_output(
    objects: &IndexMap<SmolStr, MeshObject>,
    texture_filter: &TextureFilter,
) -> Result<IndexMap<SmolStr, ObjectData>, ExtractError> {
    let output = objects
        .iter()
        .map(|(vb_hash, object)| {
            let textures: Vec<_> = object.components.iter().map(|c| &c.textures).collect();
            let textures = texture_filter.filter(&textures)?;

            let components = object
                .components
                .iter()
                .zip(textures)
                .map(|(c, textures)| ComponentData::new(&c.vertex_buffer, &c.index_buffer, textures))
                .collect::<Result<Vec<_>, _>>()?;

            Ok((
                vb_hash.clone(),
                ObjectData {
                    metadata: ObjectMetadata::from_object(object),
                    components,
                },
            ))
        })
        .collect::<Result<IndexMap<_, _>, ExtractError>>()?;

    info!("Built output for {} objects", output.len());
    Ok(output)
}
