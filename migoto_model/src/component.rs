//! Combine the draws of each object into exportable components.
//!
//! Each component has its own skeleton buffer with bones indexed from 0.
//! Components are concatenated in vertex offset order, so the vertex groups of
//! each component are shifted by the groups of previous components.
//! Bones shared between components are detected by their data and merged.
use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};
use log::{debug, info};
use migoto_lib::{
    buffer::ByteBuffer,
    filename::ResourceDescriptor,
    index::IndexBuffer,
    semantic::{AbstractSemantic, BufferLayout, Semantic},
};
use ordered_float::OrderedFloat;
use smol_str::SmolStr;

use crate::{
    error::ExtractError,
    extractor::{DrawData, ExtractedData, PoseFormat},
    shapekeys::ShapeKeys,
};

/// A single draw of an object with vertex indices starting from 0.
#[derive(Debug, Clone)]
pub struct MeshComponent {
    pub ib_hash: SmolStr,
    pub vb_hash: SmolStr,
    pub shapekey_hash: Option<SmolStr>,
    pub pose_format: PoseFormat,
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
    /// The first vertex group of this component in the merged skeleton.
    pub vg_offset: u32,
    pub vg_count: u32,
    pub index_buffer: IndexBuffer,
    pub vertex_buffer: ByteBuffer,
    /// A 3x4 matrix for each local vertex group.
    pub skeleton_buffer: ByteBuffer,
    /// Textures by [ResourceDescriptor::slot_hash].
    pub textures: IndexMap<String, ResourceDescriptor>,
    vg_map: Option<Vec<u32>>,
}

impl MeshComponent {
    fn from_draw(
        draw: &DrawData,
        layout: &BufferLayout,
        shapekeys: Option<&ShapeKeys>,
    ) -> Result<Self, ExtractError> {
        let shapekey_buffer = match shapekeys {
            Some(shapekeys) => shapekeys
                .index
                .build_shapekey_buffer(draw.vertex_offset, draw.vertex_count)?,
            None => None,
        };

        let mut layout = layout.clone();
        if let Some(buffer) = &shapekey_buffer {
            layout.merge(buffer.layout());
        }

        let mut vertex_buffer = ByteBuffer::new(layout);
        vertex_buffer.extend(draw.vertex_count as usize)?;
        for buffer in [
            Some(&draw.position_buffer),
            Some(&draw.blend_buffer),
            Some(&draw.vector_buffer),
            draw.color_buffer.as_ref(),
            draw.texcoord_buffer.as_ref(),
            shapekey_buffer.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            vertex_buffer.import_buffer(buffer, None, false)?;
        }

        let mut index_buffer = draw.index_buffer.clone();
        index_buffer.offset_faces(draw.vertex_offset)?;

        let textures = draw
            .textures
            .iter()
            .map(|t| (t.slot_hash(), t.clone()))
            .collect();

        Ok(Self {
            ib_hash: draw.ib_hash.clone(),
            vb_hash: draw.vb_hash.clone(),
            shapekey_hash: draw.shapekey_hash.clone(),
            pose_format: draw.pose_format,
            vertex_offset: draw.vertex_offset,
            vertex_count: draw.vertex_count,
            index_offset: draw.index_offset,
            index_count: draw.index_count,
            vg_offset: 0,
            vg_count: 0,
            index_buffer,
            vertex_buffer,
            skeleton_buffer: draw.skeleton_buffer.clone(),
            textures,
            vg_map: None,
        })
    }

    /// The merged vertex group for each local vertex group.
    /// This is `None` until the vertex groups of the object are merged.
    pub fn vg_map(&self) -> Option<&[u32]> {
        self.vg_map.as_deref()
    }

    fn blend_indices(&self) -> Result<Vec<u32>, ExtractError> {
        Ok(self
            .vertex_buffer
            .values(&Semantic::BlendIndices.into())?
            .into_iter()
            .map(|v| v as u32)
            .collect())
    }
}

/// The components drawn with the same vertex buffer.
#[derive(Debug, Clone)]
pub struct MeshObject {
    pub ib_hash: SmolStr,
    pub vb0_hash: SmolStr,
    pub vb1_hash: SmolStr,
    pub vertex_count: u32,
    pub index_count: u32,
    pub shapekeys: Option<ShapeKeys>,
    /// Components in ascending vertex offset order.
    pub components: Vec<MeshComponent>,
}

impl MeshObject {
    fn from_draws(
        vb_hash: &SmolStr,
        mut draws: Vec<&DrawData>,
        layout: &BufferLayout,
        shapekeys: &IndexMap<SmolStr, ShapeKeys>,
    ) -> Result<Self, ExtractError> {
        let vb0_hash = unique_hash(&draws, vb_hash, "VB0", |d| Some(&d.vb_hash))?;
        let vb1_hash = unique_hash(&draws, vb_hash, "VB1", |d| Some(&d.vb1_hash))?;
        let ib_hash = unique_hash(&draws, vb_hash, "IB", |d| Some(&d.ib_hash))?;

        let shapekeys = unique_hash(&draws, vb_hash, "shape key", |d| d.shapekey_hash.as_ref())?
            .map(|hash| {
                shapekeys
                    .get(&hash)
                    .cloned()
                    .ok_or_else(|| ExtractError::MissingShapeKeys {
                        hash,
                        vb_hash: vb_hash.clone(),
                    })
            })
            .transpose()?;

        draws.sort_by_key(|d| d.vertex_offset);
        let components = draws
            .into_iter()
            .map(|d| MeshComponent::from_draw(d, layout, shapekeys.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut object = Self {
            ib_hash: ib_hash.unwrap_or_default(),
            vb0_hash: vb0_hash.unwrap_or_default(),
            vb1_hash: vb1_hash.unwrap_or_default(),
            vertex_count: components.iter().map(|c| c.vertex_count).sum(),
            index_count: components.iter().map(|c| c.index_count).sum(),
            shapekeys,
            components,
        };
        object.merge_vertex_groups()?;
        Ok(object)
    }

    /// Assign each component a range of the merged skeleton and remap blend indices.
    ///
    /// Local vertex groups that use the same bone data as a group of a previous component
    /// are remapped to that group instead of a new group.
    /// Merging again with the same skeletons produces the same remapping.
    pub fn merge_vertex_groups(&mut self) -> Result<(), ExtractError> {
        let mut vg_offset = 0;
        // Registered bones by data with their component and merged group.
        let mut unique_bones: AHashMap<Vec<OrderedFloat<f64>>, (usize, u32)> = AHashMap::new();
        let bone_semantic: AbstractSemantic = Semantic::RawData.into();

        for (i, component) in self.components.iter_mut().enumerate() {
            let blend_indices = component.blend_indices()?;

            // Remapped blend indices no longer determine the local group count.
            let vg_count = match &component.vg_map {
                Some(map) => map.len(),
                None => blend_indices.iter().max().map(|i| *i as usize + 1).unwrap_or_default(),
            };

            let rows = component.skeleton_buffer.element_count();
            if rows < vg_count {
                return Err(ExtractError::SkeletonTooSmall {
                    vb_hash: self.vb0_hash.clone(),
                    component: i,
                    rows,
                    vg_count,
                });
            }

            let mut vg_map = Vec::with_capacity(vg_count);
            for vg in 0..vg_count {
                let shifted = vg_offset + vg as u32;

                let bone: Vec<_> = component
                    .skeleton_buffer
                    .element_values(vg, &bone_semantic)?
                    .into_iter()
                    .map(OrderedFloat)
                    .collect();
                // Unused groups have zeroed bone data.
                if bone.iter().all(|v| v.0 == 0.0) {
                    vg_map.push(shifted);
                    continue;
                }

                match unique_bones.get(&bone) {
                    Some((component_index, merged)) if *component_index != i => {
                        debug!(
                            "Remapped vertex group {vg} of component {i} to {merged} of component {component_index}"
                        );
                        vg_map.push(*merged);
                    }
                    _ => {
                        unique_bones.insert(bone, (i, shifted));
                        vg_map.push(shifted);
                    }
                }
            }

            if component.vg_map.is_none() {
                let remapped: Vec<_> = blend_indices
                    .iter()
                    .map(|b| vg_map[*b as usize] as f64)
                    .collect();
                component
                    .vertex_buffer
                    .set_values(&Semantic::BlendIndices.into(), &remapped)?;
            }

            component.vg_offset = vg_offset;
            component.vg_count = vg_count as u32;
            component.vg_map = Some(vg_map);
            vg_offset += vg_count as u32;
        }

        info!("Merged {vg_offset} vertex groups for {}", self.vb0_hash);
        Ok(())
    }
}

/// Group the extracted draws into objects by vertex buffer hash.
#[tracing::instrument(skip_all)]
pub fn build_objects(
    data: &ExtractedData,
    shapekeys: &IndexMap<SmolStr, ShapeKeys>,
    layout: &BufferLayout,
) -> Result<IndexMap<SmolStr, MeshObject>, ExtractError> {
    let mut draws: IndexMap<SmolStr, Vec<&DrawData>> = IndexMap::new();
    for (key, draw) in &data.draws {
        draws.entry(key.vb_hash.clone()).or_default().push(draw);
    }

    let objects = draws
        .into_iter()
        .map(|(vb_hash, draws)| {
            let object = MeshObject::from_draws(&vb_hash, draws, layout, shapekeys)?;
            Ok((vb_hash, object))
        })
        .collect::<Result<IndexMap<_, _>, ExtractError>>()?;

    info!(
        "Collected components for {} objects: {}",
        objects.len(),
        objects.keys().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
    );
    Ok(objects)
}

/// The hash shared by all draws or `None` if no draw has a hash.
fn unique_hash<'a, F>(
    draws: &[&'a DrawData],
    vb_hash: &SmolStr,
    name: &str,
    hash: F,
) -> Result<Option<SmolStr>, ExtractError>
where
    F: Fn(&'a DrawData) -> Option<&'a SmolStr>,
{
    let hashes: IndexSet<_> = draws.iter().filter_map(|&d| hash(d)).collect();
    if hashes.len() > 1 {
        return Err(ExtractError::InconsistentCapture(format!(
            "components {name} hash mismatch for object {vb_hash} (hashes: {})",
            hashes
                .iter()
                .map(|h| h.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    Ok(hashes.first().map(|h| (*h).clone()))
}
