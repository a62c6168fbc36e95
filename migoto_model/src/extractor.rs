//! Group the collected resources of each call into shape key and draw records.
use indexmap::IndexMap;
use log::{info, warn};
use migoto_lib::{
    buffer::ByteBuffer,
    dump::CallDescriptor,
    filename::ResourceDescriptor,
    index::IndexBuffer,
    semantic::{AbstractSemantic, Semantic},
};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::{
    config::{
        BLEND_BUFFER, COLOR_BUFFER, DRAW_VS, IB_BUFFER_TXT, POSE_CB, POSE_INPUT_0,
        POSITION_BUFFER, SHAPEKEY_CS_0, SHAPEKEY_CS_1, SHAPEKEY_CS_2, SHAPEKEY_INPUT,
        SHAPEKEY_OFFSET_BUFFER, SHAPEKEY_OUTPUT, SHAPEKEY_SCALE_OUTPUT, SHAPEKEY_VERTEX_ID_BUFFER,
        SHAPEKEY_VERTEX_OFFSET_BUFFER, SKELETON_DATA, SKELETON_DATA_BUFFER, TEXCOORD_BUFFER,
        TEXTURE_TAGS, VECTOR_BUFFER,
    },
    error::ExtractError,
    resources::{CollectedBranch, CollectedCall},
};

/// The layout of the pose constant buffer used by the vertex shader.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoseFormat {
    Static,
    Animated,
}

impl PoseFormat {
    /// Detect the format from the first two rows of the constant buffer.
    pub fn from_rows(row0: [u32; 4], row1: [u32; 4]) -> Option<Self> {
        if row0[1] != row0[2] {
            return None;
        }
        let size = row0[1].checked_mul(2)?;
        if size == row1[0] {
            Some(Self::Static)
        } else if size == row1[1] {
            Some(Self::Animated)
        } else {
            None
        }
    }
}

/// The tables from the second shape key compute pass.
#[derive(Debug, PartialEq, Clone)]
pub struct ShapeKeyData {
    pub offsets_hash: SmolStr,
    pub scale_hash: SmolStr,
    pub dispatch_y: u32,
    pub offset_buffer: ByteBuffer,
    pub vertex_id_buffer: ByteBuffer,
    pub vertex_offset_buffer: ByteBuffer,
}

/// Identifies the vertex range of a single object drawn by one or more calls.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct DrawKey {
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub vb_hash: SmolStr,
}

/// The vertex data for the vertex range referenced by a draw call.
#[derive(Debug, Clone)]
pub struct DrawData {
    pub vb_hash: SmolStr,
    pub vb1_hash: SmolStr,
    pub ib_hash: SmolStr,
    pub cb4_hash: SmolStr,
    pub shapekey_hash: Option<SmolStr>,
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
    pub pose_format: PoseFormat,
    pub index_buffer: IndexBuffer,
    pub position_buffer: ByteBuffer,
    pub vector_buffer: ByteBuffer,
    pub texcoord_buffer: Option<ByteBuffer>,
    pub color_buffer: Option<ByteBuffer>,
    pub blend_buffer: ByteBuffer,
    pub skeleton_buffer: ByteBuffer,
    pub textures: Vec<ResourceDescriptor>,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedData {
    /// The shader hash for each compute stage.
    pub shader_hashes: IndexMap<SmolStr, SmolStr>,
    /// Shape key tables by the hash of their output.
    pub shapekeys: IndexMap<SmolStr, ShapeKeyData>,
    pub draws: IndexMap<DrawKey, DrawData>,
}

/// Extract shape key and draw records from the collected root branches.
#[tracing::instrument(skip_all)]
pub fn extract_data(
    branches: &IndexMap<SmolStr, CollectedBranch>,
) -> Result<ExtractedData, ExtractError> {
    let mut data = ExtractedData::default();

    for branch in branches.values().filter(|b| b.stage == SHAPEKEY_CS_0) {
        data.add_shapekey_branch(branch)?;
    }
    for branch in branches.values().filter(|b| b.stage == DRAW_VS) {
        for call in &branch.calls {
            data.add_draw_call(call)?;
        }
    }

    info!(
        "Extracted {} shape key tables and {} draws",
        data.shapekeys.len(),
        data.draws.len()
    );
    Ok(data)
}

impl ExtractedData {
    fn add_shapekey_branch(&mut self, branch: &CollectedBranch) -> Result<(), ExtractError> {
        for call in &branch.calls {
            self.verify_shader_hash(call.call, &branch.stage)?;
        }

        for cs1 in branch.nested.iter().filter(|b| b.stage == SHAPEKEY_CS_1) {
            for call in &cs1.calls {
                self.verify_shader_hash(call.call, &cs1.stage)?;
                self.add_shapekey_data(call)?;
            }

            for cs2 in cs1.nested.iter().filter(|b| b.stage == SHAPEKEY_CS_2) {
                for call in &cs2.calls {
                    self.verify_shader_hash(call.call, &cs2.stage)?;
                }
            }
        }
        Ok(())
    }

    fn add_shapekey_data(&mut self, call: &CollectedCall) -> Result<(), ExtractError> {
        let dispatch = call
            .call
            .parameters
            .dispatch
            .ok_or(ExtractError::MissingCallParameters {
                call_id: call.call.id,
                name: "Dispatch",
            })?;

        let data = ShapeKeyData {
            offsets_hash: required_hash(call, SHAPEKEY_OUTPUT)?,
            scale_hash: required_hash(call, SHAPEKEY_SCALE_OUTPUT)?,
            dispatch_y: dispatch.thread_group_count_y,
            offset_buffer: call.buffer(SHAPEKEY_OFFSET_BUFFER)?.clone(),
            vertex_id_buffer: call.buffer(SHAPEKEY_VERTEX_ID_BUFFER)?.clone(),
            vertex_offset_buffer: call.buffer(SHAPEKEY_VERTEX_OFFSET_BUFFER)?.clone(),
        };

        match self.shapekeys.get(&data.offsets_hash) {
            Some(cached) => {
                if cached.dispatch_y != data.dispatch_y {
                    return Err(ExtractError::InconsistentCapture(format!(
                        "dispatch y {} of call {} does not match {} for shape keys {}",
                        data.dispatch_y, call.call.id, cached.dispatch_y, data.offsets_hash
                    )));
                }
            }
            None => {
                self.shapekeys.insert(data.offsets_hash.clone(), data);
            }
        }
        Ok(())
    }

    fn add_draw_call(&mut self, call: &CollectedCall) -> Result<(), ExtractError> {
        let call_id = call.call.id;

        let index_buffer = call.index_buffer(IB_BUFFER_TXT)?;
        let (vertex_offset, vertex_count) = match index_buffer.vertex_range() {
            Some(range) => range,
            None if index_buffer.faces().is_empty() => {
                return Err(ExtractError::EmptyIndexBuffer { call_id });
            }
            None => return Err(ExtractError::VertexRangeOverflow { call_id }),
        };

        let key = DrawKey {
            vertex_offset,
            vertex_count,
            vb_hash: required_hash(call, POSE_INPUT_0)?,
        };

        let position_buffer = call.buffer(POSITION_BUFFER)?;
        let blend_buffer = call.buffer(BLEND_BUFFER)?;
        if blend_buffer.element_count() != position_buffer.element_count() {
            warn!(
                "Skipping call {call_id} with {} blend elements for {} positions",
                blend_buffer.element_count(),
                position_buffer.element_count()
            );
            return Ok(());
        }

        let vector_buffer = call.buffer(VECTOR_BUFFER)?;
        if vector_buffer.element_count() != position_buffer.element_count() {
            return Err(ExtractError::InconsistentCapture(format!(
                "call {call_id} has {} vector elements for {} positions",
                vector_buffer.element_count(),
                position_buffer.element_count()
            )));
        }

        let offset = vertex_offset as usize;
        let count = vertex_count as usize;

        // Some draws bind buffers that don't match the vertex count.
        let optional_fragment = |tag| -> Result<Option<ByteBuffer>, ExtractError> {
            let buffer = call.buffer(tag)?;
            if buffer.element_count() == position_buffer.element_count() {
                Ok(Some(buffer.fragment(offset, count)?))
            } else {
                Ok(None)
            }
        };
        let color_buffer = optional_fragment(COLOR_BUFFER)?;
        let texcoord_buffer = optional_fragment(TEXCOORD_BUFFER)?;

        let textures: Vec<_> = TEXTURE_TAGS
            .iter()
            .filter_map(|tag| call.get(tag))
            .map(|r| r.descriptor.clone())
            .collect();

        let draw_indexed =
            call.call
                .parameters
                .draw_indexed
                .ok_or(ExtractError::MissingCallParameters {
                    call_id,
                    name: "DrawIndexed",
                })?;

        let draw = DrawData {
            vb_hash: key.vb_hash.clone(),
            vb1_hash: required_hash(call, VECTOR_BUFFER)?,
            ib_hash: required_hash(call, IB_BUFFER_TXT)?,
            cb4_hash: required_hash(call, SKELETON_DATA)?,
            shapekey_hash: call.hash(SHAPEKEY_INPUT).cloned(),
            vertex_offset,
            vertex_count,
            index_offset: draw_indexed.start_index_location,
            index_count: draw_indexed.index_count,
            pose_format: pose_format(call)?,
            index_buffer: index_buffer.clone(),
            position_buffer: position_buffer.fragment(offset, count)?,
            vector_buffer: vector_buffer.fragment(offset, count)?,
            texcoord_buffer,
            color_buffer,
            blend_buffer: blend_buffer.fragment(offset, count)?,
            skeleton_buffer: call.buffer(SKELETON_DATA_BUFFER)?.clone(),
            textures,
        };

        match self.draws.get_mut(&key) {
            Some(cached) => cached.merge(draw, call_id),
            None => {
                self.draws.insert(key, draw);
                Ok(())
            }
        }
    }

    fn verify_shader_hash(
        &mut self,
        call: &CallDescriptor,
        stage: &SmolStr,
    ) -> Result<(), ExtractError> {
        let shader = match call.shaders.values().collect::<Vec<_>>().as_slice() {
            [shader] => *shader,
            shaders => {
                return Err(ExtractError::InconsistentCapture(format!(
                    "call {} of stage {stage} has {} shaders instead of 1",
                    call.id,
                    shaders.len()
                )));
            }
        };

        match self.shader_hashes.get(stage) {
            Some(hash) if hash != &shader.hash => Err(ExtractError::InconsistentCapture(format!(
                "shader hash {} of call {} does not match hash {hash} for stage {stage}",
                shader.hash, call.id
            ))),
            Some(_) => Ok(()),
            None => {
                self.shader_hashes
                    .insert(stage.clone(), shader.hash.clone());
                Ok(())
            }
        }
    }
}

impl DrawData {
    /// Combine the data of another call drawing the same vertex range.
    fn merge(&mut self, other: DrawData, call_id: u32) -> Result<(), ExtractError> {
        let mismatch = |name: &str, value: &dyn std::fmt::Debug, expected: &dyn std::fmt::Debug| {
            ExtractError::InconsistentCapture(format!(
                "call {call_id} has {name} {value:?} instead of {expected:?} for vertex buffer {}",
                self.vb_hash
            ))
        };

        if self.index_buffer.index_count() != other.index_buffer.index_count() {
            return Err(mismatch(
                "index count",
                &other.index_buffer.index_count(),
                &self.index_buffer.index_count(),
            ));
        }
        if self.index_buffer.faces() != other.index_buffer.faces() {
            return Err(ExtractError::InconsistentCapture(format!(
                "call {call_id} draws different faces for vertex buffer {}",
                self.vb_hash
            )));
        }
        if self.ib_hash != other.ib_hash {
            return Err(mismatch("index buffer", &other.ib_hash, &self.ib_hash));
        }
        if self.vb1_hash != other.vb1_hash {
            return Err(mismatch("vector buffer", &other.vb1_hash, &self.vb1_hash));
        }
        if self.cb4_hash != other.cb4_hash {
            return Err(mismatch("skeleton", &other.cb4_hash, &self.cb4_hash));
        }
        if self.shapekey_hash != other.shapekey_hash {
            return Err(mismatch("shape keys", &other.shapekey_hash, &self.shapekey_hash));
        }

        if other.color_buffer.is_some() {
            self.color_buffer = other.color_buffer;
        }
        if other.texcoord_buffer.is_some() {
            self.texcoord_buffer = other.texcoord_buffer;
        }
        self.textures.extend(other.textures);
        Ok(())
    }
}

fn required_hash(call: &CollectedCall, tag: &str) -> Result<SmolStr, ExtractError> {
    call.require(tag)?
        .descriptor
        .hash
        .clone()
        .ok_or_else(|| {
            ExtractError::InconsistentCapture(format!(
                "resource {tag} of call {} has no hash",
                call.call.id
            ))
        })
}

fn pose_format(call: &CollectedCall) -> Result<PoseFormat, ExtractError> {
    let buffer = call.buffer(POSE_CB)?;
    let unknown = || ExtractError::UnknownBufferFormat {
        call_id: call.call.id,
    };
    if buffer.element_count() < 2 {
        return Err(unknown());
    }

    let semantic: AbstractSemantic = Semantic::RawData.into();
    let row = |i| -> Result<[u32; 4], ExtractError> {
        let values = buffer.element_values(i, &semantic)?;
        match values.as_slice() {
            [x, y, z, w] => Ok([*x as u32, *y as u32, *z as u32, *w as u32]),
            _ => Err(unknown()),
        }
    };
    PoseFormat::from_rows(row(0)?, row(1)?).ok_or_else(unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn pose_format_static() {
        assert_eq!(
            Some(PoseFormat::Static),
            PoseFormat::from_rows([0, 64, 64, 0], [128, 0, 0, 0])
        );
    }

    #[test]
    fn pose_format_animated() {
        assert_eq!(
            Some(PoseFormat::Animated),
            PoseFormat::from_rows([0, 64, 64, 0], [3, 128, 0, 0])
        );
    }

    #[test]
    fn pose_format_unknown() {
        assert_eq!(None, PoseFormat::from_rows([0, 64, 32, 0], [128, 128, 0, 0]));
        assert_eq!(None, PoseFormat::from_rows([0, 64, 64, 0], [127, 129, 0, 0]));
    }

    #[test]
    fn pose_format_json() {
        assert_eq!(
            "\"animated\"",
            serde_json::to_string(&PoseFormat::Animated).unwrap()
        );
        assert_eq!(
            PoseFormat::Static,
            serde_json::from_str::<PoseFormat>("\"static\"").unwrap()
        );
    }
}
