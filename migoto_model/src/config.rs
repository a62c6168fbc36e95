//! Stage and data map tables for skinned meshes with shape keys.
//!
//! Shape keys are applied by three compute passes before the draw calls.
//! The draw calls of each object read the vertex data from separate vertex buffers.
use migoto_lib::{
    filename::{ShaderType, SlotType},
    format::Format,
    semantic::Semantic,
};

use crate::{
    calls::{Slot, Stage},
    resources::{DataMap, FieldDesc, LayoutDesc},
};

pub const SHAPEKEY_CS_0: &str = "SHAPEKEY_CS_0";
pub const SHAPEKEY_CS_1: &str = "SHAPEKEY_CS_1";
pub const SHAPEKEY_CS_2: &str = "SHAPEKEY_CS_2";
pub const DRAW_VS_DUMMY: &str = "DRAW_VS_DUMMY";
pub const DRAW_VS: &str = "DRAW_VS";

pub const SHAPEKEY_OFFSET_BUFFER: &str = "SHAPEKEY_OFFSET_BUFFER";
pub const SHAPEKEY_VERTEX_ID_BUFFER: &str = "SHAPEKEY_VERTEX_ID_BUFFER";
pub const SHAPEKEY_VERTEX_OFFSET_BUFFER: &str = "SHAPEKEY_VERTEX_OFFSET_BUFFER";
pub const SHAPEKEY_OUTPUT: &str = "SHAPEKEY_OUTPUT";
pub const SHAPEKEY_SCALE_OUTPUT: &str = "SHAPEKEY_SCALE_OUTPUT";
pub const SHAPEKEY_INPUT: &str = "SHAPEKEY_INPUT";
pub const POSE_INPUT_0: &str = "POSE_INPUT_0";
pub const SKELETON_DATA: &str = "SKELETON_DATA";
pub const SKELETON_DATA_BUFFER: &str = "SKELETON_DATA_BUFFER";
pub const POSE_CB: &str = "POSE_CB";
pub const IB_BUFFER_TXT: &str = "IB_BUFFER_TXT";
pub const POSITION_BUFFER: &str = "POSITION_BUFFER";
pub const VECTOR_BUFFER: &str = "VECTOR_BUFFER";
pub const TEXCOORD_BUFFER: &str = "TEXCOORD_BUFFER";
pub const COLOR_BUFFER: &str = "COLOR_BUFFER";
pub const BLEND_BUFFER: &str = "BLEND_BUFFER";

/// Tags for the pixel shader textures `ps-t0` to `ps-t8`.
pub const TEXTURE_TAGS: [&str; 9] = [
    "TEXTURE_0",
    "TEXTURE_1",
    "TEXTURE_2",
    "TEXTURE_3",
    "TEXTURE_4",
    "TEXTURE_5",
    "TEXTURE_6",
    "TEXTURE_7",
    "TEXTURE_8",
];

const SHAPEKEY_OFFSET_FIELDS: &[FieldDesc] =
    &[FieldDesc::new(Semantic::RawData, 0, Format::R32_UINT)];
const SHAPEKEY_VERTEX_ID_FIELDS: &[FieldDesc] =
    &[FieldDesc::new(Semantic::RawData, 0, Format::R32_UINT)];
const SHAPEKEY_VERTEX_OFFSET_FIELDS: &[FieldDesc] =
    &[FieldDesc::new(Semantic::RawData, 0, Format::R16G16B16_FLOAT)];
// Each bone is a 3x4 matrix.
const SKELETON_FIELDS: &[FieldDesc] =
    &[FieldDesc::new(Semantic::RawData, 0, Format::R32_FLOAT).with_stride(48)];
const POSE_FIELDS: &[FieldDesc] =
    &[FieldDesc::new(Semantic::RawData, 0, Format::R32G32B32A32_UINT)];
const INDEX_FIELDS: &[FieldDesc] = &[FieldDesc::new(Semantic::Index, 0, Format::R16G16B16_UINT)];
const POSITION_FIELDS: &[FieldDesc] =
    &[FieldDesc::new(Semantic::Position, 0, Format::R32G32B32_FLOAT)];
const VECTOR_FIELDS: &[FieldDesc] = &[
    FieldDesc::new(Semantic::Tangent, 0, Format::R8G8B8A8_SNORM),
    FieldDesc::new(Semantic::Normal, 0, Format::R8G8B8A8_SNORM),
];
const TEXCOORD_FIELDS: &[FieldDesc] = &[
    FieldDesc::new(Semantic::TexCoord, 0, Format::R16G16_FLOAT),
    FieldDesc::new(Semantic::Color, 1, Format::R16G16_UNORM),
    FieldDesc::new(Semantic::TexCoord, 1, Format::R16G16_FLOAT),
    FieldDesc::new(Semantic::TexCoord, 2, Format::R16G16_FLOAT),
];
const COLOR_FIELDS: &[FieldDesc] = &[FieldDesc::new(Semantic::Color, 0, Format::R8G8B8A8_UNORM)];
const BLEND_FIELDS: &[FieldDesc] = &[
    FieldDesc::new(Semantic::BlendIndices, 0, Format::R8G8B8A8_UINT),
    FieldDesc::new(Semantic::BlendWeight, 0, Format::R8G8B8A8_UNORM),
];

const fn layout(fields: &'static [FieldDesc]) -> Option<LayoutDesc<'static>> {
    Some(LayoutDesc {
        fields,
        force_stride: false,
    })
}

const fn forced_layout(fields: &'static [FieldDesc]) -> Option<LayoutDesc<'static>> {
    Some(LayoutDesc {
        fields,
        force_stride: true,
    })
}

pub const STAGES: &[Stage] = &[
    Stage {
        id: SHAPEKEY_CS_0,
        shader_type: ShaderType::Compute,
        inputs: &[],
        outputs: &[Slot {
            stage: SHAPEKEY_CS_1,
            shader_type: None,
            slot_type: SlotType::Uav,
            slot_id: Some(0),
        }],
    },
    Stage {
        id: SHAPEKEY_CS_1,
        shader_type: ShaderType::Compute,
        inputs: &[Slot {
            stage: SHAPEKEY_CS_0,
            shader_type: None,
            slot_type: SlotType::Uav,
            slot_id: Some(1),
        }],
        outputs: &[Slot {
            stage: SHAPEKEY_CS_2,
            shader_type: None,
            slot_type: SlotType::Uav,
            slot_id: Some(0),
        }],
    },
    Stage {
        id: SHAPEKEY_CS_2,
        shader_type: ShaderType::Compute,
        inputs: &[Slot {
            stage: SHAPEKEY_CS_1,
            shader_type: None,
            slot_type: SlotType::Uav,
            slot_id: Some(0),
        }],
        outputs: &[Slot {
            stage: DRAW_VS_DUMMY,
            shader_type: None,
            slot_type: SlotType::Uav,
            slot_id: Some(0),
        }],
    },
    Stage {
        id: DRAW_VS_DUMMY,
        shader_type: ShaderType::Vertex,
        inputs: &[Slot {
            stage: SHAPEKEY_CS_2,
            shader_type: None,
            slot_type: SlotType::VertexBuffer,
            slot_id: Some(6),
        }],
        outputs: &[],
    },
    // Draw calls are found by their outputs.
    Stage {
        id: DRAW_VS,
        shader_type: ShaderType::Vertex,
        inputs: &[],
        outputs: &[Slot {
            stage: DRAW_VS,
            shader_type: None,
            slot_type: SlotType::VertexBuffer,
            slot_id: Some(5),
        }],
    },
];

pub const DATA_MAPS: &[DataMap] = &[
    DataMap {
        tag: SHAPEKEY_OFFSET_BUFFER,
        sources: &[Slot {
            stage: SHAPEKEY_CS_1,
            shader_type: Some(ShaderType::Compute),
            slot_type: SlotType::ConstantBuffer,
            slot_id: Some(0),
        }],
        file_ext: None,
        layout: layout(SHAPEKEY_OFFSET_FIELDS),
        optional: false,
    },
    DataMap {
        tag: SHAPEKEY_VERTEX_ID_BUFFER,
        sources: &[Slot {
            stage: SHAPEKEY_CS_1,
            shader_type: Some(ShaderType::Compute),
            slot_type: SlotType::Texture,
            slot_id: Some(0),
        }],
        file_ext: None,
        layout: layout(SHAPEKEY_VERTEX_ID_FIELDS),
        optional: false,
    },
    DataMap {
        tag: SHAPEKEY_VERTEX_OFFSET_BUFFER,
        sources: &[Slot {
            stage: SHAPEKEY_CS_1,
            shader_type: Some(ShaderType::Compute),
            slot_type: SlotType::Texture,
            slot_id: Some(1),
        }],
        file_ext: None,
        layout: layout(SHAPEKEY_VERTEX_OFFSET_FIELDS),
        optional: false,
    },
    DataMap {
        tag: SHAPEKEY_OUTPUT,
        sources: &[Slot {
            stage: SHAPEKEY_CS_1,
            shader_type: None,
            slot_type: SlotType::Uav,
            slot_id: Some(0),
        }],
        file_ext: None,
        layout: None,
        optional: false,
    },
    DataMap {
        tag: SHAPEKEY_SCALE_OUTPUT,
        sources: &[Slot {
            stage: SHAPEKEY_CS_1,
            shader_type: None,
            slot_type: SlotType::Uav,
            slot_id: Some(1),
        }],
        file_ext: None,
        layout: None,
        optional: false,
    },
    DataMap {
        tag: SHAPEKEY_INPUT,
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: None,
            slot_type: SlotType::VertexBuffer,
            slot_id: Some(6),
        }],
        file_ext: None,
        layout: None,
        optional: true,
    },
    DataMap {
        tag: POSE_INPUT_0,
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: None,
            slot_type: SlotType::VertexBuffer,
            slot_id: Some(0),
        }],
        file_ext: None,
        layout: None,
        optional: false,
    },
    DataMap {
        tag: SKELETON_DATA,
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: Some(ShaderType::Vertex),
            slot_type: SlotType::ConstantBuffer,
            slot_id: Some(4),
        }],
        file_ext: None,
        layout: None,
        optional: false,
    },
    DataMap {
        tag: SKELETON_DATA_BUFFER,
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: Some(ShaderType::Vertex),
            slot_type: SlotType::ConstantBuffer,
            slot_id: Some(4),
        }],
        file_ext: None,
        layout: forced_layout(SKELETON_FIELDS),
        optional: false,
    },
    DataMap {
        tag: POSE_CB,
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: Some(ShaderType::Vertex),
            slot_type: SlotType::ConstantBuffer,
            slot_id: Some(0),
        }],
        file_ext: None,
        layout: layout(POSE_FIELDS),
        optional: false,
    },
    DataMap {
        tag: IB_BUFFER_TXT,
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: None,
            slot_type: SlotType::IndexBuffer,
            slot_id: None,
        }],
        file_ext: Some("txt"),
        layout: layout(INDEX_FIELDS),
        optional: false,
    },
    DataMap {
        tag: POSITION_BUFFER,
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: None,
            slot_type: SlotType::VertexBuffer,
            slot_id: Some(0),
        }],
        file_ext: None,
        layout: layout(POSITION_FIELDS),
        optional: false,
    },
    DataMap {
        tag: VECTOR_BUFFER,
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: None,
            slot_type: SlotType::VertexBuffer,
            slot_id: Some(1),
        }],
        file_ext: None,
        layout: layout(VECTOR_FIELDS),
        optional: false,
    },
    DataMap {
        tag: TEXCOORD_BUFFER,
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: None,
            slot_type: SlotType::VertexBuffer,
            slot_id: Some(2),
        }],
        file_ext: Some("buf"),
        layout: layout(TEXCOORD_FIELDS),
        optional: false,
    },
    DataMap {
        tag: COLOR_BUFFER,
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: None,
            slot_type: SlotType::VertexBuffer,
            slot_id: Some(3),
        }],
        file_ext: Some("buf"),
        layout: layout(COLOR_FIELDS),
        optional: false,
    },
    DataMap {
        tag: BLEND_BUFFER,
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: None,
            slot_type: SlotType::VertexBuffer,
            slot_id: Some(4),
        }],
        file_ext: None,
        layout: forced_layout(BLEND_FIELDS),
        optional: false,
    },
    DataMap {
        tag: TEXTURE_TAGS[0],
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: Some(ShaderType::Pixel),
            slot_type: SlotType::Texture,
            slot_id: Some(0),
        }],
        file_ext: None,
        layout: None,
        optional: true,
    },
    DataMap {
        tag: TEXTURE_TAGS[1],
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: Some(ShaderType::Pixel),
            slot_type: SlotType::Texture,
            slot_id: Some(1),
        }],
        file_ext: None,
        layout: None,
        optional: true,
    },
    DataMap {
        tag: TEXTURE_TAGS[2],
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: Some(ShaderType::Pixel),
            slot_type: SlotType::Texture,
            slot_id: Some(2),
        }],
        file_ext: None,
        layout: None,
        optional: true,
    },
    DataMap {
        tag: TEXTURE_TAGS[3],
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: Some(ShaderType::Pixel),
            slot_type: SlotType::Texture,
            slot_id: Some(3),
        }],
        file_ext: None,
        layout: None,
        optional: true,
    },
    DataMap {
        tag: TEXTURE_TAGS[4],
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: Some(ShaderType::Pixel),
            slot_type: SlotType::Texture,
            slot_id: Some(4),
        }],
        file_ext: None,
        layout: None,
        optional: true,
    },
    DataMap {
        tag: TEXTURE_TAGS[5],
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: Some(ShaderType::Pixel),
            slot_type: SlotType::Texture,
            slot_id: Some(5),
        }],
        file_ext: None,
        layout: None,
        optional: true,
    },
    DataMap {
        tag: TEXTURE_TAGS[6],
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: Some(ShaderType::Pixel),
            slot_type: SlotType::Texture,
            slot_id: Some(6),
        }],
        file_ext: None,
        layout: None,
        optional: true,
    },
    DataMap {
        tag: TEXTURE_TAGS[7],
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: Some(ShaderType::Pixel),
            slot_type: SlotType::Texture,
            slot_id: Some(7),
        }],
        file_ext: None,
        layout: None,
        optional: true,
    },
    DataMap {
        tag: TEXTURE_TAGS[8],
        sources: &[Slot {
            stage: DRAW_VS,
            shader_type: Some(ShaderType::Pixel),
            slot_type: SlotType::Texture,
            slot_id: Some(8),
        }],
        file_ext: None,
        layout: None,
        optional: true,
    },
];

/// The vertex layout of exported components.
pub const OUTPUT_LAYOUT: LayoutDesc = LayoutDesc {
    fields: &[
        FieldDesc::new(Semantic::Position, 0, Format::R32G32B32_FLOAT),
        FieldDesc::new(Semantic::Tangent, 0, Format::R8G8B8A8_SNORM),
        FieldDesc::new(Semantic::Normal, 0, Format::R8G8B8A8_SNORM),
        FieldDesc::new(Semantic::BlendIndices, 0, Format::R8G8B8A8_UINT),
        FieldDesc::new(Semantic::BlendWeight, 0, Format::R8G8B8A8_UNORM),
        FieldDesc::new(Semantic::Color, 0, Format::R8G8B8A8_UNORM),
        FieldDesc::new(Semantic::TexCoord, 0, Format::R16G16_FLOAT),
        FieldDesc::new(Semantic::Color, 1, Format::R16G16_UNORM),
        FieldDesc::new(Semantic::TexCoord, 1, Format::R16G16_FLOAT),
        FieldDesc::new(Semantic::TexCoord, 2, Format::R16G16_FLOAT),
    ],
    force_stride: false,
};

/// The tables used to resolve, collect and extract a frame dump.
#[derive(Debug, Clone, Copy)]
pub struct Configuration<'a> {
    pub stages: &'a [Stage<'a>],
    pub data_maps: &'a [DataMap<'a>],
    pub output_layout: LayoutDesc<'a>,
}

impl Default for Configuration<'static> {
    fn default() -> Self {
        Self {
            stages: STAGES,
            data_maps: DATA_MAPS,
            output_layout: OUTPUT_LAYOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn root_stages() {
        let roots: Vec<_> = STAGES
            .iter()
            .filter(|s| s.inputs.is_empty() || s.outputs.iter().any(|o| o.stage == s.id))
            .map(|s| s.id)
            .collect();
        assert_eq!(vec![SHAPEKEY_CS_0, DRAW_VS], roots);
    }

    #[test]
    fn data_map_tags_unique() {
        let mut tags: Vec<_> = DATA_MAPS.iter().map(|m| m.tag).collect();
        tags.sort();
        tags.dedup();
        assert_eq!(DATA_MAPS.len(), tags.len());
    }

    #[test]
    fn output_layout_stride() {
        let layout = OUTPUT_LAYOUT.to_layout();
        assert_eq!(10, layout.semantics().len());
        assert_eq!(12 + 4 * 5 + 4 * 4, layout.stride());
    }
}
