use std::path::PathBuf;

use migoto_lib::{
    buffer::BufferError, error::LoadDumpError, format::FormatError, index::ParseIndexBufferError,
};
use smol_str::SmolStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("error loading frame dump")]
    Dump(#[from] LoadDumpError),

    #[error("error building resource filter")]
    Filter(#[from] FilterError),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to find required resource {tag} for stage {stage} in call {call_id}")]
    ResourceNotFound {
        tag: SmolStr,
        stage: SmolStr,
        call_id: u32,
    },

    #[error("found {count} resources for slot {slot} of stage {stage} in call {call_id}")]
    AmbiguousResource {
        stage: SmolStr,
        slot: String,
        call_id: u32,
        count: usize,
    },

    #[error("resource {tag} for call {call_id} was not decoded")]
    MissingResourceData { tag: SmolStr, call_id: u32 },

    #[error("call {call_id} is missing {name} parameters in the frame dump log")]
    MissingCallParameters { call_id: u32, name: &'static str },

    #[error("inconsistent capture: {0}")]
    InconsistentCapture(String),

    #[error("failed to find shape key data {hash} for object {vb_hash}")]
    MissingShapeKeys { hash: SmolStr, vb_hash: SmolStr },

    #[error("unknown pose constant buffer format for call {call_id}")]
    UnknownBufferFormat { call_id: u32 },

    #[error("index buffer for call {call_id} has no faces")]
    EmptyIndexBuffer { call_id: u32 },

    #[error("index buffer for call {call_id} references more vertices than fit in a u32")]
    VertexRangeOverflow { call_id: u32 },

    #[error(
        "skeleton of component {component} of object {vb_hash} has {rows} bones but {vg_count} vertex groups are used"
    )]
    SkeletonTooSmall {
        vb_hash: SmolStr,
        component: usize,
        rows: usize,
        vg_count: usize,
    },

    #[error("error reading resource {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error reading index buffer")]
    IndexBuffer(#[from] ParseIndexBufferError),

    #[error("error converting buffer data")]
    Buffer(#[from] BufferError),

    #[error("unsupported format")]
    Format(#[from] FormatError),
}

#[derive(Debug, Error)]
pub enum LoadMetadataError {
    #[error("error reading metadata file")]
    Io(#[from] std::io::Error),

    #[error("error deserializing metadata JSON")]
    Json(#[from] serde_json::Error),
}
