//! # migoto_model
//! Reconstruct exportable meshes from a 3DMigoto frame dump.
//!
//! # Getting Started
//! ```rust no_run
//! use migoto_model::{config::Configuration, output::TextureFilter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let objects = migoto_model::extract(
//!     "FrameAnalysis-2024-05-01-120000",
//!     &Configuration::default(),
//!     &TextureFilter::default(),
//! )?;
//! for (vb_hash, object) in &objects {
//!     println!("{vb_hash}: {} components", object.components.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Design
//! A frame dump only describes which resources are bound to each call.
//! Extraction works in passes over the dump with each pass feeding the next.
//!
//! 1. [calls] connects calls into branches by following resource hashes from producer to consumer stages.
//! 2. [resources] locates and decodes the tagged resources of each call.
//! 3. [extractor] validates the calls and groups their data by the drawn vertex range.
//! 4. [shapekeys] indexes the sparse shape key tables.
//! 5. [component] combines draws into objects and merges their vertex groups.
//! 6. [output] encodes the buffers, format descriptions and metadata of each object.
//!
//! The stages and resources to look for are described by static tables in [config].
use std::path::Path;

use indexmap::IndexMap;
use migoto_lib::{
    buffer::{BufferError, ByteBuffer},
    dump::Dump,
    semantic::BufferLayout,
};
use smol_str::SmolStr;

use crate::{
    calls::resolve_call_branches,
    component::build_objects,
    config::Configuration,
    error::ExtractError,
    extractor::extract_data,
    output::{ObjectData, TextureFilter, build_output},
    resources::collect_resources,
    shapekeys::build_shapekeys,
};

pub mod calls;
pub mod component;
pub mod config;
pub mod error;
pub mod extractor;
pub mod filter;
pub mod metadata;
pub mod output;
pub mod resources;
pub mod shapekeys;

/// Extract the objects drawn in the frame dump at `path` by vertex buffer hash.
#[tracing::instrument(skip_all)]
pub fn extract<P: AsRef<Path>>(
    path: P,
    config: &Configuration,
    texture_filter: &TextureFilter,
) -> Result<IndexMap<SmolStr, ObjectData>, ExtractError> {
    let dump = Dump::from_dir(path)?;

    let branches = resolve_call_branches(&dump, config.stages)?;
    let collected = collect_resources(&branches, config.data_maps)?;
    let data = extract_data(&collected)?;
    let shapekeys = build_shapekeys(&data.shapekeys)?;

    let objects = build_objects(&data, &shapekeys, &config.output_layout.to_layout())?;
    build_output(&objects, texture_filter)
}

/// Combine the fields of `buffers` into the interleaved bytes for `layout`.
///
/// Every buffer must have the same number of elements,
/// and every field of each buffer must be present in `layout`.
/// Fields of `layout` without a source buffer are zeroed.
pub fn build_component_buffer(
    layout: &BufferLayout,
    buffers: &[&ByteBuffer],
) -> Result<Vec<u8>, BufferError> {
    let count = match buffers.first() {
        Some(buffer) => buffer.element_count(),
        None => {
            return Err(BufferError::InvalidArgument(
                "at least one source buffer is required".to_string(),
            ));
        }
    };

    let mut buffer = ByteBuffer::new(layout.clone());
    buffer.extend(count)?;
    for source in buffers {
        buffer.import_buffer(source, None, false)?;
    }
    Ok(buffer.to_bytes())
}
