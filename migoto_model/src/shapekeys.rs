//! Sparse shape key deltas from the shape key compute passes.
//!
//! The offset table stores the first entry for each shape key.
//! Each entry pairs a vertex id with a position delta.
//! The delta table is allocated with a fixed size, so unused trailing rows are zero.
use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Range,
};

use glam::Vec3;
use indexmap::IndexMap;
use log::info;
use migoto_lib::{
    buffer::{BufferError, ByteBuffer},
    format::Format,
    semantic::{AbstractSemantic, BufferLayout, BufferSemantic, Semantic},
};
use smol_str::SmolStr;

use crate::{error::ExtractError, extractor::ShapeKeyData};

/// The number of shape key offsets in the offset table.
pub const SHAPEKEY_OFFSET_COUNT: usize = 128;

/// Each delta row stores a position delta followed by 3 zeros.
const DELTA_ROW_VALUES: usize = 6;

/// Indices into the entries of the shape key tables.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct ShapeKeyIndex {
    offsets: Vec<u32>,
    /// Vertex deltas for each shape key.
    shapekeys: Vec<IndexMap<u32, Vec3>>,
    /// Shape key deltas for each vertex.
    indexed: BTreeMap<u32, BTreeMap<u32, Vec3>>,
    entry_count: usize,
}

impl ShapeKeyIndex {
    /// Index the entries of the raw tables.
    /// Only the first [SHAPEKEY_OFFSET_COUNT] `offsets` are used.
    pub fn new(offsets: &[u32], vertex_ids: &[u32], deltas: &[f32]) -> Self {
        let offsets: Vec<u32> = offsets.iter().take(SHAPEKEY_OFFSET_COUNT).copied().collect();
        let rows: Vec<_> = deltas.chunks_exact(DELTA_ROW_VALUES).collect();

        let entry_count = rows
            .iter()
            .rposition(|r| r.iter().any(|v| *v != 0.0))
            .map(|i| i + 1)
            .unwrap_or_default()
            .min(vertex_ids.len());

        let mut shapekeys = Vec::new();
        let mut indexed: BTreeMap<u32, BTreeMap<u32, Vec3>> = BTreeMap::new();
        for (i, start) in offsets.iter().enumerate() {
            let start = *start as usize;
            if start >= entry_count {
                break;
            }
            // The last shape key ends at the last populated entry.
            let end = offsets
                .get(i + 1)
                .map(|o| *o as usize)
                .unwrap_or(entry_count)
                .clamp(start, entry_count);

            let mut entries = IndexMap::new();
            for entry in start..end {
                let row = rows[entry];
                let delta = Vec3::new(row[0], row[1], row[2]);
                entries.insert(vertex_ids[entry], delta);
                indexed
                    .entry(vertex_ids[entry])
                    .or_default()
                    .insert(i as u32, delta);
            }
            shapekeys.push(entries);
        }

        Self {
            offsets,
            shapekeys,
            indexed,
            entry_count,
        }
    }

    pub fn from_buffers(
        offsets: &ByteBuffer,
        vertex_ids: &ByteBuffer,
        deltas: &ByteBuffer,
    ) -> Result<Self, BufferError> {
        let semantic = Semantic::RawData.into();
        let offsets: Vec<_> = offsets.values(&semantic)?.iter().map(|v| *v as u32).collect();
        let vertex_ids: Vec<_> = vertex_ids.values(&semantic)?.iter().map(|v| *v as u32).collect();
        let deltas: Vec<_> = deltas.values(&semantic)?.iter().map(|v| *v as f32).collect();
        Ok(Self::new(&offsets, &vertex_ids, &deltas))
    }

    /// The raw offset table.
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// The vertex deltas of each shape key up to the last shape key with entries.
    pub fn shapekeys(&self) -> &[IndexMap<u32, Vec3>] {
        &self.shapekeys
    }

    /// The shape key deltas for `vertex_id`.
    pub fn vertex_shapekeys(&self, vertex_id: u32) -> Option<&BTreeMap<u32, Vec3>> {
        self.indexed.get(&vertex_id)
    }

    /// The number of populated entries.
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// The sum of the first 4 offsets.
    pub fn checksum(&self) -> u32 {
        self.offsets.iter().take(4).fold(0u32, |a, b| a.wrapping_add(*b))
    }

    /// Sorted shape key ids with deltas for any vertex in the range.
    pub fn shapekey_ids(
        &self,
        vertex_offset: u32,
        vertex_count: u32,
    ) -> Result<BTreeSet<u32>, BufferError> {
        let vertices = vertex_range(vertex_offset, vertex_count)?;
        Ok(self
            .indexed
            .range(vertices)
            .flat_map(|(_, shapekeys)| shapekeys.keys().copied())
            .collect())
    }

    /// A buffer with a [Semantic::ShapeKey] field for each shape key affecting the vertex range.
    /// Returns `None` if no shape key affects the range.
    pub fn build_shapekey_buffer(
        &self,
        vertex_offset: u32,
        vertex_count: u32,
    ) -> Result<Option<ByteBuffer>, BufferError> {
        let ids = self.shapekey_ids(vertex_offset, vertex_count)?;
        if ids.is_empty() {
            return Ok(None);
        }

        let layout = BufferLayout::new(ids.iter().map(|id| {
            BufferSemantic::new(
                AbstractSemantic::new(Semantic::ShapeKey, *id),
                Format::R16G16B16_FLOAT,
            )
        }));
        let mut buffer = ByteBuffer::new(layout);
        buffer.extend(vertex_count as usize)?;

        for id in ids {
            let values: Vec<_> = vertex_range(vertex_offset, vertex_count)?
                .flat_map(|v| {
                    let delta = self
                        .vertex_shapekeys(v)
                        .and_then(|s| s.get(&id))
                        .copied()
                        .unwrap_or(Vec3::ZERO);
                    delta.to_array().map(f64::from)
                })
                .collect();
            buffer.set_values(&AbstractSemantic::new(Semantic::ShapeKey, id), &values)?;
        }

        Ok(Some(buffer))
    }
}

fn vertex_range(vertex_offset: u32, vertex_count: u32) -> Result<Range<u32>, BufferError> {
    let end = vertex_offset.checked_add(vertex_count).ok_or_else(|| {
        BufferError::InvalidArgument(format!(
            "vertex range {vertex_offset} with {vertex_count} vertices exceeds u32::MAX"
        ))
    })?;
    Ok(vertex_offset..end)
}

/// The shape keys applied to an object.
#[derive(Debug, PartialEq, Clone)]
pub struct ShapeKeys {
    /// The hash of the compute output read by the draw calls.
    pub offsets_hash: SmolStr,
    pub scale_hash: SmolStr,
    pub dispatch_y: u32,
    pub index: ShapeKeyIndex,
}

impl ShapeKeys {
    pub fn from_data(data: &ShapeKeyData) -> Result<Self, BufferError> {
        Ok(Self {
            offsets_hash: data.offsets_hash.clone(),
            scale_hash: data.scale_hash.clone(),
            dispatch_y: data.dispatch_y,
            index: ShapeKeyIndex::from_buffers(
                &data.offset_buffer,
                &data.vertex_id_buffer,
                &data.vertex_offset_buffer,
            )?,
        })
    }
}

/// Index the shape key tables for each shape key hash.
#[tracing::instrument(skip_all)]
pub fn build_shapekeys(
    data: &IndexMap<SmolStr, ShapeKeyData>,
) -> Result<IndexMap<SmolStr, ShapeKeys>, ExtractError> {
    let shapekeys = data
        .iter()
        .map(|(hash, data)| Ok((hash.clone(), ShapeKeys::from_data(data)?)))
        .collect::<Result<IndexMap<_, _>, ExtractError>>()?;

    for (hash, shapekeys) in &shapekeys {
        info!(
            "Indexed {} shape keys with {} entries for {hash}",
            shapekeys.index.shapekeys().len(),
            shapekeys.index.entry_count()
        );
    }
    Ok(shapekeys)
}
