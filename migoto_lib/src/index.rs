//! Triangle list index buffers.
//!
//! Index buffers are stored as faces with three vertex indices each.
//! Frame dumps contain both a binary `.buf` and a text `.txt` version of each index buffer.
//! The binary index count is sometimes truncated, so the text version is preferred.
//!
//! ```text
//! byte offset: 0
//! first index: 0
//! index count: 6
//! topology: trianglelist
//! format: DXGI_FORMAT_R16_UINT
//!
//! 0 1 2
//! 2 1 3
//! ```
use std::path::Path;

use thiserror::Error;

use crate::{
    buffer::{BufferError, ByteBuffer},
    format::{ComponentType, Format, FormatError},
    semantic::{BufferLayout, Semantic},
};

#[derive(Debug, Error)]
pub enum ParseIndexBufferError {
    #[error("error reading index buffer file")]
    Io(#[from] std::io::Error),

    #[error("index buffer header is missing {0:?}")]
    MissingHeaderField(&'static str),

    #[error("invalid index buffer header line {0:?}")]
    InvalidHeader(String),

    #[error("unsupported index buffer topology {0:?}")]
    UnsupportedTopology(String),

    #[error("invalid index buffer face {0:?}")]
    InvalidFace(String),

    #[error("expected {expected} indices but found {count} indices")]
    IndexCountMismatch { count: usize, expected: usize },

    #[error("index buffer layout must have a single INDEX field with 3 values")]
    InvalidLayout,

    #[error("error parsing index buffer format")]
    Format(#[from] FormatError),

    #[error("error converting index buffer data")]
    Buffer(#[from] BufferError),
}

/// The header of the text version of an index buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct IndexBufferHeader {
    pub byte_offset: u32,
    pub first_index: u32,
    pub index_count: u32,
    pub topology: String,
    pub format: Format,
}

#[derive(Debug, PartialEq, Clone)]
pub struct IndexBuffer {
    layout: BufferLayout,
    faces: Vec<[u32; 3]>,
    header: Option<IndexBufferHeader>,
}

impl IndexBuffer {
    /// Create an index buffer from `faces`.
    /// The `layout` must contain a single [Semantic::Index] field with 3 values per element.
    pub fn new(layout: BufferLayout, faces: Vec<[u32; 3]>) -> Result<Self, ParseIndexBufferError> {
        match layout.semantics() {
            [s] if s.semantic.semantic == Semantic::Index && s.value_count() == 3 => Ok(Self {
                layout,
                faces,
                header: None,
            }),
            _ => Err(ParseIndexBufferError::InvalidLayout),
        }
    }

    /// Decode faces from binary index data.
    pub fn from_bytes(layout: BufferLayout, bytes: &[u8]) -> Result<Self, ParseIndexBufferError> {
        let buffer = ByteBuffer::from_bytes(layout.clone(), bytes)?;
        let semantic = Semantic::Index.into();
        let faces = buffer
            .values(&semantic)?
            .chunks_exact(3)
            .map(|f| [f[0] as u32, f[1] as u32, f[2] as u32])
            .collect();
        Self::new(layout, faces)
    }

    pub fn from_file<P: AsRef<Path>>(
        layout: BufferLayout,
        path: P,
    ) -> Result<Self, ParseIndexBufferError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_text(layout, &text)
    }

    /// Parse the header and faces of the text version of an index buffer.
    pub fn from_text(layout: BufferLayout, text: &str) -> Result<Self, ParseIndexBufferError> {
        let mut lines = text.lines().map(str::trim);

        let mut byte_offset = None;
        let mut first_index = None;
        let mut index_count = None;
        let mut topology = None;
        let mut format = None;
        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }

            // Unrecognized header lines are ignored.
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            let parse_u32 = || {
                value
                    .parse::<u32>()
                    .map_err(|_| ParseIndexBufferError::InvalidHeader(line.to_string()))
            };
            match key {
                "byte offset" => byte_offset = Some(parse_u32()?),
                "first index" => first_index = Some(parse_u32()?),
                "index count" => index_count = Some(parse_u32()?),
                "topology" => {
                    if value != "trianglelist" {
                        return Err(ParseIndexBufferError::UnsupportedTopology(
                            value.to_string(),
                        ));
                    }
                    topology = Some(value.to_string());
                }
                "format" => format = Some(value.parse::<Format>()?),
                _ => (),
            }
        }

        let header = IndexBufferHeader {
            byte_offset: byte_offset.ok_or(ParseIndexBufferError::MissingHeaderField("byte offset"))?,
            first_index: first_index.ok_or(ParseIndexBufferError::MissingHeaderField("first index"))?,
            index_count: index_count.ok_or(ParseIndexBufferError::MissingHeaderField("index count"))?,
            topology: topology.ok_or(ParseIndexBufferError::MissingHeaderField("topology"))?,
            format: format.ok_or(ParseIndexBufferError::MissingHeaderField("format"))?,
        };

        let faces = lines
            .filter(|l| !l.is_empty())
            .map(parse_face)
            .collect::<Result<Vec<_>, _>>()?;

        if faces.len() * 3 != header.index_count as usize {
            return Err(ParseIndexBufferError::IndexCountMismatch {
                count: faces.len() * 3,
                expected: header.index_count as usize,
            });
        }

        let mut buffer = Self::new(layout, faces)?;
        buffer.header = Some(header);
        Ok(buffer)
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    /// The header if this buffer was parsed from text.
    pub fn header(&self) -> Option<&IndexBufferHeader> {
        self.header.as_ref()
    }

    pub fn index_count(&self) -> usize {
        self.faces.len() * 3
    }

    /// The smallest referenced vertex index and the number of vertices
    /// up to and including the largest referenced vertex index.
    ///
    /// Returns [None] if there are no faces or the count does not fit in a [u32].
    pub fn vertex_range(&self) -> Option<(u32, u32)> {
        let min = *self.faces.iter().flatten().min()?;
        let max = *self.faces.iter().flatten().max()?;
        let count = max.checked_sub(min)?.checked_add(1)?;
        Some((min, count))
    }

    /// Subtract `offset` from every index so that indices start from the first vertex of a component.
    pub fn offset_faces(&mut self, offset: u32) -> Result<(), BufferError> {
        for face in &mut self.faces {
            for index in face.iter_mut() {
                let shifted = index.checked_sub(offset).ok_or_else(|| {
                    BufferError::InvalidArgument(format!(
                        "index {index} is smaller than the vertex offset {offset}"
                    ))
                })?;
                *index = shifted;
            }
        }
        Ok(())
    }

    /// Append the faces of `other` from the same split draw.
    pub fn merge(&mut self, other: &IndexBuffer) -> Result<(), BufferError> {
        if self.layout != other.layout {
            return Err(BufferError::InvalidArgument(
                "merged index buffers must have the same layout".to_string(),
            ));
        }
        self.faces.extend_from_slice(&other.faces);
        Ok(())
    }

    /// The single channel format for the indices like `R16_UINT`.
    /// Fails if an index does not fit in the layout's format.
    pub fn index_format(&self) -> Result<Format, FormatError> {
        let format = self.layout.semantics().first().map(|s| s.format);
        let (index_format, max) = match format.map(|f| f.component_type()) {
            Some(ComponentType::Uint16) => (Format::R16_UINT, u16::MAX as u32),
            Some(ComponentType::Uint32) => (Format::R32_UINT, u32::MAX),
            _ => {
                return Err(FormatError::UnsupportedFormat(
                    format.map(|f| f.to_string()).unwrap_or_default(),
                ));
            }
        };
        match self.faces.iter().flatten().find(|i| **i > max) {
            Some(index) => Err(FormatError::OutOfRange {
                value: *index,
                format: index_format,
            }),
            None => Ok(index_format),
        }
    }

    pub fn to_byte_buffer(&self) -> Result<ByteBuffer, BufferError> {
        self.index_format()?;

        let mut buffer = ByteBuffer::new(self.layout.clone());
        if !self.faces.is_empty() {
            buffer.extend(self.faces.len())?;
            let values: Vec<_> = self.faces.iter().flatten().map(|i| *i as f64).collect();
            buffer.set_values(&Semantic::Index.into(), &values)?;
        }
        Ok(buffer)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BufferError> {
        self.to_byte_buffer().map(|b| b.to_bytes())
    }
}

fn parse_face(line: &str) -> Result<[u32; 3], ParseIndexBufferError> {
    let invalid = || ParseIndexBufferError::InvalidFace(line.to_string());
    let indices = line
        .split_whitespace()
        .map(|i| i.parse::<u32>().map_err(|_| invalid()))
        .collect::<Result<Vec<_>, _>>()?;
    indices.try_into().map_err(|_| invalid())
}
