//! The `.fmt` text description of a vertex and index buffer pair.
//!
//! The element list uses the same fields as a D3D11 input layout description.
//! Element formats are written without the `DXGI_FORMAT_` prefix, and both forms are accepted when parsing.
//!
//! ```text
//! stride: 20
//! topology: trianglelist
//! format: DXGI_FORMAT_R16_UINT
//! element[0]:
//!   SemanticName: POSITION
//!   SemanticIndex: 0
//!   Format: R32G32B32_FLOAT
//!   InputSlot: 0
//!   AlignedByteOffset: 0
//!   InputSlotClass: per-vertex
//!   InstanceDataStepRate: 0
//! ```
use std::{fmt::Display, str::FromStr};

use thiserror::Error;

use crate::{
    format::{Format, FormatError},
    semantic::{AbstractSemantic, BufferLayout, BufferSemantic, Semantic},
};

#[derive(Debug, Error)]
pub enum ParseVertexFormatError {
    #[error("expected field {expected:?} but found {line:?}")]
    UnexpectedLine { expected: &'static str, line: String },

    #[error("expected field {0:?} but found end of file")]
    UnexpectedEnd(&'static str),

    #[error("invalid value in line {0:?}")]
    InvalidValue(String),

    #[error("unknown semantic name {0:?}")]
    UnknownSemantic(String),

    #[error("element {element} has offset {offset} but expected offset {expected}")]
    OffsetMismatch {
        element: usize,
        offset: usize,
        expected: usize,
    },

    #[error("stride {stride} does not match the element stride {expected}")]
    StrideMismatch { stride: usize, expected: usize },

    #[error("error parsing format")]
    Format(#[from] FormatError),
}

#[derive(Debug, PartialEq, Clone)]
pub struct VertexFormat {
    pub stride: usize,
    pub topology: String,
    pub index_format: Format,
    pub layout: BufferLayout,
}

impl VertexFormat {
    /// A triangle list description for a vertex buffer with `layout`.
    pub fn new(layout: BufferLayout, index_format: Format) -> Self {
        Self {
            stride: layout.stride(),
            topology: "trianglelist".to_string(),
            index_format,
            layout,
        }
    }
}

impl Display for VertexFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "stride: {}", self.stride)?;
        writeln!(f, "topology: {}", self.topology)?;
        writeln!(f, "format: {}", self.index_format.dxgi_name())?;
        write!(f, "{}", self.layout)
    }
}

impl FromStr for VertexFormat {
    type Err = ParseVertexFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lines = s.lines().map(str::trim).filter(|l| !l.is_empty());

        let stride = parse_value(next_field(&mut lines, "stride")?)?;
        let topology = next_field(&mut lines, "topology")?.to_string();
        let index_format = next_field(&mut lines, "format")?.parse()?;

        let mut layout = BufferLayout::default();
        while let Some(line) = lines.next() {
            let element = layout.semantics().len();
            if line != format!("element[{element}]:") {
                return Err(ParseVertexFormatError::UnexpectedLine {
                    expected: "element",
                    line: line.to_string(),
                });
            }

            let name = next_field(&mut lines, "SemanticName")?;
            let semantic: Semantic = name
                .parse()
                .map_err(|_| ParseVertexFormatError::UnknownSemantic(name.to_string()))?;
            let index = parse_value(next_field(&mut lines, "SemanticIndex")?)?;
            let format: Format = next_field(&mut lines, "Format")?.parse()?;
            next_field(&mut lines, "InputSlot")?;
            let offset: usize = parse_value(next_field(&mut lines, "AlignedByteOffset")?)?;
            next_field(&mut lines, "InputSlotClass")?;
            next_field(&mut lines, "InstanceDataStepRate")?;

            let added = layout.add(BufferSemantic::new(
                AbstractSemantic::new(semantic, index),
                format,
            ));
            if added.offset != offset {
                return Err(ParseVertexFormatError::OffsetMismatch {
                    element,
                    offset,
                    expected: added.offset,
                });
            }
        }

        if stride != layout.stride() {
            return Err(ParseVertexFormatError::StrideMismatch {
                stride,
                expected: layout.stride(),
            });
        }

        Ok(Self {
            stride,
            topology,
            index_format,
            layout,
        })
    }
}

fn next_field<'a, I: Iterator<Item = &'a str>>(
    lines: &mut I,
    name: &'static str,
) -> Result<&'a str, ParseVertexFormatError> {
    let line = lines
        .next()
        .ok_or(ParseVertexFormatError::UnexpectedEnd(name))?;
    line.split_once(':')
        .filter(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
        .ok_or_else(|| ParseVertexFormatError::UnexpectedLine {
            expected: name,
            line: line.to_string(),
        })
}

fn parse_value<T: FromStr>(value: &str) -> Result<T, ParseVertexFormatError> {
    value
        .parse()
        .map_err(|_| ParseVertexFormatError::InvalidValue(value.to_string()))
}
