//! Named fields of vertex and raw data buffers.
//!
//! A [BufferLayout] describes the fields of a single interleaved element.
//! Each field is a [BufferSemantic] identified by its [AbstractSemantic],
//! which is unique within a layout.
use std::fmt::{Display, Write};

use strum::EnumString;

use crate::format::Format;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, strum::Display, EnumString)]
pub enum Semantic {
    #[strum(serialize = "VERTEXID")]
    VertexId,
    #[strum(serialize = "INDEX")]
    Index,
    #[strum(serialize = "TANGENT")]
    Tangent,
    #[strum(serialize = "NORMAL")]
    Normal,
    #[strum(serialize = "TEXCOORD")]
    TexCoord,
    #[strum(serialize = "COLOR")]
    Color,
    #[strum(serialize = "POSITION")]
    Position,
    #[strum(serialize = "BLENDINDICES")]
    BlendIndices,
    #[strum(serialize = "BLENDWEIGHT")]
    BlendWeight,
    #[strum(serialize = "SHAPEKEY")]
    ShapeKey,
    #[strum(serialize = "RAWDATA")]
    RawData,
}

/// A [Semantic] with an index to distinguish repeated fields like `TEXCOORD0` and `TEXCOORD1`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct AbstractSemantic {
    pub semantic: Semantic,
    pub index: u32,
}

impl AbstractSemantic {
    pub const fn new(semantic: Semantic, index: u32) -> Self {
        Self { semantic, index }
    }
}

impl From<Semantic> for AbstractSemantic {
    fn from(semantic: Semantic) -> Self {
        Self::new(semantic, 0)
    }
}

impl Display for AbstractSemantic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.semantic, self.index)
    }
}

/// A field of a [BufferLayout].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct BufferSemantic {
    pub semantic: AbstractSemantic,
    pub format: Format,
    /// The size in bytes of this field for a single element.
    /// This can be a multiple of the format size for raw data rows.
    pub stride: usize,
    /// The byte offset of this field within an element.
    pub offset: usize,
}

impl BufferSemantic {
    pub fn new<S: Into<AbstractSemantic>>(semantic: S, format: Format) -> Self {
        Self {
            semantic: semantic.into(),
            format,
            stride: format.byte_size(),
            offset: 0,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    /// The number of decoded values for a single element of this field.
    pub fn value_count(&self) -> usize {
        self.stride / self.format.component_type().size()
    }

    fn write_element<W: Write>(&self, f: &mut W) -> std::fmt::Result {
        writeln!(f, "  SemanticName: {}", self.semantic.semantic)?;
        writeln!(f, "  SemanticIndex: {}", self.semantic.index)?;
        writeln!(f, "  Format: {}", self.format)?;
        writeln!(f, "  InputSlot: 0")?;
        writeln!(f, "  AlignedByteOffset: {}", self.offset)?;
        writeln!(f, "  InputSlotClass: per-vertex")?;
        writeln!(f, "  InstanceDataStepRate: 0")
    }
}

/// The ordered fields of an interleaved buffer element.
#[derive(Debug, PartialEq, Eq, Clone, Hash, Default)]
pub struct BufferLayout {
    semantics: Vec<BufferSemantic>,
    stride: usize,
    force_stride: bool,
}

impl BufferLayout {
    /// Create a layout with offsets assigned in order.
    /// Repeated semantics are assigned the next unused index.
    pub fn new<I: IntoIterator<Item = BufferSemantic>>(semantics: I) -> Self {
        let mut layout = Self::default();
        for semantic in semantics {
            layout.add(semantic);
        }
        layout
    }

    /// Pad buffer data to a multiple of the stride when loading
    /// instead of rejecting trailing bytes.
    pub fn force_stride(mut self) -> Self {
        self.force_stride = true;
        self
    }

    pub fn is_stride_forced(&self) -> bool {
        self.force_stride
    }

    pub fn semantics(&self) -> &[BufferSemantic] {
        &self.semantics
    }

    /// The size in bytes of a single element.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn get(&self, semantic: &AbstractSemantic) -> Option<&BufferSemantic> {
        self.semantics.iter().find(|s| &s.semantic == semantic)
    }

    pub fn contains(&self, semantic: &AbstractSemantic) -> bool {
        self.get(semantic).is_some()
    }

    /// Append a field at the end of the element and return the added field.
    pub fn add(&mut self, mut semantic: BufferSemantic) -> BufferSemantic {
        if self.contains(&semantic.semantic) {
            semantic.semantic.index = self
                .semantics
                .iter()
                .filter(|s| s.semantic.semantic == semantic.semantic.semantic)
                .map(|s| s.semantic.index + 1)
                .max()
                .unwrap_or_default();
        }
        semantic.offset = self.stride;
        self.stride += semantic.stride;
        self.semantics.push(semantic);
        semantic
    }

    /// Append the fields from `other` that are not already present.
    pub fn merge(&mut self, other: &BufferLayout) {
        for semantic in &other.semantics {
            if !self.contains(&semantic.semantic) {
                self.add(*semantic);
            }
        }
    }
}

impl Display for BufferLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, semantic) in self.semantics.iter().enumerate() {
            writeln!(f, "element[{i}]:")?;
            semantic.write_element(f)?;
        }
        Ok(())
    }
}
