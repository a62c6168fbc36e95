//! Typed access to interleaved buffer data.
//!
//! A [ByteBuffer] stores one tightly packed byte array for each field of its [BufferLayout].
//! The arrays always describe the same number of elements.
//! Serializing with [ByteBuffer::to_bytes] interleaves the fields in layout order,
//! which is the byte order expected by the game and any exported files.
use indexmap::IndexMap;
use thiserror::Error;

use crate::{
    format::FormatError,
    semantic::{AbstractSemantic, BufferLayout, BufferSemantic},
};

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("field {semantic} has {len} bytes, which is not a multiple of its stride {stride}")]
    PartialElement {
        semantic: AbstractSemantic,
        len: usize,
        stride: usize,
    },

    #[error("field {semantic} has {count} elements but the buffer has {expected} elements")]
    LayoutMismatch {
        semantic: AbstractSemantic,
        count: usize,
        expected: usize,
    },

    #[error("buffer has {count} fields but its layout has {expected} fields")]
    FieldCountMismatch { count: usize, expected: usize },

    #[error("expected {expected} elements but found {count} elements")]
    CountMismatch { count: usize, expected: usize },

    #[error("buffer data with {len} bytes is not a multiple of the layout stride {stride}")]
    StrideMismatch { len: usize, stride: usize },

    #[error("field {0} is not part of the layout")]
    MissingSemantic(AbstractSemantic),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("element range {offset}..{end} is out of range for {count} elements")]
    OutOfRange {
        offset: usize,
        end: usize,
        count: usize,
    },

    #[error("error encoding or decoding field data")]
    Binrw(#[from] binrw::Error),

    #[error("unsupported field format")]
    Format(#[from] FormatError),
}

/// A buffer with separate byte storage for each field of its layout.
#[derive(Debug, PartialEq, Clone)]
pub struct ByteBuffer {
    layout: BufferLayout,
    data: IndexMap<AbstractSemantic, Vec<u8>>,
    element_count: usize,
}

impl ByteBuffer {
    /// Create an empty buffer with no elements.
    pub fn new(layout: BufferLayout) -> Self {
        let data = layout
            .semantics()
            .iter()
            .map(|s| (s.semantic, Vec::new()))
            .collect();
        Self {
            layout,
            data,
            element_count: 0,
        }
    }

    /// Split interleaved `bytes` into the fields of `layout`.
    ///
    /// Layouts with a forced stride pad `bytes` with zeros to the next multiple of the stride.
    pub fn from_bytes(layout: BufferLayout, bytes: &[u8]) -> Result<Self, BufferError> {
        let stride = layout.stride();
        if stride == 0 {
            return Err(BufferError::InvalidArgument(
                "layout stride must be positive".to_string(),
            ));
        }

        let mut bytes = bytes.to_vec();
        if layout.is_stride_forced() {
            bytes.resize(bytes.len().next_multiple_of(stride), 0);
        }
        if bytes.len() % stride != 0 {
            return Err(BufferError::StrideMismatch {
                len: bytes.len(),
                stride,
            });
        }

        let count = bytes.len() / stride;
        let mut buffer = Self::new(layout);
        for semantic in buffer.layout.semantics() {
            let field = buffer.data.entry(semantic.semantic).or_default();
            field.reserve(count * semantic.stride);
            for element in bytes.chunks_exact(stride) {
                field.extend_from_slice(&element[semantic.offset..semantic.offset + semantic.stride]);
            }
        }
        buffer.validate()?;
        Ok(buffer)
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Check that every field has the same number of elements and update the element count.
    pub fn validate(&mut self) -> Result<(), BufferError> {
        if self.data.len() != self.layout.semantics().len() {
            return Err(BufferError::FieldCountMismatch {
                count: self.data.len(),
                expected: self.layout.semantics().len(),
            });
        }

        let mut element_count = None;
        for semantic in self.layout.semantics() {
            let len = self
                .data
                .get(&semantic.semantic)
                .map(|d| d.len())
                .ok_or(BufferError::MissingSemantic(semantic.semantic))?;
            if len % semantic.stride != 0 {
                return Err(BufferError::PartialElement {
                    semantic: semantic.semantic,
                    len,
                    stride: semantic.stride,
                });
            }

            let count = len / semantic.stride;
            match element_count {
                Some(expected) if expected != count => {
                    return Err(BufferError::LayoutMismatch {
                        semantic: semantic.semantic,
                        count,
                        expected,
                    });
                }
                _ => element_count = Some(count),
            }
        }

        self.element_count = element_count.unwrap_or_default();
        Ok(())
    }

    /// Append `count` zeroed elements.
    pub fn extend(&mut self, count: usize) -> Result<(), BufferError> {
        if count == 0 {
            return Err(BufferError::InvalidArgument(
                "element count to extend by must be positive".to_string(),
            ));
        }
        for semantic in self.layout.semantics() {
            if let Some(field) = self.data.get_mut(&semantic.semantic) {
                field.resize(field.len() + count * semantic.stride, 0);
            }
        }
        self.validate()
    }

    /// A copy of the `count` elements starting at element `offset`.
    pub fn fragment(&self, offset: usize, count: usize) -> Result<Self, BufferError> {
        let end = offset + count;
        if end > self.element_count {
            return Err(BufferError::OutOfRange {
                offset,
                end,
                count: self.element_count,
            });
        }

        let data = self
            .layout
            .semantics()
            .iter()
            .map(|s| {
                let field = &self.data[&s.semantic];
                (s.semantic, field[offset * s.stride..end * s.stride].to_vec())
            })
            .collect();

        let mut fragment = Self {
            layout: self.layout.clone(),
            data,
            element_count: 0,
        };
        fragment.validate()?;
        Ok(fragment)
    }

    /// Copy the matching fields of `source` into this buffer.
    ///
    /// Without a `semantic_map`, every field of `source` is imported into the field with the same semantic.
    /// A source field without a matching field in this buffer's layout is a [BufferError::MissingSemantic].
    /// Set `skip_missing` to only import the fields both layouts share.
    /// With a `semantic_map`, both semantics of each pair must exist unless `skip_missing` is set.
    /// Fields with different formats are decoded and encoded again.
    pub fn import_buffer(
        &mut self,
        source: &ByteBuffer,
        semantic_map: Option<&[(AbstractSemantic, AbstractSemantic)]>,
        skip_missing: bool,
    ) -> Result<(), BufferError> {
        if source.element_count != self.element_count {
            return Err(BufferError::CountMismatch {
                count: source.element_count,
                expected: self.element_count,
            });
        }

        let pairs: Vec<_> = match semantic_map {
            Some(map) => map.to_vec(),
            None => source
                .layout
                .semantics()
                .iter()
                .map(|s| (s.semantic, s.semantic))
                .collect(),
        };

        for (source_semantic, semantic) in pairs {
            let (Some(source_field), Some(field)) = (
                source.layout.get(&source_semantic).copied(),
                self.layout.get(&semantic).copied(),
            ) else {
                if skip_missing {
                    continue;
                }
                let missing = if source.layout.contains(&source_semantic) {
                    semantic
                } else {
                    source_semantic
                };
                return Err(BufferError::MissingSemantic(missing));
            };

            let bytes = source.field_bytes(&source_field.semantic)?;
            let bytes = if source_field.format == field.format && source_field.stride == field.stride {
                bytes.to_vec()
            } else {
                field.format.encode(&source_field.format.decode(bytes)?)?
            };
            self.set_field_bytes(&field.semantic, bytes)?;
        }

        Ok(())
    }

    /// The packed bytes for all elements of a single field.
    pub fn field_bytes(&self, semantic: &AbstractSemantic) -> Result<&[u8], BufferError> {
        self.data
            .get(semantic)
            .map(|d| d.as_slice())
            .ok_or(BufferError::MissingSemantic(*semantic))
    }

    /// Replace the packed bytes for all elements of a single field.
    pub fn set_field_bytes(
        &mut self,
        semantic: &AbstractSemantic,
        bytes: Vec<u8>,
    ) -> Result<(), BufferError> {
        let field = self
            .data
            .get_mut(semantic)
            .ok_or(BufferError::MissingSemantic(*semantic))?;
        *field = bytes;
        self.validate()
    }

    /// The decoded values for all elements of a single field.
    pub fn values(&self, semantic: &AbstractSemantic) -> Result<Vec<f64>, BufferError> {
        let field = self.semantic(semantic)?;
        let bytes = self.field_bytes(semantic)?;
        Ok(field.format.decode(bytes)?)
    }

    /// Encode `values` as the data for all elements of a single field.
    pub fn set_values(
        &mut self,
        semantic: &AbstractSemantic,
        values: &[f64],
    ) -> Result<(), BufferError> {
        let bytes = self.semantic(semantic)?.format.encode(values)?;
        self.set_field_bytes(semantic, bytes)
    }

    /// The decoded values of a single field for the element at `index`.
    pub fn element_values(
        &self,
        index: usize,
        semantic: &AbstractSemantic,
    ) -> Result<Vec<f64>, BufferError> {
        let field = self.semantic(semantic)?;
        let bytes = self.element_bytes(index, field)?;
        Ok(field.format.decode(bytes)?)
    }

    /// Encode `values` for a single field of the element at `index`.
    pub fn set_element_values(
        &mut self,
        index: usize,
        semantic: &AbstractSemantic,
        values: &[f64],
    ) -> Result<(), BufferError> {
        let field = *self.semantic(semantic)?;
        self.check_index(index)?;

        let bytes = field.format.encode(values)?;
        if bytes.len() != field.stride {
            return Err(BufferError::InvalidArgument(format!(
                "expected {} values for field {} but found {}",
                field.value_count(),
                field.semantic,
                values.len()
            )));
        }

        let start = index * field.stride;
        if let Some(data) = self.data.get_mut(&field.semantic) {
            data[start..start + field.stride].copy_from_slice(&bytes);
        }
        Ok(())
    }

    /// Interleave all fields in layout order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.element_count * self.layout.stride());
        for i in 0..self.element_count {
            for semantic in self.layout.semantics() {
                let start = i * semantic.stride;
                bytes.extend_from_slice(&self.data[&semantic.semantic][start..start + semantic.stride]);
            }
        }
        bytes
    }

    fn semantic(&self, semantic: &AbstractSemantic) -> Result<&BufferSemantic, BufferError> {
        self.layout
            .get(semantic)
            .ok_or(BufferError::MissingSemantic(*semantic))
    }

    fn check_index(&self, index: usize) -> Result<(), BufferError> {
        if index >= self.element_count {
            Err(BufferError::OutOfRange {
                offset: index,
                end: index + 1,
                count: self.element_count,
            })
        } else {
            Ok(())
        }
    }

    fn element_bytes(&self, index: usize, field: &BufferSemantic) -> Result<&[u8], BufferError> {
        self.check_index(index)?;
        let start = index * field.stride;
        Ok(&self.field_bytes(&field.semantic)?[start..start + field.stride])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{format::Format, semantic::Semantic};

    use hexlit::hex;
    use pretty_assertions::assert_eq;

    fn position_color_layout() -> BufferLayout {
        BufferLayout::new([
            BufferSemantic::new(Semantic::Position, Format::R32G32B32_FLOAT),
            BufferSemantic::new(Semantic::Color, Format::R8G8B8A8_UNORM),
        ])
    }

    #[test]
    fn from_bytes_interleaved() {
        let buffer = ByteBuffer::from_bytes(
            position_color_layout(),
            &hex!(
                // vertex 0
                0000803f 00000000 00000040
                ff000000
                // vertex 1
                00000000 0000803f 00000000
                00ff00ff
            ),
        )
        .unwrap();

        assert_eq!(2, buffer.element_count());
        assert_eq!(
            vec![1.0, 0.0, 2.0, 0.0, 1.0, 0.0],
            buffer.values(&Semantic::Position.into()).unwrap()
        );
        assert_eq!(
            &hex!(ff000000 00ff00ff),
            buffer.field_bytes(&Semantic::Color.into()).unwrap()
        );
    }

    #[test]
    fn from_bytes_round_trip() {
        let bytes = hex!(
            0000803f 00000000 00000040 ff000000
            00000000 0000803f 00000000 00ff00ff
        );
        let buffer = ByteBuffer::from_bytes(position_color_layout(), &bytes).unwrap();
        assert_eq!(bytes.to_vec(), buffer.to_bytes());
    }

    #[test]
    fn from_bytes_partial_element() {
        let result = ByteBuffer::from_bytes(position_color_layout(), &[0u8; 17]);
        assert!(matches!(
            result,
            Err(BufferError::StrideMismatch { len: 17, stride: 16 })
        ));
    }

    #[test]
    fn from_bytes_forced_stride_pads() {
        let layout = BufferLayout::new([
            BufferSemantic::new(Semantic::BlendIndices, Format::R8G8B8A8_UINT),
            BufferSemantic::new(Semantic::BlendWeight, Format::R8G8B8A8_UNORM),
        ])
        .force_stride();
        let buffer = ByteBuffer::from_bytes(layout, &hex!(01020304 ff000000 05060708)).unwrap();
        assert_eq!(2, buffer.element_count());
        assert_eq!(
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
            buffer.values(&Semantic::BlendIndices.into()).unwrap()
        );
        assert_eq!(
            &hex!(ff000000 00000000),
            buffer.field_bytes(&Semantic::BlendWeight.into()).unwrap()
        );
    }

    #[test]
    fn extend_zeroed() {
        let mut buffer = ByteBuffer::new(position_color_layout());
        buffer.extend(3).unwrap();
        assert_eq!(3, buffer.element_count());
        assert_eq!(vec![0u8; 48], buffer.to_bytes());

        buffer.extend(2).unwrap();
        assert_eq!(5, buffer.element_count());
        for semantic in buffer.layout().semantics() {
            assert_eq!(
                5 * semantic.stride,
                buffer.field_bytes(&semantic.semantic).unwrap().len()
            );
        }
    }

    #[test]
    fn extend_zero_elements() {
        let mut buffer = ByteBuffer::new(position_color_layout());
        assert!(matches!(
            buffer.extend(0),
            Err(BufferError::InvalidArgument(_))
        ));
    }

    #[test]
    fn set_values_mismatched_count() {
        let mut buffer = ByteBuffer::new(position_color_layout());
        buffer.extend(2).unwrap();
        let result = buffer.set_values(&Semantic::Color.into(), &[0.0; 12]);
        assert!(matches!(
            result,
            Err(BufferError::LayoutMismatch {
                count: 3,
                expected: 2,
                ..
            })
        ));
    }

    #[test]
    fn fragment_reimport_matches() {
        let mut buffer = ByteBuffer::new(position_color_layout());
        buffer.extend(4).unwrap();
        buffer
            .set_values(
                &Semantic::Position.into(),
                &(0..12).map(|i| i as f64).collect::<Vec<_>>(),
            )
            .unwrap();

        let fragment = buffer.fragment(1, 2).unwrap();
        assert_eq!(2, fragment.element_count());
        assert_eq!(
            vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
            fragment.values(&Semantic::Position.into()).unwrap()
        );

        let mut target = ByteBuffer::new(position_color_layout());
        target.extend(2).unwrap();
        target.import_buffer(&fragment, None, false).unwrap();
        assert_eq!(fragment.to_bytes(), target.to_bytes());

        // The source is unchanged.
        assert_eq!(4, buffer.element_count());
    }

    #[test]
    fn fragment_out_of_range() {
        let mut buffer = ByteBuffer::new(position_color_layout());
        buffer.extend(4).unwrap();
        assert!(matches!(
            buffer.fragment(3, 2),
            Err(BufferError::OutOfRange { .. })
        ));
    }

    #[test]
    fn import_converts_formats() {
        let mut source = ByteBuffer::new(BufferLayout::new([BufferSemantic::new(
            Semantic::Color,
            Format::R32G32B32A32_FLOAT,
        )]));
        source.extend(1).unwrap();
        source
            .set_values(&Semantic::Color.into(), &[1.0, 0.0, 1.0, 0.0])
            .unwrap();

        let mut target = ByteBuffer::new(position_color_layout());
        target.extend(1).unwrap();
        target.import_buffer(&source, None, false).unwrap();
        assert_eq!(
            &hex!(ff00ff00),
            target.field_bytes(&Semantic::Color.into()).unwrap()
        );
    }

    #[test]
    fn import_count_mismatch() {
        let mut source = ByteBuffer::new(position_color_layout());
        source.extend(2).unwrap();
        let mut target = ByteBuffer::new(position_color_layout());
        target.extend(3).unwrap();
        assert!(matches!(
            target.import_buffer(&source, None, false),
            Err(BufferError::CountMismatch {
                count: 2,
                expected: 3
            })
        ));
    }

    #[test]
    fn import_missing_field() {
        let mut source = ByteBuffer::new(BufferLayout::new([BufferSemantic::new(
            Semantic::Normal,
            Format::R8G8B8A8_SNORM,
        )]));
        source.extend(1).unwrap();
        let mut target = ByteBuffer::new(position_color_layout());
        target.extend(1).unwrap();

        assert!(matches!(
            target.import_buffer(&source, None, false),
            Err(BufferError::MissingSemantic(AbstractSemantic {
                semantic: Semantic::Normal,
                index: 0
            }))
        ));
        target.import_buffer(&source, None, true).unwrap();
    }

    #[test]
    fn import_with_semantic_map() {
        let mut source = ByteBuffer::new(BufferLayout::new([BufferSemantic::new(
            AbstractSemantic::new(Semantic::Color, 1),
            Format::R8G8B8A8_UNORM,
        )]));
        source.extend(1).unwrap();
        source
            .set_field_bytes(&AbstractSemantic::new(Semantic::Color, 1), hex!(01020304).to_vec())
            .unwrap();

        let mut target = ByteBuffer::new(position_color_layout());
        target.extend(1).unwrap();
        target
            .import_buffer(
                &source,
                Some(&[(
                    AbstractSemantic::new(Semantic::Color, 1),
                    Semantic::Color.into(),
                )]),
                false,
            )
            .unwrap();
        assert_eq!(
            &hex!(01020304),
            target.field_bytes(&Semantic::Color.into()).unwrap()
        );
    }

    #[test]
    fn element_values() {
        let mut buffer = ByteBuffer::new(position_color_layout());
        buffer.extend(2).unwrap();
        buffer
            .set_element_values(1, &Semantic::Position.into(), &[1.0, 2.0, 3.0])
            .unwrap();
        assert_eq!(
            vec![1.0, 2.0, 3.0],
            buffer
                .element_values(1, &Semantic::Position.into())
                .unwrap()
        );
        assert_eq!(
            vec![0.0, 0.0, 0.0],
            buffer
                .element_values(0, &Semantic::Position.into())
                .unwrap()
        );
        assert!(buffer
            .set_element_values(2, &Semantic::Position.into(), &[1.0, 2.0, 3.0])
            .is_err());
        assert!(buffer
            .set_element_values(0, &Semantic::Position.into(), &[1.0, 2.0])
            .is_err());
    }

    #[test]
    fn raw_data_rows() {
        let layout = BufferLayout::new([
            BufferSemantic::new(Semantic::RawData, Format::R32_FLOAT).with_stride(8)
        ])
        .force_stride();
        let buffer = ByteBuffer::from_bytes(layout, &hex!(0000803f 00000040 00004040)).unwrap();
        assert_eq!(2, buffer.element_count());
        assert_eq!(
            vec![3.0, 0.0],
            buffer.element_values(1, &Semantic::RawData.into()).unwrap()
        );
    }
}
