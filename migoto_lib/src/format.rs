//! Numeric encodings for DXGI style buffer formats.
//!
//! A format identifier like `R16G16B16A16_FLOAT` or `DXGI_FORMAT_R8G8B8A8_UNORM`
//! is made of repeated `(channel, bits)` groups followed by an encoding suffix.
//! Every channel of a supported format has the same bit width.
//!
//! Values are exchanged as [f64], which represents every supported component type exactly.
//! Normalized formats divide by the maximum integer value when decoding,
//! so they only round trip within one unit of least precision.
use std::{fmt::Display, io::Cursor, str::FromStr};

use binrw::{BinReaderExt, BinResult, BinWrite};
use half::f16;
use thiserror::Error;

/// The prefix used for format names in descriptors and index buffer headers.
pub const DXGI_PREFIX: &str = "DXGI_FORMAT_";

const CHANNEL_NAMES: [char; 4] = ['R', 'G', 'B', 'A'];

#[derive(Debug, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("unsupported format {0:?}")]
    UnsupportedFormat(String),

    #[error("value {value} is out of range for format {format}")]
    OutOfRange { value: u32, format: Format },
}

/// The encoding and size of a single channel.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ComponentType {
    Float32,
    Float16,
    Uint32,
    Uint16,
    Uint8,
    Sint32,
    Sint16,
    Sint8,
    Unorm16,
    Unorm8,
    Snorm16,
    Snorm8,
}

impl ComponentType {
    fn from_parts(bits: u32, suffix: &str) -> Option<Self> {
        match (suffix, bits) {
            ("FLOAT", 32) => Some(Self::Float32),
            ("FLOAT", 16) => Some(Self::Float16),
            ("UINT", 32) => Some(Self::Uint32),
            ("UINT", 16) => Some(Self::Uint16),
            ("UINT", 8) => Some(Self::Uint8),
            ("SINT", 32) => Some(Self::Sint32),
            ("SINT", 16) => Some(Self::Sint16),
            ("SINT", 8) => Some(Self::Sint8),
            ("UNORM", 16) => Some(Self::Unorm16),
            ("UNORM", 8) => Some(Self::Unorm8),
            ("SNORM", 16) => Some(Self::Snorm16),
            ("SNORM", 8) => Some(Self::Snorm8),
            _ => None,
        }
    }

    pub fn bits(&self) -> usize {
        match self {
            Self::Float32 | Self::Uint32 | Self::Sint32 => 32,
            Self::Float16 | Self::Uint16 | Self::Sint16 | Self::Unorm16 | Self::Snorm16 => 16,
            Self::Uint8 | Self::Sint8 | Self::Unorm8 | Self::Snorm8 => 8,
        }
    }

    /// The size in bytes of a single channel.
    pub fn size(&self) -> usize {
        self.bits() / 8
    }

    fn suffix(&self) -> &'static str {
        match self {
            Self::Float32 | Self::Float16 => "FLOAT",
            Self::Uint32 | Self::Uint16 | Self::Uint8 => "UINT",
            Self::Sint32 | Self::Sint16 | Self::Sint8 => "SINT",
            Self::Unorm16 | Self::Unorm8 => "UNORM",
            Self::Snorm16 | Self::Snorm8 => "SNORM",
        }
    }

    fn write<W: std::io::Write + std::io::Seek>(&self, writer: &mut W, value: f64) -> BinResult<()> {
        // Float to int casts saturate to the native range of the target type.
        match self {
            Self::Float32 => (value as f32).write_le(writer),
            Self::Float16 => f16::from_f64(value).to_bits().write_le(writer),
            Self::Uint32 => (value as u32).write_le(writer),
            Self::Uint16 => (value as u16).write_le(writer),
            Self::Uint8 => (value as u8).write_le(writer),
            Self::Sint32 => (value as i32).write_le(writer),
            Self::Sint16 => (value as i16).write_le(writer),
            Self::Sint8 => (value as i8).write_le(writer),
            Self::Unorm16 => ((value * u16::MAX as f64).round() as u16).write_le(writer),
            Self::Unorm8 => ((value * u8::MAX as f64).round() as u8).write_le(writer),
            Self::Snorm16 => ((value * i16::MAX as f64).round() as i16).write_le(writer),
            Self::Snorm8 => ((value * i8::MAX as f64).round() as i8).write_le(writer),
        }
    }

    fn read(&self, reader: &mut Cursor<&[u8]>) -> BinResult<f64> {
        let value = match self {
            Self::Float32 => reader.read_le::<f32>()? as f64,
            Self::Float16 => f16::from_bits(reader.read_le()?).to_f64(),
            Self::Uint32 => reader.read_le::<u32>()? as f64,
            Self::Uint16 => reader.read_le::<u16>()? as f64,
            Self::Uint8 => reader.read_le::<u8>()? as f64,
            Self::Sint32 => reader.read_le::<i32>()? as f64,
            Self::Sint16 => reader.read_le::<i16>()? as f64,
            Self::Sint8 => reader.read_le::<i8>()? as f64,
            Self::Unorm16 => reader.read_le::<u16>()? as f64 / u16::MAX as f64,
            Self::Unorm8 => reader.read_le::<u8>()? as f64 / u8::MAX as f64,
            Self::Snorm16 => reader.read_le::<i16>()? as f64 / i16::MAX as f64,
            Self::Snorm8 => reader.read_le::<i8>()? as f64 / i8::MAX as f64,
        };
        Ok(value)
    }
}

/// A buffer element format with 1 to 4 channels of the same [ComponentType].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct Format {
    channels: u8,
    component_type: ComponentType,
}

impl Format {
    pub const R32_UINT: Self = Self::new(1, ComponentType::Uint32);
    pub const R16_UINT: Self = Self::new(1, ComponentType::Uint16);
    pub const R32_FLOAT: Self = Self::new(1, ComponentType::Float32);
    pub const R16G16_FLOAT: Self = Self::new(2, ComponentType::Float16);
    pub const R16G16_UNORM: Self = Self::new(2, ComponentType::Unorm16);
    pub const R16G16B16_FLOAT: Self = Self::new(3, ComponentType::Float16);
    pub const R16G16B16_UINT: Self = Self::new(3, ComponentType::Uint16);
    pub const R32G32B32_FLOAT: Self = Self::new(3, ComponentType::Float32);
    pub const R32G32B32_UINT: Self = Self::new(3, ComponentType::Uint32);
    pub const R8G8B8A8_UINT: Self = Self::new(4, ComponentType::Uint8);
    pub const R8G8B8A8_UNORM: Self = Self::new(4, ComponentType::Unorm8);
    pub const R8G8B8A8_SNORM: Self = Self::new(4, ComponentType::Snorm8);
    pub const R32G32B32A32_UINT: Self = Self::new(4, ComponentType::Uint32);
    pub const R32G32B32A32_FLOAT: Self = Self::new(4, ComponentType::Float32);

    const fn new(channels: u8, component_type: ComponentType) -> Self {
        Self {
            channels,
            component_type,
        }
    }

    /// Returns [None] if `channels` is not in the range 1 to 4.
    pub fn from_channels(channels: usize, component_type: ComponentType) -> Option<Self> {
        (1..=4)
            .contains(&channels)
            .then(|| Self::new(channels as u8, component_type))
    }

    pub fn component_type(&self) -> ComponentType {
        self.component_type
    }

    pub fn component_count(&self) -> usize {
        self.channels as usize
    }

    /// The size in bytes of a single element with all channels.
    pub fn byte_size(&self) -> usize {
        self.component_count() * self.component_type.size()
    }

    /// The format name including the `DXGI_FORMAT_` prefix.
    pub fn dxgi_name(&self) -> String {
        format!("{DXGI_PREFIX}{self}")
    }

    /// Encode `values` with one entry per channel as tightly packed little endian data.
    pub fn encode(&self, values: &[f64]) -> BinResult<Vec<u8>> {
        let mut writer = Cursor::new(Vec::with_capacity(values.len() * self.component_type.size()));
        for value in values {
            self.component_type.write(&mut writer, *value)?;
        }
        Ok(writer.into_inner())
    }

    /// Decode every channel in `bytes`.
    /// Trailing bytes that do not form a complete channel are an error.
    pub fn decode(&self, bytes: &[u8]) -> BinResult<Vec<f64>> {
        let count = bytes.len().div_ceil(self.component_type.size());
        let mut reader = Cursor::new(bytes);
        (0..count)
            .map(|_| self.component_type.read(&mut reader))
            .collect()
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bits = self.component_type.bits();
        for channel in CHANNEL_NAMES.iter().take(self.component_count()) {
            write!(f, "{channel}{bits}")?;
        }
        write!(f, "_{}", self.component_type.suffix())
    }
}

impl FromStr for Format {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || FormatError::UnsupportedFormat(s.to_string());

        let name = s.strip_prefix(DXGI_PREFIX).unwrap_or(s);
        let (channels, suffix) = name.split_once('_').ok_or_else(unsupported)?;

        let mut bits = Vec::new();
        let mut chars = channels.chars().peekable();
        while let Some(channel) = chars.next() {
            if !matches!(channel, 'R' | 'G' | 'B' | 'A' | 'D') {
                return Err(unsupported());
            }
            let mut digits = String::new();
            while let Some(c) = chars.next_if(char::is_ascii_digit) {
                digits.push(c);
            }
            bits.push(digits.parse::<u32>().map_err(|_| unsupported())?);
        }

        // Mixed widths like R10G10B10A2 are not supported.
        let first = *bits.first().ok_or_else(unsupported)?;
        if bits.iter().any(|b| *b != first) {
            return Err(unsupported());
        }

        let component_type = ComponentType::from_parts(first, suffix).ok_or_else(unsupported)?;
        Self::from_channels(bits.len(), component_type).ok_or_else(unsupported)
    }
}

/// The number of channels for the format identifier `format`.
pub fn format_components(format: &str) -> Result<usize, FormatError> {
    format.parse::<Format>().map(|f| f.component_count())
}

/// The size in bytes of one element for the format identifier `format`.
pub fn format_size(format: &str) -> Result<usize, FormatError> {
    format.parse::<Format>().map(|f| f.byte_size())
}
