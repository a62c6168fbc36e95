//! Resource descriptors parsed from frame dump file names.
//!
//! Each dumped resource is named after the call that used it, the slot it was bound to,
//! its content hash, and the shaders bound for that call.
//!
//! ```text
//! 000123-vb0=4d9f2c81-vs=8c4bd4f1a0f3e2d1-ps=1a2b3c4d5e6f7081.buf
//! 000123-ps-t1=0dbc4afc(5e9494f3)-vs=8c4bd4f1a0f3e2d1-ps=1a2b3c4d5e6f7081.dds
//! ```
//!
//! The optional `(...)` suffix is the hash the resource would have
//! without texture hash overrides enabled.
use std::{
    cell::OnceCell,
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};
use smol_str::SmolStr;
use strum::EnumString;
use thiserror::Error;

/// The marker prefix 3DMigoto adds to a resource hash.
const MARK: &str = "!U!=";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseFileNameError {
    #[error("file name {0:?} does not start with a call id")]
    MissingCallId(String),

    #[error("file name {0:?} has no extension")]
    MissingExtension(String),

    #[error("file name {0:?} has no shader references")]
    MissingShaderRefs(String),

    #[error("file name {name:?} has an invalid resource reference {value:?}")]
    InvalidResourceRef { name: String, value: String },

    #[error("file name {name:?} has an unrecognized slot type {value:?}")]
    UnknownSlotType { name: String, value: String },

    #[error("file name {name:?} has an unrecognized shader type {value:?}")]
    UnknownShaderType { name: String, value: String },
}

/// The programmable pipeline stage of a shader.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, strum::Display, EnumString)]
pub enum ShaderType {
    #[strum(serialize = "cs")]
    Compute,
    #[strum(serialize = "ps")]
    Pixel,
    #[strum(serialize = "vs")]
    Vertex,
    #[strum(serialize = "gs")]
    Geometry,
    #[strum(serialize = "hs")]
    Hull,
    #[strum(serialize = "ds")]
    Domain,
}

/// The kind of binding point a resource was dumped from.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, strum::Display, EnumString)]
pub enum SlotType {
    #[strum(serialize = "cb")]
    ConstantBuffer,
    #[strum(serialize = "ib")]
    IndexBuffer,
    #[strum(serialize = "vb")]
    VertexBuffer,
    #[strum(serialize = "t")]
    Texture,
    #[strum(serialize = "o")]
    RenderTarget,
    #[strum(serialize = "u")]
    Uav,
}

/// A shader bound for the call like `vs=8c4bd4f1a0f3e2d1`.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct ShaderRef {
    pub shader_type: ShaderType,
    pub hash: SmolStr,
    /// The unparsed reference text.
    pub raw: SmolStr,
}

impl ShaderRef {
    fn parse(value: &str) -> Option<Self> {
        let (shader_type, hash) = value.split_once('=')?;
        let is_shader = shader_type.len() == 2 && shader_type.ends_with('s');
        let is_hash = !hash.is_empty() && hash.bytes().all(|b| b.is_ascii_hexdigit());
        if is_shader && is_hash {
            Some(Self {
                shader_type: shader_type.parse().ok()?,
                hash: hash.into(),
                raw: value.into(),
            })
        } else {
            None
        }
    }
}

/// A single dumped resource file.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub path: PathBuf,
    /// The file name including any marker.
    pub name: SmolStr,
    /// `true` if the name contained the `!U!` marker.
    pub marked: bool,
    pub call_id: u32,
    pub ext: SmolStr,
    pub slot_type: SlotType,
    pub slot_id: Option<u32>,
    /// The stage for slots that exist in multiple stages like `ps-t0`.
    pub slot_shader_type: Option<ShaderType>,
    pub hash: Option<SmolStr>,
    pub old_hash: Option<SmolStr>,
    pub shaders: Vec<ShaderRef>,
    sha256: OnceCell<[u8; 32]>,
}

impl ResourceDescriptor {
    /// Parse the file name of `path` without accessing the file.
    pub fn new<P: Into<PathBuf>>(path: P) -> Result<Self, ParseFileNameError> {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let marked = name.contains("!U!");
        let unmarked = name.replace(MARK, "");

        let (call_id, rest) = unmarked
            .split_once('-')
            .filter(|(id, _)| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| ParseFileNameError::MissingCallId(name.clone()))?;
        let call_id = call_id
            .parse()
            .map_err(|_| ParseFileNameError::MissingCallId(name.clone()))?;

        let (refs, ext) = rest
            .rsplit_once('.')
            .filter(|(_, ext)| {
                !ext.is_empty()
                    && ext
                        .bytes()
                        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
            })
            .ok_or_else(|| ParseFileNameError::MissingExtension(name.clone()))?;

        // The resource reference always comes before the shader references.
        let mut shaders = Vec::new();
        let mut resource_ref = Vec::new();
        for (i, token) in refs.split('-').enumerate() {
            match ShaderRef::parse(token).filter(|_| i > 0) {
                Some(shader) => shaders.push(shader),
                None => resource_ref.push(token),
            }
        }
        if shaders.is_empty() {
            return Err(ParseFileNameError::MissingShaderRefs(name));
        }

        let (stage, slot) = match resource_ref.as_slice() {
            [slot] => (None, *slot),
            [stage, slot] => (Some(*stage), *slot),
            _ => {
                return Err(ParseFileNameError::InvalidResourceRef {
                    value: resource_ref.join("-"),
                    name,
                });
            }
        };

        let slot_shader_type = stage
            .map(|s| {
                s.parse()
                    .map_err(|_| ParseFileNameError::UnknownShaderType {
                        name: name.clone(),
                        value: s.to_string(),
                    })
            })
            .transpose()?;

        let (slot, hashes) = match slot.split_once('=') {
            Some((slot, hashes)) => (slot, Some(hashes)),
            None => (slot, None),
        };
        let (hash, old_hash) = match hashes.map(|h| h.split_once('(')) {
            Some(Some((hash, old))) => (Some(hash), Some(old.trim_end_matches(')'))),
            Some(None) => (hashes, None),
            None => (None, None),
        };

        let digits = slot.trim_start_matches(|c: char| c.is_ascii_lowercase());
        let letters = &slot[..slot.len() - digits.len()];
        if letters.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseFileNameError::InvalidResourceRef {
                name,
                value: slot.to_string(),
            });
        }
        let slot_type = letters
            .parse()
            .map_err(|_| ParseFileNameError::UnknownSlotType {
                name: name.clone(),
                value: letters.to_string(),
            })?;
        let slot_id = if digits.is_empty() {
            None
        } else {
            Some(
                digits
                    .parse()
                    .map_err(|_| ParseFileNameError::InvalidResourceRef {
                        name: name.clone(),
                        value: slot.to_string(),
                    })?,
            )
        };

        Ok(Self {
            call_id,
            ext: ext.into(),
            slot_type,
            slot_id,
            slot_shader_type,
            hash: hash.map(Into::into),
            old_hash: old_hash.map(Into::into),
            shaders,
            marked,
            name: name.into(),
            path,
            sha256: OnceCell::new(),
        })
    }

    /// The slot address like `ps-t0` or `null-vb0`.
    pub fn slot(&self) -> String {
        let stage = self
            .slot_shader_type
            .map(|s| s.to_string())
            .unwrap_or_else(|| "null".to_string());
        let id = self.slot_id.map(|i| i.to_string()).unwrap_or_default();
        format!("{stage}-{}{id}", self.slot_type)
    }

    /// The slot address combined with the content hash like `ps-t0-0dbc4afc`.
    pub fn slot_hash(&self) -> String {
        format!("{}-{}", self.slot(), self.hash.as_deref().unwrap_or("None"))
    }

    /// The shader references joined like `vs=8c4bd4f1a0f3e2d1-ps=1a2b3c4d5e6f7081`.
    pub fn shaders_string(&self) -> String {
        self.shaders
            .iter()
            .map(|s| s.raw.as_str())
            .collect::<Vec<_>>()
            .join("-")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file contents.
    /// The bytes are not retained by the descriptor.
    pub fn bytes(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }

    /// The SHA-256 digest of the file contents.
    /// The file is only read and hashed on the first call.
    pub fn sha256(&self) -> std::io::Result<[u8; 32]> {
        if let Some(digest) = self.sha256.get() {
            return Ok(*digest);
        }
        let digest: [u8; 32] = Sha256::digest(self.bytes()?).into();
        let _ = self.sha256.set(digest);
        Ok(digest)
    }

    /// The file size in bytes.
    pub fn len(&self) -> std::io::Result<u64> {
        std::fs::metadata(&self.path).map(|m| m.len())
    }

    pub fn is_empty(&self) -> std::io::Result<bool> {
        self.len().map(|l| l == 0)
    }
}
