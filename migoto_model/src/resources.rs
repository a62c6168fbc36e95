//! Locate and decode the resources of resolved call branches.
//!
//! A [DataMap] names a resource by a tag like `POSITION_BUFFER` and describes
//! where to find it for the calls of a stage and how to decode its bytes.
//! Decoded data is shared between calls with identical file contents.
use std::{borrow::Cow, rc::Rc};

use ahash::AHashMap;
use indexmap::IndexMap;
use log::info;
use migoto_lib::{
    buffer::ByteBuffer,
    dump::CallDescriptor,
    error::LoadDumpError,
    filename::ResourceDescriptor,
    format::Format,
    index::IndexBuffer,
    semantic::{AbstractSemantic, BufferLayout, BufferSemantic, Semantic},
};
use smol_str::SmolStr;

use crate::{
    calls::{CallBranch, Slot, SlotQuery},
    error::ExtractError,
};

/// A field of a [LayoutDesc].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct FieldDesc {
    pub semantic: AbstractSemantic,
    pub format: Format,
    /// The size in bytes of the field if larger than the format.
    pub stride: Option<usize>,
}

impl FieldDesc {
    pub const fn new(semantic: Semantic, index: u32, format: Format) -> Self {
        Self {
            semantic: AbstractSemantic::new(semantic, index),
            format,
            stride: None,
        }
    }

    pub const fn with_stride(self, stride: usize) -> Self {
        Self {
            stride: Some(stride),
            ..self
        }
    }
}

/// A static description of a [BufferLayout].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct LayoutDesc<'a> {
    pub fields: &'a [FieldDesc],
    /// Pad the data to a multiple of the stride instead of rejecting partial elements.
    pub force_stride: bool,
}

impl LayoutDesc<'_> {
    pub fn to_layout(&self) -> BufferLayout {
        let layout = BufferLayout::new(self.fields.iter().map(|f| {
            let semantic = BufferSemantic::new(f.semantic, f.format);
            match f.stride {
                Some(stride) => semantic.with_stride(stride),
                None => semantic,
            }
        }));
        if self.force_stride {
            layout.force_stride()
        } else {
            layout
        }
    }

    fn is_index_buffer(&self) -> bool {
        matches!(self.fields, [f] if f.semantic.semantic == Semantic::Index)
    }
}

/// A named resource read by the calls of one or more stages.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct DataMap<'a> {
    pub tag: &'a str,
    /// The slots to check in order for the calls of each stage.
    /// [Slot::stage] is the stage reading the resource.
    pub sources: &'a [Slot<'a>],
    /// The extension of the file to read.
    /// Text index buffers are read from the `txt` sibling of the binary resource.
    pub file_ext: Option<&'a str>,
    /// Resources without a layout are located but not decoded.
    pub layout: Option<LayoutDesc<'a>>,
    /// Skip calls without this resource instead of returning an error.
    pub optional: bool,
}

/// Decoded resource data.
#[derive(Debug, PartialEq, Clone)]
pub enum ResourceData {
    Buffer(ByteBuffer),
    Index(IndexBuffer),
}

#[derive(Debug, Clone)]
pub struct CollectedResource<'d> {
    pub descriptor: &'d ResourceDescriptor,
    /// Shared by all resources with the same tag and file contents.
    pub data: Option<Rc<ResourceData>>,
}

/// The resources of a single call by data map tag.
#[derive(Debug, Clone)]
pub struct CollectedCall<'d> {
    pub stage: SmolStr,
    pub call: &'d CallDescriptor,
    pub resources: IndexMap<SmolStr, CollectedResource<'d>>,
}

impl<'d> CollectedCall<'d> {
    pub fn get(&self, tag: &str) -> Option<&CollectedResource<'d>> {
        self.resources.get(tag)
    }

    /// The resource for `tag` or [ExtractError::ResourceNotFound].
    pub fn require(&self, tag: &str) -> Result<&CollectedResource<'d>, ExtractError> {
        self.get(tag).ok_or_else(|| ExtractError::ResourceNotFound {
            tag: tag.into(),
            stage: self.stage.clone(),
            call_id: self.call.id,
        })
    }

    pub fn hash(&self, tag: &str) -> Option<&'d SmolStr> {
        self.get(tag).and_then(|r| r.descriptor.hash.as_ref())
    }

    pub fn buffer(&self, tag: &str) -> Result<&ByteBuffer, ExtractError> {
        match self.require(tag)?.data.as_deref() {
            Some(ResourceData::Buffer(buffer)) => Ok(buffer),
            _ => Err(self.missing_data(tag)),
        }
    }

    pub fn index_buffer(&self, tag: &str) -> Result<&IndexBuffer, ExtractError> {
        match self.require(tag)?.data.as_deref() {
            Some(ResourceData::Index(buffer)) => Ok(buffer),
            _ => Err(self.missing_data(tag)),
        }
    }

    fn missing_data(&self, tag: &str) -> ExtractError {
        ExtractError::MissingResourceData {
            tag: tag.into(),
            call_id: self.call.id,
        }
    }
}

/// A [CallBranch] with the resources of each call.
#[derive(Debug, Clone)]
pub struct CollectedBranch<'d> {
    pub stage: SmolStr,
    pub calls: Vec<CollectedCall<'d>>,
    pub nested: Vec<CollectedBranch<'d>>,
}

/// Locate and decode the resources of every call in `branches` using `data_maps`.
#[tracing::instrument(skip_all)]
pub fn collect_resources<'d>(
    branches: &IndexMap<SmolStr, CallBranch<'d>>,
    data_maps: &[DataMap],
) -> Result<IndexMap<SmolStr, CollectedBranch<'d>>, ExtractError> {
    let mut collector = ResourceCollector {
        data_maps,
        cache: AHashMap::new(),
        resource_count: 0,
    };

    let collected = branches
        .iter()
        .map(|(id, branch)| Ok((id.clone(), collector.collect_branch(branch)?)))
        .collect::<Result<IndexMap<_, _>, ExtractError>>()?;

    info!(
        "Collected {} resources with {} unique decoded buffers",
        collector.resource_count,
        collector.cache.len()
    );
    Ok(collected)
}

struct ResourceCollector<'a> {
    data_maps: &'a [DataMap<'a>],
    /// Decoded data by file content hash and tag.
    cache: AHashMap<([u8; 32], SmolStr), Rc<ResourceData>>,
    resource_count: usize,
}

impl ResourceCollector<'_> {
    fn collect_branch<'d>(
        &mut self,
        branch: &CallBranch<'d>,
    ) -> Result<CollectedBranch<'d>, ExtractError> {
        let calls = branch
            .calls
            .iter()
            .map(|&call| self.collect_call(&branch.stage, call))
            .collect::<Result<Vec<_>, _>>()?;

        let nested = branch
            .nested
            .iter()
            .map(|b| self.collect_branch(b))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CollectedBranch {
            stage: branch.stage.clone(),
            calls,
            nested,
        })
    }

    fn collect_call<'d>(
        &mut self,
        stage: &SmolStr,
        call: &'d CallDescriptor,
    ) -> Result<CollectedCall<'d>, ExtractError> {
        let mut resources = IndexMap::new();

        let data_maps = self.data_maps;
        for data_map in data_maps {
            let mut sources = data_map
                .sources
                .iter()
                .filter(|s| s.stage == stage.as_str())
                .peekable();
            if sources.peek().is_none() {
                continue;
            }

            let mut found = None;
            for source in sources {
                let query = SlotQuery {
                    shader_type: None,
                    slot_type: source.slot_type,
                    slot_id: source.slot_id,
                    slot_shader_type: source.shader_type,
                    ext: data_map.file_ext.filter(|e| *e != "txt"),
                };
                found = query.find_in_call(call, stage)?;
                if found.is_some() {
                    break;
                }
            }

            match found {
                Some(descriptor) => {
                    let data = match &data_map.layout {
                        Some(layout) => Some(self.decode(data_map, layout, descriptor)?),
                        None => None,
                    };
                    resources.insert(
                        SmolStr::from(data_map.tag),
                        CollectedResource { descriptor, data },
                    );
                    self.resource_count += 1;
                }
                None => {
                    if !data_map.optional {
                        return Err(ExtractError::ResourceNotFound {
                            tag: data_map.tag.into(),
                            stage: stage.clone(),
                            call_id: call.id,
                        });
                    }
                }
            }
        }

        Ok(CollectedCall {
            stage: stage.clone(),
            call,
            resources,
        })
    }

    fn decode(
        &mut self,
        data_map: &DataMap,
        layout: &LayoutDesc,
        descriptor: &ResourceDescriptor,
    ) -> Result<Rc<ResourceData>, ExtractError> {
        let source = if data_map.file_ext == Some("txt") {
            let path = descriptor.path.with_extension("txt");
            Cow::Owned(ResourceDescriptor::new(path).map_err(LoadDumpError::from)?)
        } else {
            Cow::Borrowed(descriptor)
        };

        let io_error = |e| ExtractError::Io {
            path: source.path.clone(),
            source: e,
        };

        let key = (source.sha256().map_err(io_error)?, SmolStr::from(data_map.tag));
        if let Some(data) = self.cache.get(&key) {
            return Ok(data.clone());
        }

        let data = if layout.is_index_buffer() {
            if source.ext == "txt" {
                ResourceData::Index(IndexBuffer::from_file(layout.to_layout(), &source.path)?)
            } else {
                let bytes = source.bytes().map_err(io_error)?;
                ResourceData::Index(IndexBuffer::from_bytes(layout.to_layout(), &bytes)?)
            }
        } else {
            let bytes = source.bytes().map_err(io_error)?;
            ResourceData::Buffer(ByteBuffer::from_bytes(layout.to_layout(), &bytes)?)
        };

        let data = Rc::new(data);
        self.cache.insert(key, data.clone());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    use indoc::indoc;
    use migoto_lib::{
        dump::{Dump, LOG_FILE_NAME},
        filename::{ShaderType, SlotType},
    };
    use pretty_assertions::assert_eq;

    use crate::calls::{Stage, resolve_call_branches};

    const STAGES: &[Stage] = &[Stage {
        id: "DRAW",
        shader_type: ShaderType::Vertex,
        inputs: &[],
        outputs: &[Slot {
            stage: "DRAW",
            shader_type: None,
            slot_type: SlotType::VertexBuffer,
            slot_id: Some(0),
        }],
    }];

    const POSITION: DataMap = DataMap {
        tag: "POSITION",
        sources: &[Slot {
            stage: "DRAW",
            shader_type: None,
            slot_type: SlotType::VertexBuffer,
            slot_id: Some(0),
        }],
        file_ext: None,
        layout: Some(LayoutDesc {
            fields: &[FieldDesc::new(Semantic::Position, 0, Format::R32G32B32_FLOAT)],
            force_stride: false,
        }),
        optional: false,
    };

    const INDICES: DataMap = DataMap {
        tag: "INDICES",
        sources: &[Slot {
            stage: "DRAW",
            shader_type: None,
            slot_type: SlotType::IndexBuffer,
            slot_id: None,
        }],
        file_ext: Some("txt"),
        layout: Some(LayoutDesc {
            fields: &[FieldDesc::new(Semantic::Index, 0, Format::R16G16B16_UINT)],
            force_stride: false,
        }),
        optional: false,
    };

    const TEXTURE: DataMap = DataMap {
        tag: "TEXTURE",
        sources: &[Slot {
            stage: "DRAW",
            shader_type: Some(ShaderType::Pixel),
            slot_type: SlotType::Texture,
            slot_id: Some(0),
        }],
        file_ext: None,
        layout: None,
        optional: true,
    };

    fn write_dump(dir: &Path, files: &[(&str, &[u8])]) -> Dump {
        for (name, data) in files {
            std::fs::write(dir.join(name), data).unwrap();
        }
        std::fs::write(dir.join(LOG_FILE_NAME), "").unwrap();
        Dump::from_dir(dir).unwrap()
    }

    fn position_bytes(value: f32) -> Vec<u8> {
        [value, 0.0, 0.0].iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    #[test]
    fn collect_shared_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let position = position_bytes(1.0);
        let dump = write_dump(
            dir.path(),
            &[
                ("000001-vb0=0000aaaa-vs=a0a0-ps=b0b0.buf", position.as_slice()),
                ("000002-vb0=0000aaaa-vs=a0a0-ps=b0b0.buf", position.as_slice()),
                ("000002-ps-t0=0000cccc-vs=a0a0-ps=b0b0.dds", &[0u8; 4][..]),
            ],
        );

        let branches = resolve_call_branches(&dump, STAGES).unwrap();
        let collected = collect_resources(&branches, &[POSITION, TEXTURE]).unwrap();

        let calls = &collected["DRAW"].calls;
        assert_eq!(2, calls.len());
        assert_eq!(None, calls[0].get("TEXTURE").map(|r| r.descriptor.call_id));
        assert_eq!(Some(2), calls[1].get("TEXTURE").map(|r| r.descriptor.call_id));
        assert!(calls[1].get("TEXTURE").unwrap().data.is_none());

        let first = calls[0].get("POSITION").unwrap().data.clone().unwrap();
        let second = calls[1].get("POSITION").unwrap().data.clone().unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(
            vec![1.0, 0.0, 0.0],
            calls[0]
                .buffer("POSITION")
                .unwrap()
                .values(&Semantic::Position.into())
                .unwrap()
        );
    }

    #[test]
    fn collect_text_index_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let dump = write_dump(
            dir.path(),
            &[
                ("000001-vb0=0000aaaa-vs=a0a0-ps=b0b0.buf", position_bytes(1.0).as_slice()),
                // The binary dump is truncated.
                ("000001-ib=0000bbbb-vs=a0a0-ps=b0b0.buf", &[0u8; 6][..]),
                (
                    "000001-ib=0000bbbb-vs=a0a0-ps=b0b0.txt",
                    indoc! {"
                        byte offset: 0
                        first index: 0
                        index count: 6
                        topology: trianglelist
                        format: DXGI_FORMAT_R16_UINT

                        4 5 6
                        6 5 7
                    "}
                    .as_bytes(),
                ),
            ],
        );

        let branches = resolve_call_branches(&dump, STAGES).unwrap();
        let collected = collect_resources(&branches, &[INDICES]).unwrap();

        let call = &collected["DRAW"].calls[0];
        let indices = call.index_buffer("INDICES").unwrap();
        assert_eq!(&[[4, 5, 6], [6, 5, 7]], indices.faces());
        assert_eq!(Some((4, 4)), indices.vertex_range());
        assert_eq!("0000bbbb", call.hash("INDICES").unwrap().as_str());
        assert!(matches!(
            call.buffer("INDICES"),
            Err(ExtractError::MissingResourceData { call_id: 1, .. })
        ));
    }

    #[test]
    fn collect_missing_resource() {
        let dir = tempfile::tempdir().unwrap();
        let dump = write_dump(
            dir.path(),
            &[("000003-vb0=0000aaaa-vs=a0a0-ps=b0b0.buf", position_bytes(0.5).as_slice())],
        );

        let branches = resolve_call_branches(&dump, STAGES).unwrap();
        let result = collect_resources(&branches, &[POSITION, INDICES]);
        match result {
            Err(ExtractError::ResourceNotFound {
                tag,
                stage,
                call_id,
            }) => {
                assert_eq!("INDICES", tag);
                assert_eq!("DRAW", stage);
                assert_eq!(3, call_id);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn layout_desc_stride() {
        let layout = LayoutDesc {
            fields: &[FieldDesc::new(Semantic::RawData, 0, Format::R32_FLOAT).with_stride(48)],
            force_stride: true,
        }
        .to_layout();
        assert_eq!(48, layout.stride());
        assert!(layout.is_stride_forced());
        assert_eq!(12, layout.semantics()[0].value_count());
    }
}
