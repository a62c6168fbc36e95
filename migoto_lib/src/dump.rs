//! Frame dump directories.
//!
//! A frame dump is a flat directory of resource files named by [ResourceDescriptor]
//! and a `log.txt` with the parameters of each call.
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::info;
use smol_str::SmolStr;

use crate::{
    error::LoadDumpError,
    filename::{ResourceDescriptor, ShaderRef},
    frame_log::{CallParameters, FrameLog},
};

pub const LOG_FILE_NAME: &str = "log.txt";

/// The resources and shaders used by a single draw or dispatch call.
#[derive(Debug, Clone)]
pub struct CallDescriptor {
    pub id: u32,
    pub parameters: CallParameters,
    /// Shader references by their unparsed text.
    pub shaders: IndexMap<SmolStr, ShaderRef>,
    /// Resources by their file name.
    pub resources: IndexMap<SmolStr, ResourceDescriptor>,
}

impl CallDescriptor {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            parameters: CallParameters::default(),
            shaders: IndexMap::new(),
            resources: IndexMap::new(),
        }
    }

    /// Add `resource` and the shaders it references.
    pub fn add_resource(&mut self, resource: ResourceDescriptor) -> Result<(), LoadDumpError> {
        if resource.call_id != self.id {
            return Err(LoadDumpError::CallIdMismatch {
                name: resource.name.to_string(),
                call_id: self.id,
            });
        }
        for shader in &resource.shaders {
            self.shaders
                .entry(shader.raw.clone())
                .or_insert_with(|| shader.clone());
        }
        self.resources.insert(resource.name.clone(), resource);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Dump {
    pub path: PathBuf,
    pub log: FrameLog,
    /// Calls in ascending order by call id.
    pub calls: IndexMap<u32, CallDescriptor>,
}

impl Dump {
    /// Parse every resource file name in `path` and the parameters in its `log.txt`.
    ///
    /// Subdirectories and text files are skipped.
    /// Text index buffers are only loaded on demand from the sibling of their binary resource.
    pub fn from_dir<P: AsRef<Path>>(path: P) -> Result<Self, LoadDumpError> {
        let path = path.as_ref();

        let log_path = path.join(LOG_FILE_NAME);
        if !log_path.is_file() {
            return Err(LoadDumpError::MissingLog(log_path));
        }
        let log = FrameLog::from_file(&log_path)?;

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let entry_path = entry.path();
            if entry_path.extension().and_then(|e| e.to_str()) == Some("txt") {
                continue;
            }
            paths.push(entry_path);
        }
        paths.sort();

        let mut calls = IndexMap::new();
        for resource_path in paths {
            let resource = ResourceDescriptor::new(resource_path)?;
            calls
                .entry(resource.call_id)
                .or_insert_with(|| CallDescriptor::new(resource.call_id))
                .add_resource(resource)?;
        }
        calls.sort_keys();

        for call in calls.values_mut() {
            if let Some(parameters) = log.parameters(call.id) {
                call.parameters = *parameters;
            }
        }

        let resource_count: usize = calls.values().map(|c| c.resources.len()).sum();
        info!(
            "Loaded {} calls with {} resources from {path:?}",
            calls.len(),
            resource_count
        );

        Ok(Self {
            path: path.to_owned(),
            log,
            calls,
        })
    }

    /// All resources of all calls in call order.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.calls.values().flat_map(|c| c.resources.values())
    }
}
