//! Resolve producer and consumer relationships between the calls of a frame dump.
//!
//! Each [Stage] describes the calls of a single shader and the slots connecting it to other stages.
//! Root stages have no inputs or an output slot connected to the stage itself.
//! The calls of a consuming stage read a resource with the same hash as an output of the producing call.
//! Consuming calls always happen after the producing call.
use ahash::AHashMap;
use indexmap::IndexMap;
use log::info;
use migoto_lib::{
    dump::{CallDescriptor, Dump},
    filename::{ResourceDescriptor, ShaderType, SlotType},
};
use smol_str::SmolStr;

use crate::{
    error::{ExtractError, FilterError},
    filter::{Filter, Source, Value},
};

/// A slot connecting a stage to another stage.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Slot<'a> {
    /// The id of the stage on the other end of the connection.
    pub stage: &'a str,
    /// The shader stage prefix of the slot like `cs` in `cs-u0`.
    pub shader_type: Option<ShaderType>,
    pub slot_type: SlotType,
    pub slot_id: Option<u32>,
}

/// The calls of a single shader in the frame.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Stage<'a> {
    pub id: &'a str,
    pub shader_type: ShaderType,
    /// Slots reading resources written by other stages.
    pub inputs: &'a [Slot<'a>],
    /// Slots writing resources read by other stages.
    pub outputs: &'a [Slot<'a>],
}

/// The calls of a stage reachable from the calls of a parent branch.
#[derive(Debug, Clone)]
pub struct CallBranch<'d> {
    pub stage: SmolStr,
    /// Unique calls in the order they were found.
    pub calls: Vec<&'d CallDescriptor>,
    pub nested: Vec<CallBranch<'d>>,
}

impl<'d> CallBranch<'d> {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.into(),
            calls: Vec::new(),
            nested: Vec::new(),
        }
    }

    fn add_call(&mut self, call: &'d CallDescriptor) {
        if !self.calls.iter().any(|c| c.id == call.id) {
            self.calls.push(call);
        }
    }
}

/// Attributes selecting the resource bound to a single slot.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub(crate) struct SlotQuery<'a> {
    /// The stage of one of the shaders bound for the call.
    pub shader_type: Option<ShaderType>,
    pub slot_type: SlotType,
    pub slot_id: Option<u32>,
    pub slot_shader_type: Option<ShaderType>,
    pub ext: Option<&'a str>,
}

impl<'a> SlotQuery<'a> {
    fn new(shader_type: ShaderType, slot: &Slot) -> Self {
        Self {
            shader_type: Some(shader_type),
            slot_type: slot.slot_type,
            slot_id: slot.slot_id,
            slot_shader_type: slot.shader_type,
            ext: None,
        }
    }

    pub fn filter<'d>(
        &self,
        entries: IndexMap<&'d str, &'d ResourceDescriptor>,
    ) -> Result<Filter<'d, &'d str, ResourceDescriptor>, FilterError> {
        let mut filter = Filter::new(vec![Source::Entries(entries)])
            .with_attribute("slot_type", [self.slot_type.into()])?;
        if let Some(shader_type) = self.shader_type {
            filter = filter.with_attribute("shaders:type", [shader_type.into()])?;
        }
        if let Some(slot_id) = self.slot_id {
            filter = filter.with_attribute("slot_id", [slot_id.into()])?;
        }
        if let Some(slot_shader_type) = self.slot_shader_type {
            filter = filter.with_attribute("slot_shader_type", [slot_shader_type.into()])?;
        }
        if let Some(ext) = self.ext {
            filter = filter.with_attribute("ext", [ext.into()])?;
        }
        Ok(filter)
    }

    /// Find the single resource for this slot in `call` if present.
    pub fn find_in_call<'d>(
        &self,
        call: &'d CallDescriptor,
        stage: &str,
    ) -> Result<Option<&'d ResourceDescriptor>, ExtractError> {
        let entries = call
            .resources
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        let found = self.filter(entries)?.evaluate();
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.values().next().copied()),
            count => Err(ExtractError::AmbiguousResource {
                stage: stage.into(),
                slot: self.to_string(),
                call_id: call.id,
                count,
            }),
        }
    }
}

impl std::fmt::Display for SlotQuery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(shader_type) = self.slot_shader_type {
            write!(f, "{shader_type}-")?;
        }
        write!(f, "{}", self.slot_type)?;
        if let Some(slot_id) = self.slot_id {
            write!(f, "{slot_id}")?;
        }
        Ok(())
    }
}

/// A stage to resolve from the output resource of a parent call.
struct Node<'a, 'd> {
    stage: &'a Stage<'a>,
    parent_stage: &'a str,
    parent_resource: &'d ResourceDescriptor,
    calls: Vec<&'d CallDescriptor>,
    children: Vec<Child>,
}

/// The node resolved from the output of a single call for a single output slot.
struct Child {
    output: usize,
    call: usize,
    node: usize,
    /// The output hash was already found for a previous call.
    skip: bool,
}

/// Find the branches for each root stage of `stages`.
#[tracing::instrument(skip_all)]
pub fn resolve_call_branches<'d>(
    dump: &'d Dump,
    stages: &[Stage],
) -> Result<IndexMap<SmolStr, CallBranch<'d>>, ExtractError> {
    let mut resolver = CallResolver::new(dump, stages)?;
    let branches = resolver.resolve()?;
    info!(
        "Resolved {} call branches for stages {:?}",
        branches.len(),
        branches.keys().collect::<Vec<_>>()
    );
    Ok(branches)
}

struct CallResolver<'a, 'd> {
    dump: &'d Dump,
    stages: &'a [Stage<'a>],
    resources: IndexMap<&'d str, &'d ResourceDescriptor>,
    cache: AHashMap<SlotQuery<'a>, IndexMap<&'d str, &'d ResourceDescriptor>>,
}

impl<'a, 'd> CallResolver<'a, 'd> {
    fn new(dump: &'d Dump, stages: &'a [Stage<'a>]) -> Result<Self, ExtractError> {
        for stage in stages {
            for slot in stage.inputs.iter().chain(stage.outputs) {
                if !stages.iter().any(|s| s.id == slot.stage) {
                    return Err(ExtractError::InvalidConfiguration(format!(
                        "stage {} references unknown stage {}",
                        stage.id, slot.stage
                    )));
                }
            }
        }

        Ok(Self {
            dump,
            stages,
            resources: dump.resources().map(|r| (r.name.as_str(), r)).collect(),
            cache: AHashMap::new(),
        })
    }

    fn resolve(&mut self) -> Result<IndexMap<SmolStr, CallBranch<'d>>, ExtractError> {
        let mut branches = IndexMap::new();

        let stages = self.stages;
        let roots = stages
            .iter()
            .filter(|s| s.inputs.is_empty() || s.outputs.iter().any(|o| o.stage == s.id));

        for stage in roots {
            let mut branch = CallBranch::new(stage.id);

            for output in stage.outputs {
                let candidates = self.slot_resources(SlotQuery::new(stage.shader_type, output))?;

                let mut output_hashes = Vec::new();
                for &resource in candidates.values() {
                    let call = self.call(resource)?;

                    if output.stage == stage.id {
                        // Stages connected to themselves only find calls by their output slot.
                        // Calls also reading from a same stage input slot are rejected.
                        if !self.is_input_of_same_stage(stage, resource.call_id)? {
                            branch.add_call(call);
                        }
                        continue;
                    }

                    let Some(nested) = self.resolve_nested(stage, output.stage, resource)? else {
                        continue;
                    };

                    if output_hashes.contains(&resource.hash) {
                        branch.add_call(call);
                        continue;
                    }
                    output_hashes.push(resource.hash.clone());

                    branch.nested.extend(nested);
                    branch.add_call(call);
                }
            }

            branches.insert(SmolStr::from(stage.id), branch);
        }

        Ok(branches)
    }

    fn is_input_of_same_stage(
        &mut self,
        stage: &Stage,
        call_id: u32,
    ) -> Result<bool, ExtractError> {
        for input in stage.inputs.iter().filter(|i| i.stage == stage.id) {
            let candidates = self.slot_resources(SlotQuery::new(stage.shader_type, input))?;
            if candidates.values().any(|r| r.call_id == call_id) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Resolve the branches of `stage_id` reading the output `parent_resource` of `parent_stage`.
    /// Returns `None` if no calls of the stage or its nested stages are found.
    fn resolve_nested(
        &mut self,
        parent_stage: &Stage<'a>,
        stage_id: &str,
        parent_resource: &'d ResourceDescriptor,
    ) -> Result<Option<Vec<CallBranch<'d>>>, ExtractError> {
        let mut nodes = vec![Node {
            stage: self.stage(stage_id)?,
            parent_stage: parent_stage.id,
            parent_resource,
            calls: Vec::new(),
            children: Vec::new(),
        }];

        // Children are always added after their parent.
        let mut stack = vec![0];
        while let Some(index) = stack.pop() {
            let stage = nodes[index].stage;
            let calls = self.input_calls(
                stage,
                nodes[index].parent_stage,
                nodes[index].parent_resource,
            )?;
            if calls.is_empty() {
                continue;
            }

            for (o, output) in stage.outputs.iter().enumerate() {
                let child_stage = self.stage(output.stage)?;
                let query = SlotQuery::new(stage.shader_type, output);

                let mut output_hashes = Vec::new();
                for (c, &call) in calls.iter().enumerate() {
                    let Some(resource) = query.find_in_call(call, stage.id)? else {
                        continue;
                    };

                    let skip = output_hashes.contains(&resource.hash);
                    if !skip {
                        output_hashes.push(resource.hash.clone());
                    }

                    let child = nodes.len();
                    nodes.push(Node {
                        stage: child_stage,
                        parent_stage: stage.id,
                        parent_resource: resource,
                        calls: Vec::new(),
                        children: Vec::new(),
                    });
                    nodes[index].children.push(Child {
                        output: o,
                        call: c,
                        node: child,
                        skip,
                    });
                    stack.push(child);
                }
            }

            nodes[index].calls = calls;
        }

        Ok(reduce_nodes(&nodes))
    }

    /// Calls of `stage` after the parent call that read `parent_resource` from an input slot.
    fn input_calls(
        &mut self,
        stage: &Stage,
        parent_stage: &str,
        parent_resource: &'d ResourceDescriptor,
    ) -> Result<Vec<&'d CallDescriptor>, ExtractError> {
        let Some(input) = stage.inputs.iter().rev().find(|i| i.stage == parent_stage) else {
            return Ok(Vec::new());
        };
        if parent_resource.hash.is_none() {
            return Ok(Vec::new());
        }

        let candidates = self.slot_resources(SlotQuery::new(stage.shader_type, input))?;
        let candidates = Filter::new(vec![Source::Entries(candidates)])
            .with_attribute("!call_id", [parent_resource.call_id.into()])?
            .with_attribute("hash", [Value::from(parent_resource.hash.clone())])?
            .evaluate();

        let mut calls: Vec<&CallDescriptor> = Vec::new();
        for resource in candidates.values() {
            if resource.call_id < parent_resource.call_id {
                continue;
            }
            if calls.iter().any(|c| c.id == resource.call_id) {
                continue;
            }
            calls.push(self.call(resource)?);
        }
        Ok(calls)
    }

    /// All resources in the dump for the slot of a stage.
    fn slot_resources(
        &mut self,
        query: SlotQuery<'a>,
    ) -> Result<IndexMap<&'d str, &'d ResourceDescriptor>, ExtractError> {
        if let Some(resources) = self.cache.get(&query) {
            return Ok(resources.clone());
        }
        let resources = query.filter(self.resources.clone())?.evaluate();
        self.cache.insert(query, resources.clone());
        Ok(resources)
    }

    fn stage(&self, id: &str) -> Result<&'a Stage<'a>, ExtractError> {
        let stages = self.stages;
        stages
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| ExtractError::InvalidConfiguration(format!("unknown stage {id}")))
    }

    fn call(&self, resource: &ResourceDescriptor) -> Result<&'d CallDescriptor, ExtractError> {
        let dump = self.dump;
        dump.calls.get(&resource.call_id).ok_or_else(|| {
            ExtractError::InconsistentCapture(format!(
                "resource {} has no call {}",
                resource.name, resource.call_id
            ))
        })
    }
}

/// Combine the nodes from the leaves to the root.
fn reduce_nodes<'d>(nodes: &[Node<'_, 'd>]) -> Option<Vec<CallBranch<'d>>> {
    let mut results: Vec<Option<Vec<CallBranch<'d>>>> = (0..nodes.len()).map(|_| None).collect();

    for (index, node) in nodes.iter().enumerate().rev() {
        if node.calls.is_empty() {
            continue;
        }

        if node.stage.outputs.is_empty() {
            results[index] = Some(vec![CallBranch {
                stage: node.stage.id.into(),
                calls: node.calls.clone(),
                nested: Vec::new(),
            }]);
            continue;
        }

        let mut branches = Vec::new();
        for o in 0..node.stage.outputs.len() {
            let mut branch = CallBranch::new(node.stage.id);
            for child in node.children.iter().filter(|c| c.output == o) {
                let Some(nested) = results[child.node].take() else {
                    continue;
                };
                branch.add_call(node.calls[child.call]);
                if !child.skip {
                    branch.nested.extend(nested);
                }
            }
            if !branch.calls.is_empty() {
                branches.push(branch);
            }
        }

        if !branches.is_empty() {
            results[index] = Some(branches);
        }
    }

    results.into_iter().next().flatten()
}
