//! Declarative queries over keyed collections of descriptors.
//!
//! A [Filter] selects entries from one or more sources by key and by attribute values.
//! Sources can be other filters, which are evaluated first.
//!
//! ```rust no_run
//! # use migoto_model::filter::{Filter, Source, Value};
//! # use migoto_lib::filename::{ResourceDescriptor, ShaderType, SlotType};
//! # fn test(resources: indexmap::IndexMap<&str, &ResourceDescriptor>) -> Result<(), Box<dyn std::error::Error>> {
//! // Compute shader UAVs with any hash other than "00000000".
//! let filter = Filter::new(vec![Source::Entries(resources)])
//!     .with_attribute("shaders:type", [ShaderType::Compute.into()])?
//!     .with_attribute("slot_type", [SlotType::Uav.into()])?
//!     .with_attribute("!hash", [Value::from("00000000")])?;
//! let uavs = filter.evaluate();
//! # Ok(())
//! # }
//! ```
use std::hash::Hash;

use indexmap::IndexMap;
use migoto_lib::filename::{ResourceDescriptor, ShaderRef, ShaderType, SlotType};
use smol_str::SmolStr;
use strum::EnumString;

use crate::error::FilterError;

/// Prefix for attribute paths that select values not in the allowed values.
const EXCLUDE: char = '!';

/// Inner attribute name that matches the key of a collection element.
const COLLECTION_KEY: &str = "__key__";

/// How to combine multiple subsets of entries.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Condition {
    /// Keep entries present in every subset.
    #[default]
    And,
    /// Keep entries present in any subset.
    Or,
}

/// The value of an attribute used for comparisons.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Value {
    /// The attribute exists but has no value.
    None,
    Int(u32),
    Str(SmolStr),
    Shader(ShaderType),
    Slot(SlotType),
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<SmolStr> for Value {
    fn from(value: SmolStr) -> Self {
        Self::Str(value)
    }
}

impl From<ShaderType> for Value {
    fn from(value: ShaderType) -> Self {
        Self::Shader(value)
    }
}

impl From<SlotType> for Value {
    fn from(value: SlotType) -> Self {
        Self::Slot(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::None)
    }
}

/// An attribute of a descriptor that can be compared in a filter.
#[derive(Debug, PartialEq, Eq, Clone, Copy, EnumString, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Attribute {
    CallId,
    Ext,
    SlotType,
    SlotId,
    SlotShaderType,
    Hash,
    OldHash,
    #[strum(serialize = "type")]
    ShaderType,
}

/// A nested collection of a descriptor.
#[derive(Debug, PartialEq, Eq, Clone, Copy, EnumString, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Collection {
    Shaders,
}

/// Typed attribute access for filtered entries.
pub trait FilterEntry {
    /// The value of `attribute` or `None` if this type has no such attribute.
    fn attribute(&self, attribute: Attribute) -> Option<Value>;

    /// The keyed elements of `collection` or `None` if this type has no such collection.
    fn collection(&self, collection: Collection) -> Option<Vec<(Value, &dyn FilterEntry)>>;
}

impl FilterEntry for ResourceDescriptor {
    fn attribute(&self, attribute: Attribute) -> Option<Value> {
        match attribute {
            Attribute::CallId => Some(self.call_id.into()),
            Attribute::Ext => Some(self.ext.clone().into()),
            Attribute::SlotType => Some(self.slot_type.into()),
            Attribute::SlotId => Some(self.slot_id.into()),
            Attribute::SlotShaderType => Some(self.slot_shader_type.into()),
            Attribute::Hash => Some(self.hash.clone().into()),
            Attribute::OldHash => Some(self.old_hash.clone().into()),
            Attribute::ShaderType => None,
        }
    }

    fn collection(&self, collection: Collection) -> Option<Vec<(Value, &dyn FilterEntry)>> {
        match collection {
            Collection::Shaders => Some(
                self.shaders
                    .iter()
                    .enumerate()
                    .map(|(i, s)| (Value::Int(i as u32), s as &dyn FilterEntry))
                    .collect(),
            ),
        }
    }
}

impl FilterEntry for ShaderRef {
    fn attribute(&self, attribute: Attribute) -> Option<Value> {
        match attribute {
            Attribute::ShaderType => Some(self.shader_type.into()),
            Attribute::Hash => Some(self.hash.clone().into()),
            _ => None,
        }
    }

    fn collection(&self, _collection: Collection) -> Option<Vec<(Value, &dyn FilterEntry)>> {
        None
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
enum AttributePath {
    Attribute(Attribute),
    Collection(Collection, CollectionPath),
}

#[derive(Debug, PartialEq, Clone, Copy)]
enum CollectionPath {
    Attribute(Attribute),
    Key,
}

/// A single attribute predicate like `!hash` or `shaders:type`.
#[derive(Debug, PartialEq, Clone)]
struct AttributeFilter {
    path: AttributePath,
    exclude: bool,
    values: Vec<Value>,
}

impl AttributeFilter {
    fn parse(path: &str, values: Vec<Value>) -> Result<Self, FilterError> {
        let invalid = |reason: &str| FilterError::InvalidFilter(format!("{path:?} {reason}"));

        let path = path.trim();
        if path.is_empty() {
            return Err(invalid("has no attribute name"));
        }

        match path.split(':').collect::<Vec<_>>().as_slice() {
            [name] => {
                let (name, exclude) = strip_exclude(name);
                let attribute = name
                    .parse()
                    .map_err(|_| invalid("is not a known attribute"))?;
                Ok(Self {
                    path: AttributePath::Attribute(attribute),
                    exclude,
                    values,
                })
            }
            [collection, name] => {
                let collection = collection
                    .parse()
                    .map_err(|_| invalid("is not a known collection"))?;
                let (name, exclude) = strip_exclude(name);
                let inner = if name == COLLECTION_KEY {
                    CollectionPath::Key
                } else {
                    CollectionPath::Attribute(
                        name.parse()
                            .map_err(|_| invalid("is not a known attribute"))?,
                    )
                };
                Ok(Self {
                    path: AttributePath::Collection(collection, inner),
                    exclude,
                    values,
                })
            }
            _ => Err(invalid("has more than one collection separator")),
        }
    }

    /// Check that the attributes in the path exist for `entry`.
    fn validate<T: FilterEntry + ?Sized>(&self, entry: &T) -> Result<(), FilterError> {
        match self.path {
            AttributePath::Attribute(attribute) => {
                if entry.attribute(attribute).is_none() {
                    return Err(FilterError::InvalidFilter(format!(
                        "entry has no {attribute:?} attribute"
                    )));
                }
            }
            AttributePath::Collection(collection, inner) => {
                let elements = entry.collection(collection).ok_or_else(|| {
                    FilterError::InvalidFilter(format!("entry has no {collection:?} collection"))
                })?;
                if let (CollectionPath::Attribute(attribute), Some((_, element))) =
                    (inner, elements.first())
                {
                    if element.attribute(attribute).is_none() {
                        return Err(FilterError::InvalidFilter(format!(
                            "{collection:?} element has no {attribute:?} attribute"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn is_allowed(&self, value: &Value) -> bool {
        self.values.contains(value) != self.exclude
    }

    fn matches<T: FilterEntry + ?Sized>(&self, entry: &T) -> bool {
        match self.path {
            AttributePath::Attribute(attribute) => entry
                .attribute(attribute)
                .is_some_and(|v| self.is_allowed(&v)),
            AttributePath::Collection(collection, inner) => entry
                .collection(collection)
                .unwrap_or_default()
                .iter()
                .any(|(key, element)| match inner {
                    CollectionPath::Key => self.is_allowed(key),
                    CollectionPath::Attribute(attribute) => element
                        .attribute(attribute)
                        .is_some_and(|v| self.is_allowed(&v)),
                }),
        }
    }
}

fn strip_exclude(name: &str) -> (&str, bool) {
    match name.strip_prefix(EXCLUDE) {
        Some(name) => (name, true),
        None => (name, false),
    }
}

/// The entries to filter.
pub enum Source<'a, K, T> {
    Entries(IndexMap<K, &'a T>),
    Filter(Box<Filter<'a, K, T>>),
}

/// A query selecting entries from [Source] collections.
pub struct Filter<'a, K, T> {
    condition: Condition,
    keys: Option<Vec<K>>,
    attributes_condition: Condition,
    attributes: Vec<AttributeFilter>,
    sources_condition: Condition,
    sources: Vec<Source<'a, K, T>>,
}

impl<'a, K, T> Filter<'a, K, T>
where
    K: Hash + Eq + Clone,
    T: FilterEntry,
{
    /// Select all entries of the intersection of `sources`.
    pub fn new(sources: Vec<Source<'a, K, T>>) -> Self {
        Self {
            condition: Condition::And,
            keys: None,
            attributes_condition: Condition::And,
            attributes: Vec::new(),
            sources_condition: Condition::And,
            sources,
        }
    }

    /// How to combine the key and attribute selections.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    /// How to combine the selections of each attribute predicate.
    pub fn with_attributes_condition(mut self, condition: Condition) -> Self {
        self.attributes_condition = condition;
        self
    }

    /// How to combine the entries of each source.
    pub fn with_sources_condition(mut self, condition: Condition) -> Self {
        self.sources_condition = condition;
        self
    }

    /// Select entries with one of `keys`.
    pub fn with_keys<I: IntoIterator<Item = K>>(mut self, keys: I) -> Self {
        self.keys = Some(keys.into_iter().collect());
        self
    }

    /// Select entries whose attribute at `path` is one of `values`.
    ///
    /// Paths have the form `attribute`, `collection:attribute`, or `collection:__key__`.
    /// A `!` prefix on the attribute selects values not in `values` instead.
    /// The path is checked against the first entry of each source.
    pub fn with_attribute<I: IntoIterator<Item = Value>>(
        mut self,
        path: &str,
        values: I,
    ) -> Result<Self, FilterError> {
        let attribute = AttributeFilter::parse(path, values.into_iter().collect())?;
        for source in &self.sources {
            if let Some(entry) = source.representative() {
                attribute.validate(entry)?;
            }
        }
        self.attributes.push(attribute);
        Ok(self)
    }

    /// Evaluate the filter and any nested filters.
    pub fn evaluate(&self) -> IndexMap<K, &'a T> {
        let sources = self.sources.iter().map(|s| match s {
            Source::Entries(entries) => entries.clone(),
            Source::Filter(filter) => filter.evaluate(),
        });
        let entries = combine(self.sources_condition, sources);

        let key_selection = self.keys.as_ref().map(|keys| {
            keys.iter()
                .filter_map(|k| entries.get_key_value(k))
                .map(|(k, v)| (k.clone(), *v))
                .collect::<IndexMap<_, _>>()
        });

        let attribute_selection = (!self.attributes.is_empty()).then(|| {
            let selections = self.attributes.iter().map(|attribute| {
                entries
                    .iter()
                    .filter(|(_, entry)| attribute.matches(**entry))
                    .map(|(k, v)| (k.clone(), *v))
                    .collect::<IndexMap<_, _>>()
            });
            combine(self.attributes_condition, selections)
        });

        match (key_selection, attribute_selection) {
            (None, None) => entries,
            (Some(selection), None) | (None, Some(selection)) => selection,
            (Some(keys), Some(attributes)) => combine(self.condition, [keys, attributes]),
        }
    }
}

impl<'a, K, T> Source<'a, K, T> {
    /// The first entry of the first non empty literal source.
    fn representative(&self) -> Option<&'a T> {
        match self {
            Source::Entries(entries) => entries.values().next().copied(),
            Source::Filter(filter) => filter.sources.iter().find_map(|s| s.representative()),
        }
    }
}

/// Combine maps while preserving the order of the first map.
fn combine<K, V, I>(condition: Condition, maps: I) -> IndexMap<K, V>
where
    K: Hash + Eq,
    I: IntoIterator<Item = IndexMap<K, V>>,
{
    let mut maps = maps.into_iter();
    let Some(mut result) = maps.next() else {
        return IndexMap::new();
    };
    for map in maps {
        match condition {
            Condition::And => result.retain(|k, _| map.contains_key(k)),
            Condition::Or => {
                for (k, v) in map {
                    result.entry(k).or_insert(v);
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn resources() -> Vec<ResourceDescriptor> {
        [
            "000001-cs-u0=aaaa0001-cs=c0c0.buf",
            "000001-cs-t0=aaaa0002-cs=c0c0.buf",
            "000002-vb0=aaaa0001-vs=a0a0-ps=b0b0.buf",
            "000002-vb1=aaaa0003-vs=a0a0-ps=b0b0.buf",
            "000002-ps-t0=aaaa0004-vs=a0a0-ps=b0b0.dds",
        ]
        .iter()
        .map(|n| ResourceDescriptor::new(*n).unwrap())
        .collect()
    }

    fn entries(resources: &[ResourceDescriptor]) -> IndexMap<&str, &ResourceDescriptor> {
        resources.iter().map(|r| (r.name.as_str(), r)).collect()
    }

    fn call_ids(result: &IndexMap<&str, &ResourceDescriptor>) -> Vec<(u32, String)> {
        result.values().map(|r| (r.call_id, r.slot())).collect()
    }

    #[test]
    fn filter_all_entries() {
        let resources = resources();
        let filter = Filter::new(vec![Source::Entries(entries(&resources))]);
        assert_eq!(5, filter.evaluate().len());
    }

    #[test]
    fn filter_attributes_and() {
        let resources = resources();
        let filter = Filter::new(vec![Source::Entries(entries(&resources))])
            .with_attribute("shaders:type", [ShaderType::Vertex.into()])
            .unwrap()
            .with_attribute("slot_type", [SlotType::VertexBuffer.into()])
            .unwrap()
            .with_attribute("slot_id", [Value::Int(1)])
            .unwrap();
        assert_eq!(vec![(2, "null-vb1".to_string())], call_ids(&filter.evaluate()));
    }

    #[test]
    fn filter_attributes_or() {
        let resources = resources();
        let filter = Filter::new(vec![Source::Entries(entries(&resources))])
            .with_attributes_condition(Condition::Or)
            .with_attribute("slot_shader_type", [ShaderType::Compute.into()])
            .unwrap()
            .with_attribute("ext", ["dds".into()])
            .unwrap();
        assert_eq!(
            vec![
                (1, "cs-u0".to_string()),
                (1, "cs-t0".to_string()),
                (2, "ps-t0".to_string())
            ],
            call_ids(&filter.evaluate())
        );
    }

    #[test]
    fn filter_excluded_values() {
        let resources = resources();
        let filter = Filter::new(vec![Source::Entries(entries(&resources))])
            .with_attribute("!hash", [Value::from("aaaa0001"), Value::from("aaaa0004")])
            .unwrap();
        assert_eq!(
            vec![(1, "cs-t0".to_string()), (2, "null-vb1".to_string())],
            call_ids(&filter.evaluate())
        );
    }

    #[test]
    fn filter_collection_excluded_values() {
        let resources = resources();
        // Any shader that isn't a vertex shader.
        let filter = Filter::new(vec![Source::Entries(entries(&resources))])
            .with_attribute("shaders:!type", [ShaderType::Vertex.into()])
            .unwrap();
        assert_eq!(5, filter.evaluate().len());

        let filter = Filter::new(vec![Source::Entries(entries(&resources))])
            .with_attribute("shaders:!type", [ShaderType::Vertex.into(), ShaderType::Pixel.into()])
            .unwrap();
        assert_eq!(2, filter.evaluate().len());
    }

    #[test]
    fn filter_collection_key() {
        let resources = resources();
        let filter = Filter::new(vec![Source::Entries(entries(&resources))])
            .with_attribute("shaders:__key__", [Value::Int(1)])
            .unwrap();
        assert_eq!(
            vec![2, 2, 2],
            filter.evaluate().values().map(|r| r.call_id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn filter_keys_and_attributes() {
        let resources = resources();
        let names: Vec<_> = resources.iter().map(|r| r.name.as_str()).collect();

        let filter = Filter::new(vec![Source::Entries(entries(&resources))])
            .with_keys([names[0], names[2]])
            .with_attribute("hash", ["aaaa0001".into()])
            .unwrap();
        assert_eq!(2, filter.evaluate().len());

        let filter = Filter::new(vec![Source::Entries(entries(&resources))])
            .with_keys([names[0], names[3]])
            .with_attribute("hash", ["aaaa0001".into()])
            .unwrap();
        assert_eq!(vec![names[0]], filter.evaluate().keys().copied().collect::<Vec<_>>());

        let filter = Filter::new(vec![Source::Entries(entries(&resources))])
            .with_condition(Condition::Or)
            .with_keys([names[3]])
            .with_attribute("hash", ["aaaa0001".into()])
            .unwrap();
        assert_eq!(
            vec![names[3], names[0], names[2]],
            filter.evaluate().keys().copied().collect::<Vec<_>>()
        );
    }

    #[test]
    fn filter_nested_sources() {
        let resources = resources();
        let compute = Filter::new(vec![Source::Entries(entries(&resources))])
            .with_attribute("slot_shader_type", [ShaderType::Compute.into()])
            .unwrap();
        let first_slot = Filter::new(vec![Source::Entries(entries(&resources))])
            .with_attribute("slot_id", [Value::Int(0)])
            .unwrap();

        let filter = Filter::new(vec![
            Source::Filter(Box::new(compute)),
            Source::Filter(Box::new(first_slot)),
        ])
        .with_attribute("hash", ["aaaa0001".into()])
        .unwrap();
        assert_eq!(vec![(1, "cs-u0".to_string())], call_ids(&filter.evaluate()));
    }

    #[test]
    fn filter_sources_or() {
        let resources = resources();
        let (first, second) = resources.split_at(2);
        let filter = Filter::new(vec![
            Source::Entries(entries(first)),
            Source::Entries(entries(second)),
        ])
        .with_sources_condition(Condition::Or);
        assert_eq!(5, filter.evaluate().len());

        let filter = Filter::new(vec![
            Source::Entries(entries(first)),
            Source::Entries(entries(second)),
        ]);
        assert!(filter.evaluate().is_empty());
    }

    #[test]
    fn filter_invalid_attributes() {
        let resources = resources();
        let filter = || Filter::new(vec![Source::Entries(entries(&resources))]);

        for path in [
            "",
            "slot",
            "type",
            "shaders:slot_id",
            "shaders:type:hash",
            "textures:hash",
        ] {
            assert!(
                matches!(
                    filter().with_attribute(path, [Value::None]),
                    Err(FilterError::InvalidFilter(_))
                ),
                "{path}"
            );
        }
    }

    #[test]
    fn filter_invalid_nested_attribute() {
        let resources = resources();
        let nested = Filter::new(vec![Source::Entries(entries(&resources))]);
        assert!(matches!(
            Filter::new(vec![Source::Filter(Box::new(nested))]).with_attribute("type", [Value::None]),
            Err(FilterError::InvalidFilter(_))
        ));
    }
}
