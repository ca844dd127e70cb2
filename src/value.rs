//! Export value graph
//!
//! The value graph a loader hands back for one file. Only three kinds
//! matter to the registry: instantiable types, plain keyed containers that
//! may hold types, and opaque data (ignored by extraction). Containers are
//! shared behind `Arc` so traversal can deduplicate by identity rather than
//! by value.

use std::fmt;
use std::sync::Arc;

use crate::arena::TypeHandle;

/// Opaque data carried by members and plain exports
pub type Value = serde_json::Value;

/// One node of an exported value graph
#[derive(Clone)]
pub enum ExportValue {
    /// An instantiable type definition
    Type(TypeHandle),
    /// A plain keyed container (not itself a type)
    Map(Arc<ExportMap>),
    /// Anything else; never traversed or recorded
    Data(Value),
}

impl ExportValue {
    /// Returns the type handle if this node is a type
    pub fn as_type(&self) -> Option<&TypeHandle> {
        match self {
            ExportValue::Type(handle) => Some(handle),
            _ => None,
        }
    }

    /// Identity key for traversal dedup, if this node has one
    pub(crate) fn identity(&self) -> Option<(usize, usize)> {
        match self {
            ExportValue::Type(handle) => Some(handle.identity()),
            ExportValue::Map(map) => Some((Arc::as_ptr(map) as usize, usize::MAX)),
            ExportValue::Data(_) => None,
        }
    }
}

impl fmt::Debug for ExportValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportValue::Type(handle) => write!(f, "Type({})", handle.name()),
            ExportValue::Map(map) => write!(f, "Map({} entries)", map.len()),
            ExportValue::Data(value) => write!(f, "Data({value})"),
        }
    }
}

/// A plain keyed container with a stable enumeration order
#[derive(Debug, Default)]
pub struct ExportMap {
    entries: Vec<(String, ExportValue)>,
}

impl ExportMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing any existing entry with the same key
    pub fn insert(&mut self, key: &str, value: ExportValue) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&ExportValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExportValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wrap into an export value
    pub fn into_value(self) -> ExportValue {
        ExportValue::Map(Arc::new(self))
    }
}
