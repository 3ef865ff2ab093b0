//! SS-002: Deferred values and the output registry.
//!
//! An [`Output`] is a value that may only be known once an upstream resource
//! exists: a literal, a reference to another resource's attribute, or a
//! continuation applied to one of those. Declarations build `Output`s; the
//! executor resolves them once the referenced attributes are in the store.

use super::types::Attributes;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Attributes of every created resource, keyed by logical id.
pub type AttributeStore = HashMap<String, Attributes>;

type Render = Arc<dyn Fn(&str) -> Result<String, String> + Send + Sync>;

/// A possibly-deferred string value.
#[derive(Clone)]
pub enum Output {
    /// Known at declaration time
    Known(String),
    /// An attribute of another resource, known after it is created
    Ref { resource: String, attribute: String },
    /// A computation that runs once `source` resolves
    Apply { source: Box<Output>, render: Render },
}

impl Output {
    pub fn known(value: impl Into<String>) -> Self {
        Self::Known(value.into())
    }

    pub fn reference(resource: &str, attribute: &str) -> Self {
        Self::Ref {
            resource: resource.to_string(),
            attribute: attribute.to_string(),
        }
    }

    /// Register a continuation on this value.
    pub fn apply<F>(self, f: F) -> Self
    where
        F: Fn(&str) -> Result<String, String> + Send + Sync + 'static,
    {
        Self::Apply {
            source: Box::new(self),
            render: Arc::new(f),
        }
    }

    /// Logical ids of the resources this value waits on.
    pub fn dependencies(&self) -> Vec<String> {
        match self {
            Self::Known(_) => Vec::new(),
            Self::Ref { resource, .. } => vec![resource.clone()],
            Self::Apply { source, .. } => source.dependencies(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.dependencies().is_empty()
    }

    /// Resolve against created resources. A referenced attribute that is
    /// missing or empty is an error: nothing downstream runs on a blank value.
    pub fn resolve(&self, store: &AttributeStore) -> Result<String, String> {
        match self {
            Self::Known(v) => Ok(v.clone()),
            Self::Ref {
                resource,
                attribute,
            } => {
                let value = store
                    .get(resource)
                    .and_then(|attrs| attrs.get(attribute))
                    .ok_or_else(|| format!("unresolved reference ${{{}.{}}}", resource, attribute))?;
                if value.trim().is_empty() {
                    return Err(format!("reference ${{{}.{}}} is empty", resource, attribute));
                }
                Ok(value.clone())
            }
            Self::Apply { source, render } => {
                let input = source.resolve(store)?;
                render(&input)
            }
        }
    }

    /// Render with `${resource.attribute}` placeholders in place of unknowns.
    pub fn preview(&self) -> Result<String, String> {
        match self {
            Self::Known(v) => Ok(v.clone()),
            Self::Ref {
                resource,
                attribute,
            } => Ok(format!("${{{}.{}}}", resource, attribute)),
            Self::Apply { source, render } => render(&source.preview()?),
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(v) => f.debug_tuple("Known").field(v).finish(),
            Self::Ref {
                resource,
                attribute,
            } => write!(f, "Ref(${{{}.{}}})", resource, attribute),
            Self::Apply { source, .. } => f.debug_struct("Apply").field("source", source).finish(),
        }
    }
}

impl From<&str> for Output {
    fn from(value: &str) -> Self {
        Self::known(value)
    }
}

impl From<String> for Output {
    fn from(value: String) -> Self {
        Self::Known(value)
    }
}

/// Handle to a declared resource, exposing its deferred attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub id: String,
}

impl ResourceRef {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }

    pub fn id(&self) -> Output {
        Output::reference(&self.id, "id")
    }

    pub fn name(&self) -> Output {
        Output::reference(&self.id, "name")
    }

    pub fn arn(&self) -> Output {
        Output::reference(&self.id, "arn")
    }
}

/// Explicit registry of deployment exports. Each key is written once.
#[derive(Debug, Clone, Default)]
pub struct OutputSink {
    entries: IndexMap<String, Output>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export(&mut self, key: &str, value: Output) -> Result<(), String> {
        if self.entries.contains_key(key) {
            return Err(format!("output '{}' exported twice", key));
        }
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Output> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Output)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve every export. Unresolvable exports are returned separately.
    pub fn resolve_all(&self, store: &AttributeStore) -> (IndexMap<String, String>, Vec<String>) {
        let mut resolved = IndexMap::new();
        let mut errors = Vec::new();
        for (key, value) in &self.entries {
            match value.resolve(store) {
                Ok(v) => {
                    resolved.insert(key.clone(), v);
                }
                Err(e) => errors.push(format!("output '{}': {}", key, e)),
            }
        }
        (resolved, errors)
    }
}
