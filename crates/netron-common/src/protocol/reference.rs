//! Definition and reference records.
//!
//! A [`Definition`] names a remotely-invocable object on the exposing side.
//! A [`Reference`] is the wire-level pointer substituted for a definition (or
//! a live proxy of one) when it crosses the boundary as a value; it carries
//! identity only, never data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifier of one remotely-exposed object, unique within the peer that
/// created it for the lifetime of that peer process.
pub type DefinitionId = u64;

/// Metadata for one public method of a context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MethodMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// Metadata for one public property of a context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PropertyMeta {
    #[serde(default)]
    pub readonly: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
}

/// Normalized public-member map of a context: member name to metadata, split
/// by access kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PublicMembers {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub methods: BTreeMap<String, MethodMeta>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyMeta>,
}

impl PublicMembers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a method member.
    pub fn method(mut self, name: impl Into<String>) -> Self {
        self.methods.insert(name.into(), MethodMeta::default());
        self
    }

    /// Declares a method member with full metadata.
    pub fn method_with(mut self, name: impl Into<String>, meta: MethodMeta) -> Self {
        self.methods.insert(name.into(), meta);
        self
    }

    /// Declares a property member.
    pub fn property(mut self, name: impl Into<String>, readonly: bool) -> Self {
        self.properties.insert(
            name.into(),
            PropertyMeta {
                readonly,
                ..PropertyMeta::default()
            },
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.properties.is_empty()
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn property_meta(&self, name: &str) -> Option<&PropertyMeta> {
        self.properties.get(name)
    }
}

/// Descriptor naming one remotely-invocable context instance.
///
/// Equality is by `id` alone; the remaining fields describe the invocable
/// surface for proxy generation on the consuming side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definition {
    pub id: DefinitionId,
    /// Definition id of the exposing peer's own root, or `None` for a
    /// context attached at the origin netron itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<DefinitionId>,
    /// Context name, unique within the exposing peer's namespace.
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub public: PublicMembers,
}

impl Definition {
    pub fn new(
        id: DefinitionId,
        name: impl Into<String>,
        description: impl Into<String>,
        public: PublicMembers,
    ) -> Self {
        Self {
            id,
            parent_id: None,
            name: name.into(),
            description: description.into(),
            public,
        }
    }
}

impl PartialEq for Definition {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Definition {}

/// Wire-level pointer to a definition the receiving peer already knows, or
/// learns from a bundled [`Definition`] in the same packet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reference {
    pub def_id: DefinitionId,
}

impl Reference {
    pub fn new(def_id: DefinitionId) -> Self {
        Self { def_id }
    }
}
