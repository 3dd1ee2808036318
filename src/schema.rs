//! Schemas: descriptions of typed configuration sections from which a
//! default tree and helper texts are derived.
//!
//! Two adapters implement [`Schema`]:
//!
//! - [`ConfiqueSchema<C>`] reads the metadata of any `#[derive(confique::Config)]`
//!   struct: `#[config(default = ...)]` gives defaults, non-`Option` fields
//!   without a default are mandatory, `///` doc comments become helpers;
//! - hand-written impls list their [`FieldInfo`]s directly.
//!
//! ```ignore
//! struct Server;
//! impl Schema for Server {
//!     type Target = ServerSettings;
//!     fn fields() -> Vec<FieldInfo> {
//!         vec![
//!             FieldInfo::with_default("host", "localhost").describe("Bind address"),
//!             FieldInfo::required("token"),
//!         ]
//!     }
//! }
//! ```

use std::marker::PhantomData;

use confique::meta::{Field, FieldKind as MetaKind, LeafKind, Meta};

use crate::tree::{self, Mapping, Node};

/// A typed configuration section.
pub trait Schema {
    /// The type extracted from the tree (used for type-keyed lookups).
    type Target: 'static;

    fn fields() -> Vec<FieldInfo>;
}

/// One field of a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub description: Option<String>,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Leaf { default: Option<Node>, required: bool },
    Nested(Vec<FieldInfo>),
}

impl FieldInfo {
    /// A field with a default value.
    pub fn with_default(name: impl Into<String>, default: impl Into<Node>) -> Self {
        Self::leaf(name, Some(default.into()), true)
    }

    /// A field that must be supplied by some source.
    pub fn required(name: impl Into<String>) -> Self {
        Self::leaf(name, None, true)
    }

    /// A field that may be left unset (null).
    pub fn optional(name: impl Into<String>) -> Self {
        Self::leaf(name, None, false)
    }

    pub fn nested(name: impl Into<String>, fields: Vec<FieldInfo>) -> Self {
        Self {
            name: name.into(),
            description: None,
            kind: FieldKind::Nested(fields),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn leaf(name: impl Into<String>, default: Option<Node>, required: bool) -> Self {
        Self {
            name: name.into(),
            description: None,
            kind: FieldKind::Leaf { default, required },
        }
    }
}

/// [`Schema`] adapter for confique config structs.
pub struct ConfiqueSchema<C>(PhantomData<C>);

impl<C: confique::Config + 'static> Schema for ConfiqueSchema<C> {
    type Target = C;

    fn fields() -> Vec<FieldInfo> {
        meta_fields(&C::META)
    }
}

fn meta_fields(meta: &Meta) -> Vec<FieldInfo> {
    meta.fields.iter().map(meta_field).collect()
}

fn meta_field(field: &Field) -> FieldInfo {
    let info = match &field.kind {
        MetaKind::Nested { meta, .. } => FieldInfo::nested(field.name, meta_fields(meta)),
        MetaKind::Leaf { kind, .. } => {
            if let LeafKind::Required { default, .. } = kind {
                let default = default
                    .as_ref()
                    .and_then(|expr| serde_json::to_value(expr).ok())
                    .map(Node::from);
                FieldInfo::leaf(field.name, default, true)
            } else {
                FieldInfo::optional(field.name)
            }
        }
    };
    let doc = field
        .doc
        .iter()
        .map(|line| line.trim())
        .collect::<Vec<_>>()
        .join(" ");
    if doc.is_empty() { info } else { info.describe(doc) }
}

/// Derive the default tree and the helpers of a schema.
///
/// Defaults become values, required fields without one become
/// [`Node::Mandatory`], optional fields become null. Helpers are keyed by the
/// field's full path.
pub fn default_tree(fields: &[FieldInfo]) -> (Node, Vec<(String, String)>) {
    let mut helpers = Vec::new();
    let tree = build(fields, "", &mut helpers);
    (tree, helpers)
}

fn build(fields: &[FieldInfo], prefix: &str, helpers: &mut Vec<(String, String)>) -> Node {
    let mut map = Mapping::new();
    for field in fields {
        let path = tree::child_key_path(prefix, &field.name);
        if let Some(description) = &field.description {
            helpers.push((path.clone(), description.clone()));
        }
        let value = match &field.kind {
            FieldKind::Nested(children) => build(children, &path, helpers),
            FieldKind::Leaf {
                default: Some(default),
                ..
            } => default.clone(),
            FieldKind::Leaf {
                default: None,
                required: true,
            } => Node::Mandatory,
            FieldKind::Leaf {
                default: None,
                required: false,
            } => Node::Null,
        };
        map.insert(field.name.clone(), value);
    }
    Node::Mapping(map)
}
