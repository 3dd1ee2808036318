//! The configuration tree: a nested mapping/sequence/scalar value that can also
//! hold deferred interpolation expressions and mandatory-value markers.
//!
//! Every source (defaults, files, env vars, CLI fragments) is converted into a
//! [`Node`] before merging. Ingestion rules:
//!
//! - the string `"???"` becomes [`Node::Mandatory`];
//! - a string containing `${` becomes [`Node::Deferred`];
//! - dotted keys (`"a.b"`) are expanded into nested mappings by
//!   [`normalize_keys`]. A dot escaped as `\.` stays part of the key.
//!
//! Paths use dots for mapping keys and `[n]` (or a bare number) for sequence
//! indices: `server.hosts[0].name`, `server.hosts.0.name`.

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::LayerfigError;
use crate::merge::deep_merge;

/// Literal used in sources to mark a value that must be supplied later.
pub const MANDATORY: &str = "???";

/// Ordered mapping with string keys.
pub type Mapping = IndexMap<String, Node>;

/// A configuration value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Node {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Sequence(Vec<Node>),
    Mapping(Mapping),
    /// An unevaluated interpolation string such as `"${server.host}:80"`.
    Deferred(String),
    /// No value yet; one must be supplied before the key is read.
    Mandatory,
}

impl Node {
    /// An empty mapping node.
    pub fn mapping() -> Node {
        Node::Mapping(Mapping::new())
    }

    /// Classify a raw string from a source: `"???"` is mandatory, anything
    /// holding `${` (escaped or not) is deferred, the rest is a plain string.
    /// Escaped `\${` sequences are unescaped when the node is resolved.
    pub fn from_text(s: impl Into<String>) -> Node {
        let s = s.into();
        if s == MANDATORY {
            Node::Mandatory
        } else if s.contains("${") {
            Node::Deferred(s)
        } else {
            Node::String(s)
        }
    }

    /// Build a tree from any serializable value (e.g. a schema instance).
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Node, serde_json::Error> {
        serde_json::to_value(value).map(Node::from)
    }

    /// Parse YAML text (flow or block) into a tree.
    pub fn parse_yaml(text: &str) -> Result<Node, serde_yaml::Error> {
        serde_yaml::from_str::<serde_yaml::Value>(text).map(Node::from)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    pub fn is_mandatory(&self) -> bool {
        matches!(self, Node::Mandatory)
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Node::Deferred(_))
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, Node::Mapping(_))
    }

    /// Whether the node is a leaf (neither mapping nor sequence).
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Node::Mapping(_) | Node::Sequence(_))
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Node::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut Mapping> {
        match self {
            Node::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Node]> {
        match self {
            Node::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Node::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Node::Float(f) => Some(*f),
            Node::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Short name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "bool",
            Node::Integer(_) => "integer",
            Node::Float(_) => "float",
            Node::String(_) => "string",
            Node::Sequence(_) => "sequence",
            Node::Mapping(_) => "mapping",
            Node::Deferred(_) => "interpolation",
            Node::Mandatory => "mandatory",
        }
    }

    /// String form of a scalar, as used when it is interpolated into text.
    /// Containers have no string form.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Node::Null => Some("null".to_string()),
            Node::Bool(b) => Some(b.to_string()),
            Node::Integer(i) => Some(i.to_string()),
            Node::Float(f) => Some(f.to_string()),
            Node::String(s) | Node::Deferred(s) => Some(s.clone()),
            Node::Mandatory => Some(MANDATORY.to_string()),
            Node::Sequence(_) | Node::Mapping(_) => None,
        }
    }

    /// Convert to JSON. Deferred expressions are kept as their source text and
    /// mandatory markers as `"???"`, so only call this on resolved trees when
    /// the exact values matter.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Integer(i) => Value::from(*i),
            Node::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Node::String(s) | Node::Deferred(s) => Value::String(s.clone()),
            Node::Mandatory => Value::String(MANDATORY.to_string()),
            Node::Sequence(items) => Value::Array(items.iter().map(Node::to_json).collect()),
            Node::Mapping(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Dotted paths of every mandatory marker in the tree, in tree order.
    pub fn missing_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        collect_missing(self, "", &mut keys);
        keys
    }
}

fn collect_missing(node: &Node, path: &str, keys: &mut Vec<String>) {
    match node {
        Node::Mandatory => keys.push(path.to_string()),
        Node::Mapping(map) => {
            for (key, value) in map {
                collect_missing(value, &child_key_path(path, key), keys);
            }
        }
        Node::Sequence(items) => {
            for (i, value) in items.iter().enumerate() {
                collect_missing(value, &child_index_path(path, i), keys);
            }
        }
        _ => {}
    }
}

// -- Conversions --------------------------------------------------------------

impl From<serde_json::Value> for Node {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Node::Integer(i),
                None => Node::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Node::from_text(s),
            Value::Array(items) => Node::Sequence(items.into_iter().map(Node::from).collect()),
            Value::Object(map) => {
                Node::Mapping(map.into_iter().map(|(k, v)| (k, Node::from(v))).collect())
            }
        }
    }
}

impl From<serde_yaml::Value> for Node {
    fn from(value: serde_yaml::Value) -> Self {
        use serde_yaml::Value;
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Node::Integer(i),
                None => Node::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Node::from_text(s),
            Value::Sequence(items) => Node::Sequence(items.into_iter().map(Node::from).collect()),
            Value::Mapping(map) => Node::Mapping(
                map.into_iter()
                    .map(|(k, v)| (yaml_key(k), Node::from(v)))
                    .collect(),
            ),
            Value::Tagged(tagged) => Node::from(tagged.value),
        }
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        other => Node::from(other).scalar_text().unwrap_or_default(),
    }
}

impl From<toml::Value> for Node {
    fn from(value: toml::Value) -> Self {
        use toml::Value;
        match value {
            Value::String(s) => Node::from_text(s),
            Value::Integer(i) => Node::Integer(i),
            Value::Float(f) => Node::Float(f),
            Value::Boolean(b) => Node::Bool(b),
            // Dates stay strings so every format yields the same tree.
            Value::Datetime(dt) => Node::String(dt.to_string()),
            Value::Array(items) => Node::Sequence(items.into_iter().map(Node::from).collect()),
            Value::Table(table) => {
                Node::Mapping(table.into_iter().map(|(k, v)| (k, Node::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::from_text(s)
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::from_text(s)
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Bool(b)
    }
}

impl From<i32> for Node {
    fn from(i: i32) -> Self {
        Node::Integer(i as i64)
    }
}

impl From<i64> for Node {
    fn from(i: i64) -> Self {
        Node::Integer(i)
    }
}

impl From<f64> for Node {
    fn from(f: f64) -> Self {
        Node::Float(f)
    }
}

impl From<Mapping> for Node {
    fn from(map: Mapping) -> Self {
        Node::Mapping(map)
    }
}

impl From<Vec<Node>> for Node {
    fn from(items: Vec<Node>) -> Self {
        Node::Sequence(items)
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Null => serializer.serialize_none(),
            Node::Bool(b) => serializer.serialize_bool(*b),
            Node::Integer(i) => serializer.serialize_i64(*i),
            Node::Float(f) => serializer.serialize_f64(*f),
            Node::String(s) | Node::Deferred(s) => serializer.serialize_str(s),
            Node::Mandatory => serializer.serialize_str(MANDATORY),
            Node::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Node::Mapping(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Node::from)
    }
}

// -- Paths ----------------------------------------------------------------------

/// One step of a key path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    /// The segment as a sequence index, if it can be one.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(i) => Some(*i),
            Segment::Key(k) => k.parse().ok(),
        }
    }

    /// The segment as a mapping key.
    pub fn as_key(&self) -> String {
        match self {
            Segment::Key(k) => k.clone(),
            Segment::Index(i) => i.to_string(),
        }
    }
}

/// Parse `a.b[0].c` into segments. The empty path is the root.
pub fn parse_path(path: &str) -> Result<Vec<Segment>, LayerfigError> {
    let invalid = |reason: &str| LayerfigError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let mut segments = Vec::new();
    if path.is_empty() {
        return Ok(segments);
    }

    let mut chars = path.chars().peekable();
    let mut current = String::new();
    // true right after a separator, where a key must follow
    let mut expect_key = true;

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                chars.next();
                current.push('.');
                expect_key = false;
            }
            '.' => {
                if current.is_empty() && expect_key {
                    return Err(invalid("empty key segment"));
                }
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
                expect_key = true;
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
                let mut index = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) => index.push(d),
                        None => return Err(invalid("unclosed '['")),
                    }
                }
                let i = index
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| invalid("index must be a non-negative integer"))?;
                segments.push(Segment::Index(i));
                expect_key = false;
            }
            ']' => return Err(invalid("unexpected ']'")),
            _ => {
                current.push(c);
                expect_key = false;
            }
        }
    }

    if !current.is_empty() {
        segments.push(Segment::Key(current));
    } else if expect_key {
        return Err(invalid("path ends with '.'"));
    }
    Ok(segments)
}

/// Render segments back to path syntax.
pub fn render_path(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Key(k) => out = child_key_path(&out, k),
            Segment::Index(i) => out = child_index_path(&out, *i),
        }
    }
    out
}

/// `parent.key`, escaping dots inside `key`.
pub fn child_key_path(parent: &str, key: &str) -> String {
    let key = key.replace('.', "\\.");
    if parent.is_empty() {
        key
    } else {
        format!("{parent}.{key}")
    }
}

/// `parent[index]`.
pub fn child_index_path(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}

/// The direct child of `node` addressed by `segment`.
pub fn child<'a>(node: &'a Node, segment: &Segment) -> Option<&'a Node> {
    match node {
        Node::Mapping(map) => map.get(&segment.as_key()),
        Node::Sequence(items) => segment.as_index().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Select the node at `path`. Plain absence is `Ok(None)`; only a malformed
/// path is an error. No interpolation happens here — see
/// [`Resolver`](crate::interpolate::Resolver) for resolved reads.
pub fn select<'a>(node: &'a Node, path: &str) -> Result<Option<&'a Node>, LayerfigError> {
    let segments = parse_path(path)?;
    Ok(select_segments(node, &segments))
}

pub fn select_segments<'a>(node: &'a Node, segments: &[Segment]) -> Option<&'a Node> {
    segments.iter().try_fold(node, |current, segment| child(current, segment))
}

/// Write `value` at `path`, creating intermediate mappings as needed. A
/// non-container in the way is replaced by a mapping.
pub fn set_path(root: &mut Node, path: &str, value: Node) -> Result<(), LayerfigError> {
    let segments = parse_path(path)?;
    set_segments(root, &segments, value);
    Ok(())
}

fn set_segments(node: &mut Node, segments: &[Segment], value: Node) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if let (Node::Sequence(items), Some(i)) = (&mut *node, first.as_index())
        && i < items.len()
    {
        set_segments(&mut items[i], rest, value);
        return;
    }

    if !node.is_mapping() {
        *node = Node::mapping();
    }
    if let Node::Mapping(map) = node {
        let slot = map.entry(first.as_key()).or_insert(Node::Null);
        set_segments(slot, rest, value);
    }
}

/// Wrap `node` under the dotted `prefix` chain: `("a.b", x)` → `{a: {b: x}}`.
pub fn mount(prefix: &str, node: Node) -> Result<Node, LayerfigError> {
    if prefix.is_empty() {
        return Ok(node);
    }
    let mut root = Node::mapping();
    set_path(&mut root, prefix, node)?;
    Ok(root)
}

/// Expand dotted mapping keys into nested mappings, recursively.
///
/// `{"a.b": {"c.d": 1, "two": 2}}` becomes `{a: {b: {c: {d: 1}, two: 2}}}`.
/// Keys that expand into the same branch are deep-merged.
pub fn normalize_keys(node: Node) -> Node {
    match node {
        Node::Mapping(map) => {
            let mut out = Mapping::new();
            for (key, value) in map {
                let value = normalize_keys(value);
                let mut parts = split_key(&key);
                let head = parts.remove(0);
                let nested = parts.into_iter().rev().fold(value, |acc, part| {
                    let mut m = Mapping::new();
                    m.insert(part, acc);
                    Node::Mapping(m)
                });
                insert_merged(&mut out, head, nested);
            }
            Node::Mapping(out)
        }
        Node::Sequence(items) => Node::Sequence(items.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

fn insert_merged(map: &mut Mapping, key: String, value: Node) {
    match (map.get_mut(&key), value) {
        (Some(Node::Mapping(existing)), Node::Mapping(incoming)) => {
            let base = std::mem::take(existing);
            *existing = deep_merge(base, incoming);
        }
        (_, value) => {
            map.insert(key, value);
        }
    }
}

/// Split a raw key on unescaped dots; `\.` becomes a literal dot.
fn split_key(key: &str) -> Vec<String> {
    let mut parts = vec![String::new()];
    let mut chars = key.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                chars.next();
                if let Some(last) = parts.last_mut() {
                    last.push('.');
                }
            }
            '.' => parts.push(String::new()),
            _ => {
                if let Some(last) = parts.last_mut() {
                    last.push(c);
                }
            }
        }
    }
    parts
}
