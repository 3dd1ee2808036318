//! Deferred-value resolution.
//!
//! Grammar, inside any string value:
//!
//! - `${a.b.c}`: the node at an absolute path;
//! - `${.sibling}`, `${..uncle}`: relative to the node holding the expression,
//!   one extra dot per level up;
//! - `${name:argument}`: a call to a registered resolver function. The
//!   argument is passed verbatim;
//! - `\${` is a literal `${`.
//!
//! A value that is exactly one expression resolves to the referenced node
//! whatever its type. Expressions embedded in text are replaced by the string
//! form of their (scalar) result.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::env::Env;
use crate::error::LayerfigError;
use crate::tree::{self, Node, Segment};

/// A resolver function: receives the literal argument and the active
/// [`Resolver`], which it may use to read other keys.
pub type ResolverFn =
    dyn Fn(&str, &mut Resolver<'_>) -> Result<Node, LayerfigError> + Send + Sync;

/// Named resolver functions available to `${name:argument}` expressions.
#[derive(Clone)]
pub struct Resolvers {
    functions: HashMap<String, Arc<ResolverFn>>,
}

impl Default for Resolvers {
    /// The built-in set: `env`, `select`, `read_text` and `read_strip`.
    fn default() -> Self {
        let mut resolvers = Resolvers::empty();
        resolvers.register("env", resolve_env);
        resolvers.register("select", resolve_select);
        resolvers.register("read_text", |arg, r| read_file(arg, r, false));
        resolvers.register("read_strip", |arg, r| read_file(arg, r, true));
        resolvers
    }
}

impl fmt::Debug for Resolvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Resolvers").field("functions", &names).finish()
    }
}

impl Resolvers {
    /// A registry without any function, not even the built-ins.
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Register (or replace) a function under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&str, &mut Resolver<'_>) -> Result<Node, LayerfigError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ResolverFn>> {
        self.functions.get(name).cloned()
    }
}

fn resolve_env(arg: &str, resolver: &mut Resolver<'_>) -> Result<Node, LayerfigError> {
    let (name, default) = split_default(arg);
    match resolver.env().var(name) {
        Some(value) => Ok(Node::String(value)),
        None => match default {
            Some(default) => Ok(Node::String(default.to_string())),
            None => Err(resolver.fail(format!("environment variable '{name}' is not set"))),
        },
    }
}

fn resolve_select(arg: &str, resolver: &mut Resolver<'_>) -> Result<Node, LayerfigError> {
    let (path, default) = split_default(arg);
    let path = resolver.absolute(path)?;
    match resolver.lookup(&path)? {
        Some(node) => Ok(node),
        None => Ok(default.map_or(Node::Null, |d| Node::String(d.to_string()))),
    }
}

fn read_file(arg: &str, resolver: &mut Resolver<'_>, strip: bool) -> Result<Node, LayerfigError> {
    let path = shellexpand::tilde(arg.trim());
    let content = std::fs::read_to_string(path.as_ref())
        .map_err(|e| resolver.fail(format!("cannot read '{path}': {e}")))?;
    Ok(Node::String(if strip {
        content.trim().to_string()
    } else {
        content
    }))
}

fn split_default(arg: &str) -> (&str, Option<&str>) {
    match arg.split_once(',') {
        Some((name, default)) => (name.trim(), Some(default.trim())),
        None => (arg.trim(), None),
    }
}

// -- Parsing ----------------------------------------------------------------------

/// A piece of an interpolated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Text(String),
    Reference(String),
    Call { name: String, arg: String },
}

/// Split a string into literal text and `${...}` expressions.
pub fn parse_expression(input: &str) -> Result<Vec<Piece>, String> {
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut rest = input;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("\\${") {
            text.push_str("${");
            rest = after;
        } else if let Some(after) = rest.strip_prefix("${") {
            let end = after
                .find('}')
                .ok_or_else(|| format!("unterminated expression in '{input}'"))?;
            let inner = after[..end].trim();
            if inner.is_empty() {
                return Err(format!("empty expression in '{input}'"));
            }
            if !text.is_empty() {
                pieces.push(Piece::Text(std::mem::take(&mut text)));
            }
            pieces.push(classify(inner));
            rest = &after[end + 1..];
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                text.push(c);
            }
            rest = chars.as_str();
        }
    }

    if !text.is_empty() || pieces.is_empty() {
        pieces.push(Piece::Text(text));
    }
    Ok(pieces)
}

fn classify(inner: &str) -> Piece {
    if let Some((name, arg)) = inner.split_once(':') {
        let name = name.trim();
        let is_name = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
        if is_name {
            return Piece::Call {
                name: name.to_string(),
                arg: arg.to_string(),
            };
        }
    }
    Piece::Reference(inner.to_string())
}

// -- Resolution -------------------------------------------------------------------

/// Evaluates deferred nodes of one tree.
///
/// Keeps the stack of key paths being evaluated; meeting one of them again is
/// a [`LayerfigError::ResolutionCycle`].
pub struct Resolver<'a> {
    root: &'a Node,
    resolvers: &'a Resolvers,
    env: &'a Env,
    in_progress: Vec<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(root: &'a Node, resolvers: &'a Resolvers, env: &'a Env) -> Self {
        Self {
            root,
            resolvers,
            env,
            in_progress: Vec::new(),
        }
    }

    pub fn env(&self) -> &Env {
        self.env
    }

    /// Key path of the expression being evaluated (empty at top level).
    pub fn current_key(&self) -> &str {
        self.in_progress.last().map(String::as_str).unwrap_or("")
    }

    /// An interpolation error attributed to the current key.
    pub fn fail(&self, reason: impl Into<String>) -> LayerfigError {
        LayerfigError::Interpolation {
            key: self.current_key().to_string(),
            reason: reason.into(),
        }
    }

    /// Fully resolved node at `path`, or `None` when nothing is there.
    ///
    /// Fails with [`LayerfigError::MissingMandatoryValue`] when the node, or
    /// anything below it, is still mandatory.
    pub fn resolve(&mut self, path: &str) -> Result<Option<Node>, LayerfigError> {
        let segments = tree::parse_path(path)?;
        match self.walk(&segments)? {
            Some((node, key)) => self.resolve_node(node, &key).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`resolve`](Self::resolve), but a mandatory node at `path` reads
    /// as absent.
    pub fn lookup(&mut self, path: &str) -> Result<Option<Node>, LayerfigError> {
        let segments = tree::parse_path(path)?;
        match self.walk(&segments)? {
            Some((node, _)) if node.is_mandatory() => Ok(None),
            Some((node, key)) => self.resolve_node(node, &key).map(Some),
            None => Ok(None),
        }
    }

    /// Resolve the whole tree. Every mandatory key reached is collected and
    /// reported together; any other error stops immediately.
    pub fn resolve_all(&mut self) -> Result<Node, LayerfigError> {
        let mut missing = Vec::new();
        let root = self.root.clone();
        let resolved = self.resolve_collecting(root, "", &mut missing)?;
        if missing.is_empty() {
            Ok(resolved)
        } else {
            let mut keys: Vec<String> = Vec::with_capacity(missing.len());
            for key in missing {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
            Err(LayerfigError::MissingMandatoryValues { keys })
        }
    }

    /// Turn a possibly relative reference into an absolute path, relative to
    /// the key being evaluated.
    pub fn absolute(&self, reference: &str) -> Result<String, LayerfigError> {
        let dots = reference.chars().take_while(|c| *c == '.').count();
        if dots == 0 {
            return Ok(reference.to_string());
        }
        let mut base = tree::parse_path(self.current_key())?;
        // the node holding the expression, then one level up per extra dot
        for _ in 0..dots {
            if base.pop().is_none() {
                return Err(self.fail(format!("'{reference}' goes above the root")));
            }
        }
        let mut segments = base;
        segments.extend(tree::parse_path(&reference[dots..])?);
        Ok(tree::render_path(&segments))
    }

    /// Follow `segments` from the root, evaluating deferred nodes met on the
    /// way. Returns the unresolved target and its rendered path.
    fn walk(&mut self, segments: &[Segment]) -> Result<Option<(Node, String)>, LayerfigError> {
        let mut current: Cow<'a, Node> = Cow::Borrowed(self.root);
        let mut path = String::new();

        for segment in segments {
            if let Node::Deferred(expr) = current.as_ref() {
                let expr = expr.clone();
                current = Cow::Owned(self.evaluate(&expr, &path)?);
            }
            if current.is_mandatory() {
                return Err(LayerfigError::MissingMandatoryValue { key: path });
            }
            let next = match &current {
                Cow::Borrowed(node) => tree::child(*node, segment).map(Cow::Borrowed),
                Cow::Owned(node) => tree::child(node, segment).cloned().map(Cow::Owned),
            };
            let Some(next) = next else {
                return Ok(None);
            };
            path = match (&*current, segment.as_index()) {
                (Node::Sequence(_), Some(i)) => tree::child_index_path(&path, i),
                _ => tree::child_key_path(&path, &segment.as_key()),
            };
            current = next;
        }

        Ok(Some((current.into_owned(), path)))
    }

    fn resolve_node(&mut self, node: Node, path: &str) -> Result<Node, LayerfigError> {
        match node {
            Node::Deferred(expr) => self.evaluate(&expr, path),
            Node::Mandatory => Err(LayerfigError::MissingMandatoryValue {
                key: path.to_string(),
            }),
            Node::Mapping(map) => {
                let mut out = tree::Mapping::with_capacity(map.len());
                for (key, value) in map {
                    let child = tree::child_key_path(path, &key);
                    out.insert(key, self.resolve_node(value, &child)?);
                }
                Ok(Node::Mapping(out))
            }
            Node::Sequence(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| self.resolve_node(item, &tree::child_index_path(path, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Node::Sequence),
            scalar => Ok(scalar),
        }
    }

    fn resolve_collecting(
        &mut self,
        node: Node,
        path: &str,
        missing: &mut Vec<String>,
    ) -> Result<Node, LayerfigError> {
        match node {
            Node::Mapping(map) => {
                let mut out = tree::Mapping::with_capacity(map.len());
                for (key, value) in map {
                    let child = tree::child_key_path(path, &key);
                    out.insert(key, self.resolve_collecting(value, &child, missing)?);
                }
                Ok(Node::Mapping(out))
            }
            Node::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    let child = tree::child_index_path(path, i);
                    out.push(self.resolve_collecting(item, &child, missing)?);
                }
                Ok(Node::Sequence(out))
            }
            other => match self.resolve_node(other, path) {
                Ok(node) => Ok(node),
                Err(LayerfigError::MissingMandatoryValue { key }) => {
                    missing.push(key);
                    Ok(Node::Mandatory)
                }
                Err(LayerfigError::MissingMandatoryValues { keys }) => {
                    missing.extend(keys);
                    Ok(Node::Mandatory)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Evaluate the expression stored at `path`.
    fn evaluate(&mut self, expr: &str, path: &str) -> Result<Node, LayerfigError> {
        if self.in_progress.iter().any(|p| p == path) {
            return Err(LayerfigError::ResolutionCycle {
                key: path.to_string(),
            });
        }
        self.in_progress.push(path.to_string());
        let result = self.evaluate_expression(expr, path);
        self.in_progress.pop();
        result
    }

    fn evaluate_expression(&mut self, expr: &str, path: &str) -> Result<Node, LayerfigError> {
        let pieces = parse_expression(expr).map_err(|reason| LayerfigError::Interpolation {
            key: path.to_string(),
            reason,
        })?;

        if let [piece] = pieces.as_slice() {
            return match piece {
                Piece::Text(text) => Ok(Node::String(text.clone())),
                other => self.evaluate_piece(other, path),
            };
        }

        let mut out = String::new();
        for piece in &pieces {
            match piece {
                Piece::Text(text) => out.push_str(text),
                other => {
                    let value = self.evaluate_piece(other, path)?;
                    let text = value.scalar_text().ok_or_else(|| LayerfigError::Interpolation {
                        key: path.to_string(),
                        reason: format!("cannot insert a {} into a string", value.type_name()),
                    })?;
                    out.push_str(&text);
                }
            }
        }
        Ok(Node::String(out))
    }

    fn evaluate_piece(&mut self, piece: &Piece, path: &str) -> Result<Node, LayerfigError> {
        match piece {
            Piece::Text(text) => Ok(Node::String(text.clone())),
            Piece::Reference(reference) => {
                let target = self.absolute(reference)?;
                self.resolve(&target)?
                    .ok_or_else(|| LayerfigError::Interpolation {
                        key: path.to_string(),
                        reason: format!("referenced key '{target}' not found"),
                    })
            }
            Piece::Call { name, arg } => {
                let function =
                    self.resolvers
                        .get(name)
                        .ok_or_else(|| LayerfigError::UnknownResolver {
                            key: path.to_string(),
                            name: name.clone(),
                        })?;
                let value = function(arg, self)?;
                self.resolve_node(value, path)
            }
        }
    }
}
