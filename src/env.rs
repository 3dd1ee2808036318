//! Environment variables as a configuration source.
//!
//! Variables are matched by prefix and their names are demangled into key
//! paths against the tree merged so far:
//!
//! | Env var (prefix `PFX_`, stripped) | Existing tree | Key path |
//! |---|---|---|
//! | `PFX_MY_TEST_A` | `my_test: {..}` | `my_test.a` |
//! | `PFX_TEST_TEST_MY_TEST` | `test_test: {my_test: ..}` | `test_test.my_test` |
//! | `PFX_NEW_KEY` | nothing matching | `new.key` |
//!
//! Single `_` is ambiguous: it can be a separator or part of a key name. At
//! each level the longest run of segments that names an existing key wins.
//! When nothing matches, the remaining segments are joined with dots.

use std::collections::HashMap;

use crate::tree::{self, Node};

/// Environment variable reader.
///
/// Wraps lookups so that production code hits `std::env` while tests
/// can supply a controlled set of values.
#[derive(Clone, Debug, Default)]
pub struct Env {
    overrides: Option<HashMap<String, String>>,
}

impl Env {
    /// An `Env` that reads from the real process environment.
    pub fn real() -> Self {
        Self { overrides: None }
    }

    /// An `Env` backed by explicit key-value pairs instead of the process.
    pub fn from_vars(
        vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        Self {
            overrides: Some(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Look up a variable by name.
    pub fn var(&self, name: &str) -> Option<String> {
        match &self.overrides {
            Some(map) => map.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }

    /// All variables, sorted by name so ingestion is deterministic.
    pub fn vars(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = match &self.overrides {
            Some(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            None => std::env::vars().collect(),
        };
        vars.sort();
        vars
    }
}

/// What happens to a matched prefix before the name is demangled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixMode {
    /// Drop the prefix: `PFX_A_B` with prefix `PFX_` targets `a.b`.
    Strip,
    /// Keep the prefix as the first key: `SERVER_URL` with prefix `SERVER_`
    /// targets `server.url`. Used with prefixes derived from top-level keys.
    Keep,
}

/// Accepted prefixes derived from a tree: `K_` for every top-level key `k`,
/// except `base`, `application` and keys starting with `_`.
pub fn default_prefixes(tree: &Node) -> Vec<String> {
    let Some(map) = tree.as_mapping() else {
        return vec![];
    };
    map.keys()
        .filter(|k| !matches!(k.as_str(), "base" | "application") && !k.starts_with('_'))
        .map(|k| format!("{}_", k.to_uppercase()))
        .collect()
}

/// Build a tree fragment from the variables whose name starts with one of
/// `prefixes` (case-sensitive).
///
/// Names are lower-cased, stripped of `"`, `\` and `=`, and demangled with
/// [`find_name`] against `current`. Values go through [`parse_value`].
///
/// Takes an iterator so tests can pass synthetic data instead of the process
/// environment.
pub fn env_to_tree(
    prefixes: &[String],
    mode: PrefixMode,
    vars: impl IntoIterator<Item = (String, String)>,
    current: &Node,
) -> Node {
    let mut fragment = Node::mapping();

    for (name, value) in vars {
        let Some(prefix) = prefixes.iter().find(|p| name.starts_with(p.as_str())) else {
            continue;
        };
        let rest = match mode {
            PrefixMode::Strip => &name[prefix.len()..],
            PrefixMode::Keep => name.as_str(),
        };
        let cleaned: String = rest
            .to_lowercase()
            .chars()
            .filter(|c| !matches!(c, '"' | '\\' | '='))
            .collect();
        let parts: Vec<&str> = cleaned.split('_').collect();
        let path = find_name(&parts, Some(current));
        if path.is_empty() {
            continue;
        }

        tracing::trace!(var = %name, key = %path, "environment variable mapped");
        if let Err(err) = tree::set_path(&mut fragment, &path, parse_value(&value)) {
            tracing::debug!(var = %name, error = %err, "skipping environment variable");
        }
    }

    fragment
}

/// Demangle underscore-split name parts into a dotted key path.
///
/// At each level, tries the longest run of parts joined with `_` that names an
/// existing key in `tree`, then recurses into that key's subtree. Without a
/// match the remaining (non-empty) parts are joined with `.`.
pub fn find_name(parts: &[&str], tree: Option<&Node>) -> String {
    if parts.is_empty() {
        return String::new();
    }

    if let Some(map) = tree.and_then(Node::as_mapping) {
        for end in (1..=parts.len()).rev() {
            let candidate = parts[..end].join("_");
            if let Some(subtree) = map.get(&candidate) {
                let rest = find_name(&parts[end..], Some(subtree));
                return if rest.is_empty() {
                    candidate
                } else {
                    format!("{candidate}.{rest}")
                };
            }
        }
    }

    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(".")
}

/// Parse a raw string value (env var or `key=value` argument) as a YAML
/// scalar or flow value: `8080` → integer, `true` → bool, `[1, 2]` →
/// sequence. Values that are not valid YAML are kept as the raw string.
pub fn parse_value(raw: &str) -> Node {
    if raw.is_empty() {
        return Node::String(String::new());
    }
    match serde_yaml::from_str::<serde_yaml::Value>(raw) {
        Ok(value) => Node::from(value),
        Err(_) => Node::from_text(raw),
    }
}
