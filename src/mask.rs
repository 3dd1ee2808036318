//! Masking for display: hide secrets, collapse preset groups, drop noise.
//!
//! Masking works on a copy of the raw tree; the configuration itself is never
//! changed. Interpolations are shown as written, not evaluated.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::tree::{self, Mapping, Node};

/// Replacement shown for secret values.
pub const MASK: &str = "*****";

static SECRET_WORD: Lazy<Regex> = Lazy::new(|| Regex::new("password|secret|key").unwrap());

/// Whether the value at `path` looks like a secret: the path contains
/// `password`, `secret` or `key` followed by `_` or the end, but not by
/// `_file` (a path to a secret is not itself secret).
///
/// `db.password`, `api_key`, `secret_token` are secrets; `key_file`,
/// `keyboard` and `secrets.host` are not.
pub fn is_secret(path: &str) -> bool {
    SECRET_WORD.find_iter(path).any(|m| {
        let rest = &path[m.end()..];
        rest.is_empty() || (rest.starts_with('_') && !rest.starts_with("_file"))
    })
}

/// What to mask.
#[derive(Debug, Clone)]
pub struct MaskOptions {
    /// Collapse each `base.<group>` of presets into the list of preset names.
    pub mask_base: bool,
    /// Replace secret values with [`MASK`].
    pub mask_secrets: bool,
    /// Extra patterns matched against key paths, in addition to [`is_secret`].
    pub secret_patterns: Vec<Regex>,
    /// Key paths removed from the output.
    pub mask_keys: Vec<String>,
}

impl Default for MaskOptions {
    fn default() -> Self {
        Self {
            mask_base: true,
            mask_secrets: true,
            secret_patterns: Vec::new(),
            mask_keys: vec!["application.uuid".to_string()],
        }
    }
}

impl MaskOptions {
    /// Nothing masked.
    pub fn none() -> Self {
        Self {
            mask_base: false,
            mask_secrets: false,
            secret_patterns: Vec::new(),
            mask_keys: Vec::new(),
        }
    }

    fn secret(&self, path: &str) -> bool {
        is_secret(path) || self.secret_patterns.iter().any(|p| p.is_match(path))
    }
}

/// A masked copy of `node`.
pub fn mask_tree(node: &Node, options: &MaskOptions) -> Node {
    let mut out = node.clone();
    if options.mask_secrets {
        out = mask_secrets(out, "", options);
    }
    if options.mask_base
        && !options.mask_keys.iter().any(|k| k == "base")
        && let Some(base) = out.as_mapping_mut().and_then(|m| m.get_mut("base"))
    {
        *base = collapse_presets(std::mem::take(base));
    }
    if !options.mask_keys.is_empty() {
        out = remove_keys(out, "", &options.mask_keys).unwrap_or_else(Node::mapping);
    }
    out
}

fn mask_secrets(node: Node, path: &str, options: &MaskOptions) -> Node {
    if !path.is_empty() && options.secret(path) && !matches!(node, Node::Null | Node::Mandatory) {
        return Node::String(MASK.to_string());
    }
    match node {
        Node::Mapping(map) => Node::Mapping(
            map.into_iter()
                .map(|(k, v)| {
                    let child = tree::child_key_path(path, &k);
                    (k, mask_secrets(v, &child, options))
                })
                .collect(),
        ),
        Node::Sequence(items) => Node::Sequence(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| mask_secrets(v, &tree::child_index_path(path, i), options))
                .collect(),
        ),
        other => other,
    }
}

/// `{logging: {default: {...}, none: {...}}}` → `{logging: [default, none]}`.
/// Other scalar entries become empty lists.
fn collapse_presets(base: Node) -> Node {
    match base {
        Node::Mapping(groups) => Node::Mapping(
            groups
                .into_iter()
                .map(|(group, presets)| {
                    let collapsed = match presets {
                        Node::Mapping(presets) => Node::Sequence(
                            presets.into_keys().map(Node::String).collect(),
                        ),
                        // already collapsed
                        Node::Sequence(names) => Node::Sequence(names),
                        _ => Node::Sequence(Vec::new()),
                    };
                    (group, collapsed)
                })
                .collect(),
        ),
        other => other,
    }
}

fn remove_keys(node: Node, path: &str, keys: &[String]) -> Option<Node> {
    if keys.iter().any(|k| k == path) {
        return None;
    }
    Some(match node {
        Node::Mapping(map) => {
            let mut out = Mapping::with_capacity(map.len());
            for (k, v) in map {
                let child = tree::child_key_path(path, &k);
                if let Some(v) = remove_keys(v, &child, keys) {
                    out.insert(k, v);
                }
            }
            Node::Mapping(out)
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::select;
    use pretty_assertions::assert_eq;

    #[test]
    fn secret_paths() {
        for path in ["password", "db.password", "api_key", "secret_token", "a.b.key", "monkey"] {
            assert!(is_secret(path), "{path}");
        }
        for path in ["key_file", "db.password_file", "keyboard", "secrets.host", "user"] {
            assert!(!is_secret(path), "{path}");
        }
    }

    #[test]
    fn secrets_masked_except_null_and_mandatory() {
        let tree = Node::parse_yaml(
            "db: {password: hunter2, user: bob}\napi_key: '???'\nsecret_x: null\nkey_file: /k",
        )
        .unwrap();
        let masked = mask_tree(&tree, &MaskOptions::default());
        assert_eq!(
            select(&masked, "db.password").unwrap(),
            Some(&Node::String(MASK.into()))
        );
        assert_eq!(
            select(&masked, "db.user").unwrap(),
            Some(&Node::String("bob".into()))
        );
        assert_eq!(select(&masked, "api_key").unwrap(), Some(&Node::Mandatory));
        assert_eq!(select(&masked, "secret_x").unwrap(), Some(&Node::Null));
        assert_eq!(
            select(&masked, "key_file").unwrap(),
            Some(&Node::String("/k".into()))
        );
    }

    #[test]
    fn source_is_unchanged_and_masking_is_idempotent() {
        let tree = Node::parse_yaml("password: x\napplication: {name: a, uuid: u}").unwrap();
        let before = tree.clone();
        let once = mask_tree(&tree, &MaskOptions::default());
        let twice = mask_tree(&once, &MaskOptions::default());
        assert_eq!(tree, before);
        assert_eq!(once, twice);
    }

    #[test]
    fn base_presets_collapse() {
        let tree = Node::parse_yaml(
            "base: {logging: {default: {version: 1}, none: {version: 1}}, flag: 3}\nx: 1",
        )
        .unwrap();
        let masked = mask_tree(&tree, &MaskOptions::default());
        assert_eq!(
            select(&masked, "base.logging").unwrap(),
            Some(&Node::Sequence(vec![
                Node::String("default".into()),
                Node::String("none".into())
            ]))
        );
        assert_eq!(
            select(&masked, "base.flag").unwrap(),
            Some(&Node::Sequence(Vec::new()))
        );
        assert_eq!(mask_tree(&masked, &MaskOptions::default()), masked);
    }

    #[test]
    fn mask_keys_removed() {
        let tree = Node::parse_yaml("application: {name: a, uuid: u}").unwrap();
        let masked = mask_tree(&tree, &MaskOptions::default());
        assert_eq!(select(&masked, "application.uuid").unwrap(), None);
        assert_eq!(
            select(&masked, "application.name").unwrap(),
            Some(&Node::String("a".into()))
        );
    }

    #[test]
    fn extra_patterns() {
        let tree = Node::parse_yaml("token: abc\nother: def").unwrap();
        let options = MaskOptions {
            secret_patterns: vec![Regex::new("^token$").unwrap()],
            ..MaskOptions::default()
        };
        let masked = mask_tree(&tree, &options);
        assert_eq!(
            select(&masked, "token").unwrap(),
            Some(&Node::String(MASK.into()))
        );
        assert_eq!(
            select(&masked, "other").unwrap(),
            Some(&Node::String("def".into()))
        );
    }

    #[test]
    fn nothing_masked_with_none() {
        let tree = Node::parse_yaml("password: x\nbase: {a: {b: 1}}").unwrap();
        assert_eq!(mask_tree(&tree, &MaskOptions::none()), tree);
    }
}
