use crate::tree::{Mapping, Node};

/// Deep-merge `overlay` on top of `base`.
/// If both sides have a mapping for the same key, recurse.
/// Otherwise, `overlay`'s value wins — sequences are replaced, not concatenated,
/// and a mandatory marker in `overlay` re-imposes the requirement.
///
/// Keys keep their first-seen position.
pub fn deep_merge(mut base: Mapping, overlay: Mapping) -> Mapping {
    for (key, overlay_val) in overlay {
        match (base.get_mut(&key), overlay_val) {
            (Some(Node::Mapping(base_map)), Node::Mapping(overlay_map)) => {
                let taken = std::mem::take(base_map);
                *base_map = deep_merge(taken, overlay_map);
            }
            (_, overlay_val) => {
                base.insert(key, overlay_val);
            }
        }
    }
    base
}

/// Merge two nodes. Two mappings deep-merge; any other pairing yields `overlay`.
pub fn merge_nodes(base: Node, overlay: Node) -> Node {
    match (base, overlay) {
        (Node::Mapping(b), Node::Mapping(o)) => Node::Mapping(deep_merge(b, o)),
        (_, overlay) => overlay,
    }
}

/// Merge a sequence of trees left to right, later trees overriding earlier ones.
/// An empty input yields an empty mapping.
pub fn merge_all<I>(trees: I) -> Node
where
    I: IntoIterator<Item = Node>,
{
    trees.into_iter().fold(Node::mapping(), merge_nodes)
}
