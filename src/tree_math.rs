//! Index arithmetic over the left-balanced binary ratchet tree
//!
//! Nodes are numbered in-order: leaves sit at even indices (the n-th leaf
//! at 2n), internal nodes at odd indices. The tree is as left-heavy as
//! possible, so a node's nominal child or parent can fall outside the
//! node vector and must be walked back into range.

pub type LeafIndex = u32;
pub type NodeIndex = u32;

/// Number of nodes in a tree with the given number of leaves
pub fn node_width(leaf_count: u32) -> u32 {
    if leaf_count == 0 { 0 } else { 2 * leaf_count - 1 }
}

/// Number of leaves covered by a node vector of the given width
pub fn leaf_width(node_count: u32) -> u32 {
    node_count.div_ceil(2)
}

/// Node index of the n-th leaf
pub fn leaf_to_node(leaf: LeafIndex) -> NodeIndex {
    2 * leaf
}

/// Leaf position of a leaf node index, `None` for internal nodes
pub fn node_to_leaf(node: NodeIndex) -> Option<LeafIndex> {
    if is_leaf(node) { Some(node / 2) } else { None }
}

/// Leaves are at even indices
pub fn is_leaf(node: NodeIndex) -> bool {
    node & 0x01 == 0
}

/// Height of a node above the leaf level: the number of trailing ones
pub fn level(node: NodeIndex) -> u32 {
    node.trailing_ones()
}

fn log2(x: u32) -> u32 {
    if x == 0 { 0 } else { 31 - x.leading_zeros() }
}

/// Index of the root for a tree with the given number of leaves
pub fn root(leaf_count: u32) -> NodeIndex {
    let width = node_width(leaf_count);
    if width == 0 { 0 } else { (1 << log2(width)) - 1 }
}

/// Left child of an internal node, `None` for leaves
pub fn left(node: NodeIndex) -> Option<NodeIndex> {
    let k = level(node);
    if k == 0 {
        None
    } else {
        Some(node ^ (0x01 << (k - 1)))
    }
}

/// Right child of an internal node, walked left until it is in range
pub fn right(node: NodeIndex, leaf_count: u32) -> Option<NodeIndex> {
    let k = level(node);
    if k == 0 {
        return None;
    }
    let mut child = node ^ (0x03 << (k - 1));
    while child >= node_width(leaf_count) {
        child = left(child)?;
    }
    Some(child)
}

fn parent_step(node: NodeIndex) -> NodeIndex {
    let k = level(node);
    let b = (node >> (k + 1)) & 0x01;
    (node | (1 << k)) ^ (b << (k + 1))
}

/// Parent of a node, `None` at the root
pub fn parent(node: NodeIndex, leaf_count: u32) -> Option<NodeIndex> {
    if node == root(leaf_count) {
        return None;
    }
    let width = node_width(leaf_count);
    let mut p = parent_step(node);
    while p >= width {
        p = parent_step(p);
    }
    Some(p)
}

/// The other child of a node's parent, `None` at the root
pub fn sibling(node: NodeIndex, leaf_count: u32) -> Option<NodeIndex> {
    let p = parent(node, leaf_count)?;
    if node < p {
        right(p, leaf_count)
    } else {
        left(p)
    }
}

/// Node indices from a leaf (exclusive) up to the root (inclusive)
pub fn direct_path(leaf: LeafIndex, leaf_count: u32) -> Vec<NodeIndex> {
    let mut path = Vec::new();
    let mut node = leaf_to_node(leaf);
    if node == root(leaf_count) {
        return path;
    }
    while let Some(p) = parent(node, leaf_count) {
        path.push(p);
        node = p;
    }
    path
}

/// Siblings of each node on the direct path, bottom-up
pub fn copath(leaf: LeafIndex, leaf_count: u32) -> Vec<NodeIndex> {
    let node = leaf_to_node(leaf);
    if node == root(leaf_count) {
        return Vec::new();
    }

    let mut nodes = vec![node];
    let mut path = direct_path(leaf, leaf_count);
    path.pop();
    nodes.extend(path);

    nodes
        .into_iter()
        .filter_map(|x| sibling(x, leaf_count))
        .collect()
}
