//! Tree nodes and flat-arena index arithmetic.
//!
//! Nodes are stored breadth-first: level `l` starts at
//! `(split^l - 1) / (split - 1)` and a node's position within its level is
//! its `level_index`. The children of a node at `(level, level_index)` are
//! the `split` consecutive nodes starting at
//! `level_offset(level + 1) + level_index * split`.

use std::ops::Range;

/// One node of a vocabulary tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeNode {
    /// Position in the node arena.
    pub index: u32,
    /// Depth of the node; the root is level 0.
    pub level: u32,
    /// Position within its level.
    pub level_index: u32,
    /// Arena index of the first child, or 0 for a leaf.
    pub first_child_index: u32,
    /// Number of training descriptors that reached this node while building.
    pub inverted_file_length: u32,
    /// Unit-length cluster centre; empty for the root and for children that
    /// received no training descriptors.
    pub mean: Vec<f32>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.first_child_index == 0
    }

    pub fn has_mean(&self) -> bool {
        !self.mean.is_empty()
    }

    /// Arena indices of this node's children; empty for a leaf.
    pub fn children(&self, split: u32) -> Range<u32> {
        if self.is_leaf() {
            0..0
        } else {
            self.first_child_index..self.first_child_index + split
        }
    }
}

/// Number of nodes in all levels above `level`, i.e. the arena index of the
/// first node on `level`. `None` on overflow.
pub fn level_offset(split: u32, level: u32) -> Option<u64> {
    let split = u64::from(split);
    if split < 2 {
        return None;
    }
    Some((split.checked_pow(level)? - 1) / (split - 1))
}

/// Total node count of a tree with `depth` levels, if it fits in `u32`.
pub fn node_count(split: u32, depth: u32) -> Option<u32> {
    u32::try_from(level_offset(split, depth)?).ok()
}

/// Number of leaves (and of leaf posting lists) of a tree with `depth` levels.
pub fn leaf_count(split: u32, depth: u32) -> Option<u32> {
    let leaves = u64::from(split).checked_pow(depth.checked_sub(1)?)?;
    u32::try_from(leaves).ok()
}

/// Arena index and level index of child `offset` of the node at
/// `(level, level_index)`. Callers guarantee the tree size fits in `u32`.
pub fn child_position(split: u32, level: u32, level_index: u32, offset: u32) -> (u32, u32) {
    let child_level_index = level_index * split + offset;
    let base = level_offset(split, level + 1).unwrap_or(0) as u32;
    (base + child_level_index, child_level_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_count() {
        assert_eq!(node_count(2, 1), Some(1));
        assert_eq!(node_count(2, 2), Some(3));
        assert_eq!(node_count(2, 3), Some(7));
        assert_eq!(node_count(10, 6), Some(111_111));
        assert_eq!(node_count(8, 3), Some(73));
        assert_eq!(node_count(1, 3), None);
        assert_eq!(node_count(1000, 5), None);
    }

    #[test]
    fn test_leaf_count() {
        assert_eq!(leaf_count(2, 1), Some(1));
        assert_eq!(leaf_count(3, 3), Some(9));
        assert_eq!(leaf_count(3, 0), None);
    }

    #[test]
    fn test_child_position() {
        // split 3: level 1 starts at 1, level 2 starts at 4
        assert_eq!(child_position(3, 0, 0, 0), (1, 0));
        assert_eq!(child_position(3, 0, 0, 2), (3, 2));
        assert_eq!(child_position(3, 1, 1, 0), (7, 3));
        assert_eq!(child_position(3, 1, 2, 2), (12, 8));
    }

    #[test]
    fn test_children_range() {
        let leaf = TreeNode::default();
        assert!(leaf.is_leaf());
        assert_eq!(leaf.children(4).count(), 0);

        let inner = TreeNode {
            first_child_index: 5,
            ..TreeNode::default()
        };
        assert_eq!(inner.children(4), 5..9);
    }
}
