// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::fmt::Debug;

use super::Predictor;
use crate::{
    entropy_coding::{HybridUintConfig, Token, TokenReader, pack_signed},
    error::{Error, Result},
    util::tracing_wrappers::*,
};

mod builder;
mod flat;
mod lookup;

pub use builder::TreeBuilder;
pub use flat::{FlatTree, filter_tree};
pub use lookup::LookupTable;

/// A node of an MA tree. Pixels whose `property` is greater than `val` go
/// to `right`, all others to `left`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeNode {
    Split {
        property: u8,
        val: i32,
        left: u32,
        right: u32,
    },
    Leaf {
        predictor: Predictor,
        offset: i32,
        multiplier: u32,
        id: u32,
    },
}

/// Leaf parameters without a context id, as used while building trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leaf {
    pub predictor: Predictor,
    pub offset: i32,
    pub multiplier: u32,
}

impl Leaf {
    pub fn new(predictor: Predictor) -> Self {
        Self {
            predictor,
            offset: 0,
            multiplier: 1,
        }
    }
}

/// Result of a tree lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafInfo {
    pub predictor: Predictor,
    pub offset: i32,
    pub multiplier: u32,
    pub context: u32,
}

/// A validated MA tree, stored breadth-first with the `>` child of every
/// split directly before its `<=` child. Leaf ids are consecutive in that
/// order.
#[derive(Clone, PartialEq, Eq)]
pub struct Tree {
    nodes: Vec<TreeNode>,
}

impl Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tree[{:?}]", self.nodes)
    }
}

/// Maximum depth of a tree.
pub const HEIGHT_LIMIT: usize = 2048;
/// Maximum number of nodes of a tree, regardless of image size.
pub const MAX_TREE_SIZE: usize = 1 << 20;

pub const SPLIT_VAL_CONTEXT: usize = 0;
pub const PROPERTY_CONTEXT: usize = 1;
pub const PREDICTOR_CONTEXT: usize = 2;
pub const OFFSET_CONTEXT: usize = 3;
pub const MULTIPLIER_LOG_CONTEXT: usize = 4;
pub const MULTIPLIER_BITS_CONTEXT: usize = 5;
pub const NUM_TREE_CONTEXTS: usize = 6;

/// Checks that children come after their parent and that every node is
/// reachable, that is, every split value lies strictly inside the range its
/// property can take at that node.
fn validate_tree(tree: &[TreeNode]) -> Result<()> {
    if tree.is_empty() {
        return Err(Error::EmptyTree);
    }

    enum Step {
        Visit { node: usize, depth: usize },
        SetRange { property: usize, range: (i32, i32) },
    }

    // Properties are saturated to this range.
    let mut property_ranges = [(-i32::MAX, i32::MAX); 256];
    let mut stack = vec![Step::Visit { node: 0, depth: 0 }];

    while let Some(step) = stack.pop() {
        let (node, depth) = match step {
            Step::SetRange { property, range } => {
                property_ranges[property] = range;
                continue;
            }
            Step::Visit { node, depth } => (node, depth),
        };
        if depth > HEIGHT_LIMIT {
            return Err(Error::TreeTooTall(depth, HEIGHT_LIMIT));
        }
        let TreeNode::Split {
            property,
            val,
            left,
            right,
        } = tree[node]
        else {
            continue;
        };
        for child in [left as usize, right as usize] {
            if child <= node || child >= tree.len() {
                return Err(Error::InvalidTreeChild(node, child));
            }
        }
        let p = property as usize;
        let (l, u) = property_ranges[p];
        if l > val || u <= val {
            return Err(Error::TreeSplitOnEmptyRange(property, val, l, u));
        }
        // Popped in reverse order: the `<=` subtree is visited first.
        stack.push(Step::SetRange {
            property: p,
            range: (l, u),
        });
        stack.push(Step::Visit {
            node: right as usize,
            depth: depth + 1,
        });
        stack.push(Step::SetRange {
            property: p,
            range: (val + 1, u),
        });
        stack.push(Step::Visit {
            node: left as usize,
            depth: depth + 1,
        });
        stack.push(Step::SetRange {
            property: p,
            range: (l, val),
        });
    }

    Ok(())
}

impl Tree {
    /// Builds a tree from nodes already in canonical order.
    fn from_canonical_nodes(nodes: Vec<TreeNode>) -> Result<Tree> {
        validate_tree(&nodes)?;
        Ok(Tree { nodes })
    }

    /// A tree with a single leaf, using context 0.
    pub fn single_leaf(predictor: Predictor, offset: i32, multiplier: u32) -> Result<Tree> {
        if multiplier == 0 {
            return Err(Error::ZeroMultiplier);
        }
        Tree::from_canonical_nodes(vec![TreeNode::Leaf {
            predictor,
            offset,
            multiplier,
            id: 0,
        }])
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, TreeNode::Leaf { .. }))
            .count()
    }

    pub fn max_property_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|x| match x {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { property, .. } => *property as usize + 1,
            })
            .max()
            .unwrap_or_default()
    }

    pub fn num_prev_channels(&self) -> usize {
        use super::properties::{NUM_NONREF_PROPERTIES, PROPERTIES_PER_PREVCHAN};
        self.max_property_count()
            .saturating_sub(NUM_NONREF_PROPERTIES)
            .div_ceil(PROPERTIES_PER_PREVCHAN)
    }

    /// Walks the tree from the root.
    #[inline]
    pub fn lookup(&self, properties: &[i32]) -> LeafInfo {
        let mut tree_node = 0;
        loop {
            match self.nodes[tree_node] {
                TreeNode::Split {
                    property,
                    val,
                    left,
                    right,
                } => {
                    tree_node = if properties[property as usize] > val {
                        right as usize
                    } else {
                        left as usize
                    };
                }
                TreeNode::Leaf {
                    predictor,
                    offset,
                    multiplier,
                    id,
                } => {
                    return LeafInfo {
                        predictor,
                        offset,
                        multiplier,
                        context: id,
                    };
                }
            }
        }
    }

    /// Reads a tree, rejecting it as soon as it has more than `size_limit`
    /// nodes.
    #[instrument(level = "debug", skip(reader), err)]
    pub fn read(reader: &mut impl TokenReader, size_limit: usize) -> Result<Tree> {
        let config = HybridUintConfig::default();
        let size_limit = size_limit.min(MAX_TREE_SIZE);
        let mut tree: Vec<TreeNode> = vec![];
        let mut to_decode = 1;
        let mut leaf_id = 0;
        while to_decode > 0 {
            if tree.len() >= size_limit {
                return Err(Error::TreeTooLarge(tree.len() + 1, size_limit));
            }
            if tree.len() >= tree.capacity() {
                tree.try_reserve(tree.len() * 2 + 1)?;
            }
            to_decode -= 1;
            let property = reader.read_value(&config, PROPERTY_CONTEXT)?;
            trace!(property);
            if let Some(property) = property.checked_sub(1) {
                if property > 255 {
                    return Err(Error::InvalidProperty(property));
                }
                let splitval = reader.read_signed(&config, SPLIT_VAL_CONTEXT)?;
                let right = (tree.len() + to_decode + 1) as u32;
                let node = TreeNode::Split {
                    property: property as u8,
                    val: splitval,
                    left: right + 1,
                    right,
                };
                trace!("split node {:?}", node);
                to_decode += 2;
                tree.push(node);
            } else {
                let predictor =
                    Predictor::try_from(reader.read_value(&config, PREDICTOR_CONTEXT)?)?;
                let offset = reader.read_signed(&config, OFFSET_CONTEXT)?;
                let mul_log = reader.read_value(&config, MULTIPLIER_LOG_CONTEXT)?;
                if mul_log >= 31 {
                    return Err(Error::TreeMultiplierTooLarge(mul_log, 31));
                }
                let mul_bits = reader.read_value(&config, MULTIPLIER_BITS_CONTEXT)?;
                let multiplier = (mul_bits as u64 + 1) << mul_log;
                if multiplier > (u32::MAX as u64) {
                    return Err(Error::TreeMultiplierBitsTooLarge(mul_bits, mul_log));
                }
                let node = TreeNode::Leaf {
                    predictor,
                    offset,
                    id: leaf_id,
                    multiplier: multiplier as u32,
                };
                leaf_id += 1;
                trace!("leaf node {:?}", node);
                tree.push(node);
            }
        }
        debug!(nodes = tree.len(), leaves = leaf_id, "read tree");
        Tree::from_canonical_nodes(tree)
    }
}

/// Converts a tree to the tokens read by [`Tree::read`], using the six tree
/// contexts.
pub fn tokenize_tree(tree: &Tree) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(tree.nodes.len() * 5);
    for node in tree.nodes.iter() {
        match *node {
            TreeNode::Split { property, val, .. } => {
                tokens.push(Token::new(PROPERTY_CONTEXT, property as u32 + 1));
                tokens.push(Token::new(SPLIT_VAL_CONTEXT, pack_signed(val)));
            }
            TreeNode::Leaf {
                predictor,
                offset,
                multiplier,
                ..
            } => {
                let mul_log = multiplier.trailing_zeros();
                let mul_bits = (multiplier >> mul_log) - 1;
                tokens.push(Token::new(PROPERTY_CONTEXT, 0));
                tokens.push(Token::new(PREDICTOR_CONTEXT, predictor as u32));
                tokens.push(Token::new(OFFSET_CONTEXT, pack_signed(offset)));
                tokens.push(Token::new(MULTIPLIER_LOG_CONTEXT, mul_log));
                tokens.push(Token::new(MULTIPLIER_BITS_CONTEXT, mul_bits));
            }
        }
    }
    tokens
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;
    use crate::entropy_coding::{TokenBuffer, TokenWriter, write_tokens};

    fn split(property: u8, val: i32, left: u32, right: u32) -> TreeNode {
        TreeNode::Split {
            property,
            val,
            left,
            right,
        }
    }

    fn leaf(id: u32) -> TreeNode {
        TreeNode::Leaf {
            predictor: Predictor::Zero,
            offset: 0,
            multiplier: 1,
            id,
        }
    }

    #[test]
    fn accepts_nested_ranges() {
        // p9 > 10 ? (p9 > 20 ? a : b) : (p9 > -5 ? c : d)
        let nodes = vec![
            split(9, 10, 2, 1),
            split(9, 20, 4, 3),
            split(9, -5, 6, 5),
            leaf(0),
            leaf(1),
            leaf(2),
            leaf(3),
        ];
        assert!(validate_tree(&nodes).is_ok());
    }

    #[test]
    fn rejects_unreachable_branches() {
        // Under p9 > 10, splitting on p9 at 5 leaves the `<=` side empty.
        let nodes = vec![
            split(9, 10, 2, 1),
            split(9, 5, 4, 3),
            leaf(0),
            leaf(1),
            leaf(2),
        ];
        assert!(matches!(
            validate_tree(&nodes),
            Err(Error::TreeSplitOnEmptyRange(9, 5, 11, _))
        ));
        // Same on the `<=` side.
        let nodes = vec![
            split(4, 10, 1, 2),
            split(4, 10, 4, 3),
            leaf(0),
            leaf(1),
            leaf(2),
        ];
        assert!(matches!(
            validate_tree(&nodes),
            Err(Error::TreeSplitOnEmptyRange(4, 10, _, 10))
        ));
    }

    #[test]
    fn rejects_extreme_thresholds() {
        for val in [i32::MIN, i32::MAX] {
            let nodes = vec![split(3, val, 2, 1), leaf(0), leaf(1)];
            assert!(validate_tree(&nodes).is_err());
        }
        for val in [-i32::MAX, i32::MAX - 1] {
            let nodes = vec![split(3, val, 2, 1), leaf(0), leaf(1)];
            assert!(validate_tree(&nodes).is_ok());
        }
    }

    #[test]
    fn rejects_bad_children() {
        let nodes = vec![split(3, 0, 2, 5), leaf(0), leaf(1)];
        assert!(matches!(
            validate_tree(&nodes),
            Err(Error::InvalidTreeChild(0, 5))
        ));
        assert!(matches!(validate_tree(&[]), Err(Error::EmptyTree)));
    }

    #[test]
    fn siblings_do_not_share_ranges() {
        // Both subtrees split on p7 at 0, which is valid for each of them
        // independently.
        let nodes = vec![
            split(6, 0, 2, 1),
            split(7, 0, 4, 3),
            split(7, 0, 6, 5),
            leaf(0),
            leaf(1),
            leaf(2),
            leaf(3),
        ];
        assert!(validate_tree(&nodes).is_ok());
    }

    #[test]
    fn serialization_roundtrip() -> Result<()> {
        let mut builder = TreeBuilder::new(Leaf::new(Predictor::Gradient));
        let (gt, le) = builder.split(
            0,
            9,
            -3,
            Leaf {
                predictor: Predictor::Weighted,
                offset: -7,
                multiplier: 12,
            },
            Leaf::new(Predictor::West),
        )?;
        builder.split(
            le,
            15,
            100,
            Leaf::new(Predictor::Zero),
            Leaf::new(Predictor::North),
        )?;
        builder.set_leaf(
            gt,
            Leaf {
                predictor: Predictor::AverageAll,
                offset: 1 << 20,
                multiplier: 3 << 20,
            },
        )?;
        let tree = builder.build()?;
        let mut buffer = TokenBuffer::new();
        write_tokens(&mut buffer, &HybridUintConfig::default(), &tokenize_tree(&tree));
        let decoded = Tree::read(&mut buffer, 100)?;
        assert!(buffer.is_exhausted());
        assert_eq!(decoded, tree);
        assert_eq!(decoded.num_leaves(), 3);
        assert_eq!(decoded.max_property_count(), 16);
        assert_eq!(decoded.num_prev_channels(), 0);
        Ok(())
    }

    #[test]
    fn read_rejects_large_trees() {
        let config = HybridUintConfig::default();
        let mut buffer = TokenBuffer::new();
        // A chain of splits that never ends.
        for i in 0..20 {
            buffer.write_value(&config, PROPERTY_CONTEXT, 10);
            buffer.write_value(&config, SPLIT_VAL_CONTEXT, pack_signed(i));
        }
        assert!(matches!(
            Tree::read(&mut buffer, 8),
            Err(Error::TreeTooLarge(9, 8))
        ));
    }

    #[test]
    fn read_rejects_bad_leaves() {
        let config = HybridUintConfig::default();
        let mut buffer = TokenBuffer::new();
        buffer.write_value(&config, PROPERTY_CONTEXT, 0);
        buffer.write_value(&config, PREDICTOR_CONTEXT, 14);
        assert!(matches!(
            Tree::read(&mut buffer, 8),
            Err(Error::InvalidPredictor(14))
        ));
        let mut buffer = TokenBuffer::new();
        buffer.write_value(&config, PROPERTY_CONTEXT, 0);
        buffer.write_value(&config, PREDICTOR_CONTEXT, 0);
        buffer.write_value(&config, OFFSET_CONTEXT, 0);
        buffer.write_value(&config, MULTIPLIER_LOG_CONTEXT, 30);
        buffer.write_value(&config, MULTIPLIER_BITS_CONTEXT, 4);
        assert!(matches!(
            Tree::read(&mut buffer, 8),
            Err(Error::TreeMultiplierBitsTooLarge(4, 30))
        ));
        let mut buffer = TokenBuffer::new();
        buffer.write_value(&config, PROPERTY_CONTEXT, 257);
        assert!(matches!(
            Tree::read(&mut buffer, 8),
            Err(Error::InvalidProperty(256))
        ));
    }

    #[test]
    fn lookup_follows_comparisons() -> Result<()> {
        let mut builder = TreeBuilder::new(Leaf::new(Predictor::Zero));
        let (gt, _) = builder.split(
            0,
            7,
            5,
            Leaf::new(Predictor::North),
            Leaf::new(Predictor::West),
        )?;
        builder.split(
            gt,
            6,
            -1,
            Leaf::new(Predictor::Select),
            Leaf::new(Predictor::Gradient),
        )?;
        let tree = builder.build()?;
        let mut props = [0; 16];
        props[7] = 5;
        assert_eq!(tree.lookup(&props).predictor, Predictor::West);
        props[7] = 6;
        props[6] = -1;
        assert_eq!(tree.lookup(&props).predictor, Predictor::Gradient);
        props[6] = 0;
        assert_eq!(tree.lookup(&props).predictor, Predictor::Select);
        Ok(())
    }
}
