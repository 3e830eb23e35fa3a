// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::collections::VecDeque;

use super::{Leaf, MAX_TREE_SIZE, Tree, TreeNode};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
enum Node {
    Split {
        property: u8,
        val: i32,
        gt: usize,
        le: usize,
    },
    Leaf(Leaf),
}

/// Incrementally grows a tree by splitting leaves. Nodes can be added in
/// any order; [`TreeBuilder::build`] brings them into canonical order and
/// validates the result.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    nodes: Vec<Node>,
}

impl TreeBuilder {
    pub fn new(root: Leaf) -> Self {
        Self {
            nodes: vec![Node::Leaf(root)],
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn leaf_mut(&mut self, pos: usize) -> Result<&mut Leaf> {
        match self.nodes.get_mut(pos) {
            Some(Node::Leaf(leaf)) => Ok(leaf),
            _ => Err(Error::InvalidTreeChild(pos, pos)),
        }
    }

    pub fn leaf(&self, pos: usize) -> Option<Leaf> {
        match self.nodes.get(pos) {
            Some(Node::Leaf(leaf)) => Some(*leaf),
            _ => None,
        }
    }

    pub fn set_leaf(&mut self, pos: usize, leaf: Leaf) -> Result<()> {
        *self.leaf_mut(pos)? = leaf;
        Ok(())
    }

    pub fn set_multiplier(&mut self, pos: usize, multiplier: u32) -> Result<()> {
        self.leaf_mut(pos)?.multiplier = multiplier;
        Ok(())
    }

    /// Replaces the leaf at `pos` with a split on `property` at `val`.
    /// Returns the positions of the new `>` and `<=` leaves.
    pub fn split(
        &mut self,
        pos: usize,
        property: u8,
        val: i32,
        gt: Leaf,
        le: Leaf,
    ) -> Result<(usize, usize)> {
        self.leaf_mut(pos)?;
        if self.nodes.len() + 2 > MAX_TREE_SIZE {
            return Err(Error::TreeTooLarge(self.nodes.len() + 2, MAX_TREE_SIZE));
        }
        self.nodes.try_reserve(2)?;
        let gt_pos = self.nodes.len();
        let le_pos = gt_pos + 1;
        self.nodes.push(Node::Leaf(gt));
        self.nodes.push(Node::Leaf(le));
        self.nodes[pos] = Node::Split {
            property,
            val,
            gt: gt_pos,
            le: le_pos,
        };
        Ok((gt_pos, le_pos))
    }

    /// Produces the validated tree: breadth-first, `>` child first, leaf
    /// ids in order.
    pub fn build(self) -> Result<Tree> {
        let mut nodes = Vec::new();
        nodes.try_reserve(self.nodes.len())?;
        let mut queue = VecDeque::from([0usize]);
        let mut leaf_id = 0;
        while let Some(cur) = queue.pop_front() {
            match self.nodes[cur] {
                Node::Split {
                    property,
                    val,
                    gt,
                    le,
                } => {
                    let right = (nodes.len() + queue.len() + 1) as u32;
                    nodes.push(TreeNode::Split {
                        property,
                        val,
                        left: right + 1,
                        right,
                    });
                    queue.push_back(gt);
                    queue.push_back(le);
                }
                Node::Leaf(leaf) => {
                    if leaf.multiplier == 0 {
                        return Err(Error::ZeroMultiplier);
                    }
                    nodes.push(TreeNode::Leaf {
                        predictor: leaf.predictor,
                        offset: leaf.offset,
                        multiplier: leaf.multiplier,
                        id: leaf_id,
                    });
                    leaf_id += 1;
                }
            }
        }
        Tree::from_canonical_nodes(nodes)
    }
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::TreeBuilder;
    use crate::{
        error::{Error, Result},
        modular::{
            Predictor,
            tree::{Leaf, TreeNode},
        },
    };

    #[test]
    fn canonical_order() -> Result<()> {
        let mut builder = TreeBuilder::new(Leaf::new(Predictor::Zero));
        let (gt, le) = builder.split(0, 2, 4, Leaf::new(Predictor::West), Leaf::new(Predictor::North))?;
        // Split the `<=` leaf first so that insertion order differs from BFS.
        builder.split(le, 3, 1, Leaf::new(Predictor::Select), Leaf::new(Predictor::Gradient))?;
        builder.split(gt, 3, 7, Leaf::new(Predictor::NorthEast), Leaf::new(Predictor::NorthWest))?;
        let tree = builder.build()?;
        let nodes = tree.nodes();
        assert_eq!(
            nodes[..3],
            [
                TreeNode::Split {
                    property: 2,
                    val: 4,
                    left: 2,
                    right: 1
                },
                TreeNode::Split {
                    property: 3,
                    val: 7,
                    left: 4,
                    right: 3
                },
                TreeNode::Split {
                    property: 3,
                    val: 1,
                    left: 6,
                    right: 5
                },
            ]
        );
        let leaves: Vec<_> = nodes[3..]
            .iter()
            .map(|n| match n {
                TreeNode::Leaf { predictor, id, .. } => (*predictor, *id),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            leaves,
            vec![
                (Predictor::NorthEast, 0),
                (Predictor::NorthWest, 1),
                (Predictor::Select, 2),
                (Predictor::Gradient, 3)
            ]
        );
        Ok(())
    }

    #[test]
    fn fails_closed() -> Result<()> {
        let mut builder = TreeBuilder::new(Leaf::new(Predictor::Zero));
        builder.split(0, 2, 4, Leaf::new(Predictor::West), Leaf::new(Predictor::North))?;
        // Position 0 is no longer a leaf.
        assert!(builder.set_multiplier(0, 2).is_err());
        builder.set_multiplier(1, 0)?;
        assert!(matches!(builder.build(), Err(Error::ZeroMultiplier)));

        let mut builder = TreeBuilder::new(Leaf::new(Predictor::Zero));
        let (gt, _) = builder.split(0, 2, 4, Leaf::new(Predictor::West), Leaf::new(Predictor::North))?;
        builder.split(gt, 2, 3, Leaf::new(Predictor::West), Leaf::new(Predictor::North))?;
        assert!(matches!(
            builder.build(),
            Err(Error::TreeSplitOnEmptyRange(2, 3, 5, _))
        ));
        Ok(())
    }
}
