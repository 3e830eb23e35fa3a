// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::collections::VecDeque;

use super::{LeafInfo, Tree, TreeNode};
use crate::{
    error::Result,
    modular::{
        Predictor,
        properties::{
            GRADIENT_PROP, NUM_NONREF_PROPERTIES, NUM_STATIC_PROPERTIES,
            PROPERTIES_PER_PREVCHAN, WP_PROP,
        },
    },
    util::NewWithCapacity,
};

/// A split node together with the splits of both its children, so that
/// one step of traversal descends two levels.
// Index 0 of `properties` and `splitvals` describes the `>` child, index 1
// the `<=` child. A child that is a leaf is represented by a placeholder
// split on property 0 whose two outcomes are the same leaf.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FlatTreeNode {
    Split {
        property0: usize,
        splitval0: i32,
        properties: [usize; 2],
        splitvals: [i32; 2],
        // First of the four grandchildren.
        child_id: u32,
    },
    Leaf(LeafInfo),
}

/// A tree specialised for one channel and group: splits on the static
/// properties are resolved and two tree levels are merged per node.
#[derive(Debug, Clone)]
pub struct FlatTree {
    pub(crate) nodes: Vec<FlatTreeNode>,
    /// Number of properties that must be computed for lookups.
    pub num_props: usize,
    /// The weighted predictor or its property is used.
    pub uses_wp: bool,
    /// Only the weighted predictor and its property are used.
    pub wp_only: bool,
    /// Only the Gradient predictor and the gradient property are used.
    pub gradient_only: bool,
}

fn resolve_static(tree: &[TreeNode], mut cur: usize, static_props: &[i32; 2]) -> usize {
    while let TreeNode::Split {
        property,
        val,
        left,
        right,
    } = tree[cur]
    {
        if property as usize >= NUM_STATIC_PROPERTIES {
            break;
        }
        cur = if static_props[property as usize] > val {
            right as usize
        } else {
            left as usize
        };
    }
    cur
}

/// Builds the flat tree for the pixels whose static properties are
/// `static_props` (channel index, group id).
pub fn filter_tree(tree: &Tree, static_props: [i32; NUM_STATIC_PROPERTIES]) -> Result<FlatTree> {
    let tree = tree.nodes();
    let mut num_props = 0;
    let mut has_wp = false;
    let mut has_non_wp = false;
    let mut gradient_only = true;
    let mut mark_property = |p: usize| {
        if p == WP_PROP {
            has_wp = true;
        } else if p >= NUM_STATIC_PROPERTIES {
            has_non_wp = true;
        }
        if p >= NUM_STATIC_PROPERTIES && p != GRADIENT_PROP {
            gradient_only = false;
        }
    };

    let mut output = Vec::new_with_capacity(tree.len())?;
    let mut queue = VecDeque::from([0usize]);
    while let Some(cur) = queue.pop_front() {
        let cur = resolve_static(tree, cur, &static_props);
        let (property0, splitval0, children) = match tree[cur] {
            TreeNode::Leaf {
                predictor,
                offset,
                multiplier,
                id,
            } => {
                output.push(FlatTreeNode::Leaf(LeafInfo {
                    predictor,
                    offset,
                    multiplier,
                    context: id,
                }));
                continue;
            }
            TreeNode::Split {
                property,
                val,
                left,
                right,
            } => (property as usize, val, [right as usize, left as usize]),
        };
        let child_id = (output.len() + queue.len() + 1) as u32;
        num_props = num_props.max(property0 + 1);
        mark_property(property0);
        let mut properties = [0; 2];
        let mut splitvals = [0; 2];
        for (i, child) in children.into_iter().enumerate() {
            let child = resolve_static(tree, child, &static_props);
            match tree[child] {
                TreeNode::Leaf { .. } => {
                    queue.push_back(child);
                    queue.push_back(child);
                }
                TreeNode::Split {
                    property,
                    val,
                    left,
                    right,
                } => {
                    properties[i] = property as usize;
                    splitvals[i] = val;
                    num_props = num_props.max(property as usize + 1);
                    mark_property(property as usize);
                    queue.push_back(right as usize);
                    queue.push_back(left as usize);
                }
            }
        }
        output.push(FlatTreeNode::Split {
            property0,
            splitval0,
            properties,
            splitvals,
            child_id,
        });
    }

    for node in output.iter() {
        if let FlatTreeNode::Leaf(leaf) = node {
            gradient_only &= leaf.predictor == Predictor::Gradient;
            has_wp |= leaf.predictor == Predictor::Weighted;
            has_non_wp |= leaf.predictor != Predictor::Weighted;
        }
    }

    let num_props = if num_props > NUM_NONREF_PROPERTIES {
        (num_props - NUM_NONREF_PROPERTIES).div_ceil(PROPERTIES_PER_PREVCHAN)
            * PROPERTIES_PER_PREVCHAN
            + NUM_NONREF_PROPERTIES
    } else {
        NUM_NONREF_PROPERTIES
    };

    Ok(FlatTree {
        nodes: output,
        num_props,
        uses_wp: has_wp,
        wp_only: has_wp && !has_non_wp,
        gradient_only,
    })
}

impl FlatTree {
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// The leaf of a tree that has no splits left after filtering.
    pub fn single_leaf(&self) -> Option<LeafInfo> {
        match self.nodes.as_slice() {
            [FlatTreeNode::Leaf(leaf)] => Some(*leaf),
            _ => None,
        }
    }

    #[inline]
    pub fn lookup(&self, properties: &[i32]) -> LeafInfo {
        let mut pos = 0;
        loop {
            match self.nodes[pos] {
                FlatTreeNode::Leaf(leaf) => return leaf,
                FlatTreeNode::Split {
                    property0,
                    splitval0,
                    properties: props,
                    splitvals,
                    child_id,
                } => {
                    let off = if properties[property0] <= splitval0 {
                        2 + (properties[props[1]] <= splitvals[1]) as u32
                    } else {
                        (properties[props[0]] <= splitvals[0]) as u32
                    };
                    pos = (child_id + off) as usize;
                }
            }
        }
    }
}
