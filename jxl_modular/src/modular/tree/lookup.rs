// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use super::{FlatTree, LeafInfo, flat::FlatTreeNode};
use crate::modular::{
    Predictor,
    properties::{GRADIENT_PROP, NUM_STATIC_PROPERTIES, WP_PROP},
};

const LUT_MIN: i32 = -512;
const LUT_MAX: i32 = 511;
const LUT_SIZE: usize = (LUT_MAX - LUT_MIN + 1) as usize;

/// Leaf lookup for flat trees that split on a single property (the
/// gradient property with Gradient leaves, or the weighted predictor
/// property with Weighted leaves), indexed by the clamped property value.
#[derive(Debug, Clone)]
pub struct LookupTable {
    property: usize,
    predictor: Predictor,
    context: Vec<u32>,
    offset: Vec<i8>,
    multiplier: Vec<u8>,
}

impl LookupTable {
    /// Returns `None` if the tree is not of a supported shape, has a split
    /// value outside of `[-512, 510]`, or has leaves whose offset or
    /// multiplier do not fit in the table.
    pub fn from_flat_tree(tree: &FlatTree) -> Option<LookupTable> {
        let (property, predictor) = if tree.gradient_only {
            (GRADIENT_PROP, Predictor::Gradient)
        } else if tree.wp_only {
            (WP_PROP, Predictor::Weighted)
        } else {
            return None;
        };
        let mut table = LookupTable {
            property,
            predictor,
            context: vec![0; LUT_SIZE],
            offset: vec![0; LUT_SIZE],
            multiplier: vec![0; LUT_SIZE],
        };

        let in_table = |v: i32| (LUT_MIN..LUT_MAX).contains(&v);
        // (begin, end] value ranges with the node that handles them.
        let mut stack = vec![(LUT_MIN - 1, LUT_MAX, 0usize)];
        while let Some((begin, end, pos)) = stack.pop() {
            match tree.nodes[pos] {
                FlatTreeNode::Leaf(leaf) => {
                    let offset = i8::try_from(leaf.offset).ok()?;
                    let multiplier = u8::try_from(leaf.multiplier).ok()?;
                    if multiplier > i8::MAX as u8 || leaf.predictor != predictor {
                        return None;
                    }
                    for v in begin + 1..=end {
                        let i = (v - LUT_MIN) as usize;
                        table.context[i] = leaf.context;
                        table.offset[i] = offset;
                        table.multiplier[i] = multiplier;
                    }
                }
                FlatTreeNode::Split {
                    property0,
                    splitval0,
                    properties,
                    splitvals,
                    child_id,
                } => {
                    if property0 != property || !in_table(splitval0) {
                        return None;
                    }
                    let child_id = child_id as usize;
                    let ranges = [(splitval0, end), (begin, splitval0)];
                    for (i, (lo, hi)) in ranges.into_iter().enumerate() {
                        let first = child_id + 2 * i;
                        if properties[i] < NUM_STATIC_PROPERTIES {
                            // Placeholder: both grandchildren are the same leaf.
                            stack.push((lo, hi, first));
                            continue;
                        }
                        if properties[i] != property || !in_table(splitvals[i]) {
                            return None;
                        }
                        stack.push((splitvals[i].max(lo), hi, first));
                        stack.push((lo, splitvals[i].min(hi), first + 1));
                    }
                }
            }
        }
        Some(table)
    }

    /// Index of the property the table is keyed on.
    pub fn property(&self) -> usize {
        self.property
    }

    #[inline]
    pub fn lookup(&self, value: i32) -> LeafInfo {
        let i = (value.clamp(LUT_MIN, LUT_MAX) - LUT_MIN) as usize;
        LeafInfo {
            predictor: self.predictor,
            offset: self.offset[i] as i32,
            multiplier: self.multiplier[i] as u32,
            context: self.context[i],
        }
    }
}

#[cfg(test)]
mod test {
    use rand::SeedableRng;
    use test_log::test;

    use super::LookupTable;
    use crate::{
        error::Result,
        modular::{
            Predictor,
            properties::{GRADIENT_PROP, WP_PROP},
            tree::{Leaf, Tree, TreeBuilder, filter_tree},
        },
        util::test::random_tree,
    };

    fn check_equivalent(tree: &Tree, property: usize, static_props: [i32; 2]) -> Result<()> {
        let flat = filter_tree(tree, static_props)?;
        let Some(table) = LookupTable::from_flat_tree(&flat) else {
            // Only trees that collapse to a single leaf may lack a table.
            assert!(flat.single_leaf().is_some());
            return Ok(());
        };
        assert_eq!(table.property(), property);
        let mut props = vec![0; 16];
        props[0] = static_props[0];
        props[1] = static_props[1];
        let probes = (-700..=700)
            .chain([-i32::MAX, -100_000, 100_000, i32::MAX])
            .collect::<Vec<_>>();
        for v in probes {
            props[property] = v;
            assert_eq!(table.lookup(v), tree.lookup(&props), "value {v}");
        }
        Ok(())
    }

    #[test]
    fn gradient_table_matches_tree() -> Result<()> {
        let mut rng = rand_xorshift::XorShiftRng::seed_from_u64(3);
        for num_splits in [1, 4, 16, 40] {
            let tree = random_tree(&mut rng, num_splits, &[0, 1, 9], &[Predictor::Gradient], 400)?;
            for static_props in [[0, 0], [1, 2], [-5, 7]] {
                check_equivalent(&tree, GRADIENT_PROP, static_props)?;
            }
        }
        Ok(())
    }

    #[test]
    fn weighted_table_matches_tree() -> Result<()> {
        let mut rng = rand_xorshift::XorShiftRng::seed_from_u64(4);
        for num_splits in [1, 8, 30] {
            let tree = random_tree(&mut rng, num_splits, &[15], &[Predictor::Weighted], 500)?;
            check_equivalent(&tree, WP_PROP, [0, 0])?;
        }
        Ok(())
    }

    #[test]
    fn unsupported_trees_have_no_table() -> Result<()> {
        let leaf = Leaf::new(Predictor::Gradient);

        let mut builder = TreeBuilder::new(leaf);
        builder.split(0, 9, 511, leaf, leaf)?;
        let flat = filter_tree(&builder.build()?, [0, 0])?;
        assert!(flat.gradient_only);
        assert!(LookupTable::from_flat_tree(&flat).is_none());

        let mut builder = TreeBuilder::new(leaf);
        builder.split(0, 9, 0, Leaf { offset: 200, ..leaf }, leaf)?;
        let flat = filter_tree(&builder.build()?, [0, 0])?;
        assert!(LookupTable::from_flat_tree(&flat).is_none());

        let mut builder = TreeBuilder::new(leaf);
        builder.split(0, 6, 0, leaf, leaf)?;
        let flat = filter_tree(&builder.build()?, [0, 0])?;
        assert!(!flat.gradient_only);
        assert!(LookupTable::from_flat_tree(&flat).is_none());

        let mut builder = TreeBuilder::new(leaf);
        builder.split(0, 9, -512, leaf, leaf)?;
        let flat = filter_tree(&builder.build()?, [0, 0])?;
        assert!(LookupTable::from_flat_tree(&flat).is_some());
        Ok(())
    }
}
