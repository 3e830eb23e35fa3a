// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use super::{MultiplierInfo, StaticPropRange, TreeSamples};
use crate::{
    error::{Error, Result},
    modular::{
        ModularOptions,
        predict::Predictor,
        properties::{NUM_STATIC_PROPERTIES, WP_PROP},
        tree::{Leaf, Tree, TreeBuilder},
    },
    util::{map_items, tracing_wrappers::*},
};

/// Probabilities are floored at one entry of the ANS distribution table.
const ANS_TAB_SIZE: f32 = 4096.0;

/// Estimated cost in bits of coding a histogram, with every present symbol
/// costing at most `log2(ANS_TAB_SIZE)` bits.
fn estimate_bits(counts: &[u64]) -> f32 {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let inv_total = 1.0 / total as f32;
    counts
        .iter()
        .filter(|&&count| count != 0 && count != total)
        .map(|&count| {
            let prob = (count as f32 * inv_total).max(1.0 / ANS_TAB_SIZE);
            -(count as f32) * prob.log2()
        })
        .sum()
}

enum Intersection {
    None,
    /// The multiplier range cuts the node range on `axis` just above `val`.
    Partial {
        axis: usize,
        val: u32,
    },
    Inside,
}

/// Intersects the static range of a node with a multiplier range.
fn box_intersects(node: &StaticPropRange, range: &StaticPropRange) -> Intersection {
    let mut partial = None;
    for axis in 0..NUM_STATIC_PROPERTIES {
        let [begin, end] = node[axis];
        let [rbegin, rend] = range[axis];
        if rbegin >= end || rend <= begin {
            return Intersection::None;
        }
        if rbegin <= begin && rend >= end {
            continue;
        }
        let val = if rbegin > begin { rbegin - 1 } else { rend - 1 };
        partial = Some((axis, val));
    }
    match partial {
        Some((axis, val)) => Intersection::Partial { axis, val },
        None => Intersection::Inside,
    }
}

/// Reorders samples `begin..end` so that the `pos - begin` samples with
/// the smallest value of property `prop` come first. Three-way quickselect.
fn split_tree_samples(samples: &mut TreeSamples, begin: usize, pos: usize, end: usize, prop: usize) {
    let mut rng = XorShiftRng::seed_from_u64(0);
    let (mut begin, mut end) = (begin, end);
    while end > begin + 1 {
        let pivot = rng.random_range(begin..end);
        samples.swap(begin, pivot);
        let mut pivot_begin = begin;
        let mut pivot_end = begin + 1;
        for i in begin + 1..end {
            let value = samples.property(prop, i);
            let pivot = samples.property(prop, pivot_begin);
            if value < pivot {
                samples.three_shuffle(pivot_begin, pivot_end, i);
                pivot_begin += 1;
                pivot_end += 1;
            } else if value == pivot {
                samples.swap(pivot_end, i);
                pivot_end += 1;
            }
        }
        // [begin, pivot_begin) < pivot, [pivot_begin, pivot_end) == pivot,
        // [pivot_end, end) > pivot.
        if pivot_begin > pos {
            end = pivot_begin;
        } else if pivot_end < pos {
            begin = pivot_end;
        } else {
            break;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitInfo {
    /// Property index in the samples.
    prop: usize,
    /// Quantized threshold.
    val: usize,
    /// First sample on the `>` side.
    pos: usize,
    lcost: f32,
    rcost: f32,
    lpred: Predictor,
    rpred: Predictor,
}

impl Default for SplitInfo {
    fn default() -> Self {
        Self {
            prop: 0,
            val: 0,
            pos: 0,
            lcost: f32::MAX,
            rcost: f32::MAX,
            lpred: Predictor::Zero,
            rpred: Predictor::Zero,
        }
    }
}

impl SplitInfo {
    fn cost(&self) -> f32 {
        self.lcost + self.rcost
    }

    fn keep_cheaper(&mut self, other: &SplitInfo) {
        if other.cost() < self.cost() {
            *self = *other;
        }
    }
}

/// Best split of each category found for one node.
#[derive(Debug, Default, Clone, Copy)]
struct Candidates {
    /// On a static property, with one side of zero cost.
    static_constant: SplitInfo,
    static_: SplitInfo,
    /// Introduces the WP property or the Weighted predictor.
    nonstatic: SplitInfo,
    nowp: SplitInfo,
}

#[derive(Debug, Clone, Copy)]
struct CostInfo {
    cost: f32,
    extra_cost: f32,
    pred: Predictor,
}

impl Default for CostInfo {
    fn default() -> Self {
        Self {
            cost: f32::MAX,
            extra_cost: 0.0,
            pred: Predictor::Zero,
        }
    }
}

impl CostInfo {
    fn total(&self) -> f32 {
        self.cost + self.extra_cost
    }
}

/// Token statistics of the samples of one node.
struct NodeStats {
    begin: usize,
    end: usize,
    predictor: Predictor,
    used_properties: u64,
    max_symbols: usize,
    /// `max_symbols` entries per predictor.
    counts: Vec<u64>,
    extra_bits: Vec<u64>,
    change_pred_penalty: f32,
}

impl NodeStats {
    fn new(samples: &TreeSamples, begin: usize, end: usize, predictor: Predictor) -> Self {
        let num_predictors = samples.num_predictors();
        let max_symbols = (0..num_predictors)
            .flat_map(|pred| (begin..end).map(move |i| samples.token(pred, i).token as usize + 1))
            .max()
            .unwrap_or(1);
        let mut counts = vec![0u64; max_symbols * num_predictors];
        let mut extra_bits = vec![0u64; num_predictors];
        for pred in 0..num_predictors {
            let histogram = &mut counts[pred * max_symbols..(pred + 1) * max_symbols];
            for i in begin..end {
                let token = samples.token(pred, i);
                let count = samples.count(i);
                histogram[token.token as usize] += count;
                extra_bits[pred] += token.nbits as u64 * count;
            }
        }
        Self {
            begin,
            end,
            predictor,
            used_properties: 0,
            max_symbols,
            counts,
            extra_bits,
            change_pred_penalty: 0.0,
        }
    }

    fn histogram(&self, pred: usize) -> &[u64] {
        &self.counts[pred * self.max_symbols..(pred + 1) * self.max_symbols]
    }

    /// Cost of the node without splitting, with its current predictor.
    fn base_bits(&self, samples: &TreeSamples) -> f32 {
        let pred = samples.predictor_index(self.predictor);
        estimate_bits(self.histogram(pred)) + self.extra_bits[pred] as f32
    }

    /// Sweeps the thresholds of property `prop` and returns the best split
    /// of every category.
    fn evaluate_property(&self, samples: &TreeSamples, prop: usize) -> Candidates {
        let mut candidates = Candidates::default();
        let max_symbols = self.max_symbols;
        let prop_size = samples.num_property_values(prop);
        let mut used_count = vec![0usize; prop_size];
        let mut first_used = prop_size;
        let mut last_used = 0;
        for i in self.begin..self.end {
            let p = samples.property(prop, i);
            used_count[p] += 1;
            first_used = first_used.min(p);
            last_used = last_used.max(p);
        }
        if first_used >= last_used {
            return candidates;
        }

        let mut costs_l = vec![CostInfo::default(); last_used - first_used];
        let mut costs_r = vec![CostInfo::default(); last_used - first_used];
        let mut count_increase = vec![0u64; prop_size * max_symbols];
        let mut extra_bits_increase = vec![0u64; prop_size];
        let mut counts_above = vec![0u64; max_symbols];
        let mut counts_below = vec![0u64; max_symbols];
        for pred in 0..samples.num_predictors() {
            for i in self.begin..self.end {
                let p = samples.property(prop, i);
                let count = samples.count(i);
                let token = samples.token(pred, i);
                count_increase[p * max_symbols + token.token as usize] += count;
                extra_bits_increase[p] += token.nbits as u64 * count;
            }
            counts_above.copy_from_slice(self.histogram(pred));
            counts_below.fill(0);
            let predictor = samples.predictor(pred);
            let mut penalty = 0.0;
            // Moving away from Weighted is never discouraged.
            if predictor != self.predictor && self.predictor != Predictor::Weighted {
                penalty = self.change_pred_penalty;
            }
            // Ties favour Zero and disfavour Weighted.
            if predictor == Predictor::Weighted {
                penalty += 1e-8;
            }
            if predictor == Predictor::Zero {
                penalty -= 1e-8;
            }
            let mut extra_bits_below = 0;
            // The last used value is excluded so that neither side is empty.
            for i in first_used..last_used {
                if used_count[i] == 0 {
                    continue;
                }
                extra_bits_below += extra_bits_increase[i];
                extra_bits_increase[i] = 0;
                let increase = &mut count_increase[i * max_symbols..(i + 1) * max_symbols];
                for ((above, below), inc) in counts_above
                    .iter_mut()
                    .zip(counts_below.iter_mut())
                    .zip(increase.iter_mut())
                {
                    *above -= *inc;
                    *below += *inc;
                    *inc = 0;
                }
                let rcost = estimate_bits(&counts_above)
                    + (self.extra_bits[pred] - extra_bits_below) as f32;
                let lcost = estimate_bits(&counts_below) + extra_bits_below as f32;
                let r = &mut costs_r[i - first_used];
                if rcost + penalty < r.total() {
                    *r = CostInfo {
                        cost: rcost,
                        extra_cost: penalty,
                        pred: predictor,
                    };
                }
                let l = &mut costs_l[i - first_used];
                if lcost + penalty < l.total() {
                    *l = CostInfo {
                        cost: lcost,
                        extra_cost: penalty,
                        pred: predictor,
                    };
                }
            }
            extra_bits_increase[last_used] = 0;
            count_increase[last_used * max_symbols..(last_used + 1) * max_symbols].fill(0);
        }

        let is_wp_prop = samples.property_from_index(prop) == WP_PROP as u32;
        let mut split = self.begin;
        for i in first_used..last_used {
            if used_count[i] == 0 {
                continue;
            }
            split += used_count[i];
            let l = costs_l[i - first_used];
            let r = costs_r[i - first_used];
            let adds_wp = (is_wp_prop && self.used_properties & (1 << prop) == 0)
                || ((l.pred == Predictor::Weighted || r.pred == Predictor::Weighted)
                    && self.predictor != Predictor::Weighted);
            let zero_entropy_side = l.cost == 0.0 || r.cost == 0.0;
            let best = match (prop < NUM_STATIC_PROPERTIES, zero_entropy_side, adds_wp) {
                (true, true, _) => &mut candidates.static_constant,
                (true, false, _) => &mut candidates.static_,
                (false, _, true) => &mut candidates.nonstatic,
                (false, _, false) => &mut candidates.nowp,
            };
            best.keep_cheaper(&SplitInfo {
                prop,
                val: i,
                pos: split,
                lcost: l.cost,
                rcost: r.cost,
                lpred: l.pred,
                rpred: r.pred,
            });
        }
        candidates
    }
}

struct NodeInfo {
    pos: usize,
    begin: usize,
    end: usize,
    used_properties: u64,
    static_prop_range: StaticPropRange,
}

/// Split forced by a multiplier range that cuts through the node.
fn forced_split(
    samples: &TreeSamples,
    node: &NodeInfo,
    predictor: Predictor,
    axis: usize,
    val: u32,
    range: &StaticPropRange,
) -> Result<SplitInfo> {
    let value = i32::try_from(val).map_err(|_| Error::InvalidMultiplierRange(*range))?;
    let quantized = samples.quantize_property(axis, value);
    if samples.unquantize_property(axis, quantized) != Some(value) {
        return Err(Error::InvalidMultiplierRange(*range));
    }
    let below = (node.begin..node.end)
        .filter(|&i| samples.property(axis, i) <= quantized)
        .count();
    Ok(SplitInfo {
        prop: axis,
        val: quantized,
        pos: node.begin + below,
        lcost: 0.0,
        rcost: 0.0,
        lpred: predictor,
        rpred: predictor,
    })
}

/// Grows the tree in `builder` from its root leaf, one node at a time.
fn find_best_split(
    samples: &mut TreeSamples,
    threshold: f32,
    multiplier_info: &[MultiplierInfo],
    static_prop_range: StaticPropRange,
    fast_decode_multiplier: f32,
    builder: &mut TreeBuilder,
) -> Result<()> {
    let mut nodes = vec![NodeInfo {
        pos: 0,
        begin: 0,
        end: samples.num_distinct_samples(),
        used_properties: 0,
        static_prop_range,
    }];
    let property_indices: Vec<usize> = (0..samples.num_properties()).collect();
    // Noisier estimates for lower thresholds: discourage changing predictors.
    let change_pred_penalty = 800.0 / (100.0 + threshold);

    while let Some(node) = nodes.pop() {
        let leaf = builder
            .leaf(node.pos)
            .ok_or(Error::InvalidTreeChild(node.pos, node.pos))?;

        // Multiplier ranges are resolved even for nodes without samples, so
        // that every leaf lies either inside or outside of each range.
        let mut forced = None;
        for info in multiplier_info {
            match box_intersects(&node.static_prop_range, &info.range) {
                Intersection::None => continue,
                Intersection::Inside => {
                    builder.set_multiplier(node.pos, info.multiplier)?;
                }
                Intersection::Partial { axis, val } => {
                    forced = Some(forced_split(
                        samples,
                        &node,
                        leaf.predictor,
                        axis,
                        val,
                        &info.range,
                    )?);
                }
            }
            break;
        }

        let best = match forced {
            Some(split) => split,
            None => {
                if node.begin == node.end {
                    continue;
                }
                let mut stats = NodeStats::new(samples, node.begin, node.end, leaf.predictor);
                stats.used_properties = node.used_properties;
                stats.change_pred_penalty = change_pred_penalty;
                let base_bits = stats.base_bits(samples);
                if base_bits <= threshold {
                    continue;
                }
                let samples_ref = &*samples;
                let per_property =
                    map_items(&property_indices, |&prop| stats.evaluate_property(samples_ref, prop));
                let mut candidates = Candidates::default();
                for c in per_property.iter() {
                    candidates.static_constant.keep_cheaper(&c.static_constant);
                    candidates.static_.keep_cheaper(&c.static_);
                    candidates.nonstatic.keep_cheaper(&c.nonstatic);
                    candidates.nowp.keep_cheaper(&c.nowp);
                }

                let mut best = candidates.nonstatic;
                // Avoid introducing WP.
                let nowp = candidates.nowp;
                if nowp.cost() + threshold < base_bits
                    && nowp.cost() <= fast_decode_multiplier * best.cost()
                {
                    best = nowp;
                }
                // Static splits are cheap to decode.
                let static_ = candidates.static_;
                if static_.cost() + threshold < base_bits
                    && static_.cost() <= fast_decode_multiplier * best.cost()
                {
                    best = static_;
                }
                // Constant nodes are cheaper still.
                if candidates.static_constant.cost() + threshold < base_bits {
                    best = candidates.static_constant;
                }
                if best.cost() + threshold >= base_bits {
                    continue;
                }
                best
            }
        };

        let property = samples.property_from_index(best.prop);
        let dequant = samples
            .unquantize_property(best.prop, best.val)
            .ok_or(Error::InvalidProperty(property))?;
        let (gt_pos, le_pos) = builder.split(
            node.pos,
            property as u8,
            dequant,
            Leaf::new(best.rpred),
            Leaf::new(best.lpred),
        )?;
        trace!(
            pos = node.pos,
            property,
            dequant,
            samples = node.end - node.begin,
            "split"
        );
        split_tree_samples(samples, node.begin, best.pos, node.end, best.prop);

        let mut used_properties = node.used_properties;
        if property as usize >= NUM_STATIC_PROPERTIES {
            used_properties |= 1 << best.prop;
        }
        let mut le_range = node.static_prop_range;
        let mut gt_range = node.static_prop_range;
        if (property as usize) < NUM_STATIC_PROPERTIES {
            let bound = u32::try_from(i64::from(dequant) + 1).map_err(|_| Error::ArithmeticOverflow)?;
            le_range[property as usize][1] = bound;
            gt_range[property as usize][0] = bound;
        }
        nodes.push(NodeInfo {
            pos: le_pos,
            begin: node.begin,
            end: best.pos,
            used_properties,
            static_prop_range: le_range,
        });
        nodes.push(NodeInfo {
            pos: gt_pos,
            begin: best.pos,
            end: node.end,
            used_properties,
            static_prop_range: gt_range,
        });
    }
    Ok(())
}

/// Learns a tree from `samples`, drawn from `total_pixels` pixels.
///
/// Leaves whose static range (channel, group) lies inside a range of
/// `multiplier_info` use its multiplier; the tree is split at the
/// boundaries of those ranges, which must be quantization thresholds of
/// the static properties (see [`TreeSamples::pre_quantize_properties`]).
/// An upper bound of 0 in `static_prop_range` stands for `u32::MAX`.
#[instrument(level = "debug", skip(samples, options, multiplier_info), err)]
pub fn learn_tree(
    mut samples: TreeSamples,
    total_pixels: usize,
    options: &ModularOptions,
    multiplier_info: &[MultiplierInfo],
    mut static_prop_range: StaticPropRange,
) -> Result<Tree> {
    if multiplier_info.iter().any(|info| info.multiplier == 0) {
        return Err(Error::ZeroMultiplier);
    }
    for range in static_prop_range.iter_mut() {
        if range[1] == 0 {
            range[1] = u32::MAX;
        }
    }
    if !samples.has_samples() {
        return Tree::single_leaf(samples.predictor(0), 0, 1);
    }
    let pixel_fraction = samples.num_samples() as f32 / total_pixels.max(1) as f32;
    let threshold = options.splitting_heuristics_node_threshold * (pixel_fraction * 0.9 + 0.1);
    samples.all_samples_done();

    let mut builder = TreeBuilder::new(Leaf::new(samples.predictor(0)));
    find_best_split(
        &mut samples,
        threshold,
        multiplier_info,
        static_prop_range,
        options.fast_decode_multiplier,
        &mut builder,
    )?;
    let tree = builder.build()?;
    debug!(
        nodes = tree.nodes().len(),
        leaves = tree.num_leaves(),
        distinct_samples = samples.num_distinct_samples(),
        "learned tree"
    );
    Ok(tree)
}
