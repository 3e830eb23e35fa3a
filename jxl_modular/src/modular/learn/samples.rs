// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use super::{MultiplierInfo, PixelStatistics, StaticPropRange};
use crate::{
    entropy_coding::{HybridUintConfig, pack_signed},
    error::{Error, Result},
    modular::{
        ModularOptions, PredictorChoice, WpTreeMode,
        predict::Predictor,
        properties::{NUM_NONREF_PROPERTIES, NUM_STATIC_PROPERTIES, WP_PROP, num_properties},
    },
    util::tracing_wrappers::*,
};

/// Property values are clamped to `[-PROPERTY_RANGE, PROPERTY_RANGE]` before
/// quantization.
const PROPERTY_RANGE: i32 = 511;
const DEDUP_ENTRY_UNUSED: u32 = u32::MAX;
/// At most this many properties can be tracked per tree node.
const MAX_PROPERTIES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct ResidualToken {
    pub token: u8,
    pub nbits: u8,
}

/// Deduplicated samples for tree learning. Each distinct sample stores
/// quantized properties, one residual token per candidate predictor and a
/// repetition count.
#[derive(Debug)]
pub struct TreeSamples {
    predictors: Vec<Predictor>,
    props_to_use: Vec<u32>,
    // One column per predictor and per property.
    residuals: Vec<Vec<ResidualToken>>,
    props: Vec<Vec<u16>>,
    sample_counts: Vec<u16>,
    num_samples: usize,
    /// Sorted thresholds of each property; a quantized value `q` stands for
    /// the values in `(thresholds[q - 1], thresholds[q]]`.
    compact_properties: Vec<Vec<i32>>,
    property_mapping: Vec<Vec<u16>>,
    // Two-choice hash table of sample indices.
    dedup_table: Vec<u32>,
}

/// Thresholds splitting the histogram into `num_chunks` chunks of similar
/// mass. Returns fewer than `num_chunks` thresholds.
fn quantize_histogram(histogram: &[u32], num_chunks: usize) -> Vec<i32> {
    let num_chunks = num_chunks as u64;
    let sum: u64 = histogram.iter().map(|&x| x as u64).sum();
    if sum == 0 || num_chunks == 0 {
        return vec![];
    }
    let mut thresholds = vec![];
    let mut cumsum = 0u64;
    let mut threshold = 1u64;
    for (i, &count) in histogram.iter().enumerate() {
        cumsum += count as u64;
        if cumsum * num_chunks >= threshold * sum {
            thresholds.push(i as i32);
            while cumsum * num_chunks >= threshold * sum {
                threshold += 1;
            }
        }
    }
    // The last chunk ends at the end of the histogram.
    thresholds.pop();
    thresholds
}

fn quantize_samples(samples: &[i32], num_chunks: usize) -> Vec<i32> {
    const RANGE: i32 = 512;
    let Some(&min) = samples.iter().min() else {
        return vec![];
    };
    let min = min.clamp(-RANGE, RANGE);
    let mut counts = vec![0u32; 2 * RANGE as usize + 1];
    for &s in samples {
        counts[(s.clamp(-RANGE, RANGE) - min) as usize] += 1;
    }
    let mut thresholds = quantize_histogram(&counts, num_chunks);
    for v in thresholds.iter_mut() {
        *v += min;
    }
    thresholds
}

fn quantize_coordinate(max_property_values: usize) -> Vec<i32> {
    let mut thresholds: Vec<i32> = (0..max_property_values.saturating_sub(1))
        .map(|i| ((i + 1) * 256 / max_property_values) as i32 - 1)
        .collect();
    thresholds.dedup();
    thresholds
}

fn quantize_wp(max_property_values: usize) -> Vec<i32> {
    if max_property_values < 32 {
        return vec![-127, -63, -31, -15, -7, -3, -1, 0, 1, 3, 7, 15, 31, 63, 127];
    }
    if max_property_values < 64 {
        return vec![
            -255, -191, -127, -95, -63, -47, -31, -23, -15, -11, -7, -5, -3, -1, 0, 1, 3, 5, 7,
            11, 15, 23, 31, 47, 63, 95, 127, 191, 255,
        ];
    }
    vec![
        -255, -223, -191, -159, -127, -111, -95, -79, -63, -55, -47, -39, -31, -27, -23, -19, -15,
        -13, -11, -9, -7, -6, -5, -4, -3, -2, -1, 0, 1, 2, 3, 4, 5, 6, 7, 9, 11, 13, 15, 19, 23,
        27, 31, 39, 47, 55, 63, 79, 95, 111, 127, 159, 191, 223, 255,
    ]
}

/// Thresholds of the static property `axis` implied by the boundaries of
/// the multiplier ranges.
fn multiplier_thresholds(
    range: &StaticPropRange,
    multiplier_info: &[MultiplierInfo],
    axis: usize,
) -> Vec<i32> {
    let mut thresholds: Vec<i32> = multiplier_info
        .iter()
        .flat_map(|info| {
            (0..2).filter_map(move |side| {
                let bound = info.range[axis][side];
                (bound != range[axis][side]).then(|| bound as i64 - 1)
            })
        })
        .filter_map(|v| i32::try_from(v).ok())
        .collect();
    thresholds.sort_unstable();
    thresholds.dedup();
    thresholds
}

fn rotate3<T: Copy>(v: &mut [T], a: usize, b: usize, c: usize) {
    let tmp = v[a];
    v[a] = v[c];
    v[c] = v[b];
    v[b] = tmp;
}

impl TreeSamples {
    /// Selects the candidate predictors and properties for `options`.
    /// Properties are quantized without statistics until
    /// [`TreeSamples::pre_quantize_properties`] is called.
    pub fn new(options: &ModularOptions) -> Result<TreeSamples> {
        let predictors = match (options.wp_tree_mode, options.predictor) {
            (WpTreeMode::WpOnly, _) => vec![Predictor::Weighted],
            (WpTreeMode::NoWp, PredictorChoice::Fixed(Predictor::Weighted)) => {
                return Err(Error::InvalidPredictorSettings);
            }
            (_, PredictorChoice::Fixed(predictor)) => vec![predictor],
            (_, PredictorChoice::Best) => vec![Predictor::Weighted, Predictor::Gradient],
            (_, PredictorChoice::Variable) => {
                let mut predictors: Vec<_> = Predictor::all().collect();
                predictors.swap(0, Predictor::Weighted as usize);
                predictors.swap(1, Predictor::Gradient as usize);
                predictors
            }
        };
        let predictors: Vec<_> = if options.wp_tree_mode == WpTreeMode::NoWp {
            predictors
                .into_iter()
                .filter(|p| *p != Predictor::Weighted)
                .collect()
        } else {
            predictors
        };

        // Static properties come first so that their index is the property.
        let mut props_to_use: Vec<u32> = (0..NUM_STATIC_PROPERTIES as u32).collect();
        let requested: Vec<u32> = match options.wp_tree_mode {
            WpTreeMode::WpOnly => vec![WP_PROP as u32],
            _ => options
                .splitting_heuristics_properties
                .iter()
                .copied()
                .chain(
                    NUM_NONREF_PROPERTIES as u32
                        ..num_properties(options.max_properties) as u32,
                )
                .collect(),
        };
        for p in requested {
            if options.wp_tree_mode == WpTreeMode::NoWp && p == WP_PROP as u32 {
                continue;
            }
            if !props_to_use.contains(&p) {
                props_to_use.push(p);
            }
        }
        let available = num_properties(options.max_properties).min(u8::MAX as usize + 1);
        if props_to_use.len() > MAX_PROPERTIES
            || props_to_use.iter().any(|&p| p as usize >= available)
        {
            return Err(Error::InvalidPropertySet);
        }
        debug!(?predictors, ?props_to_use, "tree samples");

        let mut samples = TreeSamples {
            residuals: vec![vec![]; predictors.len()],
            props: vec![vec![]; props_to_use.len()],
            predictors,
            props_to_use,
            sample_counts: vec![],
            num_samples: 0,
            compact_properties: vec![],
            property_mapping: vec![],
            dedup_table: vec![],
        };
        let range = [[0, u32::MAX]; NUM_STATIC_PROPERTIES];
        samples.pre_quantize_properties(
            &range,
            &[],
            PixelStatistics::default(),
            options.max_property_values,
        );
        Ok(samples)
    }

    pub fn num_predictors(&self) -> usize {
        self.predictors.len()
    }

    pub fn predictor(&self, index: usize) -> Predictor {
        self.predictors[index]
    }

    pub fn predictors(&self) -> &[Predictor] {
        &self.predictors
    }

    pub(super) fn predictor_index(&self, predictor: Predictor) -> usize {
        self.predictors
            .iter()
            .position(|&p| p == predictor)
            .unwrap_or_default()
    }

    pub fn num_properties(&self) -> usize {
        self.props_to_use.len()
    }

    pub fn property_from_index(&self, index: usize) -> u32 {
        self.props_to_use[index]
    }

    pub fn num_property_values(&self, index: usize) -> usize {
        self.compact_properties[index].len() + 1
    }

    pub fn has_samples(&self) -> bool {
        !self.sample_counts.is_empty()
    }

    /// Number of samples added, duplicates included.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn num_distinct_samples(&self) -> usize {
        self.sample_counts.len()
    }

    #[inline]
    pub(super) fn token(&self, predictor: usize, sample: usize) -> ResidualToken {
        self.residuals[predictor][sample]
    }

    #[inline]
    pub(super) fn count(&self, sample: usize) -> u64 {
        self.sample_counts[sample] as u64
    }

    #[inline]
    pub(super) fn property(&self, index: usize, sample: usize) -> usize {
        self.props[index][sample] as usize
    }

    pub fn quantize_property(&self, index: usize, value: i32) -> usize {
        let pos = value.clamp(-PROPERTY_RANGE, PROPERTY_RANGE) + PROPERTY_RANGE;
        self.property_mapping[index][pos as usize] as usize
    }

    /// The largest property value that quantizes to `quantized`, which is
    /// the split threshold that separates it from larger values.
    pub fn unquantize_property(&self, index: usize, quantized: usize) -> Option<i32> {
        self.compact_properties[index].get(quantized).copied()
    }

    /// Chooses the quantization thresholds of every property: static
    /// properties from pixel counts (or multiplier boundaries), coordinates
    /// uniformly, pixel-valued properties from sampled value quantiles and
    /// the WP property from a fixed list.
    pub fn pre_quantize_properties(
        &mut self,
        range: &StaticPropRange,
        multiplier_info: &[MultiplierInfo],
        mut stats: PixelStatistics,
        max_property_values: usize,
    ) {
        let channel_thresholds = multiplier_thresholds(range, multiplier_info, 0);
        let group_thresholds = multiplier_thresholds(range, multiplier_info, 1);

        let pixel_thr = quantize_samples(&stats.pixel_samples, max_property_values);
        let diff_thr = quantize_samples(&stats.diff_samples, max_property_values);
        for v in stats
            .pixel_samples
            .iter_mut()
            .chain(stats.diff_samples.iter_mut())
        {
            *v = v.saturating_abs();
        }
        let abs_pixel_thr = quantize_samples(&stats.pixel_samples, max_property_values);
        let abs_diff_thr = quantize_samples(&stats.diff_samples, max_property_values);

        self.compact_properties = self
            .props_to_use
            .iter()
            .map(|&p| {
                let p = p as usize;
                let ref_kind = p.checked_sub(NUM_NONREF_PROPERTIES).map(|r| r % 4);
                match (p, ref_kind) {
                    (0, _) if !channel_thresholds.is_empty() => channel_thresholds.clone(),
                    (0, _) => quantize_histogram(&stats.channel_pixel_count, max_property_values),
                    (1, _) if !group_thresholds.is_empty() => group_thresholds.clone(),
                    (1, _) => quantize_histogram(&stats.group_pixel_count, max_property_values),
                    (2 | 3, _) => quantize_coordinate(max_property_values),
                    (6..=8, _) | (_, Some(1)) => pixel_thr.clone(),
                    (4 | 5, _) | (_, Some(0)) => abs_pixel_thr.clone(),
                    (_, Some(2)) => abs_diff_thr.clone(),
                    (WP_PROP, _) => quantize_wp(max_property_values),
                    _ => diff_thr.clone(),
                }
            })
            .collect();

        self.property_mapping = self
            .compact_properties
            .iter()
            .map(|thresholds| {
                let mut mapped = 0;
                (-PROPERTY_RANGE..=PROPERTY_RANGE)
                    .map(|v| {
                        while mapped < thresholds.len() && v > thresholds[mapped] {
                            mapped += 1;
                        }
                        mapped as u16
                    })
                    .collect()
            })
            .collect();
        trace!(thresholds = ?self.compact_properties, "quantized properties");
    }

    fn hash1(&self, a: usize) -> usize {
        const CONSTANT: u64 = 0x1e35a7bd;
        let mut h = CONSTANT;
        for r in self.residuals.iter() {
            h = h.wrapping_mul(CONSTANT).wrapping_add(r[a].token as u64);
            h = h.wrapping_mul(CONSTANT).wrapping_add(r[a].nbits as u64);
        }
        for p in self.props.iter() {
            h = h.wrapping_mul(CONSTANT).wrapping_add(p[a] as u64);
        }
        ((h >> 16) as usize) & (self.dedup_table.len() - 1)
    }

    fn hash2(&self, a: usize) -> usize {
        const CONSTANT: u64 = 0x1e35a7bd1e35a7bd;
        let mut h = CONSTANT;
        for p in self.props.iter() {
            h = h.wrapping_mul(CONSTANT) ^ p[a] as u64;
        }
        for r in self.residuals.iter() {
            h = h.wrapping_mul(CONSTANT) ^ r[a].token as u64;
            h = h.wrapping_mul(CONSTANT) ^ r[a].nbits as u64;
        }
        ((h >> 16) as usize) & (self.dedup_table.len() - 1)
    }

    fn is_same_sample(&self, a: usize, b: usize) -> bool {
        self.residuals.iter().all(|r| r[a] == r[b]) && self.props.iter().all(|p| p[a] == p[b])
    }

    fn add_to_table(&mut self, a: usize) {
        let pos1 = self.hash1(a);
        let pos2 = self.hash2(a);
        if self.dedup_table[pos1] == DEDUP_ENTRY_UNUSED {
            self.dedup_table[pos1] = a as u32;
        } else if self.dedup_table[pos2] == DEDUP_ENTRY_UNUSED {
            self.dedup_table[pos2] = a as u32;
        }
    }

    /// Merges sample `a` into an equal sample, if the table knows one.
    fn add_to_table_and_merge(&mut self, a: usize) -> bool {
        if self.dedup_table.is_empty() {
            return false;
        }
        for pos in [self.hash1(a), self.hash2(a)] {
            let entry = self.dedup_table[pos];
            if entry != DEDUP_ENTRY_UNUSED && self.is_same_sample(a, entry as usize) {
                let count = &mut self.sample_counts[entry as usize];
                *count += 1;
                // Saturated samples are no longer merged into.
                if *count == u16::MAX {
                    self.dedup_table[pos] = DEDUP_ENTRY_UNUSED;
                }
                return true;
            }
        }
        self.add_to_table(a);
        false
    }

    /// Grows the deduplication table for `num_samples` more samples.
    pub fn prepare_for_samples(&mut self, num_samples: usize) {
        for r in self.residuals.iter_mut() {
            r.reserve(num_samples);
        }
        for p in self.props.iter_mut() {
            p.reserve(num_samples);
        }
        let total = num_samples + self.sample_counts.len();
        let size = (total * 3 / 2).max(1).next_power_of_two();
        if self.dedup_table.len() == size {
            return;
        }
        self.dedup_table = vec![DEDUP_ENTRY_UNUSED; size];
        for i in 0..self.sample_counts.len() {
            if self.sample_counts[i] != u16::MAX {
                self.add_to_table(i);
            }
        }
    }

    /// Adds a sample with value `pixel`. `properties` is the full property
    /// vector and `predictions` holds one prediction per candidate
    /// predictor.
    pub fn add_sample(&mut self, pixel: i32, properties: &[i32], predictions: &[i64]) {
        let config = HybridUintConfig::for_tree_learning();
        for (residuals, &prediction) in self.residuals.iter_mut().zip(predictions) {
            let residual = (pixel as i64).wrapping_sub(prediction) as i32;
            let split = config.encode(pack_signed(residual));
            residuals.push(ResidualToken {
                token: split.token as u8,
                nbits: split.nbits as u8,
            });
        }
        for i in 0..self.props_to_use.len() {
            let q = self.quantize_property(i, properties[self.props_to_use[i] as usize]);
            self.props[i].push(q as u16);
        }
        self.sample_counts.push(1);
        self.num_samples += 1;
        if self.add_to_table_and_merge(self.sample_counts.len() - 1) {
            for r in self.residuals.iter_mut() {
                r.pop();
            }
            for p in self.props.iter_mut() {
                p.pop();
            }
            self.sample_counts.pop();
        }
    }

    /// Drops the deduplication table; called once all samples are added.
    pub fn all_samples_done(&mut self) {
        self.dedup_table = vec![];
    }

    pub(super) fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        for r in self.residuals.iter_mut() {
            r.swap(a, b);
        }
        for p in self.props.iter_mut() {
            p.swap(a, b);
        }
        self.sample_counts.swap(a, b);
    }

    /// Moves `c` to `a`, `a` to `b` and `b` to `c`.
    pub(super) fn three_shuffle(&mut self, a: usize, b: usize, c: usize) {
        if b == c {
            return self.swap(a, b);
        }
        for r in self.residuals.iter_mut() {
            rotate3(r, a, b, c);
        }
        for p in self.props.iter_mut() {
            rotate3(p, a, b, c);
        }
        rotate3(&mut self.sample_counts, a, b, c);
    }
}
