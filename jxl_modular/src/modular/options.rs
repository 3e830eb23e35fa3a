// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use super::{
    predict::{Predictor, WeightedHeader},
    properties::NUM_NONREF_PROPERTIES,
};
use crate::error::Result;

/// Predictor selection for the encoder. The meta-choices are resolved while
/// learning the tree and never appear in a serialized tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorChoice {
    Fixed(Predictor),
    /// Gradient or Weighted, chosen per leaf.
    Best,
    /// Any predictor, chosen per leaf.
    Variable,
}

impl Default for PredictorChoice {
    fn default() -> Self {
        PredictorChoice::Fixed(Predictor::Gradient)
    }
}

/// Restricts which predictors and properties the learned tree may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WpTreeMode {
    #[default]
    Default,
    /// Only the Weighted predictor and the WP property.
    WpOnly,
    /// Neither the Weighted predictor nor the WP property.
    NoWp,
}

#[derive(Debug, Clone)]
pub struct ModularOptions {
    /// Fraction of pixels sampled for tree learning.
    pub nb_repeats: f32,
    /// Maximum number of quantized values per property while learning.
    pub max_property_values: usize,
    pub splitting_heuristics_node_threshold: f32,
    /// A split on a static property is preferred if it costs at most this
    /// factor more than the best split.
    pub fast_decode_multiplier: f32,
    /// Number of previous channels referenced by properties.
    pub max_properties: usize,
    pub predictor: PredictorChoice,
    pub wp_tree_mode: WpTreeMode,
    /// Weighted predictor preset, 0 to 4.
    pub wp_mode: u32,
    /// Channels larger than this on either axis are not sampled.
    pub max_chan_size: usize,
    /// Non-static properties the learner may split on. Properties 0 and 1
    /// are always considered.
    pub splitting_heuristics_properties: Vec<u32>,
    /// Seed of the pixel sampler.
    pub sampling_seed: u64,
}

impl Default for ModularOptions {
    fn default() -> Self {
        Self {
            nb_repeats: 0.5,
            max_property_values: 32,
            splitting_heuristics_node_threshold: 96.0,
            fast_decode_multiplier: 1.01,
            max_properties: 0,
            predictor: PredictorChoice::default(),
            wp_tree_mode: WpTreeMode::Default,
            wp_mode: 0,
            max_chan_size: 0xFFFFFF,
            splitting_heuristics_properties: (2..NUM_NONREF_PROPERTIES as u32).collect(),
            sampling_seed: 0,
        }
    }
}

impl ModularOptions {
    pub fn wp_header(&self) -> Result<WeightedHeader> {
        WeightedHeader::preset(self.wp_mode)
    }

    /// Header of group `group_id`, with the weighted predictor preset of
    /// `wp_mode`.
    pub fn group_header(&self, group_id: u32) -> Result<GroupHeader> {
        Ok(GroupHeader {
            group_id,
            wp_header: self.wp_header()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DecoderLimits {
    /// Maximum number of tree nodes. Defaults to
    /// `min(1 << 20, 1024 + total_pixels)` when `None`.
    pub max_tree_size: Option<usize>,
    /// Maximum number of pixels per channel.
    pub max_channel_size: usize,
    /// Maximum number of squeeze steps in a transform list.
    pub max_squeeze_steps: usize,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_tree_size: None,
            max_channel_size: 1 << 30,
            max_squeeze_steps: 1 << 10,
        }
    }
}

impl DecoderLimits {
    pub fn tree_size_limit(&self, total_pixels: usize) -> usize {
        self.max_tree_size
            .unwrap_or_else(|| (1 << 20).min(1024usize.saturating_add(total_pixels)))
    }
}

/// Per-group parameters shared by the encoder and the decoder, normally
/// carried by the container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupHeader {
    /// Value of property 1 for every pixel in the group.
    pub group_id: u32,
    pub wp_header: WeightedHeader,
}
