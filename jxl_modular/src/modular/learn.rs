// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Encoder-side construction of MA trees.
//!
//! Pixels are sampled into [`TreeSamples`], which stores, for each sample,
//! its quantized properties and the cost of its residual under every
//! candidate predictor. [`learn_tree`] then grows a tree greedily, splitting
//! nodes while the estimated entropy decreases by more than a threshold.

mod gather;
mod samples;
mod split;

pub(crate) use gather::gather_image_data;
pub use gather::{PixelStatistics, gather_tree_data};
pub use samples::TreeSamples;
pub use split::learn_tree;

use super::properties::NUM_STATIC_PROPERTIES;

/// Half-open ranges `[begin, end)` of the static properties (channel index,
/// group id).
pub type StaticPropRange = [[u32; 2]; NUM_STATIC_PROPERTIES];

/// A region of the static property space whose leaves must use a fixed
/// multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplierInfo {
    pub range: StaticPropRange,
    pub multiplier: u32,
}
