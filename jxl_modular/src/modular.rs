// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

mod channel;
mod decode;
mod encode;
pub mod learn;
mod options;
pub mod predict;
mod predict_channel;
pub mod properties;
pub mod transforms;
pub mod tree;

pub use channel::*;
pub use decode::*;
pub use encode::*;
pub use options::*;
pub use predict::{Predictor, WeightedHeader};
pub use transforms::{PaletteParams, SqueezeParams, Transform};
pub use tree::{Tree, TreeNode};
