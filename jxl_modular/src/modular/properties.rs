// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Per-pixel context properties.
//!
//! Layout: 0 channel, 1 group, 2 y, 3 x, 4 |N|, 5 |W|, 6 N, 7 W,
//! 8 W minus the previous value of property 9, 9 W+N-NW, 10 W-NW, 11 NW-N,
//! 12 N-NE, 13 N-NN, 14 W-WW, 15 weighted predictor error. Each referenced
//! previous channel then adds |v|, v, |v-g| and v-g, where g is the clamped
//! gradient of that channel at the same position.

use super::{
    ModularChannel,
    predict::{PredictionData, WeightedPredictorState, clamped_gradient},
};
use crate::image::Image;

pub const NUM_STATIC_PROPERTIES: usize = 2;
pub const NUM_NONREF_PROPERTIES: usize = 16;
pub const PROPERTIES_PER_PREVCHAN: usize = 4;
pub const GRADIENT_PROP: usize = 9;
pub const WP_PROP: usize = 15;

pub fn num_properties(num_prev_channels: usize) -> usize {
    NUM_NONREF_PROPERTIES + num_prev_channels * PROPERTIES_PER_PREVCHAN
}

/// Properties are kept in a symmetric range so that every split threshold
/// leaves both branches reachable.
#[inline]
pub fn saturate_property(value: i64) -> i32 {
    value.clamp(-(i32::MAX as i64), i32::MAX as i64) as i32
}

/// Resets the row-dependent properties. Must be called at the start of
/// every row.
pub fn init_props_row(properties: &mut [i32], static_props: [i32; NUM_STATIC_PROPERTIES], y: usize) {
    properties[..NUM_STATIC_PROPERTIES].copy_from_slice(&static_props);
    properties[2] = saturate_property(y as i64);
    properties[GRADIENT_PROP] = 0;
}

/// Fills `references` (one row per pixel of row `y` of channel `chan`) with
/// the properties derived from earlier channels of the same shape, most
/// recent first. Unused entries are zero.
pub fn precompute_references(
    channels: &[ModularChannel],
    chan: usize,
    y: usize,
    references: &mut Image<i32>,
) {
    references.fill(0);
    let num_extra_props = references.size().0;
    let mut offset = 0;
    for j in (0..chan).rev() {
        if offset >= num_extra_props {
            break;
        }
        if channels[j].data.size() != channels[chan].data.size()
            || channels[j].shift != channels[chan].shift
        {
            continue;
        }
        let ref_chan_row = channels[j].data.row(y);
        let ref_chan_prev = channels[j].data.row(y.saturating_sub(1));
        for x in 0..channels[chan].data.size().0 {
            let ref_row = references.row_mut(x);
            let v = ref_chan_row[x] as i64;
            let vleft = if x > 0 { ref_chan_row[x - 1] as i64 } else { 0 };
            let vtop = if y > 0 { ref_chan_prev[x] as i64 } else { vleft };
            let vtopleft = if x > 0 && y > 0 {
                ref_chan_prev[x - 1] as i64
            } else {
                vleft
            };
            let diff = v - clamped_gradient(vleft, vtop, vtopleft);
            ref_row[offset] = saturate_property(v.abs());
            ref_row[offset + 1] = saturate_property(v);
            ref_row[offset + 2] = saturate_property(diff.abs());
            ref_row[offset + 3] = saturate_property(diff);
        }
        offset += PROPERTIES_PER_PREVCHAN;
    }
}

/// Computes the properties of pixel `(x, y)` into `properties`, whose static
/// properties must already be set by [`init_props_row`]. Returns the
/// weighted predictor's prediction, or 0 without a predictor state.
#[inline]
pub fn compute_properties(
    data: &PredictionData,
    (x, y): (usize, usize),
    wp_state: Option<&mut WeightedPredictorState>,
    references: &Image<i32>,
    properties: &mut [i32],
) -> i64 {
    let left = data.left as i64;
    let top = data.top as i64;
    let topleft = data.topleft as i64;
    let topright = data.topright as i64;
    let toptop = data.toptop as i64;
    let leftleft = data.leftleft as i64;

    properties[3] = saturate_property(x as i64);

    properties[4] = saturate_property(top.abs());
    properties[5] = saturate_property(left.abs());
    properties[6] = saturate_property(top);
    properties[7] = saturate_property(left);

    properties[8] = saturate_property(left - properties[GRADIENT_PROP] as i64);
    properties[GRADIENT_PROP] = saturate_property(left + top - topleft);

    properties[10] = saturate_property(left - topleft);
    properties[11] = saturate_property(topleft - top);
    properties[12] = saturate_property(top - topright);
    properties[13] = saturate_property(top - toptop);
    properties[14] = saturate_property(left - leftleft);

    let (wp_pred, wp_prop) = wp_state
        .map(|wp_state| wp_state.predict_and_property((x, y), data))
        .unwrap_or((0, 0));
    properties[WP_PROP] = saturate_property(wp_prop);

    let num_refs = references.size().0;
    if num_refs != 0 {
        let ref_properties = &mut properties[NUM_NONREF_PROPERTIES..];
        let n = num_refs.min(ref_properties.len());
        ref_properties[..n].copy_from_slice(&references.row(x)[..n]);
    }

    wp_pred
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;
    use crate::{error::Result, modular::ModularChannel};

    #[test]
    fn neighbour_properties() -> Result<()> {
        let mut data = Image::<i32>::new((4, 3))?;
        for y in 0..3 {
            for x in 0..4 {
                data.set(x, y, (y * y * 10 + x * 3) as i32);
            }
        }
        let references = Image::<i32>::new((0, 4))?;
        let mut props = vec![0; num_properties(0)];
        init_props_row(&mut props, [7, 3], 2);
        let d = PredictionData::get(&data, 1, 2);
        compute_properties(&d, (1, 2), None, &references, &mut props);
        // W = 40, N = 13, NW = 10, NE = 16, NN = 3, WW = 40.
        assert_eq!(
            props,
            vec![7, 3, 2, 1, 13, 40, 13, 40, 40, 43, 30, -3, -3, 10, 0, 0]
        );
        let d = PredictionData::get(&data, 2, 2);
        compute_properties(&d, (2, 2), None, &references, &mut props);
        // Property 8 is W minus the previous pixel's property 9.
        assert_eq!(props[8], 43 - 43);
        Ok(())
    }

    #[test]
    fn references_skip_other_shapes() -> Result<()> {
        let mut channels = vec![
            ModularChannel::new((2, 2))?,
            ModularChannel::new((3, 2))?,
            ModularChannel::new((2, 2))?,
            ModularChannel::new((2, 2))?,
        ];
        channels[0].data.set(1, 1, -5);
        channels[2].data.set(1, 1, 9);
        let mut references = Image::<i32>::new((12, 2))?;
        precompute_references(&channels, 3, 1, &mut references);
        // Channel 2 first, then channel 0; channel 1 has another size.
        assert_eq!(references.row(1)[..4], [9, 9, 9, 9]);
        assert_eq!(references.row(1)[4..8], [5, -5, 5, -5]);
        assert_eq!(references.row(1)[8..], [0, 0, 0, 0]);
        Ok(())
    }

    #[test]
    fn references_saturate() -> Result<()> {
        let mut chan0 = ModularChannel::new((1, 2))?;
        chan0.data.set(0, 0, i32::MIN);
        chan0.data.set(0, 1, i32::MAX);
        let channels = vec![chan0, ModularChannel::new((1, 2))?];
        let mut references = Image::<i32>::new((4, 1))?;
        precompute_references(&channels, 1, 1, &mut references);
        assert_eq!(references.row(0)[0], i32::MAX);
        assert_eq!(references.row(0)[2], i32::MAX);
        assert_eq!(references.row(0)[3], i32::MAX);
        let mut chan0 = ModularChannel::new((1, 1))?;
        chan0.data.set(0, 0, i32::MIN);
        let channels = vec![chan0, ModularChannel::new((1, 1))?];
        precompute_references(&channels, 1, 0, &mut references);
        assert_eq!(references.row(0)[1], -i32::MAX);
        Ok(())
    }
}
