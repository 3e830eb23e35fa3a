// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use super::{
    GroupHeader, ModularChannel,
    predict::{PredictionData, WeightedPredictorState},
    properties::{
        GRADIENT_PROP, NUM_NONREF_PROPERTIES, compute_properties, init_props_row,
        precompute_references, saturate_property,
    },
    tree::{FlatTree, LeafInfo, LookupTable, Tree, filter_tree},
};
use crate::{error::Result, image::Image, util::tracing_wrappers::*};

/// Runs the tree-selected predictors over channel `chan`, in scan order.
///
/// For every pixel `process` receives the leaf, the prediction (including
/// the leaf offset) and the position, and returns the pixel value, which is
/// stored in `out` and used as context for the following pixels. `out`
/// must have the size of the channel. Earlier channels are only read for
/// cross-channel properties.
pub(super) fn predict_channel(
    channels: &[ModularChannel],
    chan: usize,
    header: &GroupHeader,
    tree: &Tree,
    out: &mut Image<i32>,
    mut process: impl FnMut(LeafInfo, i64, (usize, usize)) -> Result<i32>,
) -> Result<()> {
    let (w, h) = out.size();
    if w == 0 || h == 0 {
        return Ok(());
    }
    let static_props = [chan as i32, header.group_id as i32];
    let flat = filter_tree(tree, static_props)?;
    let mut wp_state = if flat.uses_wp {
        Some(WeightedPredictorState::new(&header.wp_header, w)?)
    } else {
        None
    };

    if let Some(leaf) = flat.single_leaf() {
        trace!(?leaf, "single leaf");
        for y in 0..h {
            for x in 0..w {
                let data = PredictionData::get(out, x, y);
                let wp_pred = wp_state
                    .as_mut()
                    .map_or(0, |state| state.predict_and_property((x, y), &data).0);
                let guess = leaf.predictor.predict_one(data, wp_pred) + leaf.offset as i64;
                let value = process(leaf, guess, (x, y))?;
                out.set(x, y, value);
                if let Some(state) = wp_state.as_mut() {
                    state.update_errors(value, (x, y));
                }
            }
        }
        return Ok(());
    }

    if let Some(table) = LookupTable::from_flat_tree(&flat) {
        trace!(property = table.property(), "lookup table");
        for y in 0..h {
            for x in 0..w {
                let data = PredictionData::get(out, x, y);
                let (wp_pred, key) = if table.property() == GRADIENT_PROP {
                    let gradient = data.left as i64 + data.top as i64 - data.topleft as i64;
                    (0, saturate_property(gradient))
                } else if let Some(state) = wp_state.as_mut() {
                    let (pred, property) = state.predict_and_property((x, y), &data);
                    (pred, saturate_property(property))
                } else {
                    (0, 0)
                };
                let leaf = table.lookup(key);
                let guess = leaf.predictor.predict_one(data, wp_pred) + leaf.offset as i64;
                let value = process(leaf, guess, (x, y))?;
                out.set(x, y, value);
                if let Some(state) = wp_state.as_mut() {
                    state.update_errors(value, (x, y));
                }
            }
        }
        return Ok(());
    }

    predict_with_tree(channels, chan, static_props, &flat, wp_state, out, process)
}

fn predict_with_tree(
    channels: &[ModularChannel],
    chan: usize,
    static_props: [i32; 2],
    flat: &FlatTree,
    mut wp_state: Option<WeightedPredictorState>,
    out: &mut Image<i32>,
    mut process: impl FnMut(LeafInfo, i64, (usize, usize)) -> Result<i32>,
) -> Result<()> {
    let (w, h) = out.size();
    let num_refs = flat.num_props.saturating_sub(NUM_NONREF_PROPERTIES);
    let mut references = Image::new((num_refs, w))?;
    let mut properties = vec![0; flat.num_props];
    trace!(num_props = flat.num_props, nodes = flat.num_nodes(), "tree traversal");
    for y in 0..h {
        if num_refs > 0 {
            precompute_references(channels, chan, y, &mut references);
        }
        init_props_row(&mut properties, static_props, y);
        for x in 0..w {
            let data = PredictionData::get(out, x, y);
            let wp_pred = compute_properties(
                &data,
                (x, y),
                wp_state.as_mut(),
                &references,
                &mut properties,
            );
            let leaf = flat.lookup(&properties);
            let guess = leaf.predictor.predict_one(data, wp_pred) + leaf.offset as i64;
            let value = process(leaf, guess, (x, y))?;
            out.set(x, y, value);
            if let Some(state) = wp_state.as_mut() {
                state.update_errors(value, (x, y));
            }
        }
    }
    Ok(())
}
