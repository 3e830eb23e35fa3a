// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use rand::{Rng, RngCore, SeedableRng};
use rand_xorshift::XorShiftRng;

use super::TreeSamples;
use crate::{
    error::Result,
    image::Image,
    modular::{
        ModularChannel, ModularOptions,
        predict::{PredictionData, WeightedHeader, WeightedPredictorState},
        properties::{
            NUM_NONREF_PROPERTIES, compute_properties, init_props_row, num_properties,
            precompute_references,
        },
    },
    util::tracing_wrappers::*,
};

/// Pixel statistics used to choose property quantization thresholds.
#[derive(Debug, Clone, Default)]
pub struct PixelStatistics {
    /// Number of pixels per group id.
    pub group_pixel_count: Vec<u32>,
    /// Number of pixels per channel index.
    pub channel_pixel_count: Vec<u32>,
    /// Sampled pixel values.
    pub pixel_samples: Vec<i32>,
    /// Sampled differences between horizontally adjacent pixels.
    pub diff_samples: Vec<i32>,
}

/// Non-empty channels used for learning. Learning stops at the first
/// non-meta channel that exceeds `max_chan_size` on either axis.
fn learnable_channels<'a>(
    channels: &'a [ModularChannel],
    nb_meta_channels: usize,
    options: &ModularOptions,
) -> impl Iterator<Item = (usize, &'a ModularChannel)> + 'a {
    let max_size = options.max_chan_size;
    channels
        .iter()
        .enumerate()
        .take_while(move |(i, c)| {
            let (w, h) = c.size();
            *i < nb_meta_channels || (w <= max_size && h <= max_size)
        })
        .filter(|(_, c)| !c.info().is_empty())
}

impl PixelStatistics {
    /// Adds a sparse sample (about a tenth of `nb_repeats`) of the pixels of
    /// group `group_id`.
    pub fn collect(
        &mut self,
        channels: &[ModularChannel],
        nb_meta_channels: usize,
        group_id: u32,
        options: &ModularOptions,
    ) {
        if options.nb_repeats <= 0.0 {
            return;
        }
        let group = group_id as usize;
        if self.group_pixel_count.len() <= group {
            self.group_pixel_count.resize(group + 1, 0);
        }
        if self.channel_pixel_count.len() < channels.len() {
            self.channel_pixel_count.resize(channels.len(), 0);
        }
        let fraction = (options.nb_repeats as f64 * 0.1).min(0.99);
        let mut rng = XorShiftRng::seed_from_u64(options.sampling_seed ^ group_id as u64);
        for (i, channel) in learnable_channels(channels, nb_meta_channels, options) {
            let (w, h) = channel.size();
            if w <= 1 {
                continue;
            }
            let pixels = (w * h).min(u32::MAX as usize) as u32;
            self.group_pixel_count[group] = self.group_pixel_count[group].saturating_add(pixels);
            self.channel_pixel_count[i] = self.channel_pixel_count[i].saturating_add(pixels);
            for row in channel.data.rows() {
                for x in 0..w {
                    if !rng.random_bool(fraction) {
                        continue;
                    }
                    let xp = if x == 0 { 1 } else { x - 1 };
                    self.pixel_samples.push(row[x]);
                    self.diff_samples.push(row[x].saturating_sub(row[xp]));
                }
            }
        }
        trace!(pixels = self.pixel_samples.len(), "collected pixel statistics");
    }
}

/// Samples the pixels of channel `chan` into `samples`. Every pixel is
/// counted in `total_pixels`; a fraction `nb_repeats` of them (at least 1024
/// per channel, when learning is enabled) is added as a sample.
#[instrument(level = "debug", skip(channels, wp_header, options, samples, total_pixels), err)]
pub fn gather_tree_data(
    channels: &[ModularChannel],
    chan: usize,
    group_id: u32,
    wp_header: &WeightedHeader,
    options: &ModularOptions,
    samples: &mut TreeSamples,
    total_pixels: &mut usize,
) -> Result<()> {
    let channel = &channels[chan];
    let (w, h) = channel.size();
    if w == 0 || h == 0 {
        return Ok(());
    }
    *total_pixels += w * h;
    let mut fraction = (options.nb_repeats as f64).min(1.0);
    if fraction <= 0.0 {
        // Learning is disabled.
        return Ok(());
    }
    fraction = fraction.max((1024.0 / (w * h) as f64).min(1.0));
    let threshold = ((u32::MAX as f64) * fraction) as u64;
    let mut rng = XorShiftRng::seed_from_u64(options.sampling_seed);

    let mut properties = vec![0; num_properties(options.max_properties)];
    let num_refs = properties.len() - NUM_NONREF_PROPERTIES;
    let mut references = Image::new((num_refs, w))?;
    let mut wp_state = WeightedPredictorState::new(wp_header, w)?;
    let mut predictions = vec![0; samples.num_predictors()];
    samples.prepare_for_samples((fraction * (w * h) as f64) as usize + 64);

    let static_props = [chan as i32, group_id as i32];
    for y in 0..h {
        if num_refs > 0 {
            precompute_references(channels, chan, y, &mut references);
        }
        init_props_row(&mut properties, static_props, y);
        let row = channel.data.row(y);
        for x in 0..w {
            let data = PredictionData::get(&channel.data, x, y);
            let wp_pred = compute_properties(
                &data,
                (x, y),
                Some(&mut wp_state),
                &references,
                &mut properties,
            );
            for (prediction, predictor) in predictions.iter_mut().zip(samples.predictors()) {
                *prediction = predictor.predict_one(data, wp_pred);
            }
            if (rng.next_u64() >> 32) <= threshold {
                samples.add_sample(row[x], &properties, &predictions);
            }
            wp_state.update_errors(row[x], (x, y));
        }
    }
    Ok(())
}

/// Samples every channel of an image that is used for learning.
pub(crate) fn gather_image_data(
    channels: &[ModularChannel],
    nb_meta_channels: usize,
    group_id: u32,
    wp_header: &WeightedHeader,
    options: &ModularOptions,
    samples: &mut TreeSamples,
) -> Result<usize> {
    let mut total_pixels = 0;
    let indices: Vec<_> = learnable_channels(channels, nb_meta_channels, options)
        .map(|(i, _)| i)
        .collect();
    for i in indices {
        gather_tree_data(
            channels,
            i,
            group_id,
            wp_header,
            options,
            samples,
            &mut total_pixels,
        )?;
    }
    Ok(total_pixels)
}
