// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use super::{
    DecoderLimits, GroupHeader, ModularChannel, ModularImage, predict_channel::predict_channel,
    tree::Tree,
};
use crate::{
    entropy_coding::{HybridUintConfig, TokenReader},
    error::{Error, Result},
    image::Image,
    util::tracing_wrappers::*,
};

pub(super) fn make_pixel(dec: i32, mul: u32, guess: i64) -> i32 {
    (guess + (mul as i64) * (dec as i64)).clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Decodes the pixels of channel `chan` from `reader`, one residual per
/// pixel in scan order, read in the context of its leaf. Channels before
/// `chan` must already be decoded if the tree references them.
#[instrument(level = "debug", skip(channels, header, tree, reader), err)]
pub fn decode_channel(
    channels: &mut [ModularChannel],
    chan: usize,
    header: &GroupHeader,
    tree: &Tree,
    reader: &mut impl TokenReader,
) -> Result<()> {
    let size = channels
        .get(chan)
        .ok_or(Error::InvalidChannelRange(chan, chan + 1, channels.len()))?
        .size();
    let config = HybridUintConfig::default();
    let mut out = Image::new(size)?;
    predict_channel(channels, chan, header, tree, &mut out, |leaf, guess, _| {
        let dec = reader.read_signed(&config, leaf.context as usize)?;
        Ok(make_pixel(dec, leaf.multiplier, guess))
    })?;
    channels[chan].data = out;
    Ok(())
}

/// Reads a tree and the residuals of every channel of `image`, as written
/// by [`super::encode_image`], then undoes the transforms of `image`.
///
/// `image` is normally created by [`ModularImage::from_transforms`]. On
/// failure it is poisoned.
#[instrument(level = "debug", skip_all, err)]
pub fn decode_image(
    image: &mut ModularImage,
    header: &GroupHeader,
    limits: &DecoderLimits,
    reader: &mut impl TokenReader,
) -> Result<()> {
    let result = decode_image_channels(image, header, limits, reader);
    if result.is_err() {
        image.poison();
        return result;
    }
    image.undo_transforms()
}

fn decode_image_channels(
    image: &mut ModularImage,
    header: &GroupHeader,
    limits: &DecoderLimits,
    reader: &mut impl TokenReader,
) -> Result<()> {
    let tree = Tree::read(reader, limits.tree_size_limit(image.total_pixels()))?;
    let channels = image.channels_mut()?;
    for chan in 0..channels.len() {
        decode_channel(channels, chan, header, &tree, reader)?;
    }
    Ok(())
}
