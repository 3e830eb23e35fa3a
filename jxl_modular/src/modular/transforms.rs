// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Reversible channel transforms. Each transform can be applied forward on
//! pixel data (encoder), inverted (decoder), or applied to channel shapes
//! only, which tells a decoder which channels to expect.

use super::{ChannelInfo, ImageSkeleton, ModularImage};
use crate::{
    error::{Error, Result},
    util::tracing_wrappers::*,
};

mod palette;
mod rct;
mod squeeze;

pub use palette::PaletteParams;
pub use rct::{RctOp, RctPermutation};
pub use squeeze::{SqueezeParams, default_squeeze_params};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    /// Reversible color transform of channels `begin_c..begin_c + 3`.
    Rct { begin_c: usize, rct_type: u32 },
    Palette(PaletteParams),
    /// A list of squeeze steps, applied in order. An empty list stands for
    /// the default steps for the image and is resolved when the transform
    /// is applied.
    Squeeze(Vec<SqueezeParams>),
}

fn check_channel_range(num_channels: usize, begin_c: usize, num_c: usize) -> Result<()> {
    match begin_c.checked_add(num_c) {
        Some(end) if num_c > 0 && end <= num_channels => Ok(()),
        _ => Err(Error::InvalidChannelRange(
            begin_c,
            begin_c.saturating_add(num_c),
            num_channels,
        )),
    }
}

#[instrument(level = "trace", err)]
fn check_equal_channels(channels: &[ChannelInfo], begin_c: usize, num_c: usize) -> Result<()> {
    check_channel_range(channels.len(), begin_c, num_c)?;
    let first = channels[begin_c];
    if channels[begin_c + 1..begin_c + num_c]
        .iter()
        .any(|c| *c != first)
    {
        return Err(Error::MixingDifferentChannels);
    }
    Ok(())
}

impl Transform {
    /// Updates `skeleton` to the channel layout the forward transform
    /// produces, resolving default squeeze parameters.
    #[instrument(level = "debug", skip(skeleton), err)]
    pub fn meta_apply(&mut self, skeleton: &mut ImageSkeleton) -> Result<()> {
        match self {
            Transform::Rct { begin_c, rct_type } => {
                rct::check_rct(&skeleton.channels, *begin_c, *rct_type)?;
            }
            Transform::Palette(params) => params.meta_apply(skeleton)?,
            Transform::Squeeze(steps) => {
                if steps.is_empty() {
                    *steps =
                        default_squeeze_params(&skeleton.channels, skeleton.nb_meta_channels);
                }
                for step in steps.iter() {
                    step.meta_apply(skeleton)?;
                }
            }
        }
        Ok(())
    }

    /// Applies the transform to pixel data. Returns `Ok(false)`, with the
    /// image unchanged, if the transform does not fit the content.
    pub(super) fn forward(&mut self, image: &mut ModularImage) -> Result<bool> {
        let (channels, nb_meta_channels) = image.parts_mut();
        match self {
            Transform::Rct { begin_c, rct_type } => {
                rct::forward_rct(channels, *begin_c, *rct_type)?;
                Ok(true)
            }
            Transform::Palette(params) => params.forward(channels, nb_meta_channels),
            Transform::Squeeze(steps) => {
                if steps.is_empty() {
                    let infos: Vec<_> = channels.iter().map(|c| c.info()).collect();
                    *steps = default_squeeze_params(&infos, *nb_meta_channels);
                }
                for step in steps.iter() {
                    step.forward(channels, nb_meta_channels)?;
                }
                Ok(true)
            }
        }
    }

    pub(super) fn inverse(&self, image: &mut ModularImage) -> Result<()> {
        let bit_depth = image.bit_depth();
        let (channels, nb_meta_channels) = image.parts_mut();
        match self {
            Transform::Rct { begin_c, rct_type } => rct::inverse_rct(channels, *begin_c, *rct_type),
            Transform::Palette(params) => params.inverse(channels, nb_meta_channels, bit_depth),
            Transform::Squeeze(steps) => {
                for step in steps.iter().rev() {
                    step.inverse(channels, nb_meta_channels)?;
                }
                Ok(())
            }
        }
    }

    /// Number of squeeze steps, after default parameters are resolved.
    pub fn num_squeeze_steps(&self) -> usize {
        match self {
            Transform::Squeeze(steps) => steps.len(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::check_equal_channels;
    use crate::{error::Error, modular::ChannelInfo};

    #[test]
    fn channel_checks() {
        let channels = [
            ChannelInfo::new((4, 4)),
            ChannelInfo::new((4, 4)),
            ChannelInfo::new((4, 3)),
        ];
        assert!(check_equal_channels(&channels, 0, 2).is_ok());
        assert!(matches!(
            check_equal_channels(&channels, 0, 3),
            Err(Error::MixingDifferentChannels)
        ));
        assert!(matches!(
            check_equal_channels(&channels, 2, 2),
            Err(Error::InvalidChannelRange(2, 4, 3))
        ));
        assert!(matches!(
            check_equal_channels(&channels, 1, 0),
            Err(Error::InvalidChannelRange(1, 1, 3))
        ));
        assert!(matches!(
            check_equal_channels(&channels, usize::MAX, 2),
            Err(Error::InvalidChannelRange(..))
        ));
    }
}
