// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::fmt::Debug;

use super::{DecoderLimits, transforms::Transform};
use crate::{
    error::{Error, Result},
    image::Image,
    util::tracing_wrappers::*,
};

/// Shape of a channel, without its data.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    pub size: (usize, usize),
    /// Number of times each axis was halved by squeezing. `None` for meta
    /// channels, which hold side information instead of pixels.
    pub shift: Option<(usize, usize)>,
}

impl Debug for ChannelInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.size.0, self.size.1)?;
        if let Some(shift) = self.shift {
            write!(f, "(shift {},{})", shift.0, shift.1)
        } else {
            write!(f, "(meta)")
        }
    }
}

impl ChannelInfo {
    pub fn new(size: (usize, usize)) -> Self {
        Self {
            size,
            shift: Some((0, 0)),
        }
    }

    pub fn is_meta(&self) -> bool {
        self.shift.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.size.0 == 0 || self.size.1 == 0
    }

    pub fn num_pixels(&self) -> usize {
        self.size.0 * self.size.1
    }
}

#[derive(Debug)]
pub struct ModularChannel {
    pub data: Image<i32>,
    pub shift: Option<(usize, usize)>,
}

impl ModularChannel {
    pub fn new(size: (usize, usize)) -> Result<Self> {
        Self::from_info(ChannelInfo::new(size))
    }

    pub fn from_info(info: ChannelInfo) -> Result<Self> {
        Ok(ModularChannel {
            data: Image::new(info.size)?,
            shift: info.shift,
        })
    }

    pub fn from_image(data: Image<i32>) -> Self {
        ModularChannel {
            data,
            shift: Some((0, 0)),
        }
    }

    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            size: self.data.size(),
            shift: self.shift,
        }
    }

    pub fn size(&self) -> (usize, usize) {
        self.data.size()
    }

    pub fn try_clone(&self) -> Result<Self> {
        Ok(ModularChannel {
            data: self.data.try_clone()?,
            shift: self.shift,
        })
    }
}

/// An ordered list of channels, of which the first `nb_meta_channels` are
/// meta channels, together with the forward transforms applied to it so far.
#[derive(Debug)]
pub struct ModularImage {
    channels: Vec<ModularChannel>,
    nb_meta_channels: usize,
    bit_depth: u32,
    transforms: Vec<Transform>,
    poisoned: bool,
}

impl ModularImage {
    /// Creates an image with no transforms from pixel channels.
    pub fn new(channels: Vec<ModularChannel>, bit_depth: u32) -> Result<Self> {
        if !(1..=31).contains(&bit_depth) {
            return Err(Error::InvalidBitDepth(bit_depth));
        }
        if let Some(i) = channels.iter().position(|c| c.shift.is_none()) {
            return Err(Error::UnexpectedMetaChannel(i));
        }
        Ok(Self {
            channels,
            nb_meta_channels: 0,
            bit_depth,
            transforms: vec![],
            poisoned: false,
        })
    }

    /// Allocates the channels an image with the given `original` channels
    /// has after applying `transforms`, ready to be filled by a decoder and
    /// then passed to [`ModularImage::undo_transforms`].
    #[instrument(level = "debug", skip(transforms, limits), err)]
    pub fn from_transforms(
        original: &[ChannelInfo],
        bit_depth: u32,
        mut transforms: Vec<Transform>,
        limits: &DecoderLimits,
    ) -> Result<Self> {
        if !(1..=31).contains(&bit_depth) {
            return Err(Error::InvalidBitDepth(bit_depth));
        }
        let mut skeleton = ImageSkeleton {
            channels: original.to_vec(),
            nb_meta_channels: 0,
        };
        let mut squeeze_steps = 0usize;
        for transform in transforms.iter_mut() {
            transform.meta_apply(&mut skeleton)?;
            squeeze_steps = squeeze_steps.saturating_add(transform.num_squeeze_steps());
            if squeeze_steps > limits.max_squeeze_steps {
                return Err(Error::TooManySqueezeSteps(
                    squeeze_steps,
                    limits.max_squeeze_steps,
                ));
            }
        }
        debug!(channels = ?skeleton.channels, "transformed image skeleton");
        let mut channels = vec![];
        channels.try_reserve(skeleton.channels.len())?;
        for (i, info) in skeleton.channels.iter().enumerate() {
            if info.num_pixels() > limits.max_channel_size {
                return Err(Error::ChannelTooLarge(
                    i,
                    info.num_pixels(),
                    limits.max_channel_size,
                ));
            }
            channels.push(ModularChannel::from_info(*info)?);
        }
        Ok(Self {
            channels,
            nb_meta_channels: skeleton.nb_meta_channels,
            bit_depth,
            transforms,
            poisoned: false,
        })
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned {
            Err(Error::PoisonedImage)
        } else {
            Ok(())
        }
    }

    pub fn channels(&self) -> Result<&[ModularChannel]> {
        self.check_poisoned()?;
        Ok(&self.channels)
    }

    pub fn channels_mut(&mut self) -> Result<&mut [ModularChannel]> {
        self.check_poisoned()?;
        Ok(&mut self.channels)
    }

    pub fn channel(&self, index: usize) -> Result<&ModularChannel> {
        self.check_poisoned()?;
        self.channels
            .get(index)
            .ok_or(Error::InvalidChannelRange(index, index + 1, self.channels.len()))
    }

    /// Consumes the image, returning its channels.
    pub fn into_channels(self) -> Result<Vec<ModularChannel>> {
        self.check_poisoned()?;
        Ok(self.channels)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub(crate) fn poison(&mut self) {
        self.poisoned = true;
    }

    pub fn nb_meta_channels(&self) -> usize {
        self.nb_meta_channels
    }

    pub fn bit_depth(&self) -> u32 {
        self.bit_depth
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn channel_infos(&self) -> Vec<ChannelInfo> {
        self.channels.iter().map(ModularChannel::info).collect()
    }

    pub fn total_pixels(&self) -> usize {
        self.channels.iter().map(|c| c.info().num_pixels()).sum()
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut Vec<ModularChannel>, &mut usize) {
        (&mut self.channels, &mut self.nb_meta_channels)
    }

    /// Applies a forward transform and records it. Returns `Ok(false)`,
    /// leaving the image untouched, when the transform is not applicable to
    /// the image content (a palette with too many colors).
    #[instrument(level = "debug", skip(self), err)]
    pub fn apply_transform(&mut self, mut transform: Transform) -> Result<bool> {
        self.check_poisoned()?;
        let applied = transform.forward(self)?;
        if applied {
            debug!(?transform, "applied transform");
            self.transforms.push(transform);
        }
        Ok(applied)
    }

    /// Inverts all recorded transforms, most recent first. On failure the
    /// image is poisoned: its channels are in an unspecified state and are
    /// no longer handed out.
    #[instrument(level = "debug", skip(self), err)]
    pub fn undo_transforms(&mut self) -> Result<()> {
        self.check_poisoned()?;
        while let Some(transform) = self.transforms.pop() {
            if let Err(err) = transform.inverse(self) {
                warn!(?err, ?transform, "inverse transform failed");
                self.poisoned = true;
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Channel shapes of an image, used to work out the coded layout of an image
/// from its transform list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSkeleton {
    pub channels: Vec<ChannelInfo>,
    pub nb_meta_channels: usize,
}
