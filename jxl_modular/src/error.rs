// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::collections::TryReserveError;

use thiserror::Error;

/// Coarse classification of [`Error`]s. None of them is recoverable for the
/// unit of work (group or frame) that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or inconsistent data: trees, transforms, channel shapes.
    Format,
    /// Invalid arithmetic parameters, or values that do not fit their types.
    Arithmetic,
    /// Configured or physical resource limits were exceeded.
    ResourceLimit,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Out of memory: {0}")]
    OutOfMemory(#[from] TryReserveError),
    #[error("Image size too large: {0}x{1}")]
    ImageSizeTooLarge(usize, usize),
    #[error("Channel {0} has {1} pixels, limit is {2}")]
    ChannelTooLarge(usize, usize, usize),
    // Generic arithmetic overflow. Prefer using other errors if possible.
    #[error("Arithmetic overflow")]
    ArithmeticOverflow,
    // Token stream errors.
    #[error("Invalid HybridUintConfig: {0} {1} {2}")]
    InvalidUintConfig(u32, u32, u32),
    #[error("Integer too large: nbits {0} > 31")]
    IntegerTooLarge(u32),
    #[error("Token stream ended unexpectedly")]
    TokenStreamExhausted,
    #[error("Token read with context {0}, but it was written with context {1}")]
    TokenContextMismatch(usize, usize),
    #[error("Read of {0} raw bits, but {1} bits were written")]
    RawBitsMismatch(u32, u32),
    // Tree errors.
    #[error("Invalid predictor: {0}")]
    InvalidPredictor(u32),
    #[error("Invalid property {0}")]
    InvalidProperty(u32),
    #[error("Tree splits on property {0}, but only {1} properties are available")]
    PropertyOutOfBounds(usize, usize),
    #[error("Tree is too large: {0} nodes, limit is {1}")]
    TreeTooLarge(usize, usize),
    #[error("Tree is too tall: {0}, limit is {1}")]
    TreeTooTall(usize, usize),
    #[error("Tree split on property {0} at {1} is outside of the reachable range [{2}, {3}]")]
    TreeSplitOnEmptyRange(u8, i32, i32, i32),
    #[error("Tree node {0} has invalid child {1}")]
    InvalidTreeChild(usize, usize),
    #[error("Tree multiplier log too large: {0}, limit is {1}")]
    TreeMultiplierTooLarge(u32, u32),
    #[error("Tree multiplier too large: mul_bits {0}, mul_log {1}")]
    TreeMultiplierBitsTooLarge(u32, u32),
    #[error("Tree leaf has a zero multiplier")]
    ZeroMultiplier,
    #[error("Residual {0} is not a multiple of the leaf multiplier {1}")]
    ResidualNotMultiple(i64, u32),
    #[error("Tree has no nodes")]
    EmptyTree,
    // Learner configuration errors.
    #[error("Invalid predictor settings: the Weighted predictor is excluded by the tree mode")]
    InvalidPredictorSettings,
    #[error("Invalid property set configuration")]
    InvalidPropertySet,
    #[error("Multiplier range {0:?} cannot be represented by axis-aligned splits")]
    InvalidMultiplierRange([[u32; 2]; 2]),
    #[error("Invalid weighted predictor mode {0}")]
    InvalidWpMode(u32),
    // Transform errors.
    #[error("Invalid channel range: {0}..{1}, {2} total channels")]
    InvalidChannelRange(usize, usize, usize),
    #[error("Trying to mix channels of different sizes or types")]
    MixingDifferentChannels,
    #[error("Meta squeeze requires in-place residuals")]
    MetaSqueezeRequiresInPlace,
    #[error("Too many squeezes: shift > 30")]
    TooManySqueezes,
    #[error("Trying to squeeze empty channel {0}")]
    SqueezeEmptyChannel(usize),
    #[error("Too many squeeze steps: {0}, limit is {1}")]
    TooManySqueezeSteps(usize, usize),
    #[error("Invalid squeeze: channel {0} is smaller than its residual channel {1}")]
    CorruptedSqueeze(usize, usize),
    #[error("Invalid RCT type {0}")]
    InvalidRctType(u32),
    #[error("Palette transforms on meta channels are not supported")]
    PaletteOnMetaChannels,
    #[error("Palette with {0} colors and {1} deltas is too large")]
    PaletteTooLarge(usize, usize),
    #[error("Channel {0} has size {1}x{2}, expected {3}x{4}")]
    ChannelSizeMismatch(usize, usize, usize, usize, usize),
    #[error("Image is in an inconsistent state after a failed operation")]
    PoisonedImage,
    #[error("Invalid bit depth {0}")]
    InvalidBitDepth(u32),
    #[error("Channel {0} is a meta channel, expected pixel data")]
    UnexpectedMetaChannel(usize),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            OutOfMemory(_)
            | ImageSizeTooLarge(..)
            | ChannelTooLarge(..)
            | TreeTooLarge(..)
            | TreeTooTall(..)
            | PaletteTooLarge(..)
            | TooManySqueezes
            | TooManySqueezeSteps(..) => ErrorKind::ResourceLimit,
            ArithmeticOverflow
            | IntegerTooLarge(_)
            | PropertyOutOfBounds(..)
            | ZeroMultiplier
            | ResidualNotMultiple(..) => ErrorKind::Arithmetic,
            InvalidUintConfig(..)
            | TokenStreamExhausted
            | TokenContextMismatch(..)
            | RawBitsMismatch(..)
            | InvalidPredictor(_)
            | InvalidProperty(_)
            | TreeSplitOnEmptyRange(..)
            | InvalidTreeChild(..)
            | TreeMultiplierTooLarge(..)
            | TreeMultiplierBitsTooLarge(..)
            | EmptyTree
            | InvalidPredictorSettings
            | InvalidPropertySet
            | InvalidMultiplierRange(_)
            | InvalidWpMode(_)
            | InvalidChannelRange(..)
            | MixingDifferentChannels
            | MetaSqueezeRequiresInPlace
            | SqueezeEmptyChannel(_)
            | CorruptedSqueeze(..)
            | InvalidRctType(_)
            | PaletteOnMetaChannels
            | ChannelSizeMismatch(..)
            | PoisonedImage
            | InvalidBitDepth(_)
            | UnexpectedMetaChannel(_) => ErrorKind::Format,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::{Error, ErrorKind};

    #[test]
    fn error_kinds() {
        assert_eq!(Error::TreeTooLarge(9, 8).kind(), ErrorKind::ResourceLimit);
        assert_eq!(Error::ZeroMultiplier.kind(), ErrorKind::Arithmetic);
        assert_eq!(Error::InvalidRctType(42).kind(), ErrorKind::Format);
        let mut v: Vec<u8> = vec![];
        let oom = v.try_reserve(usize::MAX).unwrap_err();
        assert_eq!(Error::from(oom).kind(), ErrorKind::ResourceLimit);
    }
}
