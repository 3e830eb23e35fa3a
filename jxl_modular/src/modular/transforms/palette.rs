// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::check_equal_channels;
use crate::{
    error::{Error, Result},
    image::Image,
    modular::{
        ChannelInfo, ImageSkeleton, ModularChannel, Predictor, WeightedHeader,
        predict::{PredictionData, WeightedPredictorState},
    },
    util::tracing_wrappers::*,
};

const RGB_CHANNELS: usize = 3;

// Indices past the explicit colors address two implicit RGB grids: first
// 4 levels per channel, offset by half a step, then 5 levels per channel
// that include both ends of the range.
const LARGE_CUBE: usize = 5;
const SMALL_CUBE: usize = 4;
const SMALL_CUBE_BITS: usize = 2;
const LARGE_CUBE_OFFSET: usize = SMALL_CUBE * SMALL_CUBE * SMALL_CUBE;

const MAX_PALETTE_COLORS: usize = 70911;
const MAX_PALETTE_DELTAS: usize = 66816;

// Implicit deltas for negative indices, for 8-bit samples. Index -1 is the
// zero delta, then each further entry appears as-is and then negated.
const DELTA_PALETTE: [[i32; 3]; 72] = [
    [0, 0, 0],
    [4, 4, 4],
    [11, 0, 0],
    [0, 0, -13],
    [0, -12, 0],
    [-10, -10, -10],
    [-18, -18, -18],
    [-27, -27, -27],
    [-18, -18, 0],
    [0, 0, -32],
    [-32, 0, 0],
    [-37, -37, -37],
    [0, -32, -32],
    [24, 24, 45],
    [50, 50, 50],
    [-45, -24, -24],
    [-24, -45, -45],
    [0, -24, -24],
    [-34, -34, 0],
    [-24, 0, -24],
    [-45, -45, -24],
    [64, 64, 64],
    [-32, 0, -32],
    [0, -32, 0],
    [-32, 0, 32],
    [-24, -45, -24],
    [45, 24, 45],
    [24, -24, -45],
    [-45, -24, 24],
    [80, 80, 80],
    [64, 0, 0],
    [0, 0, -64],
    [0, -64, -64],
    [-24, -24, 45],
    [96, 96, 96],
    [64, 64, 0],
    [45, -24, -24],
    [34, -34, 0],
    [112, 112, 112],
    [24, -45, -45],
    [45, 45, -24],
    [0, -32, 32],
    [24, -24, 45],
    [0, 96, 96],
    [45, -24, 24],
    [24, -45, -24],
    [-24, -45, 24],
    [0, -64, 0],
    [96, 0, 0],
    [128, 128, 128],
    [64, 0, 64],
    [144, 144, 144],
    [96, 96, 0],
    [-36, -36, 36],
    [45, -24, -45],
    [45, -45, -24],
    [0, 0, -96],
    [0, 128, 128],
    [0, 96, 0],
    [45, 24, -45],
    [-128, 0, 0],
    [24, -45, 24],
    [-45, 24, -45],
    [64, 0, -64],
    [64, -64, -64],
    [96, 0, 96],
    [45, -45, 24],
    [24, 45, -45],
    [64, 64, -64],
    [128, 128, 0],
    [0, 0, -128],
    [-24, 45, -45],
];

/// Replaces channels `begin_c..begin_c + num_c` by a single channel of
/// indices into a palette, stored as meta channel 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteParams {
    pub begin_c: usize,
    pub num_c: usize,
    /// Maximum number of colors when searching for a palette, and the number
    /// of colors of the palette once applied.
    pub nb_colors: usize,
    /// Number of leading palette entries that are added to the prediction
    /// of `predictor` instead of being used as-is.
    pub nb_deltas: usize,
    pub predictor: Predictor,
    /// Sort multi-channel palettes by luma instead of first occurrence.
    pub ordered: bool,
}

impl PaletteParams {
    pub fn new(begin_c: usize, num_c: usize, nb_colors: usize) -> Self {
        Self {
            begin_c,
            num_c,
            nb_colors,
            nb_deltas: 0,
            predictor: Predictor::Zero,
            ordered: true,
        }
    }

    fn palette_info(&self) -> ChannelInfo {
        ChannelInfo {
            size: (self.nb_colors + self.nb_deltas, self.num_c),
            shift: None,
        }
    }

    fn check(&self, channels: &[ChannelInfo], nb_meta_channels: usize) -> Result<()> {
        if self.begin_c < nb_meta_channels {
            return Err(Error::PaletteOnMetaChannels);
        }
        check_equal_channels(channels, self.begin_c, self.num_c)?;
        if self.nb_colors > MAX_PALETTE_COLORS || self.nb_deltas > MAX_PALETTE_DELTAS {
            return Err(Error::PaletteTooLarge(self.nb_colors, self.nb_deltas));
        }
        Ok(())
    }

    pub(super) fn meta_apply(&self, skeleton: &mut ImageSkeleton) -> Result<()> {
        self.check(&skeleton.channels, skeleton.nb_meta_channels)?;
        skeleton
            .channels
            .drain(self.begin_c + 1..self.begin_c + self.num_c);
        skeleton.channels.insert(0, self.palette_info());
        skeleton.nb_meta_channels += 1;
        Ok(())
    }

    /// Builds a lossless palette of at most `nb_colors` colors. Returns
    /// `Ok(false)` without modifying the channels if there are more colors.
    #[instrument(level = "debug", skip(channels), err)]
    pub(super) fn forward(
        &mut self,
        channels: &mut Vec<ModularChannel>,
        nb_meta_channels: &mut usize,
    ) -> Result<bool> {
        let infos: Vec<_> = channels.iter().map(ModularChannel::info).collect();
        self.check(&infos, *nb_meta_channels)?;
        if self.nb_colors == 0 {
            return Ok(false);
        }
        let input = &channels[self.begin_c..self.begin_c + self.num_c];
        let (w, h) = input[0].size();

        let Some(colors) = self.collect_colors(input) else {
            debug!(max_colors = self.nb_colors, "too many colors for a palette");
            return Ok(false);
        };
        debug!(num_colors = colors.len(), "found palette");

        let mut palette = Image::new((colors.len(), self.num_c))?;
        let mut inverse = HashMap::new();
        inverse.try_reserve(colors.len())?;
        for (i, color) in colors.iter().enumerate() {
            for (c, &v) in color.iter().enumerate() {
                palette.row_mut(c)[i] = v;
            }
            inverse.insert(color.as_slice(), i as i32);
        }
        let mut indices = Image::new((w, h))?;
        let mut color = vec![0; self.num_c];
        for y in 0..h {
            for x in 0..w {
                for (c, chan) in input.iter().enumerate() {
                    color[c] = chan.data.row(y)[x];
                }
                // Every color of the image is in the palette.
                indices.row_mut(y)[x] = inverse.get(color.as_slice()).copied().unwrap_or(0);
            }
        }

        self.nb_colors = colors.len();
        self.nb_deltas = 0;
        self.predictor = Predictor::Zero;
        channels[self.begin_c].data = indices;
        channels.drain(self.begin_c + 1..self.begin_c + self.num_c);
        channels.insert(
            0,
            ModularChannel {
                data: palette,
                shift: None,
            },
        );
        *nb_meta_channels += 1;
        Ok(true)
    }

    /// Distinct colors in palette order, or `None` if there are more than
    /// `nb_colors`.
    fn collect_colors(&self, input: &[ModularChannel]) -> Option<Vec<Vec<i32>>> {
        let (w, h) = input[0].size();
        if let [chan] = input {
            // Single channel palettes are sorted.
            let mut values = BTreeSet::new();
            for v in chan.data.iter() {
                if values.insert(v) && values.len() > self.nb_colors {
                    return None;
                }
            }
            return Some(values.into_iter().map(|v| vec![v]).collect());
        }
        let mut seen = HashSet::new();
        let mut colors = vec![];
        for y in 0..h {
            for x in 0..w {
                let color: Vec<i32> = input.iter().map(|c| c.data.row(y)[x]).collect();
                if seen.contains(&color) {
                    continue;
                }
                if colors.len() == self.nb_colors {
                    return None;
                }
                seen.insert(color.clone());
                colors.push(color);
            }
        }
        if self.ordered && self.num_c >= RGB_CHANNELS {
            let luma = |c: &[i32]| {
                let mut y = 0.299 * c[0] as f32 + 0.587 * c[1] as f32 + 0.114 * c[2] as f32 + 0.1;
                if let Some(&alpha) = c.get(3) {
                    y *= 1.0 + alpha as f32;
                }
                y
            };
            colors.sort_by(|a, b| luma(a).total_cmp(&luma(b)));
        }
        Some(colors)
    }

    #[instrument(level = "debug", skip(channels), err)]
    pub(super) fn inverse(
        &self,
        channels: &mut Vec<ModularChannel>,
        nb_meta_channels: &mut usize,
        bit_depth: u32,
    ) -> Result<()> {
        if *nb_meta_channels < 1 || channels.is_empty() {
            return Err(Error::InvalidChannelRange(0, 1, channels.len()));
        }
        let expected = self.palette_info();
        let palette = &channels[0];
        if palette.info() != expected {
            let (w, h) = palette.size();
            return Err(Error::ChannelSizeMismatch(
                0,
                w,
                h,
                expected.size.0,
                expected.size.1,
            ));
        }
        let index_c = self.begin_c + 1;
        if index_c < *nb_meta_channels || index_c >= channels.len() {
            return Err(Error::InvalidChannelRange(
                index_c,
                index_c + 1,
                channels.len(),
            ));
        }
        let indices = &channels[index_c];
        let bit_depth = bit_depth.min(24) as usize;
        let mut outputs = Vec::new();
        outputs.try_reserve(self.num_c)?;
        for c in 0..self.num_c {
            let data = self.unpalette_channel(&palette.data, &indices.data, c, bit_depth)?;
            outputs.push(ModularChannel {
                data,
                shift: indices.shift,
            });
        }

        channels.try_reserve(self.num_c)?;
        let tail = channels.split_off(index_c + 1);
        channels.truncate(index_c);
        channels.extend(outputs);
        channels.extend(tail);
        channels.remove(0);
        *nb_meta_channels -= 1;
        Ok(())
    }

    fn unpalette_channel(
        &self,
        palette: &Image<i32>,
        indices: &Image<i32>,
        c: usize,
        bit_depth: usize,
    ) -> Result<Image<i32>> {
        let (w, h) = indices.size();
        let palette_size = palette.size().0;
        let mut out = Image::new((w, h))?;
        if self.nb_deltas == 0 && self.predictor == Predictor::Zero {
            for y in 0..h {
                for (x, &index) in indices.row(y).iter().enumerate() {
                    out.row_mut(y)[x] =
                        get_palette_value(palette, index as isize, c, palette_size, bit_depth);
                }
            }
            return Ok(out);
        }

        let mut wp_state = if self.predictor == Predictor::Weighted {
            Some(WeightedPredictorState::new(&WeightedHeader::default(), w)?)
        } else {
            None
        };
        for y in 0..h {
            for x in 0..w {
                let index = indices.row(y)[x];
                let entry = get_palette_value(palette, index as isize, c, palette_size, bit_depth);
                let data = PredictionData::get(&out, x, y);
                let wp_pred = wp_state
                    .as_mut()
                    .map_or(0, |state| state.predict_and_property((x, y), &data).0);
                let value = if (index as i64) < self.nb_deltas as i64 {
                    (self.predictor.predict_one(data, wp_pred) + entry as i64) as i32
                } else {
                    entry
                };
                out.row_mut(y)[x] = value;
                if let Some(state) = wp_state.as_mut() {
                    state.update_errors(value, (x, y));
                }
            }
        }
        Ok(out)
    }
}

fn scale_small_cube(value: usize, bit_depth: usize) -> i32 {
    ((value * ((1 << bit_depth) - 1)) / SMALL_CUBE) as i32
}

fn scale_large_cube(value: usize, bit_depth: usize) -> i32 {
    ((value * ((1 << bit_depth) - 1)) / (LARGE_CUBE - 1)) as i32
}

/// Value of channel `c` for palette `index`, including the implicit
/// entries: negative indices select small deltas and indices past the end
/// of the palette select colors of two fixed color cubes. Never reads out of
/// bounds. If `index < nb_deltas` the result is a delta, to be added to a
/// prediction by the caller.
fn get_palette_value(
    palette: &Image<i32>,
    index: isize,
    c: usize,
    palette_size: usize,
    bit_depth: usize,
) -> i32 {
    if index < 0 {
        if c >= RGB_CHANNELS {
            return 0;
        }
        // -1 maps to 0, -2 to 1 and so on. `!index` cannot overflow.
        let k = (!index) as usize % (2 * DELTA_PALETTE.len() - 1);
        let delta = DELTA_PALETTE[k.div_ceil(2)][c];
        let delta = if k % 2 == 0 { -delta } else { delta };
        return delta << bit_depth.saturating_sub(8);
    }
    let mut index = index as usize;
    if index < palette_size {
        return palette.row(c)[index];
    }
    if c >= RGB_CHANNELS {
        return 0;
    }
    index -= palette_size;
    if index < LARGE_CUBE_OFFSET {
        index >>= c * SMALL_CUBE_BITS;
        scale_small_cube(index % SMALL_CUBE, bit_depth) + (1 << bit_depth.saturating_sub(3))
    } else {
        index -= LARGE_CUBE_OFFSET;
        for _ in 0..c {
            index /= LARGE_CUBE;
        }
        scale_large_cube(index % LARGE_CUBE, bit_depth)
    }
}

#[cfg(test)]
mod test {
    use rand::{Rng, SeedableRng};
    use test_log::test;

    use super::{PaletteParams, get_palette_value};
    use crate::{
        error::{Error, Result},
        image::Image,
        modular::{ChannelInfo, ImageSkeleton, ModularChannel, Predictor},
        util::test::assert_channels_equal,
    };

    fn clone_all(channels: &[ModularChannel]) -> Result<Vec<ModularChannel>> {
        channels.iter().map(ModularChannel::try_clone).collect()
    }

    #[test]
    fn single_channel_is_sorted() -> Result<()> {
        let data = Image::from_vec((3, 2), vec![200, 5, 9, 9, 200, 5])?;
        let original = vec![ModularChannel::from_image(data)];
        let mut channels = clone_all(&original)?;
        let mut nb_meta = 0;
        let mut params = PaletteParams::new(0, 1, 256);
        assert!(params.forward(&mut channels, &mut nb_meta)?);
        assert_eq!(params.nb_colors, 3);
        assert_eq!(nb_meta, 1);
        assert_eq!(channels[0].size(), (3, 1));
        assert_eq!(channels[0].data.row(0), &[5, 9, 200]);
        assert_eq!(channels[1].data.iter().collect::<Vec<_>>(), vec![2, 0, 1, 1, 2, 0]);
        params.inverse(&mut channels, &mut nb_meta, 8)?;
        assert_eq!(nb_meta, 0);
        assert_channels_equal(&channels, &original);
        Ok(())
    }

    #[test]
    fn multi_channel_round_trip() -> Result<()> {
        let mut rng = rand_xorshift::XorShiftRng::seed_from_u64(7);
        let colors = [[0, 0, 0], [255, 0, 0], [10, 200, 30], [255, 255, 255]];
        let mut planes = [
            Image::new((9, 6))?,
            Image::new((9, 6))?,
            Image::new((9, 6))?,
        ];
        for y in 0..6 {
            for x in 0..9 {
                let color = colors[rng.random_range(0..colors.len())];
                for c in 0..3 {
                    planes[c].set(x, y, color[c]);
                }
            }
        }
        let mut original = vec![ModularChannel::new((2, 2))?];
        original.extend(planes.into_iter().map(ModularChannel::from_image));
        let mut channels = clone_all(&original)?;
        let mut nb_meta = 0;
        let mut params = PaletteParams::new(1, 3, 16);
        assert!(params.forward(&mut channels, &mut nb_meta)?);
        assert!(params.nb_colors <= 4);
        assert_eq!(channels.len(), 3);
        assert_eq!(channels[0].info().shift, None);
        // Luma order.
        assert_eq!(channels[0].data.get(0, 0), 0);
        assert_eq!(channels[0].data.get(params.nb_colors - 1, 0), 255);
        params.inverse(&mut channels, &mut nb_meta, 8)?;
        assert_channels_equal(&channels, &original);
        Ok(())
    }

    #[test]
    fn too_many_colors() -> Result<()> {
        let data = Image::from_vec((4, 1), vec![1, 2, 3, 4])?;
        let mut channels = vec![ModularChannel::from_image(data)];
        let mut nb_meta = 0;
        let mut params = PaletteParams::new(0, 1, 3);
        assert!(!params.forward(&mut channels, &mut nb_meta)?);
        assert_eq!(nb_meta, 0);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].data.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn meta_apply_matches_forward() -> Result<()> {
        let data = Image::from_vec((2, 2), vec![1, 2, 3, 1])?;
        let mut channels = vec![
            ModularChannel::from_image(data.try_clone()?),
            ModularChannel::from_image(data),
        ];
        let mut skeleton = ImageSkeleton {
            channels: channels.iter().map(ModularChannel::info).collect(),
            nb_meta_channels: 0,
        };
        let mut nb_meta = 0;
        let mut params = PaletteParams::new(0, 2, 10);
        assert!(params.forward(&mut channels, &mut nb_meta)?);
        params.meta_apply(&mut skeleton)?;
        let infos: Vec<ChannelInfo> = channels.iter().map(ModularChannel::info).collect();
        assert_eq!(infos, skeleton.channels);
        assert_eq!(skeleton.nb_meta_channels, 1);
        assert!(matches!(
            params.meta_apply(&mut skeleton),
            Err(Error::PaletteOnMetaChannels)
        ));
        Ok(())
    }

    #[test]
    fn implicit_values() -> Result<()> {
        let palette = Image::from_vec((2, 3), vec![1, 2, 3, 4, 5, 6])?;
        assert_eq!(get_palette_value(&palette, 1, 2, 2, 8), 6);
        // First small cube entry: all components at the lowest level.
        assert_eq!(get_palette_value(&palette, 2, 0, 2, 8), 32);
        // Small cube index 1 moves the first component one step.
        assert_eq!(get_palette_value(&palette, 3, 0, 2, 8), 63 + 32);
        assert_eq!(get_palette_value(&palette, 3, 1, 2, 8), 32);
        // Large cube.
        let large = 2 + 64;
        assert_eq!(get_palette_value(&palette, large, 0, 2, 8), 0);
        assert_eq!(get_palette_value(&palette, large + 4, 0, 2, 8), 255);
        assert_eq!(get_palette_value(&palette, large + 5, 1, 2, 8), 63);
        assert_eq!(get_palette_value(&palette, large + 124, 2, 2, 8), 255);
        // Deltas.
        assert_eq!(get_palette_value(&palette, -1, 0, 2, 8), 0);
        assert_eq!(get_palette_value(&palette, -2, 0, 2, 8), 4);
        assert_eq!(get_palette_value(&palette, -3, 0, 2, 8), -4);
        assert_eq!(get_palette_value(&palette, -2, 0, 2, 10), 16);
        assert_eq!(get_palette_value(&palette, -3, 1, 2, 10), -16);
        // The last entry negated, then the table wraps around.
        assert_eq!(get_palette_value(&palette, -143, 0, 2, 8), 24);
        assert_eq!(get_palette_value(&palette, -143, 1, 2, 8), -45);
        assert_eq!(get_palette_value(&palette, -144, 0, 2, 8), 0);
        assert_eq!(get_palette_value(&palette, -145, 2, 2, 8), 4);
        // Extreme indices never read out of bounds.
        for index in [i32::MIN as isize, i32::MAX as isize, -1000, 100_000] {
            for c in 0..4 {
                get_palette_value(&palette, index, c.min(2), 2, 8);
            }
        }
        Ok(())
    }

    #[test]
    fn deltas_add_prediction() -> Result<()> {
        // One delta entry (+3 on the first channel) and one color.
        let palette = Image::from_vec((2, 1), vec![3, 10])?;
        let indices = Image::from_vec((3, 1), vec![1, 0, 0])?;
        let mut channels = vec![
            ModularChannel {
                data: palette,
                shift: None,
            },
            ModularChannel::from_image(indices),
        ];
        let params = PaletteParams {
            begin_c: 0,
            num_c: 1,
            nb_colors: 1,
            nb_deltas: 1,
            predictor: Predictor::West,
            ordered: false,
        };
        let mut nb_meta = 1;
        params.inverse(&mut channels, &mut nb_meta, 8)?;
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].data.iter().collect::<Vec<_>>(), vec![10, 13, 16]);
        Ok(())
    }
}
