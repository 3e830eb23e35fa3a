// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use super::check_channel_range;
use crate::{
    error::{Error, Result},
    image::Image,
    modular::{ChannelInfo, ImageSkeleton, ModularChannel},
    util::{NewWithCapacity, for_each_item, tracing_wrappers::*, try_for_each_item},
};

const MAX_FIRST_PREVIEW_SIZE: usize = 8;
const MAX_SHIFT: usize = 30;
const ROWS_PER_TASK: usize = 8;
const COLS_PER_TASK: usize = 64;

/// One squeeze step: halves channels `begin_c..begin_c + num_c` along one
/// axis and stores the residuals in new channels, placed right after the
/// squeezed range (`in_place`) or at the end of the channel list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqueezeParams {
    pub horizontal: bool,
    pub in_place: bool,
    pub begin_c: usize,
    pub num_c: usize,
}

/// Squeeze steps that turn the image into a multiresolution pyramid whose
/// coarsest level is at most 8x8.
pub fn default_squeeze_params(
    channels: &[ChannelInfo],
    nb_meta_channels: usize,
) -> Vec<SqueezeParams> {
    let mut params = vec![];
    let Some(first) = channels.get(nb_meta_channels) else {
        return params;
    };
    let (mut w, mut h) = first.size;
    let nc = channels.len() - nb_meta_channels;

    if nc > 2 && channels[nb_meta_channels + 1].size == (w, h) {
        // 420 previews
        let sp = SqueezeParams {
            horizontal: true,
            in_place: false,
            begin_c: nb_meta_channels + 1,
            num_c: 2,
        };
        params.push(sp);
        params.push(SqueezeParams {
            horizontal: false,
            ..sp
        });
    }

    let sp = SqueezeParams {
        begin_c: nb_meta_channels,
        num_c: nc,
        in_place: true,
        horizontal: false,
    };

    // vertical first on tall images
    if w <= h && h > MAX_FIRST_PREVIEW_SIZE {
        params.push(sp);
        h = h.div_ceil(2);
    }
    while w > MAX_FIRST_PREVIEW_SIZE || h > MAX_FIRST_PREVIEW_SIZE {
        if w > MAX_FIRST_PREVIEW_SIZE {
            params.push(SqueezeParams {
                horizontal: true,
                ..sp
            });
            w = w.div_ceil(2);
        }
        if h > MAX_FIRST_PREVIEW_SIZE {
            params.push(sp);
            h = h.div_ceil(2);
        }
    }

    params
}

/// Bias correction for the difference of two pixels given the average to
/// their left (or top), their own average and the next average. Non-zero
/// only when the three are monotonic.
#[inline]
fn smooth_tendency(b: i64, a: i64, n: i64) -> i64 {
    let mut diff = 0;
    if b >= a && a >= n {
        diff = (4 * b - 3 * n - a + 6) / 12;
        if diff - (diff & 1) > 2 * (b - a) {
            diff = 2 * (b - a) + 1;
        }
        if diff + (diff & 1) > 2 * (a - n) {
            diff = 2 * (a - n);
        }
    } else if b <= a && a <= n {
        diff = (4 * b - 3 * n - a - 6) / 12;
        if diff + (diff & 1) < 2 * (b - a) {
            diff = 2 * (b - a) - 1;
        }
        if diff - (diff & 1) < 2 * (a - n) {
            diff = 2 * (a - n);
        }
    }
    diff
}

#[inline]
fn average(a: i64, b: i64) -> i64 {
    (a + b + (a > b) as i64) >> 1
}

/// Residual of one pair of pixels; fails if it does not fit a pixel.
#[inline]
fn residual(a: i64, b: i64, left: i64, avg: i64, next_avg: i64) -> Result<i32> {
    let res = (a - b) - smooth_tendency(left, avg, next_avg);
    i32::try_from(res).map_err(|_| Error::ArithmeticOverflow)
}

/// Reconstructs a pair of pixels.
#[inline]
fn unsqueeze(res: i64, left: i64, avg: i64, next_avg: i64) -> (i32, i32) {
    let diff = res + smooth_tendency(left, avg, next_avg);
    let a = avg + diff / 2;
    (a as i32, (a - diff) as i32)
}

/// Groups rows into batches of consecutive rows, one per task.
fn row_batches<T>(rows: impl Iterator<Item = T>) -> Vec<Vec<(usize, T)>> {
    let mut batches: Vec<Vec<_>> = vec![];
    for (y, row) in rows.enumerate() {
        if y % ROWS_PER_TASK == 0 {
            batches.push(vec![]);
        }
        if let Some(batch) = batches.last_mut() {
            batch.push((y, row));
        }
    }
    batches
}

fn forward_h(input: &Image<i32>) -> Result<(Image<i32>, Image<i32>)> {
    let (w, h) = input.size();
    let avg_w = w.div_ceil(2);
    let mut avg = Image::new((avg_w, h))?;
    let mut res = Image::new((w - avg_w, h))?;
    let batches = row_batches(avg.rows_mut().zip(res.rows_mut()));
    try_for_each_item(batches, |batch| -> Result<()> {
        for (y, (avg_row, res_row)) in batch {
            let in_row = input.row(y);
            for (x, avg) in avg_row.iter_mut().enumerate() {
                *avg = match in_row.get(2 * x + 1) {
                    Some(&b) => average(in_row[2 * x] as i64, b as i64) as i32,
                    None => in_row[2 * x],
                };
            }
            for (x, res) in res_row.iter_mut().enumerate() {
                let a = in_row[2 * x] as i64;
                let b = in_row[2 * x + 1] as i64;
                let cur = avg_row[x] as i64;
                let next = avg_row.get(x + 1).map_or(cur, |&v| v as i64);
                let left = if x > 0 { in_row[2 * x - 1] as i64 } else { cur };
                *res = residual(a, b, left, cur, next)?;
            }
        }
        Ok(())
    })?;
    Ok((avg, res))
}

fn forward_v(input: &Image<i32>) -> Result<(Image<i32>, Image<i32>)> {
    let (w, h) = input.size();
    let avg_h = h.div_ceil(2);
    let res_h = h - avg_h;
    let mut avg = Image::new((w, avg_h))?;
    let mut res = Image::new((w, res_h))?;
    // Every output row only depends on input rows.
    let avg_row_at = |y: usize, x: usize| -> i64 {
        if 2 * y + 1 < h {
            average(input.row(2 * y)[x] as i64, input.row(2 * y + 1)[x] as i64)
        } else {
            input.row(2 * y)[x] as i64
        }
    };
    for_each_item(row_batches(avg.rows_mut()), |batch| {
        for (y, row) in batch {
            for (x, v) in row.iter_mut().enumerate() {
                *v = avg_row_at(y, x) as i32;
            }
        }
    });
    try_for_each_item(row_batches(res.rows_mut()), |batch| -> Result<()> {
        for (y, row) in batch {
            let (row_a, row_b) = (input.row(2 * y), input.row(2 * y + 1));
            for (x, v) in row.iter_mut().enumerate() {
                let cur = avg_row_at(y, x);
                let next = if y + 1 < avg_h { avg_row_at(y + 1, x) } else { cur };
                let top = if y > 0 {
                    input.row(2 * y - 1)[x] as i64
                } else {
                    cur
                };
                *v = residual(row_a[x] as i64, row_b[x] as i64, top, cur, next)?;
            }
        }
        Ok(())
    })?;
    Ok((avg, res))
}

fn inverse_h(avg: &Image<i32>, res: &Image<i32>) -> Result<Image<i32>> {
    let (avg_w, h) = avg.size();
    let res_w = res.size().0;
    let mut out = Image::new((avg_w + res_w, h))?;
    for_each_item(row_batches(out.rows_mut()), |batch| {
        for (y, out_row) in batch {
            let avg_row = avg.row(y);
            let res_row = res.row(y);
            for x in 0..res_w {
                let cur = avg_row[x] as i64;
                let next = avg_row.get(x + 1).map_or(cur, |&v| v as i64);
                let left = if x > 0 { out_row[2 * x - 1] as i64 } else { cur };
                let (a, b) = unsqueeze(res_row[x] as i64, left, cur, next);
                out_row[2 * x] = a;
                out_row[2 * x + 1] = b;
            }
            if avg_w > res_w {
                out_row[2 * res_w] = avg_row[res_w];
            }
        }
    });
    Ok(out)
}

fn inverse_v(avg: &Image<i32>, res: &Image<i32>) -> Result<Image<i32>> {
    let (w, avg_h) = avg.size();
    let res_h = res.size().1;
    let out_h = avg_h + res_h;
    let mut out = Image::new((w, out_h))?;
    // Each task owns a block of columns across all rows, as every row
    // depends on the one above.
    let num_blocks = w.div_ceil(COLS_PER_TASK);
    let mut blocks: Vec<Vec<&mut [i32]>> = Vec::new_with_capacity(num_blocks)?;
    blocks.resize_with(num_blocks, Vec::new);
    for row in out.rows_mut() {
        for (block, chunk) in blocks.iter_mut().zip(row.chunks_mut(COLS_PER_TASK)) {
            block.push(chunk);
        }
    }
    let tasks: Vec<_> = blocks.into_iter().enumerate().collect();
    for_each_item(tasks, |(block, mut rows)| {
        let x0 = block * COLS_PER_TASK;
        for y in 0..res_h {
            let avg_row = &avg.row(y)[x0..];
            let next_row = &avg.row(if y + 1 < avg_h { y + 1 } else { y })[x0..];
            let res_row = &res.row(y)[x0..];
            let (done, rest) = rows.split_at_mut(2 * y);
            let [out_a, out_b, ..] = rest else {
                unreachable!("output has at least two rows per residual row");
            };
            for x in 0..out_a.len() {
                let cur = avg_row[x] as i64;
                let next = next_row[x] as i64;
                let top = done.last().map_or(cur, |row| row[x] as i64);
                let (a, b) = unsqueeze(res_row[x] as i64, top, cur, next);
                out_a[x] = a;
                out_b[x] = b;
            }
        }
        if avg_h > res_h {
            if let Some(last) = rows.last_mut() {
                last.copy_from_slice(&avg.row(avg_h - 1)[x0..x0 + last.len()]);
            }
        }
    });
    Ok(out)
}

fn squeezed_shift(shift: Option<(usize, usize)>, horizontal: bool) -> Option<(usize, usize)> {
    shift.map(|(h, v)| if horizontal { (h + 1, v) } else { (h, v + 1) })
}

impl SqueezeParams {
    fn end_c(&self) -> usize {
        self.begin_c + self.num_c - 1
    }

    /// Checks the step against the current channels, returning the index of
    /// the first residual channel.
    fn check(&self, channels: &[ChannelInfo], nb_meta_channels: usize) -> Result<usize> {
        check_channel_range(channels.len(), self.begin_c, self.num_c)?;
        let end_c = self.end_c();
        if self.begin_c < nb_meta_channels {
            if end_c >= nb_meta_channels {
                return Err(Error::MixingDifferentChannels);
            }
            if !self.in_place {
                return Err(Error::MetaSqueezeRequiresInPlace);
            }
        }
        for (c, info) in channels.iter().enumerate().take(end_c + 1).skip(self.begin_c) {
            if let Some((hshift, vshift)) = info.shift {
                if hshift > MAX_SHIFT || vshift > MAX_SHIFT {
                    return Err(Error::TooManySqueezes);
                }
            }
            if info.is_empty() {
                return Err(Error::SqueezeEmptyChannel(c));
            }
        }
        Ok(if self.in_place {
            end_c + 1
        } else {
            channels.len()
        })
    }

    pub(super) fn meta_apply(&self, skeleton: &mut ImageSkeleton) -> Result<()> {
        let offset = self.check(&skeleton.channels, skeleton.nb_meta_channels)?;
        if self.begin_c < skeleton.nb_meta_channels {
            skeleton.nb_meta_channels += self.num_c;
        }
        skeleton.channels.try_reserve(self.num_c)?;
        for c in self.begin_c..=self.end_c() {
            let info = &mut skeleton.channels[c];
            let (w, h) = info.size;
            let residual_size = if self.horizontal {
                info.size.0 = w.div_ceil(2);
                (w - info.size.0, h)
            } else {
                info.size.1 = h.div_ceil(2);
                (w, h - info.size.1)
            };
            info.shift = squeezed_shift(info.shift, self.horizontal);
            let residual = ChannelInfo {
                size: residual_size,
                shift: info.shift,
            };
            skeleton.channels.insert(offset + (c - self.begin_c), residual);
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(channels), err)]
    pub(super) fn forward(
        &self,
        channels: &mut Vec<ModularChannel>,
        nb_meta_channels: &mut usize,
    ) -> Result<()> {
        let infos: Vec<_> = channels.iter().map(ModularChannel::info).collect();
        let offset = self.check(&infos, *nb_meta_channels)?;
        if self.begin_c < *nb_meta_channels {
            *nb_meta_channels += self.num_c;
        }
        channels.try_reserve(self.num_c)?;
        for c in self.begin_c..=self.end_c() {
            let (avg, res) = if self.horizontal {
                forward_h(&channels[c].data)?
            } else {
                forward_v(&channels[c].data)?
            };
            let shift = squeezed_shift(channels[c].shift, self.horizontal);
            trace!(c, avg = ?avg.size(), res = ?res.size(), "squeezed channel");
            channels[c] = ModularChannel { data: avg, shift };
            channels.insert(
                offset + (c - self.begin_c),
                ModularChannel { data: res, shift },
            );
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(channels), err)]
    pub(super) fn inverse(
        &self,
        channels: &mut Vec<ModularChannel>,
        nb_meta_channels: &mut usize,
    ) -> Result<()> {
        check_channel_range(channels.len(), self.begin_c, self.num_c)?;
        let end_c = self.end_c();
        let offset = if self.in_place {
            end_c + 1
        } else {
            channels.len() - self.num_c
        };
        if offset <= end_c {
            return Err(Error::CorruptedSqueeze(end_c, offset));
        }
        check_channel_range(channels.len(), offset, self.num_c)?;
        if self.begin_c < *nb_meta_channels {
            if *nb_meta_channels <= self.num_c || end_c >= *nb_meta_channels {
                return Err(Error::MixingDifferentChannels);
            }
            *nb_meta_channels -= self.num_c;
        }

        for c in self.begin_c..=end_c {
            let rc = offset + c - self.begin_c;
            let (avg, res) = (&channels[c], &channels[rc]);
            let (aw, ah) = avg.size();
            let (rw, rh) = res.size();
            let consistent = if self.horizontal {
                ah == rh && aw >= rw && aw <= rw + 1
            } else {
                aw == rw && ah >= rh && ah <= rh + 1
            };
            if !consistent {
                return Err(Error::CorruptedSqueeze(c, rc));
            }
            let data = if self.horizontal {
                inverse_h(&avg.data, &res.data)?
            } else {
                inverse_v(&avg.data, &res.data)?
            };
            let shift = avg.shift.map(|(h, v)| {
                if self.horizontal {
                    (h.saturating_sub(1), v)
                } else {
                    (h, v.saturating_sub(1))
                }
            });
            channels[c] = ModularChannel { data, shift };
        }
        channels.drain(offset..offset + self.num_c);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use rand::SeedableRng;
    use test_log::test;

    use super::{SqueezeParams, default_squeeze_params, forward_h, forward_v, inverse_h, inverse_v};
    use crate::{
        error::{Error, Result},
        image::Image,
        modular::{ChannelInfo, ImageSkeleton, ModularChannel},
        util::test::{assert_channels_equal, random_channel},
    };

    #[test]
    fn single_axis_round_trip() -> Result<()> {
        arbtest::arbtest(|u| {
            let w = u.int_in_range(1..=70)?;
            let h = u.int_in_range(1..=20)?;
            let range = *u.choose(&[3, 255, 1 << 20])?;
            let mut data = Image::new((w, h)).unwrap();
            for row in data.rows_mut() {
                for v in row.iter_mut() {
                    *v = u.int_in_range(-range..=range)?;
                }
            }
            let (avg, res) = forward_h(&data).unwrap();
            assert_eq!(avg.size(), (w.div_ceil(2), h));
            assert_eq!(res.size(), (w / 2, h));
            inverse_h(&avg, &res).unwrap().check_equal(&data);
            let (avg, res) = forward_v(&data).unwrap();
            assert_eq!(avg.size(), (w, h.div_ceil(2)));
            assert_eq!(res.size(), (w, h / 2));
            inverse_v(&avg, &res).unwrap().check_equal(&data);
            Ok(())
        });
        Ok(())
    }

    #[test]
    fn constant_has_zero_residuals() -> Result<()> {
        let data = Image::new_with_value((9, 7), 100)?;
        let (avg, res) = forward_h(&data)?;
        assert!(avg.iter().all(|v| v == 100));
        assert!(res.iter().all(|v| v == 0));
        let (avg, res) = forward_v(&avg)?;
        assert!(avg.iter().all(|v| v == 100));
        assert!(res.iter().all(|v| v == 0));
        Ok(())
    }

    #[test]
    fn overflowing_residual() -> Result<()> {
        let data = Image::from_vec((2, 1), vec![i32::MAX, i32::MIN])?;
        assert!(matches!(forward_h(&data), Err(Error::ArithmeticOverflow)));
        let data = Image::from_vec((1, 2), vec![i32::MAX, i32::MIN])?;
        assert!(matches!(forward_v(&data), Err(Error::ArithmeticOverflow)));
        Ok(())
    }

    #[test]
    fn overflow_in_later_row_batch() -> Result<()> {
        // Rows past the first batch of eight, in both directions.
        let mut data = Image::new((4, 40))?;
        data.set(0, 37, i32::MAX);
        data.set(1, 37, i32::MIN);
        assert!(matches!(forward_h(&data), Err(Error::ArithmeticOverflow)));
        data.set(1, 37, 0);
        data.set(0, 36, i32::MIN);
        assert!(matches!(forward_v(&data), Err(Error::ArithmeticOverflow)));
        Ok(())
    }

    #[test]
    fn default_params_round_trip() -> Result<()> {
        let mut rng = rand_xorshift::XorShiftRng::seed_from_u64(0);
        for size in [(1, 1), (9, 5), (40, 13), (13, 40), (100, 3)] {
            let original: Vec<_> = (0..3)
                .map(|_| random_channel(&mut rng, size, -1000..=1000))
                .collect::<Result<_>>()?;
            let infos: Vec<_> = original.iter().map(ModularChannel::info).collect();
            let steps = default_squeeze_params(&infos, 0);
            let mut skeleton = ImageSkeleton {
                channels: infos,
                nb_meta_channels: 0,
            };
            let mut channels = original
                .iter()
                .map(ModularChannel::try_clone)
                .collect::<Result<Vec<_>>>()?;
            let mut nb_meta = 0;
            for step in steps.iter() {
                step.forward(&mut channels, &mut nb_meta)?;
                step.meta_apply(&mut skeleton)?;
            }
            let infos: Vec<_> = channels.iter().map(ModularChannel::info).collect();
            assert_eq!(infos, skeleton.channels);
            for c in channels.iter().take(3) {
                assert!(c.size().0 <= 8 && c.size().1 <= 8);
            }
            for step in steps.iter().rev() {
                step.inverse(&mut channels, &mut nb_meta)?;
            }
            assert_channels_equal(&channels, &original);
        }
        Ok(())
    }

    #[test]
    fn default_params_shapes() {
        let chroma = [ChannelInfo::new((20, 30)); 3];
        let steps = default_squeeze_params(&chroma, 0);
        assert_eq!(
            steps[0],
            SqueezeParams {
                horizontal: true,
                in_place: false,
                begin_c: 1,
                num_c: 2
            }
        );
        assert!(!steps[1].horizontal);
        // Tall image: vertical first.
        assert!(!steps[2].horizontal && steps[2].in_place && steps[2].num_c == 3);
        assert!(steps[3].horizontal);
        let small = [ChannelInfo::new((8, 8))];
        assert!(default_squeeze_params(&small, 0).is_empty());
        assert!(default_squeeze_params(&[], 0).is_empty());
    }

    #[test]
    fn rejects_invalid_steps() -> Result<()> {
        let mut skeleton = ImageSkeleton {
            channels: vec![
                ChannelInfo {
                    size: (4, 1),
                    shift: None,
                },
                ChannelInfo::new((0, 4)),
                ChannelInfo::new((4, 4)),
            ],
            nb_meta_channels: 1,
        };
        let step = |begin_c, num_c, in_place| SqueezeParams {
            horizontal: true,
            in_place,
            begin_c,
            num_c,
        };
        assert!(matches!(
            step(0, 2, true).meta_apply(&mut skeleton),
            Err(Error::MixingDifferentChannels)
        ));
        assert!(matches!(
            step(0, 1, false).meta_apply(&mut skeleton),
            Err(Error::MetaSqueezeRequiresInPlace)
        ));
        assert!(matches!(
            step(1, 1, true).meta_apply(&mut skeleton),
            Err(Error::SqueezeEmptyChannel(1))
        ));
        assert!(matches!(
            step(2, 2, true).meta_apply(&mut skeleton),
            Err(Error::InvalidChannelRange(2, 4, 3))
        ));
        step(0, 1, true).meta_apply(&mut skeleton)?;
        assert_eq!(skeleton.nb_meta_channels, 2);
        assert_eq!(skeleton.channels[1].size, (2, 1));
        assert!(skeleton.channels[1].is_meta());

        let mut deep = ImageSkeleton {
            channels: vec![ChannelInfo {
                size: (4, 4),
                shift: Some((31, 0)),
            }],
            nb_meta_channels: 0,
        };
        assert!(matches!(
            step(0, 1, true).meta_apply(&mut deep),
            Err(Error::TooManySqueezes)
        ));
        Ok(())
    }

    #[test]
    fn rejects_corrupted_residuals() -> Result<()> {
        let mut channels = vec![ModularChannel::new((3, 4))?, ModularChannel::new((5, 4))?];
        let mut nb_meta = 0;
        let step = SqueezeParams {
            horizontal: true,
            in_place: true,
            begin_c: 0,
            num_c: 1,
        };
        assert!(matches!(
            step.inverse(&mut channels, &mut nb_meta),
            Err(Error::CorruptedSqueeze(0, 1))
        ));
        Ok(())
    }
}
