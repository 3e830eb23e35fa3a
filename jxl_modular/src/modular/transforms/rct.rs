// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::check_equal_channels;
use crate::{
    error::{Error, Result},
    modular::{ChannelInfo, ModularChannel},
    util::tracing_wrappers::*,
};

/// Order in which the three input channels are read by the forward
/// transform (and written by the inverse).
#[derive(Debug, FromPrimitive, PartialEq, Clone, Copy)]
pub enum RctPermutation {
    Rgb = 0,
    Gbr = 1,
    Brg = 2,
    Rbg = 3,
    Grb = 4,
    Bgr = 5,
}

/// The arithmetic part of the transform, named by its inverse.
#[derive(Debug, FromPrimitive, PartialEq, Clone, Copy)]
pub enum RctOp {
    Noop = 0,
    AddFirstToThird = 1,
    AddFirstToSecond = 2,
    AddFirstToSecondAndThird = 3,
    AddAvgToSecond = 4,
    AddFirstToThirdAndAvgToSecond = 5,
    YCoCg = 6,
}

impl RctPermutation {
    /// Input channel of each of the three outputs.
    fn input_channels(self) -> [usize; 3] {
        let p = self as usize;
        [p % 3, (p + 1 + p / 3) % 3, (p + 2 - p / 3) % 3]
    }
}

fn parse_rct_type(rct_type: u32) -> Result<(RctOp, RctPermutation)> {
    let op = RctOp::from_u32(rct_type % 7);
    let perm = RctPermutation::from_u32(rct_type / 7);
    match (op, perm) {
        (Some(op), Some(perm)) => Ok((op, perm)),
        _ => Err(Error::InvalidRctType(rct_type)),
    }
}

pub(super) fn check_rct(channels: &[ChannelInfo], begin_c: usize, rct_type: u32) -> Result<()> {
    parse_rct_type(rct_type)?;
    check_equal_channels(channels, begin_c, 3)
}

fn channel_triple(
    channels: &mut [ModularChannel],
    begin_c: usize,
    rct_type: u32,
) -> Result<(RctOp, RctPermutation, &mut [ModularChannel])> {
    let infos: Vec<_> = channels.iter().map(ModularChannel::info).collect();
    check_rct(&infos, begin_c, rct_type)?;
    let (op, perm) = parse_rct_type(rct_type)?;
    Ok((op, perm, &mut channels[begin_c..begin_c + 3]))
}

#[inline]
fn forward_pixel(op: RctOp, [first, second, third]: [i32; 3]) -> [i32; 3] {
    match op {
        RctOp::YCoCg => {
            let (r, g, b) = (first, second, third);
            let co = r.wrapping_sub(b);
            let tmp = b.wrapping_add(co >> 1);
            let cg = g.wrapping_sub(tmp);
            let y = tmp.wrapping_add(cg >> 1);
            [y, co, cg]
        }
        _ => {
            let op = op as u32;
            let second = match op >> 1 {
                1 => second.wrapping_sub(first),
                2 => second.wrapping_sub(first.wrapping_add(third) >> 1),
                _ => second,
            };
            let third = if op & 1 != 0 {
                third.wrapping_sub(first)
            } else {
                third
            };
            [first, second, third]
        }
    }
}

#[inline]
fn inverse_pixel(op: RctOp, [first, second, third]: [i32; 3]) -> [i32; 3] {
    match op {
        RctOp::YCoCg => {
            let (y, co, cg) = (first, second, third);
            let tmp = y.wrapping_sub(cg >> 1);
            let g = cg.wrapping_add(tmp);
            let b = tmp.wrapping_sub(co >> 1);
            let r = b.wrapping_add(co);
            [r, g, b]
        }
        _ => {
            let op = op as u32;
            let third = if op & 1 != 0 {
                third.wrapping_add(first)
            } else {
                third
            };
            let second = match op >> 1 {
                1 => second.wrapping_add(first),
                2 => second.wrapping_add(first.wrapping_add(third) >> 1),
                _ => second,
            };
            [first, second, third]
        }
    }
}

fn apply_rct(
    channels: &mut [ModularChannel],
    perm: RctPermutation,
    f: impl Fn([i32; 3]) -> [i32; 3],
    inverse: bool,
) {
    let [a, b, c] = channels else {
        unreachable!("incorrect channel count for RCT");
    };
    let (w, h) = a.size();
    let perm = perm.input_channels();
    for y in 0..h {
        let mut rows = [a.data.row_mut(y), b.data.row_mut(y), c.data.row_mut(y)];
        for x in 0..w {
            let input = if inverse {
                [rows[0][x], rows[1][x], rows[2][x]]
            } else {
                perm.map(|i| rows[i][x])
            };
            let output = f(input);
            for (i, v) in output.into_iter().enumerate() {
                let dst = if inverse { perm[i] } else { i };
                rows[dst][x] = v;
            }
        }
    }
}

#[instrument(level = "debug", skip(channels), err)]
pub(super) fn forward_rct(
    channels: &mut [ModularChannel],
    begin_c: usize,
    rct_type: u32,
) -> Result<()> {
    let (op, perm, channels) = channel_triple(channels, begin_c, rct_type)?;
    if op == RctOp::Noop && perm == RctPermutation::Rgb {
        return Ok(());
    }
    apply_rct(channels, perm, |px| forward_pixel(op, px), false);
    Ok(())
}

#[instrument(level = "debug", skip(channels), err)]
pub(super) fn inverse_rct(
    channels: &mut [ModularChannel],
    begin_c: usize,
    rct_type: u32,
) -> Result<()> {
    let (op, perm, channels) = channel_triple(channels, begin_c, rct_type)?;
    if op == RctOp::Noop && perm == RctPermutation::Rgb {
        return Ok(());
    }
    apply_rct(channels, perm, |px| inverse_pixel(op, px), true);
    Ok(())
}
