// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::{
    error::{Error, Result},
    image::Image,
    util::FloorLog2,
};
use array_init::try_array_init;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

#[repr(u8)]
#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predictor {
    Zero = 0,
    West = 1,
    North = 2,
    AverageWestAndNorth = 3,
    Select = 4,
    Gradient = 5,
    Weighted = 6,
    NorthEast = 7,
    NorthWest = 8,
    WestWest = 9,
    AverageWestAndNorthWest = 10,
    AverageNorthAndNorthWest = 11,
    AverageNorthAndNorthEast = 12,
    AverageAll = 13,
}

impl TryFrom<u32> for Predictor {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Self::from_u32(value).ok_or(Error::InvalidPredictor(value))
    }
}

/// Causal neighbours of a pixel, after edge substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PredictionData {
    pub left: i32,
    pub top: i32,
    pub toptop: i32,
    pub topleft: i32,
    pub topright: i32,
    pub leftleft: i32,
    pub toprightright: i32,
}

impl PredictionData {
    /// Gathers the neighbours of `(x, y)` from the rows above it and the
    /// already known part of row `y`.
    pub fn from_rows(
        row: &[i32],
        row_top: Option<&[i32]>,
        row_toptop: Option<&[i32]>,
        x: usize,
    ) -> Self {
        let width = row.len();
        let left = if x > 0 {
            row[x - 1]
        } else if let Some(top) = row_top {
            top[x]
        } else {
            0
        };
        let Some(top_row) = row_top else {
            return Self {
                left,
                top: left,
                toptop: left,
                topleft: left,
                topright: left,
                leftleft: if x > 1 { row[x - 2] } else { left },
                toprightright: left,
            };
        };
        let top = top_row[x];
        let topleft = if x > 0 { top_row[x - 1] } else { left };
        let topright = if x + 1 < width { top_row[x + 1] } else { top };
        let leftleft = if x > 1 { row[x - 2] } else { left };
        let toptop = row_toptop.map_or(top, |r| r[x]);
        let toprightright = if x + 2 < width {
            top_row[x + 2]
        } else {
            topright
        };
        Self {
            left,
            top,
            toptop,
            topleft,
            topright,
            leftleft,
            toprightright,
        }
    }

    pub fn get(image: &Image<i32>, x: usize, y: usize) -> Self {
        Self::from_rows(
            image.row(y),
            (y > 0).then(|| image.row(y - 1)),
            (y > 1).then(|| image.row(y - 2)),
            x,
        )
    }
}

impl Predictor {
    pub const NUM_PREDICTORS: u32 = Predictor::AverageAll as u32 + 1;

    pub fn all() -> impl Iterator<Item = Predictor> {
        (0..Self::NUM_PREDICTORS).filter_map(Predictor::from_u32)
    }

    pub fn predict_one(&self, data: PredictionData, wp_pred: i64) -> i64 {
        let PredictionData {
            left,
            top,
            toptop,
            topleft,
            topright,
            leftleft,
            toprightright,
        } = data;
        match self {
            Predictor::Zero => 0,
            Predictor::West => left as i64,
            Predictor::North => top as i64,
            Predictor::Select => select(left as i64, top as i64, topleft as i64),
            Predictor::Gradient => clamped_gradient(left as i64, top as i64, topleft as i64),
            Predictor::Weighted => wp_pred,
            Predictor::WestWest => leftleft as i64,
            Predictor::NorthEast => topright as i64,
            Predictor::NorthWest => topleft as i64,
            Predictor::AverageWestAndNorth => (top as i64 + left as i64) / 2,
            Predictor::AverageWestAndNorthWest => (left as i64 + topleft as i64) / 2,
            Predictor::AverageNorthAndNorthWest => (top as i64 + topleft as i64) / 2,
            Predictor::AverageNorthAndNorthEast => (top as i64 + topright as i64) / 2,
            Predictor::AverageAll => {
                (6 * top as i64 - 2 * toptop as i64
                    + 7 * left as i64
                    + leftleft as i64
                    + toprightright as i64
                    + 3 * topright as i64
                    + 8)
                    / 16
            }
        }
    }
}

fn select(left: i64, top: i64, topleft: i64) -> i64 {
    let p = left + top - topleft;
    if (p - left).abs() < (p - top).abs() {
        left
    } else {
        top
    }
}

/// `left + top - topleft`, clamped to the range spanned by `left` and `top`.
/// A `topleft` outside of that range selects the opposite bound.
pub fn clamped_gradient(left: i64, top: i64, topleft: i64) -> i64 {
    let min = left.min(top);
    let max = left.max(top);
    let grad = left + top - topleft;
    let grad_clamp_max = if topleft < min { max } else { grad };
    if topleft > max { min } else { grad_clamp_max }
}

const NUM_WP_PREDICTORS: usize = 4;
const PRED_EXTRA_BITS: u32 = 3;
const PREDICTION_ROUND: i64 = ((1 << PRED_EXTRA_BITS) >> 1) - 1;

#[rustfmt::skip]
const DIVLOOKUP: [u32; 64] = [
    16777216, 8388608, 5592405, 4194304, 3355443, 2796202,
    2396745, 2097152, 1864135, 1677721, 1525201, 1398101,
    1290555, 1198372, 1118481, 1048576, 986895, 932067,
    883011, 838860, 798915, 762600, 729444, 699050,
    671088, 645277, 621378, 599186, 578524, 559240,
    541200, 524288, 508400, 493447, 479349, 466033,
    453438, 441505, 430185, 419430, 409200, 399457,
    390167, 381300, 372827, 364722, 356962, 349525,
    342392, 335544, 328965, 322638, 316551, 310689,
    305040, 299593, 294337, 289262, 284359, 279620,
    275036, 270600, 266305, 262144,
];

/// Parameters of the weighted predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedHeader {
    pub p1c: u32,
    pub p2c: u32,
    pub p3ca: u32,
    pub p3cb: u32,
    pub p3cc: u32,
    pub p3cd: u32,
    pub p3ce: u32,
    pub w: [u32; NUM_WP_PREDICTORS],
}

impl Default for WeightedHeader {
    fn default() -> Self {
        Self {
            p1c: 16,
            p2c: 10,
            p3ca: 7,
            p3cb: 7,
            p3cc: 7,
            p3cd: 0,
            p3ce: 0,
            w: [0xd, 0xc, 0xc, 0xc],
        }
    }
}

impl WeightedHeader {
    pub const NUM_PRESETS: u32 = 5;

    pub fn preset(mode: u32) -> Result<Self> {
        let h = match mode {
            0 => Self::default(),
            1 => Self {
                p1c: 8,
                p2c: 8,
                p3ca: 4,
                p3cb: 0,
                p3cc: 3,
                p3cd: 23,
                p3ce: 2,
                w: [0xd, 0xc, 0xc, 0xb],
            },
            2 => Self {
                p1c: 10,
                p2c: 9,
                p3ca: 7,
                p3cb: 0,
                p3cc: 0,
                p3cd: 16,
                p3ce: 9,
                w: [0xd, 0xc, 0xd, 0xc],
            },
            3 => Self {
                p1c: 16,
                p2c: 8,
                p3ca: 0,
                p3cb: 16,
                p3cc: 0,
                p3cd: 23,
                p3ce: 0,
                w: [0xd, 0xd, 0xc, 0xc],
            },
            4 => Self {
                p1c: 10,
                p2c: 10,
                p3ca: 5,
                p3cb: 5,
                p3cc: 5,
                p3cd: 12,
                p3ce: 4,
                w: [0xd, 0xc, 0xc, 0xc],
            },
            _ => return Err(Error::InvalidWpMode(mode)),
        };
        Ok(h)
    }
}

// With `maxweight < 16` the product stays below 2^28, so this gives the same
// result as the 32-bit formulation for every error sum below `u32::MAX`.
fn error_weight(x: u64, maxweight: u32) -> u64 {
    let shift = ((x + 1).floor_log2() as i32 - 5).max(0) as u32;
    4 + ((maxweight as u64 * DIVLOOKUP[(x >> shift) as usize] as u64) >> shift)
}

fn weighted_average(values: &[i64; NUM_WP_PREDICTORS], mut w: [u64; NUM_WP_PREDICTORS]) -> i64 {
    // Every weight is at least 4, so the sum is at least 16.
    let log_weight = w.iter().sum::<u64>().floor_log2();
    for w in w.iter_mut() {
        *w >>= log_weight - 4;
    }
    let weight_sum: u64 = w.iter().sum();
    let mut sum = (weight_sum as i128 >> 1) - 1;
    for (v, w) in values.iter().zip(w.iter()) {
        sum += *v as i128 * *w as i128;
    }
    ((sum * DIVLOOKUP[weight_sum as usize - 1] as i128) >> 24) as i64
}

/// Adaptive state of the weighted predictor for one channel. Pixels must
/// be visited in raster order, calling [`Self::update_errors`] after each
/// [`Self::predict_and_property`].
#[derive(Debug)]
pub struct WeightedPredictorState {
    header: WeightedHeader,
    xsize: usize,
    prediction: [i64; NUM_WP_PREDICTORS],
    pred: i64,
    // Two rows each, indexed by y & 1, with two extra columns.
    pred_errors: [Image<u64>; NUM_WP_PREDICTORS],
    error: Image<i64>,
}

impl WeightedPredictorState {
    pub fn new(header: &WeightedHeader, xsize: usize) -> Result<Self> {
        let size = (xsize + 2, 2);
        Ok(Self {
            header: *header,
            xsize,
            prediction: [0; NUM_WP_PREDICTORS],
            pred: 0,
            pred_errors: try_array_init(|_| Image::new(size))?,
            error: Image::new(size)?,
        })
    }

    fn rows(y: usize) -> (usize, usize) {
        // (current, previous)
        if y & 1 != 0 { (0, 1) } else { (1, 0) }
    }

    /// Returns the prediction for `(x, y)` and the WP property, the local
    /// error of largest magnitude.
    pub fn predict_and_property(
        &mut self,
        (x, y): (usize, usize),
        data: &PredictionData,
    ) -> (i64, i64) {
        let (cur_row, prev_row) = Self::rows(y);
        let pos_n = x;
        let pos_ne = if x + 1 < self.xsize { x + 1 } else { x };
        let pos_nw = if x > 0 { x - 1 } else { x };
        let mut weights = [0u64; NUM_WP_PREDICTORS];
        for (i, w) in weights.iter_mut().enumerate() {
            let errors = self.pred_errors[i].row(prev_row);
            // errors[pos_n] also contains the error of the W pixel, and
            // errors[pos_nw] the error of the WW pixel.
            *w = error_weight(
                errors[pos_n] + errors[pos_ne] + errors[pos_nw],
                self.header.w[i],
            );
        }
        let n = (data.top as i64) << PRED_EXTRA_BITS;
        let w = (data.left as i64) << PRED_EXTRA_BITS;
        let ne = (data.topright as i64) << PRED_EXTRA_BITS;
        let nw = (data.topleft as i64) << PRED_EXTRA_BITS;
        let nn = (data.toptop as i64) << PRED_EXTRA_BITS;

        let error_prev = self.error.row(prev_row);
        let te_w = if x == 0 {
            0
        } else {
            self.error.row(cur_row)[x - 1]
        };
        let te_n = error_prev[pos_n];
        let te_nw = error_prev[pos_nw];
        let te_ne = error_prev[pos_ne];
        let sum_wn = te_n + te_w;

        let mut property = te_w;
        for te in [te_n, te_nw, te_ne] {
            if te.abs() > property.abs() {
                property = te;
            }
        }

        let h = &self.header;
        self.prediction = [
            w + ne - n,
            n - (((sum_wn + te_ne) * h.p1c as i64) >> 5),
            w - (((sum_wn + te_nw) * h.p2c as i64) >> 5),
            n - ((te_nw * h.p3ca as i64
                + te_n * h.p3cb as i64
                + te_ne * h.p3cc as i64
                + (nn - n) * h.p3cd as i64
                + (nw - w) * h.p3ce as i64)
                >> 5),
        ];
        self.pred = weighted_average(&self.prediction, weights);

        // No clamping when the three errors agree in sign.
        if ((te_n ^ te_w) | (te_n ^ te_nw)) > 0 {
            return ((self.pred + PREDICTION_ROUND) >> PRED_EXTRA_BITS, property);
        }
        let max = w.max(ne).max(n);
        let min = w.min(ne).min(n);
        self.pred = self.pred.clamp(min, max);
        ((self.pred + PREDICTION_ROUND) >> PRED_EXTRA_BITS, property)
    }

    pub fn update_errors(&mut self, value: i32, (x, y): (usize, usize)) {
        let (cur_row, prev_row) = Self::rows(y);
        let value = (value as i64) << PRED_EXTRA_BITS;
        self.error.row_mut(cur_row)[x] = self.pred - value;
        for (i, errors) in self.pred_errors.iter_mut().enumerate() {
            let err = ((self.prediction[i] - value).unsigned_abs() + PREDICTION_ROUND as u64)
                >> PRED_EXTRA_BITS;
            errors.row_mut(cur_row)[x] = err;
            errors.row_mut(prev_row)[x + 1] += err;
        }
    }
}
