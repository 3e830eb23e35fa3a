// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use super::HybridUintConfig;
use crate::error::Result;

/// Zig-zag maps signed values to unsigned ones: 0, -1, 1, -2, ... become
/// 0, 1, 2, 3, ...
pub fn pack_signed(value: i32) -> u32 {
    ((value as u32) << 1) ^ ((value >> 31) as u32)
}

pub fn unpack_signed(unsigned: u32) -> i32 {
    ((unsigned >> 1) ^ ((!unsigned) & 1).wrapping_sub(1)) as i32
}

/// A value to be coded in a given context, before hybrid-uint splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub context: usize,
    pub value: u32,
}

impl Token {
    pub fn new(context: usize, value: u32) -> Self {
        Self { context, value }
    }

    pub fn new_signed(context: usize, value: i32) -> Self {
        Self {
            context,
            value: pack_signed(value),
        }
    }
}

/// Receives the symbols produced by the encoder.
pub trait TokenWriter {
    /// Emits an entropy-coded symbol in `context`.
    fn emit(&mut self, context: usize, token: u32);

    /// Writes the low `nbits` bits of `bits` without entropy coding.
    fn write_bits(&mut self, nbits: u32, bits: u32);

    fn write_value(&mut self, config: &HybridUintConfig, context: usize, value: u32) {
        let split = config.encode(value);
        self.emit(context, split.token);
        self.write_bits(split.nbits, split.bits);
    }
}

/// Supplies the symbols consumed by the decoder; the dual of [`TokenWriter`].
pub trait TokenReader {
    fn read_token(&mut self, context: usize) -> Result<u32>;

    fn read_bits(&mut self, nbits: u32) -> Result<u32>;

    fn read_value(&mut self, config: &HybridUintConfig, context: usize) -> Result<u32> {
        let token = self.read_token(context)?;
        config.decode(token, |nbits| self.read_bits(nbits))
    }

    fn read_signed(&mut self, config: &HybridUintConfig, context: usize) -> Result<i32> {
        self.read_value(config, context).map(unpack_signed)
    }
}

/// Writes `tokens` in order, splitting every value with `config`.
pub fn write_tokens(writer: &mut impl TokenWriter, config: &HybridUintConfig, tokens: &[Token]) {
    for token in tokens {
        writer.write_value(config, token.context, token.value);
    }
}
