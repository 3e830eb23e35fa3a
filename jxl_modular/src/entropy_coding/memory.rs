// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use super::{TokenReader, TokenWriter};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Symbol {
    Token { context: usize, token: u32 },
    Bits { nbits: u32, bits: u32 },
}

/// In-memory token stream. Records everything written to it and replays it
/// through [`TokenReader`], checking that contexts and raw bit counts match.
#[derive(Debug, Default, Clone)]
pub struct TokenBuffer {
    symbols: Vec<Symbol>,
    pos: usize,
}

impl TokenBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entropy-coded symbols written so far.
    pub fn num_tokens(&self) -> usize {
        self.symbols
            .iter()
            .filter(|s| matches!(s, Symbol::Token { .. }))
            .count()
    }

    /// Tokens written in `context`, in order.
    pub fn tokens_in_context(&self, context: usize) -> Vec<u32> {
        self.symbols
            .iter()
            .filter_map(|s| match *s {
                Symbol::Token { context: c, token } if c == context => Some(token),
                _ => None,
            })
            .collect()
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos == self.symbols.len()
    }

    /// Restarts reading from the beginning of the stream.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    fn next(&mut self) -> Result<Symbol> {
        let symbol = *self
            .symbols
            .get(self.pos)
            .ok_or(Error::TokenStreamExhausted)?;
        self.pos += 1;
        Ok(symbol)
    }
}

impl TokenWriter for TokenBuffer {
    fn emit(&mut self, context: usize, token: u32) {
        self.symbols.push(Symbol::Token { context, token });
    }

    fn write_bits(&mut self, nbits: u32, bits: u32) {
        if nbits == 0 {
            return;
        }
        debug_assert!(nbits <= 32);
        let mask = ((1u64 << nbits) - 1) as u32;
        self.symbols.push(Symbol::Bits {
            nbits,
            bits: bits & mask,
        });
    }
}

impl TokenReader for TokenBuffer {
    fn read_token(&mut self, context: usize) -> Result<u32> {
        match self.next()? {
            Symbol::Token { context: c, token } if c == context => Ok(token),
            Symbol::Token { context: c, .. } => Err(Error::TokenContextMismatch(context, c)),
            Symbol::Bits { nbits, .. } => Err(Error::RawBitsMismatch(0, nbits)),
        }
    }

    fn read_bits(&mut self, nbits: u32) -> Result<u32> {
        if nbits == 0 {
            return Ok(0);
        }
        match self.next()? {
            Symbol::Bits { nbits: n, bits } if n == nbits => Ok(bits),
            Symbol::Bits { nbits: n, .. } => Err(Error::RawBitsMismatch(nbits, n)),
            Symbol::Token { .. } => Err(Error::RawBitsMismatch(nbits, 0)),
        }
    }
}
