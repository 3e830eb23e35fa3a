// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::error::{Error, Result};
use crate::util::FloorLog2;

/// Splits unsigned values into a token and a number of raw bits.
///
/// Values below `1 << split_exponent` are their own token. Larger values keep
/// their exponent, `msb_in_token` high bits and `lsb_in_token` low bits in
/// the token; the remaining middle bits are written raw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HybridUintConfig {
    split_exponent: u32,
    split_token: u32,
    msb_in_token: u32,
    lsb_in_token: u32,
}

/// A value split by a [`HybridUintConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HybridUintSplit {
    pub token: u32,
    pub nbits: u32,
    pub bits: u32,
}

impl Default for HybridUintConfig {
    fn default() -> Self {
        Self {
            split_exponent: 4,
            split_token: 16,
            msb_in_token: 2,
            lsb_in_token: 0,
        }
    }
}

impl HybridUintConfig {
    pub fn new(split_exponent: u32, msb_in_token: u32, lsb_in_token: u32) -> Result<Self> {
        if split_exponent > 31 || msb_in_token + lsb_in_token > split_exponent {
            return Err(Error::InvalidUintConfig(
                split_exponent,
                msb_in_token,
                lsb_in_token,
            ));
        }
        Ok(Self {
            split_exponent,
            split_token: 1 << split_exponent,
            msb_in_token,
            lsb_in_token,
        })
    }

    /// Configuration used to estimate residual costs while learning trees.
    pub fn for_tree_learning() -> Self {
        Self {
            split_exponent: 4,
            split_token: 16,
            msb_in_token: 1,
            lsb_in_token: 2,
        }
    }

    pub fn split_exponent(&self) -> u32 {
        self.split_exponent
    }

    pub fn encode(&self, value: u32) -> HybridUintSplit {
        if value < self.split_token {
            return HybridUintSplit {
                token: value,
                nbits: 0,
                bits: 0,
            };
        }
        let n = value.floor_log2();
        let m = value - (1 << n);
        let token = self.split_token
            + ((n - self.split_exponent) << (self.msb_in_token + self.lsb_in_token))
            + ((m >> (n - self.msb_in_token)) << self.lsb_in_token)
            + (m & ((1 << self.lsb_in_token) - 1));
        let nbits = n - self.msb_in_token - self.lsb_in_token;
        let bits = (value >> self.lsb_in_token) & ((1u64 << nbits) - 1) as u32;
        HybridUintSplit { token, nbits, bits }
    }

    /// Number of raw bits that accompany `token`.
    pub fn extra_bits(&self, token: u32) -> Result<u32> {
        if token < self.split_token {
            return Ok(0);
        }
        let bits_in_token = self.lsb_in_token + self.msb_in_token;
        let nbits = self.split_exponent - bits_in_token
            + ((token - self.split_token) >> bits_in_token);
        if nbits > 31 {
            return Err(Error::IntegerTooLarge(nbits));
        }
        Ok(nbits)
    }

    /// Rebuilds a value from its token, fetching raw bits through `read_bits`.
    pub fn decode(&self, token: u32, read_bits: impl FnOnce(u32) -> Result<u32>) -> Result<u32> {
        if token < self.split_token {
            return Ok(token);
        }
        let nbits = self.extra_bits(token)?;
        let low = token & ((1 << self.lsb_in_token) - 1);
        let token_nolow = token >> self.lsb_in_token;
        let bits = read_bits(nbits)?;
        let hi = (token_nolow & ((1 << self.msb_in_token) - 1)) | (1 << self.msb_in_token);
        let value = ((((hi as u64) << nbits) | bits as u64) << self.lsb_in_token) | low as u64;
        u32::try_from(value).map_err(|_| Error::IntegerTooLarge(nbits))
    }
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::{HybridUintConfig, HybridUintSplit};
    use crate::error::Result;

    #[test]
    fn small_values_are_tokens() {
        let config = HybridUintConfig::default();
        for v in 0..16 {
            assert_eq!(
                config.encode(v),
                HybridUintSplit {
                    token: v,
                    nbits: 0,
                    bits: 0
                }
            );
        }
    }

    #[test]
    fn known_splits() -> Result<()> {
        let config = HybridUintConfig::default();
        // 16 = 0b10000: exponent 4, top two mantissa bits 00, two raw bits.
        assert_eq!(
            config.encode(16),
            HybridUintSplit {
                token: 16,
                nbits: 2,
                bits: 0
            }
        );
        // 0b110101: exponent 5, msb 10, raw bits 101.
        assert_eq!(
            config.encode(53),
            HybridUintSplit {
                token: 16 + 4 + 2,
                nbits: 3,
                bits: 0b101
            }
        );
        let learning = HybridUintConfig::for_tree_learning();
        // 0b110101: exponent 5, msb 1, lsb 01, raw bits 01.
        assert_eq!(
            learning.encode(53),
            HybridUintSplit {
                token: 16 + (1 << 3) + (1 << 2) + 1,
                nbits: 2,
                bits: 0b01
            }
        );
        Ok(())
    }

    #[test]
    fn decode_inverts_encode() -> Result<()> {
        let configs = [
            HybridUintConfig::default(),
            HybridUintConfig::for_tree_learning(),
            HybridUintConfig::new(0, 0, 0)?,
            HybridUintConfig::new(8, 3, 4)?,
        ];
        arbtest::arbtest(|u| {
            let value: u32 = u.arbitrary()?;
            let config = configs[u.choose_index(configs.len())?];
            let split = config.encode(value);
            assert_eq!(config.extra_bits(split.token).unwrap(), split.nbits);
            let decoded = config
                .decode(split.token, |nbits| {
                    assert_eq!(nbits, split.nbits);
                    Ok(split.bits)
                })
                .unwrap();
            assert_eq!(decoded, value);
            Ok(())
        });
        Ok(())
    }

    #[test]
    fn invalid_configs() {
        assert!(HybridUintConfig::new(4, 3, 2).is_err());
        assert!(HybridUintConfig::new(32, 0, 0).is_err());
    }

    #[test]
    fn oversized_token() {
        let config = HybridUintConfig::default();
        assert!(config.decode(16 + (40 << 2), |_| Ok(0)).is_err());
    }
}
