// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

pub trait FloorLog2 {
    /// Returns floor(log2(self)). The result is unspecified for 0.
    fn floor_log2(&self) -> u32;
}

macro_rules! impl_log2 {
    ($ty: ty) => {
        impl FloorLog2 for $ty {
            fn floor_log2(&self) -> u32 {
                debug_assert_ne!(*self, 0);
                <$ty>::BITS - 1 - self.leading_zeros()
            }
        }
    };
}

impl_log2!(u32);
impl_log2!(u64);
impl_log2!(usize);
