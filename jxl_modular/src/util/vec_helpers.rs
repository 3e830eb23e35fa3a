// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::error::Result;

pub trait NewWithCapacity {
    type Output;
    fn new_with_capacity(capacity: usize) -> Result<Self::Output>;
}

impl<T> NewWithCapacity for Vec<T> {
    type Output = Vec<T>;

    fn new_with_capacity(capacity: usize) -> Result<Self::Output> {
        let mut vec = Vec::new();
        vec.try_reserve(capacity)?;
        Ok(vec)
    }
}
