// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::fmt::Debug;

use crate::{
    error::{Error, Result},
    util::tracing_wrappers::*,
};

mod private {
    pub trait Sealed {}
}

pub trait ImageDataType: private::Sealed + Copy + Default + 'static + Debug + PartialEq + Send + Sync {
    #[cfg(test)]
    fn random<R: rand::Rng>(rng: &mut R) -> Self;
}

macro_rules! impl_image_data_type {
    ($ty: ty) => {
        impl private::Sealed for $ty {}
        impl ImageDataType for $ty {
            #[cfg(test)]
            fn random<R: rand::Rng>(rng: &mut R) -> Self {
                rng.random::<$ty>()
            }
        }
    };
}

impl_image_data_type!(i32);
impl_image_data_type!(i64);
impl_image_data_type!(u64);

/// An owned 2-D plane stored row by row with stride equal to its width.
///
/// Either dimension may be zero: squeezing a channel of width 1 produces a
/// residual channel with no columns.
#[derive(Clone, PartialEq)]
pub struct Image<T: ImageDataType> {
    size: (usize, usize),
    data: Vec<T>,
}

impl<T: ImageDataType> Debug for Image<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Image {}x{}", self.size.0, self.size.1)
    }
}

impl<T: ImageDataType> Image<T> {
    #[instrument(level = "trace", err)]
    pub fn new(size: (usize, usize)) -> Result<Image<T>> {
        Self::new_with_value(size, T::default())
    }

    pub fn new_with_value(size: (usize, usize), value: T) -> Result<Image<T>> {
        let (xsize, ysize) = size;
        // These limits let us not worry about overflows.
        if xsize as u64 >= i64::MAX as u64 / 4 || ysize as u64 >= i64::MAX as u64 / 4 {
            return Err(Error::ImageSizeTooLarge(xsize, ysize));
        }
        let total_size = xsize
            .checked_mul(ysize)
            .ok_or(Error::ImageSizeTooLarge(xsize, ysize))?;
        let mut data = vec![];
        data.try_reserve_exact(total_size)?;
        data.resize(total_size, value);
        Ok(Image {
            size: (xsize, ysize),
            data,
        })
    }

    /// Builds an image from row-major `data`.
    pub fn from_vec(size: (usize, usize), data: Vec<T>) -> Result<Image<T>> {
        if size.0.checked_mul(size.1) != Some(data.len()) {
            return Err(Error::ImageSizeTooLarge(size.0, size.1));
        }
        Ok(Image { size, data })
    }

    #[cfg(test)]
    pub fn new_random<R: rand::Rng>(size: (usize, usize), rng: &mut R) -> Result<Image<T>> {
        let mut img = Self::new(size)?;
        img.data.iter_mut().for_each(|x| *x = T::random(rng));
        Ok(img)
    }

    pub fn try_clone(&self) -> Result<Image<T>> {
        let mut data = vec![];
        data.try_reserve_exact(self.data.len())?;
        data.extend_from_slice(&self.data);
        Ok(Image {
            size: self.size,
            data,
        })
    }

    pub fn size(&self) -> (usize, usize) {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, row: usize) -> &[T] {
        debug_assert!(row < self.size.1);
        let start = row * self.size.0;
        &self.data[start..start + self.size.0]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [T] {
        debug_assert!(row < self.size.1);
        let start = row * self.size.0;
        &mut self.data[start..start + self.size.0]
    }

    /// Returns two distinct rows, the first one mutably.
    pub fn row_and_other_mut(&mut self, row: usize, other: usize) -> (&mut [T], &[T]) {
        assert_ne!(row, other);
        let w = self.size.0;
        if row < other {
            let (a, b) = self.data.split_at_mut(other * w);
            (&mut a[row * w..(row + 1) * w], &b[..w])
        } else {
            let (a, b) = self.data.split_at_mut(row * w);
            (&mut b[..w], &a[other * w..(other + 1) * w])
        }
    }

    /// Iterates over all rows, top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &[T]> + '_ {
        (0..self.size.1).map(move |y| self.row(y))
    }

    /// Iterates mutably over all rows, top to bottom.
    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [T]> + '_ {
        // Unlike chunks_mut, also yields the empty rows of zero-width images.
        let (w, h) = self.size;
        let mut rest = self.data.as_mut_slice();
        (0..h).map(move |_| {
            let (row, tail) = std::mem::take(&mut rest).split_at_mut(w);
            rest = tail;
            row
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.data.iter().copied()
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    pub fn get(&self, x: usize, y: usize) -> T {
        self.row(y)[x]
    }

    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.row_mut(y)[x] = value;
    }

    #[cfg(test)]
    pub fn check_equal(&self, other: &Image<T>) {
        assert_eq!(self.size, other.size);
        for y in 0..self.size.1 {
            for x in 0..self.size.0 {
                if self.row(y)[x] != other.row(y)[x] {
                    panic!(
                        "mismatch at position {x}x{y}, values {:?} and {:?}",
                        self.row(y)[x],
                        other.row(y)[x]
                    );
                }
            }
        }
    }
}
