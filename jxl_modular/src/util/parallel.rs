// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Thin wrappers that run on the rayon thread pool when the `parallel`
//! feature is enabled, and sequentially otherwise. Results are identical in
//! both configurations.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Calls `f` on every item, possibly concurrently.
pub(crate) fn for_each_item<T, F>(items: Vec<T>, f: F)
where
    T: Send,
    F: Fn(T) + Send + Sync,
{
    #[cfg(feature = "parallel")]
    {
        items.into_par_iter().for_each(f)
    }

    #[cfg(not(feature = "parallel"))]
    {
        items.into_iter().for_each(f)
    }
}

/// Calls `f` on every item, possibly concurrently, stopping at the first
/// error. Which error is returned is unspecified if several items fail.
pub(crate) fn try_for_each_item<T, E, F>(items: Vec<T>, f: F) -> Result<(), E>
where
    T: Send,
    E: Send,
    F: Fn(T) -> Result<(), E> + Send + Sync,
{
    #[cfg(feature = "parallel")]
    {
        items.into_par_iter().try_for_each(f)
    }

    #[cfg(not(feature = "parallel"))]
    {
        items.into_iter().try_for_each(f)
    }
}

/// Maps `f` over `items`, possibly concurrently, preserving order.
pub(crate) fn map_items<T, U, F>(items: &[T], f: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Send + Sync,
{
    #[cfg(feature = "parallel")]
    {
        items.par_iter().map(f).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        items.iter().map(f).collect()
    }
}
