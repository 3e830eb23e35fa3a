// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Predictive core of the JPEG XL modular mode: predictors, per-pixel
//! properties, MA trees (traversal and learning), and the reversible
//! channel transforms (RCT, Palette, Squeeze).
//!
//! The entropy back-end is not part of this crate. Residuals and tree
//! symbols are exchanged as hybrid-uint tokens through the
//! [`entropy_coding::TokenWriter`] and [`entropy_coding::TokenReader`]
//! traits.

#![deny(unsafe_code)]
pub mod entropy_coding;
pub mod error;
pub mod image;
pub mod modular;
pub mod util;
