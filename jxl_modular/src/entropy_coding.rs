// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Interface between the modular coder and an entropy back-end.
//!
//! Values are split into a token (coded by the back-end with a context) and
//! raw extra bits by [`HybridUintConfig`]. The back-end itself is external;
//! [`TokenBuffer`] is an in-memory stand-in that records the stream.

mod hybrid_uint;
mod memory;
mod token;

pub use hybrid_uint::*;
pub use memory::*;
pub use token::*;
