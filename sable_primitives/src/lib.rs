// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fundamental geometry and fixed-point types for subtitle rendering.
//!
//! This crate is a lightweight, `no_std`-friendly vocabulary layer shared by
//! the rendering core and its collaborators. It holds small, typed
//! representations of the "leaf" concepts of the pipeline: 26.6 and 16.16
//! fixed-point coordinates, integer and floating-point vectors and
//! rectangles, packed RGBA colors, and the 3×3 transform matrices fed to the
//! rasterizer.
//!
//! ## Features
//!
//! - `std` (enabled by default): This is currently unused and is provided for
//!   forward compatibility.
// LINEBENDER LINT SET - lib.rs - v3
// See https://linebender.org/wiki/canonical-lints/
// These lints shouldn't apply to examples or tests.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
// These lints shouldn't apply to examples.
#![warn(clippy::print_stdout, clippy::print_stderr)]
// Targeting e.g. 32-bit means structs containing usize can give false positives for 64-bit.
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
// END LINEBENDER LINT SET
#![cfg_attr(docsrs, feature(doc_cfg))]
#![no_std]

mod color;
mod fixed;
mod geom;
mod matrix;

pub use color::Rgba;
pub use fixed::{d16_to_d6, d6_to_f64, f64_to_d6, f64_to_d16, ONE_D16, ONE_D6};
pub use geom::{DRect, DVec2, Rect, Vec2};
pub use matrix::Matrix3;
