// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Sable is a subtitle typesetting and rendering core.
//!
//! Given parsed subtitle events and styles, a timestamp, and a target frame
//! size, the renderer produces an ordered list of positioned, colored alpha
//! bitmaps ready for compositing onto a video frame.
//!
//! Some key types are:
//! - [`Renderer`] owns everything that persists across frames: the cache
//!   hierarchy, the rasterizer scratch buffers, and the frame settings.
//! - [`Track`], [`Style`] and [`Event`] are the parsed-script inputs; the
//!   renderer never tokenizes script files itself.
//! - [`FontLoader`] and [`Shaper`] are the seams to the font and text
//!   shaping collaborators. Built-in implementations cover the common case:
//!   a skrifa-backed loader (behind the `font-loader` feature) and a
//!   bidi-aware simple shaper.
//! - [`Frame`] is the output: images in compositing order, each an 8-bit
//!   alpha bitmap with a destination position and a packed color. Image
//!   pixel storage is shared with the composite cache and released when the
//!   frame and the cache both drop their references.
//!
//! ## Usage example
//!
//! ```no_run
//! use sable::{Renderer, RendererOptions, Track};
//!
//! let mut renderer = Renderer::new(RendererOptions::default());
//! renderer.set_frame_size(1920, 1080).unwrap();
//!
//! let track: Track = unimplemented!("parsed by the script-format front end");
//! let frame = renderer.render_frame(&track, 5000);
//! for image in frame.images() {
//!     // composite image.bitmap() at (image.dst_x(), image.dst_y())
//! }
//! ```

// LINEBENDER LINT SET - lib.rs - v4
// See https://linebender.org/wiki/canonical-lints/
// These lints shouldn't apply to examples or tests.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
// These lints shouldn't apply to examples.
#![warn(clippy::print_stdout, clippy::print_stderr)]
// Targeting e.g. 32-bit means structs containing usize can give false positives for 64-bit.
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
// END LINEBENDER LINT SET
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use sable_primitives as primitives;

mod bitmap;
mod blur;
mod cache;
mod drawing;
mod outline;
mod raster;
mod stroke;
mod transform;

pub mod font;
pub mod render;
pub mod shape;
pub mod style;

pub use bitmap::{add_bitmaps, imul_bitmaps, mul_bitmaps, sub_bitmaps, Bitmap, EngineConfig};
pub use font::{FaceMetrics, FontDesc, FontEntry, FontLoader, GlyphOutline, Hinting};
pub use outline::{
    ContourBuilder, Outline, SegmentIter, SegmentKind, SegmentTag, SegmentView, OUTLINE_MAX,
};
pub use render::{
    Frame, FrameChange, Image, ImageKind, Renderer, RendererError, RendererOptions,
};
pub use shape::{FontServices, GlyphMetrics, ShapeRun, ShapedCluster, Shaper, SimpleShaper};
pub use style::{BorderStyle, Event, Justify, Style, Track, WrapStyle};
