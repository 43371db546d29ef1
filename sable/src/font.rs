// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The font collaborator seam.
//!
//! Font discovery and outline extraction are external concerns: the core
//! only needs "given a font handle, face index, glyph index, size, and
//! hinting mode, produce an outline". [`FontLoader`] is that contract; the
//! built-in [`SkrifaFontLoader`] (behind the `font-loader` feature) serves
//! it from fonts registered in memory.

use crate::outline::Outline;
use std::rc::Rc;

/// Font hinting mode requested from the loader.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub enum Hinting {
    #[default]
    None,
    Light,
    Normal,
    Native,
}

/// A font request: family plus the attributes that select a face.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FontDesc {
    pub family: Rc<str>,
    /// 400 = normal, 700 = bold; exact weights pass through.
    pub weight: u32,
    /// 0 = upright, 100 = italic.
    pub italic: u32,
    /// Vertical layout (`@`-prefixed family).
    pub vertical: bool,
}

/// Vertical extents of a sized face, in 26.6 units, both positive.
#[derive(Copy, Clone, Default, Debug)]
pub struct FaceMetrics {
    pub asc: i32,
    pub desc: i32,
}

/// A loaded glyph outline in 26.6 fixed point (y-down), with its advance.
#[derive(Clone, Default, Debug)]
pub struct GlyphOutline {
    pub outline: Outline,
    pub advance: i32,
}

/// An opened font as stored in the font cache: an opaque loader handle
/// plus the face count available for charmap fallback.
#[derive(Clone, Debug)]
pub struct FontEntry {
    pub desc: FontDesc,
    pub handle: u64,
    pub n_faces: u32,
}

/// External font provider.
///
/// All failures are soft: a `None` return makes the renderer fall through
/// remaining faces or skip the glyph, matching degraded-playback behavior.
pub trait FontLoader {
    /// Resolves a description to an opened font handle and its face count.
    fn open(&mut self, desc: &FontDesc) -> Option<(u64, u32)>;

    /// Maps a codepoint through one face's character map.
    fn glyph_index(&mut self, handle: u64, face: u32, codepoint: u32) -> Option<u32>;

    /// Loads one glyph outline at the given size in pixels.
    fn load_outline(
        &mut self,
        handle: u64,
        face: u32,
        glyph: u32,
        size: f64,
        hinting: Hinting,
    ) -> Option<GlyphOutline>;

    /// Advance of one glyph at the given size, in 26.6 units.
    fn glyph_advance(&mut self, handle: u64, face: u32, glyph: u32, size: f64) -> Option<i32>;

    /// Ascender/descender of one face at the given size.
    fn face_metrics(&mut self, handle: u64, face: u32, size: f64) -> Option<FaceMetrics>;
}

impl core::fmt::Debug for dyn FontLoader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("dyn FontLoader")
    }
}

/// Looks up a codepoint across all faces of a font, in order. Returns the
/// face and glyph index, or `None` after exhausting the fallback chain.
pub(crate) fn find_glyph(
    loader: &mut dyn FontLoader,
    font: &FontEntry,
    codepoint: u32,
) -> Option<(u32, u32)> {
    for face in 0..font.n_faces {
        if let Some(index) = loader.glyph_index(font.handle, face, codepoint) {
            if index != 0 {
                return Some((face, index));
            }
        }
    }
    log::warn!(
        "glyph U+{codepoint:04X} not found in font '{}'",
        font.desc.family
    );
    None
}

#[cfg(feature = "font-loader")]
pub use self::skrifa_loader::SkrifaFontLoader;

#[cfg(feature = "font-loader")]
mod skrifa_loader {
    use super::{FaceMetrics, FontDesc, FontLoader, GlyphOutline, Hinting};
    use crate::outline::ContourBuilder;
    use sable_primitives::{f64_to_d6, Vec2};
    use skrifa::instance::{LocationRef, Size};
    use skrifa::outline::{DrawSettings, OutlinePen};
    use skrifa::{FontRef, GlyphId, MetadataProvider};

    struct LoadedFont {
        family: Box<str>,
        data: Vec<u8>,
    }

    /// A [`FontLoader`] backed by skrifa over in-memory font data.
    ///
    /// Faces are registered explicitly; requests resolve by
    /// case-insensitive family name with the first registered face as the
    /// final fallback. Hinting modes are accepted but outlines are always
    /// unhinted.
    #[derive(Default)]
    pub struct SkrifaFontLoader {
        fonts: Vec<LoadedFont>,
    }

    impl SkrifaFontLoader {
        pub fn new() -> Self {
            Self::default()
        }

        /// Registers a font binary under a family name.
        pub fn add_font(&mut self, family: &str, data: Vec<u8>) {
            self.fonts.push(LoadedFont {
                family: family.into(),
                data,
            });
        }

        fn font_ref(&self, handle: u64) -> Option<FontRef<'_>> {
            let font = self.fonts.get(handle as usize)?;
            FontRef::new(&font.data).ok()
        }
    }

    impl core::fmt::Debug for SkrifaFontLoader {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            f.debug_struct("SkrifaFontLoader")
                .field("fonts", &self.fonts.len())
                .finish()
        }
    }

    // Bridges skrifa's pen callbacks into the outline builder, converting
    // px floats to 26.6 with the y flip into bitmap space.
    struct Pen {
        builder: ContourBuilder,
    }

    impl Pen {
        fn pt(x: f32, y: f32) -> Vec2 {
            Vec2::new(f64_to_d6(x as f64), f64_to_d6(-y as f64))
        }
    }

    impl OutlinePen for Pen {
        fn move_to(&mut self, x: f32, y: f32) {
            self.builder.move_to(Self::pt(x, y));
        }

        fn line_to(&mut self, x: f32, y: f32) {
            self.builder.line_to(Self::pt(x, y));
        }

        fn quad_to(&mut self, cx0: f32, cy0: f32, x: f32, y: f32) {
            self.builder.quad_to(Self::pt(cx0, cy0), Self::pt(x, y));
        }

        fn curve_to(&mut self, cx0: f32, cy0: f32, cx1: f32, cy1: f32, x: f32, y: f32) {
            self.builder
                .cubic_to(Self::pt(cx0, cy0), Self::pt(cx1, cy1), Self::pt(x, y));
        }

        fn close(&mut self) {
            self.builder.close();
        }
    }

    impl FontLoader for SkrifaFontLoader {
        fn open(&mut self, desc: &FontDesc) -> Option<(u64, u32)> {
            let wanted = desc.family.to_ascii_lowercase();
            let found = self
                .fonts
                .iter()
                .position(|f| f.family.to_ascii_lowercase() == wanted);
            let index = match found {
                Some(i) => i,
                None if !self.fonts.is_empty() => {
                    log::debug!("font family '{}' not found, using fallback", desc.family);
                    0
                }
                None => return None,
            };
            Some((index as u64, 1))
        }

        fn glyph_index(&mut self, handle: u64, _face: u32, codepoint: u32) -> Option<u32> {
            let font = self.font_ref(handle)?;
            font.charmap().map(codepoint).map(|id| id.to_u32())
        }

        fn load_outline(
            &mut self,
            handle: u64,
            _face: u32,
            glyph: u32,
            size: f64,
            _hinting: Hinting,
        ) -> Option<GlyphOutline> {
            let font = self.font_ref(handle)?;
            let outlines = font.outline_glyphs();
            let glyph_id = GlyphId::new(glyph);
            let outline_glyph = outlines.get(glyph_id)?;
            let mut pen = Pen {
                builder: ContourBuilder::new(),
            };
            let settings = DrawSettings::unhinted(Size::new(size as f32), LocationRef::default());
            outline_glyph.draw(settings, &mut pen).ok()?;
            let advance = font
                .glyph_metrics(Size::new(size as f32), LocationRef::default())
                .advance_width(glyph_id)
                .unwrap_or(0.0);
            Some(GlyphOutline {
                outline: pen.builder.finish().unwrap_or_default(),
                advance: f64_to_d6(advance as f64),
            })
        }

        fn glyph_advance(&mut self, handle: u64, _face: u32, glyph: u32, size: f64) -> Option<i32> {
            let font = self.font_ref(handle)?;
            let advance = font
                .glyph_metrics(Size::new(size as f32), LocationRef::default())
                .advance_width(GlyphId::new(glyph))?;
            Some(f64_to_d6(advance as f64))
        }

        fn face_metrics(&mut self, handle: u64, _face: u32, size: f64) -> Option<FaceMetrics> {
            let font = self.font_ref(handle)?;
            let metrics = font.metrics(Size::new(size as f32), LocationRef::default());
            Some(FaceMetrics {
                asc: f64_to_d6(metrics.ascent as f64),
                desc: f64_to_d6(-(metrics.descent as f64)).abs(),
            })
        }
    }
}
