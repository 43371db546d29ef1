// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The text shaping seam.
//!
//! The driver splits an event into runs of uniform style and hands each
//! run to a [`Shaper`], which fills per-cluster glyph indices, advances and
//! offsets, and later provides the bidi visual-order map for each line.
//!
//! [`SimpleShaper`] is the built-in implementation: character-map lookup
//! with per-glyph advances and `unicode-bidi` embedding levels and
//! reordering. It matches the reference renderer's "simple" shaping level;
//! full OpenType shaping plugs in through the same trait.

use crate::cache::{Cache, FloatKey, MetricsKey, RefKey};
pub use crate::cache::GlyphMetrics;
use crate::font::{find_glyph, FontEntry, FontLoader};
use sable_primitives::Vec2;
use std::rc::Rc;
use unicode_bidi::{BidiInfo, Level};

/// Per-cluster shaping result.
#[derive(Clone, Default, Debug)]
pub struct ShapedCluster {
    /// Face index within the font the glyph resolved to.
    pub face_index: u32,
    /// Glyph index, zero when no glyph was found.
    pub glyph_index: u32,
    /// 26.6 advance to the next cluster.
    pub advance: Vec2,
    /// 26.6 positional offset of the glyph within the cluster.
    pub offset: Vec2,
    /// Bidi embedding level.
    pub level: u8,
    /// True when the cluster produces no visible glyph.
    pub skip: bool,
}

/// One uniform-style run handed to the shaper.
#[derive(Clone, Debug)]
pub struct ShapeRun {
    pub font: Rc<FontEntry>,
    pub size: f64,
    /// Cluster range of this run within the event.
    pub start: usize,
    pub end: usize,
}

/// Font services available to shapers: the loader plus the glyph metrics
/// cache.
pub struct FontServices<'a> {
    pub(crate) loader: &'a mut dyn FontLoader,
    pub(crate) metrics: &'a mut Cache<MetricsKey, GlyphMetrics>,
}

impl FontServices<'_> {
    /// Cached advance/extents for one glyph.
    pub fn glyph_metrics(
        &mut self,
        font: &Rc<FontEntry>,
        size: f64,
        face_index: u32,
        glyph_index: u32,
    ) -> GlyphMetrics {
        let key = MetricsKey {
            font: RefKey(font.clone()),
            size: FloatKey::from(size),
            face_index,
            glyph_index,
        };
        let Self { loader, metrics } = self;
        let loader = &mut **loader;
        let handle = font.handle;
        *metrics.get(key, |_| {
            let advance = loader
                .glyph_advance(handle, face_index, glyph_index, size)
                .unwrap_or(0);
            let extents = loader.face_metrics(handle, face_index, size).unwrap_or_default();
            (
                GlyphMetrics {
                    advance,
                    asc: extents.asc,
                    desc: extents.desc,
                },
                core::mem::size_of::<GlyphMetrics>() + core::mem::size_of::<MetricsKey>(),
            )
        })
    }
}

impl core::fmt::Debug for FontServices<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("FontServices")
    }
}

/// Text shaping collaborator.
pub trait Shaper {
    /// Computes bidi embedding levels for the event text.
    fn bidi_levels(&mut self, text: &[char], base_rtl: bool) -> Vec<u8>;

    /// Shapes one run, filling `clusters[run.start..run.end]`.
    fn shape_run(
        &mut self,
        fonts: &mut FontServices<'_>,
        run: &ShapeRun,
        text: &[char],
        levels: &[u8],
        clusters: &mut [ShapedCluster],
    );

    /// Computes the visual order of one line: the returned vector maps
    /// visual position to logical index (relative to the slice).
    fn reorder_line(&mut self, levels: &[u8]) -> Vec<usize>;
}

impl core::fmt::Debug for dyn Shaper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("dyn Shaper")
    }
}

/// Character-map shaping with bidi reordering.
#[derive(Default, Debug)]
pub struct SimpleShaper {}

impl SimpleShaper {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Shaper for SimpleShaper {
    fn bidi_levels(&mut self, text: &[char], base_rtl: bool) -> Vec<u8> {
        let s: String = text.iter().collect();
        let base = if base_rtl {
            Some(Level::rtl())
        } else {
            Some(Level::ltr())
        };
        let info = BidiInfo::new(&s, base);
        // Map per-byte levels to per-char levels.
        let mut levels = Vec::with_capacity(text.len());
        let mut byte = 0;
        for ch in text {
            levels.push(info.levels.get(byte).map_or(0, |l| l.number()));
            byte += ch.len_utf8();
        }
        levels
    }

    fn shape_run(
        &mut self,
        fonts: &mut FontServices<'_>,
        run: &ShapeRun,
        text: &[char],
        levels: &[u8],
        clusters: &mut [ShapedCluster],
    ) {
        for i in run.start..run.end {
            let cluster = &mut clusters[i];
            cluster.level = levels.get(i).copied().unwrap_or(0);
            cluster.offset = Vec2::default();
            let codepoint = text[i] as u32;
            if text[i] == '\n' {
                cluster.glyph_index = 0;
                cluster.advance = Vec2::default();
                continue;
            }
            match find_glyph(fonts.loader, &run.font, codepoint) {
                Some((face, glyph)) => {
                    cluster.face_index = face;
                    cluster.glyph_index = glyph;
                    let metrics = fonts.glyph_metrics(&run.font, run.size, face, glyph);
                    cluster.advance = Vec2::new(metrics.advance, 0);
                }
                None => {
                    cluster.glyph_index = 0;
                    cluster.advance = Vec2::default();
                    cluster.skip = true;
                }
            }
        }
    }

    fn reorder_line(&mut self, levels: &[u8]) -> Vec<usize> {
        let bidi_levels: Vec<Level> = levels
            .iter()
            .map(|&l| Level::new(l).unwrap_or(Level::ltr()))
            .collect();
        BidiInfo::reorder_visual(&bidi_levels)
    }
}

/// Base paragraph direction derived from a legacy font encoding id.
pub(crate) fn resolve_base_direction(encoding: i32) -> bool {
    // 177 (Hebrew) and 178 (Arabic) imply a right-to-left paragraph.
    matches!(encoding, 177 | 178)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ltr_levels_are_even() {
        let mut shaper = SimpleShaper::new();
        let text: Vec<char> = "abc".chars().collect();
        let levels = shaper.bidi_levels(&text, false);
        assert!(levels.iter().all(|&l| l % 2 == 0));
    }

    #[test]
    fn rtl_text_gets_odd_levels() {
        let mut shaper = SimpleShaper::new();
        let text: Vec<char> = "שלום".chars().collect();
        let levels = shaper.bidi_levels(&text, false);
        assert!(levels.iter().all(|&l| l % 2 == 1), "{levels:?}");
    }

    #[test]
    fn reorder_reverses_rtl_runs() {
        let mut shaper = SimpleShaper::new();
        let map = shaper.reorder_line(&[1, 1, 1]);
        assert_eq!(map, vec![2, 1, 0]);
        let map = shaper.reorder_line(&[0, 0]);
        assert_eq!(map, vec![0, 1]);
    }

    #[test]
    fn base_direction_from_encoding() {
        assert!(resolve_base_direction(177));
        assert!(resolve_base_direction(178));
        assert!(!resolve_base_direction(1));
    }
}
