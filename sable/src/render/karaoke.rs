// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Karaoke timing.
//!
//! Tag parsing stores each word's timing on its first glyph; this pass
//! spreads the effect over the whole word and converts timings into the
//! x coordinate of the boundary between the already-filled part (primary
//! color) and the rest (secondary color).

use super::layout::TextInfo;
use super::state::Effect;

pub(crate) fn process_karaoke_effects(text_info: &mut TextInfo, time_in_event: i64) {
    let glyphs = &mut text_info.glyphs;
    let mut timing: i64 = 0;
    let mut skip_timing: i64 = 0;
    let mut effect_type = Effect::None;
    let mut last_boundary: Option<usize> = None;

    for i in 0..=glyphs.len() {
        if i < glyphs.len() && !glyphs[i].starts_new_run {
            // A karaoke tag without a run break keeps the current word's
            // start and end times; only the next word's start advances.
            skip_timing += glyphs[i].effect_skip_timing as i64;
            continue;
        }

        let start = last_boundary;
        let end = i;
        last_boundary = Some(i);
        let start = match start {
            Some(s) => s,
            None => continue,
        };

        if glyphs[start].effect_type != Effect::None {
            effect_type = glyphs[start].effect_type;
        }
        if effect_type == Effect::None {
            continue;
        }

        let tm_start = timing + glyphs[start].effect_skip_timing as i64;
        let mut tm_end = tm_start + glyphs[start].effect_timing as i64;
        timing = tm_end + skip_timing;
        skip_timing = 0;

        if effect_type != Effect::KaraokeKf {
            tm_end = tm_start;
        }

        let x: i32 = if time_in_event < tm_start {
            -100_000_000
        } else if time_in_event >= tm_end {
            100_000_000
        } else {
            let mut first_visible = start;
            let mut last_visible = end - 1;
            while first_visible < last_visible && glyphs[first_visible].skip {
                first_visible += 1;
            }
            while first_visible < last_visible && glyphs[last_visible].skip {
                last_visible -= 1;
            }

            let x_start = glyphs[first_visible].pos.x;
            let x_end = glyphs[last_visible].pos.x + glyphs[last_visible].advance.x;
            let mut dt = (time_in_event - tm_start) as f64 / (tm_end - tm_start) as f64;
            let frz = glyphs[start].frz.rem_euclid(360.0);
            if frz > 90.0 && frz < 270.0 {
                // Fill from right to left.
                dt = 1.0 - dt;
                for info in glyphs[start..end].iter_mut() {
                    info.c.swap(0, 1);
                }
            }
            x_start + ((x_end - x_start) as f64 * dt).round() as i32
        };

        for info in glyphs[start..end].iter_mut() {
            info.effect_type = effect_type;
            info.effect_timing = x - info.pos.x;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::layout::GlyphInfo;
    use sable_primitives::Vec2;

    fn karaoke_glyphs() -> TextInfo {
        let mut ti = TextInfo::default();
        for i in 0..4 {
            let mut g = GlyphInfo {
                symbol: 'a',
                pos: Vec2::new(i * 640, 0),
                advance: Vec2::new(640, 0),
                cluster_advance: Vec2::new(640, 0),
                ..GlyphInfo::default()
            };
            // Two words of two glyphs: {\k50}aa{\k50}aa
            if i == 0 || i == 2 {
                g.starts_new_run = true;
                g.effect_type = Effect::Karaoke;
                g.effect_timing = 500;
            }
            ti.glyphs.push(g);
        }
        ti
    }

    #[test]
    fn filled_word_gets_positive_boundary() {
        let mut ti = karaoke_glyphs();
        // 600ms in: first word done, second not yet started.
        process_karaoke_effects(&mut ti, 600);
        assert!(ti.glyphs[0].effect_timing > 0);
        assert!(ti.glyphs[1].effect_timing > 0);
        assert!(ti.glyphs[2].effect_timing < 0);
        assert!(ti.glyphs[3].effect_timing < 0);
        assert!(ti.glyphs.iter().all(|g| g.effect_type == Effect::Karaoke));
    }

    #[test]
    fn kf_interpolates_mid_word() {
        let mut ti = karaoke_glyphs();
        for i in [0usize, 2] {
            ti.glyphs[i].effect_type = Effect::KaraokeKf;
        }
        // 250ms: halfway through the first word's sweep.
        process_karaoke_effects(&mut ti, 250);
        // Boundary sits at half of the word width (2 glyphs x 10px).
        let b0 = ti.glyphs[0].effect_timing;
        assert!((b0 - 640).abs() <= 64, "boundary {b0}");
        // Second word has not started.
        assert!(ti.glyphs[2].effect_timing < 0);
    }
}
