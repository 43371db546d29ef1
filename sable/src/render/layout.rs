// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Event layout: glyph-info construction, style-run splitting, shaping,
//! outline retrieval, line wrapping, whitespace trimming, measuring,
//! bidi reordering, baseline shear and alignment.

use super::state::{evt_type, Effect, RenderState};
use super::tags::{next_char, parse_tags};
use super::Services;
use crate::cache::{
    deco, DrawingKey, FloatKey, GlyphKey, OutlineEntry, OutlineKey, RefKey,
};
use crate::font::FontEntry;
use crate::render::RendererOptions;
use crate::shape::{resolve_base_direction, FontServices, ShapeRun, Shaper};
use crate::style::{align, Justify, Rgba, Track, WrapStyle};
use crate::Event;
use sable_primitives::{d6_to_f64, f64_to_d6, DRect, DVec2, Rect, Vec2};
use std::rc::Rc;

/// Object replacement character standing in for a drawing.
pub(crate) const DRAWING_CHAR: char = '\u{FFFC}';

/// Per-glyph layout and styling snapshot.
#[derive(Clone, Default, Debug)]
pub(crate) struct GlyphInfo {
    pub symbol: char,
    /// Skip when laying out text.
    pub skip: bool,
    pub is_trimmed_whitespace: bool,
    pub font: Option<Rc<FontEntry>>,
    pub face_index: u32,
    pub glyph_index: u32,
    pub font_size: f64,
    pub drawing_text: Option<Rc<str>>,
    pub drawing_scale: i32,
    pub drawing_pbo: f64,
    pub outline: Option<Rc<OutlineEntry>>,
    /// Outline-space to glyph-space transform.
    pub tr_scale: DVec2,
    pub tr_offset: DVec2,
    pub bbox: Rect,
    pub pos: Vec2,
    pub offset: Vec2,
    /// 0 = none, 1 = soft break, 2 = forced break; set on line leaders.
    pub linebreak: u8,
    pub starts_new_run: bool,
    pub c: [Rgba; 4],
    pub a_pre_fade: [u8; 4],
    /// 26.6 shaped advance.
    pub advance: Vec2,
    pub cluster_advance: Vec2,
    pub effect_type: Effect,
    pub effect_timing: i32,
    pub effect_skip_timing: i32,
    pub asc: i32,
    pub desc: i32,
    pub be: i32,
    pub blur: f64,
    pub shadow_x: f64,
    pub shadow_y: f64,
    pub frx: f64,
    pub fry: f64,
    pub frz: f64,
    pub fax: f64,
    pub fay: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    /// `before / after` of the nominal-size normalization.
    pub scale_fix: f64,
    pub border_style: crate::style::BorderStyle,
    pub border_x: f64,
    pub border_y: f64,
    pub hspacing: f64,
    pub hspacing_scaled: i32,
    pub italic: u32,
    pub bold: u32,
    pub flags: u32,
    pub fade: i32,
    pub shape_run_id: u32,
    pub level: u8,
    /// Shift relative to the rotation origin.
    pub shift: Vec2,
    pub bm: Option<Rc<crate::Bitmap>>,
    pub bm_o: Option<Rc<crate::Bitmap>>,
}

#[derive(Copy, Clone, Default, Debug)]
pub(crate) struct LineInfo {
    pub asc: f64,
    pub desc: f64,
    pub offset: usize,
    pub len: usize,
}

/// Per-event scratch, reused across events like the rest of the renderer
/// state.
#[derive(Default, Debug)]
pub(crate) struct TextInfo {
    pub glyphs: Vec<GlyphInfo>,
    pub lines: Vec<LineInfo>,
    pub height: f64,
    pub border_top: i32,
    pub border_bottom: i32,
    pub border_x: i32,
    pub cmap: Vec<usize>,
}

impl TextInfo {
    pub(crate) fn clear(&mut self) {
        self.glyphs.clear();
        self.lines.clear();
        self.height = 0.0;
        self.border_top = 0;
        self.border_bottom = 0;
        self.border_x = 0;
        self.cmap.clear();
    }
}

/// Parses the event text, executing override tags and filling the glyph
/// array. Returns `false` when the event produces nothing renderable.
pub(crate) fn parse_events(
    state: &mut RenderState,
    services: &mut Services<'_>,
    text_info: &mut TextInfo,
    track: &Track,
    event: &Event,
    time: i64,
    options: &RendererOptions,
) -> bool {
    let text = event.text.as_str();
    let mut p = 0;

    loop {
        let mut drawing_text: Option<Rc<str>> = None;
        let mut code = '\0';

        while p < text.len() {
            let rest = &text[p..];
            if rest.starts_with('{') {
                if let Some(close) = rest.find('}') {
                    parse_tags(
                        state,
                        services,
                        track,
                        event,
                        time,
                        &rest[1..close],
                        1.0,
                        false,
                    );
                    p += close + 1;
                    continue;
                }
            }
            if state.drawing_scale > 0 {
                let search_from = if rest.starts_with('{') { p + 1 } else { p };
                let q = text[search_from..]
                    .find('{')
                    .map_or(text.len(), |o| search_from + o);
                drawing_text = Some(Rc::from(&text[p..q]));
                code = DRAWING_CHAR;
                p = q;
                break;
            }
            let (ch, len) = next_char(state, rest);
            p += len;
            code = ch;
            break;
        }

        if code == '\0' {
            break;
        }
        if state.font.is_none() && drawing_text.is_none() {
            log::warn!("no font available, event skipped");
            text_info.glyphs.clear();
            return false;
        }

        let mut info = GlyphInfo {
            symbol: code,
            font: state.font.clone(),
            scale_fix: 1.0,
            ..GlyphInfo::default()
        };

        if let Some(dt) = drawing_text {
            info.drawing_text = Some(dt);
            info.drawing_scale = state.drawing_scale;
            info.drawing_pbo = state.pbo;
        }

        for i in 0..4 {
            let mut clr = state.c[i];
            info.a_pre_fade[i] = clr.a();
            // Fade applies only when positive.
            if state.fade > 0 {
                let a = Rgba::mult_alpha(clr.a() as u32, state.fade as u32);
                super::tags::change_alpha(&mut clr, a as i32, 1.0);
            }
            info.c[i] = clr;
        }

        info.effect_type = state.effect_type;
        info.effect_timing = state.effect_timing;
        info.effect_skip_timing = state.effect_skip_timing;
        info.font_size = state.font_size * state.font_scale;
        info.be = state.be;
        info.blur = state.blur;
        info.shadow_x = state.shadow_x;
        info.shadow_y = state.shadow_y;
        info.scale_x = state.scale_x;
        info.scale_y = state.scale_y;
        info.border_style = state.border_style;
        info.border_x = state.border_x;
        info.border_y = state.border_y;
        info.hspacing = state.hspacing;
        info.bold = state.bold;
        info.italic = state.italic;
        info.flags = state.flags;
        if state.font_vertical && code as u32 >= 0x2E80 {
            info.flags |= deco::ROTATE;
        }
        info.frx = state.frx;
        info.fry = state.fry;
        info.frz = state.frz;
        info.fax = state.fax;
        info.fay = state.fay;
        info.fade = state.fade;

        if info.drawing_text.is_none() {
            info.hspacing_scaled =
                f64_to_d6(info.hspacing * state.font_scale * info.scale_x);
            fix_glyph_scaling(options, &mut info);
        }

        text_info.glyphs.push(info);

        state.effect_type = Effect::None;
        state.effect_timing = 0;
        state.effect_skip_timing = 0;
    }

    !text_info.glyphs.is_empty()
}

/// Grid-fitting guard: normalize the nominal font size so animated sizes
/// stay smooth and extreme size/scale combinations stay well-conditioned.
fn fix_glyph_scaling(options: &RendererOptions, glyph: &mut GlyphInfo) {
    let ft_size = if options.hinting == crate::font::Hinting::None {
        256.0
    } else {
        glyph.scale_y * glyph.font_size
    };
    if ft_size <= 0.0 {
        return;
    }
    let mul = glyph.font_size / ft_size;
    glyph.scale_fix = 1.0 / mul;
    glyph.scale_x *= mul;
    glyph.scale_y *= mul;
    glyph.font_size = ft_size;
}

/// Marks the starts of runs whose rendering state differs.
pub(crate) fn split_style_runs(text_info: &mut TextInfo) {
    let glyphs = &mut text_info.glyphs;
    if glyphs.is_empty() {
        return;
    }
    glyphs[0].starts_new_run = true;
    let mut last_effect_type = glyphs[0].effect_type;
    for i in 1..glyphs.len() {
        let (a, b) = glyphs.split_at_mut(i);
        let last = &a[i - 1];
        let info = &mut b[0];
        let effect_type = info.effect_type;
        let fonts_differ = match (&last.font, &info.font) {
            (Some(f1), Some(f2)) => {
                f1.desc.family != f2.desc.family || f1.desc.vertical != f2.desc.vertical
            }
            (None, None) => false,
            _ => true,
        };
        info.starts_new_run = info.effect_timing != 0 // but ignore effect_skip_timing
            || (effect_type != Effect::None && effect_type != last_effect_type)
            || info.drawing_text.is_some()
            || last.drawing_text.is_some()
            || fonts_differ
            || last.font_size != info.font_size
            || last.c != info.c
            || last.be != info.be
            || last.blur != info.blur
            || last.shadow_x != info.shadow_x
            || last.shadow_y != info.shadow_y
            || last.frx != info.frx
            || last.fry != info.fry
            || last.frz != info.frz
            || last.fax != info.fax
            || last.fay != info.fay
            || last.scale_x != info.scale_x
            || last.scale_y != info.scale_y
            || last.border_style != info.border_style
            || last.border_x != info.border_x
            || last.border_y != info.border_y
            || last.hspacing != info.hspacing
            || last.italic != info.italic
            || last.bold != info.bold
            || ((last.flags ^ info.flags) & !deco::ROTATE) != 0;
        if effect_type != Effect::None {
            last_effect_type = effect_type;
        }
    }
}

/// Splits shape runs and drives the shaper over them.
pub(crate) fn shape_text(
    text_info: &mut TextInfo,
    shaper: &mut dyn Shaper,
    fonts: &mut FontServices<'_>,
    encoding: i32,
    max_runs: usize,
) -> bool {
    let glyphs = &mut text_info.glyphs;
    let text: Vec<char> = glyphs.iter().map(|g| g.symbol).collect();
    let levels = shaper.bidi_levels(&text, resolve_base_direction(encoding));

    // Assign run ids: a run breaks on font, size or bidi level changes.
    let mut run_id = 0u32;
    for i in 0..glyphs.len() {
        if i > 0 {
            let differ = {
                let (a, b) = (&glyphs[i - 1], &glyphs[i]);
                let font_differ = match (&a.font, &b.font) {
                    (Some(f1), Some(f2)) => !Rc::ptr_eq(f1, f2),
                    (None, None) => false,
                    _ => true,
                };
                font_differ
                    || a.font_size != b.font_size
                    || a.drawing_text.is_some() != b.drawing_text.is_some()
                    || levels[i - 1] != levels[i]
            };
            if differ {
                if (run_id as usize) < max_runs - 1 {
                    run_id += 1;
                } else {
                    log::debug!("shape run limit {max_runs} reached, merging runs");
                }
            }
        }
        glyphs[i].shape_run_id = run_id;
        glyphs[i].level = levels[i];
    }

    // Shape each run of text glyphs; drawings keep their placeholder.
    let mut clusters = vec![crate::shape::ShapedCluster::default(); glyphs.len()];
    let mut i = 0;
    while i < glyphs.len() {
        let start = i;
        let id = glyphs[i].shape_run_id;
        while i < glyphs.len() && glyphs[i].shape_run_id == id {
            i += 1;
        }
        if glyphs[start].drawing_text.is_some() {
            continue;
        }
        let font = match &glyphs[start].font {
            Some(f) => f.clone(),
            None => return false,
        };
        let run = ShapeRun {
            font,
            size: glyphs[start].font_size,
            start,
            end: i,
        };
        shaper.shape_run(fonts, &run, &text, &levels, &mut clusters);
    }

    for (info, cluster) in glyphs.iter_mut().zip(&clusters) {
        if info.drawing_text.is_some() {
            continue;
        }
        info.face_index = cluster.face_index;
        info.glyph_index = cluster.glyph_index;
        info.advance = cluster.advance;
        info.cluster_advance = cluster.advance;
        info.offset = cluster.offset;
        if cluster.skip && info.symbol != '\n' {
            info.skip = true;
        }
    }
    true
}

/// Looks up (or constructs) every glyph's outline pair and applies the
/// post-shaping spacing fixups.
pub(crate) fn retrieve_glyphs(
    text_info: &mut TextInfo,
    services: &mut Services<'_>,
    state: &RenderState,
) {
    for i in 0..text_info.glyphs.len() {
        get_outline_glyph(&mut text_info.glyphs[i], services, state);

        // Additional space after italic-to-upright style changes.
        let glyphs = &mut text_info.glyphs;
        if i > 0 && glyphs[i - 1].italic > 0 && glyphs[i].italic == 0 {
            let mut back = i - 1;
            while back > 0
                && glyphs[back].bbox.x_max - glyphs[back].bbox.x_min == 0
                && glyphs[back].italic > 0
            {
                back -= 1;
            }
            let og = &mut glyphs[back];
            if og.bbox.x_max > og.cluster_advance.x {
                og.cluster_advance.x = og.bbox.x_max;
            }
        }
        let info = &mut text_info.glyphs[i];
        info.cluster_advance.x += info.hspacing_scaled;
    }
}

fn get_outline_glyph(info: &mut GlyphInfo, services: &mut Services<'_>, state: &RenderState) {
    let Services { caches, loader, options } = services;
    let loader = &mut **loader;
    let hinting = options.hinting;

    let (entry, scale, offset, asc, desc) = if let Some(text) = &info.drawing_text {
        let key = OutlineKey::Drawing(DrawingKey { text: text.clone() });
        let entry = caches
            .outline
            .get(key, |k| super::construct_outline(k, loader, hinting));
        if !entry.valid {
            return;
        }
        let w = state.font_scale / (1i64 << (info.drawing_scale - 1).clamp(0, 62)) as f64;
        let scale = DVec2::new(info.scale_x * w, info.scale_y * w);
        let desc = (64.0 * info.drawing_pbo) as i32;
        let asc = entry.asc - desc;
        let offset = DVec2::new(0.0, -(asc as f64) * scale.y);
        (entry, scale, offset, asc, desc)
    } else {
        let font = match &info.font {
            Some(f) => f.clone(),
            None => return,
        };
        let key = OutlineKey::Glyph(GlyphKey {
            font: RefKey(font),
            size: FloatKey::from(info.font_size),
            face_index: info.face_index,
            glyph_index: info.glyph_index,
            bold: info.bold,
            italic: info.italic,
            flags: info.flags,
        });
        let entry = caches
            .outline
            .get(key, |k| super::construct_outline(k, loader, hinting));
        if !entry.valid {
            return;
        }
        let scale = DVec2::new(info.scale_x, info.scale_y);
        let asc = entry.asc;
        let desc = entry.desc;
        (entry, scale, DVec2::default(), asc, desc)
    };

    info.bbox.x_min = (entry.cbox.x_min as f64 * scale.x + offset.x).round() as i32;
    info.bbox.y_min = (entry.cbox.y_min as f64 * scale.y + offset.y).round() as i32;
    info.bbox.x_max = (entry.cbox.x_max as f64 * scale.x + offset.x).round() as i32;
    info.bbox.y_max = (entry.cbox.y_max as f64 * scale.y + offset.y).round() as i32;

    if info.drawing_text.is_some() {
        info.advance.x = (entry.advance as f64 * scale.x).round() as i32;
        info.advance.y = 0;
        info.cluster_advance = info.advance;
    }
    info.asc = (asc as f64 * scale.y).round() as i32;
    info.desc = (desc as f64 * scale.y).round() as i32;
    info.tr_scale = scale;
    info.tr_offset = offset;
    info.outline = Some(entry);
}

/// Pen advance per cluster, before wrapping.
pub(crate) fn preliminary_layout(text_info: &mut TextInfo) {
    let mut pen = Vec2::default();
    for info in &mut text_info.glyphs {
        info.pos = pen + info.offset;
        pen = pen + info.cluster_advance;
    }
}

/// Smart line wrapping with the post-pass that moves words across soft
/// breaks while it evens out line lengths.
pub(crate) fn wrap_lines_smart(
    text_info: &mut TextInfo,
    state: &RenderState,
    line_spacing: f64,
    border_scale: f64,
    max_text_width: f64,
) {
    let glyphs = &mut text_info.glyphs;
    let mut last_space: Option<usize> = None;
    let mut n_lines = 1usize;
    let mut line_start = 0usize;

    for i in 0..glyphs.len() {
        let mut break_at = None;
        let mut break_type = 0u8;
        let s_offset = d6_to_f64(glyphs[line_start].bbox.x_min + glyphs[line_start].pos.x);
        let len = d6_to_f64(glyphs[i].bbox.x_max + glyphs[i].pos.x) - s_offset;

        if glyphs[i].symbol == '\n' {
            break_type = 2;
            break_at = Some(i);
        } else if glyphs[i].symbol == ' ' {
            last_space = Some(i);
        } else if len >= max_text_width && state.wrap_style != WrapStyle::None {
            break_type = 1;
            break_at = last_space;
        }

        if let Some(at) = break_at {
            let lead = at + 1;
            if lead < glyphs.len() {
                glyphs[lead].linebreak = break_type;
                last_space = None;
                line_start = lead;
                n_lines += 1;
            }
        }
    }

    // Rebalance: move trailing words up while it reduces the length
    // difference between adjacent lines.
    if state.wrap_style != WrapStyle::EndOfLine {
        let diff = |a: f64, b: f64| (a - b).abs();
        loop {
            let mut done = true;
            let mut s1: Option<usize> = None;
            let mut s2: Option<usize> = None;
            let mut s3 = 0usize;
            for i in 0..=glyphs.len() {
                if i != glyphs.len() && glyphs[i].linebreak == 0 {
                    continue;
                }
                s1 = s2;
                s2 = Some(s3);
                s3 = i;
                if let (Some(p1), Some(p2)) = (s1, s2) {
                    if p2 > 0 && glyphs[p2].linebreak == 1 {
                        // Find the start of the last word of line 1.
                        let mut w = p2 - 1;
                        while w > p1 && glyphs[w].symbol == ' ' {
                            w -= 1;
                        }
                        while w > p1 && glyphs[w].symbol != ' ' {
                            w -= 1;
                        }
                        let mut e1 = w;
                        while e1 > p1 && glyphs[e1].symbol == ' ' {
                            e1 -= 1;
                        }
                        if glyphs[w].symbol == ' ' {
                            w += 1;
                        }

                        let edge =
                            |idx: usize| d6_to_f64(glyphs[idx].bbox.x_max + glyphs[idx].pos.x);
                        let start =
                            |idx: usize| d6_to_f64(glyphs[idx].bbox.x_min + glyphs[idx].pos.x);
                        let l1 = edge(p2 - 1) - start(p1);
                        let l2 = edge(s3 - 1) - start(p2);
                        let l1_new = edge(e1) - start(p1);
                        let l2_new = edge(s3 - 1) - start(w);

                        if diff(l1_new, l2_new) < diff(l1, l2) {
                            if glyphs[w].linebreak != 0 || w == 0 {
                                n_lines -= 1;
                            }
                            if w != 0 {
                                glyphs[w].linebreak = 1;
                            }
                            glyphs[p2].linebreak = 0;
                            done = false;
                        }
                    }
                }
                if i == glyphs.len() {
                    break;
                }
            }
            if done {
                break;
            }
        }
    }

    trim_whitespace(text_info);
    measure_text(text_info, line_spacing, border_scale, n_lines);

    // Shift lines into place: carriage return plus line feed.
    let glyphs = &mut text_info.glyphs;
    let lines = &mut text_info.lines;
    let mut cur_line = 1usize;
    let mut i = 0;
    while i < glyphs.len() && glyphs[i].skip {
        i += 1;
    }
    let mut pen_shift_x = if i < glyphs.len() {
        d6_to_f64(-glyphs[i].pos.x)
    } else {
        0.0
    };
    let mut pen_shift_y = 0.0;

    for i in 0..glyphs.len() {
        if glyphs[i].linebreak != 0 {
            let mut j = i;
            while j < glyphs.len() && glyphs[j].skip && glyphs[j].symbol != '\n' {
                j += 1;
            }
            let j = j.min(glyphs.len() - 1);
            let height = lines[cur_line - 1].desc + lines[cur_line].asc;
            lines[cur_line - 1].len = i - lines[cur_line - 1].offset;
            lines[cur_line].offset = i;
            cur_line += 1;
            pen_shift_x = d6_to_f64(-glyphs[j].pos.x);
            pen_shift_y += height + line_spacing;
        }
        glyphs[i].pos.x += f64_to_d6(pen_shift_x);
        glyphs[i].pos.y += f64_to_d6(pen_shift_y);
    }
    lines[cur_line - 1].len = glyphs.len() - lines[cur_line - 1].offset;
}

fn is_whitespace(g: &GlyphInfo) -> bool {
    (g.symbol == ' ' || g.symbol == '\n') && g.linebreak == 0
}

/// Marks leading/trailing whitespace of each line as skipped.
pub(crate) fn trim_whitespace(text_info: &mut TextInfo) {
    let glyphs = &mut text_info.glyphs;
    if glyphs.is_empty() {
        return;
    }

    // Trailing.
    let mut i = glyphs.len() - 1;
    while i > 0 && is_whitespace(&glyphs[i]) {
        glyphs[i].skip = true;
        glyphs[i].is_trimmed_whitespace = true;
        i -= 1;
    }

    // Leading.
    let mut i = 0;
    while i < glyphs.len() && is_whitespace(&glyphs[i]) {
        glyphs[i].skip = true;
        glyphs[i].is_trimmed_whitespace = true;
        i += 1;
    }
    if i < glyphs.len() {
        glyphs[i].starts_new_run = true;
    }

    // Inbetween, around line breaks.
    let mut i = 0;
    while i < glyphs.len() {
        if glyphs[i].linebreak != 0 {
            let mut j = i;
            while j > 0 {
                j -= 1;
                if !is_whitespace(&glyphs[j]) {
                    break;
                }
                glyphs[j].skip = true;
                glyphs[j].is_trimmed_whitespace = true;
            }
            let mut cur = i;
            if glyphs[i].symbol == ' ' || glyphs[i].symbol == '\n' {
                glyphs[i].skip = true;
                glyphs[i].is_trimmed_whitespace = true;
                let mut j = i + 1;
                while j < glyphs.len() && is_whitespace(&glyphs[j]) {
                    glyphs[j].skip = true;
                    glyphs[j].is_trimmed_whitespace = true;
                    j += 1;
                }
                cur = j;
                i = j - 1;
            }
            if cur < glyphs.len() {
                glyphs[cur].starts_new_run = true;
            }
        }
        i += 1;
    }
}

/// Computes per-line ascent/descent and the border extents used for
/// collision handling.
fn measure_text(
    text_info: &mut TextInfo,
    line_spacing: f64,
    border_scale: f64,
    n_lines: usize,
) {
    text_info.height = 0.0;
    text_info.border_x = 0;
    text_info.lines.clear();
    text_info.lines.resize(n_lines, LineInfo::default());

    let mut cur_line = 0;
    let mut scale = 0.5 / 64.0;
    let mut max_asc = 0i32;
    let mut max_desc = 0i32;
    let mut max_border_y = 0.0f64;
    let mut max_border_x = 0.0f64;
    let mut empty_trimmed_line = true;

    let mut finish_line = |text_info: &mut TextInfo,
                           cur_line: usize,
                           scale: f64,
                           max_asc: i32,
                           max_desc: i32,
                           max_border_x: f64,
                           max_border_y: f64| {
        text_info.lines[cur_line].asc = scale * max_asc as f64;
        text_info.lines[cur_line].desc = scale * max_desc as f64;
        text_info.height += scale * (max_asc + max_desc) as f64;
        // Biased rounding on the border extents, as the original renderers
        // agreed on.
        text_info.border_bottom = (border_scale * max_border_y + 0.5) as i32;
        if cur_line == 0 {
            text_info.border_top = text_info.border_bottom;
        }
        text_info.border_x = text_info
            .border_x
            .max((border_scale * max_border_x + 0.5) as i32);
    };

    for i in 0..text_info.glyphs.len() {
        if text_info.glyphs[i].linebreak != 0 {
            finish_line(
                text_info, cur_line, scale, max_asc, max_desc, max_border_x, max_border_y,
            );
            empty_trimmed_line = true;
            max_asc = 0;
            max_desc = 0;
            max_border_x = 0.0;
            max_border_y = 0.0;
            scale = 0.5 / 64.0;
            cur_line += 1;
        }
        let cur = &text_info.glyphs[i];
        // Metrics of line-edge (trimmed) whitespace are ignored, except
        // when the line is empty after trimming.
        if empty_trimmed_line && !cur.is_trimmed_whitespace {
            empty_trimmed_line = false;
            max_asc = 0;
            max_desc = 0;
            max_border_y = 0.0;
            max_border_x = 0.0;
        } else if !empty_trimmed_line && cur.is_trimmed_whitespace {
            continue;
        }
        max_asc = max_asc.max(cur.asc);
        max_desc = max_desc.max(cur.desc);
        max_border_y = max_border_y.max(cur.border_y);
        max_border_x = max_border_x.max(cur.border_x);
        if cur.symbol != '\n' {
            scale = 1.0 / 64.0;
        }
    }
    finish_line(
        text_info, cur_line, scale, max_asc, max_desc, max_border_x, max_border_y,
    );
    debug_assert_eq!(cur_line, n_lines - 1);
    text_info.height += cur_line as f64 * line_spacing;
}

/// Asks the shaper for per-line visual order and repositions glyphs.
pub(crate) fn reorder_text(text_info: &mut TextInfo, shaper: &mut dyn Shaper, line_spacing: f64) {
    let len = text_info.glyphs.len();
    text_info.cmap.clear();
    text_info.cmap.reserve(len);

    // Build the per-line visual maps.
    let mut start = 0;
    for i in 0..=len {
        let at_break = i == len || (i > start && text_info.glyphs[i].linebreak != 0);
        if !at_break {
            continue;
        }
        let levels: Vec<u8> = text_info.glyphs[start..i].iter().map(|g| g.level).collect();
        let map = shaper.reorder_line(&levels);
        text_info.cmap.extend(map.into_iter().map(|v| v + start));
        start = i;
    }
    debug_assert_eq!(text_info.cmap.len(), len);

    // Reposition according to the map.
    let mut pen = Vec2::default();
    let mut lineno = 1;
    for i in 0..len {
        if text_info.glyphs[i].linebreak != 0 {
            pen.x = 0;
            pen.y += f64_to_d6(text_info.lines[lineno - 1].desc);
            pen.y += f64_to_d6(text_info.lines[lineno].asc);
            pen.y += f64_to_d6(line_spacing);
            lineno += 1;
        }
        let visual = text_info.cmap[i];
        let info = &mut text_info.glyphs[visual];
        if info.skip {
            continue;
        }
        let advance = info.cluster_advance;
        info.pos = Vec2::new(info.offset.x + pen.x, info.offset.y + pen.y);
        pen = pen + advance;
    }
}

/// Cumulative `\fay` vertical offset along each line.
pub(crate) fn apply_baseline_shear(text_info: &mut TextInfo) {
    let len = text_info.glyphs.len();
    let mut shear = 0i32;
    let mut last_fay = 0.0;
    for i in 0..len {
        let visual = text_info.cmap[i];
        if text_info.glyphs[i].linebreak != 0 || last_fay != text_info.glyphs[visual].fay {
            shear = 0;
        }
        last_fay = text_info.glyphs[visual].fay;
        let info = &mut text_info.glyphs[visual];
        if info.scale_x == 0.0 || info.scale_y == 0.0 {
            info.skip = true;
        }
        if info.skip {
            continue;
        }
        info.pos.y += shear;
        shear += ((info.fay / info.scale_x * info.scale_y) * info.cluster_advance.x as f64) as i32;
    }
}

/// Horizontal justification per alignment and justify mode.
pub(crate) fn align_lines(text_info: &mut TextInfo, state: &RenderState, max_text_width: f64) {
    let glyphs = &mut text_info.glyphs;
    let mut halign = state.alignment & 3;
    let mut justify = state.justify;
    if state.evt_type & evt_type::HSCROLL != 0 {
        justify = match halign {
            align::H_LEFT => Justify::Left,
            align::H_CENTER => Justify::Center,
            align::H_RIGHT => Justify::Right,
            _ => Justify::Auto,
        };
        halign = align::H_LEFT;
    }

    let counts_width = |g: &GlyphInfo| !g.skip && g.symbol != '\n' && g.symbol != '\0';

    let mut max_width = 0.0f64;
    let mut width = 0.0f64;
    for i in 0..=glyphs.len() {
        if i == glyphs.len() || glyphs[i].linebreak != 0 {
            max_width = max_width.max(width);
            width = 0.0;
        }
        if i < glyphs.len() && counts_width(&glyphs[i]) {
            width += d6_to_f64(glyphs[i].cluster_advance.x);
        }
    }

    let mut last_break = -1i64;
    let mut width = 0.0f64;
    for i in 0..=glyphs.len() {
        if i == glyphs.len() || glyphs[i].linebreak != 0 {
            let shift = match halign {
                align::H_LEFT => match justify {
                    Justify::Right => max_width - width,
                    Justify::Center => (max_width - width) / 2.0,
                    _ => 0.0,
                },
                align::H_RIGHT => match justify {
                    Justify::Left => max_text_width - max_width,
                    Justify::Center => max_text_width - max_width + (max_width - width) / 2.0,
                    _ => max_text_width - width,
                },
                align::H_CENTER => match justify {
                    Justify::Left => (max_text_width - max_width) / 2.0,
                    Justify::Right => (max_text_width - max_width) / 2.0 + max_width - width,
                    _ => (max_text_width - width) / 2.0,
                },
                _ => 0.0,
            };
            for g in glyphs[(last_break + 1) as usize..i].iter_mut() {
                g.pos.x += f64_to_d6(shift);
            }
            last_break = i as i64 - 1;
            width = 0.0;
        }
        if i < glyphs.len() && counts_width(&glyphs[i]) {
            width += d6_to_f64(glyphs[i].cluster_advance.x);
        }
    }
}

/// Bounding box of the laid-out text in script pixels.
pub(crate) fn compute_string_bbox(text_info: &TextInfo) -> DRect {
    if text_info.glyphs.is_empty() {
        return DRect::default();
    }
    let mut bbox = DRect {
        x_min: 32000.0,
        x_max: -32000.0,
        y_min: -text_info.lines[0].asc,
        y_max: 0.0,
    };
    bbox.y_max = bbox.y_min + text_info.height;
    for info in &text_info.glyphs {
        if info.skip {
            continue;
        }
        let s = d6_to_f64(info.pos.x);
        let e = s + d6_to_f64(info.cluster_advance.x);
        bbox.x_min = bbox.x_min.min(s);
        bbox.x_max = bbox.x_max.max(e);
    }
    bbox
}

/// Base point of the text box for positioning and rotation.
pub(crate) fn get_base_point(bbox: &DRect, alignment: i32) -> DVec2 {
    let bx = match alignment & 3 {
        align::H_LEFT => bbox.x_min,
        align::H_RIGHT => bbox.x_max,
        _ => (bbox.x_max + bbox.x_min) / 2.0,
    };
    let by = match alignment & 12 {
        align::V_TOP => bbox.y_min,
        align::V_CENTER => (bbox.y_max + bbox.y_min) / 2.0,
        _ => bbox.y_max,
    };
    DVec2::new(bx, by)
}
