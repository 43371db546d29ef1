// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-event renderer state.
//!
//! The override-tag parser advances this state through the event text;
//! every glyph snapshot-copies the fields it needs. `reset` implements the
//! `\r` semantics: back to style values, keeping event-scoped properties.

use crate::font::FontEntry;
use crate::style::{align, BorderStyle, Justify, Rgba, Style, Track, WrapStyle};
use std::rc::Rc;

/// Karaoke effect attached to a glyph run.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub(crate) enum Effect {
    #[default]
    None,
    /// `\k`: instant fill at word start.
    Karaoke,
    /// `\kf`/`\K`: sweeping fill.
    KaraokeKf,
    /// `\ko`: outline hidden until word start.
    KaraokeKo,
}

pub(crate) mod evt_type {
    pub(crate) const POSITIONED: u32 = 1;
    pub(crate) const HSCROLL: u32 = 2;
    pub(crate) const VSCROLL: u32 = 4;
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub(crate) enum ScrollDir {
    #[default]
    LeftRight,
    RightLeft,
    TopBottom,
    BottomTop,
}

pub(crate) const PARSED_FADE: u32 = 1 << 0;
pub(crate) const PARSED_A: u32 = 1 << 1;

/// Mutable rendering state for one event.
#[derive(Clone, Debug, Default)]
pub(crate) struct RenderState {
    pub style: Style,
    pub font: Option<Rc<FontEntry>>,
    pub font_size: f64,
    pub parsed_tags: u32,
    /// Decoration flags (underline/strike-through).
    pub flags: u32,

    pub alignment: i32,
    pub justify: Justify,
    pub frx: f64,
    pub fry: f64,
    pub frz: f64,
    pub fax: f64,
    pub fay: f64,
    pub pos_x: f64,
    pub pos_y: f64,
    pub org_x: f64,
    pub org_y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub hspacing: f64,
    pub border_x: f64,
    pub border_y: f64,
    pub evt_type: u32,
    pub border_style: BorderStyle,
    /// Primary, secondary, outline, back colors with tag overrides applied.
    pub c: [Rgba; 4],
    pub clip_x0: f64,
    pub clip_y0: f64,
    pub clip_x1: f64,
    pub clip_y1: f64,
    pub have_origin: bool,
    /// Rectangular clip is inverse.
    pub clip_mode: bool,
    pub detect_collisions: bool,
    pub be: i32,
    /// Alpha from `\fad`/`\fade` at the current timestamp.
    pub fade: i32,
    pub blur: f64,
    pub shadow_x: f64,
    pub shadow_y: f64,
    /// Drawing baseline offset (`\pbo`).
    pub pbo: f64,
    pub clip_drawing_text: Option<Rc<str>>,
    pub clip_drawing_scale: i32,
    /// Vector clip is inverse (`\iclip`).
    pub clip_drawing_mode: bool,
    /// Currently reading a drawing if nonzero (`\p`).
    pub drawing_scale: i32,

    pub effect_type: Effect,
    pub effect_timing: i32,
    pub effect_skip_timing: i32,

    pub scroll_direction: ScrollDir,
    pub scroll_shift: f64,
    pub scroll_y0: i32,
    pub scroll_y1: i32,

    pub family: Rc<str>,
    pub font_vertical: bool,
    pub bold: u32,
    pub italic: u32,
    pub wrap_style: WrapStyle,
    pub font_encoding: i32,

    /// Explicitly positioned: margins and collision handling are skipped.
    pub explicit: bool,

    // Frame-derived scale factors, fixed per event.
    pub font_scale: f64,
    pub font_scale_x: f64,
    pub border_scale: f64,
    pub blur_scale: f64,
}

impl RenderState {
    /// Partial reset to style values, as `{\r}` does.
    pub(crate) fn reset(&mut self, style: &Style) {
        self.style = style.clone();
        self.c = [
            style.primary_color,
            style.secondary_color,
            style.outline_color,
            style.back_color,
        ];
        self.flags = (style.underline as u32 * crate::cache::deco::UNDERLINE)
            | (style.strike_out as u32 * crate::cache::deco::STRIKETHROUGH);
        self.font_size = style.font_size;
        let (family, vertical) = normalize_family(&style.font_name);
        self.family = family;
        self.font_vertical = vertical;
        self.bold = resolve_bold(style.bold);
        self.italic = resolve_italic(style.italic);
        self.border_style = style.border_style;
        self.border_x = style.outline;
        self.border_y = style.outline;
        self.scale_x = style.scale_x;
        self.scale_y = style.scale_y;
        self.hspacing = style.spacing;
        self.be = 0;
        self.blur = style.blur;
        self.shadow_x = style.shadow;
        self.shadow_y = style.shadow;
        self.frx = 0.0;
        self.fry = 0.0;
        self.frz = style.angle;
        self.fax = 0.0;
        self.fay = 0.0;
        self.font_encoding = style.encoding;
    }

    /// Full reset at the start of an event.
    pub(crate) fn init(&mut self, track: &Track, style: &Style) {
        self.parsed_tags = 0;
        self.evt_type = 0;
        self.wrap_style = track.wrap_style;
        self.pos_x = 0.0;
        self.pos_y = 0.0;
        self.org_x = 0.0;
        self.org_y = 0.0;
        self.have_origin = false;
        self.clip_x0 = 0.0;
        self.clip_y0 = 0.0;
        self.clip_x1 = track.play_res_x;
        self.clip_y1 = track.play_res_y;
        self.clip_mode = false;
        self.clip_drawing_text = None;
        self.clip_drawing_mode = false;
        self.clip_drawing_scale = 1;
        self.detect_collisions = true;
        self.fade = 0;
        self.drawing_scale = 0;
        self.pbo = 0.0;
        self.effect_type = Effect::None;
        self.effect_timing = 0;
        self.effect_skip_timing = 0;
        self.explicit = false;
        self.font = None;
        self.reset(style);
        self.alignment = align::from_numpad(style.alignment.clamp(1, 9));
        self.justify = style.justify;
    }
}

/// Splits the vertical-layout marker off a family name.
pub(crate) fn normalize_family(name: &str) -> (Rc<str>, bool) {
    match name.strip_prefix('@') {
        Some(rest) => (Rc::from(rest), true),
        None => (Rc::from(name), false),
    }
}

/// 0 = normal, 1 = bold, >1 = exact weight.
pub(crate) fn resolve_bold(val: i32) -> u32 {
    match val {
        1 | -1 => 700,
        v if v <= 0 => 400,
        v => v as u32,
    }
}

pub(crate) fn resolve_italic(val: i32) -> u32 {
    match val {
        1 => 100,
        v if v <= 0 => 0,
        v => v as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_restores_style_values() {
        let style = Style {
            outline: 3.5,
            shadow: 1.25,
            angle: 30.0,
            ..Style::default()
        };
        let mut state = RenderState::default();
        state.init(&Track::default(), &style);
        state.border_x = 0.0;
        state.frz = 90.0;
        state.be = 5;
        state.reset(&style);
        assert_eq!(state.border_x, 3.5);
        assert_eq!(state.frz, 30.0);
        assert_eq!(state.be, 0);
        assert_eq!(state.shadow_y, 1.25);
    }

    #[test]
    fn family_normalization() {
        let (family, vertical) = normalize_family("@MS Gothic");
        assert_eq!(&*family, "MS Gothic");
        assert!(vertical);
        assert!(!normalize_family("Arial").1);
    }

    #[test]
    fn weight_resolution() {
        assert_eq!(resolve_bold(0), 400);
        assert_eq!(resolve_bold(1), 700);
        assert_eq!(resolve_bold(600), 600);
        assert_eq!(resolve_italic(1), 100);
        assert_eq!(resolve_italic(0), 0);
    }
}
