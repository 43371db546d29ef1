// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Parsed-script input records.
//!
//! Script tokenization happens outside the core; events and styles arrive
//! as already-parsed records in these shapes.

pub use sable_primitives::Rgba;

/// Border rendering mode of a style.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum BorderStyle {
    /// Outline plus drop shadow.
    #[default]
    Outline,
    /// Opaque box behind each glyph run.
    OpaqueBox,
    /// One background band behind the whole event.
    Background,
}

impl BorderStyle {
    /// Converts the script-format number (1, 3 or 4).
    pub fn from_raw(v: i32) -> Self {
        match v {
            3 => Self::OpaqueBox,
            4 => Self::Background,
            _ => Self::Outline,
        }
    }
}

/// Line wrapping mode (`WrapStyle` header field, `\q` override).
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum WrapStyle {
    /// Smart wrapping, upper line wider.
    #[default]
    Smart = 0,
    /// Wrap at end of line only.
    EndOfLine = 1,
    /// No wrapping; `\n` breaks.
    None = 2,
    /// Smart wrapping, lower line wider.
    SmartLow = 3,
}

impl WrapStyle {
    pub fn from_raw(v: i32) -> Self {
        match v {
            1 => Self::EndOfLine,
            2 => Self::None,
            3 => Self::SmartLow,
            _ => Self::Smart,
        }
    }
}

/// Justification of line content relative to the alignment (ASS `Justify`).
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum Justify {
    #[default]
    Auto = 0,
    Left = 1,
    Center = 2,
    Right = 3,
}

impl Justify {
    pub fn from_raw(v: i32) -> Self {
        match v {
            1 => Self::Left,
            2 => Self::Center,
            3 => Self::Right,
            _ => Self::Auto,
        }
    }
}

/// One style record.
#[derive(Clone, Debug)]
pub struct Style {
    pub name: String,
    pub font_name: String,
    pub font_size: f64,
    pub primary_color: Rgba,
    pub secondary_color: Rgba,
    pub outline_color: Rgba,
    pub back_color: Rgba,
    /// 0 = regular, 1 = bold, >1 = exact weight.
    pub bold: i32,
    /// 0 = upright, 1 = italic.
    pub italic: i32,
    pub underline: bool,
    pub strike_out: bool,
    /// Horizontal/vertical glyph scale as a fraction (1.0 = 100%).
    pub scale_x: f64,
    pub scale_y: f64,
    /// Extra spacing between characters, in pixels.
    pub spacing: f64,
    /// Z rotation in degrees.
    pub angle: f64,
    pub border_style: BorderStyle,
    /// Outline width in pixels.
    pub outline: f64,
    /// Shadow offset in pixels.
    pub shadow: f64,
    /// Numpad alignment, 1-9.
    pub alignment: i32,
    pub justify: Justify,
    pub margin_l: i32,
    pub margin_r: i32,
    pub margin_v: i32,
    pub encoding: i32,
    /// Default gaussian blur radius.
    pub blur: f64,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            name: "Default".into(),
            font_name: "Arial".into(),
            font_size: 18.0,
            primary_color: Rgba(0xFFFF_FF00),
            secondary_color: Rgba(0xFF00_0000),
            outline_color: Rgba(0x0000_0000),
            back_color: Rgba(0x0000_0000),
            bold: 0,
            italic: 0,
            underline: false,
            strike_out: false,
            scale_x: 1.0,
            scale_y: 1.0,
            spacing: 0.0,
            angle: 0.0,
            border_style: BorderStyle::Outline,
            outline: 2.0,
            shadow: 3.0,
            alignment: 2,
            justify: Justify::Auto,
            margin_l: 20,
            margin_r: 20,
            margin_v: 20,
            encoding: 1,
            blur: 0.0,
        }
    }
}

/// One event record, with override-tagged UTF-8 text.
#[derive(Clone, Debug, Default)]
pub struct Event {
    /// Start time in milliseconds.
    pub start: i64,
    /// Duration in milliseconds.
    pub duration: i64,
    /// Stacking depth; higher layers render on top.
    pub layer: i32,
    /// Tie-breaker for events within the same layer.
    pub read_order: i32,
    /// Index into [`Track::styles`].
    pub style: usize,
    pub margin_l: i32,
    pub margin_r: i32,
    pub margin_v: i32,
    /// Transition effect string (`Banner;...`, `Scroll up;...`).
    pub effect: String,
    pub text: String,
}

/// A parsed subtitle script: header fields, styles and events.
#[derive(Clone, Debug)]
pub struct Track {
    pub play_res_x: f64,
    pub play_res_y: f64,
    pub wrap_style: WrapStyle,
    /// Scale borders and shadows with the frame instead of the storage
    /// resolution.
    pub scaled_border_and_shadow: bool,
    pub kerning: bool,
    pub language: Option<String>,
    pub styles: Vec<Style>,
    pub events: Vec<Event>,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            play_res_x: 384.0,
            play_res_y: 288.0,
            wrap_style: WrapStyle::Smart,
            scaled_border_and_shadow: true,
            kerning: false,
            language: None,
            styles: vec![Style::default()],
            events: Vec::new(),
        }
    }
}

// Alignment bit encoding shared by the layout passes: low two bits are
// the horizontal alignment, bits 2-3 the vertical one.
pub(crate) mod align {
    pub(crate) const H_LEFT: i32 = 1;
    pub(crate) const H_CENTER: i32 = 2;
    pub(crate) const H_RIGHT: i32 = 3;
    pub(crate) const V_SUB: i32 = 0;
    pub(crate) const V_TOP: i32 = 4;
    pub(crate) const V_CENTER: i32 = 8;

    /// Converts numpad alignment (1-9) to the bit encoding.
    pub(crate) fn from_numpad(val: i32) -> i32 {
        let mut v = (val - 1) / 3; // 0, 1 or 2 for vertical alignment
        if v != 0 {
            v = 3 - v;
        }
        ((val - 1) % 3) + 1 + v * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numpad_conversion() {
        // Bottom row keeps its value, middle row maps to 9-11, top to 5-7.
        assert_eq!(align::from_numpad(1), align::H_LEFT | align::V_SUB);
        assert_eq!(align::from_numpad(2), align::H_CENTER | align::V_SUB);
        assert_eq!(align::from_numpad(5), align::H_CENTER | align::V_CENTER);
        assert_eq!(align::from_numpad(8), align::H_CENTER | align::V_TOP);
        assert_eq!(align::from_numpad(9), align::H_RIGHT | align::V_TOP);
    }

    #[test]
    fn raw_conversions() {
        assert_eq!(BorderStyle::from_raw(3), BorderStyle::OpaqueBox);
        assert_eq!(BorderStyle::from_raw(1), BorderStyle::Outline);
        assert_eq!(WrapStyle::from_raw(2), WrapStyle::None);
        assert_eq!(Justify::from_raw(9), Justify::Auto);
    }
}
