// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Override tag parsing.
//!
//! Advances a [`RenderState`] through one `{...}` block. Tag arguments
//! follow the quirks of the original interpreter: parenthesized arguments
//! split on commas, except that a backslash lumps everything from the last
//! comma to the closing parenthesis into a single argument; simple tags
//! additionally take the unparenthesized remainder of their name as an
//! argument. `pwr` is the interpolation power applied by an enclosing
//! `\t`.

use super::state::{evt_type, Effect, RenderState, ScrollDir, PARSED_A, PARSED_FADE};
use super::Services;
use crate::style::{align, Rgba, Style, Track, WrapStyle};
use crate::Event;
use smallvec::SmallVec;

const MAX_VALID_NARGS: usize = 7;
const MAX_BE: i32 = 127;
pub(crate) const BLUR_MAX_RADIUS: f64 = 100.0;

/// Parses a leading decimal number, ignoring surrounding garbage the way
/// the reference tokenizer does.
pub(crate) fn parse_double(s: &str) -> f64 {
    let t = s.trim_start();
    let bytes = t.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    t[..end].parse().unwrap_or(0.0)
}

pub(crate) fn parse_int(s: &str) -> i32 {
    let v = parse_double(s);
    dtoi32(v.trunc())
}

pub(crate) fn parse_i32(s: &str) -> i32 {
    parse_int(s)
}

fn dtoi32(val: f64) -> i32 {
    if val.is_nan() || val <= i32::MIN as f64 || val >= i32::MAX as f64 + 1.0 {
        return i32::MIN;
    }
    val as i32
}

/// `&HBBGGRR&` (or bare hex) to RGBA with zero alpha.
pub(crate) fn parse_color_tag(s: &str) -> Rgba {
    let mut t = s.trim_start();
    while let Some(rest) = t.strip_prefix(['&', 'H', 'h']) {
        t = rest;
    }
    let bytes = t.as_bytes();
    let mut end = 0;
    while end < bytes.len() && bytes[end].is_ascii_hexdigit() {
        end += 1;
    }
    let bgr = u32::from_str_radix(&t[..end], 16).unwrap_or(0) & 0x00FF_FFFF;
    Rgba(bgr.swap_bytes()) // 0x00BBGGRR -> 0xRRGGBB00
}

/// `&HAA&` (or bare hex) to an alpha value.
pub(crate) fn parse_alpha_tag(s: &str) -> i32 {
    let mut t = s.trim_start();
    let mut neg = false;
    while let Some(rest) = t.strip_prefix(['&', 'H', 'h']) {
        t = rest;
    }
    if let Some(rest) = t.strip_prefix('-') {
        neg = true;
        t = rest;
    }
    let bytes = t.as_bytes();
    let mut end = 0;
    while end < bytes.len() && bytes[end].is_ascii_hexdigit() {
        end += 1;
    }
    let v = i64::from_str_radix(&t[..end], 16).unwrap_or(0).min(i32::MAX as i64) as i32;
    if neg {
        -v
    } else {
        v
    }
}

fn calc_anim(new: f64, old: f64, pwr: f64) -> f64 {
    (1.0 - pwr) * old + new * pwr
}

/// Weighted average of two colors, each component except alpha.
pub(crate) fn change_color(var: &mut Rgba, new: Rgba, pwr: f64) {
    let blend = |n: u8, o: u8| dtoi32(calc_anim(n as f64, o as f64, pwr)).clamp(0, 255) as u8;
    *var = Rgba::new(
        blend(new.r(), var.r()),
        blend(new.g(), var.g()),
        blend(new.b(), var.b()),
        var.a(),
    );
}

/// Like [`change_color`], for the alpha component only. Out-of-range alpha
/// arguments wrap to a byte first.
pub(crate) fn change_alpha(var: &mut Rgba, new: i32, pwr: f64) {
    let new = (new & 0xFF) as f64;
    let a = dtoi32(calc_anim(new, var.a() as f64, pwr)) as u8;
    *var = var.with_a(a);
}

/// Piecewise-linear alpha used by `\fad`/`\fade`.
fn interpolate_alpha(now: i64, t1: i32, t2: i32, t3: i32, t4: i32, a1: i32, a2: i32, a3: i32) -> i32 {
    let (t1, t2, t3, t4) = (t1 as i64, t2 as i64, t3 as i64, t4 as i64);
    if now < t1 {
        a1
    } else if now < t2 {
        let cf = (now - t1) as f64 / (t2 - t1) as f64;
        (a1 as f64 * (1.0 - cf) + a2 as f64 * cf) as i32
    } else if now < t3 {
        a2
    } else if now < t4 {
        let cf = (now - t3) as f64 / (t4 - t3) as f64;
        (a2 as f64 * (1.0 - cf) + a3 as f64 * cf) as i32
    } else {
        a3
    }
}

/// Resolves the current font from the state's face properties.
pub(crate) fn update_font(state: &mut RenderState, services: &mut Services<'_>) {
    if state.family.is_empty() {
        return;
    }
    let key = crate::cache::FontKey {
        family: state.family.clone(),
        bold: state.bold,
        italic: state.italic,
        vertical: state.font_vertical,
    };
    let Services { caches, loader, .. } = services;
    let loader = &mut **loader;
    let entry = caches.font.get(key, |k| {
        let desc = crate::font::FontDesc {
            family: k.family.clone(),
            weight: k.bold,
            italic: k.italic,
            vertical: k.vertical,
        };
        let size = core::mem::size_of::<crate::font::FontEntry>();
        match loader.open(&desc) {
            Some((handle, n_faces)) => (
                crate::font::FontEntry {
                    desc,
                    handle,
                    n_faces,
                },
                size,
            ),
            None => {
                log::warn!("no usable font for family '{}'", desc.family);
                (
                    crate::font::FontEntry {
                        desc,
                        handle: u64::MAX,
                        n_faces: 0,
                    },
                    size,
                )
            }
        }
    });
    state.font = (entry.n_faces > 0).then_some(entry);
}

fn lookup_style<'a>(track: &'a Track, name: &str) -> Option<&'a Style> {
    let name = name.trim();
    track.styles.iter().find(|s| s.name == name)
}

struct TagArgs<'a> {
    args: SmallVec<[&'a str; 8]>,
    has_backslash_arg: bool,
}

impl<'a> TagArgs<'a> {
    fn push(&mut self, arg: &'a str) {
        if self.args.len() <= MAX_VALID_NARGS {
            let arg = arg.trim_end();
            if !arg.is_empty() {
                self.args.push(arg);
            }
        }
    }

    fn nargs(&self) -> usize {
        self.args.len()
    }

    fn first(&self) -> &'a str {
        self.args.first().copied().unwrap_or("")
    }
}

/// Parses the content of one `{...}` block (without the braces).
pub(crate) fn parse_tags<'a>(
    state: &mut RenderState,
    services: &mut Services<'_>,
    track: &Track,
    event: &Event,
    time: i64,
    text: &'a str,
    mut pwr: f64,
    nested: bool,
) {
    let bytes = text.as_bytes();
    let mut p = 0;
    loop {
        // Find the next tag introducer.
        while p < bytes.len() && bytes[p] != b'\\' {
            p += 1;
        }
        if p >= bytes.len() {
            break;
        }
        p += 1;
        while p < bytes.len() && bytes[p] == b' ' {
            p += 1;
        }

        // The name runs until '(' , '\\' or the end of the block.
        let name_start = p;
        let mut q = p;
        while q < bytes.len() && bytes[q] != b'(' && bytes[q] != b'\\' {
            q += 1;
        }
        if q == name_start {
            p = q;
            continue;
        }
        let name = &text[name_start..q];

        let mut ta = TagArgs {
            args: SmallVec::new(),
            has_backslash_arg: false,
        };

        // Split parenthesized arguments first, as the reference does for
        // every tag kind.
        let mut after = q;
        if q < bytes.len() && bytes[q] == b'(' {
            let mut r = q + 1;
            loop {
                while r < bytes.len() && bytes[r] == b' ' {
                    r += 1;
                }
                let arg_start = r;
                while r < bytes.len() && bytes[r] != b',' && bytes[r] != b'\\' && bytes[r] != b')' {
                    r += 1;
                }
                if r < bytes.len() && bytes[r] == b',' {
                    ta.push(&text[arg_start..r]);
                    r += 1;
                } else {
                    // A backslash swallows the rest of the parenthesized
                    // string into one argument.
                    if r < bytes.len() && bytes[r] == b'\\' {
                        ta.has_backslash_arg = true;
                        while r < bytes.len() && bytes[r] != b')' {
                            r += 1;
                        }
                    }
                    ta.push(&text[arg_start..r]);
                    if r < bytes.len() {
                        r += 1; // the closing parenthesis may be missing
                    }
                    break;
                }
            }
            after = r;
        }

        // Longest-prefix tag dispatch; the remainder of a simple tag's
        // name is its inline argument.
        let simple = |prefix: &str, ta: &mut TagArgs<'a>| -> bool {
            match name.strip_prefix(prefix) {
                Some(rest) => {
                    ta.push(rest);
                    true
                }
                None => false,
            }
        };
        let complex = |prefix: &str| name.starts_with(prefix);

        if simple("xbord", &mut ta) {
            let val = if ta.nargs() > 0 {
                (calc_anim(parse_double(ta.first()), state.border_x, pwr)).max(0.0)
            } else {
                state.style.outline
            };
            state.border_x = val;
        } else if simple("ybord", &mut ta) {
            let val = if ta.nargs() > 0 {
                (calc_anim(parse_double(ta.first()), state.border_y, pwr)).max(0.0)
            } else {
                state.style.outline
            };
            state.border_y = val;
        } else if simple("xshad", &mut ta) {
            state.shadow_x = if ta.nargs() > 0 {
                calc_anim(parse_double(ta.first()), state.shadow_x, pwr)
            } else {
                state.style.shadow
            };
        } else if simple("yshad", &mut ta) {
            state.shadow_y = if ta.nargs() > 0 {
                calc_anim(parse_double(ta.first()), state.shadow_y, pwr)
            } else {
                state.style.shadow
            };
        } else if simple("fax", &mut ta) {
            state.fax = if ta.nargs() > 0 {
                calc_anim(parse_double(ta.first()), state.fax, pwr)
            } else {
                0.0
            };
        } else if simple("fay", &mut ta) {
            state.fay = if ta.nargs() > 0 {
                calc_anim(parse_double(ta.first()), state.fay, pwr)
            } else {
                0.0
            };
        } else if complex("iclip") {
            if ta.nargs() == 4 {
                let v: Vec<i32> = ta.args.iter().map(|a| parse_int(a)).collect();
                state.clip_x0 = calc_anim(v[0] as f64, state.clip_x0, pwr);
                state.clip_y0 = calc_anim(v[1] as f64, state.clip_y0, pwr);
                state.clip_x1 = calc_anim(v[2] as f64, state.clip_x1, pwr);
                state.clip_y1 = calc_anim(v[3] as f64, state.clip_y1, pwr);
                state.clip_mode = true;
            } else if state.clip_drawing_text.is_none() && parse_vector_clip(state, &ta) {
                state.clip_drawing_mode = true;
            }
        } else if simple("blur", &mut ta) {
            state.blur = if ta.nargs() > 0 {
                calc_anim(parse_double(ta.first()), state.blur, pwr).clamp(0.0, BLUR_MAX_RADIUS)
            } else {
                0.0
            };
        } else if simple("fscx", &mut ta) {
            let val = if ta.nargs() > 0 {
                calc_anim(parse_double(ta.first()) / 100.0, state.scale_x, pwr).max(0.0)
            } else {
                state.style.scale_x
            };
            state.scale_x = val;
        } else if simple("fscy", &mut ta) {
            let val = if ta.nargs() > 0 {
                calc_anim(parse_double(ta.first()) / 100.0, state.scale_y, pwr).max(0.0)
            } else {
                state.style.scale_y
            };
            state.scale_y = val;
        } else if simple("fsc", &mut ta) {
            state.scale_x = state.style.scale_x;
            state.scale_y = state.style.scale_y;
        } else if simple("fsp", &mut ta) {
            state.hspacing = if ta.nargs() > 0 {
                calc_anim(parse_double(ta.first()), state.hspacing, pwr)
            } else {
                state.style.spacing
            };
        } else if simple("fs", &mut ta) {
            let mut val = 0.0;
            if ta.nargs() > 0 {
                let arg = ta.first();
                val = parse_double(arg);
                let t = arg.trim_start();
                if t.starts_with('+') || t.starts_with('-') {
                    val = state.font_size * (1.0 + pwr * val / 10.0);
                } else {
                    val = calc_anim(val, state.font_size, pwr);
                }
            }
            if val <= 0.0 {
                val = state.style.font_size;
            }
            state.font_size = val;
        } else if simple("bord", &mut ta) {
            let (xval, yval) = if ta.nargs() > 0 {
                let val = parse_double(ta.first());
                (
                    calc_anim(val, state.border_x, pwr).max(0.0),
                    calc_anim(val, state.border_y, pwr).max(0.0),
                )
            } else {
                (state.style.outline, state.style.outline)
            };
            state.border_x = xval;
            state.border_y = yval;
        } else if complex("move") {
            if ta.nargs() == 4 || ta.nargs() == 6 {
                let x1 = parse_double(ta.args[0]);
                let y1 = parse_double(ta.args[1]);
                let x2 = parse_double(ta.args[2]);
                let y2 = parse_double(ta.args[3]);
                let (mut t1, mut t2) = (0i32, 0i32);
                if ta.nargs() == 6 {
                    t1 = parse_i32(ta.args[4]);
                    t2 = parse_i32(ta.args[5]);
                    if t1 > t2 {
                        core::mem::swap(&mut t1, &mut t2);
                    }
                }
                if t1 <= 0 && t2 <= 0 {
                    t1 = 0;
                    t2 = event.duration as i32;
                }
                let t = time - event.start;
                let k = if t <= t1 as i64 {
                    0.0
                } else if t >= t2 as i64 {
                    1.0
                } else {
                    (t - t1 as i64) as f64 / (t2 as i64 - t1 as i64).max(1) as f64
                };
                if state.evt_type & evt_type::POSITIONED == 0 {
                    state.pos_x = k * (x2 - x1) + x1;
                    state.pos_y = k * (y2 - y1) + y1;
                    state.detect_collisions = false;
                    state.evt_type |= evt_type::POSITIONED;
                }
            }
        } else if simple("frx", &mut ta) {
            state.frx = if ta.nargs() > 0 {
                calc_anim(parse_double(ta.first()), state.frx, pwr)
            } else {
                0.0
            };
        } else if simple("fry", &mut ta) {
            state.fry = if ta.nargs() > 0 {
                calc_anim(parse_double(ta.first()), state.fry, pwr)
            } else {
                0.0
            };
        } else if simple("frz", &mut ta) || simple("fr", &mut ta) {
            state.frz = if ta.nargs() > 0 {
                calc_anim(parse_double(ta.first()), state.frz, pwr)
            } else {
                state.style.angle
            };
        } else if simple("fn", &mut ta) {
            let name = ta.first().trim_start();
            let family = if ta.nargs() > 0 && name != "0" {
                name
            } else {
                &state.style.font_name
            };
            let (family, vertical) = super::state::normalize_family(family);
            state.family = family;
            state.font_vertical = vertical;
            update_font(state, services);
        } else if simple("alpha", &mut ta) {
            if ta.nargs() > 0 {
                let a = parse_alpha_tag(ta.first());
                for c in &mut state.c {
                    change_alpha(c, a, pwr);
                }
            } else {
                let style = [
                    state.style.primary_color,
                    state.style.secondary_color,
                    state.style.outline_color,
                    state.style.back_color,
                ];
                for (c, s) in state.c.iter_mut().zip(style) {
                    change_alpha(c, s.a() as i32, 1.0);
                }
            }
        } else if simple("an", &mut ta) {
            let val = parse_int(ta.first());
            if state.parsed_tags & PARSED_A == 0 {
                state.alignment = if (1..=9).contains(&val) {
                    align::from_numpad(val)
                } else {
                    align::from_numpad(state.style.alignment.clamp(1, 9))
                };
                state.parsed_tags |= PARSED_A;
            }
        } else if simple("a", &mut ta) {
            let val = parse_int(ta.first());
            if state.parsed_tags & PARSED_A == 0 {
                state.alignment = if (1..=11).contains(&val) {
                    // A quirk of the original interpreter: the invalid
                    // legacy values 4 and 8 behave like 5.
                    if val & 3 == 0 {
                        5
                    } else {
                        val
                    }
                } else {
                    align::from_numpad(state.style.alignment.clamp(1, 9))
                };
                state.parsed_tags |= PARSED_A;
            }
        } else if complex("pos") {
            if ta.nargs() == 2 {
                if state.evt_type & evt_type::POSITIONED != 0 {
                    log::debug!("subtitle has a new \\pos after \\move or \\pos, ignoring");
                } else {
                    state.evt_type |= evt_type::POSITIONED;
                    state.detect_collisions = false;
                    state.pos_x = parse_double(ta.args[0]);
                    state.pos_y = parse_double(ta.args[1]);
                }
            }
        } else if complex("fade") || complex("fad") {
            let parsed = match ta.nargs() {
                2 => {
                    // Two-argument form: fade in, fade out.
                    let t2 = parse_i32(ta.args[0]);
                    let t3 = parse_i32(ta.args[1]);
                    Some((0xFF, 0, 0xFF, -1, t2, t3, -1))
                }
                7 => Some((
                    parse_int(ta.args[0]),
                    parse_int(ta.args[1]),
                    parse_int(ta.args[2]),
                    parse_i32(ta.args[3]),
                    parse_i32(ta.args[4]),
                    parse_i32(ta.args[5]),
                    parse_i32(ta.args[6]),
                )),
                _ => None,
            };
            if let Some((a1, a2, a3, mut t1, mut t2, mut t3, mut t4)) = parsed {
                if t1 == -1 && t4 == -1 {
                    t1 = 0;
                    t4 = event.duration as i32;
                    t3 = t4.wrapping_sub(t3);
                }
                // Reversed time pairs are swapped, not clamped.
                if t2 < t1 {
                    core::mem::swap(&mut t1, &mut t2);
                }
                if t4 < t3 {
                    core::mem::swap(&mut t3, &mut t4);
                }
                if state.parsed_tags & PARSED_FADE == 0 {
                    state.fade =
                        interpolate_alpha(time - event.start, t1, t2, t3, t4, a1, a2, a3);
                    state.parsed_tags |= PARSED_FADE;
                }
            }
        } else if complex("org") {
            if ta.nargs() == 2 && !state.have_origin {
                state.org_x = parse_double(ta.args[0]);
                state.org_y = parse_double(ta.args[1]);
                state.have_origin = true;
                state.detect_collisions = false;
            }
        } else if complex("t") {
            let cnt = ta.nargs().saturating_sub(1);
            let (t1, t2, accel) = match cnt {
                3 => (
                    parse_i32(ta.args[0]),
                    parse_i32(ta.args[1]),
                    parse_double(ta.args[2]),
                ),
                2 => (
                    dtoi32(parse_double(ta.args[0])),
                    dtoi32(parse_double(ta.args[1])),
                    1.0,
                ),
                1 => (0, 0, parse_double(ta.args[0])),
                _ => (0, 0, 1.0),
            };
            state.detect_collisions = false;
            let t2 = if t2 == 0 { event.duration as i32 } else { t2 };
            let t = time - event.start;
            let k = if t < t1 as i64 {
                0.0
            } else if t >= t2 as i64 {
                1.0
            } else {
                let delta = (t2 as i64 - t1 as i64).max(1) as f64;
                ((t - t1 as i64) as f64 / delta).powf(accel)
            };
            if nested {
                pwr = k;
            }
            // Without a backslash there are no override tags inside.
            if ta.has_backslash_arg && ta.nargs() > 0 {
                let inner = ta.args[ta.nargs() - 1];
                parse_tags(state, services, track, event, time, inner, k, true);
            }
        } else if complex("clip") {
            if ta.nargs() == 4 {
                let v: Vec<i32> = ta.args.iter().map(|a| parse_int(a)).collect();
                state.clip_x0 = calc_anim(v[0] as f64, state.clip_x0, pwr);
                state.clip_y0 = calc_anim(v[1] as f64, state.clip_y0, pwr);
                state.clip_x1 = calc_anim(v[2] as f64, state.clip_x1, pwr);
                state.clip_y1 = calc_anim(v[3] as f64, state.clip_y1, pwr);
                state.clip_mode = false;
            } else if state.clip_drawing_text.is_none() && parse_vector_clip(state, &ta) {
                state.clip_drawing_mode = false;
            }
        } else if simple("c", &mut ta) || simple("1c", &mut ta) {
            apply_color(state, &ta, 0, state.style.primary_color, pwr);
        } else if simple("2c", &mut ta) {
            apply_color(state, &ta, 1, state.style.secondary_color, pwr);
        } else if simple("3c", &mut ta) {
            apply_color(state, &ta, 2, state.style.outline_color, pwr);
        } else if simple("4c", &mut ta) {
            apply_color(state, &ta, 3, state.style.back_color, pwr);
        } else if simple("1a", &mut ta) {
            apply_alpha(state, &ta, 0, state.style.primary_color, pwr);
        } else if simple("2a", &mut ta) {
            apply_alpha(state, &ta, 1, state.style.secondary_color, pwr);
        } else if simple("3a", &mut ta) {
            apply_alpha(state, &ta, 2, state.style.outline_color, pwr);
        } else if simple("4a", &mut ta) {
            apply_alpha(state, &ta, 3, state.style.back_color, pwr);
        } else if simple("r", &mut ta) {
            let style = if ta.nargs() > 0 {
                lookup_style(track, ta.first())
            } else {
                None
            };
            let style = style.cloned().unwrap_or_else(|| track.styles[event.style.min(track.styles.len() - 1)].clone());
            state.reset(&style);
            update_font(state, services);
        } else if simple("be", &mut ta) {
            state.be = if ta.nargs() > 0 {
                let dval = parse_double(ta.first());
                // The original interpreter always adds +0.5, even for
                // negative values; high values burn CPU, so clamp.
                let val = (calc_anim(dval, state.be as f64, pwr) + 0.5) as i32;
                val.clamp(0, MAX_BE)
            } else {
                0
            };
        } else if simple("b", &mut ta) {
            let val = parse_int(ta.first());
            let val = if ta.nargs() > 0 && (val == 0 || val == 1 || val >= 100) {
                val
            } else {
                state.style.bold
            };
            state.bold = super::state::resolve_bold(val);
            update_font(state, services);
        } else if simple("i", &mut ta) {
            let val = parse_int(ta.first());
            let val = if ta.nargs() > 0 && (val == 0 || val == 1) {
                val
            } else {
                state.style.italic
            };
            state.italic = super::state::resolve_italic(val);
            update_font(state, services);
        } else if simple("kf", &mut ta) || simple("K", &mut ta) {
            let val = if ta.nargs() > 0 { parse_double(ta.first()) } else { 100.0 };
            push_karaoke(state, Effect::KaraokeKf, val);
        } else if simple("ko", &mut ta) {
            let val = if ta.nargs() > 0 { parse_double(ta.first()) } else { 100.0 };
            push_karaoke(state, Effect::KaraokeKo, val);
        } else if simple("k", &mut ta) {
            let val = if ta.nargs() > 0 { parse_double(ta.first()) } else { 100.0 };
            push_karaoke(state, Effect::Karaoke, val);
        } else if simple("shad", &mut ta) {
            let (xval, yval) = if ta.nargs() > 0 {
                let val = parse_double(ta.first());
                // Clip for \shad but not for \xshad or \yshad.
                (
                    calc_anim(val, state.shadow_x, pwr).max(0.0),
                    calc_anim(val, state.shadow_y, pwr).max(0.0),
                )
            } else {
                (state.style.shadow, state.style.shadow)
            };
            state.shadow_x = xval;
            state.shadow_y = yval;
        } else if simple("s", &mut ta) {
            let val = parse_int(ta.first());
            let on = if ta.nargs() > 0 && (val == 0 || val == 1) {
                val != 0
            } else {
                state.style.strike_out
            };
            if on {
                state.flags |= crate::cache::deco::STRIKETHROUGH;
            } else {
                state.flags &= !crate::cache::deco::STRIKETHROUGH;
            }
        } else if simple("u", &mut ta) {
            let val = parse_int(ta.first());
            let on = if ta.nargs() > 0 && (val == 0 || val == 1) {
                val != 0
            } else {
                state.style.underline
            };
            if on {
                state.flags |= crate::cache::deco::UNDERLINE;
            } else {
                state.flags &= !crate::cache::deco::UNDERLINE;
            }
        } else if simple("pbo", &mut ta) {
            state.pbo = parse_double(ta.first());
        } else if simple("p", &mut ta) {
            state.drawing_scale = parse_int(ta.first()).max(0);
        } else if simple("q", &mut ta) {
            let val = parse_int(ta.first());
            state.wrap_style = if ta.nargs() > 0 && (0..=3).contains(&val) {
                WrapStyle::from_raw(val)
            } else {
                track.wrap_style
            };
        } else if simple("fe", &mut ta) {
            state.font_encoding = if ta.nargs() > 0 {
                parse_int(ta.first())
            } else {
                state.style.encoding
            };
        }

        p = after.max(q);
    }
}

fn apply_color(state: &mut RenderState, ta: &TagArgs<'_>, idx: usize, style_color: Rgba, pwr: f64) {
    if ta.nargs() > 0 {
        let val = parse_color_tag(ta.first());
        change_color(&mut state.c[idx], val, pwr);
    } else {
        change_color(&mut state.c[idx], style_color, 1.0);
    }
}

fn apply_alpha(state: &mut RenderState, ta: &TagArgs<'_>, idx: usize, style_color: Rgba, pwr: f64) {
    if ta.nargs() > 0 {
        let val = parse_alpha_tag(ta.first());
        change_alpha(&mut state.c[idx], val, pwr);
    } else {
        change_alpha(&mut state.c[idx], style_color.a() as i32, 1.0);
    }
}

fn push_karaoke(state: &mut RenderState, effect: Effect, centiseconds: f64) {
    state.effect_type = effect;
    if state.effect_timing != 0 {
        state.effect_skip_timing += state.effect_timing;
    }
    state.effect_timing = (centiseconds * 10.0) as i32;
}

fn parse_vector_clip(state: &mut RenderState, ta: &TagArgs<'_>) -> bool {
    if ta.nargs() != 1 && ta.nargs() != 2 {
        return false;
    }
    let mut scale = 1;
    if ta.nargs() == 2 {
        scale = parse_int(ta.args[0]);
    }
    state.clip_drawing_text = Some(std::rc::Rc::from(ta.args[ta.nargs() - 1]));
    state.clip_drawing_scale = scale.max(1);
    true
}

/// Parses `Banner;` and `Scroll up/down;` transition effect strings.
pub(crate) fn apply_transition_effects(state: &mut RenderState, event: &Event, time: i64) {
    let effect = event.effect.as_str();
    if effect.is_empty() {
        return;
    }

    let fields: Vec<i32> = effect
        .split(';')
        .skip(1)
        .take(4)
        .map(|f| parse_int(f))
        .collect();

    if effect.starts_with("Banner;") {
        if fields.is_empty() {
            log::debug!("error parsing effect: '{effect}'");
            return;
        }
        state.scroll_direction = if fields.len() >= 2 && fields[1] != 0 {
            ScrollDir::LeftRight
        } else {
            ScrollDir::RightLeft
        };
        let delay = fields[0].max(1);
        state.scroll_shift = (time - event.start) as f64 / delay as f64;
        state.evt_type |= evt_type::HSCROLL;
        state.detect_collisions = false;
        state.wrap_style = WrapStyle::None;
        return;
    }

    if effect.starts_with("Scroll up;") {
        state.scroll_direction = ScrollDir::BottomTop;
    } else if effect.starts_with("Scroll down;") {
        state.scroll_direction = ScrollDir::TopBottom;
    } else {
        log::debug!("unknown transition effect: '{effect}'");
        return;
    }

    if fields.len() < 3 {
        log::debug!("error parsing effect: '{effect}'");
        return;
    }
    let delay = fields[2].max(1);
    state.scroll_shift = (time - event.start) as f64 / delay as f64;
    state.scroll_y0 = fields[0].min(fields[1]);
    state.scroll_y1 = fields[0].max(fields[1]);
    state.evt_type |= evt_type::VSCROLL;
    state.detect_collisions = false;
}

/// Gets the next character of the event body, handling escapes.
pub(crate) fn next_char(state: &RenderState, text: &str) -> (char, usize) {
    let bytes = text.as_bytes();
    if bytes.first() == Some(&b'\t') {
        return (' ', 1);
    }
    if bytes.first() == Some(&b'\\') && bytes.len() >= 2 {
        match bytes[1] {
            b'N' => return ('\n', 2),
            b'n' => {
                if state.wrap_style == WrapStyle::None {
                    return ('\n', 2);
                }
                return (' ', 2);
            }
            b'h' => return ('\u{A0}', 2),
            b'{' => return ('{', 2),
            b'}' => return ('}', 2),
            _ => {}
        }
    }
    let ch = text.chars().next().unwrap_or('\0');
    (ch, ch.len_utf8())
}

/// True when the event carries tags that make its placement explicit.
pub(crate) fn event_has_hard_overrides(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            i += 2;
        } else if bytes[i] == b'{' {
            i += 1;
            while i < bytes.len() && bytes[i] != b'}' {
                if bytes[i] == b'\\' {
                    let rest = &text[i + 1..];
                    if rest.starts_with("pos")
                        || rest.starts_with("move")
                        || rest.starts_with("clip")
                        || rest.starts_with("iclip")
                        || rest.starts_with("org")
                        || rest.starts_with("pbo")
                        || rest.starts_with('p')
                    {
                        return true;
                    }
                }
                i += 1;
            }
        } else {
            i += 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_tag_swaps_byte_order() {
        // Script colors are &HBBGGRR&.
        let c = parse_color_tag("&H10A0FF&");
        assert_eq!((c.r(), c.g(), c.b(), c.a()), (0xFF, 0xA0, 0x10, 0));
    }

    #[test]
    fn alpha_tag_is_hex() {
        assert_eq!(parse_alpha_tag("&H80&"), 0x80);
        assert_eq!(parse_alpha_tag("FF"), 0xFF);
        assert_eq!(parse_alpha_tag("&H-10&"), -16);
    }

    #[test]
    fn number_scanning_ignores_trailing_garbage() {
        assert_eq!(parse_double("12.5abc"), 12.5);
        assert_eq!(parse_double("  -3"), -3.0);
        assert_eq!(parse_double("x"), 0.0);
        assert_eq!(parse_int("7.9"), 7);
    }

    #[test]
    fn fade_swaps_reversed_times() {
        // \fade with t2 < t1 in the two-argument form derives t3 from the
        // duration, matching the reference's swap behavior.
        assert_eq!(interpolate_alpha(0, 0, 100, 900, 1000, 255, 0, 255), 255);
        assert_eq!(interpolate_alpha(500, 0, 100, 900, 1000, 255, 0, 255), 0);
        assert_eq!(interpolate_alpha(1000, 0, 100, 900, 1000, 255, 0, 255), 255);
    }

    #[test]
    fn change_color_preserves_alpha() {
        let mut c = Rgba::new(10, 20, 30, 77);
        change_color(&mut c, Rgba::new(200, 100, 50, 0), 1.0);
        assert_eq!((c.r(), c.g(), c.b(), c.a()), (200, 100, 50, 77));
        change_color(&mut c, Rgba::new(0, 0, 0, 0), 0.5);
        assert_eq!((c.r(), c.g(), c.b(), c.a()), (100, 50, 25, 77));
    }

    #[test]
    fn escapes_in_event_text() {
        let state = RenderState {
            wrap_style: WrapStyle::Smart,
            ..RenderState::default()
        };
        assert_eq!(next_char(&state, "\\N rest"), ('\n', 2));
        assert_eq!(next_char(&state, "\\n rest"), (' ', 2));
        assert_eq!(next_char(&state, "\\h"), ('\u{A0}', 2));
        assert_eq!(next_char(&state, "\\{"), ('{', 2));
        let nowrap = RenderState {
            wrap_style: WrapStyle::None,
            ..RenderState::default()
        };
        assert_eq!(next_char(&nowrap, "\\n"), ('\n', 2));
    }

    #[test]
    fn hard_override_detection() {
        assert!(event_has_hard_overrides("{\\pos(1,2)}x"));
        assert!(event_has_hard_overrides("abc{\\move(0,0,1,1)}"));
        assert!(!event_has_hard_overrides("{\\b1}xyz"));
        assert!(!event_has_hard_overrides("no tags"));
    }
}
