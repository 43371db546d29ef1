// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Glyph-to-bitmap conversion and composite assembly.
//!
//! Composes each glyph's transform matrix, quantizes it, looks up (or
//! renders) the glyph and border bitmaps, groups consecutive glyphs with
//! identical filter parameters into combined runs, and produces the merged
//! glyph + outline + shadow bitmaps through the composite cache.

use super::layout::{GlyphInfo, TextInfo};
use super::state::{Effect, RenderState};
use super::Services;
use crate::bitmap::{
    add_bitmaps, be_blur, be_padding, fix_outline, shift_bitmap, Bitmap, EngineConfig,
};
use crate::blur::gaussian_blur;
use crate::cache::{
    filter_flag, BitmapRef, BorderKey, CompositeEntry, CompositeKey, FilterDesc, OutlineKey,
    RefKey,
};
use crate::outline::OUTLINE_MAX;
use crate::raster::Rasterizer;
use crate::style::{BorderStyle, Rgba};
use crate::transform::{
    construct_bitmap, quantize_transform, MAX_PERSP_SCALE, POSITION_PRECISION,
};
use sable_primitives::{f64_to_d6, DVec2, Matrix3, Rect, Vec2};
use std::f64::consts::PI;
use std::rc::Rc;

const SUBPIXEL_MASK: i32 = 63;
const STROKER_PRECISION: i32 = 16;
/// Blur quantization step: relative error per index step.
const BLUR_PRECISION: f64 = 1.0 / 256.0;

/// One same-filter glyph run aggregated into a single composite.
#[derive(Clone, Default, Debug)]
pub(crate) struct CombinedBitmapInfo {
    pub filter: FilterDesc,
    pub c: [Rgba; 4],
    pub effect_type: Effect,
    /// Before composite assembly: sub-pixel distance from the karaoke
    /// origin. Afterwards: the screen x of the color boundary.
    pub effect_timing: i32,
    /// Leftmost post-transform control point x, in sub-pixels.
    pub leftmost_x: i32,
    pub bitmaps: Vec<BitmapRef>,
    pub x: i32,
    pub y: i32,
    pub image: Option<Rc<CompositeEntry>>,
}

/// Composes the transform matrix of one glyph: scale, shear, 3D rotation
/// around the event origin, and the perspective projection.
pub(crate) fn calc_transform_matrix(info: &GlyphInfo, state: &RenderState) -> Matrix3 {
    let frx = PI / 180.0 * info.frx;
    let fry = PI / 180.0 * info.fry;
    let frz = PI / 180.0 * info.frz;

    let (sx, cx) = (-frx.sin(), frx.cos());
    let (sy, cy) = (fry.sin(), fry.cos());
    let (sz, cz) = (-frz.sin(), frz.cos());

    let fax = info.fax * info.scale_x / info.scale_y;
    let fay = info.fay * info.scale_y / info.scale_x;
    let x1 = [1.0, fax, info.shift.x as f64 + info.asc as f64 * fax];
    let y1 = [fay, 1.0, info.shift.y as f64];

    let mut x2 = [0.0; 3];
    let mut y2 = [0.0; 3];
    for i in 0..3 {
        x2[i] = x1[i] * cz - y1[i] * sz;
        y2[i] = x1[i] * sz + y1[i] * cz;
    }

    let mut y3 = [0.0; 3];
    let mut z3 = [0.0; 3];
    for i in 0..3 {
        y3[i] = y2[i] * cx;
        z3[i] = y2[i] * sx;
    }

    let mut x4 = [0.0; 3];
    let mut z4 = [0.0; 3];
    for i in 0..3 {
        x4[i] = x2[i] * cy - z3[i] * sy;
        z4[i] = x2[i] * sy + z3[i] * cy;
    }

    let dist = 20000.0 * state.blur_scale;
    z4[2] += dist;

    let scale_x = dist * state.font_scale_x;
    let offs_x = info.pos.x as f64 - info.shift.x as f64 * state.font_scale_x;
    let offs_y = info.pos.y as f64 - info.shift.y as f64;
    let mut m = [[0.0; 3]; 3];
    for i in 0..3 {
        m[0][i] = z4[i] * offs_x + x4[i] * scale_x;
        m[1][i] = z4[i] * offs_y + y3[i] * dist;
        m[2][i] = z4[i];
    }
    Matrix3::new(m)
}

/// Quantizes a blur radius to its cache index and derives the shadow
/// offset quantization mask for the same precision budget.
pub(crate) fn quantize_blur(radius: f64, shadow_mask: &mut i32) -> i32 {
    // The quantization step grows with the radius so that each index step
    // causes the same relative error; near zero it degenerates to the
    // positioning precision.
    let scale = 64.0 * BLUR_PRECISION / POSITION_PRECISION;
    let radius = radius * scale;

    let (_, ord) = frexp((1.0 + radius) * (POSITION_PRECISION / 2.0));
    *shadow_mask = (1i32 << ord.clamp(0, 30)) - 1;
    (radius.ln_1p() / BLUR_PRECISION).round() as i32
}

/// Reconstructs the blur variance for a quantized index.
pub(crate) fn restore_blur(qblur: i32) -> f64 {
    let scale = 64.0 * BLUR_PRECISION / POSITION_PRECISION;
    let sigma = (BLUR_PRECISION * qblur as f64).exp_m1() / scale;
    sigma * sigma
}

fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let exp = ((x.to_bits() >> 52) & 0x7FF) as i32 - 1022;
    (x / (exp as f64).exp2(), exp)
}

/// Computes the per-glyph filter flags.
fn filter_flags(info: &GlyphInfo) -> u32 {
    let mut flags = 0;
    if info.border_style == BorderStyle::OpaqueBox {
        flags |= filter_flag::BORDER_STYLE_3;
    }
    if info.border_x > 0.0 || info.border_y > 0.0 {
        flags |= filter_flag::NONZERO_BORDER;
    }
    if info.shadow_x != 0.0 || info.shadow_y != 0.0 {
        flags |= filter_flag::NONZERO_SHADOW;
    }
    if flags & filter_flag::NONZERO_SHADOW != 0
        && (info.effect_type == Effect::KaraokeKf
            || info.effect_type == Effect::KaraokeKo
            || info.a_pre_fade[0] != 0xFF
            || info.border_style == BorderStyle::OpaqueBox)
    {
        flags |= filter_flag::FILL_IN_SHADOW;
    }
    if flags & filter_flag::NONZERO_BORDER == 0 && flags & filter_flag::FILL_IN_SHADOW == 0 {
        flags &= !filter_flag::NONZERO_SHADOW;
    }
    if (flags & filter_flag::NONZERO_BORDER != 0
        && info.a_pre_fade[0] == 0
        && info.a_pre_fade[1] == 0
        && info.fade == 0)
        || info.border_style == BorderStyle::OpaqueBox
    {
        flags |= filter_flag::FILL_IN_BORDER;
    }
    flags
}

/// Looks up (or renders) the glyph and border bitmaps for one glyph.
///
/// `first` marks the first glyph of a combined run; `offset` carries the
/// sub-quantum remainder so the whole run moves rigidly.
#[allow(clippy::too_many_arguments)]
fn get_bitmap_glyph(
    info: &mut GlyphInfo,
    state: &RenderState,
    services: &mut Services<'_>,
    rst: &mut Rasterizer,
    engine: &EngineConfig,
    leftmost_x: &mut i32,
    offset: &mut DVec2,
    first: bool,
    flags: u32,
) -> (Vec2, Vec2) {
    let mut pos = Vec2::default();
    let mut pos_o;

    let outline = match &info.outline {
        Some(o) if info.symbol != '\n' && info.symbol != '\0' && !info.skip => o.clone(),
        _ => return (pos, pos),
    };

    let m1 = calc_transform_matrix(info, state);
    let tr_scale = info.tr_scale;
    let tr_offset = info.tr_offset;
    let mut m2 = [[0.0; 3]; 3];
    for i in 0..3 {
        m2[i][0] = m1.m[i][0] * tr_scale.x;
        m2[i][1] = m1.m[i][1] * tr_scale.y;
        m2[i][2] = m1.m[i][0] * tr_offset.x + m1.m[i][1] * tr_offset.y + m1.m[i][2];
    }
    let m = Matrix3::new(m2);

    if info.effect_type == Effect::KaraokeKf {
        outline.outline[0].update_min_transformed_x(&m, leftmost_x);
    }

    let Services { caches, .. } = services;
    let key = match quantize_transform(&m, first, offset, &outline) {
        Some((p, key)) => {
            pos = p;
            key
        }
        None => return (pos, pos),
    };
    let bm = caches.bitmap.get(key, |k| construct_bitmap(engine, rst, k));
    info.bm = (!bm.is_empty()).then_some(bm);
    pos_o = pos;

    let ol_key: OutlineKey;
    let border_m: Matrix3;
    if flags & filter_flag::BORDER_STYLE_3 != 0 {
        if flags & (filter_flag::NONZERO_BORDER | filter_flag::NONZERO_SHADOW) == 0 {
            return (pos, pos_o);
        }
        ol_key = OutlineKey::OpaqueBox;

        let w = 64.0 * state.border_scale;
        let mut bord = DVec2::new(info.border_x * w, info.border_y * w);
        let mut width = info.hspacing_scaled as f64 + info.advance.x as f64;
        let mut height = (info.asc + info.desc) as f64;

        // The opaque box doubles up the scale factors, faithfully to the
        // historical renderer.
        let orig_scale = DVec2::new(
            info.scale_x * info.scale_fix,
            info.scale_y * info.scale_fix,
        );
        bord.x *= orig_scale.x;
        bord.y *= orig_scale.y;
        width *= orig_scale.x;
        height *= orig_scale.y;

        // Avoid gaps between adjacent boxes.
        bord.x = bord.x.max(64.0);
        bord.y = bord.y.max(64.0);

        let scale = DVec2::new((width + 2.0 * bord.x) / 64.0, (height + 2.0 * bord.y) / 64.0);
        let offs = DVec2::new(-bord.x, -bord.y - info.asc as f64);
        let mut mb = [[0.0; 3]; 3];
        for i in 0..3 {
            mb[i][0] = m1.m[i][0] * scale.x;
            mb[i][1] = m1.m[i][1] * scale.y;
            mb[i][2] = m1.m[i][0] * offs.x + m1.m[i][1] * offs.y + m1.m[i][2];
        }
        border_m = Matrix3::new(mb);
    } else {
        if flags & filter_flag::NONZERO_BORDER == 0 {
            return (pos, pos_o);
        }

        let w = 64.0 * state.border_scale;
        let mut bord_x = w * info.border_x / tr_scale.x;
        let mut bord_y = w * info.border_y / tr_scale.y;

        let bbox = &outline.cbox;
        // Estimated bounding box half-extents after stroking.
        let dx = (bbox.x_max as f64 - bbox.x_min as f64) / 2.0 + (bord_x + 64.0);
        let dy = (bbox.y_max as f64 - bbox.y_min as f64) / 2.0 + (bord_y + 64.0);

        // The matrix after quantization has input and output origins at
        // the bounding box center; derive the stroker precision that
        // keeps the transformed error within the positioning budget.
        let mxx = m.m[0][0].abs();
        let mxy = m.m[0][1].abs();
        let myx = m.m[1][0].abs();
        let myy = m.m[1][1].abs();
        let mzx = m.m[2][0].abs();
        let mzy = m.m[2][1].abs();

        let z0 = m.m[2][2] - mzx * dx - mzy * dy;
        let mut w = 1.0 / z0.max(m.m[2][2] / MAX_PERSP_SCALE);

        let x_lim = mxx * dx + mxy * dy;
        let y_lim = myx * dx + myy * dy;
        let rz = x_lim.max(y_lim) * w;

        w *= STROKER_PRECISION as f64 / POSITION_PRECISION;
        let (_, scale_ord_x) = frexp(w * (mxx.max(myx) + mzx * rz));
        let (_, scale_ord_y) = frexp(w * (mxy.max(myy) + mzy * rz));
        bord_x = bord_x * (scale_ord_x as f64).exp2();
        bord_y = bord_y * (scale_ord_y as f64).exp2();
        if !(bord_x < OUTLINE_MAX as f64 && bord_y < OUTLINE_MAX as f64) {
            return (pos, pos_o);
        }
        let border = Vec2::new(
            (bord_x / STROKER_PRECISION as f64).round() as i32,
            (bord_y / STROKER_PRECISION as f64).round() as i32,
        );
        if border.x == 0 && border.y == 0 {
            info.bm_o = info.bm.clone();
            return (pos, pos_o);
        }

        ol_key = OutlineKey::Border(BorderKey {
            outline: RefKey(outline.clone()),
            border,
            scale_ord_x,
            scale_ord_y,
        });
        let mut mb = [[0.0; 3]; 3];
        for i in 0..3 {
            mb[i][0] = m2[i][0] * (-scale_ord_x as f64).exp2();
            mb[i][1] = m2[i][1] * (-scale_ord_y as f64).exp2();
            mb[i][2] = m2[i][2];
        }
        border_m = Matrix3::new(mb);
    }

    let Services { caches, loader, options } = services;
    let loader = &mut **loader;
    let hinting = options.hinting;
    let border_outline = caches
        .outline
        .get(ol_key, |k| super::construct_outline(k, loader, hinting));
    if !border_outline.valid {
        return (pos, pos_o);
    }
    let key = match quantize_transform(&border_m, false, offset, &border_outline) {
        Some((p, key)) => {
            pos_o = p;
            key
        }
        None => return (pos, pos),
    };
    let bm_o = caches.bitmap.get(key, |k| construct_bitmap(engine, rst, k));
    if bm_o.is_empty() {
        pos_o = pos;
    } else {
        info.bm_o = Some(bm_o);
        if info.bm.is_none() {
            pos = pos_o;
        }
    }
    (pos, pos_o)
}

/// Converts glyphs to bitmaps and groups same-filter runs into composite
/// cache entries.
#[allow(clippy::too_many_arguments)]
pub(crate) fn render_and_combine_glyphs(
    text_info: &mut TextInfo,
    combined: &mut Vec<CombinedBitmapInfo>,
    state: &RenderState,
    services: &mut Services<'_>,
    rst: &mut Rasterizer,
    engine: &EngineConfig,
    tmp: &mut Vec<u16>,
    device_x: f64,
    device_y: f64,
    left_margin: f64,
) {
    combined.clear();
    let device_x = (device_x - left_margin) * state.font_scale_x + left_margin;
    let mut new_run = true;
    let mut offset = DVec2::default();

    for i in 0..text_info.glyphs.len() {
        let info = &mut text_info.glyphs[i];
        if info.starts_new_run {
            new_run = true;
        }
        if info.skip {
            continue;
        }
        let flags = filter_flags(info);

        if new_run {
            let mut filter = FilterDesc {
                flags,
                be: info.be,
                ..FilterDesc::default()
            };
            let mut shadow_mask = 0;
            let blur_scale = state.blur_scale * (2.0 / (256.0f64).ln().sqrt());
            filter.blur = quantize_blur(info.blur * blur_scale, &mut shadow_mask);
            if flags & filter_flag::NONZERO_SHADOW != 0 {
                let x = f64_to_d6(info.shadow_x * state.border_scale);
                let y = f64_to_d6(info.shadow_y * state.border_scale);
                filter.shadow = Vec2::new(
                    (x + (shadow_mask >> 1)) & !shadow_mask,
                    (y + (shadow_mask >> 1)) & !shadow_mask,
                );
            }
            combined.push(CombinedBitmapInfo {
                filter,
                c: info.c,
                effect_type: info.effect_type,
                effect_timing: info.effect_timing,
                leftmost_x: OUTLINE_MAX,
                bitmaps: Vec::new(),
                x: i32::MAX,
                y: i32::MAX,
                image: None,
            });
            new_run = false;
        }
        let current = combined.last_mut().expect("run was just opened");

        info.pos.x = f64_to_d6(device_x + sable_primitives::d6_to_f64(info.pos.x) * state.font_scale_x);
        info.pos.y = f64_to_d6(device_y) + info.pos.y;

        let first = current.bitmaps.is_empty();
        let (pos, pos_o) = get_bitmap_glyph(
            info,
            state,
            services,
            rst,
            engine,
            &mut current.leftmost_x,
            &mut offset,
            first,
            flags,
        );

        if info.bm.is_none() && info.bm_o.is_none() {
            continue;
        }
        current.bitmaps.push(BitmapRef {
            bm: info.bm.take().map(RefKey),
            bm_o: info.bm_o.take().map(RefKey),
            pos,
            pos_o,
        });
        current.x = current.x.min(pos.x);
        current.y = current.y.min(pos.y);
    }

    for info in combined.iter_mut() {
        if info.bitmaps.is_empty() {
            continue;
        }

        if info.effect_type == Effect::KaraokeKf {
            info.effect_timing = (sable_primitives::d6_to_f64(info.leftmost_x)
                + sable_primitives::d6_to_f64(info.effect_timing) * state.font_scale_x)
                .round() as i32;
        }

        for bref in &mut info.bitmaps {
            bref.pos.x -= info.x;
            bref.pos.y -= info.y;
            bref.pos_o.x -= info.x;
            bref.pos_o.y -= info.y;
        }

        let key = CompositeKey {
            filter: info.filter,
            bitmaps: info.bitmaps.clone(),
        };
        let entry = services
            .caches
            .composite
            .get(key, |k| construct_composite(engine, k, tmp));
        info.image = Some(entry);
    }
}

fn rectangle_combine(rect: &mut Rect, bm: &Bitmap, pos: Vec2) {
    let x = pos.x + bm.left;
    let y = pos.y + bm.top;
    rect.update(x, y, x + bm.w as i32, y + bm.h as i32);
}

/// Applies box blur passes and the Gaussian cascade to one bitmap.
fn synth_blur(engine: &EngineConfig, bm: &mut Bitmap, be: i32, r2: f64, tmp: &mut Vec<u16>) {
    if bm.is_empty() {
        return;
    }
    for _ in 0..be {
        be_blur(bm, tmp);
    }
    if r2 > 0.001 {
        gaussian_blur(engine, bm, r2, r2);
    }
}

/// Cache constructor for one composite: merge, blur, and derive the
/// shadow.
pub(crate) fn construct_composite(
    engine: &EngineConfig,
    k: &CompositeKey,
    tmp: &mut Vec<u16>,
) -> (CompositeEntry, usize) {
    let mut v = CompositeEntry::default();

    let mut rect = Rect::reset();
    let mut rect_o = Rect::reset();
    let mut n_bm = 0;
    let mut n_bm_o = 0;
    let mut last: Option<&BitmapRef> = None;
    let mut last_o: Option<&BitmapRef> = None;
    for bref in &k.bitmaps {
        if let Some(bm) = &bref.bm {
            rectangle_combine(&mut rect, &bm.0, bref.pos);
            last = Some(bref);
            n_bm += 1;
        }
        if let Some(bm) = &bref.bm_o {
            rectangle_combine(&mut rect_o, &bm.0, bref.pos_o);
            last_o = Some(bref);
            n_bm_o += 1;
        }
    }

    let bord = be_padding(k.filter.be);
    let merge = |rect: &Rect, n: usize, last: Option<&BitmapRef>, outline: bool| -> Option<Bitmap> {
        if n == 0 {
            return None;
        }
        if bord == 0 && n == 1 {
            let bref = last?;
            let (src, pos) = if outline {
                (bref.bm_o.as_ref()?, bref.pos_o)
            } else {
                (bref.bm.as_ref()?, bref.pos)
            };
            let mut bm = (*src.0).clone();
            bm.left += pos.x;
            bm.top += pos.y;
            return Some(bm);
        }
        let w = (rect.x_max - rect.x_min + 2 * bord) as usize;
        let h = (rect.y_max - rect.y_min + 2 * bord) as usize;
        let mut dst = Bitmap::new(engine, w, h);
        dst.left = rect.x_min - bord;
        dst.top = rect.y_min - bord;
        for bref in &k.bitmaps {
            let (src, pos) = if outline {
                match &bref.bm_o {
                    Some(s) => (&s.0, bref.pos_o),
                    None => continue,
                }
            } else {
                match &bref.bm {
                    Some(s) => (&s.0, bref.pos),
                    None => continue,
                }
            };
            let x = (pos.x + src.left - dst.left) as usize;
            let y = (pos.y + src.top - dst.top) as usize;
            let (dst_stride, src_stride) = (dst.stride, src.stride);
            let offset = y * dst_stride + x;
            add_bitmaps(
                dst.buffer_mut(),
                offset,
                dst_stride,
                src.buffer(),
                0,
                src_stride,
                src.w,
                src.h,
            );
        }
        Some(dst)
    };

    v.bm = merge(&rect, n_bm, last, false);
    v.bm_o = merge(&rect_o, n_bm_o, last_o, true);

    let flags = k.filter.flags;
    let r2 = restore_blur(k.filter.blur);
    if flags & filter_flag::NONZERO_BORDER == 0 || flags & filter_flag::BORDER_STYLE_3 != 0 {
        if let Some(bm) = &mut v.bm {
            synth_blur(engine, bm, k.filter.be, r2, tmp);
        }
    }
    if let Some(bm_o) = &mut v.bm_o {
        synth_blur(engine, bm_o, k.filter.be, r2, tmp);
    }

    if flags & filter_flag::FILL_IN_BORDER == 0 && flags & filter_flag::FILL_IN_SHADOW == 0 {
        if let (Some(bm), Some(bm_o)) = (&v.bm, &mut v.bm_o) {
            fix_outline(bm, bm_o);
        }
    }

    if flags & filter_flag::NONZERO_SHADOW != 0 {
        if flags & filter_flag::NONZERO_BORDER != 0 {
            v.bm_s = v.bm_o.clone();
            if flags & filter_flag::FILL_IN_BORDER != 0 && flags & filter_flag::FILL_IN_SHADOW == 0
            {
                if let (Some(bm), Some(bm_s)) = (&v.bm, &mut v.bm_s) {
                    fix_outline(bm, bm_s);
                }
            }
        } else if flags & filter_flag::BORDER_STYLE_3 != 0 {
            v.bm_s = v.bm_o.take();
        } else {
            v.bm_s = v.bm.clone();
        }

        if let Some(bm_s) = &mut v.bm_s {
            // Rounding toward negative infinity keeps negative offsets
            // consistent with the sub-pixel remainder.
            bm_s.left += k.filter.shadow.x >> 6;
            bm_s.top += k.filter.shadow.y >> 6;
            shift_bitmap(
                bm_s,
                k.filter.shadow.x & SUBPIXEL_MASK,
                k.filter.shadow.y & SUBPIXEL_MASK,
                tmp,
            );
        }
    }

    if flags & filter_flag::FILL_IN_SHADOW != 0 && flags & filter_flag::FILL_IN_BORDER == 0 {
        if let (Some(bm), Some(bm_o)) = (&v.bm, &mut v.bm_o) {
            fix_outline(bm, bm_o);
        }
    }

    let size = v.heap_size() + core::mem::size_of::<CompositeKey>();
    (v, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blur_quantization_monotonic_and_reversible() {
        let mut mask = 0;
        let q1 = quantize_blur(1.0, &mut mask);
        let q2 = quantize_blur(2.0, &mut mask);
        let q10 = quantize_blur(10.0, &mut mask);
        assert!(q1 < q2 && q2 < q10);
        // Neighboring radii alias to the same index.
        let mut m2 = 0;
        assert_eq!(quantize_blur(10.0, &mut mask), quantize_blur(10.001, &mut m2));
        // Restore is within one quantization step.
        let r2 = restore_blur(q10);
        let back = r2.sqrt() / 64.0 * (POSITION_PRECISION / BLUR_PRECISION) / 64.0;
        // The reconstruction is the pre-scale sigma; just check magnitude.
        assert!(r2 > 0.0 && back.is_finite());
    }

    #[test]
    fn identity_matrix_for_plain_glyph() {
        let state = RenderState {
            blur_scale: 1.0,
            font_scale_x: 1.0,
            ..RenderState::default()
        };
        let info = GlyphInfo {
            scale_x: 1.0,
            scale_y: 1.0,
            pos: sable_primitives::Vec2::new(640, 320),
            ..GlyphInfo::default()
        };
        let m = calc_transform_matrix(&info, &state);
        // No rotation: the matrix is affine with uniform depth.
        assert_eq!(m.m[2][0], 0.0);
        assert_eq!(m.m[2][1], 0.0);
        let p = m.apply(sable_primitives::DVec2::new(0.0, 0.0));
        assert!((p.x - 640.0).abs() < 1e-6);
        assert!((p.y - 320.0).abs() < 1e-6);
    }

    #[test]
    fn rotation_grows_extent() {
        let state = RenderState {
            blur_scale: 1.0,
            font_scale_x: 1.0,
            ..RenderState::default()
        };
        let info = GlyphInfo {
            scale_x: 1.0,
            scale_y: 1.0,
            frz: 45.0,
            ..GlyphInfo::default()
        };
        let m = calc_transform_matrix(&info, &state);
        let p0 = m.apply(sable_primitives::DVec2::new(0.0, 0.0));
        let px = m.apply(sable_primitives::DVec2::new(1000.0, 0.0));
        // A z-rotation by 45° sends the x axis to a diagonal.
        let dx = px.x - p0.x;
        let dy = px.y - p0.y;
        assert!((dx.abs() - dy.abs()).abs() < 1.0, "{dx} {dy}");
    }
}
