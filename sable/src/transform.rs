// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Quantized outline transforms and bitmap construction.
//!
//! Transforms that are close enough should hit the same bitmap cache
//! entry, so matrices are quantized with per-axis step sizes derived from
//! the outline's bounding box such that the worst-case per-pixel position
//! error stays below [`POSITION_PRECISION`]. A companion restore function
//! reconstructs an exemplar matrix from the quantized key for lazy
//! construction inside the cache.

use crate::bitmap::{Bitmap, EngineConfig};
use crate::cache::{BitmapKey, OutlineEntry, RefKey};
use crate::outline::Outline;
use crate::raster::Rasterizer;
use sable_primitives::{DVec2, Matrix3, Vec2};
use std::rc::Rc;

/// Rough estimate of tolerable transform error, in 1/64 pixel units.
pub(crate) const POSITION_PRECISION: f64 = 8.0;
/// Perspective guard: minimal allowed z relative to the center z.
pub(crate) const MAX_PERSP_SCALE: f64 = 16.0;
/// Sub-pixel position bits kept in bitmap keys.
pub(crate) const SUBPIXEL_ORDER: i32 = 3;

const MAX_VAL: f64 = 1_000_000.0;

/// Quantizes `m` against the outline's bounding box.
///
/// On success returns the integer pixel position and the bitmap cache key.
/// `offset` carries the sub-quantum positioning remainder across the
/// glyphs of one combined run: the first glyph writes it, later glyphs
/// subtract it so the whole run moves rigidly.
///
/// Fails when the transform degenerates (non-positive z over the bounding
/// box) or overflows the quantization range; the caller skips the glyph.
pub(crate) fn quantize_transform(
    m: &Matrix3,
    first: bool,
    offset: &mut DVec2,
    outline: &Rc<OutlineEntry>,
) -> Option<(Vec2, BitmapKey)> {
    let bbox = &outline.cbox;
    let x0 = (bbox.x_min as f64 + bbox.x_max as f64) / 2.0;
    let y0 = (bbox.y_min as f64 + bbox.y_max as f64) / 2.0;
    let dx = (bbox.x_max as f64 - bbox.x_min as f64) / 2.0 + 64.0;
    let dy = (bbox.y_max as f64 - bbox.y_min as f64) / 2.0 + 64.0;

    // Move the input origin to the bounding box center, so that afterwards
    // x ∈ [-dx, dx], y ∈ [-dy, dy].
    let mut m = m.m;
    for row in &mut m {
        row[2] += row[0] * x0 + row[1] * y0;
    }
    if m[2][2] <= 0.0 {
        return None;
    }

    // Transformed center of the bounding box becomes the output origin.
    let w = 1.0 / m[2][2];
    let mut center = [m[0][2] * w, m[1][2] * w];
    for i in 0..2 {
        for j in 0..2 {
            m[i][j] -= m[2][j] * center[i];
        }
    }

    let delta = if first {
        [0.0, 0.0]
    } else {
        [offset.x, offset.y]
    };

    let mut qr = [0i32; 2];
    for i in 0..2 {
        center[i] /= (64 >> SUBPIXEL_ORDER) as f64;
        center[i] -= delta[i];
        if !(center[i].abs() < MAX_VAL) {
            return None;
        }
        qr[i] = center[i].round() as i32;
    }

    // Minimal bounding box z, clamped to mitigate small-z blowup.
    let z0 = m[2][2] - m[2][0].abs() * dx - m[2][1].abs() * dy;
    let w = 1.0 / POSITION_PRECISION / z0.max(m[2][2] / MAX_PERSP_SCALE);
    let mut mul = [dx * w, dy * w]; // 1 / q_x, 1 / q_y

    let mut qm = [[0i32; 2]; 3];
    for i in 0..2 {
        for j in 0..2 {
            let val = m[i][j] * mul[j];
            if !(val.abs() < MAX_VAL) {
                return None;
            }
            qm[i][j] = val.round() as i32;
        }
    }

    // The perspective row tolerates an error inversely proportional to the
    // largest projected extent.
    let qmx = qm[0][0].abs() + qm[0][1].abs();
    let qmy = qm[1][0].abs() + qm[1][1].abs();
    let w = POSITION_PRECISION * qmx.max(qmy) as f64;
    mul[0] *= w;
    mul[1] *= w;

    for j in 0..2 {
        let val = m[2][j] * mul[j];
        if !(val.abs() < MAX_VAL) {
            return None;
        }
        qm[2][j] = val.round() as i32;
    }

    if first {
        offset.x = center[0] - qr[0] as f64;
        offset.y = center[1] - qr[1] as f64;
    }
    let pos = Vec2::new(qr[0] >> SUBPIXEL_ORDER, qr[1] >> SUBPIXEL_ORDER);
    let sub_mask = (1 << SUBPIXEL_ORDER) - 1;
    let key = BitmapKey {
        outline: RefKey(outline.clone()),
        matrix_x: Vec2::new(qm[0][0], qm[0][1]),
        matrix_y: Vec2::new(qm[1][0], qm[1][1]),
        matrix_z: Vec2::new(qm[2][0], qm[2][1]),
        offset: Vec2::new(qr[0] & sub_mask, qr[1] & sub_mask),
    };
    Some((pos, key))
}

/// Reconstructs an exemplar matrix producing the bitmap for `key`.
pub(crate) fn restore_transform(key: &BitmapKey) -> Matrix3 {
    let bbox = &key.outline.0.cbox;
    let x0 = (bbox.x_min as f64 + bbox.x_max as f64) / 2.0;
    let y0 = (bbox.y_min as f64 + bbox.y_max as f64) / 2.0;
    let dx = (bbox.x_max as f64 - bbox.x_min as f64) / 2.0 + 64.0;
    let dy = (bbox.y_max as f64 - bbox.y_min as f64) / 2.0 + 64.0;

    // The scale is arbitrary; pick it so that z0 = 1.
    let q_x = POSITION_PRECISION / dx;
    let q_y = POSITION_PRECISION / dy;
    let mut m = [[0.0f64; 3]; 3];
    m[0][0] = key.matrix_x.x as f64 * q_x;
    m[0][1] = key.matrix_x.y as f64 * q_y;
    m[1][0] = key.matrix_y.x as f64 * q_x;
    m[1][1] = key.matrix_y.y as f64 * q_y;

    let qmx = key.matrix_x.x.abs() + key.matrix_x.y.abs();
    let qmy = key.matrix_y.x.abs() + key.matrix_y.y.abs();
    let scale_z = 1.0 / POSITION_PRECISION / qmx.max(qmy).max(1) as f64;
    m[2][0] = key.matrix_z.x as f64 * q_x * scale_z;
    m[2][1] = key.matrix_z.y as f64 * q_y * scale_z;

    m[2][2] = 1.0 + m[2][0].abs() * dx + m[2][1].abs() * dy;
    m[2][2] = m[2][2].min(MAX_PERSP_SCALE);

    let center = [
        (key.offset.x * (64 >> SUBPIXEL_ORDER)) as f64,
        (key.offset.y * (64 >> SUBPIXEL_ORDER)) as f64,
    ];
    for i in 0..2 {
        for j in 0..3 {
            m[i][j] += m[2][j] * center[i];
        }
    }
    for row in &mut m {
        row[2] -= row[0] * x0 + row[1] * y0;
    }
    Matrix3::new(m)
}

/// Rasterizes an outline pair into a tile-aligned bitmap positioned at the
/// pair's pixel bounding box.
pub(crate) fn outline_to_bitmap(
    engine: &EngineConfig,
    rst: &mut Rasterizer,
    outline: &Outline,
    border: Option<&Outline>,
) -> Option<Bitmap> {
    if !rst.set_outline(outline, border) {
        return None;
    }
    let (x_lo, y_lo, x_hi, y_hi) = rst.bounds();
    let x_min = x_lo >> 6;
    let y_min = y_lo >> 6;
    let x_max = (x_hi + 63) >> 6;
    let y_max = (y_hi + 63) >> 6;
    let w = x_max - x_min;
    let h = y_max - y_min;
    if w <= 0 || h <= 0 || w as i64 * h as i64 > 8_000_000 {
        log::warn!("glyph bounding box too large: {w}x{h}px");
        return None;
    }

    let mask = (1i32 << rst.tile_order()) - 1;
    let tile_w = (w + mask) & !mask;
    let tile_h = (h + mask) & !mask;
    let mut bm = Bitmap::new(engine, tile_w as usize, tile_h as usize);
    bm.left = x_min;
    bm.top = y_min;
    let stride = bm.stride;
    if !rst.fill(bm.buffer_mut(), x_min, y_min, tile_w, tile_h, stride) {
        return None;
    }
    // Rasterization is tile-aligned; the bitmap itself reports the tight
    // bounds, with the overshoot living in the stride padding.
    bm.w = w as usize;
    bm.h = h as usize;
    Some(bm)
}

/// Cache constructor for one quantized-transform bitmap.
pub(crate) fn construct_bitmap(
    engine: &EngineConfig,
    rst: &mut Rasterizer,
    key: &BitmapKey,
) -> (Bitmap, usize) {
    let m = restore_transform(key);
    let entry = &key.outline.0;
    let transformed: Option<[Outline; 2]> = if key.matrix_z.x != 0 || key.matrix_z.y != 0 {
        entry.outline[0]
            .transform_3d(&m)
            .and_then(|a| entry.outline[1].transform_3d(&m).map(|b| [a, b]))
    } else {
        let m2 = [m.m[0], m.m[1]];
        entry.outline[0]
            .transform_2d(&m2)
            .and_then(|a| entry.outline[1].transform_2d(&m2).map(|b| [a, b]))
    };
    let bm = transformed.and_then(|pair| {
        let border = if pair[1].is_empty() {
            None
        } else {
            Some(&pair[1])
        };
        outline_to_bitmap(engine, rst, &pair[0], border)
    });
    match bm {
        Some(bm) => {
            let size = core::mem::size_of::<Bitmap>() + bm.size();
            (bm, size)
        }
        None => (Bitmap::default(), core::mem::size_of::<Bitmap>()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_primitives::Rect;

    fn square_entry(px: i32) -> Rc<OutlineEntry> {
        let mut outline = Outline::new();
        outline.add_rect(0, 0, px * 64, px * 64);
        let cbox = outline.cbox();
        Rc::new(OutlineEntry {
            valid: true,
            outline: [outline, Outline::new()],
            cbox,
            advance: px * 64,
            asc: px * 64,
            desc: 0,
        })
    }

    #[test]
    fn identical_transforms_share_keys() {
        let entry = square_entry(20);
        let m = Matrix3::new([[1.0, 0.0, 640.0], [0.0, 1.0, 320.0], [0.0, 0.0, 1.0]]);
        let mut offset = DVec2::default();
        let (pos1, key1) = quantize_transform(&m, true, &mut offset, &entry).unwrap();
        let mut offset2 = DVec2::default();
        let (pos2, key2) = quantize_transform(&m, true, &mut offset2, &entry).unwrap();
        assert_eq!(pos1, pos2);
        assert_eq!(key1, key2);
    }

    #[test]
    fn nearby_transforms_alias() {
        // A translation difference far below the quantization step must
        // produce the same key and position remainder handling.
        let entry = square_entry(20);
        let m1 = Matrix3::new([[1.0, 0.0, 640.0], [0.0, 1.0, 320.0], [0.0, 0.0, 1.0]]);
        let eps = 0.004;
        let m2 = Matrix3::new([
            [1.0 + eps / 4096.0, 0.0, 640.0],
            [0.0, 1.0, 320.0],
            [0.0, 0.0, 1.0],
        ]);
        let mut o1 = DVec2::default();
        let mut o2 = DVec2::default();
        let (_, key1) = quantize_transform(&m1, true, &mut o1, &entry).unwrap();
        let (_, key2) = quantize_transform(&m2, true, &mut o2, &entry).unwrap();
        assert_eq!(key1.matrix_x, key2.matrix_x);
        assert_eq!(key1.matrix_y, key2.matrix_y);
    }

    #[test]
    fn perspective_guard_rejects_close_glyphs() {
        let entry = square_entry(20);
        // Strong perspective row: z goes non-positive over the bbox.
        let m = Matrix3::new([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.01, 0.0, 1.0]]);
        let mut offset = DVec2::default();
        assert!(quantize_transform(&m, true, &mut offset, &entry).is_none());
    }

    #[test]
    fn restore_projects_within_precision() {
        let entry = square_entry(16);
        let m = Matrix3::new([[1.5, 0.0, 128.0], [0.2, 0.8, -64.0], [0.0, 0.0, 1.0]]);
        let mut offset = DVec2::default();
        let (pos, key) = quantize_transform(&m, true, &mut offset, &entry).unwrap();
        let r = restore_transform(&key);
        // The restored matrix, shifted by the integer position, must map
        // bbox corners within a couple of POSITION_PRECISION steps of the
        // exact projection.
        for corner in [
            DVec2::new(0.0, 0.0),
            DVec2::new(16.0 * 64.0, 0.0),
            DVec2::new(0.0, 16.0 * 64.0),
            DVec2::new(16.0 * 64.0, 16.0 * 64.0),
        ] {
            let exact = m.apply(corner);
            let approx = r.apply(corner);
            let dx = approx.x + (pos.x * 64) as f64 - exact.x;
            let dy = approx.y + (pos.y * 64) as f64 - exact.y;
            let tol = 4.0 * POSITION_PRECISION;
            assert!(dx.abs() < tol && dy.abs() < tol, "({dx}, {dy})");
        }
    }

    #[test]
    fn construct_bitmap_rasterizes_square() {
        let engine = EngineConfig::new();
        let mut rst = Rasterizer::new(engine.tile_order, 16);
        let entry = square_entry(12);
        let m = Matrix3::IDENTITY;
        let mut offset = DVec2::default();
        let (_pos, key) = quantize_transform(&m, true, &mut offset, &entry).unwrap();
        let (bm, size) = construct_bitmap(&engine, &mut rst, &key);
        assert!(!bm.is_empty());
        assert!(size > 12 * 12);
        // Interior fully covered.
        let c = bm.buffer()[(6 - bm.top) as usize * bm.stride + (6 - bm.left) as usize];
        assert_eq!(c, 255);
    }

    #[test]
    fn empty_cbox_is_safe() {
        let entry = Rc::new(OutlineEntry {
            valid: true,
            cbox: Rect::new(0, 0, 0, 0),
            ..OutlineEntry::default()
        });
        let mut offset = DVec2::default();
        let m = Matrix3::IDENTITY;
        assert!(quantize_transform(&m, true, &mut offset, &entry).is_some());
    }
}
