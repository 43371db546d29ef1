// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Output image emission.
//!
//! Walks the combined runs and appends positioned, colored images in
//! compositing order (shadow, then border, then glyph), splitting glyphs
//! at the karaoke boundary and applying rectangular and vector clips.
//! Image pixel storage is shared with the composite cache; owned buffers
//! appear only where a clip produced new pixels.

use super::combine::CombinedBitmapInfo;
use super::state::{Effect, RenderState};
use super::Services;
use crate::bitmap::{imul_bitmaps, mul_bitmaps, EngineConfig};
use crate::cache::{CompositeEntry, DrawingKey, OutlineKey};
use crate::raster::Rasterizer;
use crate::style::Rgba;
use crate::transform::quantize_transform;
use sable_primitives::{DVec2, Matrix3};
use std::rc::Rc;

/// Which plane of a composite an image references.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum Plane {
    Fill,
    Border,
    Shadow,
}

#[derive(Clone, Debug)]
pub(crate) enum PixelSource {
    /// Pixels borrowed from a composite cache entry.
    Composite { entry: Rc<CompositeEntry>, plane: Plane },
    /// Pixels owned by this frame (clip results, background bands).
    Owned(Rc<Vec<u8>>),
}

/// The kind of an output image.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ImageKind {
    /// A shadow image.
    Shadow,
    /// A border (outline or opaque box) image.
    Outline,
    /// A glyph fill image.
    Character,
}

/// One positioned, colored alpha bitmap of the output list.
#[derive(Clone, Debug)]
pub struct Image {
    pub(crate) source: PixelSource,
    pub(crate) offset: usize,
    pub(crate) w: usize,
    pub(crate) h: usize,
    pub(crate) stride: usize,
    pub(crate) dst_x: i32,
    pub(crate) dst_y: i32,
    pub(crate) color: Rgba,
    pub(crate) kind: ImageKind,
}

impl Image {
    pub fn width(&self) -> usize {
        self.w
    }

    pub fn height(&self) -> usize {
        self.h
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn dst_x(&self) -> i32 {
        self.dst_x
    }

    pub fn dst_y(&self) -> i32 {
        self.dst_y
    }

    /// Packed RGBA color; alpha 0 means opaque.
    pub fn color(&self) -> Rgba {
        self.color
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    /// The 8-bit coverage pixels: `height` rows of `width` bytes each,
    /// `stride` apart.
    pub fn bitmap(&self) -> &[u8] {
        if self.w == 0 || self.h == 0 {
            return &[];
        }
        let len = self.stride * (self.h - 1) + self.w;
        let buf = match &self.source {
            PixelSource::Composite { entry, plane } => {
                let bm = match plane {
                    Plane::Fill => entry.bm.as_ref(),
                    Plane::Border => entry.bm_o.as_ref(),
                    Plane::Shadow => entry.bm_s.as_ref(),
                };
                bm.map(|b| b.buffer()).unwrap_or(&[])
            }
            PixelSource::Owned(buf) => buf.as_slice(),
        };
        &buf[self.offset..self.offset + len]
    }
}

/// Device-space clipping context for one event.
#[derive(Copy, Clone, Debug)]
pub(crate) struct RenderClip {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
    /// Rectangular clip is inverse.
    pub inverse: bool,
    pub frame_w: i32,
    pub frame_h: i32,
    /// Screen bounds for the inverse-clip rectangles.
    pub screen_x0: i32,
    pub screen_y0: i32,
    pub screen_x1: i32,
    pub screen_y1: i32,
}

struct PlaneView<'a> {
    entry: &'a Rc<CompositeEntry>,
    plane: Plane,
    w: i32,
    h: i32,
    stride: usize,
    left: i32,
    top: i32,
}

fn plane_view<'a>(entry: &'a Rc<CompositeEntry>, plane: Plane) -> Option<PlaneView<'a>> {
    let bm = match plane {
        Plane::Fill => entry.bm.as_ref(),
        Plane::Border => entry.bm_o.as_ref(),
        Plane::Shadow => entry.bm_s.as_ref(),
    }?;
    if bm.is_empty() {
        return None;
    }
    Some(PlaneView {
        entry,
        plane,
        w: bm.w as i32,
        h: bm.h as i32,
        stride: bm.stride,
        left: bm.left,
        top: bm.top,
    })
}

fn push_image(
    images: &mut Vec<Image>,
    view: &PlaneView<'_>,
    x0: i32,
    y0: i32,
    w: i32,
    h: i32,
    dst_x: i32,
    dst_y: i32,
    color: Rgba,
    kind: ImageKind,
) {
    if w <= 0 || h <= 0 {
        return;
    }
    images.push(Image {
        source: PixelSource::Composite {
            entry: view.entry.clone(),
            plane: view.plane,
        },
        offset: y0 as usize * view.stride + x0 as usize,
        w: w as usize,
        h: h as usize,
        stride: view.stride,
        dst_x,
        dst_y,
        color,
        kind,
    });
}

/// Emits one composite plane, clipped to the rectangular clip and split at
/// `brk` for karaoke (`color` left of the break, `color2` right of it).
#[allow(clippy::too_many_arguments)]
fn render_glyph(
    images: &mut Vec<Image>,
    clip: &RenderClip,
    view: &PlaneView<'_>,
    dst_x: i32,
    dst_y: i32,
    color: Rgba,
    color2: Rgba,
    brk: i32,
    kind: ImageKind,
) {
    if clip.inverse {
        render_glyph_inverse(images, clip, view, dst_x, dst_y, color, color2, brk, kind);
        return;
    }

    let dst_x = dst_x + view.left;
    let dst_y = dst_y + view.top;
    let mut brk = brk - dst_x;

    let clip_x0 = clip.x0.clamp(0, clip.frame_w);
    let clip_y0 = clip.y0.clamp(0, clip.frame_h);
    let clip_x1 = clip.x1.clamp(0, clip.frame_w);
    let clip_y1 = clip.y1.clamp(0, clip.frame_h);

    let mut b_x0 = 0;
    let mut b_y0 = 0;
    let mut b_x1 = view.w;
    let mut b_y1 = view.h;

    if dst_x < clip_x0 {
        b_x0 = clip_x0 - dst_x;
    }
    if dst_y < clip_y0 {
        b_y0 = clip_y0 - dst_y;
    }
    if clip_x1 - dst_x - view.w < 0 {
        b_x1 = clip_x1 - dst_x;
    }
    if clip_y1 - dst_y - view.h < 0 {
        b_y1 = clip_y1 - dst_y;
    }

    if b_y0 >= b_y1 || b_x0 >= b_x1 {
        return;
    }

    if brk > b_x0 {
        // Left part.
        let w = brk.min(b_x1) - b_x0;
        push_image(
            images, view, b_x0, b_y0, w, b_y1 - b_y0, dst_x + b_x0, dst_y + b_y0, color, kind,
        );
    }
    if brk < b_x1 {
        // Right part.
        if brk < b_x0 {
            brk = b_x0;
        }
        push_image(
            images,
            view,
            brk,
            b_y0,
            b_x1 - brk,
            b_y1 - b_y0,
            dst_x + brk,
            dst_y + b_y0,
            color2,
            kind,
        );
    }
}

/// Inverse rectangular clip: the visible area decomposes into up to four
/// rectangles around the clip hole, each split again at the karaoke
/// boundary.
#[allow(clippy::too_many_arguments)]
fn render_glyph_inverse(
    images: &mut Vec<Image>,
    clip: &RenderClip,
    view: &PlaneView<'_>,
    dst_x: i32,
    dst_y: i32,
    color: Rgba,
    color2: Rgba,
    brk: i32,
    kind: ImageKind,
) {
    let dst_x = dst_x + view.left;
    let dst_y = dst_y + view.top;
    let brk = brk - dst_x;

    let (x0, y0, x1, y1) = (0, 0, view.w, view.h);
    let cx0 = clip.x0 - dst_x;
    let cy0 = clip.y0 - dst_y;
    let cx1 = clip.x1 - dst_x;
    let cy1 = clip.y1 - dst_y;

    let mut rects: Vec<(i32, i32, i32, i32)> = Vec::with_capacity(4);
    let mut push = |rx0: i32, ry0: i32, rx1: i32, ry1: i32| {
        if rx1 > rx0 && ry1 > ry0 {
            rects.push((rx0, ry0, rx1, ry1));
        }
    };
    push(x0, y0, cx0.min(x1), y1);
    push(cx0.max(x0), y0, cx1.min(x1), cy0.min(y1));
    push(cx0.max(x0), cy1.max(y0), cx1.min(x1), y1);
    push(cx1.max(x0), y0, x1, y1);

    for (mut rx0, mut ry0, mut rx1, mut ry1) in rects {
        // Clip each rectangle against the screen area.
        if rx0 + dst_x < clip.screen_x0 {
            rx0 = clip.screen_x0 - dst_x;
        }
        if ry0 + dst_y < clip.screen_y0 {
            ry0 = clip.screen_y0 - dst_y;
        }
        if rx1 + dst_x > clip.screen_x1 {
            rx1 = clip.screen_x1 - dst_x;
        }
        if ry1 + dst_y > clip.screen_y1 {
            ry1 = clip.screen_y1 - dst_y;
        }
        if rx1 <= rx0 || ry1 <= ry0 {
            continue;
        }
        let mut lbrk = brk;
        if lbrk > rx0 {
            let w = lbrk.min(rx1) - rx0;
            push_image(
                images, view, rx0, ry0, w, ry1 - ry0, dst_x + rx0, dst_y + ry0, color, kind,
            );
        }
        if lbrk < rx1 {
            if lbrk < rx0 {
                lbrk = rx0;
            }
            push_image(
                images,
                view,
                lbrk,
                ry0,
                rx1 - lbrk,
                ry1 - ry0,
                dst_x + lbrk,
                dst_y + ry0,
                color2,
                kind,
            );
        }
    }
}

/// Converts the combined runs into the output image list, in the order
/// shadow, border, glyph. `\kf` splits the glyph at the sweep boundary;
/// `\ko` hides the border until the word starts.
pub(crate) fn render_text(
    combined: &[CombinedBitmapInfo],
    clip: &RenderClip,
    skip_shadow: bool,
) -> Vec<Image> {
    let mut images = Vec::new();
    const NO_BREAK: i32 = 1_000_000;

    for info in combined {
        if skip_shadow {
            break;
        }
        let Some(image) = &info.image else { continue };
        let Some(view) = plane_view(image, Plane::Shadow) else {
            continue;
        };
        render_glyph(
            &mut images,
            clip,
            &view,
            info.x,
            info.y,
            info.c[3],
            Rgba(0),
            NO_BREAK,
            ImageKind::Shadow,
        );
    }

    for info in combined {
        let Some(image) = &info.image else { continue };
        let Some(view) = plane_view(image, Plane::Border) else {
            continue;
        };
        if info.effect_type == Effect::KaraokeKo && info.effect_timing <= 0 {
            continue;
        }
        render_glyph(
            &mut images,
            clip,
            &view,
            info.x,
            info.y,
            info.c[2],
            Rgba(0),
            NO_BREAK,
            ImageKind::Outline,
        );
    }

    for info in combined {
        let Some(image) = &info.image else { continue };
        let Some(view) = plane_view(image, Plane::Fill) else {
            continue;
        };
        match info.effect_type {
            Effect::Karaoke | Effect::KaraokeKo => {
                let color = if info.effect_timing > 0 {
                    info.c[0]
                } else {
                    info.c[1]
                };
                render_glyph(
                    &mut images,
                    clip,
                    &view,
                    info.x,
                    info.y,
                    color,
                    Rgba(0),
                    NO_BREAK,
                    ImageKind::Character,
                );
            }
            Effect::KaraokeKf => {
                render_glyph(
                    &mut images,
                    clip,
                    &view,
                    info.x,
                    info.y,
                    info.c[0],
                    info.c[1],
                    info.effect_timing,
                    ImageKind::Character,
                );
            }
            Effect::None => {
                render_glyph(
                    &mut images,
                    clip,
                    &view,
                    info.x,
                    info.y,
                    info.c[0],
                    Rgba(0),
                    NO_BREAK,
                    ImageKind::Character,
                );
            }
        }
    }

    images
}

/// Blends every emitted image against the rasterized vector clip drawing,
/// multiplicatively (or inverse-multiplicatively for `\iclip`).
pub(crate) fn blend_vector_clip(
    images: &mut [Image],
    state: &RenderState,
    services: &mut Services<'_>,
    rst: &mut Rasterizer,
    engine: &EngineConfig,
    left_margin: f64,
    top_margin: f64,
) {
    let Some(text) = state.clip_drawing_text.clone() else {
        return;
    };

    let w = state.font_scale / (1i64 << (state.clip_drawing_scale - 1).clamp(0, 62)) as f64;
    let m = Matrix3::new([
        [state.font_scale_x * w, 0.0, left_margin * 64.0],
        [0.0, w, top_margin * 64.0],
        [0.0, 0.0, 1.0],
    ]);

    let Services { caches, loader, options } = services;
    let loader = &mut **loader;
    let hinting = options.hinting;
    // A clip drawing that parses to nothing clips everything away in
    // regular mode and nothing in inverse mode.
    let silence = |images: &mut [Image]| {
        for cur in images.iter_mut() {
            cur.w = 0;
            cur.h = 0;
            cur.stride = 0;
            cur.source = PixelSource::Owned(Rc::new(Vec::new()));
            cur.offset = 0;
        }
    };

    let ol_key = OutlineKey::Drawing(DrawingKey { text });
    let outline = caches
        .outline
        .get(ol_key, |k| super::construct_outline(k, loader, hinting));
    if !outline.valid {
        if !state.clip_drawing_mode {
            silence(images);
        }
        return;
    }

    let mut offset = DVec2::default();
    let Some((pos, key)) = quantize_transform(&m, true, &mut offset, &outline) else {
        return;
    };
    let clip_bm = caches
        .bitmap
        .get(key, |k| crate::transform::construct_bitmap(engine, rst, k));
    if clip_bm.is_empty() {
        if !state.clip_drawing_mode {
            silence(images);
        }
        return;
    }

    let bx = pos.x + clip_bm.left;
    let by = pos.y + clip_bm.top;
    let bw = clip_bm.w as i32;
    let bh = clip_bm.h as i32;
    let bs = clip_bm.stride;

    for cur in images.iter_mut() {
        let ax = cur.dst_x;
        let ay = cur.dst_y;
        let aw = cur.w as i32;
        let ah = cur.h as i32;
        let astride = cur.stride;

        let left = ax.max(bx);
        let top = ay.max(by);
        let right = (ax + aw).min(bx + bw);
        let bottom = (ay + ah).min(by + bh);
        let aleft = (left - ax).max(0) as usize;
        let atop = (top - ay).max(0) as usize;
        let w = right - left;
        let h = bottom - top;
        let bleft = (left - bx).max(0) as usize;
        let btop = (top - by).max(0) as usize;
        let no_overlap = ax + aw < bx || ay + ah < by || ax > bx + bw || ay > by + bh
            || w <= 0
            || h <= 0;

        if state.clip_drawing_mode {
            // Inverse clip: zero out the covered region.
            if no_overlap {
                continue;
            }
            let len = astride * (ah as usize - 1) + aw as usize;
            let mut nbuffer = vec![0u8; len];
            nbuffer.copy_from_slice(cur.bitmap());
            imul_bitmaps(
                &mut nbuffer,
                atop * astride + aleft,
                astride,
                clip_bm.buffer(),
                btop * bs + bleft,
                bs,
                w as usize,
                h as usize,
            );
            cur.source = PixelSource::Owned(Rc::new(nbuffer));
            cur.offset = 0;
        } else {
            // Regular clip: keep only the covered region.
            if no_overlap {
                cur.w = 0;
                cur.h = 0;
                cur.stride = 0;
                cur.source = PixelSource::Owned(Rc::new(Vec::new()));
                cur.offset = 0;
                continue;
            }
            let ns = engine.align(w as usize);
            let mut nbuffer = vec![0u8; ns * h as usize];
            let src = cur.bitmap().to_vec();
            mul_bitmaps(
                &mut nbuffer,
                0,
                ns,
                &src,
                atop * astride + aleft,
                astride,
                clip_bm.buffer(),
                btop * bs + bleft,
                bs,
                w as usize,
                h as usize,
            );
            cur.dst_x += aleft as i32;
            cur.dst_y += atop as i32;
            cur.w = w as usize;
            cur.h = h as usize;
            cur.stride = ns;
            cur.source = PixelSource::Owned(Rc::new(nbuffer));
            cur.offset = 0;
        }
    }
}

/// The background band behind the event for border style 4.
pub(crate) fn add_background(
    images: &mut Vec<Image>,
    state: &RenderState,
    frame_w: i32,
    frame_h: i32,
    left: i32,
    top: i32,
    width: i32,
    height: i32,
) {
    let size_x = if state.shadow_x > 0.0 {
        state.shadow_x * state.border_scale
    } else {
        0.0
    };
    let size_y = if state.shadow_y > 0.0 {
        state.shadow_y * state.border_scale
    } else {
        0.0
    };
    let right = ((left as f64 + width as f64 + size_x) as i32).clamp(0, frame_w);
    let bottom = ((top as f64 + height as f64 + size_y) as i32).clamp(0, frame_h);
    let left = ((left as f64 - size_x) as i32).clamp(0, frame_w);
    let top = ((top as f64 - size_y) as i32).clamp(0, frame_h);
    let w = right - left;
    let h = bottom - top;
    if w < 1 || h < 1 {
        return;
    }
    let buffer = vec![0xFF; (w * h) as usize];
    images.insert(
        0,
        Image {
            source: PixelSource::Owned(Rc::new(buffer)),
            offset: 0,
            w: w as usize,
            h: h as usize,
            stride: w as usize,
            dst_x: left,
            dst_y: top,
            color: state.c[3],
            kind: ImageKind::Shadow,
        },
    );
}
