// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The render driver.
//!
//! [`Renderer`] owns everything that persists across frames (the cache
//! hierarchy, the rasterizer scratch, the collision memory) and walks each
//! active event through the pipeline: tag parsing, shaping, outline
//! lookup, line layout, karaoke, bitmap conversion, compositing and
//! collision resolution.

pub(crate) mod collision;
pub(crate) mod combine;
pub(crate) mod images;
pub(crate) mod karaoke;
pub(crate) mod layout;
pub(crate) mod state;
pub(crate) mod tags;

use crate::bitmap::EngineConfig;
use crate::cache::{CacheSet, OutlineEntry, OutlineKey};
use crate::drawing::parse_drawing;
use crate::font::{FontLoader, Hinting};
use crate::outline::Outline;
use crate::raster::Rasterizer;
use crate::shape::{FontServices, Shaper};
use crate::stroke::stroke_outline;
use crate::style::{align, Track};
use crate::Event;
use collision::{fix_collisions, CollisionMap, EventImages};
use combine::CombinedBitmapInfo;
use images::{PixelSource, Plane, RenderClip};
use layout::TextInfo;
use sable_primitives::{f64_to_d6, DRect, Rect};
use state::{evt_type, RenderState, ScrollDir};
use std::rc::Rc;

pub use images::{Image, ImageKind};

/// Rasterizer spline flattening error, in 1/64 pixel units.
const RASTERIZER_PRECISION: i32 = 16;
/// Stroker tolerance in its integer units.
const STROKER_PRECISION: i32 = 16;

/// Renderer configuration fixed at construction.
#[derive(Clone, Debug)]
pub struct RendererOptions {
    pub engine: EngineConfig,
    pub hinting: Hinting,
    /// Maximum shape runs per event; excess runs merge into the last one.
    pub max_runs: usize,
    /// Font size multiplier.
    pub font_size_coeff: f64,
    /// Additional line spacing in frame pixels.
    pub line_spacing: f64,
    /// Vertical position for subtitles, 0-100 (0 = no change).
    pub line_position: f64,
    /// Place subtitles in the full frame including margins.
    pub use_margins: bool,
    /// Pixel aspect ratio; 0 derives it from frame and storage sizes.
    pub par: f64,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            hinting: Hinting::None,
            max_runs: 50,
            font_size_coeff: 1.0,
            line_spacing: 0.0,
            line_position: 0.0,
            use_margins: false,
            par: 0.0,
        }
    }
}

/// Renderer configuration errors.
#[derive(thiserror::Error, Debug)]
pub enum RendererError {
    #[error("frame size must be positive, got {0}x{1}")]
    InvalidFrameSize(i32, i32),
}

/// Shared mutable services handed through the event pipeline.
pub(crate) struct Services<'a> {
    pub caches: &'a mut CacheSet,
    pub loader: &'a mut dyn FontLoader,
    pub options: &'a RendererOptions,
}

/// How a frame differs from the previously rendered one.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FrameChange {
    Identical,
    PositionsChanged,
    ContentChanged,
}

#[derive(Clone, PartialEq, Eq, Debug)]
struct ImageFingerprint {
    buffer: (usize, usize),
    w: usize,
    h: usize,
    stride: usize,
    color: u32,
    dst_x: i32,
    dst_y: i32,
}

impl ImageFingerprint {
    fn of(img: &Image) -> Self {
        let buffer = match &img.source {
            PixelSource::Composite { entry, plane } => {
                (Rc::as_ptr(entry) as usize, *plane as usize + 1)
            }
            PixelSource::Owned(buf) => (Rc::as_ptr(buf) as *const u8 as usize, 0),
        };
        Self {
            buffer: (buffer.0 + img.offset, buffer.1),
            w: img.w,
            h: img.h,
            stride: img.stride,
            color: img.color.0,
            dst_x: img.dst_x,
            dst_y: img.dst_y,
        }
    }

    fn same_content(&self, other: &Self) -> bool {
        self.buffer == other.buffer
            && self.w == other.w
            && self.h == other.h
            && self.stride == other.stride
            && self.color == other.color
    }
}

/// One rendered frame: positioned images in compositing order.
#[derive(Debug)]
pub struct Frame {
    images: Vec<Image>,
    change: FrameChange,
}

impl Frame {
    /// Images in compositing order: lower layers first, within one event
    /// shadow before border before glyph.
    pub fn images(&self) -> &[Image] {
        &self.images
    }

    /// Difference from the previous frame rendered by the same renderer.
    pub fn change(&self) -> FrameChange {
        self.change
    }
}

/// Script-to-device coordinate mapping for one event.
#[derive(Copy, Clone, Debug)]
struct FrameGeom {
    width: f64,
    height: f64,
    orig_width: f64,
    orig_height: f64,
    fit_width: f64,
    fit_height: f64,
    left_margin: f64,
    top_margin: f64,
    play_res_x: f64,
    play_res_y: f64,
    font_scale_x: f64,
    use_margins: bool,
    explicit: bool,
}

impl FrameGeom {
    fn x2scr_pos(&self, x: f64) -> f64 {
        x * self.orig_width / self.font_scale_x / self.play_res_x + self.left_margin
    }

    fn x2scr_pos_scaled(&self, x: f64) -> f64 {
        x * self.orig_width / self.play_res_x + self.left_margin
    }

    fn x2scr_left(&self, x: f64) -> f64 {
        if self.explicit || !self.use_margins {
            return self.x2scr_pos(x);
        }
        x * self.fit_width / self.font_scale_x / self.play_res_x
    }

    fn x2scr_right(&self, x: f64) -> f64 {
        if self.explicit || !self.use_margins {
            return self.x2scr_pos(x);
        }
        x * self.fit_width / self.font_scale_x / self.play_res_x + (self.width - self.fit_width)
    }

    fn y2scr_pos(&self, y: f64) -> f64 {
        y * self.orig_height / self.play_res_y + self.top_margin
    }

    fn y2scr(&self, y: f64) -> f64 {
        if self.explicit || !self.use_margins {
            return self.y2scr_pos(y);
        }
        y * self.fit_height / self.play_res_y + (self.height - self.fit_height) * 0.5
    }

    fn y2scr_top(&self, y: f64) -> f64 {
        if self.explicit || !self.use_margins {
            return self.y2scr_pos(y);
        }
        y * self.fit_height / self.play_res_y
    }

    fn y2scr_sub(&self, y: f64) -> f64 {
        if self.explicit || !self.use_margins {
            return self.y2scr_pos(y);
        }
        y * self.fit_height / self.play_res_y + (self.height - self.fit_height)
    }
}

/// The rendering core.
///
/// Not concurrency-safe: one renderer serves one stream of frames.
/// Callers needing parallelism shard by renderer instance.
#[derive(Debug)]
pub struct Renderer {
    options: RendererOptions,
    loader: Box<dyn FontLoader>,
    shaper: Box<dyn Shaper>,
    caches: CacheSet,
    rasterizer: Rasterizer,
    /// Shared u16 scratch for the shift and box-blur kernels.
    tmp: Vec<u16>,
    state: RenderState,
    text_info: TextInfo,
    combined: Vec<CombinedBitmapInfo>,

    frame_width: i32,
    frame_height: i32,
    storage_width: i32,
    storage_height: i32,
    /// Margins: top, bottom, left, right.
    margins: [i32; 4],

    render_id: u64,
    collision_map: CollisionMap,
    prev_images: Vec<ImageFingerprint>,
}

impl Renderer {
    /// Creates a renderer with the built-in font loader and shaper.
    #[cfg(feature = "font-loader")]
    pub fn new(options: RendererOptions) -> Self {
        Self::with_collaborators(
            options,
            Box::new(crate::font::SkrifaFontLoader::new()),
            Box::new(crate::shape::SimpleShaper::new()),
        )
    }

    /// Creates a renderer with explicit font and shaping collaborators.
    pub fn with_collaborators(
        options: RendererOptions,
        loader: Box<dyn FontLoader>,
        shaper: Box<dyn Shaper>,
    ) -> Self {
        let rasterizer = Rasterizer::new(options.engine.tile_order, RASTERIZER_PRECISION);
        Self {
            options,
            loader,
            shaper,
            caches: CacheSet::default(),
            rasterizer,
            tmp: Vec::new(),
            state: RenderState::default(),
            text_info: TextInfo::default(),
            combined: Vec::new(),
            frame_width: 0,
            frame_height: 0,
            storage_width: 0,
            storage_height: 0,
            margins: [0; 4],
            render_id: 0,
            collision_map: CollisionMap::default(),
            prev_images: Vec::new(),
        }
    }

    /// The font loader collaborator, for registering fonts after
    /// construction.
    pub fn loader_mut(&mut self) -> &mut dyn FontLoader {
        &mut *self.loader
    }

    /// Sets the video frame size in pixels.
    pub fn set_frame_size(&mut self, width: i32, height: i32) -> Result<(), RendererError> {
        if width <= 0 || height <= 0 {
            return Err(RendererError::InvalidFrameSize(width, height));
        }
        if (width, height) != (self.frame_width, self.frame_height) {
            self.frame_width = width;
            self.frame_height = height;
            self.render_id += 1;
        }
        Ok(())
    }

    /// Sets the video storage size (before any rescaling); drives border
    /// and blur scaling plus aspect correction.
    pub fn set_storage_size(&mut self, width: i32, height: i32) {
        if (width, height) != (self.storage_width, self.storage_height) {
            self.storage_width = width;
            self.storage_height = height;
            self.render_id += 1;
        }
    }

    /// Sets frame margins (top, bottom, left, right). The video frame is
    /// shifted by the top/left margins.
    pub fn set_margins(&mut self, top: i32, bottom: i32, left: i32, right: i32) {
        let m = [top, bottom, left, right];
        if m != self.margins {
            self.margins = m;
            self.render_id += 1;
        }
    }

    /// Drops every cached font, outline and bitmap. Call after changing
    /// the available fonts; values still referenced by an outstanding
    /// [`Frame`] survive until that frame drops.
    pub fn clear_caches(&mut self) {
        self.caches.clear_all();
    }

    /// Cache statistics: (hits, misses) summed over all caches.
    pub fn cache_stats(&self) -> (u64, u64) {
        let parts = [
            self.caches.font.stats(),
            self.caches.outline.stats(),
            self.caches.metrics.stats(),
            self.caches.bitmap.stats(),
            self.caches.composite.stats(),
        ];
        parts
            .iter()
            .fold((0, 0), |acc, s| (acc.0 + s.0, acc.1 + s.1))
    }

    fn content_size(&self) -> (f64, f64) {
        (
            (self.frame_width - self.margins[2] - self.margins[3]) as f64,
            (self.frame_height - self.margins[0] - self.margins[1]) as f64,
        )
    }

    fn frame_par(&self) -> f64 {
        if self.options.par != 0.0 {
            return self.options.par;
        }
        let (orig_w, orig_h) = self.content_size();
        if orig_w > 0.0 && orig_h > 0.0 && self.storage_width > 0 && self.storage_height > 0 {
            let dar = orig_w / orig_h;
            let sar = self.storage_width as f64 / self.storage_height as f64;
            dar / sar
        } else {
            1.0
        }
    }

    fn init_event_scales(&mut self, track: &Track) {
        let (_, orig_h) = self.content_size();
        let fit_h = self.frame_height as f64;
        let font_scr_h = if !self.state.explicit && self.options.use_margins {
            fit_h
        } else {
            orig_h
        };

        self.state.font_scale = font_scr_h / track.play_res_y;
        self.state.blur_scale = if self.storage_height > 0 {
            font_scr_h / self.storage_height as f64
        } else {
            font_scr_h / track.play_res_y
        };
        self.state.border_scale = if track.scaled_border_and_shadow {
            font_scr_h / track.play_res_y
        } else {
            self.state.blur_scale
        };

        let coeff = self.options.font_size_coeff;
        self.state.font_scale *= coeff;
        self.state.border_scale *= coeff;
        self.state.blur_scale *= coeff;
    }

    fn geom(&self, track: &Track) -> FrameGeom {
        let (orig_w, orig_h) = self.content_size();
        FrameGeom {
            width: self.frame_width as f64,
            height: self.frame_height as f64,
            orig_width: orig_w,
            orig_height: orig_h,
            fit_width: self.frame_width as f64,
            fit_height: self.frame_height as f64,
            left_margin: self.margins[2] as f64,
            top_margin: self.margins[0] as f64,
            play_res_x: track.play_res_x,
            play_res_y: track.play_res_y,
            font_scale_x: self.state.font_scale_x,
            use_margins: self.options.use_margins,
            explicit: self.state.explicit,
        }
    }

    /// Renders one frame at timestamp `now` (milliseconds).
    pub fn render_frame(&mut self, track: &Track, now: i64) -> Frame {
        if self.frame_width <= 0 || self.frame_height <= 0 {
            log::warn!("frame size not set, nothing to render");
            return self.finish_frame(Vec::new());
        }
        if track.styles.is_empty() || track.events.is_empty() {
            return self.finish_frame(Vec::new());
        }

        self.caches.enforce_limits();
        self.state.font_scale_x = self.frame_par();

        let mut rendered: Vec<EventImages> = Vec::new();
        for (index, event) in track.events.iter().enumerate() {
            if event.start <= now && now < event.start + event.duration {
                if let Some(ei) = self.render_event(track, event, index, now) {
                    rendered.push(ei);
                }
            }
        }

        rendered.sort_by_key(|e| (e.layer, e.read_order));

        // Resolve collisions per layer.
        let mut start = 0;
        while start < rendered.len() {
            let layer = rendered[start].layer;
            let mut end = start;
            while end < rendered.len() && rendered[end].layer == layer {
                end += 1;
            }
            fix_collisions(
                &mut rendered[start..end],
                &mut self.collision_map,
                self.render_id,
                self.frame_height,
            );
            start = end;
        }

        let mut all = Vec::new();
        for ei in rendered {
            all.extend(ei.images);
        }
        self.finish_frame(all)
    }

    fn finish_frame(&mut self, images: Vec<Image>) -> Frame {
        let fingerprints: Vec<ImageFingerprint> = images.iter().map(ImageFingerprint::of).collect();
        let change = if fingerprints.len() != self.prev_images.len() {
            FrameChange::ContentChanged
        } else {
            let mut change = FrameChange::Identical;
            for (a, b) in fingerprints.iter().zip(&self.prev_images) {
                if !a.same_content(b) {
                    change = FrameChange::ContentChanged;
                    break;
                }
                if a.dst_x != b.dst_x || a.dst_y != b.dst_y {
                    change = FrameChange::PositionsChanged;
                }
            }
            change
        };
        self.prev_images = fingerprints;
        Frame { images, change }
    }

    fn render_event(
        &mut self,
        track: &Track,
        event: &Event,
        event_index: usize,
        now: i64,
    ) -> Option<EventImages> {
        if event.style >= track.styles.len() {
            log::warn!("no style found for event {event_index}");
            return None;
        }
        if event.text.is_empty() {
            return None;
        }

        self.text_info.clear();
        let style = &track.styles[event.style];
        self.state.init(track, style);
        let par = self.frame_par();
        self.state.font_scale_x = par;

        tags::apply_transition_effects(&mut self.state, event, now);
        self.state.explicit =
            self.state.evt_type != 0 || tags::event_has_hard_overrides(&event.text);

        self.init_event_scales(track);

        {
            let mut services = Services {
                caches: &mut self.caches,
                loader: &mut *self.loader,
                options: &self.options,
            };
            tags::update_font(&mut self.state, &mut services);

            if !layout::parse_events(
                &mut self.state,
                &mut services,
                &mut self.text_info,
                track,
                event,
                now,
                &self.options,
            ) {
                return None;
            }
        }

        layout::split_style_runs(&mut self.text_info);

        {
            let mut fonts = FontServices {
                loader: &mut *self.loader,
                metrics: &mut self.caches.metrics,
            };
            if !layout::shape_text(
                &mut self.text_info,
                &mut *self.shaper,
                &mut fonts,
                self.state.font_encoding,
                self.options.max_runs.max(1),
            ) {
                log::warn!("failed to shape text, event skipped");
                return None;
            }
        }

        {
            let mut services = Services {
                caches: &mut self.caches,
                loader: &mut *self.loader,
                options: &self.options,
            };
            layout::retrieve_glyphs(&mut self.text_info, &mut services, &self.state);
        }

        layout::preliminary_layout(&mut self.text_info);

        let valign = self.state.alignment & 12;
        let margin_l = if event.margin_l != 0 {
            event.margin_l
        } else {
            style.margin_l
        };
        let margin_r = if event.margin_r != 0 {
            event.margin_r
        } else {
            style.margin_r
        };
        let margin_v = if event.margin_v != 0 {
            event.margin_v
        } else {
            style.margin_v
        };

        let geom = self.geom(track);
        let max_text_width = geom.x2scr_right(track.play_res_x - margin_r as f64)
            - geom.x2scr_left(margin_l as f64);

        layout::wrap_lines_smart(
            &mut self.text_info,
            &self.state,
            self.options.line_spacing,
            self.state.border_scale,
            max_text_width,
        );

        // Depends on x coordinates being monotonic within runs, so it runs
        // before reordering.
        karaoke::process_karaoke_effects(&mut self.text_info, now - event.start);

        layout::reorder_text(
            &mut self.text_info,
            &mut *self.shaper,
            self.options.line_spacing,
        );

        layout::align_lines(&mut self.text_info, &self.state, max_text_width);

        let bbox = layout::compute_string_bbox(&self.text_info);

        layout::apply_baseline_shear(&mut self.text_info);

        // Device coordinates. A positioned event may also scroll: the
        // scroll effect overrides the position on one axis.
        let mut device_x = 0.0;
        let mut device_y = 0.0;
        if self.state.evt_type & evt_type::POSITIONED != 0 {
            let base = layout::get_base_point(&bbox, self.state.alignment);
            device_x = geom.x2scr_pos(self.state.pos_x) - base.x;
            device_y = geom.y2scr_pos(self.state.pos_y) - base.y;
        }

        if self.state.evt_type & evt_type::HSCROLL != 0 {
            match self.state.scroll_direction {
                ScrollDir::RightLeft => {
                    device_x = geom.x2scr_pos(track.play_res_x - self.state.scroll_shift);
                }
                ScrollDir::LeftRight => {
                    device_x =
                        geom.x2scr_pos(self.state.scroll_shift) - (bbox.x_max - bbox.x_min);
                }
                _ => {}
            }
        } else if self.state.evt_type & evt_type::POSITIONED == 0 {
            device_x = geom.x2scr_left(margin_l as f64);
        }

        if self.state.evt_type & evt_type::VSCROLL != 0 {
            match self.state.scroll_direction {
                ScrollDir::TopBottom => {
                    device_y = geom
                        .y2scr(self.state.scroll_y0 as f64 + self.state.scroll_shift)
                        - bbox.y_max;
                }
                ScrollDir::BottomTop => {
                    device_y = geom
                        .y2scr(self.state.scroll_y1 as f64 - self.state.scroll_shift)
                        - bbox.y_min;
                }
                _ => {}
            }
        } else if self.state.evt_type & evt_type::POSITIONED == 0 {
            if valign == align::V_TOP {
                device_y = geom.y2scr_top(margin_v as f64) + self.text_info.lines[0].asc;
            } else if valign == align::V_CENTER {
                let scr_y = geom.y2scr(track.play_res_y / 2.0);
                device_y = scr_y - (bbox.y_max + bbox.y_min) / 2.0;
            } else {
                let line_pos = if self.state.explicit {
                    0.0
                } else {
                    self.options.line_position
                };
                let scr_bottom = geom.y2scr_sub(track.play_res_y - margin_v as f64);
                let scr_top = geom.y2scr_top(0.0);
                device_y = scr_bottom + (scr_top - scr_bottom) * line_pos / 100.0;
                device_y -= self.text_info.height;
                device_y += self.text_info.lines[0].asc;
                // Keep a very high line position from turning the subtitle
                // into a toptitle.
                let scr_y0 = scr_top + self.text_info.lines[0].asc;
                if device_y < scr_y0 && line_pos > 0.0 {
                    device_y = scr_y0;
                }
            }
        }

        // Fix clip coordinates.
        let clip = self.device_clip(&geom, track);

        self.calculate_rotation_params(&geom, &bbox, device_x, device_y);

        {
            let Self {
                options,
                loader,
                caches,
                rasterizer,
                tmp,
                state,
                text_info,
                combined,
                ..
            } = self;
            let options = &*options;
            let mut services = Services {
                caches,
                loader: &mut **loader,
                options,
            };
            combine::render_and_combine_glyphs(
                text_info,
                combined,
                state,
                &mut services,
                rasterizer,
                &options.engine,
                tmp,
                device_x,
                device_y,
                geom.left_margin,
            );
        }

        // The historical renderers do not shift lines with a border wider
        // than the margin back into frame, so top/left may go negative.
        let top =
            (device_y - self.text_info.lines[0].asc).round() as i32 - self.text_info.border_top;
        let height = self.text_info.height.round() as i32
            + self.text_info.border_bottom
            + self.text_info.border_top;
        let left = ((device_x + bbox.x_min) * self.state.font_scale_x
            - self.text_info.border_x as f64
            + 0.5) as i32;
        let width = ((bbox.x_max - bbox.x_min) * self.state.font_scale_x
            + 2.0 * self.text_info.border_x as f64
            + 0.5) as i32;

        let skip_shadow = self.state.border_style == crate::style::BorderStyle::Background;
        let mut imgs = images::render_text(&self.combined, &clip, skip_shadow);

        {
            let Self {
                options,
                loader,
                caches,
                rasterizer,
                state,
                ..
            } = self;
            let options = &*options;
            let mut services = Services {
                caches,
                loader: &mut **loader,
                options,
            };
            images::blend_vector_clip(
                &mut imgs,
                state,
                &mut services,
                rasterizer,
                &options.engine,
                geom.left_margin,
                geom.top_margin,
            );
        }

        if skip_shadow {
            images::add_background(
                &mut imgs,
                &self.state,
                self.frame_width,
                self.frame_height,
                left,
                top,
                width,
                height,
            );
        }

        Some(EventImages {
            images: imgs,
            top,
            height,
            left,
            width,
            detect_collisions: self.state.detect_collisions,
            shift_direction: if valign == align::V_SUB { -1 } else { 1 },
            layer: event.layer,
            read_order: event.read_order,
            event_index,
        })
    }

    fn device_clip(&mut self, geom: &FrameGeom, track: &Track) -> RenderClip {
        let state = &mut self.state;
        let (x0, y0, x1, y1);
        if state.explicit || !self.options.use_margins {
            let mut cx0 = geom.x2scr_pos_scaled(state.clip_x0);
            let mut cy0 = geom.y2scr_pos(state.clip_y0);
            let mut cx1 = geom.x2scr_pos_scaled(state.clip_x1);
            let mut cy1 = geom.y2scr_pos(state.clip_y1);
            if state.explicit {
                // Still clip against the screen area.
                let zx = geom.x2scr_pos_scaled(0.0);
                let zy = geom.y2scr_pos(0.0);
                let sx = geom.x2scr_pos_scaled(track.play_res_x);
                let sy = geom.y2scr_pos(track.play_res_y);
                cx0 = cx0.max(zx);
                cy0 = cy0.max(zy);
                cx1 = cx1.min(sx);
                cy1 = cy1.min(sy);
            }
            x0 = cx0 as i32;
            y0 = cy0 as i32;
            x1 = cx1 as i32;
            y1 = cy1 as i32;
        } else {
            x0 = 0;
            y0 = 0;
            x1 = self.frame_width;
            y1 = self.frame_height;
        }
        let (mut y0, mut y1) = (y0, y1);
        if state.evt_type & evt_type::VSCROLL != 0 {
            let sy0 = geom.y2scr_pos(state.scroll_y0 as f64) as i32;
            let sy1 = geom.y2scr_pos(state.scroll_y1 as f64) as i32;
            y0 = y0.max(sy0);
            y1 = y1.min(sy1);
        }
        RenderClip {
            x0,
            y0,
            x1,
            y1,
            inverse: state.clip_mode,
            frame_w: self.frame_width,
            frame_h: self.frame_height,
            screen_x0: geom.x2scr_pos_scaled(0.0) as i32,
            screen_y0: geom.y2scr_pos(0.0) as i32,
            screen_x1: geom.x2scr_pos_scaled(track.play_res_x) as i32,
            screen_y1: geom.y2scr_pos(track.play_res_y) as i32,
        }
    }

    /// Computes every glyph's shift relative to the rotation origin
    /// (`\org`, or the alignment point of the text box).
    fn calculate_rotation_params(
        &mut self,
        geom: &FrameGeom,
        bbox: &DRect,
        device_x: f64,
        device_y: f64,
    ) {
        let center = if self.state.have_origin {
            (
                geom.x2scr_pos(self.state.org_x),
                geom.y2scr_pos(self.state.org_y),
            )
        } else {
            let base = layout::get_base_point(bbox, self.state.alignment);
            (device_x + base.x, device_y + base.y)
        };

        for info in &mut self.text_info.glyphs {
            info.shift.x = info.pos.x
                + f64_to_d6(
                    device_x - center.0
                        + info.shadow_x * self.state.border_scale / self.state.font_scale_x,
                );
            info.shift.y = info.pos.y
                + f64_to_d6(device_y - center.1 + info.shadow_y * self.state.border_scale);
        }
    }
}

/// Cache constructor shared by glyph, drawing, border and box outline
/// entries.
pub(crate) fn construct_outline(
    key: &OutlineKey,
    loader: &mut dyn FontLoader,
    hinting: Hinting,
) -> (OutlineEntry, usize) {
    let mut v = OutlineEntry::default();

    match key {
        OutlineKey::Glyph(k) => {
            let font = &k.font.0;
            let size = k.size.get();
            match loader.load_outline(font.handle, k.face_index, k.glyph_index, size, hinting) {
                Some(glyph) => {
                    let metrics = loader
                        .face_metrics(font.handle, k.face_index, size)
                        .unwrap_or_default();
                    v.outline[0] = glyph.outline;
                    v.advance = glyph.advance;
                    v.asc = metrics.asc;
                    v.desc = metrics.desc;
                    if k.flags & crate::cache::deco::ROTATE != 0 {
                        rotate_vertical(&mut v);
                    }
                    apply_decorations(&mut v, k.flags, size);
                    v.valid = true;
                }
                None => {
                    log::warn!(
                        "failed to load outline for glyph {} of '{}'",
                        k.glyph_index,
                        font.desc.family
                    );
                }
            }
        }
        OutlineKey::Drawing(k) => match parse_drawing(&k.text) {
            Some((outline, cbox)) => {
                v.outline[0] = outline;
                v.advance = cbox.x_max - cbox.x_min;
                v.asc = cbox.y_max - cbox.y_min;
                v.desc = 0;
                v.valid = true;
            }
            None => {
                log::debug!("drawing parsed to nothing");
            }
        },
        OutlineKey::Border(k) => {
            v.valid = true;
            if (k.border.x != 0 || k.border.y != 0) && !k.outline.0.outline[0].is_empty() {
                let scaled = k.outline.0.outline[0].scale_pow2(k.scale_ord_x, k.scale_ord_y);
                let stroked = scaled.as_ref().and_then(|src| {
                    stroke_outline(
                        src,
                        k.border.x * STROKER_PRECISION,
                        k.border.y * STROKER_PRECISION,
                        STROKER_PRECISION,
                    )
                });
                match stroked {
                    Some((o0, o1)) => {
                        v.outline[0] = o0;
                        v.outline[1] = o1;
                    }
                    None => {
                        log::warn!("cannot stroke outline");
                        v.valid = false;
                    }
                }
            }
        }
        OutlineKey::OpaqueBox => {
            let mut ol = Outline::new();
            ol.add_rect(0, 0, 64, 64);
            v.outline[0] = ol;
            v.valid = true;
        }
    }

    let mut cbox = Rect::reset();
    v.outline[0].update_cbox(&mut cbox);
    v.outline[1].update_cbox(&mut cbox);
    v.cbox = if cbox.is_empty() {
        Rect::new(0, 0, 0, 0)
    } else {
        cbox
    };
    let size = v.heap_size();
    (v, size)
}

/// Quarter-turn for vertical layout: the glyph body rotates clockwise and
/// moves above the baseline so the horizontal pipeline can advance past it.
fn rotate_vertical(v: &mut OutlineEntry) {
    let advance = v.advance as f64;
    let m = [[0.0, -1.0, 0.0], [1.0, 0.0, -advance]];
    if let Some(rotated) = v.outline[0].transform_2d(&m) {
        v.outline[0] = rotated;
    }
}

/// Appends underline / strike-through bars to a glyph outline, sized from
/// the nominal glyph size.
fn apply_decorations(v: &mut OutlineEntry, flags: u32, size: f64) {
    use crate::cache::deco;
    if flags & (deco::UNDERLINE | deco::STRIKETHROUGH) == 0 {
        return;
    }
    let advance = v.advance;
    if advance <= 0 {
        return;
    }
    let thickness = f64_to_d6((size / 14.0).max(1.0));
    if flags & deco::UNDERLINE != 0 {
        let y = v.desc / 2;
        v.outline[0].add_rect(0, y, advance, y + thickness);
    }
    if flags & deco::STRIKETHROUGH != 0 {
        let y = -v.asc * 3 / 10;
        v.outline[0].add_rect(0, y - thickness / 2, advance, y + thickness / 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_geom_maps_script_to_device() {
        let geom = FrameGeom {
            width: 1920.0,
            height: 1080.0,
            orig_width: 1920.0,
            orig_height: 1080.0,
            fit_width: 1920.0,
            fit_height: 1080.0,
            left_margin: 0.0,
            top_margin: 0.0,
            play_res_x: 384.0,
            play_res_y: 288.0,
            font_scale_x: 1.0,
            use_margins: false,
            explicit: false,
        };
        assert_eq!(geom.x2scr_pos(384.0), 1920.0);
        assert_eq!(geom.y2scr_pos(288.0), 1080.0);
        assert_eq!(geom.y2scr_pos(144.0), 540.0);
    }

    #[test]
    fn fingerprint_detects_moves_and_content() {
        let a = ImageFingerprint {
            buffer: (0x1000, 1),
            w: 10,
            h: 5,
            stride: 16,
            color: 0xFFFFFF00,
            dst_x: 10,
            dst_y: 20,
        };
        let mut moved = a.clone();
        moved.dst_y = 25;
        assert!(a.same_content(&moved));
        let mut changed = a.clone();
        changed.color = 0xFF0000FF;
        assert!(!a.same_content(&changed));
    }
}
