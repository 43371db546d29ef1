// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end renderer scenarios over a synthetic font.
//!
//! The box loader serves every codepoint as a filled rectangle with fixed
//! proportions of the requested size, which keeps expected positions
//! computable without any font binary.

use sable::primitives::Rgba;
use sable::{
    Event, FaceMetrics, FontDesc, FontLoader, GlyphOutline, Hinting, ImageKind, Renderer,
    RendererOptions, SimpleShaper, Style, Track,
};

/// Every glyph is a `0.5×0.7 em` box sitting on the baseline, with a
/// `0.6 em` advance. The space maps to an empty outline.
#[derive(Debug, Default)]
struct BoxLoader;

impl FontLoader for BoxLoader {
    fn open(&mut self, _desc: &FontDesc) -> Option<(u64, u32)> {
        Some((0, 1))
    }

    fn glyph_index(&mut self, _handle: u64, _face: u32, codepoint: u32) -> Option<u32> {
        Some(codepoint)
    }

    fn load_outline(
        &mut self,
        _handle: u64,
        _face: u32,
        glyph: u32,
        size: f64,
        _hinting: Hinting,
    ) -> Option<GlyphOutline> {
        let advance = (size * 0.6 * 64.0) as i32;
        let mut outline = sable::Outline::new();
        if glyph != ' ' as u32 {
            let w = (size * 0.5 * 64.0) as i32;
            let h = (size * 0.7 * 64.0) as i32;
            outline.add_rect(0, -h, w, 0);
        }
        Some(GlyphOutline { outline, advance })
    }

    fn glyph_advance(&mut self, _handle: u64, _face: u32, _glyph: u32, size: f64) -> Option<i32> {
        Some((size * 0.6 * 64.0) as i32)
    }

    fn face_metrics(&mut self, _handle: u64, _face: u32, size: f64) -> Option<FaceMetrics> {
        Some(FaceMetrics {
            asc: (size * 0.8 * 64.0) as i32,
            desc: (size * 0.2 * 64.0) as i32,
        })
    }
}

const WHITE: Rgba = Rgba(0xFFFF_FF00);
const BLACK: Rgba = Rgba(0x0000_0000);
const SECONDARY: Rgba = Rgba(0xFF00_0000);

fn test_style(alignment: i32) -> Style {
    Style {
        font_size: 40.0,
        primary_color: WHITE,
        secondary_color: SECONDARY,
        outline_color: BLACK,
        back_color: BLACK,
        outline: 0.0,
        shadow: 0.0,
        alignment,
        margin_l: 20,
        margin_r: 20,
        margin_v: 20,
        ..Style::default()
    }
}

fn test_track(style: Style, events: Vec<Event>) -> Track {
    Track {
        play_res_x: 1920.0,
        play_res_y: 1080.0,
        styles: vec![style],
        events,
        ..Track::default()
    }
}

fn renderer() -> Renderer {
    let mut r = Renderer::with_collaborators(
        RendererOptions::default(),
        Box::new(BoxLoader),
        Box::new(SimpleShaper::new()),
    );
    r.set_frame_size(1920, 1080).unwrap();
    r
}

fn event(text: &str) -> Event {
    Event {
        start: 0,
        duration: 1000,
        text: text.into(),
        ..Event::default()
    }
}

#[test]
fn single_white_glyph_at_center() {
    let mut r = renderer();
    let track = test_track(test_style(5), vec![event("A")]);
    let frame = r.render_frame(&track, 100);
    let images = frame.images();
    assert_eq!(images.len(), 1, "expected exactly one image");
    let img = &images[0];
    assert_eq!(img.kind(), ImageKind::Character);
    assert_eq!(img.color(), WHITE);
    // A 40pt box glyph is 20x28 px; the advance box centers at 960.
    assert!((15..=25).contains(&img.width()), "width {}", img.width());
    assert!((23..=33).contains(&img.height()), "height {}", img.height());
    let cx = img.dst_x() + img.width() as i32 / 2;
    let cy = img.dst_y() + img.height() as i32 / 2;
    assert!((cx - 960).abs() <= 8, "center x = {cx}");
    assert!((cy - 540).abs() <= 20, "center y = {cy}");
    // The bitmap interior is fully covered.
    let mid = img.bitmap()[(img.height() / 2) * img.stride() + img.width() / 2];
    assert_eq!(mid, 255);
}

#[test]
fn glyph_with_outline_pair() {
    let mut r = renderer();
    let style = Style {
        outline: 2.0,
        ..test_style(5)
    };
    let track = test_track(style, vec![event("A")]);
    let frame = r.render_frame(&track, 100);
    let images = frame.images();
    assert_eq!(images.len(), 2, "expected border + glyph");
    assert_eq!(images[0].kind(), ImageKind::Outline);
    assert_eq!(images[0].color(), BLACK);
    assert_eq!(images[1].kind(), ImageKind::Character);
    assert_eq!(images[1].color(), WHITE);
    // The border bitmap extends beyond the glyph on every side.
    assert!(images[0].dst_x() < images[1].dst_x());
    assert!(images[0].dst_y() < images[1].dst_y());
    assert!(images[0].width() > images[1].width());
    assert!(images[0].height() > images[1].height());
}

#[test]
fn karaoke_words_change_color_over_time() {
    let mut r = renderer();
    let track = test_track(test_style(5), vec![event("{\\k50}AB{\\k50}CD")]);
    let frame = r.render_frame(&track, 499);
    let chars: Vec<_> = frame
        .images()
        .iter()
        .filter(|i| i.kind() == ImageKind::Character)
        .collect();
    assert_eq!(chars.len(), 2, "two karaoke words, one composite each");
    // First word is already filled, second still shows the secondary
    // color; the split point is the boundary between the words.
    assert_eq!(chars[0].color(), WHITE);
    assert_eq!(chars[1].color(), SECONDARY);
    assert!(chars[0].dst_x() < chars[1].dst_x());

    // After both words' times have passed, everything is primary.
    let frame = r.render_frame(&track, 999);
    for img in frame.images() {
        assert_eq!(img.color(), WHITE);
    }
}

#[test]
fn positioned_rotated_glyph() {
    let mut r = renderer();
    let track = test_track(test_style(5), vec![event("{\\pos(100,100)\\frz45}X")]);
    let frame = r.render_frame(&track, 100);
    let images = frame.images();
    assert_eq!(images.len(), 1);
    let img = &images[0];
    assert_eq!(img.kind(), ImageKind::Character);
    // The bounding box center stays at the anchor.
    let cx = img.dst_x() + img.width() as i32 / 2;
    let cy = img.dst_y() + img.height() as i32 / 2;
    assert!((cx - 100).abs() <= 24, "center x = {cx}");
    assert!((cy - 100).abs() <= 24, "center y = {cy}");
    // Rotating a 20x28 box by 45° grows both extents toward ~34.
    assert!(img.width() >= 28, "width {}", img.width());
    assert!(img.height() >= 28, "height {}", img.height());
}

#[test]
fn inverse_vector_clip_zeroes_rectangle() {
    let mut r = renderer();
    let track = test_track(
        test_style(5),
        vec![event(
            "{\\pos(60,60)\\iclip(m 0 0 l 100 0 100 100 0 100)}AAAA",
        )],
    );
    let frame = r.render_frame(&track, 100);
    assert!(!frame.images().is_empty());
    let mut saw_nonzero_outside = false;
    for img in frame.images() {
        let buf = img.bitmap();
        for y in 0..img.height() {
            for x in 0..img.width() {
                let gx = img.dst_x() + x as i32;
                let gy = img.dst_y() + y as i32;
                let v = buf[y * img.stride() + x];
                if gx >= 0 && gx < 100 && gy >= 0 && gy < 100 {
                    assert_eq!(v, 0, "pixel inside the clip at ({gx},{gy})");
                } else if v != 0 {
                    saw_nonzero_outside = true;
                }
            }
        }
    }
    assert!(saw_nonzero_outside, "some text must survive outside the clip");
}

#[test]
fn empty_vector_clip_silences_event() {
    // A vector clip whose drawing parses to nothing renders no images.
    let mut r = renderer();
    let track = test_track(test_style(5), vec![event("{\\clip(m 0 0)}AAAA")]);
    let frame = r.render_frame(&track, 100);
    for img in frame.images() {
        assert_eq!(img.width() * img.height(), 0);
    }
}

#[test]
fn overlapping_events_are_separated() {
    let mut r = renderer();
    let mut e1 = event("AA");
    let mut e2 = event("BB");
    e2.read_order = 1;
    let track = test_track(test_style(2), vec![e1.clone(), e2.clone()]);
    let frame = r.render_frame(&track, 100);
    let images = frame.images();
    assert_eq!(images.len(), 2);
    // Both default-aligned events target the same bottom-center spot; the
    // second is shifted clear of the first.
    let r1 = images[0].dst_y()..images[0].dst_y() + images[0].height() as i32;
    let r2 = images[1].dst_y()..images[1].dst_y() + images[1].height() as i32;
    let overlap = r1.start < r2.end && r2.start < r1.end;
    assert!(!overlap, "events still overlap: {r1:?} vs {r2:?}");

    // And the placement is stable on the next frame.
    let frame2 = r.render_frame(&track, 200);
    assert_eq!(frame2.images()[0].dst_y(), images[0].dst_y());
    assert_eq!(frame2.images()[1].dst_y(), images[1].dst_y());

    e1.layer = 1;
    e2.layer = 0;
    let track = test_track(test_style(2), vec![e1, e2]);
    let frame = r.render_frame(&track, 100);
    // Ordering follows (layer, read order): the layer-0 event comes first.
    assert_eq!(frame.images().len(), 2);
}

#[test]
fn fade_dims_alpha_over_time() {
    let mut r = renderer();
    let track = test_track(test_style(5), vec![event("{\\fad(200,200)}A")]);
    let early = r.render_frame(&track, 10);
    let mid = r.render_frame(&track, 500);
    let a_early = early.images()[0].color().a();
    let a_mid = mid.images()[0].color().a();
    assert!(a_early > a_mid, "fade-in: {a_early} vs {a_mid}");
    assert_eq!(a_mid, 0, "fully faded in at the middle");
}

#[test]
fn cache_reuse_across_frames() {
    let mut r = renderer();
    let track = test_track(test_style(5), vec![event("ABCABC")]);
    let _ = r.render_frame(&track, 100);
    let (h1, m1) = r.cache_stats();
    let _ = r.render_frame(&track, 101);
    let (h2, m2) = r.cache_stats();
    assert!(h1 > 0, "repeated glyphs hit within one frame");
    assert_eq!(m2, m1, "second frame constructs nothing new");
    assert!(h2 > h1);
}

#[test]
fn drawing_event_renders_box() {
    let mut r = renderer();
    let track = test_track(
        test_style(5),
        vec![event("{\\p1\\pos(200,200)}m 0 0 l 64 0 64 64 0 64{\\p0}")],
    );
    let frame = r.render_frame(&track, 100);
    let images = frame.images();
    assert_eq!(images.len(), 1);
    // Drawing units are script pixels at \p1; 1:1 mapping here gives a
    // bitmap about 64x64 at scale font_scale = 1.
    let img = &images[0];
    assert!((56..=72).contains(&img.width()), "width {}", img.width());
    assert!((56..=72).contains(&img.height()), "height {}", img.height());
}

#[test]
fn whitespace_only_event_is_empty() {
    let mut r = renderer();
    let track = test_track(test_style(5), vec![event("   ")]);
    let frame = r.render_frame(&track, 100);
    assert!(frame.images().is_empty());
}

#[test]
fn forced_linebreak_stacks_lines() {
    let mut r = renderer();
    let track = test_track(test_style(5), vec![event("AA\\NBB")]);
    let frame = r.render_frame(&track, 100);
    let images = frame.images();
    assert_eq!(images.len(), 2, "one composite per line run");
    let (a, b) = (&images[0], &images[1]);
    assert!(b.dst_y() >= a.dst_y() + a.height() as i32 - 8, "lines stack");
}
