// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Vector drawing parser.
//!
//! Drawings are inline shapes written with `m`/`n`/`l`/`b`/`q`/`s`/`c`
//! commands and rendered like glyphs. Coordinates are script units
//! converted to 26.6; scaling by the `\p` power and baseline placement by
//! `\pbo` happen later, at transform time.

use crate::outline::{ContourBuilder, Outline};
use sable_primitives::{f64_to_d6, Rect, Vec2};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Token {
    Move,
    MoveNc,
    Line,
    CubicBezier,
    ConicBezier,
    BSpline,
}

fn tokenize(text: &str) -> Vec<(Token, Vec2)> {
    let mut tokens: Vec<(Token, Vec2)> = Vec::new();
    let mut kind = None;
    let mut pending_x: Option<i32> = None;
    let mut spline_start: Option<usize> = None;

    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'm' => kind = Some(Token::Move),
            b'n' => kind = Some(Token::MoveNc),
            b'l' => kind = Some(Token::Line),
            b'b' => kind = Some(Token::CubicBezier),
            b'q' => kind = Some(Token::ConicBezier),
            b's' => kind = Some(Token::BSpline),
            b'c' => {
                // Close the b-spline: replay its first three points.
                if let Some(start) = spline_start.take() {
                    let ok = tokens.len() > start + 2
                        && tokens[start + 1].0 == Token::BSpline
                        && tokens[start + 2].0 == Token::BSpline;
                    if ok {
                        for k in 0..3 {
                            let pt = tokens[start + k].1;
                            tokens.push((Token::BSpline, pt));
                        }
                    }
                }
            }
            b'-' | b'.' | b'0'..=b'9' => {
                let start = i;
                i += 1;
                while i < bytes.len() && matches!(bytes[i], b'.' | b'0'..=b'9') {
                    i += 1;
                }
                let val: f64 = text[start..i].parse().unwrap_or(0.0);
                let d6 = f64_to_d6(val);
                match pending_x.take() {
                    None => pending_x = Some(d6),
                    Some(x) => {
                        if let Some(kind) = kind {
                            if kind == Token::BSpline && spline_start.is_none() {
                                spline_start = Some(tokens.len().saturating_sub(1));
                            }
                            tokens.push((kind, Vec2::new(x, d6)));
                        }
                    }
                }
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    tokens
}

// The B-spline to Bézier conversion used by the curve evaluator; the same
// De Casteljau-style integer arithmetic as the reference rasterizer path.
fn bspline_to_bezier(p: [Vec2; 4]) -> [Vec2; 4] {
    let x01 = (p[1].x - p[0].x) / 3;
    let y01 = (p[1].y - p[0].y) / 3;
    let x12 = (p[2].x - p[1].x) / 3;
    let y12 = (p[2].y - p[1].y) / 3;
    let x23 = (p[3].x - p[2].x) / 3;
    let y23 = (p[3].y - p[2].y) / 3;
    [
        Vec2::new(p[1].x + ((x12 - x01) >> 1), p[1].y + ((y12 - y01) >> 1)),
        Vec2::new(p[1].x + x12, p[1].y + y12),
        Vec2::new(p[2].x - x12, p[2].y - y12),
        Vec2::new(p[2].x + ((x23 - x12) >> 1), p[2].y + ((y23 - y12) >> 1)),
    ]
}

/// Parses a drawing command string into an outline and its control box.
///
/// Returns `None` for drawings without any drawable contour; the caller
/// renders nothing in that case.
pub(crate) fn parse_drawing(text: &str) -> Option<(Outline, Rect)> {
    let tokens = tokenize(text);
    let mut builder = ContourBuilder::new();
    let mut cbox = Rect::reset();
    let mut pen = Vec2::new(0, 0);
    let mut started = false;

    let mut i = 0;
    while i < tokens.len() {
        let (kind, point) = tokens[i];
        match kind {
            Token::Move => {
                pen = point;
                cbox.update_point(pen);
                if started {
                    builder.close();
                    started = false;
                }
                i += 1;
            }
            Token::MoveNc => {
                pen = point;
                cbox.update_point(pen);
                i += 1;
            }
            Token::Line => {
                if !started {
                    builder.move_to(pen);
                    started = true;
                }
                builder.line_to(point);
                cbox.update_point(point);
                pen = point;
                i += 1;
            }
            Token::ConicBezier => {
                if i + 1 < tokens.len() && tokens[i + 1].0 == Token::ConicBezier {
                    let end = tokens[i + 1].1;
                    if !started {
                        builder.move_to(pen);
                        started = true;
                    }
                    builder.quad_to(point, end);
                    cbox.update_point(point);
                    cbox.update_point(end);
                    pen = end;
                    i += 2;
                } else {
                    i += 1;
                }
            }
            Token::CubicBezier => {
                if i + 2 < tokens.len()
                    && tokens[i + 1].0 == Token::CubicBezier
                    && tokens[i + 2].0 == Token::CubicBezier
                {
                    let (c1, c2, end) = (point, tokens[i + 1].1, tokens[i + 2].1);
                    if !started {
                        builder.move_to(pen);
                        started = true;
                    }
                    builder.cubic_to(c1, c2, end);
                    cbox.update_point(c1);
                    cbox.update_point(c2);
                    cbox.update_point(end);
                    pen = end;
                    i += 3;
                } else {
                    i += 1;
                }
            }
            Token::BSpline => {
                if i + 2 < tokens.len()
                    && tokens[i + 1].0 == Token::BSpline
                    && tokens[i + 2].0 == Token::BSpline
                    && i > 0
                {
                    let window = [tokens[i - 1].1, point, tokens[i + 1].1, tokens[i + 2].1];
                    let bez = bspline_to_bezier(window);
                    if !started {
                        builder.move_to(bez[0]);
                        started = true;
                    }
                    builder.cubic_to(bez[1], bez[2], bez[3]);
                    for p in bez {
                        cbox.update_point(p);
                    }
                    pen = bez[3];
                    i += 1;
                } else {
                    i += 1;
                }
            }
        }
    }
    if started {
        builder.close();
    }

    let outline = builder.finish()?;
    if cbox.is_empty() {
        return None;
    }
    Some((outline, cbox))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangle_parses_to_one_contour() {
        let (outline, cbox) = parse_drawing("m 0 0 l 100 0 100 100 0 100").unwrap();
        assert_eq!(cbox, Rect::new(0, 0, 6400, 6400));
        let order_sum: usize = outline.segments().iter().map(|s| s.kind.order()).sum();
        assert_eq!(order_sum, outline.points().len());
        assert_eq!(outline.points().len(), 4);
        assert!(outline.segments().last().unwrap().contour_end);
    }

    #[test]
    fn cubic_command_consumes_triplets() {
        let (outline, _) = parse_drawing("m 0 0 b 10 0 20 10 20 20").unwrap();
        assert_eq!(outline.points().len(), 4);
        // One cubic plus the implicit closing line.
        let kinds: Vec<_> = outline.segments().iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![crate::outline::SegmentKind::Cubic, crate::outline::SegmentKind::Line]
        );
    }

    #[test]
    fn empty_or_degenerate_drawing_is_none() {
        assert!(parse_drawing("").is_none());
        assert!(parse_drawing("m 0 0").is_none());
        // Two points collapse to nothing after the implicit close.
        assert!(parse_drawing("m 0 0 l 5 0").is_none());
        assert!(parse_drawing("m 0 0 l 5 0 5 5").is_some());
    }

    #[test]
    fn negative_and_fractional_coordinates() {
        let (_, cbox) = parse_drawing("m -4.5 -2 l 10 0 10 8 -4.5 8").unwrap();
        assert_eq!(cbox.x_min, f64_to_d6(-4.5));
        assert_eq!(cbox.y_min, -128);
    }

    #[test]
    fn move_without_close_keeps_contour_open() {
        // 'n' repositions the pen without closing; the contour continues.
        let (outline, _) = parse_drawing("m 0 0 l 10 0 n 20 20 l 10 10").unwrap();
        let contours = outline.segments().iter().filter(|s| s.contour_end).count();
        assert_eq!(contours, 1);
    }
}
