// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Outline stroking.
//!
//! Given a source outline and border half-widths, constructs two offset
//! outlines such that for any point inside either border outline (by the
//! nonzero winding rule) the minimal distance to the source is less than 1
//! in normal space, and for any point outside both it is more than
//! approximately 1. Normal space is scaled by `1/xbord, 1/ybord`, so
//! distance is `hypot(dx/xbord, dy/ybord)` and the allowed error is
//! `eps / max(xbord, ybord)`.
//!
//! Two border outlines are required because a self-intersecting source
//! produces ±1 offset curves with different topology.
//!
//! Each source segment (line, quadratic or cubic spline) and each joint is
//! stroked mostly independently. Line segments offset directly; for
//! splines the control points are offset first, then the offset spline's
//! radial and angular error is estimated, subdividing recursively when it
//! exceeds the tolerance. Problem cases:
//!
//! 1. Points closer than `eps` merge into one to keep normals stable.
//! 2. Near-zero derivatives at spline ends get a circular cap.
//! 3. Negative curvature (offset larger than the curvature radius) makes
//!    the naive offset self-intersect: the offending spline is skipped on
//!    that side and closed with a straight segment, leaving only the
//!    positive-winding part of the mathematical offset curve.

use crate::outline::{Outline, SegmentKind};
use sable_primitives::{DVec2, Vec2};

// Point roles in the emission stream; converted to segment tags when a
// contour closes.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum PTag {
    On,
    Conic,
    Cubic,
}

// Accumulates one result outline as a tagged point stream.
#[derive(Default)]
struct ContourStream {
    outline: Outline,
    points: Vec<Vec2>,
    tags: Vec<PTag>,
}

impl ContourStream {
    fn add(&mut self, pt: Vec2, tag: PTag) {
        self.points.push(pt);
        self.tags.push(tag);
    }

    fn replace_first(&mut self, pt: Vec2) {
        if !self.points.is_empty() {
            self.points[0] = pt;
        }
    }

    // Converts the tagged stream into segments: every on-curve point
    // starts a segment owning the control points that follow it; the last
    // segment closes onto the contour start.
    fn close(&mut self) -> bool {
        if self.points.len() < 2 {
            self.points.clear();
            self.tags.clear();
            return true;
        }
        if self.tags[0] != PTag::On {
            // The stroker always emits an on-curve point first.
            self.points.clear();
            self.tags.clear();
            return true;
        }
        let n = self.points.len();
        let mut i = 0;
        while i < n {
            debug_assert_eq!(self.tags[i], PTag::On);
            let mut ctrl = 0;
            while i + 1 + ctrl < n && self.tags[i + 1 + ctrl] != PTag::On {
                ctrl += 1;
            }
            let kind = match (ctrl, self.tags.get(i + 1)) {
                (0, _) => SegmentKind::Line,
                (1, Some(PTag::Conic)) => SegmentKind::Quadratic,
                (2, Some(PTag::Cubic)) => SegmentKind::Cubic,
                _ => {
                    // Mixed or overlong control runs cannot appear in the
                    // emission grammar.
                    self.points.clear();
                    self.tags.clear();
                    return true;
                }
            };
            for k in 0..=ctrl {
                if !self.outline.add_point(self.points[i + k]) {
                    return false;
                }
            }
            self.outline.add_segment(kind);
            i += 1 + ctrl;
        }
        self.outline.close_contour();
        self.points.clear();
        self.tags.clear();
        true
    }
}

struct Stroker {
    result: [ContourStream; 2],
    xbord: f64,
    ybord: f64,
    xscale: f64,
    yscale: f64,
    eps: i32,

    // True if no point was started in the current contour yet.
    contour_start: bool,
    first_skip: i32,
    last_skip: i32,
    first_normal: DVec2,
    last_normal: DVec2,
    first_point: Vec2,
    last_point: Vec2,

    // Cosine of the maximal angle that merges without a cap.
    merge_cos: f64,
    // Cosine of the maximal arc angle approximable by one quadratic.
    split_cos: f64,
    // Minimal control-point distance in normal space before the
    // degenerate handling kicks in.
    min_len: f64,
    err_q: f64,
    err_c: f64,
    // Tangent of the maximal angular error.
    err_a: f64,
}

#[derive(Copy, Clone)]
struct Normal {
    v: DVec2,
    len: f64,
}

const FLAG_INTERSECTION: i32 = 1;
const FLAG_ZERO_0: i32 = 2;
const FLAG_ZERO_1: i32 = 4;
const FLAG_CLIP_0: i32 = 8;
const FLAG_CLIP_1: i32 = 16;
const FLAG_DIR_2: i32 = 32;
const FLAG_COUNT: i32 = 6;
const MASK_INTERSECTION: i32 = FLAG_INTERSECTION << FLAG_COUNT;
const MASK_ZERO_0: i32 = FLAG_ZERO_0 << FLAG_COUNT;
const MASK_ZERO_1: i32 = FLAG_ZERO_1 << FLAG_COUNT;
const MASK_CLIP_0: i32 = FLAG_CLIP_0 << FLAG_COUNT;
const MASK_CLIP_1: i32 = FLAG_CLIP_1 << FLAG_COUNT;

impl Stroker {
    /// Adds an offset point to one or both border outlines.
    fn emit_point(&mut self, pt: Vec2, offs: DVec2, tag: PTag, dir: i32) {
        let dx = (self.xbord * offs.x) as i32;
        let dy = (self.ybord * offs.y) as i32;
        if dir & 1 != 0 {
            self.result[0].add(Vec2::new(pt.x + dx, pt.y + dy), tag);
        }
        if dir & 2 != 0 {
            self.result[1].add(Vec2::new(pt.x - dx, pt.y - dy), tag);
        }
    }

    /// Replaces the first point of the current contour.
    fn fix_first_point(&mut self, pt: Vec2, offs: DVec2, dir: i32) {
        let dx = (self.xbord * offs.x) as i32;
        let dy = (self.ybord * offs.y) as i32;
        if dir & 1 != 0 {
            self.result[0].replace_first(Vec2::new(pt.x + dx, pt.y + dy));
        }
        if dir & 2 != 0 {
            self.result[1].replace_first(Vec2::new(pt.x - dx, pt.y - dy));
        }
    }

    fn process_arc(
        &mut self,
        pt: Vec2,
        normal0: DVec2,
        normal1: DVec2,
        mul: &[f64],
        level: usize,
        dir: i32,
    ) {
        let center = DVec2::new(
            (normal0.x + normal1.x) * mul[level],
            (normal0.y + normal1.y) * mul[level],
        );
        if level > 0 {
            self.process_arc(pt, normal0, center, mul, level - 1, dir);
            self.process_arc(pt, center, normal1, mul, level - 1, dir);
        } else {
            self.emit_point(pt, normal0, PTag::On, dir);
            self.emit_point(pt, center, PTag::Conic, dir);
        }
    }

    /// Constructs a circular arc between two unit normals around `pt`;
    /// `c` is their dot product.
    fn draw_arc(&mut self, pt: Vec2, normal0: DVec2, normal1: DVec2, c: f64, dir: i32) {
        const MAX_SUBDIV: usize = 15;
        let mut mul = [0.0; MAX_SUBDIV + 1];

        let mut c = c;
        let mut center = DVec2::default();
        let mut small_angle = true;
        if c < 0.0 {
            let mut m = if dir & 2 != 0 { -0.5f64.sqrt() } else { 0.5f64.sqrt() };
            m /= (1.0 - c).sqrt();
            center = DVec2::new((normal1.y - normal0.y) * m, (normal0.x - normal1.x) * m);
            c = (0.5 + 0.5 * c).max(0.0).sqrt();
            small_angle = false;
        }

        let mut pos = MAX_SUBDIV;
        while c < self.split_cos && pos > 0 {
            mul[pos] = 0.5f64.sqrt() / (1.0 + c).sqrt();
            c = (1.0 + c) * mul[pos];
            pos -= 1;
        }
        mul[pos] = 1.0 / (1.0 + c);
        if small_angle {
            self.process_arc(pt, normal0, normal1, &mul[pos..], MAX_SUBDIV - pos, dir);
        } else {
            self.process_arc(pt, normal0, center, &mul[pos..], MAX_SUBDIV - pos, dir);
            self.process_arc(pt, center, normal1, &mul[pos..], MAX_SUBDIV - pos, dir);
        }
    }

    /// Emits a full circle of radius 1 around a degenerate contour.
    fn draw_circle(&mut self, pt: Vec2, dir: i32) {
        const MAX_SUBDIV: usize = 15;
        let mut mul = [0.0; MAX_SUBDIV + 1];
        let mut c = 0.0;
        let mut pos = MAX_SUBDIV;
        while c < self.split_cos && pos > 0 {
            mul[pos] = 0.5f64.sqrt() / (1.0 + c).sqrt();
            c = (1.0 + c) * mul[pos];
            pos -= 1;
        }
        mul[pos] = 1.0 / (1.0 + c);

        let normal = [
            DVec2::new(1.0, 0.0),
            DVec2::new(0.0, 1.0),
            DVec2::new(-1.0, 0.0),
            DVec2::new(0.0, -1.0),
        ];
        for k in 0..4 {
            self.process_arc(
                pt,
                normal[k],
                normal[(k + 1) & 3],
                &mul[pos..],
                MAX_SUBDIV - pos,
                dir,
            );
        }
    }

    /// Starts a new segment, adding a cap or blending normals at the
    /// joint as the angle requires.
    fn start_segment(&mut self, pt: Vec2, normal: DVec2, dir: i32) {
        if self.contour_start {
            self.contour_start = false;
            self.first_skip = 0;
            self.last_skip = 0;
            self.first_normal = normal;
            self.last_normal = normal;
            self.first_point = pt;
            return;
        }

        let prev = self.last_normal;
        let c = prev.dot(normal);
        if c > self.merge_cos {
            let mul = 1.0 / (1.0 + c);
            self.last_normal = DVec2::new((prev.x + normal.x) * mul, (prev.y + normal.y) * mul);
            return;
        }
        self.last_normal = normal;

        // Negative curvature side gets skipped instead of capped.
        let s = prev.cross(normal);
        let skip_dir = if s < 0.0 { 1 } else { 2 };
        if dir & skip_dir != 0 {
            self.emit_point(pt, prev, PTag::On, !self.last_skip & skip_dir);
            self.emit_point(pt, DVec2::default(), PTag::On, skip_dir);
        }
        self.last_skip = skip_dir;

        let dir = dir & !skip_dir;
        if dir != 0 {
            self.draw_arc(pt, prev, normal, c, dir);
        }
    }

    fn emit_first_point(&mut self, pt: Vec2, dir: i32) {
        self.last_skip &= !dir;
        self.emit_point(pt, self.last_normal, PTag::On, dir);
    }

    /// Prepares to skip part of a curve on the self-intersecting side.
    fn prepare_skip(&mut self, pt: Vec2, dir: i32, first: bool) {
        if first {
            self.first_skip |= dir;
        } else {
            self.emit_point(pt, self.last_normal, PTag::On, !self.last_skip & dir);
        }
        self.last_skip |= dir;
    }

    fn add_line(&mut self, pt: Vec2, dir: i32) {
        let dx = pt.x - self.last_point.x;
        let dy = pt.y - self.last_point.y;
        if dx > -self.eps && dx < self.eps && dy > -self.eps && dy < self.eps {
            return;
        }

        let deriv = DVec2::new(dy as f64 * self.yscale, -(dx as f64) * self.xscale);
        let scale = 1.0 / deriv.length_squared().sqrt();
        let normal = DVec2::new(deriv.x * scale, deriv.y * scale);
        self.start_segment(self.last_point, normal, dir);
        self.emit_first_point(self.last_point, dir);
        self.last_normal = normal;
        self.last_point = pt;
    }

    /// Checks the radial and angular error of the naive three-point
    /// offset; fills `result` with the best central offset when in bounds.
    fn estimate_quadratic_error(
        &self,
        c: f64,
        s: f64,
        normal: &[Normal; 2],
        result: &mut DVec2,
    ) -> bool {
        if !((3.0 + c) * (3.0 + c) < self.err_q * (1.0 + c)) {
            return false;
        }

        let mul = 1.0 / (1.0 + c);
        let l0 = 2.0 * normal[0].len;
        let l1 = 2.0 * normal[1].len;
        let dot0 = l0 + normal[1].len * c;
        let crs0 = (l0 * mul - normal[1].len) * s;
        let dot1 = l1 + normal[0].len * c;
        let crs1 = (l1 * mul - normal[0].len) * s;
        if !(crs0.abs() < self.err_a * dot0 && crs1.abs() < self.err_a * dot1) {
            return false;
        }

        result.x = (normal[0].v.x + normal[1].v.x) * mul;
        result.y = (normal[0].v.y + normal[1].v.y) * mul;
        true
    }

    fn process_quadratic(
        &mut self,
        pt: &[Vec2; 3],
        deriv: &[DVec2; 2],
        normal: &[Normal; 2],
        mut dir: i32,
        first: bool,
    ) {
        let c = normal[0].v.dot(normal[1].v);
        let s = normal[0].v.cross(normal[1].v);
        let mut check_dir = dir;
        let skip_dir = if s < 0.0 { 1 } else { 2 };

        if dir & skip_dir != 0 {
            let abs_s = s.abs();
            let f0 = normal[0].len * c + normal[1].len;
            let f1 = normal[1].len * c + normal[0].len;
            let g0 = normal[0].len * abs_s;
            let g1 = normal[1].len * abs_s;
            if f0 < abs_s && f1 < abs_s {
                let d2 = (f0 * normal[1].len + f1 * normal[0].len) / 2.0;
                if d2 < g0 && d2 < g1 {
                    self.prepare_skip(pt[0], skip_dir, first);
                    if f0 < 0.0 || f1 < 0.0 {
                        self.emit_point(pt[0], DVec2::default(), PTag::On, skip_dir);
                        self.emit_point(pt[2], DVec2::default(), PTag::On, skip_dir);
                    } else {
                        let mul = f0 / abs_s;
                        let offs = DVec2::new(normal[0].v.x * mul, normal[0].v.y * mul);
                        self.emit_point(pt[0], offs, PTag::On, skip_dir);
                    }
                    dir &= !skip_dir;
                    if dir == 0 {
                        self.last_normal = normal[1].v;
                        return;
                    }
                }
                check_dir ^= skip_dir;
            } else if c + g0 < 1.0 && c + g1 < 1.0 {
                check_dir ^= skip_dir;
            }
        }

        if check_dir != 0 {
            let mut result = DVec2::default();
            if self.estimate_quadratic_error(c, s, normal, &mut result) {
                self.emit_first_point(pt[0], check_dir);
                self.emit_point(pt[1], result, PTag::Conic, check_dir);
                dir &= !check_dir;
                if dir == 0 {
                    self.last_normal = normal[1].v;
                    return;
                }
            }
        }

        let mut next = [Vec2::default(); 5];
        next[1] = Vec2::new(pt[0].x + pt[1].x, pt[0].y + pt[1].y);
        next[3] = Vec2::new(pt[1].x + pt[2].x, pt[1].y + pt[2].y);
        next[2] = Vec2::new((next[1].x + next[3].x + 2) >> 2, (next[1].y + next[3].y + 2) >> 2);
        next[1] = Vec2::new(next[1].x >> 1, next[1].y >> 1);
        next[3] = Vec2::new(next[3].x >> 1, next[3].y >> 1);
        next[0] = pt[0];
        next[4] = pt[2];

        let mut next_deriv = [DVec2::default(); 3];
        next_deriv[0] = DVec2::new(deriv[0].x / 2.0, deriv[0].y / 2.0);
        next_deriv[2] = DVec2::new(deriv[1].x / 2.0, deriv[1].y / 2.0);
        next_deriv[1] = DVec2::new(
            (next_deriv[0].x + next_deriv[2].x) / 2.0,
            (next_deriv[0].y + next_deriv[2].y) / 2.0,
        );

        let len = next_deriv[1].length_squared().sqrt();
        if len < self.min_len {
            self.emit_first_point(next[0], dir);
            self.start_segment(next[2], normal[1].v, dir);
            self.last_skip &= !dir;
            self.emit_point(next[2], normal[1].v, PTag::On, dir);
            return;
        }

        let scale = 1.0 / len;
        let mid = Normal {
            v: DVec2::new(next_deriv[1].x * scale, next_deriv[1].y * scale),
            len,
        };
        let n0 = Normal {
            v: normal[0].v,
            len: normal[0].len / 2.0,
        };
        let n1 = Normal {
            v: normal[1].v,
            len: normal[1].len / 2.0,
        };

        self.process_quadratic(
            &[next[0], next[1], next[2]],
            &[next_deriv[0], next_deriv[1]],
            &[n0, mid],
            dir,
            first,
        );
        self.process_quadratic(
            &[next[2], next[3], next[4]],
            &[next_deriv[1], next_deriv[2]],
            &[mid, n1],
            dir,
            false,
        );
    }

    fn add_quadratic(&mut self, pt: &[Vec2; 3], dir: i32) {
        let dx0 = pt[1].x - pt[0].x;
        let dy0 = pt[1].y - pt[0].y;
        if dx0 > -self.eps && dx0 < self.eps && dy0 > -self.eps && dy0 < self.eps {
            self.add_line(pt[2], dir);
            return;
        }
        let dx1 = pt[2].x - pt[1].x;
        let dy1 = pt[2].y - pt[1].y;
        if dx1 > -self.eps && dx1 < self.eps && dy1 > -self.eps && dy1 < self.eps {
            self.add_line(pt[2], dir);
            return;
        }

        let deriv = [
            DVec2::new(dy0 as f64 * self.yscale, -(dx0 as f64) * self.xscale),
            DVec2::new(dy1 as f64 * self.yscale, -(dx1 as f64) * self.xscale),
        ];
        let len0 = deriv[0].length_squared().sqrt();
        let len1 = deriv[1].length_squared().sqrt();
        let normal = [
            Normal {
                v: DVec2::new(deriv[0].x / len0, deriv[0].y / len0),
                len: len0,
            },
            Normal {
                v: DVec2::new(deriv[1].x / len1, deriv[1].y / len1),
                len: len1,
            },
        ];

        let first = self.contour_start;
        self.start_segment(pt[0], normal[0].v, dir);
        self.process_quadratic(pt, &deriv, &normal, dir, first);
        self.last_point = pt[2];
    }

    /// Error estimator for the cubic case, accounting for both curvature
    /// extremes. Returns the directions that do not require subdivision.
    fn estimate_cubic_error(
        &self,
        c: f64,
        s: f64,
        dc: &[f64; 2],
        ds: &[f64; 2],
        normal: &[Normal; 2],
        result: &mut [DVec2; 2],
        check_flags: i32,
        mut dir: i32,
    ) -> i32 {
        let t = (ds[0] + ds[1]) / (dc[0] + dc[1]);
        let c1 = 1.0 + c;
        let ss = s * s;
        let ts = t * s;
        let tt = t * t;
        let ttc = tt * c1;
        let ttcc = ttc * c1;

        const W: f64 = 0.4;
        let f0 = [
            10.0 * W * (c - 1.0) + 9.0 * W * tt * c,
            2.0 * (c - 1.0) + 3.0 * tt + 2.0 * ts,
            2.0 * (c - 1.0) + 3.0 * tt - 2.0 * ts,
        ];
        let f1 = [
            18.0 * W * (ss - ttc * c),
            2.0 * ss - 6.0 * ttc - 2.0 * ts * (c + 4.0),
            2.0 * ss - 6.0 * ttc + 2.0 * ts * (c + 4.0),
        ];
        let f2 = [
            9.0 * W * (ttcc - ss) * c,
            3.0 * ss + 3.0 * ttcc + 6.0 * ts * c1,
            3.0 * ss + 3.0 * ttcc - 6.0 * ts * c1,
        ];

        let mut aa = 0.0;
        let mut ab = 0.0;
        let ch = (c1 / 2.0).sqrt();
        let inv_ro0 = 1.5 * ch * (ch + 1.0);
        for i in 0..3 {
            let a = 2.0 * f2[i] + f1[i] * inv_ro0;
            let b = f2[i] - f0[i] * inv_ro0 * inv_ro0;
            aa += a * a;
            ab += a * b;
        }
        let ro = ab / (aa * inv_ro0 + 1e-9); // best fit

        let mut err2 = 0.0;
        for i in 0..3 {
            let err = f0[i] + ro * (f1[i] + ro * f2[i]);
            err2 += err * err;
        }
        if !(err2 < self.err_c) {
            return 0;
        }

        let r = ro * c1 - 1.0;
        let ro0 = t * r - ro * s;
        let ro1 = t * r + ro * s;

        let check_dir = if check_flags & FLAG_DIR_2 != 0 { 2 } else { 1 };
        if dir & check_dir != 0 {
            let (mut test_s, mut test0, mut test1) = (s, ro0, ro1);
            if check_flags & FLAG_DIR_2 != 0 {
                test_s = -test_s;
                test0 = -test0;
                test1 = -test1;
            }
            let mut flags = 0;
            if 2.0 * test_s * r < dc[0] + dc[1] {
                flags |= FLAG_INTERSECTION;
            }
            if normal[0].len - test0 < 0.0 {
                flags |= FLAG_ZERO_0;
            }
            if normal[1].len + test1 < 0.0 {
                flags |= FLAG_ZERO_1;
            }
            if normal[0].len + dc[0] + test_s - test1 * c < 0.0 {
                flags |= FLAG_CLIP_0;
            }
            if normal[1].len + dc[1] + test_s + test0 * c < 0.0 {
                flags |= FLAG_CLIP_1;
            }
            if (flags ^ check_flags) & (check_flags >> FLAG_COUNT) != 0 {
                dir &= !check_dir;
                if dir == 0 {
                    return 0;
                }
            }
        }

        let d0c = 2.0 * dc[0];
        let d0s = 2.0 * ds[0];
        let d1c = 2.0 * dc[1];
        let d1s = 2.0 * ds[1];
        let dot0 = d0c + 3.0 * normal[0].len;
        let crs0 = d0s + 3.0 * ro0 * normal[0].len;
        let dot1 = d1c + 3.0 * normal[1].len;
        let crs1 = d1s + 3.0 * ro1 * normal[1].len;
        if !(crs0.abs() < self.err_a * dot0 && crs1.abs() < self.err_a * dot1) {
            return 0;
        }

        let cl0 = c * normal[0].len;
        let sl0 = s * normal[0].len;
        let cl1 = c * normal[1].len;
        let sl1 = -s * normal[1].len;
        let dot0 = d0c - ro0 * d0s + cl0 + ro1 * sl0 + cl1 / 3.0;
        let dot1 = d1c - ro1 * d1s + cl1 + ro0 * sl1 + cl0 / 3.0;
        let crs0 = d0s + ro0 * d0c - sl0 + ro1 * cl0 - sl1 / 3.0;
        let crs1 = d1s + ro1 * d1c - sl1 + ro0 * cl1 - sl0 / 3.0;
        if !(crs0.abs() < self.err_a * dot0 && crs1.abs() < self.err_a * dot1) {
            return 0;
        }

        result[0] = DVec2::new(
            normal[0].v.x + normal[0].v.y * ro0,
            normal[0].v.y - normal[0].v.x * ro0,
        );
        result[1] = DVec2::new(
            normal[1].v.x + normal[1].v.y * ro1,
            normal[1].v.y - normal[1].v.x * ro1,
        );
        dir
    }

    fn process_cubic(
        &mut self,
        pt: &[Vec2; 4],
        deriv: &[DVec2; 3],
        normal: &[Normal; 2],
        mut dir: i32,
        first: bool,
    ) {
        let c = normal[0].v.dot(normal[1].v);
        let s = normal[0].v.cross(normal[1].v);
        let dc = [normal[0].v.dot(deriv[1]), normal[1].v.dot(deriv[1])];
        let ds = [normal[0].v.cross(deriv[1]), normal[1].v.cross(deriv[1])];
        let f0 = normal[0].len * c + normal[1].len + dc[1];
        let f1 = normal[1].len * c + normal[0].len + dc[0];
        let mut g0 = normal[0].len * s - ds[1];
        let mut g1 = normal[1].len * s + ds[0];

        let mut abs_s = s;
        let mut check_dir = dir;
        let mut skip_dir = 2;
        let mut flags = FLAG_INTERSECTION | FLAG_DIR_2;
        if s < 0.0 {
            abs_s = -s;
            skip_dir = 1;
            flags = 0;
            g0 = -g0;
            g1 = -g1;
        }

        if !(dc[0] + dc[1] > 0.0) {
            check_dir = 0;
        } else if dir & skip_dir != 0 {
            if f0 < abs_s && f1 < abs_s {
                let mut d2 = (f0 + dc[1]) * normal[1].len + (f1 + dc[0]) * normal[0].len;
                d2 = (d2 + deriv[1].dot(deriv[1])) / 2.0;
                if d2 < g0 && d2 < g1 {
                    let q = (d2 / (2.0 - d2)).sqrt();
                    let h0 = (f0 * q + g0) * normal[1].len;
                    let h1 = (f1 * q + g1) * normal[0].len;
                    let q = q * (4.0 / 3.0) * d2;
                    if h0 > q && h1 > q {
                        self.prepare_skip(pt[0], skip_dir, first);
                        if f0 < 0.0 || f1 < 0.0 {
                            self.emit_point(pt[0], DVec2::default(), PTag::On, skip_dir);
                            self.emit_point(pt[3], DVec2::default(), PTag::On, skip_dir);
                        } else {
                            let mul = f0 / abs_s;
                            let offs = DVec2::new(normal[0].v.x * mul, normal[0].v.y * mul);
                            self.emit_point(pt[0], offs, PTag::On, skip_dir);
                        }
                        dir &= !skip_dir;
                        if dir == 0 {
                            self.last_normal = normal[1].v;
                            return;
                        }
                    }
                }
                check_dir ^= skip_dir;
            } else {
                if ds[0] < 0.0 {
                    flags ^= MASK_INTERSECTION;
                }
                if ds[1] < 0.0 {
                    flags ^= MASK_INTERSECTION | FLAG_INTERSECTION;
                }
                let parallel = flags & MASK_INTERSECTION != 0;
                let mut badness = if parallel { 0 } else { 1 };
                if c + g0 < 1.0 {
                    if parallel {
                        flags ^= MASK_ZERO_0 | FLAG_ZERO_0;
                        if c < 0.0 {
                            flags ^= MASK_CLIP_0;
                        }
                        if f0 > abs_s {
                            flags ^= FLAG_ZERO_0 | FLAG_CLIP_0;
                        }
                    }
                    badness += 1;
                } else {
                    flags ^= MASK_INTERSECTION | FLAG_INTERSECTION;
                    if !parallel {
                        flags ^= MASK_ZERO_0;
                        if c > 0.0 {
                            flags ^= MASK_CLIP_0;
                        }
                    }
                }
                if c + g1 < 1.0 {
                    if parallel {
                        flags ^= MASK_ZERO_1 | FLAG_ZERO_1;
                        if c < 0.0 {
                            flags ^= MASK_CLIP_1;
                        }
                        if f1 > abs_s {
                            flags ^= FLAG_ZERO_1 | FLAG_CLIP_1;
                        }
                    }
                    badness += 1;
                } else {
                    flags ^= MASK_INTERSECTION;
                    if !parallel {
                        flags ^= MASK_ZERO_1;
                        if c > 0.0 {
                            flags ^= MASK_CLIP_1;
                        }
                    }
                }
                if badness > 2 {
                    check_dir ^= skip_dir;
                }
            }
        }

        if check_dir != 0 {
            let mut result = [DVec2::default(); 2];
            check_dir = self.estimate_cubic_error(c, s, &dc, &ds, normal, &mut result, flags, check_dir);
            if check_dir != 0 {
                self.emit_first_point(pt[0], check_dir);
                self.emit_point(pt[1], result[0], PTag::Cubic, check_dir);
                self.emit_point(pt[2], result[1], PTag::Cubic, check_dir);
                dir &= !check_dir;
                if dir == 0 {
                    self.last_normal = normal[1].v;
                    return;
                }
            }
        }

        // De Casteljau split at t = 1/2.
        let mut next = [Vec2::default(); 7];
        next[1] = Vec2::new(pt[0].x + pt[1].x, pt[0].y + pt[1].y);
        let center = Vec2::new(pt[1].x + pt[2].x + 2, pt[1].y + pt[2].y + 2);
        next[5] = Vec2::new(pt[2].x + pt[3].x, pt[2].y + pt[3].y);
        next[2] = Vec2::new(next[1].x + center.x, next[1].y + center.y);
        next[4] = Vec2::new(center.x + next[5].x, center.y + next[5].y);
        next[3] = Vec2::new((next[2].x + next[4].x - 1) >> 3, (next[2].y + next[4].y - 1) >> 3);
        next[2] = Vec2::new(next[2].x >> 2, next[2].y >> 2);
        next[4] = Vec2::new(next[4].x >> 2, next[4].y >> 2);
        next[1] = Vec2::new(next[1].x >> 1, next[1].y >> 1);
        next[5] = Vec2::new(next[5].x >> 1, next[5].y >> 1);
        next[0] = pt[0];
        next[6] = pt[3];

        let mut next_deriv = [DVec2::default(); 5];
        next_deriv[0] = DVec2::new(deriv[0].x / 2.0, deriv[0].y / 2.0);
        let center_deriv = DVec2::new(deriv[1].x / 2.0, deriv[1].y / 2.0);
        next_deriv[4] = DVec2::new(deriv[2].x / 2.0, deriv[2].y / 2.0);
        next_deriv[1] = DVec2::new(
            (next_deriv[0].x + center_deriv.x) / 2.0,
            (next_deriv[0].y + center_deriv.y) / 2.0,
        );
        next_deriv[3] = DVec2::new(
            (center_deriv.x + next_deriv[4].x) / 2.0,
            (center_deriv.y + next_deriv[4].y) / 2.0,
        );
        next_deriv[2] = DVec2::new(
            (next_deriv[1].x + next_deriv[3].x) / 2.0,
            (next_deriv[1].y + next_deriv[3].y) / 2.0,
        );

        let len = next_deriv[2].length_squared().sqrt();
        if len < self.min_len {
            // Degenerate middle: straighten the center and process the
            // stable halves separately.
            let n0 = Normal {
                v: normal[0].v,
                len: normal[0].len / 2.0,
            };
            let n3 = Normal {
                v: normal[1].v,
                len: normal[1].len / 2.0,
            };
            next_deriv[1] = DVec2::new(
                next_deriv[1].x + next_deriv[2].x,
                next_deriv[1].y + next_deriv[2].y,
            );
            next_deriv[3] = DVec2::new(
                next_deriv[3].x + next_deriv[2].x,
                next_deriv[3].y + next_deriv[2].y,
            );
            next_deriv[2] = DVec2::default();

            let len1 = next_deriv[1].length_squared().sqrt();
            let n1 = if len1 < self.min_len {
                Normal {
                    v: normal[0].v,
                    len: normal[0].len,
                }
            } else {
                Normal {
                    v: DVec2::new(next_deriv[1].x / len1, next_deriv[1].y / len1),
                    len: len1,
                }
            };
            let len2 = next_deriv[3].length_squared().sqrt();
            let n2 = if len2 < self.min_len {
                Normal {
                    v: normal[1].v,
                    len: normal[1].len,
                }
            } else {
                Normal {
                    v: DVec2::new(next_deriv[3].x / len2, next_deriv[3].y / len2),
                    len: len2,
                }
            };

            if len1 < self.min_len {
                self.emit_first_point(next[0], dir);
            } else {
                self.process_cubic(
                    &[next[0], next[1], next[2], next[3]],
                    &[next_deriv[0], next_deriv[1], next_deriv[2]],
                    &[n0, n1],
                    dir,
                    first,
                );
            }
            self.start_segment(next[3], n2.v, dir);
            if len2 < self.min_len {
                self.emit_first_point(next[3], dir);
            } else {
                self.process_cubic(
                    &[next[3], next[4], next[5], next[6]],
                    &[next_deriv[2], next_deriv[3], next_deriv[4]],
                    &[n2, n3],
                    dir,
                    false,
                );
            }
            return;
        }

        let scale = 1.0 / len;
        let mid = Normal {
            v: DVec2::new(next_deriv[2].x * scale, next_deriv[2].y * scale),
            len,
        };
        let n0 = Normal {
            v: normal[0].v,
            len: normal[0].len / 2.0,
        };
        let n1 = Normal {
            v: normal[1].v,
            len: normal[1].len / 2.0,
        };
        self.process_cubic(
            &[next[0], next[1], next[2], next[3]],
            &[next_deriv[0], next_deriv[1], next_deriv[2]],
            &[n0, mid],
            dir,
            first,
        );
        self.process_cubic(
            &[next[3], next[4], next[5], next[6]],
            &[next_deriv[2], next_deriv[3], next_deriv[4]],
            &[mid, n1],
            dir,
            false,
        );
    }

    fn add_cubic(&mut self, pt: &[Vec2; 4], dir: i32) {
        let mut flags = 9;

        let mut dx0 = pt[1].x - pt[0].x;
        let mut dy0 = pt[1].y - pt[0].y;
        if dx0 > -self.eps && dx0 < self.eps && dy0 > -self.eps && dy0 < self.eps {
            dx0 = pt[2].x - pt[0].x;
            dy0 = pt[2].y - pt[0].y;
            if dx0 > -self.eps && dx0 < self.eps && dy0 > -self.eps && dy0 < self.eps {
                self.add_line(pt[3], dir);
                return;
            }
            flags ^= 1;
        }

        let mut dx2 = pt[3].x - pt[2].x;
        let mut dy2 = pt[3].y - pt[2].y;
        if dx2 > -self.eps && dx2 < self.eps && dy2 > -self.eps && dy2 < self.eps {
            dx2 = pt[3].x - pt[1].x;
            dy2 = pt[3].y - pt[1].y;
            if dx2 > -self.eps && dx2 < self.eps && dy2 > -self.eps && dy2 < self.eps {
                self.add_line(pt[3], dir);
                return;
            }
            flags ^= 4;
        }

        if flags == 12 {
            self.add_line(pt[3], dir);
            return;
        }

        let dx1 = pt[(flags >> 2) as usize].x - pt[(flags & 3) as usize].x;
        let dy1 = pt[(flags >> 2) as usize].y - pt[(flags & 3) as usize].y;

        let deriv = [
            DVec2::new(dy0 as f64 * self.yscale, -(dx0 as f64) * self.xscale),
            DVec2::new(dy1 as f64 * self.yscale, -(dx1 as f64) * self.xscale),
            DVec2::new(dy2 as f64 * self.yscale, -(dx2 as f64) * self.xscale),
        ];
        let len0 = deriv[0].length_squared().sqrt();
        let len2 = deriv[2].length_squared().sqrt();
        let normal = [
            Normal {
                v: DVec2::new(deriv[0].x / len0, deriv[0].y / len0),
                len: len0,
            },
            Normal {
                v: DVec2::new(deriv[2].x / len2, deriv[2].y / len2),
                len: len2,
            },
        ];

        let first = self.contour_start;
        self.start_segment(pt[0], normal[0].v, dir);
        self.process_cubic(pt, &deriv, &normal, dir, first);
        self.last_point = pt[3];
    }

    fn close_contour(&mut self, mut dir: i32) -> bool {
        if self.contour_start {
            if dir & 3 == 3 {
                dir = 1;
            }
            self.draw_circle(self.last_point, dir);
        } else {
            self.add_line(self.first_point, dir);
            self.start_segment(self.first_point, self.first_normal, dir);
            self.emit_point(
                self.first_point,
                self.first_normal,
                PTag::On,
                !self.last_skip & dir & self.first_skip,
            );
            if self.last_normal != self.first_normal {
                let offs = self.last_normal;
                self.fix_first_point(
                    self.first_point,
                    offs,
                    !self.last_skip & dir & !self.first_skip,
                );
            }
            self.contour_start = true;
        }
        if dir & 1 != 0 && !self.result[0].close() {
            return false;
        }
        if dir & 2 != 0 && !self.result[1].close() {
            return false;
        }
        true
    }
}

/// Strokes `path` with border half-widths `(xbord, ybord)` and tolerance
/// `eps`, all in 1/64-pixel units. Returns the two offset outlines.
pub(crate) fn stroke_outline(
    path: &Outline,
    xbord: i32,
    ybord: i32,
    eps: i32,
) -> Option<(Outline, Outline)> {
    let rad = xbord.max(ybord);
    debug_assert!(rad >= eps);

    let rel_err = eps as f64 / rad as f64;
    let e = (2.0 * rel_err).sqrt();
    let mut str = Stroker {
        result: [ContourStream::default(), ContourStream::default()],
        xbord: xbord as f64,
        ybord: ybord as f64,
        xscale: 1.0 / xbord.max(eps) as f64,
        yscale: 1.0 / ybord.max(eps) as f64,
        eps,
        contour_start: true,
        first_skip: 0,
        last_skip: 0,
        first_normal: DVec2::default(),
        last_normal: DVec2::default(),
        first_point: Vec2::default(),
        last_point: Vec2::default(),
        merge_cos: 1.0 - rel_err,
        split_cos: 1.0 + 8.0 * rel_err - 4.0 * (1.0 + rel_err) * e,
        min_len: rel_err / 4.0,
        err_q: 8.0 * (1.0 + rel_err) * (1.0 + rel_err),
        err_c: 390.0 * rel_err * rel_err,
        err_a: e,
    };

    const DIR: i32 = 3;
    let mut contour_first = true;
    for seg in path.iter_segments() {
        if contour_first {
            str.last_point = seg.pts[0];
            contour_first = false;
        }
        match seg.kind {
            SegmentKind::Line => str.add_line(seg.pts[1], DIR),
            SegmentKind::Quadratic => {
                str.add_quadratic(&[seg.pts[0], seg.pts[1], seg.pts[2]], DIR);
            }
            SegmentKind::Cubic => {
                str.add_cubic(&[seg.pts[0], seg.pts[1], seg.pts[2], seg.pts[3]], DIR);
            }
        }
        if seg.contour_end {
            if !str.close_contour(DIR) {
                return None;
            }
            contour_first = true;
        }
    }
    let [r0, r1] = str.result;
    Some((r0.outline, r1.outline))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Rasterizer;
    use sable_primitives::Rect;

    fn square(px: i32) -> Outline {
        let mut ol = Outline::new();
        ol.add_rect(0, 0, px * 64, px * 64);
        ol
    }

    #[test]
    fn stroked_square_grows_by_border() {
        let src = square(20);
        let bord = 3 * 64;
        let (outer, inner) = stroke_outline(&src, bord, bord, 16).unwrap();
        assert!(!outer.is_empty());
        assert!(!inner.is_empty());
        // The outer offset extends ~3px beyond the source on every side;
        // rounded corners keep it within the padded box.
        let mut grown = Rect::reset();
        outer.update_cbox(&mut grown);
        assert!(grown.x_min <= -(bord - 16) && grown.x_min >= -bord - 64);
        assert!(grown.x_max >= 20 * 64 + bord - 16 && grown.x_max <= 20 * 64 + bord + 64);
        assert!(grown.y_min <= -(bord - 16));
        assert!(grown.y_max >= 20 * 64 + bord - 16);
    }

    #[test]
    fn stroked_pair_rasterizes_solid() {
        // Both offset outlines together, under nonzero winding, fill the
        // grown shape solidly: interior winding may reach 2 but clamps.
        let src = square(10);
        let bord = 2 * 64;
        let (outer, inner) = stroke_outline(&src, bord, bord, 16).unwrap();
        let mut rst = Rasterizer::new(4, 16);
        assert!(rst.set_outline(&outer, Some(&inner)));
        let mut buf = vec![0u8; 32 * 32];
        // Shift by +4px so the negative border region is visible.
        assert!(rst.fill(&mut buf, -4, -4, 32, 32, 32));
        let px = |x: i32, y: i32| buf[((y + 4) * 32 + x + 4) as usize];
        assert_eq!(px(5, 5), 255, "center");
        assert_eq!(px(-1, 5), 255, "inside left border");
        assert_eq!(px(11, 5), 255, "inside right border");
        assert_eq!(px(-4, 5), 0, "beyond the border");
    }

    #[test]
    fn anisotropic_border() {
        let src = square(20);
        let (outer, _) = stroke_outline(&src, 4 * 64, 64, 16).unwrap();
        let mut cbox = Rect::reset();
        outer.update_cbox(&mut cbox);
        assert!(cbox.x_min <= -(4 * 64 - 16));
        assert!(cbox.y_min <= -(64 - 16));
        assert!(cbox.y_min > -(2 * 64));
    }

    #[test]
    fn segment_orders_stay_consistent() {
        // A box with one rounded corner: line, quadratic, then lines.
        let mut src = Outline::new();
        let _ = src.add_point(Vec2::new(0, 0));
        let _ = src.add_point(Vec2::new(1280, 0));
        let _ = src.add_point(Vec2::new(1280, 640));
        let _ = src.add_point(Vec2::new(1280, 1280));
        let _ = src.add_point(Vec2::new(0, 1280));
        src.add_segment(SegmentKind::Line);
        src.add_segment(SegmentKind::Quadratic);
        src.add_segment(SegmentKind::Line);
        src.add_segment(SegmentKind::Line);
        src.close_contour();
        let order_sum: usize = src.segments().iter().map(|s| s.kind.order()).sum();
        assert_eq!(order_sum, src.points().len());

        let (outer, inner) = stroke_outline(&src, 128, 128, 16).unwrap();
        for ol in [&outer, &inner] {
            let order_sum: usize = ol.segments().iter().map(|s| s.kind.order()).sum();
            assert_eq!(order_sum, ol.points().len());
        }
    }

    #[test]
    fn zero_length_contour_draws_circle() {
        // A contour that collapses below eps turns into a full circle on
        // the first output outline.
        let mut src = Outline::new();
        let _ = src.add_point(Vec2::new(100, 100));
        let _ = src.add_point(Vec2::new(101, 100));
        let _ = src.add_point(Vec2::new(100, 101));
        src.add_segment(SegmentKind::Line);
        src.add_segment(SegmentKind::Line);
        src.add_segment(SegmentKind::Line);
        src.close_contour();
        let (outer, inner) = stroke_outline(&src, 2 * 64, 2 * 64, 16).unwrap();
        assert!(!outer.is_empty());
        assert!(inner.is_empty());
        let mut cbox = Rect::reset();
        outer.update_cbox(&mut cbox);
        // Radius ~2px circle around (100, 100)-ish.
        assert!(cbox.x_max - cbox.x_min > 3 * 64);
        assert!(cbox.x_max - cbox.x_min < 5 * 64);
    }
}
