// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Outline storage: points plus segment tags.
//!
//! An outline is an ordered sequence of 26.6 fixed-point points and a
//! parallel sequence of segments. A segment is a spline of order 1 (line),
//! 2 (quadratic) or 3 (cubic). Each segment owns a number of points equal to
//! its order and uses the first point owned by the next segment as its last
//! point. The last segment in each contour instead closes onto the point
//! owned by the first segment of that contour. Correspondingly the total
//! point count equals the sum of spline orders over all segments.
//!
//! Coordinates are y-down (bitmap space) and must stay within
//! [`OUTLINE_MAX`] in magnitude so that spline subdivision fits in 32 bits.

use sable_primitives::{DVec2, Matrix3, Rect, Vec2};

/// Outline point coordinates are constrained to `[-OUTLINE_MAX, OUTLINE_MAX]`.
// Cubic spline splitting requires 8 * OUTLINE_MAX + 4 <= i32::MAX.
pub const OUTLINE_MAX: i32 = (1 << 28) - 1;

/// Spline order of one outline segment.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SegmentKind {
    Line = 1,
    Quadratic = 2,
    Cubic = 3,
}

impl SegmentKind {
    /// Number of points owned by a segment of this kind.
    pub fn order(self) -> usize {
        self as usize
    }
}

/// One segment tag: spline order plus a contour-end bit.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SegmentTag {
    pub kind: SegmentKind,
    pub contour_end: bool,
}

/// A decoded segment: `pts[0..=order]` are the control points, with the
/// terminal point resolved through contour closure.
#[derive(Copy, Clone, Debug)]
pub struct SegmentView {
    pub kind: SegmentKind,
    pub pts: [Vec2; 4],
    pub contour_end: bool,
}

/// An outline represented as arrays of points and segment tags.
#[derive(Clone, Default, Debug)]
pub struct Outline {
    points: Vec<Vec2>,
    segments: Vec<SegmentTag>,
}

impl Outline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n_points: usize, n_segments: usize) -> Self {
        Self {
            points: Vec::with_capacity(n_points),
            segments: Vec::with_capacity(n_segments),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn points(&self) -> &[Vec2] {
        &self.points
    }

    pub fn segments(&self) -> &[SegmentTag] {
        &self.segments
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.segments.clear();
    }

    /// Appends a point. Returns `false` if the coordinate range invariant
    /// would be violated.
    pub fn add_point(&mut self, pt: Vec2) -> bool {
        if pt.x < -OUTLINE_MAX || pt.x > OUTLINE_MAX || pt.y < -OUTLINE_MAX || pt.y > OUTLINE_MAX {
            return false;
        }
        self.points.push(pt);
        true
    }

    pub fn add_segment(&mut self, kind: SegmentKind) {
        self.segments.push(SegmentTag {
            kind,
            contour_end: false,
        });
    }

    /// Marks the last segment as the end of the current contour.
    pub fn close_contour(&mut self) {
        if let Some(last) = self.segments.last_mut() {
            last.contour_end = true;
        }
    }

    /// Appends an axis-aligned rectangle as a four-line contour.
    pub fn add_rect(&mut self, x0: i32, y0: i32, x1: i32, y1: i32) {
        self.points.extend_from_slice(&[
            Vec2::new(x0, y0),
            Vec2::new(x1, y0),
            Vec2::new(x1, y1),
            Vec2::new(x0, y1),
        ]);
        for _ in 0..4 {
            self.add_segment(SegmentKind::Line);
        }
        self.close_contour();
    }

    /// Iterates decoded segments with contour closure applied.
    pub fn iter_segments(&self) -> SegmentIter<'_> {
        SegmentIter {
            outline: self,
            seg_index: 0,
            point_index: 0,
            contour_start: 0,
        }
    }

    /// Grows `cbox` to cover every control point.
    pub fn update_cbox(&self, cbox: &mut Rect) {
        for p in &self.points {
            cbox.update_point(*p);
        }
    }

    /// Control-point bounding box, or the zero rectangle when empty.
    pub fn cbox(&self) -> Rect {
        let mut cbox = Rect::reset();
        self.update_cbox(&mut cbox);
        if cbox.is_empty() {
            Rect::new(0, 0, 0, 0)
        } else {
            cbox
        }
    }

    /// Coordinate shift by `±ord` bits per axis. Fails when a resulting
    /// coordinate would exceed [`OUTLINE_MAX`].
    pub fn scale_pow2(&self, ord_x: i32, ord_y: i32) -> Option<Self> {
        let scale = |v: i32, ord: i32| -> Option<i32> {
            let wide = if ord >= 0 {
                (v as i64) << ord.min(32)
            } else {
                let shift = (-ord).min(32);
                // Arithmetic shift rounds toward negative infinity.
                (v as i64) >> shift
            };
            if wide < -(OUTLINE_MAX as i64) || wide > OUTLINE_MAX as i64 {
                None
            } else {
                Some(wide as i32)
            }
        };
        let mut points = Vec::with_capacity(self.points.len());
        for p in &self.points {
            points.push(Vec2::new(scale(p.x, ord_x)?, scale(p.y, ord_y)?));
        }
        Some(Self {
            points,
            segments: self.segments.clone(),
        })
    }

    /// Affine 2×3 transform producing a new outline.
    pub fn transform_2d(&self, m: &[[f64; 3]; 2]) -> Option<Self> {
        let mut out = Self::with_capacity(self.points.len(), self.segments.len());
        for p in &self.points {
            let x = m[0][0] * p.x as f64 + m[0][1] * p.y as f64 + m[0][2];
            let y = m[1][0] * p.x as f64 + m[1][1] * p.y as f64 + m[1][2];
            if !out.add_point(round_checked(x, y)?) {
                return None;
            }
        }
        out.segments = self.segments.clone();
        Some(out)
    }

    /// Projective transform producing a new outline.
    ///
    /// Spline order is preserved; a segment whose control-point depth range
    /// crosses the near horizon is subdivided until each piece lies on one
    /// side, then pieces behind the horizon are projected with clamped depth.
    pub fn transform_3d(&self, m: &Matrix3) -> Option<Self> {
        let horizon = m.m[2][2] / super::transform::MAX_PERSP_SCALE;
        let horizon = if horizon > 0.0 { horizon } else { 0.1 };
        let mut out = Self::with_capacity(self.points.len(), self.segments.len());
        for seg in self.iter_segments() {
            let n = seg.kind.order() + 1;
            let mut ctrl = [DVec2::default(); 4];
            for (dst, src) in ctrl[..n].iter_mut().zip(seg.pts[..n].iter()) {
                *dst = DVec2::new(src.x as f64, src.y as f64);
            }
            if !project_spline(&mut out, m, horizon, &ctrl[..n], 8) {
                return None;
            }
            if seg.contour_end {
                out.close_contour();
            }
        }
        Some(out)
    }

    /// Lowers `min_x` to the minimal transformed x over all control points,
    /// in 26.6 units. Used for the karaoke fill origin.
    pub fn update_min_transformed_x(&self, m: &Matrix3, min_x: &mut i32) {
        for p in &self.points {
            let v = m.apply(DVec2::new(p.x as f64, p.y as f64));
            let x = v.x.max(-(OUTLINE_MAX as f64)).min(OUTLINE_MAX as f64);
            *min_x = (*min_x).min(x.round() as i32);
        }
    }
}

fn round_checked(x: f64, y: f64) -> Option<Vec2> {
    let max = OUTLINE_MAX as f64;
    if !(x.abs() < max && y.abs() < max) {
        return None;
    }
    Some(Vec2::new(x.round() as i32, y.round() as i32))
}

/// Projects one spline through `m`, subdividing across the depth horizon.
fn project_spline(out: &mut Outline, m: &Matrix3, horizon: f64, ctrl: &[DVec2], depth: u32) -> bool {
    let mut z_min = f64::MAX;
    let mut z_max = f64::MIN;
    for p in ctrl {
        let z = m.depth(*p);
        z_min = z_min.min(z);
        z_max = z_max.max(z);
    }
    if depth > 0 && ctrl.len() > 2 && z_min < horizon && z_max > horizon {
        let (a, b) = split_spline(ctrl);
        return project_spline(out, m, horizon, &a[..ctrl.len()], depth - 1)
            && project_spline(out, m, horizon, &b[..ctrl.len()], depth - 1);
    }
    let kind = match ctrl.len() {
        2 => SegmentKind::Line,
        3 => SegmentKind::Quadratic,
        _ => SegmentKind::Cubic,
    };
    // All control points of one emitted segment except the last; the
    // terminal point belongs to the following segment.
    for p in &ctrl[..ctrl.len() - 1] {
        let z = m.depth(*p).max(horizon);
        let w = 1.0 / z;
        let x = (m.m[0][0] * p.x + m.m[0][1] * p.y + m.m[0][2]) * w;
        let y = (m.m[1][0] * p.x + m.m[1][1] * p.y + m.m[1][2]) * w;
        match round_checked(x, y) {
            Some(v) => {
                if !out.add_point(v) {
                    return false;
                }
            }
            None => return false,
        }
    }
    out.add_segment(kind);
    true
}

/// De Casteljau split at t = 1/2 for splines of any order up to cubic.
fn split_spline(ctrl: &[DVec2]) -> ([DVec2; 4], [DVec2; 4]) {
    let mut work = [DVec2::default(); 4];
    work[..ctrl.len()].copy_from_slice(ctrl);
    let n = ctrl.len();
    let mut left = [DVec2::default(); 4];
    let mut right = [DVec2::default(); 4];
    left[0] = work[0];
    right[n - 1] = work[n - 1];
    for level in 1..n {
        for i in 0..n - level {
            work[i] = DVec2::new(
                (work[i].x + work[i + 1].x) * 0.5,
                (work[i].y + work[i + 1].y) * 0.5,
            );
        }
        left[level] = work[0];
        right[n - 1 - level] = work[n - 1 - level];
    }
    (left, right)
}

/// Iterator over decoded segments.
#[derive(Debug)]
pub struct SegmentIter<'a> {
    outline: &'a Outline,
    seg_index: usize,
    point_index: usize,
    contour_start: usize,
}

impl Iterator for SegmentIter<'_> {
    type Item = SegmentView;

    fn next(&mut self) -> Option<SegmentView> {
        let tag = *self.outline.segments.get(self.seg_index)?;
        let order = tag.kind.order();
        let points = &self.outline.points;
        if self.point_index + order > points.len() {
            return None;
        }
        let mut pts = [Vec2::default(); 4];
        pts[..order].copy_from_slice(&points[self.point_index..self.point_index + order]);
        let next_point = self.point_index + order;
        pts[order] = if tag.contour_end {
            points[self.contour_start]
        } else {
            *points.get(next_point)?
        };
        self.seg_index += 1;
        self.point_index = next_point;
        if tag.contour_end {
            self.contour_start = next_point;
        }
        Some(SegmentView {
            kind: tag.kind,
            pts,
            contour_end: tag.contour_end,
        })
    }
}

/// Incremental outline builder used by the font loader and the drawing
/// parser. Contours with fewer than three points are degenerate and are
/// discarded, which keeps the downstream invariants intact.
#[derive(Default, Debug)]
pub struct ContourBuilder {
    outline: Outline,
    contour_points: Vec<Vec2>,
    contour_tags: Vec<SegmentKind>,
    start: Option<Vec2>,
    valid: bool,
}

impl ContourBuilder {
    pub fn new() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }

    pub fn move_to(&mut self, p: Vec2) {
        self.flush();
        self.start = Some(p);
    }

    pub fn line_to(&mut self, p: Vec2) {
        if self.start.is_some() {
            self.contour_tags.push(SegmentKind::Line);
            self.push_owned(p);
        }
    }

    pub fn quad_to(&mut self, c: Vec2, p: Vec2) {
        if self.start.is_some() {
            self.contour_tags.push(SegmentKind::Quadratic);
            self.push_owned(c);
            self.push_owned(p);
        }
    }

    pub fn cubic_to(&mut self, c0: Vec2, c1: Vec2, p: Vec2) {
        if self.start.is_some() {
            self.contour_tags.push(SegmentKind::Cubic);
            self.push_owned(c0);
            self.push_owned(c1);
            self.push_owned(p);
        }
    }

    pub fn close(&mut self) {
        self.flush();
    }

    /// Finishes the outline. Returns `None` if any coordinate was out of
    /// range or the outline ended up empty.
    pub fn finish(mut self) -> Option<Outline> {
        self.flush();
        if !self.valid || self.outline.is_empty() {
            return None;
        }
        Some(self.outline)
    }

    // The terminal on-curve point of each spline is owned by the *next*
    // segment, so points are staged and shifted by one on flush.
    fn push_owned(&mut self, p: Vec2) {
        self.contour_points.push(p);
    }

    fn flush(&mut self) {
        let start = match self.start.take() {
            Some(s) => s,
            None => {
                self.contour_points.clear();
                self.contour_tags.clear();
                return;
            }
        };
        // Points in contour order: start + all interior/control points.
        // The final point of the last segment closes onto start; when the
        // path did not end at start, an implicit closing line is added.
        let mut pts = Vec::with_capacity(self.contour_points.len() + 1);
        pts.push(start);
        pts.extend_from_slice(&self.contour_points);
        let mut tags = core::mem::take(&mut self.contour_tags);
        self.contour_points.clear();
        if tags.is_empty() {
            return;
        }
        if *pts.last().unwrap() == start {
            pts.pop();
        } else {
            tags.push(SegmentKind::Line);
        }
        if pts.len() < 3 {
            return;
        }
        for p in pts {
            if !self.outline.add_point(p) {
                self.valid = false;
                return;
            }
        }
        for t in tags {
            self.outline.add_segment(t);
        }
        self.outline.close_contour();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Outline {
        let mut ol = Outline::new();
        ol.add_rect(0, 0, 64, 64);
        ol
    }

    #[test]
    fn segment_order_sum_matches_point_count() {
        let ol = square();
        let order_sum: usize = ol.segments().iter().map(|s| s.kind.order()).sum();
        assert_eq!(order_sum, ol.points().len());
    }

    #[test]
    fn iteration_closes_contour() {
        let ol = square();
        let segs: Vec<_> = ol.iter_segments().collect();
        assert_eq!(segs.len(), 4);
        assert_eq!(segs[3].pts[1], Vec2::new(0, 0));
        assert!(segs[3].contour_end);
        assert!(!segs[0].contour_end);
    }

    #[test]
    fn scale_pow2_bounds() {
        let ol = square();
        let scaled = ol.scale_pow2(2, 1).unwrap();
        assert_eq!(scaled.points()[2], Vec2::new(256, 128));
        // Shifting to the edge of the range must fail.
        assert!(ol.scale_pow2(31, 0).is_none());
    }

    #[test]
    fn builder_discards_degenerate_contours() {
        let mut b = ContourBuilder::new();
        b.move_to(Vec2::new(0, 0));
        b.line_to(Vec2::new(64, 0));
        b.close();
        // Two points only: dropped.
        assert!(b.finish().is_none());

        let mut b = ContourBuilder::new();
        b.move_to(Vec2::new(0, 0));
        b.line_to(Vec2::new(64, 0));
        b.line_to(Vec2::new(64, 64));
        b.close();
        let ol = b.finish().unwrap();
        assert_eq!(ol.points().len(), 3);
        let order_sum: usize = ol.segments().iter().map(|s| s.kind.order()).sum();
        assert_eq!(order_sum, 3);
    }

    #[test]
    fn transform_2d_checks_range() {
        let ol = square();
        let id = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let moved = ol.transform_2d(&id).unwrap();
        assert_eq!(moved.points(), ol.points());
        let huge = [[1.0e9, 0.0, 0.0], [0.0, 1.0, 0.0]];
        assert!(ol.transform_2d(&huge).is_none());
    }

    #[test]
    fn transform_3d_identity() {
        let ol = square();
        let out = ol.transform_3d(&Matrix3::IDENTITY).unwrap();
        assert_eq!(out.points(), ol.points());
        assert_eq!(out.segments().len(), ol.segments().len());
    }
}
