// Copyright 2025 the Sable Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! 3×3 projective transform matrices.

use crate::geom::DVec2;

/// A 3×3 matrix mapping outline space to screen space.
///
/// The full transform is
/// `x_out = (m[0][0]·x + m[0][1]·y + m[0][2]) / z`,
/// `y_out = (m[1][0]·x + m[1][1]·y + m[1][2]) / z`,
/// `z = m[2][0]·x + m[2][1]·y + m[2][2]`.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Matrix3 {
    pub m: [[f64; 3]; 3],
}

impl Matrix3 {
    pub const IDENTITY: Self = Self {
        m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    };

    pub const fn new(m: [[f64; 3]; 3]) -> Self {
        Self { m }
    }

    /// A pure 2D scale about the origin.
    pub const fn scale(sx: f64, sy: f64) -> Self {
        Self {
            m: [[sx, 0.0, 0.0], [0.0, sy, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Applies the projective transform to a point. The caller is
    /// responsible for checking that `z > 0` beforehand.
    pub fn apply(&self, p: DVec2) -> DVec2 {
        let z = self.m[2][0] * p.x + self.m[2][1] * p.y + self.m[2][2];
        let w = 1.0 / z;
        DVec2::new(
            (self.m[0][0] * p.x + self.m[0][1] * p.y + self.m[0][2]) * w,
            (self.m[1][0] * p.x + self.m[1][1] * p.y + self.m[1][2]) * w,
        )
    }

    /// The z coordinate assigned to a point, before perspective division.
    pub fn depth(&self, p: DVec2) -> f64 {
        self.m[2][0] * p.x + self.m[2][1] * p.y + self.m[2][2]
    }

    /// True if the bottom row is `[0, 0, w]`: no perspective component.
    pub fn is_affine(&self) -> bool {
        self.m[2][0] == 0.0 && self.m[2][1] == 0.0
    }
}

impl Default for Matrix3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_fixes_points() {
        let p = DVec2::new(12.5, -3.25);
        assert_eq!(Matrix3::IDENTITY.apply(p), p);
        assert!(Matrix3::IDENTITY.is_affine());
    }

    #[test]
    fn perspective_division() {
        let m = Matrix3::new([[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]]);
        let p = m.apply(DVec2::new(3.0, 5.0));
        assert_eq!(p, DVec2::new(3.0, 5.0));
    }
}
