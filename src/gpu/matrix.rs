// SPDX-License-Identifier: GPL-3.0-only

//! Row-major 4x4 transforms applied to each destination
//!
//! Element `(row, col)` lives at index `row * 4 + col`; points are column
//! vectors, so translation sits in the last column (indices 3, 7, 11).

use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// Horizontal/vertical flip applied on top of every destination transform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MirrorMode {
    #[default]
    Normal,
    /// Flip left-right
    Horizontal,
    /// Flip upside down
    Vertical,
    /// Flip both axes
    Both,
}

impl MirrorMode {
    pub const ALL: [MirrorMode; 4] = [
        MirrorMode::Normal,
        MirrorMode::Horizontal,
        MirrorMode::Vertical,
        MirrorMode::Both,
    ];

    /// Map an integer mode to a variant; values wrap modulo 4
    pub fn from_index(index: i32) -> Self {
        Self::ALL[index.rem_euclid(4) as usize]
    }

    pub fn index(&self) -> i32 {
        match self {
            MirrorMode::Normal => 0,
            MirrorMode::Horizontal => 1,
            MirrorMode::Vertical => 2,
            MirrorMode::Both => 3,
        }
    }

    /// Reflection in clip space
    pub fn matrix(&self) -> Mat4 {
        let (flip_x, flip_y) = self.flips();
        let sign = |flip: bool| if flip { -1.0 } else { 1.0 };
        Mat4::scale(sign(flip_x), sign(flip_y), 1.0)
    }

    fn flips(&self) -> (bool, bool) {
        match self {
            MirrorMode::Normal => (false, false),
            MirrorMode::Horizontal => (true, false),
            MirrorMode::Vertical => (false, true),
            MirrorMode::Both => (true, true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mat4(pub [f32; 16]);

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.0[row * 4 + col]
    }

    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.0[3] = x;
        m.0[7] = y;
        m.0[11] = z;
        m
    }

    pub fn scale(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.0[0] = x;
        m.0[5] = y;
        m.0[10] = z;
        m
    }

    /// Counter-clockwise rotation about the z axis
    pub fn rotation_z(degrees: f32) -> Self {
        let (s, c) = degrees.to_radians().sin_cos();
        let mut m = Self::IDENTITY;
        m.0[0] = c;
        m.0[1] = -s;
        m.0[4] = s;
        m.0[5] = c;
        m
    }

    /// Rotation about z through a pivot given in clip coordinates
    pub fn rotation_z_about(degrees: f32, pivot: [f32; 2]) -> Self {
        Self::translation(pivot[0], pivot[1], 0.0)
            * Self::rotation_z(degrees)
            * Self::translation(-pivot[0], -pivot[1], 0.0)
    }

    /// Reflect after this transform
    pub fn mirrored(self, mode: MirrorMode) -> Self {
        mode.matrix() * self
    }

    /// Swap the reflection `from`, already part of this matrix, for `to`
    pub fn remirror(&mut self, from: MirrorMode, to: MirrorMode) {
        *self = to.matrix() * from.matrix() * *self;
    }

    /// Transform a point on the z = 0 plane
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.0;
        let w = m[12] * x + m[13] * y + m[15];
        let w = if w.abs() < f32::EPSILON { 1.0 } else { w };
        (
            (m[0] * x + m[1] * y + m[3]) / w,
            (m[4] * x + m[5] * y + m[7]) / w,
        )
    }

    /// Inverse of the 2-D affine part (x/y rows and columns plus translation)
    ///
    /// Returns `None` when the transform collapses the plane.
    pub fn affine_inverse_2d(&self) -> Option<Mat4> {
        let m = &self.0;
        let (a, b, tx) = (m[0], m[1], m[3]);
        let (c, d, ty) = (m[4], m[5], m[7]);
        let det = a * d - b * c;
        if det.abs() < 1e-8 {
            return None;
        }
        let inv_det = 1.0 / det;
        let ia = d * inv_det;
        let ib = -b * inv_det;
        let ic = -c * inv_det;
        let id = a * inv_det;
        let mut out = Self::IDENTITY;
        out.0[0] = ia;
        out.0[1] = ib;
        out.0[3] = -(ia * tx + ib * ty);
        out.0[4] = ic;
        out.0[5] = id;
        out.0[7] = -(ic * tx + id * ty);
        Some(out)
    }

    pub fn approx_eq(&self, other: &Mat4, epsilon: f32) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(a, b)| (a - b).abs() <= epsilon)
    }
}

impl Mul for Mat4 {
    type Output = Mat4;

    fn mul(self, rhs: Mat4) -> Mat4 {
        let mut out = [0.0f32; 16];
        for row in 0..4 {
            for col in 0..4 {
                out[row * 4 + col] = (0..4)
                    .map(|k| self.0[row * 4 + k] * rhs.0[k * 4 + col])
                    .sum();
            }
        }
        Mat4(out)
    }
}

impl From<[f32; 16]> for Mat4 {
    fn from(values: [f32; 16]) -> Self {
        Mat4(values)
    }
}
