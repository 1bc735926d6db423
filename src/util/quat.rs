use serde::{Deserialize, Serialize};

use crate::util::vec3::Vec3;

/// Unit quaternion for entity orientation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Above this dot product the two rotations are close enough that
/// normalized lerp is used instead of the trigonometric slerp.
const SLERP_LINEAR_THRESHOLD: f32 = 0.9995;

impl Quat {
    pub const IDENTITY: Quat = Quat { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    #[inline]
    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        let axis = axis.normalize();
        let (sin, cos) = (angle * 0.5).sin_cos();
        Self::new(axis.x * sin, axis.y * sin, axis.z * sin, cos)
    }

    /// Rotation about the vertical axis
    pub fn from_yaw(angle: f32) -> Self {
        Self::from_axis_angle(Vec3::UP, angle)
    }

    #[inline]
    pub fn dot(&self, other: Quat) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    #[inline]
    pub fn length(&self) -> f32 {
        self.dot(*self).sqrt()
    }

    pub fn normalize(&self) -> Self {
        let len = self.length();
        if len > 0.0 && len.is_finite() {
            self.scale(1.0 / len)
        } else {
            Self::IDENTITY
        }
    }

    #[inline]
    fn scale(&self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s, self.w * s)
    }

    #[inline]
    fn add(&self, other: Quat) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z, self.w + other.w)
    }

    /// Smallest angle (radians) between two orientations
    pub fn angle_to(&self, other: Quat) -> f32 {
        let d = self.normalize().dot(other.normalize()).abs().min(1.0);
        2.0 * d.acos()
    }

    /// Spherical interpolation along the shortest arc
    pub fn slerp(&self, other: Quat, t: f32) -> Self {
        let start = self.normalize();
        let mut end = other.normalize();
        let mut d = start.dot(end);

        // q and -q are the same rotation; take the short way round
        if d < 0.0 {
            end = end.scale(-1.0);
            d = -d;
        }

        if d > SLERP_LINEAR_THRESHOLD {
            return start.add(end.add(start.scale(-1.0)).scale(t)).normalize();
        }

        let theta_0 = d.acos();
        let theta = theta_0 * t;
        let sin_theta_0 = theta_0.sin();
        let s0 = theta.cos() - d * theta.sin() / sin_theta_0;
        let s1 = theta.sin() / sin_theta_0;
        start.scale(s0).add(end.scale(s1)).normalize()
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.w.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const EPSILON: f32 = 1e-3;

    #[test]
    fn test_identity_angle() {
        assert!(Quat::IDENTITY.angle_to(Quat::IDENTITY) < EPSILON);
    }

    #[test]
    fn test_from_yaw_angle() {
        let q = Quat::from_yaw(PI / 2.0);
        assert!((Quat::IDENTITY.angle_to(q) - PI / 2.0).abs() < EPSILON);
        assert!((q.length() - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_slerp_halfway() {
        let a = Quat::from_yaw(0.0);
        let b = Quat::from_yaw(PI / 2.0);
        let mid = a.slerp(b, 0.5);
        assert!(mid.angle_to(Quat::from_yaw(PI / 4.0)) < EPSILON);
    }

    #[test]
    fn test_slerp_endpoints() {
        let a = Quat::from_yaw(0.3);
        let b = Quat::from_yaw(2.0);
        assert!(a.slerp(b, 0.0).angle_to(a) < EPSILON);
        assert!(a.slerp(b, 1.0).angle_to(b) < EPSILON);
    }

    #[test]
    fn test_slerp_takes_short_arc() {
        let a = Quat::from_yaw(0.1);
        let b = Quat::from_yaw(-0.1);
        let flipped = Quat::new(-b.x, -b.y, -b.z, -b.w);
        let mid = a.slerp(flipped, 0.5);
        assert!(mid.angle_to(Quat::IDENTITY) < EPSILON);
    }

    #[test]
    fn test_normalize_degenerate() {
        let zero = Quat::new(0.0, 0.0, 0.0, 0.0);
        assert_eq!(zero.normalize(), Quat::IDENTITY);
        let nan = Quat::new(f32::NAN, 0.0, 0.0, 1.0);
        assert!(!nan.is_finite());
    }
}
