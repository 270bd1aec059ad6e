//! Pose math: vectors, quaternions, poses and change thresholds.
//!
//! Simulation poses use the host's native left-handed, z-up convention.
//! [`FrameConversion`] maps them to the right-handed convention used in
//! persisted documents; the remap is applied once per vector/quaternion at
//! serialization time and never to the values kept for change detection.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Vec3
// ---------------------------------------------------------------------------

/// A 3D vector in simulation units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// The zero vector.
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Construct a vector from components.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Squared euclidean distance to `other`.
    #[inline]
    pub fn dist_squared(self, other: Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    #[inline]
    pub fn dot(self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[inline]
    pub fn cross(self, other: Vec3) -> Vec3 {
        Vec3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    #[inline]
    pub fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    #[inline]
    pub fn scale(self, s: f64) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }

    /// Component-wise comparison with an absolute tolerance.
    pub fn equals(self, other: Vec3, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.z - other.z).abs() <= tolerance
    }
}

// ---------------------------------------------------------------------------
// Quat
// ---------------------------------------------------------------------------

/// A rotation quaternion `(x, y, z, w)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    /// The identity rotation.
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// Construct a quaternion from raw components (not normalized).
    pub const fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// Rotation of `angle` radians around `axis` (normalized internally).
    pub fn from_axis_angle(axis: Vec3, angle: f64) -> Self {
        let len = axis.dot(axis).sqrt();
        if len <= f64::EPSILON {
            return Self::IDENTITY;
        }
        let (s, c) = (angle * 0.5).sin_cos();
        let k = s / len;
        Self::new(axis.x * k, axis.y * k, axis.z * k, c)
    }

    #[inline]
    pub fn dot(self, other: Quat) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    /// Angle in radians of the rotation taking `self` to `other`.
    ///
    /// `acos(2 <q1,q2>^2 - 1)`; insensitive to the `q`/`-q` double cover.
    pub fn angular_distance(self, other: Quat) -> f64 {
        let inner = self.dot(other);
        (2.0 * inner * inner - 1.0).clamp(-1.0, 1.0).acos()
    }

    /// Hamilton product `self * rhs` (apply `rhs` first, then `self`).
    pub fn mul(self, rhs: Quat) -> Quat {
        Quat {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        }
    }

    /// Rotate a vector by this (unit) quaternion.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let u = Vec3::new(self.x, self.y, self.z);
        let t = u.cross(v).scale(2.0);
        v.add(t.scale(self.w)).add(u.cross(t))
    }
}

// ---------------------------------------------------------------------------
// EntityPose
// ---------------------------------------------------------------------------

/// Location + orientation of an object, in simulation convention.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityPose {
    pub location: Vec3,
    pub orientation: Quat,
}

impl EntityPose {
    /// Far-away sentinel used as the "last recorded" pose of entities that
    /// have not been written yet; any real pose differs from it.
    pub const UNLOGGED: EntityPose = EntityPose {
        location: Vec3 {
            x: 1.0e10,
            y: 1.0e10,
            z: 1.0e10,
        },
        orientation: Quat::IDENTITY,
    };

    pub const fn new(location: Vec3, orientation: Quat) -> Self {
        Self {
            location,
            orientation,
        }
    }

    /// Pose at `location` with identity orientation.
    pub const fn at(location: Vec3) -> Self {
        Self::new(location, Quat::IDENTITY)
    }

    /// Compose a child pose expressed relative to `self`.
    pub fn compose(&self, local: &EntityPose) -> EntityPose {
        EntityPose {
            location: self.location.add(self.orientation.rotate(local.location)),
            orientation: self.orientation.mul(local.orientation),
        }
    }
}

// ---------------------------------------------------------------------------
// PoseThresholds
// ---------------------------------------------------------------------------

/// Minimum motion for a pose to count as changed.
///
/// The linear threshold is stored squared so that the per-tick check needs
/// no square root.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseThresholds {
    lin_dist_sq_min: f64,
    ang_dist_min: f64,
}

impl PoseThresholds {
    /// Build thresholds from a linear distance and an angular distance (rad).
    pub fn new(linear_distance: f64, angular_distance: f64) -> Self {
        Self {
            lin_dist_sq_min: linear_distance * linear_distance,
            ang_dist_min: angular_distance,
        }
    }

    pub fn lin_dist_sq_min(&self) -> f64 {
        self.lin_dist_sq_min
    }

    pub fn ang_dist_min(&self) -> f64 {
        self.ang_dist_min
    }

    /// `true` if `current` moved beyond either threshold since `previous`.
    #[inline]
    pub fn exceeded(&self, previous: &EntityPose, current: &EntityPose) -> bool {
        current.location.dist_squared(previous.location) > self.lin_dist_sq_min
            || current.orientation.angular_distance(previous.orientation) > self.ang_dist_min
    }
}

// ---------------------------------------------------------------------------
// FrameConversion
// ---------------------------------------------------------------------------

/// Left-handed (simulation) to right-handed (persisted) frame remap.
///
/// Vectors: `(x, -y, z) * unit_scale`. Quaternions: `(-x, y, -z, w)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameConversion {
    /// Multiplier from simulation length units to persisted units
    /// (`0.01` converts centimetres to metres).
    pub unit_scale: f64,
}

impl Default for FrameConversion {
    fn default() -> Self {
        Self { unit_scale: 0.01 }
    }
}

impl FrameConversion {
    pub fn vector(&self, v: Vec3) -> Vec3 {
        Vec3::new(
            v.x * self.unit_scale,
            -v.y * self.unit_scale,
            v.z * self.unit_scale,
        )
    }

    pub fn quat(&self, q: Quat) -> Quat {
        Quat::new(-q.x, q.y, -q.z, q.w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn angular_distance_of_identical_rotations_is_zero() {
        let q = Quat::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), 0.7);
        assert!(q.angular_distance(q) < 1e-6);
    }

    #[test]
    fn angular_distance_matches_rotation_angle() {
        let a = Quat::IDENTITY;
        let b = Quat::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), FRAC_PI_2);
        assert!(approx(a.angular_distance(b), FRAC_PI_2));
    }

    #[test]
    fn angular_distance_ignores_double_cover() {
        let q = Quat::from_axis_angle(Vec3::new(1.0, 0.0, 0.0), 0.3);
        let neg = Quat::new(-q.x, -q.y, -q.z, -q.w);
        assert!(q.angular_distance(neg) < 1e-6);
    }

    #[test]
    fn rotate_quarter_turn_about_z() {
        let q = Quat::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), FRAC_PI_2);
        let v = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert!(v.equals(Vec3::new(0.0, 1.0, 0.0), 1e-9));
    }

    #[test]
    fn compose_offsets_child_in_parent_frame() {
        let parent = EntityPose::new(
            Vec3::new(10.0, 0.0, 0.0),
            Quat::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), FRAC_PI_2),
        );
        let child = parent.compose(&EntityPose::at(Vec3::new(2.0, 0.0, 0.0)));
        assert!(child.location.equals(Vec3::new(10.0, 2.0, 0.0), 1e-9));
    }

    #[test]
    fn thresholds_use_strict_comparison() {
        let t = PoseThresholds::new(0.5, 0.1);
        let p0 = EntityPose::at(Vec3::ZERO);
        assert!(!t.exceeded(&p0, &EntityPose::at(Vec3::new(0.5, 0.0, 0.0))));
        assert!(t.exceeded(&p0, &EntityPose::at(Vec3::new(0.51, 0.0, 0.0))));
        let turned = EntityPose::new(
            Vec3::ZERO,
            Quat::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 0.2),
        );
        assert!(t.exceeded(&p0, &turned));
    }

    #[test]
    fn unlogged_sentinel_always_exceeds() {
        let t = PoseThresholds::new(0.5, 0.1);
        assert!(t.exceeded(&EntityPose::UNLOGGED, &EntityPose::at(Vec3::ZERO)));
    }

    #[test]
    fn frame_conversion_flips_handedness() {
        let conv = FrameConversion::default();
        let v = conv.vector(Vec3::new(100.0, 200.0, 300.0));
        assert!(v.equals(Vec3::new(1.0, -2.0, 3.0), 1e-12));
        let q = conv.quat(Quat::new(0.1, 0.2, 0.3, 0.9));
        assert_eq!(q, Quat::new(-0.1, 0.2, -0.3, 0.9));
    }
}
