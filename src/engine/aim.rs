// Smoothed aim of a sensor relative to the body that carries it.
//
// `AimState` is valid from the moment it is constructed: both rotations start
// at identity, so setting a target before the first tick is just a write.

use glam::{EulerRot, Quat, Vec3};

/// Convert Euler angles in degrees (x = pitch, y = yaw, z = roll) to a
/// rotation. Yaw is applied first, then pitch, then roll.
pub fn euler_degrees(angles: Vec3) -> Quat {
    Quat::from_euler(
        EulerRot::YXZ,
        angles.y.to_radians(),
        angles.x.to_radians(),
        angles.z.to_radians(),
    )
}

/// Angle in radians of the rotation taking `from` to `to`, in `[0, PI]`.
///
/// Uses `atan2` on the relative rotation, which stays exact near zero where
/// an `acos` of the dot product loses precision.
pub fn rotation_angle(from: Quat, to: Quat) -> f32 {
    let d = from.inverse() * to;
    2.0 * d.xyz().length().atan2(d.w.abs())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AimState {
    current: Quat,
    target: Quat,
}

impl Default for AimState {
    fn default() -> Self {
        Self { current: Quat::IDENTITY, target: Quat::IDENTITY }
    }
}

impl AimState {
    /// Local offset currently applied on top of the parent orientation.
    pub fn current(&self) -> Quat { self.current }

    pub fn set_target_euler(&mut self, degrees: Vec3) {
        self.target = euler_degrees(degrees);
    }

    /// Advance `current` toward `target` by `rotation_speed * dt` of the
    /// remaining arc. The interpolation factor is clamped to `[0, 1]`.
    pub fn step(&mut self, rotation_speed: f32, dt: f32) {
        let t = (rotation_speed * dt).clamp(0.0, 1.0);
        // Also rejects NaN from a non-finite dt.
        if !(t > 0.0) {
            return;
        }
        self.current = self.current.slerp(self.target, t).normalize();
    }

    /// Angle (radians) still to turn before `current` reaches `target`.
    pub fn remaining_angle(&self) -> f32 {
        rotation_angle(self.current, self.target)
    }
}
