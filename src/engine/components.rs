// Core ECS components for the demo scene.

use bevy_ecs::prelude::*;
use glam::{Quat, Vec3};

use super::sensor::{FovSensor, Pose};

/// Position and orientation of an entity in 3D space.
#[derive(Component, Debug, Clone, Copy)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self { position, ..Default::default() }
    }

    /// Turn to face `point` around the vertical axis only, so the body never
    /// banks or pitches. Forward is -Z.
    pub fn face_towards(&mut self, point: Vec3) {
        let flat = Vec3::new(point.x - self.position.x, 0.0, point.z - self.position.z);
        if flat.length_squared() > 1e-6 {
            self.rotation = Quat::from_rotation_y(f32::atan2(-flat.x, -flat.z));
        }
    }
}

/// RGB color and box size for instanced rendering.
#[derive(Component, Debug, Clone, Copy)]
pub struct Appearance {
    pub color: [f32; 3],
    pub half_extents: Vec3,
}

/// Velocity of an entity in 3D space (units per second).
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Velocity {
    pub linear: Vec3,
}

/// Keyboard-driven character. There is at most one.
#[derive(Component, Debug, Clone, Copy)]
pub struct Player {
    pub move_speed: f32,
}

/// Walks a closed loop of waypoints on the ground plane.
#[derive(Component, Debug, Clone)]
pub struct Patrol {
    pub waypoints: Vec<Vec3>,
    pub current: usize,
    pub move_speed: f32,
    /// Distance at which a waypoint counts as reached.
    pub tolerance: f32,
}

impl Patrol {
    pub fn new(waypoints: Vec<Vec3>, move_speed: f32) -> Self {
        Self { waypoints, current: 0, move_speed, tolerance: 0.5 }
    }

    pub fn target(&self) -> Option<Vec3> {
        self.waypoints.get(self.current).copied()
    }

    pub fn advance(&mut self) {
        if !self.waypoints.is_empty() {
            self.current = (self.current + 1) % self.waypoints.len();
        }
    }
}

/// An entity carrying a field-of-view sensor at `eye_height` above its origin.
#[derive(Component, Debug)]
pub struct Sentry {
    pub sensor: FovSensor,
    pub eye_height: f32,
}

impl Sentry {
    /// World pose of the eye for a body at `transform`.
    pub fn eye_pose(&self, transform: &Transform) -> Pose {
        Pose::new(transform.position + Vec3::Y * self.eye_height, transform.rotation)
    }
}

/// Periodically re-aims a sentry's sensor through a fixed list of Euler
/// targets (degrees). `index` is the next target to apply.
#[derive(Component, Debug, Clone)]
pub struct AimSweep {
    pub targets: Vec<Vec3>,
    /// Seconds between target changes.
    pub interval: f32,
    pub elapsed: f32,
    pub index: usize,
}

impl Default for AimSweep {
    fn default() -> Self {
        Self {
            targets: vec![
                Vec3::new(0.0, 30.0, 0.0),
                Vec3::new(0.0, -30.0, 0.0),
                Vec3::new(-30.0, 0.0, 0.0),
                Vec3::new(30.0, 0.0, 0.0),
                Vec3::ZERO,
            ],
            interval: 2.0,
            // Start due, so the first target applies immediately.
            elapsed: 2.0,
            index: 0,
        }
    }
}
