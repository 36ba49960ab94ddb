// ECS systems for updating game state
// Each system runs once per frame over the entities holding its components

use bevy_ecs::prelude::*;
use glam::{Vec2, Vec3};
use log::debug;
use super::collision::SceneQuery;
use super::components::*;
use super::mesh::VisibilityMesh;
use super::sensor::{Material, RaySegment, SweepStats};

/// Set the player's velocity from movement input, relative to the camera's
/// ground axes (forward, right).
pub fn player_control_system(world: &mut World, movement: Vec2, axes: (Vec2, Vec2)) {
    let (forward, right) = axes;
    let dir = (forward * movement.y + right * movement.x).normalize_or_zero();

    let mut query = world.query::<(&Player, &mut Velocity, &mut Transform)>();
    for (player, mut velocity, mut transform) in query.iter_mut(world) {
        velocity.linear = Vec3::new(dir.x, 0.0, dir.y) * player.move_speed;
        if dir != Vec2::ZERO {
            let ahead = transform.position + velocity.linear;
            transform.face_towards(ahead);
        }
    }
}

/// Steer patrolling entities toward their current waypoint, facing the
/// direction of travel, and advance to the next waypoint once reached.
pub fn patrol_system(world: &mut World) {
    let mut query = world.query::<(&mut Patrol, &mut Velocity, &mut Transform)>();
    for (mut patrol, mut velocity, mut transform) in query.iter_mut(world) {
        let Some(mut waypoint) = patrol.target() else {
            velocity.linear = Vec3::ZERO;
            continue;
        };

        let flat = |p: Vec3| Vec3::new(p.x, 0.0, p.z);
        if flat(waypoint - transform.position).length() < patrol.tolerance {
            patrol.advance();
            waypoint = patrol.target().unwrap_or(waypoint);
        }

        let dir = flat(waypoint - transform.position).normalize_or_zero();
        velocity.linear = dir * patrol.move_speed;
        transform.face_towards(waypoint);
    }
}

/// Update entity positions based on velocity
/// Runs every frame, applies velocity * delta_time to position
pub fn movement_system(world: &mut World, delta_time: f32) {
    let mut query = world.query::<(&mut Transform, &Velocity)>();
    for (mut transform, velocity) in query.iter_mut(world) {
        transform.position += velocity.linear * delta_time;
    }
}

/// Keep moving entities inside the arena (clamped on X/Z).
pub fn bounds_system(world: &mut World, half_extent: f32) {
    let mut query = world.query_filtered::<&mut Transform, With<Velocity>>();
    for mut transform in query.iter_mut(world) {
        transform.position.x = transform.position.x.clamp(-half_extent, half_extent);
        transform.position.z = transform.position.z.clamp(-half_extent, half_extent);
    }
}

/// Step every aim sweep and re-target its sensor when the interval elapses.
pub fn aim_sweep_system(world: &mut World, delta_time: f32) {
    let mut query = world.query::<(&mut AimSweep, &mut Sentry)>();
    for (mut sweep, mut sentry) in query.iter_mut(world) {
        if sweep.targets.is_empty() {
            continue;
        }
        sweep.elapsed += delta_time;
        if sweep.elapsed >= sweep.interval {
            sweep.elapsed -= sweep.interval;
            let target = sweep.targets[sweep.index];
            sentry.sensor.set_target_rotation(target);
            sweep.index = (sweep.index + 1) % sweep.targets.len();
        }
    }
}

/// What one sentry's sensor produced this frame, ready for rendering.
pub struct SensorFrame {
    pub origin: Vec3,
    pub mesh: VisibilityMesh,
    pub material: Material,
    pub stats: SweepStats,
    pub rays: Vec<RaySegment>,
}

/// Tick every sentry's sensor against the current collider layout.
///
/// Each sentry sees a scene snapshot without its own collider, so rays
/// starting inside its body are not blocked by it.
pub fn sensor_system(world: &mut World, delta_time: f32) -> Vec<SensorFrame> {
    let sentries: Vec<Entity> = world
        .query_filtered::<Entity, With<Sentry>>()
        .iter(world)
        .collect();

    let mut frames = Vec::with_capacity(sentries.len());
    for entity in sentries {
        let scene = SceneQuery::from_world(world, Some(entity));

        let Ok((transform, mut sentry)) = world
            .query::<(&Transform, &mut Sentry)>()
            .get_mut(world, entity)
        else {
            continue;
        };
        let eye = sentry.eye_pose(transform);
        let report = sentry.sensor.update(delta_time, &eye, &scene);
        if let Some(seen) = report.detection_changed {
            debug!("sentry {entity:?} {} the player", if seen { "spotted" } else { "lost" });
        }

        frames.push(SensorFrame {
            origin: report.origin,
            material: sentry.sensor.config().materials[report.material],
            mesh: report.mesh,
            stats: report.stats,
            rays: report.rays,
        });
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::collision::{Collider, Tag};
    use crate::engine::aim::AimState;
    use crate::engine::sensor::{FovSensor, SensorConfig};
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn sentry(resolution: u32) -> Sentry {
        let config = SensorConfig { resolution, display_rays: false, ..SensorConfig::default() };
        Sentry { sensor: FovSensor::new(config).unwrap(), eye_height: 1.0 }
    }

    #[test]
    fn sentry_detects_player_ahead_but_not_itself() {
        let mut world = World::new();
        let seen = Arc::new(AtomicBool::new(false));

        let detected = |world: &mut World| {
            world.query::<&Sentry>().iter(world).all(|s| s.sensor.is_detected())
        };

        let mut guard = sentry(8);
        {
            let seen = seen.clone();
            guard.sensor.subscribe(move |v| seen.store(v, Ordering::SeqCst));
        }
        world.spawn((
            Transform::from_position(Vec3::ZERO),
            Collider::cuboid(Vec3::new(0.5, 1.5, 0.5), Tag::Sentry),
            guard,
        ));
        let player = world
            .spawn((
                Transform::from_position(Vec3::new(0.0, 1.0, -6.0)),
                Collider::ball(0.6, Tag::Player),
                Velocity::default(),
            ))
            .id();

        let frames = sensor_system(&mut world, 1.0 / 60.0);
        assert_eq!(frames.len(), 1);
        assert!(detected(&mut world));
        assert!(seen.load(Ordering::SeqCst));
        assert_abs_diff_eq!(frames[0].origin.y, 1.0, epsilon = 1e-6);

        // Move the player behind the sentry.
        world.get_mut::<Transform>(player).unwrap().position = Vec3::new(0.0, 1.0, 6.0);
        sensor_system(&mut world, 1.0 / 60.0);
        assert!(!detected(&mut world));
        assert!(!seen.load(Ordering::SeqCst));
    }

    #[test]
    fn patrol_moves_toward_and_cycles_waypoints() {
        let mut world = World::new();
        let e = world
            .spawn((
                Transform::from_position(Vec3::ZERO),
                Velocity::default(),
                Patrol::new(vec![Vec3::new(0.0, 0.0, -1.0), Vec3::new(4.0, 0.0, -1.0)], 2.0),
            ))
            .id();

        patrol_system(&mut world);
        movement_system(&mut world, 0.25);
        let pos = world.get::<Transform>(e).unwrap().position;
        assert_abs_diff_eq!(pos.z, -0.5, epsilon = 1e-5);

        movement_system(&mut world, 0.25);
        patrol_system(&mut world);
        assert_eq!(world.get::<Patrol>(e).unwrap().current, 1);
        let vel = world.get::<Velocity>(e).unwrap().linear;
        assert_abs_diff_eq!(vel.x, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn aim_sweep_retargets_on_interval() {
        let mut world = World::new();
        let e = world.spawn((sentry(1), AimSweep::default())).id();

        // The first target is applied on the first frame.
        aim_sweep_system(&mut world, 1.0);
        let sweep = world.get::<AimSweep>(e).unwrap();
        assert_eq!(sweep.index, 1);
        assert_abs_diff_eq!(sweep.elapsed, 1.0, epsilon = 1e-6);
        // Nothing has ticked yet, so only the target differs from a fresh aim.
        let aiming_at = |degrees: Vec3| {
            let mut aim = AimState::default();
            aim.set_target_euler(degrees);
            aim
        };
        assert_eq!(*world.get::<Sentry>(e).unwrap().sensor.aim(), aiming_at(Vec3::new(0.0, 30.0, 0.0)));

        aim_sweep_system(&mut world, 0.5);
        assert_eq!(world.get::<AimSweep>(e).unwrap().index, 1);

        aim_sweep_system(&mut world, 0.5);
        assert_eq!(world.get::<AimSweep>(e).unwrap().index, 2);
        assert_eq!(*world.get::<Sentry>(e).unwrap().sensor.aim(), aiming_at(Vec3::new(0.0, -30.0, 0.0)));
        assert!(world.get::<Sentry>(e).unwrap().sensor.aim().remaining_angle() > 0.5);
    }

    #[test]
    fn bounds_clamp_moving_entities_only() {
        let mut world = World::new();
        let mover = world.spawn((Transform::from_position(Vec3::new(30.0, 0.0, -30.0)), Velocity::default())).id();
        let wall = world.spawn(Transform::from_position(Vec3::new(30.0, 0.0, 0.0))).id();
        bounds_system(&mut world, 20.0);
        assert_eq!(world.get::<Transform>(mover).unwrap().position, Vec3::new(20.0, 0.0, -20.0));
        assert_eq!(world.get::<Transform>(wall).unwrap().position.x, 30.0);
    }

    #[test]
    fn player_moves_relative_to_camera() {
        let mut world = World::new();
        let e = world
            .spawn((Transform::default(), Velocity::default(), Player { move_speed: 5.0 }))
            .id();
        let axes = (Vec2::new(0.0, -1.0), Vec2::new(1.0, 0.0));
        player_control_system(&mut world, Vec2::new(0.0, 1.0), axes);
        let vel = world.get::<Velocity>(e).unwrap().linear;
        assert_abs_diff_eq!(vel.z, -5.0, epsilon = 1e-5);
    }
}
