// Scene ray queries for sensors.
//
// The sensor only sees the `RayCast` trait. `SceneQuery` is the in-engine
// implementation: a per-tick snapshot of every `Collider` in the ECS world,
// tested analytically (slab test for cuboids, quadratic for balls).
// Tests and headless callers can pass any closure with the same signature.

use bevy_ecs::prelude::*;
use glam::Vec3;
use serde::Deserialize;
use thiserror::Error;

use super::components::Transform;

// ============================================================================
// LAYERS AND TAGS
// ============================================================================

/// Bit set of collision layers. A ray only sees colliders whose layers
/// intersect the ray's mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct LayerMask(pub u32);

impl LayerMask {
    /// Layer 1, the layer everything lives on unless told otherwise.
    pub const DEFAULT: LayerMask = LayerMask(1);

    pub fn intersects(self, other: LayerMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl Default for LayerMask {
    fn default() -> Self { Self::DEFAULT }
}

/// Gameplay tag attached to a collider. Sensors react to `Player`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Tag {
    #[default]
    Untagged,
    Player,
    Sentry,
    Obstacle,
}

// ============================================================================
// QUERY INTERFACE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Distance from the ray origin to the hit point, in world units.
    pub distance: f32,
    pub tag: Tag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("collision scene is not ready")]
    NotReady,
    #[error("ray direction is zero or not finite")]
    InvalidDirection,
}

/// Nearest-hit ray query against a collision scene.
///
/// `direction` need not be normalized; `max_range` is measured in world
/// units along the normalized direction.
pub trait RayCast {
    fn cast_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_range: f32,
        mask: LayerMask,
    ) -> Result<Option<RayHit>, QueryError>;
}

impl<F> RayCast for F
where
    F: Fn(Vec3, Vec3, f32, LayerMask) -> Result<Option<RayHit>, QueryError>,
{
    fn cast_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_range: f32,
        mask: LayerMask,
    ) -> Result<Option<RayHit>, QueryError> {
        self(origin, direction, max_range, mask)
    }
}

// ============================================================================
// SHAPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    /// Axis-aligned box centred on the entity position.
    Cuboid { half_extents: Vec3 },
    Ball { radius: f32 },
}

impl Shape {
    /// Distance along unit `dir` to the first intersection, if any.
    /// An origin inside the shape intersects at distance 0.
    pub fn ray_distance(&self, center: Vec3, origin: Vec3, dir: Vec3) -> Option<f32> {
        match *self {
            Shape::Cuboid { half_extents } => {
                let min = center - half_extents;
                let max = center + half_extents;
                let mut t_near = f32::NEG_INFINITY;
                let mut t_far = f32::INFINITY;

                for axis in 0..3 {
                    let (o, d) = (origin[axis], dir[axis]);
                    if d.abs() < f32::EPSILON {
                        // Parallel to this slab: must already be between the planes.
                        if o < min[axis] || o > max[axis] {
                            return None;
                        }
                        continue;
                    }
                    let t1 = (min[axis] - o) / d;
                    let t2 = (max[axis] - o) / d;
                    t_near = t_near.max(t1.min(t2));
                    t_far = t_far.min(t1.max(t2));
                }

                if t_near > t_far || t_far < 0.0 {
                    return None;
                }
                Some(t_near.max(0.0))
            }
            Shape::Ball { radius } => {
                let oc = origin - center;
                let c = oc.length_squared() - radius * radius;
                if c <= 0.0 {
                    return Some(0.0);
                }
                let b = oc.dot(dir);
                let disc = b * b - c;
                if disc < 0.0 {
                    return None;
                }
                // Outside the ball both roots share a sign; negative means behind.
                let t = -b - disc.sqrt();
                (t >= 0.0).then_some(t)
            }
        }
    }
}

/// Collision volume attached to an entity, positioned by its `Transform`.
#[derive(Component, Debug, Clone, Copy)]
pub struct Collider {
    pub shape: Shape,
    pub layers: LayerMask,
    pub tag: Tag,
}

impl Collider {
    pub fn cuboid(half_extents: Vec3, tag: Tag) -> Self {
        Self { shape: Shape::Cuboid { half_extents }, layers: LayerMask::DEFAULT, tag }
    }

    pub fn ball(radius: f32, tag: Tag) -> Self {
        Self { shape: Shape::Ball { radius }, layers: LayerMask::DEFAULT, tag }
    }
}

// ============================================================================
// SCENE SNAPSHOT
// ============================================================================

struct SceneEntry {
    position: Vec3,
    collider: Collider,
}

/// Collider snapshot used to answer one tick's worth of ray queries.
///
/// `SceneQuery::default()` is an empty, not-yet-built scene: every query on
/// it fails with `QueryError::NotReady`.
#[derive(Default)]
pub struct SceneQuery {
    entries: Option<Vec<SceneEntry>>,
}

impl SceneQuery {
    /// Snapshot all colliders in `world`, skipping `exclude` (typically the
    /// entity carrying the sensor, so its rays never hit its own body).
    pub fn from_world(world: &mut World, exclude: Option<Entity>) -> Self {
        let mut query = world.query::<(Entity, &Transform, &Collider)>();
        let entries = query
            .iter(world)
            .filter(|(entity, _, _)| Some(*entity) != exclude)
            .map(|(_, transform, collider)| SceneEntry {
                position: transform.position,
                collider: *collider,
            })
            .collect();
        Self { entries: Some(entries) }
    }

    /// Build directly from positioned colliders.
    pub fn from_colliders(colliders: impl IntoIterator<Item = (Vec3, Collider)>) -> Self {
        let entries = colliders
            .into_iter()
            .map(|(position, collider)| SceneEntry { position, collider })
            .collect();
        Self { entries: Some(entries) }
    }
}

impl RayCast for SceneQuery {
    fn cast_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_range: f32,
        mask: LayerMask,
    ) -> Result<Option<RayHit>, QueryError> {
        let entries = self.entries.as_ref().ok_or(QueryError::NotReady)?;
        let dir = direction.try_normalize().ok_or(QueryError::InvalidDirection)?;

        let nearest = entries
            .iter()
            .filter(|e| e.collider.layers.intersects(mask))
            .filter_map(|e| {
                let distance = e.collider.shape.ray_distance(e.position, origin, dir)?;
                (distance <= max_range).then_some(RayHit { distance, tag: e.collider.tag })
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance));

        Ok(nearest)
    }
}
