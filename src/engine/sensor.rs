// Field-of-view sensor: ray fan → visibility mesh → edge-triggered detection.
//
// Per tick:
//   1. smooth the aim toward its target (AimState)
//   2. cast one ray per grid sample, clamp vertical reach, cut at hits
//   3. stitch the samples into a closed fan around the origin (GridIndex)
//   4. compare "target seen" with last tick and signal only on change
//
// Steps 2–3 are the pure function `build_visibility_mesh`; it needs nothing
// but a config, a pose and something that answers ray queries.

use std::path::{Path, PathBuf};

use glam::{Quat, Vec3};
use log::{debug, info, trace, warn};
use serde::Deserialize;
use thiserror::Error;

use super::aim::AimState;
use super::collision::{LayerMask, RayCast, Tag};
use super::detection::{DetectionSignal, DetectionState, SubscriptionId};
use super::grid::GridIndex;
use super::mesh::VisibilityMesh;

/// Reference direction for the vertical clamp.
const WORLD_UP: Vec3 = Vec3::Y;

/// Below this, a ray counts as horizontal and is never clamped.
const MIN_SIN_THETA: f32 = 1e-6;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("expected 2 materials (normal, detected), found {found}")]
    TooFewMaterials { found: usize },
    #[error("max_distance must be positive, got {0}")]
    NonPositiveDistance(f32),
    #[error("vertical_damping must be positive, got {0}")]
    NonPositiveDamping(f32),
    #[error("rotation_speed must not be negative, got {0}")]
    NegativeRotationSpeed(f32),
    #[error("{field} must be finite")]
    NonFinite { field: &'static str },
    #[error("failed to read sensor config {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid sensor config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Flat colour the renderer uses for the visibility mesh.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Material {
    /// Linear RGBA; alpha below 1 draws the mesh translucent.
    pub color: [f32; 4],
}

impl Material {
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { color: [r, g, b, a] }
    }
}

/// Sensor tuning. Immutable during a tick; may be replaced between ticks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorConfig {
    /// Range of every ray, in world units.
    pub max_distance: f32,
    /// Grid resolution `n`: the fan is sampled on an (n+1)×(n+1) grid.
    pub resolution: u32,
    /// Horizontal half-span; 1.0 is roughly 90°.
    pub horizontal_reach: f32,
    /// Vertical half-span; 1.0 is roughly 90°.
    pub vertical_reach: f32,
    /// Caps how far a ray may climb or drop, in world units.
    pub vertical_damping: f32,
    /// Fraction of the remaining aim arc covered per second.
    pub rotation_speed: f32,
    /// Layers rays collide with. `None` means `LayerMask::DEFAULT`.
    pub collision_mask: Option<LayerMask>,
    /// Emit a debug segment per ray each tick.
    pub display_rays: bool,
    /// `[normal, detected]`.
    pub materials: Vec<Material>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            max_distance: 20.0,
            resolution: 35,
            horizontal_reach: 1.0,
            vertical_reach: 1.02,
            vertical_damping: 1.06,
            rotation_speed: 3.0,
            collision_mask: None,
            display_rays: true,
            materials: vec![
                Material::rgba(0.20, 0.90, 0.35, 0.35),
                Material::rgba(0.95, 0.20, 0.15, 0.45),
            ],
        }
    }
}

impl SensorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SensorConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("max_distance", self.max_distance),
            ("horizontal_reach", self.horizontal_reach),
            ("vertical_reach", self.vertical_reach),
            ("vertical_damping", self.vertical_damping),
            ("rotation_speed", self.rotation_speed),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { field });
            }
        }
        if self.max_distance <= 0.0 {
            return Err(ConfigError::NonPositiveDistance(self.max_distance));
        }
        if self.vertical_damping <= 0.0 {
            return Err(ConfigError::NonPositiveDamping(self.vertical_damping));
        }
        if self.rotation_speed < 0.0 {
            return Err(ConfigError::NegativeRotationSpeed(self.rotation_speed));
        }
        if self.materials.len() < 2 {
            return Err(ConfigError::TooFewMaterials { found: self.materials.len() });
        }
        Ok(())
    }

    /// Mask actually used for ray queries.
    pub fn effective_mask(&self) -> LayerMask {
        self.collision_mask.unwrap_or(LayerMask::DEFAULT)
    }

    /// Number of sampled vertices, not counting the fan centre.
    pub fn sample_count(&self) -> usize {
        let side = self.resolution as usize + 1;
        side * side
    }
}

// ============================================================================
// POSE
// ============================================================================

/// World-space placement of the sensor origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self { position: Vec3::ZERO, rotation: Quat::IDENTITY }
    }
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Looking down -Z with +Y up, as in camera space.
    pub fn forward(&self) -> Vec3 { self.rotation * Vec3::NEG_Z }
    pub fn right(&self) -> Vec3 { self.rotation * Vec3::X }
    pub fn up(&self) -> Vec3 { self.rotation * Vec3::Y }
}

// ============================================================================
// SWEEP
// ============================================================================

/// Scale factor that flattens steep rays so the field never rises or drops
/// more than `vertical_damping` units.
///
/// θ is the angle between `ray` and the plane perpendicular to `up`:
/// `sin θ = |ray·up| / (|ray|·|up|)`, and the modifier is
/// `min(|vertical_damping / sin θ| / max_distance, 1)`. Near-horizontal rays
/// (sin θ ≈ 0) return 1 instead of dividing by zero.
pub fn vertical_clamp_modifier(ray: Vec3, up: Vec3, max_distance: f32, vertical_damping: f32) -> f32 {
    let denom = ray.length() * up.length();
    if denom <= f32::EPSILON {
        return 1.0;
    }
    let sin_theta = (ray.dot(up).abs() / denom).min(1.0);
    if sin_theta < MIN_SIN_THETA {
        return 1.0;
    }
    ((vertical_damping / sin_theta).abs() / max_distance).min(1.0)
}

/// One debug line from the sensor origin to a sampled vertex, in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaySegment {
    pub from: Vec3,
    pub to: Vec3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub rays: usize,
    pub hits: usize,
    pub failed_queries: usize,
}

/// Result of one sweep of the ray fan.
#[derive(Debug, Clone, Default)]
pub struct Sweep {
    pub mesh: VisibilityMesh,
    /// A `Player`-tagged collider was hit inside the visible reach.
    pub target_seen: bool,
    pub stats: SweepStats,
    /// Empty unless `display_rays` is set.
    pub rays: Vec<RaySegment>,
}

/// Cast the ray fan from `pose` and build the visibility mesh.
///
/// Ray queries that fail are treated as misses for that ray only.
pub fn build_visibility_mesh(config: &SensorConfig, pose: &Pose, caster: &impl RayCast) -> Sweep {
    let n = config.resolution as usize;
    let side = n + 1;
    let grid = GridIndex::new(side, side);
    let mask = config.effective_mask();
    let origin = pose.position;
    let (fwd, right, up) = (pose.forward(), pose.right(), pose.up());

    let (h, v) = (config.horizontal_reach, config.vertical_reach);
    // A 1×1 grid has a single sample at (-h, -v).
    let (dh, dv) = if n == 0 { (0.0, 0.0) } else { (2.0 * h / n as f32, 2.0 * v / n as f32) };

    let mut sweep = Sweep {
        mesh: VisibilityMesh::with_capacity(grid.max()),
        rays: Vec::with_capacity(if config.display_rays { grid.max() } else { 0 }),
        ..Default::default()
    };

    for i in 0..side {
        let this_h = -h + i as f32 * dh;

        for j in 0..side {
            let this_v = -v + j as f32 * dv;

            let mut vec = (fwd + right * this_h + up * this_v).normalize_or_zero() * config.max_distance;
            vec *= vertical_clamp_modifier(vec, WORLD_UP, config.max_distance, config.vertical_damping);
            let reach = vec.length();

            sweep.stats.rays += 1;
            match caster.cast_ray(origin, vec, config.max_distance, mask) {
                Ok(Some(hit)) => {
                    sweep.stats.hits += 1;
                    vec *= hit.distance / config.max_distance;
                    if hit.tag == Tag::Player && hit.distance <= reach {
                        sweep.target_seen = true;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    sweep.stats.failed_queries += 1;
                    trace!("ray ({i}, {j}) treated as a miss: {err}");
                }
            }

            let index = sweep.mesh.push_vertex(vec);
            debug_assert_eq!(index, 1 + i * side + j);
            if config.display_rays {
                sweep.rays.push(RaySegment { from: origin, to: origin + vec });
            }
            stitch(&grid, index, &mut sweep.mesh);
        }
    }

    sweep.mesh.fill_uvs();
    sweep
}

/// Emit the faces owned by grid vertex `index`, plus the border faces that
/// close the fan against the centre vertex 0.
fn stitch(grid: &GridIndex, index: usize, mesh: &mut VisibilityMesh) {
    if let (Some(down), Some(down_left)) = (grid.down(index), grid.down_left(index)) {
        mesh.push_triangle(index, down, down_left);
    }
    if let (Some(up), Some(up_right)) = (grid.up(index), grid.up_right(index)) {
        mesh.push_triangle(index, up, up_right);
    }

    let down = grid.down(index);
    if grid.left(index).is_none() {
        if let Some(down) = down {
            mesh.push_triangle(index, down, 0);
        }
    }
    // Reversed relative to the left border so both borders face the same way.
    if grid.right(index).is_none() {
        if let Some(down) = down {
            mesh.push_triangle(0, down, index);
        }
    }
    if grid.up(index).is_none() {
        if let Some(left) = grid.left(index) {
            mesh.push_triangle(index, left, 0);
        }
    }
    if down.is_none() {
        if let Some(right) = grid.right(index) {
            mesh.push_triangle(index, right, 0);
        }
    }
}

// ============================================================================
// SENSOR
// ============================================================================

/// Everything one tick produced, for the renderer and game logic.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// World position the mesh is relative to.
    pub origin: Vec3,
    pub mesh: VisibilityMesh,
    /// Material slot in effect after this tick (0 normal, 1 detected).
    pub material: usize,
    /// `Some(value)` when detection changed this tick.
    pub detection_changed: Option<bool>,
    pub stats: SweepStats,
    pub rays: Vec<RaySegment>,
}

#[derive(Debug)]
pub struct FovSensor {
    config: SensorConfig,
    aim: AimState,
    state: DetectionState,
    signal: DetectionSignal,
}

impl FovSensor {
    /// Fails if the config is invalid, so a constructed sensor is always usable.
    pub fn new(config: SensorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.materials.len() > 2 {
            warn!("sensor config has {} materials; only the first two are used", config.materials.len());
        }
        Ok(Self {
            config,
            aim: AimState::default(),
            state: DetectionState::default(),
            signal: DetectionSignal::default(),
        })
    }

    pub fn config(&self) -> &SensorConfig { &self.config }

    /// Aim the sensor at Euler angles in degrees (x = pitch, y = yaw, z = roll),
    /// relative to the body carrying it. Safe to call at any time.
    pub fn set_target_rotation(&mut self, degrees: Vec3) {
        self.aim.set_target_euler(degrees);
    }

    pub fn aim(&self) -> &AimState { &self.aim }

    pub fn is_detected(&self) -> bool { self.state.is_detected() }

    pub fn subscribe(&mut self, callback: impl FnMut(bool) + Send + Sync + 'static) -> SubscriptionId {
        self.signal.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.signal.unsubscribe(id)
    }

    /// The world pose rays are cast from, given the carrier's pose.
    pub fn world_pose(&self, parent: &Pose) -> Pose {
        Pose::new(parent.position, parent.rotation * self.aim.current())
    }

    /// Run one tick. `parent` is the world pose of the sensor origin before
    /// the aim offset is applied.
    pub fn update(&mut self, dt: f32, parent: &Pose, caster: &impl RayCast) -> TickReport {
        self.aim.step(self.config.rotation_speed, dt);

        let pose = self.world_pose(parent);
        let sweep = build_visibility_mesh(&self.config, &pose, caster);
        if sweep.stats.failed_queries > 0 {
            debug!(
                "{} of {} ray queries failed this tick",
                sweep.stats.failed_queries, sweep.stats.rays
            );
        }

        let (state, changed) = self.state.transition(sweep.target_seen);
        self.state = state;
        if let Some(detected) = changed {
            info!("detection {}", if detected { "started" } else { "ended" });
            self.signal.emit(detected);
        }

        TickReport {
            origin: pose.position,
            mesh: sweep.mesh,
            material: self.state.material_index(),
            detection_changed: changed,
            stats: sweep.stats,
            rays: sweep.rays,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::collision::{Collider, QueryError, RayHit, SceneQuery};
    use approx::assert_abs_diff_eq;
    use std::collections::HashSet;
    use std::f32::consts::PI;
    use std::sync::{Arc, Mutex};

    type CastResult = Result<Option<RayHit>, QueryError>;

    fn no_hits(_: Vec3, _: Vec3, _: f32, _: LayerMask) -> CastResult {
        Ok(None)
    }

    fn small_config(resolution: u32) -> SensorConfig {
        SensorConfig { resolution, display_rays: false, ..SensorConfig::default() }
    }

    #[test]
    fn vertex_count_and_origin() {
        for n in 1..=6 {
            let sweep = build_visibility_mesh(&small_config(n), &Pose::default(), &no_hits);
            let side = n as usize + 1;
            assert_eq!(sweep.mesh.vertices.len(), side * side + 1);
            assert_eq!(sweep.mesh.vertices[0], Vec3::ZERO);
            assert_eq!(sweep.mesh.uvs.len(), sweep.mesh.vertices.len());
            assert_eq!(sweep.stats.rays, side * side);
        }
    }

    #[test]
    fn triangle_count_is_tight() {
        // 2 faces per grid cell plus n border faces on each of the 4 sides.
        for n in 1..=6u32 {
            let sweep = build_visibility_mesh(&small_config(n), &Pose::default(), &no_hits);
            let n = n as usize;
            assert_eq!(sweep.mesh.triangle_count(), 2 * n * n + 4 * n);
            let max = sweep.mesh.vertices.len() as u32;
            assert!(sweep.mesh.triangles.iter().flatten().all(|&i| i < max));
            assert!(sweep.mesh.triangles.iter().all(|t| t[0] != t[1] && t[1] != t[2] && t[0] != t[2]));
        }
    }

    #[test]
    fn zero_resolution_is_a_single_ray() {
        let sweep = build_visibility_mesh(&small_config(0), &Pose::default(), &no_hits);
        assert_eq!(sweep.mesh.vertices.len(), 2);
        assert!(sweep.mesh.triangles.is_empty());
        assert!(sweep.mesh.vertices[1].is_finite());
    }

    #[test]
    fn winding_is_consistent_and_closed() {
        let sweep = build_visibility_mesh(&small_config(5), &Pose::default(), &no_hits);
        let mesh = &sweep.mesh;

        let mut directed = HashSet::new();
        for &[a, b, c] in &mesh.triangles {
            for edge in [(a, b), (b, c), (c, a)] {
                // The same directed edge twice means two neighbours disagree.
                assert!(directed.insert(edge), "edge {edge:?} repeated");
            }
        }
        for &(a, b) in &directed {
            assert!(directed.contains(&(b, a)), "edge ({a}, {b}) has no opposite");
        }

        for &tri in &mesh.triangles {
            assert!(mesh.face_normal(tri).length() > 1e-6, "degenerate {tri:?}");
        }
    }

    #[test]
    fn first_and_last_samples_are_opposite_corners() {
        // First sample is the (-h, -v) corner; the last is (+h, +v).
        let config = SensorConfig { vertical_damping: 1000.0, ..small_config(2) };
        let sweep = build_visibility_mesh(&config, &Pose::default(), &no_hits);
        let first = sweep.mesh.vertices[1];
        let last = *sweep.mesh.vertices.last().unwrap();
        assert!(first.x < 0.0 && first.y < 0.0);
        assert!(last.x > 0.0 && last.y > 0.0);
        // Centre sample points straight ahead at full range.
        let centre = sweep.mesh.vertices[1 + 3 + 1];
        assert_abs_diff_eq!(centre.z, -20.0, epsilon = 1e-4);
    }

    #[test]
    fn clamp_modifier_is_bounded_and_finite() {
        let steps = 2000;
        for k in 1..steps {
            let theta = PI * k as f32 / steps as f32;
            let ray = Vec3::new(theta.cos(), theta.sin(), 0.0) * 20.0;
            let m = vertical_clamp_modifier(ray, Vec3::Y, 20.0, 1.06);
            assert!(m.is_finite() && m > 0.0 && m <= 1.0, "theta {theta}: {m}");
        }
        let tiny = Vec3::new(1.0, 1e-9, 0.0);
        assert_eq!(vertical_clamp_modifier(tiny, Vec3::Y, 20.0, 1.06), 1.0);
        assert_eq!(vertical_clamp_modifier(Vec3::X * 20.0, Vec3::Y, 20.0, 1.06), 1.0);
        assert_eq!(vertical_clamp_modifier(Vec3::ZERO, Vec3::Y, 20.0, 1.06), 1.0);
    }

    #[test]
    fn clamp_caps_vertical_extent() {
        let ray = Vec3::new(0.0, 1.0, -1.0).normalize() * 20.0;
        let clamped = ray * vertical_clamp_modifier(ray, Vec3::Y, 20.0, 1.06);
        assert_abs_diff_eq!(clamped.y, 1.06, epsilon = 1e-4);
    }

    #[test]
    fn hits_shorten_vertices() {
        let config = SensorConfig { vertical_damping: 1000.0, ..small_config(2) };
        let wall = |_: Vec3, _: Vec3, _: f32, _: LayerMask| -> CastResult {
            Ok(Some(RayHit { distance: 5.0, tag: Tag::Obstacle }))
        };
        let sweep = build_visibility_mesh(&config, &Pose::default(), &wall);
        assert_eq!(sweep.stats.hits, 9);
        assert!(!sweep.target_seen);
        for v in &sweep.mesh.vertices[1..] {
            assert_abs_diff_eq!(v.length(), 5.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn player_hit_marks_target_seen() {
        let config = SensorConfig { vertical_damping: 1000.0, ..small_config(2) };
        let player = |_: Vec3, _: Vec3, _: f32, _: LayerMask| -> CastResult {
            Ok(Some(RayHit { distance: 8.0, tag: Tag::Player }))
        };
        assert!(build_visibility_mesh(&config, &Pose::default(), &player).target_seen);
    }

    #[test]
    fn player_beyond_clamped_reach_is_not_seen() {
        // Every ray points upward and is cut to a short reach by the damping.
        let config = SensorConfig {
            resolution: 1,
            vertical_reach: 0.0,
            vertical_damping: 1.0,
            display_rays: false,
            ..SensorConfig::default()
        };
        let pose = Pose::new(Vec3::ZERO, Quat::from_rotation_x(PI / 3.0));
        let player = |_: Vec3, _: Vec3, _: f32, _: LayerMask| -> CastResult {
            Ok(Some(RayHit { distance: 15.0, tag: Tag::Player }))
        };
        assert!(!build_visibility_mesh(&config, &pose, &player).target_seen);
    }

    #[test]
    fn failed_queries_count_as_misses() {
        let flaky = |_: Vec3, dir: Vec3, _: f32, _: LayerMask| -> CastResult {
            if dir.x < 0.0 { Err(QueryError::NotReady) } else { Ok(None) }
        };
        let sweep = build_visibility_mesh(&small_config(2), &Pose::default(), &flaky);
        assert_eq!(sweep.stats.failed_queries, 3);
        assert_eq!(sweep.mesh.vertices.len(), 10);
        assert!(!sweep.target_seen);
    }

    #[test]
    fn default_mask_applied_when_unset() {
        let seen = Mutex::new(HashSet::new());
        let record = |_: Vec3, _: Vec3, _: f32, mask: LayerMask| -> CastResult {
            seen.lock().unwrap().insert(mask);
            Ok(None)
        };
        build_visibility_mesh(&small_config(1), &Pose::default(), &record);
        assert_eq!(*seen.lock().unwrap(), HashSet::from([LayerMask(1)]));

        seen.lock().unwrap().clear();
        let masked = SensorConfig { collision_mask: Some(LayerMask(0b100)), ..small_config(1) };
        build_visibility_mesh(&masked, &Pose::default(), &record);
        assert_eq!(*seen.lock().unwrap(), HashSet::from([LayerMask(0b100)]));
    }

    #[test]
    fn debug_rays_only_when_enabled() {
        let origin = Vec3::new(1.0, 2.0, 3.0);
        let pose = Pose::new(origin, Quat::IDENTITY);
        let on = SensorConfig { display_rays: true, ..small_config(2) };
        let sweep = build_visibility_mesh(&on, &pose, &no_hits);
        assert_eq!(sweep.rays.len(), 9);
        for (ray, v) in sweep.rays.iter().zip(&sweep.mesh.vertices[1..]) {
            assert_eq!(ray.from, origin);
            assert_eq!(ray.to, origin + *v);
        }
        assert!(build_visibility_mesh(&small_config(2), &pose, &no_hits).rays.is_empty());
    }

    #[test]
    fn config_validation() {
        assert!(SensorConfig::default().validate().is_ok());

        let one_material = SensorConfig { materials: vec![Material::rgba(1.0, 1.0, 1.0, 1.0)], ..Default::default() };
        assert!(matches!(FovSensor::new(one_material), Err(ConfigError::TooFewMaterials { found: 1 })));

        let zero_range = SensorConfig { max_distance: 0.0, ..Default::default() };
        assert!(matches!(zero_range.validate(), Err(ConfigError::NonPositiveDistance(_))));

        let nan = SensorConfig { horizontal_reach: f32::NAN, ..Default::default() };
        assert!(matches!(nan.validate(), Err(ConfigError::NonFinite { field: "horizontal_reach" })));

        let no_damping = SensorConfig { vertical_damping: 0.0, ..Default::default() };
        assert!(matches!(no_damping.validate(), Err(ConfigError::NonPositiveDamping(_))));

        let backwards = SensorConfig { rotation_speed: -1.0, ..Default::default() };
        assert!(matches!(backwards.validate(), Err(ConfigError::NegativeRotationSpeed(_))));
    }

    #[test]
    fn config_from_toml() {
        let config = SensorConfig::from_toml_str(
            r#"
            max_distance = 12.5
            resolution = 8
            collision_mask = 3
            display_rays = false

            [[materials]]
            color = [0.0, 1.0, 0.0, 0.5]

            [[materials]]
            color = [1.0, 0.0, 0.0, 0.5]
            "#,
        )
        .unwrap();
        assert_eq!(config.max_distance, 12.5);
        assert_eq!(config.resolution, 8);
        assert_eq!(config.effective_mask(), LayerMask(3));
        assert_eq!(config.vertical_reach, 1.02);

        let negative = SensorConfig::from_toml_str("resolution = -1");
        assert!(matches!(negative, Err(ConfigError::Parse(_))));

        let short = SensorConfig::from_toml_str("[[materials]]\ncolor = [1.0, 1.0, 1.0, 1.0]\n");
        assert!(matches!(short, Err(ConfigError::TooFewMaterials { found: 1 })));
    }

    #[test]
    fn detection_fires_on_edges_only() {
        let mut sensor = FovSensor::new(small_config(2)).unwrap();
        let fired = Arc::new(Mutex::new(Vec::new()));
        {
            let fired = fired.clone();
            sensor.subscribe(move |v| fired.lock().unwrap().push(v));
        }

        let script = [false, false, true, true, true, false];
        let mut materials = Vec::new();
        for seen in script {
            let tag = if seen { Tag::Player } else { Tag::Obstacle };
            let caster = move |_: Vec3, _: Vec3, _: f32, _: LayerMask| -> CastResult {
                Ok(Some(RayHit { distance: 3.0, tag }))
            };
            let report = sensor.update(1.0 / 60.0, &Pose::default(), &caster);
            materials.push(report.material);
        }

        assert_eq!(*fired.lock().unwrap(), vec![true, false]);
        assert_eq!(materials, vec![0, 0, 1, 1, 1, 0]);
        assert!(!sensor.is_detected());
    }

    #[test]
    fn set_target_before_first_tick() {
        let mut sensor = FovSensor::new(small_config(1)).unwrap();
        sensor.set_target_rotation(Vec3::new(0.0, 30.0, 0.0));
        let first = sensor.aim().remaining_angle();
        sensor.update(0.1, &Pose::default(), &no_hits);
        assert!(sensor.aim().remaining_angle() < first);
        assert!(sensor.aim().current().is_normalized());
    }

    #[test]
    fn aim_composes_with_parent() {
        let mut sensor = FovSensor::new(SensorConfig { rotation_speed: 100.0, ..small_config(1) }).unwrap();
        sensor.set_target_rotation(Vec3::new(0.0, 90.0, 0.0));
        sensor.update(1.0, &Pose::default(), &no_hits);

        let parent = Pose::new(Vec3::ZERO, Quat::from_rotation_y(-PI / 2.0));
        let fwd = sensor.world_pose(&parent).forward();
        assert_abs_diff_eq!(fwd.z, -1.0, epsilon = 1e-4);
    }

    #[test]
    fn sees_player_in_scene() {
        let scene = SceneQuery::from_colliders([
            (Vec3::new(0.0, 0.0, -8.0), Collider::ball(1.0, Tag::Player)),
        ]);
        let mut sensor = FovSensor::new(small_config(6)).unwrap();
        let report = sensor.update(0.0, &Pose::default(), &scene);
        assert_eq!(report.detection_changed, Some(true));
        assert!(report.stats.hits > 0);

        let behind = Pose::new(Vec3::ZERO, Quat::from_rotation_y(PI));
        let report = sensor.update(0.0, &behind, &scene);
        assert_eq!(report.detection_changed, Some(false));
    }
}
