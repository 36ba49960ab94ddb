// Third-person follow camera
//
// Camera model:
//   - A "target" point that eases toward the tracked entity every frame
//   - Fixed pitch (elevation angle), yaw orbits with Q/E
//   - Zoom by adjusting distance along the look vector (mouse wheel)

use glam::{Mat4, Vec2, Vec3};
use super::input::InputState;
use winit::keyboard::KeyCode;

pub struct FollowCamera {
    /// Point the camera looks at. Eases toward the followed position.
    target: Vec3,

    /// Distance from target along the look direction.
    /// Private: always clamped to [min_distance, max_distance] in update(). Use distance() to read.
    distance: f32,
    pub min_distance: f32,
    pub max_distance: f32,

    /// Elevation angle in radians (0 = horizontal, PI/2 = straight down)
    pub pitch: f32,

    /// Horizontal rotation in radians (0 = looking along -Z axis)
    pub yaw: f32,

    /// Vertical field of view in radians
    pub fov: f32,
    pub near: f32,
    pub far: f32,

    /// Orbit speed in radians per second
    pub orbit_speed: f32,

    /// Zoom change (in distance units) per scroll line
    pub zoom_speed: f32,

    /// How quickly the target catches up with the followed entity (1/s)
    pub follow_rate: f32,
}

impl FollowCamera {
    pub fn new(target: Vec3) -> Self {
        Self {
            target,
            distance: 32.0,
            min_distance: 8.0,
            max_distance: 80.0,
            pitch: 50.0_f32.to_radians(),
            yaw: 0.0,
            fov: 45.0_f32.to_radians(),
            near: 0.1,
            far: 300.0,
            orbit_speed: 1.5,
            zoom_speed: 3.0,
            follow_rate: 4.0,
        }
    }

    /// Update orbit, zoom and follow target. Call once per frame before rendering.
    pub fn update(&mut self, input: &InputState, follow: Vec3, dt: f32) {
        self.yaw += input.axis(KeyCode::KeyE, KeyCode::KeyQ) * self.orbit_speed * dt;

        // Zoom: scroll up (positive delta) zooms in (decreases distance)
        self.distance -= input.scroll_delta * self.zoom_speed;
        self.distance = self.distance.clamp(self.min_distance, self.max_distance);

        let t = (self.follow_rate * dt).clamp(0.0, 1.0);
        self.target = self.target.lerp(follow, t);
    }

    /// Camera-relative movement axes on the XZ plane: (forward, right).
    /// yaw=0 means camera faces along -Z.
    pub fn ground_axes(&self) -> (Vec2, Vec2) {
        let forward = Vec2::new(-self.yaw.sin(), -self.yaw.cos());
        let right = Vec2::new(self.yaw.cos(), -self.yaw.sin());
        (forward, right)
    }

    /// World-space position of the camera eye.
    pub fn camera_position(&self) -> Vec3 {
        self.target + self.eye_offset()
    }

    /// View matrix: looks from the camera eye toward the target.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.camera_position(), self.target, Vec3::Y)
    }

    /// Perspective projection matrix.
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, aspect, self.near, self.far)
    }

    /// Combined view-projection matrix ready to upload to the GPU.
    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }

    /// Project a world point to screen coordinates (origin top-left) for a
    /// screen of `size`. Returns None for points behind the camera.
    pub fn world_to_screen(&self, point: Vec3, size: Vec2) -> Option<Vec2> {
        let clip = self.view_projection(size.x / size.y) * point.extend(1.0);
        if clip.w <= self.near {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        Some(Vec2::new((ndc.x + 1.0) * 0.5 * size.x, (1.0 - ndc.y) * 0.5 * size.y))
    }

    pub fn target(&self) -> Vec3 { self.target }
    pub fn distance(&self) -> f32 { self.distance }

    // Offset from target to camera eye based on pitch, yaw, and distance.
    fn eye_offset(&self) -> Vec3 {
        Vec3::new(
            self.yaw.sin() * self.pitch.cos() * self.distance,
            self.pitch.sin() * self.distance,
            self.yaw.cos() * self.pitch.cos() * self.distance,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn target_projects_to_screen_centre() {
        let cam = FollowCamera::new(Vec3::new(3.0, 0.0, -2.0));
        let size = Vec2::new(1280.0, 720.0);
        let p = cam.world_to_screen(cam.target(), size).unwrap();
        assert_abs_diff_eq!(p.x, 640.0, epsilon = 0.5);
        assert_abs_diff_eq!(p.y, 360.0, epsilon = 0.5);
    }

    #[test]
    fn points_behind_are_rejected() {
        let cam = FollowCamera::new(Vec3::ZERO);
        let behind = cam.camera_position() * 2.0;
        assert_eq!(cam.world_to_screen(behind, Vec2::new(800.0, 600.0)), None);
    }

    #[test]
    fn ground_forward_points_away_from_eye() {
        let cam = FollowCamera::new(Vec3::ZERO);
        let (forward, _) = cam.ground_axes();
        let eye = cam.camera_position();
        assert!(forward.dot(Vec2::new(eye.x, eye.z)) < 0.0);
    }
}
