use glam::{Mat4, Vec3};
use winit::dpi::PhysicalSize;

const DEFAULT_UP: Vec3 = Vec3::Y;

/// Fixed perspective camera framing the avatar. The stage never orbits or
/// zooms; resize only changes the aspect ratio.
#[derive(Debug, Clone)]
pub struct StageCamera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
}

impl StageCamera {
    pub fn new(position: Vec3, target: Vec3, fov_y_radians: f32, near: f32, far: f32) -> Self {
        Self { position, target, up: DEFAULT_UP, fov_y_radians, near, far }
    }

    /// Framing used by the stage: slightly above origin, pulled back, 50 deg.
    pub fn stage_default() -> Self {
        Self::new(Vec3::new(0.0, 0.8, 3.5), Vec3::new(0.0, 0.8, 0.0), 50.0_f32.to_radians(), 0.1, 100.0)
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_radians, aspect.max(0.0001), self.near, self.far)
    }

    pub fn view_projection(&self, viewport: PhysicalSize<u32>) -> Mat4 {
        let aspect = if viewport.height > 0 { viewport.width as f32 / viewport.height as f32 } else { 1.0 };
        self.projection_matrix(aspect) * self.view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_projection_is_finite() {
        let camera = StageCamera::stage_default();
        let vp = camera.view_projection(PhysicalSize::new(1280, 720));
        assert!(!vp.to_cols_array().iter().any(|v| v.is_nan() || v.is_infinite()));
    }

    #[test]
    fn degenerate_viewport_falls_back_to_square_aspect() {
        let camera = StageCamera::stage_default();
        let vp = camera.view_projection(PhysicalSize::new(800, 0));
        assert!(vp.to_cols_array().iter().all(|v| v.is_finite()));
    }
}
