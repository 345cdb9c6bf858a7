// SPDX-License-Identifier: CEPL-1.0
use glam::{Mat4, Vec3};
use lumen_render::ViewProjection;

pub use glam;

/// Perspective camera looking from `eye` at `center`.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    /// Vertical field of view in radians.
    pub fovy: f32,
    pub near: f32,
    pub far: f32,
    pub eye: Vec3,
    pub center: Vec3,
    pub up: Vec3,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            fovy: 60f32.to_radians(),
            near: 0.1,
            far: 100.0,
            eye: Vec3::new(0.0, 0.0, 3.0),
            center: Vec3::ZERO,
            up: Vec3::Y,
        }
    }
}

impl Camera {
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.center, self.up)
    }

    /// Right-handed, zero-to-one depth, with Y flipped for Vulkan clip space.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let aspect = if aspect.is_finite() && aspect > 0.0 { aspect } else { 1.0 };
        let mut proj = Mat4::perspective_rh(self.fovy, aspect, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        self.projection(aspect) * self.view()
    }
}

impl ViewProjection for Camera {
    fn view_projection(&self, aspect: f32) -> [[f32; 4]; 4] {
        self.view_proj(aspect).to_cols_array_2d()
    }
}
