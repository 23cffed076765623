// Orbit-less camera: fixed eye, spinning model

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::config::CameraConfig;

pub const MIN_FOV: f32 = 1.0;
pub const MAX_FOV: f32 = 179.0;

/// Matches the `UniformBufferObject` block in shader.vert
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraAction {
    FovIncrease,
    FovDecrease,
    RotatePositive,
    RotateNegative,
}

#[derive(Debug, Clone)]
pub struct Camera {
    /// Vertical field of view in degrees
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub eye: Vec3,
    pub center: Vec3,
    pub up: Vec3,
    pub rotation_axis: Vec3,
    /// Model rotation in degrees
    pub rotation_angle: f32,
    fov_step: f32,
    rotation_step: f32,
}

impl Camera {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            fov: config.fov.clamp(MIN_FOV, MAX_FOV),
            near: config.near,
            far: config.far,
            eye: Vec3::from(config.eye),
            center: Vec3::from(config.center),
            up: Vec3::from(config.up),
            rotation_axis: Vec3::from(config.rotation_axis),
            rotation_angle: config.rotation_angle,
            fov_step: config.fov_step,
            rotation_step: config.rotation_step,
        }
    }

    pub fn apply(&mut self, action: CameraAction) {
        match action {
            CameraAction::FovIncrease => self.fov = (self.fov + self.fov_step).clamp(MIN_FOV, MAX_FOV),
            CameraAction::FovDecrease => self.fov = (self.fov - self.fov_step).clamp(MIN_FOV, MAX_FOV),
            CameraAction::RotatePositive => self.rotation_angle += self.rotation_step,
            CameraAction::RotateNegative => self.rotation_angle -= self.rotation_step,
        }
        log::trace!("Camera {:?}: fov={} angle={}", action, self.fov, self.rotation_angle);
    }

    pub fn model(&self) -> Mat4 {
        match self.rotation_axis.try_normalize() {
            Some(axis) => Mat4::from_axis_angle(axis, self.rotation_angle.to_radians()),
            None => Mat4::IDENTITY,
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.center, self.up)
    }

    /// Vulkan clip space: depth in [0, 1], Y pointing down
    pub fn projection(&self, extent: vk::Extent2D) -> Mat4 {
        let aspect = if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        };

        let mut projection = Mat4::perspective_rh(self.fov.to_radians(), aspect, self.near, self.far);
        projection.y_axis.y *= -1.0;
        projection
    }

    pub fn uniforms(&self, extent: vk::Extent2D) -> UniformBufferObject {
        UniformBufferObject {
            model: self.model(),
            view: self.view(),
            projection: self.projection(extent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 800, height: 600 };

    fn camera() -> Camera {
        Camera::new(&CameraConfig::default())
    }

    #[test]
    fn fov_steps_and_clamps() {
        let mut camera = camera();
        camera.apply(CameraAction::FovIncrease);
        assert_eq!(camera.fov, 46.0);
        camera.apply(CameraAction::FovDecrease);
        camera.apply(CameraAction::FovDecrease);
        assert_eq!(camera.fov, 44.0);

        camera.fov = MAX_FOV;
        camera.apply(CameraAction::FovIncrease);
        assert_eq!(camera.fov, MAX_FOV);

        camera.fov = MIN_FOV;
        camera.apply(CameraAction::FovDecrease);
        assert_eq!(camera.fov, MIN_FOV);
    }

    #[test]
    fn rotation_steps_freely() {
        let mut camera = camera();
        camera.apply(CameraAction::RotatePositive);
        camera.apply(CameraAction::RotatePositive);
        camera.apply(CameraAction::RotateNegative);
        assert_eq!(camera.rotation_angle, 1.0);
    }

    #[test]
    fn model_rotates_about_axis() {
        let mut camera = camera();
        assert_eq!(camera.model(), Mat4::IDENTITY);

        camera.rotation_angle = 90.0;
        let rotated = camera.model().transform_point3(Vec3::X);
        assert!(rotated.abs_diff_eq(Vec3::Y, 1e-5), "{:?}", rotated);
    }

    #[test]
    fn zero_axis_means_no_rotation() {
        let mut camera = camera();
        camera.rotation_axis = Vec3::ZERO;
        camera.rotation_angle = 30.0;
        assert_eq!(camera.model(), Mat4::IDENTITY);
    }

    #[test]
    fn view_puts_center_in_front() {
        let camera = camera();
        let center = camera.view().transform_point3(Vec3::ZERO);
        // Right-handed view space looks down -Z
        assert!(center.x.abs() < 1e-5 && center.y.abs() < 1e-5);
        assert!((center.z + Vec3::splat(2.0).length()).abs() < 1e-5);
    }

    #[test]
    fn projection_flips_y_and_uses_zero_to_one_depth() {
        let camera = camera();
        let projection = camera.projection(EXTENT);

        let unflipped = Mat4::perspective_rh(45f32.to_radians(), 800.0 / 600.0, 0.1, 10.0);
        assert_eq!(projection.y_axis.y, -unflipped.y_axis.y);
        assert_eq!(projection.x_axis, unflipped.x_axis);

        let near = projection * Vec4::new(0.0, 0.0, -0.1, 1.0);
        let far = projection * Vec4::new(0.0, 0.0, -10.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zero_height_does_not_divide_by_zero() {
        let projection = camera().projection(vk::Extent2D { width: 800, height: 0 });
        assert!(projection.is_finite());
    }

    #[test]
    fn uniform_block_is_three_matrices() {
        assert_eq!(std::mem::size_of::<UniformBufferObject>(), 3 * 64);
        let ubo = camera().uniforms(EXTENT);
        assert_eq!(ubo.view, camera().view());
    }
}
