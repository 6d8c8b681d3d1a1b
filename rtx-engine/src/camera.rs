use glam::{Mat4, Vec3};

use crate::shader::MatrixUniforms;

/// A look-at camera with a perspective projection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraDescriptor {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view, in degrees.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraDescriptor {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 45.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl CameraDescriptor {
    #[must_use]
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    /// Projection for a viewport of `aspect` width over height.
    ///
    /// The Y axis is flipped to match Vulkan clip space.
    #[must_use]
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let mut projection =
            Mat4::perspective_rh(self.fov_y.to_radians(), aspect, self.near, self.far);
        projection.y_axis.y = -projection.y_axis.y;
        projection
    }

    /// The uniform block for a viewport of `extent` pixels.
    ///
    /// `prior_view_proj` is the previous frame's view-projection, the current
    /// one when there is no previous frame.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn uniforms(&self, extent: [u32; 2], prior_view_proj: Option<Mat4>) -> MatrixUniforms {
        let aspect = extent[0].max(1) as f32 / extent[1].max(1) as f32;
        let view = self.view();
        let projection = self.projection(aspect);
        let view_proj = projection * view;

        MatrixUniforms {
            view_proj,
            prior_view_proj: prior_view_proj.unwrap_or(view_proj),
            view_inverse: view.inverse(),
            proj_inverse: projection.inverse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_inverse_is_camera_position() {
        let camera = CameraDescriptor {
            eye: Vec3::new(1.0, 2.0, 3.0),
            ..Default::default()
        };
        let uniforms = camera.uniforms([800, 600], None);
        let origin = uniforms.view_inverse.transform_point3(Vec3::ZERO);
        assert!(origin.abs_diff_eq(camera.eye, 1e-5));
        assert_eq!(uniforms.prior_view_proj, uniforms.view_proj);
    }

    #[test]
    fn test_projection_round_trip() {
        let camera = CameraDescriptor::default();
        let uniforms = camera.uniforms([1280, 720], None);
        let projection = camera.projection(1280.0 / 720.0);
        assert!((projection * uniforms.proj_inverse).abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn test_target_projects_to_center() {
        let camera = CameraDescriptor::default();
        let uniforms = camera.uniforms([100, 100], None);
        let clip = uniforms.view_proj.project_point3(camera.target);
        assert!(clip.x.abs() < 1e-5);
        assert!(clip.y.abs() < 1e-5);
    }
}
