//! Camera matrices shared by every pass (right-handed view space, wgpu 0..1 depth).

use glam::{Mat4, Vec3, Vec4};

/// Cube face forward vectors in capture order: +X, -X, +Y, -Y, -Z, +Z.
pub const CUBE_FACE_TARGETS: [Vec3; 6] = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::NEG_Z, Vec3::Z];

/// Up vectors paired with [`CUBE_FACE_TARGETS`]. ±Y faces use ±Z so the basis never degenerates at the poles.
pub const CUBE_FACE_UPS: [Vec3; 6] = [Vec3::Y, Vec3::Y, Vec3::Z, Vec3::NEG_Z, Vec3::Y, Vec3::Y];

pub const CUBE_FACE_NEAR: f32 = 0.01;
pub const CUBE_FACE_FAR: f32 = 10.0;

#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub view: Mat4,
    pub proj: Mat4,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
}

impl Camera {
    pub fn new(view: Mat4, proj: Mat4, near: f32, far: f32) -> Self {
        let position = view.inverse().w_axis.truncate();
        Self { view, proj, near, far, position }
    }

    /// 90° square camera looking down cube face `face` from `position`.
    pub fn cube_face(position: Vec3, face: usize) -> Self {
        let target = CUBE_FACE_TARGETS[face];
        let up = CUBE_FACE_UPS[face];
        let view = Mat4::look_at_rh(position, position + target, up);
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, CUBE_FACE_NEAR, CUBE_FACE_FAR);
        Self { view, proj, near: CUBE_FACE_NEAR, far: CUBE_FACE_FAR, position }
    }

    pub fn view_proj(&self) -> Mat4 {
        self.proj * self.view
    }

    pub fn inv_view_proj(&self) -> Mat4 {
        self.view_proj().inverse()
    }

    pub fn inv_proj(&self) -> Mat4 {
        self.proj.inverse()
    }

    /// Coefficients `(a, b, c, e)` with `d = (a*z + b) / (c*z + e)` for view-space z.
    /// Works for perspective and orthographic projections.
    pub fn depth_params(&self) -> Vec4 {
        Vec4::new(self.proj.z_axis.z, self.proj.w_axis.z, self.proj.z_axis.w, self.proj.w_axis.w)
    }

    /// View-space z (negative in front of the camera) for a device depth value.
    pub fn view_z_from_depth(&self, depth: f32) -> f32 {
        view_z_from_depth(self.depth_params(), depth)
    }
}

pub fn view_z_from_depth(params: Vec4, depth: f32) -> f32 {
    (params.y - depth * params.w) / (depth * params.z - params.x)
}

/// Orthonormal `(right, up, forward)` for a cube face, as used by capture and octahedral remap.
pub fn cube_face_basis(face: usize) -> (Vec3, Vec3, Vec3) {
    let forward = CUBE_FACE_TARGETS[face];
    let right = forward.cross(CUBE_FACE_UPS[face]).normalize();
    let up = right.cross(forward);
    (right, up, forward)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cube_face_bases_are_orthonormal() {
        for face in 0..6 {
            let (r, u, f) = cube_face_basis(face);
            assert_relative_eq!(r.length(), 1.0, epsilon = 1e-6);
            assert_relative_eq!(u.length(), 1.0, epsilon = 1e-6);
            assert_relative_eq!(r.dot(u), 0.0, epsilon = 1e-6);
            assert_relative_eq!(r.dot(f), 0.0, epsilon = 1e-6);
            assert_relative_eq!(u.dot(f), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn face_camera_matches_basis() {
        for face in 0..6 {
            let cam = Camera::cube_face(Vec3::new(1.0, 2.0, 3.0), face);
            let (r, u, f) = cube_face_basis(face);
            // View space: +x right, +y up, -z forward.
            let vr = cam.view.transform_vector3(r);
            let vu = cam.view.transform_vector3(u);
            let vf = cam.view.transform_vector3(f);
            assert_relative_eq!(vr.x, 1.0, epsilon = 1e-5);
            assert_relative_eq!(vu.y, 1.0, epsilon = 1e-5);
            assert_relative_eq!(vf.z, -1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn depth_round_trips_through_view_z() {
        let proj = Mat4::perspective_rh(1.2, 1.5, 0.1, 50.0);
        let cam = Camera::new(Mat4::IDENTITY, proj, 0.1, 50.0);
        for z in [-0.1f32, -1.0, -7.5, -49.0] {
            let clip = proj * Vec4::new(0.0, 0.0, z, 1.0);
            let d = clip.z / clip.w;
            assert_relative_eq!(cam.view_z_from_depth(d), z, max_relative = 1e-4);
        }
    }

    #[test]
    fn position_comes_from_inverse_view() {
        let eye = Vec3::new(3.0, 1.0, -2.0);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let cam = Camera::new(view, Mat4::IDENTITY, 0.1, 10.0);
        assert_relative_eq!(cam.position.x, eye.x, epsilon = 1e-5);
        assert_relative_eq!(cam.position.y, eye.y, epsilon = 1e-5);
        assert_relative_eq!(cam.position.z, eye.z, epsilon = 1e-5);
    }
}
