use glam::{vec3, Mat3, Quat, Vec3};

/// Pinhole camera looking down its local -Z axis, with +Y up.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub rotation: Quat,

    /// Vertical field of view, in radians
    pub fov_y: f32,

    /// Width divided by height
    pub aspect: f32,

    /// Distance to the far plane; primary rays span from the camera to this
    /// plane
    pub far: f32,
}

impl Camera {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            fov_y: 60.0f32.to_radians(),
            aspect: 1.0,
            far: 1000.0,
        }
    }

    /// Creates a camera at `position`, rotated so that it faces `target`.
    pub fn looking_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        let forward = (target - position).normalize();
        let right = forward.cross(up).normalize();
        let up = right.cross(forward);

        Self::new(
            position,
            Quat::from_mat3(&Mat3::from_cols(right, up, -forward)),
        )
    }

    pub fn with_fov_y(mut self, fov_y: f32) -> Self {
        self.fov_y = fov_y;
        self
    }

    pub fn with_aspect(mut self, aspect: f32) -> Self {
        self.aspect = aspect;
        self
    }

    pub fn with_far(mut self, far: f32) -> Self {
        self.far = far;
        self
    }

    pub fn pose(&self) -> CameraPose {
        CameraPose {
            position: self.position,
            rotation: self.rotation,
        }
    }

    /// Returns vectors from the camera's position towards the far plane's
    /// corners, in world space, in the order of: bottom-left, top-left,
    /// top-right, bottom-right.
    pub fn frustum_corners(&self) -> [Vec3; 4] {
        let half_height = self.far * (self.fov_y * 0.5).tan();
        let half_width = half_height * self.aspect;

        [
            vec3(-half_width, -half_height, -self.far),
            vec3(-half_width, half_height, -self.far),
            vec3(half_width, half_height, -self.far),
            vec3(half_width, -half_height, -self.far),
        ]
        .map(|corner| self.rotation * corner)
    }
}

/// Part of the camera that, when changed, invalidates accumulated samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraPose {
    pub position: Vec3,
    pub rotation: Quat,
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use super::*;

    fn assert_vec_eq(expected: Vec3, actual: Vec3) {
        assert!(
            expected.abs_diff_eq(actual, 1e-4),
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn frustum_corners() {
        let target = Camera::new(Vec3::ZERO, Quat::IDENTITY)
            .with_fov_y(FRAC_PI_2)
            .with_aspect(2.0)
            .with_far(10.0);

        let [bl, tl, tr, br] = target.frustum_corners();

        assert_vec_eq(vec3(-20.0, -10.0, -10.0), bl);
        assert_vec_eq(vec3(-20.0, 10.0, -10.0), tl);
        assert_vec_eq(vec3(20.0, 10.0, -10.0), tr);
        assert_vec_eq(vec3(20.0, -10.0, -10.0), br);
    }

    #[test]
    fn frustum_corners_rotated() {
        // Looking along +X
        let target = Camera::looking_at(Vec3::splat(5.0), vec3(6.0, 5.0, 5.0), Vec3::Y)
            .with_fov_y(FRAC_PI_2)
            .with_far(1.0);

        let [bl, tl, tr, br] = target.frustum_corners();

        // Corners are directions, so the camera's position doesn't matter
        assert_vec_eq(vec3(1.0, -1.0, -1.0), bl);
        assert_vec_eq(vec3(1.0, 1.0, -1.0), tl);
        assert_vec_eq(vec3(1.0, 1.0, 1.0), tr);
        assert_vec_eq(vec3(1.0, -1.0, 1.0), br);
    }

    #[test]
    fn pose() {
        let a = Camera::new(Vec3::X, Quat::IDENTITY);
        let b = a.with_fov_y(1.0);
        let c = Camera::new(Vec3::X, Quat::from_rotation_y(0.1));

        assert_eq!(a.pose(), b.pose());
        assert_ne!(a.pose(), c.pose());
    }
}
