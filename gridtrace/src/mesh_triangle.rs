use glam::{Affine3A, Mat4, Vec3};

use crate::gpu;

#[derive(Clone, Debug, Default)]
pub struct MeshTriangle {
    positions: [Vec3; 3],
    normals: [Vec3; 3],
}

impl MeshTriangle {
    pub fn with_positions(mut self, positions: [impl Into<Vec3>; 3]) -> Self {
        self.positions = positions.map(Into::into);
        self
    }

    pub fn with_normals(mut self, normals: [Vec3; 3]) -> Self {
        self.normals = normals;
        self
    }

    pub fn positions(&self) -> [Vec3; 3] {
        self.positions
    }

    pub fn normals(&self) -> [Vec3; 3] {
        self.normals
    }

    /// Transforms this triangle into world space and builds both of its
    /// GPU records; returns `None` if the triangle is degenerate.
    pub(crate) fn build(
        &self,
        xform: Affine3A,
        xform_inv: Affine3A,
    ) -> Option<(gpu::Triangle, gpu::TriangleVertices)> {
        let positions = self
            .positions
            .map(|vertex| xform.transform_point3(vertex));

        let normals = {
            // Transforming normals requires inversing and transposing the
            // matrix in order to get correct results under scaling, see:
            //
            // https://paroj.github.io/gltut/Illumination/Tut09%20Normal%20Transformation.html
            let mat = Mat4::from(xform_inv).transpose();

            self.normals
                .map(|normal| mat.transform_vector3(normal).normalize_or_zero())
        };

        let triangle = gpu::Triangle::encode(positions, normals)?;
        let vertices = gpu::TriangleVertices::new(positions);

        Some((triangle, vertices))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::{vec3, Quat};

    use super::*;

    #[test]
    fn build() {
        let xform = Affine3A::from_scale_rotation_translation(
            vec3(2.0, 1.0, 1.0),
            Quat::IDENTITY,
            vec3(0.0, 0.0, 5.0),
        );

        let target = MeshTriangle::default()
            .with_positions([
                vec3(0.0, 0.0, 0.0),
                vec3(1.0, 0.0, 0.0),
                vec3(0.0, 1.0, 0.0),
            ])
            .with_normals([vec3(1.0, 1.0, 0.0).normalize(); 3]);

        let (triangle, vertices) =
            target.build(xform, xform.inverse()).unwrap();

        assert_eq!(
            [vec3(0.0, 0.0, 5.0), vec3(2.0, 0.0, 5.0), vec3(0.0, 1.0, 5.0)],
            vertices.positions()
        );

        // Non-uniform scale along x squashes the normal's x component
        let expected = vec3(0.5, 1.0, 0.0).normalize();

        for normal in triangle.normals() {
            assert_relative_eq!(expected.x, normal.x, epsilon = 1e-5);
            assert_relative_eq!(expected.y, normal.y, epsilon = 1e-5);
            assert_relative_eq!(expected.z, normal.z, epsilon = 1e-3);
        }
    }

    #[test]
    fn build_degenerate() {
        let target = MeshTriangle::default()
            .with_positions([vec3(1.0, 1.0, 1.0); 3])
            .with_normals([Vec3::Z; 3]);

        assert!(target
            .build(Affine3A::IDENTITY, Affine3A::IDENTITY)
            .is_none());
    }
}
