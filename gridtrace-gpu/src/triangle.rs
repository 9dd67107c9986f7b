use bytemuck::{Pod, Zeroable};
use glam::{vec3, vec4, Vec3, Vec4, Vec4Swizzles};

/// Triangle as seen by the tracing kernel.
///
/// This is a 4x4 matrix (stored column-by-column) whose 3x3 submatrix holds
/// triangle's world-space vertices as columns.
///
/// The remaining row and column carry the vertex normals: their x and y
/// components go verbatim, while z is reconstructed from the unit length and a
/// 3-bit sign mask stored at `m23`:
///
/// ```text
///         c0      c1      c2      c3
/// r0    v0.x    v1.x    v2.x    n2.x
/// r1    v0.y    v1.y    v2.y    n2.y
/// r2    v0.z    v1.z    v2.z   zsign
/// r3    n0.x    n0.y    n1.x    n1.y
/// ```
#[repr(C)]
#[derive(Copy, Clone, Default, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq))]
pub struct Triangle {
    pub d0: Vec4,
    pub d1: Vec4,
    pub d2: Vec4,
    pub d3: Vec4,
}

impl Triangle {
    /// Encodes given triangle, returning `None` if it's degenerate (i.e. its
    /// vertices are collinear or coincident).
    ///
    /// Normals are expected to be unit-length.
    pub fn encode(positions: [Vec3; 3], normals: [Vec3; 3]) -> Option<Self> {
        if Self::is_degenerate(positions) {
            return None;
        }

        let [v0, v1, v2] = positions;
        let [n0, n1, n2] = normals;

        let zsign = (n0.z >= 0.0) as u32
            | ((n1.z >= 0.0) as u32) << 1
            | ((n2.z >= 0.0) as u32) << 2;

        Some(Self {
            d0: v0.extend(n0.x),
            d1: v1.extend(n0.y),
            d2: v2.extend(n1.x),
            d3: vec4(n2.x, n2.y, zsign as f32, n1.y),
        })
    }

    /// Returns the cross product of triangle's edges; its length is twice the
    /// triangle's area.
    ///
    /// For exactly collinear or coincident vertices this is exactly zero.
    pub fn area_vector([v0, v1, v2]: [Vec3; 3]) -> Vec3 {
        (v1 - v0).cross(v2 - v0)
    }

    pub fn is_degenerate(positions: [Vec3; 3]) -> bool {
        let area = Self::area_vector(positions);

        area == Vec3::ZERO || !area.is_finite()
    }

    pub fn positions(&self) -> [Vec3; 3] {
        [self.d0.xyz(), self.d1.xyz(), self.d2.xyz()]
    }

    pub fn zsign(&self) -> u32 {
        self.d3.z as u32
    }

    pub fn normals(&self) -> [Vec3; 3] {
        let zsign = self.zsign();

        [
            Self::decode_normal(self.d0.w, self.d1.w, zsign & 1 != 0),
            Self::decode_normal(self.d2.w, self.d3.w, zsign & 2 != 0),
            Self::decode_normal(self.d3.x, self.d3.y, zsign & 4 != 0),
        ]
    }

    fn decode_normal(x: f32, y: f32, positive: bool) -> Vec3 {
        let z = (1.0 - x * x - y * y).max(0.0).sqrt();

        vec3(x, y, if positive { z } else { -z })
    }
}

#[derive(Copy, Clone)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq))]
pub struct TriangleId(u32);

impl TriangleId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}
