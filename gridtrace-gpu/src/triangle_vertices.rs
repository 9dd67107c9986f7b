use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4, Vec4Swizzles};

/// Raw world-space positions of a triangle, one per row; the last row is kept
/// zeroed so that this struct has the same stride as [`crate::Triangle`].
///
/// Used as the binning kernels' input, since testing vertices against cells is
/// cheaper than decoding [`crate::Triangle`].
#[repr(C)]
#[derive(Copy, Clone, Default, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq))]
pub struct TriangleVertices {
    pub d0: Vec4,
    pub d1: Vec4,
    pub d2: Vec4,
    pub d3: Vec4,
}

impl TriangleVertices {
    pub fn new([v0, v1, v2]: [Vec3; 3]) -> Self {
        Self {
            d0: v0.extend(0.0),
            d1: v1.extend(0.0),
            d2: v2.extend(0.0),
            d3: Vec4::ZERO,
        }
    }

    pub fn positions(&self) -> [Vec3; 3] {
        [self.d0.xyz(), self.d1.xyz(), self.d2.xyz()]
    }

    pub fn min(&self) -> Vec3 {
        self.d0.xyz().min(self.d1.xyz()).min(self.d2.xyz())
    }

    pub fn max(&self) -> Vec3 {
        self.d0.xyz().max(self.d1.xyz()).max(self.d2.xyz())
    }
}
