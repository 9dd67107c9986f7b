use bytemuck::{Pod, Zeroable};
use glam::{uvec4, UVec4, Vec2, Vec3, Vec4, Vec4Swizzles};

use crate::GridInfo;

#[repr(C)]
#[derive(Copy, Clone, Default, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq))]
pub struct BinningPassParams {
    pub grid: GridInfo,

    /// x = number of triangles
    pub payload: UVec4,
}

impl BinningPassParams {
    pub fn new(grid: GridInfo, triangle_count: u32) -> Self {
        Self {
            grid,
            payload: uvec4(triangle_count, 0, 0, 0),
        }
    }

    pub fn triangle_count(&self) -> u32 {
        self.payload.x
    }
}

#[repr(C)]
#[derive(Copy, Clone, Default, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq))]
pub struct TracingPassParams {
    /// World-space rays towards the far plane's corners, in the order of:
    /// bottom-left, top-left, bottom-right, top-right.
    ///
    /// The kernel interpolates them bilinearly to get per-pixel rays.
    pub frustum_corners: [Vec4; 4],

    pub camera_position: Vec4,

    /// xy = output's size, in pixels
    pub screen: Vec4,

    pub grid: GridInfo,
    pub grid_min: Vec4,
    pub grid_max: Vec4,

    /// x = seed, y = number of triangles
    pub payload: UVec4,
}

impl TracingPassParams {
    pub fn seed(&self) -> u32 {
        self.payload.x
    }

    pub fn triangle_count(&self) -> u32 {
        self.payload.y
    }

    pub fn screen_size(&self) -> Vec2 {
        self.screen.xy()
    }

    pub fn camera_position(&self) -> Vec3 {
        self.camera_position.xyz()
    }
}
