use bytemuck::{Pod, Zeroable};
use glam::{uvec3, UVec3, UVec4, Vec3, Vec4, Vec4Swizzles};

/// Describes the uniform grid's lattice.
#[repr(C)]
#[derive(Copy, Clone, Default, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq))]
pub struct GridInfo {
    /// xyz = world-space position of the grid's minimum corner
    pub origin: Vec4,

    /// xyz = number of cells per world-space unit, i.e. `resolution / extent`
    pub cell_size_inv: Vec4,

    /// xyz = number of cells along each axis
    pub resolution: UVec4,
}

impl GridInfo {
    pub fn new(min: Vec3, max: Vec3, resolution: UVec3) -> Self {
        let extent = max - min;
        let resolution = resolution.max(UVec3::ONE);

        let cell_size_inv = Vec3::select(
            extent.cmpgt(Vec3::ZERO),
            resolution.as_vec3() / extent,
            Vec3::ZERO,
        );

        Self {
            origin: min.extend(0.0),
            cell_size_inv: cell_size_inv.extend(0.0),
            resolution: resolution.extend(0),
        }
    }

    pub fn origin(&self) -> Vec3 {
        self.origin.xyz()
    }

    pub fn resolution(&self) -> UVec3 {
        self.resolution.xyz()
    }

    pub fn cell_count(&self) -> u32 {
        self.resolution.x * self.resolution.y * self.resolution.z
    }

    /// Returns coordinates of the cell containing given point; points outside
    /// of the grid get clamped to the nearest cell.
    pub fn cell_coords(&self, pos: Vec3) -> UVec3 {
        let coords = ((pos - self.origin()) * self.cell_size_inv.xyz()).floor();
        let max = (self.resolution() - UVec3::ONE).as_vec3();

        coords.clamp(Vec3::ZERO, max).as_uvec3()
    }

    /// Linearizes cell's coordinates; this is the only cell id both the
    /// binning and the tracing kernels use.
    pub fn cell_id(&self, coords: UVec3) -> u32 {
        coords.z * (self.resolution.x * self.resolution.y)
            + coords.y * self.resolution.x
            + coords.x
    }

    /// Returns the cells overlapped by given axis-aligned box.
    pub fn cell_range(&self, min: Vec3, max: Vec3) -> CellRange {
        CellRange {
            min: self.cell_coords(min),
            max: self.cell_coords(max),
        }
    }
}

/// Inclusive range of cell coordinates.
#[derive(Copy, Clone)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq))]
pub struct CellRange {
    pub min: UVec3,
    pub max: UVec3,
}

impl CellRange {
    pub fn len(&self) -> u32 {
        let size = self.max - self.min + UVec3::ONE;

        size.x * size.y * size.z
    }

    /// Iterates cells x-first, then y, then z.
    pub fn iter(&self) -> impl Iterator<Item = UVec3> {
        let CellRange { min, max } = *self;

        (min.z..=max.z).flat_map(move |z| {
            (min.y..=max.y)
                .flat_map(move |y| (min.x..=max.x).map(move |x| uvec3(x, y, z)))
        })
    }
}

/// Span of the index list that belongs to a single cell.
#[repr(C)]
#[derive(Copy, Clone, Default, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq, Eq))]
pub struct GridCell {
    pub offset: u32,
    pub count: u32,
}

impl GridCell {
    pub fn new(offset: u32, count: u32) -> Self {
        Self { offset, count }
    }
}

/// Intermediate (triangle, cell) relation emitted during binning.
#[repr(C)]
#[derive(Copy, Clone, Default, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq, Eq))]
pub struct TriangleCellPair {
    pub triangle_id: u32,
    pub cell_id: u32,
}

impl TriangleCellPair {
    /// Value the pair buffer gets filled with before emission, so that slots
    /// which haven't been written to can be told apart.
    pub const UNWRITTEN: Self = Self {
        triangle_id: u32::MAX,
        cell_id: u32::MAX,
    };
}
