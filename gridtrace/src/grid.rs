use std::time::Duration;

use derivative::Derivative;
use log::info;

use crate::utils::BoundingBox;
use crate::{gpu, Backend};

/// Published acceleration structure: encoded triangles, the cell table and
/// the index list, all resident in the backend's memory.
///
/// Snapshots are immutable; a rebuild creates a new one and swaps it in, and
/// the buffers get released when the last reference goes away.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Grid<B>
where
    B: Backend,
{
    generation: u64,
    info: gpu::GridInfo,
    bounds: BoundingBox,
    triangle_count: u32,

    #[derivative(Debug = "ignore")]
    triangles: B::Buffer,

    #[derivative(Debug = "ignore")]
    cells: B::Buffer,

    #[derivative(Debug = "ignore")]
    indices: B::Buffer,

    stats: GridStats,
}

impl<B> Grid<B>
where
    B: Backend,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        generation: u64,
        info: gpu::GridInfo,
        bounds: BoundingBox,
        triangle_count: u32,
        triangles: B::Buffer,
        cells: B::Buffer,
        indices: B::Buffer,
        stats: GridStats,
    ) -> Self {
        Self {
            generation,
            info,
            bounds,
            triangle_count,
            triangles,
            cells,
            indices,
            stats,
        }
    }

    /// Number of the rebuild that produced this snapshot; grows with each
    /// published rebuild.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn info(&self) -> &gpu::GridInfo {
        &self.info
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    pub fn triangle_count(&self) -> u32 {
        self.triangle_count
    }

    /// Buffer of [`gpu::Triangle`]
    pub fn triangles(&self) -> &B::Buffer {
        &self.triangles
    }

    /// Buffer of [`gpu::GridCell`], one per cell
    pub fn cells(&self) -> &B::Buffer {
        &self.cells
    }

    /// Buffer of triangle ids (`u32`), grouped by cell
    pub fn indices(&self) -> &B::Buffer {
        &self.indices
    }

    pub fn stats(&self) -> &GridStats {
        &self.stats
    }
}

impl<B> Drop for Grid<B>
where
    B: Backend,
{
    fn drop(&mut self) {
        info!("Releasing grid #{}", self.generation);
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GridStats {
    pub triangles: usize,
    pub skipped_triangles: usize,
    pub cells: usize,
    pub empty_cells: usize,
    pub pairs: usize,
    pub max_triangles_per_cell: u32,
    pub build_time: Duration,
}

impl GridStats {
    /// Average number of triangles per non-empty cell.
    pub fn avg_triangles_per_cell(&self) -> f32 {
        let occupied = self.cells - self.empty_cells;

        if occupied == 0 {
            0.0
        } else {
            self.pairs as f32 / occupied as f32
        }
    }
}
