//! Kernels that bin triangles into the uniform grid.
//!
//! Both kernels run one invocation per triangle and derive the overlapped
//! cells through the same [`GridInfo::cell_range()`], which guarantees that
//! `cells_overlapping` emits exactly as many pairs as `cells_counting` has
//! counted for given triangle.

use glam::UVec3;

use crate::{
    BinningPassParams, CellRange, GridInfo, TriangleCellPair, TriangleId,
    TriangleVertices,
};

/// Returns cells conservatively overlapped by given triangle, i.e. all cells
/// that intersect triangle's bounding box.
pub fn overlapped_cells(
    grid: &GridInfo,
    triangle: &TriangleVertices,
) -> CellRange {
    grid.cell_range(triangle.min(), triangle.max())
}

/// Stores the number of cells overlapped by each triangle into `counts`.
pub fn cells_counting(
    global_id: UVec3,
    params: &BinningPassParams,
    vertices: &[TriangleVertices],
    counts: &mut [u32],
) {
    let triangle_id = TriangleId::new(global_id.x);

    if triangle_id.get() >= params.triangle_count() {
        return;
    }

    let triangle = vertices[triangle_id.get() as usize];

    counts[triangle_id.get() as usize] =
        overlapped_cells(&params.grid, &triangle).len();
}

/// Emits a pair for each cell overlapped by each triangle, starting at the
/// triangle's offset (as computed by the prefix sum over `cells_counting`'s
/// output).
pub fn cells_overlapping(
    global_id: UVec3,
    params: &BinningPassParams,
    vertices: &[TriangleVertices],
    offsets: &[u32],
    pairs: &mut [TriangleCellPair],
) {
    let triangle_id = TriangleId::new(global_id.x);

    if triangle_id.get() >= params.triangle_count() {
        return;
    }

    let triangle = vertices[triangle_id.get() as usize];
    let mut slot = offsets[triangle_id.get() as usize] as usize;

    for cell in overlapped_cells(&params.grid, &triangle).iter() {
        pairs[slot] = TriangleCellPair {
            triangle_id: triangle_id.get(),
            cell_id: params.grid.cell_id(cell),
        };

        slot += 1;
    }
}

#[cfg(test)]
mod tests {
    use glam::{uvec3, vec3, Vec3};

    use super::*;

    fn params(triangle_count: u32) -> BinningPassParams {
        BinningPassParams::new(
            GridInfo::new(Vec3::ZERO, vec3(4.0, 4.0, 4.0), uvec3(4, 4, 4)),
            triangle_count,
        )
    }

    fn vertices() -> Vec<TriangleVertices> {
        vec![
            // Fits inside cell (0, 0, 0)
            TriangleVertices::new([
                vec3(0.1, 0.1, 0.1),
                vec3(0.9, 0.1, 0.1),
                vec3(0.1, 0.9, 0.1),
            ]),
            // Spans 2x2x1 cells
            TriangleVertices::new([
                vec3(1.5, 1.5, 2.5),
                vec3(2.5, 1.5, 2.5),
                vec3(1.5, 2.5, 2.5),
            ]),
            // Spans the entire bottom row along x
            TriangleVertices::new([
                vec3(0.5, 0.5, 0.5),
                vec3(3.5, 0.5, 0.5),
                vec3(3.5, 0.6, 0.5),
            ]),
        ]
    }

    fn dispatch(len: u32, mut f: impl FnMut(UVec3)) {
        // Simulates a work-group that's larger than the input
        for id in 0..(len + 5) {
            f(uvec3(id, 0, 0));
        }
    }

    #[test]
    fn counting() {
        let params = params(3);
        let vertices = vertices();
        let mut counts = vec![0; 3];

        dispatch(3, |id| cells_counting(id, &params, &vertices, &mut counts));

        assert_eq!(vec![1, 4, 4], counts);
    }

    #[test]
    fn overlapping() {
        let params = params(3);
        let vertices = vertices();
        let offsets = vec![0, 1, 5];
        let mut pairs = vec![TriangleCellPair::UNWRITTEN; 9];

        dispatch(3, |id| {
            cells_overlapping(id, &params, &vertices, &offsets, &mut pairs)
        });

        let pair = |triangle_id, cell_id| TriangleCellPair {
            triangle_id,
            cell_id,
        };

        assert_eq!(
            vec![
                pair(0, 0),
                pair(1, 37),
                pair(1, 38),
                pair(1, 41),
                pair(1, 42),
                pair(2, 0),
                pair(2, 1),
                pair(2, 2),
                pair(2, 3),
            ],
            pairs
        );
    }
}
