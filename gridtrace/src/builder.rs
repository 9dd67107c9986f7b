use std::time::Instant;

use log::{debug, info};

use crate::utils::measure;
use crate::{
    extract, gpu, plan, Backend, BackendExt, BinningPipeline, BuildError,
    CancelToken, Config, Grid, GridStats, Scene,
};

/// Runs the entire build: extraction, planning, binning and upload.
///
/// Doesn't publish anything; that's up to the caller.
pub fn build<B>(
    backend: &B,
    pipeline: &BinningPipeline,
    config: &Config,
    scene: &Scene,
    generation: u64,
    cancel: &CancelToken,
) -> Result<Grid<B>, BuildError>
where
    B: Backend,
{
    let tt = Instant::now();

    info!("Building grid #{generation}");

    let geometry = measure("build.extraction", || extract(scene, config))?;
    let triangle_count = geometry.len() as u32;

    debug!(
        "Extracted {} triangles ({} skipped); bounds={:?}",
        geometry.len(),
        geometry.skipped,
        geometry.bounds,
    );

    cancel.check()?;

    let resolution = plan(geometry.len(), &geometry.bounds, config.density);
    let cell_count = (resolution.x as u64)
        .saturating_mul(resolution.y as u64)
        .saturating_mul(resolution.z as u64);

    if cell_count > config.max_cells || cell_count > u32::MAX as u64 {
        return Err(BuildError::TooManyCells {
            count: cell_count,
            max: config.max_cells.min(u32::MAX as u64),
        });
    }

    debug!("Planned grid: {resolution} ({cell_count} cells)");

    let info = gpu::GridInfo::new(
        geometry.bounds.min(),
        geometry.bounds.max(),
        resolution,
    );

    let vertices = backend
        .create_buffer_init("gridtrace_triangle_vertices", &geometry.vertices)?;

    let binned = pipeline.bin(
        backend,
        &vertices,
        triangle_count,
        &info,
        config,
        cancel,
    )?;

    // Vertices are needed only for binning
    drop(vertices);

    cancel.check()?;

    let (triangles, cells, indices) = measure("build.upload", || {
        let triangles = backend
            .create_buffer_init("gridtrace_triangles", &geometry.triangles)?;

        let cells =
            backend.create_buffer_init("gridtrace_grid_cells", &binned.cells)?;

        let indices =
            backend.create_buffer_init("gridtrace_index_list", &binned.indices)?;

        Ok::<_, BuildError>((triangles, cells, indices))
    })?;

    let stats = GridStats {
        triangles: geometry.len(),
        skipped_triangles: geometry.skipped,
        cells: binned.cells.len(),
        empty_cells: binned.cells.iter().filter(|cell| cell.count == 0).count(),
        pairs: binned.indices.len(),
        max_triangles_per_cell: binned
            .cells
            .iter()
            .map(|cell| cell.count)
            .max()
            .unwrap_or_default(),
        build_time: tt.elapsed(),
    };

    info!(
        "Grid #{generation} built: triangles={}, resolution={resolution}, \
         pairs={}, empty_cells={}, max_triangles_per_cell={}, \
         avg_triangles_per_cell={:.2}",
        stats.triangles,
        stats.pairs,
        stats.empty_cells,
        stats.max_triangles_per_cell,
        stats.avg_triangles_per_cell(),
    );

    Ok(Grid::new(
        generation,
        info,
        geometry.bounds,
        triangle_count,
        triangles,
        cells,
        indices,
        stats,
    ))
}
