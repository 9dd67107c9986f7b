//! Path tracer's host side: builds a uniform grid over the scene's triangles
//! and drives the per-frame tracing over it.
//!
//! ```text
//! Scene -> extract() -> plan() -> BinningPipeline -> Grid -> RenderDriver
//! ```

mod backend;
mod binning;
mod builder;
mod camera;
mod cancel_token;
mod config;
mod error;
mod extractor;
mod grid;
mod instance;
mod mesh;
mod mesh_triangle;
mod planner;
mod rebuild_task;
mod render_driver;
mod scene;
mod utils;

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use derivative::Derivative;
pub use gridtrace_gpu as gpu;
use log::{info, warn};

pub use self::backend::*;
pub use self::binning::*;
pub use self::builder::*;
pub use self::camera::*;
pub use self::cancel_token::*;
pub use self::config::*;
pub use self::error::*;
pub use self::extractor::*;
pub use self::grid::*;
pub use self::instance::*;
pub use self::mesh::*;
pub use self::mesh_triangle::*;
pub use self::planner::*;
pub use self::rebuild_task::*;
use self::rebuild_task::RebuildGuard;
pub use self::render_driver::*;
pub use self::scene::*;
pub use self::utils::BoundingBox;

/// Owns the backend and the currently published grid.
///
/// Cloning an engine is cheap and yields a handle to the same state.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub struct Engine<B>
where
    B: Backend,
{
    #[derivative(Debug = "ignore")]
    shared: Arc<Shared<B>>,
}

impl<B> Engine<B>
where
    B: Backend,
{
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, Config::default())
    }

    pub fn with_config(backend: B, config: Config) -> Self {
        let pipeline = BinningPipeline::from_config(&config);

        Self::with_pipeline(backend, config, pipeline)
    }

    /// Creates an engine with custom prefix-sum and sorting strategies.
    pub fn with_pipeline(
        backend: B,
        config: Config,
        pipeline: BinningPipeline,
    ) -> Self {
        info!("Initializing engine; config={config:?}");

        Self {
            shared: Arc::new(Shared {
                backend,
                config,
                pipeline,
                grid: Default::default(),
                rebuilding: Default::default(),
                generation: Default::default(),
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Returns the currently published grid, if any.
    pub fn grid(&self) -> Option<Arc<Grid<B>>> {
        self.shared.grid.lock().unwrap().clone()
    }

    /// Rebuilds the grid on the calling thread and publishes it.
    ///
    /// On failure the previously published grid stays in place.
    pub fn rebuild(&self, scene: &Scene) -> Result<Arc<Grid<B>>, BuildError> {
        let _guard = RebuildGuard::acquire(&self.shared.rebuilding)?;

        self.shared.rebuild(scene, &CancelToken::default())
    }

    /// Rebuilds the grid on a background thread; the new grid gets published
    /// once it's ready, with frames rendered in the meantime using the
    /// previous one.
    ///
    /// Fails with [`BuildError::RebuildInProgress`] if another rebuild hasn't
    /// finished yet.
    pub fn request_rebuild(
        &self,
        scene: Scene,
    ) -> Result<RebuildTask<B>, BuildError> {
        let guard = RebuildGuard::acquire(&self.shared.rebuilding)?;
        let cancel = CancelToken::default();

        let handle = thread::spawn({
            let shared = Arc::clone(&self.shared);
            let cancel = cancel.clone();

            move || {
                let _guard = guard;

                shared.rebuild(&scene, &cancel)
            }
        });

        Ok(RebuildTask::new(handle, cancel))
    }

    pub fn is_rebuilding(&self) -> bool {
        self.shared.rebuilding.load(Ordering::Acquire)
    }
}

struct Shared<B>
where
    B: Backend,
{
    backend: B,
    config: Config,
    pipeline: BinningPipeline,
    grid: Mutex<Option<Arc<Grid<B>>>>,
    rebuilding: Arc<AtomicBool>,
    generation: AtomicU64,
}

impl<B> Shared<B>
where
    B: Backend,
{
    fn rebuild(
        &self,
        scene: &Scene,
        cancel: &CancelToken,
    ) -> Result<Arc<Grid<B>>, BuildError> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        let grid = build(
            &self.backend,
            &self.pipeline,
            &self.config,
            scene,
            generation,
            cancel,
        )
        .and_then(|grid| {
            cancel.check()?;
            Ok(Arc::new(grid))
        });

        let grid = match grid {
            Ok(grid) => grid,

            Err(err) => {
                warn!("Couldn't build grid #{generation}: {err}");

                return Err(err);
            }
        };

        let prev_grid =
            mem::replace(&mut *self.grid.lock().unwrap(), Some(grid.clone()));

        info!("Published grid #{generation}");

        // Released when the last frame that holds it finishes
        drop(prev_grid);

        Ok(grid)
    }
}

#[cfg(test)]
mod tests {
    use glam::{uvec3, vec3, Affine3A, Vec3};

    use super::*;

    /// Five triangles spanning the unit cube, none of them degenerate.
    fn unit_cube() -> Scene {
        let positions = vec![
            vec3(1.0, 0.0, 0.0),
            vec3(1.0, 1.0, 0.0),
            vec3(1.0, 1.0, 1.0),
            //
            vec3(1.0, 0.0, 0.0),
            vec3(1.0, 1.0, 1.0),
            vec3(1.0, 0.0, 1.0),
            //
            vec3(0.0, 1.0, 0.0),
            vec3(1.0, 1.0, 1.0),
            vec3(0.0, 1.0, 1.0),
            //
            vec3(0.0, 1.0, 0.0),
            vec3(1.0, 1.0, 0.0),
            vec3(1.0, 1.0, 1.0),
            //
            vec3(0.0, 0.0, 1.0),
            vec3(1.0, 0.0, 1.0),
            vec3(0.0, 1.0, 1.0),
        ];

        let normals = vec![Vec3::Y; positions.len()];
        let indices = (0..5).map(|i| [3 * i, 3 * i + 1, 3 * i + 2]).collect();

        let mut scene = Scene::default();
        let mesh = scene.add_mesh(Mesh::new(positions, normals, indices).unwrap());

        scene.add_instance(mesh, Affine3A::IDENTITY);
        scene
    }

    /// Two layers of `n x n` small, slanted quads, floating above the XZ
    /// plane.
    fn carpet(n: u32) -> Scene {
        let mut positions = Vec::new();
        let mut indices = Vec::new();

        for x in 0..n {
            for z in 0..n {
                let base = positions.len() as u32;
                let origin = vec3(x as f32, 1.0, z as f32);

                positions.extend([
                    origin,
                    origin + vec3(0.9, 0.0, 0.0),
                    origin + vec3(0.0, -0.3, 0.9),
                    origin + vec3(0.9, -0.3, 0.9),
                ]);

                indices.push([base, base + 1, base + 2]);
                indices.push([base + 1, base + 3, base + 2]);
            }
        }

        let normals = vec![Vec3::Y; positions.len()];

        let mut scene = Scene::default();
        let mesh = scene.add_mesh(Mesh::new(positions, normals, indices).unwrap());

        scene.add_instance(mesh, Affine3A::IDENTITY);
        scene.add_instance(mesh, Affine3A::from_translation(vec3(0.0, 2.0, 0.0)));
        scene
    }

    fn read_grid(
        engine: &Engine<HostBackend>,
        grid: &Grid<HostBackend>,
    ) -> (Vec<gpu::GridCell>, Vec<u32>) {
        let backend = engine.backend();

        let cells = backend
            .read_buffer_as(grid.cells(), grid.info().cell_count() as usize)
            .unwrap();

        let indices = backend
            .read_buffer_as(grid.indices(), grid.stats().pairs)
            .unwrap();

        (cells, indices)
    }

    #[test]
    fn unit_cube_grid() {
        let engine = Engine::new(HostBackend::new());
        let grid = engine.rebuild(&unit_cube()).unwrap();

        assert_eq!(uvec3(3, 3, 3), grid.info().resolution());
        assert_eq!(5, grid.triangle_count());
        assert_eq!(1, grid.generation());

        assert!(grid
            .bounds()
            .min()
            .abs_diff_eq(Vec3::splat(-0.1), 1e-6));

        assert!(grid.bounds().max().abs_diff_eq(Vec3::splat(1.1), 1e-6));

        let triangles: Vec<gpu::Triangle> = engine
            .backend()
            .read_buffer_as(grid.triangles(), 5)
            .unwrap();

        for (triangle, expected) in triangles.iter().zip(
            unit_cube()
                .mesh(MeshHandle::new(0))
                .unwrap()
                .positions()
                .chunks(3),
        ) {
            assert_eq!(expected, triangle.positions());
        }
    }

    #[test]
    fn floor_grid() {
        let positions = vec![
            vec3(-5.0, 0.0, -5.0),
            vec3(5.0, 0.0, -5.0),
            vec3(-5.0, 0.0, 5.0),
            vec3(5.0, 0.0, 5.0),
        ];

        let mut scene = Scene::default();

        let mesh = scene.add_mesh(
            Mesh::new(positions, vec![Vec3::Y; 4], vec![[0, 1, 2], [1, 3, 2]])
                .unwrap(),
        );

        scene.add_instance(mesh, Affine3A::IDENTITY);

        let engine = Engine::new(HostBackend::new());
        let grid = engine.rebuild(&scene).unwrap();
        let (_, indices) = read_grid(&engine, &grid);

        assert_eq!(2, grid.triangle_count());
        assert_eq!(0, grid.stats().skipped_triangles);
        assert!(indices.contains(&0));
        assert!(indices.contains(&1));
    }

    #[test]
    fn grid_properties() {
        for config in [
            Config::default(),
            Config::default().with_sort(SortStrategy::Comparison),
            Config::default().with_density(1.0),
        ] {
            let engine = Engine::with_config(HostBackend::new(), config);
            let grid = engine.rebuild(&carpet(12)).unwrap();
            let (cells, indices) = read_grid(&engine, &grid);

            assert_eq!(4 * 12 * 12, grid.triangle_count());
            assert_eq!(grid.info().cell_count() as usize, cells.len());

            // Cell counts add up to the index list's length
            let total: u32 = cells.iter().map(|cell| cell.count).sum();

            assert_eq!(indices.len(), total as usize);

            // Cell ranges are contiguous and disjoint, and cover the entire
            // list; empty cells point at a valid offset
            let mut offset = 0;

            for cell in &cells {
                assert_eq!(offset, cell.offset);
                assert!(cell.offset as usize <= indices.len());

                offset += cell.count;
            }

            // Each triangle is present as many times as it's been counted
            let vertices: Vec<_> = extract(&carpet(12), engine.config())
                .unwrap()
                .vertices;

            let mut appearances = vec![0; vertices.len()];

            for &triangle_id in &indices {
                appearances[triangle_id as usize] += 1;
            }

            for (triangle_id, triangle) in vertices.iter().enumerate() {
                assert_eq!(
                    gpu::overlapped_cells(grid.info(), triangle).len(),
                    appearances[triangle_id]
                );
            }

            assert!(grid.stats().empty_cells > 0);
            assert_eq!(indices.len(), grid.stats().pairs);
        }
    }

    #[test]
    fn failed_rebuild_keeps_previous_grid() {
        let engine = Engine::with_config(
            HostBackend::new(),
            Config::default().with_max_pairs(64),
        );

        let grid = engine.rebuild(&unit_cube()).unwrap();

        let err = engine.rebuild(&Scene::default()).unwrap_err();

        assert!(matches!(err, BuildError::EmptyScene));

        let err = engine.rebuild(&carpet(12)).unwrap_err();

        assert!(matches!(err, BuildError::TooManyPairs { max: 64, .. }));
        assert_eq!(grid.generation(), engine.grid().unwrap().generation());
        assert!(!engine.is_rebuilding());
    }

    #[test]
    fn too_many_cells() {
        let engine = Engine::with_config(
            HostBackend::new(),
            Config::default().with_max_cells(8),
        );

        let err = engine.rebuild(&unit_cube()).unwrap_err();

        assert!(matches!(err, BuildError::TooManyCells { count: 27, max: 8 }));
        assert!(engine.grid().is_none());
    }

    #[test]
    fn background_rebuild() {
        let engine = Engine::new(HostBackend::new());

        // Holding the lock keeps the rebuild from publishing (and thus from
        // finishing) until we're done checking
        let lock = engine.shared.grid.lock().unwrap();
        let task = engine.request_rebuild(carpet(8)).unwrap();

        assert!(engine.is_rebuilding());
        assert!(!task.is_finished());

        assert!(matches!(
            engine.request_rebuild(carpet(8)),
            Err(BuildError::RebuildInProgress)
        ));

        assert!(matches!(
            engine.rebuild(&carpet(8)),
            Err(BuildError::RebuildInProgress)
        ));

        drop(lock);

        let grid = task.wait().unwrap();

        assert_eq!(
            grid.generation(),
            engine.grid().unwrap().generation()
        );

        assert!(!engine.is_rebuilding());

        // Once the previous rebuild is done, another one can be requested
        let grid2 = engine.request_rebuild(unit_cube()).unwrap().wait().unwrap();

        assert!(grid2.generation() > grid.generation());
        assert_eq!(grid2.generation(), engine.grid().unwrap().generation());

        // Frames that still hold the old snapshot can keep using it
        assert_eq!(4 * 8 * 8, grid.triangle_count());
    }

    #[test]
    fn cancelled_rebuild_doesnt_publish() {
        let engine = Engine::new(HostBackend::new());
        let grid = engine.rebuild(&unit_cube()).unwrap();
        let cancel = CancelToken::default();

        cancel.cancel();

        let err = engine.shared.rebuild(&carpet(4), &cancel).unwrap_err();

        assert!(matches!(err, BuildError::Cancelled));
        assert_eq!(grid.generation(), engine.grid().unwrap().generation());

        // Cancelling a background rebuild either stops it or comes too late,
        // but never leaves the engine in a half-published state
        let task = engine.request_rebuild(carpet(16)).unwrap();

        task.cancel();

        match task.wait() {
            Ok(grid) => {
                assert_eq!(grid.generation(), engine.grid().unwrap().generation());
            }

            Err(err) => {
                assert!(matches!(err, BuildError::Cancelled));
                assert_eq!(1, engine.grid().unwrap().generation());
            }
        }
    }
}
