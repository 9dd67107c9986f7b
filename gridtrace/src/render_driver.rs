use glam::{uvec4, UVec2, UVec3, Vec4};
use log::{debug, info};
use rand::Rng;

use crate::{
    gpu, Backend, BackendError, Binding, Camera, CameraPose, Engine, Kernel,
};

/// Per-viewport frame loop: keeps the accumulation target, restarts the
/// accumulation whenever the camera moves (or the grid changes), and
/// dispatches the tracing kernel over the current grid.
pub struct RenderDriver<B>
where
    B: Backend,
{
    size: UVec2,
    workgroups: UVec3,
    target: B::Target,
    state: DriverState,
    grid_generation: Option<u64>,
}

impl<B> RenderDriver<B>
where
    B: Backend,
{
    pub fn new(engine: &Engine<B>, size: UVec2) -> Result<Self, BackendError> {
        let target = engine
            .backend()
            .create_target("gridtrace_accumulation", size)?;

        Ok(Self {
            size,
            workgroups: Kernel::PathTrace.workgroups(size.extend(1)),
            target,
            state: DriverState::Idle,
            grid_generation: None,
        })
    }

    /// Re-creates the accumulation target for the new size; the next frame
    /// starts accumulating from scratch.
    pub fn resize(
        &mut self,
        engine: &Engine<B>,
        size: UVec2,
    ) -> Result<(), BackendError> {
        info!("Resizing viewport: {} -> {size}", self.size);

        self.target = engine
            .backend()
            .create_target("gridtrace_accumulation", size)?;

        self.size = size;
        self.workgroups = Kernel::PathTrace.workgroups(size.extend(1));
        self.state = DriverState::Idle;

        Ok(())
    }

    /// Renders a single frame, accumulating onto the previous ones as long as
    /// the camera stays put, and tonemaps the result into `output`.
    pub fn render_frame(
        &mut self,
        engine: &Engine<B>,
        camera: &Camera,
        output: &mut B::Output,
    ) -> Result<FrameOutcome, BackendError> {
        let backend = engine.backend();
        let pose = camera.pose();

        // Held until the end of the frame, so that a concurrent rebuild can't
        // release buffers we're about to bind
        let grid = engine.grid();
        let grid_generation = grid.as_ref().map(|grid| grid.generation());

        let camera_moved = match self.state {
            DriverState::Idle => true,
            DriverState::Accumulating { pose: prev_pose, .. } => {
                prev_pose != pose
            }
        };

        let grid_changed = grid_generation != self.grid_generation;

        if camera_moved || grid_changed {
            debug!(
                "Resetting accumulation (camera_moved={camera_moved}, \
                 grid_changed={grid_changed})"
            );

            backend.clear_target(&self.target)?;

            self.state = DriverState::Accumulating { pose, samples: 0 };
        }

        self.grid_generation = grid_generation;

        let Some(grid) = grid else {
            backend.tonemap(&self.target, output)?;

            return Ok(FrameOutcome::NoGeometry);
        };

        let params = gpu::TracingPassParams {
            frustum_corners: Self::dispatch_corners(camera),
            camera_position: pose.position.extend(0.0),
            screen: self.size.as_vec2().extend(0.0).extend(0.0),
            grid: *grid.info(),
            grid_min: grid.bounds().min().extend(0.0),
            grid_max: grid.bounds().max().extend(0.0),
            payload: uvec4(Self::seed(), grid.triangle_count(), 0, 0),
        };

        backend.dispatch(
            Kernel::PathTrace,
            &[
                Binding::params(&params),
                Binding::Buffer(grid.triangles()),
                Binding::Buffer(grid.cells()),
                Binding::Buffer(grid.indices()),
                Binding::Target(&self.target),
            ],
            self.workgroups,
        )?;

        backend.tonemap(&self.target, output)?;

        let samples = match &mut self.state {
            DriverState::Accumulating { samples, .. } => {
                *samples += 1;
                *samples
            }
            DriverState::Idle => 0,
        };

        Ok(FrameOutcome::Rendered { samples })
    }

    /// Returns camera's frustum corners in the order the tracing kernel
    /// expects them: bottom-left, top-left, bottom-right, top-right.
    fn dispatch_corners(camera: &Camera) -> [Vec4; 4] {
        let corners = camera.frustum_corners();

        [0, 1, 3, 2].map(|idx| corners[idx].extend(0.0))
    }

    fn seed() -> u32 {
        rand::thread_rng().gen_range(0..(i32::MAX as u32 / 100))
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn workgroups(&self) -> UVec3 {
        self.workgroups
    }

    pub fn state(&self) -> &DriverState {
        &self.state
    }

    pub fn target(&self) -> &B::Target {
        &self.target
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DriverState {
    /// No frame has been rendered since creation or the last resize
    Idle,

    Accumulating { pose: CameraPose, samples: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Frame has been traced; `samples` is the number of frames accumulated
    /// so far, including this one
    Rendered { samples: u32 },

    /// No grid has been published yet, so there was nothing to trace
    NoGeometry,
}

#[cfg(test)]
mod tests {
    use glam::{uvec2, uvec3, vec3, vec4, Affine3A, Quat, Vec3};

    use super::*;
    use crate::{HostBackend, HostImage, Mesh, Scene};

    fn scene() -> Scene {
        let mut scene = Scene::default();

        let mesh = scene.add_mesh(
            Mesh::new(
                vec![
                    vec3(0.0, 0.0, -5.0),
                    vec3(1.0, 0.0, -5.0),
                    vec3(0.0, 1.0, -5.0),
                ],
                vec![Vec3::Z; 3],
                vec![[0, 1, 2]],
            )
            .unwrap(),
        );

        scene.add_instance(mesh, Affine3A::IDENTITY);
        scene
    }

    fn camera() -> Camera {
        Camera::new(Vec3::ZERO, Quat::IDENTITY)
    }

    fn samples(target: &RenderDriver<HostBackend>) -> u32 {
        target.target().samples(0, 0)
    }

    #[test]
    fn accumulation() {
        let engine = Engine::new(HostBackend::new());

        engine.rebuild(&scene()).unwrap();

        let mut target = RenderDriver::new(&engine, uvec2(20, 10)).unwrap();
        let mut output = HostImage::new(uvec2(20, 10));

        assert_eq!(&DriverState::Idle, target.state());
        assert_eq!(uvec3(3, 2, 1), target.workgroups());

        // Frame 1: leaving `Idle` clears the target
        let outcome = target.render_frame(&engine, &camera(), &mut output).unwrap();

        assert_eq!(FrameOutcome::Rendered { samples: 1 }, outcome);
        assert_eq!(1, engine.backend().stats().clears);
        assert_eq!(1, samples(&target));

        // Frames 2-3: camera stays put, so samples accumulate
        for expected in [2, 3] {
            let outcome =
                target.render_frame(&engine, &camera(), &mut output).unwrap();

            assert_eq!(FrameOutcome::Rendered { samples: expected }, outcome);
            assert_eq!(expected, samples(&target));
        }

        assert_eq!(1, engine.backend().stats().clears);

        // Frame 4: camera moves, so the target gets cleared first
        let moved = Camera::new(vec3(0.0, 0.0, 0.001), Quat::IDENTITY);
        let outcome = target.render_frame(&engine, &moved, &mut output).unwrap();

        assert_eq!(FrameOutcome::Rendered { samples: 1 }, outcome);
        assert_eq!(2, engine.backend().stats().clears);
        assert_eq!(1, samples(&target));

        // Frame 5: rotation counts as a move too
        let rotated = Camera::new(
            vec3(0.0, 0.0, 0.001),
            Quat::from_rotation_y(0.001),
        );

        target.render_frame(&engine, &rotated, &mut output).unwrap();

        assert_eq!(3, engine.backend().stats().clears);
        assert_eq!(5, engine.backend().stats().tonemaps);
        assert_eq!(5, engine.backend().stats().dispatches(Kernel::PathTrace));
    }

    #[test]
    fn accumulation_restarts_on_rebuild() {
        let engine = Engine::new(HostBackend::new());

        engine.rebuild(&scene()).unwrap();

        let mut target = RenderDriver::new(&engine, uvec2(4, 4)).unwrap();
        let mut output = HostImage::new(uvec2(4, 4));

        target.render_frame(&engine, &camera(), &mut output).unwrap();
        target.render_frame(&engine, &camera(), &mut output).unwrap();

        assert_eq!(2, samples(&target));

        engine.rebuild(&scene()).unwrap();

        let outcome = target.render_frame(&engine, &camera(), &mut output).unwrap();

        assert_eq!(FrameOutcome::Rendered { samples: 1 }, outcome);
        assert_eq!(1, samples(&target));
    }

    #[test]
    fn no_geometry() {
        let engine = Engine::new(HostBackend::new());
        let mut target = RenderDriver::new(&engine, uvec2(4, 4)).unwrap();
        let mut output = HostImage::new(uvec2(4, 4));

        let outcome = target.render_frame(&engine, &camera(), &mut output).unwrap();

        assert_eq!(FrameOutcome::NoGeometry, outcome);
        assert_eq!(0, engine.backend().stats().dispatches(Kernel::PathTrace));
        assert_eq!(1, engine.backend().stats().tonemaps);
        assert_eq!(vec4(0.0, 0.0, 0.0, 1.0), output.pixel(0, 0));
    }

    #[test]
    fn resize() {
        let engine = Engine::new(HostBackend::new());

        engine.rebuild(&scene()).unwrap();

        let mut target = RenderDriver::new(&engine, uvec2(16, 16)).unwrap();
        let mut output = HostImage::new(uvec2(16, 16));

        target.render_frame(&engine, &camera(), &mut output).unwrap();
        target.render_frame(&engine, &camera(), &mut output).unwrap();

        target.resize(&engine, uvec2(17, 9)).unwrap();

        assert_eq!(&DriverState::Idle, target.state());
        assert_eq!(uvec2(17, 9), target.size());
        assert_eq!(uvec3(3, 2, 1), target.workgroups());

        // Same camera, but the first frame after resize starts from scratch
        let mut output = HostImage::new(uvec2(17, 9));
        let outcome = target.render_frame(&engine, &camera(), &mut output).unwrap();

        assert_eq!(FrameOutcome::Rendered { samples: 1 }, outcome);

        // Every pixel, including the ones in partially covered work-groups,
        // gets exactly one sample
        for y in 0..9 {
            for x in 0..17 {
                assert_eq!(1, target.target().samples(x, y));
            }
        }
    }

    #[test]
    fn corners_order() {
        let engine = Engine::new(HostBackend::new());

        engine.rebuild(&scene()).unwrap();

        let mut target = RenderDriver::new(&engine, uvec2(2, 2)).unwrap();
        let mut output = HostImage::new(uvec2(2, 2));

        target.render_frame(&engine, &camera(), &mut output).unwrap();

        // Host backend shades each pixel with `dir * 0.5 + 0.5`; the camera
        // looks down -Z with +Y up, so pixel (0, 0) (top-left) must point
        // left (-X) and up (+Y), and pixel (1, 1) right and down
        let tl = target.target().radiance(0, 0);
        let br = target.target().radiance(1, 1);

        assert!(tl.x < 0.5 && tl.y > 0.5 && tl.z < 0.5);
        assert!(br.x > 0.5 && br.y < 0.5 && br.z < 0.5);

        let tr = target.target().radiance(1, 0);
        let bl = target.target().radiance(0, 1);

        assert!(tr.x > 0.5 && tr.y > 0.5);
        assert!(bl.x < 0.5 && bl.y < 0.5);
    }
}
