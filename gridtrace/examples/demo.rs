//! Builds a procedural scene, renders a couple of frames using the host
//! backend and logs what happened along the way.
//!
//! Run with `RUST_LOG=debug` to see the build's stages.

use std::f32::consts::{PI, TAU};
use std::thread;
use std::time::Duration;

use glam::{uvec2, vec3, Affine3A, Quat, Vec3, Vec4};
use gridtrace::{
    Camera, Engine, FrameOutcome, HostBackend, HostImage, Mesh, RenderDriver,
    Scene,
};

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    let mut scene = Scene::default();
    let sphere = scene.add_mesh(uv_sphere(24, 48));
    let ground = scene.add_mesh(ground(16));

    scene.add_instance(ground, Affine3A::from_translation(vec3(0.0, -1.0, 0.0)));

    for i in 0..5 {
        let angle = TAU * (i as f32) / 5.0;

        scene.add_instance(
            sphere,
            Affine3A::from_scale_rotation_translation(
                Vec3::splat(0.5 + 0.1 * i as f32),
                Quat::from_rotation_y(angle),
                vec3(4.0 * angle.cos(), 0.0, 4.0 * angle.sin()),
            ),
        );
    }

    let engine = Engine::new(HostBackend::new());

    let size = uvec2(160, 90);
    let mut driver = RenderDriver::new(&engine, size).unwrap();
    let mut output = HostImage::new(size);

    let camera = Camera::looking_at(vec3(0.0, 4.0, 10.0), Vec3::ZERO, Vec3::Y)
        .with_aspect(size.x as f32 / size.y as f32);

    let moved_camera = Camera {
        rotation: camera.rotation * Quat::from_rotation_y(0.1),
        ..camera
    };

    let task = engine
        .request_rebuild(scene)
        .unwrap_or_else(|err| panic!("couldn't start the rebuild: {err}"));

    // Frames keep coming while the grid is being built; they just don't have
    // anything to show yet
    while !task.is_finished() {
        render(&engine, &mut driver, &camera, &mut output);
        thread::sleep(Duration::from_millis(5));
    }

    let grid = task
        .wait()
        .unwrap_or_else(|err| panic!("couldn't build the grid: {err}"));

    log::info!("Grid stats: {:#?}", grid.stats());

    for camera in [camera, camera, camera, moved_camera, moved_camera] {
        render(&engine, &mut driver, &camera, &mut output);
    }

    log::info!("Backend stats: {:#?}", engine.backend().stats());
}

fn render(
    engine: &Engine<HostBackend>,
    driver: &mut RenderDriver<HostBackend>,
    camera: &Camera,
    output: &mut HostImage,
) {
    match driver.render_frame(engine, camera, output).unwrap() {
        FrameOutcome::Rendered { samples } => {
            let avg = output.pixels().iter().copied().sum::<Vec4>()
                / output.pixels().len() as f32;

            log::info!("Rendered frame; samples={samples}, avg_color={avg}");
        }

        FrameOutcome::NoGeometry => {
            log::debug!("Nothing to render yet");
        }
    }
}

fn uv_sphere(rings: u32, segments: u32) -> Mesh {
    let mut positions = Vec::new();
    let mut indices = Vec::new();

    for ring in 0..=rings {
        let theta = PI * ring as f32 / rings as f32;

        for segment in 0..=segments {
            let phi = TAU * segment as f32 / segments as f32;

            positions.push(vec3(
                theta.sin() * phi.cos(),
                theta.cos(),
                theta.sin() * phi.sin(),
            ));
        }
    }

    for ring in 0..rings {
        for segment in 0..segments {
            let a = ring * (segments + 1) + segment;
            let b = a + segments + 1;

            indices.push([a, b, a + 1]);
            indices.push([a + 1, b, b + 1]);
        }
    }

    // Unit sphere's normals are its positions
    let normals = positions.clone();

    Mesh::new(positions, normals, indices).unwrap()
}

fn ground(n: u32) -> Mesh {
    let mut positions = Vec::new();
    let mut indices = Vec::new();
    let half = n as f32 / 2.0;

    for z in 0..=n {
        for x in 0..=n {
            positions.push(vec3(x as f32 - half, 0.0, z as f32 - half));
        }
    }

    for z in 0..n {
        for x in 0..n {
            let a = z * (n + 1) + x;
            let b = a + n + 1;

            indices.push([a, b, a + 1]);
            indices.push([a + 1, b, b + 1]);
        }
    }

    let normals = vec![Vec3::Y; positions.len()];

    Mesh::new(positions, normals, indices).unwrap()
}
