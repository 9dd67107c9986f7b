use log::{debug, warn};

use crate::utils::BoundingBox;
use crate::{gpu, BuildError, Config, Scene};

/// World-space triangles gathered from a scene, ready to be uploaded.
#[derive(Clone, Debug, Default)]
pub struct ExtractedGeometry {
    pub triangles: Vec<gpu::Triangle>,

    /// Parallel to `triangles`
    pub vertices: Vec<gpu::TriangleVertices>,

    /// Bounds of all accepted triangles, expanded by the configured margin
    pub bounds: BoundingBox,

    /// Number of degenerate (zero-area) triangles that were left out
    pub skipped: usize,
}

impl ExtractedGeometry {
    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

/// Walks all instances of given scene, transforms their triangles into world
/// space and encodes them.
pub fn extract(
    scene: &Scene,
    config: &Config,
) -> Result<ExtractedGeometry, BuildError> {
    let mut triangles = Vec::with_capacity(scene.triangle_count());
    let mut vertices = Vec::with_capacity(scene.triangle_count());
    let mut bounds = BoundingBox::default();
    let mut skipped = 0;

    for (instance_id, instance) in scene.instances().iter().enumerate() {
        let Some(mesh) = scene.mesh(instance.mesh_handle()) else {
            warn!(
                "Instance #{instance_id} refers to unknown mesh {:?}; skipping it",
                instance.mesh_handle()
            );

            continue;
        };

        for (triangle_id, triangle) in mesh.triangles().enumerate() {
            let Some((triangle, triangle_vertices)) = triangle
                .build(instance.transform(), instance.transform_inverse())
            else {
                debug!(
                    "Skipping zero-area triangle #{triangle_id} of instance \
                     #{instance_id}"
                );

                skipped += 1;
                continue;
            };

            for vertex in triangle_vertices.positions() {
                bounds.grow(vertex);
            }

            triangles.push(triangle);
            vertices.push(triangle_vertices);
        }
    }

    if skipped > 0 {
        warn!("Skipped {skipped} degenerate (zero-area) triangle(s)");
    }

    if triangles.is_empty() {
        return Err(BuildError::EmptyScene);
    }

    if triangles.len() > config.max_triangles {
        return Err(BuildError::TooManyTriangles {
            count: triangles.len(),
            max: config.max_triangles,
        });
    }

    Ok(ExtractedGeometry {
        triangles,
        vertices,
        bounds: bounds.expanded(config.bounds_margin),
        skipped,
    })
}
