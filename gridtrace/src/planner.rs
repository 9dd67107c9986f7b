use glam::{UVec3, Vec3};
use log::warn;

use crate::utils::BoundingBox;

/// Chooses the grid's resolution so that each cell holds roughly `density`
/// triangles on average (Wald et al., 2006):
///
/// ```text
/// m = cbrt(density * triangle_count / volume)
/// n = ceil(extent * m)
/// ```
///
/// Degenerate inputs (zero volume, non-finite factor) fall back to a single
/// cell.
pub fn plan(triangle_count: usize, bounds: &BoundingBox, density: f32) -> UVec3 {
    let volume = bounds.volume();
    let m = (density * triangle_count as f32 / volume).cbrt();

    if !bounds.is_set() || volume <= 0.0 || !m.is_finite() {
        warn!(
            "Scene's bounds are degenerate (volume={volume}); falling back to \
             a single-cell grid"
        );

        return UVec3::ONE;
    }

    (bounds.extent() * m)
        .ceil()
        .max(Vec3::ONE)
        .as_uvec3()
}
