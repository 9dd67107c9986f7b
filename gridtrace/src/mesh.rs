use glam::Vec3;

use crate::{BuildError, MeshTriangle};

/// Static, indexed triangle mesh.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    indices: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn new(
        positions: Vec<Vec3>,
        normals: Vec<Vec3>,
        indices: Vec<[u32; 3]>,
    ) -> Result<Self, BuildError> {
        if positions.len() != normals.len() {
            return Err(BuildError::InvalidMesh(format!(
                "got {} positions, but {} normals",
                positions.len(),
                normals.len()
            )));
        }

        if let Some(idx) = indices
            .iter()
            .flatten()
            .find(|&&idx| idx as usize >= positions.len())
        {
            return Err(BuildError::InvalidMesh(format!(
                "index {idx} is out of range (mesh has {} vertices)",
                positions.len()
            )));
        }

        Ok(Self {
            positions,
            normals,
            indices,
        })
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn indices(&self) -> &[[u32; 3]] {
        &self.indices
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangles(&self) -> impl Iterator<Item = MeshTriangle> + '_ {
        self.indices.iter().map(|&indices| {
            let indices = indices.map(|idx| idx as usize);

            MeshTriangle::default()
                .with_positions(indices.map(|idx| self.positions[idx]))
                .with_normals(indices.map(|idx| self.normals[idx]))
        })
    }
}
