use glam::Affine3A;

use crate::MeshHandle;

/// Placement of a mesh in the world.
#[derive(Clone, Debug)]
pub struct Instance {
    mesh_handle: MeshHandle,
    transform: Affine3A,
    transform_inverse: Affine3A,
}

impl Instance {
    pub fn new(mesh_handle: MeshHandle, transform: Affine3A) -> Self {
        Self {
            mesh_handle,
            transform,
            transform_inverse: transform.inverse(),
        }
    }

    pub fn mesh_handle(&self) -> MeshHandle {
        self.mesh_handle
    }

    pub fn transform(&self) -> Affine3A {
        self.transform
    }

    pub fn transform_inverse(&self) -> Affine3A {
        self.transform_inverse
    }
}
