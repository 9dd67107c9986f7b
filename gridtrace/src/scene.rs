use fxhash::FxHashMap;
use glam::Affine3A;

use crate::{Instance, Mesh};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(u32);

impl MeshHandle {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// Set of static meshes and their instances the grid gets built from.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    meshes: FxHashMap<MeshHandle, Mesh>,
    instances: Vec<Instance>,
    next_mesh_handle: u32,
}

impl Scene {
    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshHandle {
        let mesh_handle = MeshHandle::new(self.next_mesh_handle);

        self.next_mesh_handle += 1;
        self.meshes.insert(mesh_handle, mesh);

        mesh_handle
    }

    pub fn remove_mesh(&mut self, mesh_handle: MeshHandle) -> Option<Mesh> {
        self.meshes.remove(&mesh_handle)
    }

    pub fn mesh(&self, mesh_handle: MeshHandle) -> Option<&Mesh> {
        self.meshes.get(&mesh_handle)
    }

    pub fn add_instance(&mut self, mesh_handle: MeshHandle, transform: Affine3A) {
        self.instances.push(Instance::new(mesh_handle, transform));
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn clear_instances(&mut self) {
        self.instances.clear();
    }

    /// Returns the number of triangles across all instances whose meshes are
    /// present.
    pub fn triangle_count(&self) -> usize {
        self.instances
            .iter()
            .filter_map(|instance| self.mesh(instance.mesh_handle()))
            .map(|mesh| mesh.triangle_count())
            .sum()
    }
}
