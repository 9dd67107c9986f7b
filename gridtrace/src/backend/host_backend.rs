use std::sync::Mutex;

use bytemuck::Pod;
use fxhash::FxHashMap;
use glam::{uvec3, vec2, UVec2, UVec3, Vec4, Vec4Swizzles};
use log::info;

use crate::backend::cast_bytes;
use crate::{gpu, Backend, BackendError, Binding, Kernel};

/// Backend that runs everything on the CPU.
///
/// Binning kernels are executed invocation-by-invocation, the same way a GPU
/// would run them; tracing doesn't intersect anything, it just accumulates a
/// direction-based color so that the frame plumbing (frustum corners,
/// accumulation, tonemapping) can be observed.
#[derive(Debug, Default)]
pub struct HostBackend {
    stats: Mutex<HostStats>,
}

impl HostBackend {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn stats(&self) -> HostStats {
        self.stats.lock().unwrap().clone()
    }

    fn binding_params<T>(
        kernel: Kernel,
        binding: &Binding<'_, Self>,
    ) -> Result<T, BackendError>
    where
        T: Pod,
    {
        let Binding::Params(bytes) = binding else {
            return Err(Self::unexpected_binding(kernel));
        };

        cast_bytes::<T>(bytes, 1).map(|items| items[0])
    }

    fn binding_buffer<'a>(
        kernel: Kernel,
        binding: &Binding<'a, Self>,
    ) -> Result<&'a HostBuffer, BackendError> {
        let Binding::Buffer(buffer) = binding else {
            return Err(Self::unexpected_binding(kernel));
        };

        Ok(*buffer)
    }

    fn binding_target<'a>(
        kernel: Kernel,
        binding: &Binding<'a, Self>,
    ) -> Result<&'a HostTarget, BackendError> {
        let Binding::Target(target) = binding else {
            return Err(Self::unexpected_binding(kernel));
        };

        Ok(*target)
    }

    fn unexpected_binding(kernel: Kernel) -> BackendError {
        BackendError::InvalidBindings {
            kernel: kernel.name(),
            reason: "unexpected binding".into(),
        }
    }

    fn cells_counting(
        bindings: &[Binding<'_, Self>],
        invocations: UVec3,
    ) -> Result<(), BackendError> {
        let kernel = Kernel::CellsCounting;

        let [params, vertices, counts] = bindings else {
            return Err(Self::unexpected_binding(kernel));
        };

        let params: gpu::BinningPassParams =
            Self::binding_params(kernel, params)?;

        let len = params.triangle_count() as usize;

        let vertices = Self::binding_buffer(kernel, vertices)?
            .read_as::<gpu::TriangleVertices>(len)?;

        let counts = Self::binding_buffer(kernel, counts)?;
        let mut counts_data = counts.read_as::<u32>(len)?;

        for id in 0..invocations.x {
            gpu::cells_counting(
                uvec3(id, 0, 0),
                &params,
                &vertices,
                &mut counts_data,
            );
        }

        counts.store(bytemuck::cast_slice(&counts_data))
    }

    fn cells_overlapping(
        bindings: &[Binding<'_, Self>],
        invocations: UVec3,
    ) -> Result<(), BackendError> {
        let kernel = Kernel::CellsOverlapping;

        let [params, vertices, offsets, pairs] = bindings else {
            return Err(Self::unexpected_binding(kernel));
        };

        let params: gpu::BinningPassParams =
            Self::binding_params(kernel, params)?;

        let len = params.triangle_count() as usize;

        let vertices = Self::binding_buffer(kernel, vertices)?
            .read_as::<gpu::TriangleVertices>(len)?;

        let offsets =
            Self::binding_buffer(kernel, offsets)?.read_as::<u32>(len)?;

        let pairs = Self::binding_buffer(kernel, pairs)?;

        let mut pairs_data = pairs.read_as::<gpu::TriangleCellPair>(
            pairs.len() / std::mem::size_of::<gpu::TriangleCellPair>(),
        )?;

        // A GPU would silently write out of bounds here, but we'd panic
        for (triangle_id, triangle) in vertices.iter().enumerate() {
            let end = offsets[triangle_id] as usize
                + gpu::overlapped_cells(&params.grid, triangle).len() as usize;

            if end > pairs_data.len() {
                return Err(BackendError::Dispatch {
                    kernel: kernel.name(),
                    reason: format!(
                        "triangle #{triangle_id} overflows the pair buffer \
                         ({end} > {})",
                        pairs_data.len()
                    ),
                });
            }
        }

        for id in 0..invocations.x {
            gpu::cells_overlapping(
                uvec3(id, 0, 0),
                &params,
                &vertices,
                &offsets,
                &mut pairs_data,
            );
        }

        pairs.store(bytemuck::cast_slice(&pairs_data))
    }

    fn path_trace(
        bindings: &[Binding<'_, Self>],
        invocations: UVec3,
    ) -> Result<(), BackendError> {
        let kernel = Kernel::PathTrace;

        let [params, _, _, _, target] = bindings else {
            return Err(Self::unexpected_binding(kernel));
        };

        let params: gpu::TracingPassParams =
            Self::binding_params(kernel, params)?;

        let target = Self::binding_target(kernel, target)?;
        let size = target.size;
        let [bl, tl, br, tr] = params.frustum_corners.map(|corner| corner.xyz());
        let mut data = target.data.lock().unwrap();

        for y in 0..invocations.y.min(size.y) {
            for x in 0..invocations.x.min(size.x) {
                let uv = (vec2(x as f32, y as f32) + 0.5) / size.as_vec2();
                let top = tl.lerp(tr, uv.x);
                let bottom = bl.lerp(br, uv.x);
                let dir = top.lerp(bottom, uv.y).normalize_or_zero();

                data[(y * size.x + x) as usize] += (dir * 0.5 + 0.5).extend(1.0);
            }
        }

        Ok(())
    }
}

impl Backend for HostBackend {
    type Buffer = HostBuffer;
    type Target = HostTarget;
    type Output = HostImage;

    fn create_buffer(
        &self,
        label: &str,
        size: usize,
    ) -> Result<Self::Buffer, BackendError> {
        let mut data = Vec::new();

        data.try_reserve_exact(size).map_err(|err| {
            BackendError::Allocation {
                label: label.into(),
                size,
                reason: err.to_string(),
            }
        })?;

        data.resize(size, 0);

        self.stats.lock().unwrap().allocations += 1;

        Ok(HostBuffer {
            label: label.into(),
            data: Mutex::new(data),
        })
    }

    fn write_buffer(
        &self,
        buffer: &Self::Buffer,
        data: &[u8],
    ) -> Result<(), BackendError> {
        buffer.store(data)
    }

    fn read_buffer(
        &self,
        buffer: &Self::Buffer,
    ) -> Result<Vec<u8>, BackendError> {
        Ok(buffer.data.lock().unwrap().clone())
    }

    fn buffer_size(&self, buffer: &Self::Buffer) -> usize {
        buffer.len()
    }

    fn create_target(
        &self,
        label: &str,
        size: UVec2,
    ) -> Result<Self::Target, BackendError> {
        info!("Allocating host target `{label}`; size={size}");

        Ok(HostTarget {
            size,
            data: Mutex::new(vec![Vec4::ZERO; (size.x * size.y) as usize]),
        })
    }

    fn clear_target(&self, target: &Self::Target) -> Result<(), BackendError> {
        target.data.lock().unwrap().fill(Vec4::ZERO);

        self.stats.lock().unwrap().clears += 1;

        Ok(())
    }

    fn dispatch(
        &self,
        kernel: Kernel,
        bindings: &[Binding<'_, Self>],
        workgroups: UVec3,
    ) -> Result<(), BackendError> {
        kernel.validate(bindings)?;

        let invocations = workgroups * kernel.workgroup_size();

        match kernel {
            Kernel::CellsCounting => Self::cells_counting(bindings, invocations),
            Kernel::CellsOverlapping => {
                Self::cells_overlapping(bindings, invocations)
            }
            Kernel::PathTrace => Self::path_trace(bindings, invocations),
        }?;

        *self
            .stats
            .lock()
            .unwrap()
            .dispatches
            .entry(kernel)
            .or_default() += 1;

        Ok(())
    }

    fn tonemap(
        &self,
        target: &Self::Target,
        output: &mut Self::Output,
    ) -> Result<(), BackendError> {
        if output.size != target.size {
            return Err(BackendError::SizeMismatch {
                expected: (target.size.x * target.size.y) as usize,
                actual: (output.size.x * output.size.y) as usize,
            });
        }

        let data = target.data.lock().unwrap();

        for (pixel, accum) in output.pixels.iter_mut().zip(data.iter()) {
            let color = accum.xyz() / accum.w.max(1.0);

            // Reinhard
            *pixel = (color / (color + 1.0)).extend(1.0);
        }

        self.stats.lock().unwrap().tonemaps += 1;

        Ok(())
    }
}

/// Counters of the work [`HostBackend`] has performed so far.
#[derive(Clone, Debug, Default)]
pub struct HostStats {
    pub allocations: usize,
    pub dispatches: FxHashMap<Kernel, usize>,
    pub clears: usize,
    pub tonemaps: usize,
}

impl HostStats {
    pub fn dispatches(&self, kernel: Kernel) -> usize {
        self.dispatches.get(&kernel).copied().unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct HostBuffer {
    label: String,
    data: Mutex<Vec<u8>>,
}

impl HostBuffer {
    pub fn new(label: impl AsRef<str>, size: usize) -> Self {
        Self {
            label: label.as_ref().into(),
            data: Mutex::new(vec![0; size]),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_as<T>(&self, len: usize) -> Result<Vec<T>, BackendError>
    where
        T: Pod,
    {
        cast_bytes(&self.data.lock().unwrap(), len)
    }

    fn store(&self, data: &[u8]) -> Result<(), BackendError> {
        let mut this = self.data.lock().unwrap();

        if data.len() > this.len() {
            return Err(BackendError::SizeMismatch {
                expected: this.len(),
                actual: data.len(),
            });
        }

        this[..data.len()].copy_from_slice(data);

        Ok(())
    }
}

/// Accumulation target; each pixel holds the sum of its samples' radiance
/// (xyz) and the number of samples (w).
#[derive(Debug)]
pub struct HostTarget {
    size: UVec2,
    data: Mutex<Vec<Vec4>>,
}

impl HostTarget {
    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn samples(&self, x: u32, y: u32) -> u32 {
        self.data.lock().unwrap()[(y * self.size.x + x) as usize].w as u32
    }

    pub fn radiance(&self, x: u32, y: u32) -> Vec4 {
        self.data.lock().unwrap()[(y * self.size.x + x) as usize]
    }
}

/// Tonemapped, display-ready image.
#[derive(Clone, Debug, PartialEq)]
pub struct HostImage {
    size: UVec2,
    pixels: Vec<Vec4>,
}

impl HostImage {
    pub fn new(size: UVec2) -> Self {
        Self {
            size,
            pixels: vec![Vec4::ZERO; (size.x * size.y) as usize],
        }
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn pixels(&self) -> &[Vec4] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Vec4 {
        self.pixels[(y * self.size.x + x) as usize]
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::{uvec2, vec3, vec4, Vec3};

    use super::*;
    use crate::BackendExt;

    #[test]
    fn buffers() {
        let target = HostBackend::new();
        let buffer = target.create_buffer_init("test", &[1u32, 2, 3]).unwrap();

        assert_eq!(12, target.buffer_size(&buffer));
        assert_eq!(vec![1, 2, 3], target.read_buffer_as::<u32>(&buffer, 3).unwrap());

        target.write_buffer(&buffer, bytemuck::cast_slice(&[7u32])).unwrap();

        assert_eq!(vec![7, 2, 3], target.read_buffer_as::<u32>(&buffer, 3).unwrap());

        let err = target
            .write_buffer(&buffer, bytemuck::cast_slice(&[0u32; 4]))
            .unwrap_err();

        assert!(matches!(err, BackendError::SizeMismatch { .. }));

        let err = target.read_buffer_as::<u32>(&buffer, 4).unwrap_err();

        assert!(matches!(
            err,
            BackendError::SizeMismatch {
                expected: 16,
                actual: 12
            }
        ));

        assert_eq!(1, target.stats().allocations);
    }

    #[test]
    fn overflowing_pairs() {
        let target = HostBackend::new();

        let params = gpu::BinningPassParams::new(
            gpu::GridInfo::new(Vec3::ZERO, Vec3::ONE, uvec3(2, 2, 2)),
            1,
        );

        let vertices = target
            .create_buffer_init(
                "vertices",
                &[gpu::TriangleVertices::new([
                    vec3(0.1, 0.1, 0.1),
                    vec3(0.9, 0.1, 0.1),
                    vec3(0.1, 0.9, 0.1),
                ])],
            )
            .unwrap();

        let offsets = target.create_buffer_init("offsets", &[0u32, 4]).unwrap();

        // The triangle overlaps 4 cells, but there's room for just 3 pairs
        let pairs = target.create_buffer("pairs", 3 * 8).unwrap();

        let err = target
            .dispatch(
                Kernel::CellsOverlapping,
                &[
                    Binding::params(&params),
                    Binding::Buffer(&vertices),
                    Binding::Buffer(&offsets),
                    Binding::Buffer(&pairs),
                ],
                uvec3(1, 1, 1),
            )
            .unwrap_err();

        assert!(matches!(err, BackendError::Dispatch { .. }));
        assert_eq!(0, target.stats().dispatches(Kernel::CellsOverlapping));
    }

    #[test]
    fn tonemap() {
        let target = HostBackend::new();
        let accum = target.create_target("accum", uvec2(2, 1)).unwrap();

        *accum.data.lock().unwrap() =
            vec![vec4(2.0, 4.0, 0.0, 2.0), vec4(0.0, 0.0, 0.0, 0.0)];

        let mut output = HostImage::new(uvec2(2, 1));

        target.tonemap(&accum, &mut output).unwrap();

        // (1, 2, 0) / (1 + (1, 2, 0))
        assert_relative_eq!(0.5, output.pixel(0, 0).x);
        assert_relative_eq!(2.0 / 3.0, output.pixel(0, 0).y);
        assert_relative_eq!(0.0, output.pixel(0, 0).z);
        assert_eq!(vec4(0.0, 0.0, 0.0, 1.0), output.pixel(1, 0));

        let err = target
            .tonemap(&accum, &mut HostImage::new(uvec2(1, 1)))
            .unwrap_err();

        assert!(matches!(err, BackendError::SizeMismatch { .. }));
    }
}
