use std::sync::{mpsc, Arc, Mutex};

use derivative::Derivative;
use fxhash::FxHashMap;
use glam::{uvec4, UVec2, UVec3};
use log::{debug, info};
use wgpu::util::DeviceExt;

use crate::{Backend, BackendError, Binding, Kernel, Slot};

/// Shader modules the wgpu backend dispatches.
///
/// Kernels are compiled outside of this crate; the modules are expected to
/// expose:
///
/// - `binning`: `cells_counting` and `cells_overlapping` (work-group size of
///   [`gridtrace_gpu::BINNING_WORKGROUP_SIZE`]),
/// - `tracing`: `path_trace` (work-group size of
///   [`gridtrace_gpu::TRACING_WORKGROUP_SIZE`] squared),
/// - `tonemap`: `vs_main` drawing a fullscreen triangle and `fs_main`
///   reading the accumulation buffer (binding 0) and the screen size
///   (binding 1).
///
/// Bindings follow [`Kernel::slots()`], all in group 0.
pub struct Shaders {
    pub binning: wgpu::ShaderModule,
    pub tracing: wgpu::ShaderModule,
    pub tonemap: wgpu::ShaderModule,
}

impl Shaders {
    fn get(&self, kernel: Kernel) -> &wgpu::ShaderModule {
        match kernel {
            Kernel::CellsCounting | Kernel::CellsOverlapping => &self.binning,
            Kernel::PathTrace => &self.tracing,
        }
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct WgpuBackend {
    #[derivative(Debug = "ignore")]
    device: Arc<wgpu::Device>,

    #[derivative(Debug = "ignore")]
    queue: Arc<wgpu::Queue>,

    #[derivative(Debug = "ignore")]
    shaders: Shaders,

    #[derivative(Debug = "ignore")]
    pipelines: Mutex<FxHashMap<Kernel, Arc<ComputePipeline>>>,

    #[derivative(Debug = "ignore")]
    tonemap: TonemapPipeline,
}

impl WgpuBackend {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        shaders: Shaders,
        output_format: wgpu::TextureFormat,
    ) -> Self {
        info!("Initializing wgpu backend; output_format={output_format:?}");

        let tonemap = TonemapPipeline::new(&device, &shaders, output_format);

        Self {
            device,
            queue,
            shaders,
            pipelines: Default::default(),
            tonemap,
        }
    }

    fn pipeline(&self, kernel: Kernel) -> Arc<ComputePipeline> {
        self.pipelines
            .lock()
            .unwrap()
            .entry(kernel)
            .or_insert_with(|| {
                Arc::new(ComputePipeline::new(
                    &self.device,
                    self.shaders.get(kernel),
                    kernel,
                ))
            })
            .clone()
    }

    fn check_size(&self, label: &str, size: usize) -> Result<(), BackendError> {
        let limits = self.device.limits();

        let max = limits
            .max_buffer_size
            .min(limits.max_storage_buffer_binding_size as u64);

        if size as u64 > max {
            return Err(BackendError::Allocation {
                label: label.into(),
                size,
                reason: format!("exceeds device's limit of {max} bytes"),
            });
        }

        Ok(())
    }

    fn submit(
        &self,
        label: &str,
        f: impl FnOnce(&mut wgpu::CommandEncoder),
    ) -> wgpu::SubmissionIndex {
        let mut encoder =
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(label),
                });

        f(&mut encoder);

        self.queue.submit(Some(encoder.finish()))
    }
}

impl Backend for WgpuBackend {
    type Buffer = WgpuBuffer;
    type Target = WgpuTarget;
    type Output = wgpu::TextureView;

    fn create_buffer(
        &self,
        label: &str,
        size: usize,
    ) -> Result<Self::Buffer, BackendError> {
        let padded_size = pad_size(size);

        self.check_size(label, padded_size)?;

        info!("Allocating storage buffer `{label}`; size={padded_size}");

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            size: padded_size as _,
            mapped_at_creation: false,
        });

        Ok(WgpuBuffer {
            label: label.into(),
            buffer,
            size,
        })
    }

    fn write_buffer(
        &self,
        buffer: &Self::Buffer,
        data: &[u8],
    ) -> Result<(), BackendError> {
        if data.len() > buffer.size {
            return Err(BackendError::SizeMismatch {
                expected: buffer.size,
                actual: data.len(),
            });
        }

        if data.is_empty() {
            return Ok(());
        }

        if data.len() % wgpu::COPY_BUFFER_ALIGNMENT as usize == 0 {
            self.queue.write_buffer(&buffer.buffer, 0, data);
        } else {
            let mut padded = data.to_vec();

            padded.resize(pad_size(data.len()), 0);
            self.queue.write_buffer(&buffer.buffer, 0, &padded);
        }

        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: &Self::Buffer,
    ) -> Result<Vec<u8>, BackendError> {
        let padded_size = pad_size(buffer.size) as u64;

        debug!("Reading buffer `{}` back; size={}", buffer.label, buffer.size);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{}_staging", buffer.label)),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            size: padded_size,
            mapped_at_creation: false,
        });

        self.submit("gridtrace_readback", |encoder| {
            encoder.copy_buffer_to_buffer(
                &buffer.buffer,
                0,
                &staging,
                0,
                padded_size,
            );
        });

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();

        slice.map_async(wgpu::MapMode::Read, move |result| {
            _ = tx.send(result);
        });

        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|_| BackendError::Readback("channel closed".into()))?
            .map_err(|err| BackendError::Readback(err.to_string()))?;

        let data = slice.get_mapped_range()[..buffer.size].to_vec();

        staging.unmap();

        Ok(data)
    }

    fn buffer_size(&self, buffer: &Self::Buffer) -> usize {
        buffer.size
    }

    fn create_target(
        &self,
        label: &str,
        size: UVec2,
    ) -> Result<Self::Target, BackendError> {
        let bytes = (size.x as usize) * (size.y as usize) * 16;

        self.check_size(label, bytes)?;

        info!("Allocating accumulation target `{label}`; size={size}");

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            size: pad_size(bytes) as _,
            mapped_at_creation: false,
        });

        Ok(WgpuTarget { buffer, size })
    }

    fn clear_target(&self, target: &Self::Target) -> Result<(), BackendError> {
        self.submit("gridtrace_clear_target", |encoder| {
            encoder.clear_buffer(&target.buffer, 0, None);
        });

        Ok(())
    }

    fn dispatch(
        &self,
        kernel: Kernel,
        bindings: &[Binding<'_, Self>],
        workgroups: UVec3,
    ) -> Result<(), BackendError> {
        kernel.validate(bindings)?;

        if workgroups.cmpeq(UVec3::ZERO).any() {
            debug!("Skipping `{}`: nothing to dispatch", kernel.name());
            return Ok(());
        }

        let pipeline = self.pipeline(kernel);

        let params_buffers: Vec<_> = bindings
            .iter()
            .filter_map(|binding| match binding {
                Binding::Params(data) => Some(self.device.create_buffer_init(
                    &wgpu::util::BufferInitDescriptor {
                        label: Some(&format!(
                            "gridtrace_{}_params",
                            kernel.name()
                        )),
                        contents: data,
                        usage: wgpu::BufferUsages::UNIFORM,
                    },
                )),
                _ => None,
            })
            .collect();

        let mut params_buffers = params_buffers.iter();
        let mut entries = Vec::with_capacity(bindings.len());

        for (binding_id, binding) in bindings.iter().enumerate() {
            let resource = match binding {
                Binding::Params(_) => params_buffers
                    .next()
                    .ok_or_else(|| BackendError::InvalidBindings {
                        kernel: kernel.name(),
                        reason: "missing params".into(),
                    })?
                    .as_entire_binding(),

                Binding::Buffer(buffer) => buffer.buffer.as_entire_binding(),
                Binding::Target(target) => target.buffer.as_entire_binding(),
            };

            entries.push(wgpu::BindGroupEntry {
                binding: binding_id as u32,
                resource,
            });
        }

        let bind_group =
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("gridtrace_{}_bind_group", kernel.name())),
                layout: &pipeline.bind_group_layout,
                entries: &entries,
            });

        self.submit(kernel.name(), |encoder| {
            let mut pass =
                encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(&format!("gridtrace_{}_pass", kernel.name())),
                });

            pass.set_pipeline(&pipeline.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups.x, workgroups.y, workgroups.z);
        });

        Ok(())
    }

    fn tonemap(
        &self,
        target: &Self::Target,
        output: &mut Self::Output,
    ) -> Result<(), BackendError> {
        let screen = self.device.create_buffer_init(
            &wgpu::util::BufferInitDescriptor {
                label: Some("gridtrace_tonemap_screen"),
                contents: bytemuck::bytes_of(&uvec4(
                    target.size.x,
                    target.size.y,
                    0,
                    0,
                )),
                usage: wgpu::BufferUsages::UNIFORM,
            },
        );

        let bind_group =
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("gridtrace_tonemap_bind_group"),
                layout: &self.tonemap.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: target.buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: screen.as_entire_binding(),
                    },
                ],
            });

        self.submit("gridtrace_tonemap", |encoder| {
            let mut pass =
                encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("gridtrace_tonemap_pass"),
                    color_attachments: &[Some(
                        wgpu::RenderPassColorAttachment {
                            view: output,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                                store: true,
                            },
                        },
                    )],
                    depth_stencil_attachment: None,
                });

            pass.set_pipeline(&self.tonemap.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        });

        Ok(())
    }
}

#[derive(Debug)]
pub struct WgpuBuffer {
    label: String,
    buffer: wgpu::Buffer,
    size: usize,
}

impl WgpuBuffer {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

/// Accumulation target: a storage buffer of `vec4<f32>` per pixel (radiance
/// sum + sample count).
#[derive(Debug)]
pub struct WgpuTarget {
    buffer: wgpu::Buffer,
    size: UVec2,
}

impl WgpuTarget {
    pub fn size(&self) -> UVec2 {
        self.size
    }
}

struct ComputePipeline {
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl ComputePipeline {
    fn new(
        device: &wgpu::Device,
        module: &wgpu::ShaderModule,
        kernel: Kernel,
    ) -> Self {
        info!("Initializing pipeline `{}`", kernel.name());

        let entries: Vec<_> = kernel
            .slots()
            .iter()
            .enumerate()
            .map(|(binding, slot)| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: match slot {
                        Slot::Params => wgpu::BufferBindingType::Uniform,
                        Slot::ReadOnly => wgpu::BufferBindingType::Storage {
                            read_only: true,
                        },
                        Slot::ReadWrite | Slot::Target => {
                            wgpu::BufferBindingType::Storage {
                                read_only: false,
                            }
                        }
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("gridtrace_{}_layout", kernel.name())),
                entries: &entries,
            });

        let pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("gridtrace_{}_pipeline_layout", kernel.name())),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let pipeline =
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&format!("gridtrace_{}_pipeline", kernel.name())),
                layout: Some(&pipeline_layout),
                module,
                entry_point: kernel.name(),
            });

        Self {
            bind_group_layout,
            pipeline,
        }
    }
}

struct TonemapPipeline {
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
}

impl TonemapPipeline {
    fn new(
        device: &wgpu::Device,
        shaders: &Shaders,
        format: wgpu::TextureFormat,
    ) -> Self {
        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("gridtrace_tonemap_layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage {
                                read_only: true,
                            },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("gridtrace_tonemap_pipeline_layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let pipeline =
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("gridtrace_tonemap_pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shaders.tonemap,
                    entry_point: "vs_main",
                    buffers: &[],
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &shaders.tonemap,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
            });

        Self {
            bind_group_layout,
            pipeline,
        }
    }
}

/// Rounds given size up to what wgpu accepts for copies and bindings.
fn pad_size(size: usize) -> usize {
    let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;

    (size.max(1) + align - 1) / align * align
}
