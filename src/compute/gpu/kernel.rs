//! GPU step kernel over ping-pong storage textures.

use super::{GpuDevice, GpuError, TARGET_USAGES, guarded};
use crate::compute::{BackendTier, FieldState, Patch, PingPong, RadiusField};
use crate::schema::{Boundary, ExtensionConfig, SimParams};

// Embed shader sources at compile time
const STEP_SHADER: &str = include_str!("shaders/step.wgsl");
const IMPORT_SHADER: &str = include_str!("shaders/import.wgsl");
const EXPORT_SHADER: &str = include_str!("shaders/export.wgsl");

/// Placeholder in the shaders for the tier's storage format.
const FORMAT_TOKEN: &str = "FIELD_FORMAT";

/// Bytes per cell in the linear upload and export layouts.
const CELL_BYTES: u64 = 2 * std::mem::size_of::<f32>() as u64;

/// Uniform buffer struct for the step shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct StepUniforms {
    width: u32,
    height: u32,
    boundary: u32,
    flags: u32,
    feed: f32,
    kill: f32,
    du: f32,
    dv: f32,
    alpha_dp: f32,
    lambda_r: f32,
    beta_hs: f32,
    t0_hs: f32,
    t1_hs: f32,
    noise_amt: f32,
    dt: f32,
    v_decay: f32,
    noise_seed: u32,
    _pad: [u32; 3],
}

/// Uniform buffer struct for the import shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct RegionUniforms {
    x0: u32,
    y0: u32,
    width: u32,
    height: u32,
}

/// Uniform buffer struct for the export shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct DimsUniforms {
    width: u32,
    height: u32,
    _pad0: u32,
    _pad1: u32,
}

/// GPU implementation of the step kernel at one precision tier.
///
/// Slot `i` of each bind-group pair is used while texture `i` is current:
/// the step pair reads `i` and writes `1 - i`, the import pair writes `i`,
/// the export pair reads `i`.
pub struct GpuKernel {
    device: wgpu::Device,
    queue: wgpu::Queue,
    tier: BackendTier,
    width: u32,
    height: u32,
    boundary: Boundary,
    extensions: ExtensionConfig,

    textures: PingPong<wgpu::Texture>,

    step_pipeline: wgpu::ComputePipeline,
    import_pipeline: wgpu::ComputePipeline,
    export_pipeline: wgpu::ComputePipeline,

    step_bind_groups: [wgpu::BindGroup; 2],
    import_bind_groups: [wgpu::BindGroup; 2],
    export_bind_groups: [wgpu::BindGroup; 2],

    step_uniforms: wgpu::Buffer,
    region_uniforms: wgpu::Buffer,
    dims_uniforms: wgpu::Buffer,
    radius_buffer: wgpu::Buffer,
    upload_buffer: wgpu::Buffer,
    export_buffer: wgpu::Buffer,
    staging_buffer: wgpu::Buffer,
}

impl GpuKernel {
    /// Allocate both field textures and every pipeline for `tier`.
    ///
    /// Textures start zeroed; callers upload a seeded field before stepping.
    pub fn new(
        gpu: &GpuDevice,
        tier: BackendTier,
        radius: &RadiusField,
        boundary: Boundary,
        extensions: ExtensionConfig,
    ) -> Result<Self, GpuError> {
        let format = tier.texture_format().ok_or(GpuError::NotGpuTier(tier))?;
        let wgsl_format = tier.wgsl_format().ok_or(GpuError::NotGpuTier(tier))?;
        gpu.check_limits(radius.width, radius.height)?;

        guarded(|| {
            Ok(Self::build(
                gpu,
                tier,
                format,
                wgsl_format,
                radius,
                boundary,
                extensions,
            ))
        })
    }

    fn build(
        gpu: &GpuDevice,
        tier: BackendTier,
        format: wgpu::TextureFormat,
        wgsl_format: &str,
        radius: &RadiusField,
        boundary: Boundary,
        extensions: ExtensionConfig,
    ) -> Self {
        let device = gpu.device().clone();
        let queue = gpu.queue().clone();
        let width = radius.width as u32;
        let height = radius.height as u32;
        let field_bytes = radius.width as u64 * radius.height as u64 * CELL_BYTES;

        // 1. Shader modules, specialised to the tier's format
        let step_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Step Shader"),
            source: wgpu::ShaderSource::Wgsl(STEP_SHADER.replace(FORMAT_TOKEN, wgsl_format).into()),
        });
        let import_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Import Shader"),
            source: wgpu::ShaderSource::Wgsl(
                IMPORT_SHADER.replace(FORMAT_TOKEN, wgsl_format).into(),
            ),
        });
        let export_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Export Shader"),
            source: wgpu::ShaderSource::Wgsl(EXPORT_SHADER.into()),
        });

        // 2. Bind group layouts and pipelines
        let step_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Step Bind Group Layout"),
            entries: &[
                uniform_entry(0),
                texture_entry(1),
                storage_texture_entry(2, format),
                storage_entry(3, true),
            ],
        });
        let import_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Import Bind Group Layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_texture_entry(2, format),
            ],
        });
        let export_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Export Bind Group Layout"),
            entries: &[uniform_entry(0), texture_entry(1), storage_entry(2, false)],
        });

        let step_pipeline = create_pipeline(&device, "Step", &step_layout, &step_shader);
        let import_pipeline = create_pipeline(&device, "Import", &import_layout, &import_shader);
        let export_pipeline = create_pipeline(&device, "Export", &export_layout, &export_shader);

        // 3. Field textures
        let create_field = |label: &str| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: TARGET_USAGES,
                view_formats: &[],
            })
        };
        let textures = PingPong::new(create_field("Field Texture A"), create_field("Field Texture B"));
        let views = [
            textures.current().create_view(&wgpu::TextureViewDescriptor::default()),
            textures.next().create_view(&wgpu::TextureViewDescriptor::default()),
        ];

        // 4. Buffers
        let step_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Step Params"),
            size: std::mem::size_of::<StepUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let region_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Import Region"),
            size: std::mem::size_of::<RegionUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let dims_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Export Dims"),
            size: std::mem::size_of::<DimsUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let radius_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Radius Buffer"),
            size: (radius.data.len() * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let upload_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Upload Buffer"),
            size: field_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let export_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Export Buffer"),
            size: field_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size: field_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        queue.write_buffer(&radius_buffer, 0, bytemuck::cast_slice(&radius.data));
        queue.write_buffer(
            &dims_uniforms,
            0,
            bytemuck::bytes_of(&DimsUniforms {
                width,
                height,
                _pad0: 0,
                _pad1: 0,
            }),
        );

        // 5. Bind groups for both orientations
        let step_bind_groups = [0, 1].map(|i| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Step Bind Group"),
                layout: &step_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: step_uniforms.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&views[i]),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(&views[1 - i]),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: radius_buffer.as_entire_binding(),
                    },
                ],
            })
        });
        let import_bind_groups = [0, 1].map(|i| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Import Bind Group"),
                layout: &import_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: region_uniforms.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: upload_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(&views[i]),
                    },
                ],
            })
        });
        let export_bind_groups = [0, 1].map(|i| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Export Bind Group"),
                layout: &export_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: dims_uniforms.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&views[i]),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: export_buffer.as_entire_binding(),
                    },
                ],
            })
        });

        log::debug!("Allocated {width}x{height} GPU field at {tier}");

        Self {
            device,
            queue,
            tier,
            width,
            height,
            boundary,
            extensions,
            textures,
            step_pipeline,
            import_pipeline,
            export_pipeline,
            step_bind_groups,
            import_bind_groups,
            export_bind_groups,
            step_uniforms,
            region_uniforms,
            dims_uniforms,
            radius_buffer,
            upload_buffer,
            export_buffer,
            staging_buffer,
        }
    }

    pub fn tier(&self) -> BackendTier {
        self.tier
    }

    fn width(&self) -> usize {
        self.width as usize
    }

    fn height(&self) -> usize {
        self.height as usize
    }

    fn workgroups(width: u32, height: u32) -> (u32, u32) {
        ((width + 15) / 16, (height + 15) / 16)
    }

    /// Submit one step. The swap happens only once the submit succeeded.
    pub fn dispatch(&mut self, params: &SimParams, noise_seed: u32) -> Result<(), GpuError> {
        let uniforms = StepUniforms {
            width: self.width,
            height: self.height,
            boundary: self.boundary.as_u32(),
            flags: self.extensions.bits(),
            feed: params.feed,
            kill: params.kill,
            du: params.du,
            dv: params.dv,
            alpha_dp: params.alpha_dp,
            lambda_r: params.lambda_r,
            beta_hs: params.beta_hs,
            t0_hs: params.t0_hs,
            t1_hs: params.t1_hs,
            noise_amt: params.noise_amt,
            dt: params.dt,
            v_decay: params.v_decay,
            noise_seed,
            _pad: [0; 3],
        };

        guarded(|| {
            self.queue
                .write_buffer(&self.step_uniforms, 0, bytemuck::bytes_of(&uniforms));

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Step Encoder"),
                });
            {
                let (wx, wy) = Self::workgroups(self.width, self.height);
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Step Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.step_pipeline);
                pass.set_bind_group(0, &self.step_bind_groups[self.textures.front_index()], &[]);
                pass.dispatch_workgroups(wx, wy, 1);
            }
            self.queue.submit(std::iter::once(encoder.finish()));
            Ok(())
        })?;

        self.textures.swap();
        Ok(())
    }

    /// Block until every submitted step has finished.
    pub fn sync(&self) -> Result<(), GpuError> {
        guarded(|| {
            self.device.poll(wgpu::PollType::wait_indefinitely())?;
            Ok(())
        })
    }

    /// Replace the current field.
    pub fn upload(&mut self, state: &FieldState) -> Result<(), GpuError> {
        let region = RegionUniforms {
            x0: 0,
            y0: 0,
            width: self.width,
            height: self.height,
        };
        self.import(region, &state.interleaved())
    }

    /// Write a patch into the current texture only.
    pub fn write_patch(&mut self, patch: &Patch) -> Result<(), GpuError> {
        let region = RegionUniforms {
            x0: patch.x0 as u32,
            y0: patch.y0 as u32,
            width: (patch.width as u32).min(self.width.saturating_sub(patch.x0 as u32)),
            height: (patch.height as u32).min(self.height.saturating_sub(patch.y0 as u32)),
        };
        if region.width == 0 || region.height == 0 {
            return Ok(());
        }
        // Repack when clipped so rows stay contiguous
        let data: Vec<f32> = if region.width as usize == patch.width {
            patch.interleaved()
        } else {
            patch
                .cells
                .chunks_exact(patch.width)
                .take(region.height as usize)
                .flat_map(|row| row[..region.width as usize].iter().flat_map(|&(u, v)| [u, v]))
                .collect()
        };
        self.import(region, &data)
    }

    fn import(&mut self, region: RegionUniforms, data: &[f32]) -> Result<(), GpuError> {
        guarded(|| {
            self.queue
                .write_buffer(&self.upload_buffer, 0, bytemuck::cast_slice(data));
            self.queue
                .write_buffer(&self.region_uniforms, 0, bytemuck::bytes_of(&region));

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Import Encoder"),
                });
            {
                let (wx, wy) = Self::workgroups(region.width, region.height);
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Import Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.import_pipeline);
                pass.set_bind_group(0, &self.import_bind_groups[self.textures.front_index()], &[]);
                pass.dispatch_workgroups(wx, wy, 1);
            }
            self.queue.submit(std::iter::once(encoder.finish()));
            Ok(())
        })
    }

    /// Copy the current field back to host memory.
    pub fn read_current(&self) -> Result<FieldState, GpuError> {
        let field_bytes = self.width as u64 * self.height as u64 * CELL_BYTES;

        guarded(|| {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Export Encoder"),
                });
            {
                let (wx, wy) = Self::workgroups(self.width, self.height);
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Export Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.export_pipeline);
                pass.set_bind_group(0, &self.export_bind_groups[self.textures.front_index()], &[]);
                pass.dispatch_workgroups(wx, wy, 1);
            }
            encoder.copy_buffer_to_buffer(&self.export_buffer, 0, &self.staging_buffer, 0, field_bytes);
            self.queue.submit(std::iter::once(encoder.finish()));

            let buffer_slice = self.staging_buffer.slice(..);
            let (tx, rx) = std::sync::mpsc::channel();
            buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });

            self.device.poll(wgpu::PollType::wait_indefinitely())?;
            rx.recv().map_err(|_| GpuError::MapAborted)??;

            let state = {
                let data = buffer_slice.get_mapped_range();
                let values: &[f32] = bytemuck::cast_slice(&data);
                FieldState::from_interleaved(values, self.width(), self.height())
            };
            self.staging_buffer.unmap();
            Ok(state)
        })
    }

    /// Destroy every GPU resource now rather than when the last handle drops.
    pub fn release(self) {
        for texture in self.textures.into_inner() {
            texture.destroy();
        }
        for buffer in [
            &self.step_uniforms,
            &self.region_uniforms,
            &self.dims_uniforms,
            &self.radius_buffer,
            &self.upload_buffer,
            &self.export_buffer,
            &self.staging_buffer,
        ] {
            buffer.destroy();
        }
        log::debug!("Released GPU field at {}", self.tier);
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    name: &str,
    layout: &wgpu::BindGroupLayout,
    module: &wgpu::ShaderModule,
) -> wgpu::ComputePipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{name} Pipeline Layout")),
        bind_group_layouts: &[layout],
        ..Default::default()
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&format!("{name} Pipeline")),
        layout: Some(&pipeline_layout),
        module,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    })
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn storage_texture_entry(binding: u32, format: wgpu::TextureFormat) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}
