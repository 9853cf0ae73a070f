//! GPU compute backend.
//!
//! Runs the step kernel as a WebGPU (wgpu) compute shader over a pair of
//! storage textures whose format is set by the precision tier.

mod kernel;

pub use kernel::GpuKernel;

use super::{BackendTier, ProbeError, TargetAllocator};

/// Error type for GPU operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("Buffer mapping failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    #[error("Device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),

    #[error("Buffer mapping callback was dropped")]
    MapAborted,

    #[error("Tier {0} has no GPU storage format")]
    NotGpuTier(BackendTier),

    #[error("Grid {width}x{height} exceeds device limits")]
    TooLarge { width: usize, height: usize },

    #[error("GPU call panicked: {0}")]
    Panicked(String),
}

impl GpuError {
    /// Convert a caught panic payload from a wgpu validation failure.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::Panicked(message)
    }
}

/// An adapter, device and queue shared by every GPU kernel of one engine.
pub struct GpuDevice {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl GpuDevice {
    /// Request a high-performance adapter and open a device on it.
    pub async fn request() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| GpuError::NoAdapter)?;

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Gray-Scott GPU"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await?;

        let info = adapter.get_info();
        log::info!("GPU adapter: {} ({:?})", info.name, info.backend);

        Ok(Self {
            adapter,
            device,
            queue,
        })
    }

    /// Blocking variant of [`Self::request`].
    pub fn acquire() -> Result<Self, GpuError> {
        pollster::block_on(Self::request())
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Check that a `width x height` target fits the device limits.
    pub fn check_limits(&self, width: usize, height: usize) -> Result<(), GpuError> {
        let limits = self.device.limits();
        let texel_bytes = (width as u64) * (height as u64) * 8;
        let fits = width as u64 <= limits.max_texture_dimension_2d as u64
            && height as u64 <= limits.max_texture_dimension_2d as u64
            && texel_bytes <= limits.max_storage_buffer_binding_size as u64
            && texel_bytes <= limits.max_buffer_size;
        if fits {
            Ok(())
        } else {
            Err(GpuError::TooLarge { width, height })
        }
    }
}

/// Storage-target usages a tier's format must support.
pub(crate) const TARGET_USAGES: wgpu::TextureUsages = wgpu::TextureUsages::STORAGE_BINDING
    .union(wgpu::TextureUsages::TEXTURE_BINDING);

impl TargetAllocator for GpuDevice {
    fn try_allocate_target(&self, tier: BackendTier) -> Result<(), ProbeError> {
        let format = tier.texture_format().ok_or(ProbeError::NoDevice)?;

        let features = self.adapter.get_texture_format_features(format);
        if !features.allowed_usages.contains(TARGET_USAGES) {
            return Err(ProbeError::Incomplete(format));
        }

        // The format claims support; confirm a real target can be created.
        guarded(|| {
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Probe Target"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: TARGET_USAGES,
                view_formats: &[],
            });
            texture.destroy();
            Ok(())
        })
        .map_err(|_| ProbeError::Incomplete(format))
    }
}

/// Run a block of wgpu calls, turning a validation panic into an error.
pub(crate) fn guarded<T>(f: impl FnOnce() -> Result<T, GpuError>) -> Result<T, GpuError> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(GpuError::from_panic(payload)))
}
