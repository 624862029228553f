use crate::error::{Error, Result};

pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Acquire a device with native f64 shader support. The solve is
    /// double precision end to end; adapters without SHADER_F64 are
    /// rejected rather than silently downgraded.
    pub async fn new() -> Result<Self> {
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
            .map_err(|e| Error::Gpu(format!("no suitable adapter: {e}")))?;

        if !adapter.features().contains(wgpu::Features::SHADER_F64) {
            return Err(Error::Gpu(format!(
                "adapter '{}' lacks f64 shader support",
                adapter.get_info().name
            )));
        }

        // Take the adapter's buffer limits so large matrices fit.
        let adapter_limits = adapter.limits();

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("CG Device"),
                required_features: wgpu::Features::SHADER_F64,
                required_limits: wgpu::Limits {
                    max_buffer_size: adapter_limits.max_buffer_size,
                    max_storage_buffer_binding_size: adapter_limits
                        .max_storage_buffer_binding_size,
                    ..wgpu::Limits::default()
                },
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| Error::Gpu(format!("device request failed: {e}")))?;

        Ok(Self { device, queue })
    }
}
