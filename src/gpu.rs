// src/gpu.rs
// Shared wgpu device/queue context for the compute backend.
// Acquired lazily and held for the lifetime of the process; callers that can
// live without a GPU use try_ctx() and fall back to the CPU pipeline.

use once_cell::sync::OnceCell;

pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter: wgpu::Adapter,
}

static CTX: OnceCell<Option<GpuContext>> = OnceCell::new();

fn init() -> Option<GpuContext> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;

    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            label: Some("sensorgrid-device"),
        },
        None,
    ))
    .ok()?;

    Some(GpuContext {
        device,
        queue,
        adapter,
    })
}

/// Process-wide GPU context, or None when no suitable adapter exists.
pub fn try_ctx() -> Option<&'static GpuContext> {
    CTX.get_or_init(init).as_ref()
}

/// Process-wide GPU context; panics when no adapter is available.
pub fn ctx() -> &'static GpuContext {
    try_ctx().expect("No suitable GPU adapter")
}
