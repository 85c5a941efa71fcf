// src/accel/mod.rs
// Per-frame BVH build + nearest-sensor query, GPU-first with a CPU pipeline
// that mirrors the kernels pass for pass. The network layer picks the GPU
// backend when a device exists and falls back to the CPU otherwise.

pub mod cpu;
pub mod gpu;
pub mod resources;

pub use cpu::CpuNearestPipeline;
pub use gpu::{read_back_results, GpuBvhKernels, GpuNearestPipeline};
pub use resources::{CpuTransientResources, GpuTransientResources, ScratchExtents};

use std::sync::atomic::{AtomicBool, Ordering};

static BUILD_DISABLED: AtomicBool = AtomicBool::new(false);

/// Process-wide switch: when set, the per-frame pipeline short-circuits
/// after the result clear and neither builds nor traverses.
pub fn set_build_disabled(disabled: bool) {
    BUILD_DISABLED.store(disabled, Ordering::Relaxed);
}

pub fn build_disabled() -> bool {
    BUILD_DISABLED.load(Ordering::Relaxed)
}

/// Compute backend a network runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Gpu,
    Cpu,
}

/// GPU when an adapter is available, CPU otherwise.
pub fn select_backend(prefer_gpu: bool) -> BackendKind {
    if prefer_gpu {
        if crate::gpu::try_ctx().is_some() {
            return BackendKind::Gpu;
        }
        log::warn!("no GPU adapter available, sensor grid falling back to CPU pipeline");
    }
    BackendKind::Cpu
}
