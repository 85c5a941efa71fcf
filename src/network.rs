// src/network.rs
// Shared sensor grid network: instances register, claim a frame-local owner
// index on their first write of a frame, and read back the previous frame's
// nearest-sensor results. Owner indices are handed out first-come
// first-served per frame and carry no cross-frame identity.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use glam::{Vec3, Vec4};

use crate::accel::{
    self, read_back_results, BackendKind, CpuNearestPipeline, CpuTransientResources,
    GpuBvhKernels, GpuNearestPipeline, GpuTransientResources,
};
use crate::error::{GridResult, SensorGridError};
use crate::gpu::GpuContext;
use crate::layout::{max_owner_count, GridDimensions};
use crate::types::{NearestHit, SensorGridConfig, SensorInfo, SensorSlot};

static RADIUS_OVERRIDE_BITS: AtomicU32 = AtomicU32::new(0);

/// Process-wide debug override of the maximum search radius; intended for
/// interactive tuning, not part of the steady-state contract.
pub fn set_radius_override(radius: Option<f32>) {
    let bits = match radius {
        Some(r) if r > 0.0 => r.to_bits(),
        _ => 0,
    };
    RADIUS_OVERRIDE_BITS.store(bits, Ordering::Relaxed);
}

pub fn radius_override() -> Option<f32> {
    match RADIUS_OVERRIDE_BITS.load(Ordering::Relaxed) {
        0 => None,
        bits => Some(f32::from_bits(bits)),
    }
}

pub type InstanceId = u64;

struct CpuBackend {
    locations: Vec<SensorSlot>,
    results: Vec<SensorInfo>,
    scratch: CpuTransientResources,
}

struct GpuBackend {
    ctx: &'static GpuContext,
    kernels: GpuBvhKernels,
    locations: Option<wgpu::Buffer>,
    results: Option<wgpu::Buffer>,
    results_host: Vec<SensorInfo>,
    scratch: GpuTransientResources,
}

enum Backend {
    Cpu(CpuBackend),
    Gpu(Box<GpuBackend>),
}

struct StagedSensor {
    owner: u32,
    slot: u32,
    value: SensorSlot,
}

struct StagedChannel {
    owner: u32,
    slot: u32,
    channel: u32,
    value: [f32; 4],
}

/// Shared per-frame owner pool plus the buffers all owners write into and
/// read from. One network serves every registered instance.
pub struct SensorGridNetwork {
    config: SensorGridConfig,
    backend: Backend,

    registered: HashSet<InstanceId>,
    write_index_map: HashMap<InstanceId, u32>,
    read_index_map: HashMap<InstanceId, u32>,

    queued_owner_count: u32,
    allocated_owner_count: u32,
    results_owner_count: u32,

    staged_sensors: Vec<StagedSensor>,
    staged_channels: Vec<StagedChannel>,

    /// Spare channel storage recycled as the next frame's write target.
    user_channels: Vec<[f32; 4]>,
    /// Read side: the values written during the last completed frame.
    previous_user_channels: Vec<[f32; 4]>,
}

impl SensorGridNetwork {
    /// GPU-backed when an adapter is available, CPU otherwise.
    pub fn new(config: SensorGridConfig) -> Self {
        Self::with_backend(config, accel::select_backend(true))
    }

    pub fn with_backend(config: SensorGridConfig, kind: BackendKind) -> Self {
        let backend = match kind {
            BackendKind::Gpu => {
                let ctx = crate::gpu::ctx();
                Backend::Gpu(Box::new(GpuBackend {
                    ctx,
                    kernels: GpuBvhKernels::new(&ctx.device),
                    locations: None,
                    results: None,
                    results_host: Vec::new(),
                    scratch: GpuTransientResources::default(),
                }))
            }
            BackendKind::Cpu => Backend::Cpu(CpuBackend {
                locations: Vec::new(),
                results: Vec::new(),
                scratch: CpuTransientResources::default(),
            }),
        };
        Self {
            config,
            backend,
            registered: HashSet::new(),
            write_index_map: HashMap::new(),
            read_index_map: HashMap::new(),
            queued_owner_count: 0,
            allocated_owner_count: 0,
            results_owner_count: 0,
            staged_sensors: Vec::new(),
            staged_channels: Vec::new(),
            user_channels: Vec::new(),
            previous_user_channels: Vec::new(),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self.backend {
            Backend::Cpu(_) => BackendKind::Cpu,
            Backend::Gpu(_) => BackendKind::Gpu,
        }
    }

    pub fn config(&self) -> &SensorGridConfig {
        &self.config
    }

    fn dims(&self, owner_count: u32) -> GridDimensions {
        GridDimensions::new(self.config.layer_count(), owner_count)
    }

    pub fn sensors_per_owner(&self) -> u32 {
        1 << (2 * self.config.layer_count())
    }

    pub fn side(&self) -> u32 {
        1 << self.config.layer_count()
    }

    /// An instance joins the shared owner pool.
    pub fn register_instance(&mut self, instance: InstanceId) {
        self.registered.insert(instance);
    }

    /// An instance leaves; once no instances remain every buffer is
    /// released.
    pub fn unregister_instance(&mut self, instance: InstanceId) {
        self.registered.remove(&instance);
        self.write_index_map.remove(&instance);
        self.read_index_map.remove(&instance);

        if self.registered.is_empty() {
            self.release_buffers();
        }
    }

    pub fn registered_count(&self) -> usize {
        self.registered.len()
    }

    fn release_buffers(&mut self) {
        self.write_index_map.clear();
        self.read_index_map.clear();
        self.queued_owner_count = 0;
        self.allocated_owner_count = 0;
        self.results_owner_count = 0;
        self.staged_sensors.clear();
        self.staged_channels.clear();
        self.user_channels = Vec::new();
        self.previous_user_channels = Vec::new();

        match &mut self.backend {
            Backend::Cpu(cpu) => {
                cpu.locations = Vec::new();
                cpu.results = Vec::new();
                cpu.scratch.reset();
                cpu.scratch.sizing = Default::default();
            }
            Backend::Gpu(gpu) => {
                gpu.locations = None;
                gpu.results = None;
                gpu.results_host = Vec::new();
                gpu.scratch.reset();
                gpu.scratch.sizing = Default::default();
            }
        }
    }

    /// First write of an instance in a frame claims the next free owner
    /// index. Indices beyond capacity are refused: the instance is silently
    /// dropped from this frame's query set.
    fn acquire_owner(&mut self, instance: InstanceId) -> Option<u32> {
        if let Some(&index) = self.write_index_map.get(&instance) {
            return Some(index);
        }
        if self.queued_owner_count >= max_owner_count() {
            log::warn!(
                "sensor grid owner capacity ({}) exceeded, instance {} dropped this frame",
                max_owner_count(),
                instance
            );
            return None;
        }
        let index = self.queued_owner_count;
        self.queued_owner_count += 1;
        self.write_index_map.insert(instance, index);
        Some(index)
    }

    /// Stages one sensor write for this frame. Should be called each frame
    /// for every live sensor.
    pub fn update_sensor(
        &mut self,
        instance: InstanceId,
        x: u32,
        y: u32,
        location: Vec3,
        range_addend: f32,
        valid: bool,
    ) -> GridResult<()> {
        if !self.registered.contains(&instance) {
            return Err(SensorGridError::capacity("instance not registered"));
        }
        let side = self.side();
        if x >= side || y >= side {
            return Err(SensorGridError::capacity(format!(
                "sensor ({x}, {y}) outside {side}x{side} grid"
            )));
        }
        let Some(owner) = self.acquire_owner(instance) else {
            return Ok(());
        };
        let value = if valid {
            SensorSlot::valid(location, range_addend)
        } else {
            SensorSlot::invalid()
        };
        self.staged_sensors.push(StagedSensor {
            owner,
            slot: y * side + x,
            value,
        });
        Ok(())
    }

    /// Stages one user-channel write; surfaced to readers next frame.
    pub fn write_user_channel(
        &mut self,
        instance: InstanceId,
        x: u32,
        y: u32,
        channel: u32,
        value: Vec4,
    ) -> GridResult<()> {
        if !self.registered.contains(&instance) {
            return Err(SensorGridError::capacity("instance not registered"));
        }
        if channel >= self.config.user_channel_count {
            return Err(SensorGridError::capacity(format!(
                "user channel {channel} out of {}",
                self.config.user_channel_count
            )));
        }
        let side = self.side();
        if x >= side || y >= side {
            return Err(SensorGridError::capacity(format!(
                "sensor ({x}, {y}) outside {side}x{side} grid"
            )));
        }
        let Some(owner) = self.acquire_owner(instance) else {
            return Ok(());
        };
        self.staged_channels.push(StagedChannel {
            owner,
            slot: y * side + x,
            channel,
            value: value.to_array(),
        });
        Ok(())
    }

    /// Runs the frame: allocation, staged writes, the conditional BVH
    /// pipeline, and the read-index swap that publishes last frame's owner
    /// mapping to the read side.
    pub fn end_frame(&mut self) -> GridResult<()> {
        let owners = self.queued_owner_count;
        self.queued_owner_count = 0;

        if owners == 0 {
            self.allocated_owner_count = 0;
            self.results_owner_count = 0;
            match &mut self.backend {
                Backend::Cpu(cpu) => {
                    cpu.locations = Vec::new();
                    cpu.results = Vec::new();
                }
                Backend::Gpu(gpu) => {
                    gpu.locations = None;
                    gpu.results = None;
                    gpu.results_host = Vec::new();
                }
            }
            self.user_channels = Vec::new();
            self.previous_user_channels = Vec::new();
            self.read_index_map = std::mem::take(&mut self.write_index_map);
            self.staged_sensors.clear();
            self.staged_channels.clear();
            return Ok(());
        }

        let dims = self.dims(owners);
        let spo = dims.sensors_per_owner();
        let total = (spo * owners) as usize;
        let owners_changed = owners != self.allocated_owner_count;

        self.rotate_user_channels(total, spo);

        let mut range = self.config.clamped_range();
        if let Some(override_radius) = radius_override() {
            range.y = override_radius;
        }

        match &mut self.backend {
            Backend::Cpu(cpu) => {
                if owners_changed {
                    cpu.locations = vec![SensorSlot::invalid(); total];
                    if !cpu.scratch.supports(&dims.sizing()) {
                        cpu.scratch.build(dims.sizing());
                    }
                } else if self.config.clear_each_frame {
                    CpuNearestPipeline::reset_sensor_slots(&mut cpu.locations);
                }

                for staged in self.staged_sensors.drain(..) {
                    cpu.locations[(staged.owner * spo + staged.slot) as usize] = staged.value;
                }

                if owners != self.results_owner_count {
                    cpu.results = vec![SensorInfo::cleared(); total];
                }

                let pipeline = CpuNearestPipeline::new(dims);
                pipeline.nearest_sensors(range, &cpu.locations, &mut cpu.scratch, &mut cpu.results);
            }
            Backend::Gpu(gpu) => {
                let pipeline = GpuNearestPipeline::new(gpu.ctx, &gpu.kernels, dims);

                if owners_changed || gpu.locations.is_none() {
                    let buffer = gpu.ctx.device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some("sensorgrid-locations"),
                        size: total as u64 * std::mem::size_of::<SensorSlot>() as u64,
                        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                        mapped_at_creation: false,
                    });
                    pipeline.reset_sensor_locations(&buffer);
                    gpu.locations = Some(buffer);
                    if !gpu.scratch.supports(&dims.sizing()) {
                        gpu.scratch.build(&gpu.ctx.device, dims.sizing());
                    }
                } else if self.config.clear_each_frame {
                    pipeline.reset_sensor_locations(gpu.locations.as_ref().unwrap());
                }

                let locations = gpu.locations.as_ref().unwrap();
                for staged in self.staged_sensors.drain(..) {
                    let offset =
                        (staged.owner * spo + staged.slot) as u64 * std::mem::size_of::<SensorSlot>() as u64;
                    gpu.ctx
                        .queue
                        .write_buffer(locations, offset, bytemuck::bytes_of(&staged.value));
                }

                if owners != self.results_owner_count || gpu.results.is_none() {
                    gpu.results = Some(gpu.ctx.device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some("sensorgrid-results"),
                        size: total as u64 * std::mem::size_of::<SensorInfo>() as u64,
                        usage: wgpu::BufferUsages::STORAGE
                            | wgpu::BufferUsages::COPY_DST
                            | wgpu::BufferUsages::COPY_SRC,
                        mapped_at_creation: false,
                    }));
                }
                let results = gpu.results.as_ref().unwrap();

                pipeline.nearest_sensors(range, &gpu.scratch, locations, results);
                gpu.results_host = read_back_results(gpu.ctx, results, spo * owners)?;
            }
        }

        self.allocated_owner_count = owners;
        self.results_owner_count = owners;
        self.read_index_map = std::mem::take(&mut self.write_index_map);
        Ok(())
    }

    /// Double-buffer rotation: this frame's staged writes land in recycled
    /// two-frames-old storage, which then replaces the read side. Slots not
    /// written this frame keep whatever the recycled buffer held.
    fn rotate_user_channels(&mut self, total_sensors: usize, spo: u32) {
        if self.config.user_channel_count == 0 {
            self.staged_channels.clear();
            return;
        }
        let channels = self.config.user_channel_count;
        let needed = total_sensors * channels as usize;

        let mut current = std::mem::take(&mut self.user_channels);
        if current.len() != needed {
            current = vec![[0.0; 4]; needed];
        }
        for staged in self.staged_channels.drain(..) {
            let index = ((staged.owner * spo + staged.slot) * channels + staged.channel) as usize;
            current[index] = staged.value;
        }
        self.user_channels = std::mem::replace(&mut self.previous_user_channels, current);
    }

    /// Nearest other-owner sensor for the given grid cell, from the
    /// previous frame. None until a frame has completed, when the sensor
    /// found nothing in range, or when the instance held no owner slot.
    pub fn find_nearest(&self, instance: InstanceId, x: u32, y: u32) -> Option<NearestHit> {
        let side = self.side();
        if x >= side || y >= side {
            return None;
        }
        let owner = *self.read_index_map.get(&instance)?;
        if owner >= self.results_owner_count {
            return None;
        }
        let spo = self.sensors_per_owner();
        let index = (owner * spo + y * side + x) as usize;

        let results = match &self.backend {
            Backend::Cpu(cpu) => &cpu.results,
            Backend::Gpu(gpu) => &gpu.results_host,
        };
        let info = results.get(index)?;
        if !info.is_hit() {
            return None;
        }
        Some(NearestHit {
            location: Vec3::from_array(info.location),
            distance: info.distance(),
            sensor_x: info.hit_index[0] as u32,
            sensor_y: info.hit_index[1] as u32,
            owner_index: info.hit_index[2] as u32,
        })
    }

    /// Previous-frame value of a user channel for the given grid cell.
    pub fn read_user_channel(
        &self,
        instance: InstanceId,
        x: u32,
        y: u32,
        channel: u32,
    ) -> Option<Vec4> {
        if channel >= self.config.user_channel_count {
            return None;
        }
        let side = self.side();
        if x >= side || y >= side {
            return None;
        }
        let owner = *self.read_index_map.get(&instance)?;
        let spo = self.sensors_per_owner();
        let index =
            ((owner * spo + y * side + x) * self.config.user_channel_count + channel) as usize;
        self.previous_user_channels
            .get(index)
            .map(|v| Vec4::from_array(*v))
    }
}
