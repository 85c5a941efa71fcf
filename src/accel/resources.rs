// src/accel/resources.rs
// Transient scratch pools for the per-frame BVH build. Growth-only: a pool
// covering the requested (sensor, owner) capacity is reused as-is, a larger
// request rebuilds every buffer. No data survives a rebuild.

use std::sync::atomic::AtomicU32;

use crate::layout::{
    align, div_round_up, ResourceSizingInfo, BOUNDS_CHUNK, MORTON_COMPACTION_BLOCK,
    SENSORS_PER_OWNER_ALIGNMENT,
};
use crate::types::InternalNode;

/// Element counts of every scratch array for a given capacity pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScratchExtents {
    pub aligned_sensors_per_owner: u32,
    pub internal_nodes_per_owner: u32,
    pub aligned_internal_nodes_per_owner: u32,
    pub aligned_parents_per_owner: u32,
    pub padded_bounds_chunks_per_owner: u32,
    pub compaction_blocks: u32,
    pub owner_count: u32,
}

impl ScratchExtents {
    pub fn for_sizing(sizing: &ResourceSizingInfo) -> Self {
        let internal_nodes_per_owner = sizing.sensor_count - 1;
        let parents_per_owner = sizing.sensor_count + internal_nodes_per_owner;
        let aligned_sensors_per_owner = align(sizing.sensor_count, SENSORS_PER_OWNER_ALIGNMENT);
        Self {
            aligned_sensors_per_owner,
            internal_nodes_per_owner,
            aligned_internal_nodes_per_owner: align(
                internal_nodes_per_owner,
                SENSORS_PER_OWNER_ALIGNMENT,
            ),
            aligned_parents_per_owner: align(parents_per_owner, SENSORS_PER_OWNER_ALIGNMENT),
            padded_bounds_chunks_per_owner: align(
                div_round_up(sizing.sensor_count, BOUNDS_CHUNK),
                BOUNDS_CHUNK,
            ),
            compaction_blocks: div_round_up(aligned_sensors_per_owner, MORTON_COMPACTION_BLOCK)
                * sizing.owner_count,
            owner_count: sizing.owner_count,
        }
    }

    pub fn total_aligned_sensors(&self) -> u32 {
        self.aligned_sensors_per_owner * self.owner_count
    }

    pub fn total_internal_nodes(&self) -> u32 {
        self.aligned_internal_nodes_per_owner * self.owner_count
    }

    pub fn total_parents(&self) -> u32 {
        self.aligned_parents_per_owner * self.owner_count
    }

    pub fn total_partial_bounds(&self) -> u32 {
        // min/max pair per chunk
        self.padded_bounds_chunks_per_owner * self.owner_count * 2
    }
}

/// Host-memory scratch set used by the CPU pipeline. Mirrors the GPU pool
/// array for array so both backends share addressing math.
#[derive(Default)]
pub struct CpuTransientResources {
    pub partial_bounds: Vec<[f32; 4]>,
    pub leaf_indices: [Vec<u32>; 2],
    pub morton_codes: [Vec<u32>; 2],
    pub duplicate_counts: Vec<u32>,
    pub copy_commands: Vec<[u32; 4]>,
    pub parent_indices: Vec<u32>,
    pub hierarchy_gates: Vec<AtomicU32>,
    pub owner_bounds: Vec<[f32; 4]>,
    pub internal_nodes: Vec<InternalNode>,
    pub sensor_counts: Vec<u32>,

    pub sizing: ResourceSizingInfo,
    pub has_buffers: bool,
}

impl CpuTransientResources {
    pub fn supports(&self, other: &ResourceSizingInfo) -> bool {
        self.sizing.supports(other)
    }

    pub fn reset(&mut self) {
        self.partial_bounds = Vec::new();
        self.leaf_indices = [Vec::new(), Vec::new()];
        self.morton_codes = [Vec::new(), Vec::new()];
        self.duplicate_counts = Vec::new();
        self.copy_commands = Vec::new();
        self.parent_indices = Vec::new();
        self.hierarchy_gates = Vec::new();
        self.owner_bounds = Vec::new();
        self.internal_nodes = Vec::new();
        self.sensor_counts = Vec::new();
        self.has_buffers = false;
    }

    pub fn build(&mut self, sizing: ResourceSizingInfo) {
        self.sizing = sizing;

        // a single sensor has nothing to search against
        if sizing.sensor_count <= 1 {
            self.reset();
            return;
        }

        let extents = ScratchExtents::for_sizing(&sizing);

        self.partial_bounds = vec![[0.0; 4]; extents.total_partial_bounds() as usize];
        for buffer in &mut self.leaf_indices {
            *buffer = vec![0u32; extents.total_aligned_sensors() as usize];
        }
        for buffer in &mut self.morton_codes {
            *buffer = vec![0u32; extents.total_aligned_sensors() as usize];
        }
        self.duplicate_counts = vec![0u32; extents.compaction_blocks as usize];
        self.copy_commands = vec![[0u32; 4]; extents.compaction_blocks as usize];
        self.parent_indices = vec![0u32; extents.total_parents() as usize];
        self.hierarchy_gates = (0..extents.total_internal_nodes())
            .map(|_| AtomicU32::new(0))
            .collect();
        self.owner_bounds = vec![[0.0; 4]; (sizing.owner_count * 2) as usize];
        self.internal_nodes =
            vec![InternalNode::new(0, 0); extents.total_internal_nodes() as usize];
        self.sensor_counts = vec![0u32; sizing.owner_count as usize];
        self.has_buffers = true;
    }
}

/// GPU scratch set. Same sizing rules as the CPU pool; every buffer is
/// storage-visible and carries a debug label.
#[derive(Default)]
pub struct GpuTransientResources {
    pub partial_bounds: Option<wgpu::Buffer>,
    pub leaf_indices: [Option<wgpu::Buffer>; 2],
    pub morton_codes: [Option<wgpu::Buffer>; 2],
    pub duplicate_counts: Option<wgpu::Buffer>,
    pub copy_commands: Option<wgpu::Buffer>,
    pub parent_indices: Option<wgpu::Buffer>,
    pub hierarchy_gates: Option<wgpu::Buffer>,
    pub owner_bounds: Option<wgpu::Buffer>,
    pub internal_nodes: Option<wgpu::Buffer>,
    pub sensor_counts: Option<wgpu::Buffer>,

    pub sizing: ResourceSizingInfo,
    pub has_buffers: bool,
}

impl GpuTransientResources {
    pub fn supports(&self, other: &ResourceSizingInfo) -> bool {
        self.sizing.supports(other)
    }

    pub fn reset(&mut self) {
        *self = Self {
            sizing: self.sizing,
            ..Self::default()
        };
    }

    pub fn build(&mut self, device: &wgpu::Device, sizing: ResourceSizingInfo) {
        self.sizing = sizing;

        if sizing.sensor_count <= 1 {
            self.reset();
            return;
        }

        let extents = ScratchExtents::for_sizing(&sizing);
        let storage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        let make = |label: &str, size: u64| {
            Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: storage,
                mapped_at_creation: false,
            }))
        };

        self.partial_bounds = make(
            "sensorgrid-partial-bounds",
            extents.total_partial_bounds() as u64 * 16,
        );
        for (i, buffer) in self.leaf_indices.iter_mut().enumerate() {
            *buffer = make(
                if i == 0 {
                    "sensorgrid-leaf-indices-0"
                } else {
                    "sensorgrid-leaf-indices-1"
                },
                extents.total_aligned_sensors() as u64 * 4,
            );
        }
        for (i, buffer) in self.morton_codes.iter_mut().enumerate() {
            *buffer = make(
                if i == 0 {
                    "sensorgrid-morton-codes-0"
                } else {
                    "sensorgrid-morton-codes-1"
                },
                extents.total_aligned_sensors() as u64 * 4,
            );
        }
        self.duplicate_counts = make(
            "sensorgrid-duplicate-counts",
            extents.compaction_blocks as u64 * 4,
        );
        self.copy_commands = make(
            "sensorgrid-copy-commands",
            extents.compaction_blocks as u64 * 16,
        );
        self.parent_indices = make(
            "sensorgrid-parent-indices",
            extents.total_parents() as u64 * 4,
        );
        self.hierarchy_gates = make(
            "sensorgrid-hierarchy-gates",
            extents.total_internal_nodes() as u64 * 4,
        );
        self.owner_bounds = make(
            "sensorgrid-owner-bounds",
            sizing.owner_count as u64 * 2 * 16,
        );
        self.internal_nodes = make(
            "sensorgrid-internal-nodes",
            extents.total_internal_nodes() as u64
                * std::mem::size_of::<InternalNode>() as u64,
        );
        self.sensor_counts = make("sensorgrid-sensor-counts", sizing.owner_count as u64 * 4);
        self.has_buffers = true;
    }
}
