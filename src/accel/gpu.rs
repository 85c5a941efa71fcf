// src/accel/gpu.rs
// wgpu orchestration of the per-frame BVH pipeline: one compute pipeline per
// kernel, per-dispatch uniform buffers, explicit pass ordering with a submit
// between phases. Mirrors the CPU pipeline buffer-for-buffer.

use bytemuck::{cast_slice, Pod, Zeroable};
use glam::Vec2;
use wgpu::util::DeviceExt;

use crate::accel::resources::GpuTransientResources;
use crate::error::{GridResult, SensorGridError};
use crate::gpu::GpuContext;
use crate::layout::{div_round_up, GridDimensions, MAX_SENSOR_COUNT_LOG2, TRAVERSAL_CHUNK};
use crate::types::SensorInfo;

const SORT_WORKGROUP: u32 = 256;
const SORT_PASSES: u32 = 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ClearParams {
    sensor_count: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct BoundsParams {
    sensor_count: u32,
    padded_intermediate_count: u32,
    source_bounds_count: u32,
    _pad0: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MortonParams {
    sensor_count: u32,
    aligned_sensors_per_owner: u32,
    owner_count: u32,
    value_count: u32,
    blocks_per_owner: u32,
    max_elements_per_block: u32,
    _pad0: u32,
    _pad1: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SortParams {
    count: u32,
    shift: u32,
    num_workgroups: u32,
    _pad0: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct HierarchyParams {
    internal_node_parent_offset: u32,
    aligned_sensors_per_owner: u32,
    padded_internal_count: u32,
    padded_parent_count: u32,
    owner_count: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct TraversalParams {
    max_distance: f32,
    max_sensors_per_owner: u32,
    aligned_sensors_per_owner: u32,
    padded_internal_count: u32,
    owner_count: u32,
    side: u32,
    _pad0: u32,
    _pad1: u32,
}

/// All compute pipelines of the sensor grid, compiled once per device.
pub struct GpuBvhKernels {
    reset_locations: wgpu::ComputePipeline,
    clear_results: wgpu::ComputePipeline,
    prime_bounds: wgpu::ComputePipeline,
    finalize_bounds: wgpu::ComputePipeline,
    morton: wgpu::ComputePipeline,
    compaction: wgpu::ComputePipeline,
    copy_commands: wgpu::ComputePipeline,
    shuffle: wgpu::ComputePipeline,
    top_down: wgpu::ComputePipeline,
    bottom_up: wgpu::ComputePipeline,
    traversal: wgpu::ComputePipeline,
    sort_clear: wgpu::ComputePipeline,
    sort_count: wgpu::ComputePipeline,
    sort_scan: wgpu::ComputePipeline,
    sort_scatter: wgpu::ComputePipeline,
    sort_bind_group_layout: wgpu::BindGroupLayout,
}

impl GpuBvhKernels {
    pub fn new(device: &wgpu::Device) -> Self {
        let clear_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("SensorGrid Clear"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/sensor_clear.wgsl").into()),
        });
        let bounds_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("SensorGrid Bounds"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/sensor_bounds.wgsl").into()),
        });
        let morton_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("SensorGrid Morton"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/sensor_morton.wgsl").into()),
        });
        let sort_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("SensorGrid Radix Sort"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/radix_sort.wgsl").into()),
        });
        let hierarchy_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("SensorGrid Hierarchy"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!("../shaders/sensor_hierarchy.wgsl").into(),
            ),
        });
        let traversal_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("SensorGrid Traversal"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!("../shaders/sensor_traversal.wgsl").into(),
            ),
        });

        let storage_entry = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let sort_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("SensorGrid Radix Sort Layout"),
                entries: &[
                    storage_entry(0, true),
                    storage_entry(1, true),
                    storage_entry(2, false),
                    storage_entry(3, false),
                    storage_entry(4, false),
                    wgpu::BindGroupLayoutEntry {
                        binding: 5,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });
        let sort_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("SensorGrid Radix Sort Pipeline Layout"),
                bind_group_layouts: &[&sort_bind_group_layout],
                push_constant_ranges: &[],
            });

        let auto = |label: &str, module: &wgpu::ShaderModule, entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: None,
                module,
                entry_point: entry,
            })
        };
        let sorted = |label: &str, entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&sort_pipeline_layout),
                module: &sort_shader,
                entry_point: entry,
            })
        };

        Self {
            reset_locations: auto(
                "SensorGrid Reset Locations",
                &clear_shader,
                "reset_sensor_locations",
            ),
            clear_results: auto(
                "SensorGrid Clear Results",
                &clear_shader,
                "clear_nearest_sensors",
            ),
            prime_bounds: auto("SensorGrid Prime Bounds", &bounds_shader, "prime_bounds"),
            finalize_bounds: auto(
                "SensorGrid Finalize Bounds",
                &bounds_shader,
                "finalize_bounds",
            ),
            morton: auto("SensorGrid Morton", &morton_shader, "morton_generation"),
            compaction: auto(
                "SensorGrid Morton Compaction",
                &morton_shader,
                "morton_compaction",
            ),
            copy_commands: auto(
                "SensorGrid Build Copy Commands",
                &morton_shader,
                "build_copy_commands",
            ),
            shuffle: auto("SensorGrid Shuffle", &morton_shader, "shuffle_data"),
            top_down: auto(
                "SensorGrid Hierarchy TopDown",
                &hierarchy_shader,
                "hierarchy_generation_top_down",
            ),
            bottom_up: auto(
                "SensorGrid Bounds BottomUp",
                &hierarchy_shader,
                "bounds_generation_bottom_up",
            ),
            traversal: auto("SensorGrid Traversal", &traversal_shader, "bvh_traversal"),
            sort_clear: sorted("SensorGrid Sort Clear", "clear_histogram"),
            sort_count: sorted("SensorGrid Sort Histogram", "build_histogram"),
            sort_scan: sorted("SensorGrid Sort Scan", "scan_histogram"),
            sort_scatter: sorted("SensorGrid Sort Scatter", "scatter_keys"),
            sort_bind_group_layout,
        }
    }
}

/// Per-frame pass sequencer over a set of transient resources, the caller's
/// location buffer and the result buffer.
pub struct GpuNearestPipeline<'a> {
    ctx: &'static GpuContext,
    kernels: &'a GpuBvhKernels,
    dims: GridDimensions,
}

impl<'a> GpuNearestPipeline<'a> {
    pub fn new(ctx: &'static GpuContext, kernels: &'a GpuBvhKernels, dims: GridDimensions) -> Self {
        Self { ctx, kernels, dims }
    }

    fn uniform<T: Pod>(&self, label: &str, value: T) -> wgpu::Buffer {
        self.ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: cast_slice(&[value]),
                usage: wgpu::BufferUsages::UNIFORM,
            })
    }

    fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        entries: &[(u32, &wgpu::Buffer)],
        groups: (u32, u32),
    ) {
        let layout = pipeline.get_bind_group_layout(0);
        let entries: Vec<wgpu::BindGroupEntry> = entries
            .iter()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let bind_group = self
            .ctx
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &layout,
                entries: &entries,
            });
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups.0, groups.1, 1);
    }

    /// Resets every sensor-location slot to the invalid sentinel.
    pub fn reset_sensor_locations(&self, locations: &wgpu::Buffer) {
        let params = self.uniform(
            "sensorgrid-reset-params",
            ClearParams {
                sensor_count: self.dims.total_sensors(),
                _pad0: 0,
                _pad1: 0,
                _pad2: 0,
            },
        );
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sensorgrid-reset-locations"),
            });
        self.dispatch(
            &mut encoder,
            "sensorgrid-reset-locations",
            &self.kernels.reset_locations,
            &[(0, &params), (1, locations)],
            (div_round_up(self.dims.total_sensors(), 128), 1),
        );
        self.ctx.queue.submit(Some(encoder.finish()));
    }

    /// Clears the result buffer unconditionally.
    pub fn reset_results(&self, results: &wgpu::Buffer) {
        let params = self.uniform(
            "sensorgrid-clear-params",
            ClearParams {
                sensor_count: self.dims.total_sensors(),
                _pad0: 0,
                _pad1: 0,
                _pad2: 0,
            },
        );
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sensorgrid-clear-results"),
            });
        self.dispatch(
            &mut encoder,
            "sensorgrid-clear-results",
            &self.kernels.clear_results,
            &[(0, &params), (2, results)],
            (div_round_up(self.dims.total_sensors(), 128), 1),
        );
        self.ctx.queue.submit(Some(encoder.finish()));
    }

    /// Full conditional pipeline, identical in structure to the CPU path.
    pub fn nearest_sensors(
        &self,
        global_range: Vec2,
        scratch: &GpuTransientResources,
        locations: &wgpu::Buffer,
        results: &wgpu::Buffer,
    ) {
        self.reset_results(results);

        if self.dims.owner_count > 1 && scratch.has_buffers && !crate::accel::build_disabled() {
            self.generate_owner_bounds(scratch, locations);
            self.generate_sorted_leaves(scratch, locations);
            self.generate_bvh(scratch, locations);
            self.run_traversals(global_range.y, scratch, locations, results);
        }
    }

    fn generate_owner_bounds(&self, scratch: &GpuTransientResources, locations: &wgpu::Buffer) {
        let chunks = self.dims.bounds_chunks_per_owner();
        let params = self.uniform(
            "sensorgrid-bounds-params",
            BoundsParams {
                sensor_count: self.dims.sensors_per_owner(),
                padded_intermediate_count: self.dims.padded_bounds_chunks_per_owner(),
                source_bounds_count: chunks,
                _pad0: 0,
            },
        );
        let partial = scratch.partial_bounds.as_ref().expect("scratch built");
        let owner_bounds = scratch.owner_bounds.as_ref().expect("scratch built");

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sensorgrid-owner-bounds"),
            });
        self.dispatch(
            &mut encoder,
            "sensorgrid-prime-bounds",
            &self.kernels.prime_bounds,
            &[(0, &params), (1, locations), (2, partial)],
            (chunks, self.dims.owner_count),
        );
        self.dispatch(
            &mut encoder,
            "sensorgrid-finalize-bounds",
            &self.kernels.finalize_bounds,
            &[(0, &params), (2, partial), (3, owner_bounds)],
            (self.dims.owner_count, 1),
        );
        self.ctx.queue.submit(Some(encoder.finish()));
    }

    fn generate_sorted_leaves(&self, scratch: &GpuTransientResources, locations: &wgpu::Buffer) {
        let aligned = self.dims.aligned_sensors_per_owner();
        let total = self.dims.total_aligned_sensors();
        let params = self.uniform(
            "sensorgrid-morton-params",
            MortonParams {
                sensor_count: self.dims.sensors_per_owner(),
                aligned_sensors_per_owner: aligned,
                owner_count: self.dims.owner_count,
                value_count: total,
                blocks_per_owner: self.dims.compaction_blocks_per_owner(),
                max_elements_per_block: crate::layout::MORTON_COMPACTION_BLOCK,
                _pad0: 0,
                _pad1: 0,
            },
        );

        let codes = [
            scratch.morton_codes[0].as_ref().expect("scratch built"),
            scratch.morton_codes[1].as_ref().expect("scratch built"),
        ];
        let leaves = [
            scratch.leaf_indices[0].as_ref().expect("scratch built"),
            scratch.leaf_indices[1].as_ref().expect("scratch built"),
        ];
        let owner_bounds = scratch.owner_bounds.as_ref().expect("scratch built");
        let duplicate_counts = scratch.duplicate_counts.as_ref().expect("scratch built");
        let copy_commands = scratch.copy_commands.as_ref().expect("scratch built");
        let sensor_counts = scratch.sensor_counts.as_ref().expect("scratch built");

        // Morton keys: codes[0], leaf slots: leaves[1]
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sensorgrid-morton"),
            });
        self.dispatch(
            &mut encoder,
            "sensorgrid-morton-generation",
            &self.kernels.morton,
            &[
                (0, &params),
                (1, locations),
                (2, owner_bounds),
                (5, codes[0]),
                (6, leaves[1]),
            ],
            (div_round_up(aligned, 128), self.dims.owner_count),
        );
        self.ctx.queue.submit(Some(encoder.finish()));

        self.sort_pairs(codes, leaves, total);

        // Compaction: codes[0] -> codes[1], leaves[1] -> leaves[0]
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sensorgrid-compaction"),
            });
        self.dispatch(
            &mut encoder,
            "sensorgrid-morton-compaction",
            &self.kernels.compaction,
            &[
                (0, &params),
                (3, codes[0]),
                (4, leaves[1]),
                (5, codes[1]),
                (6, leaves[0]),
                (7, duplicate_counts),
            ],
            (self.dims.total_compaction_blocks(), 1),
        );
        self.dispatch(
            &mut encoder,
            "sensorgrid-build-copy-commands",
            &self.kernels.copy_commands,
            &[
                (0, &params),
                (7, duplicate_counts),
                (8, copy_commands),
                (9, sensor_counts),
            ],
            (div_round_up(self.dims.owner_count, 32), 1),
        );
        // Shuffle into the final aligned layout: codes[1] -> codes[0],
        // leaves[0] -> leaves[1]
        self.dispatch(
            &mut encoder,
            "sensorgrid-shuffle-codes",
            &self.kernels.shuffle,
            &[(3, codes[1]), (5, codes[0]), (8, copy_commands)],
            (self.dims.total_compaction_blocks(), 1),
        );
        self.dispatch(
            &mut encoder,
            "sensorgrid-shuffle-leaves",
            &self.kernels.shuffle,
            &[(3, leaves[0]), (5, leaves[1]), (8, copy_commands)],
            (self.dims.total_compaction_blocks(), 1),
        );
        self.ctx.queue.submit(Some(encoder.finish()));
    }

    /// Four-pass key/value radix sort over the whole multi-owner batch.
    fn sort_pairs(&self, codes: [&wgpu::Buffer; 2], leaves: [&wgpu::Buffer; 2], count: u32) {
        let num_workgroups = div_round_up(count, SORT_WORKGROUP).max(1);
        let histogram = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sensorgrid-sort-histogram"),
            size: num_workgroups as u64 * 256 * 4,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let mut key_index = 0usize;
        for pass in 0..SORT_PASSES {
            let params = self.uniform(
                "sensorgrid-sort-params",
                SortParams {
                    count,
                    shift: pass * 8,
                    num_workgroups,
                    _pad0: 0,
                },
            );
            let bind_group = self
                .ctx
                .device
                .create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("sensorgrid-sort-bind"),
                    layout: &self.kernels.sort_bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: codes[key_index].as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: leaves[1 - key_index].as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: codes[1 - key_index].as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: leaves[key_index].as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 4,
                            resource: histogram.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 5,
                            resource: params.as_entire_binding(),
                        },
                    ],
                });

            let mut encoder =
                self.ctx
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("sensorgrid-sort"),
                    });
            let mut run = |pipeline: &wgpu::ComputePipeline, label: &str, groups: u32| {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(label),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups, 1, 1);
            };
            run(&self.kernels.sort_clear, "sort-clear", num_workgroups);
            run(&self.kernels.sort_count, "sort-histogram", num_workgroups);
            run(&self.kernels.sort_scan, "sort-scan", 1);
            run(&self.kernels.sort_scatter, "sort-scatter", num_workgroups);
            drop(run);
            self.ctx.queue.submit(Some(encoder.finish()));

            key_index = 1 - key_index;
        }
        // after an even pass count the sorted data sits in codes[0]/leaves[1]
    }

    fn generate_bvh(&self, scratch: &GpuTransientResources, locations: &wgpu::Buffer) {
        let params = self.uniform(
            "sensorgrid-hierarchy-params",
            HierarchyParams {
                internal_node_parent_offset: self.dims.sensors_per_owner(),
                aligned_sensors_per_owner: self.dims.aligned_sensors_per_owner(),
                padded_internal_count: self.dims.aligned_internal_nodes_per_owner(),
                padded_parent_count: self.dims.aligned_parents_per_owner(),
                owner_count: self.dims.owner_count,
                _pad0: 0,
                _pad1: 0,
                _pad2: 0,
            },
        );
        let sensor_counts = scratch.sensor_counts.as_ref().expect("scratch built");
        let leaves = scratch.leaf_indices[1].as_ref().expect("scratch built");
        let codes = scratch.morton_codes[0].as_ref().expect("scratch built");
        let nodes = scratch.internal_nodes.as_ref().expect("scratch built");
        let parents = scratch.parent_indices.as_ref().expect("scratch built");
        let gates = scratch.hierarchy_gates.as_ref().expect("scratch built");

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sensorgrid-bvh"),
            });
        self.dispatch(
            &mut encoder,
            "sensorgrid-hierarchy-top-down",
            &self.kernels.top_down,
            &[
                (0, &params),
                (1, sensor_counts),
                (2, leaves),
                (3, codes),
                (4, nodes),
                (5, parents),
                (6, gates),
            ],
            (
                div_round_up(self.dims.aligned_internal_nodes_per_owner(), 128),
                self.dims.owner_count,
            ),
        );
        self.ctx.queue.submit(Some(encoder.finish()));

        // separate submission so the topology is complete before refit
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sensorgrid-bvh-bounds"),
            });
        self.dispatch(
            &mut encoder,
            "sensorgrid-bounds-bottom-up",
            &self.kernels.bottom_up,
            &[
                (0, &params),
                (1, sensor_counts),
                (4, nodes),
                (5, parents),
                (6, gates),
                (7, locations),
            ],
            (
                div_round_up(self.dims.sensors_per_owner(), 128),
                self.dims.owner_count,
            ),
        );
        self.ctx.queue.submit(Some(encoder.finish()));
    }

    fn run_traversals(
        &self,
        max_distance: f32,
        scratch: &GpuTransientResources,
        locations: &wgpu::Buffer,
        results: &wgpu::Buffer,
    ) {
        if self.dims.traversal_log2() > MAX_SENSOR_COUNT_LOG2 {
            log::warn!(
                "sensor grid traversal skipped: log2 {} exceeds supported maximum {}",
                self.dims.traversal_log2(),
                MAX_SENSOR_COUNT_LOG2
            );
            return;
        }

        let params = self.uniform(
            "sensorgrid-traversal-params",
            TraversalParams {
                max_distance,
                max_sensors_per_owner: self.dims.sensors_per_owner(),
                aligned_sensors_per_owner: self.dims.aligned_sensors_per_owner(),
                padded_internal_count: self.dims.aligned_internal_nodes_per_owner(),
                owner_count: self.dims.owner_count,
                side: self.dims.side(),
                _pad0: 0,
                _pad1: 0,
            },
        );
        let sensor_counts = scratch.sensor_counts.as_ref().expect("scratch built");
        let leaves = scratch.leaf_indices[1].as_ref().expect("scratch built");
        let nodes = scratch.internal_nodes.as_ref().expect("scratch built");

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sensorgrid-traversal"),
            });
        self.dispatch(
            &mut encoder,
            "sensorgrid-bvh-traversal",
            &self.kernels.traversal,
            &[
                (0, &params),
                (1, sensor_counts),
                (2, locations),
                (3, leaves),
                (4, nodes),
                (5, results),
            ],
            (
                div_round_up(self.dims.sensors_per_owner(), TRAVERSAL_CHUNK),
                self.dims.owner_count,
            ),
        );
        self.ctx.queue.submit(Some(encoder.finish()));
    }
}

/// Blocking readback of the result buffer into host memory.
pub fn read_back_results(
    ctx: &GpuContext,
    results: &wgpu::Buffer,
    count: u32,
) -> GridResult<Vec<SensorInfo>> {
    let size = count as u64 * std::mem::size_of::<SensorInfo>() as u64;
    let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("sensorgrid-results-staging"),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sensorgrid-results-readback"),
        });
    encoder.copy_buffer_to_buffer(results, 0, &staging, 0, size);
    ctx.queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    ctx.device.poll(wgpu::Maintain::Wait);

    match pollster::block_on(receiver.receive()) {
        Some(Ok(())) => {}
        _ => return Err(SensorGridError::readback("result buffer map failed")),
    }

    let data = slice.get_mapped_range();
    let decoded: Vec<SensorInfo> = cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();
    Ok(decoded)
}
