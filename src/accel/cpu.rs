// src/accel/cpu.rs
// CPU rendition of the per-frame BVH pipeline. Pass-for-pass mirror of the
// compute kernels (same buffers, same strides, same block sizes), with the
// bottom-up arrival gates realized as host atomics. Backs machines without a
// GPU adapter and the test suite.

use std::sync::atomic::Ordering;

use glam::Vec2;

use crate::accel::resources::CpuTransientResources;
use crate::layout::{
    GridDimensions, BOUNDS_CHUNK, INVALID_INDEX, MAX_SENSOR_COUNT_LOG2, MORTON_COMPACTION_BLOCK,
    TRAVERSAL_STACK_SIZE,
};
use crate::morton;
use crate::types::{Aabb, InternalNode, SensorInfo, SensorSlot};

pub struct CpuNearestPipeline {
    dims: GridDimensions,
}

impl CpuNearestPipeline {
    pub fn new(dims: GridDimensions) -> Self {
        Self { dims }
    }

    /// Clears every result slot to the "not found" sentinel.
    pub fn reset_results(&self, results: &mut [SensorInfo]) {
        results.fill(SensorInfo::cleared());
    }

    /// Resets every sensor-location slot to the invalid sentinel.
    pub fn reset_sensor_slots(locations: &mut [SensorSlot]) {
        locations.fill(SensorSlot::invalid());
    }

    /// Full conditional pipeline: clear, then (for more than one owner)
    /// bounds, sorted leaves, hierarchy and traversal.
    pub fn nearest_sensors(
        &self,
        global_range: Vec2,
        locations: &[SensorSlot],
        scratch: &mut CpuTransientResources,
        results: &mut [SensorInfo],
    ) {
        self.reset_results(results);

        if self.dims.owner_count > 1 && scratch.has_buffers && !crate::accel::build_disabled() {
            self.generate_owner_bounds(locations, scratch);
            self.generate_sorted_leaves(locations, scratch);
            self.generate_bvh(locations, scratch);
            self.run_traversals(global_range.y, locations, scratch, results);
        }
    }

    /// Two-phase parallel reduction: per-chunk partial boxes, then one box
    /// per owner. Invalid slots contribute nothing; an owner with no valid
    /// sensors ends up with an inverted (empty) box.
    pub fn generate_owner_bounds(
        &self,
        locations: &[SensorSlot],
        scratch: &mut CpuTransientResources,
    ) {
        let spo = self.dims.sensors_per_owner() as usize;
        let chunks = self.dims.bounds_chunks_per_owner() as usize;
        let padded_chunks = self.dims.padded_bounds_chunks_per_owner() as usize;

        for owner in 0..self.dims.owner_count as usize {
            for chunk in 0..chunks {
                let mut partial = Aabb::empty();
                for lane in 0..BOUNDS_CHUNK as usize {
                    let slot = chunk * BOUNDS_CHUNK as usize + lane;
                    if slot >= spo {
                        break;
                    }
                    let sensor = &locations[owner * spo + slot];
                    if sensor.is_valid() {
                        partial.expand_point(sensor.location);
                    }
                }
                let out = (owner * padded_chunks + chunk) * 2;
                scratch.partial_bounds[out] = pack4(partial.min);
                scratch.partial_bounds[out + 1] = pack4(partial.max);
            }

            let mut bounds = Aabb::empty();
            for chunk in 0..chunks {
                let src = (owner * padded_chunks + chunk) * 2;
                bounds.expand_aabb(&Aabb::new(
                    unpack3(scratch.partial_bounds[src]),
                    unpack3(scratch.partial_bounds[src + 1]),
                ));
            }
            scratch.owner_bounds[owner * 2] = pack4(bounds.min);
            scratch.owner_bounds[owner * 2 + 1] = pack4(bounds.max);
        }
    }

    fn owner_bounds(&self, scratch: &CpuTransientResources, owner: usize) -> Aabb {
        Aabb::new(
            unpack3(scratch.owner_bounds[owner * 2]),
            unpack3(scratch.owner_bounds[owner * 2 + 1]),
        )
    }

    /// Morton encode, global key/value sort, block-local duplicate
    /// elimination and the compacting shuffle into per-owner aligned strides.
    pub fn generate_sorted_leaves(
        &self,
        locations: &[SensorSlot],
        scratch: &mut CpuTransientResources,
    ) {
        let spo = self.dims.sensors_per_owner() as usize;
        let aligned = self.dims.aligned_sensors_per_owner() as usize;
        let owners = self.dims.owner_count as usize;
        let total = aligned * owners;

        // Key per slot. Dead keys keep their owner bits so every owner's
        // segment of the array stays in place across the global sort.
        for owner in 0..owners {
            let bounds = self.owner_bounds(scratch, owner);
            for slot in 0..aligned {
                let out = owner * aligned + slot;
                if slot < spo {
                    let sensor = &locations[owner * spo + slot];
                    scratch.morton_codes[0][out] = morton::encode_sensor(
                        owner as u32,
                        sensor.location,
                        sensor.is_valid(),
                        &bounds,
                    );
                    scratch.leaf_indices[1][out] = slot as u32;
                } else {
                    scratch.morton_codes[0][out] = morton::dead_key(owner as u32);
                    scratch.leaf_indices[1][out] = INVALID_INDEX;
                }
            }
        }

        // Global ascending sort of (key, slot) pairs; sorting by the pair is
        // equivalent to a stable sort by key since slots rise monotonically.
        let mut pairs: Vec<(u32, u32)> = (0..total)
            .map(|i| (scratch.morton_codes[0][i], scratch.leaf_indices[1][i]))
            .collect();
        pairs.sort_unstable();
        for (i, (key, slot)) in pairs.into_iter().enumerate() {
            scratch.morton_codes[0][i] = key;
            scratch.leaf_indices[1][i] = slot;
        }

        // Block-local compaction: drop dead keys and consecutive duplicates
        // within each block. The first live element of a block is always
        // kept, so a duplicate pair straddling a block boundary survives.
        let block_size = MORTON_COMPACTION_BLOCK as usize;
        let total_blocks = self.dims.total_compaction_blocks() as usize;
        for block in 0..total_blocks {
            let start = block * block_size;
            let mut live = 0usize;
            for lane in 0..block_size {
                let i = start + lane;
                let key = scratch.morton_codes[0][i];
                if morton::key_is_dead(key) {
                    continue;
                }
                if lane > 0 && key == scratch.morton_codes[0][i - 1] {
                    continue;
                }
                scratch.morton_codes[1][start + live] = key;
                scratch.leaf_indices[0][start + live] = scratch.leaf_indices[1][i];
                live += 1;
            }
            scratch.duplicate_counts[block] = live as u32;
        }

        // Copy commands: one scan per owner turns the per-block live counts
        // into (src, count, dst) ranges plus the owner's live sensor count.
        let blocks_per_owner = self.dims.compaction_blocks_per_owner() as usize;
        for owner in 0..owners {
            let mut dst = (owner * aligned) as u32;
            let base = dst;
            for b in 0..blocks_per_owner {
                let block = owner * blocks_per_owner + b;
                let count = scratch.duplicate_counts[block];
                scratch.copy_commands[block] = [(block * block_size) as u32, count, dst, 0];
                dst += count;
            }
            scratch.sensor_counts[owner] = dst - base;
        }

        // Shuffle both arrays into their dead-slot-free final layout.
        for block in 0..total_blocks {
            let [src, count, dst, _] = scratch.copy_commands[block];
            for t in 0..count as usize {
                scratch.morton_codes[0][dst as usize + t] =
                    scratch.morton_codes[1][src as usize + t];
                scratch.leaf_indices[1][dst as usize + t] =
                    scratch.leaf_indices[0][src as usize + t];
            }
        }
    }

    /// Top-down topology (Karras split search over the sorted keys) followed
    /// by the gate-driven bottom-up bounds propagation.
    pub fn generate_bvh(&self, locations: &[SensorSlot], scratch: &mut CpuTransientResources) {
        let spo = self.dims.sensors_per_owner() as usize;
        let aligned = self.dims.aligned_sensors_per_owner() as usize;
        let internal_stride = self.dims.aligned_internal_nodes_per_owner() as usize;
        let parent_stride = self.dims.aligned_parents_per_owner() as usize;

        let CpuTransientResources {
            morton_codes,
            leaf_indices,
            internal_nodes,
            parent_indices,
            hierarchy_gates,
            sensor_counts,
            ..
        } = scratch;

        for owner in 0..self.dims.owner_count as usize {
            let live = sensor_counts[owner] as usize;
            let node_base = owner * internal_stride;
            let parent_base = owner * parent_stride;

            for gate in &hierarchy_gates[node_base..node_base + internal_stride] {
                gate.store(0, Ordering::Relaxed);
            }

            if live < 2 {
                continue;
            }

            let key_base = owner * aligned;
            let codes = &morton_codes[0][key_base..key_base + live];
            let leaves = &leaf_indices[1][key_base..key_base + live];

            for i in 0..live - 1 {
                let (first, last) = determine_range(codes, i);
                let split = find_split(codes, first, last);

                let (left_child, left_node) = if split == first {
                    (leaves[split] as i32, split)
                } else {
                    ((spo + split) as i32, spo + split)
                };
                let (right_child, right_node) = if split + 1 == last {
                    (leaves[split + 1] as i32, split + 1)
                } else {
                    ((spo + split + 1) as i32, spo + split + 1)
                };

                internal_nodes[node_base + i] = InternalNode::new(left_child, right_child);
                parent_indices[parent_base + left_node] = (spo + i) as u32;
                parent_indices[parent_base + right_node] = (spo + i) as u32;
                if i == 0 {
                    parent_indices[parent_base + spo] = INVALID_INDEX;
                }
            }

            // Bottom-up: every leaf walks toward the root; the second child
            // to arrive at a gate merges both child bounds and continues.
            for leaf in 0..live {
                let mut node = leaf;
                loop {
                    let parent = parent_indices[parent_base + node];
                    if parent == INVALID_INDEX {
                        break;
                    }
                    let p = parent as usize - spo;
                    let prior = hierarchy_gates[node_base + p].fetch_add(1, Ordering::AcqRel);
                    if prior == 0 {
                        break;
                    }

                    let owner_nodes = &internal_nodes[node_base..node_base + internal_stride];
                    let current = owner_nodes[p];
                    let mut merged =
                        child_point_bounds(current.left_child, owner, spo, locations, owner_nodes);
                    merged.expand_aabb(&child_point_bounds(
                        current.right_child,
                        owner,
                        spo,
                        locations,
                        owner_nodes,
                    ));
                    internal_nodes[node_base + p].set_bounds(&merged);
                    node = parent as usize;
                }
            }
        }
    }

    /// Per-sensor nearest query against every other owner's hierarchy.
    pub fn run_traversals(
        &self,
        max_distance: f32,
        locations: &[SensorSlot],
        scratch: &CpuTransientResources,
        results: &mut [SensorInfo],
    ) {
        if self.dims.traversal_log2() > MAX_SENSOR_COUNT_LOG2 {
            log::warn!(
                "sensor grid traversal skipped: log2 {} exceeds supported maximum {}",
                self.dims.traversal_log2(),
                MAX_SENSOR_COUNT_LOG2
            );
            return;
        }

        let spo = self.dims.sensors_per_owner() as usize;
        let side = self.dims.side() as usize;
        let owners = self.dims.owner_count as usize;

        for owner in 0..owners {
            for slot in 0..spo {
                let me = owner * spo + slot;
                let sensor = &locations[me];
                if !sensor.is_valid() {
                    continue;
                }

                let reach = max_distance + sensor.range_addend();
                let mut query = NearestQuery {
                    position: sensor.location,
                    best_distance_squared: reach * reach,
                    best: None,
                    search_count: 0,
                };

                for other in 0..owners {
                    if other != owner {
                        self.search_owner(other, locations, scratch, &mut query);
                    }
                }

                let mut info = SensorInfo::cleared();
                info.search_count = query.search_count;
                if let Some((hit_owner, hit_slot, hit_location)) = query.best {
                    info.location = hit_location;
                    info.distance_bits = query.best_distance_squared.sqrt().to_bits();
                    info.hit_index = [
                        (hit_slot % side) as i32,
                        (hit_slot / side) as i32,
                        hit_owner as i32,
                    ];
                }
                results[me] = info;
            }
        }
    }

    fn search_owner(
        &self,
        owner: usize,
        locations: &[SensorSlot],
        scratch: &CpuTransientResources,
        query: &mut NearestQuery,
    ) {
        let spo = self.dims.sensors_per_owner() as usize;
        let aligned = self.dims.aligned_sensors_per_owner() as usize;
        let internal_stride = self.dims.aligned_internal_nodes_per_owner() as usize;

        let live = scratch.sensor_counts[owner] as usize;
        if live == 0 {
            return;
        }
        if live == 1 {
            let local = scratch.leaf_indices[1][owner * aligned] as usize;
            query.test_leaf(owner, local, locations[owner * spo + local].location);
            return;
        }

        let nodes = &scratch.internal_nodes[owner * internal_stride..];
        let mut stack = [0u32; TRAVERSAL_STACK_SIZE];
        let mut depth = 0usize;
        let mut node = 0usize;

        loop {
            let current = &nodes[node];
            let mut near: Option<(usize, f32)> = None;
            let mut far: Option<(usize, f32)> = None;

            for child in [current.left_child, current.right_child] {
                let child = child as usize;
                if child < spo {
                    query.test_leaf(owner, child, locations[owner * spo + child].location);
                } else {
                    let internal = child - spo;
                    let d2 = nodes[internal].bounds().distance_squared(query.position);
                    if d2 < query.best_distance_squared {
                        match near {
                            Some((_, nd2)) if d2 >= nd2 => far = Some((internal, d2)),
                            Some(prev) => {
                                far = Some(prev);
                                near = Some((internal, d2));
                            }
                            None => near = Some((internal, d2)),
                        }
                    }
                }
            }

            if let Some((far_node, _)) = far {
                if depth < stack.len() {
                    stack[depth] = far_node as u32;
                    depth += 1;
                } else {
                    // stack exhausted; drop the far subtree rather than
                    // walking out of bounds
                    log::debug!("traversal stack overflow, far subtree skipped");
                }
            }

            match near {
                Some((next, _)) => node = next,
                None => loop {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    let candidate = stack[depth] as usize;
                    let d2 = nodes[candidate].bounds().distance_squared(query.position);
                    if d2 < query.best_distance_squared {
                        node = candidate;
                        break;
                    }
                },
            }
        }
    }
}

struct NearestQuery {
    position: [f32; 3],
    best_distance_squared: f32,
    best: Option<(usize, usize, [f32; 3])>,
    search_count: u32,
}

impl NearestQuery {
    fn test_leaf(&mut self, owner: usize, local_slot: usize, location: [f32; 3]) {
        self.search_count += 1;
        let d2 = distance_squared(self.position, location);
        if d2 < self.best_distance_squared {
            self.best_distance_squared = d2;
            self.best = Some((owner, local_slot, location));
        }
    }
}

/// Bounds of one child of an internal node: a point for a sensor slot, the
/// stored box for another internal node.
fn child_point_bounds(
    child: i32,
    owner: usize,
    spo: usize,
    locations: &[SensorSlot],
    owner_nodes: &[InternalNode],
) -> Aabb {
    let child = child as usize;
    if child < spo {
        Aabb::from_point(locations[owner * spo + child].location)
    } else {
        owner_nodes[child - spo].bounds()
    }
}

fn distance_squared(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

fn pack4(v: [f32; 3]) -> [f32; 4] {
    [v[0], v[1], v[2], 0.0]
}

fn unpack3(v: [f32; 4]) -> [f32; 3] {
    [v[0], v[1], v[2]]
}

/// Common-prefix length of two keys, extended with the leaf positions when
/// the keys collide so every pair has a distinct prefix length.
fn delta(codes: &[u32], i: usize, j: i64) -> i64 {
    if j < 0 || j >= codes.len() as i64 {
        return -1;
    }
    let (a, b) = (codes[i], codes[j as usize]);
    if a == b {
        32 + (i as u32 ^ j as u32).leading_zeros() as i64
    } else {
        (a ^ b).leading_zeros() as i64
    }
}

/// Leaf range covered by internal node i (Karras 2012).
fn determine_range(codes: &[u32], i: usize) -> (usize, usize) {
    if i == 0 {
        return (0, codes.len() - 1);
    }

    let ii = i as i64;
    let direction = if delta(codes, i, ii + 1) > delta(codes, i, ii - 1) {
        1i64
    } else {
        -1i64
    };
    let delta_min = delta(codes, i, ii - direction);

    let mut probe = 2i64;
    while delta(codes, i, ii + probe * direction) > delta_min {
        probe *= 2;
    }

    let mut length = 0i64;
    let mut step = probe / 2;
    while step >= 1 {
        if delta(codes, i, ii + (length + step) * direction) > delta_min {
            length += step;
        }
        step /= 2;
    }

    let j = ii + length * direction;
    (i.min(j as usize), i.max(j as usize))
}

/// Split position inside [first, last]: the highest index whose prefix with
/// `first` exceeds the range's common prefix.
fn find_split(codes: &[u32], first: usize, last: usize) -> usize {
    let common = delta(codes, first, last as i64);
    let mut split = first;
    let mut step = last - first;

    loop {
        step = (step + 1) >> 1;
        let middle = split + step;
        if middle < last && delta(codes, first, middle as i64) > common {
            split = middle;
        }
        if step <= 1 {
            break;
        }
    }

    split
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn karras_range_covers_all_leaves() {
        // distinct, sorted keys
        let codes = [1u32, 2, 4, 5, 19, 24, 25, 30];
        for i in 0..codes.len() - 1 {
            let (first, last) = determine_range(&codes, i);
            assert!(first <= last);
            assert!(last < codes.len());
            let split = find_split(&codes, first, last);
            assert!(split >= first && split < last);
        }
        assert_eq!(determine_range(&codes, 0), (0, codes.len() - 1));
    }

    #[test]
    fn duplicate_keys_get_distinct_prefixes() {
        let codes = [7u32, 7, 7, 7];
        for i in 0..codes.len() {
            for j in 0..codes.len() {
                if i != j {
                    assert!(delta(&codes, i, j as i64) > 32);
                }
            }
        }
    }

    #[test]
    fn split_respects_prefix_boundary() {
        // 0b00xx vs 0b01xx: split must fall between indices 1 and 2
        let codes = [0b0000u32, 0b0001, 0b0100, 0b0101];
        let (first, last) = determine_range(&codes, 0);
        assert_eq!((first, last), (0, 3));
        assert_eq!(find_split(&codes, first, last), 1);
    }
}
