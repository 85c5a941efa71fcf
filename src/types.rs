// src/types.rs
// Core value types shared between the host, the CPU pipeline and the WGSL
// kernels. Everything crossing the GPU boundary is #[repr(C)] with explicit
// padding so the Rust and WGSL layouts match exactly.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use crate::layout::{self, MAX_SENSOR_COUNT_LOG2};

/// Axis-aligned bounding box - GPU compatible layout
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Aabb {
    pub min: [f32; 3],
    pub _pad0: f32,
    pub max: [f32; 3],
    pub _pad1: f32,
}

impl Aabb {
    /// Create empty AABB (inverted bounds for union operations)
    pub fn empty() -> Self {
        Self {
            min: [f32::INFINITY; 3],
            _pad0: 0.0,
            max: [f32::NEG_INFINITY; 3],
            _pad1: 0.0,
        }
    }

    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self {
            min,
            _pad0: 0.0,
            max,
            _pad1: 0.0,
        }
    }

    pub fn from_point(point: [f32; 3]) -> Self {
        Self::new(point, point)
    }

    pub fn expand_point(&mut self, point: [f32; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(point[i]);
            self.max[i] = self.max[i].max(point[i]);
        }
    }

    pub fn expand_aabb(&mut self, other: &Aabb) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(other.min[i]);
            self.max[i] = self.max[i].max(other.max[i]);
        }
    }

    pub fn extent(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Check if AABB is valid (min <= max)
    pub fn is_valid(&self) -> bool {
        self.min[0] <= self.max[0] && self.min[1] <= self.max[1] && self.min[2] <= self.max[2]
    }

    /// Squared distance from a point to the box; zero inside.
    pub fn distance_squared(&self, point: [f32; 3]) -> f32 {
        let mut d2 = 0.0f32;
        for i in 0..3 {
            let d = (self.min[i] - point[i]).max(0.0).max(point[i] - self.max[i]);
            d2 += d * d;
        }
        d2
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

/// Internal BVH node - GPU compatible layout matching the WGSL struct.
/// Children below `sensors_per_owner` address a sensor slot of the owning
/// grid; children at or above it address another internal node, offset by
/// `sensors_per_owner`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct InternalNode {
    pub bounds_min: [f32; 3],
    pub left_child: i32,
    pub bounds_max: [f32; 3],
    pub right_child: i32,
}

impl InternalNode {
    pub fn new(left_child: i32, right_child: i32) -> Self {
        Self {
            bounds_min: [f32::INFINITY; 3],
            left_child,
            bounds_max: [f32::NEG_INFINITY; 3],
            right_child,
        }
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.bounds_min, self.bounds_max)
    }

    pub fn set_bounds(&mut self, bounds: &Aabb) {
        self.bounds_min = bounds.min;
        self.bounds_max = bounds.max;
    }
}

/// Per-sensor query result, written by the traversal pass and read back by
/// the caller the following frame. `distance_bits` is the bit pattern of the
/// hit distance (monotonic for non-negative floats, so it doubles as an
/// atomic-min key); u32::MAX marks "not found".
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SensorInfo {
    pub location: [f32; 3],
    pub distance_bits: u32,
    pub hit_index: [i32; 3],
    pub search_count: u32,
}

impl SensorInfo {
    pub fn cleared() -> Self {
        Self {
            location: [0.0; 3],
            distance_bits: u32::MAX,
            hit_index: [-1; 3],
            search_count: 0,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.distance_bits != u32::MAX
    }

    pub fn distance(&self) -> f32 {
        f32::from_bits(self.distance_bits)
    }
}

/// One float4 slot of the sensor-location input buffer. The w lane carries
/// the validity flag and the per-sensor range addend: negative means the
/// slot is absent, non-negative is added to the global search radius.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SensorSlot {
    pub location: [f32; 3],
    pub tag: f32,
}

impl SensorSlot {
    pub fn invalid() -> Self {
        Self {
            location: [0.0; 3],
            tag: -1.0,
        }
    }

    pub fn valid(location: Vec3, range_addend: f32) -> Self {
        Self {
            location: location.to_array(),
            tag: range_addend.max(0.0),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.tag >= 0.0
    }

    pub fn range_addend(&self) -> f32 {
        self.tag.max(0.0)
    }
}

/// Nearest-sensor hit decoded from a `SensorInfo` record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestHit {
    pub location: Vec3,
    pub distance: f32,
    pub sensor_x: u32,
    pub sensor_y: u32,
    /// Frame-local owner index of the hit sensor; not stable across frames.
    pub owner_index: u32,
}

/// Caller-facing configuration of a sensor grid network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorGridConfig {
    /// Requested sensors along each side of an owner's grid; rounded up to a
    /// power of two and clamped to the supported traversal permutations.
    pub sensor_count_per_side: u32,
    /// (min, max) search radius; only max gates the traversal.
    pub global_sensor_range: Vec2,
    /// Reset every sensor slot to the invalid sentinel at frame start.
    pub clear_each_frame: bool,
    /// float4 scratch channels reserved per sensor, double buffered.
    pub user_channel_count: u32,
}

impl SensorGridConfig {
    pub fn new(sensor_count_per_side: u32, global_sensor_range: Vec2) -> Self {
        Self {
            sensor_count_per_side,
            global_sensor_range,
            clear_each_frame: false,
            user_channel_count: 0,
        }
    }

    /// Grid layer count (log2 of the per-side sensor count) after clamping
    /// to the densest supported permutation.
    pub fn layer_count(&self) -> u32 {
        layout::ceil_log2(self.sensor_count_per_side).min(MAX_SENSOR_COUNT_LOG2 / 2)
    }

    /// Range with `0 <= min <= max` enforced.
    pub fn clamped_range(&self) -> Vec2 {
        let min = self.global_sensor_range.x.max(0.0);
        Vec2::new(min, self.global_sensor_range.y.max(min))
    }
}
