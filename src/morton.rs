// src/morton.rs
// Morton (Z-order) key construction. A key packs the frame-local owner index
// into its top bits and a 27-bit interleave of the quantized position below,
// so one global ascending sort groups by owner and orders spatially at once.

use crate::layout::{MORTON_CODE_BITS_RESERVED_FOR_OWNER, MORTON_PAYLOAD_BITS};
use crate::types::Aabb;

/// Quantization resolution per axis (9 bits).
pub const GRID_RESOLUTION: u32 = 512;

/// Payload of a dead key: invalid sensors and padding slots. Keeping the
/// owner bits intact pins every owner's segment of the key array in place
/// across the global sort.
pub const INVALID_MORTON_PAYLOAD: u32 = (1 << MORTON_PAYLOAD_BITS) - 1;

/// Minimum per-axis extent used when an owner's bounds are degenerate.
pub const MIN_AXIS_EXTENT: f32 = 1e-6;

/// Expands the low 9 bits of x so consecutive bits land 3 apart.
#[inline]
pub fn expand_bits(value: u32) -> u32 {
    let mut x = value & 0x3ff;
    x = (x | (x << 16)) & 0x030000ff;
    x = (x | (x << 8)) & 0x0300f00f;
    x = (x | (x << 4)) & 0x030c30c3;
    x = (x | (x << 2)) & 0x09249249;
    x
}

/// Quantizes a position into the owner's bounds on a 512^3 grid.
pub fn quantize(position: [f32; 3], bounds: &Aabb) -> [u32; 3] {
    let extent = bounds.extent();
    let mut cell = [0u32; 3];
    for i in 0..3 {
        let axis = extent[i].max(MIN_AXIS_EXTENT);
        let normalized = ((position[i] - bounds.min[i]) / axis).clamp(0.0, 1.0);
        cell[i] = ((normalized * GRID_RESOLUTION as f32) as u32).min(GRID_RESOLUTION - 1);
    }
    cell
}

/// 27-bit Morton interleave of a quantized cell, clamped below the dead-key
/// payload so a live sensor can never alias it.
pub fn morton3(cell: [u32; 3]) -> u32 {
    let code = (expand_bits(cell[0]) << 2) | (expand_bits(cell[1]) << 1) | expand_bits(cell[2]);
    code.min(INVALID_MORTON_PAYLOAD - 1)
}

/// Key of a live sensor.
#[inline]
pub fn sensor_key(owner: u32, payload: u32) -> u32 {
    (owner << MORTON_PAYLOAD_BITS) | payload
}

/// Key of an invalid sensor or padding slot of the given owner.
#[inline]
pub fn dead_key(owner: u32) -> u32 {
    (owner << MORTON_PAYLOAD_BITS) | INVALID_MORTON_PAYLOAD
}

#[inline]
pub fn key_owner(key: u32) -> u32 {
    key >> MORTON_PAYLOAD_BITS
}

#[inline]
pub fn key_payload(key: u32) -> u32 {
    key & INVALID_MORTON_PAYLOAD
}

#[inline]
pub fn key_is_dead(key: u32) -> bool {
    key_payload(key) == INVALID_MORTON_PAYLOAD
}

/// Key for one sensor slot: dead when the slot is invalid, otherwise the
/// quantized/interleaved position tagged with the owner bits.
pub fn encode_sensor(owner: u32, position: [f32; 3], valid: bool, bounds: &Aabb) -> u32 {
    debug_assert!(owner < (1 << MORTON_CODE_BITS_RESERVED_FOR_OWNER));
    if !valid || !bounds.is_valid() {
        return dead_key(owner);
    }
    sensor_key(owner, morton3(quantize(position, bounds)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_bits_spreads() {
        assert_eq!(expand_bits(0b111), 0b1001001);
        assert_eq!(expand_bits(0x1ff) & !0x09249249, 0);
    }

    #[test]
    fn interleave_orders_axes() {
        // x occupies the highest bit of each triad
        assert!(morton3([1, 0, 0]) > morton3([0, 1, 0]));
        assert!(morton3([0, 1, 0]) > morton3([0, 0, 1]));
        assert_eq!(morton3([0, 0, 0]), 0);
    }

    #[test]
    fn max_cell_cannot_alias_dead_marker() {
        let code = morton3([511, 511, 511]);
        assert_eq!(code, INVALID_MORTON_PAYLOAD - 1);
        assert!(!key_is_dead(sensor_key(3, code)));
    }

    #[test]
    fn owner_dominates_ordering() {
        let near_origin = sensor_key(2, morton3([0, 0, 0]));
        let far_corner = sensor_key(1, morton3([511, 511, 510]));
        assert!(near_origin > far_corner);
        assert_eq!(key_owner(near_origin), 2);
        assert_eq!(key_owner(dead_key(7)), 7);
    }

    #[test]
    fn dead_keys_stay_in_owner_segment() {
        // a dead key sorts after every live key of its owner but before any
        // key of the next owner
        let live_max = sensor_key(4, INVALID_MORTON_PAYLOAD - 1);
        assert!(dead_key(4) > live_max);
        assert!(dead_key(4) < sensor_key(5, 0));
    }

    #[test]
    fn degenerate_bounds_quantize_without_dividing_by_zero() {
        let bounds = Aabb::from_point([5.0, 5.0, 5.0]);
        let cell = quantize([5.0, 5.0, 5.0], &bounds);
        assert!(cell.iter().all(|&c| c < GRID_RESOLUTION));
    }

    #[test]
    fn quantization_is_monotonic_per_axis() {
        let bounds = Aabb::new([0.0, 0.0, 0.0], [100.0, 100.0, 100.0]);
        let low = quantize([10.0, 0.0, 0.0], &bounds);
        let high = quantize([90.0, 0.0, 0.0], &bounds);
        assert!(low[0] < high[0]);
    }
}
