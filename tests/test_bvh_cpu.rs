// tests/test_bvh_cpu.rs
// Properties of the per-frame BVH pipeline on the CPU backend: brute-force
// exactness, self-exclusion, radius bounds, duplicate collapse, determinism.

use anyhow::Result;
use glam::{Vec2, Vec3};
use sensorgrid::accel::{CpuNearestPipeline, CpuTransientResources};
use sensorgrid::layout::GridDimensions;
use sensorgrid::types::{SensorInfo, SensorSlot};

/// Small scene with direct control over every sensor slot.
struct Scene {
    dims: GridDimensions,
    locations: Vec<SensorSlot>,
}

impl Scene {
    fn new(layer_count: u32, owner_count: u32) -> Self {
        let dims = GridDimensions::new(layer_count, owner_count);
        Self {
            dims,
            locations: vec![SensorSlot::invalid(); dims.total_sensors() as usize],
        }
    }

    fn spo(&self) -> usize {
        self.dims.sensors_per_owner() as usize
    }

    fn place(&mut self, owner: usize, slot: usize, position: [f32; 3]) {
        self.place_with_range(owner, slot, position, 0.0);
    }

    fn place_with_range(&mut self, owner: usize, slot: usize, position: [f32; 3], range: f32) {
        let index = owner * self.spo() + slot;
        self.locations[index] = SensorSlot::valid(Vec3::from_array(position), range);
    }

    fn run(&self, max_distance: f32) -> (Vec<SensorInfo>, CpuTransientResources) {
        let mut scratch = CpuTransientResources::default();
        scratch.build(self.dims.sizing());
        let mut results = vec![SensorInfo::cleared(); self.locations.len()];
        let pipeline = CpuNearestPipeline::new(self.dims);
        pipeline.nearest_sensors(
            Vec2::new(0.0, max_distance),
            &self.locations,
            &mut scratch,
            &mut results,
        );
        (results, scratch)
    }

    /// O(n^2) reference: closest valid sensor of any other owner, or None
    /// when nothing lies strictly within reach.
    fn brute_force(&self, owner: usize, slot: usize, max_distance: f32) -> Option<f32> {
        let me = &self.locations[owner * self.spo() + slot];
        if !me.is_valid() {
            return None;
        }
        let reach = max_distance + me.range_addend();
        let mut best = reach * reach;
        let mut found = false;
        for other in 0..self.dims.owner_count as usize {
            if other == owner {
                continue;
            }
            for candidate_slot in 0..self.spo() {
                let candidate = &self.locations[other * self.spo() + candidate_slot];
                if !candidate.is_valid() {
                    continue;
                }
                let dx = me.location[0] - candidate.location[0];
                let dy = me.location[1] - candidate.location[1];
                let dz = me.location[2] - candidate.location[2];
                let d2 = dx * dx + dy * dy + dz * dz;
                if d2 < best {
                    best = d2;
                    found = true;
                }
            }
        }
        found.then(|| best.sqrt())
    }
}

fn lcg_unit(state: &mut u64) -> f32 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    ((*state >> 40) & 0xff_ffff) as f32 / 16_777_216.0
}

fn random_scene(seed: u64, layer_count: u32, owner_count: u32, fill: f32) -> Scene {
    let mut scene = Scene::new(layer_count, owner_count);
    let mut state = seed;
    for owner in 0..owner_count as usize {
        for slot in 0..scene.spo() {
            if lcg_unit(&mut state) < fill {
                let position = [
                    lcg_unit(&mut state) * 100.0,
                    lcg_unit(&mut state) * 100.0,
                    lcg_unit(&mut state) * 100.0,
                ];
                scene.place(owner, slot, position);
            }
        }
    }
    scene
}

#[test]
fn example_scenario_two_owners() -> Result<()> {
    // owner A at (0,0,0) and (100,0,0), owner B at (5,0,0), max 50
    let mut scene = Scene::new(3, 2);
    scene.place(0, 0, [0.0, 0.0, 0.0]);
    scene.place(0, 1, [100.0, 0.0, 0.0]);
    scene.place(1, 0, [5.0, 0.0, 0.0]);

    let (results, _) = scene.run(50.0);

    let a0 = &results[0];
    assert!(a0.is_hit());
    assert_eq!(a0.location, [5.0, 0.0, 0.0]);
    assert!((a0.distance() - 5.0).abs() < 1e-5);
    assert_eq!(a0.hit_index, [0, 0, 1]);

    // nearest other-owner sensor is 95 away, beyond the radius
    let a1 = &results[1];
    assert!(!a1.is_hit());

    let b0 = &results[scene.spo()];
    assert!(b0.is_hit());
    assert_eq!(b0.location, [0.0, 0.0, 0.0]);
    assert!((b0.distance() - 5.0).abs() < 1e-5);
    assert_eq!(b0.hit_index, [0, 0, 0]);

    Ok(())
}

#[test]
fn matches_brute_force_on_small_scenes() -> Result<()> {
    for seed in [7u64, 99, 1234] {
        let scene = random_scene(seed, 3, 3, 0.7);
        let max_distance = 60.0;
        let (results, _) = scene.run(max_distance);

        for owner in 0..3 {
            for slot in 0..scene.spo() {
                let info = &results[owner * scene.spo() + slot];
                let expected = scene.brute_force(owner, slot, max_distance);
                match expected {
                    Some(distance) => {
                        assert!(
                            info.is_hit(),
                            "seed {seed}: owner {owner} slot {slot} should find a neighbor"
                        );
                        assert!(
                            (info.distance() - distance).abs() < 1e-4,
                            "seed {seed}: owner {owner} slot {slot}: bvh {} vs brute {}",
                            info.distance(),
                            distance
                        );
                    }
                    None => {
                        assert!(
                            !info.is_hit(),
                            "seed {seed}: owner {owner} slot {slot} found a spurious neighbor"
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

#[test]
fn never_reports_own_owner() -> Result<()> {
    let scene = random_scene(42, 3, 3, 1.0);
    let (results, _) = scene.run(500.0);

    for owner in 0..3i32 {
        for slot in 0..scene.spo() {
            let info = &results[owner as usize * scene.spo() + slot];
            assert!(info.is_hit());
            assert_ne!(info.hit_index[2], owner, "self-match at owner {owner}");
        }
    }
    Ok(())
}

#[test]
fn respects_search_radius() -> Result<()> {
    // just within
    let mut near = Scene::new(3, 2);
    near.place(0, 0, [0.0, 0.0, 0.0]);
    near.place(1, 0, [49.0, 0.0, 0.0]);
    let (results, _) = near.run(50.0);
    assert!(results[0].is_hit());

    // just beyond
    let mut far = Scene::new(3, 2);
    far.place(0, 0, [0.0, 0.0, 0.0]);
    far.place(1, 0, [51.0, 0.0, 0.0]);
    let (results, _) = far.run(50.0);
    assert!(!results[0].is_hit());

    // no reported distance may exceed the radius
    let scene = random_scene(5, 3, 3, 0.8);
    let max_distance = 25.0;
    let (results, _) = scene.run(max_distance);
    for info in &results {
        if info.is_hit() {
            assert!(info.distance() <= max_distance);
        }
    }
    Ok(())
}

#[test]
fn per_sensor_range_extends_reach() -> Result<()> {
    let mut scene = Scene::new(3, 2);
    scene.place_with_range(0, 0, [0.0, 0.0, 0.0], 30.0);
    scene.place(1, 0, [70.0, 0.0, 0.0]);

    let (results, _) = scene.run(50.0);

    // 70 > 50 but within 50 + 30
    assert!(results[0].is_hit());
    assert!((results[0].distance() - 70.0).abs() < 1e-4);
    // the other side has no addend and stays out of range
    assert!(!results[scene.spo()].is_hit());
    Ok(())
}

#[test]
fn coincident_sensors_collapse_without_corruption() -> Result<()> {
    let mut scene = Scene::new(3, 2);
    // three sensors on the exact same spot plus one distinct
    scene.place(0, 0, [0.0, 0.0, 0.0]);
    scene.place(0, 1, [0.0, 0.0, 0.0]);
    scene.place(0, 2, [0.0, 0.0, 0.0]);
    scene.place(0, 3, [50.0, 0.0, 0.0]);
    scene.place(1, 0, [1.0, 0.0, 0.0]);

    let (results, scratch) = scene.run(100.0);

    // the duplicates share a quantized cell and collapse to one live leaf
    assert_eq!(scratch.sensor_counts[0], 2);
    assert_eq!(scratch.sensor_counts[1], 1);

    let b = &results[scene.spo()];
    assert!(b.is_hit());
    assert!((b.distance() - 1.0).abs() < 1e-5);

    // every slot of the collapsed duplicates still resolves a query
    for slot in 0..3 {
        let info = &results[slot];
        assert!(info.is_hit());
        assert!((info.distance() - 1.0).abs() < 1e-5);
        assert_eq!(info.hit_index[2], 1);
    }
    Ok(())
}

#[test]
fn identical_input_identical_output() -> Result<()> {
    let scene = random_scene(2024, 3, 3, 0.9);
    let (first, _) = scene.run(80.0);
    let (second, _) = scene.run(80.0);
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn owner_with_no_valid_sensors_is_inert() -> Result<()> {
    let mut scene = Scene::new(3, 3);
    scene.place(0, 0, [0.0, 0.0, 0.0]);
    scene.place(1, 0, [3.0, 0.0, 0.0]);
    // owner 2 stays entirely invalid

    let (results, scratch) = scene.run(100.0);

    assert_eq!(scratch.sensor_counts[2], 0);
    assert_eq!(results[0].hit_index[2], 1);
    assert_eq!(results[scene.spo()].hit_index[2], 0);
    for slot in 0..scene.spo() {
        assert!(!results[2 * scene.spo() + slot].is_hit());
    }
    Ok(())
}

#[test]
fn single_owner_skips_the_build() -> Result<()> {
    let mut scene = Scene::new(3, 1);
    scene.place(0, 0, [0.0, 0.0, 0.0]);
    scene.place(0, 1, [1.0, 0.0, 0.0]);

    let (results, _) = scene.run(100.0);
    assert!(results.iter().all(|info| !info.is_hit()));
    Ok(())
}

#[test]
fn degenerate_coincident_owner_still_queries() -> Result<()> {
    // an owner whose bounding box has zero extent on every axis
    let mut scene = Scene::new(3, 2);
    for slot in 0..8 {
        scene.place(0, slot, [10.0, 20.0, 30.0]);
    }
    scene.place(1, 0, [10.0, 20.0, 31.5]);

    let (results, scratch) = scene.run(10.0);

    assert_eq!(scratch.sensor_counts[0], 1);
    assert!(results[0].is_hit());
    assert!((results[0].distance() - 1.5).abs() < 1e-5);
    let b = &results[scene.spo()];
    assert!(b.is_hit());
    assert!((b.distance() - 1.5).abs() < 1e-5);
    Ok(())
}
