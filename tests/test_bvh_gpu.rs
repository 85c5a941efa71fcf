// tests/test_bvh_gpu.rs
// GPU backend parity against the CPU pipeline. Skips cleanly on machines
// without a usable adapter.

use anyhow::Result;
use glam::{Vec2, Vec3};
use sensorgrid::{BackendKind, SensorGridConfig, SensorGridNetwork};

fn gpu_available() -> bool {
    sensorgrid::gpu::try_ctx().is_some()
}

fn lcg_unit(state: &mut u64) -> f32 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    ((*state >> 40) & 0xff_ffff) as f32 / 16_777_216.0
}

fn run_frame(net: &mut SensorGridNetwork, seed: u64) -> Result<()> {
    let mut state = seed;
    let side = net.side();
    for instance in [1u64, 2, 3] {
        for y in 0..side {
            for x in 0..side {
                if lcg_unit(&mut state) < 0.6 {
                    let position = Vec3::new(
                        lcg_unit(&mut state) * 100.0,
                        lcg_unit(&mut state) * 100.0,
                        lcg_unit(&mut state) * 100.0,
                    );
                    net.update_sensor(instance, x, y, position, 0.0, true)?;
                }
            }
        }
    }
    net.end_frame()?;
    Ok(())
}

#[test]
fn gpu_backend_matches_cpu_backend() -> Result<()> {
    if !gpu_available() {
        println!("No GPU adapter available, skipping GPU parity test");
        return Ok(());
    }

    let config = SensorGridConfig::new(8, Vec2::new(0.0, 60.0));
    let mut cpu = SensorGridNetwork::with_backend(config, BackendKind::Cpu);
    let mut gpu = SensorGridNetwork::with_backend(config, BackendKind::Gpu);
    for net in [&mut cpu, &mut gpu] {
        net.register_instance(1);
        net.register_instance(2);
        net.register_instance(3);
    }

    run_frame(&mut cpu, 77)?;
    run_frame(&mut gpu, 77)?;

    let side = cpu.side();
    let mut hits = 0usize;
    for instance in [1u64, 2, 3] {
        for y in 0..side {
            for x in 0..side {
                let expected = cpu.find_nearest(instance, x, y);
                let actual = gpu.find_nearest(instance, x, y);
                match (expected, actual) {
                    (Some(e), Some(a)) => {
                        hits += 1;
                        assert!(
                            (e.distance - a.distance).abs() < 1e-3,
                            "instance {instance} ({x},{y}): cpu {} vs gpu {}",
                            e.distance,
                            a.distance
                        );
                    }
                    (None, None) => {}
                    (e, a) => panic!(
                        "instance {instance} ({x},{y}): cpu {:?} vs gpu {:?}",
                        e.map(|h| h.distance),
                        a.map(|h| h.distance)
                    ),
                }
            }
        }
    }
    assert!(hits > 0, "scene produced no hits at all");

    println!("GPU parity test passed ({hits} matched hits)");
    Ok(())
}

#[test]
fn gpu_backend_excludes_own_owner() -> Result<()> {
    if !gpu_available() {
        println!("No GPU adapter available, skipping GPU smoke test");
        return Ok(());
    }

    let config = SensorGridConfig::new(4, Vec2::new(0.0, 500.0));
    let mut net = SensorGridNetwork::with_backend(config, BackendKind::Gpu);
    net.register_instance(1);
    net.register_instance(2);

    net.update_sensor(1, 0, 0, Vec3::new(0.0, 0.0, 0.0), 0.0, true)?;
    net.update_sensor(1, 1, 0, Vec3::new(1.0, 0.0, 0.0), 0.0, true)?;
    net.update_sensor(2, 0, 0, Vec3::new(10.0, 0.0, 0.0), 0.0, true)?;
    net.end_frame()?;

    let hit = net.find_nearest(1, 0, 0).expect("hit within range");
    assert!((hit.distance - 10.0).abs() < 1e-4);
    let hit = net.find_nearest(2, 0, 0).expect("hit within range");
    assert!((hit.distance - 9.0).abs() < 1e-4);
    Ok(())
}
