// tests/test_overrides.rs
// Process-level debug switches. Both mutate global state, so every scenario
// runs inside one test body to keep the binary race-free.

use anyhow::Result;
use glam::{Vec2, Vec3};
use sensorgrid::{
    set_build_disabled, set_radius_override, BackendKind, SensorGridConfig, SensorGridNetwork,
};

#[test]
fn build_and_radius_overrides() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut net = SensorGridNetwork::with_backend(
        SensorGridConfig::new(8, Vec2::new(0.0, 50.0)),
        BackendKind::Cpu,
    );
    net.register_instance(1);
    net.register_instance(2);

    let mut frame = |net: &mut SensorGridNetwork| -> Result<()> {
        net.update_sensor(1, 0, 0, Vec3::new(0.0, 0.0, 0.0), 0.0, true)?;
        net.update_sensor(2, 0, 0, Vec3::new(70.0, 0.0, 0.0), 0.0, true)?;
        net.end_frame()?;
        Ok(())
    };

    // baseline: 70 lies beyond the configured 50
    frame(&mut net)?;
    assert!(net.find_nearest(1, 0, 0).is_none());

    // the radius override widens the search without touching the config
    set_radius_override(Some(100.0));
    frame(&mut net)?;
    let hit = net.find_nearest(1, 0, 0).expect("override widened the radius");
    assert!((hit.distance - 70.0).abs() < 1e-4);

    set_radius_override(None);
    frame(&mut net)?;
    assert!(net.find_nearest(1, 0, 0).is_none());

    // the kill switch leaves the cleared results in place
    set_radius_override(Some(100.0));
    set_build_disabled(true);
    frame(&mut net)?;
    assert!(net.find_nearest(1, 0, 0).is_none());

    set_build_disabled(false);
    set_radius_override(None);
    Ok(())
}
