use nalgebra::Vector3;
use uav_mfc::sim::{Airframe, Quadrotor, RigidBodyState};
use uav_mfc::{
    AttitudeLoopGains, CascadeController, MfcConfig, MfcResult, RateAttitudeLoop, Setpoint,
    SignConvention,
};

/// Takes off to 0.5 m with the altitude controller and prints the trajectory.
///
/// Pass a JSON configuration file as the first argument to override the
/// altitude preset. Set `RUST_LOG=debug` to see mode transitions.
fn main() -> MfcResult<()> {
    env_logger::init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => MfcConfig::from_json_file(path)?,
        None => MfcConfig::altitude(),
    };
    // The simulated airframe uses a right-handed body frame
    config.signs = SignConvention::right_handed();

    let dt = 1.0 / config.rates.main_hz as f64;
    let attitude = RateAttitudeLoop::new(AttitudeLoopGains::default(), config.rates.attitude_dt());
    let mut controller = CascadeController::new(config, attitude)?;
    let registry = controller.registry();
    let mut plant = Quadrotor::new(Airframe::crazyflie(), RigidBodyState::default());
    let setpoint = Setpoint::hold(Vector3::new(0.0, 0.0, 0.5), 0.0);

    println!("{:>6} {:>8} {:>8} {:>7} {:>9} {:>9}", "t", "z", "vz", "thrust", "u_mfc", "F3");
    for tick in 0..4000 {
        let output = controller.step(&plant.measured_state(), &setpoint, &plant.sensor_data(), tick);
        plant.advance(&output, dt)?;

        if tick % 100 == 0 {
            let state = plant.state();
            println!(
                "{:>6.2} {:>8.4} {:>8.4} {:>7} {:>9.4} {:>9.4}",
                plant.time(),
                state.position.z,
                state.velocity.z,
                output.thrust,
                registry.get(&controller, "z.u_mfc")?,
                registry.get(&controller, "z.F3")?,
            );
        }
    }

    let snapshot = registry.snapshot(&controller);
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
