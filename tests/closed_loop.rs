use nalgebra::Vector3;
use uav_mfc::sim::{Airframe, Quadrotor, RigidBodyState};
use uav_mfc::{
    AttitudeLoopGains, AxisRole, CascadeController, ControllerMode, MeasuredState, MfcConfig,
    RateAttitudeLoop, SensorData, Setpoint, SignConvention,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Controller wired for `sim::Quadrotor`, whose body frame needs no sign flips.
fn controller(mut config: MfcConfig) -> CascadeController<RateAttitudeLoop> {
    config.signs = SignConvention::right_handed();
    let attitude = RateAttitudeLoop::new(AttitudeLoopGains::default(), config.rates.attitude_dt());
    CascadeController::new(config, attitude).unwrap()
}

fn thrust_ceiling(config: &MfcConfig) -> u16 {
    (config.thrust_map.max_fraction * config.thrust_map.full_scale).round() as u16
}

/// Largest distance from `target` over the recorded samples.
fn worst_error(samples: &[f64], target: f64) -> f64 {
    samples.iter().fold(0.0_f64, |worst, v| worst.max((v - target).abs()))
}

#[test]
fn test_altitude_controller_tracks_setpoint() {
    init_logger();
    let config = MfcConfig::altitude();
    let ceiling = thrust_ceiling(&config);
    let dt = 1.0 / config.rates.main_hz as f64;
    let mut mfc = controller(config);
    let mut plant = Quadrotor::new(Airframe::crazyflie(), RigidBodyState::default());
    let setpoint = Setpoint::hold(Vector3::new(0.0, 0.0, 0.5), 0.0);

    let mut was_active = false;
    let mut last_second = Vec::new();
    for tick in 0..5000 {
        let output = mfc.step(&plant.measured_state(), &setpoint, &plant.sensor_data(), tick);
        assert!(output.thrust <= ceiling, "thrust {} above ceiling", output.thrust);
        was_active |= mfc.mode() == ControllerMode::Active;

        let z = mfc.axis(AxisRole::Thrust).unwrap();
        assert!(z.disturbance().covariance_within_bounds(1e-9));
        assert!(z.control_effort_model_free().is_finite());
        assert!(z.disturbance().state().iter().all(|v| v.is_finite()));

        plant.advance(&output, dt).unwrap();
        assert!(plant.state().is_finite());
        if tick >= 4000 {
            last_second.push(plant.state().position.z);
        }
    }

    assert!(was_active);
    let error = worst_error(&last_second, 0.5);
    assert!(error < 0.02, "altitude off by {error} m after 4 s");
}

#[test]
fn test_landing_setpoint_keeps_vehicle_grounded() {
    init_logger();
    let config = MfcConfig::altitude();
    let dt = 1.0 / config.rates.main_hz as f64;
    let mut mfc = controller(config);
    let mut plant = Quadrotor::new(Airframe::crazyflie(), RigidBodyState::default());
    let setpoint = Setpoint::hold(Vector3::new(0.0, 0.0, 0.0), 0.0);

    for tick in 0..500 {
        let output = mfc.step(&plant.measured_state(), &setpoint, &plant.sensor_data(), tick);
        assert_eq!(output.thrust, 0);
        assert_eq!((output.roll, output.pitch, output.yaw), (0, 0, 0));
        plant.advance(&output, dt).unwrap();
    }
    assert_eq!(mfc.mode(), ControllerMode::Ground);
    assert_eq!(plant.state().position.z, 0.0);
}

#[test]
fn test_beta_estimating_controller_tracks_setpoint() {
    init_logger();
    let config = MfcConfig::beta_estimating();
    let ceiling = thrust_ceiling(&config);
    let dt = 1.0 / config.rates.main_hz as f64;
    let mut mfc = controller(config);
    let mut plant = Quadrotor::new(Airframe::crazyflie(), RigidBodyState::default());
    let setpoint = Setpoint::hold(Vector3::new(0.0, 0.0, 0.5), 0.0);

    let mut last_second = Vec::new();
    for tick in 0..5000 {
        let output = mfc.step(&plant.measured_state(), &setpoint, &plant.sensor_data(), tick);
        assert!(output.thrust <= ceiling);
        let z = mfc.axis(AxisRole::Thrust).unwrap();
        assert!(z.disturbance().covariance_within_bounds(1e-9));
        assert!(z.control_effort_model_free().is_finite());
        plant.advance(&output, dt).unwrap();
        assert!(plant.state().is_finite());
        if tick >= 4000 {
            last_second.push(plant.state().position.z);
        }
    }

    let error = worst_error(&last_second, 0.5);
    assert!(error < 0.02, "altitude off by {error} m after 4 s");
    let dual = mfc.axis(AxisRole::Thrust).unwrap().dual().unwrap();
    assert!(dual.beta.is_finite() && dual.beta > 0.0);
}

#[test]
fn test_attitude_settles_after_rate_disturbance() {
    init_logger();
    let config = MfcConfig::altitude();
    let dt = 1.0 / config.rates.main_hz as f64;
    let mut mfc = controller(config);
    let initial = RigidBodyState {
        body_rates: Vector3::new(1.0, -1.0, 0.5),
        ..RigidBodyState::at_rest(Vector3::new(0.0, 0.0, 1.0))
    };
    let mut plant = Quadrotor::new(Airframe::crazyflie(), initial);
    let setpoint = Setpoint::hold(Vector3::new(0.0, 0.0, 1.0), 0.0);

    let mut max_tilt = 0.0_f64;
    for tick in 0..6000 {
        let output = mfc.step(&plant.measured_state(), &setpoint, &plant.sensor_data(), tick);
        plant.advance(&output, dt).unwrap();

        let state = plant.state();
        max_tilt = max_tilt.max(state.attitude.x.abs()).max(state.attitude.y.abs());
        if tick >= 5500 {
            assert!(state.attitude.amax() < 0.02, "attitude {:?} at tick {tick}", state.attitude);
            assert!(state.body_rates.amax() < 0.05, "rates {:?} at tick {tick}", state.body_rates);
        }
    }
    assert!(max_tilt < 0.2, "tilted to {max_tilt} rad");
    assert!((plant.state().position.z - 1.0).abs() < 0.05);
}

#[test]
fn test_full_cascade_reaches_position_setpoint() {
    init_logger();
    let config = MfcConfig::full_cascade();
    let ceiling = thrust_ceiling(&config);
    let limit = config.tilt_limit;
    let dt = 1.0 / config.rates.main_hz as f64;
    let mut mfc = controller(config);
    let mut plant = Quadrotor::new(Airframe::crazyflie(), RigidBodyState::default());
    let target = Vector3::new(0.3, -0.2, 0.5);
    let setpoint = Setpoint::hold(target, 0.0);

    let mut last_second = Vec::new();
    for tick in 0..6000 {
        let output = mfc.step(&plant.measured_state(), &setpoint, &plant.sensor_data(), tick);
        assert!(output.thrust <= ceiling);
        plant.advance(&output, dt).unwrap();

        let state = plant.state();
        assert!(state.is_finite());
        assert!(state.attitude.x.abs() <= limit && state.attitude.y.abs() <= limit);
        if tick >= 5000 {
            last_second.push(*state);
        }
    }

    for axis in 0..3 {
        let samples: Vec<f64> = last_second.iter().map(|s| s.position[axis]).collect();
        let error = worst_error(&samples, target[axis]);
        assert!(error < 0.02, "axis {axis} off by {error} m after 5 s");
    }
    for state in &last_second {
        assert!(state.attitude.x.abs() < 0.05 && state.attitude.y.abs() < 0.05);
    }
}

#[test]
fn test_full_cascade_on_synthetic_trajectory() {
    init_logger();
    let config = MfcConfig::full_cascade();
    let ceiling = thrust_ceiling(&config);
    let dt = 1.0 / config.rates.main_hz as f64;
    let mut mfc = controller(config);
    let setpoint = Setpoint::hold(Vector3::new(0.5, -0.3, 0.8), 0.4);

    for tick in 0..2000 {
        let t = tick as f64 * dt;
        let state = MeasuredState {
            position: Vector3::new(0.2 * t.sin(), 0.1 * t.cos(), 0.3 + 0.2 * t),
            velocity: Vector3::new(0.2 * t.cos(), -0.1 * t.sin(), 0.2),
            attitude: Vector3::new(0.05 * (3.0 * t).sin(), -0.05 * (2.0 * t).cos(), 0.1 * t),
        };
        let sensors = SensorData {
            gyro: Vector3::new(0.15 * (3.0 * t).cos(), 0.1 * (2.0 * t).sin(), 0.1),
            accel: Vector3::new(-0.2 * t.sin(), -0.1 * t.cos(), 0.0),
        };

        let output = mfc.step(&state, &setpoint, &sensors, tick);
        assert!(output.thrust <= ceiling);

        let (roll, pitch) = mfc.tilt_setpoint();
        let limit = mfc.config().tilt_limit;
        assert!(roll.abs() <= limit + 1e-12 && pitch.abs() <= limit + 1e-12);

        for axis in mfc.axes() {
            assert!(axis.disturbance().covariance_within_bounds(1e-9), "{:?}", axis.role());
            assert!(axis.control_effort_model_free().is_finite());
            let limits = axis.limits();
            assert!(axis.control_effort_model_free() <= limits.max);
        }
    }

    let snapshot = mfc.registry().snapshot(&mfc);
    assert!(snapshot.values().all(|v| v.is_finite()));
}
