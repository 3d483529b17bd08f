//! Model-free adaptive control for multirotors.
//!
//! Each controlled axis runs a small Kalman filter that estimates the lumped
//! unmodeled acceleration acting on it (and optionally the control
//! effectiveness), then inverts a PD-augmented model to get a normalized
//! effort. The [`CascadeController`] combines the axes: the vertical effort
//! becomes the thrust command, the horizontal efforts are rotated into roll
//! and pitch setpoints for an external [`AttitudeLoop`].
//!
//! ```no_run
//! use nalgebra::Vector3;
//! use uav_mfc::{
//!     AttitudeLoopGains, CascadeController, MfcConfig, RateAttitudeLoop, Setpoint,
//!     SignConvention,
//! };
//! use uav_mfc::sim::{Airframe, Quadrotor, RigidBodyState};
//!
//! let mut config = MfcConfig::altitude();
//! config.signs = SignConvention::right_handed();
//! let dt = 1.0 / config.rates.main_hz as f64;
//! let attitude = RateAttitudeLoop::new(AttitudeLoopGains::default(), config.rates.attitude_dt());
//! let mut controller = CascadeController::new(config, attitude)?;
//! let mut plant = Quadrotor::new(Airframe::crazyflie(), RigidBodyState::default());
//!
//! let setpoint = Setpoint::hold(Vector3::new(0.0, 0.0, 0.5), 0.0);
//! for tick in 0..1000 {
//!     let output = controller.step(&plant.measured_state(), &setpoint, &plant.sensor_data(), tick);
//!     plant.advance(&output, dt)?;
//! }
//! # Ok::<(), uav_mfc::MfcError>(())
//! ```

pub mod actuator;
pub mod attitude;
pub mod axis;
pub mod cascade;
pub mod config;
pub mod covariance;
pub mod error;
pub mod estimator;
pub mod inversion;
pub mod registry;
pub mod sim;
pub mod vehicle;

pub use actuator::ThrustMap;
pub use attitude::{AttitudeLoop, AttitudeLoopGains, RateAttitudeLoop};
pub use axis::{AxisRole, AxisState, Disturbance, DisturbanceEstimate};
pub use cascade::{desired_tilt, world_to_body, CascadeController, ControllerMode, RateGate};
pub use config::{
    AxisConfig, CascadeVariant, EffectivenessModel, EffortLimits, Guards, LoopRates, MfcConfig,
    ReferenceFilter, SignConvention,
};
pub use error::{MfcError, MfcResult};
pub use estimator::DualEstimate;
pub use registry::ParamRegistry;
pub use vehicle::{AxisModes, ControlOutput, MeasuredState, SensorData, Setpoint, StabMode};
