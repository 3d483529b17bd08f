use crate::attitude::{wrap_angle, AttitudeLoop};
use crate::axis::{AxisRole, AxisState};
use crate::config::{CascadeVariant, MfcConfig};
use crate::error::{MfcError, MfcResult};
use crate::estimator;
use crate::inversion;
use crate::vehicle::{ControlOutput, MeasuredState, SensorData, Setpoint, StabMode};
use log::debug;
use nalgebra::Vector3;

/// Decides which sub-pipelines run on a given tick of the main loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateGate {
    main_hz: u32,
}

impl RateGate {
    pub fn new(main_hz: u32) -> Self {
        Self { main_hz }
    }

    /// True on ticks where `tick % (main_hz / rate_hz) == 0`.
    pub fn should_run(&self, rate_hz: u32, tick: u32) -> bool {
        if rate_hz == 0 || rate_hz > self.main_hz {
            return false;
        }
        tick % (self.main_hz / rate_hz) == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerMode {
    /// Thrust is being commanded and the estimators are running.
    Active,
    /// Thrust is zero; outputs are cut and every axis is held at its initial state.
    Ground,
}

/// Rotates world-frame horizontal efforts into the body frame and normalizes
/// them by the vertical effort.
///
/// Returns `(ux, uy)` with
/// `ux = (sin ψ·u_x − cos ψ·u_y) / u_z` and
/// `uy = (cos ψ·u_x + sin ψ·u_y) / u_z`,
/// where `u_z` is kept at least `min_vertical` away from zero.
pub fn world_to_body(u_x: f64, u_y: f64, u_z: f64, yaw: f64, min_vertical: f64) -> (f64, f64) {
    let vertical = inversion::guard_effectiveness(u_z, min_vertical);
    if vertical.abs() == min_vertical && u_z.abs() < min_vertical {
        debug!("vertical effort {u_z} held at floor {vertical}");
    }
    let (sin_yaw, cos_yaw) = yaw.sin_cos();
    (
        (sin_yaw * u_x - cos_yaw * u_y) / vertical,
        (cos_yaw * u_x + sin_yaw * u_y) / vertical,
    )
}

/// Roll and pitch setpoints (rad) from body-frame normalized efforts.
///
/// Both `asin` arguments are clamped to [-1, 1], the cosine of roll is
/// floored at 1e-6, and the angles are limited to `±tilt_limit`.
pub fn desired_tilt(ux: f64, uy: f64, tilt_limit: f64) -> (f64, f64) {
    let finite = |v: f64| if v.is_nan() { 0.0 } else { v };
    let roll = finite(ux).clamp(-1.0, 1.0).asin();
    let cos_roll = roll.cos().max(1e-6);
    let pitch = (finite(uy) / cos_roll).clamp(-1.0, 1.0).asin();
    (
        roll.clamp(-tilt_limit, tilt_limit),
        pitch.clamp(-tilt_limit, tilt_limit),
    )
}

#[derive(Clone, Debug)]
struct HorizontalAxes {
    x: AxisState,
    y: AxisState,
}

#[derive(Clone, Debug)]
struct RotationalAxes {
    roll: AxisState,
    pitch: AxisState,
    yaw: AxisState,
}

/// Model-free cascade controller.
///
/// Owns one [`AxisState`] per configured axis and drives an external
/// [`AttitudeLoop`]. Call [`CascadeController::step`] once per main-loop
/// tick; the rate gate decides which pipelines run on that tick, and the
/// actuator outputs are latched between the ticks that update them.
pub struct CascadeController<L: AttitudeLoop> {
    config: MfcConfig,
    gate: RateGate,
    thrust: AxisState,
    horizontal: Option<HorizontalAxes>,
    rotational: Option<RotationalAxes>,
    attitude_loop: L,
    mode: ControllerMode,
    thrust_command: u16,
    tilt: (f64, f64),
    desired_yaw: f64,
    attitude_setpoint: Vector3<f64>,
    rate_setpoint: Vector3<f64>,
    output: ControlOutput,
}

impl<L: AttitudeLoop> CascadeController<L> {
    /// Builds a controller after validating `config`.
    pub fn new(config: MfcConfig, attitude_loop: L) -> MfcResult<Self> {
        config.validate()?;

        let build = |role: AxisRole| -> MfcResult<AxisState> {
            config
                .axis(role)
                .map(AxisState::new)
                .ok_or_else(|| MfcError::config(role.name(), "axis is required but missing"))
        };

        let thrust = build(AxisRole::Thrust)?;
        let horizontal = match config.variant {
            CascadeVariant::Full => Some(HorizontalAxes {
                x: build(AxisRole::HorizontalX)?,
                y: build(AxisRole::HorizontalY)?,
            }),
            CascadeVariant::AltitudeOnly => None,
        };
        let rotational = if config.estimate_attitude_axes {
            Some(RotationalAxes {
                roll: build(AxisRole::Roll)?,
                pitch: build(AxisRole::Pitch)?,
                yaw: build(AxisRole::Yaw)?,
            })
        } else {
            None
        };

        Ok(Self {
            gate: RateGate::new(config.rates.main_hz),
            config,
            thrust,
            horizontal,
            rotational,
            attitude_loop,
            mode: ControllerMode::Ground,
            thrust_command: 0,
            tilt: (0.0, 0.0),
            desired_yaw: 0.0,
            attitude_setpoint: Vector3::zeros(),
            rate_setpoint: Vector3::zeros(),
            output: ControlOutput::default(),
        })
    }

    /// Runs one main-loop tick.
    ///
    /// # Arguments
    ///
    /// * `state` - Estimated position, velocity and attitude
    /// * `setpoint` - Desired trajectory and per-axis modes
    /// * `sensors` - Gyro and accelerometer readings
    /// * `tick` - Main-loop tick counter
    ///
    /// # Returns
    ///
    /// The latched actuator command. A zero thrust command zeroes every
    /// output and resets the controller before returning.
    pub fn step(
        &mut self,
        state: &MeasuredState,
        setpoint: &Setpoint,
        sensors: &SensorData,
        tick: u32,
    ) -> ControlOutput {
        let rates = self.config.rates;
        let attitude_tick = self.gate.should_run(rates.attitude_hz, tick);

        if attitude_tick {
            self.update_desired_yaw(state, setpoint);
        }

        if self.gate.should_run(rates.control_hz, tick) && setpoint.mode.z == StabMode::Absolute {
            self.run_translational(state, setpoint, sensors);
        }

        if attitude_tick {
            if setpoint.mode.z == StabMode::Disable {
                self.thrust_command = setpoint.thrust;
            }
            self.attitude_setpoint = self.select_attitude_setpoint(setpoint);
            self.run_attitude_loop(state, setpoint, sensors);
            if self.rotational.is_some() {
                self.run_rotational(state, setpoint, sensors);
            }
        }

        self.output.thrust = self.thrust_command;
        if self.output.thrust == 0 {
            self.enter_ground(state);
        } else if self.mode == ControllerMode::Ground {
            debug!("thrust {} commanded, controller active", self.output.thrust);
            self.mode = ControllerMode::Active;
        }
        self.output
    }

    fn update_desired_yaw(&mut self, state: &MeasuredState, setpoint: &Setpoint) {
        match setpoint.mode.yaw {
            StabMode::Absolute => self.desired_yaw = wrap_angle(setpoint.attitude.z),
            StabMode::Velocity => {
                let dt = self.config.rates.attitude_dt();
                let mut yaw = wrap_angle(self.desired_yaw + setpoint.attitude_rate.z * dt);
                let max_delta = self.config.yaw_max_delta;
                if max_delta > 0.0 {
                    let measured = state.attitude.z;
                    let delta = wrap_angle(yaw - measured);
                    if delta.abs() > max_delta {
                        yaw = wrap_angle(measured + max_delta.copysign(delta));
                    }
                }
                self.desired_yaw = yaw;
            }
            StabMode::Disable => {}
        }
    }

    /// Vertical pipeline, then the horizontal pipelines unless the vehicle
    /// is sitting on the ground.
    fn run_translational(&mut self, state: &MeasuredState, setpoint: &Setpoint, sensors: &SensorData) {
        let dt = self.config.rates.control_dt();
        let floor = self.config.guards.min_effectiveness;

        let z = &mut self.thrust;
        estimator::predict_and_correct(z, state.position.z, dt);
        estimator::update_dual(z, sensors.accel.z);
        let u_z = inversion::compute_effort(
            z,
            state.position.z - setpoint.position.z,
            state.velocity.z - setpoint.velocity.z,
            setpoint.acceleration.z,
            floor,
        );

        if self.is_landed(state, setpoint) {
            self.thrust_command = 0;
            return;
        }
        self.thrust_command = self.config.thrust_map.map_thrust(u_z);

        let Some(horizontal) = self.horizontal.as_mut() else {
            return;
        };
        estimator::predict_and_correct(&mut horizontal.x, state.position.x, dt);
        estimator::predict_and_correct(&mut horizontal.y, state.position.y, dt);
        let u_x = inversion::compute_effort(
            &mut horizontal.x,
            state.position.x - setpoint.position.x,
            state.velocity.x - setpoint.velocity.x,
            setpoint.acceleration.x,
            floor,
        );
        let u_y = inversion::compute_effort(
            &mut horizontal.y,
            state.position.y - setpoint.position.y,
            state.velocity.y - setpoint.velocity.y,
            setpoint.acceleration.y,
            floor,
        );

        let (ux, uy) = world_to_body(
            u_x,
            u_y,
            u_z,
            state.attitude.z,
            self.config.guards.min_vertical_effort,
        );
        let (roll, pitch) = desired_tilt(ux, uy, self.config.tilt_limit);
        let pitch = if self.config.signs.invert_pitch_setpoint {
            -pitch
        } else {
            pitch
        };
        self.tilt = (roll, pitch);
    }

    fn is_landed(&self, state: &MeasuredState, setpoint: &Setpoint) -> bool {
        let threshold = self.config.ground_threshold;
        setpoint.position.z < threshold && state.position.z < threshold
    }

    fn select_attitude_setpoint(&self, setpoint: &Setpoint) -> Vector3<f64> {
        let mfc_tilt = self.horizontal.is_some()
            && setpoint.mode.x != StabMode::Disable
            && setpoint.mode.y != StabMode::Disable;
        let (roll, pitch) = if mfc_tilt {
            self.tilt
        } else {
            (setpoint.attitude.x, setpoint.attitude.y)
        };
        Vector3::new(roll, pitch, self.desired_yaw)
    }

    fn measured_rates(&self, sensors: &SensorData) -> Vector3<f64> {
        let mut rates = sensors.gyro;
        if self.config.signs.invert_pitch_rate {
            rates.y = -rates.y;
        }
        rates
    }

    fn run_attitude_loop(&mut self, state: &MeasuredState, setpoint: &Setpoint, sensors: &SensorData) {
        let mut rates = self
            .attitude_loop
            .correct_attitude(state.attitude, self.attitude_setpoint);

        if setpoint.mode.roll == StabMode::Velocity {
            rates.x = setpoint.attitude_rate.x;
            self.attitude_loop.reset_roll();
        }
        if setpoint.mode.pitch == StabMode::Velocity {
            rates.y = setpoint.attitude_rate.y;
            self.attitude_loop.reset_pitch();
        }
        self.rate_setpoint = rates;

        let measured = self.measured_rates(sensors);
        let command = self.attitude_loop.correct_rates(measured, rates);
        let yaw = if self.config.signs.invert_yaw_output {
            -command.z
        } else {
            command.z
        };
        self.output.roll = ControlOutput::to_command(command.x);
        self.output.pitch = ControlOutput::to_command(command.y);
        self.output.yaw = ControlOutput::to_command(yaw);
    }

    /// Roll, pitch and yaw estimators. Their efforts are published only.
    fn run_rotational(&mut self, state: &MeasuredState, setpoint: &Setpoint, sensors: &SensorData) {
        let dt = self.config.rates.attitude_dt();
        let floor = self.config.guards.min_effectiveness;
        let desired = self.attitude_setpoint;
        let measured_rates = self.measured_rates(sensors);
        let Some(rotational) = self.rotational.as_mut() else {
            return;
        };

        let axes = [
            &mut rotational.roll,
            &mut rotational.pitch,
            &mut rotational.yaw,
        ];
        for (i, axis) in axes.into_iter().enumerate() {
            let mut error = state.attitude[i] - desired[i];
            if i == 2 {
                error = wrap_angle(error);
            }
            let rate_error = measured_rates[i] - setpoint.attitude_rate[i];
            let reference = inversion::differentiate_setpoint(axis, desired[i], dt);
            estimator::predict_and_correct(axis, state.attitude[i], dt);
            inversion::compute_effort(axis, error, rate_error, reference, floor);
        }
    }

    fn enter_ground(&mut self, state: &MeasuredState) {
        self.output.cut();
        self.attitude_loop.reset_all();
        self.reset_axes();
        self.tilt = (0.0, 0.0);
        self.desired_yaw = state.attitude.z;
        if self.mode == ControllerMode::Active {
            debug!("thrust cut, controller grounded and reset");
            self.mode = ControllerMode::Ground;
        }
    }

    fn reset_axes(&mut self) {
        self.axes_mut().for_each(AxisState::reset);
    }

    /// Cuts thrust and re-initialises every axis and the attitude loop.
    pub fn reset(&mut self, state: &MeasuredState) {
        self.thrust_command = 0;
        self.enter_ground(state);
    }

    pub fn axis(&self, role: AxisRole) -> Option<&AxisState> {
        match role {
            AxisRole::Thrust => Some(&self.thrust),
            AxisRole::HorizontalX => self.horizontal.as_ref().map(|h| &h.x),
            AxisRole::HorizontalY => self.horizontal.as_ref().map(|h| &h.y),
            AxisRole::Roll => self.rotational.as_ref().map(|r| &r.roll),
            AxisRole::Pitch => self.rotational.as_ref().map(|r| &r.pitch),
            AxisRole::Yaw => self.rotational.as_ref().map(|r| &r.yaw),
        }
    }

    pub fn axis_mut(&mut self, role: AxisRole) -> Option<&mut AxisState> {
        match role {
            AxisRole::Thrust => Some(&mut self.thrust),
            AxisRole::HorizontalX => self.horizontal.as_mut().map(|h| &mut h.x),
            AxisRole::HorizontalY => self.horizontal.as_mut().map(|h| &mut h.y),
            AxisRole::Roll => self.rotational.as_mut().map(|r| &mut r.roll),
            AxisRole::Pitch => self.rotational.as_mut().map(|r| &mut r.pitch),
            AxisRole::Yaw => self.rotational.as_mut().map(|r| &mut r.yaw),
        }
    }

    /// Configured axes in [`AxisRole::ALL`] order.
    pub fn axes(&self) -> impl Iterator<Item = &AxisState> {
        AxisRole::ALL.into_iter().filter_map(|role| self.axis(role))
    }

    fn axes_mut(&mut self) -> impl Iterator<Item = &mut AxisState> {
        let horizontal = self
            .horizontal
            .as_mut()
            .into_iter()
            .flat_map(|h| [&mut h.x, &mut h.y]);
        let rotational = self
            .rotational
            .as_mut()
            .into_iter()
            .flat_map(|r| [&mut r.roll, &mut r.pitch, &mut r.yaw]);
        std::iter::once(&mut self.thrust)
            .chain(horizontal)
            .chain(rotational)
    }

    pub fn mode(&self) -> ControllerMode {
        self.mode
    }

    pub fn thrust_command(&self) -> u16 {
        self.thrust_command
    }

    /// Roll, pitch and yaw handed to the attitude loop on the last attitude tick.
    pub fn attitude_setpoint(&self) -> Vector3<f64> {
        self.attitude_setpoint
    }

    /// Roll and pitch derived from the horizontal efforts.
    pub fn tilt_setpoint(&self) -> (f64, f64) {
        self.tilt
    }

    pub fn desired_yaw(&self) -> f64 {
        self.desired_yaw
    }

    pub fn rate_setpoint(&self) -> Vector3<f64> {
        self.rate_setpoint
    }

    pub fn output(&self) -> ControlOutput {
        self.output
    }

    pub fn config(&self) -> &MfcConfig {
        &self.config
    }

    pub fn attitude_loop(&self) -> &L {
        &self.attitude_loop
    }
}
