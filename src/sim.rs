//! Rigid-body quadrotor plant for closed-loop runs.
//!
//! The plant is a 6-DOF rigid body with Z-Y-X Euler angles, integrated one
//! controller tick at a time with `fast_ode`. A [`ControlOutput`] drives it
//! through the forward thrust curve of each motor and a per-count torque
//! scale on the attitude outputs. The ground is a flat plane at z = 0.

use crate::actuator::ThrustMap;
use crate::error::{MfcError, MfcResult};
use crate::vehicle::{ControlOutput, MeasuredState, SensorData};
use nalgebra::Vector3;

/// Physical parameters of the simulated vehicle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Airframe {
    pub g: f64,
    pub mass: f64,
    pub ixx: f64,
    pub iyy: f64,
    pub izz: f64,
    pub motor_count: f64,
    /// Per-motor thrust (N) as a function of command fraction.
    pub thrust_map: ThrustMap,
    /// Body torque (N·m) per count of roll, pitch and yaw output.
    pub torque_per_count: Vector3<f64>,
}

impl Airframe {
    /// A Crazyflie 2.x sized quadrotor.
    pub fn crazyflie() -> Self {
        Self {
            g: 9.81,
            mass: 0.027,
            ixx: 1.657e-5,
            iyy: 1.666e-5,
            izz: 2.926e-5,
            motor_count: 4.0,
            thrust_map: ThrustMap::default(),
            torque_per_count: Vector3::new(1e-8, 1e-8, 5e-9),
        }
    }

    pub fn weight(&self) -> f64 {
        self.mass * self.g
    }

    /// Total thrust (N) produced by an integer thrust command.
    pub fn total_thrust(&self, command: u16) -> f64 {
        let fraction = self.thrust_map.fraction_of(command);
        self.motor_count * self.thrust_map.thrust(fraction)
    }

    /// Thrust command closest to hover.
    pub fn hover_command(&self) -> u16 {
        let per_motor = self.weight() / self.motor_count;
        self.thrust_map.map_thrust(per_motor)
    }
}

impl Default for Airframe {
    fn default() -> Self {
        Self::crazyflie()
    }
}

/// Position, velocity, Euler angles and body rates of the plant.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RigidBodyState {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    /// Roll, pitch, yaw (rad)
    pub attitude: Vector3<f64>,
    /// p, q, r (rad/s)
    pub body_rates: Vector3<f64>,
}

impl RigidBodyState {
    pub fn at_rest(position: Vector3<f64>) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    fn to_array(&self) -> [f64; 12] {
        let mut arr = [0.0; 12];
        for (block, v) in [self.position, self.velocity, self.attitude, self.body_rates]
            .iter()
            .enumerate()
        {
            arr[block * 3..block * 3 + 3].copy_from_slice(v.as_slice());
        }
        arr
    }

    fn from_array(arr: &[f64; 12]) -> Self {
        let block = |i: usize| Vector3::new(arr[i], arr[i + 1], arr[i + 2]);
        Self {
            position: block(0),
            velocity: block(3),
            attitude: block(6),
            body_rates: block(9),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

/// Equations of motion under constant body thrust and torques.
struct RigidBodyOde {
    airframe: Airframe,
    thrust: f64,
    torques: Vector3<f64>,
}

impl RigidBodyOde {
    /// World-frame acceleration of a body at `attitude`, gravity included.
    fn linear_acceleration(&self, attitude: &Vector3<f64>) -> Vector3<f64> {
        let (sin_phi, cos_phi) = attitude.x.sin_cos();
        let (sin_theta, cos_theta) = attitude.y.sin_cos();
        let (sin_psi, cos_psi) = attitude.z.sin_cos();

        // Third column of Rz(ψ)·Ry(θ)·Rx(φ) carries the body z thrust
        let thrust_axis = Vector3::new(
            cos_phi * sin_theta * cos_psi + sin_phi * sin_psi,
            cos_phi * sin_theta * sin_psi - sin_phi * cos_psi,
            cos_phi * cos_theta,
        );
        thrust_axis * (self.thrust / self.airframe.mass) - Vector3::new(0.0, 0.0, self.airframe.g)
    }
}

impl fast_ode::DifferentialEquation<12> for RigidBodyOde {
    fn ode_dot_y(&self, _t: f64, y: &fast_ode::Coord<12>) -> (fast_ode::Coord<12>, bool) {
        let state = RigidBodyState::from_array(&y.0);
        let (sin_phi, cos_phi) = state.attitude.x.sin_cos();
        let cos_theta = state.attitude.y.cos();
        let tan_theta = state.attitude.y.tan();
        let (p, q, r) = (state.body_rates.x, state.body_rates.y, state.body_rates.z);
        let a = &self.airframe;

        let euler_rates = Vector3::new(
            p + q * sin_phi * tan_theta + r * cos_phi * tan_theta,
            q * cos_phi - r * sin_phi,
            // Gimbal lock
            if cos_theta.abs() > 1e-6 {
                (q * sin_phi + r * cos_phi) / cos_theta
            } else {
                0.0
            },
        );
        let angular_acceleration = Vector3::new(
            (self.torques.x + (a.iyy - a.izz) * q * r) / a.ixx,
            (self.torques.y + (a.izz - a.ixx) * r * p) / a.iyy,
            (self.torques.z + (a.ixx - a.iyy) * p * q) / a.izz,
        );

        let derivative = RigidBodyState {
            position: state.velocity,
            velocity: self.linear_acceleration(&state.attitude),
            attitude: euler_rates,
            body_rates: angular_acceleration,
        };
        (fast_ode::Coord(derivative.to_array()), true)
    }
}

/// Simulated quadrotor advanced one tick at a time.
#[derive(Clone, Debug)]
pub struct Quadrotor {
    pub airframe: Airframe,
    state: RigidBodyState,
    acceleration: Vector3<f64>,
    time: f64,
    tolerance: f64,
}

impl Quadrotor {
    pub fn new(airframe: Airframe, state: RigidBodyState) -> Self {
        Self {
            airframe,
            state,
            acceleration: Vector3::zeros(),
            time: 0.0,
            tolerance: 1e-8,
        }
    }

    pub fn state(&self) -> &RigidBodyState {
        &self.state
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Holds `output` for `dt` seconds and integrates the plant.
    ///
    /// Below the ground plane the body is put back on it with no downward
    /// velocity.
    pub fn advance(&mut self, output: &ControlOutput, dt: f64) -> MfcResult<()> {
        let ode = RigidBodyOde {
            airframe: self.airframe,
            thrust: self.airframe.total_thrust(output.thrust),
            torques: Vector3::new(output.roll as f64, output.pitch as f64, output.yaw as f64)
                .component_mul(&self.airframe.torque_per_count),
        };

        let span = (self.time, self.time + dt);
        let result = fast_ode::solve_ivp(
            &ode,
            span,
            fast_ode::Coord(self.state.to_array()),
            |_, _| true,
            self.tolerance,
            self.tolerance * 10.0,
        );
        let mut next = match result {
            fast_ode::IvpResult::FinalTimeReached(coord) => RigidBodyState::from_array(&coord.0),
            _ => {
                return Err(MfcError::Integration {
                    start: span.0,
                    end: span.1,
                })
            }
        };

        if next.position.z <= 0.0 {
            next.position.z = 0.0;
            next.velocity.z = next.velocity.z.max(0.0);
        }

        let mut acceleration = ode.linear_acceleration(&next.attitude);
        if next.position.z == 0.0 && acceleration.z < 0.0 {
            acceleration.z = 0.0;
        }
        self.acceleration = acceleration;
        self.state = next;
        self.time = span.1;
        Ok(())
    }

    /// The plant state as the controller sees it.
    pub fn measured_state(&self) -> MeasuredState {
        MeasuredState {
            position: self.state.position,
            velocity: self.state.velocity,
            attitude: self.state.attitude,
        }
    }

    /// Ideal gyro and gravity-compensated accelerometer readings.
    pub fn sensor_data(&self) -> SensorData {
        SensorData {
            gyro: self.state.body_rates,
            accel: self.acceleration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn run(quad: &mut Quadrotor, output: ControlOutput, seconds: f64) {
        let dt = 0.001;
        for _ in 0..(seconds / dt).round() as usize {
            quad.advance(&output, dt).unwrap();
        }
    }

    #[test]
    fn test_free_fall() {
        let mut quad = Quadrotor::new(
            Airframe::crazyflie(),
            RigidBodyState::at_rest(Vector3::new(0.0, 0.0, 10.0)),
        );
        run(&mut quad, ControlOutput::default(), 1.0);

        // z = z0 - g t² / 2
        assert_abs_diff_eq!(quad.state().position.z, 10.0 - 0.5 * 9.81, epsilon = 1e-3);
        assert_abs_diff_eq!(quad.state().velocity.z, -9.81, epsilon = 1e-3);
        assert_abs_diff_eq!(quad.time(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_hover_command_holds_altitude() {
        let airframe = Airframe::crazyflie();
        let mut quad = Quadrotor::new(airframe, RigidBodyState::at_rest(Vector3::new(0.0, 0.0, 1.0)));
        let output = ControlOutput {
            thrust: airframe.hover_command(),
            ..Default::default()
        };
        run(&mut quad, output, 1.0);

        // Command quantization leaves a tiny residual acceleration
        assert!((quad.state().position.z - 1.0).abs() < 0.01);
        assert!(quad.state().velocity.z.abs() < 0.02);
    }

    #[test]
    fn test_ground_contact() {
        let mut quad = Quadrotor::new(Airframe::crazyflie(), RigidBodyState::default());
        run(&mut quad, ControlOutput::default(), 0.5);
        assert_eq!(quad.state().position.z, 0.0);
        assert_eq!(quad.state().velocity.z, 0.0);
        assert_eq!(quad.sensor_data().accel.z, 0.0);
    }

    #[test]
    fn test_full_thrust_lifts_off() {
        let mut quad = Quadrotor::new(Airframe::crazyflie(), RigidBodyState::default());
        let output = ControlOutput {
            thrust: u16::MAX,
            ..Default::default()
        };
        run(&mut quad, output, 0.2);
        assert!(quad.state().position.z > 0.0);
        assert!(quad.sensor_data().accel.z > 0.0);
    }

    #[test]
    fn test_roll_torque_spins_up_roll() {
        let mut quad = Quadrotor::new(
            Airframe::crazyflie(),
            RigidBodyState::at_rest(Vector3::new(0.0, 0.0, 1.0)),
        );
        let output = ControlOutput {
            thrust: Airframe::crazyflie().hover_command(),
            roll: 1000,
            ..Default::default()
        };
        run(&mut quad, output, 0.05);
        assert!(quad.state().body_rates.x > 0.0);
        assert!(quad.state().attitude.x > 0.0);
        assert_abs_diff_eq!(quad.state().body_rates.y, 0.0, epsilon = 1e-9);
        assert!(quad.state().is_finite());
    }
}
