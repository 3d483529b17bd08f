use nalgebra::Vector3;

/// How the setpoint drives one axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StabMode {
    #[default]
    Disable,
    Absolute,
    Velocity,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AxisModes {
    pub x: StabMode,
    pub y: StabMode,
    pub z: StabMode,
    pub roll: StabMode,
    pub pitch: StabMode,
    pub yaw: StabMode,
}

impl AxisModes {
    /// Absolute position and yaw tracking.
    pub fn position_hold() -> Self {
        Self {
            x: StabMode::Absolute,
            y: StabMode::Absolute,
            z: StabMode::Absolute,
            roll: StabMode::Absolute,
            pitch: StabMode::Absolute,
            yaw: StabMode::Absolute,
        }
    }
}

/// Estimated vehicle state consumed by the controller.
///
/// # Fields
///
/// * `position` - World-frame position (m), z up
/// * `velocity` - World-frame velocity (m/s)
/// * `attitude` - Roll, pitch, yaw (rad)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeasuredState {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub attitude: Vector3<f64>,
}

/// Raw inertial readings.
///
/// * `gyro` - Body rates (rad/s)
/// * `accel` - Linear acceleration with gravity removed (m/s²)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SensorData {
    pub gyro: Vector3<f64>,
    pub accel: Vector3<f64>,
}

/// Trajectory setpoint for one control cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Setpoint {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub acceleration: Vector3<f64>,
    /// Roll, pitch, yaw (rad)
    pub attitude: Vector3<f64>,
    /// Roll, pitch, yaw rates (rad/s)
    pub attitude_rate: Vector3<f64>,
    /// Raw thrust used when z is not under position control
    pub thrust: u16,
    pub mode: AxisModes,
}

impl Setpoint {
    /// Absolute hold at `position` with the given yaw.
    pub fn hold(position: Vector3<f64>, yaw: f64) -> Self {
        Self {
            position,
            attitude: Vector3::new(0.0, 0.0, yaw),
            mode: AxisModes::position_hold(),
            ..Default::default()
        }
    }
}

/// Actuator command handed to the motor mixer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlOutput {
    pub thrust: u16,
    pub roll: i16,
    pub pitch: i16,
    pub yaw: i16,
}

impl ControlOutput {
    pub fn cut(&mut self) {
        *self = Self::default();
    }

    /// Saturating conversion of an attitude-loop output; NaN maps to zero.
    pub fn to_command(value: f64) -> i16 {
        value.clamp(i16::MIN as f64, i16::MAX as f64) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_command_saturates() {
        assert_eq!(ControlOutput::to_command(1e9), i16::MAX);
        assert_eq!(ControlOutput::to_command(-1e9), i16::MIN);
        assert_eq!(ControlOutput::to_command(12.7), 12);
        assert_eq!(ControlOutput::to_command(f64::NAN), 0);
    }

    #[test]
    fn test_cut_zeroes_everything() {
        let mut output = ControlOutput {
            thrust: 100,
            roll: 3,
            pitch: -4,
            yaw: 5,
        };
        output.cut();
        assert_eq!(output, ControlOutput::default());
    }
}
