use nalgebra::Vector3;
use std::f64::consts::{PI, TAU};

/// Inner attitude loop driven by the cascade.
///
/// The cascade only calls through this interface: it hands over measured and
/// desired roll/pitch/yaw, then measured and desired body rates, and asks for
/// integrator resets when the vehicle is on the ground.
pub trait AttitudeLoop {
    /// Desired body rates (rad/s) from measured and desired attitude (rad).
    fn correct_attitude(&mut self, measured: Vector3<f64>, desired: Vector3<f64>) -> Vector3<f64>;

    /// Actuator roll/pitch/yaw outputs from measured and desired body rates.
    fn correct_rates(&mut self, measured: Vector3<f64>, desired: Vector3<f64>) -> Vector3<f64>;

    fn reset_all(&mut self);

    fn reset_roll(&mut self) {}

    fn reset_pitch(&mut self) {}
}

/// Wraps an angle into `[-π, π)`.
pub fn wrap_angle(angle: f64) -> f64 {
    (angle + PI).rem_euclid(TAU) - PI
}

/// Gains of [`RateAttitudeLoop`], one entry per roll/pitch/yaw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttitudeLoopGains {
    /// Attitude error to desired rate (1/s)
    pub kp_attitude: Vector3<f64>,
    /// Rate error to output (counts per rad/s)
    pub kp_rate: Vector3<f64>,
    /// Integrated rate error to output (counts per rad)
    pub ki_rate: Vector3<f64>,
    /// Clamp on the integrated rate error (rad)
    pub integral_limit: f64,
    /// Clamp on each output (counts)
    pub output_limit: f64,
}

impl Default for AttitudeLoopGains {
    fn default() -> Self {
        Self {
            kp_attitude: Vector3::new(6.0, 6.0, 6.0),
            kp_rate: Vector3::new(28_000.0, 28_000.0, 7_000.0),
            ki_rate: Vector3::new(28_000.0, 28_000.0, 1_000.0),
            integral_limit: 0.5,
            output_limit: i16::MAX as f64,
        }
    }
}

/// Proportional attitude loop feeding a PI body-rate loop.
///
/// The yaw attitude error is wrapped so the loop turns the short way round.
#[derive(Clone, Debug)]
pub struct RateAttitudeLoop {
    gains: AttitudeLoopGains,
    dt: f64,
    rate_integral: Vector3<f64>,
}

impl RateAttitudeLoop {
    pub fn new(gains: AttitudeLoopGains, dt: f64) -> Self {
        Self {
            gains,
            dt,
            rate_integral: Vector3::zeros(),
        }
    }

    pub fn gains(&self) -> &AttitudeLoopGains {
        &self.gains
    }

    pub fn rate_integral(&self) -> Vector3<f64> {
        self.rate_integral
    }
}

impl AttitudeLoop for RateAttitudeLoop {
    fn correct_attitude(&mut self, measured: Vector3<f64>, desired: Vector3<f64>) -> Vector3<f64> {
        let mut error = desired - measured;
        error[2] = wrap_angle(error[2]);
        error.component_mul(&self.gains.kp_attitude)
    }

    fn correct_rates(&mut self, measured: Vector3<f64>, desired: Vector3<f64>) -> Vector3<f64> {
        let error = desired - measured;
        let limit = self.gains.integral_limit;
        self.rate_integral = (self.rate_integral + error * self.dt).map(|v| v.clamp(-limit, limit));

        let output = error.component_mul(&self.gains.kp_rate)
            + self.rate_integral.component_mul(&self.gains.ki_rate);
        let max = self.gains.output_limit;
        output.map(|v| v.clamp(-max, max))
    }

    fn reset_all(&mut self) {
        self.rate_integral = Vector3::zeros();
    }

    fn reset_roll(&mut self) {
        self.rate_integral[0] = 0.0;
    }

    fn reset_pitch(&mut self) {
        self.rate_integral[1] = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_wrap_angle() {
        assert_abs_diff_eq!(wrap_angle(0.5), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_angle(3.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_angle(-3.0 * PI / 2.0), PI / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_attitude_error_to_rates() {
        let mut attitude = RateAttitudeLoop::new(AttitudeLoopGains::default(), 0.002);
        let rates = attitude.correct_attitude(Vector3::zeros(), Vector3::new(0.1, -0.2, 0.0));
        assert_abs_diff_eq!(rates, Vector3::new(0.6, -1.2, 0.0), epsilon = 1e-12);

        // Yaw from just below +π to just above -π is a small positive turn
        let rates = attitude.correct_attitude(
            Vector3::new(0.0, 0.0, PI - 0.05),
            Vector3::new(0.0, 0.0, -PI + 0.05),
        );
        assert_abs_diff_eq!(rates[2], 6.0 * 0.1, epsilon = 1e-9);
    }

    #[test]
    fn test_rate_loop_saturates_and_resets() {
        let mut attitude = RateAttitudeLoop::new(AttitudeLoopGains::default(), 0.002);
        let output = attitude.correct_rates(Vector3::zeros(), Vector3::new(100.0, 0.0, 0.0));
        assert_eq!(output[0], i16::MAX as f64);
        assert!(attitude.rate_integral()[0] > 0.0);

        attitude.correct_rates(Vector3::zeros(), Vector3::new(0.0, 1.0, 0.0));
        attitude.reset_roll();
        assert_eq!(attitude.rate_integral()[0], 0.0);
        assert!(attitude.rate_integral()[1] > 0.0);

        attitude.reset_all();
        assert_eq!(attitude.rate_integral(), Vector3::zeros());
    }
}
