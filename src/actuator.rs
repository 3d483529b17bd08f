use crate::error::{MfcError, MfcResult};
use serde::{Deserialize, Serialize};

/// Empirical per-motor thrust curve `thrust = a·c² + b·c`, where `c` is the
/// command as a fraction of full scale.
///
/// The default constants are the Crazyflie 2.x PWM-to-thrust fit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThrustMap {
    pub a: f64,
    pub b: f64,
    /// Upper clamp on the command fraction.
    pub max_fraction: f64,
    /// Integer value of a full-scale command.
    pub full_scale: f64,
}

impl Default for ThrustMap {
    fn default() -> Self {
        Self {
            a: 0.091492681,
            b: 0.067673604,
            max_fraction: 0.9,
            full_scale: u16::MAX as f64,
        }
    }
}

impl ThrustMap {
    pub fn validate(&self) -> MfcResult<()> {
        if !(self.a > 0.0 && self.a.is_finite()) {
            return Err(MfcError::config("thrust_map.a", "must be positive"));
        }
        if !(self.b >= 0.0 && self.b.is_finite()) {
            return Err(MfcError::config("thrust_map.b", "must not be negative"));
        }
        if !(self.max_fraction > 0.0 && self.max_fraction <= 1.0) {
            return Err(MfcError::config("thrust_map.max_fraction", "must lie in (0, 1]"));
        }
        if !(self.full_scale >= 1.0 && self.full_scale <= u16::MAX as f64) {
            return Err(MfcError::config(
                "thrust_map.full_scale",
                "must fit in a 16-bit command",
            ));
        }
        Ok(())
    }

    /// Forward model: thrust produced at command fraction `fraction`.
    pub fn thrust(&self, fraction: f64) -> f64 {
        self.a * fraction * fraction + self.b * fraction
    }

    /// Largest effort the clamped command range can realise.
    pub fn max_effort(&self) -> f64 {
        self.thrust(self.max_fraction)
    }

    /// Inverts the curve for a normalized thrust effort, clamped to
    /// `[0, max_fraction]`.
    ///
    /// The discriminant is floored at zero, so efforts below `-b²/4a` map to
    /// the vertex instead of producing NaN. NaN efforts map to zero.
    pub fn command_fraction(&self, effort: f64) -> f64 {
        if effort.is_nan() {
            return 0.0;
        }
        let discriminant = (self.b * self.b + 4.0 * self.a * effort).max(0.0);
        let fraction = (-self.b + discriminant.sqrt()) / (2.0 * self.a);
        fraction.clamp(0.0, self.max_fraction)
    }

    /// Actuator command for a normalized thrust effort.
    pub fn map_thrust(&self, effort: f64) -> u16 {
        (self.command_fraction(effort) * self.full_scale).round() as u16
    }

    /// Command fraction represented by an integer command.
    pub fn fraction_of(&self, command: u16) -> f64 {
        command as f64 / self.full_scale
    }
}
