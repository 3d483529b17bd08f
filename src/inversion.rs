use crate::axis::AxisState;

/// Substitutes `sign(beta) * max(|beta|, floor)` so the inversion never
/// divides by a vanishing effectiveness. A NaN beta becomes `floor`.
pub fn guard_effectiveness(beta: f64, floor: f64) -> f64 {
    if beta.is_nan() {
        return floor;
    }
    let magnitude = beta.abs().max(floor);
    if beta < 0.0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Outlier rejection and low-pass blend of the desired second derivative.
///
/// Values above the filter threshold, or non-finite values, hold the previous
/// filtered reference. Axes without a filter pass finite values straight
/// through. The result becomes the axis's new previous reference.
pub fn filter_reference(axis: &mut AxisState, raw: f64) -> f64 {
    let previous = axis.previous_reference_accel;
    let filtered = if !raw.is_finite() {
        previous
    } else {
        match axis.reference_filter {
            Some(filter) if raw.abs() > filter.threshold => previous,
            Some(filter) => filter.blend * raw + (1.0 - filter.blend) * previous,
            None => raw,
        }
    };
    axis.previous_reference_accel = filtered;
    filtered
}

/// Second derivative of a setpoint by two backward differences.
///
/// Returns zero until two earlier samples are available, and holds the
/// history when `setpoint` is not finite.
pub fn differentiate_setpoint(axis: &mut AxisState, setpoint: f64, dt: f64) -> f64 {
    if !setpoint.is_finite() || dt <= 0.0 {
        return 0.0;
    }
    let Some(previous) = axis.previous_setpoint.replace(setpoint) else {
        return 0.0;
    };
    let rate = (setpoint - previous) / dt;
    match axis.previous_setpoint_rate.replace(rate) {
        Some(previous_rate) => (rate - previous_rate) / dt,
        None => 0.0,
    }
}

/// Inversion control law for one axis.
///
/// # Arguments
///
/// * `axis` - Axis whose disturbance estimate is inverted; its efforts are updated
/// * `tracking_error` - Measured minus desired position (or angle)
/// * `tracking_rate_error` - Measured minus desired rate
/// * `desired_second_derivative` - Desired acceleration, before filtering
/// * `min_effectiveness` - Floor on `|beta|`
///
/// # Returns
///
/// The saturated normalized effort `u_mfc`.
///
/// # Control Law
///
/// u_c = kp * e + kd * ė
/// u_mfc = (ÿd - u_c - F) / beta
///
/// A non-finite result (from a poisoned estimate) holds the previous effort.
pub fn compute_effort(
    axis: &mut AxisState,
    tracking_error: f64,
    tracking_rate_error: f64,
    desired_second_derivative: f64,
    min_effectiveness: f64,
) -> f64 {
    let feedback =
        axis.feedback_gain_kp * tracking_error + axis.feedback_gain_kd * tracking_rate_error;
    let reference = filter_reference(axis, desired_second_derivative);

    let (bias, beta) = axis.control_model();
    let beta = guard_effectiveness(beta, min_effectiveness);
    if beta.abs() == min_effectiveness {
        log::debug!("{} effectiveness held at floor {beta}", axis.role.name());
    }

    let raw = (reference - feedback - bias) / beta;
    let effort = if raw.is_finite() {
        axis.limits.clamp(raw)
    } else {
        log::debug!("{} effort {raw} is not finite, holding previous", axis.role.name());
        axis.control_effort_model_free
    };

    axis.control_effort_feedback = feedback;
    axis.control_effort_model_free = effort;
    effort
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::DisturbanceEstimate;
    use crate::config::{EffectivenessModel, EffortLimits, MfcConfig, ReferenceFilter};
    use approx::assert_abs_diff_eq;

    const FLOOR: f64 = 1e-3;

    fn thrust_axis() -> AxisState {
        let mut config = MfcConfig::altitude().axes.remove(0);
        config.effectiveness = EffectivenessModel::Fixed { beta: 25.0 };
        config.reference_filter = None;
        config.initial_bias = 0.0;
        AxisState::new(&config)
    }

    fn set_bias(axis: &mut AxisState, bias: f64) {
        match &mut axis.disturbance {
            DisturbanceEstimate::Order3(d) => d.state[2] = bias,
            DisturbanceEstimate::Order4(d) => d.state[2] = bias,
        }
    }

    #[test]
    fn test_guard_effectiveness() {
        assert_eq!(guard_effectiveness(40.0, FLOOR), 40.0);
        assert_eq!(guard_effectiveness(-40.0, FLOOR), -40.0);
        assert_eq!(guard_effectiveness(0.0, FLOOR), FLOOR);
        assert_eq!(guard_effectiveness(-1e-9, FLOOR), -FLOOR);
        assert_eq!(guard_effectiveness(f64::NAN, FLOOR), FLOOR);
    }

    #[test]
    fn test_effort_inverts_disturbance() {
        let mut axis = thrust_axis();
        set_bias(&mut axis, -9.0);

        // kp 38, kd 11: u_c = 38 * -0.1 + 11 * 0.2 = -1.6
        let effort = compute_effort(&mut axis, -0.1, 0.2, 0.5, FLOOR);

        assert_abs_diff_eq!(axis.control_effort_feedback(), -1.6, epsilon = 1e-12);
        assert_abs_diff_eq!(effort, (0.5 + 1.6 + 9.0) / 25.0, epsilon = 1e-12);
        assert_eq!(axis.control_effort_model_free(), effort);
    }

    #[test]
    fn test_effort_saturates_exactly_at_bounds() {
        let mut axis = thrust_axis();

        let high = compute_effort(&mut axis, -10.0, 0.0, 0.0, FLOOR);
        assert_eq!(high, 3.0);

        let low = compute_effort(&mut axis, 10.0, 0.0, 0.0, FLOOR);
        assert_eq!(low, 0.0);

        axis.limits = EffortLimits::upper(3.0);
        let unbounded_below = compute_effort(&mut axis, 10.0, 0.0, 0.0, FLOOR);
        assert_abs_diff_eq!(unbounded_below, -380.0 / 25.0, epsilon = 1e-12);
        assert_eq!(compute_effort(&mut axis, -100.0, 0.0, 0.0, FLOOR), 3.0);
    }

    #[test]
    fn test_zero_beta_uses_floor() {
        let mut axis = thrust_axis();
        assert!(axis.set_fixed_beta(0.0));
        axis.limits = EffortLimits::new(-1e6, 1e6);

        let effort = compute_effort(&mut axis, -0.001, 0.0, 0.0, FLOOR);
        assert!(effort.is_finite());
        assert_abs_diff_eq!(effort, 38.0 * 0.001 / FLOOR, epsilon = 1e-9);
    }

    #[test]
    fn test_nan_estimate_holds_previous_effort() {
        let mut axis = thrust_axis();
        let first = compute_effort(&mut axis, -0.2, 0.0, 0.0, FLOOR);

        set_bias(&mut axis, f64::NAN);
        let second = compute_effort(&mut axis, -0.5, 0.0, 0.0, FLOOR);
        assert_eq!(second, first);
    }

    #[test]
    fn test_reference_filter_rejects_outliers_and_blends() {
        let mut axis = thrust_axis();
        axis.reference_filter = Some(ReferenceFilter {
            threshold: 2.5,
            blend: 0.25,
        });

        assert_abs_diff_eq!(filter_reference(&mut axis, 1.0), 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(filter_reference(&mut axis, 1.0), 0.4375, epsilon = 1e-12);

        // Spike is replaced by the held value
        assert_abs_diff_eq!(filter_reference(&mut axis, 40.0), 0.4375, epsilon = 1e-12);
        assert_abs_diff_eq!(filter_reference(&mut axis, -3.0), 0.4375, epsilon = 1e-12);
        assert_abs_diff_eq!(filter_reference(&mut axis, f64::NAN), 0.4375, epsilon = 1e-12);
        assert_abs_diff_eq!(axis.previous_reference_accel(), 0.4375, epsilon = 1e-12);
    }

    #[test]
    fn test_setpoint_differentiation() {
        let mut axis = thrust_axis();
        let dt = 0.002;
        assert_eq!(differentiate_setpoint(&mut axis, 0.0, dt), 0.0);
        assert_eq!(differentiate_setpoint(&mut axis, 0.0, dt), 0.0);

        // Quadratic 0.5·a·t² has constant second difference a
        let a = 3.0;
        let mut last = 0.0;
        for k in 2..10 {
            let t = (k - 1) as f64 * dt;
            last = differentiate_setpoint(&mut axis, 0.5 * a * t * t, dt);
        }
        assert_abs_diff_eq!(last, a, epsilon = 1e-6);

        assert_eq!(differentiate_setpoint(&mut axis, f64::NAN, dt), 0.0);
        axis.reset();
        assert_eq!(differentiate_setpoint(&mut axis, 5.0, dt), 0.0);
    }

    #[test]
    fn test_unfiltered_axis_passes_reference() {
        let mut axis = thrust_axis();
        assert_eq!(filter_reference(&mut axis, 7.5), 7.5);
        assert_eq!(filter_reference(&mut axis, f64::INFINITY), 7.5);
    }
}
