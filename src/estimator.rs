//! Linear Kalman estimation of the lumped disturbance on one axis.
//!
//! The model is a constant-acceleration chain driven by the previous cycle's
//! normalized effort:
//!
//! ```text
//! y[k+1]   = y + ẏ·dt + (F + beta·u)·dt²/2
//! ẏ[k+1]   = ẏ + (F + beta·u)·dt
//! F[k+1]   = F
//! beta[k+1] = beta            (4-state form only)
//! ```
//!
//! Only `y` is measured. With a fixed beta the `beta·u` terms enter as a known
//! input; with an estimated beta they sit in the transition matrix.

use crate::axis::{AxisState, Disturbance, DisturbanceEstimate};
use crate::config::EffectivenessModel;
use crate::covariance;
use nalgebra::{SMatrix, SVector};

/// Closed-form (bias, beta) estimate from the measured acceleration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DualEstimate {
    pub bias: f64,
    pub beta: f64,
}

impl DualEstimate {
    pub fn for_model(model: &EffectivenessModel) -> Option<Self> {
        match *model {
            EffectivenessModel::AlgebraicDual {
                initial_bias,
                initial_beta,
                ..
            } => Some(Self {
                bias: initial_bias,
                beta: initial_beta,
            }),
            _ => None,
        }
    }

    /// Projects the prior pair onto the line `accel = bias + beta·effort`.
    ///
    /// This is the minimum-norm correction of `(bias, beta)` that explains the
    /// measured acceleration exactly. A non-finite measurement leaves the
    /// estimate unchanged.
    pub fn update(&mut self, effort: f64, measured_accel: f64) {
        if !measured_accel.is_finite() || !effort.is_finite() {
            return;
        }
        let u2 = effort * effort;
        let denom = u2 + 1.0;
        let bias = (self.bias * u2 - self.beta * effort + measured_accel) / denom;
        let beta = (self.beta - self.bias * effort + measured_accel * effort) / denom;
        self.bias = bias;
        self.beta = beta;
    }
}

/// State transition `A(dt, u)`. The effort column only exists for `N == 4`.
pub fn transition<const N: usize>(dt: f64, effort: f64) -> SMatrix<f64, N, N> {
    let mut a = SMatrix::<f64, N, N>::identity();
    a[(0, 1)] = dt;
    a[(0, 2)] = 0.5 * dt * dt;
    a[(1, 2)] = dt;
    if N > 3 {
        a[(0, 3)] = 0.5 * dt * dt * effort;
        a[(1, 3)] = dt * effort;
    }
    a
}

/// Measurement row `H = [1, 0, 0, ...]`.
fn measurement_row<const N: usize>() -> SMatrix<f64, 1, N> {
    let mut h = SMatrix::<f64, 1, N>::zeros();
    h[(0, 0)] = 1.0;
    h
}

/// Noise and input for one filter cycle.
#[derive(Clone, Copy, Debug)]
pub struct CycleInput {
    pub dt: f64,
    /// Effort applied since the last cycle.
    pub effort: f64,
    /// Known effectiveness for the 3-state form; ignored for 4 states.
    pub fixed_beta: f64,
    pub process_noise: f64,
    pub measurement_variance: f64,
}

/// One predict/correct cycle. Returns the innovation, or `None` when the
/// measurement was not finite and only the prediction was applied.
pub fn kalman_step<const N: usize>(
    filter: &mut Disturbance<N>,
    input: &CycleInput,
    measurement: f64,
) -> Option<f64> {
    let dt = input.dt;
    let a = transition::<N>(dt, input.effort);

    // Known input for the fixed-beta form
    let mut b = SVector::<f64, N>::zeros();
    if N == 3 {
        let drive = input.fixed_beta * input.effort;
        b[0] = 0.5 * dt * dt * drive;
        b[1] = dt * drive;
    }

    let predicted = a * filter.state + b;
    let q = SMatrix::<f64, N, N>::identity() * input.process_noise;
    let p_minus = a * filter.covariance * a.transpose() + q;

    if !measurement.is_finite() {
        filter.state = predicted;
        filter.covariance = p_minus;
        covariance::sanitize(&mut filter.covariance);
        return None;
    }

    let h = measurement_row::<N>();
    let s = (h * p_minus * h.transpose())[(0, 0)] + input.measurement_variance;
    let k = p_minus * h.transpose() / s;
    let innovation = measurement - predicted[0];

    filter.state = predicted + k * innovation;
    filter.covariance = (SMatrix::<f64, N, N>::identity() - k * h) * p_minus;
    covariance::sanitize(&mut filter.covariance);

    Some(innovation)
}

/// Runs the estimator of `axis` on one scalar measurement.
///
/// The effort fed to the model is the axis's effort from the previous cycle.
/// The covariance safeguard runs on every call, including calls with a
/// non-finite measurement, which skip the correction.
pub fn predict_and_correct(axis: &mut AxisState, measurement: f64, dt: f64) {
    let fixed_beta = match axis.effectiveness {
        EffectivenessModel::Fixed { beta } => beta,
        _ => 0.0,
    };
    let input = CycleInput {
        dt,
        effort: axis.control_effort_model_free,
        fixed_beta,
        process_noise: axis.process_noise,
        measurement_variance: axis.measurement_variance,
    };

    let innovation = match &mut axis.disturbance {
        DisturbanceEstimate::Order3(filter) => kalman_step(filter, &input, measurement),
        DisturbanceEstimate::Order4(filter) => kalman_step(filter, &input, measurement),
    };

    match innovation {
        Some(innovation) => {
            log::trace!("{} innovation {innovation:.6}", axis.role.name());
            axis.last_innovation = innovation;
        }
        None => {
            log::warn!(
                "{} measurement {measurement} is not finite, correction skipped",
                axis.role.name()
            );
        }
    }
}

/// Updates the algebraic dual estimate of `axis`, if it has one, with the
/// measured acceleration and the previous effort.
pub fn update_dual(axis: &mut AxisState, measured_accel: f64) {
    let effort = axis.control_effort_model_free;
    if let Some(dual) = axis.dual.as_mut() {
        dual.update(effort, measured_accel);
    }
}
