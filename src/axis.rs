use crate::config::{AxisConfig, EffectivenessModel, EffortLimits, ReferenceFilter};
use crate::covariance;
use crate::estimator::DualEstimate;
use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};

/// Which degree of freedom an axis controls, and so which downstream
/// mapping its effort feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisRole {
    Thrust,
    HorizontalX,
    HorizontalY,
    Roll,
    Pitch,
    Yaw,
}

impl AxisRole {
    pub const ALL: [AxisRole; 6] = [
        AxisRole::Thrust,
        AxisRole::HorizontalX,
        AxisRole::HorizontalY,
        AxisRole::Roll,
        AxisRole::Pitch,
        AxisRole::Yaw,
    ];

    /// Short name used in configuration errors and parameter names.
    pub fn name(&self) -> &'static str {
        match self {
            AxisRole::Thrust => "z",
            AxisRole::HorizontalX => "x",
            AxisRole::HorizontalY => "y",
            AxisRole::Roll => "roll",
            AxisRole::Pitch => "pitch",
            AxisRole::Yaw => "yaw",
        }
    }
}

/// Kalman state of one axis.
///
/// Index 0 is the observed position/angle, 1 its rate, 2 the lumped
/// acceleration bias, and in the 4-state form 3 the control effectiveness.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Disturbance<const N: usize> {
    pub state: SVector<f64, N>,
    pub covariance: SMatrix<f64, N, N>,
}

impl<const N: usize> Disturbance<N> {
    fn new(initial_bias: f64, initial_beta: f64) -> Self {
        let mut state = SVector::<f64, N>::zeros();
        state[2] = initial_bias;
        if N > 3 {
            state[3] = initial_beta;
        }
        Self {
            state,
            covariance: covariance::floored::<N>(),
        }
    }
}

/// Filter state of either order, chosen by the axis's effectiveness model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DisturbanceEstimate {
    Order3(Disturbance<3>),
    Order4(Disturbance<4>),
}

impl DisturbanceEstimate {
    pub fn for_model(model: &EffectivenessModel, initial_bias: f64) -> Self {
        match *model {
            EffectivenessModel::Fixed { .. } => {
                DisturbanceEstimate::Order3(Disturbance::new(initial_bias, 0.0))
            }
            EffectivenessModel::Estimated { initial_beta } => {
                DisturbanceEstimate::Order4(Disturbance::new(initial_bias, initial_beta))
            }
            EffectivenessModel::AlgebraicDual {
                kalman_initial_beta,
                ..
            } => DisturbanceEstimate::Order4(Disturbance::new(initial_bias, kalman_initial_beta)),
        }
    }

    pub fn order(&self) -> usize {
        match self {
            DisturbanceEstimate::Order3(_) => 3,
            DisturbanceEstimate::Order4(_) => 4,
        }
    }

    pub fn state(&self) -> &[f64] {
        match self {
            DisturbanceEstimate::Order3(d) => d.state.as_slice(),
            DisturbanceEstimate::Order4(d) => d.state.as_slice(),
        }
    }

    pub fn position(&self) -> f64 {
        self.state()[0]
    }

    pub fn rate(&self) -> f64 {
        self.state()[1]
    }

    /// Estimated acceleration bias (index 2).
    pub fn bias(&self) -> f64 {
        self.state()[2]
    }

    /// Estimated effectiveness, present only in the 4-state form.
    pub fn beta(&self) -> Option<f64> {
        self.state().get(3).copied()
    }

    pub fn covariance_entry(&self, i: usize, j: usize) -> f64 {
        match self {
            DisturbanceEstimate::Order3(d) => d.covariance[(i, j)],
            DisturbanceEstimate::Order4(d) => d.covariance[(i, j)],
        }
    }

    pub fn covariance_diagonal(&self) -> Vec<f64> {
        (0..self.order())
            .map(|i| self.covariance_entry(i, i))
            .collect()
    }

    pub fn covariance_within_bounds(&self, tolerance: f64) -> bool {
        match self {
            DisturbanceEstimate::Order3(d) => covariance::is_within_bounds(&d.covariance, tolerance),
            DisturbanceEstimate::Order4(d) => covariance::is_within_bounds(&d.covariance, tolerance),
        }
    }
}

/// Estimator and controller state of one axis.
///
/// Created once from an [`AxisConfig`] and only ever reset afterwards. The
/// estimator writes `disturbance`, the inversion law writes the efforts, and
/// the cascade is the only caller of [`AxisState::reset`].
#[derive(Clone, Debug)]
pub struct AxisState {
    pub(crate) role: AxisRole,
    pub(crate) disturbance: DisturbanceEstimate,
    pub(crate) dual: Option<DualEstimate>,
    pub(crate) effectiveness: EffectivenessModel,
    pub feedback_gain_kp: f64,
    pub feedback_gain_kd: f64,
    pub(crate) control_effort_feedback: f64,
    pub(crate) control_effort_model_free: f64,
    pub(crate) previous_reference_accel: f64,
    pub(crate) previous_setpoint: Option<f64>,
    pub(crate) previous_setpoint_rate: Option<f64>,
    pub(crate) last_innovation: f64,
    pub(crate) limits: EffortLimits,
    pub(crate) reference_filter: Option<ReferenceFilter>,
    pub(crate) process_noise: f64,
    pub(crate) measurement_variance: f64,
    initial_bias: f64,
}

impl AxisState {
    pub fn new(config: &AxisConfig) -> Self {
        Self {
            role: config.role,
            disturbance: DisturbanceEstimate::for_model(&config.effectiveness, config.initial_bias),
            dual: DualEstimate::for_model(&config.effectiveness),
            effectiveness: config.effectiveness,
            feedback_gain_kp: config.kp,
            feedback_gain_kd: config.kd,
            control_effort_feedback: 0.0,
            control_effort_model_free: 0.0,
            previous_reference_accel: 0.0,
            previous_setpoint: None,
            previous_setpoint_rate: None,
            last_innovation: 0.0,
            limits: config.limits,
            reference_filter: config.reference_filter,
            process_noise: config.process_noise,
            measurement_variance: config.measurement_variance(),
            initial_bias: config.initial_bias,
        }
    }

    /// Returns the axis to its start-up estimate with zero effort.
    ///
    /// Tuned gains, a tuned fixed beta and the reference blend survive. The
    /// algebraic (bias, beta) pair is kept as well, so what was learned in
    /// flight carries over to the next take-off.
    pub fn reset(&mut self) {
        self.disturbance = DisturbanceEstimate::for_model(&self.effectiveness, self.initial_bias);
        self.control_effort_feedback = 0.0;
        self.control_effort_model_free = 0.0;
        self.previous_reference_accel = 0.0;
        self.previous_setpoint = None;
        self.previous_setpoint_rate = None;
        self.last_innovation = 0.0;
    }

    pub fn role(&self) -> AxisRole {
        self.role
    }

    pub fn disturbance(&self) -> &DisturbanceEstimate {
        &self.disturbance
    }

    pub fn dual(&self) -> Option<&DualEstimate> {
        self.dual.as_ref()
    }

    pub fn effectiveness_model(&self) -> &EffectivenessModel {
        &self.effectiveness
    }

    /// The (bias, beta) pair the inversion law divides through, before the
    /// minimum-magnitude guard.
    pub fn control_model(&self) -> (f64, f64) {
        match self.effectiveness {
            EffectivenessModel::Fixed { beta } => (self.disturbance.bias(), beta),
            EffectivenessModel::Estimated { initial_beta } => (
                self.disturbance.bias(),
                self.disturbance.beta().unwrap_or(initial_beta),
            ),
            EffectivenessModel::AlgebraicDual {
                initial_bias,
                initial_beta,
                ..
            } => self
                .dual
                .map(|dual| (dual.bias, dual.beta))
                .unwrap_or((initial_bias, initial_beta)),
        }
    }

    /// Replaces a fixed beta. Returns false for estimated models.
    pub fn set_fixed_beta(&mut self, beta: f64) -> bool {
        match &mut self.effectiveness {
            EffectivenessModel::Fixed { beta: current } => {
                *current = beta;
                true
            }
            _ => false,
        }
    }

    pub fn reference_blend(&self) -> Option<f64> {
        self.reference_filter.map(|filter| filter.blend)
    }

    pub fn set_reference_blend(&mut self, blend: f64) -> bool {
        match &mut self.reference_filter {
            Some(filter) => {
                filter.blend = blend;
                true
            }
            None => false,
        }
    }

    /// Last PD tracking term `u_c`.
    pub fn control_effort_feedback(&self) -> f64 {
        self.control_effort_feedback
    }

    /// Last saturated normalized effort `u_mfc`.
    pub fn control_effort_model_free(&self) -> f64 {
        self.control_effort_model_free
    }

    pub fn previous_reference_accel(&self) -> f64 {
        self.previous_reference_accel
    }

    /// Innovation of the most recent correction.
    pub fn last_innovation(&self) -> f64 {
        self.last_innovation
    }

    pub fn limits(&self) -> EffortLimits {
        self.limits
    }
}
