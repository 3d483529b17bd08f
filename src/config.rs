use crate::actuator::ThrustMap;
use crate::axis::AxisRole;
use crate::error::{MfcError, MfcResult};
use serde::{Deserialize, Serialize};

/// How an axis obtains its control effectiveness (beta).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectivenessModel {
    /// Constant beta, fed to a 3-state filter as a known input.
    Fixed { beta: f64 },
    /// Beta is the 4th Kalman state.
    Estimated { initial_beta: f64 },
    /// Closed-form (bias, beta) projection on the measured acceleration.
    /// The 4-state filter still runs alongside for monitoring.
    AlgebraicDual {
        initial_bias: f64,
        initial_beta: f64,
        kalman_initial_beta: f64,
    },
}

impl EffectivenessModel {
    /// Number of Kalman states the model needs.
    pub fn filter_order(&self) -> usize {
        match self {
            EffectivenessModel::Fixed { .. } => 3,
            _ => 4,
        }
    }
}

/// Saturation range applied to the normalized effort.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EffortLimits {
    /// `None` leaves the effort unbounded below.
    pub min: Option<f64>,
    pub max: f64,
}

impl EffortLimits {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max,
        }
    }

    pub fn upper(max: f64) -> Self {
        Self { min: None, max }
    }

    pub fn clamp(&self, effort: f64) -> f64 {
        let upper = effort.min(self.max);
        match self.min {
            Some(min) => upper.max(min),
            None => upper,
        }
    }
}

/// Outlier rejection and low-pass blend on the desired second derivative.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFilter {
    /// Inputs with a larger magnitude are replaced by the previous output.
    pub threshold: f64,
    /// Weight of the raw input, `lpf` in `lpf * raw + (1 - lpf) * previous`.
    pub blend: f64,
}

impl Default for ReferenceFilter {
    fn default() -> Self {
        Self {
            threshold: 2.5,
            blend: 1.0,
        }
    }
}

/// Static description of one controlled degree of freedom.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    pub role: AxisRole,
    pub kp: f64,
    pub kd: f64,
    pub effectiveness: EffectivenessModel,
    /// Diagonal entry of the process noise covariance Q.
    pub process_noise: f64,
    /// Sensor standard deviation; R is its square.
    pub measurement_std: f64,
    pub limits: EffortLimits,
    pub reference_filter: Option<ReferenceFilter>,
    /// Start value of the acceleration-bias state.
    pub initial_bias: f64,
}

impl AxisConfig {
    fn new(role: AxisRole, kp: f64, kd: f64, beta: f64, limits: EffortLimits) -> Self {
        Self {
            role,
            kp,
            kd,
            effectiveness: EffectivenessModel::Fixed { beta },
            process_noise: 0.1,
            measurement_std: 0.00025,
            limits,
            reference_filter: None,
            initial_bias: -1e-6,
        }
    }

    pub fn measurement_variance(&self) -> f64 {
        self.measurement_std * self.measurement_std
    }

    pub fn validate(&self) -> MfcResult<()> {
        let name = self.role.name();
        let finite = [
            ("kp", self.kp),
            ("kd", self.kd),
            ("process_noise", self.process_noise),
            ("measurement_std", self.measurement_std),
            ("initial_bias", self.initial_bias),
            ("limits.max", self.limits.max),
        ];
        for (field, value) in finite {
            if !value.is_finite() {
                return Err(MfcError::config(
                    format!("{name}.{field}"),
                    format!("{value} is not a finite number"),
                ));
            }
        }
        if self.process_noise < 0.0 {
            return Err(MfcError::config(
                format!("{name}.process_noise"),
                "must not be negative",
            ));
        }
        if self.measurement_std <= 0.0 {
            return Err(MfcError::config(
                format!("{name}.measurement_std"),
                "must be positive",
            ));
        }
        if let Some(min) = self.limits.min {
            if !min.is_finite() || min > self.limits.max {
                return Err(MfcError::config(
                    format!("{name}.limits"),
                    format!("min {min} must be finite and not above max {}", self.limits.max),
                ));
            }
        }
        if let Some(filter) = self.reference_filter {
            if !(0.0..=1.0).contains(&filter.blend) || !(filter.threshold > 0.0) {
                return Err(MfcError::config(
                    format!("{name}.reference_filter"),
                    "blend must lie in [0, 1] and threshold must be positive",
                ));
            }
        }
        let betas = match self.effectiveness {
            EffectivenessModel::Fixed { beta } => vec![beta],
            EffectivenessModel::Estimated { initial_beta } => vec![initial_beta],
            EffectivenessModel::AlgebraicDual {
                initial_bias,
                initial_beta,
                kalman_initial_beta,
            } => vec![initial_bias, initial_beta, kalman_initial_beta],
        };
        if betas.iter().any(|b| !b.is_finite()) {
            return Err(MfcError::config(
                format!("{name}.effectiveness"),
                "values must be finite",
            ));
        }
        Ok(())
    }
}

/// Scheduler rates in Hz. Sub-rates must divide the main loop rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopRates {
    pub main_hz: u32,
    pub control_hz: u32,
    pub attitude_hz: u32,
}

impl Default for LoopRates {
    fn default() -> Self {
        Self {
            main_hz: 1000,
            control_hz: 100,
            attitude_hz: 500,
        }
    }
}

impl LoopRates {
    pub fn control_dt(&self) -> f64 {
        1.0 / self.control_hz as f64
    }

    pub fn attitude_dt(&self) -> f64 {
        1.0 / self.attitude_hz as f64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CascadeVariant {
    /// Vertical axis only; roll/pitch come from the setpoint.
    AltitudeOnly,
    /// Vertical plus horizontal axes rotated into roll/pitch setpoints.
    Full,
}

/// Minimum magnitudes substituted before dividing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Guards {
    pub min_effectiveness: f64,
    pub min_vertical_effort: f64,
}

impl Default for Guards {
    fn default() -> Self {
        Self {
            min_effectiveness: 1e-3,
            min_vertical_effort: 1e-3,
        }
    }
}

/// Frame conventions of the host vehicle.
///
/// The default inverts all three signals, for firmware whose pitch axis
/// points the other way from a right-handed body frame. Use
/// [`SignConvention::right_handed`] for plants such as [`crate::sim::Quadrotor`]
/// where positive pitch tilts thrust toward +x and positive torques raise
/// the body rates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignConvention {
    /// Negate the derived pitch setpoint.
    pub invert_pitch_setpoint: bool,
    /// Negate the measured pitch rate before the rate loop.
    pub invert_pitch_rate: bool,
    /// Negate the yaw actuator output.
    pub invert_yaw_output: bool,
}

impl Default for SignConvention {
    fn default() -> Self {
        Self {
            invert_pitch_setpoint: true,
            invert_pitch_rate: true,
            invert_yaw_output: true,
        }
    }
}

impl SignConvention {
    /// No inversions: setpoints, gyro and outputs share one right-handed frame.
    pub fn right_handed() -> Self {
        Self {
            invert_pitch_setpoint: false,
            invert_pitch_rate: false,
            invert_yaw_output: false,
        }
    }
}

/// Complete controller configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MfcConfig {
    pub rates: LoopRates,
    pub variant: CascadeVariant,
    pub estimate_attitude_axes: bool,
    pub axes: Vec<AxisConfig>,
    pub thrust_map: ThrustMap,
    /// Altitude below which both setpoint and measurement count as landed (m).
    pub ground_threshold: f64,
    /// Roll/pitch setpoint limit (rad).
    pub tilt_limit: f64,
    pub guards: Guards,
    /// Largest allowed gap between desired and measured yaw in velocity mode
    /// (rad). Zero disables the limit.
    pub yaw_max_delta: f64,
    pub signs: SignConvention,
}

impl Default for MfcConfig {
    fn default() -> Self {
        Self::full_cascade()
    }
}

impl MfcConfig {
    fn base(variant: CascadeVariant, axes: Vec<AxisConfig>) -> Self {
        Self {
            rates: LoopRates::default(),
            variant,
            estimate_attitude_axes: false,
            axes,
            thrust_map: ThrustMap::default(),
            ground_threshold: 0.06,
            tilt_limit: 30.0_f64.to_radians(),
            guards: Guards::default(),
            yaw_max_delta: 0.0,
            signs: SignConvention::default(),
        }
    }

    /// Vertical axis only with a fixed beta and a 3-state filter.
    pub fn altitude() -> Self {
        let mut z = AxisConfig::new(AxisRole::Thrust, 38.0, 11.0, 25.0, EffortLimits::new(0.0, 3.0));
        z.measurement_std = 0.0025;
        z.reference_filter = Some(ReferenceFilter::default());
        Self::base(CascadeVariant::AltitudeOnly, vec![z])
    }

    /// Vertical axis only with online effectiveness estimation.
    pub fn beta_estimating() -> Self {
        let mut z = AxisConfig::new(AxisRole::Thrust, 31.0, 17.0, 55.0, EffortLimits::new(0.0, 2.5));
        z.effectiveness = EffectivenessModel::AlgebraicDual {
            initial_bias: -6.0,
            initial_beta: 57.0,
            kalman_initial_beta: 37.0,
        };
        z.process_noise = 1e-6;
        z.measurement_std = 4e-3;
        Self::base(CascadeVariant::AltitudeOnly, vec![z])
    }

    /// Vertical, horizontal and attitude axes, all with 3-state filters.
    pub fn full_cascade() -> Self {
        let mut z = AxisConfig::new(AxisRole::Thrust, 38.0, 11.0, 40.0, EffortLimits::new(0.0, 3.0));
        z.reference_filter = Some(ReferenceFilter::default());

        let lateral = EffortLimits::upper(3.0);
        let rotational = |role| {
            let mut axis = AxisConfig::new(role, 7.0, 5.0, 140.0, lateral);
            axis.reference_filter = Some(ReferenceFilter::default());
            axis
        };
        let mut yaw = AxisConfig::new(AxisRole::Yaw, 38.0, 11.0, 40.0, lateral);
        yaw.reference_filter = Some(ReferenceFilter::default());

        let mut config = Self::base(
            CascadeVariant::Full,
            vec![
                z,
                AxisConfig::new(AxisRole::HorizontalX, 7.0, 5.0, 140.0, lateral),
                AxisConfig::new(AxisRole::HorizontalY, 7.0, 5.0, 140.0, lateral),
                rotational(AxisRole::Roll),
                rotational(AxisRole::Pitch),
                yaw,
            ],
        );
        config.estimate_attitude_axes = true;
        config
    }

    pub fn axis(&self, role: AxisRole) -> Option<&AxisConfig> {
        self.axes.iter().find(|axis| axis.role == role)
    }

    pub fn axis_mut(&mut self, role: AxisRole) -> Option<&mut AxisConfig> {
        self.axes.iter_mut().find(|axis| axis.role == role)
    }

    pub fn from_json(text: &str) -> MfcResult<Self> {
        let config: MfcConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> MfcResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> MfcResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks rates, limits and the axis set required by the chosen variant.
    pub fn validate(&self) -> MfcResult<()> {
        let rates = self.rates;
        for (field, hz) in [
            ("rates.main_hz", rates.main_hz),
            ("rates.control_hz", rates.control_hz),
            ("rates.attitude_hz", rates.attitude_hz),
        ] {
            if hz == 0 {
                return Err(MfcError::config(field, "rate must be positive"));
            }
        }
        for (field, hz) in [
            ("rates.control_hz", rates.control_hz),
            ("rates.attitude_hz", rates.attitude_hz),
        ] {
            if hz > rates.main_hz || rates.main_hz % hz != 0 {
                return Err(MfcError::config(
                    field,
                    format!("{hz} Hz does not divide the {} Hz main loop", rates.main_hz),
                ));
            }
        }

        for (i, axis) in self.axes.iter().enumerate() {
            axis.validate()?;
            if self.axes[..i].iter().any(|other| other.role == axis.role) {
                return Err(MfcError::config(axis.role.name(), "axis configured twice"));
            }
        }

        let mut required = vec![AxisRole::Thrust];
        if self.variant == CascadeVariant::Full {
            required.extend([AxisRole::HorizontalX, AxisRole::HorizontalY]);
        }
        if self.estimate_attitude_axes {
            required.extend([AxisRole::Roll, AxisRole::Pitch, AxisRole::Yaw]);
        }
        for role in required {
            if self.axis(role).is_none() {
                return Err(MfcError::config(role.name(), "axis is required but missing"));
            }
        }

        self.thrust_map.validate()?;

        if !(self.ground_threshold.is_finite() && self.ground_threshold >= 0.0) {
            return Err(MfcError::config("ground_threshold", "must be a non-negative number"));
        }
        if !(self.tilt_limit > 0.0 && self.tilt_limit <= std::f64::consts::FRAC_PI_2) {
            return Err(MfcError::config("tilt_limit", "must lie in (0, pi/2]"));
        }
        if !(self.guards.min_effectiveness > 0.0 && self.guards.min_vertical_effort > 0.0) {
            return Err(MfcError::config("guards", "floors must be positive"));
        }
        if !(self.yaw_max_delta.is_finite() && self.yaw_max_delta >= 0.0) {
            return Err(MfcError::config("yaw_max_delta", "must be a non-negative number"));
        }
        Ok(())
    }
}
