//! Named, typed access to controller parameters and telemetry.
//!
//! A [`ParamRegistry`] is a table of getters (and optional setters) over some
//! target type. It holds no reference to the target; every read or write
//! takes the target explicitly, so the controller stays the sole owner of its
//! state.

use crate::attitude::AttitudeLoop;
use crate::axis::{AxisRole, AxisState};
use crate::cascade::{CascadeController, ControllerMode};
use crate::config::EffectivenessModel;
use crate::error::{MfcError, MfcResult};
use std::collections::BTreeMap;

type Getter<T> = Box<dyn Fn(&T) -> f64>;
type Setter<T> = Box<dyn Fn(&mut T, f64) -> bool>;

struct Entry<T> {
    name: String,
    get: Getter<T>,
    set: Option<Setter<T>>,
}

pub struct ParamRegistry<T> {
    entries: Vec<Entry<T>>,
}

impl<T> Default for ParamRegistry<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> ParamRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_readonly(
        &mut self,
        name: impl Into<String>,
        get: impl Fn(&T) -> f64 + 'static,
    ) -> &mut Self {
        self.insert(name.into(), Box::new(get), None)
    }

    /// Registers a writable parameter. The setter returns false to reject a
    /// value, which surfaces as [`MfcError::InvalidValue`].
    pub fn register_tunable(
        &mut self,
        name: impl Into<String>,
        get: impl Fn(&T) -> f64 + 'static,
        set: impl Fn(&mut T, f64) -> bool + 'static,
    ) -> &mut Self {
        self.insert(name.into(), Box::new(get), Some(Box::new(set)))
    }

    fn insert(&mut self, name: String, get: Getter<T>, set: Option<Setter<T>>) -> &mut Self {
        self.entries.retain(|entry| entry.name != name);
        self.entries.push(Entry { name, get, set });
        self
    }

    fn entry(&self, name: &str) -> MfcResult<&Entry<T>> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| MfcError::UnknownParameter(name.to_string()))
    }

    pub fn get(&self, target: &T, name: &str) -> MfcResult<f64> {
        Ok((self.entry(name)?.get)(target))
    }

    pub fn set(&self, target: &mut T, name: &str, value: f64) -> MfcResult<()> {
        let entry = self.entry(name)?;
        let set = entry
            .set
            .as_ref()
            .ok_or_else(|| MfcError::ReadOnlyParameter(name.to_string()))?;
        let invalid = || MfcError::InvalidValue {
            name: name.to_string(),
            value,
        };
        if !value.is_finite() || !set(target, value) {
            return Err(invalid());
        }
        Ok(())
    }

    pub fn is_tunable(&self, name: &str) -> bool {
        self.entry(name).is_ok_and(|entry| entry.set.is_some())
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every parameter's current value, ordered by name.
    pub fn snapshot(&self, target: &T) -> BTreeMap<String, f64> {
        self.entries
            .iter()
            .map(|entry| (entry.name.clone(), (entry.get)(target)))
            .collect()
    }
}

fn axis_value<L: AttitudeLoop>(
    controller: &CascadeController<L>,
    role: AxisRole,
    read: impl Fn(&AxisState) -> f64,
) -> f64 {
    controller.axis(role).map(read).unwrap_or(f64::NAN)
}

fn with_axis<L: AttitudeLoop>(
    controller: &mut CascadeController<L>,
    role: AxisRole,
    write: impl FnOnce(&mut AxisState) -> bool,
) -> bool {
    controller.axis_mut(role).is_some_and(write)
}

impl<L: AttitudeLoop + 'static> CascadeController<L> {
    /// Builds the parameter table for the axes this controller runs.
    ///
    /// Per axis: read-only `<axis>.F1..F3`, `.beta_est` (4-state filters),
    /// `.P00..P22` (plus `.P33`), `.u_c`, `.u_mfc`, `.innovation`, and for
    /// dual models `.dual_bias`/`.dual_beta`; tunable `.kp`, `.kd`, `.beta`
    /// (fixed models) and `.lpf` (filtered references). Controller level:
    /// read-only `thrust.command`, `attitude.roll_d`, `attitude.pitch_d`,
    /// `attitude.yaw_d` and `mode` (1 active, 0 grounded).
    pub fn registry(&self) -> ParamRegistry<Self> {
        let mut registry = ParamRegistry::new();

        for axis in self.axes() {
            let role = axis.role();
            let prefix = role.name();

            for i in 0..3 {
                registry.register_readonly(format!("{prefix}.F{}", i + 1), move |c: &Self| {
                    axis_value(c, role, |a| a.disturbance().state()[i])
                });
            }
            if axis.disturbance().order() == 4 {
                registry.register_readonly(format!("{prefix}.beta_est"), move |c: &Self| {
                    axis_value(c, role, |a| a.disturbance().beta().unwrap_or(f64::NAN))
                });
            }
            for i in 0..axis.disturbance().order() {
                registry.register_readonly(format!("{prefix}.P{i}{i}"), move |c: &Self| {
                    axis_value(c, role, |a| a.disturbance().covariance_entry(i, i))
                });
            }
            registry
                .register_readonly(format!("{prefix}.u_c"), move |c: &Self| {
                    axis_value(c, role, AxisState::control_effort_feedback)
                })
                .register_readonly(format!("{prefix}.u_mfc"), move |c: &Self| {
                    axis_value(c, role, AxisState::control_effort_model_free)
                })
                .register_readonly(format!("{prefix}.innovation"), move |c: &Self| {
                    axis_value(c, role, AxisState::last_innovation)
                });
            if axis.dual().is_some() {
                registry
                    .register_readonly(format!("{prefix}.dual_bias"), move |c: &Self| {
                        axis_value(c, role, |a| a.dual().map_or(f64::NAN, |d| d.bias))
                    })
                    .register_readonly(format!("{prefix}.dual_beta"), move |c: &Self| {
                        axis_value(c, role, |a| a.dual().map_or(f64::NAN, |d| d.beta))
                    });
            }

            registry
                .register_tunable(
                    format!("{prefix}.kp"),
                    move |c: &Self| axis_value(c, role, |a| a.feedback_gain_kp),
                    move |c: &mut Self, v| {
                        with_axis(c, role, |a| {
                            a.feedback_gain_kp = v;
                            true
                        })
                    },
                )
                .register_tunable(
                    format!("{prefix}.kd"),
                    move |c: &Self| axis_value(c, role, |a| a.feedback_gain_kd),
                    move |c: &mut Self, v| {
                        with_axis(c, role, |a| {
                            a.feedback_gain_kd = v;
                            true
                        })
                    },
                );
            if matches!(axis.effectiveness_model(), EffectivenessModel::Fixed { .. }) {
                registry.register_tunable(
                    format!("{prefix}.beta"),
                    move |c: &Self| axis_value(c, role, |a| a.control_model().1),
                    move |c: &mut Self, v| with_axis(c, role, |a| a.set_fixed_beta(v)),
                );
            }
            if axis.reference_blend().is_some() {
                registry.register_tunable(
                    format!("{prefix}.lpf"),
                    move |c: &Self| axis_value(c, role, |a| a.reference_blend().unwrap_or(f64::NAN)),
                    move |c: &mut Self, v| {
                        (0.0..=1.0).contains(&v) && with_axis(c, role, |a| a.set_reference_blend(v))
                    },
                );
            }
        }

        registry
            .register_readonly("thrust.command", |c: &Self| c.thrust_command() as f64)
            .register_readonly("attitude.roll_d", |c: &Self| c.attitude_setpoint().x)
            .register_readonly("attitude.pitch_d", |c: &Self| c.attitude_setpoint().y)
            .register_readonly("attitude.yaw_d", |c: &Self| c.desired_yaw())
            .register_readonly("mode", |c: &Self| match c.mode() {
                ControllerMode::Active => 1.0,
                ControllerMode::Ground => 0.0,
            });
        registry
    }
}
