//! Runtime configuration of the control loop.

use crate::error::BuildError;
use crate::metric::Roi;

/// Control-loop parameters, validated once when a controller is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutofocusConfig {
    pub roi: Roi,
    /// Loop rate in Hz; also sets the nominal `dt` of a step.
    pub loop_hz: f64,
    /// Proportional gain (um of command per um of error).
    pub kp: f64,
    /// Integral gain (um of command per um*s of accumulated error).
    pub ki: f64,
    /// Per-step correction clamp (um).
    pub max_step_um: f64,
    /// Anti-windup clamp on the integral state (um*s).
    pub integral_limit_um: f64,
    pub stage_min_um: Option<f64>,
    pub stage_max_um: Option<f64>,
    /// Clamp around the Z where the lock engaged, to stop runaway jumps.
    pub max_abs_excursion_um: Option<f64>,
    /// Freeze control when ROI intensity drops below this (target lost).
    pub min_roi_intensity: Option<f64>,
    /// EMA weight of the previous filtered error. 0 disables filtering.
    pub error_alpha: f64,
    /// Freeze control when the centroid is this close to the ROI border. 0 disables.
    pub edge_margin_px: f64,
}

impl Default for AutofocusConfig {
    fn default() -> Self {
        Self {
            roi: Roi::default(),
            loop_hz: 30.0,
            kp: 0.6,
            ki: 0.15,
            max_step_um: 0.25,
            integral_limit_um: 2.0,
            stage_min_um: None,
            stage_max_um: None,
            max_abs_excursion_um: Some(5.0),
            min_roi_intensity: None,
            error_alpha: 0.0,
            edge_margin_px: 0.0,
        }
    }
}

impl AutofocusConfig {
    pub fn with_roi(roi: Roi) -> Self {
        Self {
            roi,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if !(self.loop_hz.is_finite() && self.loop_hz > 0.0) {
            return Err(BuildError::InvalidConfig("loop_hz must be > 0"));
        }
        if self.max_step_um.is_nan() || self.max_step_um < 0.0 {
            return Err(BuildError::InvalidConfig("max_step_um must be >= 0"));
        }
        if self.integral_limit_um.is_nan() || self.integral_limit_um < 0.0 {
            return Err(BuildError::InvalidConfig("integral_limit_um must be >= 0"));
        }
        if !(0.0..=1.0).contains(&self.error_alpha) {
            return Err(BuildError::InvalidConfig("error_alpha must be in [0.0, 1.0]"));
        }
        if self.edge_margin_px.is_nan() || self.edge_margin_px < 0.0 {
            return Err(BuildError::InvalidConfig("edge_margin_px must be >= 0"));
        }
        if self.max_abs_excursion_um.is_some_and(|v| v.is_nan() || v < 0.0) {
            return Err(BuildError::InvalidConfig(
                "max_abs_excursion_um must be >= 0 when provided",
            ));
        }
        if !(self.kp.is_finite() && self.ki.is_finite()) {
            return Err(BuildError::InvalidConfig("kp and ki must be finite"));
        }
        Ok(())
    }
}
