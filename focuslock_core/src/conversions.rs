//! `From` implementations bridging `focuslock_config` types to `focuslock_core` types.

use crate::calibration::{CalibrationSample, FitOptions, QualityThresholds};
use crate::config::AutofocusConfig;
use crate::metric::Roi;
use crate::sweep::SweepPlan;

impl From<&focuslock_config::RoiCfg> for Roi {
    fn from(c: &focuslock_config::RoiCfg) -> Self {
        Self::new(c.x, c.y, c.width, c.height)
    }
}

impl From<&focuslock_config::Config> for AutofocusConfig {
    fn from(c: &focuslock_config::Config) -> Self {
        Self {
            roi: Roi::from(&c.roi),
            loop_hz: c.control.loop_hz,
            kp: c.control.kp,
            ki: c.control.ki,
            max_step_um: c.control.max_step_um,
            integral_limit_um: c.control.integral_limit_um,
            stage_min_um: c.limits.stage_min_um,
            stage_max_um: c.limits.stage_max_um,
            max_abs_excursion_um: c.limits.effective_excursion_um(),
            min_roi_intensity: c.guards.min_roi_intensity,
            error_alpha: c.control.error_alpha,
            edge_margin_px: c.guards.edge_margin_px,
        }
    }
}

impl From<&focuslock_config::CalibrationCfg> for FitOptions {
    fn from(c: &focuslock_config::CalibrationCfg) -> Self {
        Self {
            robust: c.robust,
            outlier_threshold_um: c.outlier_threshold_um,
        }
    }
}

impl From<&focuslock_config::QualityCfg> for QualityThresholds {
    fn from(c: &focuslock_config::QualityCfg) -> Self {
        Self {
            min_abs_corr: c.min_abs_corr,
            min_error_span: c.min_error_span,
            focus_margin_fraction: c.focus_margin_fraction,
            max_bidirectional_hysteresis: c.max_bidirectional_hysteresis,
            z_bucket_decimals: c.z_bucket_decimals,
        }
    }
}

impl From<focuslock_config::CalibrationRow> for CalibrationSample {
    fn from(r: focuslock_config::CalibrationRow) -> Self {
        Self::new(r.z_um, r.error, r.weight)
    }
}

impl From<CalibrationSample> for focuslock_config::CalibrationRow {
    fn from(s: CalibrationSample) -> Self {
        Self {
            z_um: s.z_um,
            error: s.error,
            weight: s.weight,
        }
    }
}

impl SweepPlan {
    /// Sweep centred on `center_um` using the configured range and step count.
    pub fn from_config(c: &focuslock_config::SweepCfg, center_um: f64) -> Self {
        let mut plan = Self::centered(center_um, c.half_range_um, c.steps);
        plan.bidirectional = c.bidirectional;
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_excursion_in_file_disables_clamp() {
        let cfg = focuslock_config::load_toml("[limits]\nmax_abs_excursion_um = -1.0\n").unwrap();
        let af = AutofocusConfig::from(&cfg);
        assert_eq!(af.max_abs_excursion_um, None);
        af.validate().unwrap();
    }

    #[test]
    fn defaults_line_up() {
        let cfg = focuslock_config::Config::default();
        assert_eq!(AutofocusConfig::from(&cfg), AutofocusConfig::default());
        assert_eq!(QualityThresholds::from(&cfg.quality), QualityThresholds::default());
        let plan = SweepPlan::from_config(&cfg.sweep, 1.0);
        assert_eq!(plan.n_steps, 21);
        assert!((plan.z_min_um - 0.25).abs() < 1e-12);
        assert!((plan.z_max_um - 1.75).abs() < 1e-12);
    }
}
