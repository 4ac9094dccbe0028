#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and calibration sample persistence for the autofocus system.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//!   Every section is optional; omitted fields take the documented defaults.
//! - Calibration sweep samples are stored as CSV (`z_um,error,weight`).
mod samples;

pub use samples::{CalibrationRow, load_calibration_samples_csv, save_calibration_samples_csv};

use serde::Deserialize;

/// ROI in image pixels, origin top-left.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct RoiCfg {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Default for RoiCfg {
    fn default() -> Self {
        Self {
            x: 20,
            y: 20,
            width: 24,
            height: 24,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ControlCfg {
    /// Control loop rate (Hz)
    pub loop_hz: f64,
    pub kp: f64,
    pub ki: f64,
    /// Largest correction applied in a single step (um)
    pub max_step_um: f64,
    /// Anti-windup clamp on the integral term (um*s)
    pub integral_limit_um: f64,
    /// EMA smoothing of the physical error; 0 disables.
    pub error_alpha: f64,
    /// Integral state at construction.
    pub initial_integral_um: f64,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            loop_hz: 30.0,
            kp: 0.6,
            ki: 0.15,
            max_step_um: 0.25,
            integral_limit_um: 2.0,
            error_alpha: 0.0,
            initial_integral_um: 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct LimitsCfg {
    pub stage_min_um: Option<f64>,
    pub stage_max_um: Option<f64>,
    /// Max distance from the Z where the lock engaged. A negative value disables the clamp.
    pub max_abs_excursion_um: Option<f64>,
}

impl Default for LimitsCfg {
    fn default() -> Self {
        Self {
            stage_min_um: None,
            stage_max_um: None,
            max_abs_excursion_um: Some(5.0),
        }
    }
}

impl LimitsCfg {
    /// Excursion clamp with the "negative disables" convention resolved.
    pub fn effective_excursion_um(&self) -> Option<f64> {
        self.max_abs_excursion_um.filter(|v| *v >= 0.0)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(default)]
pub struct GuardsCfg {
    /// Freeze control when ROI intensity drops below this.
    pub min_roi_intensity: Option<f64>,
    /// Freeze control when the PSF centroid is within this many pixels of the ROI edge; 0 disables.
    pub edge_margin_px: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CalibrationCfg {
    pub samples_csv: String,
    pub robust: bool,
    pub outlier_threshold_um: f64,
    /// Optical convention: error grows with Z when true.
    pub expected_positive_slope: bool,
    /// Fits below this R^2 are rejected at headless startup.
    pub min_r2: f64,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            samples_csv: "calibration_sweep.csv".to_string(),
            robust: true,
            outlier_threshold_um: 0.2,
            expected_positive_slope: true,
            min_r2: 0.9,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct QualityCfg {
    pub min_abs_corr: f64,
    pub min_error_span: f64,
    pub focus_margin_fraction: f64,
    pub max_bidirectional_hysteresis: f64,
    /// Decimal places used to pair up/down visits of the same Z.
    pub z_bucket_decimals: u32,
}

impl Default for QualityCfg {
    fn default() -> Self {
        Self {
            min_abs_corr: 0.2,
            min_error_span: 0.01,
            focus_margin_fraction: 0.1,
            max_bidirectional_hysteresis: 0.02,
            z_bucket_decimals: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SweepCfg {
    /// Sweep spans center +/- this (um)
    pub half_range_um: f64,
    pub steps: usize,
    pub bidirectional: bool,
}

impl Default for SweepCfg {
    fn default() -> Self {
        Self {
            half_range_um: 0.75,
            steps: 21,
            bidirectional: true,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Run the control loop on the calling thread for a fixed duration.
    #[default]
    Timed,
    /// Run the loop on a background worker until interrupted or the duration elapses.
    Worker,
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(default)]
pub struct RunnerCfg {
    pub mode: RunMode,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub roi: RoiCfg,
    pub control: ControlCfg,
    pub limits: LimitsCfg,
    pub guards: GuardsCfg,
    pub calibration: CalibrationCfg,
    pub quality: QualityCfg,
    pub sweep: SweepCfg,
    pub logging: Logging,
    pub runner: RunnerCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file.
pub fn load_file(path: &std::path::Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {}: {}", path.display(), e))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {}: {}", path.display(), e))?;
    cfg.validate()?;
    Ok(cfg)
}

fn finite(name: &str, v: f64) -> eyre::Result<()> {
    if !v.is_finite() {
        eyre::bail!("{name} must be finite");
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // ROI
        if self.roi.width <= 0 || self.roi.height <= 0 {
            eyre::bail!("roi.width and roi.height must be > 0");
        }

        // Control
        let c = &self.control;
        for (name, v) in [
            ("control.loop_hz", c.loop_hz),
            ("control.kp", c.kp),
            ("control.ki", c.ki),
            ("control.max_step_um", c.max_step_um),
            ("control.integral_limit_um", c.integral_limit_um),
            ("control.error_alpha", c.error_alpha),
            ("control.initial_integral_um", c.initial_integral_um),
        ] {
            finite(name, v)?;
        }
        if c.loop_hz <= 0.0 {
            eyre::bail!("control.loop_hz must be > 0");
        }
        if c.max_step_um < 0.0 {
            eyre::bail!("control.max_step_um must be >= 0");
        }
        if c.integral_limit_um < 0.0 {
            eyre::bail!("control.integral_limit_um must be >= 0");
        }
        if !(0.0..=1.0).contains(&c.error_alpha) {
            eyre::bail!("control.error_alpha must be in [0.0, 1.0]");
        }

        // Limits
        if let (Some(lo), Some(hi)) = (self.limits.stage_min_um, self.limits.stage_max_um) {
            if lo > hi {
                eyre::bail!("limits.stage_min_um must be <= limits.stage_max_um");
            }
        }

        // Guards
        if self.guards.edge_margin_px < 0.0 {
            eyre::bail!("guards.edge_margin_px must be >= 0");
        }

        // Calibration
        if !(self.calibration.outlier_threshold_um.is_finite()
            && self.calibration.outlier_threshold_um > 0.0)
        {
            eyre::bail!("calibration.outlier_threshold_um must be > 0");
        }
        if !(0.0..=1.0).contains(&self.calibration.min_r2) {
            eyre::bail!("calibration.min_r2 must be in [0.0, 1.0]");
        }
        if self.calibration.samples_csv.trim().is_empty() {
            eyre::bail!("calibration.samples_csv must not be empty");
        }

        // Quality
        let q = &self.quality;
        if q.min_abs_corr < 0.0 || q.min_abs_corr > 1.0 {
            eyre::bail!("quality.min_abs_corr must be in [0.0, 1.0]");
        }
        if q.min_error_span < 0.0 {
            eyre::bail!("quality.min_error_span must be >= 0");
        }
        if q.focus_margin_fraction < 0.0 {
            eyre::bail!("quality.focus_margin_fraction must be >= 0");
        }
        if q.max_bidirectional_hysteresis < 0.0 {
            eyre::bail!("quality.max_bidirectional_hysteresis must be >= 0");
        }
        if q.z_bucket_decimals > 9 {
            eyre::bail!("quality.z_bucket_decimals must be <= 9");
        }

        // Sweep
        if self.sweep.steps < 2 {
            eyre::bail!("sweep.steps must be >= 2");
        }
        if !(self.sweep.half_range_um.is_finite() && self.sweep.half_range_um > 0.0) {
            eyre::bail!("sweep.half_range_um must be > 0");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref() {
            if !matches!(r, "never" | "daily" | "hourly") {
                eyre::bail!("logging.rotation must be one of never, daily, hourly");
            }
        }

        Ok(())
    }
}
