//! Linear error-to-Z calibration and sweep diagnostics.
//!
//! The model is `z_um = slope * error + intercept`, stored as
//! `error_to_um = slope` and `error_at_focus = -intercept / slope`.
//!
//! Fits are computed in a Z frame centred on the weighted mean sample Z, so
//! `error_at_focus` is relative to that frame. This is exact for sweeps
//! symmetric about focus and slightly biased for strongly asymmetric ones;
//! the quality tolerances below assume this behaviour.

use std::collections::HashMap;

use crate::error::CalibrationError;

/// Maps astigmatic error to a physical Z offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusCalibration {
    pub error_at_focus: f64,
    pub error_to_um: f64,
}

impl FocusCalibration {
    /// Unit slope around zero error; used when no sweep data is available.
    pub const IDENTITY: Self = Self {
        error_at_focus: 0.0,
        error_to_um: 1.0,
    };

    pub fn new(error_at_focus: f64, error_to_um: f64) -> Self {
        Self {
            error_at_focus,
            error_to_um,
        }
    }

    #[inline]
    pub fn error_to_z_offset_um(&self, error: f64) -> f64 {
        (error - self.error_at_focus) * self.error_to_um
    }
}

/// One sweep measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSample {
    pub z_um: f64,
    pub error: f64,
    /// Relative confidence; negative values count as zero.
    pub weight: f64,
}

impl CalibrationSample {
    pub fn new(z_um: f64, error: f64, weight: f64) -> Self {
        Self {
            z_um,
            error,
            weight,
        }
    }

    #[inline]
    fn w(&self) -> f64 {
        self.weight.max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub robust: bool,
    /// Residual (um) beyond which a sample is treated as an outlier.
    pub outlier_threshold_um: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            robust: false,
            outlier_threshold_um: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitReport {
    pub calibration: FocusCalibration,
    pub intercept_um: f64,
    pub r2: f64,
    pub rmse_um: f64,
    pub n_samples: usize,
    pub n_inliers: usize,
    pub robust: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobustFit {
    pub slope: f64,
    pub intercept: f64,
    pub n_inliers: usize,
}

/// Weighted least squares `z = slope * error + intercept`.
pub fn fit_weighted(samples: &[CalibrationSample]) -> Result<(f64, f64), CalibrationError> {
    if samples.len() < 2 {
        return Err(CalibrationError::InsufficientSamples(samples.len()));
    }
    if samples.iter().any(|s| !(s.z_um.is_finite() && s.error.is_finite())) {
        return Err(CalibrationError::NonFinite);
    }
    let sum_w: f64 = samples.iter().map(CalibrationSample::w).sum();
    if sum_w <= 0.0 {
        return Err(CalibrationError::ZeroWeightMass);
    }
    let (mut sum_e, mut sum_z, mut sum_ee, mut sum_ez) = (0.0, 0.0, 0.0, 0.0);
    for s in samples {
        let w = s.w();
        sum_e += w * s.error;
        sum_z += w * s.z_um;
        sum_ee += w * s.error * s.error;
        sum_ez += w * s.error * s.z_um;
    }
    let denom = sum_w * sum_ee - sum_e * sum_e;
    if denom == 0.0 {
        return Err(CalibrationError::DegenerateSamples);
    }
    let slope = (sum_w * sum_ez - sum_e * sum_z) / denom;
    let intercept = (sum_z - slope * sum_e) / sum_w;
    if !(slope.is_finite() && intercept.is_finite()) {
        return Err(CalibrationError::NonFinite);
    }
    if slope == 0.0 {
        return Err(CalibrationError::ZeroSlope);
    }
    Ok((slope, intercept))
}

/// Chord through the pair of samples that minimises the median absolute residual.
///
/// Falls back to [`fit_weighted`] when no pair has distinct errors and a non-zero chord slope.
fn robust_seed(samples: &[CalibrationSample]) -> Result<(f64, f64), CalibrationError> {
    if samples.len() < 2 {
        return Err(CalibrationError::InsufficientSamples(samples.len()));
    }
    let mut best: Option<(f64, f64)> = None;
    let mut best_med = f64::INFINITY;
    let mut residuals = Vec::with_capacity(samples.len());
    for (i, a) in samples.iter().enumerate() {
        for b in &samples[i + 1..] {
            if b.error == a.error {
                continue;
            }
            let slope = (b.z_um - a.z_um) / (b.error - a.error);
            if slope == 0.0 {
                continue;
            }
            let intercept = a.z_um - slope * a.error;
            residuals.clear();
            residuals.extend(
                samples
                    .iter()
                    .map(|s| (s.z_um - (slope * s.error + intercept)).abs()),
            );
            residuals.sort_by(f64::total_cmp);
            let med = residuals[residuals.len() / 2];
            if med < best_med {
                best_med = med;
                best = Some((slope, intercept));
            }
        }
    }
    match best {
        Some(line) => Ok(line),
        None => fit_weighted(samples),
    }
}

fn inliers_of(
    samples: &[CalibrationSample],
    (slope, intercept): (f64, f64),
    threshold_um: f64,
) -> Vec<CalibrationSample> {
    samples
        .iter()
        .filter(|s| (s.z_um - (slope * s.error + intercept)).abs() <= threshold_um)
        .copied()
        .collect()
}

/// Seed with a pairwise median-residual search, then refit on the inliers.
///
/// With fewer than two inliers the plain weighted fit over all samples is kept.
pub fn fit_robust(
    samples: &[CalibrationSample],
    outlier_threshold_um: f64,
) -> Result<RobustFit, CalibrationError> {
    let (slope, intercept) = fit_weighted(samples)?;
    let seed = robust_seed(samples)?;
    let inliers = inliers_of(samples, seed, outlier_threshold_um);
    if inliers.len() >= 2 {
        let (slope, intercept) = fit_weighted(&inliers)?;
        return Ok(RobustFit {
            slope,
            intercept,
            n_inliers: inliers.len(),
        });
    }
    Ok(RobustFit {
        slope,
        intercept,
        n_inliers: samples.len(),
    })
}

fn weighted_z_reference(samples: &[CalibrationSample]) -> Result<f64, CalibrationError> {
    let sum_w: f64 = samples.iter().map(CalibrationSample::w).sum();
    if sum_w <= 0.0 {
        return Err(CalibrationError::ZeroWeightMass);
    }
    Ok(samples.iter().map(|s| s.w() * s.z_um).sum::<f64>() / sum_w)
}

pub fn fit_linear_calibration_with_report(
    samples: &[CalibrationSample],
    opts: FitOptions,
) -> Result<FitReport, CalibrationError> {
    if samples.len() < 2 {
        return Err(CalibrationError::InsufficientSamples(samples.len()));
    }
    let z_ref = weighted_z_reference(samples)?;
    let centered: Vec<CalibrationSample> = samples
        .iter()
        .map(|s| CalibrationSample::new(s.z_um - z_ref, s.error, s.weight))
        .collect();

    let (slope, intercept, n_inliers) = if opts.robust {
        let fit = fit_robust(&centered, opts.outlier_threshold_um)?;
        (fit.slope, fit.intercept, fit.n_inliers)
    } else {
        let (slope, intercept) = fit_weighted(&centered)?;
        (slope, intercept, centered.len())
    };

    let mut metric_set = centered.clone();
    if opts.robust && n_inliers < centered.len() {
        let inliers = inliers_of(&centered, robust_seed(&centered)?, opts.outlier_threshold_um);
        if inliers.len() >= 2 {
            metric_set = inliers;
        }
    }

    let weights: Vec<f64> = metric_set.iter().map(CalibrationSample::w).collect();
    let w_sum: f64 = weights.iter().sum();
    if w_sum <= 0.0 {
        return Err(CalibrationError::ZeroWeightMass);
    }
    let z_mean = metric_set
        .iter()
        .zip(&weights)
        .map(|(s, w)| w * s.z_um)
        .sum::<f64>()
        / w_sum;
    let (mut ss_res, mut ss_tot) = (0.0, 0.0);
    for (s, w) in metric_set.iter().zip(&weights) {
        let pred = slope * s.error + intercept;
        ss_res += w * (s.z_um - pred).powi(2);
        ss_tot += w * (s.z_um - z_mean).powi(2);
    }
    let r2 = if ss_tot == 0.0 {
        1.0
    } else {
        1.0 - ss_res / ss_tot
    };

    let report = FitReport {
        calibration: FocusCalibration::new(-intercept / slope, slope),
        intercept_um: intercept,
        r2,
        rmse_um: (ss_res / w_sum).sqrt(),
        n_samples: centered.len(),
        n_inliers,
        robust: opts.robust,
    };
    tracing::debug!(
        slope,
        error_at_focus = report.calibration.error_at_focus,
        r2,
        n_inliers,
        n_samples = report.n_samples,
        "calibration fit"
    );
    Ok(report)
}

pub fn fit_linear_calibration(
    samples: &[CalibrationSample],
    opts: FitOptions,
) -> Result<FocusCalibration, CalibrationError> {
    Ok(fit_linear_calibration_with_report(samples, opts)?.calibration)
}

/// Thresholds for [`quality_issues`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityThresholds {
    pub min_abs_corr: f64,
    pub min_error_span: f64,
    pub focus_margin_fraction: f64,
    pub max_bidirectional_hysteresis: f64,
    /// Z values are rounded to this many decimals to pair up/down visits.
    /// Values above [`MAX_Z_BUCKET_DECIMALS`] are treated as that maximum.
    pub z_bucket_decimals: u32,
}

/// Finest Z bucketing `quality_issues` applies (nanometre steps for µm input).
pub const MAX_Z_BUCKET_DECIMALS: u32 = 9;

impl Default for QualityThresholds {
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

fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.len() != ys.len() || xs.len() < 2 {
        return 0.0;
    }
    let n = xs.len() as f64;
    let xm = xs.iter().sum::<f64>() / n;
    let ym = ys.iter().sum::<f64>() / n;
    let var_x: f64 = xs.iter().map(|x| (x - xm).powi(2)).sum();
    let var_y: f64 = ys.iter().map(|y| (y - ym).powi(2)).sum();
    if var_x <= 0.0 || var_y <= 0.0 {
        return 0.0;
    }
    let cov: f64 = xs.iter().zip(ys).map(|(x, y)| (x - xm) * (y - ym)).sum();
    cov / (var_x * var_y).sqrt()
}

/// Advisory problems that make a sweep unsafe to control from.
///
/// An empty list means the sweep looks usable. Callers decide whether an
/// issue is a warning or a hard failure.
pub fn quality_issues(
    samples: &[CalibrationSample],
    report: &FitReport,
    t: &QualityThresholds,
) -> Vec<String> {
    if samples.len() < 2 {
        return vec!["need at least 2 samples".to_string()];
    }

    let errors: Vec<f64> = samples.iter().map(|s| s.error).collect();
    let zs: Vec<f64> = samples.iter().map(|s| s.z_um).collect();
    let min_err = errors.iter().copied().fold(f64::INFINITY, f64::min);
    let max_err = errors.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max_err - min_err;

    let mut issues = Vec::new();

    if span < t.min_error_span {
        issues.push(format!(
            "error span too small ({span:.4}); increase Z range or improve ROI SNR"
        ));
    }

    let abs_corr = pearson(&zs, &errors).abs();
    if abs_corr < t.min_abs_corr {
        issues.push(format!(
            "error-vs-Z is weakly correlated (|corr|={abs_corr:.3}); keep ROI centered and reduce sweep range around focus"
        ));
    }

    let decimals = t.z_bucket_decimals.min(MAX_Z_BUCKET_DECIMALS);
    let scale = 10f64.powi(i32::try_from(decimals).unwrap_or(0));
    let mut buckets: HashMap<u64, (f64, f64, usize)> = HashMap::new();
    for s in samples {
        // Rounded value keyed by its bits; `+ 0.0` folds -0.0 into 0.0.
        let key = ((s.z_um * scale).round() + 0.0).to_bits();
        let e = buckets.entry(key).or_insert((s.error, s.error, 0));
        e.0 = e.0.min(s.error);
        e.1 = e.1.max(s.error);
        e.2 += 1;
    }
    let worst_hysteresis = buckets
        .values()
        .filter(|(_, _, n)| *n > 1)
        .map(|(lo, hi, _)| hi - lo)
        .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))));
    if worst_hysteresis.is_some_and(|d| d > t.max_bidirectional_hysteresis) {
        issues.push(
            "up/down sweep mismatch is high (possible backlash or stage settling issue); \
             reduce step size, slow sweep, or tighten stage settling"
                .to_string(),
        );
    }

    let err0 = report.calibration.error_at_focus;
    let nearest = errors
        .iter()
        .map(|e| (e - err0).abs())
        .fold(f64::INFINITY, f64::min);
    let margin = (span * t.focus_margin_fraction).max(0.02);
    let tolerance = (span * 0.25).max(0.02);
    let outside = err0 < min_err - margin || err0 > max_err + margin;
    if outside && nearest > tolerance {
        issues.push(
            "fitted focus lies outside sampled error range; sweep likely does not bracket focus"
                .to_string(),
        );
    }

    issues
}

/// Reject a calibration whose slope contradicts the optical convention.
pub fn validate_sign(
    calibration: &FocusCalibration,
    expected_positive_slope: bool,
) -> Result<(), CalibrationError> {
    let slope = calibration.error_to_um;
    let inverted = if expected_positive_slope {
        slope <= 0.0
    } else {
        slope >= 0.0
    };
    if inverted {
        return Err(CalibrationError::InvertedSign {
            expected_positive: expected_positive_slope,
            slope,
        });
    }
    Ok(())
}
