//! Calibration commands: sweep, fit, and the calibration check `run` performs at startup.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::WrapErr;
use focuslock_config::Config;
use focuslock_core::{
    CalibrationSample, FitOptions, FitReport, FocusCalibration, QualityThresholds, Roi,
    SweepPlan, SweepProgress, auto_calibrate, fit_linear_calibration_with_report, quality_issues,
    validate_sign,
};

use crate::cli::json_mode;
use crate::error_fmt::Phase;
use crate::rig::SimRig;

/// Sweep flags from the `calibrate` subcommand.
#[derive(Debug, Clone, Default)]
pub struct SweepArgs {
    pub out: Option<PathBuf>,
    pub center_um: Option<f64>,
    pub half_range_um: Option<f64>,
    pub steps: Option<usize>,
    pub one_way: bool,
    pub lenient: bool,
}

fn samples_path(cfg: &Config, override_path: Option<&Path>) -> PathBuf {
    override_path.map_or_else(|| PathBuf::from(&cfg.calibration.samples_csv), Path::to_path_buf)
}

fn load_samples(path: &Path) -> eyre::Result<Vec<CalibrationSample>> {
    let rows = focuslock_config::load_calibration_samples_csv(path)?;
    Ok(rows.into_iter().map(CalibrationSample::from).collect())
}

fn fit(cfg: &Config, samples: &[CalibrationSample]) -> eyre::Result<FitReport> {
    let report = fit_linear_calibration_with_report(samples, FitOptions::from(&cfg.calibration))?;
    Ok(report)
}

fn summary(path: &Path, report: &FitReport) -> String {
    format!(
        "Loaded calibration ({}): slope={:+.4} um/error, error_at_focus={:+.4}, R^2={:.4}, inliers={}/{}",
        path.display(),
        report.calibration.error_to_um,
        report.calibration.error_at_focus,
        report.r2,
        report.n_inliers,
        report.n_samples
    )
}

/// Quality problems of a fitted sweep, plus the R^2 floor and sign convention.
///
/// A sign inversion is returned as a typed error when `lenient` is off, so
/// error reporting can explain it.
fn check_quality(
    cfg: &Config,
    samples: &[CalibrationSample],
    report: &FitReport,
    lenient: bool,
) -> eyre::Result<Vec<String>> {
    let mut issues = quality_issues(samples, report, &QualityThresholds::from(&cfg.quality));
    if report.r2 < cfg.calibration.min_r2 {
        issues.push(format!(
            "R^2={:.4} is below calibration.min_r2={:.4}; re-run the sweep with a smaller Z range or check that the fiducial is in the ROI",
            report.r2, cfg.calibration.min_r2
        ));
    }
    if let Err(e) = validate_sign(&report.calibration, cfg.calibration.expected_positive_slope) {
        if !lenient {
            return Err(eyre::Report::new(e)).wrap_err(Phase::Calibration);
        }
        issues.push(e.to_string());
    }
    Ok(issues)
}

fn enforce(issues: &[String], lenient: bool) -> eyre::Result<()> {
    if issues.is_empty() {
        return Ok(());
    }
    if lenient {
        for issue in issues {
            tracing::warn!(%issue, "calibration quality");
            eprintln!("Warning: {issue}");
        }
        return Ok(());
    }
    Err(eyre::eyre!(
        "calibration failed quality checks: {}",
        issues.join(" ; ")
    ))
    .wrap_err(Phase::Calibration)
}

/// Calibration the `run` command controls with.
///
/// Strict by default: a missing or unusable CSV and any quality issue are
/// errors. With `lenient` they become warnings and a missing or unfittable
/// CSV falls back to [`FocusCalibration::IDENTITY`].
pub fn load_startup_calibration(
    cfg: &Config,
    csv_override: Option<&Path>,
    lenient: bool,
) -> eyre::Result<FocusCalibration> {
    let path = samples_path(cfg, csv_override);
    let loaded = load_samples(&path)
        .wrap_err_with(|| format!("calibration samples {}", path.display()))
        .and_then(|samples| fit(cfg, &samples).map(|report| (samples, report)));
    let (samples, report) = match loaded {
        Ok(v) => v,
        Err(e) if lenient => {
            tracing::warn!(error = %format!("{e:#}"), "startup calibration unavailable");
            eprintln!("Warning: {e:#}");
            eprintln!("Warning: using identity calibration; run `focuslock calibrate` and restart.");
            return Ok(FocusCalibration::IDENTITY);
        }
        Err(e) => return Err(e.wrap_err(Phase::Calibration)),
    };

    eprintln!("{}", summary(&path, &report));
    let issues = check_quality(cfg, &samples, &report, lenient)?;
    enforce(&issues, lenient)?;
    tracing::info!(
        slope = report.calibration.error_to_um,
        error_at_focus = report.calibration.error_at_focus,
        r2 = report.r2,
        "startup calibration loaded"
    );
    Ok(report.calibration)
}

fn report_json(path: &Path, report: &FitReport, issues: &[String]) -> serde_json::Value {
    serde_json::json!({
        "samples_csv": path.display().to_string(),
        "slope_um_per_error": report.calibration.error_to_um,
        "error_at_focus": report.calibration.error_at_focus,
        "intercept_um": report.intercept_um,
        "r2": report.r2,
        "rmse_um": report.rmse_um,
        "n_samples": report.n_samples,
        "n_inliers": report.n_inliers,
        "robust": report.robust,
        "issues": issues,
    })
}

fn print_report(path: &Path, report: &FitReport, issues: &[String]) {
    if json_mode() {
        println!("{}", report_json(path, report, issues));
        return;
    }
    println!(
        "slope={:+.4} um/error error_at_focus={:+.4} R^2={:.4} rmse={:.4} um inliers={}/{}",
        report.calibration.error_to_um,
        report.calibration.error_at_focus,
        report.r2,
        report.rmse_um,
        report.n_inliers,
        report.n_samples
    );
    if issues.is_empty() {
        println!("quality: ok");
    }
    for issue in issues {
        println!("quality: {issue}");
    }
}

/// `focuslock fit`: refit a saved sweep and report its quality.
pub fn run_fit(cfg: &Config, csv: Option<&Path>, lenient: bool) -> eyre::Result<()> {
    let path = samples_path(cfg, csv);
    let samples = load_samples(&path)
        .wrap_err_with(|| format!("calibration samples {}", path.display()))
        .wrap_err(Phase::Calibration)?;
    let report = fit(cfg, &samples)?;
    let issues = check_quality(cfg, &samples, &report, true)?;
    print_report(&path, &report, &issues);
    if !lenient {
        if let Err(e) = validate_sign(&report.calibration, cfg.calibration.expected_positive_slope) {
            return Err(eyre::Report::new(e)).wrap_err(Phase::Calibration);
        }
    }
    enforce(&issues, lenient)
}

fn print_progress(p: &SweepProgress) {
    tracing::debug!(
        index = p.index,
        total = p.total,
        target_um = p.target_um,
        measured_z_um = ?p.measured_z_um,
        success = p.success,
        "sweep step"
    );
    if json_mode() {
        return;
    }
    match p.measured_z_um {
        Some(z) => eprintln!(
            "Sweep {}/{}: target={:+.3} um measured={:+.3} um",
            p.index, p.total, p.target_um, z
        ),
        None => eprintln!(
            "Sweep {}/{}: target={:+.3} um move failed",
            p.index, p.total, p.target_um
        ),
    }
}

/// `focuslock calibrate`: sweep around the current Z, save the samples, report the fit.
pub fn run_calibrate(
    cfg: &Config,
    rig: &mut SimRig,
    args: &SweepArgs,
    shutdown: &AtomicBool,
) -> eyre::Result<()> {
    let mut sweep = cfg.sweep;
    if let Some(h) = args.half_range_um {
        sweep.half_range_um = h;
    }
    if let Some(n) = args.steps {
        sweep.steps = n;
    }
    if args.one_way {
        sweep.bidirectional = false;
    }
    let center = args.center_um.unwrap_or_else(|| rig.stage.position_um());
    let plan = SweepPlan::from_config(&sweep, center);
    let roi = Roi::from(&cfg.roi);

    let samples = auto_calibrate(
        &mut rig.camera,
        &mut rig.stage,
        roi,
        &plan,
        || shutdown.load(Ordering::Relaxed),
        print_progress,
    )?;

    // The sweep leaves the stage at its last target; go back to where it started.
    rig.stage.set_position_um(center);

    let path = samples_path(cfg, args.out.as_deref());
    let rows: Vec<focuslock_config::CalibrationRow> =
        samples.iter().copied().map(Into::into).collect();
    focuslock_config::save_calibration_samples_csv(&path, &rows)?;
    eprintln!("Saved {} samples to {}", rows.len(), path.display());

    let report = fit(cfg, &samples)?;
    let issues = check_quality(cfg, &samples, &report, true)?;
    print_report(&path, &report, &issues);
    enforce(&issues, args.lenient)
}
