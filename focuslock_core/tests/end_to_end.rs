//! Sweep, fit, persist and lock against the simulated microscope.

use focuslock_config::{CalibrationRow, load_calibration_samples_csv, save_calibration_samples_csv};
use focuslock_core::{
    AutofocusConfig, AutofocusController, CalibrationSample, FitOptions, QualityThresholds, Roi,
    SweepPlan, auto_calibrate, fit_linear_calibration_with_report, quality_issues, validate_sign,
};
use focuslock_hardware::{SimulatedCamera, SimulatedScene, SimulatedStage};
use focuslock_traits::Camera;

fn rig(z_um: f64) -> (SimulatedCamera, SimulatedStage) {
    let stage = SimulatedStage::new(z_um);
    let mut camera = SimulatedCamera::new(stage.clone(), SimulatedScene::default());
    camera.start().unwrap();
    (camera, stage)
}

#[test]
fn calibrate_then_lock() {
    let (mut camera, mut stage) = rig(0.0);
    let samples = auto_calibrate(
        &mut camera,
        &mut stage,
        Roi::default(),
        &SweepPlan::centered(0.0, 0.75, 21),
        || false,
        |_| {},
    )
    .unwrap();
    assert_eq!(samples.len(), 42);

    let opts = FitOptions {
        robust: true,
        ..FitOptions::default()
    };
    let report = fit_linear_calibration_with_report(&samples, opts).unwrap();
    assert_eq!(report.n_inliers, 42);
    assert!(report.r2 > 0.99, "{report:?}");
    assert!(report.calibration.error_at_focus.abs() < 0.01, "{report:?}");
    assert!((2.0..3.0).contains(&report.calibration.error_to_um), "{report:?}");
    assert!(quality_issues(&samples, &report, &QualityThresholds::default()).is_empty());
    validate_sign(&report.calibration, true).unwrap();

    stage.set_position_um(1.0);
    let mut ctrl = AutofocusController::new(
        camera,
        stage.clone(),
        AutofocusConfig::default(),
        report.calibration,
    )
    .unwrap();
    for _ in 0..60 {
        ctrl.run_step(None).unwrap();
    }
    assert!(stage.position_um().abs() < 0.05, "z={}", stage.position_um());
}

#[test]
fn persisted_sweep_refits_identically() {
    let (mut camera, mut stage) = rig(0.0);
    let samples = auto_calibrate(
        &mut camera,
        &mut stage,
        Roi::default(),
        &SweepPlan::centered(0.0, 0.5, 11).one_way(),
        || false,
        |_| {},
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sweeps").join("calibration_sweep.csv");
    let rows: Vec<CalibrationRow> = samples.iter().copied().map(Into::into).collect();
    save_calibration_samples_csv(&path, &rows).unwrap();
    let loaded: Vec<CalibrationSample> = load_calibration_samples_csv(&path)
        .unwrap()
        .into_iter()
        .map(Into::into)
        .collect();

    assert_eq!(loaded, samples);
    let a = fit_linear_calibration_with_report(&samples, FitOptions::default()).unwrap();
    let b = fit_linear_calibration_with_report(&loaded, FitOptions::default()).unwrap();
    assert_eq!(a, b);
}
