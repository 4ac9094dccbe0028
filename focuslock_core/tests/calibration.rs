use focuslock_core::{
    CalibrationError, CalibrationSample, FitOptions, FocusCalibration, QualityThresholds,
    fit_linear_calibration, fit_linear_calibration_with_report, fit_robust, fit_weighted,
    quality_issues, validate_sign,
};
use rstest::rstest;

fn s(z: f64, e: f64) -> CalibrationSample {
    CalibrationSample::new(z, e, 1.0)
}

const ROBUST: FitOptions = FitOptions {
    robust: true,
    outlier_threshold_um: 0.2,
};

#[test]
fn recovers_symmetric_mapping() {
    let samples = [s(-1.0, -0.5), s(0.0, 0.0), s(1.0, 0.5)];
    let (slope, intercept) = fit_weighted(&samples).unwrap();
    assert!((slope - 2.0).abs() < 1e-9);
    assert!(intercept.abs() < 1e-9);
    let cal = fit_linear_calibration(&samples, FitOptions::default()).unwrap();
    assert!(cal.error_at_focus.abs() < 1e-9);
    assert!((cal.error_to_um - 2.0).abs() < 1e-9);
}

#[test]
fn z_offset_is_relative_to_focus_error() {
    let cal = FocusCalibration::new(0.1, 2.0);
    assert!((cal.error_to_z_offset_um(0.35) - 0.5).abs() < 1e-12);
    assert_eq!(FocusCalibration::IDENTITY.error_to_z_offset_um(-0.25), -0.25);
}

#[rstest]
#[case::none(vec![])]
#[case::one(vec![s(0.0, 0.1)])]
fn needs_two_samples(#[case] samples: Vec<CalibrationSample>) {
    let err = fit_linear_calibration(&samples, FitOptions::default()).unwrap_err();
    assert_eq!(err, CalibrationError::InsufficientSamples(samples.len()));
    assert!(matches!(
        fit_weighted(&samples),
        Err(CalibrationError::InsufficientSamples(_))
    ));
}

#[test]
fn constant_error_is_degenerate() {
    let samples = [s(-1.0, 0.0), s(0.0, 0.0), s(1.0, 0.0)];
    assert_eq!(
        fit_linear_calibration(&samples, FitOptions::default()),
        Err(CalibrationError::DegenerateSamples)
    );
}

#[test]
fn zero_weights_have_no_mass() {
    let samples = [
        CalibrationSample::new(0.0, 0.0, 0.0),
        CalibrationSample::new(1.0, 1.0, -3.0),
    ];
    assert_eq!(fit_weighted(&samples), Err(CalibrationError::ZeroWeightMass));
}

#[test]
fn constant_z_gives_zero_slope() {
    let samples = [s(1.0, -0.1), s(1.0, 0.0), s(1.0, 0.1)];
    assert_eq!(fit_weighted(&samples), Err(CalibrationError::ZeroSlope));
}

#[test]
fn non_finite_input_is_rejected() {
    let samples = [s(f64::NAN, 0.0), s(1.0, 0.1)];
    assert_eq!(fit_weighted(&samples), Err(CalibrationError::NonFinite));
}

#[test]
fn negative_weight_counts_as_zero() {
    let mut samples = vec![s(-1.0, -0.5), s(0.0, 0.0), s(1.0, 0.5)];
    samples.push(CalibrationSample::new(5.0, 0.0, -10.0));
    let (slope, _) = fit_weighted(&samples).unwrap();
    assert!((slope - 2.0).abs() < 1e-9);
}

#[test]
fn robust_fit_drops_outlier() {
    let mut samples: Vec<_> = (0..9)
        .map(|i| {
            let e = f64::from(i - 4) * 0.05;
            s(3.0 * e, e)
        })
        .collect();
    samples[6].z_um += 2.0;

    let plain = fit_linear_calibration_with_report(&samples, FitOptions::default()).unwrap();
    let robust = fit_linear_calibration_with_report(&samples, ROBUST).unwrap();

    assert_eq!(robust.n_inliers, 8);
    assert_eq!(robust.n_samples, 9);
    assert!(robust.robust);
    assert!((robust.calibration.error_to_um - 3.0).abs() < 1e-9);
    assert!(robust.r2 > 0.999_999);
    assert!(robust.rmse_um < 1e-9);
    assert!(plain.r2 < robust.r2);
    assert_eq!(plain.n_inliers, 9);

    let direct = fit_robust(&samples, 0.2).unwrap();
    assert_eq!(direct.n_inliers, 8);
}

#[test]
fn report_is_centered_on_mean_z() {
    // Stage offset of 100 um does not leak into the focus error estimate.
    let samples = [s(99.0, -0.5), s(100.0, 0.0), s(101.0, 0.5)];
    let r = fit_linear_calibration_with_report(&samples, FitOptions::default()).unwrap();
    assert!(r.intercept_um.abs() < 1e-9);
    assert!(r.calibration.error_at_focus.abs() < 1e-9);
    assert!((r.r2 - 1.0).abs() < 1e-12);
}

#[test]
fn flags_weak_correlation() {
    let samples = [s(0.0, 0.10), s(1.0, 0.05), s(2.0, 0.09), s(3.0, 0.14)];
    let report = fit_linear_calibration_with_report(&samples, ROBUST).unwrap();
    let t = QualityThresholds {
        min_abs_corr: 0.9,
        ..QualityThresholds::default()
    };
    let issues = quality_issues(&samples, &report, &t);
    assert!(issues.iter().any(|i| i.contains("weakly correlated")), "{issues:?}");
}

#[test]
fn accepts_well_behaved_sweep() {
    let samples = [s(-1.0, -0.5), s(0.0, 0.0), s(1.0, 0.5)];
    let report = fit_linear_calibration_with_report(&samples, ROBUST).unwrap();
    assert!(quality_issues(&samples, &report, &QualityThresholds::default()).is_empty());
}

#[test]
fn flags_bidirectional_hysteresis() {
    let samples = [
        s(-0.5, -0.20),
        s(0.0, 0.00),
        s(0.5, 0.20),
        s(0.5, 0.26),
        s(0.0, 0.04),
        s(-0.5, -0.16),
    ];
    let report = fit_linear_calibration_with_report(&samples, ROBUST).unwrap();
    let issues = quality_issues(&samples, &report, &QualityThresholds::default());
    assert!(issues.iter().any(|i| i.contains("up/down sweep mismatch")), "{issues:?}");
}

#[test]
fn coarser_z_buckets_pair_nearby_positions() {
    let samples = [s(0.0, 0.0), s(0.5, 0.20), s(0.5004, 0.30), s(1.0, 0.4)];
    let report = fit_linear_calibration_with_report(&samples, FitOptions::default()).unwrap();
    let fine = QualityThresholds {
        z_bucket_decimals: 4,
        ..QualityThresholds::default()
    };
    let coarse = QualityThresholds::default();
    let has = |t: &QualityThresholds| {
        quality_issues(&samples, &report, t)
            .iter()
            .any(|i| i.contains("up/down sweep mismatch"))
    };
    assert!(!has(&fine));
    assert!(has(&coarse));
}

#[rstest]
#[case(3)]
#[case(9)]
#[case(19)]
#[case(u32::MAX)]
fn one_way_sweep_never_reports_hysteresis(#[case] decimals: u32) {
    let samples: Vec<_> = (1..=5).map(|i| s(f64::from(i), 0.1 * f64::from(i))).collect();
    let report = fit_linear_calibration_with_report(&samples, FitOptions::default()).unwrap();
    let t = QualityThresholds {
        z_bucket_decimals: decimals,
        ..QualityThresholds::default()
    };
    let issues = quality_issues(&samples, &report, &t);
    assert!(issues.is_empty(), "decimals={decimals}: {issues:?}");
}

#[test]
fn tolerates_small_focus_extrapolation() {
    let samples = [s(-0.5, -0.030), s(0.0, -0.010), s(0.5, 0.010), s(1.0, 0.030)];
    let mut report = fit_linear_calibration_with_report(&samples, ROBUST).unwrap();
    report.calibration.error_at_focus = 0.035;
    let issues = quality_issues(&samples, &report, &QualityThresholds::default());
    assert!(!issues.iter().any(|i| i.contains("outside sampled error range")));
}

#[test]
fn flags_unbracketed_focus() {
    let samples = [s(0.0, 0.10), s(0.5, 0.20), s(1.0, 0.30)];
    let mut report = fit_linear_calibration_with_report(&samples, FitOptions::default()).unwrap();
    report.calibration.error_at_focus = -0.2;
    let issues = quality_issues(&samples, &report, &QualityThresholds::default());
    assert!(issues.iter().any(|i| i.contains("does not bracket focus")), "{issues:?}");
}

#[test]
fn flags_small_span_and_short_input() {
    let samples = [s(0.0, 0.001), s(1.0, 0.002), s(2.0, 0.003)];
    let report = fit_linear_calibration_with_report(&samples, FitOptions::default()).unwrap();
    let issues = quality_issues(&samples, &report, &QualityThresholds::default());
    assert!(issues.iter().any(|i| i.starts_with("error span too small")));
    assert_eq!(
        quality_issues(&samples[..1], &report, &QualityThresholds::default()),
        vec!["need at least 2 samples".to_string()]
    );
}

#[rstest]
#[case(2.0, true, true)]
#[case(-2.0, true, false)]
#[case(0.0, true, false)]
#[case(-2.0, false, true)]
#[case(2.0, false, false)]
#[case(0.0, false, false)]
fn sign_validation(#[case] slope: f64, #[case] expect_positive: bool, #[case] ok: bool) {
    let res = validate_sign(&FocusCalibration::new(0.0, slope), expect_positive);
    assert_eq!(res.is_ok(), ok);
    if let Err(e) = res {
        assert!(e.to_string().contains("inverted"));
    }
}
