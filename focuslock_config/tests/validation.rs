use focuslock_config::{Config, RunMode, load_toml};
use rstest::rstest;

#[test]
fn empty_document_uses_defaults() {
    let cfg = load_toml("").expect("parse TOML");
    cfg.validate().expect("defaults are valid");
    assert_eq!(cfg.control.loop_hz, 30.0);
    assert_eq!(cfg.roi.width, 24);
    assert_eq!(cfg.limits.effective_excursion_um(), Some(5.0));
    assert_eq!(cfg.calibration.samples_csv, "calibration_sweep.csv");
    assert_eq!(cfg.quality.z_bucket_decimals, 3);
    assert_eq!(cfg.runner.mode, RunMode::Timed);
}

#[test]
fn full_document_parses() {
    let toml = r#"
[roi]
x = 16
y = 16
width = 32
height = 32

[control]
loop_hz = 60.0
kp = 0.8
ki = 0.2
max_step_um = 0.2
error_alpha = 0.5

[limits]
stage_min_um = -10.0
stage_max_um = 10.0
max_abs_excursion_um = -1.0

[guards]
min_roi_intensity = 500.0
edge_margin_px = 2.0

[calibration]
samples_csv = "cal/sweep.csv"
robust = false
expected_positive_slope = false

[sweep]
half_range_um = 1.0
steps = 11
bidirectional = false

[runner]
mode = "worker"
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid");
    assert_eq!(cfg.roi.x, 16);
    assert_eq!(cfg.limits.effective_excursion_um(), None);
    assert_eq!(cfg.guards.min_roi_intensity, Some(500.0));
    assert!(!cfg.calibration.robust);
    assert_eq!(cfg.runner.mode, RunMode::Worker);
}

#[rstest]
#[case("[control]\nloop_hz = 0.0", "loop_hz must be > 0")]
#[case("[control]\nmax_step_um = -0.1", "max_step_um must be >= 0")]
#[case("[control]\nintegral_limit_um = -1.0", "integral_limit_um must be >= 0")]
#[case("[control]\nerror_alpha = 1.5", "error_alpha must be in [0.0, 1.0]")]
#[case("[guards]\nedge_margin_px = -1.0", "edge_margin_px must be >= 0")]
#[case("[roi]\nwidth = 0", "roi.width and roi.height must be > 0")]
#[case("[limits]\nstage_min_um = 2.0\nstage_max_um = 1.0", "stage_min_um must be <=")]
#[case("[calibration]\noutlier_threshold_um = 0.0", "outlier_threshold_um must be > 0")]
#[case("[calibration]\nmin_r2 = 1.5", "min_r2 must be in")]
#[case("[quality]\nz_bucket_decimals = 12", "z_bucket_decimals must be <= 9")]
#[case("[sweep]\nsteps = 1", "sweep.steps must be >= 2")]
#[case("[sweep]\nhalf_range_um = 0.0", "half_range_um must be > 0")]
#[case("[control]\nkp = nan", "control.kp must be finite")]
#[case("[logging]\nrotation = \"weekly\"", "logging.rotation must be one of")]
fn rejects_invalid(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    assert!(format!("{err}").contains(needle), "{err}");
}

#[test]
fn unknown_run_mode_is_a_parse_error() {
    assert!(load_toml("[runner]\nmode = \"turbo\"").is_err());
}

#[test]
fn default_config_struct_is_valid() {
    Config::default().validate().unwrap();
}
