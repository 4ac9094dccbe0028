use std::fs;

use focuslock_config::{CalibrationRow, load_calibration_samples_csv, save_calibration_samples_csv};
use rstest::rstest;
use tempfile::tempdir;

fn row(z_um: f64, error: f64, weight: f64) -> CalibrationRow {
    CalibrationRow { z_um, error, weight }
}

#[rstest]
fn round_trip_is_exact_and_ordered() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("sweep.csv");
    let rows = vec![
        row(-0.75, -0.231_456_789_012_345_6, 18_213.4),
        row(0.1 + 0.2, 1.0 / 3.0, 0.0),
        row(0.75, 0.229_999_999_999_999_98, 1e-300),
        row(-0.0, -5e-324, 1.0),
    ];
    save_calibration_samples_csv(&path, &rows).unwrap();
    let back = load_calibration_samples_csv(&path).unwrap();
    assert_eq!(back.len(), rows.len());
    for (a, b) in rows.iter().zip(&back) {
        assert_eq!(a.z_um.to_bits(), b.z_um.to_bits());
        assert_eq!(a.error.to_bits(), b.error.to_bits());
        assert_eq!(a.weight.to_bits(), b.weight.to_bits());
    }
}

#[rstest]
fn header_is_written_first() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s.csv");
    save_calibration_samples_csv(&path, &[row(1.0, 0.5, 2.0)]).unwrap();
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("z_um,error,weight\n"), "{text}");
}

#[rstest]
fn empty_save_still_loads() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.csv");
    save_calibration_samples_csv(&path, &[]).unwrap();
    assert!(load_calibration_samples_csv(&path).unwrap().is_empty());
}

#[rstest]
fn weight_defaults_to_one_and_columns_may_reorder() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s.csv");
    fs::write(&path, "error,z_um\n0.25,1.5\n-0.1,-0.5\n").unwrap();
    let rows = load_calibration_samples_csv(&path).unwrap();
    assert_eq!(rows, vec![row(1.5, 0.25, 1.0), row(-0.5, -0.1, 1.0)]);
}

#[rstest]
#[case("z,error\n1,2\n", "headers")]
#[case("z_um,weight\n1,2\n", "headers")]
#[case("z_um,error,weight\n1,2,3\n4,oops,1\n", "invalid CSV row 3")]
fn rejects_malformed(#[case] body: &str, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.csv");
    fs::write(&path, body).unwrap();
    let err = load_calibration_samples_csv(&path).unwrap_err();
    assert!(format!("{err}").contains(needle), "{err}");
}

#[rstest]
fn missing_file_mentions_path() {
    let err = load_calibration_samples_csv(std::path::Path::new("/nonexistent/x.csv")).unwrap_err();
    assert!(format!("{err}").contains("open calibration CSV"));
}
