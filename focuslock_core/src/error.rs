use focuslock_traits::ImageError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetricError {
    #[error("invalid image: {0}")]
    InvalidImage(#[from] ImageError),
    #[error("ROI does not intersect image (roi {x},{y} {width}x{height}, image {image_width}x{image_height})")]
    InvalidRoi {
        x: i64,
        y: i64,
        width: i64,
        height: i64,
        image_width: usize,
        image_height: usize,
    },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("need at least two calibration samples, got {0}")]
    InsufficientSamples(usize),
    #[error("calibration sample weights must contain positive mass")]
    ZeroWeightMass,
    #[error("calibration samples are degenerate (no spread in error)")]
    DegenerateSamples,
    #[error("calibration slope is zero")]
    ZeroSlope,
    #[error("calibration produced a non-finite value")]
    NonFinite,
    #[error(
        "calibration slope sign is inverted for expected-{} setup (slope {slope})",
        sign_word(.expected_positive)
    )]
    InvertedSign { expected_positive: bool, slope: f64 },
}

fn sign_word(positive: &bool) -> &'static str {
    if *positive { "positive" } else { "negative" }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error("missing calibration")]
    MissingCalibration,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SweepError {
    #[error("invalid sweep range: {0}")]
    InvalidSweepRange(&'static str),
    #[error("Calibration cancelled by user after {completed} steps")]
    Cancelled { completed: usize },
    #[error(
        "Calibration sweep could not collect enough valid points: {succeeded} succeeded, {failed} failed{detail}"
    )]
    InsufficientCalibrationData {
        succeeded: usize,
        failed: usize,
        /// First failure (or a hint when nothing failed outright).
        detail: String,
    },
}

/// Device-boundary failures surfaced by the control loop and sweep.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FocusError {
    #[error("device not started: {0}")]
    NotStarted(String),
    #[error("camera error: {0}")]
    Camera(String),
    #[error("stage error: {0}")]
    Stage(String),
    #[error("stage rejected move: {0}")]
    StageRejected(String),
    #[error("device timeout")]
    Timeout,
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
