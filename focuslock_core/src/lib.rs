#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Closed-loop astigmatic autofocus (hardware-agnostic).
//!
//! All device access goes through `focuslock_traits::Camera` and
//! `focuslock_traits::Stage`.
//!
//! ## Architecture
//!
//! - **Metric** (`metric`): ROI extraction, intensity, second-moment anisotropy error
//! - **Calibration** (`calibration`): weighted/robust linear fit, quality checks
//! - **Control** (`controller`, `builder`): PI loop with step, integral, excursion and stage clamps
//! - **Worker** (`worker`): background thread driving the controller at its loop rate
//! - **Sweep** (`sweep`): Z sweep that collects calibration samples
//!
//! Frames that cannot be trusted (stale timestamp, dim ROI, PSF at the ROI
//! border) freeze the loop for that step instead of producing an error.

pub mod builder;
pub mod calibration;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod error;
pub mod hw_error;
pub mod metric;
pub mod mocks;
pub mod sample;
pub mod sweep;
pub mod util;
pub mod worker;

pub use builder::{ControllerBuilder, Missing};
pub use calibration::{
    CalibrationSample, FitOptions, FitReport, FocusCalibration, MAX_Z_BUCKET_DECIMALS,
    QualityThresholds, RobustFit,
    fit_linear_calibration, fit_linear_calibration_with_report, fit_robust, fit_weighted,
    quality_issues, validate_sign,
};
pub use config::AutofocusConfig;
pub use controller::AutofocusController;
pub use error::{BuildError, CalibrationError, FocusError, MetricError, Result, SweepError};
pub use metric::{
    Roi, astigmatic_error_signal, centroid_near_edge, extract_roi, roi_total_intensity,
};
pub use sample::{AutofocusSample, FreezeReason};
pub use sweep::{SweepPlan, SweepProgress, auto_calibrate};
pub use worker::AutofocusWorker;
