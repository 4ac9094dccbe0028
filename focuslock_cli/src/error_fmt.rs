//! Human-readable error descriptions, exit codes and structured JSON error formatting.

use std::fmt;

use focuslock_core::error::{BuildError, CalibrationError, FocusError, SweepError};

pub const EXIT_GENERIC: i32 = 1;
pub const EXIT_CONFIG: i32 = 3;
pub const EXIT_CALIBRATION: i32 = 4;
pub const EXIT_DEVICE: i32 = 5;
pub const EXIT_CANCELLED: i32 = 6;

/// Stage of the CLI a failure belongs to, attached with `wrap_err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Config,
    Calibration,
    Interrupted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Config => "invalid configuration",
            Self::Calibration => "calibration rejected",
            Self::Interrupted => "interrupted by user",
        })
    }
}

fn phase(err: &eyre::Report) -> Option<Phase> {
    err.downcast_ref::<Phase>().copied()
}

/// Typed error anywhere in the context chain.
fn find<E>(err: &eyre::Report) -> Option<&E>
where
    E: fmt::Display + fmt::Debug + Send + Sync + 'static,
{
    err.downcast_ref::<E>()
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = find::<BuildError>(err) {
        return match be {
            BuildError::MissingCalibration => {
                "What happened: No calibration was provided to the controller.\nLikely causes: The startup calibration step was skipped.\nHow to fix: Run `focuslock calibrate` first or pass --calibration-csv.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid control configuration ({msg}).\nLikely causes: Out-of-range values in the TOML or on the command line.\nHow to fix: Edit [control]/[limits]/[guards] or the matching flags, then rerun."
            ),
        };
    }

    if let Some(se) = find::<SweepError>(err) {
        return match se {
            SweepError::Cancelled { completed } => format!(
                "What happened: Calibration sweep cancelled after {completed} steps.\nHow to fix: Rerun `focuslock calibrate` and let it finish."
            ),
            SweepError::InsufficientCalibrationData { .. } => format!(
                "What happened: {se}.\nLikely causes: Sweep range exceeds the stage travel, or the stage rejects moves.\nHow to fix: Reduce --half-range-um or recentre the stage before calibrating."
            ),
            SweepError::InvalidSweepRange(msg) => format!(
                "What happened: Invalid sweep ({msg}).\nHow to fix: Use at least 2 steps and a positive half range."
            ),
        };
    }

    if let Some(ce) = find::<CalibrationError>(err) {
        return match ce {
            CalibrationError::InvertedSign { .. } => format!(
                "What happened: {ce}.\nLikely causes: Cylindrical lens orientation differs from the configured convention.\nHow to fix: Check the lens orientation or set calibration.expected_positive_slope."
            ),
            CalibrationError::DegenerateSamples | CalibrationError::ZeroSlope => format!(
                "What happened: {ce}.\nLikely causes: The fiducial is not inside the ROI, or the sweep range is too small to change the PSF shape.\nHow to fix: Centre the ROI on the fiducial and rerun `focuslock calibrate`."
            ),
            _ => format!(
                "What happened: Calibration fit failed ({ce}).\nHow to fix: Rerun `focuslock calibrate` to record a fresh sweep."
            ),
        };
    }

    if let Some(fe) = find::<FocusError>(err) {
        return match fe {
            FocusError::NotStarted(_) => {
                "What happened: The camera was used before it was started.\nHow to fix: This is a bug in the caller; please report it with --log-level=debug output.".to_string()
            }
            FocusError::StageRejected(m) => format!(
                "What happened: The stage rejected a move ({m}).\nLikely causes: Commanded Z outside the stage travel.\nHow to fix: Set limits.stage_min_um / limits.stage_max_um inside the travel range."
            ),
            FocusError::Timeout => {
                "What happened: A device did not answer in time.\nHow to fix: Check cabling and that no other program holds the device.".to_string()
            }
            FocusError::Camera(m) | FocusError::Stage(m) => format!(
                "What happened: Device error ({m}).\nHow to fix: Re-run with --log-level=debug for details."
            ),
        };
    }

    let msg = err
        .chain()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'z_um,error[,weight]'.".to_string();
    }

    if let Some(p) = phase(err) {
        let detail = err
            .chain()
            .skip(1)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(": ");
        return match p {
            Phase::Config => format!(
                "What happened: Configuration is invalid ({detail}).\nHow to fix: Edit the TOML config and try again."
            ),
            Phase::Calibration => format!(
                "What happened: Saved calibration is not usable ({detail}).\nHow to fix: Rerun `focuslock calibrate`, or pass --lenient to continue anyway."
            ),
            Phase::Interrupted => "Interrupted by user.".to_string(),
        };
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 3 config, 4 calibration, 5 device, 6 cancelled, 1 otherwise.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match phase(err) {
        Some(Phase::Config) => return EXIT_CONFIG,
        Some(Phase::Interrupted) => return EXIT_CANCELLED,
        Some(Phase::Calibration) => return EXIT_CALIBRATION,
        None => {}
    }
    if let Some(se) = find::<SweepError>(err) {
        return match se {
            SweepError::Cancelled { .. } => EXIT_CANCELLED,
            SweepError::InvalidSweepRange(_) => EXIT_CONFIG,
            SweepError::InsufficientCalibrationData { .. } => EXIT_CALIBRATION,
        };
    }
    if find::<BuildError>(err).is_some() {
        return EXIT_CONFIG;
    }
    if find::<CalibrationError>(err).is_some() {
        return EXIT_CALIBRATION;
    }
    if find::<FocusError>(err).is_some() {
        return EXIT_DEVICE;
    }
    EXIT_GENERIC
}

fn reason_name(err: &eyre::Report) -> &'static str {
    match exit_code_for_error(err) {
        EXIT_CONFIG => "Config",
        EXIT_CALIBRATION => "Calibration",
        EXIT_DEVICE => "Device",
        EXIT_CANCELLED => "Cancelled",
        _ => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
        "chain": err.chain().map(ToString::to_string).collect::<Vec<_>>(),
    })
    .to_string()
}
