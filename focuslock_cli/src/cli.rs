//! CLI argument definitions and shared statics.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

pub fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}

#[derive(Parser, Debug)]
#[command(
    name = "focuslock",
    version,
    about = "Closed-loop astigmatic autofocus for a Z stage"
)]
pub struct Cli {
    /// Path to config TOML; built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log and report as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG takes precedence
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    /// Initial Z of the simulated stage (um); the simulated focal plane is at 0
    #[arg(long = "sim-z-um", value_name = "UM", default_value_t = 1.5, global = true, allow_hyphen_values = true)]
    pub sim_z_um: f64,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

/// Where the control loop runs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Mode {
    /// On the main thread for the requested duration
    Timed,
    /// On a background worker thread
    Worker,
}

impl From<focuslock_config::RunMode> for Mode {
    fn from(m: focuslock_config::RunMode) -> Self {
        match m {
            focuslock_config::RunMode::Timed => Self::Timed,
            focuslock_config::RunMode::Worker => Self::Worker,
        }
    }
}

/// Control overrides; each takes precedence over the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct ControlOverrides {
    /// Control loop frequency (Hz)
    #[arg(long, value_name = "HZ")]
    pub loop_hz: Option<f64>,
    /// Proportional gain
    #[arg(long)]
    pub kp: Option<f64>,
    /// Integral gain
    #[arg(long)]
    pub ki: Option<f64>,
    /// Max correction step (um)
    #[arg(long = "max-step", value_name = "UM")]
    pub max_step_um: Option<f64>,
    /// Lower clamp for commanded stage Z (um)
    #[arg(long, value_name = "UM", allow_hyphen_values = true)]
    pub stage_min_um: Option<f64>,
    /// Upper clamp for commanded stage Z (um)
    #[arg(long, value_name = "UM", allow_hyphen_values = true)]
    pub stage_max_um: Option<f64>,
    /// Max excursion from the Z where the lock engaged (um); negative disables
    #[arg(long = "af-max-excursion-um", value_name = "UM", allow_hyphen_values = true)]
    pub max_excursion_um: Option<f64>,
}

/// Real-time scheduling knobs.
#[derive(Args, Debug, Clone, Default)]
pub struct RtArgs {
    /// Enable real-time mode (SCHED_FIFO, mlockall)
    #[arg(
        long,
        action = ArgAction::SetTrue,
        long_help = "Enable real-time mode on Linux: SCHED_FIFO priority and mlockall to keep the process resident. May require CAP_SYS_NICE / CAP_IPC_LOCK or root. Failures are logged as warnings and the run continues."
    )]
    pub rt: bool,
    /// SCHED_FIFO priority when --rt is enabled (clamped to the system range)
    #[arg(long, value_name = "PRIO")]
    pub rt_prio: Option<i32>,
    /// Memory locking mode for --rt
    #[arg(long, value_enum, value_name = "MODE")]
    pub rt_lock: Option<RtLock>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load the saved calibration and hold focus for a while
    Run {
        /// Loop runtime in seconds
        #[arg(long, default_value_t = 2.0)]
        duration: f64,
        /// Calibration samples CSV (overrides calibration.samples_csv)
        #[arg(long, value_name = "FILE")]
        calibration_csv: Option<PathBuf>,
        /// Downgrade calibration quality failures to warnings; fall back to identity calibration
        #[arg(long, action = ArgAction::SetTrue)]
        lenient: bool,
        /// Run mode (overrides runner.mode)
        #[arg(long, value_enum)]
        mode: Option<Mode>,
        /// Print control loop latency stats
        #[arg(long, action = ArgAction::SetTrue)]
        stats: bool,
        #[command(flatten)]
        control: ControlOverrides,
        #[command(flatten)]
        rt: RtArgs,
    },
    /// Sweep Z around the current position and save calibration samples
    Calibrate {
        /// Output CSV (overrides calibration.samples_csv)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Sweep center (um); current stage Z when omitted
        #[arg(long, value_name = "UM", allow_hyphen_values = true)]
        center_um: Option<f64>,
        /// Sweep half range (um)
        #[arg(long = "half-range-um", value_name = "UM")]
        half_range_um: Option<f64>,
        /// Number of Z points per direction
        #[arg(long)]
        steps: Option<usize>,
        /// Sweep upward only
        #[arg(long, action = ArgAction::SetTrue)]
        one_way: bool,
        /// Save and report even when the sweep fails quality checks
        #[arg(long, action = ArgAction::SetTrue)]
        lenient: bool,
    },
    /// Fit a saved calibration CSV and report its quality
    Fit {
        /// Calibration samples CSV (overrides calibration.samples_csv)
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
        /// Report quality failures without failing
        #[arg(long, action = ArgAction::SetTrue)]
        lenient: bool,
    },
    /// Quick health check: config, simulated camera and metric
    SelfCheck,
}
