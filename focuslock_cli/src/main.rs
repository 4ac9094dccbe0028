#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `focuslock`: command-line front end for the autofocus loop.

mod calibrate;
mod cli;
mod error_fmt;
mod rig;
mod rt;
mod run;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;
use focuslock_config::{Config, Logging};
use focuslock_core::hw_error::{Device, map_hw_error};
use focuslock_core::{AutofocusConfig, astigmatic_error_signal, roi_total_intensity};
use focuslock_traits::Camera;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::cli::{Cli, Commands, JSON_MODE, json_mode};
use crate::error_fmt::{Phase, exit_code_for_error, format_error_json, humanize};
use crate::rig::SimRig;

/// Set by Ctrl-C; loops and sweeps poll it between steps.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    let _ = color_eyre::install();

    if let Err(err) = try_main(cli) {
        if json_mode() {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        tracing::debug!(error = ?err, "command failed");
        std::process::exit(exit_code_for_error(&err));
    }
}

fn try_main(cli: Cli) -> eyre::Result<()> {
    let cfg = load_config(cli.config.as_deref())?;
    // Dropped on return so the file sink is flushed before the process exits.
    let _log_guard = init_tracing(cli.json, &cli.log_level, &cfg.logging)?;

    match cli.cmd {
        Commands::Run {
            duration,
            calibration_csv,
            lenient,
            mode,
            stats,
            control,
            rt,
        } => {
            install_ctrlc()?;
            let rig = SimRig::start(cli.sim_z_um)?;
            let args = run::RunArgs {
                duration_s: duration,
                calibration_csv,
                lenient,
                mode,
                stats,
                control,
                rt,
            };
            run::run(&cfg, rig, &args, &SHUTDOWN)
        }
        Commands::Calibrate {
            out,
            center_um,
            half_range_um,
            steps,
            one_way,
            lenient,
        } => {
            install_ctrlc()?;
            let mut rig = SimRig::start(cli.sim_z_um)?;
            let args = calibrate::SweepArgs {
                out,
                center_um,
                half_range_um,
                steps,
                one_way,
                lenient,
            };
            let result = calibrate::run_calibrate(&cfg, &mut rig, &args, &SHUTDOWN);
            rig.shutdown();
            result
        }
        Commands::Fit { csv, lenient } => calibrate::run_fit(&cfg, csv.as_deref(), lenient),
        Commands::SelfCheck => {
            let mut rig = SimRig::start(cli.sim_z_um)?;
            let result = self_check(&cfg, &mut rig);
            rig.shutdown();
            result
        }
    }
}

fn load_config(path: Option<&Path>) -> eyre::Result<Config> {
    match path {
        Some(p) => focuslock_config::load_file(p).wrap_err(Phase::Config),
        None => Ok(Config::default()),
    }
}

fn install_ctrlc() -> eyre::Result<()> {
    ctrlc::set_handler(|| SHUTDOWN.store(true, Ordering::Relaxed))
        .wrap_err("install Ctrl-C handler")
}

/// Console logs to stderr, plus an optional JSON-lines file from `[logging]`.
///
/// `RUST_LOG` overrides `--log-level` for the console.
fn init_tracing(json: bool, level: &str, logging: &Logging) -> eyre::Result<Option<WorkerGuard>> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console: BoxedLayer = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter)
            .boxed()
    };
    let mut layers = vec![console];
    let mut guard = None;
    if let Some((file, g)) = file_layer(logging)? {
        layers.push(file);
        guard = Some(g);
    }
    // A subscriber may already be installed (e.g. by a test harness).
    let _ = tracing_subscriber::registry().with(layers).try_init();
    Ok(guard)
}

fn file_layer(logging: &Logging) -> eyre::Result<Option<(BoxedLayer, WorkerGuard)>> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};

    let Some(path) = logging.file.as_deref().map(Path::new) else {
        return Ok(None);
    };
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        eyre::bail!("logging.file {} has no file name", path.display());
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let rotation = match logging.rotation.as_deref() {
        Some("daily") => Rotation::DAILY,
        Some("hourly") => Rotation::HOURLY,
        _ => Rotation::NEVER,
    };
    let appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(name)
        .build(dir)
        .wrap_err_with(|| format!("open log file {}", path.display()))
        .wrap_err(Phase::Config)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let level = logging.level.as_deref().unwrap_or("info");
    let layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(EnvFilter::new(level))
        .boxed();
    Ok(Some((layer, guard)))
}

/// Validate the config and measure one simulated frame.
fn self_check(cfg: &Config, rig: &mut SimRig) -> eyre::Result<()> {
    let af = AutofocusConfig::from(cfg);
    af.validate()?;
    let frame = rig
        .camera
        .get_frame()
        .map_err(|e| eyre::Report::new(map_hw_error(Device::Camera, e.as_ref())))?;
    let error = astigmatic_error_signal(&frame.image, af.roi)?;
    let intensity = roi_total_intensity(&frame.image, af.roi)?;
    tracing::info!(error, intensity, "self-check frame measured");
    println!(
        "OK: z={:+.3} um error={error:+.4} roi_intensity={intensity:.1}",
        rig.stage.position_um()
    );
    Ok(())
}
