//! `focuslock run`: hold focus with the saved calibration.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use eyre::WrapErr;
use focuslock_config::Config;
use focuslock_core::util;
use focuslock_core::{
    AutofocusConfig, AutofocusController, AutofocusSample, AutofocusWorker, ControllerBuilder,
};
use focuslock_hardware::{SimulatedCamera, SimulatedStage};
use focuslock_traits::{Camera, Clock, Stage};

use crate::calibrate::load_startup_calibration;
use crate::cli::{ControlOverrides, Mode, RtArgs, RtLock, json_mode};
use crate::error_fmt::Phase;
use crate::rig::SimRig;
use crate::rt::setup_rt_once;

type SimController = AutofocusController<SimulatedCamera, SimulatedStage>;

/// Flags from the `run` subcommand.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub duration_s: f64,
    pub calibration_csv: Option<PathBuf>,
    pub lenient: bool,
    pub mode: Option<Mode>,
    pub stats: bool,
    pub control: ControlOverrides,
    pub rt: RtArgs,
}

/// Config file values with command-line overrides applied on top.
pub fn autofocus_config(cfg: &Config, o: &ControlOverrides) -> AutofocusConfig {
    let mut af = AutofocusConfig::from(cfg);
    if let Some(v) = o.loop_hz {
        af.loop_hz = v;
    }
    if let Some(v) = o.kp {
        af.kp = v;
    }
    if let Some(v) = o.ki {
        af.ki = v;
    }
    if let Some(v) = o.max_step_um {
        af.max_step_um = v;
    }
    if let Some(v) = o.stage_min_um {
        af.stage_min_um = Some(v);
    }
    if let Some(v) = o.stage_max_um {
        af.stage_max_um = Some(v);
    }
    if let Some(v) = o.max_excursion_um {
        af.max_abs_excursion_um = (v >= 0.0).then_some(v);
    }
    af
}

pub fn run(
    cfg: &Config,
    rig: SimRig,
    args: &RunArgs,
    shutdown: &AtomicBool,
) -> eyre::Result<()> {
    let af = autofocus_config(cfg, &args.control);
    let calibration =
        load_startup_calibration(cfg, args.calibration_csv.as_deref(), args.lenient)?;

    setup_rt_once(
        args.rt.rt,
        args.rt.rt_prio,
        args.rt.rt_lock.unwrap_or(RtLock::Current),
    );

    let controller = ControllerBuilder::new()
        .with_config(af)
        .with_calibration(calibration)
        .with_initial_integral(cfg.control.initial_integral_um)
        .with_camera(rig.camera)
        .with_stage(rig.stage)
        .build()?;

    let mode = args.mode.unwrap_or_else(|| cfg.runner.mode.into());
    tracing::info!(
        ?mode,
        duration_s = args.duration_s,
        loop_hz = af.loop_hz,
        "autofocus run start"
    );
    let samples = match mode {
        Mode::Timed if args.stats => {
            let loop_hz = controller.loop_hz();
            let (samples, stats) = run_with_stats(controller, args.duration_s, shutdown)?;
            if !stats.latencies_us.is_empty() {
                print_stats(&stats, loop_hz);
            }
            samples
        }
        Mode::Timed => run_timed(controller, args.duration_s, shutdown)?,
        Mode::Worker => {
            if args.stats {
                eprintln!("Warning: --stats is only collected in timed mode; ignoring");
            }
            run_worker(controller, args.duration_s, shutdown)?
        }
    };

    print_summary(&samples);
    if shutdown.load(Ordering::Relaxed) {
        return Err(eyre::eyre!("run stopped after {} steps", samples.len()))
            .wrap_err(Phase::Interrupted);
    }
    Ok(())
}

fn stop_camera<C: Camera>(camera: &mut C) {
    if let Err(e) = camera.stop() {
        tracing::warn!(error = %e, "camera stop failed");
    }
}

fn run_timed(
    mut controller: SimController,
    duration_s: f64,
    shutdown: &AtomicBool,
) -> eyre::Result<Vec<AutofocusSample>> {
    let samples = controller.run_until(duration_s, || shutdown.load(Ordering::Relaxed));
    stop_camera(controller.camera_mut());
    samples
}

/// Per-step latency of a timed run.
#[derive(Debug, Default)]
struct StepStats {
    latencies_us: Vec<u64>,
    missed_deadlines: usize,
}

impl StepStats {
    fn record(&mut self, latency: Duration, period: Duration) {
        self.latencies_us
            .push(u64::try_from(latency.as_micros()).unwrap_or(u64::MAX));
        if latency > period {
            self.missed_deadlines = self.missed_deadlines.saturating_add(1);
        }
    }
}

/// Timed loop that also records how long each step took.
fn run_with_stats<C: Camera, S: Stage, K: Clock>(
    mut controller: AutofocusController<C, S, K>,
    duration_s: f64,
    shutdown: &AtomicBool,
) -> eyre::Result<(Vec<AutofocusSample>, StepStats)> {
    let period = util::period(controller.loop_hz());
    let mut stats = StepStats::default();
    let samples = controller.run_paced(
        duration_s,
        || shutdown.load(Ordering::Relaxed),
        |_, latency| stats.record(latency, period),
    );
    stop_camera(controller.camera_mut());
    Ok((samples?, stats))
}

fn run_worker(
    controller: SimController,
    duration_s: f64,
    shutdown: &AtomicBool,
) -> eyre::Result<Vec<AutofocusSample>> {
    let Some(total) = util::secs(duration_s) else {
        eyre::bail!("run duration {duration_s} s is out of range");
    };
    let mut worker = AutofocusWorker::new(controller);
    let rx = worker.subscribe(1024);
    worker.start()?;

    let deadline = Instant::now() + total;
    let mut samples = Vec::new();
    while Instant::now() < deadline && !shutdown.load(Ordering::Relaxed) && worker.is_running() {
        if let Ok(s) = rx.recv_timeout(Duration::from_millis(20)) {
            samples.push(s);
        }
    }
    worker.stop(true);
    samples.extend(rx.try_iter());
    worker.with_controller(|c| stop_camera(c.camera_mut()));

    if let Some(e) = worker.take_last_error() {
        return Err(e.wrap_err("autofocus worker stopped"));
    }
    Ok(samples)
}

fn print_summary(samples: &[AutofocusSample]) {
    let frozen = samples.iter().filter(|s| !s.control_applied).count();
    let Some(last) = samples.last() else {
        if json_mode() {
            println!("{}", serde_json::json!({ "steps": 0 }));
        } else {
            println!("steps=0");
        }
        return;
    };
    if json_mode() {
        println!(
            "{}",
            serde_json::json!({
                "steps": samples.len(),
                "frozen": frozen,
                "final_error": last.error,
                "final_error_um": last.error_um,
                "stage_um": last.commanded_z_um,
                "freeze": last.freeze.map(|f| f.as_str()),
            })
        );
    } else {
        println!(
            "steps={} frozen={frozen} final_error={:+.4} final_error_um={:+.3} stage={:+.3} um",
            samples.len(),
            last.error,
            last.error_um,
            last.commanded_z_um
        );
    }
}

/// Print latency/jitter stats to stderr.
fn print_stats(stats: &StepStats, loop_hz: f64) {
    let latencies_us = &stats.latencies_us;
    let period_us = util::period(loop_hz).as_micros();
    let min = latencies_us.iter().copied().min().unwrap_or(0);
    let max = latencies_us.iter().copied().max().unwrap_or(0);
    let n = latencies_us.len() as f64;
    let avg = latencies_us.iter().sum::<u64>() as f64 / n;
    let stdev = if latencies_us.len() > 1 {
        let var = latencies_us
            .iter()
            .map(|&x| (x as f64 - avg).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        var.sqrt()
    } else {
        0.0
    };
    eprintln!("\n--- Autofocus Stats ---");
    eprintln!("Steps: {}", latencies_us.len());
    eprintln!("Period (us): {period_us}");
    eprintln!("Latency min/avg/max/stdev (us): {min} / {avg:.1} / {max} / {stdev:.1}");
    eprintln!("Missed deadlines (> period): {}", stats.missed_deadlines);
    eprintln!("-----------------------\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use focuslock_traits::ManualClock;

    #[test]
    fn overrides_win_over_file_values() {
        let cfg = focuslock_config::load_toml("[control]\nkp = 0.3\nloop_hz = 50.0\n").unwrap();
        let o = ControlOverrides {
            kp: Some(0.9),
            max_excursion_um: Some(-1.0),
            stage_min_um: Some(-3.0),
            ..ControlOverrides::default()
        };
        let af = autofocus_config(&cfg, &o);
        assert_eq!(af.kp, 0.9);
        assert_eq!(af.loop_hz, 50.0);
        assert_eq!(af.max_abs_excursion_um, None);
        assert_eq!(af.stage_min_um, Some(-3.0));
        assert_eq!(af.stage_max_um, None);
    }

    fn manual_controller(
        clock: ManualClock,
    ) -> AutofocusController<SimulatedCamera, SimulatedStage, ManualClock> {
        let rig = SimRig::start(0.5).unwrap();
        ControllerBuilder::new()
            .with_config(AutofocusConfig {
                loop_hz: 100.0,
                ..AutofocusConfig::default()
            })
            .with_clock(clock)
            .with_camera(rig.camera)
            .with_stage(rig.stage)
            .build()
            .unwrap()
    }

    #[test]
    fn stats_cover_every_step_of_a_clocked_run() {
        let clock = ManualClock::new();
        let shutdown = AtomicBool::new(false);
        let (samples, stats) =
            run_with_stats(manual_controller(clock.clone()), 0.5, &shutdown).unwrap();
        assert!((50..=51).contains(&samples.len()), "{}", samples.len());
        assert_eq!(stats.latencies_us.len(), samples.len());
        assert_eq!(stats.missed_deadlines, 0);
        assert!(clock.elapsed() >= Duration::from_millis(500));
    }

    #[test]
    fn stats_run_honours_shutdown() {
        let shutdown = AtomicBool::new(true);
        let (samples, stats) =
            run_with_stats(manual_controller(ManualClock::new()), 0.5, &shutdown).unwrap();
        assert!(samples.is_empty());
        assert!(stats.latencies_us.is_empty());
    }

    #[test]
    fn slow_steps_count_as_missed_deadlines() {
        let period = Duration::from_millis(10);
        let mut stats = StepStats::default();
        stats.record(Duration::from_millis(4), period);
        stats.record(Duration::from_millis(10), period);
        stats.record(Duration::from_millis(12), period);
        assert_eq!(stats.latencies_us, vec![4_000, 10_000, 12_000]);
        assert_eq!(stats.missed_deadlines, 1);
    }

    #[test]
    fn default_excursion_survives_without_override() {
        let af = autofocus_config(&Config::default(), &ControlOverrides::default());
        assert_eq!(af.max_abs_excursion_um, Some(5.0));
    }
}
