//! PI focus controller.
//!
//! Each step reads a frame and the current Z, turns the ROI anisotropy into
//! a physical error through the active calibration, and commands a bounded
//! correction. Steps that cannot trust the frame (stale, dim or truncated
//! PSF) return a frozen sample and leave the stage alone.

use std::time::Duration;

use eyre::WrapErr;
use focuslock_traits::{Camera, Clock, DeviceError, MonotonicClock, Stage};

use crate::calibration::FocusCalibration;
use crate::config::AutofocusConfig;
use crate::error::{BuildError, Result};
use crate::hw_error::{Device, map_hw_error};
use crate::metric::{astigmatic_error_signal, centroid_near_edge, roi_total_intensity};
use crate::sample::{AutofocusSample, FreezeReason};
use crate::util;

pub(crate) fn device_error(device: Device, e: &DeviceError) -> eyre::Report {
    eyre::Report::new(map_hw_error(device, e.as_ref()))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct LoopState {
    integral_um: f64,
    filtered_error_um: Option<f64>,
    last_frame_ts: Option<f64>,
    z_lock_center_um: Option<f64>,
}

pub struct AutofocusController<C, S, K = MonotonicClock> {
    camera: C,
    stage: S,
    clock: K,
    config: AutofocusConfig,
    calibration: FocusCalibration,
    state: LoopState,
}

impl<C, S, K> core::fmt::Debug for AutofocusController<C, S, K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AutofocusController")
            .field("config", &self.config)
            .field("calibration", &self.calibration)
            .field("integral_um", &self.state.integral_um)
            .field("z_lock_center_um", &self.state.z_lock_center_um)
            .finish_non_exhaustive()
    }
}

/// Validate configuration and construct a controller.
///
/// Single source of truth for both `AutofocusController::new` and the builder.
pub(crate) fn validate_and_build<C, S, K>(
    camera: C,
    stage: S,
    clock: K,
    config: AutofocusConfig,
    calibration: FocusCalibration,
    initial_integral_um: f64,
) -> Result<AutofocusController<C, S, K>> {
    config.validate().map_err(eyre::Report::new)?;
    if !initial_integral_um.is_finite() {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "initial_integral_um must be finite",
        )));
    }
    Ok(AutofocusController {
        camera,
        stage,
        clock,
        config,
        calibration,
        state: LoopState {
            integral_um: initial_integral_um,
            ..LoopState::default()
        },
    })
}

impl<C: Camera, S: Stage> AutofocusController<C, S, MonotonicClock> {
    pub fn new(
        camera: C,
        stage: S,
        config: AutofocusConfig,
        calibration: FocusCalibration,
    ) -> Result<Self> {
        validate_and_build(camera, stage, MonotonicClock::new(), config, calibration, 0.0)
    }
}

impl<C: Camera, S: Stage, K: Clock> AutofocusController<C, S, K> {
    #[inline]
    pub fn loop_hz(&self) -> f64 {
        self.config.loop_hz
    }

    pub fn config(&self) -> &AutofocusConfig {
        &self.config
    }

    pub fn calibration(&self) -> FocusCalibration {
        self.calibration
    }

    /// Swap the calibration. The integrator and lock centre are kept.
    pub fn set_calibration(&mut self, calibration: FocusCalibration) {
        tracing::info!(
            error_at_focus = calibration.error_at_focus,
            error_to_um = calibration.error_to_um,
            "calibration updated"
        );
        self.calibration = calibration;
    }

    pub fn integral_um(&self) -> f64 {
        self.state.integral_um
    }

    pub fn filtered_error_um(&self) -> Option<f64> {
        self.state.filtered_error_um
    }

    /// Z recorded on the first step; anchor of the excursion clamp.
    pub fn z_lock_center_um(&self) -> Option<f64> {
        self.state.z_lock_center_um
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    pub fn camera_mut(&mut self) -> &mut C {
        &mut self.camera
    }

    pub fn stage_mut(&mut self) -> &mut S {
        &mut self.stage
    }

    pub fn into_parts(self) -> (C, S) {
        (self.camera, self.stage)
    }

    fn apply_limits(&self, mut target_um: f64) -> f64 {
        if let (Some(center), Some(exc)) = (
            self.state.z_lock_center_um,
            self.config.max_abs_excursion_um,
        ) {
            target_um = target_um.min(center + exc).max(center - exc);
        }
        if let Some(lo) = self.config.stage_min_um {
            target_um = target_um.max(lo);
        }
        if let Some(hi) = self.config.stage_max_um {
            target_um = target_um.min(hi);
        }
        target_um
    }

    fn clamp_integral(&mut self) {
        let lim = self.config.integral_limit_um;
        self.state.integral_um = self.state.integral_um.clamp(-lim, lim);
    }

    /// One control iteration.
    ///
    /// `dt_s` defaults to `1 / loop_hz`. Camera and stage failures are
    /// returned to the caller; nothing is retried here.
    pub fn run_step(&mut self, dt_s: Option<f64>) -> Result<AutofocusSample> {
        let frame = self
            .camera
            .get_frame()
            .map_err(|e| device_error(Device::Camera, &e))
            .wrap_err("camera get_frame failed")?;
        let current_z = self
            .stage
            .get_z_um()
            .map_err(|e| device_error(Device::Stage, &e))
            .wrap_err("stage get_z_um failed")?;
        let center = *self.state.z_lock_center_um.get_or_insert(current_z);

        let ts = frame.timestamp_s;
        if self.state.last_frame_ts == Some(ts) {
            tracing::debug!(timestamp_s = ts, "duplicate frame, control frozen");
            return Ok(AutofocusSample::frozen(
                ts,
                current_z,
                0.0,
                FreezeReason::DuplicateFrame,
            ));
        }
        self.state.last_frame_ts = Some(ts);

        let roi = self.config.roi;
        let intensity = roi_total_intensity(&frame.image, roi)?;
        if self.config.min_roi_intensity.is_some_and(|min| intensity < min) {
            tracing::debug!(intensity, "ROI intensity below floor, control frozen");
            return Ok(AutofocusSample::frozen(
                ts,
                current_z,
                intensity,
                FreezeReason::LowIntensity,
            ));
        }
        if self.config.edge_margin_px > 0.0
            && centroid_near_edge(&frame.image, roi, self.config.edge_margin_px)?
        {
            tracing::debug!(intensity, "PSF centroid near ROI edge, control frozen");
            return Ok(AutofocusSample::frozen(
                ts,
                current_z,
                intensity,
                FreezeReason::EdgeTruncation,
            ));
        }

        let error = astigmatic_error_signal(&frame.image, roi)?;
        let mut error_um = self.calibration.error_to_z_offset_um(error);
        let alpha = self.config.error_alpha;
        if alpha > 0.0 && alpha < 1.0 {
            if let Some(prev) = self.state.filtered_error_um {
                error_um = alpha * prev + (1.0 - alpha) * error_um;
            }
        }
        self.state.filtered_error_um = Some(error_um);

        let dt = dt_s.unwrap_or(1.0 / self.config.loop_hz);
        self.state.integral_um += error_um * dt;
        self.clamp_integral();

        let max_step = self.config.max_step_um;
        let correction = (-(self.config.kp * error_um + self.config.ki * self.state.integral_um))
            .clamp(-max_step, max_step);
        let raw_target = current_z + correction;
        let commanded_z = self.apply_limits(raw_target);

        if commanded_z != raw_target {
            self.state.integral_um -= error_um * dt;
            self.clamp_integral();
            tracing::debug!(
                raw_target,
                commanded_z,
                lock_center_um = center,
                "command saturated, integrator held"
            );
        }

        self.stage
            .move_z_um(commanded_z)
            .map_err(|e| device_error(Device::Stage, &e))
            .wrap_err_with(|| format!("stage move_z_um({commanded_z:.4}) failed"))?;

        tracing::trace!(
            timestamp_s = ts,
            error,
            error_um,
            stage_z_um = current_z,
            commanded_z_um = commanded_z,
            integral_um = self.state.integral_um,
            "control step"
        );

        Ok(AutofocusSample {
            timestamp_s: ts,
            error,
            error_um,
            stage_z_um: current_z,
            commanded_z_um: commanded_z,
            roi_total_intensity: intensity,
            control_applied: true,
            freeze: None,
        })
    }

    /// Run for `duration_s` seconds at `loop_hz`.
    pub fn run(&mut self, duration_s: f64) -> Result<Vec<AutofocusSample>> {
        self.run_until(duration_s, || false)
    }

    /// Timed run that also ends early once `should_stop` returns true.
    ///
    /// `dt` is the measured time between step starts (nominal on the first
    /// step) and each iteration sleeps whatever is left of the period.
    pub fn run_until(
        &mut self,
        duration_s: f64,
        should_stop: impl FnMut() -> bool,
    ) -> Result<Vec<AutofocusSample>> {
        self.run_paced(duration_s, should_stop, |_, _| {})
    }

    /// Same loop as [`run_until`](Self::run_until), handing each sample and
    /// the step's latency (as seen by the controller's clock) to `on_step`.
    pub fn run_paced(
        &mut self,
        duration_s: f64,
        mut should_stop: impl FnMut() -> bool,
        mut on_step: impl FnMut(&AutofocusSample, Duration),
    ) -> Result<Vec<AutofocusSample>> {
        let loop_dt = util::period(self.config.loop_hz);
        let start = self.clock.now();
        let Some(end) = util::secs(duration_s).and_then(|d| start.checked_add(d)) else {
            eyre::bail!("run duration {duration_s} s is out of range");
        };
        let mut samples = Vec::new();
        let mut last_start = None;
        while self.clock.now() < end && !should_stop() {
            let step_start = self.clock.now();
            let dt = last_start.map_or(loop_dt, |prev| step_start.saturating_duration_since(prev));
            let sample = self.run_step(Some(dt.as_secs_f64()))?;
            last_start = Some(step_start);
            let elapsed = self.clock.now().saturating_duration_since(step_start);
            on_step(&sample, elapsed);
            samples.push(sample);
            let rest = util::residual(loop_dt, elapsed);
            if rest > Duration::ZERO {
                self.clock.sleep(rest);
            }
        }
        tracing::debug!(steps = samples.len(), "timed run finished");
        Ok(samples)
    }
}
