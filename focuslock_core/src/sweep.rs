//! Calibration sweep: step the stage through a Z range and measure the error at each stop.

use eyre::WrapErr;
use focuslock_traits::{Camera, Stage};

use crate::calibration::CalibrationSample;
use crate::controller::device_error;
use crate::error::{Result, SweepError};
use crate::hw_error::Device;
use crate::metric::{Roi, astigmatic_error_signal, roi_total_intensity};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPlan {
    pub z_min_um: f64,
    pub z_max_um: f64,
    pub n_steps: usize,
    /// Visit every Z ascending, then again descending.
    pub bidirectional: bool,
}

impl SweepPlan {
    pub fn new(z_min_um: f64, z_max_um: f64, n_steps: usize) -> Self {
        Self {
            z_min_um,
            z_max_um,
            n_steps,
            bidirectional: true,
        }
    }

    /// Symmetric sweep of `center_um +/- half_range_um`.
    pub fn centered(center_um: f64, half_range_um: f64, n_steps: usize) -> Self {
        Self::new(center_um - half_range_um, center_um + half_range_um, n_steps)
    }

    pub fn one_way(mut self) -> Self {
        self.bidirectional = false;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), SweepError> {
        if self.n_steps < 2 {
            return Err(SweepError::InvalidSweepRange("n_steps must be at least 2"));
        }
        if !(self.z_min_um.is_finite() && self.z_max_um.is_finite())
            || self.z_max_um <= self.z_min_um
        {
            return Err(SweepError::InvalidSweepRange(
                "z_max_um must be greater than z_min_um",
            ));
        }
        Ok(())
    }

    /// Stage targets in visiting order.
    pub fn targets(&self) -> std::result::Result<Vec<f64>, SweepError> {
        self.validate()?;
        let step = (self.z_max_um - self.z_min_um) / (self.n_steps - 1) as f64;
        let mut targets: Vec<f64> = (0..self.n_steps)
            .map(|i| self.z_min_um + i as f64 * step)
            .collect();
        if self.bidirectional {
            let back: Vec<f64> = targets.iter().rev().copied().collect();
            targets.extend(back);
        }
        Ok(targets)
    }
}

/// Progress of one sweep stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepProgress {
    /// 1-based.
    pub index: usize,
    pub total: usize,
    pub target_um: f64,
    /// Read-back Z, absent when the move failed.
    pub measured_z_um: Option<f64>,
    pub success: bool,
}

/// Run `plan` and collect one sample per successful move, in visiting order.
///
/// A rejected move is logged and skipped. `should_stop` is polled before
/// every move; returning true aborts with [`SweepError::Cancelled`] and
/// drops partial results. Camera and metric failures abort the sweep.
pub fn auto_calibrate<C, S>(
    camera: &mut C,
    stage: &mut S,
    roi: Roi,
    plan: &SweepPlan,
    mut should_stop: impl FnMut() -> bool,
    mut on_step: impl FnMut(&SweepProgress),
) -> Result<Vec<CalibrationSample>>
where
    C: Camera + ?Sized,
    S: Stage + ?Sized,
{
    let targets = plan.targets()?;
    let total = targets.len();
    tracing::info!(
        z_min_um = plan.z_min_um,
        z_max_um = plan.z_max_um,
        n_steps = plan.n_steps,
        bidirectional = plan.bidirectional,
        "calibration sweep started"
    );

    let mut out = Vec::with_capacity(total);
    let mut failures: Vec<(f64, String)> = Vec::new();
    for (i, &target) in targets.iter().enumerate() {
        if should_stop() {
            tracing::info!(completed = i, "calibration sweep cancelled");
            return Err(SweepError::Cancelled { completed: i }.into());
        }
        let index = i + 1;

        if let Err(e) = stage.move_z_um(target) {
            let cause = device_error(Device::Stage, &e).to_string();
            tracing::warn!(target_um = target, %cause, "sweep move failed, skipping");
            failures.push((target, cause));
            on_step(&SweepProgress {
                index,
                total,
                target_um: target,
                measured_z_um: None,
                success: false,
            });
            continue;
        }

        let frame = camera
            .get_frame()
            .map_err(|e| device_error(Device::Camera, &e))
            .wrap_err_with(|| format!("sweep frame at z={target:+.3} um"))?;
        let error = astigmatic_error_signal(&frame.image, roi)?;
        let weight = roi_total_intensity(&frame.image, roi)?.max(0.0);
        let measured = match stage.get_z_um() {
            Ok(z) => z,
            Err(e) => {
                tracing::debug!(target_um = target, error = %e, "Z read-back failed, using target");
                target
            }
        };

        on_step(&SweepProgress {
            index,
            total,
            target_um: target,
            measured_z_um: Some(measured),
            success: true,
        });
        out.push(CalibrationSample::new(measured, error, weight));
    }

    if out.len() < 2 {
        let detail = match failures.first() {
            Some((z, cause)) => format!(". First failed move at z={z:+.3} um: {cause}"),
            None => "; need at least 2 successful stage positions".to_string(),
        };
        return Err(SweepError::InsufficientCalibrationData {
            succeeded: out.len(),
            failed: failures.len(),
            detail,
        }
        .into());
    }

    tracing::info!(
        samples = out.len(),
        failed = failures.len(),
        "calibration sweep finished"
    );
    Ok(out)
}
