//! Type-state builder for `AutofocusController`.
//!
//! `build()` only exists once both a camera and a stage have been supplied;
//! configuration defaults apply when not set, and the calibration is checked
//! at build time.

use focuslock_traits::{Camera, Clock, MonotonicClock, Stage};

use crate::calibration::FocusCalibration;
use crate::config::AutofocusConfig;
use crate::controller::{AutofocusController, validate_and_build};
use crate::error::{BuildError, Result};

/// Placeholder for a collaborator that has not been provided yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct Missing;

#[derive(Debug)]
pub struct ControllerBuilder<C = Missing, S = Missing, K = MonotonicClock> {
    camera: C,
    stage: S,
    clock: K,
    config: Option<AutofocusConfig>,
    calibration: Option<FocusCalibration>,
    initial_integral_um: f64,
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self {
            camera: Missing,
            stage: Missing,
            clock: MonotonicClock::new(),
            config: None,
            calibration: None,
            initial_integral_um: 0.0,
        }
    }
}

impl<C, S, K> ControllerBuilder<C, S, K> {
    pub fn with_config(mut self, config: AutofocusConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_calibration(mut self, calibration: FocusCalibration) -> Self {
        self.calibration = Some(calibration);
        self
    }

    /// Seed the integrator, e.g. to carry state over from a previous lock.
    pub fn with_initial_integral(mut self, integral_um: f64) -> Self {
        self.initial_integral_um = integral_um;
        self
    }

    pub fn with_clock<K2: Clock>(self, clock: K2) -> ControllerBuilder<C, S, K2> {
        ControllerBuilder {
            camera: self.camera,
            stage: self.stage,
            clock,
            config: self.config,
            calibration: self.calibration,
            initial_integral_um: self.initial_integral_um,
        }
    }
}

impl<S, K> ControllerBuilder<Missing, S, K> {
    pub fn with_camera<C: Camera>(self, camera: C) -> ControllerBuilder<C, S, K> {
        ControllerBuilder {
            camera,
            stage: self.stage,
            clock: self.clock,
            config: self.config,
            calibration: self.calibration,
            initial_integral_um: self.initial_integral_um,
        }
    }
}

impl<C, K> ControllerBuilder<C, Missing, K> {
    pub fn with_stage<S: Stage>(self, stage: S) -> ControllerBuilder<C, S, K> {
        ControllerBuilder {
            camera: self.camera,
            stage,
            clock: self.clock,
            config: self.config,
            calibration: self.calibration,
            initial_integral_um: self.initial_integral_um,
        }
    }
}

impl<C: Camera, S: Stage, K: Clock> ControllerBuilder<C, S, K> {
    pub fn build(self) -> Result<AutofocusController<C, S, K>> {
        let calibration = self
            .calibration
            .ok_or_else(|| eyre::Report::new(BuildError::MissingCalibration))?;
        validate_and_build(
            self.camera,
            self.stage,
            self.clock,
            self.config.unwrap_or_default(),
            calibration,
            self.initial_integral_um,
        )
    }
}
