use std::sync::{Arc, Mutex, PoisonError};

use focuslock_traits::{DeviceError, Stage};

use crate::error::HwError;

/// In-memory Z stage.
///
/// Clones share position, so a [`crate::SimulatedCamera`] can follow the
/// stage the controller commands. An optional travel range rejects moves
/// outside it the way piezo controllers report an out-of-range status.
#[derive(Debug, Clone)]
pub struct SimulatedStage {
    z_um: Arc<Mutex<f64>>,
    range_um: Option<(f64, f64)>,
}

impl Default for SimulatedStage {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl SimulatedStage {
    pub fn new(z_um: f64) -> Self {
        Self {
            z_um: Arc::new(Mutex::new(z_um)),
            range_um: None,
        }
    }

    pub fn with_range(mut self, min_um: f64, max_um: f64) -> Self {
        self.range_um = Some((min_um.min(max_um), min_um.max(max_um)));
        self
    }

    pub fn range_um(&self) -> Option<(f64, f64)> {
        self.range_um
    }

    /// Current position without going through the trait.
    pub fn position_um(&self) -> f64 {
        *self.z_um.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_position_um(&self, z_um: f64) {
        *self.z_um.lock().unwrap_or_else(PoisonError::into_inner) = z_um;
    }
}

impl Stage for SimulatedStage {
    fn get_z_um(&mut self) -> Result<f64, DeviceError> {
        Ok(self.position_um())
    }

    fn move_z_um(&mut self, target_um: f64) -> Result<(), DeviceError> {
        if !target_um.is_finite() {
            return Err(Box::new(HwError::NonFiniteTarget(target_um)));
        }
        if let Some((min_um, max_um)) = self.range_um {
            if !(min_um..=max_um).contains(&target_um) {
                tracing::debug!(target_um, min_um, max_um, "simulated stage rejected move");
                return Err(Box::new(HwError::MoveRejected {
                    target_um,
                    min_um,
                    max_um,
                }));
            }
        }
        tracing::trace!(target_um, "simulated stage move");
        self.set_position_um(target_um);
        Ok(())
    }
}
