//! Simulated camera/stage pair the CLI drives.

use focuslock_core::hw_error::{Device, map_hw_error};
use focuslock_hardware::{SimulatedCamera, SimulatedScene, SimulatedStage};
use focuslock_traits::Camera;

pub struct SimRig {
    pub camera: SimulatedCamera,
    pub stage: SimulatedStage,
}

impl SimRig {
    /// Started camera looking at a PSF whose focal plane is Z = 0.
    pub fn start(z_um: f64) -> eyre::Result<Self> {
        if !z_um.is_finite() {
            eyre::bail!("--sim-z-um must be finite");
        }
        let stage = SimulatedStage::new(z_um);
        let mut camera = SimulatedCamera::new(stage.clone(), SimulatedScene::default());
        camera
            .start()
            .map_err(|e| eyre::Report::new(map_hw_error(Device::Camera, e.as_ref())))?;
        tracing::debug!(z_um, "simulated rig ready");
        Ok(Self { camera, stage })
    }

    pub fn shutdown(&mut self) {
        if let Err(e) = self.camera.stop() {
            tracing::warn!(error = %e, "camera stop failed");
        }
    }
}
