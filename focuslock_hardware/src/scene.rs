use std::time::{SystemTime, UNIX_EPOCH};

use focuslock_traits::{Camera, CameraFrame, DeviceError, Image, ImageError};

use crate::error::HwError;
use crate::stage::SimulatedStage;

const MIN_SIGMA_PX: f64 = 0.6;

/// Gaussian PSF seen through a cylindrical lens.
///
/// Above the focal plane the PSF widens in x and narrows in y; below it the
/// opposite happens, so the second-moment anisotropy changes sign at focus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedScene {
    pub focal_plane_um: f64,
    pub sigma0_px: f64,
    pub alpha_px_per_um: f64,
    /// Square image side in pixels.
    pub size_px: usize,
    pub amplitude: f64,
}

impl Default for SimulatedScene {
    fn default() -> Self {
        Self {
            focal_plane_um: 0.0,
            sigma0_px: 1.2,
            alpha_px_per_um: 0.25,
            size_px: 64,
            amplitude: 4095.0,
        }
    }
}

impl SimulatedScene {
    /// PSF widths `(sigma_x, sigma_y)` at stage position `z_um`.
    pub fn sigmas_px(&self, z_um: f64) -> (f64, f64) {
        let dz = z_um - self.focal_plane_um;
        let sx = (self.sigma0_px + self.alpha_px_per_um * dz).max(MIN_SIGMA_PX);
        let sy = (self.sigma0_px - self.alpha_px_per_um * dz).max(MIN_SIGMA_PX);
        (sx, sy)
    }

    /// Render a centred PSF for stage position `z_um`.
    pub fn render_dot(&self, z_um: f64) -> Result<Image, ImageError> {
        let (sx, sy) = self.sigmas_px(z_um);
        let size = self.size_px;
        let c = (size as f64 - 1.0) / 2.0;
        let (two_sx2, two_sy2) = (2.0 * sx * sx, 2.0 * sy * sy);
        let mut data = Vec::with_capacity(size * size);
        for y in 0..size {
            let dy = y as f64 - c;
            for x in 0..size {
                let dx = x as f64 - c;
                data.push((-(dx * dx) / two_sx2 - (dy * dy) / two_sy2).exp() * self.amplitude);
            }
        }
        Image::from_vec(size, size, data)
    }
}

/// Camera that renders [`SimulatedScene`] at the position of a shared stage.
#[derive(Debug)]
pub struct SimulatedCamera {
    scene: SimulatedScene,
    stage: SimulatedStage,
    started: bool,
    last_timestamp_s: f64,
}

impl SimulatedCamera {
    pub fn new(stage: SimulatedStage, scene: SimulatedScene) -> Self {
        Self {
            scene,
            stage,
            started: false,
            last_timestamp_s: 0.0,
        }
    }

    pub fn scene(&self) -> &SimulatedScene {
        &self.scene
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Wall-clock seconds, nudged forward so consecutive frames never share a timestamp.
    fn next_timestamp(&mut self) -> f64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let ts = if now > self.last_timestamp_s {
            now
        } else {
            self.last_timestamp_s + 1e-6
        };
        self.last_timestamp_s = ts;
        ts
    }
}

impl Camera for SimulatedCamera {
    fn start(&mut self) -> Result<(), DeviceError> {
        tracing::debug!("simulated camera started");
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.started = false;
        Ok(())
    }

    fn get_frame(&mut self) -> Result<CameraFrame, DeviceError> {
        if !self.started {
            return Err(Box::new(HwError::NotStarted {
                device: "Simulated camera",
            }));
        }
        let image = self.scene.render_dot(self.stage.position_um())?;
        Ok(CameraFrame::new(image, self.next_timestamp()))
    }
}
