use focuslock_traits::{Camera, CameraFrame, DeviceError};

use crate::error::HwError;

type FrameSource = Box<dyn FnMut() -> Result<CameraFrame, DeviceError> + Send>;

/// Adapts any frame-producing closure to the [`Camera`] lifecycle.
///
/// Useful for bridging an acquisition library that only exposes
/// "give me the latest buffer" without an explicit start/stop.
pub struct CallbackCamera {
    source: FrameSource,
    started: bool,
}

impl std::fmt::Debug for CallbackCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackCamera")
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl CallbackCamera {
    pub fn new<F>(source: F) -> Self
    where
        F: FnMut() -> Result<CameraFrame, DeviceError> + Send + 'static,
    {
        Self {
            source: Box::new(source),
            started: false,
        }
    }
}

impl Camera for CallbackCamera {
    fn start(&mut self) -> Result<(), DeviceError> {
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
                device: "Callback camera",
            }));
        }
        (self.source)().map_err(|e| -> DeviceError { Box::new(HwError::FrameSource(e.to_string())) })
    }
}
