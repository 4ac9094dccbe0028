//! Capability interfaces shared by the autofocus core and its device backends.
//!
//! The core never talks to hardware directly; it only sees a [`Camera`] that
//! yields timestamped frames and a [`Stage`] that reads and commands Z.
pub mod clock;
pub mod image;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use image::{Image, ImageError};

/// Error type used at the device trait boundary.
pub type DeviceError = Box<dyn std::error::Error + Send + Sync>;

/// One acquisition from a camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    pub image: Image,
    /// Acquisition time in seconds. Two frames with equal timestamps are the same frame.
    pub timestamp_s: f64,
}

impl CameraFrame {
    pub fn new(image: Image, timestamp_s: f64) -> Self {
        Self { image, timestamp_s }
    }
}

pub trait Camera {
    fn start(&mut self) -> Result<(), DeviceError>;
    fn stop(&mut self) -> Result<(), DeviceError>;
    /// Latest frame. Implementations must fail distinguishably when not started.
    fn get_frame(&mut self) -> Result<CameraFrame, DeviceError>;
}

pub trait Stage {
    fn get_z_um(&mut self) -> Result<f64, DeviceError>;
    /// Move to an absolute Z. Out-of-range targets must be rejected, not clamped.
    fn move_z_um(&mut self, target_um: f64) -> Result<(), DeviceError>;
}

impl<T: Camera + ?Sized> Camera for Box<T> {
    fn start(&mut self) -> Result<(), DeviceError> {
        (**self).start()
    }
    fn stop(&mut self) -> Result<(), DeviceError> {
        (**self).stop()
    }
    fn get_frame(&mut self) -> Result<CameraFrame, DeviceError> {
        (**self).get_frame()
    }
}

impl<T: Stage + ?Sized> Stage for Box<T> {
    fn get_z_um(&mut self) -> Result<f64, DeviceError> {
        (**self).get_z_um()
    }
    fn move_z_um(&mut self, target_um: f64) -> Result<(), DeviceError> {
        (**self).move_z_um(target_um)
    }
}
