//! Test and helper mocks for focuslock_core.

use focuslock_traits::{Camera, CameraFrame, DeviceError, Image, Stage};

/// Camera returning the same image every call.
///
/// Timestamps advance by one second per frame unless a fixed sequence is
/// given, which lets tests replay stale (repeated) timestamps.
#[derive(Debug, Clone)]
pub struct StaticCamera {
    image: Image,
    timestamps: Vec<f64>,
    calls: usize,
}

impl StaticCamera {
    pub fn new(image: Image) -> Self {
        Self {
            image,
            timestamps: Vec::new(),
            calls: 0,
        }
    }

    /// Replay these timestamps in order; the last one repeats once exhausted.
    pub fn with_timestamps(mut self, ts: impl Into<Vec<f64>>) -> Self {
        self.timestamps = ts.into();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl Camera for StaticCamera {
    fn start(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn get_frame(&mut self) -> Result<CameraFrame, DeviceError> {
        let ts = if self.timestamps.is_empty() {
            self.calls as f64
        } else {
            let i = self.calls.min(self.timestamps.len() - 1);
            self.timestamps[i]
        };
        self.calls += 1;
        Ok(CameraFrame::new(self.image.clone(), ts))
    }
}

/// Stage that records every command.
///
/// Moves succeed unless `reject` says otherwise; a rejected move leaves the position unchanged.
#[derive(Default)]
pub struct MemoryStage {
    pub z_um: f64,
    pub moves: Vec<f64>,
    reject: Option<Box<dyn Fn(f64) -> bool + Send>>,
    fail_reads: bool,
}

impl std::fmt::Debug for MemoryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStage")
            .field("z_um", &self.z_um)
            .field("moves", &self.moves)
            .finish_non_exhaustive()
    }
}

impl MemoryStage {
    pub fn new(z_um: f64) -> Self {
        Self {
            z_um,
            ..Self::default()
        }
    }

    pub fn rejecting(mut self, reject: impl Fn(f64) -> bool + Send + 'static) -> Self {
        self.reject = Some(Box::new(reject));
        self
    }

    /// Make `get_z_um` fail from now on.
    pub fn fail_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }
}

impl Stage for MemoryStage {
    fn get_z_um(&mut self) -> Result<f64, DeviceError> {
        if self.fail_reads {
            return Err(Box::new(std::io::Error::other("position read failed")));
        }
        Ok(self.z_um)
    }

    fn move_z_um(&mut self, target_um: f64) -> Result<(), DeviceError> {
        if self.reject.as_ref().is_some_and(|r| r(target_um)) {
            return Err(Box::new(std::io::Error::other(format!(
                "move to {target_um:.4} um out of range"
            ))));
        }
        self.moves.push(target_um);
        self.z_um = target_um;
        Ok(())
    }
}
