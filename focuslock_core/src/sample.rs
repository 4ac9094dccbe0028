/// Why a step observed a frame but left the stage alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FreezeReason {
    /// Frame timestamp matched the previous step's frame.
    DuplicateFrame,
    /// ROI intensity was below the configured floor.
    LowIntensity,
    /// PSF centroid was too close to the ROI border.
    EdgeTruncation,
}

impl FreezeReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateFrame => "duplicate_frame",
            Self::LowIntensity => "low_intensity",
            Self::EdgeTruncation => "edge_truncation",
        }
    }
}

/// Observation and decision of one control step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutofocusSample {
    pub timestamp_s: f64,
    /// Raw anisotropy error.
    pub error: f64,
    /// Error after calibration and smoothing (um).
    pub error_um: f64,
    pub stage_z_um: f64,
    pub commanded_z_um: f64,
    pub roi_total_intensity: f64,
    pub control_applied: bool,
    pub freeze: Option<FreezeReason>,
}

impl AutofocusSample {
    pub(crate) fn frozen(timestamp_s: f64, z_um: f64, intensity: f64, reason: FreezeReason) -> Self {
        Self {
            timestamp_s,
            error: 0.0,
            error_um: 0.0,
            stage_z_um: z_um,
            commanded_z_um: z_um,
            roi_total_intensity: intensity,
            control_applied: false,
            freeze: Some(reason),
        }
    }
}
