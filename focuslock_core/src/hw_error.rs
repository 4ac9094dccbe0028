//! Maps `Box<dyn Error>` from device trait boundaries to typed `FocusError`.
//!
//! The traits in `focuslock_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, with an optional
//! feature-gated path for `focuslock_hardware::HwError` downcasting.

use crate::error::FocusError;

/// Which collaborator produced the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Camera,
    Stage,
}

/// Map a trait-boundary error to a typed `FocusError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(device: Device, e: &(dyn std::error::Error + 'static)) -> FocusError {
    #[cfg(feature = "hardware-errors")]
    {
        use focuslock_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::NotStarted { .. } => FocusError::NotStarted(hw.to_string()),
                HwError::MoveRejected { .. } | HwError::NonFiniteTarget(_) => {
                    FocusError::StageRejected(hw.to_string())
                }
                other => by_device(device, other.to_string()),
            };
        }
    }

    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("not started") {
        FocusError::NotStarted(s)
    } else if lower.contains("timeout") || lower.contains("timed out") {
        FocusError::Timeout
    } else if device == Device::Stage && (lower.contains("range") || lower.contains("reject")) {
        FocusError::StageRejected(s)
    } else {
        by_device(device, s)
    }
}

fn by_device(device: Device, s: String) -> FocusError {
    match device {
        Device::Camera => FocusError::Camera(s),
        Device::Stage => FocusError::Stage(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristics_without_typed_error() {
        let e = std::io::Error::other("move out of range (status -6)");
        assert!(matches!(
            map_hw_error(Device::Stage, &e),
            FocusError::StageRejected(_)
        ));
        let e = std::io::Error::other("frame wait timed out");
        assert_eq!(map_hw_error(Device::Camera, &e), FocusError::Timeout);
        let e = std::io::Error::other("bus fault");
        assert!(matches!(map_hw_error(Device::Camera, &e), FocusError::Camera(_)));
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn typed_hardware_errors_are_downcast() {
        use focuslock_hardware::error::HwError;
        let e = HwError::NotStarted {
            device: "Simulated camera",
        };
        assert!(matches!(
            map_hw_error(Device::Camera, &e),
            FocusError::NotStarted(_)
        ));
        let e = HwError::MoveRejected {
            target_um: 9.0,
            min_um: 0.0,
            max_um: 1.0,
        };
        assert!(matches!(
            map_hw_error(Device::Stage, &e),
            FocusError::StageRejected(_)
        ));
    }
}
