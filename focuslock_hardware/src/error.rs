use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("{device} not started")]
    NotStarted { device: &'static str },
    #[error("frame source failed: {0}")]
    FrameSource(String),
    #[error("stage move to {target_um:.4} um rejected: outside travel range [{min_um:.4}, {max_um:.4}]")]
    MoveRejected {
        target_um: f64,
        min_um: f64,
        max_um: f64,
    },
    #[error("stage move to non-finite target {0}")]
    NonFiniteTarget(f64),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
