//! Simulated camera and stage backends.
//!
//! These stand in for real microscope hardware in the CLI `simulate` backend
//! and in end-to-end tests. The camera renders an astigmatic PSF whose shape
//! follows the simulated stage's Z position.
pub mod callback;
pub mod error;
pub mod scene;
pub mod stage;

pub use callback::CallbackCamera;
pub use scene::{SimulatedCamera, SimulatedScene};
pub use stage::SimulatedStage;
