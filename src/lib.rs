//! Geometric camera models with a shared projection contract.
//!
//! Three model families cover most real lenses:
//!
//! * [`PinholeModel`]: perspective projection with radial-tangential
//!   distortion, for conventional lenses up to roughly 120 degrees.
//! * [`FisheyeModel`]: the Kannala-Brandt polynomial-in-angle model for
//!   wide fisheye lenses, valid past 90 degrees off-axis.
//! * [`OmnidirectionalModel`]: Mei's unified sphere model for catadioptric
//!   rigs and extreme fisheyes.
//!
//! All three implement [`ProjectionModel`], so projection, lifting,
//! Jacobians, calibration and rectification are written once against the
//! trait. Models round-trip through YAML via [`ParameterSet`], calibrate
//! from planar board views with [`Calibrator`], and produce undistortion
//! lookup tables through [`RectificationMapBuilder`].
//!
//! ```no_run
//! use camera_models::{model_from_parameters, ParameterSet};
//!
//! # fn main() -> Result<(), camera_models::CameraModelError> {
//! let params = ParameterSet::from_yaml_file("camera.yaml")?;
//! let model = model_from_parameters(params)?;
//! let ray = model.lift_projective(&nalgebra::Vector2::new(400.0, 300.0))?;
//! # Ok(())
//! # }
//! ```

pub mod calib;
pub mod camera;
pub mod rectify;
pub mod scoring;

pub use calib::{CalibrationOptions, CalibrationOutcome, Calibrator, ViewReprojectionFactor};
pub use camera::fisheye::FisheyeModel;
pub use camera::omnidirectional::OmnidirectionalModel;
pub use camera::params::{CameraInfoMessage, ParameterSet};
pub use camera::pinhole::PinholeModel;
pub use camera::{
    model_from_parameters, BoardSize, CameraModelError, Mask, ModelType, Pose, ProjectionModel,
};
pub use rectify::{RectificationMap, RectificationMapBuilder};
pub use scoring::ReprojectionScorer;
