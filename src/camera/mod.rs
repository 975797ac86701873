//! Camera model abstraction shared by all projection variants.
//!
//! The [`ProjectionModel`] trait is the single contract implemented by the
//! three supported variants: [`PinholeModel`] (radial-tangential distortion),
//! [`FisheyeModel`] (Kannala-Brandt) and [`OmnidirectionalModel`] (Mei
//! unified model). Model-agnostic algorithms (extrinsics recovery,
//! rectification-map synthesis, reprojection scoring) are written against
//! this trait only.

use nalgebra::{Matrix2x3, UnitQuaternion, Vector2, Vector3};

pub mod distortion;
pub mod fisheye;
pub mod omnidirectional;
pub mod params;
pub mod pinhole;

pub use fisheye::FisheyeModel;
pub use omnidirectional::OmnidirectionalModel;
pub use params::{CameraInfoMessage, ParameterSet};
pub use pinhole::PinholeModel;

/// The closed set of supported projection model families.
///
/// Fixed at construction of a [`ParameterSet`]; switching families means
/// building a new model, never mutating a live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    Pinhole,
    Fisheye,
    Omnidirectional,
}

impl ModelType {
    /// Number of intrinsic coefficients carried by this family.
    ///
    /// Pinhole: `[fx, fy, cx, cy, k1, k2, p1, p2]`.
    /// Fisheye: `[fx, fy, cx, cy, k1, k2, k3, k4]`.
    /// Omnidirectional: `[xi, fx, fy, cx, cy, k1, k2, p1, p2]`.
    pub fn n_intrinsics(&self) -> usize {
        match self {
            ModelType::Pinhole => 8,
            ModelType::Fisheye => 8,
            ModelType::Omnidirectional => 9,
        }
    }

    /// Stable tag used in parameter files and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Pinhole => "PINHOLE",
            ModelType::Fisheye => "FISHEYE",
            ModelType::Omnidirectional => "OMNIDIRECTIONAL",
        }
    }

    /// Parses the tag written by [`ModelType::as_str`].
    pub fn parse(tag: &str) -> Option<ModelType> {
        match tag {
            "PINHOLE" => Some(ModelType::Pinhole),
            "FISHEYE" => Some(ModelType::Fisheye),
            "OMNIDIRECTIONAL" => Some(ModelType::Omnidirectional),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("failed to parse camera parameters: {0}")]
    Parse(String),
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("degenerate input: {0}")]
    DegenerateInput(String),
    #[error("refinement stopped before meeting the convergence tolerance")]
    ConvergenceFailure,
    #[error("point is outside the model projection domain")]
    OutOfDomain,
    #[error("invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("numerical failure: {0}")]
    Numerical(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CameraModelError {
    fn from(err: std::io::Error) -> Self {
        CameraModelError::Io(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CameraModelError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CameraModelError::Parse(err.to_string())
    }
}

/// Per-pixel validity bitmap owned by a model instance.
///
/// All pixels are valid by default. Consumers that want to skip unmapped or
/// occluded pixels (rectification, scoring) consult it through
/// [`Mask::contains`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl Mask {
    pub fn all_valid(width: u32, height: u32) -> Self {
        Mask {
            width,
            height,
            data: vec![true; (width as usize) * (height as usize)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.data[(y as usize) * (self.width as usize) + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, valid: bool) {
        if x < self.width && y < self.height {
            self.data[(y as usize) * (self.width as usize) + x as usize] = valid;
        }
    }

    /// Validity at a subpixel location: finite, inside the image, and the
    /// containing pixel is flagged valid.
    pub fn contains(&self, u: f64, v: f64) -> bool {
        if !u.is_finite() || !v.is_finite() {
            return false;
        }
        if u < 0.0 || v < 0.0 || u >= self.width as f64 || v >= self.height as f64 {
            return false;
        }
        self.get(u as u32, v as u32)
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| **v).count()
    }
}

/// Calibration target geometry: interior corner grid of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardSize {
    pub cols: usize,
    pub rows: usize,
}

impl BoardSize {
    pub fn new(cols: usize, rows: usize) -> Self {
        BoardSize { cols, rows }
    }

    pub fn point_count(&self) -> usize {
        self.cols * self.rows
    }
}

/// Rigid pose of a calibration target in the camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl Pose {
    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Pose {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Pose {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Maps a point from the target frame into the camera frame.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Axis-angle + translation form used by the optimizer parameter blocks.
    pub fn to_rvec_tvec(&self) -> (Vector3<f64>, Vector3<f64>) {
        (self.rotation.scaled_axis(), self.translation)
    }

    pub fn from_rvec_tvec(rvec: &Vector3<f64>, tvec: &Vector3<f64>) -> Self {
        Pose {
            rotation: UnitQuaternion::from_scaled_axis(*rvec),
            translation: *tvec,
        }
    }
}

/// Sentinel pixel for projections outside a model's valid domain.
///
/// Clearly outside any image rectangle; [`Mask::contains`] rejects it.
pub(crate) fn invalid_pixel() -> Vector2<f64> {
    Vector2::new(f64::NEG_INFINITY, f64::NEG_INFINITY)
}

/// Shared contract implemented by every projection model variant.
///
/// A model instance is bound to exactly one [`ParameterSet`] for its
/// lifetime. Read operations take `&self`; parameter mutation
/// ([`read_parameters`](ProjectionModel::read_parameters),
/// [`set_zero_distortion`](ProjectionModel::set_zero_distortion)) must be
/// serialized against reads by the owner.
pub trait ProjectionModel: Send + Sync {
    fn model_type(&self) -> ModelType;

    /// The bound parameter set.
    fn parameters(&self) -> &ParameterSet;

    fn mask(&self) -> &Mask;

    fn mask_mut(&mut self) -> &mut Mask;

    /// Replaces the validity mask; the mask must match the image size.
    fn set_mask(&mut self, mask: Mask) -> Result<(), CameraModelError>;

    /// Correlation handle assigned by the owning collection (e.g. a rig).
    fn camera_id(&self) -> i32;

    /// Intended to be called once by the owning registry.
    fn set_camera_id(&mut self, id: i32);

    /// Resets the distortion block to identity; projective intrinsics (and
    /// the mirror parameter for the unified model) are unchanged.
    fn set_zero_distortion(&mut self);

    /// Initial linear estimate of the intrinsics from planar calibration
    /// views. Extrinsics are not estimated here.
    fn estimate_intrinsics(
        &mut self,
        board_size: BoardSize,
        object_points: &[Vec<Vector3<f64>>],
        image_points: &[Vec<Vector2<f64>>],
    ) -> Result<(), CameraModelError>;

    /// Lifts a pixel to a unit direction on the viewing sphere.
    fn lift_sphere(&self, p: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError>;

    /// Lifts a pixel to a projective ray (no normalization guarantee).
    fn lift_projective(&self, p: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError>;

    /// Projects a 3D point in the camera frame to pixel coordinates.
    ///
    /// Points outside the model's angular domain map to a pixel outside the
    /// image rectangle rather than failing; batch consumers check validity
    /// through the mask.
    fn space_to_plane(&self, p: &Vector3<f64>) -> Vector2<f64>;

    /// Forward projection together with the analytic 2x3 Jacobian of the
    /// pixel with respect to the point.
    fn space_to_plane_with_jacobian(&self, p: &Vector3<f64>) -> (Vector2<f64>, Matrix2x3<f64>);

    /// Applies the forward distortion to undistorted normalized coordinates
    /// and maps the result to pixel coordinates.
    fn undist_to_plane(&self, p_u: &Vector2<f64>) -> Vector2<f64>;

    /// Bulk-loads the flat coefficient vector into the bound parameter set.
    fn read_parameters(&mut self, intrinsics: &[f64]) -> Result<(), CameraModelError>;

    /// Bulk-copies the flat coefficient vector out of the bound parameter set.
    fn write_parameters(&self) -> Vec<f64>;

    /// Human-readable parameter dump for diagnostics.
    fn parameters_to_string(&self) -> String;

    /// Focal lengths and principal point of the projective core, used as
    /// defaults for rectification targets.
    fn nominal_intrinsics(&self) -> (f64, f64, f64, f64);

    /// Recovers the target pose for one view given calibrated intrinsics.
    ///
    /// Requires at least 4 correspondences; coplanar targets go through a
    /// homography decomposition, general targets through a DLT (>= 6 points).
    /// The linear estimate is refined by Gauss-Newton on the reprojection
    /// error.
    fn estimate_extrinsics(
        &self,
        object_points: &[Vector3<f64>],
        image_points: &[Vector2<f64>],
    ) -> Result<Pose, CameraModelError> {
        crate::calib::extrinsics::estimate_extrinsics(self, object_points, image_points)
    }

    /// Projects a batch of target-frame points under `pose`. Out-of-domain
    /// points carry the usual sentinel pixel; callers filter through the
    /// mask.
    fn project_points(&self, object_points: &[Vector3<f64>], pose: &Pose) -> Vec<Vector2<f64>> {
        object_points
            .iter()
            .map(|p| self.space_to_plane(&pose.transform_point(p)))
            .collect()
    }

    fn image_width(&self) -> u32 {
        self.parameters().image_width()
    }

    fn image_height(&self) -> u32 {
        self.parameters().image_height()
    }
}

/// Constructs the concrete variant a parameter set describes.
pub fn model_from_parameters(
    params: ParameterSet,
) -> Result<Box<dyn ProjectionModel>, CameraModelError> {
    match params.model_type() {
        ModelType::Pinhole => Ok(Box::new(PinholeModel::new(params)?)),
        ModelType::Fisheye => Ok(Box::new(FisheyeModel::new(params)?)),
        ModelType::Omnidirectional => Ok(Box::new(OmnidirectionalModel::new(params)?)),
    }
}

/// Common validation helpers shared by the variants.
pub(crate) mod validation {
    use super::CameraModelError;

    pub fn validate_focal(fx: f64, fy: f64) -> Result<(), CameraModelError> {
        if fx <= 0.0 || fy <= 0.0 {
            return Err(CameraModelError::InvalidParams(
                "focal length must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_principal_point(cx: f64, cy: f64) -> Result<(), CameraModelError> {
        if !cx.is_finite() || !cy.is_finite() {
            return Err(CameraModelError::InvalidParams(
                "principal point must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn n_intrinsics_table() {
        assert_eq!(ModelType::Pinhole.n_intrinsics(), 8);
        assert_eq!(ModelType::Fisheye.n_intrinsics(), 8);
        assert_eq!(ModelType::Omnidirectional.n_intrinsics(), 9);
    }

    #[test]
    fn model_type_tag_round_trip() {
        for mt in [
            ModelType::Pinhole,
            ModelType::Fisheye,
            ModelType::Omnidirectional,
        ] {
            assert_eq!(ModelType::parse(mt.as_str()), Some(mt));
        }
        assert_eq!(ModelType::parse("MEI"), None);
    }

    #[test]
    fn mask_defaults_and_lookup() {
        let mut mask = Mask::all_valid(4, 3);
        assert_eq!(mask.valid_count(), 12);
        assert!(mask.contains(3.9, 2.9));
        assert!(!mask.contains(4.0, 1.0));
        assert!(!mask.contains(f64::NAN, 1.0));

        mask.set(1, 2, false);
        assert!(!mask.get(1, 2));
        assert!(!mask.contains(1.5, 2.5));
        assert_eq!(mask.valid_count(), 11);
    }

    #[test]
    fn pose_rvec_round_trip() {
        let pose = Pose::new(
            UnitQuaternion::from_scaled_axis(Vector3::new(0.1, -0.2, 0.3)),
            Vector3::new(0.5, 1.0, -2.0),
        );
        let (rvec, tvec) = pose.to_rvec_tvec();
        let back = Pose::from_rvec_tvec(&rvec, &tvec);
        assert!((back.translation - pose.translation).norm() < 1e-12);
        assert!(back.rotation.angle_to(&pose.rotation) < 1e-12);
    }

    #[test]
    fn invalid_pixel_is_rejected_by_mask() {
        let mask = Mask::all_valid(10, 10);
        let p = invalid_pixel();
        assert!(!mask.contains(p.x, p.y));
    }
}
