//! Pinhole camera model with radial-tangential distortion.
//!
//! Coefficient layout: `[fx, fy, cx, cy, k1, k2, p1, p2]`. The projective
//! core is the classic `u = fx * X/Z + cx`; distortion is applied on the
//! normalized image plane before the affine mapping.

use nalgebra::{Matrix2x3, Vector2, Vector3};

use crate::camera::distortion::RadTanCoefficients;
use crate::camera::{
    invalid_pixel, BoardSize, CameraModelError, Mask, ModelType, ParameterSet, ProjectionModel,
};
use crate::calib::linear;

#[derive(Debug, Clone)]
pub struct PinholeModel {
    params: ParameterSet,
    mask: Mask,
    camera_id: i32,
}

impl PinholeModel {
    /// Binds a model to a pinhole parameter set for its lifetime.
    pub fn new(params: ParameterSet) -> Result<Self, CameraModelError> {
        if params.model_type() != ModelType::Pinhole {
            return Err(CameraModelError::InvalidParams(format!(
                "expected PINHOLE parameters, got {}",
                params.model_type()
            )));
        }
        let mask = Mask::all_valid(params.image_width(), params.image_height());
        Ok(PinholeModel {
            params,
            mask,
            camera_id: -1,
        })
    }

    #[inline]
    fn fx(&self) -> f64 {
        self.params.intrinsic(0)
    }

    #[inline]
    fn fy(&self) -> f64 {
        self.params.intrinsic(1)
    }

    #[inline]
    fn cx(&self) -> f64 {
        self.params.intrinsic(2)
    }

    #[inline]
    fn cy(&self) -> f64 {
        self.params.intrinsic(3)
    }

    #[inline]
    fn distortion(&self) -> RadTanCoefficients {
        RadTanCoefficients::new(
            self.params.intrinsic(4),
            self.params.intrinsic(5),
            self.params.intrinsic(6),
            self.params.intrinsic(7),
        )
    }
}

impl ProjectionModel for PinholeModel {
    fn model_type(&self) -> ModelType {
        ModelType::Pinhole
    }

    fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    fn mask(&self) -> &Mask {
        &self.mask
    }

    fn mask_mut(&mut self) -> &mut Mask {
        &mut self.mask
    }

    fn set_mask(&mut self, mask: Mask) -> Result<(), CameraModelError> {
        if mask.width() != self.params.image_width() || mask.height() != self.params.image_height()
        {
            return Err(CameraModelError::DimensionMismatch {
                expected: (self.params.image_width() * self.params.image_height()) as usize,
                actual: (mask.width() * mask.height()) as usize,
            });
        }
        self.mask = mask;
        Ok(())
    }

    fn camera_id(&self) -> i32 {
        self.camera_id
    }

    fn set_camera_id(&mut self, id: i32) {
        self.camera_id = id;
    }

    fn set_zero_distortion(&mut self) {
        for coeff in &mut self.params.intrinsics_mut()[4..8] {
            *coeff = 0.0;
        }
    }

    fn estimate_intrinsics(
        &mut self,
        board_size: BoardSize,
        object_points: &[Vec<Vector3<f64>>],
        image_points: &[Vec<Vector2<f64>>],
    ) -> Result<(), CameraModelError> {
        let cx = self.params.image_width() as f64 / 2.0;
        let cy = self.params.image_height() as f64 / 2.0;
        let (fx, fy) =
            linear::estimate_focal_from_views(board_size, object_points, image_points, cx, cy)?;

        self.params
            .set_intrinsics(&[fx, fy, cx, cy, 0.0, 0.0, 0.0, 0.0])
    }

    fn lift_sphere(&self, p: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        Ok(self.lift_projective(p)?.normalize())
    }

    fn lift_projective(&self, p: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        if !self.mask.contains(p.x, p.y) {
            return Err(CameraModelError::OutOfDomain);
        }
        let m_d = Vector2::new((p.x - self.cx()) / self.fx(), (p.y - self.cy()) / self.fy());
        let m_u = self.distortion().undistort(&m_d);
        Ok(Vector3::new(m_u.x, m_u.y, 1.0))
    }

    fn space_to_plane(&self, p: &Vector3<f64>) -> Vector2<f64> {
        if p.z < f64::EPSILON.sqrt() {
            return invalid_pixel();
        }
        let m = Vector2::new(p.x / p.z, p.y / p.z);
        let d = self.distortion().distort(&m);
        Vector2::new(self.fx() * d.x + self.cx(), self.fy() * d.y + self.cy())
    }

    fn space_to_plane_with_jacobian(&self, p: &Vector3<f64>) -> (Vector2<f64>, Matrix2x3<f64>) {
        if p.z < f64::EPSILON.sqrt() {
            return (invalid_pixel(), Matrix2x3::zeros());
        }
        let inv_z = 1.0 / p.z;
        let m = Vector2::new(p.x * inv_z, p.y * inv_z);
        let coeffs = self.distortion();
        let d = coeffs.distort(&m);
        let pixel = Vector2::new(self.fx() * d.x + self.cx(), self.fy() * d.y + self.cy());

        // d(m)/d(P) for m = (X/Z, Y/Z)
        let dm_dp = Matrix2x3::new(
            inv_z,
            0.0,
            -p.x * inv_z * inv_z,
            0.0,
            inv_z,
            -p.y * inv_z * inv_z,
        );
        let mut jac = coeffs.jacobian(&m) * dm_dp;
        jac.row_mut(0).scale_mut(self.fx());
        jac.row_mut(1).scale_mut(self.fy());

        (pixel, jac)
    }

    fn undist_to_plane(&self, p_u: &Vector2<f64>) -> Vector2<f64> {
        let d = self.distortion().distort(p_u);
        Vector2::new(self.fx() * d.x + self.cx(), self.fy() * d.y + self.cy())
    }

    fn read_parameters(&mut self, intrinsics: &[f64]) -> Result<(), CameraModelError> {
        self.params.set_intrinsics(intrinsics)
    }

    fn write_parameters(&self) -> Vec<f64> {
        self.params.intrinsics().to_vec()
    }

    fn parameters_to_string(&self) -> String {
        format!(
            "Camera Parameters:\n\
             \x20   model_type PINHOLE\n\
             \x20   camera_name {}\n\
             \x20   image_width {}\n\
             \x20   image_height {}\n\
             Projection Parameters:\n\
             \x20   fx {:.10}\n\
             \x20   fy {:.10}\n\
             \x20   cx {:.10}\n\
             \x20   cy {:.10}\n\
             Distortion Parameters:\n\
             \x20   k1 {:.10}\n\
             \x20   k2 {:.10}\n\
             \x20   p1 {:.10}\n\
             \x20   p2 {:.10}\n",
            self.params.camera_name,
            self.params.image_width(),
            self.params.image_height(),
            self.fx(),
            self.fy(),
            self.cx(),
            self.cy(),
            self.params.intrinsic(4),
            self.params.intrinsic(5),
            self.params.intrinsic(6),
            self.params.intrinsic(7),
        )
    }

    fn nominal_intrinsics(&self) -> (f64, f64, f64, f64) {
        (self.fx(), self.fy(), self.cx(), self.cy())
    }
}
