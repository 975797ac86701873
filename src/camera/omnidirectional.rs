//! Unified omnidirectional camera model after Mei.
//!
//! A point is first projected onto the unit sphere, then through a pinhole
//! shifted by `xi` along the axis, distorted with radial-tangential
//! coefficients, and finally scaled by the generalized focal lengths.
//!
//! Coefficient layout: `[xi, fx, fy, cx, cy, k1, k2, p1, p2]`.

use nalgebra::{Matrix2x3, Vector2, Vector3};

use crate::camera::distortion::RadTanCoefficients;
use crate::camera::{
    invalid_pixel, BoardSize, CameraModelError, Mask, ModelType, ParameterSet, ProjectionModel,
};
use crate::calib::linear;

#[derive(Debug, Clone)]
pub struct OmnidirectionalModel {
    params: ParameterSet,
    mask: Mask,
    camera_id: i32,
}

impl OmnidirectionalModel {
    pub fn new(params: ParameterSet) -> Result<Self, CameraModelError> {
        if params.model_type() != ModelType::Omnidirectional {
            return Err(CameraModelError::InvalidParams(format!(
                "expected OMNIDIRECTIONAL parameters, got {}",
                params.model_type()
            )));
        }
        let mask = Mask::all_valid(params.image_width(), params.image_height());
        Ok(OmnidirectionalModel {
            params,
            mask,
            camera_id: -1,
        })
    }

    #[inline]
    fn xi(&self) -> f64 {
        self.params.intrinsic(0)
    }

    #[inline]
    fn fx(&self) -> f64 {
        self.params.intrinsic(1)
    }

    #[inline]
    fn fy(&self) -> f64 {
        self.params.intrinsic(2)
    }

    #[inline]
    fn cx(&self) -> f64 {
        self.params.intrinsic(3)
    }

    #[inline]
    fn cy(&self) -> f64 {
        self.params.intrinsic(4)
    }

    #[inline]
    fn distortion(&self) -> RadTanCoefficients {
        RadTanCoefficients::new(
            self.params.intrinsic(5),
            self.params.intrinsic(6),
            self.params.intrinsic(7),
            self.params.intrinsic(8),
        )
    }

    /// Lifts an undistorted point on the normalized plane back to the unit
    /// sphere.
    fn sphere_from_plane(&self, m: &Vector2<f64>) -> Vector3<f64> {
        let xi = self.xi();
        let r2 = m.x * m.x + m.y * m.y;
        let lambda = (xi + (1.0 + (1.0 - xi * xi) * r2).sqrt()) / (r2 + 1.0);
        Vector3::new(lambda * m.x, lambda * m.y, lambda - xi)
    }
}

impl ProjectionModel for OmnidirectionalModel {
    fn model_type(&self) -> ModelType {
        ModelType::Omnidirectional
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
        // The mirror parameter xi is part of the projection geometry, not of
        // the lens distortion, so it stays.
        for coeff in &mut self.params.intrinsics_mut()[5..9] {
            *coeff = 0.0;
        }
    }

    fn estimate_intrinsics(
        &mut self,
        board_size: BoardSize,
        object_points: &[Vec<Vector3<f64>>],
        image_points: &[Vec<Vector2<f64>>],
    ) -> Result<(), CameraModelError> {
        // Seed with xi = 1 (parabolic mirror). Near the axis the unified
        // projection with xi = 1 behaves like a pinhole with focal gamma / 2,
        // so the homography focal estimate is doubled.
        let cx = self.params.image_width() as f64 / 2.0;
        let cy = self.params.image_height() as f64 / 2.0;
        let (fx, fy) =
            linear::estimate_focal_from_views(board_size, object_points, image_points, cx, cy)?;

        self.params
            .set_intrinsics(&[1.0, 2.0 * fx, 2.0 * fy, cx, cy, 0.0, 0.0, 0.0, 0.0])
    }

    fn lift_sphere(&self, p: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        if !self.mask.contains(p.x, p.y) {
            return Err(CameraModelError::OutOfDomain);
        }
        let m_d = Vector2::new((p.x - self.cx()) / self.fx(), (p.y - self.cy()) / self.fy());
        let m_u = self.distortion().undistort(&m_d);
        Ok(self.sphere_from_plane(&m_u).normalize())
    }

    fn lift_projective(&self, p: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        let on_sphere = self.lift_sphere(p)?;
        if on_sphere.z.abs() > 1e-9 {
            Ok(on_sphere / on_sphere.z)
        } else {
            // Ray at 90 degrees off-axis has no finite plane intersection
            Ok(on_sphere)
        }
    }

    fn space_to_plane(&self, p: &Vector3<f64>) -> Vector2<f64> {
        let rho = p.norm();
        let s = p.z + self.xi() * rho;
        if s < 1e-9 {
            return invalid_pixel();
        }
        let m = Vector2::new(p.x / s, p.y / s);
        let d = self.distortion().distort(&m);
        Vector2::new(self.fx() * d.x + self.cx(), self.fy() * d.y + self.cy())
    }

    fn space_to_plane_with_jacobian(&self, p: &Vector3<f64>) -> (Vector2<f64>, Matrix2x3<f64>) {
        let rho = p.norm();
        let s = p.z + self.xi() * rho;
        if s < 1e-9 {
            return (invalid_pixel(), Matrix2x3::zeros());
        }
        let xi = self.xi();
        let inv_s = 1.0 / s;
        let m = Vector2::new(p.x * inv_s, p.y * inv_s);

        // d(s)/d(P)
        let ds_dx = xi * p.x / rho;
        let ds_dy = xi * p.y / rho;
        let ds_dz = 1.0 + xi * p.z / rho;

        let dm_dp = Matrix2x3::new(
            inv_s - m.x * inv_s * ds_dx,
            -m.x * inv_s * ds_dy,
            -m.x * inv_s * ds_dz,
            -m.y * inv_s * ds_dx,
            inv_s - m.y * inv_s * ds_dy,
            -m.y * inv_s * ds_dz,
        );

        let coeffs = self.distortion();
        let mut jac = coeffs.jacobian(&m) * dm_dp;
        jac.row_mut(0).scale_mut(self.fx());
        jac.row_mut(1).scale_mut(self.fy());

        let d = coeffs.distort(&m);
        let pixel = Vector2::new(self.fx() * d.x + self.cx(), self.fy() * d.y + self.cy());
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
             \x20   model_type OMNIDIRECTIONAL\n\
             \x20   camera_name {}\n\
             \x20   image_width {}\n\
             \x20   image_height {}\n\
             Mirror Parameters:\n\
             \x20   xi {:.10}\n\
             Projection Parameters:\n\
             \x20   gamma1 {:.10}\n\
             \x20   gamma2 {:.10}\n\
             \x20   u0 {:.10}\n\
             \x20   v0 {:.10}\n\
             Distortion Parameters:\n\
             \x20   k1 {:.10}\n\
             \x20   k2 {:.10}\n\
             \x20   p1 {:.10}\n\
             \x20   p2 {:.10}\n",
            self.params.camera_name,
            self.params.image_width(),
            self.params.image_height(),
            self.xi(),
            self.fx(),
            self.fy(),
            self.cx(),
            self.cy(),
            self.params.intrinsic(5),
            self.params.intrinsic(6),
            self.params.intrinsic(7),
            self.params.intrinsic(8),
        )
    }

    fn nominal_intrinsics(&self) -> (f64, f64, f64, f64) {
        // Equivalent pinhole focal for rays near the axis.
        let scale = 1.0 / (1.0 + self.xi());
        (self.fx() * scale, self.fy() * scale, self.cx(), self.cy())
    }
}
