//! Fisheye camera model after Kannala and Brandt.
//!
//! Coefficient layout: `[fx, fy, cx, cy, k1, k2, k3, k4]`. The image radius
//! is a polynomial in the incidence angle,
//! `theta_d = theta + k1*theta^3 + k2*theta^5 + k3*theta^7 + k4*theta^9`,
//! which stays finite for rays at and beyond 90 degrees off-axis. Lifting
//! inverts the polynomial with Newton iterations.

use nalgebra::{Matrix2x3, Vector2, Vector3};

use crate::camera::{
    invalid_pixel, BoardSize, CameraModelError, Mask, ModelType, ParameterSet, ProjectionModel,
};
use crate::calib::linear;

#[derive(Debug, Clone)]
pub struct FisheyeModel {
    params: ParameterSet,
    mask: Mask,
    camera_id: i32,
}

impl FisheyeModel {
    pub fn new(params: ParameterSet) -> Result<Self, CameraModelError> {
        if params.model_type() != ModelType::Fisheye {
            return Err(CameraModelError::InvalidParams(format!(
                "expected FISHEYE parameters, got {}",
                params.model_type()
            )));
        }
        let mask = Mask::all_valid(params.image_width(), params.image_height());
        Ok(FisheyeModel {
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
    fn ks(&self) -> [f64; 4] {
        [
            self.params.intrinsic(4),
            self.params.intrinsic(5),
            self.params.intrinsic(6),
            self.params.intrinsic(7),
        ]
    }

    fn theta_d(&self, theta: f64) -> f64 {
        let [k1, k2, k3, k4] = self.ks();
        let t2 = theta * theta;
        theta * (1.0 + t2 * (k1 + t2 * (k2 + t2 * (k3 + t2 * k4))))
    }

    /// Derivative of the distortion polynomial with respect to theta.
    fn theta_d_prime(&self, theta: f64) -> f64 {
        let [k1, k2, k3, k4] = self.ks();
        let t2 = theta * theta;
        1.0 + t2 * (3.0 * k1 + t2 * (5.0 * k2 + t2 * (7.0 * k3 + t2 * 9.0 * k4)))
    }

    /// Inverts `theta_d(theta)` by Newton iteration, seeded with `theta_d`
    /// itself.
    fn solve_theta(&self, theta_d: f64) -> f64 {
        let mut theta = theta_d;
        for _ in 0..20 {
            let f = self.theta_d(theta) - theta_d;
            let fp = self.theta_d_prime(theta);
            if fp.abs() < 1e-15 {
                break;
            }
            let step = f / fp;
            theta -= step;
            if step.abs() < 1e-14 {
                break;
            }
        }
        theta
    }
}

impl ProjectionModel for FisheyeModel {
    fn model_type(&self) -> ModelType {
        ModelType::Fisheye
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
        // Pure equidistant mapping: theta_d == theta.
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
        // Near the optical axis the equidistant mapping agrees with the
        // pinhole one, so the planar homography focal constraint gives a
        // serviceable seed; the joint refinement recovers the polynomial.
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
        let mx = (p.x - self.cx()) / self.fx();
        let my = (p.y - self.cy()) / self.fy();
        let theta_d = (mx * mx + my * my).sqrt();
        if theta_d < 1e-12 {
            return Ok(Vector3::new(0.0, 0.0, 1.0));
        }
        let theta = self.solve_theta(theta_d);
        let (sin_t, cos_t) = theta.sin_cos();
        Ok(Vector3::new(
            sin_t * mx / theta_d,
            sin_t * my / theta_d,
            cos_t,
        ))
    }

    fn space_to_plane(&self, p: &Vector3<f64>) -> Vector2<f64> {
        let r = (p.x * p.x + p.y * p.y).sqrt();
        if r < 1e-12 {
            if p.z <= 0.0 {
                // Anti-parallel to the optical axis, no defined azimuth
                return invalid_pixel();
            }
            return Vector2::new(self.cx(), self.cy());
        }
        let theta = r.atan2(p.z);
        let theta_d = self.theta_d(theta);
        Vector2::new(
            self.fx() * theta_d * p.x / r + self.cx(),
            self.fy() * theta_d * p.y / r + self.cy(),
        )
    }

    fn space_to_plane_with_jacobian(&self, p: &Vector3<f64>) -> (Vector2<f64>, Matrix2x3<f64>) {
        let r2 = p.x * p.x + p.y * p.y;
        let r = r2.sqrt();
        if r < 1e-12 {
            if p.z <= 0.0 {
                return (invalid_pixel(), Matrix2x3::zeros());
            }
            // Pinhole limit at the optical axis
            let inv_z = 1.0 / p.z;
            let jac = Matrix2x3::new(
                self.fx() * inv_z,
                0.0,
                -self.fx() * p.x * inv_z * inv_z,
                0.0,
                self.fy() * inv_z,
                -self.fy() * p.y * inv_z * inv_z,
            );
            return (Vector2::new(self.cx(), self.cy()), jac);
        }

        let rho2 = r2 + p.z * p.z;
        let theta = r.atan2(p.z);
        let theta_d = self.theta_d(theta);
        let theta_d_p = self.theta_d_prime(theta);

        let inv_r = 1.0 / r;
        let a = p.x * inv_r;
        let b = p.y * inv_r;

        // d(theta)/d(P)
        let dt_dx = p.z / rho2 * a;
        let dt_dy = p.z / rho2 * b;
        let dt_dz = -r / rho2;

        // d(x/r)/d(P) and d(y/r)/d(P)
        let da_dx = b * b * inv_r;
        let da_dy = -a * b * inv_r;
        let db_dx = da_dy;
        let db_dy = a * a * inv_r;

        let jac = Matrix2x3::new(
            self.fx() * (theta_d_p * dt_dx * a + theta_d * da_dx),
            self.fx() * (theta_d_p * dt_dy * a + theta_d * da_dy),
            self.fx() * (theta_d_p * dt_dz * a),
            self.fy() * (theta_d_p * dt_dx * b + theta_d * db_dx),
            self.fy() * (theta_d_p * dt_dy * b + theta_d * db_dy),
            self.fy() * (theta_d_p * dt_dz * b),
        );

        let pixel = Vector2::new(
            self.fx() * theta_d * a + self.cx(),
            self.fy() * theta_d * b + self.cy(),
        );
        (pixel, jac)
    }

    fn undist_to_plane(&self, p_u: &Vector2<f64>) -> Vector2<f64> {
        let r_u = (p_u.x * p_u.x + p_u.y * p_u.y).sqrt();
        if r_u < 1e-12 {
            return Vector2::new(
                self.fx() * p_u.x + self.cx(),
                self.fy() * p_u.y + self.cy(),
            );
        }
        let theta = r_u.atan();
        let scale = self.theta_d(theta) / r_u;
        Vector2::new(
            self.fx() * p_u.x * scale + self.cx(),
            self.fy() * p_u.y * scale + self.cy(),
        )
    }

    fn read_parameters(&mut self, intrinsics: &[f64]) -> Result<(), CameraModelError> {
        self.params.set_intrinsics(intrinsics)
    }

    fn write_parameters(&self) -> Vec<f64> {
        self.params.intrinsics().to_vec()
    }

    fn parameters_to_string(&self) -> String {
        let [k1, k2, k3, k4] = self.ks();
        format!(
            "Camera Parameters:\n\
             \x20   model_type FISHEYE\n\
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
             \x20   k3 {:.10}\n\
             \x20   k4 {:.10}\n",
            self.params.camera_name,
            self.params.image_width(),
            self.params.image_height(),
            self.fx(),
            self.fy(),
            self.cx(),
            self.cy(),
            k1,
            k2,
            k3,
            k4,
        )
    }

    fn nominal_intrinsics(&self) -> (f64, f64, f64, f64) {
        (self.fx(), self.fy(), self.cx(), self.cy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_model() -> FisheyeModel {
        let params = ParameterSet::with_intrinsics(
            ModelType::Fisheye,
            "cam0",
            "fisheye",
            752,
            480,
            &[351.586, 350.281, 366.286, 249.08, -0.0125, 0.0578, -0.0849, 0.0436],
        )
        .unwrap();
        FisheyeModel::new(params).unwrap()
    }

    #[test]
    fn optical_axis_projects_to_principal_point() {
        let model = sample_model();
        let p = model.space_to_plane(&Vector3::new(0.0, 0.0, 3.0));
        assert_relative_eq!(p.x, 366.286, epsilon = 1e-9);
        assert_relative_eq!(p.y, 249.08, epsilon = 1e-9);
    }

    #[test]
    fn zero_distortion_is_pure_equidistant() {
        let mut model = sample_model();
        model.set_zero_distortion();
        let p3d = Vector3::new(0.4, 0.0, 1.0);
        let pixel = model.space_to_plane(&p3d);
        let theta = (0.4f64).atan2(1.0);
        assert_relative_eq!(pixel.x, model.fx() * theta + model.cx(), epsilon = 1e-10);
        assert_relative_eq!(pixel.y, model.cy(), epsilon = 1e-10);
    }

    #[test]
    fn lift_is_inverse_of_projection() {
        let model = sample_model();
        // Includes a ray past 90 degrees off-axis, which a pinhole could
        // never see.
        for &(x, y, z) in &[
            (0.0, 0.0, 1.0),
            (0.5, -0.3, 1.0),
            (1.0, 0.8, 0.5),
            (1.5, 0.0, -0.2),
        ] {
            let p3d = Vector3::new(x, y, z);
            let pixel = model.space_to_plane(&p3d);
            if !model.mask().contains(pixel.x, pixel.y) {
                continue;
            }
            let ray = model.lift_sphere(&pixel).unwrap();
            let expected = p3d.normalize();
            assert_relative_eq!(ray.x, expected.x, epsilon = 1e-8);
            assert_relative_eq!(ray.y, expected.y, epsilon = 1e-8);
            assert_relative_eq!(ray.z, expected.z, epsilon = 1e-8);
        }
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let model = sample_model();
        let h = 1e-6;
        for &(x, y, z) in &[(0.2, 0.1, 1.0), (-0.6, 0.4, 0.8), (0.9, -0.7, 0.3)] {
            let p3d = Vector3::new(x, y, z);
            let (_, jac) = model.space_to_plane_with_jacobian(&p3d);
            for col in 0..3 {
                let mut fwd = p3d;
                let mut bwd = p3d;
                fwd[col] += h;
                bwd[col] -= h;
                let diff = (model.space_to_plane(&fwd) - model.space_to_plane(&bwd)) / (2.0 * h);
                assert_relative_eq!(jac[(0, col)], diff.x, epsilon = 1e-4, max_relative = 1e-4);
                assert_relative_eq!(jac[(1, col)], diff.y, epsilon = 1e-4, max_relative = 1e-4);
            }
        }
    }

    #[test]
    fn undist_to_plane_matches_projection_of_normalized_point() {
        let model = sample_model();
        let p3d = Vector3::new(0.3, -0.2, 1.5);
        let p_u = Vector2::new(p3d.x / p3d.z, p3d.y / p3d.z);
        let via_undist = model.undist_to_plane(&p_u);
        let via_project = model.space_to_plane(&p3d);
        assert_relative_eq!(via_undist.x, via_project.x, epsilon = 1e-9);
        assert_relative_eq!(via_undist.y, via_project.y, epsilon = 1e-9);
    }

    #[test]
    fn anti_parallel_ray_is_flagged_invalid() {
        let model = sample_model();
        let pixel = model.space_to_plane(&Vector3::new(0.0, 0.0, -2.0));
        assert!(!model.mask().contains(pixel.x, pixel.y));
    }
}
