//! Reprojection residuals for `tiny_solver`. The projection equations are
//! written generically over [`nalgebra::RealField`] so the solver can
//! differentiate them with its dual numbers.
//!
//! Each factor covers one calibration view: parameter block 0 holds the
//! intrinsic coefficients in the model's canonical layout, block 1 the pose
//! as an axis-angle rotation followed by a translation.

use nalgebra::{DVector, Matrix3, RealField, Vector2, Vector3};
use tiny_solver::factors::Factor;

use crate::camera::ModelType;

/// Rodrigues formula, with a first-order fallback near zero so the
/// derivative stays well defined for the dual-number pass.
pub(crate) fn rotation_from_rvec<T: RealField>(rvec: &Vector3<T>) -> Matrix3<T> {
    let theta2 = rvec.norm_squared();
    let k = Matrix3::new(
        T::zero(),
        -rvec.z.clone(),
        rvec.y.clone(),
        rvec.z.clone(),
        T::zero(),
        -rvec.x.clone(),
        -rvec.y.clone(),
        rvec.x.clone(),
        T::zero(),
    );
    if theta2 < T::from_f64(1e-14).unwrap() {
        return Matrix3::identity() + k;
    }
    let theta = theta2.clone().sqrt();
    let k_unit = k / theta.clone();
    let k2 = &k_unit * &k_unit;
    Matrix3::identity()
        + k_unit * theta.clone().sin()
        + k2 * (T::one() - theta.cos())
}

fn radtan_distort<T: RealField>(
    k1: &T,
    k2: &T,
    p1: &T,
    p2: &T,
    mx: T,
    my: T,
) -> (T, T) {
    let two = T::from_f64(2.0).unwrap();
    let mx2 = mx.clone() * mx.clone();
    let my2 = my.clone() * my.clone();
    let mxy = mx.clone() * my.clone();
    let r2 = mx2.clone() + my2.clone();
    let rad = k1.clone() * r2.clone() + k2.clone() * r2.clone() * r2.clone();

    let dx = mx.clone() * rad.clone()
        + two.clone() * p1.clone() * mxy.clone()
        + p2.clone() * (r2.clone() + two.clone() * mx2);
    let dy = my.clone() * rad
        + p1.clone() * (r2 + two.clone() * my2)
        + two * p2.clone() * mxy;
    (mx + dx, my + dy)
}

fn project_pinhole<T: RealField>(intr: &DVector<T>, p: &Vector3<T>) -> (T, T) {
    let mx = p.x.clone() / p.z.clone();
    let my = p.y.clone() / p.z.clone();
    let (dx, dy) = radtan_distort(&intr[4], &intr[5], &intr[6], &intr[7], mx, my);
    (
        intr[0].clone() * dx + intr[2].clone(),
        intr[1].clone() * dy + intr[3].clone(),
    )
}

fn project_fisheye<T: RealField>(intr: &DVector<T>, p: &Vector3<T>) -> (T, T) {
    let r2 = p.x.clone() * p.x.clone() + p.y.clone() * p.y.clone();
    let r = r2.sqrt();
    let theta = r.clone().atan2(p.z.clone());
    let t2 = theta.clone() * theta.clone();
    let theta_d = theta.clone()
        * (T::one()
            + t2.clone()
                * (intr[4].clone()
                    + t2.clone()
                        * (intr[5].clone()
                            + t2.clone() * (intr[6].clone() + t2.clone() * intr[7].clone()))));

    let eps = T::from_f64(f64::EPSILON).unwrap();
    let (a, b) = if r < eps {
        (T::zero(), T::zero())
    } else {
        (p.x.clone() / r.clone(), p.y.clone() / r)
    };
    (
        intr[0].clone() * theta_d.clone() * a + intr[2].clone(),
        intr[1].clone() * theta_d * b + intr[3].clone(),
    )
}

fn project_omnidirectional<T: RealField>(intr: &DVector<T>, p: &Vector3<T>) -> (T, T) {
    let rho = (p.x.clone() * p.x.clone()
        + p.y.clone() * p.y.clone()
        + p.z.clone() * p.z.clone())
    .sqrt();
    let s = p.z.clone() + intr[0].clone() * rho;
    let mx = p.x.clone() / s.clone();
    let my = p.y.clone() / s;
    let (dx, dy) = radtan_distort(&intr[5], &intr[6], &intr[7], &intr[8], mx, my);
    (
        intr[1].clone() * dx + intr[3].clone(),
        intr[2].clone() * dy + intr[4].clone(),
    )
}

/// Residuals of one calibration view: stacked pixel errors for every board
/// corner, as a function of intrinsics (block 0) and pose (block 1, rvec
/// then tvec).
#[derive(Debug, Clone)]
pub struct ViewReprojectionFactor {
    model_type: ModelType,
    object_points: Vec<Vector3<f64>>,
    image_points: Vec<Vector2<f64>>,
}

impl ViewReprojectionFactor {
    pub fn new(
        model_type: ModelType,
        object_points: &[Vector3<f64>],
        image_points: &[Vector2<f64>],
    ) -> Self {
        ViewReprojectionFactor {
            model_type,
            object_points: object_points.to_vec(),
            image_points: image_points.to_vec(),
        }
    }

    pub fn residual_len(&self) -> usize {
        2 * self.image_points.len()
    }
}

impl<T: RealField> Factor<T> for ViewReprojectionFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let intrinsics = &params[0];
        let pose = &params[1];

        let rvec = Vector3::new(pose[0].clone(), pose[1].clone(), pose[2].clone());
        let tvec = Vector3::new(pose[3].clone(), pose[4].clone(), pose[5].clone());
        let rotation = rotation_from_rvec(&rvec);

        let mut residuals = DVector::zeros(2 * self.image_points.len());
        for (i, (obj, img)) in self
            .object_points
            .iter()
            .zip(self.image_points.iter())
            .enumerate()
        {
            let point = Vector3::new(
                T::from_f64(obj.x).unwrap(),
                T::from_f64(obj.y).unwrap(),
                T::from_f64(obj.z).unwrap(),
            );
            let p_cam = &rotation * point + tvec.clone();

            let (u, v) = match self.model_type {
                ModelType::Pinhole => project_pinhole(intrinsics, &p_cam),
                ModelType::Fisheye => project_fisheye(intrinsics, &p_cam),
                ModelType::Omnidirectional => project_omnidirectional(intrinsics, &p_cam),
            };

            residuals[2 * i] = u - T::from_f64(img.x).unwrap();
            residuals[2 * i + 1] = v - T::from_f64(img.y).unwrap();
        }
        residuals
    }
}
