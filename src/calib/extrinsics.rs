//! Single-view pose estimation against a calibrated model: observations are
//! lifted to the normalized plane, a linear pose seed is recovered (planar
//! homography or general resection), and the result is polished with a few
//! Gauss-Newton steps on the pixel reprojection error.

use nalgebra::{Matrix2x6, Matrix3, Matrix6, UnitQuaternion, Vector2, Vector3, Vector6};

use crate::calib::linear;
use crate::camera::{CameraModelError, Pose, ProjectionModel};

const MAX_REFINE_ITERATIONS: usize = 10;
const STEP_TOLERANCE: f64 = 1e-10;

/// Estimates the camera pose from 3D-2D correspondences. The image points
/// are pixel observations on the model's own image plane, so any lens
/// distortion is removed during lifting.
pub fn estimate_extrinsics<M: ProjectionModel + ?Sized>(
    model: &M,
    object_points: &[Vector3<f64>],
    image_points: &[Vector2<f64>],
) -> Result<Pose, CameraModelError> {
    if object_points.len() != image_points.len() {
        return Err(CameraModelError::DimensionMismatch {
            expected: object_points.len(),
            actual: image_points.len(),
        });
    }
    if object_points.len() < 4 {
        return Err(CameraModelError::DegenerateInput(format!(
            "pose estimation needs at least 4 points, got {}",
            object_points.len()
        )));
    }

    let mut normalized = Vec::with_capacity(image_points.len());
    for p in image_points {
        let ray = model.lift_projective(p)?;
        if ray.z.abs() < 1e-9 {
            return Err(CameraModelError::DegenerateInput(
                "observation lifts to a ray parallel to the image plane".into(),
            ));
        }
        normalized.push(Vector2::new(ray.x / ray.z, ray.y / ray.z));
    }

    let planar = object_points.iter().all(|p| p.z.abs() < 1e-9);
    let initial = if planar {
        let board: Vec<Vector2<f64>> =
            object_points.iter().map(|p| Vector2::new(p.x, p.y)).collect();
        let h = linear::dlt_homography(&board, &normalized)?;
        linear::pose_from_homography(&h)?
    } else {
        linear::dlt_pnp(object_points, &normalized)?
    };

    Ok(refine_pose(model, object_points, image_points, initial))
}

fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Gauss-Newton on the pixel residuals, parameterizing the update as a
/// left-multiplied rotation increment and a translation increment.
fn refine_pose<M: ProjectionModel + ?Sized>(
    model: &M,
    object_points: &[Vector3<f64>],
    image_points: &[Vector2<f64>],
    mut pose: Pose,
) -> Pose {
    for _ in 0..MAX_REFINE_ITERATIONS {
        let mut hessian = Matrix6::zeros();
        let mut gradient = Vector6::zeros();
        let mut used = 0usize;

        for (obj, img) in object_points.iter().zip(image_points.iter()) {
            let p_cam = pose.transform_point(obj);
            let (projected, j_proj) = model.space_to_plane_with_jacobian(&p_cam);
            if !projected.x.is_finite() || !projected.y.is_finite() {
                continue;
            }
            let residual = projected - img;

            // d(p_cam)/d(omega, t) = [-skew(p_cam) | I]
            let mut j_pose = Matrix2x6::zeros();
            j_pose
                .fixed_view_mut::<2, 3>(0, 0)
                .copy_from(&(j_proj * -skew(&p_cam)));
            j_pose.fixed_view_mut::<2, 3>(0, 3).copy_from(&j_proj);

            hessian += j_pose.transpose() * j_pose;
            gradient += j_pose.transpose() * residual;
            used += 1;
        }

        if used < 4 {
            break;
        }
        let step = match hessian.cholesky() {
            Some(chol) => chol.solve(&-gradient),
            None => break,
        };

        let omega = Vector3::new(step[0], step[1], step[2]);
        pose.rotation = UnitQuaternion::from_scaled_axis(omega) * pose.rotation;
        pose.translation += Vector3::new(step[3], step[4], step[5]);

        if step.norm() < STEP_TOLERANCE {
            break;
        }
    }
    pose
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::pinhole::PinholeModel;
    use crate::camera::{ModelType, ParameterSet};
    use approx::assert_relative_eq;

    fn test_model() -> PinholeModel {
        let params = ParameterSet::with_intrinsics(
            ModelType::Pinhole,
            "cam0",
            "pinhole",
            640,
            480,
            &[500.0, 500.0, 320.0, 240.0, -0.2, 0.05, 1e-4, -5e-5],
        )
        .unwrap();
        PinholeModel::new(params).unwrap()
    }

    fn project_all(
        model: &PinholeModel,
        pose: &Pose,
        object: &[Vector3<f64>],
    ) -> Vec<Vector2<f64>> {
        object
            .iter()
            .map(|o| model.space_to_plane(&pose.transform_point(o)))
            .collect()
    }

    #[test]
    fn planar_board_pose_is_recovered() {
        let model = test_model();
        let truth = Pose {
            rotation: UnitQuaternion::from_euler_angles(0.15, -0.1, 0.05),
            translation: Vector3::new(-0.1, 0.05, 1.2),
        };

        let object: Vec<Vector3<f64>> = (0..5)
            .flat_map(|r| (0..5).map(move |c| Vector3::new(c as f64 * 0.08, r as f64 * 0.08, 0.0)))
            .collect();
        let image = project_all(&model, &truth, &object);

        let pose = estimate_extrinsics(&model, &object, &image).unwrap();
        assert_relative_eq!(pose.translation.x, truth.translation.x, epsilon = 1e-6);
        assert_relative_eq!(pose.translation.y, truth.translation.y, epsilon = 1e-6);
        assert_relative_eq!(pose.translation.z, truth.translation.z, epsilon = 1e-6);
        assert!(pose.rotation.angle_to(&truth.rotation) < 1e-6);
    }

    #[test]
    fn non_planar_points_use_general_resection() {
        let model = test_model();
        let truth = Pose {
            rotation: UnitQuaternion::from_euler_angles(-0.1, 0.2, -0.05),
            translation: Vector3::new(0.1, -0.1, 1.5),
        };

        let object: Vec<Vector3<f64>> = [
            (0.0, 0.0, 0.0),
            (0.3, 0.0, 0.1),
            (0.0, 0.3, 0.2),
            (0.3, 0.3, -0.1),
            (0.15, 0.1, 0.25),
            (0.1, 0.25, -0.15),
            (0.25, 0.15, 0.05),
        ]
        .iter()
        .map(|&(x, y, z)| Vector3::new(x, y, z))
        .collect();
        let image = project_all(&model, &truth, &object);

        let pose = estimate_extrinsics(&model, &object, &image).unwrap();
        assert_relative_eq!(pose.translation.x, truth.translation.x, epsilon = 1e-5);
        assert_relative_eq!(pose.translation.y, truth.translation.y, epsilon = 1e-5);
        assert_relative_eq!(pose.translation.z, truth.translation.z, epsilon = 1e-5);
        assert!(pose.rotation.angle_to(&truth.rotation) < 1e-5);
    }

    #[test]
    fn three_points_are_rejected() {
        let model = test_model();
        let object = vec![Vector3::zeros(); 3];
        let image = vec![Vector2::new(320.0, 240.0); 3];
        assert!(matches!(
            estimate_extrinsics(&model, &object, &image),
            Err(CameraModelError::DegenerateInput(_))
        ));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let model = test_model();
        let object = vec![Vector3::zeros(); 5];
        let image = vec![Vector2::new(320.0, 240.0); 4];
        assert!(matches!(
            estimate_extrinsics(&model, &object, &image),
            Err(CameraModelError::DimensionMismatch {
                expected: 5,
                actual: 4
            })
        ));
    }
}
