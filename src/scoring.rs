//! Reprojection-error statistics against a calibrated model.

use nalgebra::{Vector2, Vector3};

use crate::camera::{CameraModelError, Pose, ProjectionModel};

/// Computes pixel-space reprojection metrics for a model. Borrowing rather
/// than owning lets the same scorer serve a model that is still being
/// refined elsewhere.
pub struct ReprojectionScorer<'a, M: ProjectionModel + ?Sized> {
    model: &'a M,
}

impl<'a, M: ProjectionModel + ?Sized> ReprojectionScorer<'a, M> {
    pub fn new(model: &'a M) -> Self {
        ReprojectionScorer { model }
    }

    /// Pixel error of a single observation: the distance between `observed`
    /// and the projection of `point` under `pose`. Projections that leave
    /// the model's domain score infinite.
    pub fn point_error(&self, point: &Vector3<f64>, pose: &Pose, observed: &Vector2<f64>) -> f64 {
        let projected = self.model.space_to_plane(&pose.transform_point(point));
        if !projected.x.is_finite() || !projected.y.is_finite() {
            return f64::INFINITY;
        }
        (projected - observed).norm()
    }

    /// Pixel distance between the projections of two points in the camera
    /// frame. Useful as an image-space proximity measure for 3D landmarks.
    pub fn reprojection_dist(&self, p1: &Vector3<f64>, p2: &Vector3<f64>) -> f64 {
        let a = self.model.space_to_plane(p1);
        let b = self.model.space_to_plane(p2);
        if !a.x.is_finite() || !a.y.is_finite() || !b.x.is_finite() || !b.y.is_finite() {
            return f64::INFINITY;
        }
        (a - b).norm()
    }

    /// Overall RMS reprojection error and the per-view RMS values for a
    /// multi-view dataset with one pose per view.
    pub fn reprojection_error(
        &self,
        object_points: &[Vec<Vector3<f64>>],
        image_points: &[Vec<Vector2<f64>>],
        poses: &[Pose],
    ) -> Result<(f64, Vec<f64>), CameraModelError> {
        if object_points.len() != image_points.len() || object_points.len() != poses.len() {
            return Err(CameraModelError::DimensionMismatch {
                expected: object_points.len(),
                actual: image_points.len().min(poses.len()),
            });
        }
        if object_points.is_empty() {
            return Err(CameraModelError::DegenerateInput(
                "reprojection error needs at least one view".into(),
            ));
        }

        let mut total_sq = 0.0;
        let mut total_points = 0usize;
        let mut per_view = Vec::with_capacity(poses.len());

        for ((obj, img), pose) in object_points.iter().zip(image_points.iter()).zip(poses) {
            if obj.len() != img.len() {
                return Err(CameraModelError::DimensionMismatch {
                    expected: obj.len(),
                    actual: img.len(),
                });
            }
            if obj.is_empty() {
                return Err(CameraModelError::DegenerateInput(
                    "view has no correspondences".into(),
                ));
            }
            let mut view_sq = 0.0;
            for (point, observed) in obj.iter().zip(img.iter()) {
                let e = self.point_error(point, pose, observed);
                view_sq += e * e;
            }
            per_view.push((view_sq / obj.len() as f64).sqrt());
            total_sq += view_sq;
            total_points += obj.len();
        }

        Ok(((total_sq / total_points as f64).sqrt(), per_view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::pinhole::PinholeModel;
    use crate::camera::{ModelType, ParameterSet};
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn test_model() -> PinholeModel {
        let params = ParameterSet::with_intrinsics(
            ModelType::Pinhole,
            "cam0",
            "pinhole",
            640,
            480,
            &[500.0, 500.0, 320.0, 240.0, 0.0, 0.0, 0.0, 0.0],
        )
        .unwrap();
        PinholeModel::new(params).unwrap()
    }

    #[test]
    fn perfect_observations_score_zero() {
        let model = test_model();
        let pose = Pose {
            rotation: UnitQuaternion::from_euler_angles(0.1, -0.05, 0.0),
            translation: Vector3::new(0.05, -0.1, 1.4),
        };
        let object: Vec<Vector3<f64>> = (0..12)
            .map(|i| Vector3::new((i % 4) as f64 * 0.1, (i / 4) as f64 * 0.1, 0.0))
            .collect();
        let image: Vec<Vector2<f64>> = object
            .iter()
            .map(|o| model.space_to_plane(&pose.transform_point(o)))
            .collect();

        let scorer = ReprojectionScorer::new(&model);
        let (rms, per_view) = scorer
            .reprojection_error(&[object], &[image], &[pose])
            .unwrap();
        assert_relative_eq!(rms, 0.0, epsilon = 1e-10);
        assert_eq!(per_view.len(), 1);
        assert_relative_eq!(per_view[0], 0.0, epsilon = 1e-10);
    }

    #[test]
    fn shifted_observations_score_their_offset() {
        let model = test_model();
        let pose = Pose::identity();
        let object = vec![Vector3::new(0.0, 0.0, 2.0), Vector3::new(0.2, 0.1, 2.0)];
        let image: Vec<Vector2<f64>> = object
            .iter()
            .map(|o| model.space_to_plane(o) + Vector2::new(3.0, 4.0))
            .collect();

        let scorer = ReprojectionScorer::new(&model);
        let (rms, _) = scorer
            .reprojection_error(&[object], &[image], &[pose])
            .unwrap();
        assert_relative_eq!(rms, 5.0, epsilon = 1e-10);
    }

    #[test]
    fn reprojection_dist_measures_pixel_separation() {
        let model = test_model();
        let scorer = ReprojectionScorer::new(&model);
        // 0.1 m lateral offset at 1 m depth under f = 500 is 50 px
        let d = scorer.reprojection_dist(
            &Vector3::new(0.0, 0.0, 1.0),
            &Vector3::new(0.1, 0.0, 1.0),
        );
        assert_relative_eq!(d, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn out_of_domain_projection_scores_infinite() {
        let model = test_model();
        let scorer = ReprojectionScorer::new(&model);
        let e = scorer.point_error(
            &Vector3::new(0.0, 0.0, -1.0),
            &Pose::identity(),
            &Vector2::new(320.0, 240.0),
        );
        assert!(e.is_infinite());
    }

    #[test]
    fn empty_view_is_rejected() {
        let model = test_model();
        let scorer = ReprojectionScorer::new(&model);
        let result = scorer.reprojection_error(&[vec![]], &[vec![]], &[Pose::identity()]);
        assert!(matches!(
            result,
            Err(CameraModelError::DegenerateInput(_))
        ));
    }

    #[test]
    fn view_count_mismatch_is_rejected() {
        let model = test_model();
        let scorer = ReprojectionScorer::new(&model);
        let result = scorer.reprojection_error(&[vec![]], &[], &[]);
        assert!(matches!(
            result,
            Err(CameraModelError::DimensionMismatch { .. })
        ));
    }
}
