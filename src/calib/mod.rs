//! Calibration pipeline: linear bootstrap of intrinsics and per-view poses,
//! followed by a joint Levenberg-Marquardt refinement of everything over all
//! views with `tiny_solver`.

use std::collections::HashMap;

use log::{info, warn};
use nalgebra::{DVector, Vector2, Vector3};
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::{LevenbergMarquardtOptimizer, Problem};

use crate::camera::{validation, BoardSize, CameraModelError, Pose, ProjectionModel};
use crate::scoring::ReprojectionScorer;

pub mod extrinsics;
pub mod factors;
pub mod linear;

pub use factors::ViewReprojectionFactor;

/// Knobs for the nonlinear refinement stage.
#[derive(Debug, Clone)]
pub struct CalibrationOptions {
    /// Iteration cap for the Levenberg-Marquardt solver.
    pub max_iterations: usize,
    /// Relative cost decrease below which the solver stops.
    pub tolerance: f64,
    /// Skip the joint refinement and keep the linear estimates when false.
    pub refine: bool,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        CalibrationOptions {
            max_iterations: 100,
            tolerance: 1e-10,
            refine: true,
        }
    }
}

/// Result of a calibration run. A run that fails to converge still reports
/// the best parameters found; callers that require convergence can gate on
/// [`CalibrationOutcome::ensure_converged`].
#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    /// Estimated board pose for each view.
    pub poses: Vec<Pose>,
    /// Root-mean-square pixel reprojection error over all views.
    pub rms_error: f64,
    /// RMS reprojection error of each individual view.
    pub per_view_errors: Vec<f64>,
    /// Whether the nonlinear refinement finished (or was skipped on purpose).
    pub converged: bool,
}

impl CalibrationOutcome {
    pub fn ensure_converged(&self) -> Result<(), CameraModelError> {
        if self.converged {
            Ok(())
        } else {
            Err(CameraModelError::ConvergenceFailure)
        }
    }
}

/// Drives the full calibration of a single camera from board observations.
#[derive(Debug, Clone, Default)]
pub struct Calibrator {
    options: CalibrationOptions,
}

impl Calibrator {
    pub fn new(options: CalibrationOptions) -> Self {
        Calibrator { options }
    }

    /// Calibrates `model` in place from per-view board correspondences.
    ///
    /// `object_points[v]` and `image_points[v]` hold the board corners and
    /// their pixel observations for view `v`, both in board-major order with
    /// exactly `board_size.point_count()` entries.
    pub fn calibrate<M: ProjectionModel + ?Sized>(
        &self,
        model: &mut M,
        board_size: BoardSize,
        object_points: &[Vec<Vector3<f64>>],
        image_points: &[Vec<Vector2<f64>>],
    ) -> Result<CalibrationOutcome, CameraModelError> {
        model.estimate_intrinsics(board_size, object_points, image_points)?;
        info!(
            "linear intrinsic estimate from {} views: {:?}",
            object_points.len(),
            model.write_parameters()
        );

        let mut poses = Vec::with_capacity(object_points.len());
        for (obj, img) in object_points.iter().zip(image_points.iter()) {
            poses.push(extrinsics::estimate_extrinsics(model, obj, img)?);
        }

        let converged = if self.options.refine {
            self.refine(model, &mut poses, object_points, image_points)?
        } else {
            true
        };

        let (fx, fy, cx, cy) = model.nominal_intrinsics();
        validation::validate_focal(fx, fy)?;
        validation::validate_principal_point(cx, cy)?;

        let scorer = ReprojectionScorer::new(model);
        let (rms_error, per_view_errors) =
            scorer.reprojection_error(object_points, image_points, &poses)?;
        info!(
            "calibration finished: rms = {:.4} px over {} views",
            rms_error,
            poses.len()
        );

        Ok(CalibrationOutcome {
            poses,
            rms_error,
            per_view_errors,
            converged,
        })
    }

    /// Joint bundle refinement of intrinsics and all view poses. Returns
    /// whether the solver produced a solution; on failure the linear
    /// estimates are left untouched.
    fn refine<M: ProjectionModel + ?Sized>(
        &self,
        model: &mut M,
        poses: &mut [Pose],
        object_points: &[Vec<Vector3<f64>>],
        image_points: &[Vec<Vector2<f64>>],
    ) -> Result<bool, CameraModelError> {
        let mut problem = Problem::new();
        let mut initial_values = HashMap::new();

        initial_values.insert(
            "intrinsics".to_string(),
            DVector::from_vec(model.write_parameters()),
        );

        for (v, ((obj, img), pose)) in object_points
            .iter()
            .zip(image_points.iter())
            .zip(poses.iter())
            .enumerate()
        {
            let pose_key = format!("pose_{v}");
            let factor = ViewReprojectionFactor::new(model.model_type(), obj, img);
            problem.add_residual_block(
                factor.residual_len(),
                &["intrinsics", pose_key.as_str()],
                Box::new(factor),
                None,
            );

            let (rvec, tvec) = pose.to_rvec_tvec();
            initial_values.insert(
                pose_key,
                DVector::from_vec(vec![rvec.x, rvec.y, rvec.z, tvec.x, tvec.y, tvec.z]),
            );
        }

        let solver_options = OptimizerOptions {
            max_iteration: self.options.max_iterations,
            min_rel_error_decrease_threshold: self.options.tolerance,
            ..OptimizerOptions::default()
        };
        let optimizer = LevenbergMarquardtOptimizer::default();
        let result = match optimizer.optimize(&problem, &initial_values, Some(solver_options)) {
            Some(result) => result,
            None => {
                warn!("bundle refinement did not converge, keeping linear estimates");
                return Ok(false);
            }
        };

        let intrinsics = result
            .get("intrinsics")
            .ok_or_else(|| CameraModelError::Numerical("solver lost intrinsics block".into()))?;
        model.read_parameters(intrinsics.as_slice())?;

        for (v, pose) in poses.iter_mut().enumerate() {
            let refined = result
                .get(&format!("pose_{v}"))
                .ok_or_else(|| CameraModelError::Numerical("solver lost pose block".into()))?;
            *pose = Pose::from_rvec_tvec(
                &Vector3::new(refined[0], refined[1], refined[2]),
                &Vector3::new(refined[3], refined[4], refined[5]),
            );
        }
        Ok(true)
    }
}
