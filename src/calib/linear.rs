//! Closed-form estimators used to seed the nonlinear refinement: planar
//! homographies, a Zhang-style focal bootstrap with the principal point
//! pinned to the image center, and pose recovery from a homography or from
//! a general DLT resection.

use nalgebra::{DMatrix, DVector, Matrix3, Rotation3, UnitQuaternion, Vector2, Vector3};

use crate::camera::{BoardSize, CameraModelError, Pose};

/// Hartley normalization: translate to the centroid and scale so the mean
/// distance from the origin is sqrt(2). Returns the transformed points and
/// the similarity that maps originals onto them.
fn normalize_points(points: &[Vector2<f64>]) -> (Vec<Vector2<f64>>, Matrix3<f64>) {
    let n = points.len() as f64;
    let centroid = points.iter().fold(Vector2::zeros(), |acc, p| acc + p) / n;
    let mean_dist = points.iter().map(|p| (p - centroid).norm()).sum::<f64>() / n;
    let scale = if mean_dist > f64::EPSILON {
        2.0_f64.sqrt() / mean_dist
    } else {
        1.0
    };

    let transform = Matrix3::new(
        scale,
        0.0,
        -scale * centroid.x,
        0.0,
        scale,
        -scale * centroid.y,
        0.0,
        0.0,
        1.0,
    );
    let normalized = points.iter().map(|p| (p - centroid) * scale).collect();
    (normalized, transform)
}

/// Estimates the homography mapping `src` onto `dst` with the normalized
/// direct linear transform.
pub fn dlt_homography(
    src: &[Vector2<f64>],
    dst: &[Vector2<f64>],
) -> Result<Matrix3<f64>, CameraModelError> {
    if src.len() != dst.len() {
        return Err(CameraModelError::DimensionMismatch {
            expected: src.len(),
            actual: dst.len(),
        });
    }
    if src.len() < 4 {
        return Err(CameraModelError::DegenerateInput(format!(
            "homography needs at least 4 correspondences, got {}",
            src.len()
        )));
    }

    let (src_n, t_src) = normalize_points(src);
    let (dst_n, t_dst) = normalize_points(dst);

    // 2N x 9 design matrix, padded with zero rows so the SVD exposes the
    // full right null space even for the minimal 4-point case.
    let rows = (2 * src.len()).max(9);
    let mut a = DMatrix::zeros(rows, 9);
    for (i, (s, d)) in src_n.iter().zip(dst_n.iter()).enumerate() {
        a[(2 * i, 0)] = -s.x;
        a[(2 * i, 1)] = -s.y;
        a[(2 * i, 2)] = -1.0;
        a[(2 * i, 6)] = d.x * s.x;
        a[(2 * i, 7)] = d.x * s.y;
        a[(2 * i, 8)] = d.x;

        a[(2 * i + 1, 3)] = -s.x;
        a[(2 * i + 1, 4)] = -s.y;
        a[(2 * i + 1, 5)] = -1.0;
        a[(2 * i + 1, 6)] = d.y * s.x;
        a[(2 * i + 1, 7)] = d.y * s.y;
        a[(2 * i + 1, 8)] = d.y;
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| CameraModelError::Numerical("SVD failed on homography system".into()))?;
    let h = v_t.row(8);

    let h_norm = Matrix3::new(
        h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8],
    );

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| CameraModelError::Numerical("singular normalization".into()))?;
    let mut homography = t_dst_inv * h_norm * t_src;

    let w = homography[(2, 2)];
    if w.abs() > f64::EPSILON {
        homography /= w;
    }
    Ok(homography)
}

/// Recovers the board pose from a homography expressed in normalized image
/// coordinates (intrinsics already removed). The board lies in its own
/// z = 0 plane.
pub fn pose_from_homography(h: &Matrix3<f64>) -> Result<Pose, CameraModelError> {
    let h0 = h.column(0).into_owned();
    let h1 = h.column(1).into_owned();
    let h2 = h.column(2).into_owned();

    let n0 = h0.norm();
    let n1 = h1.norm();
    if n0 < f64::EPSILON || n1 < f64::EPSILON {
        return Err(CameraModelError::DegenerateInput(
            "rank-deficient homography".into(),
        ));
    }
    let mut lambda = 2.0 / (n0 + n1);
    // Board must sit in front of the camera
    if lambda * h2.z < 0.0 {
        lambda = -lambda;
    }

    let r0 = lambda * h0;
    let r1 = lambda * h1;
    let r2 = r0.cross(&r1);
    let approx_r = Matrix3::from_columns(&[r0, r1, r2]);

    // Project onto SO(3)
    let svd = approx_r.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(CameraModelError::Numerical("SVD failed on rotation".into())),
    };
    let mut rot = u * v_t;
    if rot.determinant() < 0.0 {
        let mut u_fix = u;
        u_fix.column_mut(2).neg_mut();
        rot = u_fix * v_t;
    }

    Ok(Pose {
        rotation: UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rot)),
        translation: lambda * h2,
    })
}

/// Direct linear resection from 3D points to normalized image coordinates.
/// Needs at least six points in general (non-planar) position.
pub fn dlt_pnp(
    object_points: &[Vector3<f64>],
    normalized: &[Vector2<f64>],
) -> Result<Pose, CameraModelError> {
    if object_points.len() != normalized.len() {
        return Err(CameraModelError::DimensionMismatch {
            expected: object_points.len(),
            actual: normalized.len(),
        });
    }
    if object_points.len() < 6 {
        return Err(CameraModelError::DegenerateInput(format!(
            "DLT resection needs at least 6 points, got {}",
            object_points.len()
        )));
    }

    let rows = (2 * object_points.len()).max(12);
    let mut a = DMatrix::zeros(rows, 12);
    for (i, (obj, m)) in object_points.iter().zip(normalized.iter()).enumerate() {
        let r = 2 * i;
        a[(r, 0)] = obj.x;
        a[(r, 1)] = obj.y;
        a[(r, 2)] = obj.z;
        a[(r, 3)] = 1.0;
        a[(r, 8)] = -m.x * obj.x;
        a[(r, 9)] = -m.x * obj.y;
        a[(r, 10)] = -m.x * obj.z;
        a[(r, 11)] = -m.x;

        a[(r + 1, 4)] = obj.x;
        a[(r + 1, 5)] = obj.y;
        a[(r + 1, 6)] = obj.z;
        a[(r + 1, 7)] = 1.0;
        a[(r + 1, 8)] = -m.y * obj.x;
        a[(r + 1, 9)] = -m.y * obj.y;
        a[(r + 1, 10)] = -m.y * obj.z;
        a[(r + 1, 11)] = -m.y;
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| CameraModelError::Numerical("SVD failed on resection system".into()))?;
    let p = v_t.row(11);

    let mut rot_approx = Matrix3::new(p[0], p[1], p[2], p[4], p[5], p[6], p[8], p[9], p[10]);
    let mut trans = Vector3::new(p[3], p[7], p[11]);

    // Fix the projective sign so points land in front of the camera
    let centroid =
        object_points.iter().fold(Vector3::zeros(), |acc, o| acc + o) / object_points.len() as f64;
    if (rot_approx * centroid + trans).z < 0.0 {
        rot_approx = -rot_approx;
        trans = -trans;
    }

    let svd = rot_approx.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(CameraModelError::Numerical("SVD failed on rotation".into())),
    };
    let scale = svd.singular_values.sum() / 3.0;
    if scale < f64::EPSILON {
        return Err(CameraModelError::DegenerateInput(
            "rank-deficient resection".into(),
        ));
    }
    let mut rot = u * v_t;
    if rot.determinant() < 0.0 {
        let mut u_fix = u;
        u_fix.column_mut(2).neg_mut();
        rot = u_fix * v_t;
    }

    Ok(Pose {
        rotation: UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rot)),
        translation: trans / scale,
    })
}

/// Zhang's focal constraint from planar views, with the principal point
/// assumed at (`cx`, `cy`) and zero skew. Each view homography contributes
/// two linear equations in (1/fx^2, 1/fy^2).
pub(crate) fn estimate_focal_from_views(
    board_size: BoardSize,
    object_points: &[Vec<Vector3<f64>>],
    image_points: &[Vec<Vector2<f64>>],
    cx: f64,
    cy: f64,
) -> Result<(f64, f64), CameraModelError> {
    if object_points.len() != image_points.len() {
        return Err(CameraModelError::DimensionMismatch {
            expected: object_points.len(),
            actual: image_points.len(),
        });
    }
    if object_points.is_empty() {
        return Err(CameraModelError::DegenerateInput(
            "intrinsic estimation needs at least one view".into(),
        ));
    }

    let expected = board_size.point_count();
    let mut a = DMatrix::zeros(2 * object_points.len(), 2);
    let mut b = DVector::zeros(2 * object_points.len());

    for (view, (obj, img)) in object_points.iter().zip(image_points.iter()).enumerate() {
        if obj.len() != expected || img.len() != expected {
            return Err(CameraModelError::DimensionMismatch {
                expected,
                actual: obj.len().min(img.len()),
            });
        }
        if obj.iter().any(|p| p.z.abs() > 1e-6) {
            return Err(CameraModelError::DegenerateInput(
                "calibration board points must lie in the z = 0 plane".into(),
            ));
        }

        let board: Vec<Vector2<f64>> = obj.iter().map(|p| Vector2::new(p.x, p.y)).collect();
        let h = dlt_homography(&board, img)?;

        // Move the principal point to the origin, leaving a homography for
        // the diagonal calibration matrix diag(fx, fy, 1).
        let e = |r: usize, c: usize| -> f64 {
            match r {
                0 => h[(0, c)] - cx * h[(2, c)],
                1 => h[(1, c)] - cy * h[(2, c)],
                _ => h[(2, c)],
            }
        };

        let r = 2 * view;
        // Orthogonality of the first two rotation columns
        a[(r, 0)] = e(0, 0) * e(0, 1);
        a[(r, 1)] = e(1, 0) * e(1, 1);
        b[r] = -e(2, 0) * e(2, 1);
        // Equal norms of the first two rotation columns
        a[(r + 1, 0)] = e(0, 0) * e(0, 0) - e(0, 1) * e(0, 1);
        a[(r + 1, 1)] = e(1, 0) * e(1, 0) - e(1, 1) * e(1, 1);
        b[r + 1] = -(e(2, 0) * e(2, 0) - e(2, 1) * e(2, 1));
    }

    let solution = a
        .svd(true, true)
        .solve(&b, f64::EPSILON)
        .map_err(|e| CameraModelError::Numerical(e.to_string()))?;

    let alpha = solution[0];
    let beta = solution[1];
    if !alpha.is_finite() || !beta.is_finite() || alpha <= 0.0 || beta <= 0.0 {
        return Err(CameraModelError::DegenerateInput(
            "focal constraint system has no positive solution".into(),
        ));
    }
    Ok((1.0 / alpha.sqrt(), 1.0 / beta.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn apply_h(h: &Matrix3<f64>, p: &Vector2<f64>) -> Vector2<f64> {
        let q = h * Vector3::new(p.x, p.y, 1.0);
        Vector2::new(q.x / q.z, q.y / q.z)
    }

    #[test]
    fn homography_recovers_known_mapping() {
        let truth = Matrix3::new(1.2, 0.1, 30.0, -0.05, 0.9, -12.0, 1e-4, -2e-4, 1.0);
        let src: Vec<Vector2<f64>> = [
            (0.0, 0.0),
            (1.0, 0.0),
            (0.0, 1.0),
            (1.0, 1.0),
            (0.5, 0.25),
            (0.2, 0.8),
        ]
        .iter()
        .map(|&(x, y)| Vector2::new(x, y))
        .collect();
        let dst: Vec<Vector2<f64>> = src.iter().map(|p| apply_h(&truth, p)).collect();

        let h = dlt_homography(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(dst.iter()) {
            let mapped = apply_h(&h, s);
            assert_relative_eq!(mapped.x, d.x, epsilon = 1e-8);
            assert_relative_eq!(mapped.y, d.y, epsilon = 1e-8);
        }
    }

    #[test]
    fn homography_rejects_too_few_points() {
        let pts: Vec<Vector2<f64>> = (0..3).map(|i| Vector2::new(i as f64, 0.0)).collect();
        assert!(matches!(
            dlt_homography(&pts, &pts),
            Err(CameraModelError::DegenerateInput(_))
        ));
    }

    #[test]
    fn pose_from_homography_recovers_planar_pose() {
        let rotation = UnitQuaternion::from_euler_angles(0.1, -0.2, 0.05);
        let translation = Vector3::new(0.1, -0.05, 1.5);

        // Normalized-plane projections of a z = 0 grid
        let mut board = Vec::new();
        let mut observed = Vec::new();
        for i in 0..4 {
            for j in 0..4 {
                let obj = Vector3::new(i as f64 * 0.1, j as f64 * 0.1, 0.0);
                let cam = rotation * obj + translation;
                board.push(Vector2::new(obj.x, obj.y));
                observed.push(Vector2::new(cam.x / cam.z, cam.y / cam.z));
            }
        }

        let h = dlt_homography(&board, &observed).unwrap();
        let pose = pose_from_homography(&h).unwrap();
        assert_relative_eq!(pose.translation.x, translation.x, epsilon = 1e-6);
        assert_relative_eq!(pose.translation.y, translation.y, epsilon = 1e-6);
        assert_relative_eq!(pose.translation.z, translation.z, epsilon = 1e-6);
        assert!(pose.rotation.angle_to(&rotation) < 1e-6);
    }

    #[test]
    fn dlt_pnp_recovers_general_pose() {
        let rotation = UnitQuaternion::from_euler_angles(-0.15, 0.1, 0.3);
        let translation = Vector3::new(0.2, 0.1, 2.0);

        let object: Vec<Vector3<f64>> = [
            (0.0, 0.0, 0.0),
            (0.5, 0.0, 0.1),
            (0.0, 0.5, 0.2),
            (0.5, 0.5, -0.1),
            (0.25, 0.1, 0.3),
            (0.1, 0.4, -0.2),
            (0.4, 0.2, 0.15),
        ]
        .iter()
        .map(|&(x, y, z)| Vector3::new(x, y, z))
        .collect();
        let normalized: Vec<Vector2<f64>> = object
            .iter()
            .map(|o| {
                let c = rotation * o + translation;
                Vector2::new(c.x / c.z, c.y / c.z)
            })
            .collect();

        let pose = dlt_pnp(&object, &normalized).unwrap();
        assert_relative_eq!(pose.translation.x, translation.x, epsilon = 1e-6);
        assert_relative_eq!(pose.translation.y, translation.y, epsilon = 1e-6);
        assert_relative_eq!(pose.translation.z, translation.z, epsilon = 1e-6);
        assert!(pose.rotation.angle_to(&rotation) < 1e-6);
    }

    #[test]
    fn focal_bootstrap_recovers_ground_truth() {
        let fx = 480.0;
        let fy = 475.0;
        let cx = 320.0;
        let cy = 240.0;
        let board_size = BoardSize { cols: 5, rows: 4 };

        let views = [
            UnitQuaternion::from_euler_angles(0.25, 0.1, 0.0),
            UnitQuaternion::from_euler_angles(-0.2, 0.3, 0.1),
            UnitQuaternion::from_euler_angles(0.1, -0.25, -0.15),
        ];
        let mut object_points = Vec::new();
        let mut image_points = Vec::new();
        for (v, rot) in views.iter().enumerate() {
            let trans = Vector3::new(-0.2, -0.15, 1.0 + 0.3 * v as f64);
            let mut obj = Vec::new();
            let mut img = Vec::new();
            for r in 0..board_size.rows {
                for c in 0..board_size.cols {
                    let p = Vector3::new(c as f64 * 0.1, r as f64 * 0.1, 0.0);
                    let cam = rot * p + trans;
                    obj.push(p);
                    img.push(Vector2::new(
                        fx * cam.x / cam.z + cx,
                        fy * cam.y / cam.z + cy,
                    ));
                }
            }
            object_points.push(obj);
            image_points.push(img);
        }

        let (est_fx, est_fy) =
            estimate_focal_from_views(board_size, &object_points, &image_points, cx, cy).unwrap();
        assert_relative_eq!(est_fx, fx, epsilon = 1e-3);
        assert_relative_eq!(est_fy, fy, epsilon = 1e-3);
    }
}
