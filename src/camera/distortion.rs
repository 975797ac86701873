//! Radial-tangential (Brown-Conrady) distortion on the normalized image
//! plane, shared by the pinhole and omnidirectional variants.

use nalgebra::{Matrix2, Vector2};

/// `[k1, k2, p1, p2]` radial and tangential coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadTanCoefficients {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
}

impl RadTanCoefficients {
    pub fn new(k1: f64, k2: f64, p1: f64, p2: f64) -> Self {
        RadTanCoefficients { k1, k2, p1, p2 }
    }

    pub fn is_zero(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.p1 == 0.0 && self.p2 == 0.0
    }

    /// Additive distortion displacement at `m`, so that
    /// `distorted = m + delta(m)`.
    pub fn delta(&self, m: &Vector2<f64>) -> Vector2<f64> {
        let mx2 = m.x * m.x;
        let my2 = m.y * m.y;
        let mxy = m.x * m.y;
        let r2 = mx2 + my2;
        let rad = self.k1 * r2 + self.k2 * r2 * r2;

        Vector2::new(
            m.x * rad + 2.0 * self.p1 * mxy + self.p2 * (r2 + 2.0 * mx2),
            m.y * rad + self.p1 * (r2 + 2.0 * my2) + 2.0 * self.p2 * mxy,
        )
    }

    /// Forward distortion of a normalized undistorted point.
    pub fn distort(&self, m: &Vector2<f64>) -> Vector2<f64> {
        m + self.delta(m)
    }

    /// Jacobian of the distorted point with respect to the undistorted one.
    pub fn jacobian(&self, m: &Vector2<f64>) -> Matrix2<f64> {
        let mx2 = m.x * m.x;
        let my2 = m.y * m.y;
        let r2 = mx2 + my2;
        let l = 1.0 + self.k1 * r2 + self.k2 * r2 * r2;
        // d(radial factor)/d(r2)
        let dl = self.k1 + 2.0 * self.k2 * r2;

        let dxdx = l + 2.0 * mx2 * dl + 2.0 * self.p1 * m.y + 6.0 * self.p2 * m.x;
        let dxdy = 2.0 * m.x * m.y * dl + 2.0 * self.p1 * m.x + 2.0 * self.p2 * m.y;
        let dydx = dxdy;
        let dydy = l + 2.0 * my2 * dl + 6.0 * self.p1 * m.y + 2.0 * self.p2 * m.x;

        Matrix2::new(dxdx, dxdy, dydx, dydy)
    }

    /// Removes the distortion by Newton iteration on `distort(m_u) = m_d`,
    /// seeded with the distorted point itself.
    pub fn undistort(&self, m_d: &Vector2<f64>) -> Vector2<f64> {
        if self.is_zero() {
            return *m_d;
        }
        let mut m_u = *m_d;
        for _ in 0..20 {
            let residual = self.distort(&m_u) - m_d;
            let step = match self.jacobian(&m_u).try_inverse() {
                Some(inv) => inv * residual,
                None => break,
            };
            m_u -= step;
            if step.norm() < 1e-14 {
                break;
            }
        }
        m_u
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const COEFFS: RadTanCoefficients = RadTanCoefficients {
        k1: -0.28,
        k2: 0.07,
        p1: 2.0e-4,
        p2: -5.0e-5,
    };

    #[test]
    fn zero_coefficients_are_identity() {
        let zero = RadTanCoefficients::new(0.0, 0.0, 0.0, 0.0);
        let m = Vector2::new(0.3, -0.2);
        assert_eq!(zero.distort(&m), m);
        assert_eq!(zero.undistort(&m), m);
        assert_eq!(zero.jacobian(&m), Matrix2::identity());
    }

    #[test]
    fn distort_undistort_round_trip() {
        for &(x, y) in &[(0.0, 0.0), (0.1, 0.05), (-0.3, 0.2), (0.4, -0.35)] {
            let m = Vector2::new(x, y);
            let m_d = COEFFS.distort(&m);
            let m_u = COEFFS.undistort(&m_d);
            assert_relative_eq!(m_u.x, m.x, epsilon = 1e-9);
            assert_relative_eq!(m_u.y, m.y, epsilon = 1e-9);
        }
    }

    #[test]
    fn undistort_converges_tightly_at_large_radius() {
        // Near the image edge the radial terms are strong; the round trip
        // must still hold to near machine precision.
        let m = Vector2::new(0.4, -0.35);
        let m_u = COEFFS.undistort(&COEFFS.distort(&m));
        assert_relative_eq!(m_u.x, m.x, epsilon = 1e-12);
        assert_relative_eq!(m_u.y, m.y, epsilon = 1e-12);
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let m = Vector2::new(0.25, -0.15);
        let jac = COEFFS.jacobian(&m);
        let h = 1e-7;
        for col in 0..2 {
            let mut fwd = m;
            let mut bwd = m;
            fwd[col] += h;
            bwd[col] -= h;
            let diff = (COEFFS.distort(&fwd) - COEFFS.distort(&bwd)) / (2.0 * h);
            assert_relative_eq!(jac[(0, col)], diff.x, epsilon = 1e-6);
            assert_relative_eq!(jac[(1, col)], diff.y, epsilon = 1e-6);
        }
    }
}
