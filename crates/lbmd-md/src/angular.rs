//! Three- and four-body potentials: bond angles and dihedrals.

use crate::tabulated::TabulatedFunction;
use lbmd_math::Vec3;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Lower bound on sin θ when dividing by it near collinear triples.
const SIN_MIN: f64 = 1e-8;
/// Cross products shorter than this mark a degenerate dihedral.
const NORMAL_MIN_SQ: f64 = 1e-20;

/// Wrap an angle into `(-π, π]`.
pub fn wrap_angle(phi: f64) -> f64 {
    let w = phi - 2.0 * PI * (phi / (2.0 * PI)).round();
    if w <= -PI { w + 2.0 * PI } else { w }
}

/// Bond-angle potential V(θ) at the middle particle of a triple.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AngularPotential {
    /// V(θ) = 0.5 k (θ - θ0)².
    Harmonic { k: f64, theta0: f64 },
    /// V(θ) = k (1 - cos(θ - θ0)).
    Cosine { k: f64, theta0: f64 },
    /// Tabulated V(θ), θ in radians.
    Tabulated { table: TabulatedFunction },
}

impl AngularPotential {
    /// `(V(θ), dV/dθ)`.
    pub fn energy_and_derivative(&self, theta: f64) -> (f64, f64) {
        match self {
            AngularPotential::Harmonic { k, theta0 } => {
                let d = theta - theta0;
                (0.5 * k * d * d, k * d)
            }
            AngularPotential::Cosine { k, theta0 } => {
                let d = theta - theta0;
                (k * (1.0 - d.cos()), k * d.sin())
            }
            AngularPotential::Tabulated { table } => table.value_and_derivative(theta),
        }
    }

    /// Forces for the triple (i, j, k) with j at the vertex.
    ///
    /// `a = x_i - x_j` and `b = x_k - x_j`. Returns `([F_i, F_j, F_k], energy)`.
    pub fn compute(&self, a: Vec3, b: Vec3) -> ([Vec3; 3], f64) {
        let (la, lb) = (a.norm(), b.norm());
        if la < 1e-10 || lb < 1e-10 {
            return ([Vec3::zeros(); 3], 0.0);
        }
        let (ua, ub) = (a / la, b / lb);
        let cos_t = ua.dot(&ub).clamp(-1.0, 1.0);
        let theta = cos_t.acos();
        let (v, dv) = self.energy_and_derivative(theta);

        let sin_t = (1.0 - cos_t * cos_t).sqrt().max(SIN_MIN);
        let pre = dv / sin_t;
        let fi = pre * (ub - cos_t * ua) / la;
        let fk = pre * (ua - cos_t * ub) / lb;
        ([fi, -(fi + fk), fk], v)
    }
}

/// Dihedral angle φ of the chain 1-2-3-4 from its bond vectors
/// `b1 = x2 - x1`, `b2 = x3 - x2`, `b3 = x4 - x3`. Range `(-π, π]`.
pub fn dihedral_angle(b1: &Vec3, b2: &Vec3, b3: &Vec3) -> f64 {
    let n1 = b1.cross(b2);
    let n2 = b2.cross(b3);
    (b2.norm() * b1.dot(&n2)).atan2(n1.dot(&n2))
}

/// Dihedral potential V(φ).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DihedralPotential {
    /// V(φ) = k (1 + cos(n φ - φ0)).
    PeriodicCosine { k: f64, multiplicity: f64, phi0: f64 },
    /// V(φ) = 0.5 k Δ², Δ = φ - φ0 wrapped into (-π, π].
    Harmonic { k: f64, phi0: f64 },
    /// Tabulated V(φ) over `[-π, π]`.
    Tabulated { table: TabulatedFunction },
}

impl DihedralPotential {
    /// `(V(φ), dV/dφ)`.
    pub fn energy_and_derivative(&self, phi: f64) -> (f64, f64) {
        match self {
            DihedralPotential::PeriodicCosine {
                k,
                multiplicity,
                phi0,
            } => {
                let arg = multiplicity * phi - phi0;
                (k * (1.0 + arg.cos()), -k * multiplicity * arg.sin())
            }
            DihedralPotential::Harmonic { k, phi0 } => {
                let d = wrap_angle(phi - phi0);
                (0.5 * k * d * d, k * d)
            }
            DihedralPotential::Tabulated { table } => table.value_and_derivative(phi),
        }
    }

    /// Forces on the quadruple from its bond vectors. Returns `([F_1..F_4], energy)`.
    pub fn compute(&self, b1: Vec3, b2: Vec3, b3: Vec3) -> ([Vec3; 4], f64) {
        self.compute_relative(b1, b2, b3, 0.0)
    }

    /// As [`compute`](Self::compute) but evaluates V at `φ - phi_ref`, wrapped.
    pub fn compute_relative(&self, b1: Vec3, b2: Vec3, b3: Vec3, phi_ref: f64) -> ([Vec3; 4], f64) {
        let n1 = b1.cross(&b2);
        let n2 = b2.cross(&b3);
        let (n1_sq, n2_sq) = (n1.norm_squared(), n2.norm_squared());
        let b2_sq = b2.norm_squared();
        if n1_sq < NORMAL_MIN_SQ || n2_sq < NORMAL_MIN_SQ || b2_sq < NORMAL_MIN_SQ {
            return ([Vec3::zeros(); 4], 0.0);
        }
        let b2_len = b2_sq.sqrt();
        let phi = (b2_len * b1.dot(&n2)).atan2(n1.dot(&n2));
        let (v, dv) = self.energy_and_derivative(wrap_angle(phi - phi_ref));

        // Gradients of φ with respect to each position.
        let g1 = -b2_len / n1_sq * n1;
        let g4 = b2_len / n2_sq * n2;
        let p = b1.dot(&b2) / b2_sq;
        let q = b3.dot(&b2) / b2_sq;
        let g2 = -(1.0 + p) * g1 + q * g4;
        let g3 = p * g1 - (1.0 + q) * g4;

        ([-dv * g1, -dv * g2, -dv * g3, -dv * g4], v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabulated::Interpolation;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn angle_energy(pot: &AngularPotential, x: &[Vec3; 3]) -> f64 {
        pot.compute(x[0] - x[1], x[2] - x[1]).1
    }

    fn dihedral_energy(pot: &DihedralPotential, x: &[Vec3; 4], phi_ref: f64) -> f64 {
        pot.compute_relative(x[1] - x[0], x[2] - x[1], x[3] - x[2], phi_ref).1
    }

    fn numerical_forces<const N: usize>(e: impl Fn(&[Vec3; N]) -> f64, x: [Vec3; N]) -> [Vec3; N] {
        let h = 1e-6;
        let mut out = [Vec3::zeros(); N];
        for (k, f) in out.iter_mut().enumerate() {
            for d in 0..3 {
                let mut p = x;
                let mut m = x;
                p[k][d] += h;
                m[k][d] -= h;
                f[d] = -(e(&p) - e(&m)) / (2.0 * h);
            }
        }
        out
    }

    #[test]
    fn test_wrap_angle() {
        assert_relative_eq!(wrap_angle(3.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(-PI), PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(0.3), 0.3);
    }

    #[test]
    fn test_harmonic_angle_at_rest() {
        let pot = AngularPotential::Harmonic {
            k: 5.0,
            theta0: PI / 2.0,
        };
        let (f, e) = pot.compute(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 0.0));
        assert_relative_eq!(e, 0.0, epsilon = 1e-12);
        for fk in f {
            assert!(fk.norm() < 1e-12);
        }
    }

    #[test]
    fn test_angle_forces_sum_to_zero() {
        let pot = AngularPotential::Cosine { k: 3.0, theta0: 1.9 };
        let (f, _) = pot.compute(Vec3::new(1.0, 0.2, -0.1), Vec3::new(-0.3, 1.1, 0.4));
        assert_relative_eq!(f[0] + f[1] + f[2], Vec3::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn test_dihedral_angle_sign() {
        let b2 = Vec3::new(0.0, 0.0, 1.0);
        let b1 = Vec3::new(1.0, 0.0, 0.0);
        assert_relative_eq!(dihedral_angle(&b1, &b2, &-b1), 0.0, epsilon = 1e-12);
        assert_relative_eq!(dihedral_angle(&b1, &b2, &b1).abs(), PI, epsilon = 1e-12);
        let phi = dihedral_angle(&b1, &b2, &Vec3::new(0.0, 1.0, 0.0));
        assert_relative_eq!(phi.abs(), PI / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_dihedral_reference_angle_is_minimum() {
        let pot = DihedralPotential::Harmonic { k: 10.0, phi0: 0.0 };
        let x = [
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::zeros(),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.3, 0.8, 1.2),
        ];
        let phi = dihedral_angle(&(x[1] - x[0]), &(x[2] - x[1]), &(x[3] - x[2]));
        let (f, e) = pot.compute_relative(x[1] - x[0], x[2] - x[1], x[3] - x[2], phi);
        assert_relative_eq!(e, 0.0, epsilon = 1e-12);
        assert!(f.iter().all(|fk| fk.norm() < 1e-10));
    }

    #[test]
    fn test_degenerate_dihedral_is_zero() {
        let pot = DihedralPotential::PeriodicCosine {
            k: 1.0,
            multiplicity: 3.0,
            phi0: 0.0,
        };
        let b = Vec3::new(0.0, 0.0, 1.0);
        let (f, e) = pot.compute(b, b, b);
        assert_eq!(e, 0.0);
        assert!(f.iter().all(|fk| *fk == Vec3::zeros()));
    }

    fn arb_vec() -> impl Strategy<Value = Vec3> {
        (-1.0f64..1.0, -1.0f64..1.0, -1.0f64..1.0).prop_map(|(x, y, z)| Vec3::new(x, y, z))
    }

    proptest! {
        #[test]
        fn angle_force_is_negative_gradient(a in arb_vec(), b in arb_vec(), which in 0usize..3) {
            let x = [Vec3::new(1.0, 0.0, 0.0) + 0.3 * a, Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0) + 0.3 * b];
            let pot = match which {
                0 => AngularPotential::Harmonic { k: 4.0, theta0: 1.8 },
                1 => AngularPotential::Cosine { k: 2.0, theta0: 2.1 },
                _ => AngularPotential::Tabulated {
                    table: TabulatedFunction::from_fn(
                        Interpolation::CubicSpline,
                        (0..=40).map(|i| PI * i as f64 / 40.0).collect(),
                        |t| 1.5 * (t - 2.0).powi(2),
                    ).unwrap(),
                },
            };
            let (f, _) = pot.compute(x[0] - x[1], x[2] - x[1]);
            let num = numerical_forces(|p| angle_energy(&pot, p), x);
            for k in 0..3 {
                prop_assert!((f[k] - num[k]).norm() < 1e-5 * (1.0 + f[k].norm()));
            }
        }

        #[test]
        fn dihedral_force_is_negative_gradient(
            a in arb_vec(), b in arb_vec(), phi_ref in -3.0f64..3.0, which in 0usize..3,
        ) {
            let x = [
                Vec3::new(1.0, 0.0, 0.0) + 0.3 * a,
                Vec3::zeros(),
                Vec3::new(0.0, 0.0, 1.2),
                Vec3::new(0.0, 1.0, 1.3) + 0.3 * b,
            ];
            let pot = match which {
                0 => DihedralPotential::PeriodicCosine { k: 2.0, multiplicity: 3.0, phi0: 0.4 },
                1 => DihedralPotential::Harmonic { k: 5.0, phi0: 0.0 },
                _ => DihedralPotential::Tabulated {
                    table: TabulatedFunction::from_fn(
                        Interpolation::CubicSpline,
                        (0..=80).map(|i| -PI + 2.0 * PI * i as f64 / 80.0).collect(),
                        |phi| 1.2 * (1.0 - phi.cos()) + 0.3 * (2.0 * phi).sin(),
                    ).unwrap(),
                },
            };
            let phi = dihedral_angle(&(x[1] - x[0]), &(x[2] - x[1]), &(x[3] - x[2]));
            // The wrapped harmonic has a kink opposite the minimum, and the
            // table's end slopes need not match across ±π.
            prop_assume!(which == 0 || wrap_angle(phi - phi_ref).abs() < 3.0);
            let (f, _) = pot.compute_relative(x[1] - x[0], x[2] - x[1], x[3] - x[2], phi_ref);
            let num = numerical_forces(|p| dihedral_energy(&pot, p, phi_ref), x);
            for k in 0..4 {
                prop_assert!((f[k] - num[k]).norm() < 1e-5 * (1.0 + f[k].norm()));
            }
            let total: Vec3 = f.iter().sum();
            prop_assert!(total.norm() < 1e-9 * (1.0 + f[0].norm()));
        }
    }
}
