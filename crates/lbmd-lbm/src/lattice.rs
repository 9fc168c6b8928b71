//! D3Q19 velocity set and the moment transforms used by the collision.
//!
//! Nineteen velocity directions on a 3D cubic lattice:
//! - 1 rest (0)
//! - 6 face-centered (±x, ±y, ±z)
//! - 12 edge-centered (±x±y, ±y±z, ±z±x)
//!
//! Populations are reconstructed from density, momentum and stress only
//! (second-order Hermite expansion), which leaves the nine higher "ghost"
//! modes at zero after every collision.

use crate::{C_S_SQ, C_S_SQ_SQ};
use lbmd_math::{Mat3, Vec3};

/// Number of discrete velocities.
pub const Q: usize = 19;

/// Populations of one site.
pub type Populations = [f64; Q];

/// D3Q19 discrete velocities: [vx, vy, vz]
pub const E: [[i32; 3]; Q] = [
    [0, 0, 0], // 0: rest
    [1, 0, 0], // 1-6: face
    [-1, 0, 0],
    [0, 1, 0],
    [0, -1, 0],
    [0, 0, 1],
    [0, 0, -1],
    [1, 1, 0], // 7-18: edge
    [-1, -1, 0],
    [1, -1, 0],
    [-1, 1, 0],
    [1, 0, 1],
    [-1, 0, -1],
    [1, 0, -1],
    [-1, 0, 1],
    [0, 1, 1],
    [0, -1, -1],
    [0, 1, -1],
    [0, -1, 1],
];

/// D3Q19 weights
pub const W: [f64; Q] = [
    1.0 / 3.0,  // 0: rest
    1.0 / 18.0, // 1-6: face
    1.0 / 18.0,
    1.0 / 18.0,
    1.0 / 18.0,
    1.0 / 18.0,
    1.0 / 18.0,
    1.0 / 36.0, // 7-18: edge
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
];

#[inline]
fn velocity(i: usize) -> Vec3 {
    Vec3::new(E[i][0] as f64, E[i][1] as f64, E[i][2] as f64)
}

/// Hydrodynamic moments of a site.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Moments {
    /// Density ρ = Σ f_i.
    pub rho: f64,
    /// Momentum density j = Σ f_i c_i.
    pub j: Vec3,
    /// Momentum flux Π = Σ f_i c_i c_i.
    pub pi: Mat3,
}

impl Moments {
    pub fn of(f: &Populations) -> Self {
        let mut rho = 0.0;
        let mut j = Vec3::zeros();
        let mut pi = Mat3::zeros();
        for (i, &fi) in f.iter().enumerate() {
            let c = velocity(i);
            rho += fi;
            j += fi * c;
            pi += fi * c * c.transpose();
        }
        Self { rho, j, pi }
    }

    /// Equilibrium moments for density `rho` and velocity `u`.
    pub fn equilibrium(rho: f64, u: Vec3) -> Self {
        Self {
            rho,
            j: rho * u,
            pi: equilibrium_stress(rho, u),
        }
    }

    /// Populations carrying exactly these moments and no ghost modes.
    pub fn populations(&self) -> Populations {
        let s = self.pi - self.rho * C_S_SQ * Mat3::identity();
        std::array::from_fn(|i| {
            let c = velocity(i);
            let q = c * c.transpose() - C_S_SQ * Mat3::identity();
            W[i] * (self.rho + self.j.dot(&c) / C_S_SQ + s.dot(&q) / (2.0 * C_S_SQ_SQ))
        })
    }
}

/// Π_eq = ρ c_s² I + ρ u u.
#[inline]
pub fn equilibrium_stress(rho: f64, u: Vec3) -> Mat3 {
    rho * C_S_SQ * Mat3::identity() + rho * u * u.transpose()
}

/// Equilibrium populations f_i^eq(ρ, u).
pub fn equilibrium(rho: f64, u: Vec3) -> Populations {
    std::array::from_fn(|i| {
        let eu = velocity(i).dot(&u);
        let uu = u.norm_squared();
        W[i] * rho * (1.0 + 3.0 * eu + 4.5 * eu * eu - 1.5 * uu)
    })
}
