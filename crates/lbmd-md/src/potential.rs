//! Two-body potentials: non-bonded pair potentials and bond potentials.
//!
//! Both follow the same convention: given `r_ij = r_j - r_i`, `compute` returns
//! `(force on i, potential energy)` with `F_i = dV/dr * r_ij / r`. The force on
//! `j` is the negative.

use crate::tabulated::TabulatedFunction;
use crate::{MdError, Result};
use lbmd_math::Vec3;
use serde::{Deserialize, Serialize};

/// Separations below this are treated as overlapping and produce no force.
const R_MIN: f64 = 1e-10;

/// Non-bonded pair potential evaluated over the neighbour list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PairPotential {
    /// Lennard-Jones 12-6: V(r) = 4ε [(σ/r)^12 - (σ/r)^6] + shift for r < cutoff.
    LennardJones {
        epsilon: f64,
        sigma: f64,
        cutoff: f64,
        #[serde(default)]
        shift: f64,
    },
    /// Tabulated V(r), zero beyond `cutoff`.
    Tabulated {
        table: TabulatedFunction,
        cutoff: f64,
    },
}

impl PairPotential {
    /// Unshifted Lennard-Jones.
    pub fn lennard_jones(epsilon: f64, sigma: f64, cutoff: f64) -> Self {
        PairPotential::LennardJones {
            epsilon,
            sigma,
            cutoff,
            shift: 0.0,
        }
    }

    /// Lennard-Jones shifted so the energy is zero at the cutoff.
    pub fn lennard_jones_shifted(epsilon: f64, sigma: f64, cutoff: f64) -> Self {
        let s6 = (sigma / cutoff).powi(6);
        PairPotential::LennardJones {
            epsilon,
            sigma,
            cutoff,
            shift: -4.0 * epsilon * (s6 * s6 - s6),
        }
    }

    /// Tabulated pair potential. The table must cover `cutoff`.
    pub fn tabulated(table: TabulatedFunction, cutoff: f64) -> Result<Self> {
        if table.x_max() < cutoff {
            return Err(MdError::InvalidTable(format!(
                "table ends at {} before cutoff {cutoff}",
                table.x_max()
            )));
        }
        Ok(PairPotential::Tabulated { table, cutoff })
    }

    /// Interaction range.
    pub fn cutoff(&self) -> f64 {
        match self {
            PairPotential::LennardJones { cutoff, .. } | PairPotential::Tabulated { cutoff, .. } => {
                *cutoff
            }
        }
    }

    /// `(V(r), dV/dr)`, zero at or beyond the cutoff.
    pub fn energy_and_derivative(&self, r: f64) -> (f64, f64) {
        if r >= self.cutoff() {
            return (0.0, 0.0);
        }
        match self {
            PairPotential::LennardJones {
                epsilon,
                sigma,
                shift,
                ..
            } => {
                let s_r = sigma / r;
                let s_r6 = s_r.powi(6);
                let s_r12 = s_r6 * s_r6;
                let v = 4.0 * epsilon * (s_r12 - s_r6) + shift;
                let dv_dr = 24.0 * epsilon / r * (s_r6 - 2.0 * s_r12);
                (v, dv_dr)
            }
            PairPotential::Tabulated { table, .. } => table.value_and_derivative(r),
        }
    }

    /// Energy at separation `r`.
    pub fn energy(&self, r: f64) -> f64 {
        self.energy_and_derivative(r).0
    }

    /// Force on i and energy for `r_ij = r_j - r_i`.
    pub fn compute(&self, r_ij: Vec3) -> (Vec3, f64) {
        let r = r_ij.norm();
        if r < R_MIN {
            return (Vec3::zeros(), 0.0);
        }
        let (v, dv_dr) = self.energy_and_derivative(r);
        (dv_dr * r_ij / r, v)
    }
}

/// Bond potential for fixed pairs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BondPotential {
    /// V(r) = 0.5 k (r - r0)².
    Harmonic { k: f64, r0: f64 },
    /// FENE: V(r) = -0.5 K R² ln(1 - ((r - r0)/R)²), infinite beyond `r_max`.
    Fene { k: f64, r_max: f64, r0: f64 },
    /// Tabulated V(r).
    Tabulated { table: TabulatedFunction },
}

impl BondPotential {
    pub fn harmonic(k: f64, r0: f64) -> Self {
        BondPotential::Harmonic { k, r0 }
    }

    pub fn fene(k: f64, r_max: f64, r0: f64) -> Result<Self> {
        if r_max <= 0.0 {
            return Err(MdError::InvalidParameter(format!(
                "FENE maximum extension must be positive, got {r_max}"
            )));
        }
        Ok(BondPotential::Fene { k, r_max, r0 })
    }

    /// `(V(r), dV/dr)`.
    pub fn energy_and_derivative(&self, r: f64) -> (f64, f64) {
        match self {
            BondPotential::Harmonic { k, r0 } => {
                let dr = r - r0;
                (0.5 * k * dr * dr, k * dr)
            }
            BondPotential::Fene { k, r_max, r0 } => {
                let dr = r - r0;
                let ratio = dr / r_max;
                let arg = 1.0 - ratio * ratio;
                if arg <= 0.0 {
                    return (f64::INFINITY, f64::INFINITY);
                }
                (-0.5 * k * r_max * r_max * arg.ln(), k * dr / arg)
            }
            BondPotential::Tabulated { table } => table.value_and_derivative(r),
        }
    }

    /// Force on i and energy for `r_ij = r_j - r_i`.
    pub fn compute(&self, r_ij: Vec3) -> (Vec3, f64) {
        let r = r_ij.norm();
        if r < R_MIN {
            return (Vec3::zeros(), self.energy_and_derivative(r).0);
        }
        let (v, dv_dr) = self.energy_and_derivative(r);
        (dv_dr * r_ij / r, v)
    }
}
