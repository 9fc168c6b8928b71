//! Initial populations and external body forces.

use lbmd_math::{Int3, Vec3};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// How populations are initialised.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitPopulation {
    /// Equilibrium at uniform density and velocity (lattice units).
    Uniform { density: f64, velocity: Vec3 },
    /// Uniform density with a transverse wave `v_z = A sin(2π x / N_x)`.
    Wave { density: f64, amplitude: f64 },
}

impl InitPopulation {
    /// Density and velocity at a global site.
    pub fn state_at(&self, site: Int3, lattice: Int3) -> (f64, Vec3) {
        match self {
            InitPopulation::Uniform { density, velocity } => (*density, *velocity),
            InitPopulation::Wave { density, amplitude } => {
                let vz = amplitude * (TAU * site[0] as f64 / lattice[0] as f64).sin();
                (*density, Vec3::new(0.0, 0.0, vz))
            }
        }
    }
}

/// External force density acting on the fluid (lattice units, per LB step).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BodyForce {
    /// Same force everywhere, e.g. gravity.
    Constant { force: Vec3 },
    /// `A sin(2π t / period)` with `t` counted in LB steps.
    PeriodicInTime { amplitude: Vec3, period: u64 },
    /// `A sin(2π x / N_x)`, a shear forcing along x.
    SineAlongX { amplitude: Vec3 },
}

impl BodyForce {
    pub fn at(&self, site: Int3, lattice: Int3, step: u64) -> Vec3 {
        match self {
            BodyForce::Constant { force } => *force,
            BodyForce::PeriodicInTime { amplitude, period } => {
                if *period == 0 {
                    return Vec3::zeros();
                }
                amplitude * (TAU * (step % period) as f64 / *period as f64).sin()
            }
            BodyForce::SineAlongX { amplitude } => {
                amplitude * (TAU * site[0] as f64 / lattice[0] as f64).sin()
            }
        }
    }
}

/// Sum of all registered forces at a site.
pub fn total_force(forces: &[BodyForce], site: Int3, lattice: Int3, step: u64) -> Vec3 {
    forces
        .iter()
        .map(|f| f.at(site, lattice, step))
        .fold(Vec3::zeros(), |acc, f| acc + f)
}
