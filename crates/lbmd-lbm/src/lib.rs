//! Lattice-Boltzmann fluid for coupled particle simulations.
//!
//! A fluctuating D3Q19 model decomposed over the same node grid as the
//! particles. Stresses relax with separate bulk and shear rates, external
//! body forces enter through the collision, and particles exchange momentum
//! with the fluid through a frictional point coupling.
//!
//! # Example
//!
//! ```
//! use lbmd_comm::SerialComm;
//! use lbmd_lbm::{InitPopulation, LatticeBoltzmann, LbParams};
//! use lbmd_math::{OrthorhombicBox, Vec3};
//!
//! let comm = SerialComm::new();
//! let mut params = LbParams::new([8, 8, 8]);
//! params.gamma_s = 0.5;
//! let mut lb = LatticeBoltzmann::new(params, &OrthorhombicBox::cubic(8.0), [1, 1, 1], 0, 0.05, 1).unwrap();
//! lb.initialize(&InitPopulation::Wave { density: 1.0, amplitude: 0.01 }, &comm).unwrap();
//!
//! for _ in 0..10 {
//!     lb.step_lattice(&comm).unwrap();
//! }
//! let profile = lb.vz_profile_along_x(&comm).unwrap();
//! assert!(profile[2] > 0.0 && profile[2] < 0.01);
//! ```

pub mod coupling;
pub mod error;
pub mod forcing;
pub mod lattice;
pub mod solver;

pub use error::{LbError, Result};
pub use forcing::{BodyForce, InitPopulation, total_force};
pub use lattice::{Moments, Populations, Q};
pub use solver::{LatticeBoltzmann, LbParams};

/// Lattice sound speed squared
pub const C_S_SQ: f64 = 1.0 / 3.0;

/// c_s⁴
pub const C_S_SQ_SQ: f64 = 1.0 / 9.0;
