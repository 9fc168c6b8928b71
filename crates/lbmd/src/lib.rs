//! lbmd — parallel molecular dynamics coupled to a lattice-Boltzmann fluid.
//!
//! This is the umbrella crate that provides the per-rank [`System`], the
//! [`VelocityVerlet`] integrator with its extensions, analysis probes and the
//! JSON [`SimulationConfig`], and re-exports the sub-crates.
//!
//! # Example
//!
//! ```
//! use lbmd::{Extension, LangevinThermostat, System, VelocityVerlet};
//! use lbmd::lbmd_comm::SerialComm;
//! use lbmd::lbmd_math::{OrthorhombicBox, Vec3};
//! use lbmd::lbmd_md::{CellGrid, PairPotential, Particle};
//!
//! let grid = CellGrid::auto(OrthorhombicBox::cubic(8.0), 1, 1.5, 0.3).unwrap();
//! let mut system = System::new(grid, 1, Box::new(SerialComm::new()), 42).unwrap();
//! system
//!     .set_pair_potential(0, 0, PairPotential::lennard_jones_shifted(1.0, 1.0, 1.5))
//!     .unwrap();
//! system
//!     .add_particles((0..27).map(|i| {
//!         let x = Vec3::new((i % 3) as f64, ((i / 3) % 3) as f64, (i / 9) as f64) * 2.0;
//!         Particle::new(i, 0, 1.0, x + Vec3::repeat(1.0), Vec3::zeros())
//!     }))
//!     .unwrap();
//!
//! let mut vv = VelocityVerlet::new(0.005).unwrap();
//! vv.add_extension(Extension::LangevinThermostat(LangevinThermostat::new(1.0, 1.0)))
//!     .unwrap();
//! vv.run(&mut system, 200).unwrap();
//! assert!(system.temperature().unwrap() > 0.0);
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod extension;
pub mod integrator;
pub mod system;

pub use analysis::{Callback, ExtAnalyze, Observation, Probe, Snapshot};
pub use config::{ExtensionConfig, LbConfig, PolymerConfig, SimulationConfig};
pub use error::{Result, SimError};
pub use extension::{CapForce, Extension, LangevinThermostat, LbCoupling, StepPhase};
pub use integrator::VelocityVerlet;
pub use system::System;

pub use lbmd_comm::{self, Communicator, SerialComm, ThreadComm};
pub use lbmd_lbm::{self};
pub use lbmd_math::{self, Vec3};
pub use lbmd_md::{self};
