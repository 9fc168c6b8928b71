//! Domain-decomposed molecular dynamics core.
//!
//! Implements the particle side of a parallel MD engine:
//! - Cell-based spatial decomposition with a ghost frame and particle migration
//! - Verlet neighbour lists with a skin and global staleness checks
//! - Pair, bond, angle and dihedral potentials, closed-form and tabulated
//! - Fixed topology lists resolved by global particle id
//! - An interaction registry producing forces, energy and virial
//!
//! Every rank runs the same code; ranks talk only through
//! [`lbmd_comm::Communicator`].
//!
//! # Example
//!
//! ```
//! use lbmd_comm::SerialComm;
//! use lbmd_math::{OrthorhombicBox, Vec3};
//! use lbmd_md::{CellGrid, DomainDecomposition, InteractionSet, PairPotential, Particle, VerletList};
//!
//! let comm = SerialComm::new();
//! let grid = CellGrid::auto(OrthorhombicBox::cubic(10.0), 1, 2.5, 0.3).unwrap();
//! let mut storage = DomainDecomposition::new(grid, 0).unwrap();
//! storage
//!     .add_particles((0..2).map(|i| {
//!         Particle::new(i, 0, 1.0, Vec3::new(1.0 + 1.1 * i as f64, 1.0, 1.0), Vec3::zeros())
//!     }))
//!     .unwrap();
//! storage.decompose(&comm).unwrap();
//!
//! let mut vlist = VerletList::new(2.5, 0.3);
//! vlist.build(&storage);
//!
//! let mut interactions = InteractionSet::new(1);
//! interactions
//!     .set_pair_potential(0, 0, PairPotential::lennard_jones(1.0, 1.0, 2.5))
//!     .unwrap();
//! let summary = interactions.compute_forces(&mut storage, &vlist).unwrap();
//! assert!(summary.energy < 0.0);
//! ```

pub mod angular;
pub mod decomp;
pub mod error;
pub mod interaction;
pub mod neighbor;
pub mod particle;
pub mod potential;
pub mod storage;
pub mod tabulated;
pub mod topology;

pub use angular::{AngularPotential, DihedralPotential, dihedral_angle, wrap_angle};
pub use decomp::{CellGrid, Side};
pub use error::{MdError, Result};
pub use interaction::{Binding, ForceSummary, Interaction, InteractionSet, TypeTable};
pub use neighbor::{VerletList, brute_force_pairs};
pub use particle::{Particle, ParticleId};
pub use potential::{BondPotential, PairPotential};
pub use storage::{DomainDecomposition, ForceBuffer, ParticleRef};
pub use tabulated::{Interpolation, TabulatedFunction};
pub use topology::{
    FixedPairList, FixedQuadrupleAngleList, FixedQuadrupleList, FixedTripleList, FixedTupleList,
    PolymerTopology, polymer_random_walk,
};
