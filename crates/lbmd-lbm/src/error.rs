//! Error types for lbmd-lbm.

use lbmd_comm::CommError;
use lbmd_md::ParticleId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LbError {
    #[error("non-finite populations at lattice site {site:?} after LB step {step}")]
    NonFinite { site: [usize; 3], step: u64 },

    #[error("particle {id} at {position:?} is outside the local lattice frame")]
    ParticleOutsideLattice { id: ParticleId, position: [f64; 3] },

    #[error("site {site:?} is outside the {lattice:?} lattice")]
    SiteOutsideLattice { site: [usize; 3], lattice: [usize; 3] },

    #[error("invalid lattice: {0}")]
    InvalidLattice(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("communication failure: {0}")]
    Comm(#[from] CommError),
}

pub type Result<T> = std::result::Result<T, LbError>;
