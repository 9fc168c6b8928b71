//! Error types for lbmd-md.

use crate::ParticleId;
use lbmd_comm::CommError;
use lbmd_math::Vec3;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MdError {
    #[error("particle {id} at {position:?} lies outside the decomposed domain")]
    ParticleOutsideDomain { id: ParticleId, position: [f64; 3] },

    #[error(
        "particle {id} moved {cells} cells since the last decomposition (now at {position:?})"
    )]
    DisplacementTooLarge {
        id: ParticleId,
        position: [f64; 3],
        cells: usize,
    },

    #[error("non-finite {quantity} on particle {id} in {component}")]
    NonFinite {
        component: &'static str,
        quantity: &'static str,
        id: ParticleId,
    },

    #[error("particle {id} needed by {component} is neither local nor a ghost on rank {rank}")]
    MissingParticle {
        component: &'static str,
        id: ParticleId,
        rank: usize,
    },

    #[error("invalid tabulated data: {0}")]
    InvalidTable(String),

    #[error("type index {index} out of range (n_types = {n_types})")]
    InvalidTypeIndex { index: u32, n_types: u32 },

    #[error("invalid decomposition: {0}")]
    InvalidDecomposition(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("communication failure: {0}")]
    Comm(#[from] CommError),
}

pub type Result<T> = std::result::Result<T, MdError>;

pub(crate) fn coords(v: &Vec3) -> [f64; 3] {
    [v.x, v.y, v.z]
}
