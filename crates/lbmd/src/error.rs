//! Top-level error type.

use lbmd_comm::CommError;
use lbmd_lbm::LbError;
use lbmd_md::MdError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Md(#[from] MdError),

    #[error(transparent)]
    Lb(#[from] LbError),

    #[error(transparent)]
    Comm(#[from] CommError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("step {step}: {source}")]
    AtStep { step: u64, source: Box<SimError> },
}

impl SimError {
    /// Attach the integration step at which the failure happened.
    pub fn at_step(self, step: u64) -> Self {
        match self {
            SimError::AtStep { .. } => self,
            e => SimError::AtStep {
                step,
                source: Box::new(e),
            },
        }
    }

    /// The underlying error with any step annotation removed.
    pub fn root(&self) -> &SimError {
        match self {
            SimError::AtStep { source, .. } => source.root(),
            e => e,
        }
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
