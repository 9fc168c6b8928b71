//! Communication substrate used by the decomposed particle and lattice solvers.
//!
//! Every rank runs the same core logic and talks to its neighbours only through
//! [`Communicator`]. Payloads are packed `f64` buffers, the same way particle
//! records and lattice planes are shipped between processes in a message-passing
//! runtime.
//!
//! Two implementations are provided:
//! - [`SerialComm`]: a single rank; sends to self are queued locally.
//! - [`ThreadComm`]: `n` ranks on OS threads connected by channels, used to
//!   exercise the multi-rank code paths in-process.

pub mod serial;
pub mod threaded;

pub use serial::SerialComm;
pub use threaded::ThreadComm;

use thiserror::Error;

/// Message tag. Receives must name the tag they expect.
pub type Tag = u32;

/// Reserved tags for collectives; user tags must stay below these.
pub const TAG_REDUCE: Tag = u32::MAX - 1;
pub const TAG_BROADCAST: Tag = u32::MAX;

#[derive(Debug, Error, PartialEq)]
pub enum CommError {
    #[error("rank {rank} out of range for communicator of size {size}")]
    InvalidRank { rank: usize, size: usize },

    #[error("peer {peer} disconnected")]
    Disconnected { peer: usize },

    #[error("expected tag {expected} from rank {src}, got {got}")]
    TagMismatch { src: usize, expected: Tag, got: Tag },

    #[error("communicator needs at least one rank")]
    NoRanks,

    #[error("reduction length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, CommError>;

/// Reduction operator for collectives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    /// Combine two values.
    #[inline]
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Max => a.max(b),
            ReduceOp::Min => a.min(b),
        }
    }

    /// Combine `src` into `acc` element-wise.
    pub fn fold_into(self, acc: &mut [f64], src: &[f64]) -> Result<()> {
        if acc.len() != src.len() {
            return Err(CommError::LengthMismatch {
                expected: acc.len(),
                got: src.len(),
            });
        }
        for (a, &b) in acc.iter_mut().zip(src) {
            *a = self.apply(*a, b);
        }
        Ok(())
    }
}

/// Point-to-point and collective communication between ranks of the
/// decomposition grid.
///
/// Sends never block. A receive blocks until the matching message from `src`
/// arrives; messages between one pair of ranks are delivered in order.
pub trait Communicator: Send {
    /// This rank.
    fn rank(&self) -> usize;

    /// Number of ranks.
    fn size(&self) -> usize;

    /// Send a buffer to `dest`.
    fn send(&self, dest: usize, tag: Tag, data: Vec<f64>) -> Result<()>;

    /// Receive the next buffer from `src`, which must carry `tag`.
    fn recv(&self, src: usize, tag: Tag) -> Result<Vec<f64>>;

    /// Element-wise reduction of `values` over all ranks; every rank gets the result.
    fn all_reduce_vec(&self, values: &[f64], op: ReduceOp) -> Result<Vec<f64>>;

    /// Block until every rank has reached the barrier.
    fn barrier(&self) -> Result<()>;

    /// Scalar reduction over all ranks.
    fn all_reduce(&self, value: f64, op: ReduceOp) -> Result<f64> {
        let out = self.all_reduce_vec(&[value], op)?;
        Ok(out[0])
    }

    /// Send `data` to `dest` and receive from `src` in one shift operation.
    fn send_recv(&self, dest: usize, src: usize, tag: Tag, data: Vec<f64>) -> Result<Vec<f64>> {
        if dest == self.rank() && src == self.rank() {
            return Ok(data);
        }
        self.send(dest, tag, data)?;
        self.recv(src, tag)
    }

    /// True if any rank passes `true`.
    fn any(&self, flag: bool) -> Result<bool> {
        let v = self.all_reduce(if flag { 1.0 } else { 0.0 }, ReduceOp::Max)?;
        Ok(v > 0.5)
    }
}

pub(crate) fn check_rank(rank: usize, size: usize) -> Result<()> {
    if rank >= size {
        Err(CommError::InvalidRank { rank, size })
    } else {
        Ok(())
    }
}
