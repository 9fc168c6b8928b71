//! Single-rank communicator.

use crate::{CommError, Communicator, ReduceOp, Result, Tag, check_rank};
use std::cell::RefCell;
use std::collections::VecDeque;

/// Communicator for a run with exactly one rank.
///
/// Messages sent to self are queued and handed back by [`Communicator::recv`].
#[derive(Debug, Default)]
pub struct SerialComm {
    queue: RefCell<VecDeque<(Tag, Vec<f64>)>>,
}

impl SerialComm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, dest: usize, tag: Tag, data: Vec<f64>) -> Result<()> {
        check_rank(dest, 1)?;
        self.queue.borrow_mut().push_back((tag, data));
        Ok(())
    }

    fn recv(&self, src: usize, tag: Tag) -> Result<Vec<f64>> {
        check_rank(src, 1)?;
        match self.queue.borrow_mut().pop_front() {
            Some((got, data)) if got == tag => Ok(data),
            Some((got, _)) => Err(CommError::TagMismatch {
                src,
                expected: tag,
                got,
            }),
            None => Err(CommError::Disconnected { peer: src }),
        }
    }

    fn all_reduce_vec(&self, values: &[f64], _op: ReduceOp) -> Result<Vec<f64>> {
        Ok(values.to_vec())
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}
