//! In-process multi-rank communicator built on channels.

use crate::{
    CommError, Communicator, ReduceOp, Result, TAG_BROADCAST, TAG_REDUCE, Tag, check_rank,
};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Barrier};

#[derive(Debug)]
struct Envelope {
    tag: Tag,
    data: Vec<f64>,
}

/// One rank of an in-process communicator.
///
/// Each ordered pair of ranks has its own channel, so per-pair delivery order is
/// preserved and receives can name their source. Move each rank onto its own
/// thread.
pub struct ThreadComm {
    rank: usize,
    size: usize,
    /// `outbox[dest]` delivers to rank `dest`.
    outbox: Vec<Sender<Envelope>>,
    /// `inbox[src]` holds messages from rank `src`.
    inbox: Vec<Receiver<Envelope>>,
    barrier: Arc<Barrier>,
}

impl ThreadComm {
    /// Create a fully connected set of `size` ranks.
    pub fn create(size: usize) -> Result<Vec<ThreadComm>> {
        if size == 0 {
            return Err(CommError::NoRanks);
        }

        // senders[src][dest], receivers[dest][src]
        let mut senders: Vec<Vec<Sender<Envelope>>> = (0..size).map(|_| Vec::new()).collect();
        let mut receivers: Vec<Vec<Option<Receiver<Envelope>>>> =
            (0..size).map(|_| (0..size).map(|_| None).collect()).collect();

        for (src, outbox) in senders.iter_mut().enumerate() {
            for row in receivers.iter_mut() {
                let (tx, rx) = channel();
                outbox.push(tx);
                row[src] = Some(rx);
            }
        }

        let barrier = Arc::new(Barrier::new(size));
        Ok(senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (outbox, inbox))| ThreadComm {
                rank,
                size,
                outbox,
                inbox: inbox.into_iter().flatten().collect(),
                barrier: Arc::clone(&barrier),
            })
            .collect())
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, dest: usize, tag: Tag, data: Vec<f64>) -> Result<()> {
        check_rank(dest, self.size)?;
        self.outbox[dest]
            .send(Envelope { tag, data })
            .map_err(|_| CommError::Disconnected { peer: dest })
    }

    fn recv(&self, src: usize, tag: Tag) -> Result<Vec<f64>> {
        check_rank(src, self.size)?;
        let env = self.inbox[src]
            .recv()
            .map_err(|_| CommError::Disconnected { peer: src })?;
        if env.tag != tag {
            return Err(CommError::TagMismatch {
                src,
                expected: tag,
                got: env.tag,
            });
        }
        Ok(env.data)
    }

    fn all_reduce_vec(&self, values: &[f64], op: ReduceOp) -> Result<Vec<f64>> {
        if self.rank == 0 {
            let mut acc = values.to_vec();
            for src in 1..self.size {
                let part = self.recv(src, TAG_REDUCE)?;
                op.fold_into(&mut acc, &part)?;
            }
            for dest in 1..self.size {
                self.send(dest, TAG_BROADCAST, acc.clone())?;
            }
            Ok(acc)
        } else {
            self.send(0, TAG_REDUCE, values.to_vec())?;
            self.recv(0, TAG_BROADCAST)
        }
    }

    fn barrier(&self) -> Result<()> {
        self.barrier.wait();
        Ok(())
    }
}
