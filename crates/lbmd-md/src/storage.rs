//! Domain-decomposition particle storage.
//!
//! Each rank keeps its inner cells plus a one-cell ghost frame. Real particles
//! live in inner cells; the frame holds read-only images of particles owned by
//! neighbouring cells/ranks, refreshed every step by [`DomainDecomposition::update_ghosts`]
//! and rebuilt from scratch by [`DomainDecomposition::decompose`].
//!
//! Ghosts are exchanged dimension by dimension (x, then y, then z), each time
//! shipping a full plane of the frame so that edge and corner ghosts arrive
//! through two or three hops. The exchange is logged so that positions can be
//! refreshed and ghost forces returned along exactly the same routes.

use crate::decomp::{CellGrid, Side};
use crate::error::coords;
use crate::{MdError, Particle, ParticleId, Result};
use lbmd_comm::{Communicator, Tag};
use lbmd_math::{Int3, OrthorhombicBox, Vec3, is_finite};
use log::debug;
use std::collections::HashMap;

const TAG_MIGRATE: Tag = 100;
const TAG_GHOSTS: Tag = 200;
const TAG_GHOST_POSITIONS: Tag = 300;
const TAG_GHOST_FORCES: Tag = 400;

fn tag(base: Tag, dim: usize, side: Side) -> Tag {
    base + 2 * dim as Tag
        + match side {
            Side::Left => 0,
            Side::Right => 1,
        }
}

fn opposite(side: Side) -> Side {
    match side {
        Side::Left => Side::Right,
        Side::Right => Side::Left,
    }
}

/// Location of a particle copy in the local cell array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleRef {
    pub cell: usize,
    pub slot: usize,
}

/// One logged plane transfer of the ghost exchange.
#[derive(Clone, Debug)]
struct GhostTransfer {
    dim: usize,
    side: Side,
    dest: usize,
    src: usize,
    /// Added to coordinate `dim` of outgoing positions (periodic image).
    shift: f64,
    /// `(cell, count)`: the first `count` particles of `cell` were sent.
    sent: Vec<(usize, usize)>,
    /// `(cell, start, count)`: ghosts appended to `cell` at `start..start+count`.
    received: Vec<(usize, usize, usize)>,
}

/// Per-cell force scratch space shaped like the local cell array.
#[derive(Clone, Debug)]
pub struct ForceBuffer {
    forces: Vec<Vec<Vec3>>,
}

impl ForceBuffer {
    /// Add `f` to the particle at `r`.
    #[inline]
    pub fn add(&mut self, r: ParticleRef, f: Vec3) {
        self.forces[r.cell][r.slot] += f;
    }

    /// Accumulated force at `r`.
    pub fn get(&self, r: ParticleRef) -> Vec3 {
        self.forces[r.cell][r.slot]
    }
}

/// Particle storage of one rank.
pub struct DomainDecomposition {
    grid: CellGrid,
    rank: usize,
    node: Int3,
    cells: Vec<Vec<Particle>>,
    inner: Vec<usize>,
    transfers: Vec<GhostTransfer>,
    index: HashMap<ParticleId, ParticleRef>,
}

impl DomainDecomposition {
    /// Create empty storage for `rank` of the layout.
    pub fn new(grid: CellGrid, rank: usize) -> Result<Self> {
        if rank >= grid.n_ranks() {
            return Err(MdError::InvalidDecomposition(format!(
                "rank {rank} outside node grid {:?}",
                grid.node_grid
            )));
        }
        let node = grid.node_position(rank);
        let cells = vec![Vec::new(); grid.n_local_cells()];
        let inner = grid.inner_cells();
        Ok(Self {
            grid,
            rank,
            node,
            cells,
            inner,
            transfers: Vec::new(),
            index: HashMap::new(),
        })
    }

    pub fn grid(&self) -> &CellGrid {
        &self.grid
    }

    pub fn bc(&self) -> &OrthorhombicBox {
        &self.grid.bc
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Flat indices of the inner cells.
    pub fn inner_cells(&self) -> &[usize] {
        &self.inner
    }

    /// Particles stored in a cell (real for inner cells, ghosts for frame cells).
    pub fn cell(&self, idx: usize) -> &[Particle] {
        &self.cells[idx]
    }

    pub fn particle(&self, r: ParticleRef) -> &Particle {
        &self.cells[r.cell][r.slot]
    }

    pub fn particle_mut(&mut self, r: ParticleRef) -> &mut Particle {
        &mut self.cells[r.cell][r.slot]
    }

    /// True if `r` points at a ghost copy.
    pub fn is_ghost(&self, r: ParticleRef) -> bool {
        !self.grid.is_inner(r.cell)
    }

    /// Number of real particles on this rank.
    pub fn n_real(&self) -> usize {
        self.inner.iter().map(|&c| self.cells[c].len()).sum()
    }

    /// Number of ghost copies on this rank.
    pub fn n_ghosts(&self) -> usize {
        self.cells.iter().map(Vec::len).sum::<usize>() - self.n_real()
    }

    /// Iterate over real particles in cell order.
    pub fn real_particles(&self) -> impl Iterator<Item = &Particle> {
        self.inner.iter().flat_map(move |&c| self.cells[c].iter())
    }

    /// Iterate mutably over real particles in cell order.
    pub fn real_particles_mut(&mut self) -> impl Iterator<Item = &mut Particle> {
        let grid = &self.grid;
        self.cells
            .iter_mut()
            .enumerate()
            .filter(move |(i, _)| grid.is_inner(*i))
            .flat_map(|(_, cell)| cell.iter_mut())
    }

    /// References to all real particles, in cell order.
    pub fn real_refs(&self) -> Vec<ParticleRef> {
        self.inner
            .iter()
            .flat_map(|&cell| (0..self.cells[cell].len()).map(move |slot| ParticleRef { cell, slot }))
            .collect()
    }

    /// Locate a particle by id: the real copy if this rank owns it, otherwise a ghost.
    pub fn locate(&self, id: ParticleId) -> Option<ParticleRef> {
        self.index.get(&id).copied()
    }

    /// True if a folded position falls in this rank's subdomain.
    pub fn owns(&self, x: &Vec3) -> bool {
        self.grid.node_of_cell(self.grid.global_cell_of(x)) == self.node
    }

    /// Insert particles, keeping those whose (folded) position this rank owns.
    ///
    /// Every rank may be handed the full list; each keeps its share. Ghosts are
    /// stale until the next [`decompose`](Self::decompose).
    pub fn add_particles<I>(&mut self, particles: I) -> Result<usize>
    where
        I: IntoIterator<Item = Particle>,
    {
        let mut added = 0;
        for mut p in particles {
            if !is_finite(&p.x) {
                return Err(MdError::ParticleOutsideDomain {
                    id: p.id,
                    position: coords(&p.x),
                });
            }
            p.x = self.grid.bc.fold(p.x);
            let gc = self.grid.global_cell_of(&p.x);
            if let Some(idx) = self.grid.local_index_of_global(self.rank, gc) {
                self.cells[idx].push(p);
                added += 1;
            }
        }
        debug!("rank {}: added {added} particles", self.rank);
        self.rebuild_index();
        Ok(added)
    }

    /// Remove real particles by id. Returns how many were removed here.
    pub fn remove_particles(&mut self, ids: &[ParticleId]) -> usize {
        let mut removed = 0;
        for &c in &self.inner {
            let before = self.cells[c].len();
            self.cells[c].retain(|p| !ids.contains(&p.id));
            removed += before - self.cells[c].len();
        }
        self.rebuild_index();
        removed
    }

    /// Zero the force accumulators of real and ghost particles.
    pub fn reset_forces(&mut self) {
        for cell in &mut self.cells {
            for p in cell {
                p.reset_force();
            }
        }
    }

    /// Zeroed force scratch space matching the current cell contents.
    pub fn force_buffer(&self) -> ForceBuffer {
        ForceBuffer {
            forces: self
                .cells
                .iter()
                .map(|c| vec![Vec3::zeros(); c.len()])
                .collect(),
        }
    }

    /// Add a force buffer onto the particle accumulators.
    pub fn apply_forces(&mut self, buf: &ForceBuffer) {
        for (cell, forces) in self.cells.iter_mut().zip(&buf.forces) {
            for (p, f) in cell.iter_mut().zip(forces) {
                p.f += f;
            }
        }
    }

    /// Reassign every real particle to the cell matching its position, migrating
    /// leavers to neighbouring ranks, then rebuild the ghost frame.
    ///
    /// A particle that moved more than one cell since the previous call is a
    /// fatal consistency failure.
    pub fn decompose(&mut self, comm: &dyn Communicator) -> Result<()> {
        for (i, cell) in self.cells.iter_mut().enumerate() {
            if !self.grid.is_inner(i) {
                cell.clear();
            }
        }

        let mut pending = Vec::with_capacity(self.n_real());
        for &c in &self.inner {
            let old = self.grid.global_of_local(self.rank, c);
            for mut p in self.cells[c].drain(..) {
                if !is_finite(&p.x) {
                    return Err(MdError::ParticleOutsideDomain {
                        id: p.id,
                        position: coords(&p.x),
                    });
                }
                p.x = self.grid.bc.fold(p.x);
                let moved = self.grid.cell_distance(old, self.grid.global_cell_of(&p.x));
                if moved > 1 {
                    return Err(MdError::DisplacementTooLarge {
                        id: p.id,
                        position: coords(&p.x),
                        cells: moved,
                    });
                }
                pending.push(p);
            }
        }

        let mut migrated = 0;
        for d in 0..3 {
            let n = self.grid.node_grid[d];
            if n == 1 {
                continue;
            }
            let own = self.node[d];
            let left_node = (own + n - 1) % n;
            let right_node = (own + 1) % n;

            let mut keep = Vec::with_capacity(pending.len());
            let mut to_left = Vec::new();
            let mut to_right = Vec::new();
            for p in pending.drain(..) {
                let target = self.grid.node_of_cell(self.grid.global_cell_of(&p.x))[d];
                if target == own {
                    keep.push(p);
                } else if target == right_node {
                    p.pack(&mut to_right);
                } else if target == left_node {
                    p.pack(&mut to_left);
                } else {
                    return Err(MdError::ParticleOutsideDomain {
                        id: p.id,
                        position: coords(&p.x),
                    });
                }
            }
            migrated += (to_left.len() + to_right.len()) / Particle::RECORD_LEN;

            let left = self.grid.neighbor_rank(self.rank, d, Side::Left);
            let right = self.grid.neighbor_rank(self.rank, d, Side::Right);
            let from_right = comm.send_recv(left, right, tag(TAG_MIGRATE, d, Side::Left), to_left)?;
            let from_left =
                comm.send_recv(right, left, tag(TAG_MIGRATE, d, Side::Right), to_right)?;
            keep.extend(Particle::unpack_all(&from_right));
            keep.extend(Particle::unpack_all(&from_left));
            pending = keep;
        }

        for p in pending {
            let gc = self.grid.global_cell_of(&p.x);
            match self.grid.local_index_of_global(self.rank, gc) {
                Some(idx) => self.cells[idx].push(p),
                None => {
                    return Err(MdError::ParticleOutsideDomain {
                        id: p.id,
                        position: coords(&p.x),
                    });
                }
            }
        }

        debug!(
            "rank {}: decomposed {} particles, {migrated} migrated",
            self.rank,
            self.n_real()
        );
        self.exchange_ghosts(comm)
    }

    /// Rebuild the ghost frame from the current real particles.
    pub fn exchange_ghosts(&mut self, comm: &dyn Communicator) -> Result<()> {
        for (i, cell) in self.cells.iter_mut().enumerate() {
            if !self.grid.is_inner(i) {
                cell.clear();
            }
        }
        self.transfers.clear();

        for d in 0..3 {
            for side in [Side::Left, Side::Right] {
                let cg = self.grid.cell_grid[d];
                let last = self.grid.node_grid[d] - 1;
                let (send_layer, recv_layer, shift) = match side {
                    Side::Left => (
                        1,
                        cg + 1,
                        if self.node[d] == 0 { self.grid.bc.size[d] } else { 0.0 },
                    ),
                    Side::Right => (
                        cg,
                        0,
                        if self.node[d] == last { -self.grid.bc.size[d] } else { 0.0 },
                    ),
                };
                let dest = self.grid.neighbor_rank(self.rank, d, side);
                let src = self.grid.neighbor_rank(self.rank, d, opposite(side));

                let mut buf = Vec::new();
                let mut sent = Vec::new();
                for c in self.grid.plane(d, send_layer) {
                    let cell = &self.cells[c];
                    buf.push(cell.len() as f64);
                    for p in cell {
                        p.pack_shifted(&mut buf, d, shift);
                    }
                    sent.push((c, cell.len()));
                }

                let data = comm.send_recv(dest, src, tag(TAG_GHOSTS, d, side), buf)?;

                let mut received = Vec::new();
                let mut k = 0;
                for c in self.grid.plane(d, recv_layer) {
                    let count = *data.get(k).ok_or_else(|| malformed("ghost plane"))? as usize;
                    k += 1;
                    let end = k + count * Particle::RECORD_LEN;
                    if end > data.len() {
                        return Err(malformed("ghost plane"));
                    }
                    let start = self.cells[c].len();
                    self.cells[c].extend(Particle::unpack_all(&data[k..end]));
                    k = end;
                    received.push((c, start, count));
                }

                self.transfers.push(GhostTransfer {
                    dim: d,
                    side,
                    dest,
                    src,
                    shift,
                    sent,
                    received,
                });
            }
        }

        self.rebuild_index();
        Ok(())
    }

    /// Refresh ghost positions along the logged routes without re-binning.
    pub fn update_ghosts(&mut self, comm: &dyn Communicator) -> Result<()> {
        for t in &self.transfers {
            let mut buf = Vec::new();
            for &(c, count) in &t.sent {
                for p in &self.cells[c][..count] {
                    let mut x = p.x;
                    x[t.dim] += t.shift;
                    buf.extend_from_slice(&[x.x, x.y, x.z]);
                }
            }

            let data = comm.send_recv(
                t.dest,
                t.src,
                tag(TAG_GHOST_POSITIONS, t.dim, t.side),
                buf,
            )?;
            let expected: usize = t.received.iter().map(|r| 3 * r.2).sum();
            if data.len() != expected {
                return Err(malformed("ghost position update"));
            }

            let mut k = 0;
            for &(c, start, count) in &t.received {
                for p in &mut self.cells[c][start..start + count] {
                    p.x = Vec3::new(data[k], data[k + 1], data[k + 2]);
                    k += 3;
                }
            }
        }
        Ok(())
    }

    /// Send forces accumulated on ghosts back to their owners and add them there.
    pub fn collect_ghost_forces(&mut self, comm: &dyn Communicator) -> Result<()> {
        for t in self.transfers.iter().rev() {
            let mut buf = Vec::new();
            for &(c, start, count) in &t.received {
                for p in &self.cells[c][start..start + count] {
                    buf.extend_from_slice(&[p.f.x, p.f.y, p.f.z]);
                }
            }

            let data = comm.send_recv(t.src, t.dest, tag(TAG_GHOST_FORCES, t.dim, t.side), buf)?;
            let expected: usize = t.sent.iter().map(|s| 3 * s.1).sum();
            if data.len() != expected {
                return Err(malformed("ghost force collection"));
            }

            let mut k = 0;
            for &(c, count) in &t.sent {
                for p in &mut self.cells[c][..count] {
                    p.f += Vec3::new(data[k], data[k + 1], data[k + 2]);
                    k += 3;
                }
            }
        }
        Ok(())
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for &cell in &self.inner {
            for (slot, p) in self.cells[cell].iter().enumerate() {
                self.index.insert(p.id, ParticleRef { cell, slot });
            }
        }
        for (cell, particles) in self.cells.iter().enumerate() {
            if self.grid.is_inner(cell) {
                continue;
            }
            for (slot, p) in particles.iter().enumerate() {
                self.index.entry(p.id).or_insert(ParticleRef { cell, slot });
            }
        }
    }
}

fn malformed(what: &str) -> MdError {
    MdError::InvalidDecomposition(format!("malformed message during {what}"))
}
