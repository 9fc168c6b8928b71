//! Verlet neighbour list built from the cell grid.

use crate::storage::{DomainDecomposition, ParticleRef};
use crate::{Particle, ParticleId, Result};
use lbmd_comm::Communicator;
use lbmd_math::{OrthorhombicBox, Vec3};
use log::debug;

/// Pair list with a skin, rebuilt when any particle may have crossed half of it.
///
/// Pairs are found with a half-shell cell search (the cell itself plus its 13
/// forward neighbours) starting from inner cells only, so every unordered pair
/// with at least one real partner appears exactly once across all ranks.
#[derive(Clone, Debug)]
pub struct VerletList {
    /// Interaction cutoff.
    pub cutoff: f64,
    /// Skin distance (buffer for rebuilding).
    pub skin: f64,
    pairs: Vec<(ParticleRef, ParticleRef)>,
    /// Real particle positions at the last build, in storage order.
    last_positions: Vec<Vec3>,
    builds: usize,
}

impl VerletList {
    /// Create an empty list.
    pub fn new(cutoff: f64, skin: f64) -> Self {
        Self {
            cutoff,
            skin,
            pairs: Vec::new(),
            last_positions: Vec::new(),
            builds: 0,
        }
    }

    /// Rebuild the list from the current cells and ghosts.
    pub fn build(&mut self, storage: &DomainDecomposition) {
        self.pairs.clear();
        self.last_positions.clear();

        let r_search = self.cutoff + self.skin;
        let r_search_sq = r_search * r_search;
        let shell = storage.grid().half_shell();

        for &c in storage.inner_cells() {
            let own = storage.cell(c);
            for &offset in &shell {
                let nc = (c as isize + offset) as usize;
                let other = storage.cell(nc);
                for (i, pi) in own.iter().enumerate() {
                    let start = if offset == 0 { i + 1 } else { 0 };
                    for (j, pj) in other.iter().enumerate().skip(start) {
                        if (pj.x - pi.x).norm_squared() < r_search_sq {
                            self.pairs.push((
                                ParticleRef { cell: c, slot: i },
                                ParticleRef { cell: nc, slot: j },
                            ));
                        }
                    }
                }
            }
        }

        self.last_positions
            .extend(storage.real_particles().map(|p| p.x));
        self.builds += 1;
        debug!(
            "rank {}: verlet list rebuilt with {} pairs (build #{})",
            storage.rank(),
            self.pairs.len(),
            self.builds
        );
    }

    /// True if no local particle moved more than half the skin since the last build.
    pub fn is_locally_valid(&self, storage: &DomainDecomposition) -> bool {
        if self.last_positions.len() != storage.n_real() {
            return false;
        }
        let max_disp_sq = (0.5 * self.skin).powi(2);
        storage
            .real_particles()
            .zip(&self.last_positions)
            .all(|(p, last)| (p.x - last).norm_squared() <= max_disp_sq)
    }

    /// Global validity: every rank agrees the list is still usable.
    pub fn is_valid(&self, storage: &DomainDecomposition, comm: &dyn Communicator) -> Result<bool> {
        let stale = comm.any(!self.is_locally_valid(storage))?;
        Ok(!stale)
    }

    /// Pairs as storage references; valid until the next decomposition.
    pub fn pairs(&self) -> &[(ParticleRef, ParticleRef)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Number of builds so far.
    pub fn builds(&self) -> usize {
        self.builds
    }

    /// Pairs as sorted `(min id, max id)` tuples.
    pub fn id_pairs(&self, storage: &DomainDecomposition) -> Vec<(ParticleId, ParticleId)> {
        let mut out: Vec<_> = self
            .pairs
            .iter()
            .map(|&(a, b)| {
                let (ia, ib) = (storage.particle(a).id, storage.particle(b).id);
                (ia.min(ib), ia.max(ib))
            })
            .collect();
        out.sort_unstable();
        out
    }
}

/// All-pairs search with the minimum image convention.
///
/// Returns sorted `(min id, max id)` tuples of every pair closer than `radius`.
pub fn brute_force_pairs(
    particles: &[Particle],
    bc: &OrthorhombicBox,
    radius: f64,
) -> Vec<(ParticleId, ParticleId)> {
    let radius_sq = radius * radius;
    let mut out = Vec::new();
    for i in 0..particles.len() {
        for j in (i + 1)..particles.len() {
            let dr = bc.separation(&particles[i].x, &particles[j].x);
            if dr.norm_squared() < radius_sq {
                let (a, b) = (particles[i].id, particles[j].id);
                out.push((a.min(b), a.max(b)));
            }
        }
    }
    out.sort_unstable();
    out
}
