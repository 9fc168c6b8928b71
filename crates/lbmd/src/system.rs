//! Per-rank simulation context passed explicitly to the integrator.

use crate::error::{Result, SimError};
use lbmd_comm::{Communicator, ReduceOp};
use lbmd_lbm::{InitPopulation, LatticeBoltzmann, LbParams};
use lbmd_math::{OrthorhombicBox, Vec3};
use lbmd_md::{
    CellGrid, DomainDecomposition, ForceSummary, InteractionSet, PairPotential, Particle, VerletList,
};
use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};

/// Everything one rank needs to advance the simulation.
pub struct System {
    /// Particles of this rank plus ghosts.
    pub storage: DomainDecomposition,
    /// Registered interactions; identical on every rank.
    pub interactions: InteractionSet,
    /// Neighbour list over `storage`.
    pub vlist: VerletList,
    /// Thermal noise source, seeded with `seed + rank`.
    pub rng: StdRng,
    /// Optional coupled fluid.
    pub lb: Option<LatticeBoltzmann>,
    pub(crate) comm: Box<dyn Communicator>,
    seed: u64,
}

impl System {
    pub fn new(grid: CellGrid, n_types: u32, comm: Box<dyn Communicator>, seed: u64) -> Result<Self> {
        if grid.n_ranks() != comm.size() {
            return Err(SimError::Config(format!(
                "node grid {:?} needs {} ranks, communicator has {}",
                grid.node_grid,
                grid.n_ranks(),
                comm.size()
            )));
        }
        let vlist = VerletList::new(grid.cutoff, grid.skin);
        let rank = comm.rank();
        info!(
            "rank {rank}/{}: box {:?}, node grid {:?}, cell grid {:?}",
            comm.size(),
            grid.bc.size.as_slice(),
            grid.node_grid,
            grid.cell_grid
        );
        Ok(Self {
            storage: DomainDecomposition::new(grid, rank)?,
            interactions: InteractionSet::new(n_types),
            vlist,
            rng: StdRng::seed_from_u64(seed.wrapping_add(rank as u64)),
            lb: None,
            comm,
            seed,
        })
    }

    pub fn comm(&self) -> &dyn Communicator {
        &*self.comm
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn bc(&self) -> &OrthorhombicBox {
        self.storage.bc()
    }

    /// Add particles; every rank may pass the full set and keeps what it owns.
    pub fn add_particles<I>(&mut self, particles: I) -> Result<usize>
    where
        I: IntoIterator<Item = Particle>,
    {
        Ok(self.storage.add_particles(particles)?)
    }

    /// Bind a non-bonded potential, rejecting one that reaches past the grid cutoff.
    pub fn set_pair_potential(&mut self, t1: u32, t2: u32, potential: PairPotential) -> Result<()> {
        let cutoff = self.storage.grid().cutoff;
        if potential.cutoff() > cutoff {
            return Err(SimError::Config(format!(
                "pair potential for types [{t1}, {t2}] reaches {} beyond the cutoff {cutoff}",
                potential.cutoff()
            )));
        }
        Ok(self.interactions.set_pair_potential(t1, t2, potential)?)
    }

    /// Pairs beyond the grid cutoff are never listed, so a longer pair
    /// potential would be silently truncated.
    fn check_cutoff(&self) -> Result<()> {
        let cutoff = self.storage.grid().cutoff;
        let reach = self.interactions.max_cutoff();
        if reach > cutoff {
            return Err(SimError::Config(format!(
                "pair potentials reach {reach} beyond the cutoff {cutoff}"
            )));
        }
        Ok(())
    }

    /// Re-bin and migrate particles, rebuild ghosts and the neighbour list.
    pub fn decompose(&mut self) -> Result<()> {
        self.check_cutoff()?;
        self.storage.decompose(&*self.comm)?;
        self.vlist.build(&self.storage);
        debug!(
            "rank {}: decomposed, {} real / {} ghost particles, {} pairs",
            self.rank(),
            self.storage.n_real(),
            self.storage.n_ghosts(),
            self.vlist.len()
        );
        Ok(())
    }

    /// Make the neighbour list usable for the current positions.
    ///
    /// Rebuilds when any rank reports a displacement beyond half the skin,
    /// otherwise only refreshes ghost positions. Returns whether it rebuilt.
    pub fn refresh(&mut self) -> Result<bool> {
        if self.vlist.is_valid(&self.storage, &*self.comm)? {
            self.storage.update_ghosts(&*self.comm)?;
            Ok(false)
        } else {
            self.decompose()?;
            Ok(true)
        }
    }

    /// Reset and recompute all interaction forces, including those that
    /// landed on ghosts. Returns the local energy and virial.
    pub fn compute_forces(&mut self) -> Result<ForceSummary> {
        self.storage.reset_forces();
        let summary = self.interactions.compute_forces(&mut self.storage, &self.vlist)?;
        self.storage.collect_ghost_forces(&*self.comm)?;
        Ok(summary)
    }

    /// Total potential energy over all ranks.
    pub fn potential_energy(&self) -> Result<f64> {
        Ok(self
            .interactions
            .compute_energy(&self.storage, &self.vlist, &*self.comm)?)
    }

    /// Total scalar virial over all ranks.
    pub fn virial(&self) -> Result<f64> {
        Ok(self
            .interactions
            .compute_virial(&self.storage, &self.vlist, &*self.comm)?)
    }

    /// `[n, kinetic energy, px, py, pz]` summed over all ranks.
    fn particle_totals(&self) -> Result<Vec<f64>> {
        let mut local = [0.0; 5];
        for p in self.storage.real_particles() {
            let m = p.momentum();
            local[0] += 1.0;
            local[1] += p.kinetic_energy();
            local[2] += m.x;
            local[3] += m.y;
            local[4] += m.z;
        }
        Ok(self.comm.all_reduce_vec(&local, ReduceOp::Sum)?)
    }

    pub fn n_particles(&self) -> Result<usize> {
        Ok(self.particle_totals()?[0] as usize)
    }

    pub fn kinetic_energy(&self) -> Result<f64> {
        Ok(self.particle_totals()?[1])
    }

    pub fn total_momentum(&self) -> Result<Vec3> {
        let t = self.particle_totals()?;
        Ok(Vec3::new(t[2], t[3], t[4]))
    }

    /// Kinetic temperature `2 E_kin / (3 N)` with k_B = 1.
    pub fn temperature(&self) -> Result<f64> {
        let t = self.particle_totals()?;
        if t[0] == 0.0 {
            return Ok(0.0);
        }
        Ok(2.0 * t[1] / (3.0 * t[0]))
    }

    /// Draw Maxwell-Boltzmann velocities at `kt` and remove the global
    /// centre-of-mass motion.
    pub fn thermalize(&mut self, kt: f64) -> Result<()> {
        let mut local = [0.0; 4];
        for p in self.storage.real_particles_mut() {
            let sigma = (kt / p.mass).sqrt();
            for d in 0..3 {
                let z: f64 = StandardNormal.sample(&mut self.rng);
                p.v[d] = sigma * z;
            }
            local[0] += p.mass;
            local[1] += p.mass * p.v.x;
            local[2] += p.mass * p.v.y;
            local[3] += p.mass * p.v.z;
        }
        let total = self.comm.all_reduce_vec(&local, ReduceOp::Sum)?;
        if total[0] > 0.0 {
            let com = Vec3::new(total[1], total[2], total[3]) / total[0];
            for p in self.storage.real_particles_mut() {
                p.v -= com;
            }
        }
        Ok(())
    }

    /// Create the fluid on the particle node grid.
    ///
    /// `tau` is the LB time step in MD units. The lattice spacing must exceed
    /// the skin so particles drifting out of their domain still have a full
    /// interpolation stencil.
    pub fn init_lb(&mut self, params: LbParams, tau: f64, init: &InitPopulation) -> Result<()> {
        let grid = self.storage.grid();
        let mut lb = LatticeBoltzmann::new(
            params,
            &grid.bc,
            grid.node_grid,
            self.rank(),
            tau,
            self.seed.wrapping_add(0x5eed),
        )?;
        if lb.spacing() <= grid.skin {
            return Err(SimError::Config(format!(
                "lattice spacing {} must exceed the skin {}",
                lb.spacing(),
                grid.skin
            )));
        }
        lb.initialize(init, &*self.comm)?;
        self.lb = Some(lb);
        Ok(())
    }

    /// Borrow the fluid, failing if none is attached.
    pub fn lb(&self) -> Result<&LatticeBoltzmann> {
        self.lb
            .as_ref()
            .ok_or_else(|| SimError::Config("no lattice-Boltzmann fluid attached".into()))
    }
}
