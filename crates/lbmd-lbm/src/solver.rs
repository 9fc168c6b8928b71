//! Decomposed D3Q19 lattice-Boltzmann solver.
//!
//! The global lattice is split over the same node grid as the particles. Each
//! rank stores its sites plus a one-site halo; populations are exchanged
//! plane by plane (x, then y, then z) so that edge and corner halos fill in.

use crate::error::{LbError, Result};
use crate::forcing::{BodyForce, InitPopulation, total_force};
use crate::lattice::{E, Moments, Populations, Q, equilibrium, equilibrium_stress};
use crate::C_S_SQ;
use lbmd_comm::{Communicator, ReduceOp, Tag};
use lbmd_math::{Int3, Mat3, OrthorhombicBox, Vec3, volume};
use lbmd_md::Side;
use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

const TAG_HALO: Tag = 1000;
const TAG_FORCE_FOLD: Tag = 1100;

fn tag(base: Tag, dim: usize, side: Side) -> Tag {
    base + 2 * dim as Tag
        + match side {
            Side::Left => 0,
            Side::Right => 1,
        }
}

fn default_friction() -> f64 {
    5.0
}

/// Fluid and coupling parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LbParams {
    /// Global number of lattice sites per dimension.
    pub lattice: Int3,
    /// Relaxation of the bulk stress (0 = full relaxation to equilibrium).
    #[serde(default)]
    pub gamma_b: f64,
    /// Relaxation of the shear stress.
    #[serde(default)]
    pub gamma_s: f64,
    /// Fluid temperature in lattice units; zero disables stress fluctuations.
    #[serde(default)]
    pub kt: f64,
    /// Particle-fluid friction coefficient ζ (MD units).
    #[serde(default = "default_friction")]
    pub friction: f64,
    /// Temperature of the coupling noise (MD units); zero disables it.
    #[serde(default)]
    pub coupling_kt: f64,
}

impl LbParams {
    pub fn new(lattice: Int3) -> Self {
        Self {
            lattice,
            gamma_b: 0.0,
            gamma_s: 0.0,
            kt: 0.0,
            friction: default_friction(),
            coupling_kt: 0.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.lattice.contains(&0) {
            return Err(LbError::InvalidLattice(format!(
                "lattice {:?} has an empty dimension",
                self.lattice
            )));
        }
        for (name, g) in [("gamma_b", self.gamma_b), ("gamma_s", self.gamma_s)] {
            if !(g > -1.0 && g < 1.0) {
                return Err(LbError::InvalidParameter(format!(
                    "{name} must lie in (-1, 1), got {g}"
                )));
            }
        }
        if !(self.kt >= 0.0 && self.coupling_kt >= 0.0 && self.friction >= 0.0) {
            return Err(LbError::InvalidParameter(format!(
                "temperatures and friction must be non-negative (kt = {}, coupling_kt = {}, friction = {})",
                self.kt, self.coupling_kt, self.friction
            )));
        }
        Ok(())
    }
}

/// One rank's part of the lattice-Boltzmann fluid.
pub struct LatticeBoltzmann {
    params: LbParams,
    node_grid: Int3,
    rank: usize,
    node: Int3,
    /// Sites per rank per dimension.
    local: Int3,
    /// Lattice spacing in MD length units.
    a: f64,
    /// LB time step in MD time units.
    tau: f64,
    f: Vec<Populations>,
    f_post: Vec<Populations>,
    /// Momentum deposited by particles since the last LB step (lattice units).
    pub(crate) coupling: Vec<Vec3>,
    /// `(frame index, momentum)` added by the latest coupling pass, until the next LB step.
    pub(crate) last_deposit: Vec<(usize, Vec3)>,
    forces: Vec<BodyForce>,
    step: u64,
    pub(crate) rng: StdRng,
}

impl LatticeBoltzmann {
    /// Create the local part of a lattice covering `bc`.
    ///
    /// The lattice must divide evenly over `node_grid` and have the same
    /// spacing in every dimension. `tau` is the LB time step in MD units.
    pub fn new(
        params: LbParams,
        bc: &OrthorhombicBox,
        node_grid: Int3,
        rank: usize,
        tau: f64,
        seed: u64,
    ) -> Result<Self> {
        params.validate()?;
        if rank >= volume(node_grid) {
            return Err(LbError::InvalidLattice(format!(
                "rank {rank} outside node grid {node_grid:?}"
            )));
        }
        if !(tau > 0.0) {
            return Err(LbError::InvalidParameter(format!(
                "LB time step must be positive, got {tau}"
            )));
        }

        let lattice = params.lattice;
        let mut local = [0; 3];
        for d in 0..3 {
            if lattice[d] % node_grid[d] != 0 {
                return Err(LbError::InvalidLattice(format!(
                    "{} sites in dimension {d} do not divide over {} ranks",
                    lattice[d], node_grid[d]
                )));
            }
            local[d] = lattice[d] / node_grid[d];
        }
        let a = bc.size[0] / lattice[0] as f64;
        for d in 1..3 {
            let ad = bc.size[d] / lattice[d] as f64;
            if (ad - a).abs() > 1e-9 * a {
                return Err(LbError::InvalidLattice(format!(
                    "lattice spacing differs between dimensions ({a} vs {ad})"
                )));
            }
        }

        let node = [
            rank % node_grid[0],
            (rank / node_grid[0]) % node_grid[1],
            rank / (node_grid[0] * node_grid[1]),
        ];
        let n_frame = volume([local[0] + 2, local[1] + 2, local[2] + 2]);
        info!(
            "rank {rank}: LB lattice {lattice:?}, local {local:?}, spacing {a}, tau {tau}"
        );

        Ok(Self {
            params,
            node_grid,
            rank,
            node,
            local,
            a,
            tau,
            f: vec![[0.0; Q]; n_frame],
            f_post: vec![[0.0; Q]; n_frame],
            coupling: vec![Vec3::zeros(); n_frame],
            last_deposit: Vec::new(),
            forces: Vec::new(),
            step: 0,
            rng: StdRng::seed_from_u64(seed.wrapping_add(rank as u64)),
        })
    }

    pub fn params(&self) -> &LbParams {
        &self.params
    }

    /// Global lattice size.
    pub fn lattice(&self) -> Int3 {
        self.params.lattice
    }

    /// Sites owned by this rank per dimension.
    pub fn local_lattice(&self) -> Int3 {
        self.local
    }

    /// Lattice spacing (MD length units).
    pub fn spacing(&self) -> f64 {
        self.a
    }

    /// LB time step (MD time units).
    pub fn tau(&self) -> f64 {
        self.tau
    }

    /// LB steps performed so far.
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Ranks per dimension.
    pub fn node_grid(&self) -> Int3 {
        self.node_grid
    }

    /// Lattice velocity to MD velocity.
    pub fn to_md_velocity(&self, u: Vec3) -> Vec3 {
        u * self.a / self.tau
    }

    /// MD momentum to lattice momentum.
    pub fn to_lattice_momentum(&self, p: Vec3) -> Vec3 {
        p * self.tau / self.a
    }

    /// Lattice momentum to MD momentum.
    pub fn to_md_momentum(&self, j: Vec3) -> Vec3 {
        j * self.a / self.tau
    }

    /// Replace all body forces with `force`.
    pub fn set_force(&mut self, force: BodyForce) {
        self.forces = vec![force];
    }

    /// Add a body force to those already registered; all are summed.
    pub fn add_force(&mut self, force: BodyForce) {
        self.forces.push(force);
    }

    pub fn clear_forces(&mut self) {
        self.forces.clear();
    }

    pub fn body_forces(&self) -> &[BodyForce] {
        &self.forces
    }

    #[inline]
    fn frame(&self) -> Int3 {
        [self.local[0] + 2, self.local[1] + 2, self.local[2] + 2]
    }

    /// Flat index of frame coordinates.
    #[inline]
    pub(crate) fn index(&self, c: Int3) -> usize {
        let [fx, fy, _] = self.frame();
        c[0] + fx * (c[1] + fy * c[2])
    }

    /// Frame coordinates of all owned sites, x fastest.
    fn inner_sites(&self) -> Vec<Int3> {
        let [lx, ly, lz] = self.local;
        let mut out = Vec::with_capacity(lx * ly * lz);
        for z in 1..=lz {
            for y in 1..=ly {
                for x in 1..=lx {
                    out.push([x, y, z]);
                }
            }
        }
        out
    }

    /// Global site of frame coordinates (owned sites only).
    fn global_of(&self, c: Int3) -> Int3 {
        [
            self.node[0] * self.local[0] + c[0] - 1,
            self.node[1] * self.local[1] + c[1] - 1,
            self.node[2] * self.local[2] + c[2] - 1,
        ]
    }

    /// Frame coordinates of a global site if this rank owns it.
    fn frame_of_global(&self, g: Int3) -> Option<Int3> {
        let mut c = [0; 3];
        for d in 0..3 {
            let lo = self.node[d] * self.local[d];
            if g[d] < lo || g[d] >= lo + self.local[d] {
                return None;
            }
            c[d] = g[d] - lo + 1;
        }
        Some(c)
    }

    /// Lower corner of this rank's sites in global site units.
    pub(crate) fn origin(&self) -> Int3 {
        [
            self.node[0] * self.local[0],
            self.node[1] * self.local[1],
            self.node[2] * self.local[2],
        ]
    }

    fn neighbor_rank(&self, dim: usize, side: Side) -> usize {
        let mut node = self.node;
        let n = self.node_grid[dim];
        node[dim] = match side {
            Side::Left => (node[dim] + n - 1) % n,
            Side::Right => (node[dim] + 1) % n,
        };
        node[0] + self.node_grid[0] * (node[1] + self.node_grid[1] * node[2])
    }

    /// Frame indices with coordinate `layer` along `dim`, in a rank-independent order.
    fn plane(&self, dim: usize, layer: usize) -> Vec<usize> {
        let f = self.frame();
        let mut out = Vec::new();
        for z in 0..f[2] {
            for y in 0..f[1] {
                for x in 0..f[0] {
                    let c = [x, y, z];
                    if c[dim] == layer {
                        out.push(self.index(c));
                    }
                }
            }
        }
        out
    }

    /// Populations of an owned global site.
    pub fn populations(&self, site: Int3) -> Option<&Populations> {
        self.frame_of_global(site).map(|c| &self.f[self.index(c)])
    }

    pub fn populations_mut(&mut self, site: Int3) -> Option<&mut Populations> {
        let c = self.frame_of_global(site)?;
        let idx = self.index(c);
        Some(&mut self.f[idx])
    }

    /// Density of an owned global site.
    pub fn density(&self, site: Int3) -> Option<f64> {
        self.populations(site).map(|f| f.iter().sum())
    }

    /// Fluid velocity (lattice units) at an owned global site.
    pub fn velocity(&self, site: Int3) -> Option<Vec3> {
        self.populations(site).map(velocity_of)
    }

    /// Fluid velocity (lattice units) at frame coordinates, halo included.
    pub(crate) fn frame_velocity(&self, c: Int3) -> Vec3 {
        velocity_of(&self.f[self.index(c)])
    }

    /// Fill owned sites from an initialisation policy and refresh the halo.
    pub fn initialize(&mut self, init: &InitPopulation, comm: &dyn Communicator) -> Result<()> {
        let lattice = self.params.lattice;
        for c in self.inner_sites() {
            let (rho, u) = init.state_at(self.global_of(c), lattice);
            let idx = self.index(c);
            self.f[idx] = equilibrium(rho, u);
        }
        self.coupling.fill(Vec3::zeros());
        self.last_deposit.clear();
        debug!("rank {}: LB populations initialised with {init:?}", self.rank);
        self.exchange_halo(comm)
    }

    /// Copy boundary planes of populations into the neighbours' halos.
    fn exchange_halo(&mut self, comm: &dyn Communicator) -> Result<()> {
        for d in 0..3 {
            for side in [Side::Left, Side::Right] {
                let (send_layer, recv_layer, src_side) = match side {
                    Side::Left => (1, self.local[d] + 1, Side::Right),
                    Side::Right => (self.local[d], 0, Side::Left),
                };
                let dest = self.neighbor_rank(d, side);
                let src = self.neighbor_rank(d, src_side);

                let mut buf = Vec::new();
                for idx in self.plane(d, send_layer) {
                    buf.extend_from_slice(&self.f[idx]);
                }
                let data = comm.send_recv(dest, src, tag(TAG_HALO, d, side), buf)?;

                let targets = self.plane(d, recv_layer);
                if data.len() != targets.len() * Q {
                    return Err(LbError::InvalidLattice("malformed halo message".into()));
                }
                for (idx, chunk) in targets.into_iter().zip(data.chunks_exact(Q)) {
                    self.f[idx].copy_from_slice(chunk);
                }
            }
        }
        Ok(())
    }

    /// Return momentum deposited into halo sites to the owning ranks.
    fn fold_coupling_forces(&mut self, comm: &dyn Communicator) -> Result<()> {
        for d in (0..3).rev() {
            let upper = self.local[d] + 1;
            // (halo layer sent, neighbour it belongs to, layer receiving from the other side)
            for (halo, side, recv_layer, src_side) in [
                (0, Side::Left, self.local[d], Side::Right),
                (upper, Side::Right, 1, Side::Left),
            ] {
                let dest = self.neighbor_rank(d, side);
                let src = self.neighbor_rank(d, src_side);

                let sources = self.plane(d, halo);
                let mut buf = Vec::with_capacity(3 * sources.len());
                for &idx in &sources {
                    let g = self.coupling[idx];
                    buf.extend_from_slice(&[g.x, g.y, g.z]);
                    self.coupling[idx] = Vec3::zeros();
                }
                let data = comm.send_recv(dest, src, tag(TAG_FORCE_FOLD, d, side), buf)?;

                let targets = self.plane(d, recv_layer);
                if data.len() != 3 * targets.len() {
                    return Err(LbError::InvalidLattice("malformed force fold message".into()));
                }
                for (idx, g) in targets.into_iter().zip(data.chunks_exact(3)) {
                    self.coupling[idx] += Vec3::new(g[0], g[1], g[2]);
                }
            }
        }
        Ok(())
    }

    /// Gaussian stress fluctuation for a site of density `rho`.
    ///
    /// Each shear component has variance ρ kT c_s² (1 - γ_s²); the trace part
    /// uses γ_b. Mass and momentum are untouched.
    fn stress_noise(&mut self, rho: f64) -> Mat3 {
        let kt = self.params.kt;
        let sd_s = (rho * kt * C_S_SQ * (1.0 - self.params.gamma_s.powi(2))).max(0.0).sqrt();
        let sd_b = (rho * kt * C_S_SQ * (1.0 - self.params.gamma_b.powi(2))).max(0.0).sqrt();
        let mut normal = || -> f64 { StandardNormal.sample(&mut self.rng) };

        let mut n = Mat3::zeros();
        for a in 0..3 {
            for b in (a + 1)..3 {
                let x = sd_s * normal();
                n[(a, b)] = x;
                n[(b, a)] = x;
            }
        }
        let diag: [f64; 3] = std::array::from_fn(|_| std::f64::consts::SQRT_2 * sd_s * normal());
        let mean = (diag[0] + diag[1] + diag[2]) / 3.0;
        for a in 0..3 {
            n[(a, a)] = diag[a] - mean;
        }
        let bulk = (2.0f64 / 3.0).sqrt() * sd_b * normal();
        n + bulk * Mat3::identity()
    }

    /// Relax stresses towards equilibrium with forcing, writing `f_post`.
    fn collide(&mut self) {
        let lattice = self.params.lattice;
        let (gamma_b, gamma_s) = (self.params.gamma_b, self.params.gamma_s);
        let thermal = self.params.kt > 0.0;
        let identity = Mat3::identity();

        for c in self.inner_sites() {
            let idx = self.index(c);
            let g = self.coupling[idx] + total_force(&self.forces, self.global_of(c), lattice, self.step);
            let m = Moments::of(&self.f[idx]);

            let u = (m.j + 0.5 * g) / m.rho;
            let pi_eq = equilibrium_stress(m.rho, u);
            let neq = m.pi - pi_eq;
            let neq_bulk = neq.trace() / 3.0 * identity;
            let ug = u * g.transpose() + g * u.transpose();
            let ug_bulk = ug.trace() / 3.0 * identity;

            let mut pi = pi_eq
                + gamma_b * neq_bulk
                + gamma_s * (neq - neq_bulk)
                + 0.5 * (1.0 + gamma_s) * (ug - ug_bulk)
                + 0.5 * (1.0 + gamma_b) * ug_bulk;
            if thermal {
                pi += self.stress_noise(m.rho);
            }

            self.f_post[idx] = Moments {
                rho: m.rho,
                j: m.j + g,
                pi,
            }
            .populations();
        }
    }

    /// Pull streaming from `f` (post-collision, halo filled) into `f_post`.
    fn stream(&mut self) {
        for c in self.inner_sites() {
            let idx = self.index(c);
            for (i, e) in E.iter().enumerate() {
                let src = [
                    (c[0] as i32 - e[0]) as usize,
                    (c[1] as i32 - e[1]) as usize,
                    (c[2] as i32 - e[2]) as usize,
                ];
                self.f_post[idx][i] = self.f[self.index(src)][i];
            }
        }
    }

    /// Global flat index of the first owned site with non-finite populations.
    fn first_bad_site(&self) -> Option<usize> {
        let [nx, ny, _] = self.params.lattice;
        self.inner_sites()
            .into_iter()
            .find(|&c| self.f[self.index(c)].iter().any(|v| !v.is_finite()))
            .map(|c| {
                let g = self.global_of(c);
                g[0] + nx * (g[1] + ny * g[2])
            })
    }

    /// One LB update: fold deposited momentum, collide, stream.
    ///
    /// Non-finite populations anywhere are fatal on every rank.
    pub fn step_lattice(&mut self, comm: &dyn Communicator) -> Result<()> {
        self.fold_coupling_forces(comm)?;
        self.collide();
        self.coupling.fill(Vec3::zeros());
        self.last_deposit.clear();

        std::mem::swap(&mut self.f, &mut self.f_post);
        self.exchange_halo(comm)?;
        self.stream();
        std::mem::swap(&mut self.f, &mut self.f_post);
        self.exchange_halo(comm)?;

        let local_bad = self.first_bad_site().map_or(f64::MAX, |i| i as f64);
        let bad = comm.all_reduce(local_bad, ReduceOp::Min)?;
        if bad < f64::MAX {
            let [nx, ny, _] = self.params.lattice;
            let i = bad as usize;
            return Err(LbError::NonFinite {
                site: [i % nx, (i / nx) % ny, i / (nx * ny)],
                step: self.step,
            });
        }
        self.step += 1;
        Ok(())
    }

    /// Total fluid mass and momentum (lattice units) over all ranks.
    pub fn mass_and_momentum(&self, comm: &dyn Communicator) -> Result<(f64, Vec3)> {
        let mut local = [0.0; 4];
        for c in self.inner_sites() {
            let m = Moments::of(&self.f[self.index(c)]);
            local[0] += m.rho;
            local[1] += m.j.x;
            local[2] += m.j.y;
            local[3] += m.j.z;
        }
        let total = comm.all_reduce_vec(&local, ReduceOp::Sum)?;
        Ok((total[0], Vec3::new(total[1], total[2], total[3])))
    }

    /// z velocity (lattice units) at a global site, available on every rank.
    pub fn vz_at_site(&self, site: Int3, comm: &dyn Communicator) -> Result<f64> {
        let lattice = self.params.lattice;
        if (0..3).any(|d| site[d] >= lattice[d]) {
            return Err(LbError::SiteOutsideLattice { site, lattice });
        }
        let local = self.velocity(site).map_or(0.0, |u| u.z);
        Ok(comm.all_reduce(local, ReduceOp::Sum)?)
    }

    /// z velocity averaged over y and z for every x (lattice units).
    pub fn vz_profile_along_x(&self, comm: &dyn Communicator) -> Result<Vec<f64>> {
        let [nx, ny, nz] = self.params.lattice;
        let mut sums = vec![0.0; nx];
        for c in self.inner_sites() {
            let g = self.global_of(c);
            sums[g[0]] += self.frame_velocity(c).z;
        }
        let total = comm.all_reduce_vec(&sums, ReduceOp::Sum)?;
        let norm = (ny * nz) as f64;
        Ok(total.into_iter().map(|s| s / norm).collect())
    }
}

fn velocity_of(f: &Populations) -> Vec3 {
    let m = Moments::of(f);
    if m.rho.abs() < 1e-12 {
        return Vec3::zeros();
    }
    m.j / m.rho
}
