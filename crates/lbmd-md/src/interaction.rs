//! Interaction registry: which potentials act on which particles.
//!
//! Non-bonded pairs come from the Verlet list and pick their potential by the
//! unordered type pair. Fixed tuples (bonds, angles, dihedrals) are resolved
//! from global ids to the current local or ghost copies on every evaluation.

use crate::angular::{AngularPotential, DihedralPotential};
use crate::neighbor::VerletList;
use crate::potential::{BondPotential, PairPotential};
use crate::storage::{DomainDecomposition, ForceBuffer, ParticleRef};
use crate::topology::{FixedPairList, FixedQuadrupleAngleList, FixedQuadrupleList, FixedTripleList};
use crate::{MdError, Particle, ParticleId, Result};
use lbmd_comm::{Communicator, ReduceOp};
use lbmd_math::Vec3;
use std::collections::HashMap;
use std::ops::AddAssign;

/// Potentials keyed by a tuple of particle types.
///
/// A key and its reverse address the same entry, so `(0, 1)` and `(1, 0)`
/// share a potential, as do `(0, 1, 2)` and `(2, 1, 0)`.
#[derive(Clone, Debug)]
pub struct TypeTable<P, const N: usize> {
    n_types: u32,
    entries: HashMap<[u32; N], P>,
}

impl<P, const N: usize> TypeTable<P, N> {
    pub fn new(n_types: u32) -> Self {
        Self {
            n_types,
            entries: HashMap::new(),
        }
    }

    fn canonical(types: [u32; N]) -> [u32; N] {
        let mut reversed = types;
        reversed.reverse();
        types.min(reversed)
    }

    /// Bind `potential` to `types`. Fails if any type is out of range.
    pub fn insert(&mut self, types: [u32; N], potential: P) -> Result<()> {
        if let Some(&index) = types.iter().find(|&&t| t >= self.n_types) {
            return Err(MdError::InvalidTypeIndex {
                index,
                n_types: self.n_types,
            });
        }
        self.entries.insert(Self::canonical(types), potential);
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, types: [u32; N], potential: P) -> Result<Self> {
        self.insert(types, potential)?;
        Ok(self)
    }

    pub fn get(&self, types: [u32; N]) -> Option<&P> {
        self.entries.get(&Self::canonical(types))
    }

    pub fn values(&self) -> impl Iterator<Item = &P> {
        self.entries.values()
    }

    pub fn n_types(&self) -> u32 {
        self.n_types
    }
}

/// One potential for every tuple, or a per-type-tuple table.
#[derive(Clone, Debug)]
pub enum Binding<P, const N: usize> {
    Single(P),
    ByTypes(TypeTable<P, N>),
}

impl<P, const N: usize> Binding<P, N> {
    pub fn get(&self, types: [u32; N]) -> Option<&P> {
        match self {
            Binding::Single(p) => Some(p),
            Binding::ByTypes(table) => table.get(types),
        }
    }

    fn n_types(&self) -> Option<u32> {
        match self {
            Binding::Single(_) => None,
            Binding::ByTypes(table) => Some(table.n_types()),
        }
    }
}

/// A registered interaction.
#[derive(Clone, Debug)]
pub enum Interaction {
    VerletListPair {
        potentials: TypeTable<PairPotential, 2>,
    },
    FixedPair {
        list: FixedPairList,
        potential: Binding<BondPotential, 2>,
    },
    FixedTriple {
        list: FixedTripleList,
        potential: Binding<AngularPotential, 3>,
    },
    FixedQuadruple {
        list: FixedQuadrupleList,
        potential: Binding<DihedralPotential, 4>,
    },
    FixedQuadrupleAngle {
        list: FixedQuadrupleAngleList,
        potential: Binding<DihedralPotential, 4>,
    },
}

impl Interaction {
    fn table_types(&self) -> Option<u32> {
        match self {
            Interaction::VerletListPair { potentials } => Some(potentials.n_types()),
            Interaction::FixedPair { potential, .. } => potential.n_types(),
            Interaction::FixedTriple { potential, .. } => potential.n_types(),
            Interaction::FixedQuadruple { potential, .. }
            | Interaction::FixedQuadrupleAngle { potential, .. } => potential.n_types(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Interaction::VerletListPair { .. } => "VerletListPair",
            Interaction::FixedPair { .. } => "FixedPairList",
            Interaction::FixedTriple { .. } => "FixedTripleList",
            Interaction::FixedQuadruple { .. } => "FixedQuadrupleList",
            Interaction::FixedQuadrupleAngle { .. } => "FixedQuadrupleAngleList",
        }
    }
}

/// Local potential energy and scalar virial `Σ (x_k - x_1) · F_k`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ForceSummary {
    pub energy: f64,
    pub virial: f64,
}

impl AddAssign for ForceSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.energy += rhs.energy;
        self.virial += rhs.virial;
    }
}

/// All interactions of a system.
#[derive(Clone, Debug)]
pub struct InteractionSet {
    n_types: u32,
    interactions: Vec<Interaction>,
}

impl InteractionSet {
    pub fn new(n_types: u32) -> Self {
        Self {
            n_types,
            interactions: Vec::new(),
        }
    }

    pub fn n_types(&self) -> u32 {
        self.n_types
    }

    /// Empty type table sized for this set.
    pub fn type_table<P, const N: usize>(&self) -> TypeTable<P, N> {
        TypeTable::new(self.n_types)
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Register an interaction.
    pub fn add(&mut self, interaction: Interaction) -> Result<()> {
        if let Some(n) = interaction.table_types() {
            if n > self.n_types {
                return Err(MdError::InvalidTypeIndex {
                    index: n - 1,
                    n_types: self.n_types,
                });
            }
        }
        self.interactions.push(interaction);
        Ok(())
    }

    /// Bind a non-bonded pair potential to the unordered type pair `(t1, t2)`.
    pub fn set_pair_potential(&mut self, t1: u32, t2: u32, potential: PairPotential) -> Result<()> {
        for interaction in &mut self.interactions {
            if let Interaction::VerletListPair { potentials } = interaction {
                return potentials.insert([t1, t2], potential);
            }
        }
        let potentials = TypeTable::new(self.n_types).with([t1, t2], potential)?;
        self.interactions.push(Interaction::VerletListPair { potentials });
        Ok(())
    }

    /// Largest non-bonded cutoff; the neighbour list and cell grid must cover it.
    pub fn max_cutoff(&self) -> f64 {
        self.interactions
            .iter()
            .filter_map(|i| match i {
                Interaction::VerletListPair { potentials } => {
                    potentials.values().map(PairPotential::cutoff).reduce(f64::max)
                }
                _ => None,
            })
            .fold(0.0, f64::max)
    }

    /// Accumulate forces on real and ghost particles; returns local energy and virial.
    ///
    /// Forces landing on ghosts still have to be sent home with
    /// [`DomainDecomposition::collect_ghost_forces`].
    pub fn compute_forces(
        &self,
        storage: &mut DomainDecomposition,
        vlist: &VerletList,
    ) -> Result<ForceSummary> {
        let mut buf = storage.force_buffer();
        let summary = self.evaluate(storage, vlist, &mut buf)?;
        storage.apply_forces(&buf);
        Ok(summary)
    }

    /// Local energy and virial without touching forces.
    pub fn local_summary(&self, storage: &DomainDecomposition, vlist: &VerletList) -> Result<ForceSummary> {
        let mut buf = storage.force_buffer();
        self.evaluate(storage, vlist, &mut buf)
    }

    /// Total potential energy over all ranks.
    pub fn compute_energy(
        &self,
        storage: &DomainDecomposition,
        vlist: &VerletList,
        comm: &dyn Communicator,
    ) -> Result<f64> {
        let local = self.local_summary(storage, vlist)?;
        Ok(comm.all_reduce(local.energy, ReduceOp::Sum)?)
    }

    /// Total scalar virial over all ranks.
    pub fn compute_virial(
        &self,
        storage: &DomainDecomposition,
        vlist: &VerletList,
        comm: &dyn Communicator,
    ) -> Result<f64> {
        let local = self.local_summary(storage, vlist)?;
        Ok(comm.all_reduce(local.virial, ReduceOp::Sum)?)
    }

    fn evaluate(
        &self,
        storage: &DomainDecomposition,
        vlist: &VerletList,
        buf: &mut ForceBuffer,
    ) -> Result<ForceSummary> {
        let mut total = ForceSummary::default();
        for interaction in &self.interactions {
            let component = interaction.name();
            total += match interaction {
                Interaction::VerletListPair { potentials } => {
                    self.pair_forces(storage, vlist, potentials, buf)?
                }
                Interaction::FixedPair { list, potential } => self.tuple_forces(
                    storage,
                    component,
                    list.tuples().iter().map(|t| (t, 0.0)),
                    potential,
                    buf,
                    |pot, d, _| {
                        let (f, e) = pot.compute(d[1]);
                        ([f, -f], e)
                    },
                )?,
                Interaction::FixedTriple { list, potential } => self.tuple_forces(
                    storage,
                    component,
                    list.tuples().iter().map(|t| (t, 0.0)),
                    potential,
                    buf,
                    |pot, d, _| pot.compute(d[0] - d[1], d[2] - d[1]),
                )?,
                Interaction::FixedQuadruple { list, potential } => self.tuple_forces(
                    storage,
                    component,
                    list.tuples().iter().map(|t| (t, 0.0)),
                    potential,
                    buf,
                    |pot, d, _| pot.compute(d[1] - d[0], d[2] - d[1], d[3] - d[2]),
                )?,
                Interaction::FixedQuadrupleAngle { list, potential } => self.tuple_forces(
                    storage,
                    component,
                    list.iter(),
                    potential,
                    buf,
                    |pot, d, phi_ref| {
                        pot.compute_relative(d[1] - d[0], d[2] - d[1], d[3] - d[2], phi_ref)
                    },
                )?,
            };
        }
        Ok(total)
    }

    /// Evaluate a fixed-tuple interaction. `eval` gets the potential, positions
    /// relative to the first particle and the per-tuple reference value.
    #[allow(clippy::too_many_arguments)]
    fn tuple_forces<'a, P, const N: usize, I, F>(
        &self,
        storage: &DomainDecomposition,
        component: &'static str,
        tuples: I,
        binding: &Binding<P, N>,
        buf: &mut ForceBuffer,
        eval: F,
    ) -> Result<ForceSummary>
    where
        I: IntoIterator<Item = (&'a [ParticleId; N], f64)>,
        F: Fn(&P, &[Vec3; N], f64) -> ([Vec3; N], f64),
    {
        let mut s = ForceSummary::default();
        for (ids, reference) in tuples {
            let Some(tuple) = self.resolve(storage, ids, component)? else {
                continue;
            };
            let Some(pot) = binding.get(tuple.types) else {
                continue;
            };
            let (forces, energy) = eval(pot, &tuple.d, reference);
            for k in 0..N {
                buf.add(tuple.refs[k], forces[k]);
                s.virial += tuple.d[k].dot(&forces[k]);
            }
            s.energy += energy;
        }
        Ok(s)
    }

    fn pair_forces(
        &self,
        storage: &DomainDecomposition,
        vlist: &VerletList,
        potentials: &TypeTable<PairPotential, 2>,
        buf: &mut ForceBuffer,
    ) -> Result<ForceSummary> {
        let mut s = ForceSummary::default();
        for &(ra, rb) in vlist.pairs() {
            let (pa, pb) = (storage.particle(ra), storage.particle(rb));
            let types = [self.check_type(pa)?, self.check_type(pb)?];
            let Some(pot) = potentials.get(types) else {
                continue;
            };
            let r_ij = pb.x - pa.x;
            let rc = pot.cutoff();
            if r_ij.norm_squared() >= rc * rc {
                continue;
            }
            let (f, e) = pot.compute(r_ij);
            buf.add(ra, f);
            buf.add(rb, -f);
            s.energy += e;
            s.virial -= r_ij.dot(&f);
        }
        Ok(s)
    }

    fn check_type(&self, p: &Particle) -> Result<u32> {
        if p.ptype >= self.n_types {
            return Err(MdError::InvalidTypeIndex {
                index: p.ptype,
                n_types: self.n_types,
            });
        }
        Ok(p.ptype)
    }

    /// Resolve a tuple whose first particle is real on this rank.
    ///
    /// Returns `None` if the first particle is not real here (another rank
    /// evaluates the tuple).
    fn resolve<const N: usize>(
        &self,
        storage: &DomainDecomposition,
        ids: &[ParticleId; N],
        component: &'static str,
    ) -> Result<Option<ResolvedTuple<N>>> {
        let first = match storage.locate(ids[0]) {
            Some(r) if !storage.is_ghost(r) => r,
            _ => return Ok(None),
        };
        let x0 = storage.particle(first).x;
        let mut tuple = ResolvedTuple {
            refs: [first; N],
            types: [0; N],
            d: [Vec3::zeros(); N],
        };
        for k in 0..N {
            let r = storage.locate(ids[k]).ok_or(MdError::MissingParticle {
                component,
                id: ids[k],
                rank: storage.rank(),
            })?;
            let p = storage.particle(r);
            tuple.refs[k] = r;
            tuple.types[k] = self.check_type(p)?;
            tuple.d[k] = storage.bc().separation(&x0, &p.x);
        }
        Ok(Some(tuple))
    }
}

/// A fixed tuple mapped onto local copies.
struct ResolvedTuple<const N: usize> {
    refs: [ParticleRef; N],
    types: [u32; N],
    /// Minimum-image positions relative to the first particle.
    d: [Vec3; N],
}
