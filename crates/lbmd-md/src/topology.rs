//! Fixed topology lists (bonds, angles, dihedrals) and polymer builders.
//!
//! Lists hold global particle ids, identical on every rank. Each tuple is
//! evaluated on the rank that owns its first particle.

use crate::angular::dihedral_angle;
use crate::storage::DomainDecomposition;
use crate::{MdError, Particle, ParticleId, Result};
use lbmd_math::{OrthorhombicBox, Vec3};
use rand::Rng;
use rand_distr::{Distribution, UnitSphere};
use serde::{Deserialize, Serialize};

/// A list of id tuples of fixed arity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixedTupleList<const N: usize> {
    #[serde(with = "tuple_vec")]
    tuples: Vec<[ParticleId; N]>,
}

pub type FixedPairList = FixedTupleList<2>;
pub type FixedTripleList = FixedTupleList<3>;
pub type FixedQuadrupleList = FixedTupleList<4>;

impl<const N: usize> FixedTupleList<N> {
    pub fn new() -> Self {
        Self { tuples: Vec::new() }
    }

    /// Add a tuple. Repeated ids within one tuple are rejected.
    pub fn add(&mut self, tuple: [ParticleId; N]) -> Result<()> {
        for i in 0..N {
            if tuple[i + 1..].contains(&tuple[i]) {
                return Err(MdError::InvalidParameter(format!(
                    "tuple {tuple:?} repeats particle {}",
                    tuple[i]
                )));
            }
        }
        self.tuples.push(tuple);
        Ok(())
    }

    pub fn tuples(&self) -> &[[ParticleId; N]] {
        &self.tuples
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }
}

impl<const N: usize> FromIterator<[ParticleId; N]> for FixedTupleList<N> {
    fn from_iter<I: IntoIterator<Item = [ParticleId; N]>>(iter: I) -> Self {
        Self {
            tuples: iter.into_iter().collect(),
        }
    }
}

/// Dihedral quadruples with a per-quadruple reference angle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "QuadrupleAngleRecord")]
pub struct FixedQuadrupleAngleList {
    quadruples: FixedQuadrupleList,
    reference: Vec<f64>,
}

#[derive(Deserialize)]
struct QuadrupleAngleRecord {
    quadruples: FixedQuadrupleList,
    reference: Vec<f64>,
}

impl TryFrom<QuadrupleAngleRecord> for FixedQuadrupleAngleList {
    type Error = MdError;

    fn try_from(record: QuadrupleAngleRecord) -> Result<Self> {
        if record.quadruples.len() != record.reference.len() {
            return Err(MdError::InvalidParameter(format!(
                "{} quadruples but {} reference angles",
                record.quadruples.len(),
                record.reference.len()
            )));
        }
        let mut list = Self::new();
        for (quad, &phi_ref) in record.quadruples.tuples().iter().zip(&record.reference) {
            list.add(*quad, phi_ref)?;
        }
        Ok(list)
    }
}

impl FixedQuadrupleAngleList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a quadruple with an explicit reference angle (radians).
    pub fn add(&mut self, quad: [ParticleId; 4], phi_ref: f64) -> Result<()> {
        if !phi_ref.is_finite() {
            return Err(MdError::InvalidParameter(format!(
                "reference angle of {quad:?} is not finite"
            )));
        }
        self.quadruples.add(quad)?;
        self.reference.push(phi_ref);
        Ok(())
    }

    /// Add a quadruple using its current dihedral as the reference angle.
    ///
    /// All four particles must be reachable (real or ghost) from `storage`.
    pub fn add_measured(&mut self, storage: &DomainDecomposition, quad: [ParticleId; 4]) -> Result<f64> {
        let bc = storage.bc();
        let mut x = [Vec3::zeros(); 4];
        for (k, &id) in quad.iter().enumerate() {
            let r = storage.locate(id).ok_or(MdError::MissingParticle {
                component: "FixedQuadrupleAngleList",
                id,
                rank: storage.rank(),
            })?;
            x[k] = storage.particle(r).x;
        }
        let b1 = bc.separation(&x[0], &x[1]);
        let b2 = bc.separation(&x[1], &x[2]);
        let b3 = bc.separation(&x[2], &x[3]);
        let phi = dihedral_angle(&b1, &b2, &b3);
        self.add(quad, phi)?;
        Ok(phi)
    }

    /// `(quadruple, reference angle)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&[ParticleId; 4], f64)> {
        self.quadruples.tuples().iter().zip(self.reference.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }
}

/// Linear chains grown by random walks, with consecutive bonds and angles.
#[derive(Clone, Debug, Default)]
pub struct PolymerTopology {
    pub particles: Vec<Particle>,
    pub bonds: FixedPairList,
    pub angles: FixedTripleList,
}

/// Build `n_chains` random-walk chains of `monomers` beads each.
///
/// Ids are assigned consecutively from `first_id`. Every rank must call this
/// with an identically seeded generator so that all ranks agree on the topology.
#[allow(clippy::too_many_arguments)]
pub fn polymer_random_walk<R: Rng + ?Sized>(
    rng: &mut R,
    bc: &OrthorhombicBox,
    n_chains: usize,
    monomers: usize,
    bond_length: f64,
    first_id: ParticleId,
    ptype: u32,
    mass: f64,
) -> PolymerTopology {
    let mut topo = PolymerTopology::default();
    let mut id = first_id;
    for _ in 0..n_chains {
        let mut x = bc.random_position(rng);
        for m in 0..monomers {
            if m > 0 {
                let [dx, dy, dz]: [f64; 3] = UnitSphere.sample(rng);
                x += bond_length * Vec3::new(dx, dy, dz);
            }
            topo.particles
                .push(Particle::new(id, ptype, mass, bc.fold(x), Vec3::zeros()));
            if m >= 1 {
                topo.bonds.tuples.push([id - 1, id]);
            }
            if m >= 2 {
                topo.angles.tuples.push([id - 2, id - 1, id]);
            }
            id += 1;
        }
    }
    topo
}

mod tuple_vec {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(v: &[[u64; N]], s: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<&[u64]> = v.iter().map(|t| t.as_slice()).collect();
        rows.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(d: D) -> Result<Vec<[u64; N]>, D::Error> {
        let rows: Vec<Vec<u64>> = Vec::deserialize(d)?;
        rows.into_iter()
            .map(|row| {
                let len = row.len();
                <[u64; N]>::try_from(row)
                    .map_err(|_| D::Error::custom(format!("expected {N} ids per tuple, got {len}")))
            })
            .collect()
    }
}
