//! Particle representation for molecular dynamics.

use lbmd_math::Vec3;

/// Globally unique, stable particle identifier.
pub type ParticleId = u64;

/// A single particle.
///
/// Real particles live in exactly one inner cell of one rank; ghost copies are
/// plain clones stored in the ghost frame and are never authoritative.
#[derive(Clone, Debug, PartialEq)]
pub struct Particle {
    /// Global id.
    pub id: ParticleId,
    /// Particle type for potential lookup.
    pub ptype: u32,
    /// Mass.
    pub mass: f64,
    /// Position.
    pub x: Vec3,
    /// Velocity.
    pub v: Vec3,
    /// Force accumulator.
    pub f: Vec3,
}

impl Particle {
    /// Number of `f64` values in a packed particle record.
    pub const RECORD_LEN: usize = 12;

    /// Create a new particle with zero force.
    pub fn new(id: ParticleId, ptype: u32, mass: f64, x: Vec3, v: Vec3) -> Self {
        Self {
            id,
            ptype,
            mass,
            x,
            v,
            f: Vec3::zeros(),
        }
    }

    /// Reset force accumulator.
    pub fn reset_force(&mut self) {
        self.f = Vec3::zeros();
    }

    /// Add force to accumulator.
    pub fn add_force(&mut self, f: Vec3) {
        self.f += f;
    }

    /// Kinetic energy: 0.5 * m * v^2.
    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.mass * self.v.norm_squared()
    }

    /// Linear momentum m * v.
    pub fn momentum(&self) -> Vec3 {
        self.mass * self.v
    }

    /// Append this particle as a record to `buf`, shifting coordinate `dim` by `shift`.
    pub fn pack_shifted(&self, buf: &mut Vec<f64>, dim: usize, shift: f64) {
        let mut x = self.x;
        x[dim] += shift;
        buf.extend_from_slice(&[
            self.id as f64,
            self.ptype as f64,
            self.mass,
            x.x,
            x.y,
            x.z,
            self.v.x,
            self.v.y,
            self.v.z,
            self.f.x,
            self.f.y,
            self.f.z,
        ]);
    }

    /// Append this particle as a record to `buf`.
    pub fn pack(&self, buf: &mut Vec<f64>) {
        self.pack_shifted(buf, 0, 0.0);
    }

    /// Decode one record. `rec` must hold at least [`Particle::RECORD_LEN`] values.
    pub fn unpack(rec: &[f64]) -> Self {
        Self {
            id: rec[0] as ParticleId,
            ptype: rec[1] as u32,
            mass: rec[2],
            x: Vec3::new(rec[3], rec[4], rec[5]),
            v: Vec3::new(rec[6], rec[7], rec[8]),
            f: Vec3::new(rec[9], rec[10], rec[11]),
        }
    }

    /// Decode a buffer of back-to-back records.
    pub fn unpack_all(buf: &[f64]) -> Vec<Self> {
        buf.chunks_exact(Self::RECORD_LEN).map(Self::unpack).collect()
    }
}
