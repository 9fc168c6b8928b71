//! Frictional point coupling between particles and the fluid.
//!
//! A particle feels `F = -ζ (v - u(x)) + noise`, where `u(x)` is the fluid
//! velocity interpolated trilinearly from the eight surrounding sites. The
//! opposite momentum `-F dt` is spread back onto the same sites with the same
//! weights, so particles and fluid together conserve momentum.

use crate::error::{LbError, Result};
use crate::solver::LatticeBoltzmann;
use lbmd_math::{Int3, Vec3};
use lbmd_md::{DomainDecomposition, Particle};
use rand_distr::{Distribution, StandardNormal};

/// Frame sites around a point and their trilinear weights.
struct Stencil {
    sites: [Int3; 8],
    weights: [f64; 8],
}

impl LatticeBoltzmann {
    /// Interpolation stencil for an MD position, in frame coordinates.
    ///
    /// Site `g` is centred at `(g + 0.5) a`. The stencil may reach one site
    /// into the halo on either side but no further.
    fn stencil(&self, p: &Particle) -> Result<Stencil> {
        let origin = self.origin();
        let local = self.local_lattice();
        let mut base = [0usize; 3];
        let mut frac = [0.0; 3];
        for d in 0..3 {
            // +1 for the halo layer
            let s = p.x[d] / self.spacing() - 0.5 - origin[d] as f64 + 1.0;
            let lo = s.floor();
            if !(lo >= 0.0 && lo + 1.0 <= (local[d] + 1) as f64) {
                return Err(LbError::ParticleOutsideLattice {
                    id: p.id,
                    position: [p.x.x, p.x.y, p.x.z],
                });
            }
            base[d] = lo as usize;
            frac[d] = s - lo;
        }

        let mut sites = [[0; 3]; 8];
        let mut weights = [0.0; 8];
        for k in 0..8 {
            let mut w = 1.0;
            for d in 0..3 {
                let up = (k >> d) & 1;
                sites[k][d] = base[d] + up;
                w *= if up == 1 { frac[d] } else { 1.0 - frac[d] };
            }
            weights[k] = w;
        }
        Ok(Stencil { sites, weights })
    }

    /// Interpolated fluid velocity at a particle, in MD units.
    pub fn fluid_velocity_at(&self, p: &Particle) -> Result<Vec3> {
        let st = self.stencil(p)?;
        let u = st
            .sites
            .iter()
            .zip(st.weights)
            .fold(Vec3::zeros(), |acc, (&c, w)| acc + w * self.frame_velocity(c));
        Ok(self.to_md_velocity(u))
    }

    /// Apply the coupling force to every real particle and deposit the
    /// reaction momentum for the next LB step.
    ///
    /// `dt` is the MD time step; the noise amplitude is `sqrt(2 ζ kT / dt)`.
    /// Returns the total momentum (MD units) handed to the particles.
    /// Deposits from earlier passes keep accumulating until the next LB step;
    /// only this pass can be taken back with
    /// [`withdraw_coupling`](Self::withdraw_coupling).
    pub fn couple_particles(&mut self, storage: &mut DomainDecomposition, dt: f64) -> Result<Vec3> {
        let zeta = self.params().friction;
        let kt = self.params().coupling_kt;
        let noise = if kt > 0.0 {
            (2.0 * zeta * kt / dt).sqrt()
        } else {
            0.0
        };

        self.last_deposit.clear();
        let mut total = Vec3::zeros();
        for p in storage.real_particles_mut() {
            let st = self.stencil(p)?;
            let u_lat = st
                .sites
                .iter()
                .zip(st.weights)
                .fold(Vec3::zeros(), |acc, (&c, w)| acc + w * self.frame_velocity(c));

            let mut f = -zeta * (p.v - self.to_md_velocity(u_lat));
            if noise > 0.0 {
                for d in 0..3 {
                    let r: f64 = StandardNormal.sample(&mut self.rng);
                    f[d] += noise * r;
                }
            }
            p.add_force(f);
            total += f * dt;

            let dj = self.to_lattice_momentum(-f * dt);
            for (c, w) in st.sites.into_iter().zip(st.weights) {
                let idx = self.index(c);
                self.coupling[idx] += w * dj;
                self.last_deposit.push((idx, w * dj));
            }
        }
        Ok(total)
    }

    /// Remove the momentum deposited by the latest
    /// [`couple_particles`](Self::couple_particles) call, for when the particle
    /// forces of that pass are thrown away before the fluid steps.
    ///
    /// Returns the withdrawn momentum in MD units. A no-op once the fluid has
    /// stepped past the deposit.
    pub fn withdraw_coupling(&mut self) -> Vec3 {
        let mut withdrawn = Vec3::zeros();
        for (idx, dj) in self.last_deposit.drain(..) {
            self.coupling[idx] -= dj;
            withdrawn += dj;
        }
        self.to_md_momentum(withdrawn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forcing::InitPopulation;
    use crate::solver::LbParams;
    use approx::assert_relative_eq;
    use lbmd_comm::SerialComm;
    use lbmd_math::OrthorhombicBox;
    use lbmd_md::CellGrid;

    const L: f64 = 8.0;
    const TAU: f64 = 0.05;

    fn setup(velocity: Vec3) -> (LatticeBoltzmann, DomainDecomposition, SerialComm) {
        let comm = SerialComm::new();
        let bc = OrthorhombicBox::cubic(L);
        let mut params = LbParams::new([8, 8, 8]);
        params.friction = 2.0;
        let mut lb = LatticeBoltzmann::new(params, &bc, [1, 1, 1], 0, TAU, 3).unwrap();
        lb.initialize(
            &InitPopulation::Uniform {
                density: 1.0,
                velocity,
            },
            &comm,
        )
        .unwrap();

        let grid = CellGrid::auto(bc, 1, 1.5, 0.3).unwrap();
        let storage = DomainDecomposition::new(grid, 0).unwrap();
        (lb, storage, comm)
    }

    fn add(storage: &mut DomainDecomposition, comm: &SerialComm, x: Vec3, v: Vec3) {
        storage
            .add_particles([Particle::new(0, 0, 1.0, x, v)])
            .unwrap();
        storage.decompose(comm).unwrap();
    }

    #[test]
    fn test_uniform_flow_interpolation() {
        let u = Vec3::new(0.01, 0.0, -0.02);
        let (lb, mut storage, comm) = setup(u);
        // a point near the periodic edge uses halo sites
        add(&mut storage, &comm, Vec3::new(7.9, 0.1, 3.3), Vec3::zeros());
        let p = storage.real_particles().next().unwrap();
        assert_relative_eq!(lb.fluid_velocity_at(p).unwrap(), u * 1.0 / TAU, epsilon = 1e-12);
    }

    #[test]
    fn test_particle_moving_with_fluid_feels_no_force() {
        let u = Vec3::new(0.01, 0.005, 0.0);
        let (mut lb, mut storage, comm) = setup(u);
        add(&mut storage, &comm, Vec3::new(2.3, 4.1, 6.6), u / TAU);

        let dp = lb.couple_particles(&mut storage, 0.01).unwrap();
        assert_relative_eq!(dp, Vec3::zeros(), epsilon = 1e-12);
        let p = storage.real_particles().next().unwrap();
        assert_relative_eq!(p.f, Vec3::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn test_coupling_conserves_total_momentum() {
        let (mut lb, mut storage, comm) = setup(Vec3::zeros());
        // on the boundary so the deposit spills into the halo
        add(&mut storage, &comm, Vec3::new(0.2, 7.8, 4.0), Vec3::new(1.0, -0.5, 0.25));

        let dt = 0.01;
        let (_, j0) = lb.mass_and_momentum(&comm).unwrap();
        let dp = lb.couple_particles(&mut storage, dt).unwrap();
        let p = storage.real_particles().next().unwrap();
        assert_relative_eq!(p.f, -2.0 * Vec3::new(1.0, -0.5, 0.25), epsilon = 1e-12);
        assert_relative_eq!(dp, p.f * dt, epsilon = 1e-14);

        lb.step_lattice(&comm).unwrap();
        let (_, j1) = lb.mass_and_momentum(&comm).unwrap();
        let fluid_md = (j1 - j0) * lb.spacing() / TAU;
        assert_relative_eq!(fluid_md + dp, Vec3::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn test_withdrawn_pass_leaves_no_trace() {
        let v = Vec3::new(1.0, 0.0, 0.0);
        let (mut once, mut storage, comm) = setup(Vec3::zeros());
        add(&mut storage, &comm, Vec3::new(3.1, 4.5, 0.4), v);
        let dt = 0.01;
        let dp = once.couple_particles(&mut storage, dt).unwrap();
        once.step_lattice(&comm).unwrap();

        let (mut twice, mut storage, comm) = setup(Vec3::zeros());
        add(&mut storage, &comm, Vec3::new(3.1, 4.5, 0.4), v);
        twice.couple_particles(&mut storage, dt).unwrap();
        let withdrawn = twice.withdraw_coupling();
        assert_relative_eq!(withdrawn, -dp, epsilon = 1e-14);
        storage.reset_forces();
        twice.couple_particles(&mut storage, dt).unwrap();
        twice.step_lattice(&comm).unwrap();

        let (_, j_once) = once.mass_and_momentum(&comm).unwrap();
        let (_, j_twice) = twice.mass_and_momentum(&comm).unwrap();
        assert_relative_eq!(j_twice, j_once, epsilon = 1e-14);
        // nothing left to take back after the step
        assert_eq!(twice.withdraw_coupling(), Vec3::zeros());
    }

    #[test]
    fn test_particle_outside_frame_is_rejected() {
        let (lb, _, _) = setup(Vec3::zeros());
        let p = Particle::new(5, 0, 1.0, Vec3::new(-3.0, 1.0, 1.0), Vec3::zeros());
        match lb.fluid_velocity_at(&p) {
            Err(LbError::ParticleOutsideLattice { id: 5, .. }) => {}
            other => panic!("expected ParticleOutsideLattice, got {other:?}"),
        }
    }
}
