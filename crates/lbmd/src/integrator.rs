//! Velocity-Verlet integration with extension hooks.

use crate::error::{Result, SimError};
use crate::extension::{Extension, StepPhase};
use crate::system::System;
use lbmd_comm::ReduceOp;
use lbmd_md::MdError;
use log::{debug, info};

/// Velocity-Verlet integrator.
///
/// Each step: half-kick, drift, neighbour refresh (rebuilding when stale),
/// force evaluation, second half-kick. Extensions fire at the phases listed
/// in [`StepPhase`]; an extension with period `P` does its work on steps
/// where `step % P == 0`, counting the first step as 1.
#[derive(Debug)]
pub struct VelocityVerlet {
    pub dt: f64,
    step: u64,
    extensions: Vec<Extension>,
}

impl VelocityVerlet {
    pub fn new(dt: f64) -> Result<Self> {
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(SimError::Config(format!("time step must be positive, got {dt}")));
        }
        Ok(Self {
            dt,
            step: 0,
            extensions: Vec::new(),
        })
    }

    /// Completed steps.
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn add_extension(&mut self, extension: Extension) -> Result<()> {
        extension.validate()?;
        self.extensions.push(extension);
        Ok(())
    }

    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut [Extension] {
        &mut self.extensions
    }

    /// Advance `n` steps.
    ///
    /// On the very first call the particles are decomposed and initial forces
    /// computed. Afterwards the forces carried by the particles are reused, so
    /// `run(a)` followed by `run(b)` is the same as `run(a + b)`. Call
    /// [`VelocityVerlet::recompute_forces`] after editing the system between runs.
    pub fn run(&mut self, system: &mut System, n: u64) -> Result<()> {
        if self.step == 0 {
            self.recompute_forces(system).map_err(|e| e.at_step(0))?;
        }
        for _ in 0..n {
            self.step += 1;
            let step = self.step;
            self.advance(system).map_err(|e| e.at_step(step))?;
        }
        Ok(())
    }

    /// Decompose and evaluate forces for the current positions.
    ///
    /// The fluid deposit of the force pass being replaced is withdrawn first,
    /// so re-preparing never feeds the fluid twice.
    pub fn recompute_forces(&mut self, system: &mut System) -> Result<()> {
        if let Some(lb) = system.lb.as_mut() {
            lb.withdraw_coupling();
        }
        system.decompose()?;
        self.update_forces(system)?;
        info!(
            "rank {}: prepared {} particles, {} pairs",
            system.rank(),
            system.storage.n_real(),
            system.vlist.len()
        );
        Ok(())
    }

    fn fire(&mut self, phase: StepPhase, system: &mut System) -> Result<()> {
        for ext in &mut self.extensions {
            ext.apply(phase, self.step, self.dt, system)?;
        }
        Ok(())
    }

    fn update_forces(&mut self, system: &mut System) -> Result<()> {
        self.fire(StepPhase::BeforeForceEval, system)?;
        system.compute_forces()?;
        self.fire(StepPhase::AfterForceEval, system)?;
        check_forces(system)
    }

    fn advance(&mut self, system: &mut System) -> Result<()> {
        let dt = self.dt;

        self.fire(StepPhase::BeforePositionUpdate, system)?;
        for p in system.storage.real_particles_mut() {
            p.v += 0.5 * dt / p.mass * p.f;
            p.x += dt * p.v;
        }
        self.fire(StepPhase::AfterPositionUpdate, system)?;

        if system.refresh()? {
            debug!("step {}: neighbour list rebuilt", self.step);
        }
        self.update_forces(system)?;

        for p in system.storage.real_particles_mut() {
            p.v += 0.5 * dt / p.mass * p.f;
        }
        self.fire(StepPhase::EndOfStep, system)
    }
}

/// Fail on every rank if any rank holds a non-finite force.
///
/// The smallest offending particle id is reported everywhere.
fn check_forces(system: &System) -> Result<()> {
    let local = system
        .storage
        .real_particles()
        .filter(|p| !lbmd_math::is_finite(&p.f))
        .map(|p| p.id as f64)
        .fold(f64::INFINITY, f64::min);
    let worst = system.comm().all_reduce(local, ReduceOp::Min)?;
    if worst.is_finite() {
        return Err(MdError::NonFinite {
            component: "VelocityVerlet",
            quantity: "force",
            id: worst as u64,
        }
        .into());
    }
    Ok(())
}
