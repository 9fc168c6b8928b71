//! Integrator extensions: thermostat, force capping, fluid coupling, analysis.

use crate::analysis::ExtAnalyze;
use crate::error::{Result, SimError};
use crate::system::System;
use log::{debug, warn};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Points in a velocity-Verlet step where extensions run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepPhase {
    BeforePositionUpdate,
    AfterPositionUpdate,
    BeforeForceEval,
    AfterForceEval,
    EndOfStep,
}

fn default_period() -> u64 {
    1
}

/// Langevin thermostat: friction `-γ m v` plus noise of variance `2 γ m kT / dt`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LangevinThermostat {
    pub gamma: f64,
    pub temperature: f64,
    #[serde(default = "default_period")]
    pub period: u64,
}

impl LangevinThermostat {
    pub fn new(gamma: f64, temperature: f64) -> Self {
        Self {
            gamma,
            temperature,
            period: 1,
        }
    }

    fn apply(&self, system: &mut System, dt: f64) {
        let System { storage, rng, .. } = system;
        for p in storage.real_particles_mut() {
            let sigma = (2.0 * self.gamma * p.mass * self.temperature / dt).sqrt();
            let mut f = -self.gamma * p.mass * p.v;
            for d in 0..3 {
                let z: f64 = StandardNormal.sample(&mut *rng);
                f[d] += sigma * z;
            }
            p.add_force(f);
        }
    }
}

/// Clamp the magnitude of every particle force to `max`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapForce {
    pub max: f64,
    #[serde(default = "default_period")]
    pub period: u64,
}

impl CapForce {
    pub fn new(max: f64) -> Self {
        Self { max, period: 1 }
    }

    fn apply(&self, system: &mut System) -> usize {
        let mut capped = 0;
        for p in system.storage.real_particles_mut() {
            let norm = p.f.norm();
            if norm > self.max {
                p.f *= self.max / norm;
                capped += 1;
            }
        }
        capped
    }
}

/// Fluid update every `period` MD steps and particle coupling at every force
/// evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LbCoupling {
    #[serde(default = "default_period")]
    pub period: u64,
}

/// A registered extension. Registration order is execution order within a phase.
#[derive(Debug)]
pub enum Extension {
    LangevinThermostat(LangevinThermostat),
    CapForce(CapForce),
    LatticeBoltzmann(LbCoupling),
    Analyze(ExtAnalyze),
}

impl Extension {
    pub fn name(&self) -> &'static str {
        match self {
            Extension::LangevinThermostat(_) => "LangevinThermostat",
            Extension::CapForce(_) => "CapForce",
            Extension::LatticeBoltzmann(_) => "LatticeBoltzmann",
            Extension::Analyze(_) => "ExtAnalyze",
        }
    }

    pub fn period(&self) -> u64 {
        match self {
            Extension::LangevinThermostat(t) => t.period,
            Extension::CapForce(c) => c.period,
            Extension::LatticeBoltzmann(l) => l.period,
            Extension::Analyze(a) => a.period,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.period() == 0 {
            return Err(SimError::Config(format!("{} period must be positive", self.name())));
        }
        match self {
            Extension::LangevinThermostat(t) if !(t.gamma >= 0.0 && t.temperature >= 0.0) => Err(
                SimError::Config(format!(
                    "thermostat needs non-negative gamma and temperature, got {} and {}",
                    t.gamma, t.temperature
                )),
            ),
            Extension::CapForce(c) if !(c.max > 0.0) => Err(SimError::Config(format!(
                "force cap must be positive, got {}",
                c.max
            ))),
            _ => Ok(()),
        }
    }

    /// Run this extension's work for `phase` of step `step`.
    pub(crate) fn apply(&mut self, phase: StepPhase, step: u64, dt: f64, system: &mut System) -> Result<()> {
        let due = step % self.period() == 0;
        match (self, phase) {
            (Extension::LangevinThermostat(t), StepPhase::AfterForceEval) if due => {
                t.apply(system, dt);
            }
            (Extension::CapForce(c), StepPhase::AfterForceEval) if due => {
                let n = c.apply(system);
                if n > 0 {
                    warn!("step {step}: capped {n} forces at {}", c.max);
                }
            }
            (Extension::LatticeBoltzmann(_), StepPhase::AfterForceEval) => {
                let System { storage, lb, .. } = system;
                let lb = lb
                    .as_mut()
                    .ok_or_else(|| SimError::Config("LB extension without a fluid".into()))?;
                lb.couple_particles(storage, dt)?;
            }
            (Extension::LatticeBoltzmann(_), StepPhase::EndOfStep) if due => {
                let System { lb, comm, .. } = system;
                let lb = lb
                    .as_mut()
                    .ok_or_else(|| SimError::Config("LB extension without a fluid".into()))?;
                lb.step_lattice(&**comm)?;
                debug!("step {step}: LB step {}", lb.step());
            }
            (Extension::Analyze(a), StepPhase::EndOfStep) if due => {
                a.sample(step, system)?;
            }
            _ => {}
        }
        Ok(())
    }
}
