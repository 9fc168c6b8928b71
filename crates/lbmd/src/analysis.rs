//! Read-only probes sampled periodically by the integrator.

use crate::error::Result;
use crate::system::System;
use lbmd_math::{Int3, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What to measure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Probe {
    /// Kinetic temperature of the particles.
    Temperature,
    /// Fluid z velocity (lattice units) at one site; defaults to `(N_x/4, 0, 0)`.
    LbVzAtSite {
        #[serde(default)]
        site: Option<Int3>,
    },
    /// Fluid z velocity averaged over y and z, for every x.
    LbVzProfileAlongX,
    /// Total fluid mass and momentum.
    LbFlux,
}

/// A measured value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Observation {
    Scalar(f64),
    Profile(Vec<f64>),
    Flux { mass: f64, momentum: Vec3 },
}

impl Probe {
    pub fn observe(&self, system: &System) -> Result<Observation> {
        let comm = system.comm();
        match self {
            Probe::Temperature => Ok(Observation::Scalar(system.temperature()?)),
            Probe::LbVzAtSite { site } => {
                let lb = system.lb()?;
                let site = site.unwrap_or([lb.lattice()[0] / 4, 0, 0]);
                Ok(Observation::Scalar(lb.vz_at_site(site, comm)?))
            }
            Probe::LbVzProfileAlongX => Ok(Observation::Profile(system.lb()?.vz_profile_along_x(comm)?)),
            Probe::LbFlux => {
                let (mass, momentum) = system.lb()?.mass_and_momentum(comm)?;
                Ok(Observation::Flux { mass, momentum })
            }
        }
    }

    /// Whether the probe reads the fluid.
    pub fn needs_lb(&self) -> bool {
        !matches!(self, Probe::Temperature)
    }
}

/// One recorded observation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    pub step: u64,
    pub observation: Observation,
}

pub type Callback = Box<dyn FnMut(&Snapshot) + Send>;

/// Periodic analysis extension: records a snapshot every `period` steps and
/// optionally hands it to a callback.
///
/// Snapshots accumulate until [`drain`](Self::drain) is called. Long runs
/// should drain regularly or set a [`capacity`](Self::with_capacity), which
/// keeps only the most recent snapshots; the callback still sees every one.
pub struct ExtAnalyze {
    pub probe: Probe,
    pub period: u64,
    snapshots: Vec<Snapshot>,
    capacity: Option<usize>,
    callback: Option<Callback>,
}

impl ExtAnalyze {
    pub fn new(probe: Probe, period: u64) -> Self {
        Self {
            probe,
            period,
            snapshots: Vec::new(),
            capacity: None,
            callback: None,
        }
    }

    /// Keep at most `capacity` snapshots, dropping the oldest.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Snapshot) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// Take the recorded snapshots, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<Snapshot> {
        std::mem::take(&mut self.snapshots)
    }

    pub(crate) fn sample(&mut self, step: u64, system: &System) -> Result<()> {
        let snapshot = Snapshot {
            step,
            observation: self.probe.observe(system)?,
        };
        if let Some(cb) = self.callback.as_mut() {
            cb(&snapshot);
        }
        self.snapshots.push(snapshot);
        if let Some(cap) = self.capacity {
            let excess = self.snapshots.len().saturating_sub(cap);
            self.snapshots.drain(..excess);
        }
        Ok(())
    }
}

impl fmt::Debug for ExtAnalyze {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtAnalyze")
            .field("probe", &self.probe)
            .field("period", &self.period)
            .field("snapshots", &self.snapshots.len())
            .field("capacity", &self.capacity)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
