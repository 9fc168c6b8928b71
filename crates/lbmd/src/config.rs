//! JSON simulation setup.
//!
//! A [`SimulationConfig`] carries everything a front end supplies: box,
//! decomposition, potentials, fixed topology, fluid and the ordered list of
//! extensions. Every rank reads the same document and builds its own part.

use crate::analysis::{ExtAnalyze, Probe};
use crate::error::{Result, SimError};
use crate::extension::{CapForce, Extension, LangevinThermostat, LbCoupling};
use crate::integrator::VelocityVerlet;
use crate::system::System;
use lbmd_comm::Communicator;
use lbmd_lbm::{BodyForce, InitPopulation, LbParams};
use lbmd_math::{Int3, OrthorhombicBox, Vec3};
use lbmd_md::{
    AngularPotential, Binding, BondPotential, CellGrid, DihedralPotential, FixedPairList,
    FixedQuadrupleAngleList, FixedQuadrupleList, FixedTripleList, Interaction, PairPotential,
    TypeTable, polymer_random_walk,
};
use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_skin() -> f64 {
    0.3
}

fn default_n_types() -> u32 {
    1
}

fn default_mass() -> f64 {
    1.0
}

/// A non-bonded potential for one unordered type pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairEntry {
    pub types: [u32; 2],
    pub potential: PairPotential,
}

/// A potential for one type tuple of a fixed-tuple interaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypedPotential<P> {
    pub types: Vec<u32>,
    pub potential: P,
}

/// Either one potential for every tuple, or a list keyed by particle types.
///
/// In JSON a single potential is an object and a type table is an array of
/// `{"types": [...], "potential": {...}}` entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PotentialBinding<P> {
    Single(P),
    ByTypes(Vec<TypedPotential<P>>),
}

impl<P: Clone> PotentialBinding<P> {
    fn build<const N: usize>(&self, n_types: u32) -> Result<Binding<P, N>> {
        match self {
            PotentialBinding::Single(p) => Ok(Binding::Single(p.clone())),
            PotentialBinding::ByTypes(entries) => {
                let mut table = TypeTable::new(n_types);
                for entry in entries {
                    let types: [u32; N] = entry.types.as_slice().try_into().map_err(|_| {
                        SimError::Config(format!("type tuple {:?} needs {} entries", entry.types, N))
                    })?;
                    table.insert(types, entry.potential.clone())?;
                }
                Ok(Binding::ByTypes(table))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BondEntry {
    pub list: FixedPairList,
    pub potential: PotentialBinding<BondPotential>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AngleEntry {
    pub list: FixedTripleList,
    pub potential: PotentialBinding<AngularPotential>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DihedralEntry {
    pub list: FixedQuadrupleList,
    pub potential: PotentialBinding<DihedralPotential>,
}

/// Dihedrals evaluated relative to a per-quadruple reference angle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuadrupleAngleEntry {
    pub list: FixedQuadrupleAngleList,
    pub potential: PotentialBinding<DihedralPotential>,
}

/// Random-walk polymer melt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolymerConfig {
    pub chains: usize,
    pub monomers: usize,
    pub bond_length: f64,
    #[serde(default)]
    pub ptype: u32,
    #[serde(default = "default_mass")]
    pub mass: f64,
    /// Potential on consecutive monomers.
    pub bond: BondPotential,
    /// Optional potential on consecutive triples.
    #[serde(default)]
    pub angle: Option<AngularPotential>,
    /// Initial temperature; zero leaves the chains at rest.
    #[serde(default)]
    pub temperature: f64,
}

/// Fluid setup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LbConfig {
    #[serde(flatten)]
    pub params: LbParams,
    pub init: InitPopulation,
    /// Body forces, summed.
    #[serde(default)]
    pub forces: Vec<BodyForce>,
}

/// Extension entries, in registration order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtensionConfig {
    LangevinThermostat(LangevinThermostat),
    CapForce(CapForce),
    LatticeBoltzmann(LbCoupling),
    Analyze {
        probe: Probe,
        period: u64,
        /// Snapshots kept between drains; unbounded when absent.
        #[serde(default)]
        capacity: Option<usize>,
    },
}

impl ExtensionConfig {
    pub fn build(&self) -> Extension {
        match self {
            ExtensionConfig::LangevinThermostat(t) => Extension::LangevinThermostat(t.clone()),
            ExtensionConfig::CapForce(c) => Extension::CapForce(c.clone()),
            ExtensionConfig::LatticeBoltzmann(l) => Extension::LatticeBoltzmann(l.clone()),
            ExtensionConfig::Analyze {
                probe,
                period,
                capacity,
            } => {
                let ext = ExtAnalyze::new(probe.clone(), *period);
                Extension::Analyze(match capacity {
                    Some(cap) => ext.with_capacity(*cap),
                    None => ext,
                })
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    pub box_size: Vec3,
    /// Ranks per dimension; chosen automatically when absent.
    #[serde(default)]
    pub node_grid: Option<Int3>,
    /// Inner cells per rank; chosen automatically when absent.
    #[serde(default)]
    pub cell_grid: Option<Int3>,
    pub cutoff: f64,
    #[serde(default = "default_skin")]
    pub skin: f64,
    pub dt: f64,
    /// Shared seed; each rank's noise uses `seed + rank`.
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_n_types")]
    pub n_types: u32,
    #[serde(default)]
    pub pair_potentials: Vec<PairEntry>,
    #[serde(default)]
    pub bonds: Vec<BondEntry>,
    #[serde(default)]
    pub angles: Vec<AngleEntry>,
    #[serde(default)]
    pub dihedrals: Vec<DihedralEntry>,
    #[serde(default)]
    pub quadruple_angles: Vec<QuadrupleAngleEntry>,
    #[serde(default)]
    pub polymers: Option<PolymerConfig>,
    #[serde(default)]
    pub lb: Option<LbConfig>,
    #[serde(default)]
    pub extensions: Vec<ExtensionConfig>,
}

impl SimulationConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks that need the whole document; per-component checks happen
    /// when the pieces are built.
    pub fn validate(&self) -> Result<()> {
        let config = |msg: String| Err(SimError::Config(msg));

        if !(self.dt > 0.0) {
            return config(format!("time step must be positive, got {}", self.dt));
        }
        if !(self.cutoff > 0.0 && self.skin >= 0.0) {
            return config(format!(
                "cutoff must be positive and skin non-negative (cutoff = {}, skin = {})",
                self.cutoff, self.skin
            ));
        }
        if self.box_size.iter().any(|&l| !(l > 0.0)) {
            return config(format!("box size {:?} must be positive", self.box_size.as_slice()));
        }
        for entry in &self.pair_potentials {
            if entry.potential.cutoff() > self.cutoff {
                return config(format!(
                    "pair potential for types {:?} reaches {} beyond the cutoff {}",
                    entry.types,
                    entry.potential.cutoff(),
                    self.cutoff
                ));
            }
        }

        let lb_periods = self
            .extensions
            .iter()
            .filter(|e| matches!(e, ExtensionConfig::LatticeBoltzmann(_)))
            .count();
        match (&self.lb, lb_periods) {
            (Some(_), 1) | (None, 0) => {}
            (Some(_), 0) => return config("fluid configured without a lattice_boltzmann extension".into()),
            (None, _) => return config("lattice_boltzmann extension without a fluid".into()),
            (Some(_), _) => return config("more than one lattice_boltzmann extension".into()),
        }
        for ext in &self.extensions {
            if let ExtensionConfig::Analyze { probe, .. } = ext {
                match (probe, &self.lb) {
                    (_, None) if probe.needs_lb() => {
                        return config(format!("probe {probe:?} needs a fluid"));
                    }
                    (Probe::LbVzAtSite { site: Some(site) }, Some(lb))
                        if (0..3).any(|d| site[d] >= lb.params.lattice[d]) =>
                    {
                        return config(format!(
                            "sampling site {site:?} is outside the {:?} lattice",
                            lb.params.lattice
                        ));
                    }
                    _ => {}
                }
            }
            ext.build().validate()?;
        }
        Ok(())
    }

    fn lb_period(&self) -> u64 {
        self.extensions
            .iter()
            .find_map(|e| match e {
                ExtensionConfig::LatticeBoltzmann(l) => Some(l.period),
                _ => None,
            })
            .unwrap_or(1)
    }

    /// Build this rank's system and integrator.
    pub fn build_system(&self, comm: Box<dyn Communicator>) -> Result<(System, VelocityVerlet)> {
        self.validate()?;
        let bc = OrthorhombicBox::new(self.box_size);
        let n_ranks = comm.size();
        let grid = match (self.node_grid, self.cell_grid) {
            (Some(nodes), Some(cells)) => CellGrid::new(bc, nodes, cells, self.cutoff, self.skin)?,
            (Some(nodes), None) => {
                let cells = lbmd_md::decomp::cell_grid(&bc, nodes, self.cutoff, self.skin)?;
                CellGrid::new(bc, nodes, cells, self.cutoff, self.skin)?
            }
            (None, Some(_)) => {
                return Err(SimError::Config("cell_grid given without node_grid".into()));
            }
            (None, None) => CellGrid::auto(bc, n_ranks, self.cutoff, self.skin)?,
        };

        let mut system = System::new(grid, self.n_types, comm, self.seed)?;
        for entry in &self.pair_potentials {
            let [t1, t2] = entry.types;
            system.set_pair_potential(t1, t2, entry.potential.clone())?;
        }
        let n_types = self.n_types;
        for b in &self.bonds {
            system.interactions.add(Interaction::FixedPair {
                list: b.list.clone(),
                potential: b.potential.build(n_types)?,
            })?;
        }
        for a in &self.angles {
            system.interactions.add(Interaction::FixedTriple {
                list: a.list.clone(),
                potential: a.potential.build(n_types)?,
            })?;
        }
        for d in &self.dihedrals {
            system.interactions.add(Interaction::FixedQuadruple {
                list: d.list.clone(),
                potential: d.potential.build(n_types)?,
            })?;
        }
        for q in &self.quadruple_angles {
            system.interactions.add(Interaction::FixedQuadrupleAngle {
                list: q.list.clone(),
                potential: q.potential.build(n_types)?,
            })?;
        }

        if let Some(poly) = &self.polymers {
            self.add_polymers(&mut system, poly)?;
        }

        let mut integrator = VelocityVerlet::new(self.dt)?;
        if let Some(lb) = &self.lb {
            let tau = self.dt * self.lb_period() as f64;
            system.init_lb(lb.params.clone(), tau, &lb.init)?;
            if let Some(fluid) = system.lb.as_mut() {
                for f in &lb.forces {
                    fluid.add_force(f.clone());
                }
            }
        }
        for ext in &self.extensions {
            integrator.add_extension(ext.build())?;
        }
        info!(
            "rank {}: built system with {} interactions and {} extensions",
            system.rank(),
            system.interactions.interactions().len(),
            integrator.extensions().len()
        );
        Ok((system, integrator))
    }

    fn add_polymers(&self, system: &mut System, poly: &PolymerConfig) -> Result<()> {
        // identical on every rank
        let mut rng = StdRng::seed_from_u64(self.seed);
        let topo = polymer_random_walk(
            &mut rng,
            system.bc(),
            poly.chains,
            poly.monomers,
            poly.bond_length,
            0,
            poly.ptype,
            poly.mass,
        );
        system.add_particles(topo.particles)?;
        system.interactions.add(Interaction::FixedPair {
            list: topo.bonds,
            potential: Binding::Single(poly.bond.clone()),
        })?;
        if let Some(angle) = &poly.angle {
            system.interactions.add(Interaction::FixedTriple {
                list: topo.angles,
                potential: Binding::Single(angle.clone()),
            })?;
        }
        if poly.temperature > 0.0 {
            system.thermalize(poly.temperature)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lbmd_comm::SerialComm;

    const MELT: &str = r#"{
        "box_size": [10.0, 10.0, 10.0],
        "cutoff": 1.122462048309373,
        "dt": 0.005,
        "seed": 4,
        "pair_potentials": [
            {"types": [0, 0], "potential": {"kind": "lennard_jones", "epsilon": 1.0, "sigma": 1.0, "cutoff": 1.122462048309373, "shift": 1.0}}
        ],
        "polymers": {
            "chains": 3, "monomers": 10, "bond_length": 0.97,
            "bond": {"kind": "fene", "k": 30.0, "r_max": 1.5, "r0": 0.0}
        },
        "lb": {
            "lattice": [10, 10, 10], "gamma_b": 0.5, "gamma_s": 0.5,
            "init": {"kind": "uniform", "density": 1.0, "velocity": [0.0, 0.0, 0.0]}
        },
        "extensions": [
            {"kind": "cap_force", "max": 1000.0},
            {"kind": "langevin_thermostat", "gamma": 1.0, "temperature": 1.2},
            {"kind": "lattice_boltzmann", "period": 2},
            {"kind": "analyze", "probe": {"kind": "temperature"}, "period": 5}
        ]
    }"#;

    #[test]
    fn test_parse_and_build() {
        let config = SimulationConfig::from_json(MELT).unwrap();
        assert_eq!(config.skin, 0.3);
        assert_eq!(config.extensions.len(), 4);

        let (system, vv) = config.build_system(Box::new(SerialComm::new())).unwrap();
        assert_eq!(system.n_particles().unwrap(), 30);
        assert_eq!(vv.extensions().len(), 4);
        let lb = system.lb().unwrap();
        assert!((lb.tau() - 0.01).abs() < 1e-15);
        assert_eq!(lb.params().gamma_s, 0.5);
    }

    const TYPED: &str = r#"{
        "box_size": [8.0, 8.0, 8.0],
        "cutoff": 1.5,
        "dt": 0.002,
        "n_types": 2,
        "polymers": {
            "chains": 1, "monomers": 4, "bond_length": 0.97,
            "bond": {"kind": "harmonic", "k": 50.0, "r0": 0.97}
        },
        "angles": [
            {"list": [[0, 1, 2], [1, 2, 3]],
             "potential": [{"types": [0, 0, 0], "potential": {"kind": "cosine", "k": 1.0, "theta0": 2.0}}]}
        ],
        "quadruple_angles": [
            {"list": {"quadruples": [[0, 1, 2, 3]], "reference": [0.5]},
             "potential": {"kind": "harmonic", "k": 3.0, "phi0": 0.0}}
        ]
    }"#;

    #[test]
    fn test_type_tables_and_reference_dihedrals() {
        let config = SimulationConfig::from_json(TYPED).unwrap();
        assert!(matches!(config.angles[0].potential, PotentialBinding::ByTypes(_)));
        let (mut system, mut vv) = config.build_system(Box::new(SerialComm::new())).unwrap();

        let kinds: Vec<_> = system
            .interactions
            .interactions()
            .iter()
            .map(|i| match i {
                Interaction::FixedTriple {
                    potential: Binding::ByTypes(_),
                    ..
                } => "triple by types",
                Interaction::FixedQuadrupleAngle {
                    potential: Binding::Single(_),
                    ..
                } => "reference dihedral",
                _ => "other",
            })
            .collect();
        assert!(kinds.contains(&"triple by types"));
        assert!(kinds.contains(&"reference dihedral"));

        vv.run(&mut system, 10).unwrap();
        assert!(system.potential_energy().unwrap().is_finite());
        assert_eq!(SimulationConfig::from_json(&config.to_json().unwrap()).unwrap(), config);

        let wrong_arity = TYPED.replace(r#""types": [0, 0, 0]"#, r#""types": [0, 0]"#);
        let config = SimulationConfig::from_json(&wrong_arity).unwrap();
        assert!(matches!(
            config.build_system(Box::new(SerialComm::new())),
            Err(SimError::Config(_))
        ));
        let bad_type = TYPED.replace(r#""types": [0, 0, 0]"#, r#""types": [0, 2, 0]"#);
        let config = SimulationConfig::from_json(&bad_type).unwrap();
        assert!(matches!(
            config.build_system(Box::new(SerialComm::new())),
            Err(SimError::Md(_))
        ));
    }

    #[test]
    fn test_round_trip() {
        let config = SimulationConfig::from_json(MELT).unwrap();
        let back = SimulationConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_rejects_inconsistent_documents() {
        let no_lb_ext = MELT.replace(r#"{"kind": "lattice_boltzmann", "period": 2},"#, "");
        assert!(matches!(
            SimulationConfig::from_json(&no_lb_ext),
            Err(SimError::Config(_))
        ));

        let zero_period = MELT.replace(r#""period": 5"#, r#""period": 0"#);
        assert!(matches!(
            SimulationConfig::from_json(&zero_period),
            Err(SimError::Config(_))
        ));

        let typo = MELT.replace("\"seed\"", "\"sead\"");
        assert!(matches!(SimulationConfig::from_json(&typo), Err(SimError::Json(_))));

        let far_site = MELT.replace(
            r#"{"kind": "temperature"}"#,
            r#"{"kind": "lb_vz_at_site", "site": [2, 10, 0]}"#,
        );
        assert!(matches!(
            SimulationConfig::from_json(&far_site),
            Err(SimError::Config(_))
        ));

        let long_pair = MELT.replace(r#""cutoff": 1.122462048309373, "shift""#, r#""cutoff": 2.5, "shift""#);
        assert!(matches!(
            SimulationConfig::from_json(&long_pair),
            Err(SimError::Config(_))
        ));
    }
}
