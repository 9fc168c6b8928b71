//! Polymer melt coupled to a fluctuating lattice-Boltzmann fluid.
//!
//! Run with `RUST_LOG=info cargo run --release --example lb_md`.

use lbmd::{Extension, Observation, SerialComm, SimulationConfig};

const CONFIG: &str = r#"{
    "box_size": [20.0, 20.0, 20.0],
    "cutoff": 2.244924096618746,
    "skin": 0.3,
    "dt": 0.005,
    "seed": 12345,
    "pair_potentials": [
        {"types": [0, 0], "potential": {"kind": "lennard_jones", "epsilon": 1.0, "sigma": 1.0, "cutoff": 2.244924096618746}}
    ],
    "polymers": {
        "chains": 10, "monomers": 50, "bond_length": 0.97, "temperature": 1.2,
        "bond": {"kind": "fene", "k": 30.0, "r_max": 1.5, "r0": 0.0}
    },
    "lb": {
        "lattice": [20, 20, 20], "gamma_b": 0.5, "gamma_s": 0.5, "kt": 0.000025,
        "friction": 5.0, "coupling_kt": 1.2,
        "init": {"kind": "uniform", "density": 1.0, "velocity": [0.0, 0.0, 0.0]}
    },
    "extensions": [
        {"kind": "cap_force", "max": 10000.0},
        {"kind": "lattice_boltzmann", "period": 1},
        {"kind": "analyze", "probe": {"kind": "temperature"}, "period": 100},
        {"kind": "analyze", "probe": {"kind": "lb_flux"}, "period": 100}
    ]
}"#;

fn main() -> lbmd::Result<()> {
    env_logger::init();

    let config = SimulationConfig::from_json(CONFIG)?;
    let (mut system, mut integrator) = config.build_system(Box::new(SerialComm::new()))?;
    println!(
        "{} monomers, lattice {:?}, spacing {}",
        system.n_particles()?,
        system.lb()?.lattice(),
        system.lb()?.spacing()
    );

    for _ in 0..10 {
        integrator.run(&mut system, 100)?;
        for ext in integrator.extensions_mut() {
            if let Extension::Analyze(analyze) = ext {
                for snap in analyze.drain() {
                    match snap.observation {
                        Observation::Scalar(t) => println!("step {:5}  T = {t:.4}", snap.step),
                        Observation::Flux { mass, momentum } => println!(
                            "step {:5}  fluid mass = {mass:.3}  momentum = [{:.3e}, {:.3e}, {:.3e}]",
                            snap.step, momentum.x, momentum.y, momentum.z
                        ),
                        Observation::Profile(_) => {}
                    }
                }
            }
        }
    }

    println!(
        "E_pot = {:.4}, E_kin = {:.4}, virial = {:.4}",
        system.potential_energy()?,
        system.kinetic_energy()?,
        system.virial()?
    );
    Ok(())
}
