//! Integration tests for the coupled particle/fluid engine.

use approx::assert_relative_eq;
use lbmd::lbmd_lbm::{InitPopulation, LbError, LbParams};
use lbmd::lbmd_md::{BondPotential, CellGrid, DomainDecomposition, FixedPairList, Interaction, PairPotential, Particle};
use lbmd::{
    CapForce, Communicator, ExtAnalyze, Extension, LangevinThermostat, LbCoupling, Observation, Probe,
    SerialComm, SimError, System, ThreadComm, Vec3, VelocityVerlet,
};
use lbmd_math::OrthorhombicBox;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

const L: f64 = 10.0;
const SIDE: usize = 5;

fn run_ranks<F, T>(n: usize, f: F) -> Vec<T>
where
    F: Fn(ThreadComm) -> T + Send + Sync + 'static,
    T: Send + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = ThreadComm::create(n)
        .unwrap()
        .into_iter()
        .map(|comm| {
            let f = Arc::clone(&f);
            thread::spawn(move || f(comm))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

/// 5x5x5 jittered lattice with zero total momentum; identical on every rank.
fn lattice_particles() -> Vec<Particle> {
    let mut rng = StdRng::seed_from_u64(21);
    let mut particles = Vec::new();
    for k in 0..SIDE {
        for j in 0..SIDE {
            for i in 0..SIDE {
                let jitter = Vec3::new(
                    rng.gen_range(-0.2..0.2),
                    rng.gen_range(-0.2..0.2),
                    rng.gen_range(-0.2..0.2),
                );
                let v = Vec3::new(
                    rng.gen_range(-0.5..0.5),
                    rng.gen_range(-0.5..0.5),
                    rng.gen_range(-0.5..0.5),
                );
                let x = Vec3::new(i as f64, j as f64, k as f64) * 2.0 + Vec3::repeat(1.0) + jitter;
                particles.push(Particle::new(particles.len() as u64, 0, 1.0, x, v));
            }
        }
    }
    let drift = particles.iter().map(|p| p.v).sum::<Vec3>() / particles.len() as f64;
    for p in &mut particles {
        p.v -= drift;
    }
    particles
}

/// Harmonic bonds between x-neighbours of the lattice.
fn row_bonds() -> FixedPairList {
    (0..(SIDE * SIDE * SIDE) as u64)
        .filter(|id| id % SIDE as u64 != SIDE as u64 - 1)
        .map(|id| [id, id + 1])
        .collect()
}

fn build(comm: Box<dyn Communicator>, seed: u64) -> System {
    let grid = CellGrid::auto(OrthorhombicBox::cubic(L), comm.size(), 2.5, 0.3).unwrap();
    let mut system = System::new(grid, 1, comm, seed).unwrap();
    system
        .set_pair_potential(0, 0, PairPotential::lennard_jones_shifted(1.0, 1.0, 2.5))
        .unwrap();
    system
        .interactions
        .add(Interaction::FixedPair {
            list: row_bonds(),
            potential: lbmd::lbmd_md::Binding::Single(BondPotential::harmonic(10.0, 2.0)),
        })
        .unwrap();
    system.add_particles(lattice_particles()).unwrap();
    system
}

fn positions(system: &System) -> Vec<(u64, Vec3)> {
    let mut out: Vec<_> = system.storage.real_particles().map(|p| (p.id, p.x)).collect();
    out.sort_by_key(|&(id, _)| id);
    out
}

#[test]
fn test_momentum_conserved_without_thermostat() {
    let mut system = build(Box::new(SerialComm::new()), 1);
    let mut vv = VelocityVerlet::new(0.005).unwrap();
    for _ in 0..5 {
        vv.run(&mut system, 100).unwrap();
        assert_relative_eq!(system.total_momentum().unwrap(), Vec3::zeros(), epsilon = 1e-11);
    }
    assert_eq!(system.n_particles().unwrap(), 125);
    assert!(system.vlist.builds() > 1);
}

#[test]
fn test_single_particle_stays_put() {
    let grid = CellGrid::auto(OrthorhombicBox::cubic(L), 1, 2.5, 0.3).unwrap();
    let mut system = System::new(grid, 1, Box::new(SerialComm::new()), 0).unwrap();
    system
        .set_pair_potential(0, 0, PairPotential::lennard_jones(1.0, 1.0, 2.5))
        .unwrap();
    let x0 = Vec3::new(3.3, 4.4, 5.5);
    system
        .add_particles([Particle::new(0, 0, 1.0, x0, Vec3::zeros())])
        .unwrap();

    let mut vv = VelocityVerlet::new(0.005).unwrap();
    vv.run(&mut system, 1000).unwrap();
    let p = system.storage.real_particles().next().unwrap();
    assert_relative_eq!(p.x, x0, epsilon = 1e-14);
    assert_eq!(p.v, Vec3::zeros());
}

#[test]
fn test_harmonic_bond_in_system() {
    let grid = CellGrid::auto(OrthorhombicBox::cubic(L), 1, 2.5, 0.3).unwrap();
    let mut system = System::new(grid, 1, Box::new(SerialComm::new()), 0).unwrap();
    system
        .interactions
        .add(Interaction::FixedPair {
            list: [[0, 1]].into_iter().collect(),
            potential: lbmd::lbmd_md::Binding::Single(BondPotential::harmonic(4.0, 1.0)),
        })
        .unwrap();
    // bonded across the periodic boundary
    system
        .add_particles([
            Particle::new(0, 0, 1.0, Vec3::new(9.6, 5.0, 5.0), Vec3::zeros()),
            Particle::new(1, 0, 1.0, Vec3::new(0.6, 5.0, 5.0), Vec3::zeros()),
        ])
        .unwrap();
    system.decompose().unwrap();
    system.compute_forces().unwrap();
    for p in system.storage.real_particles() {
        assert_relative_eq!(p.f, Vec3::zeros(), epsilon = 1e-12);
    }

    system.storage.remove_particles(&[1]);
    system
        .add_particles([Particle::new(1, 0, 1.0, Vec3::new(0.85, 5.0, 5.0), Vec3::zeros())])
        .unwrap();
    system.decompose().unwrap();
    system.compute_forces().unwrap();
    let f0 = system.storage.real_particles().find(|p| p.id == 0).unwrap().f;
    assert_relative_eq!(f0, Vec3::new(4.0 * 0.25, 0.0, 0.0), epsilon = 1e-12);
}

#[test]
fn test_multirank_trajectory_matches_serial() {
    let mut serial = build(Box::new(SerialComm::new()), 1);
    let mut vv = VelocityVerlet::new(0.005).unwrap();
    vv.run(&mut serial, 100).unwrap();
    let reference = positions(&serial);
    let bc = OrthorhombicBox::cubic(L);

    for n in [2, 4, 8] {
        let results = run_ranks(n, |comm| {
            let mut system = build(Box::new(comm), 1);
            let mut vv = VelocityVerlet::new(0.005).unwrap();
            vv.run(&mut system, 100).unwrap();
            (positions(&system), system.total_momentum().unwrap())
        });
        let mut gathered: Vec<(u64, Vec3)> = results.iter().flat_map(|(p, _)| p.clone()).collect();
        gathered.sort_by_key(|&(id, _)| id);
        assert_eq!(gathered.len(), reference.len(), "{n} ranks lost particles");
        for ((id_a, xa), (id_b, xb)) in gathered.iter().zip(&reference) {
            assert_eq!(id_a, id_b);
            assert!(bc.separation(xa, xb).norm() < 1e-8, "particle {id_a} diverged on {n} ranks");
        }
        for (_, momentum) in &results {
            assert_relative_eq!(*momentum, Vec3::zeros(), epsilon = 1e-11);
        }
    }
}

#[test]
fn test_split_runs_equal_one_run() {
    let thermostat = || Extension::LangevinThermostat(LangevinThermostat::new(0.5, 1.0));

    let mut a = build(Box::new(SerialComm::new()), 9);
    let mut vv_a = VelocityVerlet::new(0.005).unwrap();
    vv_a.add_extension(thermostat()).unwrap();
    vv_a.run(&mut a, 30).unwrap();
    vv_a.run(&mut a, 70).unwrap();

    let mut b = build(Box::new(SerialComm::new()), 9);
    let mut vv_b = VelocityVerlet::new(0.005).unwrap();
    vv_b.add_extension(thermostat()).unwrap();
    vv_b.run(&mut b, 100).unwrap();

    assert_eq!(vv_a.step(), vv_b.step());
    assert_eq!(positions(&a), positions(&b));
}

#[test]
fn test_langevin_reaches_target_temperature() {
    let grid = CellGrid::auto(OrthorhombicBox::cubic(L), 1, 2.5, 0.3).unwrap();
    let mut system = System::new(grid, 1, Box::new(SerialComm::new()), 77).unwrap();
    system.add_particles(lattice_particles()).unwrap();

    let mut vv = VelocityVerlet::new(0.01).unwrap();
    vv.add_extension(Extension::LangevinThermostat(LangevinThermostat::new(1.0, 1.5)))
        .unwrap();
    vv.run(&mut system, 1000).unwrap();
    vv.add_extension(Extension::Analyze(ExtAnalyze::new(Probe::Temperature, 10)))
        .unwrap();
    vv.run(&mut system, 1000).unwrap();

    let Extension::Analyze(analyze) = &vv.extensions()[1] else {
        panic!("analysis extension missing");
    };
    let samples: Vec<f64> = analyze
        .snapshots()
        .iter()
        .map(|s| match s.observation {
            Observation::Scalar(t) => t,
            _ => panic!("temperature probe returned {:?}", s.observation),
        })
        .collect();
    assert_eq!(samples.len(), 100);
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    assert!((mean - 1.5).abs() < 0.15, "mean temperature {mean}");
}

#[test]
fn test_analysis_fires_on_period_with_callback() {
    let mut system = build(Box::new(SerialComm::new()), 1);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut vv = VelocityVerlet::new(0.005).unwrap();
    vv.add_extension(Extension::Analyze(
        ExtAnalyze::new(Probe::Temperature, 10).with_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    ))
    .unwrap();
    vv.run(&mut system, 55).unwrap();

    let Extension::Analyze(analyze) = &vv.extensions()[0] else {
        panic!("analysis extension missing");
    };
    let steps: Vec<u64> = analyze.snapshots().iter().map(|s| s.step).collect();
    assert_eq!(steps, vec![10, 20, 30, 40, 50]);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[test]
fn test_cell_grid_round_trip_is_idempotent() {
    let grid = CellGrid::auto(OrthorhombicBox::new(Vec3::new(10.0, 12.0, 9.0)), 4, 2.5, 0.3).unwrap();
    let json = serde_json::to_string(&grid).unwrap();
    let back: CellGrid = serde_json::from_str(&json).unwrap();
    assert_eq!(back, grid);

    let comm = SerialComm::new();
    let contents = |g: CellGrid| {
        let one = CellGrid::new(g.bc.clone(), [1, 1, 1], g.global_cells(), g.cutoff, g.skin).unwrap();
        let mut dd = DomainDecomposition::new(one, 0).unwrap();
        dd.add_particles(lattice_particles()).unwrap();
        dd.decompose(&comm).unwrap();
        dd.inner_cells()
            .iter()
            .map(|&c| dd.cell(c).iter().map(|p| p.id).collect::<Vec<_>>())
            .collect::<Vec<_>>()
    };
    assert_eq!(contents(grid), contents(back));
}

fn lb_system(comm: Box<dyn Communicator>, init: InitPopulation) -> (System, VelocityVerlet) {
    let mut params = LbParams::new([10, 10, 10]);
    params.gamma_b = 0.5;
    params.gamma_s = 0.5;
    fluid_system(build(comm, 5), params, init)
}

fn fluid_system(mut system: System, params: LbParams, init: InitPopulation) -> (System, VelocityVerlet) {
    let dt = 0.005;
    system.init_lb(params, dt, &init).unwrap();
    let mut vv = VelocityVerlet::new(dt).unwrap();
    vv.add_extension(Extension::LatticeBoltzmann(LbCoupling { period: 1 }))
        .unwrap();
    (system, vv)
}

fn empty_system() -> System {
    let grid = CellGrid::auto(OrthorhombicBox::cubic(L), 1, 2.5, 0.3).unwrap();
    System::new(grid, 1, Box::new(SerialComm::new()), 0).unwrap()
}

/// Particle momentum, the pending half kick, and fluid momentum, in MD units.
fn coupled_momentum(system: &System, dt: f64) -> Vec3 {
    let lb = system.lb().unwrap();
    let (_, j) = lb.mass_and_momentum(system.comm()).unwrap();
    let local: Vec3 = system
        .storage
        .real_particles()
        .map(|p| p.momentum() + 0.5 * dt * p.f)
        .sum();
    let total = system
        .comm()
        .all_reduce_vec(&[local.x, local.y, local.z], lbmd::lbmd_comm::ReduceOp::Sum)
        .unwrap();
    Vec3::new(total[0], total[1], total[2]) + lb.to_md_momentum(j)
}

#[test]
fn test_uniform_fluid_stays_in_equilibrium() {
    let (mut system, mut vv) = fluid_system(
        empty_system(),
        LbParams::new([10, 10, 10]),
        InitPopulation::Uniform {
            density: 1.0,
            velocity: Vec3::zeros(),
        },
    );
    vv.run(&mut system, 200).unwrap();

    let lb = system.lb().unwrap();
    assert_eq!(lb.step(), 200);
    for site in [[0, 0, 0], [4, 7, 1], [9, 9, 9]] {
        assert_relative_eq!(lb.density(site).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(lb.velocity(site).unwrap(), Vec3::zeros(), epsilon = 1e-14);
    }
}

#[test]
fn test_repeated_preparation_does_not_feed_fluid_twice() {
    let coupled = |warm_up: bool| {
        let mut system = empty_system();
        system
            .add_particles([Particle::new(0, 0, 1.0, Vec3::new(4.2, 5.1, 6.3), Vec3::new(1.0, 0.0, 0.0))])
            .unwrap();
        let (mut system, mut vv) = fluid_system(
            system,
            LbParams::new([10, 10, 10]),
            InitPopulation::Uniform {
                density: 1.0,
                velocity: Vec3::zeros(),
            },
        );
        if warm_up {
            vv.run(&mut system, 0).unwrap();
            vv.recompute_forces(&mut system).unwrap();
        }
        vv.run(&mut system, 1).unwrap();
        let (_, j) = system.lb().unwrap().mass_and_momentum(system.comm()).unwrap();
        (coupled_momentum(&system, vv.dt), j)
    };

    let (p_once, j_once) = coupled(false);
    let (p_again, j_again) = coupled(true);
    assert_relative_eq!(j_again, j_once, epsilon = 1e-14);
    assert_relative_eq!(p_again, p_once, epsilon = 1e-12);
}

#[test]
fn test_coupled_fluid_conserves_mass_and_momentum() {
    let dt = 0.005;
    let (mut system, mut vv) = lb_system(
        Box::new(SerialComm::new()),
        InitPopulation::Uniform {
            density: 1.0,
            velocity: Vec3::zeros(),
        },
    );
    vv.run(&mut system, 1).unwrap();
    let (m0, _) = system.lb().unwrap().mass_and_momentum(system.comm()).unwrap();
    let q0 = coupled_momentum(&system, dt);

    for _ in 0..50 {
        vv.run(&mut system, 1).unwrap();
        let (m, _) = system.lb().unwrap().mass_and_momentum(system.comm()).unwrap();
        assert_relative_eq!(m, m0, epsilon = 1e-9);
    }
    assert_relative_eq!(coupled_momentum(&system, dt), q0, epsilon = 1e-10);
}

#[test]
fn test_coupled_fluid_conserves_momentum_on_two_ranks() {
    let dt = 0.005;
    let results = run_ranks(2, move |comm| {
        let (mut system, mut vv) = lb_system(
            Box::new(comm),
            InitPopulation::Uniform {
                density: 1.0,
                velocity: Vec3::zeros(),
            },
        );
        vv.run(&mut system, 1).unwrap();
        let q0 = coupled_momentum(&system, dt);
        vv.run(&mut system, 40).unwrap();
        (q0, coupled_momentum(&system, dt))
    });
    for (q0, q) in results {
        assert_relative_eq!(q, q0, epsilon = 1e-10);
    }
}

#[test]
fn test_wave_probes_decay() {
    let (mut system, mut vv) = fluid_system(
        empty_system(),
        LbParams::new([10, 10, 10]),
        InitPopulation::Wave {
            density: 1.0,
            amplitude: 0.01,
        },
    );
    vv.add_extension(Extension::Analyze(ExtAnalyze::new(Probe::LbVzAtSite { site: None }, 20)))
        .unwrap();
    vv.add_extension(Extension::Analyze(ExtAnalyze::new(Probe::LbVzProfileAlongX, 100)))
        .unwrap();
    vv.add_extension(Extension::Analyze(ExtAnalyze::new(Probe::LbFlux, 100)))
        .unwrap();
    vv.run(&mut system, 100).unwrap();

    let Extension::Analyze(site) = &vv.extensions()[1] else {
        panic!("site probe missing");
    };
    let vz: Vec<f64> = site
        .snapshots()
        .iter()
        .map(|s| match s.observation {
            Observation::Scalar(v) => v,
            _ => f64::NAN,
        })
        .collect();
    assert_eq!(vz.len(), 5);
    assert!(vz.windows(2).all(|w| w[1] < w[0]) && vz[4] > 0.0, "{vz:?}");

    let Extension::Analyze(profile) = &vv.extensions()[2] else {
        panic!("profile probe missing");
    };
    match &profile.latest().unwrap().observation {
        Observation::Profile(p) => {
            assert_eq!(p.len(), 10);
            assert_relative_eq!(p[2], vz[4], epsilon = 1e-14);
            assert_relative_eq!(p[7], -vz[4], epsilon = 1e-14);
        }
        other => panic!("unexpected {other:?}"),
    }

    let Extension::Analyze(flux) = &vv.extensions()[3] else {
        panic!("flux probe missing");
    };
    match &flux.latest().unwrap().observation {
        Observation::Flux { mass, momentum } => {
            assert_relative_eq!(*mass, 1000.0, epsilon = 1e-9);
            assert_relative_eq!(*momentum, Vec3::zeros(), epsilon = 1e-12);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_sampling_site_outside_lattice_fails() {
    let (mut system, mut vv) = fluid_system(
        empty_system(),
        LbParams::new([10, 10, 10]),
        InitPopulation::Uniform {
            density: 1.0,
            velocity: Vec3::zeros(),
        },
    );
    vv.add_extension(Extension::Analyze(ExtAnalyze::new(
        Probe::LbVzAtSite { site: Some([10, 0, 0]) },
        5,
    )))
    .unwrap();

    let err = vv.run(&mut system, 5).unwrap_err();
    assert!(
        matches!(err, SimError::AtStep { step: 5, .. }),
        "unexpected {err:?}"
    );
    assert!(matches!(
        err.root(),
        SimError::Lb(LbError::SiteOutsideLattice { .. })
    ));
}

#[test]
fn test_cap_force_tames_overlap() {
    let grid = CellGrid::auto(OrthorhombicBox::cubic(L), 1, 2.5, 0.3).unwrap();
    let mut system = System::new(grid, 1, Box::new(SerialComm::new()), 0).unwrap();
    system
        .set_pair_potential(0, 0, PairPotential::lennard_jones_shifted(1.0, 1.0, 2.5))
        .unwrap();
    system
        .add_particles([
            Particle::new(0, 0, 1.0, Vec3::new(5.0, 5.0, 5.0), Vec3::zeros()),
            Particle::new(1, 0, 1.0, Vec3::new(5.3, 5.0, 5.0), Vec3::zeros()),
        ])
        .unwrap();
    let mut vv = VelocityVerlet::new(0.001).unwrap();
    vv.add_extension(Extension::CapForce(CapForce::new(100.0))).unwrap();
    vv.run(&mut system, 200).unwrap();
    assert!(system.kinetic_energy().unwrap().is_finite());
    assert_relative_eq!(system.total_momentum().unwrap(), Vec3::zeros(), epsilon = 1e-10);
}
