//! The decomposed fluid on several in-process ranks must reproduce a
//! single-rank run site by site.

use approx::assert_relative_eq;
use lbmd_comm::{Communicator, SerialComm, ThreadComm};
use lbmd_lbm::{BodyForce, InitPopulation, LatticeBoltzmann, LbParams};
use lbmd_math::{Int3, OrthorhombicBox, Vec3};
use lbmd_md::{CellGrid, DomainDecomposition, Particle};
use std::sync::Arc;
use std::thread;

const N: usize = 8;
const STEPS: usize = 15;

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

fn params() -> LbParams {
    let mut p = LbParams::new([N, N, N]);
    p.gamma_b = 0.2;
    p.gamma_s = 0.4;
    p
}

fn fluid(comm: &dyn Communicator, node_grid: Int3) -> LatticeBoltzmann {
    let mut lb = LatticeBoltzmann::new(
        params(),
        &OrthorhombicBox::cubic(N as f64),
        node_grid,
        comm.rank(),
        0.05,
        11,
    )
    .unwrap();
    lb.initialize(
        &InitPopulation::Wave {
            density: 1.0,
            amplitude: 0.02,
        },
        comm,
    )
    .unwrap();
    lb.set_force(BodyForce::SineAlongX {
        amplitude: Vec3::new(0.0, 1e-4, 0.0),
    });
    lb.add_force(BodyForce::PeriodicInTime {
        amplitude: Vec3::new(2e-5, 0.0, 0.0),
        period: 6,
    });
    lb
}

/// Velocity at every site after `STEPS` steps, gathered by summation.
fn velocities(lb: &LatticeBoltzmann, comm: &dyn Communicator) -> Vec<f64> {
    let mut local = vec![0.0; 3 * N * N * N];
    for z in 0..N {
        for y in 0..N {
            for x in 0..N {
                if let Some(u) = lb.velocity([x, y, z]) {
                    let i = 3 * (x + N * (y + N * z));
                    local[i..i + 3].copy_from_slice(&[u.x, u.y, u.z]);
                }
            }
        }
    }
    comm.all_reduce_vec(&local, lbmd_comm::ReduceOp::Sum).unwrap()
}

fn serial_reference() -> (Vec<f64>, Vec<f64>) {
    let comm = SerialComm::new();
    let mut lb = fluid(&comm, [1, 1, 1]);
    for _ in 0..STEPS {
        lb.step_lattice(&comm).unwrap();
    }
    (velocities(&lb, &comm), lb.vz_profile_along_x(&comm).unwrap())
}

#[test]
fn test_decomposed_fluid_matches_serial() {
    let (reference, profile) = serial_reference();
    for node_grid in [[2, 1, 1], [1, 2, 2], [2, 2, 2]] {
        let n = node_grid.iter().product();
        let results = run_ranks(n, move |comm| {
            let mut lb = fluid(&comm, node_grid);
            for _ in 0..STEPS {
                lb.step_lattice(&comm).unwrap();
            }
            (velocities(&lb, &comm), lb.vz_profile_along_x(&comm).unwrap())
        });
        for (u, p) in results {
            for (a, b) in u.iter().zip(&reference) {
                assert_relative_eq!(a, b, epsilon = 1e-13);
            }
            for (a, b) in p.iter().zip(&profile) {
                assert_relative_eq!(a, b, epsilon = 1e-13);
            }
        }
    }
}

#[test]
fn test_coupling_deposit_crosses_rank_boundary() {
    let results = run_ranks(2, |comm| {
        let bc = OrthorhombicBox::cubic(N as f64);
        let mut lb = LatticeBoltzmann::new(LbParams::new([N, N, N]), &bc, [2, 1, 1], comm.rank(), 0.05, 1).unwrap();
        lb.initialize(
            &InitPopulation::Uniform {
                density: 1.0,
                velocity: Vec3::zeros(),
            },
            &comm,
        )
        .unwrap();

        let grid = CellGrid::new(bc, [2, 1, 1], [2, 4, 4], 1.5, 0.3).unwrap();
        let mut storage = DomainDecomposition::new(grid, comm.rank()).unwrap();
        // just left of the rank boundary at x = 4
        storage
            .add_particles([Particle::new(0, 0, 1.0, Vec3::new(3.9, 2.0, 2.0), Vec3::new(0.5, 0.0, 0.0))])
            .unwrap();
        storage.decompose(&comm).unwrap();

        let (_, j0) = lb.mass_and_momentum(&comm).unwrap();
        let dp = lb.couple_particles(&mut storage, 0.01).unwrap();
        let dp = comm.all_reduce_vec(&[dp.x, dp.y, dp.z], lbmd_comm::ReduceOp::Sum).unwrap();
        lb.step_lattice(&comm).unwrap();
        let (_, j1) = lb.mass_and_momentum(&comm).unwrap();
        (Vec3::new(dp[0], dp[1], dp[2]), (j1 - j0) * lb.spacing() / lb.tau())
    });

    for (dp, dj) in results {
        assert!(dp.x < 0.0);
        assert_relative_eq!(dp + dj, Vec3::zeros(), epsilon = 1e-12);
    }
}
