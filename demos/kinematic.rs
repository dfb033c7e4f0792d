use log::info;
use nalgebra::{SMatrix, SVector, matrix, vector};
use tinympc_admm::{
    Config, Error, Mpc, Problem, RhoAdaptation,
    cache::ArrayCache,
    project::{Box, Project},
};

type Float = f64;

const HU: usize = 19;
const HX: usize = HU + 1;

const NX: usize = 3;
const NU: usize = 1;

const DT: Float = 0.2;
const DD: Float = 0.5 * DT * DT;

const LP: Float = 0.5;

const A: SMatrix<Float, NX, NX> = matrix![
    1., DT, DD;
    0., 1., DT;
    0., 0., LP;
];

const B: SMatrix<Float, NX, NU> = vector![0., 0., (1. - LP)];

const Q: SVector<Float, NX> = vector! {5., 0., 0.};
const R: SVector<Float, NU> = vector! {1.,};
const RHO: Float = 2.0;

fn main() -> Result<(), Error> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .without_timestamps()
        .init()
        .ok();

    const NUM_CACHES: usize = 5;
    type Cache = ArrayCache<Float, NX, NU, NUM_CACHES>;
    type Solver = Mpc<Float, Cache, NX, NU, HX, HU>;

    let config = Config::default()
        .with_max_iter(400)
        .with_tolerances(0.05, 0.02)
        .with_adaptive_rho(RhoAdaptation::default());

    // Velocity limiter
    let x_projector = Box::new()
        .with_upper(vector![None, Some(0.3), None])
        .with_lower(vector![None, Some(-0.3), None]);

    // Actuation limiter
    let u_projector = Box::symmetric(vector![0.15]);

    let problem = Problem::from_diagonal(A, B, &Q, &R)?;
    let mut mpc = Solver::new(problem, RHO, config)?
        .with_x_constraints(x_projector)
        .with_u_constraints(u_projector);

    info!("Size of MPC object: {} bytes", core::mem::size_of_val(&mpc));

    let mut x_now = SVector::zeros();
    let mut x_ref = SMatrix::<Float, NX, HX>::zeros();

    let mut total_iters = 0;
    for k in 0..=300 {
        // Square wave reference on the position
        for i in 0..HX {
            x_ref[(0, i)] = if ((i + k) / 100) % 2 == 0 { 1. } else { -1. };
        }

        let time = std::time::Instant::now();

        mpc.set_initial_state(x_now);
        mpc.set_x_reference(&x_ref);
        let solution = mpc.solve();

        total_iters += solution.iterations;

        info!(
            "{}: Got solution: {:?} in {} ms in {} iters ({:?})",
            k,
            solution.u_now().as_slice(),
            time.elapsed().as_micros() as f32 / 1e3,
            solution.iterations,
            solution.status,
        );

        // Apply the bounded input to the system
        let mut u_now = solution.u_now();
        u_projector.project(u_now.as_view_mut());
        x_now = A * x_now + B * u_now;
    }

    info!("Total iterations: {total_iters}, final rho: {}", mpc.rho());

    Ok(())
}
