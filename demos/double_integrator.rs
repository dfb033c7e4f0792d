use log::info;
use nalgebra::{matrix, vector};
use tinympc_admm::{Config, Error, Mpc, Problem, SingleCache, project::Box};

const NX: usize = 2;
const NU: usize = 1;
const HU: usize = 10;
const HX: usize = HU + 1;

fn main() -> Result<(), Error> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .without_timestamps()
        .init()
        .ok();

    let problem = Problem::from_diagonal(
        matrix![1.0, 1.0; 0.0, 1.0],
        matrix![0.0; 1.0],
        &vector![1.0, 1.0],
        &vector![1.0],
    )?;

    type Solver = Mpc<f64, SingleCache<f64, NX, NU>, NX, NU, HX, HU>;
    let mut mpc = Solver::new(problem.clone(), 1.0, Config::default().with_max_iter(200))?
        .with_u_constraints(Box::symmetric(vector![1.0]));

    let mut x_now = vector![1.0, 0.0];
    for k in 0..40 {
        mpc.set_initial_state(x_now);
        let solution = mpc.solve();
        let u_now = solution.u_now();

        info!(
            "{k}: x = [{:.4}, {:.4}], u = {:.4} in {} iters ({:?})",
            x_now[0], x_now[1], u_now[0], solution.iterations, solution.status,
        );

        x_now = problem.step(&x_now, &u_now);
    }

    Ok(())
}
