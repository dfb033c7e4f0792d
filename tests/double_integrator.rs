use float_eq::assert_float_eq;
use nalgebra::{SMatrix, SVector, matrix, vector};
use tinympc_admm::project::Box;
use tinympc_admm::*;

const NX: usize = 2;
const NU: usize = 1;
const HU: usize = 10;
const HX: usize = HU + 1;

type Solver = Mpc<f64, SingleCache<f64, NX, NU>, NX, NU, HX, HU>;

fn problem() -> Problem<f64, NX, NU> {
    Problem::new(
        matrix![1.0, 1.0; 0.0, 1.0],
        matrix![0.0; 1.0],
        SMatrix::identity(),
        matrix![1.0],
    )
    .unwrap()
}

fn solver(config: Config<f64>) -> Solver {
    Solver::new(problem(), 1.0, config).unwrap()
}

//

#[test]
fn converges_within_input_bounds() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = Config::default().with_max_iter(500);
    let mut mpc = solver(config).with_u_constraints(Box::symmetric(vector![1.0]));
    mpc.set_initial_state(vector![1.0, 0.0]);

    let solution = mpc.solve();
    assert_eq!(solution.status, Status::Converged);
    assert!(solution.iterations >= 1 && solution.iterations <= 500);
    assert!(solution.prim_residual <= 1e-3);
    assert!(solution.dual_residual <= 1e-3);

    let u_now = solution.u_now();
    assert!(u_now[0].abs() <= 1.0 + 1e-3);

    // The prediction starts at the initial state and follows the model
    let x = solution.x_prediction();
    let u = solution.u_prediction();
    assert_eq!(x.column(0), vector![1.0, 0.0]);
    for k in 0..HU {
        let next = problem().step(&x.column(k).into(), &u.column(k).into());
        assert_float_eq!(x[(0, k + 1)], next[0], abs <= 1e-12);
        assert_float_eq!(x[(1, k + 1)], next[1], abs <= 1e-12);
    }

    // And heads towards the origin
    assert!(x.column(HX - 1).norm() < 0.5 * x.column(0).norm());
}

#[test]
fn closed_loop_settles_at_origin() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = Config::default().with_max_iter(200);
    let mut mpc = solver(config).with_u_constraints(Box::symmetric(vector![1.0]));
    let model = problem();
    let terminal = *mpc.cache().cost_to_go();

    let mut x_now = vector![1.0, 0.0];
    let mut prev_cost = f64::INFINITY;
    for _ in 0..40 {
        mpc.set_initial_state(x_now);
        let solution = mpc.solve();
        let u_now = solution.u_now();
        assert!(u_now[0].abs() <= 1.0 + 1e-2);

        // Predicted cost over the horizon, never increasing from tick to tick
        let (x, u) = (solution.x_prediction(), solution.u_prediction());
        let x_end = x.column(HX - 1);
        let cost = (0..HU)
            .map(|k| model.stage_cost(&x.column(k).into(), &u.column(k).into()))
            .sum::<f64>()
            + 0.5 * x_end.dot(&(terminal * x_end));
        assert!(cost <= prev_cost + 1e-9, "cost went from {prev_cost} to {cost}");
        prev_cost = cost;

        x_now = model.step(&x_now, &u_now);
    }

    assert!(x_now.norm() < 0.05);
}

#[test]
fn cold_solves_are_repeatable() {
    let config = Config::default()
        .with_max_iter(50)
        .with_warm_start(WarmStart::Cold);
    let mut mpc = solver(config).with_u_constraints(Box::symmetric(vector![0.2]));
    mpc.set_initial_state(vector![1.0, -0.5]);

    let (status, iterations, u_now) = {
        let solution = mpc.solve();
        (solution.status, solution.iterations, solution.u_now())
    };

    let again = mpc.solve();
    assert_eq!(again.status, status);
    assert_eq!(again.iterations, iterations);
    assert_eq!(again.u_now(), u_now);
}

#[test]
fn constraints_slow_down_convergence() {
    let config = Config::default()
        .with_max_iter(2000)
        .with_warm_start(WarmStart::Cold);

    let mut light = solver(config.clone()).with_u_constraints(Box::symmetric(vector![100.0]));
    light.set_initial_state(vector![1.0, 0.0]);
    let light = light.solve();
    assert!(light.is_converged());

    let mut heavy = solver(config)
        .with_u_constraints(Box::symmetric(vector![0.05]))
        .with_x_constraints(Box::new().with_upper(vector![None, Some(0.1)]).with_lower(vector![None, Some(-0.1)]));
    heavy.set_initial_state(vector![1.0, 0.0]);
    let heavy = heavy.solve();

    assert!(light.iterations < heavy.iterations);
}

#[test]
fn shortest_horizon_solves() {
    type Short = Mpc<f64, SingleCache<f64, NX, NU>, NX, NU, 3, 2>;

    let config = Config::default().with_max_iter(1000);
    let mut mpc = Short::new(problem(), 1.0, config)
        .unwrap()
        .with_u_constraints(Box::symmetric(vector![1.0]));
    mpc.set_initial_state(vector![1.0, 0.0]);

    let solution = mpc.solve();
    assert!(solution.is_converged());
    assert!(solution.u_now()[0].is_finite());
    assert!(solution.x_prediction().iter().all(|x| x.is_finite()));
}

#[test]
fn single_iteration_returns_first_rollout() {
    let config = Config::default()
        .with_max_iter(1)
        .with_warm_start(WarmStart::Cold);
    let mut mpc = solver(config);
    let x0 = vector![1.0, 0.0];
    mpc.set_initial_state(x0);

    let gain = mpc.cache().gain();
    let solution = mpc.solve();

    assert_eq!(solution.status, Status::IterationLimitReached);
    assert_eq!(solution.iterations, 1);

    // Zero references, slack and duals leave only the feedback term
    let expected: SVector<f64, NU> = -gain * x0;
    assert_float_eq!(solution.u_now()[0], expected[0], abs <= 1e-12);
}

#[test]
fn tracks_a_reference() {
    let config = Config::default().with_max_iter(500);
    let mut mpc = solver(config);
    mpc.set_constant_x_reference(vector![2.0, 0.0]);
    mpc.set_initial_state(vector![2.0, 0.0]);

    // Already at rest on the reference, nothing to do
    let solution = mpc.solve();
    assert!(solution.is_converged());
    assert_float_eq!(solution.u_now()[0], 0.0, abs <= 1e-2);
}

#[test]
fn set_rho_rebuilds_the_cache() {
    let mut mpc = solver(Config::default());
    mpc.set_rho(2.0).unwrap();

    let fresh = SingleCache::new(2.0, &problem(), &Riccati::default()).unwrap();
    assert_eq!(mpc.rho(), 2.0);
    assert_eq!(mpc.cache().cost_to_go(), fresh.cost_to_go());
    assert_eq!(mpc.cache().gain(), fresh.gain());

    // A failed rebuild leaves the solver untouched
    let err = mpc.set_rho(-1.0).unwrap_err();
    assert_eq!(err, Error::Config(ConfigError::RhoNotPositive));
    assert_eq!(mpc.rho(), 2.0);
}

#[test]
fn rejects_zero_rho() {
    let err = Solver::new(problem(), 0.0, Config::default()).unwrap_err();
    assert_eq!(err, Error::Config(ConfigError::RhoNotPositive));

    let mut mpc = solver(Config::default());
    let err = mpc.set_rho(0.0).unwrap_err();
    assert_eq!(err, Error::Config(ConfigError::RhoNotPositive));
    assert_eq!(mpc.rho(), 1.0);
}

#[test]
fn rejects_invalid_horizons() {
    let err = Mpc::<f64, SingleCache<f64, NX, NU>, NX, NU, 10, 10>::new(problem(), 1.0, Config::default())
        .unwrap_err();
    assert_eq!(err, Error::Config(ConfigError::InvalidHorizonLength));

    let err = Mpc::<f64, SingleCache<f64, NX, NU>, NX, NU, 2, 1>::new(problem(), 1.0, Config::default())
        .unwrap_err();
    assert_eq!(err, Error::Config(ConfigError::InvalidHorizonLength));
}

#[test]
fn rejects_invalid_settings() {
    let config = Config::default().with_do_check(0);
    let err = Solver::new(problem(), 1.0, config).unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::InvalidSetting(_))));
}

#[test]
fn projector_updates_apply_to_next_solve() {
    let config = Config::default()
        .with_max_iter(500)
        .with_warm_start(WarmStart::Cold);
    let mut mpc = solver(config).with_u_constraints(Box::symmetric(vector![1.0]));
    mpc.set_initial_state(vector![3.0, 0.0]);

    let loose = mpc.solve().u_now();

    *mpc.u_projector_mut() = Box::symmetric(vector![0.5]);
    let tight = mpc.solve();
    assert!(tight.is_converged());
    assert!(tight.u_now()[0].abs() <= 0.5 + 2e-3);
    assert!(loose[0].abs() > 0.9);
}

/// A solver with a tight input bound and the given warm start, after one solve from `[3, 0]`
fn solved_once(warm_start: WarmStart) -> (Mpc<f64, SingleCache<f64, NX, NU>, NX, NU, HX, HU, (), Box<f64, NU>>, usize) {
    let config = Config::default()
        .with_max_iter(500)
        .with_warm_start(warm_start);
    let mut mpc = solver(config).with_u_constraints(Box::symmetric(vector![0.5]));
    mpc.set_initial_state(vector![3.0, 0.0]);

    let solution = mpc.solve();
    assert!(solution.is_converged());
    let iterations = solution.iterations;
    (mpc, iterations)
}

#[test]
fn hold_reuses_the_previous_solution() {
    let (mut hold, first) = solved_once(WarmStart::Hold);
    let (mut cold, _) = solved_once(WarmStart::Cold);

    let slack = *hold.u_constraint().slack();
    let dual = *hold.u_constraint().dual();
    assert!(dual.abs().max() > 0.0);

    // Same problem again, the held variables are already a fixed point
    let held = hold.solve();
    assert!(held.is_converged());
    assert!(held.iterations < first);
    let held_iterations = held.iterations;

    let again = cold.solve();
    assert_eq!(again.iterations, first);
    assert!(held_iterations < again.iterations);

    assert_float_eq!(hold.u_constraint().slack()[(0, 0)], slack[(0, 0)], abs <= 2e-3);
    assert_float_eq!(hold.u_constraint().dual()[(0, 0)], dual[(0, 0)], abs <= 2e-3);
}

#[test]
fn time_shift_follows_the_moving_horizon() {
    let mut solvers = [WarmStart::Cold, WarmStart::Hold, WarmStart::TimeShift].map(solved_once);

    // Step the plant with the first input and solve from where it lands
    let x_next = problem().step(&vector![3.0, 0.0], &solvers[0].0.u_prediction().column(0).into());
    let iterations = solvers.each_mut().map(|(mpc, _)| {
        mpc.set_initial_state(x_next);
        let solution = mpc.solve();
        assert!(solution.is_converged());
        solution.iterations
    });

    let [cold, hold, shift] = iterations;
    assert!(shift < cold);
    assert!(shift < hold);
}

#[test]
fn reset_clears_variables_but_keeps_the_problem() {
    let config = Config::default()
        .with_max_iter(500)
        .with_warm_start(WarmStart::Hold);
    let mut mpc = solver(config).with_u_constraints(Box::symmetric(vector![0.5]));
    mpc.set_constant_x_reference(vector![1.0, 0.0]);
    mpc.set_initial_state(vector![3.0, 0.0]);

    let (iterations, u_now) = {
        let solution = mpc.solve();
        (solution.iterations, solution.u_now())
    };
    assert!(mpc.u_constraint().dual().abs().max() > 0.0);

    mpc.reset();
    assert_eq!(mpc.u_constraint().slack(), &SMatrix::<f64, NU, HU>::zeros());
    assert_eq!(mpc.u_constraint().dual(), &SMatrix::<f64, NU, HU>::zeros());
    assert_eq!(mpc.x_constraint().dual(), &SMatrix::<f64, NX, HX>::zeros());
    assert_eq!(mpc.x_prediction().column(0), vector![3.0, 0.0]);
    assert_eq!(mpc.u_prediction(), &SMatrix::<f64, NU, HU>::zeros());
    assert_eq!(mpc.phase(), Phase::Idle);

    // Initial state and reference survive, so the first solve repeats exactly
    let solution = mpc.solve();
    assert_eq!(solution.iterations, iterations);
    assert_eq!(solution.u_now(), u_now);
}
