use std::path::PathBuf;

use log::info;
use nalgebra::{matrix, vector};
use tinympc_admm::{
    Config, Mpc, Problem, SingleCache, WarmStart,
    codegen::{CodegenOptions, generate},
    project::Box,
};

const NX: usize = 2;
const NU: usize = 1;
const HU: usize = 10;
const HX: usize = HU + 1;

fn main() -> Result<(), std::boxed::Box<dyn std::error::Error>> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .without_timestamps()
        .init()
        .ok();

    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("tinympc_generated"));

    let problem = Problem::from_diagonal(
        matrix![1.0f32, 1.0; 0.0, 1.0],
        matrix![0.0; 1.0],
        &vector![1.0, 1.0],
        &vector![1.0],
    )?;

    let config = Config::default()
        .with_max_iter(50)
        .with_warm_start(WarmStart::TimeShift);

    type Solver = Mpc<f32, SingleCache<f32, NX, NU>, NX, NU, HX, HU>;
    let mpc = Solver::new(problem, 1.0, config)?
        .with_x_constraints(Box::new().with_upper(vector![None, Some(0.5)]).with_lower(vector![None, Some(-0.5)]))
        .with_u_constraints(Box::symmetric(vector![1.0]));

    let options = CodegenOptions {
        crate_name: String::from("double_integrator_mpc"),
        ..Default::default()
    };

    let code = generate(&mpc, &options)?;
    code.write_to(&out_dir)?;

    for (path, contents) in code.files() {
        info!("{path}: {} lines", contents.lines().count());
    }
    info!("generated crate written to {}", out_dir.display());

    Ok(())
}
