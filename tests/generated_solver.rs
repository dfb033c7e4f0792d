#![cfg(feature = "codegen")]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use float_eq::assert_float_eq;
use nalgebra::{matrix, vector};
use tinympc_admm::codegen::{CodegenOptions, generate};
use tinympc_admm::project::{Box, Cone};
use tinympc_admm::*;

const NX: usize = 2;
const NU: usize = 1;
const HU: usize = 10;
const HX: usize = HU + 1;

const TICKS: usize = 5;

/// Runs a few closed-loop ticks of the double integrator and prints one line per solve
const HARNESS: &str = r#"use generated_mpc::{Workspace, solve};

fn main() {
    let mut work = Workspace::new();
    let mut x = [2.0, -1.0];
    for _ in 0..5 {
        let status = solve(&mut work, &x);
        let u = work.u[0][0];
        println!("{:?} {} {:?}", status, work.iterations, u);
        x = [x[0] + x[1], x[1] + u];
    }
}
"#;

fn scratch_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tinympc-{name}-{}", std::process::id()))
}

fn cargo(dir: &Path, args: &[&str]) -> String {
    let output = Command::new(env!("CARGO"))
        .args(args)
        .arg("--offline")
        .current_dir(dir)
        .env("CARGO_TARGET_DIR", dir.join("target"))
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "cargo {args:?} failed:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn generated_crate_matches_runtime_solver() {
    let _ = env_logger::builder().is_test(true).try_init();

    let problem = Problem::new(
        matrix![1.0, 1.0; 0.0, 1.0],
        matrix![0.0; 1.0],
        nalgebra::SMatrix::identity(),
        matrix![1.0],
    )
    .unwrap();

    let config = Config::default()
        .with_max_iter(200)
        .with_warm_start(WarmStart::TimeShift);

    let mut mpc = Mpc::<f64, SingleCache<f64, NX, NU>, NX, NU, HX, HU>::new(problem.clone(), 1.0, config)
        .unwrap()
        .with_x_constraints(Cone::new().axis(vector![1.0, -1.0]).mu(0.5))
        .with_u_constraints(Box::symmetric(vector![0.5]));

    let options = CodegenOptions {
        crate_name: String::from("generated_mpc"),
        ..Default::default()
    };
    let code = generate(&mpc, &options).unwrap();

    let dir = scratch_dir("generated");
    code.write_to(&dir).unwrap();

    // Keep the scratch crate out of any enclosing workspace
    let mut manifest = code.cargo_toml.clone();
    manifest.push_str("\n[workspace]\n");
    fs::write(dir.join("Cargo.toml"), manifest).unwrap();
    fs::create_dir_all(dir.join("src/bin")).unwrap();
    fs::write(dir.join("src/bin/harness.rs"), HARNESS).unwrap();

    let stdout = cargo(&dir, &["run", "--quiet", "--bin", "harness"]);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), TICKS);

    let mut x_now = vector![2.0, -1.0];
    for line in lines {
        let mut fields = line.split_whitespace();
        let status = fields.next().unwrap();
        let iterations: usize = fields.next().unwrap().parse().unwrap();
        let u_generated: f64 = fields.next().unwrap().parse().unwrap();

        mpc.set_initial_state(x_now);
        let solution = mpc.solve();

        assert_eq!(status, format!("{:?}", solution.status));
        assert_eq!(iterations, solution.iterations);
        assert_float_eq!(u_generated, solution.u_now()[0], abs <= 1e-9);

        x_now = problem.step(&x_now, &solution.u_now());
    }

    // The generated crate carries its own unit tests
    cargo(&dir, &["test", "--quiet"]);

    fs::remove_dir_all(&dir).unwrap();
}
