//! Emits a standalone, allocation-free Rust crate running the same ADMM iterations
//! as a configured [`Mpc`], with every matrix embedded as a constant.
//!
//! The generated crate is `#![no_std]` and has no dependencies. Rho is frozen at the
//! value of the active cache.

use std::fmt::Write;
use std::fs;
use std::path::Path;

use log::{debug, warn};
use nalgebra::{RealField, Scalar};
use thiserror::Error;

use crate::{Cache, Mpc, Problem, WarmStart, project::Project};

mod emit;

pub use emit::Emit;
use emit::{literal, write_matrix};

const SOLVER_TEMPLATE: &str = include_str!("solver.rs.in");

/// Errors that can occur while generating code
#[derive(Debug, Error)]
pub enum CodegenError {
    /// The generated arrays would hold more elements than allowed
    #[error("generated arrays need {elements} elements, the limit is {limit}")]
    TooLarge { elements: usize, limit: usize },
    /// Only `f32` and `f64` have a literal representation
    #[error("unsupported scalar type {0}")]
    UnsupportedScalar(&'static str),
    /// A value to embed is Inf or NaN
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
    #[error("failed to write generated code: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct CodegenOptions {
    /// Package name written into the generated `Cargo.toml`
    pub crate_name: String,
    /// Upper bound on the number of scalars in the generated constants and workspace
    pub max_elements: usize,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            crate_name: String::from("tinympc_generated"),
            max_elements: 65536,
        }
    }
}

/// The sources of a generated crate
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedCode {
    pub cargo_toml: String,
    pub lib_rs: String,
    pub data_rs: String,
    pub solver_rs: String,
}

impl GeneratedCode {
    /// Relative paths and contents of all generated files
    pub fn files(&self) -> [(&'static str, &str); 4] {
        [
            ("Cargo.toml", self.cargo_toml.as_str()),
            ("src/lib.rs", self.lib_rs.as_str()),
            ("src/data.rs", self.data_rs.as_str()),
            ("src/solver.rs", self.solver_rs.as_str()),
        ]
    }

    /// Writes the crate into `dir`, creating it if needed
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<(), CodegenError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir.join("src"))?;
        for (path, contents) in self.files() {
            fs::write(dir.join(path), contents)?;
        }
        debug!("wrote generated solver to {}", dir.display());
        Ok(())
    }
}

/// Number of scalars held by the generated constants and workspace
fn element_count(nx: usize, nu: usize, hx: usize, hu: usize) -> usize {
    let constants = 4 * nx * nx + 3 * nx * nu + 2 * nu * nu;
    let workspace = 6 * nx * hx + 6 * nu * hu;
    constants + workspace
}

fn scalar_name<T: 'static>() -> Result<&'static str, CodegenError> {
    match core::any::type_name::<T>() {
        "f32" => Ok("f32"),
        "f64" => Ok("f64"),
        other => Err(CodegenError::UnsupportedScalar(other)),
    }
}

/// Generates a standalone crate equivalent to `mpc`.
///
/// The projectors are embedded as they are right now, later updates to them
/// are not reflected in already generated code.
pub fn generate<T, C, XP, UP, const NX: usize, const NU: usize, const HX: usize, const HU: usize>(
    mpc: &Mpc<T, C, NX, NU, HX, HU, XP, UP>,
    options: &CodegenOptions,
) -> Result<GeneratedCode, CodegenError>
where
    T: Scalar + RealField + Copy,
    C: Cache<T, NX, NU>,
    XP: Project<T, NX, HX> + Emit<T, NX, HX>,
    UP: Project<T, NU, HU> + Emit<T, NU, HU>,
{
    let scalar = scalar_name::<T>()?;

    let elements = element_count(NX, NU, HX, HU);
    if elements > options.max_elements {
        return Err(CodegenError::TooLarge {
            elements,
            limit: options.max_elements,
        });
    }

    if mpc.config.adaptive_rho.is_some() {
        warn!("adaptive rho is not generated, rho stays at {}", mpc.rho());
    }

    let data_rs = generate_data(mpc, scalar)?;

    let mut x_projection = String::new();
    mpc.x_con.projector.emit_projection("X", &mut x_projection)?;
    let mut u_projection = String::new();
    mpc.u_con.projector.emit_projection("U", &mut u_projection)?;

    let solver_rs = SOLVER_TEMPLATE
        .replace("$X_PROJECTION$", &x_projection)
        .replace("$U_PROJECTION$", &u_projection);

    let lib_rs = String::from(
        "//! Generated by tinympc-admm, do not edit.
#![cfg_attr(not(test), no_std)]
#![allow(clippy::needless_range_loop)]

mod data;
mod solver;

pub use data::{F, HU, HX, NU, NX};
pub use solver::{Status, Workspace, solve};
",
    );

    let cargo_toml = format!(
        "[package]
name = \"{}\"
version = \"0.1.0\"
edition = \"2021\"

[dependencies]
",
        options.crate_name
    );

    debug!("generated solver with {elements} elements for NX = {NX}, NU = {NU}, HX = {HX}");

    Ok(GeneratedCode {
        cargo_toml,
        lib_rs,
        data_rs,
        solver_rs,
    })
}

fn generate_data<T, C, XP, UP, const NX: usize, const NU: usize, const HX: usize, const HU: usize>(
    mpc: &Mpc<T, C, NX, NU, HX, HU, XP, UP>,
    scalar: &str,
) -> Result<String, CodegenError>
where
    T: Scalar + RealField + Copy,
    C: Cache<T, NX, NU>,
    XP: Emit<T, NX, HX>,
    UP: Emit<T, NU, HU>,
{
    let Problem { A, B, Q, R, S } = &mpc.problem;
    let cache = mpc.cache.get_active();
    let config = &mpc.config;

    let mut out = String::new();
    out.push_str("#![allow(dead_code)]\n\n");
    let _ = writeln!(out, "pub type F = {scalar};\n");
    let _ = writeln!(out, "pub const NX: usize = {NX};");
    let _ = writeln!(out, "pub const NU: usize = {NU};");
    let _ = writeln!(out, "pub const HX: usize = {HX};");
    let _ = writeln!(out, "pub const HU: usize = {HU};\n");

    write_matrix(&mut out, "A", A)?;
    write_matrix(&mut out, "B", B)?;
    write_matrix(&mut out, "Q", Q)?;
    write_matrix(&mut out, "R", R)?;
    write_matrix(&mut out, "S", S)?;
    write_matrix(&mut out, "NKINF", &cache.nKlqr)?;
    write_matrix(&mut out, "PINF", &cache.Plqr)?;
    write_matrix(&mut out, "C1", &cache.RpBPBi)?;
    write_matrix(&mut out, "C2", &cache.AmBKt)?;

    let _ = writeln!(out, "pub const RHO: F = {};", literal(cache.rho, "rho")?);
    let _ = writeln!(out, "pub const PRIM_TOL: F = {};", literal(config.prim_tol, "prim_tol")?);
    let _ = writeln!(out, "pub const DUAL_TOL: F = {};", literal(config.dual_tol, "dual_tol")?);
    let _ = writeln!(
        out,
        "pub const REL_PRIM_TOL: F = {};",
        literal(config.rel_prim_tol, "rel_prim_tol")?
    );
    let _ = writeln!(
        out,
        "pub const REL_DUAL_TOL: F = {};",
        literal(config.rel_dual_tol, "rel_dual_tol")?
    );
    let _ = writeln!(out, "pub const MAX_ITER: usize = {};", config.max_iter.max(1));
    let _ = writeln!(out, "pub const DO_CHECK: usize = {};", config.do_check.max(1));
    let _ = writeln!(
        out,
        "pub const COLD_START: bool = {};",
        config.warm_start == WarmStart::Cold
    );
    let _ = writeln!(
        out,
        "pub const TIME_SHIFT: bool = {};\n",
        config.warm_start == WarmStart::TimeShift
    );

    mpc.x_con.projector.emit_data("X", &mut out)?;
    mpc.u_con.projector.emit_data("U", &mut out)?;

    Ok(out)
}
