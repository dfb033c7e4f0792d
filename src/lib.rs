#![cfg_attr(not(feature = "std"), no_std)]
#![allow(non_snake_case)]

/*

    This work is heavily based off of TinyMPC [ https://tinympc.org/ ]

*/

use log::{debug, warn};
use nalgebra::{RealField, SMatrix, SVector, Scalar};

pub mod admm;
pub mod cache;
pub mod config;
pub mod constraint;
pub mod error;
pub mod problem;
pub mod project;

#[cfg(feature = "codegen")]
pub mod codegen;

pub(crate) mod util;

pub use admm::Phase;
pub use cache::{ArrayCache, Cache, SingleCache};
pub use config::{Config, Riccati, RhoAdaptation, WarmStart};
pub use constraint::{Constraint, DynConstraint};
pub use error::{ConfigError, Error, NumericalError};
pub use problem::Problem;
pub use project::{Project, ProjectExt};

/// How a solve ended
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Status {
    Converged,
    /// The returned input is a best-effort result and should be used with reduced confidence
    IterationLimitReached,
}

/// Fixed-horizon MPC solver.
///
/// `HX = HU + 1` state knots (column 0 is the initial state) and `HU` input knots.
/// The projectors `XP` and `UP` constrain the states and inputs respectively.
#[derive(Debug)]
pub struct Mpc<
    T,
    C,
    const NX: usize,
    const NU: usize,
    const HX: usize,
    const HU: usize,
    XP = (),
    UP = (),
> {
    pub config: Config<T>,
    pub(crate) problem: Problem<T, NX, NU>,
    pub(crate) cache: C,
    pub(crate) state: State<T, NX, NU, HX, HU>,
    pub(crate) x_con: Constraint<T, XP, NX, HX>,
    pub(crate) u_con: Constraint<T, UP, NU, HU>,
}

#[derive(Debug, Clone)]
pub(crate) struct State<T, const NX: usize, const NU: usize, const HX: usize, const HU: usize> {
    // State and inputs
    pub(crate) x: SMatrix<T, NX, HX>,
    pub(crate) u: SMatrix<T, NU, HU>,

    // State and input references
    pub(crate) x_ref: SMatrix<T, NX, HX>,
    pub(crate) u_ref: SMatrix<T, NU, HU>,

    // Linear cost matrices
    pub(crate) x_cost: SMatrix<T, NX, HX>,
    pub(crate) u_cost: SMatrix<T, NU, HU>,

    // Riccati backward pass terms
    pub(crate) x_ricc: SMatrix<T, NX, HX>,
    pub(crate) u_ricc: SMatrix<T, NU, HU>,

    // Outcome of the latest solve
    pub(crate) phase: Phase,
    pub(crate) prim_residual: T,
    pub(crate) dual_residual: T,
}

impl<T: Scalar + RealField + Copy, const NX: usize, const NU: usize, const HX: usize, const HU: usize>
    State<T, NX, NU, HX, HU>
{
    fn new() -> Self {
        Self {
            x: SMatrix::zeros(),
            u: SMatrix::zeros(),
            x_ref: SMatrix::zeros(),
            u_ref: SMatrix::zeros(),
            x_cost: SMatrix::zeros(),
            u_cost: SMatrix::zeros(),
            x_ricc: SMatrix::zeros(),
            u_ricc: SMatrix::zeros(),
            phase: Phase::Idle,
            prim_residual: T::zero(),
            dual_residual: T::zero(),
        }
    }
}

impl<T, C, const NX: usize, const NU: usize, const HX: usize, const HU: usize>
    Mpc<T, C, NX, NU, HX, HU>
where
    T: Scalar + RealField + Copy,
    C: Cache<T, NX, NU>,
{
    /// Validates the horizon and the settings, and builds the cache around `rho`.
    pub fn new(problem: Problem<T, NX, NU>, rho: T, config: Config<T>) -> Result<Self, Error> {
        // Guard against invalid horizon lengths
        if HX != HU + 1 || HU < 2 {
            return Err(ConfigError::InvalidHorizonLength.into());
        }

        config.validate()?;

        if let Some(adapt) = &config.adaptive_rho {
            if !adapt.contains(rho) {
                return Err(ConfigError::InvalidSetting("rho lies outside the adaptive rho bounds").into());
            }
        }

        let cache = C::build(rho, &problem, &config)?;

        Ok(Self {
            config,
            problem,
            cache,
            state: State::new(),
            x_con: Constraint::new(()),
            u_con: Constraint::new(()),
        })
    }
}

impl<T, C, XP, UP, const NX: usize, const NU: usize, const HX: usize, const HU: usize>
    Mpc<T, C, NX, NU, HX, HU, XP, UP>
where
    T: Scalar + RealField + Copy,
    C: Cache<T, NX, NU>,
    XP: Project<T, NX, HX>,
    UP: Project<T, NU, HU>,
{
    /// Replaces the state projector. Slack and dual variables start over.
    pub fn with_x_constraints<P: Project<T, NX, HX>>(
        self,
        projector: P,
    ) -> Mpc<T, C, NX, NU, HX, HU, P, UP> {
        Mpc {
            config: self.config,
            problem: self.problem,
            cache: self.cache,
            state: self.state,
            x_con: Constraint::new(projector),
            u_con: self.u_con,
        }
    }

    /// Replaces the input projector. Slack and dual variables start over.
    pub fn with_u_constraints<P: Project<T, NU, HU>>(
        self,
        projector: P,
    ) -> Mpc<T, C, NX, NU, HX, HU, XP, P> {
        Mpc {
            config: self.config,
            problem: self.problem,
            cache: self.cache,
            state: self.state,
            x_con: self.x_con,
            u_con: Constraint::new(projector),
        }
    }

    /// Mutable access to the state projector, to update bounds between solves
    pub fn x_projector_mut(&mut self) -> &mut XP {
        self.x_con.projector_mut()
    }

    /// Mutable access to the input projector, to update bounds between solves
    pub fn u_projector_mut(&mut self) -> &mut UP {
        self.u_con.projector_mut()
    }

    pub fn x_constraint(&self) -> &Constraint<T, XP, NX, HX> {
        &self.x_con
    }

    pub fn u_constraint(&self) -> &Constraint<T, UP, NU, HU> {
        &self.u_con
    }

    /// Seeds stage 0 of the state trajectory
    pub fn set_initial_state(&mut self, x_now: SVector<T, NX>) {
        self.state.x.set_column(0, &x_now);
    }

    pub fn set_x_reference(&mut self, x_ref: &SMatrix<T, NX, HX>) {
        self.state.x_ref = *x_ref;
    }

    pub fn set_u_reference(&mut self, u_ref: &SMatrix<T, NU, HU>) {
        self.state.u_ref = *u_ref;
    }

    /// Tracks the same state for the entire horizon
    pub fn set_constant_x_reference(&mut self, x_ref: SVector<T, NX>) {
        for i in 0..HX {
            self.state.x_ref.set_column(i, &x_ref);
        }
    }

    /// Rebuilds the cache for a new value of rho.
    ///
    /// On failure the previous cache stays active and the solver is unchanged.
    pub fn set_rho(&mut self, rho: T) -> Result<(), Error> {
        let prev_rho = self.rho();
        self.cache = C::build(rho, &self.problem, &self.config)?;

        let rho = self.rho();
        self.x_con.rescale_dual(prev_rho / rho);
        self.u_con.rescale_dual(prev_rho / rho);
        debug!("rho set from {prev_rho} to {rho}");
        Ok(())
    }

    /// Clears the trajectories along with all slack and dual variables
    pub fn reset(&mut self) {
        let x_now = self.state.x.column(0).clone_owned();
        let (x_ref, u_ref) = (self.state.x_ref, self.state.u_ref);

        self.state = State::new();
        self.state.x.set_column(0, &x_now);
        self.state.x_ref = x_ref;
        self.state.u_ref = u_ref;

        self.x_con.reset();
        self.u_con.reset();
    }

    pub fn problem(&self) -> &Problem<T, NX, NU> {
        &self.problem
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// The value of rho the active cache was built for
    pub fn rho(&self) -> T {
        self.cache.get_active().rho
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Number of iterations of the latest solve
    pub fn iterations(&self) -> usize {
        self.state.phase.iterations()
    }

    pub fn prim_residual(&self) -> T {
        self.state.prim_residual
    }

    pub fn dual_residual(&self) -> T {
        self.state.dual_residual
    }

    /// Get reference to matrix containing state predictions
    pub fn x_prediction(&self) -> &SMatrix<T, NX, HX> {
        &self.state.x
    }

    /// Get reference to matrix containing input predictions
    pub fn u_prediction(&self) -> &SMatrix<T, NU, HU> {
        &self.state.u
    }

    /// Runs ADMM iterations until convergence or until `max_iter` is reached.
    ///
    /// Always returns a best-effort solution.
    pub fn solve(&mut self) -> Solution<'_, T, NX, NU, HX, HU> {
        match self.config.warm_start {
            WarmStart::Cold => {
                self.x_con.reset();
                self.u_con.reset();
            }
            WarmStart::Hold => {}
            WarmStart::TimeShift => {
                // Better warm-starting of dual variables from prior solution
                self.x_con.time_shift_variables();
                self.u_con.time_shift_variables();
            }
        }

        let max_iter = self.config.max_iter;
        let do_check = self.config.do_check.max(1);

        let mut phase = Phase::Idle.next(false, max_iter);
        while let Phase::Iterating { iteration } = phase {
            // Update linear control cost terms
            self.update_linear_cost();

            // Backward pass to update Ricatti variables
            self.backward_pass();

            // Roll out to get new trajectory
            self.forward_pass();

            // Project into feasible domain
            self.update_constraints();

            // Check for early-stop condition
            let converged = iteration % do_check == 0 && self.check_termination(iteration);
            phase = phase.next(converged, max_iter);
        }
        self.state.phase = phase;

        let status = match phase {
            Phase::Converged { .. } => Status::Converged,
            _ => Status::IterationLimitReached,
        };

        if status == Status::IterationLimitReached {
            warn!(
                "solve hit the iteration limit of {max_iter} with residuals prim {}, dual {}",
                self.state.prim_residual, self.state.dual_residual
            );
        } else {
            debug!("solve converged in {} iterations", phase.iterations());
        }

        Solution {
            status,
            iterations: phase.iterations(),
            prim_residual: self.state.prim_residual,
            dual_residual: self.state.dual_residual,
            x: &self.state.x,
            u: &self.state.u,
        }
    }
}

/// Read-only result of a single solve
#[derive(Debug)]
pub struct Solution<'a, T, const NX: usize, const NU: usize, const HX: usize, const HU: usize> {
    pub status: Status,
    pub iterations: usize,
    pub prim_residual: T,
    /// Already scaled by rho
    pub dual_residual: T,
    x: &'a SMatrix<T, NX, HX>,
    u: &'a SMatrix<T, NU, HU>,
}

impl<T: Scalar + RealField + Copy, const NX: usize, const NU: usize, const HX: usize, const HU: usize>
    Solution<'_, T, NX, NU, HX, HU>
{
    /// Get the system input `u` for the current time
    pub fn u_now(&self) -> SVector<T, NU> {
        self.u.column(0).into()
    }

    /// Get reference to matrix containing state predictions
    pub fn x_prediction(&self) -> &SMatrix<T, NX, HX> {
        self.x
    }

    /// Get reference to matrix containing input predictions
    pub fn u_prediction(&self) -> &SMatrix<T, NU, HU> {
        self.u
    }

    pub fn is_converged(&self) -> bool {
        self.status == Status::Converged
    }
}
