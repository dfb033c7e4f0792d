use log::trace;
use nalgebra::{RealField, Scalar};

use crate::{Cache, Mpc, Problem, project::Project};

/// Where a solve currently is.
///
/// The driver loop only ever advances through [`Phase::next`], so the number of
/// iterations is bounded by `max_iter` regardless of the numerical values.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Phase {
    /// No solve has run yet
    #[default]
    Idle,
    /// Running the given (1-based) iteration
    Iterating { iteration: usize },
    /// Both residuals were within tolerance after the given number of iterations
    Converged { iterations: usize },
    /// The iteration cap was hit before the residuals were within tolerance
    IterationLimitReached { iterations: usize },
}

impl Phase {
    /// Pure transition function of the iteration driver.
    ///
    /// `converged` is the outcome of the termination check of the iteration that
    /// just finished, and is ignored outside of [`Phase::Iterating`].
    pub fn next(self, converged: bool, max_iter: usize) -> Phase {
        match self {
            Phase::Idle if max_iter == 0 => Phase::IterationLimitReached { iterations: 0 },
            Phase::Idle => Phase::Iterating { iteration: 1 },
            Phase::Iterating { iteration } if converged => Phase::Converged {
                iterations: iteration,
            },
            Phase::Iterating { iteration } if iteration >= max_iter => {
                Phase::IterationLimitReached {
                    iterations: iteration,
                }
            }
            Phase::Iterating { iteration } => Phase::Iterating {
                iteration: iteration + 1,
            },
            terminal => terminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Converged { .. } | Phase::IterationLimitReached { .. }
        )
    }

    /// Number of completed iterations
    pub fn iterations(&self) -> usize {
        match *self {
            Phase::Idle => 0,
            Phase::Iterating { iteration } => iteration - 1,
            Phase::Converged { iterations } | Phase::IterationLimitReached { iterations } => {
                iterations
            }
        }
    }
}

impl<
        T,
        C,
        XP,
        UP,
        const NX: usize,
        const NU: usize,
        const HX: usize,
        const HU: usize,
    > Mpc<T, C, NX, NU, HX, HU, XP, UP>
where
    T: Scalar + RealField + Copy,
    C: Cache<T, NX, NU>,
    XP: Project<T, NX, HX>,
    UP: Project<T, NU, HU>,
{
    /// Update linear control cost terms from the references and the ADMM variables
    pub(crate) fn update_linear_cost(&mut self) {
        let s = &mut self.state;
        let c = self.cache.get_active();
        let Problem { Q, R, S, .. } = &self.problem;

        // Input cost (up to HU)
        s.u_cost = -(R * s.u_ref) - S.tr_mul(&s.x_ref.fixed_columns::<HU>(0));
        self.u_con.add_cost(&mut s.u_cost, c.rho);

        // State cost (up to HX)
        s.x_cost = -(Q * s.x_ref);
        let mut x_cost_inputs = s.x_cost.fixed_columns_mut::<HU>(0);
        x_cost_inputs -= S * s.u_ref;
        self.x_con.add_cost(&mut s.x_cost, c.rho);

        // Terminal condition at the end of the prediction horizon
        let p_terminal = -(c.Plqr * s.x_ref.column(HX - 1))
            + (self.x_con.dual.column(HX - 1) - self.x_con.slac.column(HX - 1)).scale(c.rho);
        s.x_ricc.set_column(HX - 1, &p_terminal);
    }

    /// Update linear terms from Riccati backward pass
    pub(crate) fn backward_pass(&mut self) {
        let s = &mut self.state;
        let c = self.cache.get_active();
        let B = &self.problem.B;

        for k in (0..HU).rev() {
            let p_next = s.x_ricc.column(k + 1).clone_owned();
            let r_k = s.u_cost.column(k).clone_owned();

            let d_k = c.RpBPBi * (B.tr_mul(&p_next) + r_k);
            let p_k = s.x_cost.column(k) + c.AmBKt * p_next + c.nKlqr.tr_mul(&r_k);

            s.u_ricc.set_column(k, &d_k);
            s.x_ricc.set_column(k, &p_k);
        }
    }

    /// Use LQR feedback policy to roll out trajectory from the initial state
    pub(crate) fn forward_pass(&mut self) {
        let s = &mut self.state;
        let c = self.cache.get_active();
        let Problem { A, B, .. } = &self.problem;

        for k in 0..HU {
            let x_k = s.x.column(k).clone_owned();
            let u_k = c.nKlqr * x_k - s.u_ricc.column(k);

            s.u.set_column(k, &u_k);
            s.x.set_column(k + 1, &(A * x_k + B * u_k));
        }
    }

    /// Project slack variables into their feasible domain and update dual variables
    pub(crate) fn update_constraints(&mut self) {
        self.x_con.constrain(&self.state.x);
        self.u_con.constrain(&self.state.u);

        let rho = self.cache.get_active().rho;
        self.state.prim_residual = self.x_con.prim_residual.max(self.u_con.prim_residual);
        self.state.dual_residual = self.x_con.dual_residual.max(self.u_con.dual_residual) * rho;
    }

    /// Check for termination condition by evaluating residuals, and let the
    /// cache adapt rho if it is not yet met.
    pub(crate) fn check_termination(&mut self, iteration: usize) -> bool {
        let cfg = &self.config;
        let rho = self.cache.get_active().rho;
        let prim_residual = self.state.prim_residual;
        let dual_residual = self.state.dual_residual;

        let prim_scale = self.x_con.prim_scale.max(self.u_con.prim_scale);
        let dual_scale = self.x_con.dual_scale.max(self.u_con.dual_scale) * rho;
        let prim_tol = cfg.prim_tol + cfg.rel_prim_tol * prim_scale;
        let dual_tol = cfg.dual_tol + cfg.rel_dual_tol * dual_scale;

        trace!(
            "iteration {iteration}: prim {prim_residual} (tol {prim_tol}), dual {dual_residual} (tol {dual_tol}), rho {rho}"
        );

        if prim_residual <= prim_tol && dual_residual <= dual_tol {
            return true;
        }

        // If the value of rho changed we must also rescale all duals
        if let Some(scale) =
            self.cache
                .update_active(&self.problem, &self.config, prim_residual, dual_residual)
        {
            self.x_con.rescale_dual(scale);
            self.u_con.rescale_dual(scale);
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_starts_first_iteration() {
        assert_eq!(Phase::Idle.next(false, 10), Phase::Iterating { iteration: 1 });

        // The convergence flag means nothing before the first iteration
        assert_eq!(Phase::Idle.next(true, 10), Phase::Iterating { iteration: 1 });
    }

    #[test]
    fn iterating_advances_until_the_cap() {
        let mut phase = Phase::Idle.next(false, 3);
        let mut visited = 0;
        while let Phase::Iterating { iteration } = phase {
            visited += 1;
            assert_eq!(iteration, visited);
            phase = phase.next(false, 3);
        }
        assert_eq!(phase, Phase::IterationLimitReached { iterations: 3 });
        assert_eq!(phase.iterations(), 3);
    }

    #[test]
    fn convergence_wins_over_the_cap() {
        let phase = Phase::Iterating { iteration: 5 };
        assert_eq!(phase.next(true, 5), Phase::Converged { iterations: 5 });
        assert_eq!(phase.next(false, 5), Phase::IterationLimitReached { iterations: 5 });
    }

    #[test]
    fn single_iteration_budget() {
        let phase = Phase::Idle.next(false, 1);
        assert_eq!(phase, Phase::Iterating { iteration: 1 });
        assert_eq!(phase.next(false, 1), Phase::IterationLimitReached { iterations: 1 });
    }

    #[test]
    fn terminal_phases_are_absorbing() {
        let converged = Phase::Converged { iterations: 4 };
        let limited = Phase::IterationLimitReached { iterations: 9 };

        assert!(converged.is_terminal() && limited.is_terminal());
        assert_eq!(converged.next(false, 100), converged);
        assert_eq!(limited.next(true, 100), limited);
    }

    #[test]
    fn zero_budget_never_iterates() {
        assert_eq!(
            Phase::Idle.next(false, 0),
            Phase::IterationLimitReached { iterations: 0 }
        );
    }
}
