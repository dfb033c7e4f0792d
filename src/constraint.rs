use nalgebra::{RealField, SMatrix};

use crate::project::Project;
use crate::util::shift_columns_left;

pub type DynConstraint<'a, T, const N: usize, const H: usize> =
    Constraint<T, &'a dyn Project<T, N, H>, N, H>;

/// A projector together with the slack and (scaled) dual variables ADMM keeps for it.
#[derive(Debug, Clone)]
pub struct Constraint<T, P, const N: usize, const H: usize> {
    pub(crate) prim_residual: T,
    pub(crate) dual_residual: T,
    pub(crate) prim_scale: T,
    pub(crate) dual_scale: T,
    pub(crate) slac: SMatrix<T, N, H>,
    pub(crate) dual: SMatrix<T, N, H>,
    pub(crate) projector: P,
}

impl<T: RealField + Copy, P: Project<T, N, H>, const N: usize, const H: usize> Constraint<T, P, N, H> {
    pub fn new(projector: P) -> Self {
        Self {
            prim_residual: T::zero(),
            dual_residual: T::zero(),
            prim_scale: T::zero(),
            dual_scale: T::zero(),
            slac: SMatrix::zeros(),
            dual: SMatrix::zeros(),
            projector,
        }
    }

    pub fn projector(&self) -> &P {
        &self.projector
    }

    pub fn projector_mut(&mut self) -> &mut P {
        &mut self.projector
    }

    /// The projected (feasible) copy of the trajectory
    pub fn slack(&self) -> &SMatrix<T, N, H> {
        &self.slac
    }

    /// The scaled dual variables, `y / rho`
    pub fn dual(&self) -> &SMatrix<T, N, H> {
        &self.dual
    }

    /// Shifts slack and dual variables forward by 1 time step.
    /// Used at the beginning of a solve to correctly hot-start the values.
    pub fn time_shift_variables(&mut self) {
        shift_columns_left(&mut self.dual);
        shift_columns_left(&mut self.slac);
    }

    /// Clears slack and dual variables for a cold start
    pub fn reset(&mut self) {
        self.slac = SMatrix::zeros();
        self.dual = SMatrix::zeros();
        self.prim_residual = T::zero();
        self.dual_residual = T::zero();
    }

    /// Keeps the unscaled duals constant across a change of rho.
    pub fn rescale_dual(&mut self, scale: T) {
        self.dual.scale_mut(scale);
    }

    /// Constrains the set of points, updates the duals and computes the residuals.
    ///
    /// Residuals are infinity norms. The dual residual is not yet scaled by rho.
    pub fn constrain(&mut self, points: &SMatrix<T, N, H>) {
        let old_slac = self.slac;

        self.slac = points + self.dual;
        self.projector.project(self.slac.as_view_mut());
        let prim_residual_matrix = points - self.slac;
        self.dual += prim_residual_matrix;

        self.prim_residual = prim_residual_matrix.abs().max();
        self.dual_residual = (old_slac - self.slac).abs().max();
        self.prim_scale = points.abs().max().max(self.slac.abs().max());
        self.dual_scale = self.dual.abs().max();
    }

    /// Adds the linear cost `rho * (dual - slack)` of the augmented Lagrangian
    pub fn add_cost(&self, cost: &mut SMatrix<T, N, H>, rho: T) {
        *cost += (self.dual - self.slac).scale(rho);
    }
}
