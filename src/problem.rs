use nalgebra::{RealField, SMatrix, SVector, Scalar};

use crate::{ConfigError, Error};

/// Linear time-invariant model `x+ = A x + B u` with the quadratic stage cost
/// `1/2 x^T Q x + 1/2 u^T R u + x^T S u`.
///
/// The symmetric parts of `Q` and `R` are stored, so only those enter the solver.
#[derive(Debug, Clone)]
pub struct Problem<T, const NX: usize, const NU: usize> {
    pub(crate) A: SMatrix<T, NX, NX>,
    pub(crate) B: SMatrix<T, NX, NU>,
    pub(crate) Q: SMatrix<T, NX, NX>,
    pub(crate) R: SMatrix<T, NU, NU>,
    pub(crate) S: SMatrix<T, NX, NU>,
}

impl<T, const NX: usize, const NU: usize> Problem<T, NX, NU>
where
    T: Scalar + RealField + Copy,
{
    /// Creates a problem without a state-input cross term.
    pub fn new(
        A: SMatrix<T, NX, NX>,
        B: SMatrix<T, NX, NU>,
        Q: SMatrix<T, NX, NX>,
        R: SMatrix<T, NU, NU>,
    ) -> Result<Self, Error> {
        Self::with_cross_term(A, B, Q, R, SMatrix::zeros())
    }

    /// Creates a problem with diagonal state and input penalties.
    pub fn from_diagonal(
        A: SMatrix<T, NX, NX>,
        B: SMatrix<T, NX, NU>,
        Q: &SVector<T, NX>,
        R: &SVector<T, NU>,
    ) -> Result<Self, Error> {
        Self::new(A, B, SMatrix::from_diagonal(Q), SMatrix::from_diagonal(R))
    }

    /// Creates a problem with the cross term `x^T S u` in the stage cost.
    pub fn with_cross_term(
        A: SMatrix<T, NX, NX>,
        B: SMatrix<T, NX, NU>,
        Q: SMatrix<T, NX, NX>,
        R: SMatrix<T, NU, NU>,
        S: SMatrix<T, NX, NU>,
    ) -> Result<Self, Error> {
        if NX == 0 || NU == 0 {
            return Err(ConfigError::ZeroDimension.into());
        }

        let all_finite = ([].iter())
            .chain(A.iter())
            .chain(B.iter())
            .chain(Q.iter())
            .chain(R.iter())
            .chain(S.iter())
            .all(|x| x.is_finite());

        if !all_finite {
            return Err(ConfigError::NonFiniteModel.into());
        }

        let Q = Q.symmetric_part();
        let R = R.symmetric_part();

        let Rinv = R
            .cholesky()
            .ok_or(ConfigError::RNotPositiveDefinite)?
            .inverse();

        // The joint stage cost is convex iff R > 0 and its Schur complement is PSD.
        // A small diagonal shift lets Cholesky accept singular (semidefinite) matrices.
        let schur = (Q - S * Rinv * S.transpose()).symmetric_part();
        let shift = T::default_epsilon().sqrt() * T::one().max(schur.abs().max());
        (schur + SMatrix::from_diagonal_element(shift))
            .cholesky()
            .ok_or(ConfigError::QNotPositiveSemidefinite)?;

        Ok(Self { A, B, Q, R, S })
    }

    pub fn a(&self) -> &SMatrix<T, NX, NX> {
        &self.A
    }

    pub fn b(&self) -> &SMatrix<T, NX, NU> {
        &self.B
    }

    pub fn q(&self) -> &SMatrix<T, NX, NX> {
        &self.Q
    }

    pub fn r(&self) -> &SMatrix<T, NU, NU> {
        &self.R
    }

    pub fn s(&self) -> &SMatrix<T, NX, NU> {
        &self.S
    }

    /// Propagate the model one step
    pub fn step(&self, x: &SVector<T, NX>, u: &SVector<T, NU>) -> SVector<T, NX> {
        self.A * x + self.B * u
    }

    /// Evaluate the quadratic stage cost at `(x, u)`
    pub fn stage_cost(&self, x: &SVector<T, NX>, u: &SVector<T, NU>) -> T {
        let half: T = nalgebra::convert(0.5);
        half * x.dot(&(self.Q * x)) + half * u.dot(&(self.R * u)) + x.dot(&(self.S * u))
    }
}
