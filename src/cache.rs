use log::{debug, warn};
use nalgebra::{RealField, SMatrix, Scalar, convert};

use crate::{Config, ConfigError, Error, NumericalError, Problem, Riccati, RhoAdaptation};

/// Owner of the pre-computed values the ADMM iterations run on.
pub trait Cache<T, const NX: usize, const NU: usize>: Sized {
    /// Builds the cache for a problem around the penalty parameter `rho`.
    fn build(rho: T, problem: &Problem<T, NX, NU>, config: &Config<T>) -> Result<Self, Error>;

    /// Updates which cache is active by evaluating the primal and dual residuals.
    ///
    /// Returns: A scalar (old_rho/new_rho) to be applied to constraint duals in case the cache changed
    fn update_active(
        &mut self,
        problem: &Problem<T, NX, NU>,
        config: &Config<T>,
        prim_residual: T,
        dual_residual: T,
    ) -> Option<T>;

    /// Get a reference to the currently active cache.
    fn get_active(&self) -> &SingleCache<T, NX, NU>;
}

/// Contains all pre-computed values for a given problem and value of rho
#[derive(Debug, Clone)]
pub struct SingleCache<T, const NX: usize, const NU: usize> {
    /// Penalty-parameter for this cache
    pub(crate) rho: T,

    /// (Negated) Infinite-time horizon LQR gain
    pub(crate) nKlqr: SMatrix<T, NU, NX>,

    /// Infinite-time horizon LQR cost-to-go
    pub(crate) Plqr: SMatrix<T, NX, NX>,

    /// Precomputed `inv(R_aug + B^T * Plqr * B)`
    pub(crate) RpBPBi: SMatrix<T, NU, NU>,

    /// Precomputed `(A - B * Klqr)^T`
    pub(crate) AmBKt: SMatrix<T, NX, NX>,

    /// Number of Riccati iterations it took to converge
    pub(crate) iterations: usize,
}

impl<T, const NX: usize, const NU: usize> SingleCache<T, NX, NU>
where
    T: Scalar + RealField + Copy,
{
    pub fn new(rho: T, problem: &Problem<T, NX, NU>, riccati: &Riccati<T>) -> Result<Self, Error> {
        if !(rho.is_finite() && rho > T::zero()) {
            return Err(ConfigError::RhoNotPositive.into());
        }

        let Problem { A, B, Q, R, S } = problem;
        let (At, Bt, St) = (A.transpose(), B.transpose(), S.transpose());

        // ADMM-augmented cost matrices for LQR problem
        let Q_aug = Q + SMatrix::from_diagonal_element(rho);
        let R_aug = R + SMatrix::from_diagonal_element(rho);

        let mut Plqr = Q_aug;
        let mut iterations = None;

        for iter in 0..riccati.max_iter {
            let Klqr = (R_aug + Bt * Plqr * B)
                .try_inverse()
                .ok_or(NumericalError::RpBPBNotInvertible)?
                * (St + Bt * Plqr * A);
            let Pnext = Q_aug + At * Plqr * A - (At * Plqr * B + S) * Klqr;

            if !Pnext.iter().all(|x| x.is_finite()) {
                warn!("riccati recursion for rho = {rho} diverged after {} iterations", iter + 1);
                return Err(NumericalError::NonFiniteValues.into());
            }

            let delta = (Pnext - Plqr).abs().max();
            Plqr = Pnext.symmetric_part();

            if delta <= riccati.tol * T::one().max(Plqr.abs().max()) {
                iterations = Some(iter + 1);
                break;
            }
        }

        let Some(iterations) = iterations else {
            warn!(
                "riccati recursion for rho = {rho} did not converge in {} iterations",
                riccati.max_iter
            );
            return Err(NumericalError::RiccatiNotConverged {
                iterations: riccati.max_iter,
            }
            .into());
        };

        // Gain consistent with the converged cost-to-go
        let RpBPBi = (R_aug + Bt * Plqr * B)
            .try_inverse()
            .ok_or(NumericalError::RpBPBNotInvertible)?;
        let Klqr = RpBPBi * (St + Bt * Plqr * A);
        let AmBKt = (A - B * Klqr).transpose();
        let nKlqr = -Klqr;

        debug!("built cache for rho = {rho} in {iterations} riccati iterations");

        // If RpBPBi and AmBKt are finite, so are all the other values
        ([].iter())
            .chain(RpBPBi.iter())
            .chain(AmBKt.iter())
            .all(|x| x.is_finite())
            .then_some(SingleCache {
                rho,
                nKlqr,
                Plqr,
                RpBPBi,
                AmBKt,
                iterations,
            })
            .ok_or(NumericalError::NonFiniteValues.into())
    }

    pub fn rho(&self) -> T {
        self.rho
    }

    /// The infinite-horizon LQR gain `K`, so that `u = -K x`
    pub fn gain(&self) -> SMatrix<T, NU, NX> {
        -self.nKlqr
    }

    /// The infinite-horizon cost-to-go `P`, also used as terminal cost
    pub fn cost_to_go(&self) -> &SMatrix<T, NX, NX> {
        &self.Plqr
    }

    /// `inv(R + rho * I + B^T * P * B)`
    pub fn input_hessian_inverse(&self) -> &SMatrix<T, NU, NU> {
        &self.RpBPBi
    }

    /// `(A - B * K)^T`
    pub fn closed_loop_transpose(&self) -> &SMatrix<T, NX, NX> {
        &self.AmBKt
    }

    pub fn riccati_iterations(&self) -> usize {
        self.iterations
    }

    /// Largest absolute element of `Ric(P) - P` for the stored cost-to-go,
    /// where `Ric` is one step of the augmented Riccati recursion.
    pub fn riccati_residual(&self, problem: &Problem<T, NX, NU>) -> T {
        let Problem { A, B, Q, S, .. } = problem;
        let Q_aug = Q + SMatrix::from_diagonal_element(self.rho);
        let P = &self.Plqr;

        let Pnext = Q_aug + A.transpose() * P * A
            - (A.transpose() * P * B + S) * self.RpBPBi * (S.transpose() + B.transpose() * P * A);

        (Pnext - P).abs().max()
    }
}

impl<T, const NX: usize, const NU: usize> Cache<T, NX, NU> for SingleCache<T, NX, NU>
where
    T: Scalar + RealField + Copy,
{
    fn build(rho: T, problem: &Problem<T, NX, NU>, config: &Config<T>) -> Result<Self, Error> {
        SingleCache::new(rho, problem, &config.riccati)
    }

    /// Recomputes the cache when the residuals call for a different rho
    fn update_active(
        &mut self,
        problem: &Problem<T, NX, NU>,
        config: &Config<T>,
        prim_residual: T,
        dual_residual: T,
    ) -> Option<T> {
        let adapt = config.adaptive_rho.as_ref()?;
        let prev_rho = self.rho;
        let rho = adapt.propose(prev_rho, prim_residual, dual_residual)?;

        match SingleCache::new(rho, problem, &config.riccati) {
            Ok(cache) => {
                debug!("rho adapted from {prev_rho} to {rho}");
                *self = cache;
                Some(prev_rho / rho)
            }
            Err(err) => {
                warn!("keeping rho = {prev_rho}, rebuild for rho = {rho} failed: {err}");
                None
            }
        }
    }

    fn get_active(&self) -> &SingleCache<T, NX, NU> {
        self
    }
}

/// Contains an array of pre-computed values for a given problem and value of rho.
///
/// The values of rho are spaced geometrically by the adaptation factor around
/// the central value, so adapting rho only switches the active entry.
#[derive(Debug, Clone)]
pub struct ArrayCache<T, const NX: usize, const NU: usize, const NUM: usize> {
    active_index: usize,
    caches: [SingleCache<T, NX, NU>; NUM],
}

impl<T, const NX: usize, const NU: usize, const NUM: usize> ArrayCache<T, NX, NU, NUM>
where
    T: Scalar + RealField + Copy,
{
    pub fn new(
        central_rho: T,
        factor: T,
        problem: &Problem<T, NX, NU>,
        riccati: &Riccati<T>,
    ) -> Result<Self, Error> {
        if NUM == 0 {
            return Err(ConfigError::InvalidSetting("cache array must not be empty").into());
        }

        let active_index = NUM / 2;
        let caches = crate::util::try_array_from_fn(|index| {
            let diff = index as i32 - active_index as i32;
            let mult = factor.powf(convert(diff as f64));
            SingleCache::new(central_rho * mult, problem, riccati)
        })?;

        Ok(Self {
            active_index,
            caches,
        })
    }

    pub fn caches(&self) -> &[SingleCache<T, NX, NU>; NUM] {
        &self.caches
    }
}

impl<T, const NX: usize, const NU: usize, const NUM: usize> Cache<T, NX, NU>
    for ArrayCache<T, NX, NU, NUM>
where
    T: Scalar + RealField + Copy,
{
    fn build(rho: T, problem: &Problem<T, NX, NU>, config: &Config<T>) -> Result<Self, Error> {
        let factor = config
            .adaptive_rho
            .map(|adapt| adapt.factor)
            .unwrap_or_else(|| RhoAdaptation::default().factor);
        ArrayCache::new(rho, factor, problem, &config.riccati)
    }

    fn update_active(
        &mut self,
        _problem: &Problem<T, NX, NU>,
        config: &Config<T>,
        prim_residual: T,
        dual_residual: T,
    ) -> Option<T> {
        let adapt = config.adaptive_rho.as_ref()?;
        let prev_rho = self.caches[self.active_index].rho;

        // Only the direction of the proposal matters, the array fixes the step
        let proposed = adapt.propose(prev_rho, prim_residual, dual_residual)?;

        let next_index = if proposed > prev_rho {
            (self.active_index + 1).min(NUM - 1)
        } else {
            self.active_index.saturating_sub(1)
        };

        if next_index == self.active_index || !adapt.contains(self.caches[next_index].rho) {
            return None;
        }

        self.active_index = next_index;
        let rho = self.caches[next_index].rho;
        debug!("rho switched from {prev_rho} to {rho}");

        // If the value of rho changed we must also rescale all duals
        Some(prev_rho / rho)
    }

    fn get_active(&self) -> &SingleCache<T, NX, NU> {
        &self.caches[self.active_index]
    }
}
