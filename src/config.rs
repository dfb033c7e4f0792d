use nalgebra::{RealField, Scalar, convert};

use crate::ConfigError;

/// How slack and dual variables from the previous solve are reused
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum WarmStart {
    /// Reset slack and dual variables before every solve
    Cold,
    /// Keep slack and dual variables exactly as the previous solve left them
    Hold,
    /// Shift slack and dual variables one stage forward in time before solving
    TimeShift,
}

/// Solver settings. Read by the solver, never written by it.
#[derive(Debug, Clone)]
pub struct Config<T> {
    /// Absolute tolerance on the primal residual
    pub prim_tol: T,
    /// Absolute tolerance on the dual residual
    pub dual_tol: T,
    /// Primal tolerance relative to the magnitude of the trajectory
    pub rel_prim_tol: T,
    /// Dual tolerance relative to the magnitude of the dual variables
    pub rel_dual_tol: T,
    /// Hard cap on the number of ADMM iterations per solve
    pub max_iter: usize,
    /// Evaluate termination every `do_check` iterations
    pub do_check: usize,
    pub warm_start: WarmStart,
    /// Residual balancing of rho, disabled when `None`
    pub adaptive_rho: Option<RhoAdaptation<T>>,
    /// Budget for the cache precomputation
    pub riccati: Riccati<T>,
}

impl<T: Scalar + RealField + Copy> Default for Config<T> {
    fn default() -> Self {
        Self {
            prim_tol: convert(1e-3),
            dual_tol: convert(1e-3),
            rel_prim_tol: T::zero(),
            rel_dual_tol: T::zero(),
            max_iter: 100,
            do_check: 1,
            warm_start: WarmStart::TimeShift,
            adaptive_rho: None,
            riccati: Riccati::default(),
        }
    }
}

impl<T: Scalar + RealField + Copy> Config<T> {
    pub fn with_tolerances(self, prim_tol: T, dual_tol: T) -> Self {
        Self {
            prim_tol,
            dual_tol,
            ..self
        }
    }

    pub fn with_relative_tolerances(self, rel_prim_tol: T, rel_dual_tol: T) -> Self {
        Self {
            rel_prim_tol,
            rel_dual_tol,
            ..self
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self { max_iter, ..self }
    }

    pub fn with_do_check(self, do_check: usize) -> Self {
        Self { do_check, ..self }
    }

    pub fn with_warm_start(self, warm_start: WarmStart) -> Self {
        Self { warm_start, ..self }
    }

    pub fn with_adaptive_rho(self, adaptive_rho: RhoAdaptation<T>) -> Self {
        Self {
            adaptive_rho: Some(adaptive_rho),
            ..self
        }
    }

    pub fn with_riccati(self, riccati: Riccati<T>) -> Self {
        Self { riccati, ..self }
    }

    /// Checks that every setting is within its valid range
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = |x: T| x.is_finite() && x >= T::zero();

        if !(non_negative(self.prim_tol) && non_negative(self.dual_tol)) {
            return Err(ConfigError::InvalidSetting("tolerances must be finite and non-negative"));
        }
        if !(non_negative(self.rel_prim_tol) && non_negative(self.rel_dual_tol)) {
            return Err(ConfigError::InvalidSetting(
                "relative tolerances must be finite and non-negative",
            ));
        }
        if self.max_iter == 0 {
            return Err(ConfigError::InvalidSetting("max_iter must be at least 1"));
        }
        if self.do_check == 0 {
            return Err(ConfigError::InvalidSetting("do_check must be at least 1"));
        }
        if let Some(adapt) = &self.adaptive_rho {
            adapt.validate()?;
        }
        self.riccati.validate()
    }
}

/// Rule for rebalancing rho from the ratio of primal and dual residuals.
///
/// When one residual exceeds the other by more than `threshold`, rho is
/// multiplied (primal larger) or divided (dual larger) by `factor`, and
/// clamped to `[min, max]`.
#[derive(Debug, Clone, Copy)]
pub struct RhoAdaptation<T> {
    pub min: T,
    pub max: T,
    pub threshold: T,
    pub factor: T,
}

impl<T: Scalar + RealField + Copy> Default for RhoAdaptation<T> {
    fn default() -> Self {
        Self {
            min: convert(0.1),
            max: convert(100.0),
            threshold: convert(10.0),
            factor: convert(1.8),
        }
    }
}

impl<T: Scalar + RealField + Copy> RhoAdaptation<T> {
    pub fn with_bounds(self, min: T, max: T) -> Self {
        Self { min, max, ..self }
    }

    /// Proposes a new value of rho, or `None` if the residuals are balanced
    /// or rho already sits at the bound it would move towards.
    ///
    /// `dual_residual` is expected in unscaled form, i.e. already multiplied by rho.
    pub fn propose(&self, rho: T, prim_residual: T, dual_residual: T) -> Option<T> {
        let candidate = if prim_residual > dual_residual * self.threshold {
            rho * self.factor
        } else if dual_residual > prim_residual * self.threshold {
            rho / self.factor
        } else {
            return None;
        };

        let candidate = candidate.max(self.min).min(self.max);
        (candidate != rho).then_some(candidate)
    }

    pub(crate) fn contains(&self, rho: T) -> bool {
        rho >= self.min && rho <= self.max
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min.is_finite() && self.max.is_finite() && self.min > T::zero()) {
            return Err(ConfigError::InvalidSetting("adaptive rho bounds must be finite and positive"));
        }
        if self.min > self.max {
            return Err(ConfigError::InvalidSetting("adaptive rho minimum exceeds its maximum"));
        }
        if !(self.threshold >= T::one() && self.factor > T::one()) {
            return Err(ConfigError::InvalidSetting(
                "adaptive rho needs threshold >= 1 and factor > 1",
            ));
        }
        Ok(())
    }
}

/// Iteration budget for the infinite-horizon Riccati recursion
#[derive(Debug, Clone, Copy)]
pub struct Riccati<T> {
    pub max_iter: usize,
    /// Convergence tolerance on `|P+ - P|`, relative to `max(1, |P|)`
    pub tol: T,
}

impl<T: Scalar + RealField + Copy> Default for Riccati<T> {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: T::default_epsilon().sqrt(),
        }
    }
}

impl<T: Scalar + RealField + Copy> Riccati<T> {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iter == 0 {
            return Err(ConfigError::InvalidSetting("riccati max_iter must be at least 1"));
        }
        if !(self.tol.is_finite() && self.tol > T::zero()) {
            return Err(ConfigError::InvalidSetting("riccati tolerance must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(Config::<f64>::default().validate(), Ok(()));
        assert_eq!(Config::<f32>::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_zero_iteration_cap() {
        let config = Config::<f64>::default().with_max_iter(0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSetting(_))));
    }

    #[test]
    fn rejects_crossed_rho_bounds() {
        let adapt = RhoAdaptation::<f64>::default().with_bounds(10.0, 1.0);
        let config = Config::default().with_adaptive_rho(adapt);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSetting(_))));
    }

    #[test]
    fn proposes_towards_balance() {
        let adapt = RhoAdaptation::<f64>::default();

        // Primal residual dominates, increase rho
        assert_eq!(adapt.propose(1.0, 1.0, 0.01), Some(1.8));

        // Dual residual dominates, decrease rho
        assert_eq!(adapt.propose(1.8, 0.01, 1.0), Some(1.0));

        // Balanced residuals leave rho alone
        assert_eq!(adapt.propose(1.0, 0.5, 0.4), None);
    }

    #[test]
    fn proposal_is_clamped() {
        let adapt = RhoAdaptation::<f64>::default().with_bounds(0.5, 2.0);
        assert_eq!(adapt.propose(1.5, 1.0, 0.0), Some(2.0));
        assert_eq!(adapt.propose(2.0, 1.0, 0.0), None);
        assert_eq!(adapt.propose(0.5, 0.0, 1.0), None);
    }
}
