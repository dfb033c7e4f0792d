use thiserror::Error;

/// Errors that can occur while setting up or reconfiguring a solver
#[derive(Debug, PartialEq, Clone, Copy, Error)]
pub enum Error {
    /// The problem or the settings are malformed. Never retried automatically.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// The cache could not be computed for the requested value of rho.
    #[error("numerical failure: {0}")]
    Numerical(#[from] NumericalError),
}

/// Problems with dimensions, weights or settings, detected at setup
#[derive(Debug, PartialEq, Clone, Copy, Error)]
pub enum ConfigError {
    /// The horizons must satisfy `HX == HU + 1` and `HU >= 2`
    #[error("horizon lengths must satisfy HX == HU + 1 and HU >= 2")]
    InvalidHorizonLength,
    /// Both the state and the input must have at least one dimension
    #[error("state and input dimensions must be non-zero")]
    ZeroDimension,
    /// `Q - S * R^-1 * S^T` must be positive semidefinite
    #[error("state cost is not positive semidefinite")]
    QNotPositiveSemidefinite,
    /// `R` must be positive definite
    #[error("input cost is not positive definite")]
    RNotPositiveDefinite,
    /// The dynamics or the cost contain Inf or NaN
    #[error("model contains non-finite values")]
    NonFiniteModel,
    /// The value of rho must be strictly positive `(rho > 0)`
    #[error("rho must be strictly positive")]
    RhoNotPositive,
    /// A field of [`Config`](crate::Config) is out of its valid range
    #[error("invalid setting: {0}")]
    InvalidSetting(&'static str),
}

/// Failures of the cache computation for a specific value of rho
#[derive(Debug, PartialEq, Clone, Copy, Error)]
pub enum NumericalError {
    /// The matrix `R_aug + B^T * P * B` is not invertible
    #[error("R_aug + B^T * P * B is not invertible")]
    RpBPBNotInvertible,
    /// The resulting matrices contained non-finite elements (Inf or NaN)
    #[error("cache contains non-finite values")]
    NonFiniteValues,
    /// The Riccati recursion did not reach its tolerance within the iteration budget
    #[error("riccati recursion did not converge within {iterations} iterations")]
    RiccatiNotConverged { iterations: usize },
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::string::ToString;

    #[test]
    fn wraps_config_errors() {
        let err: Error = ConfigError::RNotPositiveDefinite.into();
        assert_eq!(err, Error::Config(ConfigError::RNotPositiveDefinite));
        assert!(err.to_string().contains("not positive definite"));
    }

    #[test]
    fn reports_riccati_budget() {
        let err: Error = NumericalError::RiccatiNotConverged { iterations: 1000 }.into();
        assert!(err.to_string().contains("1000"));
    }
}
