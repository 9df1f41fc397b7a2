use thiserror::Error;

/// A result type for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;

/// An error when building, training or interrogating a [`crate::Emulator`]
#[derive(Error, Debug)]
pub enum EmulatorError {
    /// When a proposed or configured hyperparameter violates domain constraints.
    /// Always recoverable: reject the candidate and keep searching.
    #[error("Invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),
    /// When the covariance matrix is not positive definite for the current
    /// hyperparameters and nugget. Recoverable during likelihood optimization,
    /// fatal when it happens on the accepted hyperparameters of a rebuild.
    #[error("Covariance matrix is not positive definite: {0}")]
    NonPositiveDefiniteCovariance(String),
    /// When the generalized least-squares problem is too ill conditioned
    /// for the candidate hyperparameters
    #[error("Likelihood computation error: {0}")]
    LikelihoodComputation(String),
    /// When the current validation block is requested but none remains
    #[error("Partition exhausted: {0}")]
    PartitionExhausted(String),
    /// When an error is due to a bad value
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    /// When linear algebra computation fails
    #[error(transparent)]
    Linalg(#[from] linfa_linalg::LinalgError),
    /// When reading or writing config, beliefs or dataset files fails
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// When persisting beliefs or diagnostics fails
    #[error("Persistence error: {0}")]
    Persistence(#[from] serde_json::Error),
}
