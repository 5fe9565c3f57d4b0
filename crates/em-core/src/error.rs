//! Error types for the emission-source library.

use thiserror::Error;

/// Library error type.
///
/// Only construction and configuration paths return errors; density
/// evaluation degrades to a warned conservative value instead (see the
/// crate-level docs of `em-source`).
#[derive(Error, Debug)]
pub enum Error {
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
