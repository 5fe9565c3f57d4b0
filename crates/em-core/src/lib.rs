//! # em-core
//!
//! Shared foundation for the emission-source density library:
//! - the [`Error`]/[`Result`] pair used by all construction-time validation,
//! - [`SourceParams`], the ordered parameter vector with fixed positional
//!   slots (momentum, radius, cos θ, then model shape parameters),
//! - the [`SourceDensity`] trait implemented by every radial source model,
//! - the deduplicating [`DiagnosticsSink`] used to surface degenerate-input
//!   warnings without ever raising an error from an evaluation path.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diag;
pub mod error;
pub mod params;
pub mod traits;

pub use diag::{default_sink, CapturingSink, DiagnosticsSink, TracingSink};
pub use error::{Error, Result};
pub use params::SourceParams;
pub use traits::SourceDensity;
