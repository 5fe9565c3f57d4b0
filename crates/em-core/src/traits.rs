//! The evaluation contract implemented by every source model.

use crate::params::SourceParams;

/// A normalized pair-emission source density `S(r)`.
///
/// Implementations define a proper radial density on `r ∈ [0, ∞)` for a fixed
/// set of shape parameters: `∫ S(r) dr ≈ 1`.
///
/// Evaluation never panics and never returns an error. Invalid or degenerate
/// input is reported through the model's diagnostics sink and degrades to a
/// conservative value (0, or a clamped parameter) so that a fit loop issuing
/// 10^5..10^8 calls only has to guard against unexpected zeros.
///
/// All models are usable via `&self` from many concurrent fit workers; any
/// cross-call mutable state (normalization constants, tabulation grids,
/// sampled histograms) is synchronized internally.
pub trait SourceDensity: Send + Sync {
    /// Number of shape slots this model reads from the parameter vector.
    fn n_shape_params(&self) -> usize;

    /// Evaluate the density at the parameter vector's radius slot.
    ///
    /// Returns a non-negative real, or 0 with a logged warning on
    /// invalid/degenerate input.
    fn density(&self, pars: &SourceParams) -> f64;

    /// Single-variable adapter: set the radius slot and re-evaluate.
    ///
    /// Used by external plotting/marginalization code that sweeps `r` while
    /// holding the shape slots fixed.
    fn density_at_radius(&self, radius: f64, pars: &mut SourceParams) -> f64 {
        pars.set_radius(radius);
        self.density(pars)
    }
}
