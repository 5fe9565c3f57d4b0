//! Analytic closed-form emission kernels.
//!
//! All kernels are radial densities normalized to 1 on `r ∈ [0, ∞)` for valid
//! shape parameters. The θ-marginalized variants divide by 2 because a flat
//! cos θ distribution integrates to 2 and the joint density must stay
//! normalized.

use std::f64::consts::PI;
use std::sync::Arc;

use em_core::diag::{default_sink, DiagnosticsSink};
use em_core::{SourceDensity, SourceParams};

/// Legacy size-matching factor for the Cauchy kernel: a Cauchy source with
/// width `2.97 σ` has roughly the same bulk extent as a Gaussian of size `σ`.
pub const CAUCHY_SIZE_MATCH: f64 = 2.97;

/// Gaussian radial emission density of size `σ`:
///
/// `S(r) = 4π r² (4π σ²)^{-3/2} exp(-r²/(4σ²))`
#[inline]
pub fn gaussian_radial(r: f64, size: f64) -> f64 {
    4.0 * PI * r * r * (4.0 * PI * size * size).powf(-1.5) * (-(r * r) / (4.0 * size * size)).exp()
}

/// Isotropic Cauchy radial density of scale `σ`:
///
/// `S(r) = (4σ/π) r² / (r² + σ²)²`
///
/// This is the radial reduction of the spherically symmetric 3D 1-stable
/// distribution with characteristic function `exp(-σ|t|)`; the stable-family
/// short circuit at stability 1 uses it directly.
#[inline]
pub fn cauchy_radial(r: f64, scale: f64) -> f64 {
    let r2 = r * r;
    let s2 = scale * scale;
    4.0 * scale / PI * r2 / ((r2 + s2) * (r2 + s2))
}

/// Legacy Cauchy kernel with the `2.97 σ` size-matching convention:
///
/// `S(r) = 2.97 · 2σ r²/π · (r² + (0.5 · 2.97 σ)²)^{-2}`
#[inline]
pub fn cauchy_matched_radial(r: f64, size: f64) -> f64 {
    let r2 = r * r;
    CAUCHY_SIZE_MATCH * 2.0 * size * r2 / PI
        * (r2 + 0.25 * CAUCHY_SIZE_MATCH * CAUCHY_SIZE_MATCH * size * size).powi(-2)
}

fn size_is_valid(size: f64) -> bool {
    size.is_finite() && size > 0.0
}

/// Single-Gaussian source. Shape slots: `[σ]`.
pub struct GaussianSource {
    diag: Arc<dyn DiagnosticsSink>,
}

impl GaussianSource {
    /// Create with the default diagnostics sink.
    pub fn new() -> Self {
        Self { diag: default_sink() }
    }

    /// Create with an injected diagnostics sink.
    pub fn with_sink(diag: Arc<dyn DiagnosticsSink>) -> Self {
        Self { diag }
    }
}

impl Default for GaussianSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceDensity for GaussianSource {
    fn n_shape_params(&self) -> usize {
        1
    }

    fn density(&self, pars: &SourceParams) -> f64 {
        let r = pars.radius();
        let size = pars.shape(0);
        if !size_is_valid(size) {
            self.diag.warn("gaussian.size", &format!("Gaussian source size must be finite and > 0, got {size}; returning 0"));
            return 0.0;
        }
        if r <= 0.0 {
            return 0.0;
        }
        gaussian_radial(r, size)
    }
}

/// Gaussian source for callers that also sample a flat cos θ. Shape: `[σ]`.
pub struct GaussianThetaSource {
    inner: GaussianSource,
}

impl GaussianThetaSource {
    /// Create with the default diagnostics sink.
    pub fn new() -> Self {
        Self { inner: GaussianSource::new() }
    }

    /// Create with an injected diagnostics sink.
    pub fn with_sink(diag: Arc<dyn DiagnosticsSink>) -> Self {
        Self { inner: GaussianSource::with_sink(diag) }
    }
}

impl Default for GaussianThetaSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceDensity for GaussianThetaSource {
    fn n_shape_params(&self) -> usize {
        1
    }

    fn density(&self, pars: &SourceParams) -> f64 {
        0.5 * self.inner.density(pars)
    }
}

/// Cauchy source with the legacy `2.97 σ` width convention. Shape: `[σ]`.
pub struct CauchySource {
    diag: Arc<dyn DiagnosticsSink>,
}

impl CauchySource {
    /// Create with the default diagnostics sink.
    pub fn new() -> Self {
        Self { diag: default_sink() }
    }

    /// Create with an injected diagnostics sink.
    pub fn with_sink(diag: Arc<dyn DiagnosticsSink>) -> Self {
        Self { diag }
    }
}

impl Default for CauchySource {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceDensity for CauchySource {
    fn n_shape_params(&self) -> usize {
        1
    }

    fn density(&self, pars: &SourceParams) -> f64 {
        let r = pars.radius();
        let size = pars.shape(0);
        if !size_is_valid(size) {
            self.diag.warn("cauchy.size", &format!("Cauchy source size must be finite and > 0, got {size}; returning 0"));
            return 0.0;
        }
        if r <= 0.0 {
            return 0.0;
        }
        cauchy_matched_radial(r, size)
    }
}

/// Cauchy source for callers that also sample a flat cos θ. Shape: `[σ]`.
pub struct CauchyThetaSource {
    inner: CauchySource,
}

impl CauchyThetaSource {
    /// Create with the default diagnostics sink.
    pub fn new() -> Self {
        Self { inner: CauchySource::new() }
    }

    /// Create with an injected diagnostics sink.
    pub fn with_sink(diag: Arc<dyn DiagnosticsSink>) -> Self {
        Self { inner: CauchySource::with_sink(diag) }
    }
}

impl Default for CauchyThetaSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceDensity for CauchyThetaSource {
    fn n_shape_params(&self) -> usize {
        1
    }

    fn density(&self, pars: &SourceParams) -> f64 {
        0.5 * self.inner.density(pars)
    }
}

/// Two-Gaussian mixture. Shape slots: `[σ1, σ2, w1]` with `w1 ∈ [0, 1]`.
pub struct DoubleGaussianSource {
    diag: Arc<dyn DiagnosticsSink>,
}

impl DoubleGaussianSource {
    /// Create with the default diagnostics sink.
    pub fn new() -> Self {
        Self { diag: default_sink() }
    }

    /// Create with an injected diagnostics sink.
    pub fn with_sink(diag: Arc<dyn DiagnosticsSink>) -> Self {
        Self { diag }
    }
}

impl Default for DoubleGaussianSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceDensity for DoubleGaussianSource {
    fn n_shape_params(&self) -> usize {
        3
    }

    fn density(&self, pars: &SourceParams) -> f64 {
        let r = pars.radius();
        let size1 = pars.shape(0);
        let size2 = pars.shape(1);
        let mut w1 = pars.shape(2);
        if !size_is_valid(size1) || !size_is_valid(size2) {
            self.diag.warn(
                "double_gaussian.size",
                &format!("DoubleGaussian sizes must be finite and > 0, got {size1}, {size2}; returning 0"),
            );
            return 0.0;
        }
        if !w1.is_finite() {
            self.diag.warn("double_gaussian.weight", &format!("DoubleGaussian weight must be finite, got {w1}; returning 0"));
            return 0.0;
        }
        if !(0.0..=1.0).contains(&w1) {
            self.diag.warn("double_gaussian.weight_clamped", &format!("DoubleGaussian weight {w1} clamped into [0, 1]"));
            w1 = w1.clamp(0.0, 1.0);
        }
        if r <= 0.0 {
            return 0.0;
        }
        w1 * gaussian_radial(r, size1) + (1.0 - w1) * gaussian_radial(r, size2)
    }
}

/// Gaussian + Cauchy mixture. Shape slots: `[σ1, σ2, w1]`.
///
/// The Cauchy component uses the plain `0.5 σ2` half-width (no 2.97 matching
/// factor), i.e. [`cauchy_radial`] with scale `0.5 σ2` — kept distinct from
/// [`CauchySource`] on purpose.
pub struct GaussCauchySource {
    diag: Arc<dyn DiagnosticsSink>,
}

impl GaussCauchySource {
    /// Create with the default diagnostics sink.
    pub fn new() -> Self {
        Self { diag: default_sink() }
    }

    /// Create with an injected diagnostics sink.
    pub fn with_sink(diag: Arc<dyn DiagnosticsSink>) -> Self {
        Self { diag }
    }
}

impl Default for GaussCauchySource {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceDensity for GaussCauchySource {
    fn n_shape_params(&self) -> usize {
        3
    }

    fn density(&self, pars: &SourceParams) -> f64 {
        let r = pars.radius();
        let size1 = pars.shape(0);
        let size2 = pars.shape(1);
        let mut w1 = pars.shape(2);
        if !size_is_valid(size1) || !size_is_valid(size2) {
            self.diag.warn(
                "gauss_cauchy.size",
                &format!("GaussCauchy sizes must be finite and > 0, got {size1}, {size2}; returning 0"),
            );
            return 0.0;
        }
        if !w1.is_finite() {
            self.diag.warn("gauss_cauchy.weight", &format!("GaussCauchy weight must be finite, got {w1}; returning 0"));
            return 0.0;
        }
        if !(0.0..=1.0).contains(&w1) {
            self.diag.warn("gauss_cauchy.weight_clamped", &format!("GaussCauchy weight {w1} clamped into [0, 1]"));
            w1 = w1.clamp(0.0, 1.0);
        }
        if r <= 0.0 {
            return 0.0;
        }
        w1 * gaussian_radial(r, size1) + (1.0 - w1) * cauchy_radial(r, 0.5 * size2)
    }
}
