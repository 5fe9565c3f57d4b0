//! Gauss ⊗ exponential-decay convolution sources with regime dispatch.
//!
//! The ansatz: single particles are emitted from a Gaussian profile and then
//! travel for an exponentially distributed decay time, shifting the effective
//! emission point by `κ = τ·k/m` per decaying constituent. The convolution
//! has an exact error-function closed form, but it is numerically stable only
//! while the kernel size and the decay shift are comparable. Outside that
//! band a uniformly stable approximation is used instead: an ordinary
//! Gaussian evaluated at a remapped radius (logarithmic far field blended
//! with an arctangent near-field correction), renormalized through
//! [`NormalizationGuard`].
//!
//! Dispatch policy: `σ/κ > 3` for either constituent, or `κ = 0`, selects the
//! approximate/collapsed path; otherwise the exact closed form.

use std::f64::consts::PI;
use std::sync::Arc;

use em_core::diag::{default_sink, DiagnosticsSink};
use em_core::{SourceDensity, SourceParams};
use statrs::function::erf::erf;

use crate::kernels::gaussian_radial;
use crate::norm::{Fingerprint, NormalizationGuard};

/// Stability-ratio threshold between the exact and approximate branches.
pub const DISPATCH_RATIO: f64 = 3.0;

/// Far-field length scale of the logarithmic radial remap.
const REMAP_SCALE: f64 = 80.0;

/// Subdivision count of the normalization integral.
const NORM_SUBDIVISIONS: usize = 256;

/// The normalization domain extends to `8 × (σ + κ)`.
const DOMAIN_FACTOR: f64 = 8.0;

/// Evaluation mode of the approximate branch.
///
/// The normalization integral re-enters the same kernel through the
/// integrator callback; in `ComputingNormalization` the kernel returns raw
/// (un-normalized) values so the callback never recurses into another
/// normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Normalized evaluation (the public contract).
    Direct,
    /// Raw kernel values for the normalization integrand.
    ComputingNormalization,
}

/// Radial remap of the approximate branch: `r² → ln²(r)`-like growth in the
/// far field plus an arctangent near-field correction, so the remapped
/// Gaussian mimics the decay-shifted profile without the unstable closed
/// form. Identity when `κ = 0`.
fn remap_radius(r: f64, kappa: f64) -> f64 {
    if kappa == 0.0 {
        return r;
    }
    let remapped = (r * kappa / REMAP_SCALE + 1.0).ln() * REMAP_SCALE / kappa
        - kappa * (1.5 * r / kappa).atan() * 2.0 / PI;
    remapped.max(0.0)
}

/// Un-normalized approximate kernel, with the normalization handled through
/// the guard when evaluating in [`EvalMode::Direct`].
fn approx_density(
    norm: &NormalizationGuard,
    fingerprint: &Fingerprint,
    r: f64,
    sig: f64,
    kappa: f64,
    mode: EvalMode,
) -> f64 {
    let raw = gaussian_radial(remap_radius(r, kappa), sig);
    match mode {
        EvalMode::ComputingNormalization => raw,
        EvalMode::Direct => {
            let upper = DOMAIN_FACTOR * (sig + kappa);
            let constant = norm.constant_for(fingerprint.clone(), upper, NORM_SUBDIVISIONS, |rr| {
                approx_density(norm, fingerprint, rr, sig, kappa, EvalMode::ComputingNormalization)
            });
            raw / constant
        }
    }
}

/// The `exp((σ² - rκ)/κ²) · (...)` bracket shared by the equal- and
/// distinct-κ exact branches.
fn exact_bracket(r: f64, s: f64, t: f64) -> f64 {
    let sqrt_pi = PI.sqrt();
    let s2 = s * s;
    let t2 = t * t;
    // d = 2σ² - rκ changes sign at the removable singularity r = 2σ²/κ.
    let d = 2.0 * s2 - r * t;
    let abs_d = d.abs();
    let q = d * d / (4.0 * s2 * t2);
    let abs_h = (s / t - r / (2.0 * s)).abs();
    let erf_st = erf(s / t);
    let erf_d = erf(abs_d / (2.0 * s * t));

    let a = -2.0 * s2 * s / ((s2 / t2).exp() * t);
    let b = 4.0 * ((-s2 / t2).exp() - 1.0) * s2 * s / t;
    let c = -4.0 * ((-q).exp() - 1.0) * s2 * s / t;
    let d1 = sqrt_pi * s2 * erf_st;
    let e = 2.0 * sqrt_pi * s2 * s2 * erf_st / t2;
    let f = -sqrt_pi * s2 * s * d * erf_d / (t2 * t * abs_h);
    let g = -d.powi(3) * (-abs_d + q.exp() * sqrt_pi * s * t * erf_d)
        / (8.0 * q.exp() * s2 * t2 * t2 * abs_h.powi(3));

    ((s2 - r * t) / t2).exp() * (a + b + c + d1 + e + f + g)
}

/// Exact convolution density for a single decaying constituent with decay
/// shift `κ` (also the equal-κ branch of the pair form). `κ = 0` collapses to
/// the plain Gaussian.
pub fn gauss_exp_exact_single(r: f64, sig: f64, kappa: f64) -> f64 {
    if kappa == 0.0 {
        return gaussian_radial(r, sig);
    }
    exact_bracket(r, sig, kappa) / (PI.sqrt() * sig * sig * kappa)
}

/// Exact one-sided branch: one constituent decays (`κ`), the other is
/// primary.
pub fn gauss_exp_exact_one_sided(r: f64, s: f64, t: f64) -> f64 {
    let sqrt_pi = PI.sqrt();
    let s2 = s * s;
    let t2 = t * t;
    let r2 = r * r;
    let pre = (-r2 / (4.0 * s2) - r / t).exp();
    let term1 = 4.0 * (r / t).exp() * s * t * (s2 + t2);
    let term2 = -2.0 * (r2 / (4.0 * s2)).exp() * s * t * (2.0 * s2 + t * (2.0 * t - r));
    let term3 = (r2 / (4.0 * s2) + s2 / t2).exp()
        * sqrt_pi
        * (-4.0 * s2 * s2 + 2.0 * s2 * (r - 3.0 * t) * t + r * t2 * t)
        * (erf(r / (2.0 * s) - s / t) + erf(s / t));
    pre * (term1 + term2 + term3) / (sqrt_pi * t2 * t2 * t)
}

/// Exact distinct-κ branch of the pair convolution.
pub fn gauss_exp_exact_distinct(r: f64, sig: f64, kappa1: f64, kappa2: f64) -> f64 {
    (exact_bracket(r, sig, kappa1) - exact_bracket(r, sig, kappa2))
        / (PI.sqrt() * sig * sig * (kappa1 - kappa2))
}

fn shape_is_valid(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

/// Single-constituent Gauss ⊗ Exp source. Shape slots: `[σ, κ]` where
/// `κ = τ·k/m` is supplied directly by the caller.
pub struct GaussExpSimpleSource {
    norm: NormalizationGuard,
    diag: Arc<dyn DiagnosticsSink>,
}

impl GaussExpSimpleSource {
    /// Create with the default diagnostics sink.
    pub fn new() -> Self {
        Self::with_sink(default_sink())
    }

    /// Create with an injected diagnostics sink.
    pub fn with_sink(diag: Arc<dyn DiagnosticsSink>) -> Self {
        Self { norm: NormalizationGuard::new(diag.clone()), diag }
    }

    /// Number of normalization recomputes (one per distinct fingerprint
    /// actually hit by the approximate branch).
    pub fn normalization_recomputes(&self) -> u64 {
        self.norm.recompute_count()
    }

    fn read_shape(&self, pars: &SourceParams) -> Option<(f64, f64)> {
        let sig = pars.shape(0);
        let kappa = pars.shape(1);
        if !shape_is_valid(sig) {
            self.diag.warn(
                "gauss_exp_simple.size",
                &format!("GaussExpSimple size must be finite and > 0, got {sig}; returning 0"),
            );
            return None;
        }
        if !kappa.is_finite() || kappa < 0.0 {
            self.diag.warn(
                "gauss_exp_simple.kappa",
                &format!("GaussExpSimple decay shift must be finite and >= 0, got {kappa}; returning 0"),
            );
            return None;
        }
        Some((sig, kappa))
    }

    fn guard_output(&self, v: f64) -> f64 {
        if !v.is_finite() {
            self.diag.warn(
                "gauss_exp_simple.nonfinite",
                "GaussExpSimple produced a non-finite value (decay-constant coincidence); returning 0",
            );
            return 0.0;
        }
        if v < 0.0 {
            self.diag.warn(
                "gauss_exp_simple.negative",
                "GaussExpSimple clamped a small negative tail value to 0",
            );
            return 0.0;
        }
        v
    }

    /// Force the approximate branch (remap + renormalize) regardless of the
    /// stability ratio. Exposed for regime-continuity studies.
    pub fn density_approx(&self, pars: &SourceParams) -> f64 {
        let Some((sig, kappa)) = self.read_shape(pars) else { return 0.0 };
        let r = pars.radius();
        if r <= 0.0 {
            return 0.0;
        }
        let fingerprint = Fingerprint::new(&[pars.momentum(), sig, kappa]);
        self.guard_output(approx_density(&self.norm, &fingerprint, r, sig, kappa, EvalMode::Direct))
    }

    /// Force the exact closed form regardless of the stability ratio.
    /// Exposed for regime-continuity studies.
    pub fn density_exact(&self, pars: &SourceParams) -> f64 {
        let Some((sig, kappa)) = self.read_shape(pars) else { return 0.0 };
        let r = pars.radius();
        if r <= 0.0 {
            return 0.0;
        }
        self.guard_output(gauss_exp_exact_single(r, sig, kappa))
    }
}

impl Default for GaussExpSimpleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceDensity for GaussExpSimpleSource {
    fn n_shape_params(&self) -> usize {
        2
    }

    fn density(&self, pars: &SourceParams) -> f64 {
        let Some((sig, kappa)) = self.read_shape(pars) else { return 0.0 };
        let r = pars.radius();
        if r <= 0.0 {
            return 0.0;
        }
        let v = if kappa == 0.0 {
            // Trivial collapse to the un-convolved kernel.
            gaussian_radial(r, sig)
        } else if sig / kappa > DISPATCH_RATIO {
            let fingerprint = Fingerprint::new(&[pars.momentum(), sig, kappa]);
            approx_density(&self.norm, &fingerprint, r, sig, kappa, EvalMode::Direct)
        } else {
            gauss_exp_exact_single(r, sig, kappa)
        };
        self.guard_output(v)
    }
}

/// Two-constituent Gauss ⊗ Exp source with per-constituent decay kinematics.
///
/// Shape slots: `[σ1, σ2, τ1, m1, τ2, m2]`. The decay shifts are
/// `κᵢ = τᵢ·k/mᵢ` (zero when `mᵢ ≤ 0` — pure emission, no shift) and the
/// combined kernel size is `σ = sqrt(½(σ1² + σ2²))`.
pub struct GaussExpSource {
    norm: NormalizationGuard,
    diag: Arc<dyn DiagnosticsSink>,
}

impl GaussExpSource {
    /// Create with the default diagnostics sink.
    pub fn new() -> Self {
        Self::with_sink(default_sink())
    }

    /// Create with an injected diagnostics sink.
    pub fn with_sink(diag: Arc<dyn DiagnosticsSink>) -> Self {
        Self { norm: NormalizationGuard::new(diag.clone()), diag }
    }

    /// Number of normalization recomputes performed by the approximate
    /// branch.
    pub fn normalization_recomputes(&self) -> u64 {
        self.norm.recompute_count()
    }

    fn kinematics(&self, pars: &SourceParams) -> Option<(f64, f64, f64, f64)> {
        let sig1 = pars.shape(0);
        let sig2 = pars.shape(1);
        let tau1 = pars.shape(2);
        let m1 = pars.shape(3);
        let tau2 = pars.shape(4);
        let m2 = pars.shape(5);
        if !shape_is_valid(sig1) || !shape_is_valid(sig2) {
            self.diag.warn(
                "gauss_exp.size",
                &format!("GaussExp sizes must be finite and > 0, got {sig1}, {sig2}; returning 0"),
            );
            return None;
        }
        if !(tau1.is_finite() && tau1 >= 0.0 && tau2.is_finite() && tau2 >= 0.0) {
            self.diag.warn(
                "gauss_exp.lifetime",
                &format!("GaussExp lifetimes must be finite and >= 0, got {tau1}, {tau2}; returning 0"),
            );
            return None;
        }
        if !(m1.is_finite() && m2.is_finite()) {
            self.diag.warn(
                "gauss_exp.mass",
                &format!("GaussExp masses must be finite, got {m1}, {m2}; returning 0"),
            );
            return None;
        }
        let mass = 0.5 * (m1 + m2);
        if mass <= 0.0 {
            self.diag.warn(
                "gauss_exp.mass_nonpositive",
                &format!("GaussExp got non-positive mean mass {mass}; returning 0"),
            );
            return None;
        }
        let mom = pars.momentum();
        // Non-positive constituent mass degenerates that lifetime
        // contribution to zero (pure emission).
        let kappa1 = if m1 > 0.0 { tau1 * mom / m1 } else { 0.0 };
        let kappa2 = if m2 > 0.0 { tau2 * mom / m2 } else { 0.0 };
        if kappa1 < 0.0 || kappa2 < 0.0 {
            self.diag.warn(
                "gauss_exp.kappa_negative",
                &format!("GaussExp decay shifts must be >= 0, got {kappa1}, {kappa2}; returning 0"),
            );
            return None;
        }
        let sig = (0.5 * (sig1 * sig1 + sig2 * sig2)).sqrt();
        Some((sig, kappa1, kappa2, mass))
    }

    fn guard_output(&self, v: f64) -> f64 {
        if !v.is_finite() {
            self.diag.warn(
                "gauss_exp.nonfinite",
                "GaussExp produced a non-finite value (decay-constant coincidence); returning 0",
            );
            return 0.0;
        }
        if v < 0.0 {
            self.diag.warn("gauss_exp.negative", "GaussExp clamped a small negative tail value to 0");
            return 0.0;
        }
        v
    }

    /// The exact closed form with its four algebraic branches, bypassing the
    /// stability dispatch. Exposed for regime-continuity studies.
    pub fn density_exact(&self, pars: &SourceParams) -> f64 {
        let Some((sig, kappa1, kappa2, _mass)) = self.kinematics(pars) else { return 0.0 };
        let r = pars.radius();
        if r <= 0.0 {
            return 0.0;
        }
        self.guard_output(self.exact_branches(r, sig, kappa1, kappa2))
    }

    fn exact_branches(&self, r: f64, sig: f64, kappa1: f64, kappa2: f64) -> f64 {
        if kappa1 == 0.0 && kappa2 == 0.0 {
            gaussian_radial(r, sig)
        } else if kappa1 == 0.0 {
            gauss_exp_exact_one_sided(r, sig, kappa2)
        } else if kappa2 == 0.0 {
            gauss_exp_exact_one_sided(r, sig, kappa1)
        } else if kappa1 == kappa2 {
            // Open question inherited from the derivation: it is unverified
            // whether this branch should use the combined constant κ1 + κ2
            // instead of the single-constituent form. Kept as derived.
            self.diag.warn(
                "gauss_exp.equal_kappa_combined_constant",
                "GaussExp equal decay constants: using the single-constituent closed form; combined-constant variant unverified",
            );
            gauss_exp_exact_single(r, sig, kappa1)
        } else {
            gauss_exp_exact_distinct(r, sig, kappa1, kappa2)
        }
    }
}

impl Default for GaussExpSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceDensity for GaussExpSource {
    fn n_shape_params(&self) -> usize {
        6
    }

    fn density(&self, pars: &SourceParams) -> f64 {
        let Some((sig, kappa1, kappa2, mass)) = self.kinematics(pars) else { return 0.0 };
        let r = pars.radius();
        if r <= 0.0 {
            return 0.0;
        }
        // κ = 0 makes the ratio infinite, which routes the trivial collapse
        // through the uniformly stable branch as well.
        let unstable = sig / kappa1 > DISPATCH_RATIO || sig / kappa2 > DISPATCH_RATIO;
        let v = if kappa1 == 0.0 && kappa2 == 0.0 {
            gaussian_radial(r, sig)
        } else if unstable {
            let kappa = kappa1 + kappa2;
            let fingerprint = Fingerprint::new(&[pars.momentum(), sig, kappa, mass]);
            approx_density(&self.norm, &fingerprint, r, sig, kappa, EvalMode::Direct)
        } else {
            self.exact_branches(r, sig, kappa1, kappa2)
        };
        self.guard_output(v)
    }
}

/// Primary/secondary mixture for a non-identical pair.
///
/// Shape slots: `[σ, κA, κB, fA, fB]` where `fA`, `fB` are the primary
/// fractions of the two particles (clamped into `[0, 1]`). The four
/// emission topologies mix single-constituent convolutions:
/// both primary (κ = 0), one resonant (κ = κA or κB), both resonant
/// (κ = κA + κB).
///
/// Each topology owns its own [`GaussExpSimpleSource`] so the four
/// normalization fingerprints stay cached independently across a radius
/// sweep instead of evicting one another.
pub struct GaussExpPairSource {
    terms: [GaussExpSimpleSource; 4],
    diag: Arc<dyn DiagnosticsSink>,
}

impl GaussExpPairSource {
    /// Create with the default diagnostics sink.
    pub fn new() -> Self {
        Self::with_sink(default_sink())
    }

    /// Create with an injected diagnostics sink.
    pub fn with_sink(diag: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            terms: [
                GaussExpSimpleSource::with_sink(diag.clone()),
                GaussExpSimpleSource::with_sink(diag.clone()),
                GaussExpSimpleSource::with_sink(diag.clone()),
                GaussExpSimpleSource::with_sink(diag.clone()),
            ],
            diag,
        }
    }

    /// Total normalization recomputes across the four topology terms.
    pub fn normalization_recomputes(&self) -> u64 {
        self.terms.iter().map(|t| t.normalization_recomputes()).sum()
    }

    fn clamp_fraction(&self, name: &str, key: &'static str, f: f64) -> Option<f64> {
        if !f.is_finite() {
            self.diag.warn(key, &format!("{name} primary fraction must be finite, got {f}; returning 0"));
            return None;
        }
        if !(0.0..=1.0).contains(&f) {
            self.diag.warn(key, &format!("{name} primary fraction {f} clamped into [0, 1]"));
            return Some(f.clamp(0.0, 1.0));
        }
        Some(f)
    }
}

impl Default for GaussExpPairSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceDensity for GaussExpPairSource {
    fn n_shape_params(&self) -> usize {
        5
    }

    fn density(&self, pars: &SourceParams) -> f64 {
        let sig = pars.shape(0);
        let kappa_a = pars.shape(1);
        let kappa_b = pars.shape(2);
        let Some(frac_a) = self.clamp_fraction("GaussExpPair", "gauss_exp_pair.fraction_a", pars.shape(3))
        else {
            return 0.0;
        };
        let Some(frac_b) = self.clamp_fraction("GaussExpPair", "gauss_exp_pair.fraction_b", pars.shape(4))
        else {
            return 0.0;
        };

        let mut scratch =
            SourceParams::with_shape(pars.momentum(), pars.radius(), pars.cos_theta(), &[sig, 0.0]);
        let weights = [
            (frac_a * frac_b, 0.0),
            (frac_a * (1.0 - frac_b), kappa_b),
            ((1.0 - frac_a) * frac_b, kappa_a),
            ((1.0 - frac_a) * (1.0 - frac_b), kappa_a + kappa_b),
        ];
        let mut acc = 0.0;
        for (term, (weight, kappa)) in self.terms.iter().zip(weights) {
            if weight > 0.0 {
                scratch.set_shape(1, kappa);
                acc += weight * term.density(&scratch);
            }
        }
        acc
    }
}

/// Primary/secondary mixture for an identical pair.
///
/// Shape slots: `[σ, κ, f]`; topologies: both primary (`f²`, κ = 0), one
/// resonant (`2f(1-f)`, κ), both resonant (`(1-f)²`, 2κ).
pub struct GaussExpIdenticalSource {
    terms: [GaussExpSimpleSource; 3],
    diag: Arc<dyn DiagnosticsSink>,
}

impl GaussExpIdenticalSource {
    /// Create with the default diagnostics sink.
    pub fn new() -> Self {
        Self::with_sink(default_sink())
    }

    /// Create with an injected diagnostics sink.
    pub fn with_sink(diag: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            terms: [
                GaussExpSimpleSource::with_sink(diag.clone()),
                GaussExpSimpleSource::with_sink(diag.clone()),
                GaussExpSimpleSource::with_sink(diag.clone()),
            ],
            diag,
        }
    }

    /// Total normalization recomputes across the three topology terms.
    pub fn normalization_recomputes(&self) -> u64 {
        self.terms.iter().map(|t| t.normalization_recomputes()).sum()
    }
}

impl Default for GaussExpIdenticalSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceDensity for GaussExpIdenticalSource {
    fn n_shape_params(&self) -> usize {
        3
    }

    fn density(&self, pars: &SourceParams) -> f64 {
        let sig = pars.shape(0);
        let kappa = pars.shape(1);
        let mut frac = pars.shape(2);
        if !frac.is_finite() {
            self.diag.warn(
                "gauss_exp_identical.fraction",
                &format!("GaussExpIdentical primary fraction must be finite, got {frac}; returning 0"),
            );
            return 0.0;
        }
        if !(0.0..=1.0).contains(&frac) {
            self.diag.warn(
                "gauss_exp_identical.fraction",
                &format!("GaussExpIdentical primary fraction {frac} clamped into [0, 1]"),
            );
            frac = frac.clamp(0.0, 1.0);
        }

        let mut scratch =
            SourceParams::with_shape(pars.momentum(), pars.radius(), pars.cos_theta(), &[sig, 0.0]);
        let weights = [
            (frac * frac, 0.0),
            (2.0 * frac * (1.0 - frac), kappa),
            ((1.0 - frac) * (1.0 - frac), 2.0 * kappa),
        ];
        let mut acc = 0.0;
        for (term, (weight, term_kappa)) in self.terms.iter().zip(weights) {
            if weight > 0.0 {
                scratch.set_shape(1, term_kappa);
                acc += weight * term.density(&scratch);
            }
        }
        acc
    }
}

/// Identical-pair mixture with the decay kinematics of a two-body resonance
/// decay to primary + pion.
///
/// Shape slots: `[σ, τ/m, f, M, m1, m2]`. The decay shift is the reduced
/// lifetime `τ/m` times the two-body decay momentum
/// `sqrt(λ(M², m1², m2²)) / (2 m1 M)`.
pub struct GaussExpIdenticalTwoBodySource {
    inner: GaussExpIdenticalSource,
    diag: Arc<dyn DiagnosticsSink>,
}

impl GaussExpIdenticalTwoBodySource {
    /// Create with the default diagnostics sink.
    pub fn new() -> Self {
        Self::with_sink(default_sink())
    }

    /// Create with an injected diagnostics sink.
    pub fn with_sink(diag: Arc<dyn DiagnosticsSink>) -> Self {
        Self { inner: GaussExpIdenticalSource::with_sink(diag.clone()), diag }
    }

    /// Total normalization recomputes of the underlying mixture.
    pub fn normalization_recomputes(&self) -> u64 {
        self.inner.normalization_recomputes()
    }
}

impl Default for GaussExpIdenticalTwoBodySource {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceDensity for GaussExpIdenticalTwoBodySource {
    fn n_shape_params(&self) -> usize {
        6
    }

    fn density(&self, pars: &SourceParams) -> f64 {
        let sig = pars.shape(0);
        let tau_over_m = pars.shape(1);
        let frac = pars.shape(2);
        let res_mass = pars.shape(3);
        let m1 = pars.shape(4);
        let m2 = pars.shape(5);
        if !(shape_is_valid(res_mass) && shape_is_valid(m1) && shape_is_valid(m2)) {
            self.diag.warn(
                "gauss_exp_2body.mass",
                &format!(
                    "GaussExpIdenticalTwoBody masses must be finite and > 0, got {res_mass}, {m1}, {m2}; returning 0"
                ),
            );
            return 0.0;
        }
        // Källén function λ(M², m1², m2²) of the two-body decay.
        let m4 = res_mass.powi(4) - 2.0 * (res_mass * m1).powi(2) + m1.powi(4)
            - 2.0 * (res_mass * m2).powi(2)
            - 2.0 * (m1 * m2).powi(2)
            + m2.powi(4);
        if m4 < 0.0 {
            self.diag.warn(
                "gauss_exp_2body.closed_channel",
                &format!("GaussExpIdenticalTwoBody decay {res_mass} -> {m1} + {m2} is kinematically closed; returning 0"),
            );
            return 0.0;
        }
        let kappa = tau_over_m * m4.sqrt() / (2.0 * m1 * res_mass);

        let scratch = SourceParams::with_shape(
            pars.momentum(),
            pars.radius(),
            pars.cos_theta(),
            &[sig, kappa, frac],
        );
        self.inner.density(&scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrate::simpson;
    use em_core::CapturingSink;

    #[test]
    fn zero_kappa_collapses_to_gaussian() {
        let src = GaussExpSimpleSource::new();
        let pars = SourceParams::with_shape(100.0, 1.7, 0.0, &[1.2, 0.0]);
        let expected = gaussian_radial(1.7, 1.2);
        assert_eq!(src.density(&pars), expected);
        assert_eq!(src.normalization_recomputes(), 0);
    }

    #[test]
    fn approx_path_is_normalized_by_construction() {
        // Integrating with the same rule the guard uses must give ~exactly 1.
        let src = GaussExpSimpleSource::new();
        let mut pars = SourceParams::with_shape(100.0, 0.0, 0.0, &[2.0, 0.25]);
        let upper = DOMAIN_FACTOR * (2.0 + 0.25);
        let integral =
            simpson(|r| src.density_at_radius(r, &mut pars), 0.0, upper, NORM_SUBDIVISIONS);
        assert!((integral - 1.0).abs() < 1e-9, "integral = {integral}");
    }

    #[test]
    fn exact_path_is_normalized() {
        let src = GaussExpSimpleSource::new();
        let mut pars = SourceParams::with_shape(100.0, 0.0, 0.0, &[1.0, 1.0]);
        let integral = simpson(|r| src.density_at_radius(r, &mut pars), 0.0, 24.0, 4096);
        assert!((integral - 1.0).abs() < 1e-2, "integral = {integral}");
    }

    #[test]
    fn exact_one_sided_is_normalized() {
        let integral = simpson(|r| gauss_exp_exact_one_sided(r, 1.0, 0.8), 0.0, 24.0, 4096);
        assert!((integral - 1.0).abs() < 1e-2, "integral = {integral}");
    }

    #[test]
    fn exact_distinct_is_normalized() {
        let integral = simpson(|r| gauss_exp_exact_distinct(r, 1.0, 0.6, 1.1), 0.0, 30.0, 4096);
        assert!((integral - 1.0).abs() < 1e-2, "integral = {integral}");
    }

    #[test]
    fn branches_agree_near_dispatch_boundary() {
        // σ/κ = 3: both constructions describe the same convolution and must
        // agree to a few percent through the bulk of the distribution.
        let src = GaussExpSimpleSource::new();
        let sig = 1.5;
        let kappa = sig / DISPATCH_RATIO;
        for r in [2.5, 3.0, 4.0] {
            let pars = SourceParams::with_shape(100.0, r, 0.0, &[sig, kappa]);
            let exact = src.density_exact(&pars);
            let approx = src.density_approx(&pars);
            let rel = (exact - approx).abs() / exact.max(approx);
            assert!(rel < 0.15, "r = {r}: exact = {exact}, approx = {approx}, rel = {rel}");
        }
    }

    #[test]
    fn normalization_recomputed_once_per_parameter_set() {
        let src = GaussExpSimpleSource::new();
        let mut pars = SourceParams::with_shape(100.0, 0.0, 0.0, &[2.0, 0.25]);
        for i in 0..100 {
            let _ = src.density_at_radius(0.05 + 0.1 * i as f64, &mut pars);
        }
        assert_eq!(src.normalization_recomputes(), 1);

        // Changing a fingerprint slot forces exactly one more recompute.
        pars.set_shape(1, 0.3);
        let _ = src.density_at_radius(1.0, &mut pars);
        assert_eq!(src.normalization_recomputes(), 2);
    }

    #[test]
    fn identical_parameters_give_bit_identical_results() {
        let src = GaussExpSimpleSource::new();
        let pars = SourceParams::with_shape(100.0, 1.3, 0.0, &[2.0, 0.25]);
        let a = src.density(&pars);
        let b = src.density(&pars);
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn full_source_zero_lifetimes_collapse_to_gaussian() {
        let src = GaussExpSource::new();
        let pars = SourceParams::with_shape(80.0, 2.0, 0.0, &[1.0, 1.0, 0.0, 938.0, 0.0, 938.0]);
        let sig = (0.5f64 * (1.0 + 1.0)).sqrt();
        assert_eq!(src.density(&pars), gaussian_radial(2.0, sig));
    }

    #[test]
    fn full_source_nonpositive_mass_warns_and_returns_zero() {
        let sink = Arc::new(CapturingSink::new());
        let src = GaussExpSource::with_sink(sink.clone());
        let pars = SourceParams::with_shape(80.0, 2.0, 0.0, &[1.0, 1.0, 1.0, -938.0, 1.0, 0.0]);
        assert_eq!(src.density(&pars), 0.0);
        assert_eq!(sink.count("gauss_exp.mass_nonpositive"), 1);
    }

    #[test]
    fn full_source_equal_kappa_branch_warns_once_and_stays_finite() {
        let sink = Arc::new(CapturingSink::new());
        let src = GaussExpSource::with_sink(sink.clone());
        // τ, m identical on both legs and σ/κ < 3 so the exact equal-κ branch
        // runs. r stays off the removable r·κ = 2σ² coincidence.
        let pars = SourceParams::with_shape(500.0, 1.7, 0.0, &[1.0, 1.0, 2.0, 1000.0, 2.0, 1000.0]);
        let v = src.density(&pars);
        assert!(v.is_finite() && v > 0.0, "v = {v}");
        assert_eq!(sink.count("gauss_exp.equal_kappa_combined_constant"), 1);
    }

    #[test]
    fn full_source_exact_is_normalized() {
        let src = GaussExpSource::new();
        // κ1 = 0.4, κ2 = 0.75 with σ = 1: distinct exact branch.
        let mut pars =
            SourceParams::with_shape(1000.0, 0.0, 0.0, &[1.0, 1.0, 0.4, 1000.0, 0.75, 1000.0]);
        let integral = simpson(|r| src.density_at_radius(r, &mut pars), 0.0, 30.0, 4096);
        assert!((integral - 1.0).abs() < 1e-2, "integral = {integral}");
    }

    #[test]
    fn pair_mixture_is_normalized() {
        let src = GaussExpPairSource::new();
        let mut pars = SourceParams::with_shape(100.0, 0.0, 0.0, &[1.0, 0.6, 1.1, 0.4, 0.7]);
        let integral = simpson(|r| src.density_at_radius(r, &mut pars), 0.0, 30.0, 4096);
        assert!((integral - 1.0).abs() < 1e-2, "integral = {integral}");
    }

    #[test]
    fn pair_mixture_weights_sum_consistently() {
        // f = 1 on both legs leaves only the both-primary Gaussian term.
        let src = GaussExpPairSource::new();
        let pars = SourceParams::with_shape(100.0, 1.5, 0.0, &[1.0, 0.6, 1.1, 1.0, 1.0]);
        assert_eq!(src.density(&pars), gaussian_radial(1.5, 1.0));
    }

    #[test]
    fn identical_mixture_matches_manual_sum() {
        let sink = Arc::new(CapturingSink::new());
        let src = GaussExpIdenticalSource::with_sink(sink.clone());
        let frac: f64 = 0.6;
        let pars = SourceParams::with_shape(100.0, 1.5, 0.0, &[1.0, 0.7, frac]);

        let term = GaussExpSimpleSource::with_sink(sink.clone());
        let expected = frac * frac * gaussian_radial(1.5, 1.0)
            + 2.0
                * frac
                * (1.0 - frac)
                * term.density(&SourceParams::with_shape(100.0, 1.5, 0.0, &[1.0, 0.7]))
            + (1.0 - frac)
                * (1.0 - frac)
                * term.density(&SourceParams::with_shape(100.0, 1.5, 0.0, &[1.0, 1.4]));
        let got = src.density(&pars);
        assert!((got - expected).abs() < 1e-12, "got {got}, expected {expected}");
    }

    #[test]
    fn two_body_open_channel_matches_rescaled_identical_mixture() {
        // Δ(1232) → p + π: the model must equal the plain identical-pair
        // mixture evaluated at κ = (τ/m)·√λ(M², m1², m2²)/(2 m1 M).
        let src = GaussExpIdenticalTwoBodySource::new();
        let (res_mass, m1, m2) = (1232.0_f64, 938.0_f64, 140.0_f64);
        let tau_over_m = 1.0;
        let pars =
            SourceParams::with_shape(100.0, 1.5, 0.0, &[1.2, tau_over_m, 0.4, res_mass, m1, m2]);

        let lambda = res_mass.powi(4) - 2.0 * (res_mass * m1).powi(2) + m1.powi(4)
            - 2.0 * (res_mass * m2).powi(2)
            - 2.0 * (m1 * m2).powi(2)
            + m2.powi(4);
        let kappa = tau_over_m * lambda.sqrt() / (2.0 * m1 * res_mass);
        assert!(kappa > 0.0);

        let reference = GaussExpIdenticalSource::new();
        let expected =
            reference.density(&SourceParams::with_shape(100.0, 1.5, 0.0, &[1.2, kappa, 0.4]));
        assert!(expected > 0.0, "expected = {expected}");
        assert_eq!(src.density(&pars).to_bits(), expected.to_bits());
    }

    #[test]
    fn two_body_closed_channel_returns_zero() {
        let sink = Arc::new(CapturingSink::new());
        let src = GaussExpIdenticalTwoBodySource::with_sink(sink.clone());
        // Resonance lighter than its daughters.
        let pars = SourceParams::with_shape(100.0, 1.0, 0.0, &[1.0, 1.0, 0.5, 100.0, 938.0, 140.0]);
        assert_eq!(src.density(&pars), 0.0);
        assert_eq!(sink.count("gauss_exp_2body.closed_channel"), 1);
    }
}
