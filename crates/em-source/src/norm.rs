//! Memoized normalization of un-normalized convolution kernels.
//!
//! The convolved kernels in [`crate::resonance`] are defined only up to a
//! normalization integral over the model domain. Recomputing that integral is
//! hundreds of kernel evaluations, while a fit loop re-evaluates the density
//! at thousands of radii with the same shape parameters. The guard caches the
//! constant keyed by a fingerprint of the parameter slots it depends on, and
//! recomputes only when the fingerprint changes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use em_core::diag::DiagnosticsSink;

use crate::integrate::simpson;

/// The subset of parameter slots an expensive derived quantity depends on,
/// compared bitwise.
///
/// Bitwise comparison keeps the invariant exact (a cached constant is valid
/// iff the stored fingerprint equals the current one) without inheriting the
/// `NaN != NaN` surprise of float equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(Vec<u64>);

impl Fingerprint {
    /// Fingerprint of the given parameter values.
    pub fn new(values: &[f64]) -> Self {
        Self(values.iter().map(|v| v.to_bits()).collect())
    }
}

/// `{fingerprint, constant}` — one memoized normalization integral.
#[derive(Debug, Clone)]
struct NormalizationRecord {
    fingerprint: Fingerprint,
    constant: f64,
}

/// Per-instance memo for a kernel's normalization constant.
///
/// Created on first use, overwritten on fingerprint change, never explicitly
/// destroyed. Holding the record mutex across the recompute guarantees that
/// concurrent evaluators with a fixed parameter set observe exactly one
/// constant and never a cache mid-rebuild.
pub struct NormalizationGuard {
    record: Mutex<Option<NormalizationRecord>>,
    recomputes: AtomicU64,
    diag: Arc<dyn DiagnosticsSink>,
}

impl NormalizationGuard {
    /// Create an empty guard reporting through `diag`.
    pub fn new(diag: Arc<dyn DiagnosticsSink>) -> Self {
        Self { record: Mutex::new(None), recomputes: AtomicU64::new(0), diag }
    }

    /// The normalization constant for the kernel identified by `fingerprint`.
    ///
    /// On a fingerprint match the cached constant is returned without calling
    /// `kernel`. Otherwise the raw kernel is integrated over `[0, upper]`
    /// with `subdivisions` Simpson panels and the result replaces the record.
    ///
    /// A degenerate integral (non-finite or ≤ 0) is warned and cached as 1 so
    /// the kernel passes through un-normalized instead of producing NaN.
    pub fn constant_for<F>(
        &self,
        fingerprint: Fingerprint,
        upper: f64,
        subdivisions: usize,
        kernel: F,
    ) -> f64
    where
        F: FnMut(f64) -> f64,
    {
        // A panicking integrand elsewhere poisons the mutex; the record is
        // still coherent (written whole or not at all), so keep serving.
        let mut record = match self.record.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(rec) = record.as_ref() {
            if rec.fingerprint == fingerprint {
                return rec.constant;
            }
        }

        let mut constant = simpson(kernel, 0.0, upper, subdivisions);
        if !constant.is_finite() || constant <= 0.0 {
            self.diag.warn(
                "normalization.degenerate",
                &format!("kernel normalization integral over [0, {upper}] is degenerate ({constant}); using 1"),
            );
            constant = 1.0;
        }
        *record = Some(NormalizationRecord { fingerprint, constant });
        self.recomputes.fetch_add(1, Ordering::Relaxed);
        constant
    }

    /// Number of normalization recomputes since construction.
    pub fn recompute_count(&self) -> u64 {
        self.recomputes.load(Ordering::Relaxed)
    }
}
