//! Scalar definite-integral routine used by the normalization guard.
//!
//! Composite Simpson rule with a fixed subdivision count. The caller supplies
//! the integrand as a callback and is responsible for its correctness on the
//! whole interval; the routine itself never inspects the values it sums.

/// Composite Simpson integral of `f` over `[a, b]` with `n` subdivisions.
///
/// `n` is rounded up to the next even count (the rule needs paired panels).
/// Degenerate intervals (`b <= a`, non-finite bounds) integrate to 0.
pub fn simpson<F>(mut f: F, a: f64, b: f64, n: usize) -> f64
where
    F: FnMut(f64) -> f64,
{
    if !(a.is_finite() && b.is_finite()) || b <= a {
        return 0.0;
    }
    let n = if n < 2 {
        2
    } else if n % 2 == 1 {
        n + 1
    } else {
        n
    };

    let h = (b - a) / n as f64;
    let mut sum = f(a) + f(b);
    for i in 1..n {
        let x = a + h * i as f64;
        sum += if i % 2 == 1 { 4.0 * f(x) } else { 2.0 * f(x) };
    }
    sum * h / 3.0
}
