//! Overflow-safe link functions for the demand mean.

/// `ln(1 + e^x)` without overflow for large `|x|`.
#[inline]
pub fn log1pexp(x: f64) -> f64 {
    // e^{-|x|} lies in (0, 1].
    let tail = (-x.abs()).exp().ln_1p();
    if x > 0.0 { x + tail } else { tail }
}

/// Logistic function `1 / (1 + e^{-x})`.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    softplus_and_sigmoid(x).1
}

/// `softplus(x) = ln(1 + e^x)`, the demand link.
#[inline]
pub fn softplus(x: f64) -> f64 {
    log1pexp(x)
}

/// `softplus(x)` and its derivative `sigmoid(x)` from one exponential.
#[inline(always)]
pub fn softplus_and_sigmoid(x: f64) -> (f64, f64) {
    let e = (-x.abs()).exp();
    let denom = 1.0 + e;
    if x >= 0.0 { (x + e.ln_1p(), denom.recip()) } else { (e.ln_1p(), e / denom) }
}

/// Inverse of [`softplus`] for `y > 0`: `ln(e^y - 1)`, with `y` clamped to at least `1e-12`.
#[inline]
pub fn inverse_softplus(y: f64) -> f64 {
    let y = y.max(1e-12);
    // softplus(y) == y to double precision past 30.
    if y > 30.0 { y } else { y.exp_m1().ln() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log1pexp_matches_naive_moderate_values() {
        let xs: [f64; 7] = [-10.0, -2.0, -0.1, 0.0, 0.1, 2.0, 10.0];
        for x in xs {
            let naive = (1.0 + x.exp()).ln();
            assert!((naive - log1pexp(x)).abs() < 1e-12, "x={}", x);
        }
    }

    #[test]
    fn test_log1pexp_is_finite_extremes() {
        for x in [-1e6, -100.0, 100.0, 1e6] {
            assert!(log1pexp(x).is_finite(), "x={}", x);
        }
        assert!((log1pexp(1e6) - 1e6).abs() < 1e-6);
    }

    #[test]
    fn test_sigmoid_bounds_and_symmetry() {
        for x in [-50.0, -10.0, -1.0, 0.0, 1.0, 10.0, 50.0] {
            let s = sigmoid(x);
            assert!((0.0..=1.0).contains(&s), "sigmoid({})={}", x, s);
            assert!((s + sigmoid(-x) - 1.0).abs() < 1e-15);
        }
    }

    #[test]
    fn test_fused_matches_separate() {
        for x in [-50.0, -2.0, 0.0, 0.1, 2.0, 150.0] {
            let (sp, s) = softplus_and_sigmoid(x);
            assert!((sp - softplus(x)).abs() < 1e-15);
            assert!((s - sigmoid(x)).abs() < 1e-15);
        }
    }

    #[test]
    fn test_inverse_softplus_roundtrip() {
        for y in [1e-3, 0.5, 2.0, 29.0, 150.0] {
            let z = inverse_softplus(y);
            assert!((softplus(z) - y).abs() < 1e-9 * y.max(1.0), "y={}", y);
        }
    }
}
