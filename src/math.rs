use num_complex::Complex64;

pub const J: Complex64 = Complex64 { re: 0.0, im: 1.0 };

#[macro_export]
macro_rules! cmplx {
    () => {
        num_complex::Complex64::new(0.0, 0.0)
    };
    ($arg1:expr) => {
        num_complex::Complex64::new($arg1, 0.0)
    };
    ($arg1:expr, $arg2:expr) => {
        num_complex::Complex64::new($arg1, $arg2)
    };
}

/// Computes the infinity norm: `max(abs(a))`.
///
/// Returns 0 for an empty slice (a system with no mismatch equations is
/// trivially converged). NaN entries propagate so that callers see a
/// non-finite norm instead of a silently dropped value.
pub fn norm_inf(a: &[f64]) -> f64 {
    let mut max = 0.0;
    for v in a {
        let abs_v = v.abs();
        if !(abs_v <= max) {
            max = abs_v;
        }
    }
    max
}
