//! Compact vector formatting for trace logging.

use num_complex::Complex64;
use pretty_dtoa::{dtoa, FmtFloatConfig};
use std::f64::consts::PI;

const FLOAT_CONFIG: FmtFloatConfig = FmtFloatConfig::default()
    .add_point_zero(false)
    .max_significant_digits(9);

pub fn format_f64_vec(v: &[f64]) -> String {
    let a: Vec<String> = v.iter().map(|f| dtoa(*f, FLOAT_CONFIG)).collect();
    format!("[{}]", a.join(", "))
}

fn format_polar(z: &Complex64) -> String {
    format!(
        "{}\u{2220}{}\u{00B0}",
        dtoa(z.norm(), FLOAT_CONFIG),
        dtoa(z.arg() * 180.0 / PI, FLOAT_CONFIG)
    )
}

/// Formats a voltage vector as magnitude and angle in degrees.
pub fn format_polar_vec(v: &[Complex64]) -> String {
    let a: Vec<String> = v.iter().map(format_polar).collect();
    format!("[{}]", a.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polar_uses_degrees() {
        let v = vec![Complex64::new(0.0, 1.0)];
        assert_eq!(format_polar_vec(&v), "[1\u{2220}90\u{00B0}]");
    }

    #[test]
    fn floats_are_trimmed() {
        assert_eq!(format_f64_vec(&[1.0, -0.5]), "[1, -0.5]");
    }
}
