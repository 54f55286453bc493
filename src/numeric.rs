/// Round half up at `decimals` places.
pub fn round_half_up(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    let scaled = value * factor;
    // Absorb representation error such as 1.0005 * 1000 = 1000.4999...
    let nudged = scaled + scaled.signum() * scaled.abs() * f64::EPSILON * 4.0;
    nudged.round() / factor
}

/// Shortest decimal rendering (`5` rather than `5.0`).
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_up() {
        assert_eq!(round_half_up(1.0005, 3), 1.001);
        assert_eq!(round_half_up(2.5, 0), 3.0);
        assert_eq!(round_half_up(4.99949, 3), 4.999);
    }

    #[test]
    fn formats_without_trailing_zero() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(0.25), "0.25");
    }
}
