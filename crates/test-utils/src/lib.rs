//! Test support shared by the eco-engine crates.
//!
//! - [`SyntheticScene`] builds reflectance/thermal bands with known land
//!   cover so index outputs can be checked by hand
//! - grid helpers produce small `f32` rasters with predictable values
//! - [`poll_until`] waits on asynchronous state without fixed sleeps
//! - [`assert_approx_eq!`] compares floats within a tolerance

pub mod generators;
pub mod wait;

pub use generators::*;
pub use wait::poll_until;

/// Assert that two numbers differ by at most `tolerance`.
///
/// Operands are widened to `f64`, so `f32` and `f64` values can be mixed.
///
/// ```
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(0.5_f32, 0.5000001_f64, 1e-6);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($actual:expr, $expected:expr, $tolerance:expr) => {{
        let (actual, expected, tolerance) =
            ($actual as f64, $expected as f64, $tolerance as f64);
        assert!(
            (actual - expected).abs() <= tolerance,
            "{} = {} is not within {} of {}",
            stringify!($actual),
            actual,
            tolerance,
            expected
        );
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_within_tolerance() {
        assert_approx_eq!(0.3001, 0.3, 1e-3);
        assert_approx_eq!(-2.0_f32, -2.0_f64, 0.0);
    }

    #[test]
    #[should_panic(expected = "is not within")]
    fn test_outside_tolerance() {
        assert_approx_eq!(0.31, 0.3, 1e-3);
    }
}
