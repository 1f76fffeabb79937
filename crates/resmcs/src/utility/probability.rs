//! # Probability Checks

use crate::utility::results::expect_unwrap;

/// Validate a probability in the range ``[0.0, 1.0]``.
///
/// ## Arguments
///
/// - `prob`: the prob to check.
///
/// ## Returns
///
/// `Ok(prob)`, or a message describing the range error.
pub fn try_probability(prob: f64) -> Result<f64, String> {
    if !(0.0..=1.0).contains(&prob) {
        return Err(format!("probability must be in [0.0, 1.0]: {prob:?}"));
    }
    Ok(prob)
}

/// Expect a probability to be in range ``[0.0, 1.0]``, or panic.
///
/// ## Panics
///
/// On range error.
pub fn expect_probability(prob: f64) -> f64 {
    expect_unwrap(try_probability(prob))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probability() {
        assert_eq!(expect_probability(0.0), 0.0);
        assert_eq!(expect_probability(1.0), 1.0);
        assert_eq!(expect_probability(0.5), 0.5);

        assert!(try_probability(-1.0).is_err());
        assert!(try_probability(2.0).is_err());
        assert!(try_probability(f64::NAN).is_err());
    }

    #[should_panic(expected = "probability must be in [0.0, 1.0]: -1.0")]
    #[test]
    fn test_probability_panic() {
        expect_probability(-1.0);
    }
}
