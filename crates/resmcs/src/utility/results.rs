//! # Result Utilities

use std::fmt::Display;

/// Unwrap a `Result`, panicking with the bare `Display` of the error.
///
/// Backs the panicking ``<op>(...) -> T`` twin of each fallible
/// ``try_<op>(...) -> Result<T, E>``, so both report the same message.
pub fn expect_unwrap<T, E>(result: Result<T, E>) -> T
where
    E: Display,
{
    result.unwrap_or_else(|e| panic!("{e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn checked_half(value: usize) -> anyhow::Result<usize> {
        if value % 2 == 0 {
            Ok(value / 2)
        } else {
            Err(anyhow!("{value} is odd"))
        }
    }

    #[test]
    fn test_expect_unwrap_ok() {
        assert_eq!(expect_unwrap(checked_half(96)), 48);
    }

    #[should_panic(expected = "95 is odd")]
    #[test]
    fn test_expect_unwrap_err() {
        let _d = expect_unwrap(checked_half(95));
    }
}
