//! Result verification
//!
//! The coordinator checks the token that closes the ring against the
//! arithmetic-series closed form `1000 * N * (N-1) / 2`.

use super::LOCAL_VALUE_STEP;
use serde::Serialize;
use std::fmt;

/// Expected ring sum for a group of `group_size` processes
///
/// Computed in checked 64-bit arithmetic. Returns `None` when the sum (or an
/// intermediate product) does not fit `i64`.
pub fn expected_sum(group_size: usize) -> Option<i64> {
    let n = i64::try_from(group_size).ok()?;
    if n == 0 {
        return Some(0);
    }

    // One of N and N-1 is even, so halve that one first to keep the
    // intermediate product as small as the result
    let (a, b) = if n % 2 == 0 { (n / 2, n - 1) } else { (n, (n - 1) / 2) };

    LOCAL_VALUE_STEP.checked_mul(a)?.checked_mul(b)
}

/// Largest group size whose expected sum fits `i64`
pub fn max_group_size() -> usize {
    // expected_sum is monotonic in N, so binary search the boundary
    let (mut lo, mut hi) = (1usize, u32::MAX as usize);
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if expected_sum(mid).is_some() {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

/// Outcome of comparing the closing token to the expected sum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub expected: i64,
    pub actual: i64,
}

impl Verification {
    /// Compare by exact integer equality
    pub fn check(expected: i64, actual: i64) -> Self {
        Self { expected, actual }
    }

    pub fn is_success(&self) -> bool {
        self.expected == self.actual
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            write!(f, "Verification: SUCCESS (Expected: {})", self.expected)
        } else {
            write!(
                f,
                "Verification: FAILURE (Expected: {}, Got: {})",
                self.expected, self.actual
            )
        }
    }
}
