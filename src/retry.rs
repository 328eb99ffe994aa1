//! Backoff progressions for retried tasks.

use crate::error::TaskError;
use rand::Rng;
use std::str::FromStr;

/// Wait-time progression applied between retries.
///
/// `get_delay(0)` is always `0` for every progression: a freshly-received
/// message has not failed yet, so there is nothing to back off from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitProgression {
    None,
    Arithmetic,
    Geometric,
    Random,
}

impl FromStr for WaitProgression {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(WaitProgression::None),
            "ARITHMETIC" => Ok(WaitProgression::Arithmetic),
            "GEOMETRIC" => Ok(WaitProgression::Geometric),
            "RANDOM" => Ok(WaitProgression::Random),
            other => Err(TaskError::Registration(format!(
                "unknown wait progression: {other}"
            ))),
        }
    }
}

impl WaitProgression {
    /// Seconds to wait before the next retry, given `wait_time` (the base)
    /// and `retries` (the number of attempts already made).
    pub fn get_delay(self, wait_time: u64, retries: u32) -> u64 {
        match self {
            WaitProgression::None => {
                if retries == 0 {
                    0
                } else {
                    wait_time
                }
            }
            WaitProgression::Arithmetic => wait_time * retries as u64,
            WaitProgression::Geometric => wait_time * (retries as u64).pow(2),
            WaitProgression::Random => {
                if retries == 0 {
                    0
                } else {
                    let factor: f64 = rand::thread_rng().gen_range(0.5..2.0);
                    (wait_time as f64 * factor) as u64
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_retries_is_always_zero() {
        for p in [
            WaitProgression::None,
            WaitProgression::Arithmetic,
            WaitProgression::Geometric,
            WaitProgression::Random,
        ] {
            assert_eq!(p.get_delay(10, 0), 0);
        }
    }

    #[test]
    fn none_progression_is_constant_after_first_retry() {
        let p = WaitProgression::None;
        assert_eq!(p.get_delay(10, 1), 10);
        assert_eq!(p.get_delay(10, 5), 10);
    }

    #[test]
    fn arithmetic_scales_linearly() {
        let p = WaitProgression::Arithmetic;
        assert_eq!(p.get_delay(10, 1), 10);
        assert_eq!(p.get_delay(10, 2), 20);
        assert_eq!(p.get_delay(10, 3), 30);
    }

    #[test]
    fn geometric_scales_quadratically() {
        let p = WaitProgression::Geometric;
        assert_eq!(p.get_delay(10, 1), 10);
        assert_eq!(p.get_delay(10, 2), 40);
        assert_eq!(p.get_delay(10, 3), 90);
    }

    #[test]
    fn random_stays_within_bounds() {
        let p = WaitProgression::Random;
        for _ in 0..200 {
            let d = p.get_delay(10, 3);
            assert!(d <= 20, "delay {d} exceeded upper bound");
        }
    }

    #[test]
    fn unknown_progression_fails_loudly() {
        assert!("BOGUS".parse::<WaitProgression>().is_err());
    }
}
