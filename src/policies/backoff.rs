//! # Backoff between automatic restarts.
//!
//! [`BackoffPolicy`] maps the number of consecutive faults to a delay:
//! `first × factor^(failures-1)`, clamped to `max`, then jittered.
//! The base is derived from the failure count alone, so jitter never feeds back
//! into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use tenantvisor::BackoffPolicy;
//!
//! let backoff = BackoffPolicy::default(); // 1s, ×2, capped at 30s
//! assert_eq!(backoff.delay_for(1), Duration::from_secs(1));
//! assert_eq!(backoff.delay_for(5), Duration::from_secs(16));
//! assert_eq!(backoff.delay_for(10), Duration::from_secs(30));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Restart backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first fault.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomisation applied to the clamped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 1s`, `factor = 2.0`, `max = 30s`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after the `failures`-th consecutive fault (1-based).
    ///
    /// `failures = 0` is treated like `1`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let max_secs = self.max.as_secs_f64();
        let raw = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !raw.is_finite() || raw < 0.0 || raw > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(raw)
        };

        match self.jitter {
            JitterPolicy::Decorrelated => {
                self.jitter
                    .apply_decorrelated(self.first.min(self.max), base, self.max)
            }
            _ => self.jitter.apply(base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            jitter,
            ..BackoffPolicy::default()
        }
    }

    #[test]
    fn doubles_from_one_second() {
        let p = policy(JitterPolicy::None);
        let got: Vec<u64> = (1..=5).map(|n| p.delay_for(n).as_secs()).collect();
        assert_eq!(got, vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn zero_failures_behaves_like_first() {
        assert_eq!(policy(JitterPolicy::None).delay_for(0), Duration::from_secs(1));
    }

    #[test]
    fn clamps_to_max_and_survives_overflow() {
        let p = policy(JitterPolicy::None);
        assert_eq!(p.delay_for(6), Duration::from_secs(30));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn first_above_max_is_clamped() {
        let p = BackoffPolicy {
            first: Duration::from_secs(10),
            max: Duration::from_secs(5),
            ..BackoffPolicy::default()
        };
        assert_eq!(p.delay_for(1), Duration::from_secs(5));
    }

    #[test]
    fn equal_jitter_stays_within_half_and_full_base() {
        let p = policy(JitterPolicy::Equal);
        for failures in 1..=8 {
            let base = policy(JitterPolicy::None).delay_for(failures);
            let d = p.delay_for(failures);
            assert!(d >= base / 2 && d <= base, "failures {failures}: {d:?} vs {base:?}");
        }
    }

    #[test]
    fn decorrelated_jitter_never_below_first() {
        let p = policy(JitterPolicy::Decorrelated);
        for _ in 0..50 {
            let d = p.delay_for(4);
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(30));
        }
    }
}
