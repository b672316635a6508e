//! Bounded retry with linear backoff.
//!
//! The first attempt runs immediately; after the n-th failure (1-based) the policy sleeps
//! `backoff * n` before trying again. When every attempt fails the last error is folded into
//! [`GateError::ExhaustedRetries`].

use std::time::Duration;

use tracing::warn;

use crate::error::{GateError, GateResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first call. Never below 1.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(400))
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Delay after the `failures`-th consecutive failure.
    #[must_use]
    pub fn delay_after(&self, failures: u32) -> Duration {
        self.backoff.saturating_mul(failures)
    }

    /// Run `op` until it succeeds or attempts run out. `op` receives the 0-based attempt index,
    /// which callers use to pick per-attempt parameters such as temperature.
    pub fn run<T>(
        &self,
        label: &str,
        mut op: impl FnMut(u32) -> GateResult<T>,
    ) -> GateResult<T> {
        let mut last = String::new();
        for attempt in 0..self.max_attempts {
            match op(attempt) {
                Ok(v) => return Ok(v),
                Err(err) => {
                    warn!(
                        label = label,
                        attempt = attempt + 1,
                        max = self.max_attempts,
                        error = %err,
                        "attempt failed"
                    );
                    last = err.to_string();
                    if attempt + 1 < self.max_attempts {
                        let d = self.delay_after(attempt + 1);
                        if !d.is_zero() {
                            std::thread::sleep(d);
                        }
                    }
                }
            }
        }
        Err(GateError::ExhaustedRetries {
            attempts: self.max_attempts,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_backoff() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_after(1), Duration::from_millis(400));
        assert_eq!(p.delay_after(3), Duration::from_millis(1200));
    }

    #[test]
    fn zero_attempts_is_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn succeeds_after_failures() {
        let p = RetryPolicy::new(3, Duration::ZERO);
        let mut seen = Vec::new();
        let out = p.run("t", |attempt| {
            seen.push(attempt);
            if attempt < 2 {
                Err(GateError::ServiceCall("boom".into()))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(out.unwrap(), 2);
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn exhausts_with_last_error() {
        let p = RetryPolicy::new(2, Duration::ZERO);
        let err = p
            .run::<()>("t", |attempt| {
                Err(GateError::ServiceCall(format!("fail {attempt}")))
            })
            .unwrap_err();
        match err {
            GateError::ExhaustedRetries { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(last.contains("fail 1"), "{last}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
