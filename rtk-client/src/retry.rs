//! # Retry policy for individual store calls.
//!
//! [`RetryPolicy`] re-runs a transport call that failed at the connection
//! level. Delays grow as `first × factor^n`, clamped to `max`. Errors that a
//! fresh connection would not fix (server error replies, protocol errors) are
//! returned immediately.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use rtk_client::RetryPolicy;
//!
//! let policy = RetryPolicy {
//!     attempts: 3,
//!     first: Duration::from_millis(100),
//!     max: Duration::from_millis(250),
//!     factor: 2.0,
//! };
//!
//! assert_eq!(policy.delay(0), Duration::from_millis(100));
//! assert_eq!(policy.delay(1), Duration::from_millis(200));
//! assert_eq!(policy.delay(5), Duration::from_millis(250));
//! ```

use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::ClientResult;
use crate::options::duration_secs;

/// Bounded retry with exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first call. Zero behaves like one.
    pub attempts: u32,
    /// Delay before the first retry.
    #[serde(with = "duration_secs")]
    pub first: Duration,
    /// Upper bound for any single delay.
    #[serde(with = "duration_secs")]
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            first: Duration::from_millis(100),
            max: Duration::from_secs(2),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-indexed).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.factor.max(1.0);
        let base = self.first.as_secs_f64() * factor.powi(retry.min(64) as i32);
        let capped = base.min(self.max.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Runs `op`, retrying connection-level failures.
    pub fn run<T, F>(&self, mut op: F) -> ClientResult<T>
    where
        F: FnMut() -> ClientResult<T>,
    {
        let attempts = self.attempts.max(1);
        let mut retry = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && retry + 1 < attempts => {
                    let delay = self.delay(retry);
                    warn!(error = %err, attempt = retry + 1, ?delay, "store call failed, retrying");
                    thread::sleep(delay);
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use std::cell::Cell;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            first: Duration::from_millis(1),
            max: Duration::from_millis(2),
            factor: 2.0,
        }
    }

    #[test]
    fn retries_connection_errors_until_success() {
        let calls = Cell::new(0);
        let result = fast(3).run(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ClientError::ConnectionClosed)
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_attempts() {
        let calls = Cell::new(0);
        let result: ClientResult<()> = fast(2).run(|| {
            calls.set(calls.get() + 1);
            Err(ClientError::ConnectionClosed)
        });
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn does_not_retry_server_errors() {
        let calls = Cell::new(0);
        let result: ClientResult<()> = fast(5).run(|| {
            calls.set(calls.get() + 1);
            Err(ClientError::Server {
                message: b"ERR wrong type".to_vec(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(10), Duration::from_secs(2));
        assert_eq!(RetryPolicy::none().attempts, 1);
    }
}
