//! Exponential-backoff retry for opening rendering sessions.
//!
//! Only failures where the surface could not be reached are retried; a
//! surface that answers but misbehaves fails immediately. The whole loop,
//! waits included, is bounded by a single time budget.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::SessionOpenError;
use crate::surface::RenderSurface;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`RetryConfig::max_delay`].
pub fn next_delay(current: Duration, config: &RetryConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Open a session, retrying unreachable-surface failures with backoff
/// until `budget` is spent.
///
/// Each attempt is itself bounded by whatever remains of the budget.
pub async fn open_with_retry<S: RenderSurface>(
    surface: &S,
    budget: Duration,
    config: &RetryConfig,
) -> Result<S::Session, SessionOpenError> {
    let deadline = Instant::now() + budget;
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(SessionOpenError::Timeout(budget));
        }

        let error = match tokio::time::timeout(remaining, surface.open()).await {
            Ok(Ok(session)) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Rendering session opened after retry");
                }
                return Ok(session);
            }
            Ok(Err(e)) => e,
            Err(_) => return Err(SessionOpenError::Timeout(budget)),
        };

        if !error.is_retryable() {
            return Err(error);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining <= delay {
            tracing::warn!(attempt, error = %error, "Open budget exhausted");
            return Err(error);
        }

        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Session open attempt failed, retrying",
        );
        tokio::time::sleep(delay).await;
        delay = next_delay(delay, config);
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::scripted::{ScriptedBehavior, ScriptedSurface};

    #[test]
    fn next_delay_doubles() {
        let config = RetryConfig::default();
        assert_eq!(next_delay(Duration::from_secs(1), &config), Duration::from_secs(2));
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(next_delay(Duration::from_secs(8), &config), Duration::from_secs(10));
    }

    #[test]
    fn full_backoff_sequence() {
        let config = RetryConfig::default();
        let mut delay = config.initial_delay;
        for expected_secs in [1, 2, 4, 8, 16, 30, 30] {
            assert_eq!(delay.as_secs(), expected_secs);
            delay = next_delay(delay, &config);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_surface_is_reachable() {
        let surface = ScriptedSurface::new(ScriptedBehavior {
            unreachable_opens: 2,
            ..Default::default()
        });
        let session = open_with_retry(&surface, Duration::from_secs(60), &RetryConfig::default()).await;
        assert!(session.is_ok());
        assert_eq!(surface.stats().open_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_budget_is_spent() {
        let surface = ScriptedSurface::new(ScriptedBehavior {
            unreachable_opens: u32::MAX,
            ..Default::default()
        });
        let result = open_with_retry(&surface, Duration::from_secs(5), &RetryConfig::default()).await;
        assert_matches!(result, Err(SessionOpenError::Unreachable(_)));
        // 1 s + 2 s of waiting fit in the budget, the next 4 s wait does not.
        assert_eq!(surface.stats().open_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_open_times_out() {
        let surface = ScriptedSurface::new(ScriptedBehavior {
            open_delay: Duration::from_secs(120),
            ..Default::default()
        });
        let result = open_with_retry(&surface, Duration::from_secs(10), &RetryConfig::default()).await;
        assert_matches!(result, Err(SessionOpenError::Timeout(_)));
    }
}
