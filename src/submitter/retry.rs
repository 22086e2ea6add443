//! Retry and error recovery utilities for mint submission
//!
//! Provides exponential backoff and error classification. Used both by the
//! mint workers (per item) and by the poll loop (per iteration).

use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first failure
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs = self.initial_backoff.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

/// Classifies errors for retry decisions
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// Temporary failure - should retry (RPC timeout, network issues)
    Transient,
    /// Mint for this nonce already landed - skip
    AlreadyProcessed,
    /// Permanent failure - do not retry (invalid params, contract error)
    Permanent,
    /// Unknown error - may retry with backoff
    Unknown,
}

/// Classify an error for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    // Outcome markers first: messages often embed nonces or hashes whose
    // digits would otherwise look like a status code
    if error_lower.contains("nonce too low")
        || error_lower.contains("already known")
        || error_lower.contains("already minted")
        || error_lower.contains("already been processed")
    {
        return ErrorClass::AlreadyProcessed;
    }

    if error_lower.contains("reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("out of gas")
        || error_lower.contains("invalid parameters")
        || error_lower.contains("unsupported destination")
    {
        return ErrorClass::Permanent;
    }

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("bad gateway")
        || error_lower.contains("service unavailable")
        || is_http_status(&error_lower, &["429", "502", "503", "504"])
        || error_lower.contains("temporarily unavailable")
        || error_lower.contains("underpriced")
    {
        return ErrorClass::Transient;
    }

    ErrorClass::Unknown
}

/// Match an HTTP status only where it is reported as one
fn is_http_status(error_lower: &str, codes: &[&str]) -> bool {
    codes.iter().any(|code| {
        error_lower.contains(&format!("status code {}", code))
            || error_lower.contains(&format!("status: {}", code))
            || error_lower.contains(&format!("http {}", code))
            || error_lower.contains(&format!("http error {}", code))
    })
}

/// Retry state for a single item
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub config: RetryConfig,
    pub attempt: u32,
    pub last_error: Option<String>,
}

impl RetryContext {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempt: 0,
            last_error: None,
        }
    }

    /// Record a failed attempt
    pub fn record_failure(&mut self, error: String) {
        self.attempt += 1;
        self.last_error = Some(error);
    }

    /// Decide what to do after the most recent failure
    pub fn next_action(&self) -> RetryAction {
        let error = self.last_error.as_deref().unwrap_or("");

        match classify_error(error) {
            ErrorClass::Permanent => {
                warn!(error = %error, "Permanent error - adding to dead letter queue");
                RetryAction::DeadLetter
            }
            ErrorClass::AlreadyProcessed => {
                debug!("Mint already processed on destination chain, skipping");
                RetryAction::Skip
            }
            ErrorClass::Transient | ErrorClass::Unknown => {
                if !self.config.should_retry(self.attempt) {
                    return RetryAction::DeadLetter;
                }
                let backoff = self.config.backoff_for_attempt(self.attempt - 1);
                debug!(?backoff, attempt = self.attempt, "Retryable error - backing off");
                RetryAction::RetryAfter(backoff)
            }
        }
    }
}

/// Action to take after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryAction {
    /// Retry after a backoff period
    RetryAfter(Duration),
    /// Drop the item, the destination already has it
    Skip,
    /// Give up and record the item for operators
    DeadLetter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let config = RetryConfig::default();

        assert_eq!(config.backoff_for_attempt(0), Duration::from_secs(2));
        assert_eq!(config.backoff_for_attempt(1), Duration::from_secs(4));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_secs(8));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_secs(16));
        assert_eq!(config.backoff_for_attempt(4), Duration::from_secs(32));
        assert_eq!(config.backoff_for_attempt(5), Duration::from_secs(60)); // capped
        assert_eq!(config.backoff_for_attempt(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(classify_error("connection timeout"), ErrorClass::Transient);
        assert_eq!(
            classify_error("replacement transaction underpriced"),
            ErrorClass::Transient
        );
        assert_eq!(classify_error("nonce too low"), ErrorClass::AlreadyProcessed);
        assert_eq!(classify_error("execution reverted"), ErrorClass::Permanent);
        assert_eq!(classify_error("some unknown error"), ErrorClass::Unknown);
    }

    #[test]
    fn test_digits_in_message_do_not_look_like_status_codes() {
        assert_eq!(
            classify_error("mint for nonce 1502 already minted"),
            ErrorClass::AlreadyProcessed
        );
        assert_eq!(
            classify_error("execution reverted for nonce 75030"),
            ErrorClass::Permanent
        );
        assert_eq!(
            classify_error("mint 0x5021ab failed with code 7"),
            ErrorClass::Unknown
        );
        assert_eq!(
            classify_error("server returned status code 502"),
            ErrorClass::Transient
        );
        assert_eq!(classify_error("503 Service Unavailable"), ErrorClass::Transient);
        assert_eq!(classify_error("HTTP 429 from provider"), ErrorClass::Transient);
    }

    #[test]
    fn test_retry_budget() {
        let mut ctx = RetryContext::new(RetryConfig {
            max_retries: 2,
            ..Default::default()
        });

        ctx.record_failure("network unreachable".into());
        assert_eq!(ctx.next_action(), RetryAction::RetryAfter(Duration::from_secs(2)));
        ctx.record_failure("network unreachable".into());
        assert_eq!(ctx.next_action(), RetryAction::RetryAfter(Duration::from_secs(4)));
        ctx.record_failure("network unreachable".into());
        assert_eq!(ctx.next_action(), RetryAction::DeadLetter);
    }

    #[test]
    fn test_zero_retries_dead_letters_immediately() {
        let mut ctx = RetryContext::new(RetryConfig {
            max_retries: 0,
            ..Default::default()
        });
        ctx.record_failure("timeout".into());
        assert_eq!(ctx.next_action(), RetryAction::DeadLetter);
    }

    #[test]
    fn test_permanent_and_skip() {
        let mut ctx = RetryContext::new(RetryConfig::default());
        ctx.record_failure("execution reverted: paused".into());
        assert_eq!(ctx.next_action(), RetryAction::DeadLetter);

        let mut ctx = RetryContext::new(RetryConfig::default());
        ctx.record_failure("nonce 5 already minted".into());
        assert_eq!(ctx.next_action(), RetryAction::Skip);
    }
}
