//! Retry strategies for transient `PostgreSQL` failures
//!
//! Used when establishing the connection pool and when the notification
//! listener has to reconnect.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::PostgresError;

/// Retry strategy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Base delay between attempts
    pub base_delay: Duration,
    /// Maximum delay (exponential backoff cap)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add jitter to prevent thundering herd
    pub use_jitter: bool,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryStrategy {
    /// Patient strategy for long-lived connections such as the listener
    pub const fn conservative() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }

    /// A single attempt, no retries
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            use_jitter: false,
        }
    }

    /// Calculate delay for a given attempt number
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay_ms =
            self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let delay = Duration::from_millis(delay_ms as u64);
        let capped_delay = std::cmp::min(delay, self.max_delay);

        if self.use_jitter {
            add_jitter(capped_delay)
        } else {
            capped_delay
        }
    }
}

/// Add random jitter to prevent thundering herd effect
fn add_jitter(delay: Duration) -> Duration {
    use rand::Rng;
    let jitter_factor = rand::rng().random_range(0.8..1.2);
    let jittered_ms = (delay.as_millis() as f64 * jitter_factor) as u64;
    Duration::from_millis(jittered_ms)
}

/// Errors that can occur during retry operations
#[derive(Debug, Error)]
pub enum RetryError {
    /// All retry attempts exhausted
    #[error("all retry attempts exhausted after {attempts} tries: {last_error}")]
    ExhaustedAttempts {
        /// Number of attempts made
        attempts: u32,
        /// The last error encountered
        last_error: PostgresError,
    },

    /// Non-retryable error encountered
    #[error("non-retryable error: {0}")]
    NonRetryable(PostgresError),
}

impl From<RetryError> for PostgresError {
    fn from(error: RetryError) -> Self {
        match error {
            RetryError::ExhaustedAttempts { last_error, .. } => last_error,
            RetryError::NonRetryable(error) => error,
        }
    }
}

/// Whether a sqlx error is worth retrying.
pub fn is_retryable_sqlx_error(error: &sqlx::Error) -> bool {
    use sqlx::Error;
    match error {
        // Connection issues are retryable
        Error::Io(_) | Error::Protocol(_) | Error::PoolTimedOut | Error::PoolClosed => true,
        // Database errors might be retryable depending on the type
        Error::Database(db_err) => db_err.code().is_some_and(|code| {
            matches!(
                code.as_ref(),
                "40001" | // serialization_failure
                "40P01" | // deadlock_detected
                "53300" | // too_many_connections
                "57P03" | // cannot_connect_now (server starting up)
                "08000" | // connection_exception
                "08003" | // connection_does_not_exist
                "08006" | // connection_failure
                "08001" | // sqlclient_unable_to_establish_sqlconnection
                "08004" // sqlserver_rejected_establishment_of_sqlconnection
            )
        }),
        // Configuration and other errors are not retryable
        _ => false,
    }
}

/// Determines if an error is retryable
pub fn is_retryable_error(error: &PostgresError) -> bool {
    match error {
        PostgresError::Connection(sqlx_error) | PostgresError::PoolCreation(sqlx_error) => {
            is_retryable_sqlx_error(sqlx_error)
        }
        PostgresError::Lock(_) => true, // Lock transactions fail when the pool is exhausted
        PostgresError::Migration(_) => false,
        PostgresError::Config(_) => false,
    }
}

/// Execute an operation with retry logic
pub async fn retry_operation<F, Fut, T, E>(
    strategy: &RetryStrategy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<PostgresError>,
{
    let max_attempts = strategy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let error = match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "[postgres.retry] operation succeeded after retries"
                    );
                }
                return Ok(result);
            }
            Err(error) => error.into(),
        };

        // Check if this error is retryable
        if !is_retryable_error(&error) {
            warn!(
                operation = operation_name,
                error = %error,
                "[postgres.retry] operation failed with non-retryable error"
            );
            return Err(RetryError::NonRetryable(error));
        }

        attempt += 1;
        if attempt >= max_attempts {
            return Err(RetryError::ExhaustedAttempts {
                attempts: max_attempts,
                last_error: error,
            });
        }

        let delay = strategy.calculate_delay(attempt);
        warn!(
            operation = operation_name,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "[postgres.retry] operation failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
