//! Operation-level retry.
//!
//! Each attempt yields either a value or an [`AttemptFailure`]. The executor
//! turns that outcome into a [`RetryDecision`] and loops until it gets
//! something other than `Retry`:
//!
//! | class          | trigger                                         | retried |
//! |----------------|-------------------------------------------------|---------|
//! | `FatalAuth`    | 401, or 400 naming an invalid/expired token     | no      |
//! | `Conflict`     | 409 tagged `conflict`                           | yes     |
//! | `RateLimited`  | 429                                             | yes     |
//! | `Transient`    | >= 500, or no status (transport failure)        | yes     |
//! | `FatalOther`   | anything else, including 404                    | no      |
//!
//! ## Idempotency
//!
//! Uploads are retried too. The provider's overwrite mode makes a repeated
//! upload converge on the same content; `add` mode surfaces a 409 instead.

use std::future::Future;
use std::time::Duration;

use storage_gateway_sdk::StorageError;

use super::ports::ClassifiedError;
use crate::config::RetryConfig;

fn duration_to_u64_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Retry class of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    FatalAuth,
    Conflict,
    RateLimited,
    Transient,
    FatalOther,
}

const TOKEN_ERROR_TAGS: [&str; 2] = ["invalid_access_token", "expired_access_token"];

impl ErrorClass {
    #[must_use]
    pub fn of(err: &ClassifiedError) -> Self {
        match err.status {
            None => Self::Transient,
            Some(401) => Self::FatalAuth,
            Some(400) if names_token_error(err) => Self::FatalAuth,
            Some(409) if err.is_conflict() => Self::Conflict,
            Some(429) => Self::RateLimited,
            Some(s) if s >= 500 => Self::Transient,
            Some(_) => Self::FatalOther,
        }
    }

    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Conflict | Self::RateLimited | Self::Transient)
    }
}

fn names_token_error(err: &ClassifiedError) -> bool {
    TOKEN_ERROR_TAGS
        .iter()
        .any(|t| err.tag.contains(t) || err.summary.contains(t))
}

/// Why a single attempt failed.
#[derive(Debug, Clone)]
pub enum AttemptFailure {
    /// No usable client could be obtained. Never retried.
    Client(StorageError),
    Backend(ClassifiedError),
}

impl From<ClassifiedError> for AttemptFailure {
    fn from(err: ClassifiedError) -> Self {
        Self::Backend(err)
    }
}

/// What to do after an attempt.
#[derive(Debug)]
pub enum RetryDecision<T> {
    /// Sleep, then run another attempt.
    Retry(Duration),
    FailFast(StorageError),
    Success(T),
}

/// Translate a backend failure into the public taxonomy.
#[must_use]
pub fn to_storage_error(err: ClassifiedError, path: &str) -> StorageError {
    match ErrorClass::of(&err) {
        ErrorClass::FatalAuth => StorageError::AuthTokenInvalid { message: err.tag },
        ErrorClass::Conflict => StorageError::Conflict {
            path: path.to_owned(),
            message: err.summary,
        },
        ErrorClass::RateLimited => StorageError::RateLimited {
            retry_after: err.retry_after,
        },
        ErrorClass::Transient => StorageError::Transient {
            status: err.status,
            message: err.summary,
        },
        ErrorClass::FatalOther if err.is_not_found() => StorageError::not_found(path),
        ErrorClass::FatalOther => StorageError::Backend {
            status: err.status,
            tag: err.tag,
            message: err.summary,
        },
    }
}

/// Bounded retry with a fixed delay schedule.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    delays: Vec<Duration>,
    max_attempts: u32,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

impl RetryExecutor {
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            delays: config.delays.clone(),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Delay after failed attempt `attempt` (1-based).
    fn delay_after(&self, attempt: u32) -> Duration {
        let idx = usize::try_from(attempt.saturating_sub(1)).unwrap_or(usize::MAX);
        self.delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default()
    }

    /// Decide the fate of attempt `attempt` (1-based) on `path`.
    pub fn decide<T>(
        &self,
        attempt: u32,
        outcome: Result<T, AttemptFailure>,
        path: &str,
    ) -> RetryDecision<T> {
        let err = match outcome {
            Ok(value) => return RetryDecision::Success(value),
            Err(AttemptFailure::Client(err)) => return RetryDecision::FailFast(err),
            Err(AttemptFailure::Backend(err)) => err,
        };

        let class = ErrorClass::of(&err);
        if class.is_retryable() && attempt < self.max_attempts {
            RetryDecision::Retry(self.delay_after(attempt))
        } else {
            if class.is_retryable() {
                tracing::warn!(
                    path,
                    attempt,
                    status = ?err.status,
                    tag = %err.tag,
                    "giving up after retries"
                );
            }
            RetryDecision::FailFast(to_storage_error(err, path))
        }
    }

    /// Run `operation` until it succeeds, fails fatally, or attempts run out.
    ///
    /// `operation` receives the 1-based attempt number and must acquire
    /// whatever client it needs itself, so each attempt sees fresh state.
    ///
    /// # Errors
    /// The classified failure of the last attempt.
    pub async fn run<T, F, Fut>(
        &self,
        op: &'static str,
        path: &str,
        mut operation: F,
    ) -> Result<T, StorageError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptFailure>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = operation(attempt).await;
            if let Err(AttemptFailure::Backend(err)) = &outcome {
                tracing::debug!(op, path, attempt, error = %err, "storage call failed");
            }

            match self.decide(attempt, outcome, path) {
                RetryDecision::Success(value) => {
                    if attempt > 1 {
                        tracing::info!(op, path, attempt, "storage call succeeded after retries");
                    }
                    return Ok(value);
                }
                RetryDecision::FailFast(err) => return Err(err),
                RetryDecision::Retry(delay) => {
                    tracing::debug!(
                        op,
                        path,
                        attempt,
                        delay_ms = duration_to_u64_ms(delay),
                        "retrying storage call"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
