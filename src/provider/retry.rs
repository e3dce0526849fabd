//! Bounded exponential backoff for provider transport calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::{AppError, Result};

const MAX_ATTEMPTS: u32 = 4;
const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Classified failure from a single provider attempt.
#[derive(Debug)]
pub enum CallError {
    /// Rate limits, 5xx responses, connection failures. Worth retrying.
    Transient(String),
    /// Bad credentials, malformed requests, content refusals. Fail now.
    Permanent(AppError),
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        // Connection-level failures are transient; everything reqwest
        // classifies as a builder/decode problem is not.
        if err.is_connect() || err.is_timeout() || err.is_request() {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(AppError::Provider(err.to_string()))
        }
    }
}

/// Classify an HTTP status from a provider endpoint.
#[must_use]
pub fn classify_status(status: reqwest::StatusCode, body: &str) -> CallError {
    if status.as_u16() == 429 || status.is_server_error() || status.as_u16() == 408 {
        CallError::Transient(format!("{status}: {body}"))
    } else {
        CallError::Permanent(AppError::Provider(format!("{status}: {body}")))
    }
}

/// Run `call` with bounded exponential backoff on transient failures.
///
/// # Errors
///
/// Returns the permanent error immediately, or `AppError::Provider` once
/// all attempts are exhausted.
pub async fn retrying<T, Fut>(label: &str, mut call: impl FnMut() -> Fut) -> Result<T>
where
    Fut: Future<Output = std::result::Result<T, CallError>>,
{
    let mut delay = INITIAL_DELAY;
    let mut last_error = String::new();

    for attempt in 1..=MAX_ATTEMPTS {
        match call().await {
            Ok(value) => return Ok(value),
            Err(CallError::Permanent(err)) => return Err(err),
            Err(CallError::Transient(msg)) => {
                warn!(label, attempt, error = %msg, "transient provider failure; backing off");
                last_error = msg;
                if attempt < MAX_ATTEMPTS {
                    sleep(delay).await;
                    delay = (delay * 2).min(MAX_DELAY);
                }
            }
        }
    }

    Err(AppError::Provider(format!(
        "{label} failed after {MAX_ATTEMPTS} attempts: {last_error}"
    )))
}
