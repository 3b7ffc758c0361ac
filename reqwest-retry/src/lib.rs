// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{anyhow, format_err};
use async_trait::async_trait;
use backoff::{future::retry_notify, ExponentialBackoff};
use log::warn;
use reqwest::{Response, StatusCode};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_millis(500);
pub const MAX_RETRY_ATTEMPTS: usize = 5;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Initial backoff interval. Grows exponentially between attempts.
    pub retry_period: Duration,

    /// Total attempts, including the first.
    pub max_attempts: usize,

    /// Bound on a single attempt. Hitting it counts as a transient failure.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_period: DEFAULT_RETRY_PERIOD,
            max_attempts: MAX_RETRY_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

/// Outcome of one failed attempt.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// Worth retrying: network errors, timeouts, 5xx.
    #[error("transient failure: {0:#}")]
    Transient(anyhow::Error),

    /// Retrying cannot help: 4xx, auth, malformed requests.
    #[error("permanent failure: {0:#}")]
    Permanent(anyhow::Error),
}

impl AttemptError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("gave up after {attempts} attempts: {source:#}")]
    Transient {
        attempts: usize,
        source: anyhow::Error,
    },

    #[error("failed permanently on attempt {attempts}: {source:#}")]
    Permanent {
        attempts: usize,
        source: anyhow::Error,
    },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: usize },
}

impl SendError {
    pub fn attempts(&self) -> usize {
        match self {
            Self::Transient { attempts, .. }
            | Self::Permanent { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

/// 5xx, 408 and 429 may succeed on retry. Everything else that is not a
/// success will not.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

pub fn classify_response(response: Response) -> Result<Response, AttemptError> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let err = format_err!("{} responded with {}", response.url(), status);

    if is_transient_status(status) {
        Err(AttemptError::Transient(err))
    } else {
        Err(AttemptError::Permanent(err))
    }
}

pub fn classify_send_error(err: reqwest::Error) -> AttemptError {
    if err.is_builder() {
        return AttemptError::Permanent(err.into());
    }

    match err.status() {
        Some(status) if !is_transient_status(status) => AttemptError::Permanent(err.into()),
        _ => AttemptError::Transient(err.into()),
    }
}

/// Run `op` until it succeeds, fails permanently, runs out of attempts, or
/// `cancel` fires.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, SendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let attempts = AtomicUsize::new(0);
    let max_attempts = policy.max_attempts.max(1);
    let attempt_timeout = policy.attempt_timeout;

    let operation = || {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let future = op();

        async move {
            let err = match tokio::time::timeout(attempt_timeout, future).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(AttemptError::Permanent(err))) => {
                    return Err(backoff::Error::permanent(AttemptError::Permanent(err)));
                }
                Ok(Err(AttemptError::Transient(err))) => err,
                Err(_) => anyhow!("attempt timed out after {:?}", attempt_timeout),
            };

            let err = AttemptError::Transient(err.context(format!("attempt {attempt} failed")));

            if attempt >= max_attempts {
                Err(backoff::Error::permanent(err))
            } else {
                Err(backoff::Error::transient(err))
            }
        }
    };

    let backoff = ExponentialBackoff {
        current_interval: policy.retry_period,
        initial_interval: policy.retry_period,
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    };

    let retried = retry_notify(backoff, operation, |err: AttemptError, delay: Duration| {
        warn!("retrying in {:?}: {}", delay, err);
    });

    let result = tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            return Err(SendError::Cancelled {
                attempts: attempts.load(Ordering::SeqCst),
            });
        }
        result = retried => result,
    };

    let attempts = attempts.load(Ordering::SeqCst);

    result.map_err(|err| match err {
        AttemptError::Transient(source) => SendError::Transient { attempts, source },
        AttemptError::Permanent(source) => SendError::Permanent { attempts, source },
    })
}

#[async_trait]
pub trait SendRetry {
    async fn send_retry(
        self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Response, SendError>;

    async fn send_retry_default(self, cancel: &CancellationToken) -> Result<Response, SendError>;
}

#[async_trait]
impl SendRetry for reqwest::RequestBuilder {
    async fn send_retry_default(self, cancel: &CancellationToken) -> Result<Response, SendError> {
        self.send_retry(&RetryPolicy::default(), cancel).await
    }

    async fn send_retry(
        self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Response, SendError> {
        retry(policy, cancel, || {
            let request = self.try_clone();

            async move {
                let request = request.ok_or_else(|| {
                    AttemptError::Permanent(anyhow!(
                        "this request cannot be retried because it cannot be cloned"
                    ))
                })?;

                let response = request.send().await.map_err(classify_send_error)?;

                classify_response(response)
            }
        })
        .await
    }
}
