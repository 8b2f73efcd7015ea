use crate::config::RetrySettings;
use crate::error::AppError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Errors returned by [`retry`]
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// The cancellation signal fired between attempts
    #[error("retry cancelled: {0}")]
    Cancelled(String),

    /// Every attempt failed; carries the last error and the attempt count
    #[error("all {attempts} retry attempts failed: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: AppError,
    },
}

impl From<RetryError> for AppError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::Cancelled(cause) => AppError::Cancelled(cause),
            RetryError::Exhausted { attempts, source } => {
                AppError::BackendUnavailable(format!("{attempts} attempts exhausted: {source}"))
            }
        }
    }
}

/// Run `op` up to `max_attempts` times with exponential backoff between
/// attempts. The cancellation token preempts the backoff sleep. Error kinds
/// are not inspected: callers wrap only operations whose failures are safe to
/// retry (idempotent reads, idempotent bulk writes).
pub async fn retry<T, F, Fut>(
    cfg: &RetrySettings,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let max_attempts = cfg.max_attempts.max(1);
    let mut wait = cfg.initial_wait();
    let mut last_err: Option<AppError> = None;

    for attempt in 0..max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_err = Some(err);
            }
        }

        if attempt + 1 < max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled("context cancelled".to_string()));
                }
                _ = tokio::time::sleep(wait) => {}
            }
            wait = next_wait(wait, cfg.multiplier, cfg.max_wait());
        }
    }

    Err(RetryError::Exhausted {
        attempts: max_attempts,
        source: last_err.unwrap_or_else(|| AppError::Internal("retry without attempts".into())),
    })
}

fn next_wait(wait: Duration, multiplier: f64, max_wait: Duration) -> Duration {
    let scaled = wait.as_secs_f64() * multiplier;
    Duration::from_secs_f64(scaled).min(max_wait)
}
