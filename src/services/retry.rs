//! Bounded, immediate retries for fallible async operations.
//!
//! There is no backoff: a failed attempt is re-issued straight away until the
//! retry budget is spent. A per-attempt timeout discards the attempt's result
//! but does not cancel work the operation already handed to a remote system.

use std::{fmt, future::Future, sync::Arc, time::Duration};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            attempt_timeout: None,
        }
    }
}

/// Why a single attempt failed.
#[derive(Debug, Error)]
pub enum AttemptError<E> {
    #[error("{0}")]
    Failed(E),
    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {retries} retries: {last}")]
    Exhausted { retries: u32, last: AttemptError<E> },
    /// The operation failed with an error the caller marked as not retryable.
    #[error("{0}")]
    Permanent(E),
}

impl<E> RetryError<E> {
    /// The underlying operation error, if the last attempt did not time out.
    pub fn inner(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted {
                last: AttemptError::Failed(err),
                ..
            }
            | RetryError::Permanent(err) => Some(err),
            RetryError::Exhausted { .. } => None,
        }
    }
}

/// Emitted after every failed attempt that will be retried.
#[derive(Debug)]
pub struct RetryNotice<'a> {
    pub label: &'a str,
    pub attempt: u32,
    pub max_retries: u32,
    pub error: String,
}

type Notifier = Arc<dyn Fn(&RetryNotice<'_>) + Send + Sync>;

#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    notifier: Option<Notifier>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            notifier: None,
        }
    }

    /// Observe retry notices in addition to the `warn!` log line.
    pub fn with_notifier(
        mut self,
        notifier: impl Fn(&RetryNotice<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    /// Run `op` up to `max_retries + 1` times, retrying every failure.
    pub async fn run<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_when(label, op, |_| true).await
    }

    /// Like [`run`](Self::run), but errors for which `retryable` returns
    /// false are surfaced at once as [`RetryError::Permanent`]. Timeouts are
    /// always retried.
    pub async fn run_when<T, E, F, Fut, P>(
        &self,
        label: &str,
        mut op: F,
        retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let max_retries = self.policy.max_retries;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let outcome = match self.policy.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(result) => result.map_err(AttemptError::Failed),
                    Err(_) => Err(AttemptError::TimedOut(limit)),
                },
                None => op().await.map_err(AttemptError::Failed),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(AttemptError::Failed(err)) if !retryable(&err) => {
                    return Err(RetryError::Permanent(err));
                }
                Err(err) => err,
            };

            if attempt > max_retries {
                return Err(RetryError::Exhausted {
                    retries: max_retries,
                    last: err,
                });
            }

            let notice = RetryNotice {
                label,
                attempt,
                max_retries,
                error: err.to_string(),
            };
            tracing::warn!(
                "{label}: attempt {}/{} failed, retrying: {}",
                notice.attempt,
                max_retries + 1,
                notice.error
            );
            if let Some(notifier) = &self.notifier {
                notifier(&notice);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(max_retries: u32, attempt_timeout: Option<Duration>) -> RetryExecutor {
        RetryExecutor::new(RetryPolicy {
            max_retries,
            attempt_timeout,
        })
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let notices = Arc::new(AtomicU32::new(0));
        let seen = notices.clone();
        let retry = executor(2, None).with_notifier(move |notice| {
            assert_eq!(notice.label, "flaky");
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let result: Result<u32, RetryError<String>> = retry
            .run("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(format!("boom {n}")) } else { Ok(n) }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(notices.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_budget_with_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RetryError<String>> = executor(2, None)
            .run("always", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("failure {n}"))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.inner().map(String::as_str), Some("failure 3"));
        assert_eq!(err.to_string(), "gave up after 2 retries: failure 3");
    }

    #[tokio::test]
    async fn slow_attempts_count_as_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RetryError<String>> = executor(1, Some(Duration::from_millis(10)))
            .run("slow", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            result,
            Err(RetryError::Exhausted {
                retries: 1,
                last: AttemptError::TimedOut(_)
            })
        ));
    }

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RetryError<&str>> = executor(5, None)
            .run_when(
                "permanent",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("not found")
                },
                |err| *err != "not found",
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Permanent("not found"))));
    }

    #[tokio::test]
    async fn zero_retries_runs_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RetryError<String>> = executor(0, None)
            .run("once", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("nope".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
