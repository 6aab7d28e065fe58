//! Error handler executing fallible operations with bounded retry

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::config::RetryConfig;
use super::context::OperationContext;
use crate::error::CollabError;

/// Errors from [`ErrorHandler::retry_last_operation`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    #[error("No retryable operation is available")]
    NoRetryableOperation,

    #[error("Retry budget exhausted after {used} manual retries")]
    RetryBudgetExhausted { used: u32 },

    #[error(transparent)]
    Operation(#[from] CollabError),
}

/// Snapshot of the handler's error state, for presentation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorState {
    pub error: Option<CollabError>,
    /// True while waiting for or running a retry
    pub is_retrying: bool,
    /// Invocations made by the last `execute`
    pub attempts: u32,
    /// Manual retries spent on the stored operation
    pub manual_retries: u32,
}

type StoredOperation = Arc<dyn Fn() -> BoxFuture<'static, Result<(), CollabError>> + Send + Sync>;

struct LastOperation {
    run: StoredOperation,
    config: RetryConfig,
    manual_retries: u32,
}

#[derive(Default)]
struct HandlerInner {
    state: ErrorState,
    last: Option<LastOperation>,
}

/// Runs operations with retry and remembers the last failure.
///
/// Cloning gives another handle to the same state.
#[derive(Clone, Default)]
pub struct ErrorHandler {
    inner: Arc<Mutex<HandlerInner>>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HandlerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ErrorState {
        self.lock().state.clone()
    }

    pub fn current_error(&self) -> Option<CollabError> {
        self.lock().state.error.clone()
    }

    /// Dismiss the current error and forget the stored operation
    pub fn clear_error(&self) {
        let mut inner = self.lock();
        inner.state = ErrorState::default();
        inner.last = None;
    }

    /// Run `operation` with retry, without diagnostic context
    pub async fn execute<T, E, F, Fut>(&self, operation: F, config: RetryConfig) -> Result<T, CollabError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<CollabError> + Send + 'static,
    {
        self.run(operation, config, None).await
    }

    /// Run `operation` with retry, annotating failures with `context`
    pub async fn execute_with_context<T, E, F, Fut>(
        &self,
        operation: F,
        config: RetryConfig,
        context: OperationContext,
    ) -> Result<T, CollabError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<CollabError> + Send + 'static,
    {
        self.run(operation, config, Some(context)).await
    }

    async fn run<T, E, F, Fut>(
        &self,
        operation: F,
        config: RetryConfig,
        context: Option<OperationContext>,
    ) -> Result<T, CollabError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<CollabError> + Send + 'static,
    {
        let operation = Arc::new(operation);

        {
            let mut inner = self.lock();
            inner.state = ErrorState::default();
            inner.last = Some(LastOperation {
                run: erase(operation.clone(), context.clone()),
                config: config.clone(),
                manual_retries: 0,
            });
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let err = match operation().await {
                Ok(value) => {
                    let mut inner = self.lock();
                    inner.state = ErrorState {
                        attempts,
                        ..ErrorState::default()
                    };
                    inner.last = None;
                    return Ok(value);
                }
                Err(e) => classify(e, context.as_ref()),
            };

            let retries_used = attempts - 1;
            if retries_used >= config.max_retries || !config.should_retry(&err) {
                if err.retryable && retries_used >= config.max_retries {
                    tracing::error!("Operation failed after {} attempts: {}", attempts, err);
                } else {
                    tracing::debug!("Operation failed without retry: {}", err);
                }
                let mut inner = self.lock();
                inner.state.error = Some(err.clone());
                inner.state.is_retrying = false;
                inner.state.attempts = attempts;
                return Err(err);
            }

            let delay = config.delay_for_attempt(retries_used + 1);
            tracing::warn!(
                "Attempt {} failed ({}), retrying in {:?}",
                attempts,
                err,
                delay
            );
            {
                let mut inner = self.lock();
                inner.state.error = Some(err);
                inner.state.is_retrying = true;
                inner.state.attempts = attempts;
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Re-run the last failed operation once, spending one unit of its retry budget
    pub async fn retry_last_operation(&self) -> Result<(), RetryError> {
        let run = {
            let mut inner = self.lock();
            let error = inner.state.error.clone();
            let last = inner.last.as_mut().ok_or(RetryError::NoRetryableOperation)?;

            match &error {
                Some(err) if last.config.should_retry(err) => {}
                _ => return Err(RetryError::NoRetryableOperation),
            }
            if last.manual_retries >= last.config.max_retries {
                return Err(RetryError::RetryBudgetExhausted {
                    used: last.manual_retries,
                });
            }

            last.manual_retries += 1;
            let used = last.manual_retries;
            let run = last.run.clone();
            inner.state.manual_retries = used;
            inner.state.is_retrying = true;
            run
        };

        tracing::info!("Retrying last failed operation");
        let result = run().await;

        let mut inner = self.lock();
        inner.state.is_retrying = false;
        match result {
            Ok(()) => {
                inner.state.error = None;
                inner.last = None;
                Ok(())
            }
            Err(err) => {
                tracing::warn!("Manual retry failed: {}", err);
                inner.state.error = Some(err.clone());
                Err(RetryError::Operation(err))
            }
        }
    }
}

fn classify<E: Into<CollabError>>(err: E, context: Option<&OperationContext>) -> CollabError {
    let err = err.into();
    match context {
        Some(ctx) => ctx.attach(err),
        None => err,
    }
}

fn erase<T, E, F, Fut>(operation: Arc<F>, context: Option<OperationContext>) -> StoredOperation
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<CollabError> + Send + 'static,
{
    Arc::new(move || {
        let fut = operation();
        let context = context.clone();
        Box::pin(async move {
            fut.await
                .map(|_| ())
                .map_err(|e| classify(e, context.as_ref()))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::retry::Feature;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Operation failing `failures` times with `err`, then returning the call count
    fn flaky(
        calls: Arc<AtomicU32>,
        failures: u32,
        err: CollabError,
    ) -> impl Fn() -> BoxFuture<'static, Result<u32, CollabError>> + Send + Sync + 'static {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let err = err.clone();
            Box::pin(async move {
                if n <= failures {
                    Err(err)
                } else {
                    Ok(n)
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let handler = ErrorHandler::new();
        let calls = Arc::new(AtomicU32::new(0));

        let result = handler
            .execute(
                flaky(calls.clone(), 2, CollabError::network("offline")),
                RetryConfig::default(),
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let state = handler.state();
        assert!(state.error.is_none());
        assert_eq!(state.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_invoked_once() {
        let handler = ErrorHandler::new();
        let calls = Arc::new(AtomicU32::new(0));

        let result = handler
            .execute(
                flaky(calls.clone(), u32::MAX, CollabError::validation("empty")),
                RetryConfig::default(),
            )
            .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::ValidationError);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            handler.current_error().map(|e| e.kind),
            Some(ErrorKind::ValidationError)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_budget_and_keeps_error() {
        let handler = ErrorHandler::new();
        let calls = Arc::new(AtomicU32::new(0));

        let result = handler
            .execute(
                flaky(calls.clone(), u32::MAX, CollabError::storage("quota")),
                RetryConfig::new(2, Duration::from_millis(100)),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let state = handler.state();
        assert_eq!(state.attempts, 3);
        assert!(!state.is_retrying);
        assert_eq!(state.error.unwrap().kind, ErrorKind::StorageError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_between_attempts() {
        let handler = ErrorHandler::new();
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        handler
            .execute(
                flaky(calls.clone(), 3, CollabError::network("offline")),
                RetryConfig::new(3, Duration::from_millis(1000)),
            )
            .await
            .unwrap();

        // 1000 + 2000 + 4000
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(7000));
        assert!(elapsed < Duration::from_millis(7100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_retry_condition_skips_retry() {
        let handler = ErrorHandler::new();
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::default().with_retry_condition(|_| false);

        let result = handler
            .execute(
                flaky(calls.clone(), u32::MAX, CollabError::network("offline")),
                config,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_last_operation_without_failure() {
        let handler = ErrorHandler::new();
        assert_eq!(
            handler.retry_last_operation().await,
            Err(RetryError::NoRetryableOperation)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_last_operation_after_success_is_unavailable() {
        let handler = ErrorHandler::new();
        let calls = Arc::new(AtomicU32::new(0));
        handler
            .execute(
                flaky(calls, 0, CollabError::network("offline")),
                RetryConfig::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            handler.retry_last_operation().await,
            Err(RetryError::NoRetryableOperation)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_last_operation_recovers() {
        let handler = ErrorHandler::new();
        let calls = Arc::new(AtomicU32::new(0));

        // Fails on the first attempt and its single retry, succeeds on the manual retry
        let result = handler
            .execute(
                flaky(calls.clone(), 2, CollabError::network("offline")),
                RetryConfig::new(1, Duration::from_millis(10)),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        handler.retry_last_operation().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(handler.current_error().is_none());

        // Stored operation is gone once it succeeded
        assert_eq!(
            handler.retry_last_operation().await,
            Err(RetryError::NoRetryableOperation)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_last_operation_non_retryable() {
        let handler = ErrorHandler::new();
        let calls = Arc::new(AtomicU32::new(0));
        let _ = handler
            .execute(
                flaky(calls.clone(), u32::MAX, CollabError::permission_denied("no")),
                RetryConfig::default(),
            )
            .await;

        assert_eq!(
            handler.retry_last_operation().await,
            Err(RetryError::NoRetryableOperation)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_retries_count_against_budget() {
        let handler = ErrorHandler::new();
        let calls = Arc::new(AtomicU32::new(0));
        let _ = handler
            .execute(
                flaky(calls.clone(), u32::MAX, CollabError::network("offline")),
                RetryConfig::new(2, Duration::from_millis(10)),
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        for _ in 0..2 {
            let err = handler.retry_last_operation().await.unwrap_err();
            assert!(matches!(err, RetryError::Operation(_)));
        }
        assert_eq!(handler.state().manual_retries, 2);
        assert_eq!(
            handler.retry_last_operation().await,
            Err(RetryError::RetryBudgetExhausted { used: 2 })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(handler.current_error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_clears_previous_error() {
        let handler = ErrorHandler::new();
        let _ = handler
            .execute(
                flaky(Arc::new(AtomicU32::new(0)), u32::MAX, CollabError::validation("bad")),
                RetryConfig::default(),
            )
            .await;
        assert!(handler.current_error().is_some());

        handler
            .execute(
                flaky(Arc::new(AtomicU32::new(0)), 0, CollabError::validation("bad")),
                RetryConfig::default(),
            )
            .await
            .unwrap();
        assert!(handler.current_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_attached_to_error() {
        let handler = ErrorHandler::new();
        let ctx = OperationContext::new(Feature::Comment, "add_comment").with("task_id", "t9");

        let err = handler
            .execute_with_context(
                flaky(Arc::new(AtomicU32::new(0)), u32::MAX, CollabError::validation("empty")),
                RetryConfig::default(),
                ctx,
            )
            .await
            .unwrap_err();

        assert_eq!(err.context["operation"], "add_comment");
        assert_eq!(err.context["task_id"], "t9");
        assert_eq!(handler.current_error().unwrap().context["feature"], "comment");
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_errors_are_classified() {
        let handler = ErrorHandler::new();
        let err = handler
            .execute(
                || async { Err::<(), _>(anyhow::anyhow!("request timed out")) },
                RetryConfig::no_retry(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NetworkError);
    }

    #[tokio::test]
    async fn test_clear_error() {
        let handler = ErrorHandler::new();
        let _ = handler
            .execute(
                || async { Err::<(), _>(CollabError::network("offline")) },
                RetryConfig::no_retry(),
            )
            .await;
        assert!(handler.current_error().is_some());

        handler.clear_error();
        assert_eq!(handler.state(), ErrorState::default());
        assert_eq!(
            handler.retry_last_operation().await,
            Err(RetryError::NoRetryableOperation)
        );
    }
}
