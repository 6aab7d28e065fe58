//! Retry framework integration tests

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use collab_notify::delegation::{CurrentUser, Role, StaticUser};
use collab_notify::error::{CollabError, ErrorKind};
use collab_notify::notification::NotificationSettings;
use collab_notify::retry::{ErrorHandler, RetryConfig, RetryError};
use collab_notify::store::Store;
use collab_notify::Collaboration;

fn failing_n_times(
    calls: Arc<AtomicU32>,
    failures: u32,
    err: CollabError,
) -> impl Fn() -> BoxFuture<'static, Result<u32, CollabError>> + Send + Sync + 'static {
    move || {
        let calls = calls.clone();
        let err = err.clone();
        Box::pin(async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= failures {
                Err(err)
            } else {
                Ok(n)
            }
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_resolve_after_n_plus_one_calls() {
    let handler = ErrorHandler::new();
    let calls = Arc::new(AtomicU32::new(0));
    let started = tokio::time::Instant::now();

    let result = assert_ok!(
        handler
            .execute(
                failing_n_times(calls.clone(), 2, CollabError::network("flaky link")),
                RetryConfig::new(3, Duration::from_millis(1000)),
            )
            .await
    );

    assert_eq!(result, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // 1s before the first retry, 2s before the second
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(3000) && waited < Duration::from_millis(3100));
    assert!(handler.current_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_failure_runs_once() {
    let handler = ErrorHandler::new();
    let calls = Arc::new(AtomicU32::new(0));

    let err = assert_err!(
        handler
            .execute(
                failing_n_times(calls.clone(), u32::MAX, CollabError::validation("title required")),
                RetryConfig::default(),
            )
            .await
    );

    assert_eq!(err.kind, ErrorKind::ValidationError);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        handler.retry_last_operation().await,
        Err(RetryError::NoRetryableOperation)
    );
}

#[tokio::test]
async fn test_retry_last_operation_with_nothing_stored() {
    let handler = ErrorHandler::new();
    assert_eq!(
        handler.retry_last_operation().await,
        Err(RetryError::NoRetryableOperation)
    );
}

#[tokio::test(start_paused = true)]
async fn test_quota_failure_then_manual_retry_through_actions() {
    let store = Store::in_memory();
    let collab = Collaboration::new(store.clone(), NotificationSettings::default());
    let actions = collab.actions(Arc::new(StaticUser(CurrentUser::new(
        "u1",
        "Alice",
        Role::Member,
    ))));

    store.set_memory_quota(Some(16));
    let err = actions
        .delegations
        .delegate_task("t1", "u2", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::StorageError);
    assert!(err.retryable);
    assert_eq!(err.context["operation"], "delegate_task");
    assert!(!err.suggestions().is_empty());

    let state = actions.handler.state();
    assert_eq!(state.attempts, 4);
    assert!(!state.is_retrying);
    assert!(!collab.delegations.is_task_delegated("t1").await.unwrap());

    // Still over quota: the manual retry fails and is counted
    match actions.handler.retry_last_operation().await {
        Err(RetryError::Operation(e)) => assert_eq!(e.kind, ErrorKind::StorageError),
        other => panic!("Expected operation error, got {:?}", other),
    }
    assert_eq!(actions.handler.state().manual_retries, 1);

    store.set_memory_quota(None);
    actions.handler.retry_last_operation().await.unwrap();
    assert!(actions.handler.current_error().is_none());
    assert!(collab.delegations.is_task_delegated("t1").await.unwrap());
}
