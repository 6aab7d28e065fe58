//! Feature-level operations run through the retry framework
//!
//! Each wrapper resolves the acting user, applies its feature's default [`RetryConfig`] and
//! tags failures with an [`OperationContext`]. The shared [`ErrorHandler`] holds the last
//! failure for presentation and manual retry.

use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use crate::comment::{Comment, CommentService};
use crate::delegation::{Delegation, DelegationManager, DelegationPriority, UserDirectory};
use crate::error::{CollabError, Result};
use crate::models::Notification;
use crate::notification::NotificationService;
use crate::retry::{ErrorHandler, Feature, OperationContext, RetryConfig};

#[derive(Clone)]
struct FeatureRunner {
    feature: Feature,
    handler: ErrorHandler,
    config: RetryConfig,
}

impl FeatureRunner {
    fn new(feature: Feature, handler: ErrorHandler) -> Self {
        Self {
            feature,
            handler,
            config: feature.default_retry_config(),
        }
    }

    fn context(&self, operation: &'static str) -> OperationContext {
        OperationContext::new(self.feature, operation)
    }

    async fn run<T, F, Fut>(&self, context: OperationContext, operation: F) -> Result<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.handler
            .execute_with_context(operation, self.config.clone(), context)
            .await
    }
}

/// Delegation operations on behalf of the current user
#[derive(Clone)]
pub struct DelegationActions {
    manager: DelegationManager,
    users: Arc<dyn UserDirectory>,
    runner: FeatureRunner,
}

impl DelegationActions {
    pub fn new(
        manager: DelegationManager,
        users: Arc<dyn UserDirectory>,
        handler: ErrorHandler,
    ) -> Self {
        Self {
            manager,
            users,
            runner: FeatureRunner::new(Feature::Delegation, handler),
        }
    }

    /// Override the feature's default retry budget
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.runner.config = config;
        self
    }

    pub fn handler(&self) -> &ErrorHandler {
        &self.runner.handler
    }

    /// Delegate `task_id` to `assignee_id` with the current user as delegator
    pub async fn delegate_task(
        &self,
        task_id: &str,
        assignee_id: &str,
        note: Option<String>,
        priority: Option<DelegationPriority>,
    ) -> Result<Delegation> {
        let user = self.users.current_user();
        let manager = self.manager.clone();
        let task = task_id.to_string();
        let assignee = assignee_id.to_string();
        let context = self
            .runner
            .context("delegate_task")
            .with("task_id", task_id)
            .with("assignee_id", assignee_id);

        self.runner
            .run(context, move || {
                let manager = manager.clone();
                let user = user.clone();
                let task = task.clone();
                let assignee = assignee.clone();
                let note = note.clone();
                async move {
                    if !user.can_delegate() {
                        return Err(CollabError::permission_denied(format!(
                            "{} is not allowed to delegate tasks",
                            user.id
                        )));
                    }
                    manager
                        .delegate_task(&task, &assignee, &user.id, note, priority)
                        .await
                }
            })
            .await
    }

    /// Revoke a delegation as the current user
    pub async fn revoke_delegation(&self, id: Uuid) -> Result<Delegation> {
        let user = self.users.current_user();
        let manager = self.manager.clone();
        let context = self
            .runner
            .context("revoke_delegation")
            .with("delegation_id", id);

        self.runner
            .run(context, move || {
                let manager = manager.clone();
                let user = user.clone();
                async move { manager.revoke_delegation(id, &user).await }
            })
            .await
    }

    pub async fn complete_delegation(&self, id: Uuid) -> Result<Delegation> {
        let manager = self.manager.clone();
        let context = self
            .runner
            .context("complete_delegation")
            .with("delegation_id", id);

        self.runner
            .run(context, move || {
                let manager = manager.clone();
                async move { manager.complete_delegation(id).await }
            })
            .await
    }
}

/// Inbox operations for the current user
#[derive(Clone)]
pub struct NotificationActions {
    service: NotificationService,
    users: Arc<dyn UserDirectory>,
    runner: FeatureRunner,
}

impl NotificationActions {
    pub fn new(
        service: NotificationService,
        users: Arc<dyn UserDirectory>,
        handler: ErrorHandler,
    ) -> Self {
        Self {
            service,
            users,
            runner: FeatureRunner::new(Feature::Notification, handler),
        }
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.runner.config = config;
        self
    }

    pub fn handler(&self) -> &ErrorHandler {
        &self.runner.handler
    }

    pub async fn mark_as_read(&self, id: Uuid) -> Result<Notification> {
        let service = self.service.clone();
        let user_id = self.users.current_user().id;
        let context = self
            .runner
            .context("mark_as_read")
            .with("notification_id", id);

        self.runner
            .run(context, move || {
                let service = service.clone();
                let user_id = user_id.clone();
                async move { service.mark_as_read(id, &user_id).await }
            })
            .await
    }

    pub async fn mark_all_as_read(&self) -> Result<usize> {
        let service = self.service.clone();
        let user_id = self.users.current_user().id;
        let context = self.runner.context("mark_all_as_read");

        self.runner
            .run(context, move || {
                let service = service.clone();
                let user_id = user_id.clone();
                async move { service.mark_all_as_read(&user_id).await }
            })
            .await
    }

    pub async fn delete_notification(&self, id: Uuid) -> Result<()> {
        let service = self.service.clone();
        let user_id = self.users.current_user().id;
        let context = self
            .runner
            .context("delete_notification")
            .with("notification_id", id);

        self.runner
            .run(context, move || {
                let service = service.clone();
                let user_id = user_id.clone();
                async move { service.delete_notification(id, &user_id).await }
            })
            .await
    }

    pub async fn bulk_delete_notifications(&self, ids: Vec<Uuid>) -> Result<usize> {
        let service = self.service.clone();
        let user_id = self.users.current_user().id;
        let context = self
            .runner
            .context("bulk_delete_notifications")
            .with("count", ids.len());
        let ids = Arc::new(ids);

        self.runner
            .run(context, move || {
                let service = service.clone();
                let user_id = user_id.clone();
                let ids = ids.clone();
                async move { service.bulk_delete_notifications(&ids, &user_id).await }
            })
            .await
    }

    pub async fn clear_old_notifications(&self) -> Result<usize> {
        let service = self.service.clone();
        let user_id = self.users.current_user().id;
        let context = self.runner.context("clear_old_notifications");

        self.runner
            .run(context, move || {
                let service = service.clone();
                let user_id = user_id.clone();
                async move { service.clear_old_notifications(&user_id).await }
            })
            .await
    }

    pub async fn archive_old_notifications(&self, days: u32) -> Result<usize> {
        let service = self.service.clone();
        let user_id = self.users.current_user().id;
        let context = self
            .runner
            .context("archive_old_notifications")
            .with("days", days);

        self.runner
            .run(context, move || {
                let service = service.clone();
                let user_id = user_id.clone();
                async move { service.archive_old_notifications(&user_id, days).await }
            })
            .await
    }
}

/// Comment operations authored by the current user
#[derive(Clone)]
pub struct CommentActions {
    comments: CommentService,
    users: Arc<dyn UserDirectory>,
    runner: FeatureRunner,
}

impl CommentActions {
    pub fn new(comments: CommentService, users: Arc<dyn UserDirectory>, handler: ErrorHandler) -> Self {
        Self {
            comments,
            users,
            runner: FeatureRunner::new(Feature::Comment, handler),
        }
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.runner.config = config;
        self
    }

    pub fn handler(&self) -> &ErrorHandler {
        &self.runner.handler
    }

    pub async fn add_comment(
        &self,
        task_id: &str,
        body: &str,
        parent_id: Option<Uuid>,
    ) -> Result<Comment> {
        let comments = self.comments.clone();
        let user = self.users.current_user();
        let task = task_id.to_string();
        let body = body.to_string();
        let mut context = self.runner.context("add_comment").with("task_id", task_id);
        if let Some(parent_id) = parent_id {
            context = context.with("parent_id", parent_id);
        }

        self.runner
            .run(context, move || {
                let comments = comments.clone();
                let user = user.clone();
                let task = task.clone();
                let body = body.clone();
                async move {
                    if !user.can_comment() {
                        return Err(CollabError::permission_denied(format!(
                            "{} is not allowed to comment",
                            user.id
                        )));
                    }
                    comments.add_comment(&task, &user.id, &body, parent_id).await
                }
            })
            .await
    }

    pub async fn edit_comment(&self, id: Uuid, body: &str) -> Result<Comment> {
        let comments = self.comments.clone();
        let user_id = self.users.current_user().id;
        let body = body.to_string();
        let context = self.runner.context("edit_comment").with("comment_id", id);

        self.runner
            .run(context, move || {
                let comments = comments.clone();
                let user_id = user_id.clone();
                let body = body.clone();
                async move { comments.edit_comment(id, &user_id, &body).await }
            })
            .await
    }

    pub async fn delete_comment(&self, id: Uuid) -> Result<()> {
        let comments = self.comments.clone();
        let user_id = self.users.current_user().id;
        let context = self.runner.context("delete_comment").with("comment_id", id);

        self.runner
            .run(context, move || {
                let comments = comments.clone();
                let user_id = user_id.clone();
                async move { comments.delete_comment(id, &user_id).await }
            })
            .await
    }
}

/// Attachment operations are owned by the host application; this only supplies the
/// attachment retry budget and diagnostic context around them.
#[derive(Clone)]
pub struct AttachmentActions {
    runner: FeatureRunner,
}

impl AttachmentActions {
    pub fn new(handler: ErrorHandler) -> Self {
        Self {
            runner: FeatureRunner::new(Feature::Attachment, handler),
        }
    }

    pub fn handler(&self) -> &ErrorHandler {
        &self.runner.handler
    }

    /// Run an attachment operation for `task_id` with attachment retry defaults
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        task_id: &str,
        attachment_name: &str,
        op: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let context = self
            .runner
            .context(operation)
            .with("task_id", task_id)
            .with("attachment", attachment_name);
        self.runner.run(context, op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::{CurrentUser, Role, StaticUser};
    use crate::error::ErrorKind;
    use crate::store::Store;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn user(id: &str, role: Role) -> Arc<dyn UserDirectory> {
        Arc::new(StaticUser(CurrentUser::new(id, id, role)))
    }

    #[tokio::test]
    async fn test_delegate_defaults_delegator_to_current_user() {
        let store = Store::in_memory();
        let notifications = NotificationService::new(store.clone());
        let manager = DelegationManager::new(store, notifications);
        let actions = DelegationActions::new(manager, user("u1", Role::Member), ErrorHandler::new());

        let d = actions.delegate_task("t1", "u2", None, None).await.unwrap();
        assert_eq!(d.delegator_id, "u1");
        assert_eq!(actions.handler().state().attempts, 1);
        assert!(actions.handler().current_error().is_none());
    }

    #[tokio::test]
    async fn test_viewer_cannot_delegate_and_is_not_retried() {
        let store = Store::in_memory();
        let notifications = NotificationService::new(store.clone());
        let manager = DelegationManager::new(store, notifications);
        let actions = DelegationActions::new(manager, user("v1", Role::Viewer), ErrorHandler::new());

        let err = actions
            .delegate_task("t1", "u2", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        assert_eq!(err.context["feature"], "delegation");
        assert_eq!(err.context["operation"], "delegate_task");
        assert_eq!(err.context["task_id"], "t1");

        let state = actions.handler().state();
        assert_eq!(state.attempts, 1);
        assert_eq!(state.error, Some(err));
    }

    #[tokio::test(start_paused = true)]
    async fn test_comment_storage_failure_retries_then_recovers() {
        let store = Store::in_memory();
        let notifications = NotificationService::new(store.clone());
        let comments = CommentService::new(store.clone(), notifications);
        let actions = CommentActions::new(comments.clone(), user("u1", Role::Member), ErrorHandler::new());

        store.set_memory_quota(Some(8));
        let err = actions.add_comment("t1", "hello", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::StorageError);
        assert_eq!(err.context["feature"], "comment");
        assert_eq!(err.context["task_id"], "t1");
        // One attempt plus the comment feature's two retries
        assert_eq!(actions.handler().state().attempts, 3);

        store.set_memory_quota(None);
        actions.handler().retry_last_operation().await.unwrap();
        assert!(actions.handler().current_error().is_none());
        assert_eq!(comments.get_comments_for_task("t1").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delegate_with_failing_inbox_writes_one_delegation() {
        let store = Store::in_memory();
        let notifications = NotificationService::new(Store::in_memory_with_quota(1));
        let manager = DelegationManager::new(store, notifications);
        let actions =
            DelegationActions::new(manager.clone(), user("u1", Role::Member), ErrorHandler::new());

        let err = actions.delegate_task("t1", "u2", None, None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::StorageError);
        assert!(!err.retryable);
        assert!(err.context.contains_key("delegation_id"));
        assert_eq!(actions.handler().state().attempts, 1);

        let history = manager.get_delegations_by_task_id("t1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoke_with_failing_inbox_surfaces_storage_error() {
        let inbox_store = Store::in_memory();
        let notifications = NotificationService::new(inbox_store.clone());
        let manager = DelegationManager::new(Store::in_memory(), notifications);
        let actions =
            DelegationActions::new(manager.clone(), user("u1", Role::Member), ErrorHandler::new());

        let d = actions.delegate_task("t1", "u2", None, None).await.unwrap();
        inbox_store.set_memory_quota(Some(1));

        let err = actions.revoke_delegation(d.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::StorageError);
        assert_eq!(err.context["delegation_id"], d.id.to_string());
        assert_eq!(actions.handler().state().attempts, 1);

        let stored = manager.get_delegation(d.id).await.unwrap().unwrap();
        assert_eq!(stored.status, crate::delegation::DelegationStatus::Revoked);

        let err = actions.complete_delegation(d.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);
    }

    #[tokio::test(start_paused = true)]
    async fn test_comment_with_failing_inbox_is_stored_once() {
        let notifications = NotificationService::new(Store::in_memory_with_quota(1));
        let comments = CommentService::new(Store::in_memory(), notifications);
        let actions =
            CommentActions::new(comments.clone(), user("u1", Role::Member), ErrorHandler::new());

        let err = actions.add_comment("t1", "@u2 take a look", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::StorageError);
        assert!(!err.retryable);
        assert!(err.context.contains_key("comment_id"));
        assert_eq!(actions.handler().state().attempts, 1);
        assert_eq!(comments.get_comments_for_task("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_notification_actions_scope_to_current_user() {
        let store = Store::in_memory();
        let service = NotificationService::new(store);
        let actions = NotificationActions::new(service.clone(), user("u1", Role::Member), ErrorHandler::new());

        let mine = service
            .create_notification(crate::models::NotificationDraft::new(
                crate::models::NotificationType::Mention,
                "u1",
                "u2",
                "Hi",
                "hello",
            ))
            .await
            .unwrap();
        let theirs = service
            .create_notification(crate::models::NotificationDraft::new(
                crate::models::NotificationType::Mention,
                "u2",
                "u1",
                "Hi",
                "hello",
            ))
            .await
            .unwrap();

        let err = actions.mark_as_read(theirs.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.context["notification_id"], theirs.id.to_string());

        assert!(actions.mark_as_read(mine.id).await.unwrap().is_read);
        assert_eq!(actions.bulk_delete_notifications(vec![mine.id, theirs.id]).await.unwrap(), 1);
        assert_eq!(service.get_notifications("u2").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attachment_run_uses_attachment_budget() {
        let actions = AttachmentActions::new(ErrorHandler::new());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = actions
            .run("upload", "t1", "design.pdf", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(CollabError::network("upload interrupted"))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err.context["feature"], "attachment");
        assert_eq!(err.context["attachment"], "design.pdf");
    }
}
