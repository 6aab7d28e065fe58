//! Task comments with @mention and reply notifications

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CollabError, Result};
use crate::models::{NotificationDraft, NotificationType, ResourceType};
use crate::notification::NotificationService;
use crate::store::{Collection, Record, Store};

/// A comment on a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub task_id: String,
    pub author_id: String,
    pub body: String,
    /// Comment this one replies to
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<Uuid>,
    /// User ids mentioned as `@id` in the body
    #[serde(default)]
    pub mentions: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub edited_at: Option<DateTime<Utc>>,
}

impl Record for Comment {
    const COLLECTION: Collection = Collection::Comments;

    fn record_id(&self) -> Uuid {
        self.id
    }
}

/// Extract `@user` mentions from a comment body, first occurrence order, without duplicates.
///
/// A mention is `@` at the start of a word followed by letters, digits, `_`, `-` or `.`;
/// trailing dots are punctuation.
pub fn parse_mentions(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut mentions = Vec::new();

    for word in body.split_whitespace() {
        let Some(rest) = word.strip_prefix('@') else {
            continue;
        };
        let name: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
            .collect();
        let name = name.trim_end_matches('.');
        if !name.is_empty() && seen.insert(name.to_string()) {
            mentions.push(name.to_string());
        }
    }
    mentions
}

struct CommentInner {
    store: Store,
    notifications: NotificationService,
    write_gate: tokio::sync::Mutex<()>,
}

/// Comment service. Clones share state.
#[derive(Clone)]
pub struct CommentService {
    inner: Arc<CommentInner>,
}

impl CommentService {
    pub fn new(store: Store, notifications: NotificationService) -> Self {
        Self {
            inner: Arc::new(CommentInner {
                store,
                notifications,
                write_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Post a comment, optionally as a reply to `parent_id` on the same task
    pub async fn add_comment(
        &self,
        task_id: &str,
        author_id: &str,
        body: &str,
        parent_id: Option<Uuid>,
    ) -> Result<Comment> {
        if task_id.trim().is_empty() {
            return Err(CollabError::validation("task_id is required"));
        }
        if author_id.trim().is_empty() {
            return Err(CollabError::validation("author_id is required"));
        }
        let body = validate_body(body)?;

        let comment = Comment {
            id: Uuid::new_v4(),
            task_id: task_id.to_string(),
            author_id: author_id.to_string(),
            body: body.to_string(),
            parent_id,
            mentions: parse_mentions(body),
            created_at: Utc::now(),
            edited_at: None,
        };

        let parent = {
            let _gate = self.inner.write_gate.lock().await;
            let parent = match parent_id {
                Some(pid) => Some(
                    self.inner
                        .store
                        .get::<Comment>()
                        .await?
                        .into_iter()
                        .find(|c| c.id == pid && c.task_id == task_id)
                        .ok_or_else(|| not_found(pid))?,
                ),
                None => None,
            };
            self.inner.store.append(comment.clone()).await?;
            parent
        };
        tracing::info!("Comment {} added to task {} by {}", comment.id, task_id, author_id);

        let mut drafts = mention_drafts(&comment, &comment.mentions);
        if let Some(parent) = parent {
            if parent.author_id != comment.author_id && !comment.mentions.contains(&parent.author_id)
            {
                drafts.push(
                    comment_draft(
                        NotificationType::Reply,
                        &comment,
                        &parent.author_id,
                        "New reply",
                        format!("{} replied to your comment", comment.author_id),
                    )
                    .with_metadata("parent_id", parent.id.to_string()),
                );
            }
        }
        self.notify(drafts, comment.id).await?;

        Ok(comment)
    }

    /// Replace a comment's body. Only users newly mentioned by the edit are notified.
    pub async fn edit_comment(&self, id: Uuid, actor_id: &str, body: &str) -> Result<Comment> {
        let body = validate_body(body)?;

        let (edited, added) = {
            let _gate = self.inner.write_gate.lock().await;
            let current = self
                .inner
                .store
                .get::<Comment>()
                .await?
                .into_iter()
                .find(|c| c.id == id)
                .ok_or_else(|| not_found(id))?;
            if current.author_id != actor_id {
                return Err(CollabError::permission_denied(
                    "Only the author can edit a comment",
                )
                .with_context("comment_id", id.to_string()));
            }

            let mentions = parse_mentions(body);
            let added: Vec<String> = mentions
                .iter()
                .filter(|m| !current.mentions.contains(m))
                .cloned()
                .collect();
            let edited = self
                .inner
                .store
                .update(id, |c: &mut Comment| {
                    c.body = body.to_string();
                    c.mentions = mentions;
                    c.edited_at = Some(Utc::now());
                })
                .await?;
            (edited, added)
        };
        tracing::info!("Comment {} edited by {}", id, actor_id);

        self.notify(mention_drafts(&edited, &added), edited.id).await?;
        Ok(edited)
    }

    /// Delete a comment. Replies to it are kept.
    pub async fn delete_comment(&self, id: Uuid, actor_id: &str) -> Result<()> {
        let _gate = self.inner.write_gate.lock().await;
        let mut records = self.inner.store.get::<Comment>().await?;
        let index = records
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| not_found(id))?;
        if records[index].author_id != actor_id {
            return Err(
                CollabError::permission_denied("Only the author can delete a comment")
                    .with_context("comment_id", id.to_string()),
            );
        }
        records.remove(index);
        self.inner.store.set(&records).await?;
        tracing::info!("Comment {} deleted by {}", id, actor_id);
        Ok(())
    }

    /// Comments on a task, oldest first
    pub async fn get_comments_for_task(&self, task_id: &str) -> Result<Vec<Comment>> {
        let mut comments: Vec<Comment> = self
            .inner
            .store
            .get::<Comment>()
            .await?
            .into_iter()
            .filter(|c| c.task_id == task_id)
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(comments)
    }

    async fn notify(&self, drafts: Vec<NotificationDraft>, comment_id: Uuid) -> Result<()> {
        if let Err(e) = self
            .inner
            .notifications
            .create_batch_notifications(drafts)
            .await
        {
            tracing::warn!(
                "Comment {} was saved but its notifications were not: {}",
                comment_id,
                e
            );
            // The primary write stays applied, so this failure is not retryable
            return Err(e
                .with_retryable(false)
                .with_context("comment_id", comment_id.to_string()));
        }
        Ok(())
    }
}

fn validate_body(body: &str) -> Result<&str> {
    let body = body.trim();
    if body.is_empty() {
        return Err(CollabError::validation("Comment body is required"));
    }
    Ok(body)
}

fn not_found(id: Uuid) -> CollabError {
    CollabError::not_found(format!("Comment {} not found", id))
        .with_context("comment_id", id.to_string())
}

fn mention_drafts(comment: &Comment, mentions: &[String]) -> Vec<NotificationDraft> {
    mentions
        .iter()
        .filter(|m| **m != comment.author_id)
        .map(|m| {
            comment_draft(
                NotificationType::Mention,
                comment,
                m,
                "You were mentioned",
                format!("{} mentioned you on task {}", comment.author_id, comment.task_id),
            )
        })
        .collect()
}

fn comment_draft(
    notification_type: NotificationType,
    comment: &Comment,
    recipient_id: &str,
    title: &str,
    message: String,
) -> NotificationDraft {
    NotificationDraft::new(
        notification_type,
        recipient_id,
        comment.author_id.clone(),
        title,
        message,
    )
    .with_resource(comment.id.to_string(), ResourceType::Comment)
    .with_metadata("task_id", comment.task_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn setup() -> (CommentService, NotificationService) {
        let store = Store::in_memory();
        let notifications = NotificationService::new(store.clone());
        (CommentService::new(store, notifications.clone()), notifications)
    }

    #[test]
    fn test_parse_mentions() {
        assert_eq!(
            parse_mentions("ping @alice and @bob.smith, then @alice again."),
            vec!["alice".to_string(), "bob.smith".to_string()]
        );
        assert_eq!(parse_mentions("see @carol."), vec!["carol".to_string()]);
        assert!(parse_mentions("mail me at a@b.com or @ alone").is_empty());
    }

    #[tokio::test]
    async fn test_add_comment_notifies_mentions() {
        let (comments, notifications) = setup();

        let c = comments
            .add_comment("t1", "u1", "hey @u2, loop in @u3 (and me @u1)", None)
            .await
            .unwrap();
        assert_eq!(c.mentions, vec!["u2", "u3", "u1"]);

        for user in ["u2", "u3"] {
            let inbox = notifications.get_notifications(user).await.unwrap();
            assert_eq!(inbox.len(), 1);
            assert_eq!(inbox[0].notification_type, NotificationType::Mention);
            assert_eq!(inbox[0].resource_id, Some(c.id.to_string()));
        }
        assert!(notifications.get_notifications("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reply_notifies_parent_author_once() {
        let (comments, notifications) = setup();
        let parent = comments.add_comment("t1", "u1", "first", None).await.unwrap();

        comments
            .add_comment("t1", "u2", "agreed", Some(parent.id))
            .await
            .unwrap();
        let inbox = notifications.get_notifications("u1").await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].notification_type, NotificationType::Reply);

        // Mentioning the parent author in the reply yields a mention, not a second reply
        comments
            .add_comment("t1", "u2", "@u1 see above", Some(parent.id))
            .await
            .unwrap();
        let inbox = notifications.get_notifications("u1").await.unwrap();
        assert_eq!(inbox.len(), 2);
        let count = |kind: NotificationType| inbox.iter().filter(|n| n.notification_type == kind).count();
        assert_eq!(count(NotificationType::Reply), 1);
        assert_eq!(count(NotificationType::Mention), 1);

        // Replying to yourself is silent
        comments
            .add_comment("t1", "u1", "follow-up", Some(parent.id))
            .await
            .unwrap();
        assert_eq!(notifications.get_notifications("u1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_add_comment_validation() {
        let (comments, _) = setup();

        let err = comments.add_comment("t1", "u1", "   ", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);

        let err = comments
            .add_comment("t1", "u1", "reply", Some(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let other = comments.add_comment("t2", "u1", "elsewhere", None).await.unwrap();
        let err = comments
            .add_comment("t1", "u1", "reply", Some(other.id))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(comments.get_comments_for_task("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_notifies_new_mentions_only() {
        let (comments, notifications) = setup();
        let c = comments.add_comment("t1", "u1", "cc @u2", None).await.unwrap();

        let edited = comments
            .edit_comment(c.id, "u1", "cc @u2 @u3")
            .await
            .unwrap();
        assert!(edited.edited_at.is_some());
        assert_eq!(edited.body, "cc @u2 @u3");
        assert_eq!(comments.get_comments_for_task("t1").await.unwrap(), vec![edited.clone()]);

        assert_eq!(notifications.get_notifications("u2").await.unwrap().len(), 1);
        assert_eq!(notifications.get_notifications("u3").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_only_author_edits_or_deletes() {
        let (comments, _) = setup();
        let c = comments.add_comment("t1", "u1", "mine", None).await.unwrap();

        let err = comments.edit_comment(c.id, "u2", "hijack").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        let err = comments.delete_comment(c.id, "u2").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);

        comments.delete_comment(c.id, "u1").await.unwrap();
        assert!(comments.get_comments_for_task("t1").await.unwrap().is_empty());

        let err = comments.delete_comment(c.id, "u1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_comments_oldest_first() {
        let (comments, _) = setup();
        let a = comments.add_comment("t1", "u1", "one", None).await.unwrap();
        let b = comments.add_comment("t1", "u2", "two", None).await.unwrap();
        comments.add_comment("t2", "u2", "other task", None).await.unwrap();

        let listed = comments.get_comments_for_task("t1").await.unwrap();
        assert_eq!(
            listed.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![a.id, b.id]
        );
    }
}
