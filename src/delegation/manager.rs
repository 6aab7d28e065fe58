//! Delegation manager for task hand-offs
//!
//! The manager handles:
//! - Delegating a task, superseding any active delegation of the same task
//! - Revoking and completing delegations
//! - Projections over the stored delegation sequence
//! - Notifying the affected users and broadcasting typed events
//!
//! Delegation writes and the notification writes they trigger are separate writes. If the
//! notification write fails the delegation change stays applied.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::model::{Delegation, DelegationPriority, RevokeReason};
use super::user::CurrentUser;
use crate::error::{CollabError, Result};
use crate::models::{NotificationDraft, NotificationType, ResourceType};
use crate::notification::NotificationService;
use crate::store::Store;

/// Events emitted by the delegation manager
#[derive(Debug, Clone)]
pub enum DelegationEvent {
    /// A task was delegated; `superseded` is the delegation it replaced
    Created {
        delegation: Delegation,
        superseded: Option<Uuid>,
    },
    /// A delegation was revoked
    Revoked { delegation: Delegation },
    /// A delegation was completed
    Completed { delegation: Delegation },
}

/// Business-rule failures of delegation operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DelegationError {
    #[error("Delegation not found: {0}")]
    NotFound(Uuid),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Invalid delegation: {0}")]
    Validation(String),
}

impl From<DelegationError> for CollabError {
    fn from(err: DelegationError) -> Self {
        let message = err.to_string();
        match err {
            DelegationError::NotFound(id) => {
                CollabError::not_found(message).with_context("delegation_id", id.to_string())
            }
            DelegationError::NotAuthorized(_) => CollabError::permission_denied(message),
            DelegationError::InvalidStateTransition(_) => CollabError::invalid_state(message),
            DelegationError::Validation(_) => CollabError::validation(message),
        }
    }
}

struct ManagerInner {
    store: Store,
    notifications: NotificationService,
    write_gate: tokio::sync::Mutex<()>,
    event_tx: broadcast::Sender<DelegationEvent>,
}

/// Manager for task delegations. Clones share state.
#[derive(Clone)]
pub struct DelegationManager {
    inner: Arc<ManagerInner>,
}

impl DelegationManager {
    /// Create a new delegation manager
    pub fn new(store: Store, notifications: NotificationService) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(ManagerInner {
                store,
                notifications,
                write_gate: tokio::sync::Mutex::new(()),
                event_tx,
            }),
        }
    }

    /// Subscribe to delegation events
    pub fn subscribe(&self) -> broadcast::Receiver<DelegationEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Delegate a task to `assignee_id`. An active delegation of the same task is revoked as
    /// superseded in the same write.
    pub async fn delegate_task(
        &self,
        task_id: &str,
        assignee_id: &str,
        delegator_id: &str,
        note: Option<String>,
        priority: Option<DelegationPriority>,
    ) -> Result<Delegation> {
        for (field, value) in [
            ("task_id", task_id),
            ("assignee_id", assignee_id),
            ("delegator_id", delegator_id),
        ] {
            if value.trim().is_empty() {
                return Err(DelegationError::Validation(format!("{} is required", field)).into());
            }
        }

        let mut delegation = Delegation::new(task_id, delegator_id, assignee_id)
            .with_priority(priority.unwrap_or_default());
        if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
            delegation = delegation.with_note(note);
        }

        let superseded = {
            let _gate = self.inner.write_gate.lock().await;
            let mut records = self.inner.store.get::<Delegation>().await?;

            let mut superseded = None;
            if let Some(previous) = records
                .iter_mut()
                .find(|d| d.task_id == task_id && d.is_active())
            {
                previous
                    .revoke(delegator_id, RevokeReason::Superseded)
                    .map_err(DelegationError::InvalidStateTransition)?;
                superseded = Some(previous.clone());
            }

            records.push(delegation.clone());
            self.inner.store.set(&records).await?;
            superseded
        };

        match &superseded {
            Some(previous) => tracing::info!(
                "Task {} re-delegated from {} to {} (superseded {})",
                task_id,
                previous.assignee_id,
                assignee_id,
                previous.id
            ),
            None => tracing::info!("Task {} delegated to {}", task_id, assignee_id),
        }

        let _ = self.inner.event_tx.send(DelegationEvent::Created {
            delegation: delegation.clone(),
            superseded: superseded.as_ref().map(|d| d.id),
        });

        let mut drafts = vec![delegation_draft(
            NotificationType::DelegationCreated,
            &delegation,
            &delegation.assignee_id,
            delegator_id,
            "New task delegated",
            format!("{} delegated task {} to you", delegator_id, task_id),
        )];
        if let Some(previous) = superseded.as_ref() {
            if previous.assignee_id != delegation.assignee_id {
                drafts.push(delegation_draft(
                    NotificationType::DelegationRevoked,
                    previous,
                    &previous.assignee_id,
                    delegator_id,
                    "Delegation reassigned",
                    format!("Task {} was reassigned to {}", task_id, assignee_id),
                ));
            }
        }
        self.notify(drafts, delegation.id).await?;

        Ok(delegation)
    }

    /// Revoke an active delegation. Only the delegator or a team manager may revoke.
    pub async fn revoke_delegation(&self, id: Uuid, actor: &CurrentUser) -> Result<Delegation> {
        let revoked = {
            let _gate = self.inner.write_gate.lock().await;
            let mut records = self.inner.store.get::<Delegation>().await?;
            let delegation = records
                .iter_mut()
                .find(|d| d.id == id)
                .ok_or(DelegationError::NotFound(id))?;

            if delegation.delegator_id != actor.id && !actor.can_manage_team() {
                return Err(DelegationError::NotAuthorized(
                    "Only the delegator or a team manager can revoke a delegation".to_string(),
                )
                .into());
            }

            delegation
                .revoke(&actor.id, RevokeReason::Revoked)
                .map_err(DelegationError::InvalidStateTransition)?;
            let revoked = delegation.clone();
            self.inner.store.set(&records).await?;
            revoked
        };

        tracing::info!(
            "Delegation {} of task {} revoked by {}",
            revoked.id,
            revoked.task_id,
            actor.id
        );
        let _ = self.inner.event_tx.send(DelegationEvent::Revoked {
            delegation: revoked.clone(),
        });

        let draft = delegation_draft(
            NotificationType::DelegationRevoked,
            &revoked,
            &revoked.assignee_id,
            &actor.id,
            "Delegation revoked",
            format!("{} revoked your delegation of task {}", actor.id, revoked.task_id),
        );
        self.notify(vec![draft], revoked.id).await?;

        Ok(revoked)
    }

    /// Mark an active delegation completed and tell the delegator
    pub async fn complete_delegation(&self, id: Uuid) -> Result<Delegation> {
        let completed = {
            let _gate = self.inner.write_gate.lock().await;
            let mut records = self.inner.store.get::<Delegation>().await?;
            let delegation = records
                .iter_mut()
                .find(|d| d.id == id)
                .ok_or(DelegationError::NotFound(id))?;

            delegation
                .complete()
                .map_err(DelegationError::InvalidStateTransition)?;
            let completed = delegation.clone();
            self.inner.store.set(&records).await?;
            completed
        };

        tracing::info!(
            "Delegation {} of task {} completed by {}",
            completed.id,
            completed.task_id,
            completed.assignee_id
        );
        let _ = self.inner.event_tx.send(DelegationEvent::Completed {
            delegation: completed.clone(),
        });

        let draft = delegation_draft(
            NotificationType::TaskCompleted,
            &completed,
            &completed.delegator_id,
            &completed.assignee_id,
            "Task completed",
            format!(
                "{} completed task {}",
                completed.assignee_id, completed.task_id
            ),
        );
        self.notify(vec![draft], completed.id).await?;

        Ok(completed)
    }

    async fn notify(&self, drafts: Vec<NotificationDraft>, delegation_id: Uuid) -> Result<()> {
        if let Err(e) = self
            .inner
            .notifications
            .create_batch_notifications(drafts)
            .await
        {
            tracing::warn!(
                "Delegation {} was saved but its notifications were not: {}",
                delegation_id,
                e
            );
            // The primary write stays applied, so this failure is not retryable
            return Err(e
                .with_retryable(false)
                .with_context("delegation_id", delegation_id.to_string()));
        }
        Ok(())
    }

    // Queries

    async fn select<P>(&self, predicate: P) -> Result<Vec<Delegation>>
    where
        P: Fn(&Delegation) -> bool,
    {
        let records = self.inner.store.get::<Delegation>().await?;
        Ok(records.into_iter().filter(|d| predicate(d)).collect())
    }

    pub async fn get_delegation(&self, id: Uuid) -> Result<Option<Delegation>> {
        Ok(self.select(|d| d.id == id).await?.into_iter().next())
    }

    pub async fn get_active_delegation_for_task(&self, task_id: &str) -> Result<Option<Delegation>> {
        Ok(self
            .select(|d| d.task_id == task_id && d.is_active())
            .await?
            .into_iter()
            .next())
    }

    pub async fn is_task_delegated(&self, task_id: &str) -> Result<bool> {
        Ok(self.get_active_delegation_for_task(task_id).await?.is_some())
    }

    /// Every delegation of a task, in delegation order
    pub async fn get_delegations_by_task_id(&self, task_id: &str) -> Result<Vec<Delegation>> {
        self.select(|d| d.task_id == task_id).await
    }

    pub async fn get_delegations_by_assignee_id(&self, assignee_id: &str) -> Result<Vec<Delegation>> {
        self.select(|d| d.assignee_id == assignee_id).await
    }

    /// Active delegations assigned to the user
    pub async fn get_my_active_delegations(&self, user_id: &str) -> Result<Vec<Delegation>> {
        self.select(|d| d.assignee_id == user_id && d.is_active())
            .await
    }

    /// Delegations the user handed out, in any state
    pub async fn get_my_created_delegations(&self, user_id: &str) -> Result<Vec<Delegation>> {
        self.select(|d| d.delegator_id == user_id).await
    }
}

fn delegation_draft(
    notification_type: NotificationType,
    delegation: &Delegation,
    recipient_id: &str,
    sender_id: &str,
    title: &str,
    message: String,
) -> NotificationDraft {
    NotificationDraft::new(notification_type, recipient_id, sender_id, title, message)
        .with_resource(delegation.task_id.clone(), ResourceType::Task)
        .with_metadata("delegation_id", delegation.id.to_string())
        .with_metadata("priority", delegation.priority.as_str())
}
