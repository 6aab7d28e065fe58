//! Message templates for synthesized notifications

use crate::models::{NotificationDraft, NotificationType, ResourceType};

/// Sender id used for synthesized notifications
pub const SIMULATED_SENDER_ID: &str = "system";

/// Title and message for a notification type
pub fn template(notification_type: NotificationType) -> (&'static str, &'static str) {
    match notification_type {
        NotificationType::DelegationCreated => (
            "New task delegated",
            "A teammate delegated a task to you",
        ),
        NotificationType::DelegationRevoked => (
            "Delegation revoked",
            "A task delegated to you was taken back",
        ),
        NotificationType::TaskCompleted => (
            "Task completed",
            "A task you delegated has been completed",
        ),
        NotificationType::TaskUpdated => (
            "Task updated",
            "A task you follow has new changes",
        ),
        NotificationType::Mention => (
            "You were mentioned",
            "Someone mentioned you in a comment",
        ),
        NotificationType::Reply => (
            "New reply",
            "Someone replied to your comment",
        ),
    }
}

/// Build a templated draft for `recipient_id`, tagged as simulated.
/// `sequence` keeps the synthesized resource ids distinct.
pub fn synthesize(
    notification_type: NotificationType,
    recipient_id: &str,
    sequence: u64,
) -> NotificationDraft {
    let (title, message) = template(notification_type);
    let resource_type = match notification_type {
        NotificationType::Mention | NotificationType::Reply => ResourceType::Comment,
        NotificationType::DelegationCreated | NotificationType::DelegationRevoked => {
            ResourceType::Delegation
        }
        NotificationType::TaskCompleted | NotificationType::TaskUpdated => ResourceType::Task,
    };

    NotificationDraft::new(
        notification_type,
        recipient_id,
        SIMULATED_SENDER_ID,
        title,
        message,
    )
    .with_resource(
        format!("sim-{}-{}", resource_type.as_str(), sequence),
        resource_type,
    )
    .with_metadata("simulated", true)
}
