//! Data models for notifications

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::store::{Collection, Record};

/// Kind of collaboration event a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    DelegationCreated,
    DelegationRevoked,
    TaskCompleted,
    TaskUpdated,
    Mention,
    Reply,
}

impl NotificationType {
    pub const ALL: [NotificationType; 6] = [
        NotificationType::DelegationCreated,
        NotificationType::DelegationRevoked,
        NotificationType::TaskCompleted,
        NotificationType::TaskUpdated,
        NotificationType::Mention,
        NotificationType::Reply,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::DelegationCreated => "delegation_created",
            NotificationType::DelegationRevoked => "delegation_revoked",
            NotificationType::TaskCompleted => "task_completed",
            NotificationType::TaskUpdated => "task_updated",
            NotificationType::Mention => "mention",
            NotificationType::Reply => "reply",
        }
    }
}

impl std::str::FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delegation_created" => Ok(NotificationType::DelegationCreated),
            "delegation_revoked" => Ok(NotificationType::DelegationRevoked),
            "task_completed" => Ok(NotificationType::TaskCompleted),
            "task_updated" => Ok(NotificationType::TaskUpdated),
            "mention" => Ok(NotificationType::Mention),
            "reply" => Ok(NotificationType::Reply),
            _ => Err(format!("Invalid notification type: {}", s)),
        }
    }
}

/// What a notification's `resource_id` points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Task,
    Comment,
    Delegation,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Task => "task",
            ResourceType::Comment => "comment",
            ResourceType::Delegation => "delegation",
        }
    }
}

/// An addressed collaboration-event message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub recipient_id: String,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<ResourceType>,
    pub is_read: bool,
    /// Present exactly when `is_read` is true
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Notification {
    /// Materialize a draft as a fresh, unread notification
    pub fn new(draft: NotificationDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            notification_type: draft.notification_type,
            title: draft.title,
            message: draft.message,
            recipient_id: draft.recipient_id,
            sender_id: draft.sender_id,
            resource_id: draft.resource_id,
            resource_type: draft.resource_type,
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
            archived: false,
            metadata: draft.metadata,
        }
    }

    /// Mark as read; returns false if it already was
    pub fn mark_read(&mut self) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        self.read_at = Some(Utc::now());
        true
    }

    /// Mark as unread; returns false if it already was
    pub fn mark_unread(&mut self) -> bool {
        if !self.is_read {
            return false;
        }
        self.is_read = false;
        self.read_at = None;
        true
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.recipient_id == user_id
    }

    /// Whether the notification is older than `age`, measured from `now`
    pub fn is_older_than(&self, age: Duration, now: DateTime<Utc>) -> bool {
        self.created_at < now - age
    }
}

impl Record for Notification {
    const COLLECTION: Collection = Collection::Notifications;

    fn record_id(&self) -> Uuid {
        self.id
    }
}

/// Input for creating a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDraft {
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub recipient_id: String,
    pub sender_id: String,
    pub resource_id: Option<String>,
    pub resource_type: Option<ResourceType>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl NotificationDraft {
    pub fn new(
        notification_type: NotificationType,
        recipient_id: impl Into<String>,
        sender_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            notification_type,
            title: title.into(),
            message: message.into(),
            recipient_id: recipient_id.into(),
            sender_id: sender_id.into(),
            resource_id: None,
            resource_type: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Point the notification at a task, comment or delegation
    pub fn with_resource(mut self, resource_id: impl Into<String>, resource_type: ResourceType) -> Self {
        self.resource_id = Some(resource_id.into());
        self.resource_type = Some(resource_type);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Transport-level arrival event for a freshly synthesized notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationArrival {
    pub notification: Notification,
    pub timestamp: DateTime<Utc>,
}

/// Simulated live-update availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Connecting,
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        }
    }
}
