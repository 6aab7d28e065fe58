//! Task delegations
//!
//! A delegation hands a task from a delegator to an assignee. It starts `active` and ends either
//! `completed` or `revoked`; a task has at most one active delegation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{Collection, Record};

/// Status of a delegation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    /// The assignee currently owns the task
    Active,
    /// The assignee finished the task
    Completed,
    /// The delegation was withdrawn or superseded
    Revoked,
}

impl DelegationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelegationStatus::Active => "active",
            DelegationStatus::Completed => "completed",
            DelegationStatus::Revoked => "revoked",
        }
    }

    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DelegationStatus::Active)
    }
}

impl std::str::FromStr for DelegationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(DelegationStatus::Active),
            "completed" => Ok(DelegationStatus::Completed),
            "revoked" => Ok(DelegationStatus::Revoked),
            _ => Err(format!("Invalid delegation status: {}", s)),
        }
    }
}

/// Priority of a delegation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationPriority {
    #[default]
    Normal,
    Urgent,
}

impl DelegationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelegationPriority::Normal => "normal",
            DelegationPriority::Urgent => "urgent",
        }
    }
}

impl std::str::FromStr for DelegationPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(DelegationPriority::Normal),
            "urgent" => Ok(DelegationPriority::Urgent),
            _ => Err(format!("Invalid delegation priority: {}", s)),
        }
    }
}

/// Why a delegation was revoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokeReason {
    /// Explicitly revoked by the delegator or a team manager
    Revoked,
    /// Replaced by a newer delegation of the same task
    Superseded,
}

/// A task delegated from one user to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: Uuid,
    pub task_id: String,
    pub delegator_id: String,
    pub assignee_id: String,
    pub delegated_at: DateTime<Utc>,
    pub status: DelegationStatus,
    #[serde(default)]
    pub priority: DelegationPriority,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub revoked_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub revoke_reason: Option<RevokeReason>,
}

impl Delegation {
    /// Create a new active delegation
    pub fn new(
        task_id: impl Into<String>,
        delegator_id: impl Into<String>,
        assignee_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task_id.into(),
            delegator_id: delegator_id.into(),
            assignee_id: assignee_id.into(),
            delegated_at: Utc::now(),
            status: DelegationStatus::Active,
            priority: DelegationPriority::Normal,
            note: None,
            completed_at: None,
            revoked_at: None,
            revoked_by: None,
            revoke_reason: None,
        }
    }

    pub fn with_priority(mut self, priority: DelegationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == DelegationStatus::Active
    }

    /// Revoke an active delegation
    pub fn revoke(&mut self, actor_id: &str, reason: RevokeReason) -> Result<(), String> {
        if !self.is_active() {
            return Err(format!(
                "Cannot revoke delegation in {} state",
                self.status.as_str()
            ));
        }
        self.status = DelegationStatus::Revoked;
        self.revoked_at = Some(Utc::now());
        self.revoked_by = Some(actor_id.to_string());
        self.revoke_reason = Some(reason);
        Ok(())
    }

    /// Complete an active delegation
    pub fn complete(&mut self) -> Result<(), String> {
        if !self.is_active() {
            return Err(format!(
                "Cannot complete delegation in {} state",
                self.status.as_str()
            ));
        }
        self.status = DelegationStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

impl Record for Delegation {
    const COLLECTION: Collection = Collection::Delegations;

    fn record_id(&self) -> Uuid {
        self.id
    }
}
