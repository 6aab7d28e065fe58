//! Task delegation for collaborative task lists
//!
//! A delegation hands a task from a delegator to an assignee. Each task has at most one active
//! delegation; re-delegating supersedes (revokes) the current one. Every transition notifies
//! the affected participant through the notification service.

pub mod capability;
pub mod manager;
pub mod model;
pub mod user;

pub use capability::{Capability, CapabilitySet};
pub use manager::{DelegationError, DelegationEvent, DelegationManager};
pub use model::{Delegation, DelegationPriority, DelegationStatus, RevokeReason};
pub use user::{CurrentUser, Role, StaticUser, UserDirectory};
