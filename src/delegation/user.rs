//! Current-user resolution
//!
//! The presentation layer owns sessions; this crate only needs the acting user's id and
//! capabilities, resolved through [`UserDirectory`].

use serde::{Deserialize, Serialize};

use super::capability::{Capability, CapabilitySet};

/// Team role, used to pick default capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Manager,
    Viewer,
}

/// The user on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub display_name: String,
    pub capabilities: CapabilitySet,
}

impl CurrentUser {
    /// Create a user with the default capabilities of `role`
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        let capabilities = match role {
            Role::Member => Capability::default_member().into(),
            Role::Manager => Capability::default_manager().into(),
            Role::Viewer => Capability::default_viewer().into(),
        };
        Self {
            id: id.into(),
            display_name: display_name.into(),
            capabilities,
        }
    }

    /// Create with specific capabilities
    pub fn with_capabilities(
        id: impl Into<String>,
        display_name: impl Into<String>,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            capabilities,
        }
    }

    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.has(cap)
    }

    pub fn can_delegate(&self) -> bool {
        self.has_capability(Capability::Delegate)
    }

    pub fn can_comment(&self) -> bool {
        self.has_capability(Capability::Comment)
    }

    /// Team management rights allow revoking delegations made by others
    pub fn can_manage_team(&self) -> bool {
        self.has_capability(Capability::ManageTeam)
    }
}

/// Resolves the acting user
pub trait UserDirectory: Send + Sync {
    fn current_user(&self) -> CurrentUser;
}

/// A directory that always returns the same user
#[derive(Debug, Clone)]
pub struct StaticUser(pub CurrentUser);

impl UserDirectory for StaticUser {
    fn current_user(&self) -> CurrentUser {
        self.0.clone()
    }
}
