//! Capability model for collaborators
//!
//! Defines the set of capabilities that can be granted to a user.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Capabilities that can be granted to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Can delegate tasks to other users
    Delegate,
    /// Can comment on tasks
    Comment,
    /// Can revoke or reassign any delegation in the team
    ManageTeam,
    /// Full administrative access (includes all other capabilities)
    Admin,
}

impl Capability {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Delegate => "delegate",
            Capability::Comment => "comment",
            Capability::ManageTeam => "manage_team",
            Capability::Admin => "admin",
        }
    }

    /// Default capabilities for a team member
    pub fn default_member() -> HashSet<Capability> {
        [Capability::Delegate, Capability::Comment].into_iter().collect()
    }

    /// Default capabilities for a team manager
    pub fn default_manager() -> HashSet<Capability> {
        [Capability::Delegate, Capability::Comment, Capability::ManageTeam]
            .into_iter()
            .collect()
    }

    /// Default capabilities for a read-only viewer
    pub fn default_viewer() -> HashSet<Capability> {
        HashSet::new()
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delegate" => Ok(Capability::Delegate),
            "comment" => Ok(Capability::Comment),
            "manage_team" => Ok(Capability::ManageTeam),
            "admin" => Ok(Capability::Admin),
            _ => Err(format!("Invalid capability: {}", s)),
        }
    }
}

/// A set of capabilities with helper methods
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    capabilities: HashSet<Capability>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if this set contains a capability (respects Admin override)
    pub fn has(&self, cap: Capability) -> bool {
        self.capabilities.contains(&Capability::Admin) || self.capabilities.contains(&cap)
    }

    pub fn add(&mut self, cap: Capability) {
        self.capabilities.insert(cap);
    }

    pub fn remove(&mut self, cap: Capability) {
        self.capabilities.remove(&cap);
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Capability> {
        self.capabilities.iter().copied().collect()
    }
}

impl From<HashSet<Capability>> for CapabilitySet {
    fn from(capabilities: HashSet<Capability>) -> Self {
        Self { capabilities }
    }
}

impl From<Vec<Capability>> for CapabilitySet {
    fn from(capabilities: Vec<Capability>) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_from_str() {
        for cap in [
            Capability::Delegate,
            Capability::Comment,
            Capability::ManageTeam,
            Capability::Admin,
        ] {
            assert_eq!(cap.as_str().parse::<Capability>().unwrap(), cap);
        }
        assert!("invalid".parse::<Capability>().is_err());
    }

    #[test]
    fn test_default_member_capabilities() {
        let caps = Capability::default_member();
        assert!(caps.contains(&Capability::Delegate));
        assert!(caps.contains(&Capability::Comment));
        assert!(!caps.contains(&Capability::ManageTeam));
        assert!(!caps.contains(&Capability::Admin));
    }

    #[test]
    fn test_default_manager_capabilities() {
        let caps = Capability::default_manager();
        assert!(caps.contains(&Capability::ManageTeam));
        assert!(!caps.contains(&Capability::Admin));
    }

    #[test]
    fn test_capability_set_admin_override() {
        let caps: CapabilitySet = vec![Capability::Admin].into();
        assert!(caps.has(Capability::Delegate));
        assert!(caps.has(Capability::Comment));
        assert!(caps.has(Capability::ManageTeam));
    }

    #[test]
    fn test_capability_set_basic_operations() {
        let mut caps = CapabilitySet::new();
        assert!(caps.is_empty());

        caps.add(Capability::Comment);
        assert!(caps.has(Capability::Comment));
        assert!(!caps.has(Capability::Delegate));
        assert_eq!(caps.to_vec(), vec![Capability::Comment]);

        caps.remove(Capability::Comment);
        assert!(!caps.has(Capability::Comment));
    }

    #[test]
    fn test_capability_serialization() {
        let json = serde_json::to_string(&Capability::ManageTeam).unwrap();
        assert_eq!(json, "\"manage_team\"");

        let deserialized: Capability = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, Capability::ManageTeam);
    }
}
