//! Capability grants for executed code
//!
//! A [`PermissionSet`] is built once per request and never mutated. The
//! minimal grant is exactly what the invoker itself needs to locate and call
//! the entry point; everything else is an explicit, logged extra.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single grantable capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Resolve the origin of a loaded class
    InspectOrigin,
    /// Reflect over declared, including non-public, members
    AccessDeclaredMembers,
    /// Invoke members regardless of their visibility
    SuppressAccessChecks,
    /// Open files
    Filesystem,
    /// Open sockets
    Network,
    /// Exit the process, spawn or trace processes
    ProcessControl,
    /// Start additional threads
    SpawnThreads,
}

impl Capability {
    pub const MINIMAL: [Self; 3] = [
        Self::InspectOrigin,
        Self::AccessDeclaredMembers,
        Self::SuppressAccessChecks,
    ];

    pub const ALL: [Self; 7] = [
        Self::InspectOrigin,
        Self::AccessDeclaredMembers,
        Self::SuppressAccessChecks,
        Self::Filesystem,
        Self::Network,
        Self::ProcessControl,
        Self::SpawnThreads,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::InspectOrigin => "inspect-origin",
            Self::AccessDeclaredMembers => "access-declared-members",
            Self::SuppressAccessChecks => "suppress-access-checks",
            Self::Filesystem => "filesystem",
            Self::Network => "network",
            Self::ProcessControl => "process-control",
            Self::SpawnThreads => "spawn-threads",
        }
    }

    pub const fn is_minimal(self) -> bool {
        matches!(
            self,
            Self::InspectOrigin | Self::AccessDeclaredMembers | Self::SuppressAccessChecks
        )
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Capability {
    type Err = crate::SkiffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|cap| cap.name() == s)
            .ok_or_else(|| crate::SkiffError::Config(format!("unknown capability `{s}`")))
    }
}

/// Immutable set of granted capabilities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    granted: BTreeSet<Capability>,
}

impl PermissionSet {
    /// The minimal grant the invoker needs
    pub fn minimal() -> Self {
        Self {
            granted: Capability::MINIMAL.into_iter().collect(),
        }
    }

    /// No capabilities at all, even the invoker's
    pub const fn none() -> Self {
        Self {
            granted: BTreeSet::new(),
        }
    }

    /// Start from the minimal grant
    #[must_use]
    pub fn builder() -> PermissionSetBuilder {
        PermissionSetBuilder {
            granted: Self::minimal().granted,
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.granted.contains(&capability)
    }

    /// `Err` names the missing capability
    pub fn check(&self, capability: Capability) -> Result<(), Capability> {
        if self.has(capability) {
            Ok(())
        } else {
            Err(capability)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.granted.iter().copied()
    }

    /// Granted capabilities beyond the minimal grant
    pub fn extras(&self) -> impl Iterator<Item = Capability> + '_ {
        self.iter().filter(|cap| !cap.is_minimal())
    }
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self::minimal()
    }
}

/// Builder for [`PermissionSet`]
#[derive(Debug)]
pub struct PermissionSetBuilder {
    granted: BTreeSet<Capability>,
}

impl PermissionSetBuilder {
    /// Add a capability, extras beyond the minimal grant are logged
    #[must_use]
    pub fn grant(mut self, capability: Capability) -> Self {
        if !capability.is_minimal() {
            tracing::warn!(capability = %capability, "granting capability beyond the minimal set");
        }
        self.granted.insert(capability);
        self
    }

    /// Remove a capability, including one of the minimal grant
    #[must_use]
    pub fn revoke(mut self, capability: Capability) -> Self {
        self.granted.remove(&capability);
        self
    }

    #[must_use]
    pub fn build(self) -> PermissionSet {
        PermissionSet {
            granted: self.granted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn minimal_grant() {
        let perms = PermissionSet::minimal();
        for cap in Capability::MINIMAL {
            assert!(perms.has(cap));
        }
        assert!(!perms.has(Capability::Network));
        assert_eq!(perms.extras().count(), 0);
    }

    #[traced_test]
    #[test]
    fn extras_are_logged() {
        let perms = PermissionSet::builder()
            .grant(Capability::ProcessControl)
            .grant(Capability::InspectOrigin)
            .build();
        assert!(perms.has(Capability::ProcessControl));
        assert_eq!(perms.extras().collect::<Vec<_>>(), vec![Capability::ProcessControl]);
        assert!(logs_contain("granting capability beyond the minimal set"));
    }

    #[test]
    fn check_names_missing_capability() {
        let perms = PermissionSet::builder()
            .revoke(Capability::SuppressAccessChecks)
            .build();
        assert_eq!(perms.check(Capability::InspectOrigin), Ok(()));
        assert_eq!(
            perms.check(Capability::SuppressAccessChecks),
            Err(Capability::SuppressAccessChecks)
        );
    }

    #[test]
    fn parses_kebab_names() {
        assert_eq!("network".parse::<Capability>().unwrap(), Capability::Network);
        assert!("root".parse::<Capability>().is_err());
    }
}
