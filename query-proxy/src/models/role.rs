use serde::{Deserialize, Serialize};
use std::fmt;

/// Authorization role identifier (an IAM role ARN).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(String);

impl RoleId {
    pub fn new(arn: impl Into<String>) -> Self {
        Self(arn.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleTier {
    Elevated,
    Standard,
}

impl std::str::FromStr for RoleTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "elevated" | "super" => Ok(RoleTier::Elevated),
            "standard" | "dev" => Ok(RoleTier::Standard),
            _ => Err(format!("Invalid role tier: {}", s)),
        }
    }
}

/// Identity signal a binding matches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleSignal {
    Group(String),
    Attribute { name: String, value: String },
    /// Lowercase fragment searched for in the lowercased client id.
    ClientIdContains(String),
    Scope(String),
}

impl RoleSignal {
    /// Position of this signal kind in the precedence order.
    pub fn precedence(&self) -> u8 {
        match self {
            RoleSignal::Group(_) => 0,
            RoleSignal::Attribute { .. } => 1,
            RoleSignal::ClientIdContains(_) => 2,
            RoleSignal::Scope(_) => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleBinding {
    pub signal: RoleSignal,
    pub role: RoleId,
    /// Lower rank wins among bindings of the same signal kind.
    pub rank: u32,
}

impl RoleBinding {
    pub fn new(signal: RoleSignal, role: RoleId, rank: u32) -> Self {
        Self { signal, role, rank }
    }
}

/// Immutable binding table loaded at startup.
#[derive(Debug, Clone)]
pub struct RoleBindingTable {
    bindings: Vec<RoleBinding>,
    standard_role: RoleId,
}

impl RoleBindingTable {
    pub fn new(bindings: Vec<RoleBinding>, standard_role: RoleId) -> Self {
        Self {
            bindings,
            standard_role,
        }
    }

    pub fn bindings(&self) -> &[RoleBinding] {
        &self.bindings
    }

    pub fn standard_role(&self) -> &RoleId {
        &self.standard_role
    }
}
