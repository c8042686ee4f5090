use crate::models::{RoleBinding, RoleBindingTable, RoleId, RoleSignal, VerifiedIdentity};
use crate::services::error::ProxyError;

const SIGNAL_KINDS: u8 = 4;

/// Resolves a verified identity to the role its requests execute under.
///
/// Signal kinds are tried in precedence order (groups, attribute, client id,
/// scopes). Within a kind the matching binding with the lowest rank wins, and
/// table order breaks ties. Mapping is pure: no I/O and no interior state.
#[derive(Debug, Clone)]
pub struct RoleMapper {
    table: RoleBindingTable,
}

impl RoleMapper {
    pub fn new(table: RoleBindingTable) -> Self {
        Self { table }
    }

    pub fn map_to_role(&self, identity: &VerifiedIdentity) -> Result<RoleId, ProxyError> {
        if let Some(role) = &identity.bound_role {
            return Ok(role.clone());
        }

        for kind in 0..SIGNAL_KINDS {
            if let Some(binding) = self.best_match(kind, identity) {
                tracing::debug!(
                    principal = %identity.principal,
                    signal = ?binding.signal,
                    role = %binding.role,
                    "Role mapping rule matched"
                );
                return Ok(binding.role.clone());
            }
        }

        if identity.strategy.defaults_to_standard_role() {
            tracing::debug!(principal = %identity.principal, "No role rule matched; using standard role");
            return Ok(self.table.standard_role().clone());
        }

        let client = identity.session_hint().to_string();
        tracing::warn!(client_id = %client, "No role mapping for client");
        Err(ProxyError::ClientNotAuthorized(client))
    }

    fn best_match(&self, kind: u8, identity: &VerifiedIdentity) -> Option<&RoleBinding> {
        let mut best: Option<&RoleBinding> = None;
        for binding in self
            .table
            .bindings()
            .iter()
            .filter(|b| b.signal.precedence() == kind && matches(&b.signal, identity))
        {
            if best.map_or(true, |current| binding.rank < current.rank) {
                best = Some(binding);
            }
        }
        best
    }
}

fn matches(signal: &RoleSignal, identity: &VerifiedIdentity) -> bool {
    match signal {
        RoleSignal::Group(group) => identity.groups.iter().any(|g| g == group),
        RoleSignal::Attribute { name, value } => {
            identity.attributes.get(name).map(String::as_str) == Some(value.as_str())
        }
        RoleSignal::ClientIdContains(fragment) => identity
            .client_id
            .as_deref()
            .map(|id| id.to_lowercase().contains(fragment.as_str()))
            .unwrap_or(false),
        RoleSignal::Scope(scope) => identity.scopes.iter().any(|s| s == scope),
    }
}
