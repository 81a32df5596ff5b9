//! Tenant and scope identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant identifier for multi-tenant isolation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    /// Create a new tenant ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the tenant ID as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Scope a DR configuration applies to.
///
/// A tenant without its own configuration falls back to [`DrScope::System`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "tenant", rename_all = "snake_case")]
pub enum DrScope {
    System,
    Tenant(TenantId),
}

impl DrScope {
    /// Stable string key used for persistence and lease bookkeeping
    pub fn key(&self) -> String {
        match self {
            DrScope::System => "system".to_string(),
            DrScope::Tenant(id) => format!("tenant:{}", id.as_str()),
        }
    }

    pub fn tenant(&self) -> Option<&TenantId> {
        match self {
            DrScope::System => None,
            DrScope::Tenant(id) => Some(id),
        }
    }
}

impl fmt::Display for DrScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<TenantId> for DrScope {
    fn from(id: TenantId) -> Self {
        DrScope::Tenant(id)
    }
}
