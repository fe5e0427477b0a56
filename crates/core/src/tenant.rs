//! Tenant and repository enrollment records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix for canonical tenant ids derived from a code-host identity.
pub const TENANT_ID_PREFIX: &str = "codehost:";

/// Build the canonical tenant id for a code-host user.
pub fn tenant_id_for(codehost_user_id: &str) -> String {
    format!("{TENANT_ID_PREFIX}{codehost_user_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pro" => Self::Pro,
            "enterprise" => Self::Enterprise,
            _ => Self::Free,
        }
    }
}

/// A principal owning enrolled repositories and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Canonical form: `codehost:<external_user_id>`.
    pub id: String,
    pub codehost_user_id: String,
    pub login: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub tier: Tier,
    /// Per-tenant hourly AI-call quota, when it overrides the tier default.
    #[serde(default)]
    pub quota_override: Option<i64>,
}

/// Association between a tenant and a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoEnrollment {
    pub tenant_id: String,
    pub repo_full_name: String,
    pub enabled: bool,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}
