//! Users and the trusted auth context.
//!
//! One polymorphic entity carries all roles: a role tag plus a role-specific
//! payload, so call sites select on the variant instead of merging separate
//! per-role records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a user of any role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for UserId {
    fn from(uuid: Uuid) -> Self {
        UserId(uuid)
    }
}

impl std::ops::Deref for UserId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Marketplace role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Expert,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Expert => "expert",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "client" => Role::Client,
            "expert" => Role::Expert,
            "admin" => Role::Admin,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-specific profile data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientData {
    pub company_name: Option<String>,
    /// Tax registration number, where the client has one.
    pub vat_number: Option<String>,
}

/// Expert-specific profile data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertData {
    /// Only approved experts may see or accept pooled requests.
    pub approved: bool,
    pub specialties: Vec<String>,
}

/// Admin-specific profile data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminData {}

/// Role-specific payload, selected by the user's role tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum RoleProfile {
    Client(ClientData),
    Expert(ExpertData),
    Admin(AdminData),
}

impl RoleProfile {
    pub fn role(&self) -> Role {
        match self {
            RoleProfile::Client(_) => Role::Client,
            RoleProfile::Expert(_) => Role::Expert,
            RoleProfile::Admin(_) => Role::Admin,
        }
    }
}

/// A user of the marketplace, any role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub profile: RoleProfile,
}

impl User {
    pub fn role(&self) -> Role {
        self.profile.role()
    }

    /// Expert profile, if this user is an expert.
    pub fn as_expert(&self) -> Option<&ExpertData> {
        match &self.profile {
            RoleProfile::Expert(data) => Some(data),
            _ => None,
        }
    }
}

/// The authenticated caller, as supplied by the session provider.
///
/// The engine trusts this context as given; producing it (password checks,
/// session issuance) is outside the engine entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
