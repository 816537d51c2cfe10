//! Pool invites: targeted invitations of one expert to one request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::RequestId;
use super::user::UserId;

/// Status of a pool invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    /// Outstanding: the expert can see the request in their pool view.
    Invited,
    /// This expert won the assignment.
    Accepted,
    /// The expert explicitly passed on the request.
    Declined,
    /// Resolved without this expert: another expert accepted, the request
    /// left the pool, or the invite aged past the policy window.
    Expired,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Invited => "invited",
            InviteStatus::Accepted => "accepted",
            InviteStatus::Declined => "declined",
            InviteStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "invited" => InviteStatus::Invited,
            "accepted" => InviteStatus::Accepted,
            "declined" => InviteStatus::Declined,
            "expired" => InviteStatus::Expired,
            _ => return None,
        })
    }
}

impl std::fmt::Display for InviteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A weak relation between a request and one candidate expert.
///
/// At most one invite exists per (request, expert) pair. Once any invite for
/// a request is accepted, every sibling flips to `Expired` in the same atomic
/// unit that moves the request to `Matched` - two experts can never both hold
/// an accepted invite for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInvite {
    pub request_id: RequestId,
    pub expert_id: UserId,
    pub status: InviteStatus,
    pub created_at: DateTime<Utc>,
}

impl PoolInvite {
    /// Whether this invite still grants pool visibility at `now`, given the
    /// policy TTL. Expiry is enforced lazily at read time; no background
    /// timers run.
    pub fn is_live(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.status == InviteStatus::Invited && now - self.created_at < ttl
    }
}
