//! Subscription requests and membership records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the subscriber asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Join the mailing list
    Join,

    /// Leave the mailing list
    Leave,
}

impl Intent {
    /// Whether a request with this intent is consistent with current membership
    ///
    /// Join is admissible only when no record exists, Leave only when one does.
    pub fn is_admissible(self, is_member: bool) -> bool {
        match self {
            Self::Join => !is_member,
            Self::Leave => is_member,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "join" => Some(Self::Join),
            "leave" => Some(Self::Leave),
            _ => None,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs of a new execution, immutable once the execution starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Opaque subscriber key (an email address in practice)
    pub identity: String,

    /// Join or leave
    pub intent: Intent,

    /// Base URL the confirmation link is built from
    pub callback_base: String,
}

impl SubscriptionRequest {
    pub fn new(identity: impl Into<String>, intent: Intent, callback_base: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            intent,
            callback_base: callback_base.into(),
        }
    }

    pub fn join(identity: impl Into<String>, callback_base: impl Into<String>) -> Self {
        Self::new(identity, Intent::Join, callback_base)
    }

    pub fn leave(identity: impl Into<String>, callback_base: impl Into<String>) -> Self {
        Self::new(identity, Intent::Leave, callback_base)
    }
}

/// Persisted membership. Existence of a record is the membership predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub identity: String,
    pub joined_at: DateTime<Utc>,
}

impl MembershipRecord {
    pub fn new(identity: impl Into<String>, joined_at: DateTime<Utc>) -> Self {
        Self {
            identity: identity.into(),
            joined_at,
        }
    }
}
