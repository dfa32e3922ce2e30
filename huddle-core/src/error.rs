use huddle_types::{ActivityId, UserId};
use thiserror::Error;

/// Failure reported by a storage or directory backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors surfaced by every activity query and mutation.
#[derive(Error, Debug)]
pub enum ActivityError {
    #[error("Invalid activity: {0}")]
    Validation(String),

    /// Either the record does not exist or the caller's ownership/membership
    /// filter excluded it. The two cases are deliberately indistinguishable.
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Upstream failure: {0}")]
    Upstream(#[from] StoreError),
}

impl ActivityError {
    /// The single error path for guarded lookups on an activity.
    pub fn not_visible(id: &ActivityId) -> Self {
        ActivityError::NotFound {
            what: format!("activity {id}"),
        }
    }

    pub fn unknown_user(id: &UserId) -> Self {
        ActivityError::NotFound {
            what: format!("user {id}"),
        }
    }

    pub fn not_friends(requester: &UserId, other: &UserId) -> Self {
        ActivityError::Forbidden(format!("{requester} is not a friend of {other}"))
    }

    pub fn admin_only() -> Self {
        ActivityError::Forbidden("admin role required".to_string())
    }

    /// Short machine-readable tag for wire envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            ActivityError::Validation(_) => "validation",
            ActivityError::NotFound { .. } => "not_found",
            ActivityError::Forbidden(_) => "forbidden",
            ActivityError::Upstream(_) => "upstream",
        }
    }
}

pub type Result<T> = std::result::Result<T, ActivityError>;
