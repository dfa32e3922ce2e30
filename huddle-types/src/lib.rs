//! Shared types for huddle
//!
//! This crate provides the records passed between the huddle crates:
//! identifiers, activities, user profiles and their redacted summaries, and
//! the events pushed to live sessions.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User identifier (the verified token subject)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        UserId(id.to_string())
    }
}

/// Activity identifier, assigned by the store at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(pub Uuid);

impl ActivityId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ActivityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(ActivityId)
    }
}

/// Live connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Users
// ============================================================================

/// Credentials linked from an external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAuth {
    pub provider: String,
    pub external_id: String,
    pub token: String,
}

/// A full user record as held by the profile subsystem.
///
/// Never leaves the system boundary; embed a [`UserSummary`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
    /// Users whose activities this user follows
    #[serde(default)]
    pub friends: BTreeSet<UserId>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub external_auth: Option<ExternalAuth>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            name: name.into(),
            picture: None,
            friends: BTreeSet::new(),
            email: None,
            external_auth: None,
        }
    }

    pub fn is_friend(&self, other: &UserId) -> bool {
        self.friends.contains(other)
    }

    /// The redacted view embedded in activities.
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            picture: self.picture.clone(),
        }
    }
}

/// Redacted user record: no friend list, no contact or credential fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

impl UserSummary {
    /// Stand-in for a user whose profile could not be read. The name is the id.
    pub fn unresolved(id: &UserId) -> Self {
        Self {
            id: id.clone(),
            name: id.to_string(),
            picture: None,
        }
    }
}

// ============================================================================
// Activities
// ============================================================================

/// Descriptive fields of an activity. Opaque to the visibility rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDetails {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Any further client-defined fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ActivityDetails {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            location: None,
            description: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// A stored activity with member references by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub creator: UserId,
    pub datetime: DateTime<Utc>,
    pub members: BTreeSet<UserId>,
    #[serde(flatten)]
    pub details: ActivityDetails,
}

impl Activity {
    pub fn has_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }

    /// An activity with more than one member counts as a team.
    pub fn is_team(&self) -> bool {
        self.members.len() > 1
    }
}

/// An activity with creator and members resolved to redacted summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulatedActivity {
    pub id: ActivityId,
    /// `None` when the creator's profile no longer exists
    pub creator: Option<UserSummary>,
    pub datetime: DateTime<Utc>,
    pub members: Vec<UserSummary>,
    #[serde(flatten)]
    pub details: ActivityDetails,
}

impl PopulatedActivity {
    /// Populate without a directory: every user reference becomes an
    /// [`UserSummary::unresolved`].
    pub fn unresolved(activity: &Activity) -> Self {
        Self {
            id: activity.id,
            creator: Some(UserSummary::unresolved(&activity.creator)),
            datetime: activity.datetime,
            members: activity.members.iter().map(UserSummary::unresolved).collect(),
            details: activity.details.clone(),
        }
    }
}

/// Per-user counters reported by the stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStats {
    pub activities: usize,
    pub teams: usize,
}

/// Acknowledgement returned after a deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionAck {
    pub deleted: u64,
    pub id: ActivityId,
}

// ============================================================================
// Push events
// ============================================================================

/// The mutation that triggered a fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    pub fn event(self) -> EventKind {
        match self {
            MutationKind::Create => EventKind::ActivityCreate,
            MutationKind::Update => EventKind::ActivityUpdate,
            MutationKind::Delete => EventKind::ActivityDelete,
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Create => f.write_str("create"),
            MutationKind::Update => f.write_str("update"),
            MutationKind::Delete => f.write_str("delete"),
        }
    }
}

/// Event names observed by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "activity:create")]
    ActivityCreate,
    #[serde(rename = "activity:update")]
    ActivityUpdate,
    #[serde(rename = "activity:delete")]
    ActivityDelete,
    #[serde(rename = "session:ready")]
    SessionReady,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ActivityCreate => "activity:create",
            EventKind::ActivityUpdate => "activity:update",
            EventKind::ActivityDelete => "activity:delete",
            EventKind::SessionReady => "session:ready",
        }
    }
}

/// Envelope pushed to a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub event: EventKind,
    pub data: serde_json::Value,
}

impl PushEvent {
    pub fn activity(kind: MutationKind, activity: &PopulatedActivity) -> serde_json::Result<Self> {
        Ok(Self {
            event: kind.event(),
            data: serde_json::to_value(activity)?,
        })
    }

    pub fn session_ready(session: SessionId) -> Self {
        Self {
            event: EventKind::SessionReady,
            data: serde_json::json!({ "session": session }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_drops_sensitive_fields() {
        let mut profile = UserProfile::new("alice", "Alice");
        profile.friends.insert(UserId::from("bob"));
        profile.email = Some("alice@example.org".into());
        profile.external_auth = Some(ExternalAuth {
            provider: "facebook".into(),
            external_id: "1234".into(),
            token: "secret".into(),
        });

        let json = serde_json::to_value(profile.summary()).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["id"], "alice");
        assert_eq!(obj["name"], "Alice");
    }

    #[test]
    fn activity_details_are_flattened() {
        let raw = serde_json::json!({
            "id": "6f1c1d52-0c5e-4f4e-9d51-2b0a8f6a4a10",
            "creator": "alice",
            "datetime": "2026-10-19T18:00:00Z",
            "members": ["alice"],
            "title": "Climbing",
            "sport": "bouldering"
        });
        let activity: Activity = serde_json::from_value(raw).unwrap();
        assert_eq!(activity.details.title, "Climbing");
        assert_eq!(activity.details.extra["sport"], "bouldering");
        assert!(!activity.is_team());
    }

    #[test]
    fn event_names_match_client_contract() {
        let names: Vec<_> = [MutationKind::Create, MutationKind::Update, MutationKind::Delete]
            .into_iter()
            .map(|k| serde_json::to_value(k.event()).unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["activity:create", "activity:update", "activity:delete"]
        );
        assert_eq!(EventKind::ActivityDelete.as_str(), "activity:delete");
    }
}
