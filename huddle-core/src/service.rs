//! Activity queries and mutation handlers.
//!
//! Each handler is a straight sequence: authorize, run one store operation,
//! populate the result, then hand it to the fan-out engine. Fan-out is
//! spawned after the store confirms the write and never affects the result.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use huddle_types::{
    Activity, ActivityDetails, ActivityId, ActivityStats, DeletionAck, MutationKind,
    PopulatedActivity, UserId,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{ActivityError, Result};
use crate::fanout::Broadcaster;
use crate::store::{ActivityPatch, ActivityStore, ActivityUpdate, NewActivity, UpdateGuard, UserDirectory};
use crate::visibility::{Clock, FeedQuery, SystemClock, Visibility};

/// Keys a client may not set through the free-form part of a draft.
const RESERVED_KEYS: &[&str] = &["id", "_id", "creator", "members"];

/// The verified caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub admin: bool,
}

impl Actor {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            admin: false,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            admin: true,
        }
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.admin {
            Ok(())
        } else {
            Err(ActivityError::admin_only())
        }
    }
}

/// Client-supplied activity fields, used for both create and update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityDraft {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ActivityDraft {
    fn free_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        self.extra
            .iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Validate for creation. Any supplied member list is discarded.
    pub fn into_new(self, creator: UserId) -> Result<NewActivity> {
        let title = match self.title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => return Err(ActivityError::Validation("title is required".into())),
        };
        let datetime = self
            .datetime
            .ok_or_else(|| ActivityError::Validation("datetime is required".into()))?;
        let extra = self.free_fields();

        Ok(NewActivity {
            members: BTreeSet::from([creator.clone()]),
            creator,
            datetime,
            details: ActivityDetails {
                title,
                location: self.location,
                description: self.description,
                extra,
            },
        })
    }

    /// Validate for update. Only supplied fields change.
    pub fn into_patch(self) -> Result<ActivityPatch> {
        let extra = self.free_fields();
        let title = match self.title {
            Some(t) if t.trim().is_empty() => {
                return Err(ActivityError::Validation("title cannot be empty".into()))
            }
            Some(t) => Some(t.trim().to_string()),
            None => None,
        };
        Ok(ActivityPatch {
            datetime: self.datetime,
            title,
            location: self.location,
            description: self.description,
            extra,
        })
    }
}

pub struct ActivityService {
    store: Arc<dyn ActivityStore>,
    directory: Arc<dyn UserDirectory>,
    broadcaster: Broadcaster,
    visibility: Visibility,
    clock: Arc<dyn Clock>,
}

impl ActivityService {
    pub fn new(
        store: Arc<dyn ActivityStore>,
        directory: Arc<dyn UserDirectory>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            store,
            directory,
            broadcaster,
            visibility: Visibility::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    /// Run a feed query and return it populated.
    pub async fn feed(&self, actor: &Actor, query: FeedQuery) -> Result<Vec<PopulatedActivity>> {
        let activities = self.select(actor, &query).await?;
        self.populate(&activities).await
    }

    pub async fn list_all(&self, actor: &Actor) -> Result<Vec<PopulatedActivity>> {
        self.feed(actor, FeedQuery::All).await
    }

    pub async fn wall(&self, actor: &Actor) -> Result<Vec<PopulatedActivity>> {
        self.feed(actor, FeedQuery::Wall).await
    }

    pub async fn mine(&self, actor: &Actor) -> Result<Vec<PopulatedActivity>> {
        self.feed(actor, FeedQuery::Mine).await
    }

    pub async fn by_user(&self, actor: &Actor, friend: &UserId) -> Result<Vec<PopulatedActivity>> {
        self.feed(actor, FeedQuery::ByUser(friend.clone())).await
    }

    /// Total activity count and team count over the caller's activities.
    pub async fn stats(&self, actor: &Actor) -> Result<ActivityStats> {
        let activities = self.select(actor, &FeedQuery::Stats).await?;
        Ok(ActivityStats {
            activities: activities.len(),
            teams: activities.iter().filter(|a| a.is_team()).count(),
        })
    }

    /// Authorize `query` for `actor` and fetch the raw records.
    async fn select(&self, actor: &Actor, query: &FeedQuery) -> Result<Vec<Activity>> {
        let friends = match query {
            FeedQuery::All => {
                actor.require_admin()?;
                BTreeSet::new()
            }
            FeedQuery::Wall => self
                .directory
                .profile(&actor.id)
                .await?
                .ok_or_else(|| ActivityError::unknown_user(&actor.id))?
                .friends,
            FeedQuery::ByUser(other) => {
                if !self.directory.is_friend(&actor.id, other).await? {
                    return Err(ActivityError::not_friends(&actor.id, other));
                }
                BTreeSet::new()
            }
            FeedQuery::Mine | FeedQuery::Stats => BTreeSet::new(),
        };

        let plan = self
            .visibility
            .plan(query, &actor.id, &friends, self.clock.now());
        let found = self.store.find(&plan).await?;
        debug!(user = %actor.id, ?query, count = found.len(), "feed query");
        Ok(found)
    }

    /// Resolve creators and members to redacted summaries.
    pub async fn populate(&self, activities: &[Activity]) -> Result<Vec<PopulatedActivity>> {
        let mut ids = BTreeSet::new();
        for activity in activities {
            ids.insert(activity.creator.clone());
            ids.extend(activity.members.iter().cloned());
        }
        let summaries = self.directory.summaries(&ids).await?;

        Ok(activities
            .iter()
            .map(|activity| PopulatedActivity {
                id: activity.id,
                creator: summaries.get(&activity.creator).cloned(),
                datetime: activity.datetime,
                members: activity
                    .members
                    .iter()
                    .filter_map(|m| summaries.get(m).cloned())
                    .collect(),
                details: activity.details.clone(),
            })
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────

    pub async fn create(&self, actor: &Actor, draft: ActivityDraft) -> Result<PopulatedActivity> {
        self.create_as(actor.id.clone(), draft).await
    }

    /// Admin variant: create on behalf of `target`, who becomes creator and
    /// sole member.
    pub async fn create_for(
        &self,
        actor: &Actor,
        target: &UserId,
        draft: ActivityDraft,
    ) -> Result<PopulatedActivity> {
        actor.require_admin()?;
        self.create_as(target.clone(), draft).await
    }

    async fn create_as(&self, creator: UserId, draft: ActivityDraft) -> Result<PopulatedActivity> {
        let new = draft.into_new(creator.clone())?;
        let stored = self.store.insert(new).await?;
        info!(activity = %stored.id, %creator, "activity created");
        self.finish(MutationKind::Create, stored, creator).await
    }

    /// Add the caller to the members. Subscribing twice is a no-op.
    pub async fn subscribe(&self, actor: &Actor, id: &ActivityId) -> Result<PopulatedActivity> {
        let updated = self
            .guarded_update(id, UpdateGuard::Exists, ActivityUpdate::AddMember(actor.id.clone()))
            .await?;
        info!(activity = %id, user = %actor.id, "subscribed");
        self.finish(MutationKind::Update, updated, actor.id.clone()).await
    }

    /// Remove the caller from the members. Fails as not-found unless the
    /// caller is currently a member.
    pub async fn unsubscribe(&self, actor: &Actor, id: &ActivityId) -> Result<PopulatedActivity> {
        let updated = self
            .guarded_update(
                id,
                UpdateGuard::HasMember(actor.id.clone()),
                ActivityUpdate::RemoveMember(actor.id.clone()),
            )
            .await?;
        info!(activity = %id, user = %actor.id, remaining = updated.members.len(), "unsubscribed");
        self.finish(MutationKind::Update, updated, actor.id.clone()).await
    }

    /// Edit an activity. Only its creator may; anyone else sees not-found.
    pub async fn update(
        &self,
        actor: &Actor,
        id: &ActivityId,
        draft: ActivityDraft,
    ) -> Result<PopulatedActivity> {
        let patch = draft.into_patch()?;
        let updated = self
            .guarded_update(
                id,
                UpdateGuard::CreatedBy(actor.id.clone()),
                ActivityUpdate::Patch(patch),
            )
            .await?;
        info!(activity = %id, user = %actor.id, "activity updated");
        self.finish(MutationKind::Update, updated, actor.id.clone()).await
    }

    /// Remove an activity (admin only). Members of the removed record are
    /// still notified from its snapshot.
    pub async fn delete(&self, actor: &Actor, id: &ActivityId) -> Result<DeletionAck> {
        actor.require_admin()?;
        let snapshot = self
            .store
            .find_one_and_delete(id)
            .await?
            .ok_or_else(|| ActivityError::not_visible(id))?;
        info!(activity = %id, user = %actor.id, "activity deleted");
        // The record is gone; members still hear about it, populated or not.
        let payload = match self.populate(std::slice::from_ref(&snapshot)).await {
            Ok(mut populated) if !populated.is_empty() => populated.remove(0),
            Ok(_) => PopulatedActivity::unresolved(&snapshot),
            Err(err) => {
                warn!(activity = %id, ?err, "could not populate deleted activity, sending ids only");
                PopulatedActivity::unresolved(&snapshot)
            }
        };
        self.broadcaster
            .broadcast(MutationKind::Delete, snapshot, payload, actor.id.clone());
        Ok(DeletionAck {
            deleted: 1,
            id: *id,
        })
    }

    async fn guarded_update(
        &self,
        id: &ActivityId,
        guard: UpdateGuard,
        update: ActivityUpdate,
    ) -> Result<Activity> {
        self.store
            .find_one_and_update(id, &guard, &update)
            .await?
            .ok_or_else(|| ActivityError::not_visible(id))
    }

    /// Populate the persisted result and spawn its fan-out.
    ///
    /// Runs after the store write. If population fails the write stays
    /// applied, no event is sent, and the caller gets `Upstream`; a retry of
    /// subscribe or update converges, a retried create inserts a second
    /// activity.
    async fn finish(
        &self,
        kind: MutationKind,
        activity: Activity,
        actor: UserId,
    ) -> Result<PopulatedActivity> {
        let populated = self
            .populate(std::slice::from_ref(&activity))
            .await?
            .pop()
            .ok_or_else(|| ActivityError::not_visible(&activity.id))?;
        self.broadcaster
            .broadcast(kind, activity, populated.clone(), actor);
        Ok(populated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_requires_title_and_datetime() {
        let missing_title: ActivityDraft =
            serde_json::from_value(serde_json::json!({"datetime": "2026-10-20T10:00:00Z"})).unwrap();
        assert!(matches!(
            missing_title.into_new("u".into()),
            Err(ActivityError::Validation(_))
        ));

        let missing_time: ActivityDraft =
            serde_json::from_value(serde_json::json!({"title": "Hike"})).unwrap();
        assert!(matches!(
            missing_time.into_new("u".into()),
            Err(ActivityError::Validation(_))
        ));
    }

    #[test]
    fn draft_ignores_supplied_members_and_creator() {
        let draft: ActivityDraft = serde_json::from_value(serde_json::json!({
            "title": "Hike",
            "datetime": "2026-10-20T10:00:00Z",
            "members": ["mallory", "trent"],
            "creator": "mallory",
            "difficulty": "easy"
        }))
        .unwrap();

        let new = draft.into_new("u".into()).unwrap();
        assert_eq!(new.creator, UserId::from("u"));
        assert_eq!(new.members, BTreeSet::from([UserId::from("u")]));
        assert_eq!(new.details.extra.len(), 1);
        assert_eq!(new.details.extra["difficulty"], "easy");
    }

    #[test]
    fn patch_rejects_blank_title() {
        let draft = ActivityDraft {
            title: Some("   ".into()),
            ..ActivityDraft::default()
        };
        assert!(matches!(draft.into_patch(), Err(ActivityError::Validation(_))));
        assert_eq!(ActivityDraft::default().into_patch().unwrap(), ActivityPatch::default());
    }

    #[test]
    fn only_admins_pass_admin_check() {
        assert!(Actor::admin("root").require_admin().is_ok());
        assert!(matches!(
            Actor::user("u").require_admin(),
            Err(ActivityError::Forbidden(_))
        ));
    }
}
