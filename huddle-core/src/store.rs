//! # store
//!
//! Accessor contracts for the activity store and the user directory, plus the
//! in-memory backends used by the server and the tests.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use huddle_types::{Activity, ActivityDetails, ActivityId, UserId, UserProfile, UserSummary};
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::visibility::ActivityQuery;

/// A validated activity about to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub creator: UserId,
    pub datetime: DateTime<Utc>,
    pub members: BTreeSet<UserId>,
    pub details: ActivityDetails,
}

/// Match condition evaluated together with an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateGuard {
    /// The activity exists
    Exists,
    /// The activity exists and `user` is a member
    HasMember(UserId),
    /// The activity exists and was created by `user`
    CreatedBy(UserId),
}

impl UpdateGuard {
    pub fn admits(&self, activity: &Activity) -> bool {
        match self {
            UpdateGuard::Exists => true,
            UpdateGuard::HasMember(user) => activity.has_member(user),
            UpdateGuard::CreatedBy(user) => &activity.creator == user,
        }
    }
}

/// Replacement values for the mutable fields of an activity. `None` keeps the
/// stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityPatch {
    pub datetime: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ActivityPatch {
    pub fn apply(&self, activity: &mut Activity) {
        if let Some(datetime) = self.datetime {
            activity.datetime = datetime;
        }
        if let Some(ref title) = self.title {
            activity.details.title = title.clone();
        }
        if let Some(ref location) = self.location {
            activity.details.location = Some(location.clone());
        }
        if let Some(ref description) = self.description {
            activity.details.description = Some(description.clone());
        }
        for (key, value) in &self.extra {
            activity.details.extra.insert(key.clone(), value.clone());
        }
    }
}

/// The mutation half of an atomic find-and-update.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityUpdate {
    /// Set-union a member in
    AddMember(UserId),
    /// Pull a member out
    RemoveMember(UserId),
    /// Overwrite mutable fields
    Patch(ActivityPatch),
}

impl ActivityUpdate {
    pub fn apply(&self, activity: &mut Activity) {
        match self {
            ActivityUpdate::AddMember(user) => {
                activity.members.insert(user.clone());
            }
            ActivityUpdate::RemoveMember(user) => {
                activity.members.remove(user);
            }
            ActivityUpdate::Patch(patch) => patch.apply(activity),
        }
    }
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Every activity matching `query.filter`, ordered by `query.sort`.
    async fn find(&self, query: &ActivityQuery) -> Result<Vec<Activity>, StoreError>;

    /// Persist a new activity and return it with its assigned id.
    async fn insert(&self, activity: NewActivity) -> Result<Activity, StoreError>;

    /// Apply `update` to activity `id` if `guard` admits it, as one atomic
    /// operation. Returns the post-update record, or `None` if nothing matched.
    async fn find_one_and_update(
        &self,
        id: &ActivityId,
        guard: &UpdateGuard,
        update: &ActivityUpdate,
    ) -> Result<Option<Activity>, StoreError>;

    /// Remove activity `id`, returning the record as it was before removal.
    async fn find_one_and_delete(&self, id: &ActivityId) -> Result<Option<Activity>, StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn profile(&self, user: &UserId) -> Result<Option<UserProfile>, StoreError>;

    /// Friend list of `user`; empty when the user is unknown.
    async fn friends_of(&self, user: &UserId) -> Result<BTreeSet<UserId>, StoreError> {
        Ok(self
            .profile(user)
            .await?
            .map(|p| p.friends)
            .unwrap_or_default())
    }

    /// Whether `other` is in `user`'s friend list.
    async fn is_friend(&self, user: &UserId, other: &UserId) -> Result<bool, StoreError> {
        Ok(self
            .profile(user)
            .await?
            .is_some_and(|p| p.is_friend(other)))
    }

    /// Redacted summaries for the given ids. Unknown ids are absent from the map.
    async fn summaries(
        &self,
        users: &BTreeSet<UserId>,
    ) -> Result<HashMap<UserId, UserSummary>, StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory backends
// ─────────────────────────────────────────────────────────────────────────────

/// Activity store held in process memory.
///
/// Every guarded update runs under a single write lock, which gives the
/// per-document atomicity concurrent subscribes rely on.
#[derive(Default)]
pub struct MemoryActivityStore {
    activities: RwLock<HashMap<ActivityId, Activity>>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert records verbatim (used when seeding).
    pub fn load(&self, records: impl IntoIterator<Item = Activity>) {
        let mut guard = self.activities.write();
        for record in records {
            guard.insert(record.id, record);
        }
    }

    pub fn get(&self, id: &ActivityId) -> Option<Activity> {
        self.activities.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.activities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.read().is_empty()
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn find(&self, query: &ActivityQuery) -> Result<Vec<Activity>, StoreError> {
        let mut found: Vec<Activity> = self
            .activities
            .read()
            .values()
            .filter(|a| query.filter.matches(a))
            .cloned()
            .collect();
        found.sort_by(|a, b| query.sort.compare(a, b));
        Ok(found)
    }

    async fn insert(&self, activity: NewActivity) -> Result<Activity, StoreError> {
        let record = Activity {
            id: ActivityId::random(),
            creator: activity.creator,
            datetime: activity.datetime,
            members: activity.members,
            details: activity.details,
        };
        self.activities.write().insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_one_and_update(
        &self,
        id: &ActivityId,
        guard: &UpdateGuard,
        update: &ActivityUpdate,
    ) -> Result<Option<Activity>, StoreError> {
        let mut activities = self.activities.write();
        let Some(record) = activities.get_mut(id) else {
            return Ok(None);
        };
        if !guard.admits(record) {
            return Ok(None);
        }
        update.apply(record);
        Ok(Some(record.clone()))
    }

    async fn find_one_and_delete(&self, id: &ActivityId) -> Result<Option<Activity>, StoreError> {
        Ok(self.activities.write().remove(id))
    }
}

/// User directory held in process memory.
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<UserId, UserProfile>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, profile: UserProfile) {
        self.users.write().insert(profile.id.clone(), profile);
    }

    /// Make `a` and `b` follow each other. Both must already exist.
    pub fn befriend(&self, a: &UserId, b: &UserId) -> bool {
        let mut users = self.users.write();
        if !users.contains_key(a) || !users.contains_key(b) {
            return false;
        }
        if let Some(profile) = users.get_mut(a) {
            profile.friends.insert(b.clone());
        }
        if let Some(profile) = users.get_mut(b) {
            profile.friends.insert(a.clone());
        }
        true
    }

    pub fn remove(&self, user: &UserId) -> Option<UserProfile> {
        self.users.write().remove(user)
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn profile(&self, user: &UserId) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.users.read().get(user).cloned())
    }

    async fn summaries(
        &self,
        users: &BTreeSet<UserId>,
    ) -> Result<HashMap<UserId, UserSummary>, StoreError> {
        let guard = self.users.read();
        Ok(users
            .iter()
            .filter_map(|id| guard.get(id).map(|p| (id.clone(), p.summary())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visibility::Visibility;
    use chrono::TimeZone;

    fn new_activity(creator: &str) -> NewActivity {
        NewActivity {
            creator: creator.into(),
            datetime: Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap(),
            members: BTreeSet::from([UserId::from(creator)]),
            details: ActivityDetails::titled("swim"),
        }
    }

    #[tokio::test]
    async fn guarded_update_refuses_non_matching_guard() {
        let store = MemoryActivityStore::new();
        let stored = store.insert(new_activity("alice")).await.unwrap();

        let miss = store
            .find_one_and_update(
                &stored.id,
                &UpdateGuard::CreatedBy("bob".into()),
                &ActivityUpdate::AddMember("bob".into()),
            )
            .await
            .unwrap();
        assert!(miss.is_none());
        assert_eq!(store.get(&stored.id).unwrap().members.len(), 1);

        let hit = store
            .find_one_and_update(
                &stored.id,
                &UpdateGuard::Exists,
                &ActivityUpdate::AddMember("bob".into()),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.members.len(), 2);
    }

    #[tokio::test]
    async fn delete_returns_snapshot() {
        let store = MemoryActivityStore::new();
        let stored = store.insert(new_activity("alice")).await.unwrap();

        let snapshot = store.find_one_and_delete(&stored.id).await.unwrap();
        assert_eq!(snapshot, Some(stored.clone()));
        assert!(store.is_empty());
        assert!(store.find_one_and_delete(&stored.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_applies_filter() {
        let store = MemoryActivityStore::new();
        store.insert(new_activity("alice")).await.unwrap();
        store.insert(new_activity("bob")).await.unwrap();

        let vis = Visibility::default();
        let mine = store.find(&vis.member_of(&"alice".into())).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].creator, UserId::from("alice"));
        assert_eq!(store.find(&vis.all()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn directory_friendship_and_summaries() {
        let dir = MemoryUserDirectory::new();
        dir.upsert(UserProfile::new("alice", "Alice"));
        dir.upsert(UserProfile::new("bob", "Bob"));
        assert!(dir.befriend(&"alice".into(), &"bob".into()));
        assert!(!dir.befriend(&"alice".into(), &"ghost".into()));

        assert!(dir.is_friend(&"alice".into(), &"bob".into()).await.unwrap());
        assert!(!dir.is_friend(&"alice".into(), &"ghost".into()).await.unwrap());
        assert!(dir.friends_of(&"ghost".into()).await.unwrap().is_empty());

        let ids = BTreeSet::from([UserId::from("alice"), UserId::from("ghost")]);
        let summaries = dir.summaries(&ids).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[&UserId::from("alice")].name, "Alice");
    }
}
