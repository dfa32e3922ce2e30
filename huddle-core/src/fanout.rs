//! Fan-out of activity mutations to live sessions.
//!
//! After a mutation is persisted the service hands the resulting activity to
//! [`Broadcaster::broadcast`], which computes the audience and pushes one
//! event per live session on a spawned task. Delivery is best-effort: gone or
//! lagging sessions are skipped and nothing is retried.

use std::collections::BTreeSet;
use std::sync::Arc;

use huddle_types::{Activity, MutationKind, PopulatedActivity, PushEvent, UserId};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::sessions::{PushOutcome, SessionDirectory};
use crate::store::UserDirectory;

/// Default cap on fan-outs running at the same time.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Users that must hear about a mutation.
///
/// `friends` is the actor's friend list and only matters for creates;
/// `members` is the resulting (or, for deletes, pre-deletion) member set.
pub fn audience_for(
    kind: MutationKind,
    members: &BTreeSet<UserId>,
    friends: &BTreeSet<UserId>,
    actor: &UserId,
) -> BTreeSet<UserId> {
    let mut audience = match kind {
        MutationKind::Create => friends.clone(),
        MutationKind::Update | MutationKind::Delete => members.clone(),
    };
    audience.insert(actor.clone());
    audience
}

/// Counters for one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub audience: BTreeSet<UserId>,
    pub delivered: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct Broadcaster {
    directory: Arc<dyn UserDirectory>,
    sessions: Arc<dyn SessionDirectory>,
    permits: Arc<Semaphore>,
}

impl Broadcaster {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        sessions: Arc<dyn SessionDirectory>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            directory,
            sessions,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Resolve the audience, reading the actor's friend list fresh for creates.
    pub async fn audience(
        &self,
        kind: MutationKind,
        activity: &Activity,
        actor: &UserId,
    ) -> Result<BTreeSet<UserId>, StoreError> {
        let friends = match kind {
            MutationKind::Create => self.directory.friends_of(actor).await?,
            MutationKind::Update | MutationKind::Delete => BTreeSet::new(),
        };
        Ok(audience_for(kind, &activity.members, &friends, actor))
    }

    /// Push `payload` to every live session of the audience and report what
    /// happened. Only a failed audience lookup is an error; a user whose
    /// sessions cannot be listed and per-session misses are counted as
    /// skipped.
    pub async fn deliver(
        &self,
        kind: MutationKind,
        activity: &Activity,
        payload: &PopulatedActivity,
        actor: &UserId,
    ) -> Result<DeliveryReport, StoreError> {
        let event = PushEvent::activity(kind, payload)?;
        let audience = self.audience(kind, activity, actor).await?;
        let mut report = DeliveryReport::default();

        for user in &audience {
            let sessions = match self.sessions.sessions_for(user).await {
                Ok(sessions) => sessions,
                Err(err) => {
                    warn!(%user, ?err, "session lookup failed, user skipped");
                    report.skipped += 1;
                    continue;
                }
            };
            for session in sessions {
                match self.sessions.push(session, &event).await {
                    Ok(PushOutcome::Delivered) => report.delivered += 1,
                    Ok(PushOutcome::Gone) => {
                        debug!(%session, %user, "session gone before push");
                        report.skipped += 1;
                    }
                    Ok(PushOutcome::Lagging) => {
                        warn!(%session, %user, event = kind.event().as_str(), "session lagging, event dropped");
                        report.skipped += 1;
                    }
                    Err(err) => {
                        warn!(%session, %user, ?err, "push failed");
                        report.skipped += 1;
                    }
                }
            }
        }

        report.audience = audience;
        Ok(report)
    }

    /// Fire-and-forget [`Broadcaster::deliver`]. Errors are logged, never
    /// returned to the request that triggered the mutation.
    pub fn broadcast(
        &self,
        kind: MutationKind,
        activity: Activity,
        payload: PopulatedActivity,
        actor: UserId,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let Ok(_permit) = this.permits.clone().acquire_owned().await else {
                return;
            };
            match this.deliver(kind, &activity, &payload, &actor).await {
                Ok(report) => debug!(
                    activity = %activity.id,
                    %kind,
                    audience = report.audience.len(),
                    delivered = report.delivered,
                    skipped = report.skipped,
                    "fan-out complete"
                ),
                Err(err) => warn!(activity = %activity.id, %kind, ?err, "fan-out failed"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionHub;
    use crate::store::MemoryUserDirectory;
    use async_trait::async_trait;
    use huddle_types::{ActivityDetails, ActivityId, EventKind, SessionId};

    fn ids(names: &[&str]) -> BTreeSet<UserId> {
        names.iter().map(|n| UserId::from(*n)).collect()
    }

    #[test]
    fn create_targets_friends_and_actor() {
        let audience = audience_for(
            MutationKind::Create,
            &ids(&["u"]),
            &ids(&["f1", "f2"]),
            &"u".into(),
        );
        assert_eq!(audience, ids(&["f1", "f2", "u"]));
    }

    #[test]
    fn update_targets_members_and_actor() {
        let audience = audience_for(
            MutationKind::Update,
            &ids(&["m1", "m2"]),
            &ids(&["f1"]),
            &"u".into(),
        );
        assert_eq!(audience, ids(&["m1", "m2", "u"]));
    }

    #[test]
    fn delete_targets_snapshot_members_and_actor() {
        let audience = audience_for(MutationKind::Delete, &ids(&["m1"]), &BTreeSet::new(), &"admin".into());
        assert_eq!(audience, ids(&["admin", "m1"]));
    }

    /// Session directory whose lookups fail for one user.
    struct FailingFor {
        user: UserId,
        hub: SessionHub,
    }

    #[async_trait]
    impl SessionDirectory for FailingFor {
        async fn sessions_for(&self, user: &UserId) -> Result<Vec<SessionId>, StoreError> {
            if *user == self.user {
                return Err(StoreError::Unavailable("session index offline".into()));
            }
            self.hub.sessions_for(user).await
        }

        async fn push(&self, session: SessionId, event: &PushEvent) -> Result<PushOutcome, StoreError> {
            self.hub.push(session, event).await
        }
    }

    #[tokio::test]
    async fn failed_session_lookup_skips_only_that_user() {
        let sessions = Arc::new(FailingFor {
            user: "a".into(),
            hub: SessionHub::default(),
        });
        let mut live = sessions.hub.connect("m".into());
        let broadcaster = Broadcaster::new(Arc::new(MemoryUserDirectory::new()), sessions.clone(), 1);

        let activity = Activity {
            id: ActivityId::random(),
            creator: "a".into(),
            datetime: chrono::Utc::now(),
            members: ids(&["a", "m"]),
            details: ActivityDetails::titled("Ride"),
        };
        let payload = PopulatedActivity {
            id: activity.id,
            creator: None,
            datetime: activity.datetime,
            members: Vec::new(),
            details: activity.details.clone(),
        };

        let report = broadcaster
            .deliver(MutationKind::Update, &activity, &payload, &"m".into())
            .await
            .unwrap();
        assert_eq!(report.audience, ids(&["a", "m"]));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);

        let event = live.events.try_recv().unwrap();
        assert_eq!(event.event, EventKind::ActivityUpdate);
    }
}
