//! Visibility rules.
//!
//! Turns a feed request into the filter and ordering the activity store
//! evaluates. Everything here is pure; access checks that need the user
//! directory (admin role, friendship) live in [`crate::service`].

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use huddle_types::{Activity, UserId};

/// Half-width of the wall's relevance window, in days.
pub const DEFAULT_WALL_DAYS: u32 = 7;

/// The feeds a user can ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedQuery {
    /// Every activity (admin only)
    All,
    /// Activities of the requester and their friends around now
    Wall,
    /// Activities the requester is a member of
    Mine,
    /// Activities a friend is a member of
    ByUser(UserId),
    /// Counters over the requester's activities
    Stats,
}

/// Source of "now" for time-windowed feeds.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Symmetric window around now, inclusive at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallWindow {
    radius: TimeDelta,
}

impl WallWindow {
    pub fn days(days: u32) -> Self {
        Self {
            radius: TimeDelta::days(i64::from(days)),
        }
    }

    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - self.radius, now + self.radius)
    }
}

impl Default for WallWindow {
    fn default() -> Self {
        Self::days(DEFAULT_WALL_DAYS)
    }
}

/// Predicate over stored activities. Unset parts match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityFilter {
    /// Keep activities with at least one member in this set
    pub members_any: Option<BTreeSet<UserId>>,
    /// Keep activities whose datetime lies in `[from, to]`
    pub between: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl ActivityFilter {
    pub fn matches(&self, activity: &Activity) -> bool {
        if let Some(ref wanted) = self.members_any {
            if activity.members.is_disjoint(wanted) {
                return false;
            }
        }
        if let Some((from, to)) = self.between {
            if activity.datetime < from || activity.datetime > to {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Latest first; equal datetimes fall back to ascending id.
    #[default]
    DatetimeDesc,
}

impl SortOrder {
    pub fn compare(self, a: &Activity, b: &Activity) -> Ordering {
        match self {
            SortOrder::DatetimeDesc => b.datetime.cmp(&a.datetime).then_with(|| a.id.cmp(&b.id)),
        }
    }
}

/// What the store is asked to evaluate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityQuery {
    pub filter: ActivityFilter,
    pub sort: SortOrder,
}

/// Plans feed queries for a configured wall window.
#[derive(Debug, Clone, Copy, Default)]
pub struct Visibility {
    window: WallWindow,
}

impl Visibility {
    pub fn new(window: WallWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> WallWindow {
        self.window
    }

    pub fn all(&self) -> ActivityQuery {
        ActivityQuery::default()
    }

    pub fn wall(
        &self,
        requester: &UserId,
        friends: &BTreeSet<UserId>,
        now: DateTime<Utc>,
    ) -> ActivityQuery {
        let mut circle = friends.clone();
        circle.insert(requester.clone());
        ActivityQuery {
            filter: ActivityFilter {
                members_any: Some(circle),
                between: Some(self.window.bounds(now)),
            },
            sort: SortOrder::DatetimeDesc,
        }
    }

    pub fn member_of(&self, user: &UserId) -> ActivityQuery {
        ActivityQuery {
            filter: ActivityFilter {
                members_any: Some(BTreeSet::from([user.clone()])),
                between: None,
            },
            sort: SortOrder::DatetimeDesc,
        }
    }

    /// Plan any feed. `friends` is only consulted for [`FeedQuery::Wall`].
    pub fn plan(
        &self,
        query: &FeedQuery,
        requester: &UserId,
        friends: &BTreeSet<UserId>,
        now: DateTime<Utc>,
    ) -> ActivityQuery {
        match query {
            FeedQuery::All => self.all(),
            FeedQuery::Wall => self.wall(requester, friends, now),
            FeedQuery::Mine | FeedQuery::Stats => self.member_of(requester),
            FeedQuery::ByUser(id) => self.member_of(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use huddle_types::{ActivityDetails, ActivityId};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn activity(at: DateTime<Utc>, members: &[&str]) -> Activity {
        Activity {
            id: ActivityId::random(),
            creator: UserId::from(members.first().copied().unwrap_or("nobody")),
            datetime: at,
            members: members.iter().map(|m| UserId::from(*m)).collect(),
            details: ActivityDetails::titled("run"),
        }
    }

    #[test]
    fn wall_window_is_inclusive() {
        let vis = Visibility::default();
        let me = UserId::from("me");
        let query = vis.wall(&me, &BTreeSet::new(), now());
        let week = TimeDelta::days(7);
        let tick = TimeDelta::microseconds(1);

        assert!(query.filter.matches(&activity(now() - week, &["me"])));
        assert!(query.filter.matches(&activity(now() + week, &["me"])));
        assert!(!query.filter.matches(&activity(now() - week - tick, &["me"])));
        assert!(!query.filter.matches(&activity(now() + week + tick, &["me"])));
    }

    #[test]
    fn wall_covers_requester_and_friends_only() {
        let vis = Visibility::default();
        let me = UserId::from("me");
        let friends = BTreeSet::from([UserId::from("f1")]);
        let query = vis.wall(&me, &friends, now());

        assert!(query.filter.matches(&activity(now(), &["me"])));
        assert!(query.filter.matches(&activity(now(), &["stranger", "f1"])));
        assert!(!query.filter.matches(&activity(now(), &["stranger"])));
        assert!(!query.filter.matches(&activity(now(), &[])));
    }

    #[test]
    fn member_feeds_have_no_time_bound() {
        let vis = Visibility::default();
        let me = UserId::from("me");
        let old = activity(now() - TimeDelta::days(400), &["me"]);
        for query in [FeedQuery::Mine, FeedQuery::Stats] {
            assert!(vis.plan(&query, &me, &BTreeSet::new(), now()).filter.matches(&old));
        }
        let friend = vis.plan(&FeedQuery::ByUser("f1".into()), &me, &BTreeSet::new(), now());
        assert!(!friend.filter.matches(&old));
    }

    #[test]
    fn all_matches_everything() {
        let vis = Visibility::default();
        let query = vis.plan(&FeedQuery::All, &"me".into(), &BTreeSet::new(), now());
        assert!(query.filter.matches(&activity(now() - TimeDelta::days(9999), &[])));
    }

    #[test]
    fn sort_is_latest_first_then_id() {
        let mut a = activity(now(), &["me"]);
        let mut b = activity(now(), &["me"]);
        let c = activity(now() + TimeDelta::hours(1), &["me"]);
        if a.id > b.id {
            std::mem::swap(&mut a, &mut b);
        }
        let mut items = vec![b.clone(), a.clone(), c.clone()];
        items.sort_by(|x, y| SortOrder::DatetimeDesc.compare(x, y));
        let ids: Vec<_> = items.iter().map(|x| x.id).collect();
        assert_eq!(ids, vec![c.id, a.id, b.id]);
    }

    #[test]
    fn custom_window_width() {
        let vis = Visibility::new(WallWindow::days(1));
        let query = vis.wall(&"me".into(), &BTreeSet::new(), now());
        assert!(!query.filter.matches(&activity(now() + TimeDelta::days(2), &["me"])));
    }
}
