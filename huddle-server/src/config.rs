use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use huddle_core::{MemoryActivityStore, MemoryUserDirectory, Visibility, WallWindow};
use huddle_types::{Activity, ActivityDetails, ActivityId, UserId, UserProfile};
use serde::Deserialize;
use thiserror::Error;

use crate::auth::AuthConfig;
use crate::cli::ServeArgs;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read seed file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration derived from CLI/env.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub seed: Option<PathBuf>,
    pub wall_window: WallWindow,
    pub fanout_concurrency: usize,
    pub session_buffer: usize,
    pub request_timeout: Duration,
    pub auth: AuthConfig,
}

impl ServerConfig {
    pub fn from_args(args: &ServeArgs) -> Result<Self, ConfigError> {
        let secret = args
            .jwt_secret
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::Invalid("a JWT secret is required (HUDDLE_JWT_SECRET)".into()))?;
        if args.fanout_concurrency == 0 {
            return Err(ConfigError::Invalid("fanout concurrency must be at least 1".into()));
        }
        if args.session_buffer == 0 {
            return Err(ConfigError::Invalid("session buffer must be at least 1".into()));
        }

        let seed = match args.seed {
            Some(ref path) if path.is_relative() => Some(std::env::current_dir()?.join(path)),
            ref other => other.clone(),
        };

        Ok(Self {
            listen_addr: args.listen_addr.clone(),
            seed,
            wall_window: WallWindow::days(args.wall_days),
            fanout_concurrency: args.fanout_concurrency,
            session_buffer: args.session_buffer,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            auth: AuthConfig {
                secret,
                expected_aud: args.auth_audience.clone(),
                leeway_secs: args.auth_leeway_secs,
            },
        })
    }

    pub fn visibility(&self) -> Visibility {
        Visibility::new(self.wall_window)
    }
}

/// Activity entry of a seed file. Missing ids are generated; missing members
/// default to the creator.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedActivity {
    #[serde(default)]
    pub id: Option<ActivityId>,
    pub creator: UserId,
    pub datetime: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub members: Option<BTreeSet<UserId>>,
    #[serde(flatten)]
    pub details: ActivityDetails,
}

/// Initial contents for the in-memory backends.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<UserProfile>,
    #[serde(default)]
    pub activities: Vec<SeedActivity>,
}

impl Seed {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let seed: Seed = serde_yaml::from_str(raw)?;
        seed.validate()?;
        Ok(seed)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let known: HashSet<&UserId> = self.users.iter().map(|u| &u.id).collect();
        if known.len() != self.users.len() {
            return Err(ConfigError::Invalid("duplicate user id in seed".into()));
        }
        for activity in &self.activities {
            if !known.contains(&activity.creator) {
                return Err(ConfigError::Invalid(format!(
                    "activity creator {} is not a seeded user",
                    activity.creator
                )));
            }
        }
        Ok(())
    }

    /// Load users and activities into the backends. Returns the number of
    /// activities loaded.
    pub fn apply(self, users: &MemoryUserDirectory, store: &MemoryActivityStore) -> usize {
        for profile in self.users {
            users.upsert(profile);
        }
        let activities: Vec<Activity> = self
            .activities
            .into_iter()
            .map(|seed| Activity {
                id: seed.id.unwrap_or_else(ActivityId::random),
                members: seed
                    .members
                    .unwrap_or_else(|| BTreeSet::from([seed.creator.clone()])),
                creator: seed.creator,
                datetime: seed.datetime,
                details: seed.details,
            })
            .collect();
        let count = activities.len();
        store.load(activities);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = r#"
users:
  - id: alice
    name: Alice
    friends: [bob]
    email: alice@example.org
  - id: bob
    name: Bob
activities:
  - creator: alice
    datetime: 2026-10-20T18:00:00Z
    title: Climbing
    location: Gym
  - creator: bob
    datetime: 2026-10-21T07:30:00Z
    title: Run
    members: [bob, alice]
    distance_km: 10
"#;

    #[test]
    fn seed_loads_users_and_activities() {
        let seed = Seed::from_yaml(SEED).unwrap();
        assert_eq!(seed.users.len(), 2);
        assert_eq!(seed.users[0].friends.len(), 1);

        let users = MemoryUserDirectory::new();
        let store = MemoryActivityStore::new();
        assert_eq!(seed.apply(&users, &store), 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn seed_defaults_members_to_creator() {
        let seed = Seed::from_yaml(SEED).unwrap();
        let first = &seed.activities[0];
        assert!(first.members.is_none());
        assert_eq!(seed.activities[1].details.extra["distance_km"], 10);
    }

    #[test]
    fn seed_rejects_unknown_creator() {
        let raw = r#"
users: []
activities:
  - creator: ghost
    datetime: 2026-10-20T18:00:00Z
    title: Haunting
"#;
        assert!(matches!(Seed::from_yaml(raw), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn seed_file_is_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.yml");
        std::fs::write(&path, SEED).unwrap();
        assert_eq!(Seed::from_file(&path).unwrap().activities.len(), 2);
        assert!(matches!(
            Seed::from_file(dir.path().join("missing.yml")),
            Err(ConfigError::ReadError(_))
        ));
    }
}
