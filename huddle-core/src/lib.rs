//! # huddle-core
//!
//! Visibility and fan-out engine for shared activities.
//!
//! - [`visibility`] plans which activities a user may see
//! - [`service`] runs queries and the create/subscribe/unsubscribe/update/delete handlers
//! - [`fanout`] decides who hears about a mutation and pushes it to their sessions
//! - [`store`] and [`sessions`] define the accessor contracts, with in-memory backends
//!
//! ## Usage
//!
//! ```ignore
//! let users = Arc::new(MemoryUserDirectory::new());
//! let hub = Arc::new(SessionHub::default());
//! let broadcaster = Broadcaster::new(users.clone(), hub.clone(), DEFAULT_MAX_IN_FLIGHT);
//! let service = ActivityService::new(Arc::new(MemoryActivityStore::new()), users, broadcaster);
//!
//! let created = service.create(&Actor::user("alice"), draft).await?;
//! ```

pub mod error;
pub mod fanout;
pub mod service;
pub mod sessions;
pub mod store;
pub mod visibility;

pub use error::{ActivityError, Result, StoreError};
pub use fanout::{audience_for, Broadcaster, DeliveryReport, DEFAULT_MAX_IN_FLIGHT};
pub use service::{ActivityDraft, ActivityService, Actor};
pub use sessions::{PushOutcome, Session, SessionDirectory, SessionHub, DEFAULT_SESSION_BUFFER};
pub use store::{
    ActivityPatch, ActivityStore, ActivityUpdate, MemoryActivityStore, MemoryUserDirectory,
    NewActivity, UpdateGuard, UserDirectory,
};
pub use visibility::{
    ActivityFilter, ActivityQuery, Clock, FeedQuery, FixedClock, SortOrder, SystemClock,
    Visibility, WallWindow, DEFAULT_WALL_DAYS,
};
