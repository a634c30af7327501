//! Media cache coordination.
//!
//! [`MediaCache`] is the public surface of the pipeline. It keeps one entry
//! per video id holding the [`DeliveryPlan`](crate::DeliveryPlan) and the
//! state of each artifact kind:
//!
//! ```text
//! NotStarted ──claim──▶ InFlight ──ok──▶ Ready(reference)
//!      ▲                   │
//!      └────── Failed ◀────┘ error
//! ```
//!
//! For a given (video, kind) at most one production runs; every other
//! request subscribes to its events. Entries expire a fixed TTL after their
//! last access and are evicted oldest-first when the cache is full. Entries
//! with a running production are never evicted; their eviction happens when
//! the production settles.

mod builder;
mod config;
mod coordinator;
mod entry;
mod events;

pub use builder::MediaCacheBuilder;
pub use config::CacheConfig;
pub use coordinator::{Completion, Delivery, MediaCache};
pub use entry::{ArtifactState, MediaEntry, Readiness};
pub use events::ArtifactSubscription;
