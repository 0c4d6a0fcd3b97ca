// Infrastructure - persistence, caching, notification, and request middleware
pub mod store;                 // Unit-of-work traits and backend selection
pub mod sqlite_store;          // SQLite backend
pub mod postgres_store;        // PostgreSQL backend
pub mod memory_store;          // In-process backend
pub mod cache;                 // Target cache with pattern invalidation
pub mod notifier;              // Per-user real-time rooms
pub mod badges;                // Reputation badges
pub mod middleware;            // Voter identity and request ids

pub use store::{connect_store, VoteStore, VoteTransaction};
pub use sqlite_store::SqliteVoteStore;
pub use postgres_store::PostgresVoteStore;
pub use memory_store::MemoryVoteStore;
pub use cache::{CacheInvalidation, TargetCache};
pub use notifier::{RealtimeNotifier, RoomNotifier};
pub use badges::{BadgeEvaluator, ReputationBadgeEvaluator};
