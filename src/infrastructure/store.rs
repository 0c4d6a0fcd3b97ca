// Vote Store Interface - repository / unit-of-work seam for the vote ledger
// Backends: SQLite and PostgreSQL through sqlx, plus an in-memory store for tests

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::DatabaseConfig;
use crate::core::{TargetId, TargetKind, TargetRef, UserId, VoteDirection};
use crate::error::{AppError, AppResult};
use crate::infrastructure::memory_store::MemoryVoteStore;
use crate::infrastructure::postgres_store::PostgresVoteStore;
use crate::infrastructure::sqlite_store::SqliteVoteStore;
use crate::models::{Badge, TargetCounters, UserProfile, VoteRecord};

/// One open datastore transaction.
///
/// Dropping a transaction without calling `commit` discards every write made
/// through it.
#[async_trait]
pub trait VoteTransaction: Send {
    /// Lock the target row for the rest of the transaction and return its
    /// counters, or `None` if the target does not exist.
    async fn lock_target(&mut self, target: TargetRef) -> AppResult<Option<TargetCounters>>;

    async fn find_vote(
        &mut self,
        target: TargetRef,
        voter: UserId,
    ) -> AppResult<Option<VoteDirection>>;

    /// Fails with `AppError::Conflict` if the (target, voter) pair already has a vote
    async fn insert_vote(
        &mut self,
        target: TargetRef,
        voter: UserId,
        direction: VoteDirection,
    ) -> AppResult<()>;

    async fn update_vote(
        &mut self,
        target: TargetRef,
        voter: UserId,
        direction: VoteDirection,
    ) -> AppResult<()>;

    async fn delete_vote(&mut self, target: TargetRef, voter: UserId) -> AppResult<()>;

    /// Apply counter deltas atomically and return the new counters
    async fn adjust_counters(
        &mut self,
        target: TargetRef,
        upvote_delta: i64,
        downvote_delta: i64,
    ) -> AppResult<TargetCounters>;

    /// Apply a reputation delta and return the new reputation
    async fn adjust_reputation(&mut self, user: UserId, delta: i64) -> AppResult<i64>;

    async fn commit(self: Box<Self>) -> AppResult<()>;

    async fn rollback(self: Box<Self>) -> AppResult<()>;
}

/// Datastore operations used by the vote ledger and its listeners
#[async_trait]
pub trait VoteStore: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn VoteTransaction>>;

    async fn find_vote(&self, target: TargetRef, voter: UserId) -> AppResult<Option<VoteRecord>>;
    async fn get_target(&self, target: TargetRef) -> AppResult<Option<TargetCounters>>;
    async fn top_targets(&self, kind: TargetKind, limit: u32) -> AppResult<Vec<TargetCounters>>;
    async fn count_votes(&self, target: TargetRef) -> AppResult<u64>;

    async fn create_user(&self, username: &str) -> AppResult<UserProfile>;
    async fn get_user(&self, user: UserId) -> AppResult<Option<UserProfile>>;
    async fn create_snippet(&self, author: UserId, title: &str) -> AppResult<TargetRef>;
    async fn create_comment(
        &self,
        author: UserId,
        snippet: TargetId,
        body: &str,
    ) -> AppResult<TargetRef>;

    /// Returns true if the badge was newly awarded
    async fn award_badge(&self, user: UserId, badge: Badge) -> AppResult<bool>;
    async fn list_badges(&self, user: UserId) -> AppResult<Vec<Badge>>;

    async fn health_check(&self) -> AppResult<()>;
}

/// Map a sqlx error, prefixing server errors with what was being attempted
pub(crate) fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |err| match AppError::from(err) {
        AppError::DatabaseError(msg) => AppError::DatabaseError(format!("{}: {}", context, msg)),
        other => other,
    }
}

/// Select a backend from the database URL scheme
pub async fn connect_store(config: &DatabaseConfig) -> AppResult<Arc<dyn VoteStore>> {
    let url = config.url.as_str();
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = PostgresVoteStore::connect(url, config.max_connections).await?;
        store.initialize().await?;
        Ok(Arc::new(store))
    } else if url.starts_with("sqlite:") {
        let store = SqliteVoteStore::connect(url, config.max_connections).await?;
        store.initialize().await?;
        Ok(Arc::new(store))
    } else if url == "memory" || url.starts_with("memory:") {
        Ok(Arc::new(MemoryVoteStore::new()))
    } else {
        Err(AppError::ConfigurationError(format!(
            "Unsupported DATABASE_URL scheme: {}",
            url
        )))
    }
}
