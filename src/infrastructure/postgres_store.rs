// PostgreSQL vote store - production backend
// Row-level locks (SELECT ... FOR UPDATE) serialize concurrent votes on one target

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::{Row, Transaction};
use std::time::Duration;
use tracing::info;

use crate::core::{TargetId, TargetKind, TargetRef, UserId, VoteDirection};
use crate::error::{AppError, AppResult};
use crate::infrastructure::store::{db_error, VoteStore, VoteTransaction};
use crate::models::{Badge, TargetCounters, UserProfile, VoteRecord};

const SCHEMA: [&str; 6] = [
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        username VARCHAR(255) NOT NULL UNIQUE,
        reputation BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS snippets (
        id BIGSERIAL PRIMARY KEY,
        author_id BIGINT NOT NULL REFERENCES users(id),
        title TEXT NOT NULL,
        upvotes BIGINT NOT NULL DEFAULT 0 CHECK (upvotes >= 0),
        downvotes BIGINT NOT NULL DEFAULT 0 CHECK (downvotes >= 0),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        id BIGSERIAL PRIMARY KEY,
        snippet_id BIGINT NOT NULL REFERENCES snippets(id) ON DELETE CASCADE,
        author_id BIGINT NOT NULL REFERENCES users(id),
        body TEXT NOT NULL,
        upvotes BIGINT NOT NULL DEFAULT 0 CHECK (upvotes >= 0),
        downvotes BIGINT NOT NULL DEFAULT 0 CHECK (downvotes >= 0),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS votes (
        target_kind VARCHAR(16) NOT NULL CHECK (target_kind IN ('snippet', 'comment')),
        target_id BIGINT NOT NULL,
        voter_id BIGINT NOT NULL REFERENCES users(id),
        direction VARCHAR(16) NOT NULL CHECK (direction IN ('upvote', 'downvote')),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (target_kind, target_id, voter_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_badges (
        user_id BIGINT NOT NULL REFERENCES users(id),
        badge VARCHAR(32) NOT NULL,
        awarded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (user_id, badge)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_votes_voter ON votes(voter_id)",
];

fn counters_from_row(target: TargetRef, row: &PgRow) -> AppResult<TargetCounters> {
    Ok(TargetCounters {
        target,
        author_id: UserId(row.try_get("author_id")?),
        upvotes: row.try_get("upvotes")?,
        downvotes: row.try_get("downvotes")?,
    })
}

fn user_from_row(row: &PgRow) -> AppResult<UserProfile> {
    Ok(UserProfile {
        id: UserId(row.try_get("id")?),
        username: row.try_get("username")?,
        reputation: row.try_get("reputation")?,
        created_at: row.try_get("created_at")?,
    })
}

/// PostgreSQL implementation of the vote store
pub struct PostgresVoteStore {
    pool: PgPool,
}

impl PostgresVoteStore {
    pub async fn connect(url: &str, max_connections: u32) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(8))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .test_before_acquire(true)
            .connect(url)
            .await
            .map_err(db_error("Failed to connect to PostgreSQL"))?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> AppResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_error("Failed to initialize PostgreSQL schema"))?;
        }
        info!("PostgreSQL vote store schema initialized");
        Ok(())
    }
}

pub struct PostgresVoteTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl VoteTransaction for PostgresVoteTransaction {
    async fn lock_target(&mut self, target: TargetRef) -> AppResult<Option<TargetCounters>> {
        let sql = format!(
            "SELECT author_id, upvotes, downvotes FROM {} WHERE id = $1 FOR UPDATE",
            target.kind.table()
        );
        let row = sqlx::query(&sql)
            .bind(target.id.value())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("Failed to lock target"))?;

        row.map(|row| counters_from_row(target, &row)).transpose()
    }

    async fn find_vote(
        &mut self,
        target: TargetRef,
        voter: UserId,
    ) -> AppResult<Option<VoteDirection>> {
        let direction: Option<String> = sqlx::query_scalar(
            "SELECT direction FROM votes WHERE target_kind = $1 AND target_id = $2 AND voter_id = $3",
        )
        .bind(target.kind.as_str())
        .bind(target.id.value())
        .bind(voter.value())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("Failed to read vote"))?;

        direction.map(|d| d.parse()).transpose()
    }

    async fn insert_vote(
        &mut self,
        target: TargetRef,
        voter: UserId,
        direction: VoteDirection,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO votes (target_kind, target_id, voter_id, direction, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(target.kind.as_str())
        .bind(target.id.value())
        .bind(voter.value())
        .bind(direction.as_str())
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("Failed to insert vote"))?;
        Ok(())
    }

    async fn update_vote(
        &mut self,
        target: TargetRef,
        voter: UserId,
        direction: VoteDirection,
    ) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE votes SET direction = $1 WHERE target_kind = $2 AND target_id = $3 AND voter_id = $4",
        )
        .bind(direction.as_str())
        .bind(target.kind.as_str())
        .bind(target.id.value())
        .bind(voter.value())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("Failed to update vote"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Vote by {} on {} not found",
                voter, target
            )));
        }
        Ok(())
    }

    async fn delete_vote(&mut self, target: TargetRef, voter: UserId) -> AppResult<()> {
        let result = sqlx::query(
            "DELETE FROM votes WHERE target_kind = $1 AND target_id = $2 AND voter_id = $3",
        )
        .bind(target.kind.as_str())
        .bind(target.id.value())
        .bind(voter.value())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("Failed to delete vote"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Vote by {} on {} not found",
                voter, target
            )));
        }
        Ok(())
    }

    async fn adjust_counters(
        &mut self,
        target: TargetRef,
        upvote_delta: i64,
        downvote_delta: i64,
    ) -> AppResult<TargetCounters> {
        let sql = format!(
            "UPDATE {} SET upvotes = upvotes + $1, downvotes = downvotes + $2 WHERE id = $3 RETURNING author_id, upvotes, downvotes",
            target.kind.table()
        );
        let row = sqlx::query(&sql)
            .bind(upvote_delta)
            .bind(downvote_delta)
            .bind(target.id.value())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("Failed to adjust counters"))?
            .ok_or_else(|| AppError::NotFound(format!("Target {} not found", target)))?;

        counters_from_row(target, &row)
    }

    async fn adjust_reputation(&mut self, user: UserId, delta: i64) -> AppResult<i64> {
        let reputation: Option<i64> = sqlx::query_scalar(
            "UPDATE users SET reputation = reputation + $1 WHERE id = $2 RETURNING reputation",
        )
        .bind(delta)
        .bind(user.value())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("Failed to adjust reputation"))?;

        reputation.ok_or_else(|| AppError::NotFound(format!("User {} not found", user)))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx
            .commit()
            .await
            .map_err(db_error("Failed to commit transaction"))
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(db_error("Failed to rollback transaction"))
    }
}

#[async_trait]
impl VoteStore for PostgresVoteStore {
    async fn begin(&self) -> AppResult<Box<dyn VoteTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;
        Ok(Box::new(PostgresVoteTransaction { tx }))
    }

    async fn find_vote(&self, target: TargetRef, voter: UserId) -> AppResult<Option<VoteRecord>> {
        let row = sqlx::query(
            "SELECT direction, created_at FROM votes WHERE target_kind = $1 AND target_id = $2 AND voter_id = $3",
        )
        .bind(target.kind.as_str())
        .bind(target.id.value())
        .bind(voter.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to read vote"))?;

        match row {
            Some(row) => {
                let direction: String = row.try_get("direction")?;
                Ok(Some(VoteRecord {
                    target,
                    voter,
                    direction: direction.parse()?,
                    created_at: row.try_get("created_at")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn get_target(&self, target: TargetRef) -> AppResult<Option<TargetCounters>> {
        let sql = format!(
            "SELECT author_id, upvotes, downvotes FROM {} WHERE id = $1",
            target.kind.table()
        );
        let row = sqlx::query(&sql)
            .bind(target.id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to get target"))?;

        row.map(|row| counters_from_row(target, &row)).transpose()
    }

    async fn top_targets(&self, kind: TargetKind, limit: u32) -> AppResult<Vec<TargetCounters>> {
        let sql = format!(
            "SELECT id, author_id, upvotes, downvotes FROM {} ORDER BY (upvotes - downvotes) DESC, id ASC LIMIT $1",
            kind.table()
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list targets"))?;

        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get("id")?;
                counters_from_row(TargetRef::new(kind, id), row)
            })
            .collect()
    }

    async fn count_votes(&self, target: TargetRef) -> AppResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM votes WHERE target_kind = $1 AND target_id = $2",
        )
        .bind(target.kind.as_str())
        .bind(target.id.value())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to count votes"))?;
        Ok(count as u64)
    }

    async fn create_user(&self, username: &str) -> AppResult<UserProfile> {
        let row = sqlx::query(
            "INSERT INTO users (username, reputation, created_at) VALUES ($1, 0, $2) RETURNING id, username, reputation, created_at",
        )
        .bind(username)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to create user"))?;

        user_from_row(&row)
    }

    async fn get_user(&self, user: UserId) -> AppResult<Option<UserProfile>> {
        let row = sqlx::query("SELECT id, username, reputation, created_at FROM users WHERE id = $1")
            .bind(user.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to get user"))?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn create_snippet(&self, author: UserId, title: &str) -> AppResult<TargetRef> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO snippets (author_id, title, created_at) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(author.value())
        .bind(title)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to create snippet"))?;

        Ok(TargetRef::snippet(id))
    }

    async fn create_comment(
        &self,
        author: UserId,
        snippet: TargetId,
        body: &str,
    ) -> AppResult<TargetRef> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO comments (snippet_id, author_id, body, created_at)
            SELECT $1, $2, $3, $4 WHERE EXISTS (SELECT 1 FROM snippets WHERE id = $1)
            RETURNING id
            "#,
        )
        .bind(snippet.value())
        .bind(author.value())
        .bind(body)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to create comment"))?;

        id.map(TargetRef::comment)
            .ok_or_else(|| AppError::NotFound(format!("Snippet {} not found", snippet)))
    }

    async fn award_badge(&self, user: UserId, badge: Badge) -> AppResult<bool> {
        let result = sqlx::query(
            "INSERT INTO user_badges (user_id, badge, awarded_at) VALUES ($1, $2, $3) ON CONFLICT (user_id, badge) DO NOTHING",
        )
        .bind(user.value())
        .bind(badge.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to award badge"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_badges(&self, user: UserId) -> AppResult<Vec<Badge>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT badge FROM user_badges WHERE user_id = $1")
                .bind(user.value())
                .fetch_all(&self.pool)
                .await
                .map_err(db_error("Failed to list badges"))?;

        let mut badges = names
            .iter()
            .map(|name| name.parse())
            .collect::<AppResult<Vec<Badge>>>()?;
        badges.sort();
        Ok(badges)
    }

    async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error("Database health check failed"))?;
        Ok(())
    }
}
