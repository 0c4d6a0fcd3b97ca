// Vote ledger data model - vote records, target counters, users, badges

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::{TargetRef, UserId, VoteDirection};
use crate::error::AppError;

/// One voter's current stance on one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub target: TargetRef,
    pub voter: UserId,
    pub direction: VoteDirection,
    pub created_at: DateTime<Utc>,
}

/// Denormalized counters on a snippet or comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCounters {
    pub target: TargetRef,
    pub author_id: UserId,
    pub upvotes: i64,
    pub downvotes: i64,
}

impl TargetCounters {
    /// Net score, may be negative
    pub fn score(&self) -> i64 {
        self.upvotes - self.downvotes
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub reputation: i64,
    pub created_at: DateTime<Utc>,
}

/// What a vote operation did to the vote record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChange {
    Created,
    Switched,
    Removed,
    /// Removal requested with no active vote
    Unchanged,
}

/// Result of cast_vote / remove_vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOutcome {
    pub counters: TargetCounters,
    pub previous: Option<VoteDirection>,
    pub user_vote: Option<VoteDirection>,
    pub change: VoteChange,
    pub reputation_delta: i64,
    /// Author reputation after the change; None when nothing was written
    pub author_reputation: Option<i64>,
}

/// Reputation-based achievements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    Contributor,
    RisingStar,
    Trusted,
    Expert,
}

impl Badge {
    pub const ALL: [Badge; 4] = [
        Badge::Contributor,
        Badge::RisingStar,
        Badge::Trusted,
        Badge::Expert,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Badge::Contributor => "contributor",
            Badge::RisingStar => "rising_star",
            Badge::Trusted => "trusted",
            Badge::Expert => "expert",
        }
    }

    /// Minimum reputation to earn this badge
    pub fn threshold(self) -> i64 {
        match self {
            Badge::Contributor => 10,
            Badge::RisingStar => 100,
            Badge::Trusted => 500,
            Badge::Expert => 1000,
        }
    }

    pub fn earned_at(reputation: i64) -> impl Iterator<Item = Badge> {
        Badge::ALL
            .into_iter()
            .filter(move |badge| reputation >= badge.threshold())
    }
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Badge {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Badge::ALL
            .into_iter()
            .find(|badge| badge.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("Unknown badge: {}", s)))
    }
}

/// Real-time payload pushed to a user's room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: String,
    pub target: TargetRef,
    pub actor: UserId,
    pub direction: Option<VoteDirection>,
    pub score: i64,
    pub created_at: DateTime<Utc>,
}

// HTTP request/response types

#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    pub direction: VoteDirection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoteResponse {
    pub target: TargetRef,
    pub upvotes: i64,
    pub downvotes: i64,
    pub score: i64,
    pub user_vote: Option<VoteDirection>,
}

impl From<&VoteOutcome> for VoteResponse {
    fn from(outcome: &VoteOutcome) -> Self {
        Self {
            target: outcome.counters.target,
            upvotes: outcome.counters.upvotes,
            downvotes: outcome.counters.downvotes,
            score: outcome.counters.score(),
            user_vote: outcome.user_vote,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CurrentVoteResponse {
    pub target: TargetRef,
    pub user_vote: Option<VoteDirection>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReputationResponse {
    pub user_id: UserId,
    pub username: String,
    pub reputation: i64,
    pub badges: Vec<Badge>,
}
