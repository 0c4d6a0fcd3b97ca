// Strong Types - newtypes for the identifiers that flow through the vote ledger
// Keeps user ids, target ids, and target kinds from being mixed up at call sites

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Strongly-typed user ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl FromStr for UserId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(UserId)
            .map_err(|_| AppError::Validation(format!("Invalid user id: {}", s)))
    }
}

/// Strongly-typed snippet or comment ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub i64);

impl TargetId {
    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TargetId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// The two kinds of content that can be voted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Snippet,
    Comment,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Snippet => "snippet",
            TargetKind::Comment => "comment",
        }
    }

    /// Table holding the counters for this kind
    pub fn table(self) -> &'static str {
        match self {
            TargetKind::Snippet => "snippets",
            TargetKind::Comment => "comments",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "snippet" | "snippets" => Ok(TargetKind::Snippet),
            "comment" | "comments" => Ok(TargetKind::Comment),
            _ => Err(AppError::BadRequest(format!("Unknown target kind: {}", s))),
        }
    }
}

/// A votable entity: kind plus id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetRef {
    pub kind: TargetKind,
    pub id: TargetId,
}

impl TargetRef {
    pub fn new(kind: TargetKind, id: impl Into<TargetId>) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn snippet(id: i64) -> Self {
        Self::new(TargetKind::Snippet, id)
    }

    pub fn comment(id: i64) -> Self {
        Self::new(TargetKind::Comment, id)
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Upvote,
    Downvote,
}

impl VoteDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteDirection::Upvote => "upvote",
            VoteDirection::Downvote => "downvote",
        }
    }
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteDirection {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "upvote" | "up" => Ok(VoteDirection::Upvote),
            "downvote" | "down" => Ok(VoteDirection::Downvote),
            _ => Err(AppError::Validation(format!("Unknown vote direction: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_kind_parsing() {
        assert_eq!("snippet".parse::<TargetKind>().unwrap(), TargetKind::Snippet);
        assert_eq!("Comments".parse::<TargetKind>().unwrap(), TargetKind::Comment);
        assert!("post".parse::<TargetKind>().is_err());
    }

    #[test]
    fn test_direction_serde() {
        let json = serde_json::to_string(&VoteDirection::Downvote).unwrap();
        assert_eq!(json, "\"downvote\"");
        let parsed: VoteDirection = serde_json::from_str("\"upvote\"").unwrap();
        assert_eq!(parsed, VoteDirection::Upvote);
        assert_eq!("down".parse::<VoteDirection>().unwrap(), VoteDirection::Downvote);
    }

    #[test]
    fn test_target_ref_display() {
        assert_eq!(TargetRef::comment(42).to_string(), "comment:42");
        assert!(" 7 ".parse::<UserId>().is_ok());
        assert!("abc".parse::<UserId>().is_err());
    }
}
