// Snippet Votes - vote ledger and reputation updater

// Core types and primitives
pub mod core;
pub mod models;

// Vote ledger and post-commit side effects
pub mod votes;

// Infrastructure - Database, caching, and request plumbing
pub mod infrastructure;

// HTTP surface and wiring
pub mod api;
pub mod app_state;
pub mod config;

// Common utilities
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
