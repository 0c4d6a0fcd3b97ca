// Votes - ledger, vote.changed event, and its listeners

pub mod events;
pub mod ledger;
pub mod listeners;

pub use events::{VoteChanged, VoteEventBus, VoteListener};
pub use ledger::{Transition, VoteLedger, VotePolicy, DOWNVOTE_WEIGHT, UPVOTE_WEIGHT};
