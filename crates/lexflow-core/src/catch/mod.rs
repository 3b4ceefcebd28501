//! Catch - decides whether a rule applies to a message

mod matcher;

pub use matcher::{CatchMatcher, ConditionKind, ConditionTrace, MatchTrace};
