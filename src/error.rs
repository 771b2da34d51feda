//! Error types for the match core.
//!
//! Fatal conditions are `Error`s and propagate with `?`. Event skips are
//! not errors: a `SkipReason` abandons the current event and the round
//! carries on.

use thiserror::Error;

use crate::model::{CharacterId, MatchId};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("match {0} not found")]
    MatchNotFound(MatchId),
    #[error("match {0} needs at least one participant")]
    NoParticipants(MatchId),
    #[error("match {match_id}: character {character_id} entered more than once")]
    DuplicateParticipant { match_id: MatchId, character_id: CharacterId },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Why an event was abandoned. Logged, never surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("no scenarios for category {0}")]
    EmptyCategory(&'static str),
    #[error("not enough participants ({available}) for selection of {needed}")]
    InsufficientParticipants { needed: usize, available: usize },
    #[error("dead pool is empty")]
    EmptyDeadPool,
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a list of scenario objects")]
    NotAList,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("task with id {0} already scheduled")]
    DuplicateTask(String),
    #[error("no tokio runtime on this thread")]
    NoRuntime,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("primary event weights sum to {0}, expected 100")]
    WeightsNotHundred(u32),
    #[error("primary event weights are empty")]
    NoPrimaryEvents,
    #[error("{name} must be within [0, 1], got {value}")]
    ChanceOutOfRange { name: &'static str, value: f64 },
    #[error("{name}: min {min} exceeds max {max}")]
    InvertedBounds { name: &'static str, min: f64, max: f64 },
    #[error("{name} {value} outside [{min}, {max}]")]
    OutOfBounds { name: &'static str, value: f64, min: f64, max: f64 },
    #[error("protocol fee tier table is empty")]
    NoFeeTiers,
}
