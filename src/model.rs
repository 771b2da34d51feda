//! Plain data records shared by the engine, payout math and storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::events::EventType;

pub type MatchId = i64;
pub type PlayerId = i64;
pub type CharacterId = i64;
pub type OwnedCharacterId = i64;

/// A contest entrant for a single match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub player_id: PlayerId,
    pub name: String,
    pub is_alive: bool,
    /// Longer-lived entrant record this match character was created from.
    #[serde(default)]
    pub owned_character_id: Option<OwnedCharacterId>,
}

impl Character {
    pub fn new(id: CharacterId, player_id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            player_id,
            name: name.into(),
            is_alive: true,
            owned_character_id: None,
        }
    }

    pub fn with_owned(mut self, owned_id: OwnedCharacterId) -> Self {
        self.owned_character_id = Some(owned_id);
        self
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Active => "active",
            MatchStatus::Completed => "completed",
            MatchStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MatchStatus::Pending),
            "active" => Some(MatchStatus::Active),
            "completed" => Some(MatchStatus::Completed),
            "failed" => Some(MatchStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub entry_fee: f64,
    /// Fraction of the entry fee paid to a killer per kill, before capping.
    pub kill_award_rate: f64,
    pub status: MatchStatus,
    pub winner_character_id: Option<CharacterId>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Match {
    pub fn new(id: MatchId, entry_fee: f64, kill_award_rate: f64) -> Self {
        Self {
            id,
            entry_fee,
            kill_award_rate,
            status: MatchStatus::Pending,
            winner_character_id: None,
            started_at: None,
            ended_at: None,
        }
    }
}

/// Immutable record of one narrated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub match_id: MatchId,
    pub round: u32,
    pub event_type: EventType,
    pub scenario_source: String,
    pub text: String,
    /// For `direct_kill` the killer comes first, the victim second.
    pub affected_character_ids: Vec<CharacterId>,
}

impl MatchEvent {
    pub fn affected_ids_csv(&self) -> String {
        self.affected_character_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn parse_ids_csv(csv: &str) -> Vec<CharacterId> {
        csv.split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect()
    }

    /// Killer id for a `direct_kill` record.
    pub fn killer(&self) -> Option<CharacterId> {
        match self.event_type {
            EventType::DirectKill => self.affected_character_ids.first().copied(),
            _ => None,
        }
    }
}

const CHARACTER_NAMES: &[&str] = &[
    "Ace", "Bandit", "Calamity", "Deadeye", "Echo", "Flint", "Ghost", "Hazard",
    "Inferno", "Jinx", "Kestrel", "Lasso", "Maverick", "Nomad", "Outlaw", "Phantom",
    "Quicksilver", "Rattler", "Shadow", "Tumbleweed", "Umbra", "Viper", "Whisper", "Xylo",
    "Yonder", "Zephyr", "Anchor", "Blaze", "Coral", "Drift", "Eddy", "Fin", "Gale",
    "Harbor", "Isle", "Jetty", "Kelp", "Lagoon", "Marina", "Nautilus", "Oceanus",
    "Pearl", "Quay", "Reef", "Starfish", "Tide", "Undertow", "Voyager", "Wave",
    "Xebec", "Yardarm", "Zenith",
];

/// Cycling entrant name sequence, owned by whatever creates entrants.
#[derive(Debug, Clone, Default)]
pub struct NameSequence {
    next: usize,
}

impl NameSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a persisted position.
    pub fn starting_at(next: usize) -> Self {
        Self { next }
    }

    pub fn position(&self) -> usize {
        self.next
    }
}

impl Iterator for NameSequence {
    type Item = &'static str;

    fn next(&mut self) -> Option<Self::Item> {
        let name = CHARACTER_NAMES[self.next % CHARACTER_NAMES.len()];
        self.next += 1;
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_sequence_cycles() {
        let mut names = NameSequence::new();
        assert_eq!(names.next(), Some("Ace"));
        let rest: Vec<_> = names.by_ref().take(CHARACTER_NAMES.len() - 1).collect();
        assert_eq!(rest.last(), Some(&"Zenith"));
        assert_eq!(names.next(), Some("Ace"));
    }

    #[test]
    fn test_name_sequences_are_independent() {
        let mut a = NameSequence::new();
        let mut b = NameSequence::starting_at(2);
        assert_eq!(a.next(), Some("Ace"));
        assert_eq!(b.next(), Some("Calamity"));
        assert_eq!(a.position(), 1);
    }

    #[test]
    fn test_ids_csv() {
        let ev = MatchEvent {
            match_id: 1,
            round: 2,
            event_type: EventType::DirectKill,
            scenario_source: "direct_kill_000".into(),
            text: "x".into(),
            affected_character_ids: vec![4, 9],
        };
        assert_eq!(ev.affected_ids_csv(), "4,9");
        assert_eq!(ev.killer(), Some(4));
        assert_eq!(MatchEvent::parse_ids_csv(" 4, 9"), vec![4, 9]);
    }

    #[test]
    fn test_status_parse() {
        for s in [MatchStatus::Pending, MatchStatus::Active, MatchStatus::Completed, MatchStatus::Failed] {
            assert_eq!(MatchStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(MatchStatus::parse("filling"), None);
    }
}
