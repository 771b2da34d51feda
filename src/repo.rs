//! Collaborator contracts the engine needs from persistence, plus an
//! in-memory implementation for simulations and tests.

use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::model::{
    CharacterId, Match, MatchEvent, MatchId, MatchStatus, OwnedCharacterId, PlayerId,
};

pub trait MatchRepo {
    fn get_match(&self, id: MatchId) -> Result<Option<Match>>;
    fn update_status(&mut self, id: MatchId, status: MatchStatus) -> Result<()>;
    fn set_started(&mut self, id: MatchId, at: DateTime<Utc>) -> Result<()>;
    fn set_ended(&mut self, id: MatchId, at: DateTime<Utc>) -> Result<()>;
    fn set_winner(&mut self, id: MatchId, character_id: CharacterId) -> Result<()>;
}

/// Append-only sink for event records. The engine is the only writer.
pub trait EventLog {
    fn append(&mut self, event: &MatchEvent) -> Result<()>;
}

pub trait PlayerStats {
    fn add_kill(&mut self, player_id: PlayerId) -> Result<()>;
    fn add_win(&mut self, player_id: PlayerId) -> Result<()>;
}

pub trait CharacterSync {
    fn set_alive(&mut self, character_id: CharacterId, is_alive: bool) -> Result<()>;
    /// Mirror final liveness onto the longer-lived entrant record.
    fn sync_owned(
        &mut self,
        owned_id: OwnedCharacterId,
        is_alive: bool,
        match_id: MatchId,
    ) -> Result<()>;
}

/// Everything a running match talks to.
pub trait MatchStore: MatchRepo + EventLog + PlayerStats + CharacterSync {}

impl<T: MatchRepo + EventLog + PlayerStats + CharacterSync> MatchStore for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayerTally {
    pub kills: u32,
    pub wins: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnedRecord {
    pub is_alive: bool,
    pub last_match_id: Option<MatchId>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryRepo {
    pub matches: HashMap<MatchId, Match>,
    pub events: Vec<MatchEvent>,
    pub players: BTreeMap<PlayerId, PlayerTally>,
    pub alive: HashMap<CharacterId, bool>,
    pub owned: HashMap<OwnedCharacterId, OwnedRecord>,
}

impl InMemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_match(m: Match) -> Self {
        let mut repo = Self::new();
        repo.matches.insert(m.id, m);
        repo
    }

    pub fn add_owned(&mut self, owned_id: OwnedCharacterId) {
        self.owned.insert(owned_id, OwnedRecord { is_alive: true, last_match_id: None });
    }

    pub fn tally(&self, player_id: PlayerId) -> PlayerTally {
        self.players.get(&player_id).copied().unwrap_or_default()
    }

    fn match_mut(&mut self, id: MatchId) -> Result<&mut Match> {
        self.matches.get_mut(&id).ok_or_else(|| anyhow!("match {} not found", id))
    }
}

impl MatchRepo for InMemoryRepo {
    fn get_match(&self, id: MatchId) -> Result<Option<Match>> {
        Ok(self.matches.get(&id).cloned())
    }

    fn update_status(&mut self, id: MatchId, status: MatchStatus) -> Result<()> {
        self.match_mut(id)?.status = status;
        Ok(())
    }

    fn set_started(&mut self, id: MatchId, at: DateTime<Utc>) -> Result<()> {
        self.match_mut(id)?.started_at = Some(at);
        Ok(())
    }

    fn set_ended(&mut self, id: MatchId, at: DateTime<Utc>) -> Result<()> {
        self.match_mut(id)?.ended_at = Some(at);
        Ok(())
    }

    fn set_winner(&mut self, id: MatchId, character_id: CharacterId) -> Result<()> {
        self.match_mut(id)?.winner_character_id = Some(character_id);
        Ok(())
    }
}

impl EventLog for InMemoryRepo {
    fn append(&mut self, event: &MatchEvent) -> Result<()> {
        self.events.push(event.clone());
        Ok(())
    }
}

impl PlayerStats for InMemoryRepo {
    fn add_kill(&mut self, player_id: PlayerId) -> Result<()> {
        self.players.entry(player_id).or_default().kills += 1;
        Ok(())
    }

    fn add_win(&mut self, player_id: PlayerId) -> Result<()> {
        self.players.entry(player_id).or_default().wins += 1;
        Ok(())
    }
}

impl CharacterSync for InMemoryRepo {
    fn set_alive(&mut self, character_id: CharacterId, is_alive: bool) -> Result<()> {
        self.alive.insert(character_id, is_alive);
        Ok(())
    }

    fn sync_owned(
        &mut self,
        owned_id: OwnedCharacterId,
        is_alive: bool,
        match_id: MatchId,
    ) -> Result<()> {
        // Unknown owned ids are left alone; the lobby owns their creation.
        if let Some(rec) = self.owned.get_mut(&owned_id) {
            rec.is_alive = is_alive;
            rec.last_match_id = Some(match_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_lifecycle_fields() {
        let mut repo = InMemoryRepo::with_match(Match::new(3, 1.0, 0.1));
        repo.update_status(3, MatchStatus::Active).unwrap();
        repo.set_winner(3, 11).unwrap();
        let m = repo.get_match(3).unwrap().unwrap();
        assert_eq!(m.status, MatchStatus::Active);
        assert_eq!(m.winner_character_id, Some(11));
        assert!(repo.get_match(4).unwrap().is_none());
        assert!(repo.update_status(4, MatchStatus::Failed).is_err());
    }

    #[test]
    fn test_player_tallies() {
        let mut repo = InMemoryRepo::new();
        repo.add_kill(1).unwrap();
        repo.add_kill(1).unwrap();
        repo.add_win(2).unwrap();
        assert_eq!(repo.tally(1), PlayerTally { kills: 2, wins: 0 });
        assert_eq!(repo.tally(2), PlayerTally { kills: 0, wins: 1 });
        assert_eq!(repo.tally(9), PlayerTally::default());
    }

    #[test]
    fn test_sync_owned_only_known() {
        let mut repo = InMemoryRepo::new();
        repo.add_owned(5);
        repo.sync_owned(5, false, 1).unwrap();
        repo.sync_owned(6, false, 1).unwrap();
        assert_eq!(repo.owned[&5], OwnedRecord { is_alive: false, last_match_id: Some(1) });
        assert!(!repo.owned.contains_key(&6));
    }
}
