//! SQLite-backed match store.
//!
//! Implements the engine's collaborator traits plus the read-back queries
//! settlement needs (participants, kill events, pending payouts).

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::engine::EventType;
use crate::model::{
    Character, CharacterId, Match, MatchEvent, MatchId, MatchStatus, OwnedCharacterId, PlayerId,
};
use crate::payout::{KillEvent, PayoutKind, PendingPayout};
use crate::repo::{CharacterSync, EventLog, MatchRepo, OwnedRecord, PlayerStats, PlayerTally};

pub struct SqliteStore {
    conn: Connection,
}

fn parse_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| Ok(DateTime::parse_from_rfc3339(&s)?.with_timezone(&Utc)))
        .transpose()
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS matches (
                id INTEGER PRIMARY KEY,
                entry_fee REAL NOT NULL,
                kill_award_rate REAL NOT NULL,
                status TEXT NOT NULL,
                winner_character_id INTEGER,
                started_at TEXT,
                ended_at TEXT
            );
            CREATE TABLE IF NOT EXISTS characters (
                id INTEGER PRIMARY KEY,
                match_id INTEGER NOT NULL,
                player_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                is_alive INTEGER NOT NULL,
                owned_character_id INTEGER
            );
            CREATE TABLE IF NOT EXISTS match_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                match_id INTEGER NOT NULL,
                round INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                scenario_source TEXT NOT NULL,
                text TEXT NOT NULL,
                affected_character_ids TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS players (
                id INTEGER PRIMARY KEY,
                kills INTEGER NOT NULL DEFAULT 0,
                wins INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS owned_characters (
                id INTEGER PRIMARY KEY,
                is_alive INTEGER NOT NULL,
                last_match_id INTEGER
            );
            CREATE TABLE IF NOT EXISTS pending_payouts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                match_id INTEGER NOT NULL,
                player_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                amount REAL NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn create_match(&mut self, m: &Match) -> Result<()> {
        self.conn.execute(
            "INSERT INTO matches (id, entry_fee, kill_award_rate, status) VALUES (?1, ?2, ?3, ?4)",
            params![m.id, m.entry_fee, m.kill_award_rate, m.status.as_str()],
        )?;
        Ok(())
    }

    pub fn add_participants(&mut self, match_id: MatchId, characters: &[Character]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for c in characters {
            tx.execute(
                "INSERT INTO characters (id, match_id, player_id, name, is_alive, owned_character_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![c.id, match_id, c.player_id, c.name, c.is_alive, c.owned_character_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn add_owned(&mut self, owned_id: OwnedCharacterId) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO owned_characters (id, is_alive) VALUES (?1, 1)",
            params![owned_id],
        )?;
        Ok(())
    }

    pub fn owned(&self, owned_id: OwnedCharacterId) -> Result<Option<OwnedRecord>> {
        let rec = self
            .conn
            .query_row(
                "SELECT is_alive, last_match_id FROM owned_characters WHERE id = ?1",
                params![owned_id],
                |row| Ok(OwnedRecord { is_alive: row.get(0)?, last_match_id: row.get(1)? }),
            )
            .optional()?;
        Ok(rec)
    }

    pub fn participants(&self, match_id: MatchId) -> Result<Vec<Character>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, player_id, name, is_alive, owned_character_id
             FROM characters WHERE match_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![match_id], |row| {
            Ok(Character {
                id: row.get(0)?,
                player_id: row.get(1)?,
                name: row.get(2)?,
                is_alive: row.get(3)?,
                owned_character_id: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Events in insertion order.
    pub fn events(&self, match_id: MatchId) -> Result<Vec<MatchEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT round, event_type, scenario_source, text, affected_character_ids
             FROM match_events WHERE match_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![match_id], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for r in rows {
            let (round, kind, scenario_source, text, ids) = r?;
            let event_type = EventType::parse(&kind)
                .ok_or_else(|| anyhow!("unknown event type '{}' in match {}", kind, match_id))?;
            out.push(MatchEvent {
                match_id,
                round,
                event_type,
                scenario_source,
                text,
                affected_character_ids: MatchEvent::parse_ids_csv(&ids),
            });
        }
        Ok(out)
    }

    pub fn kill_events(&self, match_id: MatchId) -> Result<Vec<KillEvent>> {
        Ok(self
            .events(match_id)?
            .iter()
            .filter_map(MatchEvent::killer)
            .map(|killer_character_id| KillEvent { killer_character_id })
            .collect())
    }

    pub fn record_payouts(&mut self, match_id: MatchId, items: &[PendingPayout]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for p in items {
            tx.execute(
                "INSERT INTO pending_payouts (match_id, player_id, kind, amount) VALUES (?1, ?2, ?3, ?4)",
                params![match_id, p.player_id, p.kind.as_str(), p.amount],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn pending_payouts(&self, match_id: MatchId) -> Result<Vec<PendingPayout>> {
        let mut stmt = self.conn.prepare(
            "SELECT player_id, kind, amount FROM pending_payouts WHERE match_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![match_id], |row| {
            Ok((row.get::<_, PlayerId>(0)?, row.get::<_, String>(1)?, row.get::<_, f64>(2)?))
        })?;
        let mut out = Vec::new();
        for r in rows {
            let (player_id, kind, amount) = r?;
            let kind = match kind.as_str() {
                "kill_award" => PayoutKind::KillAward,
                "winner" => PayoutKind::Winner,
                other => return Err(anyhow!("unknown payout kind '{}'", other)),
            };
            out.push(PendingPayout { player_id, kind, amount });
        }
        Ok(out)
    }

    pub fn player_tally(&self, player_id: PlayerId) -> Result<PlayerTally> {
        let tally = self
            .conn
            .query_row(
                "SELECT kills, wins FROM players WHERE id = ?1",
                params![player_id],
                |row| Ok(PlayerTally { kills: row.get(0)?, wins: row.get(1)? }),
            )
            .optional()?;
        Ok(tally.unwrap_or_default())
    }

    fn touch_match(&self, id: MatchId, sql: &str, value: &dyn rusqlite::ToSql) -> Result<()> {
        let n = self.conn.execute(sql, params![value, id])?;
        if n == 0 {
            return Err(anyhow!("match {} not found", id));
        }
        Ok(())
    }
}

impl MatchRepo for SqliteStore {
    fn get_match(&self, id: MatchId) -> Result<Option<Match>> {
        let row = self
            .conn
            .query_row(
                "SELECT entry_fee, kill_award_rate, status, winner_character_id, started_at, ended_at
                 FROM matches WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<CharacterId>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((entry_fee, kill_award_rate, status, winner, started, ended)) = row else {
            return Ok(None);
        };
        let status = MatchStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown match status '{}'", status))?;
        Ok(Some(Match {
            id,
            entry_fee,
            kill_award_rate,
            status,
            winner_character_id: winner,
            started_at: parse_ts(started)?,
            ended_at: parse_ts(ended)?,
        }))
    }

    fn update_status(&mut self, id: MatchId, status: MatchStatus) -> Result<()> {
        self.touch_match(id, "UPDATE matches SET status = ?1 WHERE id = ?2", &status.as_str())
    }

    fn set_started(&mut self, id: MatchId, at: DateTime<Utc>) -> Result<()> {
        self.touch_match(id, "UPDATE matches SET started_at = ?1 WHERE id = ?2", &at.to_rfc3339())
    }

    fn set_ended(&mut self, id: MatchId, at: DateTime<Utc>) -> Result<()> {
        self.touch_match(id, "UPDATE matches SET ended_at = ?1 WHERE id = ?2", &at.to_rfc3339())
    }

    fn set_winner(&mut self, id: MatchId, character_id: CharacterId) -> Result<()> {
        self.touch_match(
            id,
            "UPDATE matches SET winner_character_id = ?1 WHERE id = ?2",
            &character_id,
        )
    }
}

impl EventLog for SqliteStore {
    fn append(&mut self, event: &MatchEvent) -> Result<()> {
        self.conn.execute(
            "INSERT INTO match_events (match_id, round, event_type, scenario_source, text, affected_character_ids)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.match_id,
                event.round,
                event.event_type.as_str(),
                event.scenario_source,
                event.text,
                event.affected_ids_csv()
            ],
        )?;
        Ok(())
    }
}

impl PlayerStats for SqliteStore {
    fn add_kill(&mut self, player_id: PlayerId) -> Result<()> {
        self.conn.execute(
            "INSERT INTO players (id, kills, wins) VALUES (?1, 1, 0)
             ON CONFLICT(id) DO UPDATE SET kills = kills + 1",
            params![player_id],
        )?;
        Ok(())
    }

    fn add_win(&mut self, player_id: PlayerId) -> Result<()> {
        self.conn.execute(
            "INSERT INTO players (id, kills, wins) VALUES (?1, 0, 1)
             ON CONFLICT(id) DO UPDATE SET wins = wins + 1",
            params![player_id],
        )?;
        Ok(())
    }
}

impl CharacterSync for SqliteStore {
    fn set_alive(&mut self, character_id: CharacterId, is_alive: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE characters SET is_alive = ?1 WHERE id = ?2",
            params![is_alive, character_id],
        )?;
        Ok(())
    }

    fn sync_owned(
        &mut self,
        owned_id: OwnedCharacterId,
        is_alive: bool,
        match_id: MatchId,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE owned_characters SET is_alive = ?1, last_match_id = ?2 WHERE id = ?3",
            params![is_alive, match_id, owned_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        let mut s = SqliteStore::in_memory().unwrap();
        s.init().unwrap();
        s
    }

    #[test]
    fn test_match_round_trip() {
        let mut s = store();
        s.create_match(&Match::new(1, 2.5, 0.2)).unwrap();
        s.update_status(1, MatchStatus::Active).unwrap();
        let at = Utc::now();
        s.set_started(1, at).unwrap();
        s.set_winner(1, 7).unwrap();

        let m = s.get_match(1).unwrap().unwrap();
        assert_eq!(m.status, MatchStatus::Active);
        assert_eq!(m.entry_fee, 2.5);
        assert_eq!(m.winner_character_id, Some(7));
        assert_eq!(m.started_at.map(|t| t.timestamp()), Some(at.timestamp()));
        assert!(m.ended_at.is_none());

        assert!(s.get_match(2).unwrap().is_none());
        assert!(s.update_status(2, MatchStatus::Failed).is_err());
    }

    #[test]
    fn test_events_and_kills_read_back_in_order() {
        let mut s = store();
        s.create_match(&Match::new(1, 1.0, 0.1)).unwrap();
        let ev = |round, event_type, ids: Vec<i64>| MatchEvent {
            match_id: 1,
            round,
            event_type,
            scenario_source: "x_000".to_string(),
            text: "t".to_string(),
            affected_character_ids: ids,
        };
        s.append(&ev(1, EventType::DirectKill, vec![3, 4])).unwrap();
        s.append(&ev(1, EventType::Story, vec![3])).unwrap();
        s.append(&ev(2, EventType::DirectKill, vec![5, 3])).unwrap();

        let events = s.events(1).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].affected_character_ids, vec![5, 3]);
        let kills = s.kill_events(1).unwrap();
        assert_eq!(
            kills,
            vec![KillEvent { killer_character_id: 3 }, KillEvent { killer_character_id: 5 }]
        );
    }

    #[test]
    fn test_tallies_and_owned_sync() {
        let mut s = store();
        s.add_kill(1).unwrap();
        s.add_kill(1).unwrap();
        s.add_win(1).unwrap();
        assert_eq!(s.player_tally(1).unwrap(), PlayerTally { kills: 2, wins: 1 });
        assert_eq!(s.player_tally(2).unwrap(), PlayerTally::default());

        s.add_owned(10).unwrap();
        s.sync_owned(10, false, 4).unwrap();
        assert_eq!(
            s.owned(10).unwrap(),
            Some(OwnedRecord { is_alive: false, last_match_id: Some(4) })
        );
        assert_eq!(s.owned(11).unwrap(), None);
    }

    #[test]
    fn test_participants_and_payouts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coinclash.db");
        let mut s = SqliteStore::new(path.to_str().unwrap()).unwrap();
        s.init().unwrap();
        s.create_match(&Match::new(1, 1.0, 0.1)).unwrap();
        s.add_participants(
            1,
            &[Character::new(1, 1, "Ace"), Character::new(2, 2, "Echo").with_owned(20)],
        )
        .unwrap();
        s.set_alive(1, false).unwrap();

        let chars = s.participants(1).unwrap();
        assert_eq!(chars.len(), 2);
        assert!(!chars[0].is_alive);
        assert_eq!(chars[1].owned_character_id, Some(20));

        let items = vec![
            PendingPayout { player_id: 2, kind: PayoutKind::KillAward, amount: 0.1 },
            PendingPayout { player_id: 2, kind: PayoutKind::Winner, amount: 1.7 },
        ];
        s.record_payouts(1, &items).unwrap();
        assert_eq!(s.pending_payouts(1).unwrap(), items);
    }
}
