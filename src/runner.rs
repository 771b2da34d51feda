//! Match lifecycle: run the engine, then settle.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use crate::config::GameConfig;
use crate::engine::{MatchEngine, MatchOutcome, Pacer};
use crate::error::EngineError;
use crate::logging::{log, log_payout, obj, v_str, Domain, Level};
use crate::model::{Character, CharacterId, MatchId, MatchStatus, NameSequence, PlayerId};
use crate::payout::{
    calculate_payouts, check_conservation, protocol_fee_for, CharacterInfo, KillEvent,
    PayoutResult, PendingPayout,
};
use crate::repo::{MatchRepo, MatchStore};
use crate::scenario::ScenarioCatalog;
use crate::storage::SqliteStore;

const CONSERVATION_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct MatchReport {
    pub outcome: MatchOutcome,
    pub payout: PayoutResult,
    pub pending: Vec<PendingPayout>,
}

#[derive(Clone)]
pub struct MatchRunner {
    config: Arc<GameConfig>,
    catalog: Arc<ScenarioCatalog>,
}

fn chars_per_player<'a>(players: impl IntoIterator<Item = &'a PlayerId>) -> BTreeMap<PlayerId, u32> {
    let mut counts = BTreeMap::new();
    for p in players {
        *counts.entry(*p).or_default() += 1;
    }
    counts
}

/// One player per entry of `distribution`, each owning that many
/// characters. Ids are sequential from 1; names come from a fresh
/// [`NameSequence`] prefixed with the owner.
pub fn build_roster(distribution: &[u32]) -> Vec<Character> {
    let mut names = NameSequence::new();
    let mut out = Vec::new();
    let mut next_id: CharacterId = 1;
    for (i, &count) in distribution.iter().enumerate() {
        let player_id = i as PlayerId + 1;
        for name in names.by_ref().take(count as usize) {
            out.push(Character::new(next_id, player_id, format!("P{}_{}", player_id, name)));
            next_id += 1;
        }
    }
    out
}

/// Settlement from plain ids: tiered protocol fee, then payouts.
pub fn settle(
    config: &GameConfig,
    characters: &[CharacterInfo],
    kill_events: &[KillEvent],
    entry_fee: f64,
    kill_award_rate: f64,
    winner_character_id: Option<CharacterId>,
) -> PayoutResult {
    let per_player = chars_per_player(characters.iter().map(|c| &c.player_id));
    let protocol_fee = protocol_fee_for(&per_player, entry_fee, &config.protocol_fee_tiers);
    calculate_payouts(
        characters,
        kill_events,
        entry_fee,
        kill_award_rate,
        protocol_fee,
        winner_character_id,
    )
}

impl MatchRunner {
    pub fn new(config: Arc<GameConfig>, catalog: Arc<ScenarioCatalog>) -> Self {
        Self { config, catalog }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn run_match<S: MatchStore>(
        &self,
        store: &mut S,
        match_id: MatchId,
        participants: &[Character],
        seed: Option<u64>,
    ) -> Result<MatchReport, EngineError> {
        self.run_with(store, match_id, participants, seed, None)
    }

    pub fn run_match_paced<S: MatchStore>(
        &self,
        store: &mut S,
        match_id: MatchId,
        participants: &[Character],
        seed: Option<u64>,
        pacer: impl Pacer + 'static,
    ) -> Result<MatchReport, EngineError> {
        self.run_with(store, match_id, participants, seed, Some(Box::new(pacer)))
    }

    fn run_with<S: MatchStore>(
        &self,
        store: &mut S,
        match_id: MatchId,
        participants: &[Character],
        seed: Option<u64>,
        pacer: Option<Box<dyn Pacer>>,
    ) -> Result<MatchReport, EngineError> {
        let m = store
            .get_match(match_id)?
            .ok_or(EngineError::MatchNotFound(match_id))?;

        let mut engine = MatchEngine::new(match_id, &self.config, &self.catalog, store, seed)?;
        if let Some(pacer) = pacer {
            engine = engine.with_pacer(pacer);
        }
        let outcome = engine.run(participants)?;

        let payout = settle(
            &self.config,
            &outcome.character_infos(),
            &outcome.kill_events(),
            m.entry_fee,
            m.kill_award_rate,
            outcome.winner.as_ref().map(|w| w.id),
        );
        if let Err(v) = check_conservation(&payout, CONSERVATION_TOLERANCE) {
            log(
                Level::Error,
                Domain::Audit,
                "payout_conservation_violated",
                obj(&[("match_id", json!(match_id)), ("error", v_str(&v.msg))]),
            );
        }
        log_payout(
            match_id,
            payout.total_pool,
            payout.protocol_fee,
            payout.total_kill_awards,
            payout.winner_payout,
        );
        let pending = payout.line_items();

        Ok(MatchReport { outcome, payout, pending })
    }

    /// Run the match only if it is still pending. `Ok(None)` when it has
    /// already been started or finished elsewhere.
    pub fn start_if_pending<S: MatchStore>(
        &self,
        store: &mut S,
        match_id: MatchId,
        participants: &[Character],
        seed: Option<u64>,
    ) -> Result<Option<MatchReport>, EngineError> {
        let m = store
            .get_match(match_id)?
            .ok_or(EngineError::MatchNotFound(match_id))?;
        if m.status != MatchStatus::Pending {
            log(
                Level::Warn,
                Domain::Match,
                "match_start_skipped_not_pending",
                obj(&[("match_id", json!(match_id)), ("status", v_str(m.status.as_str()))]),
            );
            return Ok(None);
        }
        self.run_match(store, match_id, participants, seed).map(Some)
    }
}

/// Recompute a finished match's settlement from what the store recorded.
pub fn resettle(
    store: &SqliteStore,
    config: &GameConfig,
    match_id: MatchId,
) -> anyhow::Result<PayoutResult> {
    let m = store
        .get_match(match_id)?
        .ok_or_else(|| anyhow::anyhow!("match {} not found", match_id))?;
    let characters: Vec<CharacterInfo> = store
        .participants(match_id)?
        .iter()
        .map(|c| CharacterInfo { character_id: c.id, player_id: c.player_id })
        .collect();
    let kills = store.kill_events(match_id)?;
    Ok(settle(
        config,
        &characters,
        &kills,
        m.entry_fee,
        m.kill_award_rate,
        m.winner_character_id,
    ))
}
