//! Match round engine.
//!
//! ```text
//!   NotStarted ──run()──► Running(round N) ──alive == 1──► Ended(winner)
//!                              │
//!                              └──no survivor / config error──► Ended(none)
//! ```
//!
//! One engine drives one match, synchronously, round by round. All draws go
//! through a single `SeededRandom`, so a seed replays the same event
//! sequence and winner. Round pacing uses its own generator and never
//! touches the match stream.

pub mod events;
pub mod pools;

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::json;

use crate::config::GameConfig;
use crate::error::{EngineError, SkipReason};
use crate::logging::{self, log, log_event_record, log_skip, obj, v_num, v_str, Domain, Level};
use crate::model::{Character, CharacterId, MatchEvent, MatchId, MatchStatus};
use crate::payout::{CharacterInfo, KillEvent};
use crate::repo::MatchStore;
use crate::rng::SeededRandom;
use crate::scenario::{substitute, ScenarioCatalog};

pub use events::{Effect, EventType};
pub use pools::Pools;

/// Real-time delay between rounds. Presentation only.
pub trait Pacer {
    fn pause(&mut self, delay: Duration);
}

impl<P: Pacer + ?Sized> Pacer for Box<P> {
    fn pause(&mut self, delay: Duration) {
        (**self).pause(delay)
    }
}

pub struct ThreadSleep;

impl Pacer for ThreadSleep {
    fn pause(&mut self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Running { round: u32 },
    Ended { winner: Option<CharacterId> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundOutcome {
    Completed,
    /// Configuration left nothing to roll; the run loop must stop.
    Abandoned,
}

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub match_id: MatchId,
    pub seed: u64,
    pub winner: Option<Character>,
    pub rounds: u32,
    /// Human-readable narration.
    pub log: Vec<String>,
    pub events: Vec<MatchEvent>,
    /// Every participant with final liveness, ordered by id.
    pub final_characters: Vec<Character>,
    /// SHA-256 over the narration, for replay comparison.
    pub log_digest: String,
}

impl MatchOutcome {
    /// Killer ids of every `direct_kill`, in log order.
    pub fn kill_events(&self) -> Vec<KillEvent> {
        self.events
            .iter()
            .filter_map(MatchEvent::killer)
            .map(|killer_character_id| KillEvent { killer_character_id })
            .collect()
    }

    pub fn character_infos(&self) -> Vec<CharacterInfo> {
        self.final_characters
            .iter()
            .map(|c| CharacterInfo { character_id: c.id, player_id: c.player_id })
            .collect()
    }
}

pub struct MatchEngine<'a, S: MatchStore> {
    match_id: MatchId,
    entry_fee: f64,
    kill_award_rate: f64,
    config: &'a GameConfig,
    catalog: &'a ScenarioCatalog,
    store: &'a mut S,
    rng: SeededRandom,
    pacer: Box<dyn Pacer + 'a>,
    pools: Pools,
    roster_size: usize,
    round: u32,
    state: EngineState,
    log: Vec<String>,
    events: Vec<MatchEvent>,
}

impl<'a, S: MatchStore> MatchEngine<'a, S> {
    /// Fails if the match is unknown; no engine exists for a missing match.
    pub fn new(
        match_id: MatchId,
        config: &'a GameConfig,
        catalog: &'a ScenarioCatalog,
        store: &'a mut S,
        seed: Option<u64>,
    ) -> Result<Self, EngineError> {
        let m = store
            .get_match(match_id)?
            .ok_or(EngineError::MatchNotFound(match_id))?;
        let rng = SeededRandom::new(seed);

        log(
            Level::Info,
            Domain::Match,
            "engine_initialized",
            obj(&[("match_id", json!(match_id)), ("seed", json!(rng.seed()))]),
        );

        Ok(Self {
            match_id,
            entry_fee: m.entry_fee,
            kill_award_rate: m.kill_award_rate,
            config,
            catalog,
            store,
            rng,
            pacer: Box::new(ThreadSleep),
            pools: Pools::default(),
            roster_size: 0,
            round: 0,
            state: EngineState::NotStarted,
            log: Vec::new(),
            events: Vec::new(),
        })
    }

    pub fn with_pacer(mut self, pacer: impl Pacer + 'a) -> Self {
        self.pacer = Box::new(pacer);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn pools(&self) -> &Pools {
        &self.pools
    }

    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    /// Run the match to completion.
    pub fn run(&mut self, participants: &[Character]) -> Result<MatchOutcome, EngineError> {
        if participants.is_empty() {
            return Err(EngineError::NoParticipants(self.match_id));
        }
        let mut seen = BTreeSet::new();
        if let Some(dup) = participants.iter().find(|c| !seen.insert(c.id)) {
            return Err(EngineError::DuplicateParticipant {
                match_id: self.match_id,
                character_id: dup.id,
            });
        }
        log(
            Level::Info,
            Domain::Match,
            "match_started",
            obj(&[
                ("match_id", json!(self.match_id)),
                ("participants", json!(participants.len())),
            ]),
        );
        self.begin(participants)?;

        while self.pools.alive_count() > 1 {
            if self.run_round()? == RoundOutcome::Abandoned {
                break;
            }
            debug_assert_eq!(self.pools.total(), self.roster_size);
            self.pace();
        }

        self.finish()
    }

    fn begin(&mut self, participants: &[Character]) -> Result<(), EngineError> {
        self.log.push(format!(
            "Match {} Started with {} participants.",
            self.match_id,
            participants.len()
        ));
        self.pools = Pools::new(participants);
        self.roster_size = participants.len();
        self.round = 0;
        self.state = EngineState::Running { round: 0 };

        self.store.update_status(self.match_id, MatchStatus::Active)?;
        self.store.set_started(self.match_id, Utc::now())?;
        Ok(())
    }

    fn finish(&mut self) -> Result<MatchOutcome, EngineError> {
        let winner = self.pools.last_standing().cloned();

        match &winner {
            Some(w) => {
                log(
                    Level::Info,
                    Domain::Match,
                    "match_ended",
                    obj(&[
                        ("match_id", json!(self.match_id)),
                        ("winner_id", json!(w.id)),
                        ("winner_name", v_str(w.display_name())),
                        ("rounds", json!(self.round)),
                    ]),
                );
                self.log
                    .push(format!("--- Match Over --- Winner: {} ---", w.display_name()));
                self.store.add_win(w.player_id)?;
                self.store.set_winner(self.match_id, w.id)?;

                for c in self.pools.characters() {
                    if let Some(owned_id) = c.owned_character_id {
                        self.store.sync_owned(owned_id, c.is_alive, self.match_id)?;
                    }
                }
                self.store.update_status(self.match_id, MatchStatus::Completed)?;
            }
            None => {
                log(
                    Level::Error,
                    Domain::Match,
                    "match_ended_without_winner",
                    obj(&[
                        ("match_id", json!(self.match_id)),
                        ("alive_count", json!(self.pools.alive_count())),
                        ("rounds", json!(self.round)),
                    ]),
                );
                self.log.push("--- Match Over --- Error: No single winner! ---".to_string());
                self.store.update_status(self.match_id, MatchStatus::Failed)?;
            }
        }
        self.store.set_ended(self.match_id, Utc::now())?;
        self.state = EngineState::Ended { winner: winner.as_ref().map(|w| w.id) };

        let log_digest = logging::digest_lines(self.log.iter().map(String::as_str));
        logging::log_audit(self.match_id, Some(self.rng.seed()), self.events.len(), &log_digest);

        let mut final_characters: Vec<Character> = self.pools.characters().cloned().collect();
        final_characters.sort_by_key(|c| c.id);

        Ok(MatchOutcome {
            match_id: self.match_id,
            seed: self.rng.seed(),
            winner,
            rounds: self.round,
            log: std::mem::take(&mut self.log),
            events: std::mem::take(&mut self.events),
            final_characters,
            log_digest,
        })
    }

    fn pace(&mut self) {
        if !self.config.round_delay_enabled {
            return;
        }
        let (lo, hi) = (self.config.round_delay_min, self.config.round_delay_max);
        let secs = if hi > lo { rand::thread_rng().gen_range(lo..=hi) } else { lo };
        self.pacer.pause(Duration::from_secs_f64(secs.max(0.0)));
    }

    fn is_over(&self) -> bool {
        self.pools.alive_count() <= 1
    }

    // =========================================================================
    // Rounds
    // =========================================================================

    fn run_round(&mut self) -> Result<RoundOutcome, EngineError> {
        self.round += 1;
        self.state = EngineState::Running { round: self.round };
        let alive = self.pools.alive_count();
        log(
            Level::Info,
            Domain::Round,
            "round_started",
            obj(&[
                ("match_id", json!(self.match_id)),
                ("round", json!(self.round)),
                ("alive", json!(alive)),
            ]),
        );
        self.log.push(format!("--- Round {} ({} alive) ---", self.round, alive));

        if alive <= 1 {
            log(
                Level::Warn,
                Domain::Round,
                "round_too_few_alive_at_start",
                obj(&[("match_id", json!(self.match_id)), ("round", json!(self.round))]),
            );
            return Ok(RoundOutcome::Completed);
        }

        // decided once per round, before any event changes the pools
        let two_remain = alive == 2;
        let Some(primary) = self.pick_primary(two_remain) else {
            log(
                Level::Error,
                Domain::Config,
                "no_primary_events_available",
                obj(&[
                    ("match_id", json!(self.match_id)),
                    ("round", json!(self.round)),
                    ("alive", json!(alive)),
                ]),
            );
            return Ok(RoundOutcome::Abandoned);
        };
        log(
            Level::Debug,
            Domain::Round,
            "primary_event_chosen",
            obj(&[
                ("match_id", json!(self.match_id)),
                ("round", json!(self.round)),
                ("event_type", v_str(primary.as_str())),
            ]),
        );
        self.process_event(primary)?;
        if self.is_over() {
            return Ok(RoundOutcome::Completed);
        }

        let extra = &self.config.extra_events;
        let (story_chance, lethal_base, comeback_chance) = (
            extra.non_lethal_story_chance,
            extra.extra_lethal_base_chance,
            extra.comeback_base_chance,
        );

        if self.rng.random() < story_chance {
            self.process_event(EventType::NonLethalStory)?;
            if self.is_over() {
                return Ok(RoundOutcome::Completed);
            }
        }

        if !two_remain {
            let chance = lethal_base + self.lethal_modifier(self.pools.alive_count());
            if self.rng.random() < chance {
                self.process_event(EventType::ExtraLethal)?;
                if self.is_over() {
                    return Ok(RoundOutcome::Completed);
                }
            }
        }

        if self.pools.dead_count() > 0 && self.rng.random() < comeback_chance {
            self.process_event(EventType::Comeback)?;
        }

        log(
            Level::Info,
            Domain::Round,
            "round_ended",
            obj(&[
                ("match_id", json!(self.match_id)),
                ("round", json!(self.round)),
                ("alive", json!(self.pools.alive_count())),
            ]),
        );
        Ok(RoundOutcome::Completed)
    }

    fn lethal_modifier(&self, alive: usize) -> f64 {
        let m = &self.config.lethal_modifiers;
        if alive > 12 {
            m.cap_12_plus
        } else if alive > 8 {
            m.cap_8_plus
        } else {
            0.0
        }
    }

    /// Weighted primary roll. With two alive `group` is dropped and the
    /// remaining weights renormalised, so the pool can't reach zero.
    fn pick_primary(&mut self, two_remain: bool) -> Option<EventType> {
        let (types, mut weights): (Vec<EventType>, Vec<f64>) = self
            .config
            .primary_event_weights
            .iter()
            .filter(|(e, _)| !(two_remain && **e == EventType::Group))
            .map(|(e, w)| (*e, *w as f64 / 100.0))
            .unzip();
        if types.is_empty() {
            return None;
        }
        if two_remain {
            let total: f64 = weights.iter().sum();
            if total <= 0.0 {
                return None;
            }
            weights.iter_mut().for_each(|w| *w /= total);
        }
        self.rng.weighted_choice(&types, &weights).copied()
    }

    // =========================================================================
    // Events
    // =========================================================================

    fn process_event(&mut self, event_type: EventType) -> Result<(), EngineError> {
        log(
            Level::Debug,
            Domain::Event,
            "processing_event_type",
            obj(&[
                ("match_id", json!(self.match_id)),
                ("round", json!(self.round)),
                ("event_type", v_str(event_type.as_str())),
                ("lethal", json!(event_type.is_lethal())),
            ]),
        );

        let Some(category) = self.rng.choice(event_type.categories()).copied() else {
            return Ok(());
        };
        let catalog = self.catalog;
        let templates = catalog.get(category);
        if templates.is_empty() {
            if event_type == EventType::Comeback && self.pools.dead_count() > 0 {
                return self.generated_comeback();
            }
            self.skip(event_type, SkipReason::EmptyCategory(category.as_str()));
            return Ok(());
        }
        let Some(template) = self.rng.choice(templates) else {
            return Ok(());
        };

        let (source, needed) = if event_type.draws_from_dead() {
            if self.pools.dead_count() == 0 {
                self.skip(event_type, SkipReason::EmptyDeadPool);
                return Ok(());
            }
            (self.pools.dead_ids(), 1)
        } else {
            (self.pools.alive_ids(), template.placeholder_count())
        };

        let Some(participants) = self.rng.sample(&source, needed) else {
            self.skip(
                event_type,
                SkipReason::InsufficientParticipants { needed, available: source.len() },
            );
            return Ok(());
        };

        let names: Vec<&str> = participants
            .iter()
            .filter_map(|id| self.pools.get(*id).map(Character::display_name))
            .collect();
        let text = match substitute(&template.text, &names) {
            Ok(text) => text,
            Err(reason) => {
                self.skip(event_type, reason);
                return Ok(());
            }
        };

        self.record(event_type, &template.id, text, participants.clone())?;
        self.apply_effect(event_type, &participants)
    }

    /// Comeback without scenario text: revive a uniformly chosen dead entrant.
    fn generated_comeback(&mut self) -> Result<(), EngineError> {
        let dead = self.pools.dead_ids();
        let Some(id) = self.rng.choice(&dead).copied() else {
            self.skip(EventType::Comeback, SkipReason::EmptyDeadPool);
            return Ok(());
        };
        let name = self
            .pools
            .get(id)
            .map(|c| c.display_name().to_string())
            .unwrap_or_default();
        let text = format!("{} claws their way back from the brink!", name);
        self.record(EventType::Comeback, "generated_comeback", text, vec![id])?;
        self.apply_effect(EventType::Comeback, &[id])
    }

    fn record(
        &mut self,
        event_type: EventType,
        scenario_id: &str,
        text: String,
        affected: Vec<CharacterId>,
    ) -> Result<(), EngineError> {
        let event = MatchEvent {
            match_id: self.match_id,
            round: self.round,
            event_type,
            scenario_source: scenario_id.to_string(),
            text,
            affected_character_ids: affected,
        };
        self.store.append(&event)?;
        self.log.push(format!(
            "Round {}: [{}] {}",
            self.round,
            event_type.as_str().to_uppercase(),
            event.text
        ));
        log_event_record(
            self.match_id,
            self.round,
            event_type.as_str(),
            scenario_id,
            &event.text,
            &event.affected_character_ids,
        );
        self.events.push(event);
        Ok(())
    }

    fn apply_effect(
        &mut self,
        event_type: EventType,
        participants: &[CharacterId],
    ) -> Result<(), EngineError> {
        match event_type.effect() {
            Effect::Kill { killer, victim } => {
                let (Some(&killer), Some(&victim)) = (participants.get(killer), participants.get(victim))
                else {
                    return Ok(());
                };
                self.eliminate(victim)?;
                if let Some(player_id) = self.pools.get(killer).map(|c| c.player_id) {
                    self.store.add_kill(player_id)?;
                    log(
                        Level::Info,
                        Domain::Event,
                        "kill_credited",
                        obj(&[
                            ("match_id", json!(self.match_id)),
                            ("round", json!(self.round)),
                            ("player_id", json!(player_id)),
                            ("killer_id", json!(killer)),
                            ("victim_id", json!(victim)),
                            ("award", v_num(self.entry_fee * self.kill_award_rate)),
                        ]),
                    );
                }
            }
            Effect::Eliminate(slots) => {
                if slots.iter().all(|&i| i < participants.len()) {
                    for &i in slots {
                        self.eliminate(participants[i])?;
                    }
                }
            }
            Effect::Revive(slot) => {
                if let Some(&id) = participants.get(slot) {
                    self.revive(id)?;
                }
            }
            Effect::Nothing => log(
                Level::Debug,
                Domain::Pool,
                "story_no_pool_change",
                obj(&[("match_id", json!(self.match_id)), ("round", json!(self.round))]),
            ),
        }
        Ok(())
    }

    fn eliminate(&mut self, id: CharacterId) -> Result<(), EngineError> {
        if self.pools.eliminate(id) {
            self.store.set_alive(id, false)?;
            log(
                Level::Info,
                Domain::Pool,
                "character_eliminated",
                obj(&[
                    ("match_id", json!(self.match_id)),
                    ("round", json!(self.round)),
                    ("character_id", json!(id)),
                ]),
            );
        } else {
            log(
                Level::Warn,
                Domain::Pool,
                "elimination_failed_not_alive",
                obj(&[
                    ("match_id", json!(self.match_id)),
                    ("round", json!(self.round)),
                    ("character_id", json!(id)),
                ]),
            );
        }
        Ok(())
    }

    fn revive(&mut self, id: CharacterId) -> Result<(), EngineError> {
        if self.pools.revive(id) {
            self.store.set_alive(id, true)?;
            log(
                Level::Info,
                Domain::Pool,
                "character_revived",
                obj(&[
                    ("match_id", json!(self.match_id)),
                    ("round", json!(self.round)),
                    ("character_id", json!(id)),
                ]),
            );
        } else {
            log(
                Level::Warn,
                Domain::Pool,
                "revival_failed_not_dead",
                obj(&[
                    ("match_id", json!(self.match_id)),
                    ("round", json!(self.round)),
                    ("character_id", json!(id)),
                ]),
            );
        }
        Ok(())
    }

    fn skip(&self, event_type: EventType, reason: SkipReason) {
        log_skip(self.match_id, self.round, event_type.as_str(), &reason.to_string());
    }
}
