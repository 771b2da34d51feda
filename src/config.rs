//! Game configuration: event weights, bonus chances, fee bounds and tiers.
//!
//! Loaded from a JSON file named by `GAME_CONFIG` (optional), then
//! individual values can be overridden from the environment.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::engine::events::EventType;
use crate::error::ConfigError;
use crate::logging::{log, obj, v_str, Domain, Level};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraEvents {
    pub non_lethal_story_chance: f64,
    pub extra_lethal_base_chance: f64,
    pub comeback_base_chance: f64,
}

/// Additive extra-lethal chance by alive count. Only one tier applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LethalModifiers {
    /// alive in (8, 12]
    pub cap_8_plus: f64,
    /// alive > 12
    pub cap_12_plus: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub scenario_dir: String,

    pub min_fee: f64,
    pub default_fee: f64,
    pub max_fee: f64,

    pub kill_award_rate_min: f64,
    pub kill_award_rate_default: f64,
    pub kill_award_rate_max: f64,

    pub num_players_min: u32,
    pub num_players_default: u32,
    pub num_players_max: u32,

    pub chars_per_player_min: u32,
    pub chars_per_player_max: u32,

    /// Percentages summing to 100.
    pub primary_event_weights: BTreeMap<EventType, u32>,
    pub extra_events: ExtraEvents,
    pub lethal_modifiers: LethalModifiers,

    /// Protocol fee percent keyed by characters entered per player.
    pub protocol_fee_tiers: BTreeMap<u32, f64>,

    pub round_delay_enabled: bool,
    pub round_delay_min: f64,
    pub round_delay_max: f64,

    pub scheduler_poll_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            scenario_dir: "scenarios".to_string(),
            min_fee: 0.5,
            default_fee: 1.0,
            max_fee: 5.0,
            kill_award_rate_min: 0.0,
            kill_award_rate_default: 0.1,
            kill_award_rate_max: 0.5,
            num_players_min: 3,
            num_players_default: 10,
            num_players_max: 50,
            chars_per_player_min: 1,
            chars_per_player_max: 3,
            primary_event_weights: BTreeMap::from([
                (EventType::DirectKill, 40),
                (EventType::SelfInflicted, 10),
                (EventType::Environmental, 20),
                (EventType::Group, 10),
                (EventType::Story, 20),
            ]),
            extra_events: ExtraEvents {
                non_lethal_story_chance: 0.2,
                extra_lethal_base_chance: 0.1,
                comeback_base_chance: 0.05,
            },
            lethal_modifiers: LethalModifiers {
                cap_8_plus: 0.1,
                cap_12_plus: 0.2,
            },
            protocol_fee_tiers: BTreeMap::from([(1, 10.0), (2, 8.0), (3, 6.0)]),
            round_delay_enabled: false,
            round_delay_min: 5.0,
            round_delay_max: 10.0,
            scheduler_poll_ms: 1000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl GameConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("config file not found at {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&raw)
            .with_context(|| format!("error parsing config file {}", path.display()))?;
        Ok(cfg)
    }

    /// Defaults, then `GAME_CONFIG` file, then per-key env overrides.
    pub fn from_env() -> Result<Self> {
        let mut cfg = match std::env::var("GAME_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        if let Ok(dir) = std::env::var("SCENARIO_DIR") {
            cfg.scenario_dir = dir;
        }
        cfg.round_delay_enabled = env_parse("ROUND_DELAY_ENABLED").unwrap_or(cfg.round_delay_enabled);
        cfg.round_delay_min = env_parse("ROUND_DELAY_MIN").unwrap_or(cfg.round_delay_min);
        cfg.round_delay_max = env_parse("ROUND_DELAY_MAX").unwrap_or(cfg.round_delay_max);
        cfg.scheduler_poll_ms = env_parse("SCHEDULER_POLL_MS").unwrap_or(cfg.scheduler_poll_ms);
        cfg.validate()?;

        log(
            Level::Info,
            Domain::Config,
            "config_loaded",
            obj(&[
                ("scenario_dir", v_str(&cfg.scenario_dir)),
                ("round_delay_enabled", json!(cfg.round_delay_enabled)),
                ("fee_tiers", json!(cfg.protocol_fee_tiers.len())),
            ]),
        );
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary_event_weights.is_empty() {
            return Err(ConfigError::NoPrimaryEvents);
        }
        let total: u32 = self.primary_event_weights.values().sum();
        if total != 100 {
            return Err(ConfigError::WeightsNotHundred(total));
        }
        for (name, value) in [
            ("non_lethal_story_chance", self.extra_events.non_lethal_story_chance),
            ("extra_lethal_base_chance", self.extra_events.extra_lethal_base_chance),
            ("comeback_base_chance", self.extra_events.comeback_base_chance),
            ("cap_8_plus", self.lethal_modifiers.cap_8_plus),
            ("cap_12_plus", self.lethal_modifiers.cap_12_plus),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ChanceOutOfRange { name, value });
            }
        }
        for (name, min, max) in [
            ("entry_fee", self.min_fee, self.max_fee),
            ("kill_award_rate", self.kill_award_rate_min, self.kill_award_rate_max),
            ("num_players", self.num_players_min as f64, self.num_players_max as f64),
            ("chars_per_player", self.chars_per_player_min as f64, self.chars_per_player_max as f64),
            ("round_delay", self.round_delay_min, self.round_delay_max),
        ] {
            if min > max {
                return Err(ConfigError::InvertedBounds { name, min, max });
            }
        }
        if self.protocol_fee_tiers.is_empty() {
            return Err(ConfigError::NoFeeTiers);
        }
        Ok(())
    }

    pub fn validate_entry_fee(&self, fee: f64) -> Result<(), ConfigError> {
        check_bounds("entry_fee", fee, self.min_fee, self.max_fee)
    }

    pub fn validate_kill_award_rate(&self, rate: f64) -> Result<(), ConfigError> {
        check_bounds("kill_award_rate", rate, self.kill_award_rate_min, self.kill_award_rate_max)
    }
}

fn check_bounds(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value < min || value > max || value.is_nan() {
        return Err(ConfigError::OutOfBounds { name, value, min, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payout::tier_percent;

    #[test]
    fn test_default_is_valid() {
        GameConfig::default().validate().unwrap();
    }

    #[test]
    fn test_weights_must_sum_to_hundred() {
        let mut cfg = GameConfig::default();
        cfg.primary_event_weights.insert(EventType::Story, 25);
        assert_eq!(cfg.validate(), Err(ConfigError::WeightsNotHundred(105)));
    }

    #[test]
    fn test_chance_range() {
        let mut cfg = GameConfig::default();
        cfg.extra_events.comeback_base_chance = 1.5;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ChanceOutOfRange { name: "comeback_base_chance", .. })
        ));
    }

    #[test]
    fn test_fee_tier_fallback_to_highest() {
        let tiers = GameConfig::default().protocol_fee_tiers;
        assert_eq!(tier_percent(&tiers, 1), 10.0);
        assert_eq!(tier_percent(&tiers, 3), 6.0);
        assert_eq!(tier_percent(&tiers, 7), 6.0);
    }

    #[test]
    fn test_entry_bounds() {
        let cfg = GameConfig::default();
        assert!(cfg.validate_entry_fee(1.0).is_ok());
        assert!(cfg.validate_entry_fee(0.1).is_err());
        assert!(cfg.validate_kill_award_rate(0.5).is_ok());
        assert!(cfg.validate_kill_award_rate(0.6).is_err());
    }

    #[test]
    fn test_from_file_partial_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.json");
        std::fs::write(
            &path,
            r#"{
                "scenario_dir": "/srv/scenarios",
                "primary_event_weights": {"direct_kill": 60, "self": 20, "story": 20},
                "protocol_fee_tiers": {"1": 12.5}
            }"#,
        )
        .unwrap();
        let cfg = GameConfig::from_file(&path).unwrap();
        assert_eq!(cfg.scenario_dir, "/srv/scenarios");
        assert_eq!(cfg.primary_event_weights.get(&EventType::SelfInflicted), Some(&20));
        assert_eq!(tier_percent(&cfg.protocol_fee_tiers, 2), 12.5);
        assert_eq!(cfg.max_fee, 5.0);
        cfg.validate().unwrap();
    }
}
