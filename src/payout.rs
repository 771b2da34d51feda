//! Settlement arithmetic for a finished match.
//!
//! Pure functions over plain ids and counts: the same numbers come out
//! whether fed live from the engine or re-read from storage later.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{CharacterId, PlayerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterInfo {
    pub character_id: CharacterId,
    pub player_id: PlayerId,
}

/// One `direct_kill`; only the killer matters for money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillEvent {
    pub killer_character_id: CharacterId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutResult {
    pub total_pool: f64,
    pub protocol_fee: f64,
    pub pool_after_protocol: f64,
    /// player → award, after capping and scaling
    pub kill_awards: BTreeMap<PlayerId, f64>,
    pub total_kill_awards: f64,
    pub winner_player_id: Option<PlayerId>,
    pub winner_payout: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutKind {
    KillAward,
    Winner,
}

impl PayoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutKind::KillAward => "kill_award",
            PayoutKind::Winner => "winner",
        }
    }
}

/// A payout line waiting for settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPayout {
    pub player_id: PlayerId,
    pub kind: PayoutKind,
    pub amount: f64,
}

pub fn calculate_payouts(
    characters: &[CharacterInfo],
    kill_events: &[KillEvent],
    entry_fee: f64,
    kill_award_rate: f64,
    protocol_fee: f64,
    winner_character_id: Option<CharacterId>,
) -> PayoutResult {
    if characters.is_empty() {
        return PayoutResult {
            total_pool: 0.0,
            protocol_fee,
            pool_after_protocol: 0.0,
            kill_awards: BTreeMap::new(),
            total_kill_awards: 0.0,
            winner_player_id: None,
            winner_payout: 0.0,
        };
    }

    let total_pool = characters.len() as f64 * entry_fee;
    let pool_after_protocol = total_pool - protocol_fee;

    let owner: BTreeMap<CharacterId, PlayerId> =
        characters.iter().map(|c| (c.character_id, c.player_id)).collect();
    let mut owned_count: BTreeMap<PlayerId, u32> = BTreeMap::new();
    for c in characters {
        *owned_count.entry(c.player_id).or_default() += 1;
    }

    let mut kills: BTreeMap<PlayerId, u32> = BTreeMap::new();
    for ev in kill_events {
        if let Some(player_id) = owner.get(&ev.killer_character_id) {
            *kills.entry(*player_id).or_default() += 1;
        }
    }

    let mut kill_awards: BTreeMap<PlayerId, f64> = kills
        .iter()
        .map(|(player_id, n)| {
            let raw = *n as f64 * entry_fee * kill_award_rate;
            let cap = owned_count.get(player_id).copied().unwrap_or(0) as f64 * entry_fee;
            (*player_id, raw.min(cap))
        })
        .collect();

    let mut total_kill_awards: f64 = kill_awards.values().sum();
    // winner payout must not go negative
    if total_kill_awards > pool_after_protocol {
        let scale = if total_kill_awards > 0.0 {
            pool_after_protocol / total_kill_awards
        } else {
            0.0
        };
        kill_awards.values_mut().for_each(|a| *a *= scale);
        total_kill_awards = pool_after_protocol;
    }

    let winner_payout = pool_after_protocol - total_kill_awards;
    let winner_player_id = winner_character_id.and_then(|id| owner.get(&id).copied());

    PayoutResult {
        total_pool,
        protocol_fee,
        pool_after_protocol,
        kill_awards,
        total_kill_awards,
        winner_player_id,
        winner_payout,
    }
}

/// Tiered protocol fee: each player pays `count × entry_fee × tier%` where
/// the tier is keyed by how many characters they entered. Counts beyond
/// the table use its highest tier.
pub fn protocol_fee_for(
    chars_per_player: &BTreeMap<PlayerId, u32>,
    entry_fee: f64,
    tiers: &BTreeMap<u32, f64>,
) -> f64 {
    chars_per_player
        .values()
        .map(|&count| count as f64 * entry_fee * tier_percent(tiers, count) / 100.0)
        .sum()
}

/// Fee percent for a player entering `count` characters. Counts missing
/// from the table use the highest defined tier.
pub fn tier_percent(tiers: &BTreeMap<u32, f64>, count: u32) -> f64 {
    tiers
        .get(&count)
        .or_else(|| tiers.last_key_value().map(|(_, pct)| pct))
        .copied()
        .unwrap_or(0.0)
}

fn round_cents(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

impl PayoutResult {
    /// Settlement lines, each rounded to cents. Zero lines are dropped and
    /// no winner line is emitted without a winner.
    pub fn line_items(&self) -> Vec<PendingPayout> {
        let mut items: Vec<PendingPayout> = self
            .kill_awards
            .iter()
            .map(|(player_id, amount)| PendingPayout {
                player_id: *player_id,
                kind: PayoutKind::KillAward,
                amount: round_cents(*amount),
            })
            .collect();
        if let Some(player_id) = self.winner_player_id {
            items.push(PendingPayout {
                player_id,
                kind: PayoutKind::Winner,
                amount: round_cents(self.winner_payout),
            });
        }
        items.retain(|p| p.amount > 0.0);
        items
    }
}

#[derive(Debug, Clone)]
pub struct InvariantViolation {
    pub msg: String,
}

/// Money conservation over unrounded amounts.
pub fn check_conservation(result: &PayoutResult, tolerance: f64) -> Result<(), InvariantViolation> {
    if result.total_pool == 0.0 && result.kill_awards.is_empty() {
        return Ok(());
    }
    let distributed = result.protocol_fee + result.total_kill_awards + result.winner_payout;
    if (distributed - result.total_pool).abs() > tolerance {
        return Err(InvariantViolation {
            msg: format!(
                "fee + awards + winner = {:.6}, pool = {:.6}",
                distributed, result.total_pool
            ),
        });
    }
    if result.total_kill_awards > result.pool_after_protocol + tolerance {
        return Err(InvariantViolation {
            msg: "kill awards exceed pool after protocol".to_string(),
        });
    }
    let summed: f64 = result.kill_awards.values().sum();
    if (summed - result.total_kill_awards).abs() > tolerance {
        return Err(InvariantViolation {
            msg: "kill award total does not match per-player awards".to_string(),
        });
    }
    if result.winner_payout < -tolerance {
        return Err(InvariantViolation {
            msg: "winner payout negative".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_each(n: i64) -> Vec<CharacterInfo> {
        (1..=n).map(|i| CharacterInfo { character_id: i, player_id: i }).collect()
    }

    fn kills(ids: &[CharacterId]) -> Vec<KillEvent> {
        ids.iter().map(|&k| KillEvent { killer_character_id: k }).collect()
    }

    #[test]
    fn test_four_player_scenario() {
        let r = calculate_payouts(&one_each(4), &kills(&[2]), 10.0, 0.1, 4.0, Some(2));
        assert_eq!(r.total_pool, 40.0);
        assert_eq!(r.pool_after_protocol, 36.0);
        assert!((r.kill_awards[&2] - 1.0).abs() < 1e-9);
        assert!((r.winner_payout - 35.0).abs() < 1e-9);
        assert_eq!(r.winner_player_id, Some(2));
        assert!((r.total_kill_awards + r.winner_payout - 36.0).abs() < 1e-9);
        check_conservation(&r, 1e-9).unwrap();
    }

    #[test]
    fn test_empty_match() {
        let r = calculate_payouts(&[], &[], 10.0, 0.1, 0.0, None);
        assert_eq!(r.total_pool, 0.0);
        assert_eq!(r.winner_payout, 0.0);
        assert!(r.kill_awards.is_empty());
        assert!(r.line_items().is_empty());
    }

    #[test]
    fn test_award_capped_at_entry_total() {
        // player 1 has one character but five kills at rate 0.5
        let chars = vec![
            CharacterInfo { character_id: 1, player_id: 1 },
            CharacterInfo { character_id: 2, player_id: 2 },
            CharacterInfo { character_id: 3, player_id: 2 },
        ];
        let r = calculate_payouts(&chars, &kills(&[1, 1, 1, 1, 1]), 1.0, 0.5, 0.0, Some(1));
        assert_eq!(r.kill_awards[&1], 1.0);
        check_conservation(&r, 1e-9).unwrap();
    }

    #[test]
    fn test_awards_scaled_to_pool() {
        // protocol fee leaves less than the capped award total
        let r = calculate_payouts(&one_each(2), &kills(&[1, 2]), 1.0, 1.0, 1.5, Some(1));
        assert!((r.total_kill_awards - 0.5).abs() < 1e-9);
        assert!((r.kill_awards[&1] - 0.25).abs() < 1e-9);
        assert!((r.kill_awards[&2] - 0.25).abs() < 1e-9);
        assert!(r.winner_payout.abs() < 1e-9);
        check_conservation(&r, 1e-9).unwrap();
    }

    #[test]
    fn test_unknown_killer_ignored() {
        let r = calculate_payouts(&one_each(3), &kills(&[99, 1]), 1.0, 0.1, 0.3, Some(3));
        assert_eq!(r.kill_awards.len(), 1);
        assert!(r.kill_awards.contains_key(&1));
    }

    #[test]
    fn test_no_winner_has_no_winner_line() {
        let r = calculate_payouts(&one_each(3), &kills(&[1]), 1.0, 0.1, 0.3, None);
        assert_eq!(r.winner_player_id, None);
        let items = r.line_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, PayoutKind::KillAward);
        check_conservation(&r, 1e-9).unwrap();
    }

    #[test]
    fn test_line_items_rounded() {
        let r = calculate_payouts(&one_each(3), &kills(&[1]), 1.0, 1.0 / 3.0, 0.3, Some(2));
        let items = r.line_items();
        assert_eq!(items[0], PendingPayout { player_id: 1, kind: PayoutKind::KillAward, amount: 0.33 });
        assert_eq!(items[1].kind, PayoutKind::Winner);
        assert_eq!(items[1].amount, 2.37);
    }

    #[test]
    fn test_protocol_fee_tiers() {
        let tiers = BTreeMap::from([(1, 10.0), (2, 8.0), (3, 6.0)]);
        let per_player = BTreeMap::from([(1, 1), (2, 2), (3, 5)]);
        // 1×10% + 2×8% + 5×6% of a 1.0 fee
        let fee = protocol_fee_for(&per_player, 1.0, &tiers);
        assert!((fee - (0.1 + 0.16 + 0.3)).abs() < 1e-9);
    }

    #[test]
    fn test_conservation_detects_drift() {
        let mut r = calculate_payouts(&one_each(4), &kills(&[2]), 10.0, 0.1, 4.0, Some(2));
        r.winner_payout += 0.5;
        assert!(check_conservation(&r, 1e-6).is_err());
    }
}
