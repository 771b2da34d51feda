//! Batch simulation over boundary, distribution and economic scenarios.
//!
//! Every scenario runs in-process, then the settlement is checked against
//! the money invariants and the match against termination. A seed sweep
//! replays each seed twice and compares log digests.
//!
//! Usage: cargo run --release --bin batch_simulate [--verbose] [--filter <category>] [--sweep N]

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use coinclash::config::GameConfig;
use coinclash::model::Match;
use coinclash::payout::check_conservation;
use coinclash::repo::InMemoryRepo;
use coinclash::runner::{build_roster, MatchReport, MatchRunner};
use coinclash::scenario::ScenarioCatalog;

struct Scenario {
    name: &'static str,
    category: &'static str,
    distribution: Vec<u32>,
    entry_fee: f64,
    kill_award_rate: f64,
    seed: u64,
}

fn even(players: usize, per_player: u32) -> Vec<u32> {
    vec![per_player; players]
}

fn scenarios(rate: f64) -> Vec<Scenario> {
    let s = |name, category, distribution, entry_fee, kill_award_rate, seed| Scenario {
        name,
        category,
        distribution,
        entry_fee,
        kill_award_rate,
        seed,
    };
    vec![
        s("min_players", "boundary", even(3, 1), 1.0, rate, 1),
        s("max_players", "boundary", even(50, 1), 1.0, rate, 2),
        s("max_chars_per_player", "boundary", even(4, 3), 1.0, rate, 3),
        s("min_entry_fee", "boundary", even(4, 1), 0.5, rate, 4),
        s("max_entry_fee", "boundary", even(4, 1), 5.0, rate, 5),
        s("zero_kill_rewards", "boundary", even(4, 2), 1.0, 0.0, 6),
        s("max_kill_rewards", "boundary", even(4, 2), 1.0, 0.5, 7),
        s("whale_vs_minnows", "distribution", vec![3, 1, 1, 1], 1.0, rate, 10),
        s("two_whales", "distribution", vec![3, 3, 1, 1], 1.0, rate, 11),
        s("all_whales", "distribution", vec![3, 3, 3, 3], 2.0, rate, 12),
        s("asymmetric_5p", "distribution", vec![3, 2, 2, 1, 1], 1.5, rate, 13),
        s("extreme_whale", "distribution", vec![3, 1, 1, 1, 1, 1, 1, 1], 1.0, rate, 14),
        s("high_fee_high_kill", "economic", even(6, 2), 5.0, 0.5, 20),
        s("low_fee_low_kill", "economic", even(6, 2), 0.5, 0.05, 21),
        s("protocol_tier_1", "economic", vec![1, 1, 1, 1], 1.0, rate, 22),
        s("protocol_tier_2", "economic", vec![2, 2, 2, 2], 1.0, rate, 23),
        s("protocol_tier_3", "economic", vec![3, 3, 3, 3], 1.0, rate, 24),
        s("mixed_tiers", "economic", vec![3, 2, 1, 1], 1.0, rate, 25),
        s("default_4p", "normal", even(4, 1), 1.0, rate, 30),
        s("typical_8p", "normal", even(8, 1), 1.0, rate, 31),
        s("medium_stakes", "normal", even(6, 2), 2.0, 0.15, 32),
    ]
}

fn run_one(runner: &MatchRunner, sc: &Scenario, seed: u64) -> Result<MatchReport> {
    let roster = build_roster(&sc.distribution);
    let mut store = InMemoryRepo::with_match(Match::new(1, sc.entry_fee, sc.kill_award_rate));
    Ok(runner.run_match(&mut store, 1, &roster, Some(seed))?)
}

fn validate(sc: &Scenario, report: &MatchReport) -> Vec<String> {
    let mut errors = Vec::new();
    let r = &report.payout;
    let chars: u32 = sc.distribution.iter().sum();

    let expected_pool = chars as f64 * sc.entry_fee;
    if (expected_pool - r.total_pool).abs() > 0.01 {
        errors.push(format!("pool mismatch: expected {:.2}, got {:.2}", expected_pool, r.total_pool));
    }
    if (r.protocol_fee + r.pool_after_protocol - r.total_pool).abs() > 0.01 {
        errors.push(format!(
            "protocol accounting: {:.2} + {:.2} != {:.2}",
            r.protocol_fee, r.pool_after_protocol, r.total_pool
        ));
    }
    if let Err(v) = check_conservation(r, 1e-6) {
        errors.push(v.msg);
    }
    for (player_id, award) in &r.kill_awards {
        let owned = sc.distribution.get(*player_id as usize - 1).copied().unwrap_or(0);
        if *award > owned as f64 * sc.entry_fee + 1e-9 {
            errors.push(format!("player {} award {:.2} exceeds entry total", player_id, award));
        }
    }
    for (name, v) in [
        ("protocol_fee", r.protocol_fee),
        ("pool_after_protocol", r.pool_after_protocol),
        ("total_kill_awards", r.total_kill_awards),
        ("winner_payout", r.winner_payout),
    ] {
        if v < -0.01 {
            errors.push(format!("negative {}: {:.2}", name, v));
        }
    }

    let alive = report.outcome.final_characters.iter().filter(|c| c.is_alive).count();
    if report.outcome.winner.is_none() || alive != 1 {
        errors.push(format!("no single winner ({} alive)", alive));
    }
    errors
}

fn main() -> Result<()> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let mut verbose = false;
    let mut filter: Option<String> = None;
    let mut sweep = 200u64;
    let mut i = 0;
    while i < argv.len() {
        match argv[i].as_str() {
            "--verbose" | "-v" => verbose = true,
            "--filter" | "-f" => {
                i += 1;
                filter = Some(argv.get(i).context("--filter needs a category")?.clone());
            }
            "--sweep" => {
                i += 1;
                sweep = argv.get(i).context("--sweep needs a count")?.parse()?;
            }
            other => bail!("unknown argument {}", other),
        }
        i += 1;
    }

    let cfg = GameConfig::from_env()?;
    let catalog = ScenarioCatalog::load_dir(&cfg.scenario_dir);
    let rate = cfg.kill_award_rate_default;
    let runner = MatchRunner::new(Arc::new(cfg), Arc::new(catalog));

    let mut table = scenarios(rate);
    if let Some(f) = &filter {
        table.retain(|s| s.category == f.as_str());
        if table.is_empty() {
            bail!("no scenarios for category {}", f);
        }
    }

    println!("Running {} scenarios...\n", table.len());
    let mut failed = Vec::new();
    for (n, sc) in table.iter().enumerate() {
        println!("[{}/{}] {} ({})", n + 1, table.len(), sc.name, sc.category);
        match run_one(&runner, sc, sc.seed) {
            Ok(report) => {
                if verbose {
                    for line in &report.outcome.log {
                        println!("    {}", line);
                    }
                }
                let errors = validate(sc, &report);
                if errors.is_empty() {
                    println!("    PASSED");
                } else {
                    println!("    FAILED (validation)");
                    for e in &errors {
                        println!("       - {}", e);
                    }
                    failed.push(sc.name.to_string());
                }
            }
            Err(err) => {
                println!("    FAILED (execution: {:#})", err);
                failed.push(sc.name.to_string());
            }
        }
    }

    if filter.is_none() && sweep > 0 {
        println!("\nSeed sweep: {} seeds, 10 players x 2", sweep);
        let sc = Scenario {
            name: "seed_sweep",
            category: "randomness",
            distribution: even(10, 2),
            entry_fee: 1.0,
            kill_award_rate: rate,
            seed: 0,
        };
        let mut sweep_failures = 0;
        for seed in 0..sweep {
            let a = run_one(&runner, &sc, seed)?;
            let b = run_one(&runner, &sc, seed)?;
            let mut errors = validate(&sc, &a);
            if a.outcome.log_digest != b.outcome.log_digest {
                errors.push("replay diverged".to_string());
            }
            if !errors.is_empty() {
                sweep_failures += 1;
                println!("    seed {}: {}", seed, errors.join("; "));
            }
        }
        if sweep_failures > 0 {
            failed.push(format!("seed_sweep ({} seeds)", sweep_failures));
        }
    }

    println!("{}", "=".repeat(60));
    println!("SUMMARY");
    println!("{}", "=".repeat(60));
    println!("Failed: {}", failed.len());
    for name in &failed {
        println!("  {}", name);
    }
    if !failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
