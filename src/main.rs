//! Simulate one match end to end and print the log and economic summary.
//!
//! Usage:
//!   coinclash --players 8 --chars-per-player 2 --entry-fee 2.0 --kill-award-rate 0.15 --seed 99
//!   coinclash --char-distribution 3,1,2,1 --entry-fee 1.0 --seed 7 --db sim.db
//!   coinclash --players 4 --start-in 2.5

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde_json::json;
use tokio::sync::oneshot;

use coinclash::config::GameConfig;
use coinclash::logging::{log, obj, v_str, Domain, Level};
use coinclash::model::{Match, MatchId, PlayerId};
use coinclash::repo::InMemoryRepo;
use coinclash::runner::{build_roster, MatchReport, MatchRunner};
use coinclash::scenario::ScenarioCatalog;
use coinclash::scheduler::TaskScheduler;
use coinclash::storage::SqliteStore;

const SIM_MATCH_ID: MatchId = 1;

const FLAGS: &[&str] = &[
    "--players",
    "--chars-per-player",
    "--char-distribution",
    "--entry-fee",
    "--kill-award-rate",
    "--seed",
    "--db",
    "--start-in",
];

#[derive(Debug, Clone)]
struct SimArgs {
    distribution: Vec<u32>,
    entry_fee: f64,
    kill_award_rate: f64,
    seed: u64,
    db: Option<String>,
    /// Seconds until the scheduler starts the match.
    start_in: Option<f64>,
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .with_context(|| format!("{} needs a value", flag))
}

fn parse_args(cfg: &GameConfig, args: &[String]) -> Result<SimArgs> {
    let mut players = cfg.num_players_default;
    let mut chars_per_player = 1u32;
    let mut distribution: Option<Vec<u32>> = None;
    let mut entry_fee = cfg.default_fee;
    let mut kill_award_rate = cfg.kill_award_rate_default;
    let mut seed = 42u64;
    let mut db = None;
    let mut start_in = None;

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        if !FLAGS.contains(&flag) {
            bail!("unknown argument {}", flag);
        }
        let value = flag_value(args, i, flag)?;
        match flag {
            "--players" => players = value.parse().context("--players")?,
            "--chars-per-player" => chars_per_player = value.parse().context("--chars-per-player")?,
            "--char-distribution" => {
                let parsed: Result<Vec<u32>, _> =
                    value.split(',').map(|x| x.trim().parse::<u32>()).collect();
                distribution = Some(parsed.context("--char-distribution")?);
            }
            "--entry-fee" => entry_fee = value.parse().context("--entry-fee")?,
            "--kill-award-rate" => kill_award_rate = value.parse().context("--kill-award-rate")?,
            "--seed" => seed = value.parse().context("--seed")?,
            "--db" => db = Some(value.to_string()),
            "--start-in" => start_in = Some(value.parse::<f64>().context("--start-in")?),
            other => bail!("unknown argument {}", other),
        }
        i += 2;
    }

    let distribution = distribution.unwrap_or_else(|| vec![chars_per_player; players as usize]);
    if distribution.is_empty() || distribution.iter().all(|&n| n == 0) {
        bail!("no characters to simulate");
    }
    Ok(SimArgs { distribution, entry_fee, kill_award_rate, seed, db, start_in })
}

fn run(runner: &MatchRunner, args: &SimArgs) -> Result<MatchReport> {
    let roster = build_roster(&args.distribution);
    let m = Match::new(SIM_MATCH_ID, args.entry_fee, args.kill_award_rate);

    let Some(path) = &args.db else {
        let mut store = InMemoryRepo::with_match(m);
        return Ok(runner.run_match(&mut store, SIM_MATCH_ID, &roster, Some(args.seed))?);
    };

    let mut store = SqliteStore::new(path)?;
    store.init()?;
    store.create_match(&m)?;
    store.add_participants(SIM_MATCH_ID, &roster)?;
    let report = runner.run_match(&mut store, SIM_MATCH_ID, &roster, Some(args.seed))?;
    store.record_payouts(SIM_MATCH_ID, &report.pending)?;
    log(
        Level::Info,
        Domain::Storage,
        "simulation_persisted",
        obj(&[("db", v_str(path)), ("payout_lines", json!(report.pending.len()))]),
    );
    Ok(report)
}

/// Hand the match to the scheduler and wait for its start task to finish.
async fn run_scheduled(runner: MatchRunner, args: SimArgs, delay_secs: f64) -> Result<MatchReport> {
    let sched = TaskScheduler::from_config(runner.config());
    let at = Utc::now() + chrono::Duration::milliseconds((delay_secs.max(0.0) * 1000.0) as i64);
    let (tx, rx) = oneshot::channel();
    let task_args = args.clone();
    sched.schedule_match_start(SIM_MATCH_ID, at, move |_| {
        let result = run(&runner, &task_args);
        let started = result.is_ok();
        let _ = tx.send(result);
        Ok(started)
    })?;
    sched.start()?;
    let outcome = rx.await;
    sched.stop().await;
    outcome.context("scheduled match start never ran")?
}

fn winner_line(report: &MatchReport) -> String {
    match (&report.outcome.winner, report.payout.winner_player_id) {
        (Some(w), Some(pid)) => format!(
            "Winner: {} (player {}) -> {:.2}",
            w.display_name(),
            pid,
            report.payout.winner_payout
        ),
        _ => "No winner determined.".to_string(),
    }
}

fn print_report(args: &SimArgs, report: &MatchReport) {
    let rule = "=".repeat(60);
    println!("{}", rule);
    println!("MATCH LOG");
    println!("{}", rule);
    for line in &report.outcome.log {
        println!("{}", line);
    }

    let owner: BTreeMap<_, _> = report
        .outcome
        .final_characters
        .iter()
        .map(|c| (c.id, c.player_id))
        .collect();
    let mut kills: BTreeMap<PlayerId, u32> = BTreeMap::new();
    for k in report.outcome.kill_events() {
        if let Some(p) = owner.get(&k.killer_character_id) {
            *kills.entry(*p).or_default() += 1;
        }
    }

    let r = &report.payout;
    println!();
    println!("{}", rule);
    println!("ECONOMIC SUMMARY");
    println!("{}", rule);
    println!("Players:              {}", args.distribution.len());
    println!("Char distribution:    {:?}", args.distribution);
    println!("Total characters:     {}", report.outcome.final_characters.len());
    println!("Entry fee:            {:.2}", args.entry_fee);
    println!("Kill award rate:      {:.2}%", args.kill_award_rate * 100.0);
    println!("Seed:                 {}", args.seed);
    println!("Log digest:           {}", report.outcome.log_digest);
    println!();
    println!("Total pool:           {:.2}", r.total_pool);
    println!("Protocol fee:         {:.2}", r.protocol_fee);
    println!("Pool after protocol:  {:.2}", r.pool_after_protocol);
    println!("Total kill awards:    {:.2}", r.total_kill_awards);
    println!("Winner payout:        {:.2}", r.winner_payout);
    println!();

    if !r.kill_awards.is_empty() {
        println!("Kill awards:");
        for (pid, amount) in &r.kill_awards {
            println!(
                "  Player_{}: {:.2}  (kills: {})",
                pid,
                amount,
                kills.get(pid).copied().unwrap_or(0)
            );
        }
    }
    println!("\n{}", winner_line(report));
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = GameConfig::from_env()?;
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&cfg, &argv)?;
    cfg.validate_entry_fee(args.entry_fee)?;
    cfg.validate_kill_award_rate(args.kill_award_rate)?;
    log(
        Level::Info,
        Domain::System,
        "simulation_started",
        obj(&[
            ("seed", json!(args.seed)),
            ("players", json!(args.distribution.len())),
            ("scenario_dir", v_str(&cfg.scenario_dir)),
        ]),
    );

    let catalog = ScenarioCatalog::load_dir(&cfg.scenario_dir);
    let runner = MatchRunner::new(Arc::new(cfg), Arc::new(catalog));
    let report = match args.start_in {
        Some(delay) => run_scheduled(runner, args.clone(), delay).await?,
        None => run(&runner, &args)?,
    };
    print_report(&args, &report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinclash::scenario::Category;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_unknown_trailing_flag_named() {
        let cfg = GameConfig::default();
        let err = parse_args(&cfg, &argv(&["--seed", "3", "--verbose"])).unwrap_err();
        assert_eq!(err.to_string(), "unknown argument --verbose");

        let err = parse_args(&cfg, &argv(&["--seed"])).unwrap_err();
        assert_eq!(err.to_string(), "--seed needs a value");
    }

    #[test]
    fn test_parse_distribution_and_start_in() {
        let cfg = GameConfig::default();
        let args =
            parse_args(&cfg, &argv(&["--char-distribution", "3, 1,2", "--start-in", "0.5"])).unwrap();
        assert_eq!(args.distribution, vec![3, 1, 2]);
        assert_eq!(args.start_in, Some(0.5));
        assert_eq!(args.seed, 42);
    }

    fn runner() -> MatchRunner {
        let catalog = ScenarioCatalog::from_texts([
            (Category::DirectKill, vec!["[Character A] outdraws [Character B]."]),
            (Category::Story, vec!["[Character A] whistles."]),
        ]);
        MatchRunner::new(Arc::new(GameConfig::default()), Arc::new(catalog))
    }

    fn sim_args() -> SimArgs {
        SimArgs {
            distribution: vec![2, 1, 1],
            entry_fee: 1.0,
            kill_award_rate: 0.1,
            seed: 9,
            db: None,
            start_in: None,
        }
    }

    #[test]
    fn test_winner_line_names_character_and_player() {
        let report = run(&runner(), &sim_args()).unwrap();
        let winner = report.outcome.winner.clone().unwrap();
        let line = winner_line(&report);
        assert!(line.starts_with(&format!("Winner: {} (player {})", winner.name, winner.player_id)));
        assert!(line.contains(&winner.name));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scheduled_simulation_matches_direct_run() {
        let direct = run(&runner(), &sim_args()).unwrap();
        let scheduled = run_scheduled(runner(), sim_args(), 0.0).await.unwrap();
        assert_eq!(scheduled.outcome.log, direct.outcome.log);
        assert_eq!(scheduled.payout, direct.payout);
    }
}
