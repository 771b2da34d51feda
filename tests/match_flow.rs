//! End-to-end: scheduled start → engine → settlement → SQLite read-back.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use coinclash::config::GameConfig;
use coinclash::model::{Character, Match, MatchStatus};
use coinclash::payout::{check_conservation, PayoutKind};
use coinclash::repo::MatchRepo;
use coinclash::runner::{build_roster, resettle, MatchRunner};
use coinclash::scenario::{Category, ScenarioCatalog};
use coinclash::scheduler::TaskScheduler;
use coinclash::storage::SqliteStore;

fn runner() -> MatchRunner {
    let catalog = ScenarioCatalog::from_texts([
        (Category::DirectKill, vec!["[Character A] outdraws [Character B]."]),
        (Category::SelfInflicted, vec!["[Character A] wanders into quicksand."]),
        (Category::Environmental, vec!["A rockslide buries [Character A]."]),
        (Category::Group, vec!["[Character A] and [Character B] drink from the bad well."]),
        (Category::Story, vec!["[Character A] sharpens a knife."]),
    ]);
    MatchRunner::new(Arc::new(GameConfig::default()), Arc::new(catalog))
}

fn seeded_store(roster: &[Character]) -> SqliteStore {
    let mut store = SqliteStore::in_memory().unwrap();
    store.init().unwrap();
    store.create_match(&Match::new(1, 1.0, 0.1)).unwrap();
    store.add_participants(1, roster).unwrap();
    store
}

#[test]
fn sqlite_match_settles_and_replays() {
    let roster = build_roster(&[3, 1, 2, 1]);
    let mut store = seeded_store(&roster);
    let r = runner();

    let report = r.start_if_pending(&mut store, 1, &roster, Some(2024)).unwrap().unwrap();
    store.record_payouts(1, &report.pending).unwrap();

    let m = store.get_match(1).unwrap().unwrap();
    assert_eq!(m.status, MatchStatus::Completed);
    let winner = report.outcome.winner.as_ref().unwrap();
    assert_eq!(m.winner_character_id, Some(winner.id));

    // stored liveness mirrors the outcome
    let stored = store.participants(1).unwrap();
    assert_eq!(stored.iter().filter(|c| c.is_alive).count(), 1);
    assert!(stored.iter().any(|c| c.id == winner.id && c.is_alive));

    assert_eq!(store.events(1).unwrap(), report.outcome.events);
    check_conservation(&report.payout, 1e-9).unwrap();
    assert_eq!(resettle(&store, r.config(), 1).unwrap(), report.payout);

    let lines = store.pending_payouts(1).unwrap();
    assert_eq!(lines, report.pending);
    assert!(lines
        .iter()
        .any(|p| p.kind == PayoutKind::Winner && p.player_id == winner.player_id));

    // a second start is refused
    assert!(r.start_if_pending(&mut store, 1, &roster, Some(2024)).unwrap().is_none());
}

#[tokio::test]
async fn scheduled_start_runs_pending_match() {
    let roster = build_roster(&[1, 1, 1, 1]);
    let store = Arc::new(Mutex::new(seeded_store(&roster)));
    let r = runner();
    let sched = TaskScheduler::new(Duration::from_millis(10));

    let task_store = Arc::clone(&store);
    let task_roster = roster.clone();
    let task_id = sched
        .schedule_match_start(1, Utc::now(), move |match_id| {
            let mut s = task_store.lock().map_err(|_| anyhow::anyhow!("store poisoned"))?;
            Ok(r.start_if_pending(&mut *s, match_id, &task_roster, Some(5))?.is_some())
        })
        .unwrap();
    assert!(sched.is_scheduled(&task_id));

    sched.start().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    sched.stop().await;

    assert!(!sched.is_scheduled(&task_id));
    let s = store.lock().unwrap();
    let m = s.get_match(1).unwrap().unwrap();
    assert_eq!(m.status, MatchStatus::Completed);
    assert!(!s.events(1).unwrap().is_empty());
}

#[test]
fn bundled_scenarios_run_a_full_match() {
    let catalog = ScenarioCatalog::load_dir(concat!(env!("CARGO_MANIFEST_DIR"), "/scenarios"));
    for category in Category::ALL {
        assert!(!catalog.get(category).is_empty(), "{}", category.as_str());
    }
    let r = MatchRunner::new(Arc::new(GameConfig::default()), Arc::new(catalog));
    let roster = build_roster(&[2, 2, 1, 3]);
    let mut store = seeded_store(&roster);
    let report = r.run_match(&mut store, 1, &roster, Some(11)).unwrap();
    assert!(report.outcome.winner.is_some());
    assert!(report.outcome.log[0].starts_with("Match 1 Started with 8 participants."));
}
