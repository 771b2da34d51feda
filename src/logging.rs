//! Structured logging for match simulation, settlement and scheduling.
//!
//! Design goals:
//! 1. Multi-level granularity (TRACE → FATAL)
//! 2. Domain-specific categories for filtering
//! 3. Replay/audit support via sequence numbers and event-log digests
//! 4. One JSON object per line, readable by the same tooling as the run files

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Match,     // Match lifecycle, start/end, winner
    Round,     // Round boundaries, primary/bonus rolls
    Event,     // Scenario events written to the event log
    Pool,      // Alive/dead pool moves
    Payout,    // Settlement math
    Scenario,  // Catalog loading
    Scheduler, // Delayed task lifecycle
    Config,    // Configuration loading and validation
    Storage,   // SQLite persistence
    System,    // Startup, shutdown
    Audit,     // Replay/audit trail entries
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Match => "match",
            Domain::Round => "round",
            Domain::Event => "event",
            Domain::Pool => "pool",
            Domain::Payout => "payout",
            Domain::Scenario => "scenario",
            Domain::Scheduler => "scheduler",
            Domain::Config => "config",
            Domain::Storage => "storage",
            Domain::System => "system",
            Domain::Audit => "audit",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Sequence counter for ordering
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Option<Mutex<BufWriter<File>>>,
    trace: Option<Mutex<BufWriter<File>>>,
}

fn open_sink(path: PathBuf) -> Option<Mutex<BufWriter<File>>> {
    match File::create(&path) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            None
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));

        // File sinks are opt-in; stdout always receives the record.
        let Ok(base) = std::env::var("LOG_DIR") else {
            return RunContext { run_id, events: None, trace: None };
        };
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
            return RunContext { run_id, events: None, trace: None };
        }

        let _ = std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );

        RunContext {
            events: open_sink(run_dir.join("events.jsonl")),
            trace: open_sink(run_dir.join("trace.jsonl")),
            run_id,
        }
    })
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["match_id", "task_id", "round", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    let Some(writer) = writer else { return };
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }

    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    println!("{}", line);
}

// =============================================================================
// Match event logs
// =============================================================================

/// Log a scenario event as it is appended to the match event log
pub fn log_event_record(
    match_id: i64,
    round: u32,
    event_type: &str,
    scenario_id: &str,
    text: &str,
    participants: &[i64],
) {
    log(
        Level::Info,
        Domain::Event,
        "event_logged",
        obj(&[
            ("match_id", json!(match_id)),
            ("round", json!(round)),
            ("event_type", v_str(event_type)),
            ("scenario_id", v_str(scenario_id)),
            ("scenario_text", v_str(text)),
            ("participants", json!(participants)),
        ]),
    );
}

/// Log a non-fatal event skip
pub fn log_skip(match_id: i64, round: u32, event_type: &str, reason: &str) {
    log(
        Level::Info,
        Domain::Event,
        "event_skipped",
        obj(&[
            ("match_id", json!(match_id)),
            ("round", json!(round)),
            ("event_type", v_str(event_type)),
            ("reason", v_str(reason)),
        ]),
    );
}

// =============================================================================
// Audit Trail Logs
// =============================================================================

/// Log an audit entry for replay verification
pub fn log_audit(match_id: i64, seed: Option<u64>, event_count: usize, log_digest: &str) {
    log(
        Level::Info,
        Domain::Audit,
        "match_digest",
        obj(&[
            ("match_id", json!(match_id)),
            ("seed", seed.map(|s| json!(s)).unwrap_or(Value::Null)),
            ("event_count", json!(event_count)),
            ("log_digest", v_str(log_digest)),
        ]),
    );
}

/// Log a computed settlement
pub fn log_payout(
    match_id: i64,
    total_pool: f64,
    protocol_fee: f64,
    kill_awards: f64,
    winner_payout: f64,
) {
    log(
        Level::Info,
        Domain::Payout,
        "payout_calculated",
        obj(&[
            ("match_id", json!(match_id)),
            ("total_pool", v_num(total_pool)),
            ("protocol_fee", v_num(protocol_fee)),
            ("kill_awards", v_num(kill_awards)),
            ("winner_payout", v_num(winner_payout)),
        ]),
    );
}

// =============================================================================
// Helpers
// =============================================================================

/// SHA-256 over newline-terminated lines, hex encoded.
pub fn digest_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_digest_deterministic() {
        let a = digest_lines(["round 1", "round 2"]);
        let b = digest_lines(["round 1", "round 2"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_digest_is_order_sensitive() {
        let a = digest_lines(["x", "y"]);
        let b = digest_lines(["y", "x"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_split_fields_promotes_ids() {
        let (top, data) = split_fields(obj(&[
            ("match_id", json!(7)),
            ("round", json!(3)),
            ("alive", json!(5)),
        ]));
        assert_eq!(top.get("match_id").unwrap(), 7);
        assert_eq!(top.get("round").unwrap(), 3);
        assert!(data.contains_key("alive"));
        assert!(!data.contains_key("match_id"));
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }
}
