//! Structured logging for simulation runs.
//!
//! Every record is a single JSON line carrying the process run id, a
//! monotonically increasing sequence number, a level, a domain and a free-form
//! `data` object. Records are written to `LOG_DIR/<run_id>/` and echoed to
//! stdout.
//!
//! Filtering:
//! - `LOG_LEVEL` sets the minimum level (default `info`)
//! - `LOG_DOMAINS` is a comma-separated list of enabled domains, or `all`

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

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
    Pool,     // Reserve changes, injections
    Action,   // Stake/unstake execution and rejections
    Emission, // Emission shares, supply growth, root weight
    Dividend, // Dividend accrual
    Runner,   // Block loop progress, cancellation
    Storage,  // SQLite persistence
    System,   // Startup, shutdown
    Audit,    // Snapshot hashes for replay comparison
    Profile,  // Performance profiling
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Pool => "pool",
            Domain::Action => "action",
            Domain::Emission => "emission",
            Domain::Dividend => "dividend",
            Domain::Runner => "runner",
            Domain::Storage => "storage",
            Domain::System => "system",
            Domain::Audit => "audit",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
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
    metrics: Option<Mutex<BufWriter<File>>>,
}

fn open_sink(path: PathBuf) -> Option<Mutex<BufWriter<File>>> {
    match File::create(&path) {
        Ok(file) => Some(Mutex::new(BufWriter::new(file))),
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
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "user_data/logs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
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
            metrics: open_sink(run_dir.join("metrics.jsonl")),
            run_id,
        }
    })
}

/// Identifier of the current process' log context.
pub fn log_run_id() -> &'static str {
    &ensure_run_context().run_id
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["sim_id", "block", "pool_id", "participant_id", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    if let Some(writer) = writer {
        if let Ok(mut w) = writer.lock() {
            let _ = writeln!(w, "{}", line);
        }
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
    if event.starts_with("metrics.") {
        write_line(&ctx.metrics, &line);
    }
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    println!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_action(
    block: u64,
    participant_id: u32,
    pool_id: u32,
    kind: &str,
    amount_in: f64,
    amount_out: f64,
) {
    log(
        Level::Debug,
        Domain::Action,
        "action_applied",
        obj(&[
            ("block", json!(block)),
            ("participant_id", json!(participant_id)),
            ("pool_id", json!(pool_id)),
            ("kind", v_str(kind)),
            ("amount_in", v_num(amount_in)),
            ("amount_out", v_num(amount_out)),
        ]),
    );
}

pub fn log_action_rejected(block: u64, participant_id: u32, pool_id: u32, reason: &str) {
    log(
        Level::Warn,
        Domain::Action,
        "action_rejected",
        obj(&[
            ("block", json!(block)),
            ("participant_id", json!(participant_id)),
            ("pool_id", json!(pool_id)),
            ("msg", v_str(reason)),
        ]),
    );
}

pub fn log_block_step(
    block: u64,
    tao_supply: f64,
    sum_prices: f64,
    root_weight: f64,
    tao_injected: f64,
    alpha_injected: f64,
) {
    log(
        Level::Trace,
        Domain::Emission,
        "block_step",
        obj(&[
            ("block", json!(block)),
            ("tao_supply", v_num(tao_supply)),
            ("sum_prices", v_num(sum_prices)),
            ("root_weight", v_num(root_weight)),
            ("tao_injected", v_num(tao_injected)),
            ("alpha_injected", v_num(alpha_injected)),
        ]),
    );
}

pub fn log_snapshot(sim_id: &str, block: u64, state_hash: &str) {
    log(
        Level::Debug,
        Domain::Audit,
        "snapshot",
        obj(&[
            ("sim_id", v_str(sim_id)),
            ("block", json!(block)),
            ("state_hash", v_str(state_hash)),
        ]),
    );
}

pub fn log_run_status(sim_id: &str, status: &str, block: Option<u64>, msg: &str) {
    let level = match status {
        "failed" => Level::Error,
        "interrupted" => Level::Warn,
        _ => Level::Info,
    };
    log(
        level,
        Domain::Runner,
        "run_status",
        obj(&[
            ("sim_id", v_str(sim_id)),
            ("status", v_str(status)),
            ("block", block.map(|b| json!(b)).unwrap_or(Value::Null)),
            ("msg", v_str(msg)),
        ]),
    );
}

pub fn log_invariant_violation(block: u64, pool_id: u32, msg: &str) {
    log(
        Level::Warn,
        Domain::Pool,
        "invariant_violation",
        obj(&[
            ("block", json!(block)),
            ("pool_id", json!(pool_id)),
            ("msg", v_str(msg)),
        ]),
    );
}

/// Run-level totals, routed to metrics.jsonl.
pub fn log_run_metrics(sim_id: &str, blocks: u64, snapshots: u64, applied: u64, rejected: u64) {
    log(
        Level::Info,
        Domain::Runner,
        "metrics.run",
        obj(&[
            ("sim_id", v_str(sim_id)),
            ("blocks", json!(blocks)),
            ("snapshots", json!(snapshots)),
            ("actions_applied", json!(applied)),
            ("actions_rejected", json!(rejected)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

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
// Profiling Scope
// =============================================================================

/// Profiling scope that emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
}

impl ProfileScope {
    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        Self {
            label,
            context: Some(obj(fields)),
            started: Instant::now(),
        }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}
