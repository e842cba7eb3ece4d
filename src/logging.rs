//! Structured logging for ledger mutations.
//!
//! Every record is one JSON line on stderr with a monotonically increasing `seq`, so a
//! session's equity history can be reconstructed from the log alone. The engine never
//! opens files; the embedding application decides where stderr goes.
//!
//! - `CAPTABLE_LOG_LEVEL`: trace | debug | info | warn | error | fatal (default warn)
//! - `CAPTABLE_LOG_DOMAINS`: comma-separated domains or `all` (default all)

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

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
        match std::env::var("CAPTABLE_LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Warn,
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
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Ledger,    // Grants, buybacks, pool changes, invariant repair
    Vesting,   // Monthly advance, cliffs, forfeiture
    Funding,   // Term sheets, rounds, pro-rata, conversions
    Terms,     // Anti-dilution, SAFE pricing
    Waterfall, // Exit distribution
    Audit,     // Reducer digests for replay
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Ledger => "ledger",
            Domain::Vesting => "vesting",
            Domain::Funding => "funding",
            Domain::Terms => "terms",
            Domain::Waterfall => "waterfall",
            Domain::Audit => "audit",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("CAPTABLE_LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// =============================================================================
// Core logging functions
// =============================================================================

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    eprintln!("{}", render(level, domain, event, fields));
}

fn render(level: Level, domain: Domain, event: &str, mut fields: Map<String, Value>) -> String {
    let company = fields.remove("company").unwrap_or(Value::Null);
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(domain.as_str()));
    entry.insert("event".to_string(), json!(event));
    entry.insert("company".to_string(), company);
    entry.insert("data".to_string(), Value::Object(fields));
    Value::Object(entry).to_string()
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_mutation(company: &str, op: &str, holder: &str, amount_pct: f64) {
    log(
        Level::Info,
        Domain::Ledger,
        op,
        obj(&[
            ("company", v_str(company)),
            ("holder", v_str(holder)),
            ("pct", v_num(amount_pct)),
        ]),
    );
}

pub fn log_invariant_repair(company: &str, residue_units: i64, absorbed_by: &str) {
    log(
        Level::Warn,
        Domain::Ledger,
        "invariant_repair",
        obj(&[
            ("company", v_str(company)),
            ("residue_units", json!(residue_units)),
            ("absorbed_by", v_str(absorbed_by)),
        ]),
    );
}

pub fn log_round(company: &str, stage: &str, amount: f64, pre_money: f64, issued_pct: f64) {
    log(
        Level::Info,
        Domain::Funding,
        "round_closed",
        obj(&[
            ("company", v_str(company)),
            ("stage", v_str(stage)),
            ("amount", v_num(amount)),
            ("pre_money", v_num(pre_money)),
            ("issued_pct", v_num(issued_pct)),
        ]),
    );
}

pub fn log_rejected(company: &str, op: &str, kind: &str, msg: &str) {
    log(
        Level::Warn,
        Domain::Ledger,
        "rejected",
        obj(&[
            ("company", v_str(company)),
            ("op", v_str(op)),
            ("kind", v_str(kind)),
            ("msg", v_str(msg)),
        ]),
    );
}

pub fn log_audit(company: &str, seq: u64, event: &str, digest: &str) {
    log(
        Level::Debug,
        Domain::Audit,
        "applied",
        obj(&[
            ("company", v_str(company)),
            ("event_seq", json!(seq)),
            ("cap_event", v_str(event)),
            ("digest", v_str(digest)),
        ]),
    );
}

// =============================================================================
// Field helpers
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
