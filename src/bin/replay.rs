//! Replay a JSON-lines history of `CapEvent`s from stdin against a fresh ledger.
//!
//! COMPANY and FOUNDER name the starting ledger (defaults match the fuzz driver's seed 42).
//! One result line per event goes to stdout; the final snapshot goes to SNAPSHOT_OUT when set.

use std::env;
use std::io::{self, BufRead};

use anyhow::{bail, Context, Result};
use captable::engine::{reduce, CapEvent, CompanyState};
use captable::OwnershipLedger;
use serde_json::json;

fn main() -> Result<()> {
    let company = env::var("COMPANY").unwrap_or_else(|_| "fuzz-42".to_string());
    let founder = env::var("FOUNDER").unwrap_or_else(|_| "founder".to_string());
    let mut state = CompanyState::new(OwnershipLedger::new(company, founder.as_str()));

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: CapEvent = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(err) => {
                eprintln!("bad event json: {}", err);
                continue;
            }
        };
        let name = event.name();
        let out = reduce(&mut state, event);
        let result = match &out.outcome {
            Ok(outcome) => json!({ "ok": outcome }),
            Err(e) if e.is_fatal() => bail!("event {} ({}): {}", out.seq, name, e),
            Err(e) => json!({ "rejected": e.kind(), "msg": e.to_string() }),
        };
        println!(
            "{}",
            json!({
                "seq": out.seq,
                "event": name,
                "digest": out.digest,
                "result": result,
            })
        );
    }

    if let Ok(path) = env::var("SNAPSHOT_OUT") {
        let body = serde_json::to_string_pretty(&state.ledger.snapshot())?;
        std::fs::write(&path, body).with_context(|| format!("writing {}", path))?;
    }
    Ok(())
}
