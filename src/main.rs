//! Walk one simulated company from incorporation to exit and print the cap table after
//! each milestone as JSON.
//!
//! SEED picks the term sheets; EXIT_VALUE (default 500M) sets the acquisition price.

use anyhow::Result;
use captable::funding::{self, CompanyMetrics, RoundStage};
use captable::ledger::HolderKind;
use captable::logging::{self, Domain, Level};
use captable::portfolio::PortfolioPosition;
use captable::vesting::VestingSchedule;
use captable::waterfall::{self, ExitEvent, ExitKind};
use captable::{EngineConfig, HolderId, MicroPct, OwnershipLedger};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn print_table(label: &str, ledger: &OwnershipLedger) {
    let rows: Vec<_> = ledger
        .entries()
        .iter()
        .map(|e| json!({ "holder": e.id, "kind": e.kind.as_str(), "pct": e.equity.as_percent() }))
        .collect();
    println!("{}", json!({ "milestone": label, "month": ledger.month(), "entries": rows }));
}

fn main() -> Result<()> {
    let cfg = EngineConfig::from_env();
    let mut rng = StdRng::seed_from_u64(env_or("SEED", 7u64));
    let exit_value: f64 = env_or("EXIT_VALUE", 500_000_000.0);
    let pct = |p: f64| MicroPct::from_percent(p).unwrap_or(MicroPct::ZERO);

    let mut ledger = OwnershipLedger::new("demo-co", "alice");
    ledger.add_cofounder("bob".into(), pct(30.0), Some(VestingSchedule::standard(pct(30.0), &cfg)))?;
    ledger.expand_pool(pct(10.0))?;
    ledger.grant("cto".into(), HolderKind::Executive, pct(3.0), Some(VestingSchedule::standard(pct(3.0), &cfg)))?;
    ledger.grant("advisor".into(), HolderKind::Advisor, pct(0.5), None)?;
    print_table("incorporated", &ledger);

    let mut positions: Vec<PortfolioPosition> = Vec::new();
    let mut metrics = CompanyMetrics {
        monthly_revenue: 20_000.0,
        growth_rate: 0.12,
    };
    for stage in [RoundStage::Seed, RoundStage::SeriesA, RoundStage::SeriesB] {
        for _ in 0..12 {
            ledger.advance_month();
        }
        metrics.monthly_revenue *= 1.0 + metrics.growth_rate * 12.0;
        let sheets = funding::open_term_sheets(&ledger, stage, &metrics, &mut rng, &cfg)?;
        let Some(sheet) = sheets.first() else {
            continue;
        };
        let lead = HolderId::new(format!("{}-lead", stage.as_str().to_lowercase().replace(' ', "-")));
        let outcome = funding::apply_round(&mut ledger, sheet, &[lead.clone()], &[], &mut positions)?;
        positions.push(PortfolioPosition::open(&ledger, &lead)?);
        logging::log(
            Level::Info,
            Domain::Funding,
            "demo_round",
            logging::obj(&[
                ("stage", logging::v_str(stage.as_str())),
                ("style", logging::v_str(sheet.style.label())),
                ("issued_pct", logging::v_num(outcome.round.equity_issued().as_percent())),
            ]),
        );
        print_table(stage.as_str(), &ledger);
    }

    let exit = ExitEvent {
        kind: ExitKind::Acquisition,
        total_consideration: exit_value,
        month: ledger.month(),
    };
    let outcome = waterfall::distribute(&ledger.snapshot(), &exit)?;
    for (holder, release) in outcome.releases(&cfg) {
        println!(
            "{}",
            json!({ "holder": holder, "immediate": release.immediate, "deferred": release.deferred })
        );
    }
    for position in &positions {
        println!(
            "{}",
            json!({
                "investor": position.holder,
                "dilution_pts": position.total_dilution(),
                "multiple": position.multiple(outcome.payout_of(&position.holder)),
            })
        );
    }
    Ok(())
}
