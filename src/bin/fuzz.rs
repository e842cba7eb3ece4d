//! Seeded random histories driven through the reducer, checking invariants after every
//! step. Events are printed as JSON lines so a failing run can be piped into `replay`.
//!
//! SEED (default 42) and EVENTS (default 200) come from the environment.

use std::env;

use anyhow::{bail, Result};
use captable::engine::{reduce, CapEvent, CompanyState, Outcome};
use captable::funding::{self, CompanyMetrics, ProRataElection, RoundStage};
use captable::ledger::{HolderKind, OwnershipLedger, POOL_ID};
use captable::terms::InvestmentTerms;
use captable::verify::invariants;
use captable::vesting::VestingSchedule;
use captable::waterfall::{ExitEvent, ExitKind};
use captable::{EngineConfig, HolderId, MicroPct};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn pct<R: Rng>(rng: &mut R, lo: f64, hi: f64) -> MicroPct {
    MicroPct::from_percent(rng.gen_range(lo..hi)).unwrap_or(MicroPct::ZERO)
}

/// Any non-pool holder other than the primary founder.
fn pick_holder<R: Rng>(rng: &mut R, ledger: &OwnershipLedger) -> Option<HolderId> {
    let ids: Vec<HolderId> = ledger
        .entries()
        .iter()
        .filter(|e| e.id.as_str() != POOL_ID && &e.id != ledger.founder())
        .map(|e| e.id.clone())
        .collect();
    if ids.is_empty() {
        return None;
    }
    Some(ids[rng.gen_range(0..ids.len())].clone())
}

fn next_stage(ledger: &OwnershipLedger) -> Option<RoundStage> {
    RoundStage::ALL
        .into_iter()
        .find(|s| funding::check_sequence(ledger, *s).is_ok())
}

fn next_event(rng: &mut StdRng, ledger: &OwnershipLedger, cfg: &EngineConfig, n: u64) -> CapEvent {
    let roll = rng.gen_range(0..100);
    if roll < 12 {
        CapEvent::ExpandPool {
            percent: pct(rng, 1.0, 6.0),
        }
    } else if roll < 30 {
        let kind = match rng.gen_range(0..3) {
            0 => HolderKind::Employee,
            1 => HolderKind::Advisor,
            _ => HolderKind::Executive,
        };
        let percent = pct(rng, 0.1, 2.0);
        let vesting = rng.gen_bool(0.7).then(|| VestingSchedule::standard(percent, cfg));
        CapEvent::Grant {
            holder: HolderId::new(format!("{}-{}", kind.as_str(), n)),
            kind,
            percent,
            vesting,
        }
    } else if roll < 43 {
        CapEvent::AdvanceMonth
    } else if roll < 45 {
        CapEvent::AddBoardSeat {
            holder: HolderId::new(format!("director-{}", n)),
        }
    } else if roll < 52 {
        CapEvent::IssueSafe {
            holder: HolderId::new(format!("angel-{}", n)),
            amount: rng.gen_range(50_000.0..500_000.0_f64).round(),
            terms: InvestmentTerms::safe(cfg.default_safe_discount, rng.gen_range(0.0..20_000_000.0_f64).round()),
        }
    } else if roll < 62 {
        let Some(stage) = next_stage(ledger) else {
            return CapEvent::AdvanceMonth;
        };
        let metrics = CompanyMetrics {
            monthly_revenue: rng.gen_range(0.0..2_000_000.0),
            growth_rate: rng.gen_range(-0.05..0.3),
        };
        let mut sheets = funding::generate_term_sheets(stage, &metrics, rng, cfg);
        let mut sheet = sheets.swap_remove(rng.gen_range(0..sheets.len()));
        // Occasionally a down round, to exercise anti-dilution.
        if rng.gen_bool(0.2) {
            sheet.pre_money = (sheet.pre_money * 0.05).round();
            sheet.amount = (sheet.amount * 0.05).round();
            sheet.terms.anti_dilution = true;
        }
        sheet.terms.pro_rata_rights = rng.gen_bool(0.5);
        let elections = ledger
            .entries()
            .iter()
            .filter_map(|e| {
                let amount = funding::pro_rata_allocation(ledger, &e.id, &sheet).ok()?;
                Some(ProRataElection {
                    holder: e.id.clone(),
                    amount,
                })
            })
            .take(1)
            .collect();
        CapEvent::CloseRound {
            sheet,
            investors: vec![HolderId::new(format!("fund-{}", n))],
            elections,
        }
    } else if roll < 72 {
        match pick_holder(rng, ledger) {
            Some(holder) => CapEvent::Terminate {
                holder,
                buyback_valuation: rng.gen_bool(0.5).then(|| rng.gen_range(1e6..5e7)),
            },
            None => CapEvent::AdvanceMonth,
        }
    } else if roll < 80 {
        match pick_holder(rng, ledger) {
            Some(holder) => CapEvent::BuyBack {
                holder,
                percent: pct(rng, 0.05, 1.0),
                valuation: rng.gen_range(1e6..5e7),
            },
            None => CapEvent::AdvanceMonth,
        }
    } else if roll < 90 {
        CapEvent::SecondarySale {
            seller: ledger.founder().clone(),
            buyer: HolderId::new(format!("buyer-{}", n)),
            percent: pct(rng, 0.1, 3.0),
            valuation: rng.gen_range(1e6..5e8),
        }
    } else {
        let kind = match rng.gen_range(0..3) {
            0 => ExitKind::Ipo,
            1 => ExitKind::Acquisition,
            _ => ExitKind::Secondary,
        };
        CapEvent::Exit(ExitEvent {
            kind,
            total_consideration: rng.gen_range(0.0..2e9),
            month: ledger.month(),
        })
    }
}

fn main() -> Result<()> {
    let seed = env::var("SEED")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(42u64);
    let events = env::var("EVENTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(200u64);
    let cfg = EngineConfig::from_env();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut state = CompanyState::new(OwnershipLedger::new(format!("fuzz-{}", seed), "founder"));
    let mut rejected = 0u64;

    for n in 0..events {
        let event = next_event(&mut rng, &state.ledger, &cfg, n);
        println!("{}", serde_json::to_string(&event)?);
        let before = state.ledger.snapshot();
        let out = reduce(&mut state, event);
        let after = state.ledger.snapshot();

        if let Err(v) = invariants::assert_snapshot_invariants(&after) {
            bail!("seed {} step {}: {}", seed, n, v.msg);
        }
        if let Err(v) = invariants::assert_vesting_monotone(&before, &after) {
            bail!("seed {} step {}: {}", seed, n, v.msg);
        }
        match out.outcome {
            Ok(Outcome::Exited(exit)) => {
                let totals: Vec<f64> = exit.payouts.iter().map(|p| p.total()).collect();
                let tolerance = cfg.money_epsilon * exit.event.total_consideration.max(1.0);
                if let Err(v) =
                    invariants::assert_payout_conservation(&totals, exit.event.total_consideration, tolerance)
                {
                    bail!("seed {} step {}: {}", seed, n, v.msg);
                }
            }
            Ok(_) => {}
            Err(e) if e.is_fatal() => bail!("seed {} step {}: {}", seed, n, e),
            Err(_) => {
                rejected += 1;
                if before != after {
                    bail!("seed {} step {}: rejected event changed the ledger", seed, n);
                }
            }
        }
    }

    eprintln!(
        "{}",
        serde_json::json!({
            "seed": seed,
            "events": events,
            "rejected": rejected,
            "digest": state.digest(),
        })
    );
    Ok(())
}
