use std::collections::HashSet;

use crate::error::EquityError;
use crate::ledger::{CapTableEntry, HolderKind, LedgerSnapshot};
use crate::units::MicroPct;
use crate::vesting;

#[derive(Debug, Clone)]
pub struct InvariantViolation {
    pub msg: String,
}

impl From<InvariantViolation> for EquityError {
    fn from(v: InvariantViolation) -> Self {
        EquityError::LedgerInvariantViolation { detail: v.msg }
    }
}

fn violation(msg: String) -> Result<(), InvariantViolation> {
    Err(InvariantViolation { msg })
}

/// Active entries, pool included, add up to exactly 100%.
pub fn assert_sum_invariant(entries: &[CapTableEntry]) -> Result<(), InvariantViolation> {
    let total: u128 = entries.iter().map(|e| e.equity.units() as u128).sum();
    if total != MicroPct::ONE_HUNDRED.units() as u128 {
        return violation(format!(
            "ownership sums to {} units, expected {}",
            total,
            MicroPct::ONE_HUNDRED.units()
        ));
    }
    Ok(())
}

pub fn assert_entry_invariants(entry: &CapTableEntry) -> Result<(), InvariantViolation> {
    if entry.equity > MicroPct::ONE_HUNDRED {
        return violation(format!("{} holds {} (> 100%)", entry.id, entry.equity));
    }
    if let Some(schedule) = &entry.vesting {
        if schedule.vested_months_elapsed > schedule.total_vesting_months {
            return violation(format!(
                "{} vesting elapsed {} past term {}",
                entry.id, schedule.vested_months_elapsed, schedule.total_vesting_months
            ));
        }
        if schedule.cliff_months > schedule.total_vesting_months {
            return violation(format!("{} cliff longer than term", entry.id));
        }
        let unvested = vesting::unvested_percent(schedule);
        if unvested > entry.equity {
            return violation(format!(
                "{} unvested {} exceeds equity {}",
                entry.id, unvested, entry.equity
            ));
        }
    }
    if let HolderKind::Investor(stake) = &entry.kind {
        if !stake.amount_invested.is_finite() || stake.amount_invested < 0.0 {
            return violation(format!("{} invested amount is not a dollar value", entry.id));
        }
    }
    Ok(())
}

/// Exactly one pool entry and no duplicate holder ids.
pub fn assert_structure(entries: &[CapTableEntry]) -> Result<(), InvariantViolation> {
    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert(&entry.id) {
            return violation(format!("duplicate holder {}", entry.id));
        }
    }
    let pools = entries.iter().filter(|e| e.is_pool()).count();
    if pools != 1 {
        return violation(format!("expected one pool entry, found {}", pools));
    }
    Ok(())
}

pub fn assert_ledger_invariants(entries: &[CapTableEntry]) -> Result<(), InvariantViolation> {
    assert_structure(entries)?;
    for entry in entries {
        assert_entry_invariants(entry)?;
    }
    assert_sum_invariant(entries)
}

pub fn assert_snapshot_invariants(snapshot: &LedgerSnapshot) -> Result<(), InvariantViolation> {
    assert_ledger_invariants(&snapshot.entries)?;
    if !snapshot.entries.iter().any(|e| e.id == snapshot.founder) {
        return violation(format!("primary founder {} missing", snapshot.founder));
    }
    if !snapshot.share_count.is_finite() || snapshot.share_count <= 0.0 {
        return violation(format!("share count {} not positive", snapshot.share_count));
    }
    for round in &snapshot.rounds {
        if !(round.pre_money > 0.0 && round.amount_raised > 0.0) {
            return violation(format!("{} round has non-positive terms", round.stage));
        }
    }
    Ok(())
}

/// Vesting never runs backwards between two states of the same ledger.
pub fn assert_vesting_monotone(
    before: &LedgerSnapshot,
    after: &LedgerSnapshot,
) -> Result<(), InvariantViolation> {
    for prev in &before.entries {
        let Some(old) = prev.vesting.as_ref() else {
            continue;
        };
        let Some(next) = after.entry(&prev.id).and_then(|e| e.vesting.as_ref()) else {
            continue;
        };
        if next.vested_months_elapsed < old.vested_months_elapsed {
            return violation(format!(
                "{} vesting went from {} to {} months",
                prev.id, old.vested_months_elapsed, next.vested_months_elapsed
            ));
        }
    }
    Ok(())
}

/// Payouts add up to the consideration within `tolerance` dollars.
pub fn assert_payout_conservation(
    payouts: &[f64],
    consideration: f64,
    tolerance: f64,
) -> Result<(), InvariantViolation> {
    if payouts.iter().any(|p| p.is_nan() || *p < -tolerance) {
        return violation("negative or NaN payout".to_string());
    }
    let total: f64 = payouts.iter().sum();
    if (total - consideration).abs() > tolerance {
        return violation(format!(
            "payouts sum to {} but consideration is {}",
            total, consideration
        ));
    }
    Ok(())
}
