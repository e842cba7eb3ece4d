//! Time-based equity grants.
//!
//! A grant sits on the ledger at its full nominal size from day one. Vesting only decides
//! how much of it the holder could walk away with: nothing before the cliff, then a
//! straight line to the full grant at `total_vesting_months`.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::ledger::HolderId;
use crate::units::MicroPct;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingSchedule {
    pub cliff_months: u32,
    pub total_vesting_months: u32,
    pub vested_months_elapsed: u32,
    /// Nominal size of the time-based grant; scales with the entry on dilution
    pub grant: MicroPct,
}

impl VestingSchedule {
    pub fn new(grant: MicroPct, cliff_months: u32, total_vesting_months: u32) -> Self {
        let total = total_vesting_months.max(1);
        Self {
            cliff_months: cliff_months.min(total),
            total_vesting_months: total,
            vested_months_elapsed: 0,
            grant,
        }
    }

    /// 1-year cliff, 4-year term unless overridden in config.
    pub fn standard(grant: MicroPct, cfg: &EngineConfig) -> Self {
        Self::new(grant, cfg.vesting_cliff_months, cfg.vesting_total_months)
    }

    pub fn cliff_reached(&self) -> bool {
        self.vested_months_elapsed >= self.cliff_months
    }

    pub fn is_fully_vested(&self) -> bool {
        self.vested_months_elapsed >= self.total_vesting_months
    }

    pub(crate) fn scale(&mut self, num: u64, den: u64) {
        self.grant = self.grant.scale(num, den);
    }

    /// Fold another grant into this one, keeping the existing clock.
    pub(crate) fn merge(&mut self, extra: MicroPct) {
        self.grant += extra;
    }

    /// Shrink the grant so `amount` less equity is unvested, keeping the clock.
    pub(crate) fn reduce_unvested(&mut self, amount: MicroPct) {
        if amount.is_zero() || self.is_fully_vested() {
            return;
        }
        let remaining = (self.total_vesting_months - self.vested_months_elapsed) as u64;
        let cut = if self.cliff_reached() {
            amount.scale_ceil(self.total_vesting_months as u64, remaining)
        } else {
            amount
        };
        self.grant = self.grant.saturating_sub(cut);
    }

    /// Keep the unvested part within what the holder actually owns. Floors in
    /// `scale` can leave it one unit above the entry after a dilution.
    pub(crate) fn clamp_to(&mut self, equity: MicroPct) {
        let unvested = unvested_percent(self);
        if unvested <= equity {
            return;
        }
        self.grant = self.grant.saturating_sub(unvested.saturating_sub(equity));
        if unvested_percent(self) > equity {
            self.grant = equity;
        }
    }
}

/// One month passes. Returns `true` when this step crossed the cliff.
pub fn advance_month(schedule: &mut VestingSchedule) -> bool {
    let before = schedule.cliff_reached();
    if schedule.vested_months_elapsed < schedule.total_vesting_months {
        schedule.vested_months_elapsed += 1;
    }
    !before && schedule.cliff_reached()
}

pub fn vested_percent(schedule: &VestingSchedule) -> MicroPct {
    if !schedule.cliff_reached() {
        return MicroPct::ZERO;
    }
    let elapsed = schedule.vested_months_elapsed.min(schedule.total_vesting_months);
    schedule
        .grant
        .scale(elapsed as u64, schedule.total_vesting_months as u64)
}

pub fn unvested_percent(schedule: &VestingSchedule) -> MicroPct {
    schedule.grant.saturating_sub(vested_percent(schedule))
}

/// Split of an entry on termination without buyback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Forfeiture {
    /// Stays with the holder
    pub kept: MicroPct,
    /// Goes back to the pool reserve
    pub returned: MicroPct,
}

pub fn forfeit(equity: MicroPct, schedule: Option<&VestingSchedule>) -> Forfeiture {
    let unvested = schedule.map(unvested_percent).unwrap_or(MicroPct::ZERO);
    let returned = if unvested > equity { equity } else { unvested };
    Forfeiture {
        kept: equity.saturating_sub(returned),
        returned,
    }
}

/// What one monthly advance did across a ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VestingReport {
    pub month: u32,
    pub cliffs_crossed: Vec<HolderId>,
    pub fully_vested: Vec<HolderId>,
    pub newly_vested: MicroPct,
}
