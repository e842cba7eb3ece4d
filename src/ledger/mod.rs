//! Ownership ledger: the authoritative cap table of one company.
//!
//! Every mutation is planned on a scratch copy of the entries, rounding residue is
//! settled on the largest non-pool holder, the invariants are checked, and only then is
//! the scratch copy swapped in. A failed call leaves the ledger exactly as it was.
//!
//! ```text
//!   op(args) ──► plan on Scratch ──► settle residue ──► verify ──► commit
//!                     │                                   │
//!                     └──────────── Err ◄─────────────────┘ (ledger untouched)
//! ```

mod entry;
mod snapshot;

pub use entry::{CapTableEntry, HolderId, HolderKind, InvestorStake, SafeNote};
pub use snapshot::LedgerSnapshot;

use serde::{Deserialize, Serialize};

use crate::error::{non_negative, positive, EquityError, EquityResult};
use crate::funding::{FundingRound, RoundStage};
use crate::logging::{self, log_invariant_repair, log_mutation, log_rejected, Domain, Level};
use crate::terms::{Instrument, InvestmentTerms};
use crate::units::MicroPct;
use crate::verify::invariants;
use crate::vesting::{self, VestingReport, VestingSchedule};

/// Reserved id of the unallocated option pool.
pub const POOL_ID: &str = "pool";

/// Notional share count a fresh company starts with.
pub const INITIAL_SHARES: f64 = 10_000_000.0;

/// Pool equity each new board seat is granted.
pub const BOARD_SEAT_GRANT: MicroPct = MicroPct::from_units(2 * MicroPct::UNITS_PER_PERCENT);

const MAJORITY: MicroPct = MicroPct::from_units(50 * MicroPct::UNITS_PER_PERCENT);

// =============================================================================
// Operation results
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DilutionRow {
    pub holder: HolderId,
    pub before: MicroPct,
    pub after: MicroPct,
}

/// Old/new percent for every holder touched by a dilution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DilutionReport {
    pub issued: MicroPct,
    pub rows: Vec<DilutionRow>,
}

impl DilutionReport {
    pub fn row(&self, holder: &HolderId) -> Option<&DilutionRow> {
        self.rows.iter().find(|r| &r.holder == holder)
    }
}

/// One recipient of newly issued equity.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub holder: HolderId,
    pub name: String,
    pub kind: HolderKind,
    pub equity: MicroPct,
}

impl Allocation {
    pub fn investor(holder: HolderId, equity: MicroPct, stake: InvestorStake) -> Self {
        Self {
            name: holder.to_string(),
            holder,
            kind: HolderKind::Investor(stake),
            equity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuybackReport {
    /// Dollars the company owes the seller
    pub cost: f64,
    pub vested_used: MicroPct,
    pub unvested_used: MicroPct,
    pub archived: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerminationReport {
    /// Unvested equity returned to the pool
    pub forfeited: MicroPct,
    /// Vested equity kept by the departing holder
    pub retained: MicroPct,
    pub bought_back: MicroPct,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSeatReport {
    pub holder: HolderId,
    /// `BOARD_SEAT_GRANT`, or what the pool still had if less
    pub granted: MicroPct,
    pub pool_left: MicroPct,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SecondaryReport {
    pub proceeds: f64,
    pub seller_remaining: MicroPct,
    pub buyer_total: MicroPct,
}

// =============================================================================
// Scratch copy
// =============================================================================

#[derive(Debug, Clone)]
struct Scratch {
    entries: Vec<CapTableEntry>,
    archived: Vec<CapTableEntry>,
}

impl Scratch {
    fn index(&self, id: &HolderId) -> Option<usize> {
        self.entries.iter().position(|e| &e.id == id)
    }

    fn require(&self, id: &HolderId) -> EquityResult<usize> {
        self.index(id)
            .ok_or_else(|| EquityError::UnknownHolder(id.clone()))
    }

    fn pool(&self) -> EquityResult<usize> {
        self.entries
            .iter()
            .position(|e| e.is_pool())
            .ok_or_else(|| EquityError::LedgerInvariantViolation {
                detail: "pool entry missing".to_string(),
            })
    }

    fn archive(&mut self, idx: usize) {
        let mut entry = self.entries.remove(idx);
        entry.vesting = None;
        self.archived.push(entry);
    }
}

/// Absorb floor residue so the entries add up to exactly 100%, then verify.
fn settle(entries: &mut [CapTableEntry], company: &str) -> EquityResult<()> {
    let total: u64 = entries.iter().map(|e| e.equity.units()).sum();
    let target = MicroPct::ONE_HUNDRED.units();
    if total != target {
        let residue = target as i64 - total as i64;
        let idx = largest_holder(entries).ok_or_else(|| EquityError::LedgerInvariantViolation {
            detail: "no holder to absorb rounding residue".to_string(),
        })?;
        let entry = &mut entries[idx];
        let adjusted = entry.equity.units() as i64 + residue;
        if adjusted < 0 || adjusted as u64 > target {
            return Err(EquityError::LedgerInvariantViolation {
                detail: format!("residue of {} units cannot be absorbed by {}", residue, entry.id),
            });
        }
        entry.equity = MicroPct::from_units(adjusted as u64);
        if let Some(schedule) = entry.vesting.as_mut() {
            schedule.clamp_to(entry.equity);
        }
        // One unit per floored entry is expected; anything more is drift.
        if residue.unsigned_abs() > entries.len() as u64 {
            log_invariant_repair(company, residue, entries[idx].id.as_str());
        } else {
            logging::log(
                Level::Trace,
                Domain::Ledger,
                "rounding_residue",
                logging::obj(&[
                    ("company", logging::v_str(company)),
                    ("residue_units", serde_json::json!(residue)),
                    ("absorbed_by", logging::v_str(entries[idx].id.as_str())),
                ]),
            );
        }
    }
    invariants::assert_ledger_invariants(entries)?;
    Ok(())
}

/// Largest non-pool entry, or the pool when it is the only holder. Ties go to the
/// earliest entry so the choice is deterministic.
fn largest_holder(entries: &[CapTableEntry]) -> Option<usize> {
    let pick = |include_pool: bool| {
        entries
            .iter()
            .enumerate()
            .filter(|(_, e)| include_pool || !e.is_pool())
            .fold(None, |best: Option<(usize, MicroPct)>, (i, e)| match best {
                Some((_, eq)) if eq >= e.equity => best,
                _ => Some((i, e.equity)),
            })
            .map(|(i, _)| i)
    };
    pick(false).or_else(|| pick(true))
}

fn nonzero(field: &'static str, pct: MicroPct) -> EquityResult<MicroPct> {
    if pct.is_zero() {
        Err(EquityError::InvalidAmount { field, value: 0.0 })
    } else {
        Ok(pct)
    }
}

fn same_kind(a: &HolderKind, b: &HolderKind) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct OwnershipLedger {
    company_id: String,
    founder: HolderId,
    month: u32,
    share_count: f64,
    entries: Vec<CapTableEntry>,
    archived: Vec<CapTableEntry>,
    rounds: Vec<FundingRound>,
    pending_safes: Vec<SafeNote>,
}

impl OwnershipLedger {
    /// Fresh company: the founder owns 100%, the pool exists at 0%.
    pub fn new(company_id: impl Into<String>, founder: impl Into<HolderId>) -> Self {
        let founder = founder.into();
        let entries = vec![
            CapTableEntry::new(founder.clone(), founder.to_string(), HolderKind::Founder, MicroPct::ONE_HUNDRED),
            CapTableEntry::new(POOL_ID.into(), "Option pool", HolderKind::PoolReserve, MicroPct::ZERO),
        ];
        Self {
            company_id: company_id.into(),
            founder,
            month: 0,
            share_count: INITIAL_SHARES,
            entries,
            archived: Vec::new(),
            rounds: Vec::new(),
            pending_safes: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    pub fn company_id(&self) -> &str {
        &self.company_id
    }

    pub fn founder(&self) -> &HolderId {
        &self.founder
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn share_count(&self) -> f64 {
        self.share_count
    }

    pub fn entries(&self) -> &[CapTableEntry] {
        &self.entries
    }

    pub fn archived(&self) -> &[CapTableEntry] {
        &self.archived
    }

    pub fn rounds(&self) -> &[FundingRound] {
        &self.rounds
    }

    pub fn pending_safes(&self) -> &[SafeNote] {
        &self.pending_safes
    }

    pub fn entry(&self, id: &HolderId) -> Option<&CapTableEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn percent_of(&self, id: &HolderId) -> MicroPct {
        self.entry(id).map(|e| e.equity).unwrap_or(MicroPct::ZERO)
    }

    pub fn realizable_percent(&self, id: &HolderId) -> MicroPct {
        self.entry(id).map(|e| e.realizable()).unwrap_or(MicroPct::ZERO)
    }

    pub fn pool(&self) -> MicroPct {
        self.entries
            .iter()
            .find(|e| e.is_pool())
            .map(|e| e.equity)
            .unwrap_or(MicroPct::ZERO)
    }

    pub fn founders_percent(&self) -> MicroPct {
        self.entries
            .iter()
            .filter(|e| e.is_founder())
            .map(|e| e.equity)
            .sum()
    }

    /// Strictly more than half of the company.
    pub fn has_majority(&self, id: &HolderId) -> bool {
        self.percent_of(id) > MAJORITY
    }

    pub fn has_closed(&self, stage: RoundStage) -> bool {
        self.rounds.iter().any(|r| r.stage == stage)
    }

    pub fn last_round(&self) -> Option<&FundingRound> {
        self.rounds.last()
    }

    /// Price per share of the most recent priced round.
    pub fn last_price_per_share(&self) -> Option<f64> {
        self.rounds.last().map(|r| r.price_per_share)
    }

    pub fn total(&self) -> MicroPct {
        self.entries.iter().map(|e| e.equity).sum()
    }

    // -------------------------------------------------------------------------
    // Commit plumbing
    // -------------------------------------------------------------------------

    fn scratch(&self) -> Scratch {
        Scratch {
            entries: self.entries.clone(),
            archived: self.archived.clone(),
        }
    }

    fn commit<R>(&mut self, op: &str, planned: EquityResult<(Scratch, R)>) -> EquityResult<R> {
        let settled = planned.and_then(|(mut scratch, out)| {
            settle(&mut scratch.entries, &self.company_id)?;
            Ok((scratch, out))
        });
        match settled {
            Ok((scratch, out)) => {
                self.entries = scratch.entries;
                self.archived = scratch.archived;
                Ok(out)
            }
            Err(err) => Err(self.rejected(op, err)),
        }
    }

    pub(crate) fn rejected(&self, op: &str, err: EquityError) -> EquityError {
        log_rejected(&self.company_id, op, err.kind(), &err.to_string());
        err
    }

    // -------------------------------------------------------------------------
    // Grants
    // -------------------------------------------------------------------------

    /// Grant pool equity to an executive, employee or advisor.
    ///
    /// A supplied schedule has its grant set to `percent`; a holder who already vests
    /// keeps their clock and the new grant is folded in.
    pub fn grant(
        &mut self,
        holder: HolderId,
        kind: HolderKind,
        percent: MicroPct,
        vesting: Option<VestingSchedule>,
    ) -> EquityResult<MicroPct> {
        let planned = self.plan_grant(&holder, kind, percent, vesting);
        let pool_left = self.commit("grant", planned)?;
        log_mutation(&self.company_id, "grant", holder.as_str(), percent.as_percent());
        Ok(pool_left)
    }

    fn plan_grant(
        &self,
        holder: &HolderId,
        kind: HolderKind,
        percent: MicroPct,
        vesting: Option<VestingSchedule>,
    ) -> EquityResult<(Scratch, MicroPct)> {
        nonzero("percent", percent)?;
        if !kind.draws_from_pool() || holder.as_str() == POOL_ID {
            return Err(EquityError::InvalidHolder {
                holder: holder.clone(),
                reason: format!("{} equity is not granted from the pool", kind.as_str()),
            });
        }
        let mut s = self.scratch();
        let pool = s.pool()?;
        let available = s.entries[pool].equity;
        if percent > available {
            return Err(EquityError::InsufficientPool {
                requested: percent,
                available,
            });
        }
        s.entries[pool].equity = available.saturating_sub(percent);

        let schedule = vesting.map(|mut v| {
            v.grant = percent;
            v
        });
        match s.index(holder) {
            Some(idx) => {
                let entry = &mut s.entries[idx];
                if !same_kind(&entry.kind, &kind) {
                    return Err(EquityError::InvalidHolder {
                        holder: holder.clone(),
                        reason: format!("already on the cap table as {}", entry.kind.as_str()),
                    });
                }
                entry.equity += percent;
                if let Some(new) = schedule {
                    if let Some(existing) = entry.vesting.as_mut() {
                        existing.merge(percent);
                    } else {
                        entry.vesting = Some(new);
                    }
                }
            }
            None => {
                let mut entry = CapTableEntry::new(holder.clone(), holder.to_string(), kind, percent);
                entry.month_granted = self.month;
                entry.vesting = schedule;
                s.entries.push(entry);
            }
        }
        let left = s.entries[pool].equity;
        Ok((s, left))
    }

    /// Seat a board member, paid with up to `BOARD_SEAT_GRANT` of the pool. A pool that
    /// holds less gives what it has; an empty pool cannot pay for a seat.
    pub fn add_board_seat(&mut self, holder: HolderId) -> EquityResult<BoardSeatReport> {
        let available = self.pool();
        let granted = BOARD_SEAT_GRANT.min(available);
        let planned = if granted.is_zero() {
            Err(EquityError::InsufficientPool {
                requested: BOARD_SEAT_GRANT,
                available,
            })
        } else {
            self.plan_grant(&holder, HolderKind::Advisor, granted, None)
        };
        let pool_left = self.commit("add_board_seat", planned)?;
        log_mutation(&self.company_id, "add_board_seat", holder.as_str(), granted.as_percent());
        Ok(BoardSeatReport {
            holder,
            granted,
            pool_left,
        })
    }

    /// Bring in another founder, carved out of the primary founder's stake.
    pub fn add_cofounder(
        &mut self,
        holder: HolderId,
        percent: MicroPct,
        vesting: Option<VestingSchedule>,
    ) -> EquityResult<()> {
        let planned = (|| {
            nonzero("percent", percent)?;
            let mut s = self.scratch();
            if s.index(&holder).is_some() || holder.as_str() == POOL_ID {
                return Err(EquityError::InvalidHolder {
                    holder: holder.clone(),
                    reason: "already on the cap table".to_string(),
                });
            }
            let primary = s.require(&self.founder)?;
            let held = s.entries[primary].realizable();
            if percent > held {
                return Err(EquityError::InsufficientEquity {
                    holder: self.founder.clone(),
                    requested: percent,
                    held,
                });
            }
            s.entries[primary].equity = s.entries[primary].equity.saturating_sub(percent);
            let mut entry = CapTableEntry::new(holder.clone(), holder.to_string(), HolderKind::Founder, percent);
            entry.month_granted = self.month;
            entry.vesting = vesting.map(|mut v| {
                v.grant = percent;
                v
            });
            s.entries.push(entry);
            Ok((s, ()))
        })();
        self.commit("add_cofounder", planned)?;
        log_mutation(&self.company_id, "add_cofounder", holder.as_str(), percent.as_percent());
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Dilution
    // -------------------------------------------------------------------------

    /// Issue `issue` to a single investor, scaling everyone else by (100 − issue)/100.
    pub fn dilute_all(
        &mut self,
        issue: MicroPct,
        investor: HolderId,
        stake: InvestorStake,
    ) -> EquityResult<DilutionReport> {
        self.dilute_into(vec![Allocation::investor(investor, issue, stake)])
    }

    /// Issue new equity to several recipients at once. The total issue is the sum of
    /// the allocations; an allocation to an existing holder adds to their entry.
    pub fn dilute_into(&mut self, allocations: Vec<Allocation>) -> EquityResult<DilutionReport> {
        let planned = self.plan_dilution(allocations);
        let report = self.commit("dilute", planned)?;
        for row in &report.rows {
            logging::log(
                Level::Debug,
                Domain::Ledger,
                "diluted",
                logging::obj(&[
                    ("company", logging::v_str(&self.company_id)),
                    ("holder", logging::v_str(row.holder.as_str())),
                    ("before", logging::v_num(row.before.as_percent())),
                    ("after", logging::v_num(row.after.as_percent())),
                ]),
            );
        }
        Ok(report)
    }

    fn plan_dilution(&self, allocations: Vec<Allocation>) -> EquityResult<(Scratch, DilutionReport)> {
        let issue: u128 = allocations.iter().map(|a| a.equity.units() as u128).sum();
        let hundred = MicroPct::ONE_HUNDRED.units();
        if issue == 0 || issue >= hundred as u128 {
            let issue = MicroPct::from_units(issue.min(u64::MAX as u128) as u64);
            return Err(EquityError::Overdilute {
                issue,
                reason: if issue.is_zero() {
                    "nothing to issue".to_string()
                } else {
                    "issue would consume the whole company".to_string()
                },
            });
        }
        let issue = MicroPct::from_units(issue as u64);
        let keep = hundred - issue.units();

        let mut s = self.scratch();
        let before: Vec<(HolderId, MicroPct)> = s.entries.iter().map(|e| (e.id.clone(), e.equity)).collect();
        for entry in s.entries.iter_mut() {
            entry.scale(keep, hundred);
        }

        for alloc in allocations {
            let HolderKind::Investor(new) = alloc.kind else {
                return Err(EquityError::InvalidHolder {
                    holder: alloc.holder,
                    reason: "only investors receive newly issued equity".to_string(),
                });
            };
            if alloc.holder.as_str() == POOL_ID {
                return Err(EquityError::InvalidHolder {
                    holder: alloc.holder,
                    reason: "the pool cannot invest".to_string(),
                });
            }
            match s.index(&alloc.holder) {
                Some(idx) => {
                    let entry = &mut s.entries[idx];
                    let kind_name = entry.kind.as_str();
                    let Some(stake) = entry.kind.stake_mut() else {
                        return Err(EquityError::InvalidHolder {
                            holder: alloc.holder,
                            reason: format!("already on the cap table as {}", kind_name),
                        });
                    };
                    stake.amount_invested += new.amount_invested;
                    if stake.stage.is_none() {
                        stake.stage = new.stage;
                    }
                    // Fresh priced money upgrades a common secondary position.
                    if stake.terms.instrument == Instrument::Common
                        && new.terms.instrument != Instrument::Common
                    {
                        stake.terms = new.terms;
                        stake.issue_price = new.issue_price;
                    }
                    entry.equity += alloc.equity;
                }
                None => {
                    let mut entry = CapTableEntry::new(
                        alloc.holder,
                        alloc.name,
                        HolderKind::Investor(new),
                        alloc.equity,
                    );
                    entry.month_granted = self.month;
                    s.entries.push(entry);
                }
            }
        }

        let mut report = DilutionReport {
            issued: issue,
            rows: Vec::new(),
        };
        for entry in &s.entries {
            let prior = before
                .iter()
                .find(|(id, _)| id == &entry.id)
                .map(|(_, pct)| *pct)
                .unwrap_or(MicroPct::ZERO);
            report.rows.push(DilutionRow {
                holder: entry.id.clone(),
                before: prior,
                after: entry.equity,
            });
        }
        Ok((s, report))
    }

    /// Grow the pool by exactly `percent`, scaling every other holder by
    /// (100 − pool_old − percent)/(100 − pool_old).
    pub fn expand_pool(&mut self, percent: MicroPct) -> EquityResult<MicroPct> {
        let planned = (|| {
            nonzero("percent", percent)?;
            let mut s = self.scratch();
            let pool = s.pool()?;
            let old = s.entries[pool].equity;
            let hundred = MicroPct::ONE_HUNDRED.units();
            let others = hundred - old.units();
            let target = old.units() + percent.units();
            if target >= hundred {
                return Err(EquityError::Overdilute {
                    issue: percent,
                    reason: format!("pool would reach {}", MicroPct::from_units(target)),
                });
            }
            for entry in s.entries.iter_mut().filter(|e| !e.is_pool()) {
                entry.scale(hundred - target, others);
            }
            s.entries[pool].equity = MicroPct::from_units(target);
            Ok((s, MicroPct::from_units(target)))
        })();
        let pool = self.commit("expand_pool", planned)?;
        log_mutation(&self.company_id, "expand_pool", POOL_ID, percent.as_percent());
        Ok(pool)
    }

    // -------------------------------------------------------------------------
    // Buybacks, departures, secondaries
    // -------------------------------------------------------------------------

    /// Company repurchases `percent` from `holder` at `valuation`; the equity goes to the
    /// primary founder. Vested equity is used before unvested.
    pub fn buy_back(
        &mut self,
        holder: &HolderId,
        percent: MicroPct,
        valuation: f64,
    ) -> EquityResult<BuybackReport> {
        let planned = (|| {
            nonzero("percent", percent)?;
            let valuation = non_negative("valuation", valuation)?;
            let mut s = self.scratch();
            let (vested_used, unvested_used, archived) = self.take_from(&mut s, holder, percent)?;
            let founder = s.require(&self.founder)?;
            s.entries[founder].equity += percent;
            Ok((
                s,
                BuybackReport {
                    cost: percent.value_at(valuation),
                    vested_used,
                    unvested_used,
                    archived,
                },
            ))
        })();
        let report = self.commit("buy_back", planned)?;
        log_mutation(&self.company_id, "buy_back", holder.as_str(), percent.as_percent());
        Ok(report)
    }

    /// Remove `percent` from a holder in the scratch copy, vested first. Investor stakes
    /// shrink their invested amount pro rata. Returns (vested used, unvested used,
    /// archived).
    fn take_from(
        &self,
        s: &mut Scratch,
        holder: &HolderId,
        percent: MicroPct,
    ) -> EquityResult<(MicroPct, MicroPct, bool)> {
        if holder.as_str() == POOL_ID || holder == &self.founder {
            return Err(EquityError::InvalidHolder {
                holder: holder.clone(),
                reason: "pool and primary founder cannot sell back to the company".to_string(),
            });
        }
        let idx = s.require(holder)?;
        let entry = &mut s.entries[idx];
        if percent > entry.equity {
            return Err(EquityError::InsufficientEquity {
                holder: holder.clone(),
                requested: percent,
                held: entry.equity,
            });
        }
        let realizable = entry.realizable();
        let vested_used = if percent > realizable { realizable } else { percent };
        let unvested_used = percent.saturating_sub(vested_used);
        let held = entry.equity;
        if let Some(schedule) = entry.vesting.as_mut() {
            schedule.reduce_unvested(unvested_used);
        }
        entry.equity = held.saturating_sub(percent);
        if let Some(stake) = entry.kind.stake_mut() {
            stake.amount_invested *= entry.equity.units() as f64 / held.units() as f64;
        }
        if let Some(schedule) = entry.vesting.as_mut() {
            schedule.clamp_to(entry.equity);
        }
        let archived = entry.equity.is_zero();
        if archived {
            s.archive(idx);
        }
        Ok((vested_used, unvested_used, archived))
    }

    /// Holder leaves. Unvested equity returns to the pool; with a buyback valuation the
    /// vested remainder is bought back by the primary founder and the entry archived.
    pub fn terminate(
        &mut self,
        holder: &HolderId,
        buyback_valuation: Option<f64>,
    ) -> EquityResult<TerminationReport> {
        let planned = (|| {
            if holder.as_str() == POOL_ID || holder == &self.founder {
                return Err(EquityError::InvalidHolder {
                    holder: holder.clone(),
                    reason: "pool and primary founder cannot be terminated".to_string(),
                });
            }
            let valuation = buyback_valuation.map(|v| non_negative("valuation", v)).transpose()?;
            let mut s = self.scratch();
            let idx = s.require(holder)?;
            let pool = s.pool()?;
            let split = vesting::forfeit(s.entries[idx].equity, s.entries[idx].vesting.as_ref());
            s.entries[pool].equity += split.returned;

            let entry = &mut s.entries[idx];
            let held = entry.equity;
            entry.equity = split.kept;
            entry.vesting = None;
            if let Some(stake) = entry.kind.stake_mut() {
                if !held.is_zero() {
                    stake.amount_invested *= split.kept.units() as f64 / held.units() as f64;
                }
            }

            let mut report = TerminationReport {
                forfeited: split.returned,
                retained: split.kept,
                bought_back: MicroPct::ZERO,
                cost: 0.0,
            };
            if let Some(valuation) = valuation {
                let founder = s.require(&self.founder)?;
                s.entries[founder].equity += split.kept;
                report.bought_back = split.kept;
                report.retained = MicroPct::ZERO;
                report.cost = split.kept.value_at(valuation);
                s.entries[idx].equity = MicroPct::ZERO;
            }
            if s.entries[idx].equity.is_zero() {
                s.archive(idx);
            }
            Ok((s, report))
        })();
        let report = self.commit("terminate", planned)?;
        logging::log(
            Level::Info,
            Domain::Vesting,
            "terminated",
            logging::obj(&[
                ("company", logging::v_str(&self.company_id)),
                ("holder", logging::v_str(holder.as_str())),
                ("forfeited", logging::v_num(report.forfeited.as_percent())),
                ("bought_back", logging::v_num(report.bought_back.as_percent())),
            ]),
        );
        Ok(report)
    }

    /// Move vested equity between holders at `valuation`. The buyer holds it as a
    /// common investor position.
    pub fn secondary_sale(
        &mut self,
        seller: &HolderId,
        buyer: HolderId,
        percent: MicroPct,
        valuation: f64,
    ) -> EquityResult<SecondaryReport> {
        let planned = (|| {
            nonzero("percent", percent)?;
            let valuation = positive("valuation", valuation)?;
            if seller == &buyer {
                return Err(EquityError::InvalidHolder {
                    holder: buyer,
                    reason: "cannot buy from itself".to_string(),
                });
            }
            if buyer.as_str() == POOL_ID || seller.as_str() == POOL_ID {
                return Err(EquityError::InvalidHolder {
                    holder: POOL_ID.into(),
                    reason: "the pool does not trade".to_string(),
                });
            }
            let proceeds = percent.value_at(valuation);
            let mut s = self.scratch();
            let sidx = s.require(seller)?;
            let entry = &mut s.entries[sidx];
            let realizable = entry.realizable();
            if percent > realizable {
                return Err(EquityError::InsufficientEquity {
                    holder: seller.clone(),
                    requested: percent,
                    held: realizable,
                });
            }
            let held = entry.equity;
            entry.equity = held.saturating_sub(percent);
            if let Some(stake) = entry.kind.stake_mut() {
                stake.amount_invested *= entry.equity.units() as f64 / held.units() as f64;
            }
            let seller_remaining = entry.equity;
            if seller_remaining.is_zero() && seller != &self.founder {
                s.archive(sidx);
            }

            let buyer_total = match s.index(&buyer) {
                Some(bidx) => {
                    let entry = &mut s.entries[bidx];
                    let kind_name = entry.kind.as_str();
                    let Some(stake) = entry.kind.stake_mut() else {
                        return Err(EquityError::InvalidHolder {
                            holder: buyer,
                            reason: format!("{} cannot buy secondary shares", kind_name),
                        });
                    };
                    stake.amount_invested += proceeds;
                    entry.equity += percent;
                    entry.equity
                }
                None => {
                    let stake = InvestorStake::new(proceeds, InvestmentTerms::common(), None);
                    let mut entry = CapTableEntry::new(buyer.clone(), buyer.to_string(), HolderKind::Investor(stake), percent);
                    entry.month_granted = self.month;
                    s.entries.push(entry);
                    percent
                }
            };
            Ok((
                s,
                SecondaryReport {
                    proceeds,
                    seller_remaining,
                    buyer_total,
                },
            ))
        })();
        let report = self.commit("secondary_sale", planned)?;
        log_mutation(&self.company_id, "secondary_sale", seller.as_str(), percent.as_percent());
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // SAFEs and rounds (driven by the funding engine)
    // -------------------------------------------------------------------------

    /// Record an unpriced SAFE. It holds no percent until the next priced round.
    pub fn issue_safe(
        &mut self,
        holder: HolderId,
        amount: f64,
        terms: InvestmentTerms,
    ) -> EquityResult<()> {
        let checked = positive("amount", amount).and_then(|amount| {
            if terms.instrument != Instrument::Safe {
                return Err(EquityError::InvalidHolder {
                    holder: holder.clone(),
                    reason: "terms are not a SAFE".to_string(),
                });
            }
            if holder.as_str() == POOL_ID {
                return Err(EquityError::InvalidHolder {
                    holder: holder.clone(),
                    reason: "the pool cannot invest".to_string(),
                });
            }
            Ok(amount)
        });
        let amount = checked.map_err(|e| self.rejected("issue_safe", e))?;
        self.pending_safes.push(SafeNote {
            name: holder.to_string(),
            holder: holder.clone(),
            amount,
            terms,
            month_issued: self.month,
        });
        logging::log(
            Level::Info,
            Domain::Funding,
            "safe_issued",
            logging::obj(&[
                ("company", logging::v_str(&self.company_id)),
                ("holder", logging::v_str(holder.as_str())),
                ("amount", logging::v_num(amount)),
            ]),
        );
        Ok(())
    }

    /// Move equity from the founders to protected holders, founders giving pro rata to
    /// their stakes.
    pub(crate) fn reallocate_from_founders(
        &mut self,
        grants: &[(HolderId, MicroPct)],
    ) -> EquityResult<()> {
        let planned = (|| {
            let needed: MicroPct = grants.iter().map(|(_, pct)| *pct).sum();
            let mut s = self.scratch();
            let founders: Vec<usize> = (0..s.entries.len()).filter(|&i| s.entries[i].is_founder()).collect();
            let available: MicroPct = founders.iter().map(|&i| s.entries[i].realizable()).sum();
            if needed > available {
                return Err(EquityError::InsufficientEquity {
                    holder: self.founder.clone(),
                    requested: needed,
                    held: available,
                });
            }
            let mut taken = MicroPct::ZERO;
            for &i in &founders {
                let share = needed.scale(s.entries[i].realizable().units(), available.units());
                s.entries[i].equity = s.entries[i].equity.saturating_sub(share);
                taken += share;
            }
            // Floor residue comes out of the primary founder.
            let primary = s.require(&self.founder)?;
            let rest = needed.saturating_sub(taken);
            if rest > s.entries[primary].realizable() {
                return Err(EquityError::InsufficientEquity {
                    holder: self.founder.clone(),
                    requested: rest,
                    held: s.entries[primary].realizable(),
                });
            }
            s.entries[primary].equity = s.entries[primary].equity.saturating_sub(rest);
            for (holder, pct) in grants {
                let idx = s.require(holder)?;
                s.entries[idx].equity += *pct;
            }
            Ok((s, ()))
        })();
        self.commit("anti_dilution", planned)
    }

    pub(crate) fn stake_mut(&mut self, id: &HolderId) -> Option<&mut InvestorStake> {
        self.entries
            .iter_mut()
            .find(|e| &e.id == id)
            .and_then(|e| e.kind.stake_mut())
    }

    pub(crate) fn take_pending_safes(&mut self) -> Vec<SafeNote> {
        std::mem::take(&mut self.pending_safes)
    }

    pub(crate) fn set_share_count(&mut self, shares: f64) {
        self.share_count = shares;
    }

    pub(crate) fn record_round(&mut self, round: FundingRound, share_count: f64) {
        self.share_count = share_count;
        self.rounds.push(round);
    }

    // -------------------------------------------------------------------------
    // Time
    // -------------------------------------------------------------------------

    /// One simulated month passes for every vesting schedule on the ledger.
    pub fn advance_month(&mut self) -> VestingReport {
        self.month += 1;
        let mut report = VestingReport {
            month: self.month,
            ..Default::default()
        };
        for entry in self.entries.iter_mut() {
            let Some(schedule) = entry.vesting.as_mut() else {
                continue;
            };
            let before = vesting::vested_percent(schedule);
            let was_full = schedule.is_fully_vested();
            if vesting::advance_month(schedule) {
                report.cliffs_crossed.push(entry.id.clone());
            }
            if !was_full && schedule.is_fully_vested() {
                report.fully_vested.push(entry.id.clone());
            }
            report.newly_vested += vesting::vested_percent(schedule).saturating_sub(before);
        }
        if !report.cliffs_crossed.is_empty() {
            logging::log(
                Level::Info,
                Domain::Vesting,
                "cliffs_crossed",
                logging::obj(&[
                    ("company", logging::v_str(&self.company_id)),
                    ("month", serde_json::json!(self.month)),
                    ("holders", serde_json::json!(report.cliffs_crossed)),
                ]),
            );
        }
        report
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            company_id: self.company_id.clone(),
            founder: self.founder.clone(),
            month: self.month,
            share_count: self.share_count,
            entries: self.entries.clone(),
            archived: self.archived.clone(),
            rounds: self.rounds.clone(),
            pending_safes: self.pending_safes.clone(),
        }
    }

    /// Rebuild a ledger from a snapshot, refusing one that breaks the invariants.
    pub fn restore(snapshot: LedgerSnapshot) -> EquityResult<Self> {
        if let Err(v) = invariants::assert_snapshot_invariants(&snapshot) {
            let err = EquityError::from(v);
            log_rejected(&snapshot.company_id, "restore", err.kind(), &err.to_string());
            return Err(err);
        }
        Ok(Self {
            company_id: snapshot.company_id,
            founder: snapshot.founder,
            month: snapshot.month,
            share_count: snapshot.share_count,
            entries: snapshot.entries,
            archived: snapshot.archived,
            rounds: snapshot.rounds,
            pending_safes: snapshot.pending_safes,
        })
    }
}
