//! Investor-side view of one holding, kept in step with the company's ledger.

use serde::{Deserialize, Serialize};

use crate::error::{EquityError, EquityResult};
use crate::funding::RoundStage;
use crate::ledger::{HolderId, OwnershipLedger};
use crate::terms::{self, EffectiveEquity, InvestmentTerms, PricedRound};
use crate::units::MicroPct;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DilutionRecord {
    pub stage: RoundStage,
    pub month: u32,
    pub equity_before: MicroPct,
    pub equity_after: MicroPct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioPosition {
    pub company_id: String,
    pub holder: HolderId,
    pub amount_invested: f64,
    pub initial_equity: MicroPct,
    pub current_equity: MicroPct,
    pub terms: InvestmentTerms,
    pub history: Vec<DilutionRecord>,
}

impl PortfolioPosition {
    pub fn new(
        company_id: impl Into<String>,
        holder: HolderId,
        amount_invested: f64,
        equity: MicroPct,
        terms: InvestmentTerms,
    ) -> Self {
        Self {
            company_id: company_id.into(),
            holder,
            amount_invested,
            initial_equity: equity,
            current_equity: equity,
            terms,
            history: Vec::new(),
        }
    }

    /// Build a position from an investor entry, or from an unconverted SAFE.
    pub fn open(ledger: &OwnershipLedger, holder: &HolderId) -> EquityResult<Self> {
        if let Some(entry) = ledger.entry(holder) {
            let stake = entry.kind.stake().ok_or_else(|| EquityError::InvalidHolder {
                holder: holder.clone(),
                reason: format!("{} is not an investor", entry.kind.as_str()),
            })?;
            return Ok(Self::new(
                ledger.company_id(),
                holder.clone(),
                stake.amount_invested,
                entry.equity,
                stake.terms.clone(),
            ));
        }
        let safes: Vec<_> = ledger
            .pending_safes()
            .iter()
            .filter(|s| &s.holder == holder)
            .collect();
        let first = safes
            .first()
            .ok_or_else(|| EquityError::UnknownHolder(holder.clone()))?;
        let amount = safes.iter().map(|s| s.amount).sum();
        Ok(Self::new(
            ledger.company_id(),
            holder.clone(),
            amount,
            MicroPct::ZERO,
            first.terms.clone(),
        ))
    }

    /// Append a dilution row and adopt the ledger's current numbers.
    pub fn record_round(&mut self, ledger: &OwnershipLedger, stage: RoundStage) {
        let before = self.current_equity;
        self.sync(ledger);
        self.history.push(DilutionRecord {
            stage,
            month: ledger.month(),
            equity_before: before,
            equity_after: self.current_equity,
        });
    }

    /// Pull percent, invested amount and terms from the ledger. A holder no longer on
    /// the ledger (bought out, or still an unconverted SAFE) keeps its invested amount.
    pub fn sync(&mut self, ledger: &OwnershipLedger) {
        match ledger.entry(&self.holder) {
            Some(entry) => {
                self.current_equity = entry.equity;
                if let Some(stake) = entry.kind.stake() {
                    if self.initial_equity.is_zero() {
                        self.initial_equity = entry.equity;
                    }
                    self.amount_invested = stake.amount_invested;
                    self.terms = stake.terms.clone();
                }
            }
            None => self.current_equity = MicroPct::ZERO,
        }
    }

    pub fn board_vote_weight(&self, doubled: bool) -> u32 {
        terms::board_vote_weight(&self.terms, doubled)
    }

    pub fn effective_equity(&self, round: &PricedRound) -> EffectiveEquity {
        terms::effective_equity(&self.terms, self.amount_invested, self.current_equity, round)
    }

    /// Paper value at a company valuation.
    pub fn value_at(&self, valuation: f64) -> f64 {
        self.current_equity.value_at(valuation)
    }

    /// Multiple on invested capital for a given payout, 0 when nothing was invested.
    pub fn multiple(&self, proceeds: f64) -> f64 {
        if self.amount_invested > 0.0 {
            proceeds / self.amount_invested
        } else {
            0.0
        }
    }

    /// Percentage points lost to dilution since entry.
    pub fn total_dilution(&self) -> f64 {
        self.initial_equity.as_percent() - self.current_equity.as_percent()
    }
}
