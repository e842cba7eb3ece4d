use std::fmt;

use serde::{Deserialize, Serialize};

use crate::funding::RoundStage;
use crate::terms::InvestmentTerms;
use crate::units::MicroPct;
use crate::vesting::{self, VestingSchedule};

/// Caller-chosen identifier, unique within one company.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderId(String);

impl HolderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HolderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for HolderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What an investor put in and on which terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestorStake {
    /// Total dollars invested across every round this holder joined
    pub amount_invested: f64,
    pub terms: InvestmentTerms,
    /// Stage the stake was first bought in; `None` for secondary purchases
    pub stage: Option<RoundStage>,
    /// Per-share price paid, adjusted downward by anti-dilution
    pub issue_price: f64,
}

impl InvestorStake {
    pub fn new(amount_invested: f64, terms: InvestmentTerms, stage: Option<RoundStage>) -> Self {
        Self {
            amount_invested,
            terms,
            stage,
            issue_price: 0.0,
        }
    }

    pub fn preference_claim(&self) -> f64 {
        self.terms.preference_claim(self.amount_invested)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HolderKind {
    Founder,
    Investor(InvestorStake),
    Executive,
    Employee,
    Advisor,
    PoolReserve,
}

impl HolderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HolderKind::Founder => "founder",
            HolderKind::Investor(_) => "investor",
            HolderKind::Executive => "executive",
            HolderKind::Employee => "employee",
            HolderKind::Advisor => "advisor",
            HolderKind::PoolReserve => "pool_reserve",
        }
    }

    /// Kinds whose grants are paid out of the option pool.
    pub fn draws_from_pool(&self) -> bool {
        matches!(
            self,
            HolderKind::Executive | HolderKind::Employee | HolderKind::Advisor
        )
    }

    pub fn stake(&self) -> Option<&InvestorStake> {
        match self {
            HolderKind::Investor(stake) => Some(stake),
            _ => None,
        }
    }

    pub fn stake_mut(&mut self) -> Option<&mut InvestorStake> {
        match self {
            HolderKind::Investor(stake) => Some(stake),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapTableEntry {
    pub id: HolderId,
    pub name: String,
    pub kind: HolderKind,
    pub equity: MicroPct,
    pub month_granted: u32,
    pub vesting: Option<VestingSchedule>,
}

impl CapTableEntry {
    pub fn new(id: HolderId, name: impl Into<String>, kind: HolderKind, equity: MicroPct) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            equity,
            month_granted: 0,
            vesting: None,
        }
    }

    pub fn is_pool(&self) -> bool {
        matches!(self.kind, HolderKind::PoolReserve)
    }

    pub fn is_founder(&self) -> bool {
        matches!(self.kind, HolderKind::Founder)
    }

    pub fn unvested(&self) -> MicroPct {
        self.vesting
            .as_ref()
            .map(vesting::unvested_percent)
            .unwrap_or(MicroPct::ZERO)
    }

    /// Equity the holder keeps if they leave today.
    pub fn realizable(&self) -> MicroPct {
        self.equity.saturating_sub(self.unvested())
    }

    pub(crate) fn scale(&mut self, num: u64, den: u64) {
        self.equity = self.equity.scale(num, den);
        if let Some(schedule) = self.vesting.as_mut() {
            schedule.scale(num, den);
            schedule.clamp_to(self.equity);
        }
    }
}

/// A SAFE that has not met a priced round yet. It holds no ledger percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeNote {
    pub holder: HolderId,
    pub name: String,
    pub amount: f64,
    pub terms: InvestmentTerms,
    pub month_issued: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_kinds() {
        assert!(HolderKind::Employee.draws_from_pool());
        assert!(HolderKind::Advisor.draws_from_pool());
        assert!(HolderKind::Executive.draws_from_pool());
        assert!(!HolderKind::Founder.draws_from_pool());
        assert!(!HolderKind::PoolReserve.draws_from_pool());
    }

    #[test]
    fn test_realizable_excludes_unvested() {
        let grant = MicroPct::from_percent(2.0).unwrap();
        let mut entry = CapTableEntry::new("eng".into(), "Engineer", HolderKind::Employee, grant);
        entry.vesting = Some(VestingSchedule::new(grant, 12, 48));
        assert_eq!(entry.realizable(), MicroPct::ZERO);
        assert_eq!(entry.unvested(), grant);
    }

    #[test]
    fn test_kind_serializes_tagged() {
        let kind = HolderKind::Investor(InvestorStake::new(
            1_000_000.0,
            InvestmentTerms::preferred(1.0),
            Some(RoundStage::Seed),
        ));
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "investor");
        assert_eq!(json["amount_invested"], 1_000_000.0);
    }
}
