//! Everything that can happen to a company, as replayable records.

use serde::{Deserialize, Serialize};

use crate::funding::{ProRataElection, TermSheet};
use crate::ledger::HolderId;
use crate::ledger::HolderKind;
use crate::terms::InvestmentTerms;
use crate::units::MicroPct;
use crate::vesting::VestingSchedule;
use crate::waterfall::ExitEvent;

/// One line of a company's history. Serialized with an `event` tag so a JSON-lines
/// file replays through [`super::reducer::reduce`] unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CapEvent {
    Grant {
        holder: HolderId,
        kind: HolderKind,
        percent: MicroPct,
        #[serde(default)]
        vesting: Option<VestingSchedule>,
    },
    AddCofounder {
        holder: HolderId,
        percent: MicroPct,
        #[serde(default)]
        vesting: Option<VestingSchedule>,
    },
    ExpandPool {
        percent: MicroPct,
    },
    AddBoardSeat {
        holder: HolderId,
    },
    BuyBack {
        holder: HolderId,
        percent: MicroPct,
        valuation: f64,
    },
    Terminate {
        holder: HolderId,
        #[serde(default)]
        buyback_valuation: Option<f64>,
    },
    SecondarySale {
        seller: HolderId,
        buyer: HolderId,
        percent: MicroPct,
        valuation: f64,
    },
    IssueSafe {
        holder: HolderId,
        amount: f64,
        terms: InvestmentTerms,
    },
    CloseRound {
        sheet: TermSheet,
        investors: Vec<HolderId>,
        #[serde(default)]
        elections: Vec<ProRataElection>,
    },
    AdvanceMonth,
    Exit(ExitEvent),
}

impl CapEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CapEvent::Grant { .. } => "grant",
            CapEvent::AddCofounder { .. } => "add_cofounder",
            CapEvent::ExpandPool { .. } => "expand_pool",
            CapEvent::AddBoardSeat { .. } => "add_board_seat",
            CapEvent::BuyBack { .. } => "buy_back",
            CapEvent::Terminate { .. } => "terminate",
            CapEvent::SecondarySale { .. } => "secondary_sale",
            CapEvent::IssueSafe { .. } => "issue_safe",
            CapEvent::CloseRound { .. } => "close_round",
            CapEvent::AdvanceMonth => "advance_month",
            CapEvent::Exit(_) => "exit",
        }
    }

    /// Exits read the ledger but never change it.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, CapEvent::Exit(_))
    }
}
