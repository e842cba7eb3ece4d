//! Pure reducer: (CompanyState, CapEvent) -> (Outcome, digest)
//!
//! All ledger transitions driven from a history file go through here. Replaying the
//! same events from the same starting ledger yields the same digest after every step.

use serde::Serialize;

use super::events::CapEvent;
use crate::error::EquityResult;
use crate::funding::{self, RoundOutcome};
use crate::ledger::{BoardSeatReport, BuybackReport, HolderId, OwnershipLedger, SecondaryReport, TerminationReport};
use crate::logging::{self, log_audit, Domain, Level};
use crate::portfolio::PortfolioPosition;
use crate::units::MicroPct;
use crate::verify::invariants;
use crate::vesting::VestingReport;
use crate::waterfall::{self, ExitOutcome};

/// A company's ledger plus the investor positions that follow it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyState {
    pub ledger: OwnershipLedger,
    pub positions: Vec<PortfolioPosition>,
    pub seq: u64,
}

impl CompanyState {
    pub fn new(ledger: OwnershipLedger) -> Self {
        Self {
            ledger,
            positions: Vec::new(),
            seq: 0,
        }
    }

    pub fn digest(&self) -> String {
        self.ledger.snapshot().digest()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Granted { pool_left: MicroPct },
    CofounderAdded,
    PoolExpanded { pool: MicroPct },
    BoardSeatAdded(BoardSeatReport),
    BoughtBack(BuybackReport),
    Terminated(TerminationReport),
    Sold(SecondaryReport),
    SafeIssued,
    RoundClosed(Box<RoundOutcome>),
    MonthAdvanced(VestingReport),
    Exited(ExitOutcome),
}

/// Result of processing an event
#[derive(Debug)]
pub struct ReducerOutput {
    pub seq: u64,
    pub outcome: EquityResult<Outcome>,
    /// Ledger digest after the event; unchanged when the event was rejected
    pub digest: String,
}

pub fn reduce(state: &mut CompanyState, event: CapEvent) -> ReducerOutput {
    state.seq += 1;
    let name = event.name();
    let outcome = apply(state, event);
    let digest = state.digest();
    log_audit(state.ledger.company_id(), state.seq, name, &digest);
    ReducerOutput {
        seq: state.seq,
        outcome,
        digest,
    }
}

fn apply(state: &mut CompanyState, event: CapEvent) -> EquityResult<Outcome> {
    let ledger = &mut state.ledger;
    match event {
        CapEvent::Grant {
            holder,
            kind,
            percent,
            vesting,
        } => {
            let pool_left = ledger.grant(holder, kind, percent, vesting)?;
            Ok(Outcome::Granted { pool_left })
        }
        CapEvent::AddCofounder {
            holder,
            percent,
            vesting,
        } => {
            ledger.add_cofounder(holder, percent, vesting)?;
            Ok(Outcome::CofounderAdded)
        }
        CapEvent::ExpandPool { percent } => {
            let pool = ledger.expand_pool(percent)?;
            Ok(Outcome::PoolExpanded { pool })
        }
        CapEvent::AddBoardSeat { holder } => Ok(Outcome::BoardSeatAdded(ledger.add_board_seat(holder)?)),
        CapEvent::BuyBack {
            holder,
            percent,
            valuation,
        } => Ok(Outcome::BoughtBack(ledger.buy_back(&holder, percent, valuation)?)),
        CapEvent::Terminate {
            holder,
            buyback_valuation,
        } => Ok(Outcome::Terminated(ledger.terminate(&holder, buyback_valuation)?)),
        CapEvent::SecondarySale {
            seller,
            buyer,
            percent,
            valuation,
        } => Ok(Outcome::Sold(ledger.secondary_sale(&seller, buyer, percent, valuation)?)),
        CapEvent::IssueSafe {
            holder,
            amount,
            terms,
        } => {
            ledger.issue_safe(holder.clone(), amount, terms)?;
            track_position(state, &holder);
            Ok(Outcome::SafeIssued)
        }
        CapEvent::CloseRound {
            sheet,
            investors,
            elections,
        } => {
            let outcome = funding::apply_round(
                ledger,
                &sheet,
                &investors,
                &elections,
                &mut state.positions,
            )?;
            // New investors get a position from the closed round onward.
            for holder in &investors {
                track_position(state, holder);
            }
            Ok(Outcome::RoundClosed(Box::new(outcome)))
        }
        CapEvent::AdvanceMonth => {
            let before = ledger.snapshot();
            let report = ledger.advance_month();
            invariants::assert_vesting_monotone(&before, &ledger.snapshot())?;
            Ok(Outcome::MonthAdvanced(report))
        }
        CapEvent::Exit(exit) => Ok(Outcome::Exited(waterfall::distribute(&ledger.snapshot(), &exit)?)),
    }
}

/// Open a position for `holder` unless one is already tracked. A holder that cannot
/// carry a position (not an investor) is skipped.
fn track_position(state: &mut CompanyState, holder: &HolderId) {
    if state.positions.iter().any(|p| &p.holder == holder) {
        return;
    }
    match PortfolioPosition::open(&state.ledger, holder) {
        Ok(position) => state.positions.push(position),
        Err(e) => logging::log(
            Level::Debug,
            Domain::Funding,
            "position_skipped",
            logging::obj(&[
                ("company", logging::v_str(state.ledger.company_id())),
                ("holder", logging::v_str(holder.as_str())),
                ("reason", logging::v_str(&e.to_string())),
            ]),
        ),
    }
}

/// Apply `events` in order and collect the digest after each one.
pub fn replay(ledger: OwnershipLedger, events: impl IntoIterator<Item = CapEvent>) -> (CompanyState, Vec<String>) {
    let mut state = CompanyState::new(ledger);
    let digests = events
        .into_iter()
        .map(|event| reduce(&mut state, event).digest)
        .collect();
    (state, digests)
}
