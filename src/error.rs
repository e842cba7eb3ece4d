//! Named failure kinds for every ledger operation.
//!
//! Callers react differently per kind, so nothing here collapses into a generic error.
//! All variants except [`EquityError::LedgerInvariantViolation`] leave the ledger untouched
//! and can be surfaced to the player as a rejected action.

use thiserror::Error;

use crate::funding::RoundStage;
use crate::ledger::HolderId;
use crate::units::MicroPct;

pub type EquityResult<T> = Result<T, EquityError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EquityError {
    /// Employee/advisor/executive grant larger than the unallocated pool.
    #[error("insufficient equity pool: requested {requested}, available {available}")]
    InsufficientPool {
        requested: MicroPct,
        available: MicroPct,
    },

    /// Holder does not own enough to give up the requested amount.
    #[error("insufficient equity for {holder}: requested {requested}, held {held}")]
    InsufficientEquity {
        holder: HolderId,
        requested: MicroPct,
        held: MicroPct,
    },

    /// Issue would consume the whole company or push an entry below zero.
    #[error("overdilution: cannot issue {issue} ({reason})")]
    Overdilute { issue: MicroPct, reason: String },

    /// Round opened out of the fixed stage order.
    #[error("invalid round sequence: {requested} requires {missing}")]
    InvalidRoundSequence {
        requested: RoundStage,
        missing: String,
    },

    /// Sum of ownership is not 100% after correction, or a snapshot arrived broken.
    #[error("ledger invariant violated: {detail}")]
    LedgerInvariantViolation { detail: String },

    #[error("negative exit consideration: {consideration}")]
    NegativeConsideration { consideration: f64 },

    #[error("unknown holder: {0}")]
    UnknownHolder(HolderId),

    /// Operation not valid for this holder kind (e.g. pool grant to a founder).
    #[error("invalid holder {holder}: {reason}")]
    InvalidHolder { holder: HolderId, reason: String },

    #[error("invalid {field}: {value}")]
    InvalidAmount { field: &'static str, value: f64 },

    #[error("{0} has no pro-rata rights")]
    NoProRataRights(HolderId),

    #[error("pro-rata elections total {elected} exceed round size {round}")]
    ProRataExceedsRound { elected: f64, round: f64 },
}

impl EquityError {
    /// Fatal errors end the simulation session; everything else is a rejected action.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EquityError::LedgerInvariantViolation { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EquityError::InsufficientPool { .. } => "insufficient_pool",
            EquityError::InsufficientEquity { .. } => "insufficient_equity",
            EquityError::Overdilute { .. } => "overdilute",
            EquityError::InvalidRoundSequence { .. } => "invalid_round_sequence",
            EquityError::LedgerInvariantViolation { .. } => "ledger_invariant_violation",
            EquityError::NegativeConsideration { .. } => "negative_consideration",
            EquityError::UnknownHolder(_) => "unknown_holder",
            EquityError::InvalidHolder { .. } => "invalid_holder",
            EquityError::InvalidAmount { .. } => "invalid_amount",
            EquityError::NoProRataRights(_) => "no_pro_rata_rights",
            EquityError::ProRataExceedsRound { .. } => "pro_rata_exceeds_round",
        }
    }
}

/// Reject NaN, infinities and negatives for a dollar input.
pub(crate) fn non_negative(field: &'static str, value: f64) -> EquityResult<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(EquityError::InvalidAmount { field, value })
    }
}

/// Reject anything that is not a strictly positive finite dollar amount.
pub(crate) fn positive(field: &'static str, value: f64) -> EquityResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(EquityError::InvalidAmount { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_invariant_violation_is_fatal() {
        let fatal = EquityError::LedgerInvariantViolation {
            detail: "sum 99.9%".to_string(),
        };
        let soft = EquityError::InsufficientPool {
            requested: MicroPct::from_percent(5.0).unwrap(),
            available: MicroPct::from_percent(1.0).unwrap(),
        };
        assert!(fatal.is_fatal());
        assert!(!soft.is_fatal());
        assert_eq!(soft.kind(), "insufficient_pool");
    }

    #[test]
    fn test_error_messages_name_the_problem() {
        let err = EquityError::InvalidRoundSequence {
            requested: RoundStage::SeriesB,
            missing: "Series A".to_string(),
        };
        assert_eq!(err.to_string(), "invalid round sequence: Series B requires Series A");
    }

    #[test]
    fn test_amount_guards() {
        assert!(positive("amount", 0.0).is_err());
        assert!(positive("amount", f64::NAN).is_err());
        assert_eq!(non_negative("valuation", 0.0), Ok(0.0));
        assert!(non_negative("valuation", -1.0).is_err());
    }
}
