//! Funding rounds: stage sequencing, term-sheet generation, and applying a chosen sheet
//! to the ledger.
//!
//! ```text
//!   open_term_sheets ──► TermSheet ──► apply_round
//!                                       ├─ sequence check
//!                                       ├─ SAFE conversion (inside the pre-money)
//!                                       ├─ pro-rata elections
//!                                       ├─ dilute_into (new investors + pro-rata)
//!                                       ├─ weighted-average anti-dilution on down rounds
//!                                       └─ FundingRound recorded, positions synced
//! ```

mod engine;
mod round;
mod term_sheet;

pub use engine::{
    apply_round, check_sequence, pro_rata_allocation, AntiDilutionAdjustment, ProRataElection,
    RoundOutcome, SafeConversion,
};
pub use round::{FundingRound, RoundStage};
pub use term_sheet::{generate_term_sheets, open_term_sheets, CompanyMetrics, SheetStyle, TermSheet};
