//! Capitalization tables and funding rounds for simulated startups.
//!
//! The [`ledger::OwnershipLedger`] is the single source of truth for who owns what.
//! Vesting, funding rounds and exits all read or mutate it through validated operations
//! that keep ownership at exactly 100%.

pub mod config;
pub mod engine;
pub mod error;
pub mod funding;
pub mod ledger;
pub mod logging;
pub mod portfolio;
pub mod terms;
pub mod units;
pub mod verify;
pub mod vesting;
pub mod waterfall;

pub use config::EngineConfig;
pub use error::{EquityError, EquityResult};
pub use ledger::{HolderId, HolderKind, OwnershipLedger};
pub use units::MicroPct;
