//! Event-driven replay of a company's history.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  CapEvents   │────►│   Reducer    │────►│   Ledger     │
//! │ (JSON lines) │     │  (pure fn)   │     │  (digested)  │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```

pub mod events;
pub mod reducer;

pub use events::CapEvent;
pub use reducer::{reduce, replay, CompanyState, Outcome, ReducerOutput};
