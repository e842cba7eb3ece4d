//! Standalone checks over ledger state, shared by the ledger, the waterfall and the
//! fuzz driver.

pub mod invariants;
