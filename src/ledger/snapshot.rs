//! Serializable ledger state with a content digest for replay checks.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::entry::{CapTableEntry, HolderId, SafeNote};
use crate::funding::FundingRound;
use crate::units::MicroPct;

/// Every field of an [`OwnershipLedger`](super::OwnershipLedger). The persistence layer
/// picks the format; the engine only guarantees serde round trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub company_id: String,
    pub founder: HolderId,
    pub month: u32,
    /// Notional fully diluted share count used for per-share pricing
    pub share_count: f64,
    pub entries: Vec<CapTableEntry>,
    pub archived: Vec<CapTableEntry>,
    pub rounds: Vec<FundingRound>,
    pub pending_safes: Vec<SafeNote>,
}

impl LedgerSnapshot {
    /// SHA-256 over the JSON form, hex encoded.
    pub fn digest(&self) -> String {
        // Plain data with string keys; serde_json cannot fail here.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }

    pub fn total(&self) -> MicroPct {
        self.entries.iter().map(|e| e.equity).sum()
    }

    pub fn entry(&self, id: &HolderId) -> Option<&CapTableEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }
}
