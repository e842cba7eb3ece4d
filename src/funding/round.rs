use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ledger::HolderId;
use crate::units::MicroPct;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStage {
    PreSeed,
    Seed,
    SeriesA,
    SeriesB,
    SeriesC,
    SeriesD,
    SeriesE,
}

impl RoundStage {
    pub const ALL: [RoundStage; 7] = [
        RoundStage::PreSeed,
        RoundStage::Seed,
        RoundStage::SeriesA,
        RoundStage::SeriesB,
        RoundStage::SeriesC,
        RoundStage::SeriesD,
        RoundStage::SeriesE,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStage::PreSeed => "Pre-Seed",
            RoundStage::Seed => "Seed",
            RoundStage::SeriesA => "Series A",
            RoundStage::SeriesB => "Series B",
            RoundStage::SeriesC => "Series C",
            RoundStage::SeriesD => "Series D",
            RoundStage::SeriesE => "Series E",
        }
    }

    /// Stage that must already be closed before this one can open.
    pub fn required_predecessor(&self) -> Option<RoundStage> {
        match self {
            RoundStage::PreSeed | RoundStage::Seed => None,
            RoundStage::SeriesA => Some(RoundStage::Seed),
            RoundStage::SeriesB => Some(RoundStage::SeriesA),
            RoundStage::SeriesC => Some(RoundStage::SeriesB),
            RoundStage::SeriesD => Some(RoundStage::SeriesC),
            RoundStage::SeriesE => Some(RoundStage::SeriesD),
        }
    }

    pub fn next(&self) -> Option<RoundStage> {
        let idx = Self::ALL.iter().position(|s| s == self)?;
        Self::ALL.get(idx + 1).copied()
    }
}

impl fmt::Display for RoundStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoundStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match norm.as_str() {
            "preseed" | "angel" => Ok(RoundStage::PreSeed),
            "seed" => Ok(RoundStage::Seed),
            "seriesa" | "a" => Ok(RoundStage::SeriesA),
            "seriesb" | "b" => Ok(RoundStage::SeriesB),
            "seriesc" | "c" => Ok(RoundStage::SeriesC),
            "seriesd" | "d" => Ok(RoundStage::SeriesD),
            "seriese" | "e" => Ok(RoundStage::SeriesE),
            _ => Err(format!("unknown round stage: {}", s)),
        }
    }
}

/// A closed round. Post-money and equity issued are always derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRound {
    pub stage: RoundStage,
    pub amount_raised: f64,
    pub pre_money: f64,
    pub investors: Vec<HolderId>,
    pub month: u32,
    /// Pre-money over the fully diluted shares before the round
    pub price_per_share: f64,
    /// Priced per share below the previous round
    pub down_round: bool,
}

impl FundingRound {
    pub fn post_money(&self) -> f64 {
        self.pre_money + self.amount_raised
    }

    pub fn equity_issued(&self) -> MicroPct {
        MicroPct::from_ratio(self.amount_raised, self.post_money()).unwrap_or(MicroPct::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        for pair in RoundStage::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_predecessors() {
        assert_eq!(RoundStage::PreSeed.required_predecessor(), None);
        assert_eq!(RoundStage::Seed.required_predecessor(), None);
        assert_eq!(RoundStage::SeriesA.required_predecessor(), Some(RoundStage::Seed));
        assert_eq!(RoundStage::SeriesE.required_predecessor(), Some(RoundStage::SeriesD));
    }

    #[test]
    fn test_parse_display_names() {
        for stage in RoundStage::ALL {
            assert_eq!(stage.to_string().parse::<RoundStage>(), Ok(stage));
        }
        assert_eq!("series_b".parse::<RoundStage>(), Ok(RoundStage::SeriesB));
        assert!("series z".parse::<RoundStage>().is_err());
    }

    #[test]
    fn test_round_derives_post_and_issue() {
        let round = FundingRound {
            stage: RoundStage::Seed,
            amount_raised: 2_000_000.0,
            pre_money: 8_000_000.0,
            investors: vec![],
            month: 3,
            price_per_share: 0.8,
            down_round: false,
        };
        assert_eq!(round.post_money(), 10_000_000.0);
        assert_eq!(round.equity_issued(), MicroPct::from_percent(20.0).unwrap());
    }
}
