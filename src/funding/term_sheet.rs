use rand::Rng;
use serde::{Deserialize, Serialize};

use super::engine::check_sequence;
use super::round::RoundStage;
use crate::config::EngineConfig;
use crate::error::EquityResult;
use crate::ledger::OwnershipLedger;
use crate::logging::{self, Domain, Level};
use crate::terms::InvestmentTerms;
use crate::units::MicroPct;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetStyle {
    FounderFriendly,
    Standard,
    Growth,
    InvestorHeavy,
}

impl SheetStyle {
    pub fn label(&self) -> &'static str {
        match self {
            SheetStyle::FounderFriendly => "Founder-friendly",
            SheetStyle::Standard => "Standard",
            SheetStyle::Growth => "Growth-focused",
            SheetStyle::InvestorHeavy => "Investor-heavy",
        }
    }

    /// Slice of the equity-ask band this style samples from, as fractions of the band.
    fn ask_window(&self) -> (f64, f64) {
        match self {
            SheetStyle::FounderFriendly => (0.0, 0.4),
            SheetStyle::Standard => (0.25, 0.65),
            SheetStyle::Growth => (0.5, 0.9),
            SheetStyle::InvestorHeavy => (0.7, 1.0),
        }
    }

    fn terms(&self) -> InvestmentTerms {
        match self {
            SheetStyle::FounderFriendly => InvestmentTerms::preferred(1.0),
            SheetStyle::Standard => InvestmentTerms::preferred(1.0).with_board_seats(1),
            SheetStyle::Growth => InvestmentTerms::preferred(1.0).with_board_seats(1),
            SheetStyle::InvestorHeavy => {
                InvestmentTerms::participating_preferred(1.5).with_board_seats(2)
            }
        }
    }
}

/// Traction numbers the valuation sampler reacts to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyMetrics {
    pub monthly_revenue: f64,
    /// Month-over-month revenue growth, 0.10 = 10%
    pub growth_rate: f64,
}

impl CompanyMetrics {
    /// Annual revenue a typical company has when raising at this stage.
    fn reference_arr(stage: RoundStage) -> f64 {
        match stage {
            RoundStage::PreSeed => 0.0,
            RoundStage::Seed => 250_000.0,
            RoundStage::SeriesA => 2_000_000.0,
            RoundStage::SeriesB => 10_000_000.0,
            RoundStage::SeriesC => 30_000_000.0,
            RoundStage::SeriesD => 75_000_000.0,
            RoundStage::SeriesE => 150_000_000.0,
        }
    }

    /// Multiplier on the stage's pre-money band, between 0.6 and 1.4.
    pub fn valuation_factor(&self, stage: RoundStage) -> f64 {
        let growth = if self.growth_rate.is_finite() {
            (self.growth_rate / 0.10).clamp(0.0, 2.0)
        } else {
            0.0
        };
        let reference = Self::reference_arr(stage);
        let arr = self.monthly_revenue.max(0.0) * 12.0;
        let revenue = if reference <= 0.0 {
            1.0
        } else if arr.is_finite() {
            (arr / reference).clamp(0.0, 2.0)
        } else {
            0.0
        };
        0.6 + 0.2 * growth + 0.2 * revenue
    }
}

/// One offer. Post-money and equity issued are always derived from pre and amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermSheet {
    pub stage: RoundStage,
    pub style: SheetStyle,
    pub pre_money: f64,
    pub amount: f64,
    pub terms: InvestmentTerms,
}

impl TermSheet {
    pub fn new(stage: RoundStage, pre_money: f64, amount: f64, terms: InvestmentTerms) -> Self {
        Self {
            stage,
            style: SheetStyle::Standard,
            pre_money,
            amount,
            terms,
        }
    }

    pub fn post_money(&self) -> f64 {
        self.pre_money + self.amount
    }

    pub fn equity_issued(&self) -> MicroPct {
        MicroPct::from_ratio(self.amount, self.post_money()).unwrap_or(MicroPct::ZERO)
    }
}

/// 3 sheets, plus an investor-heavy fourth with `cfg.fourth_sheet_prob`.
///
/// Each sheet samples its own pre-money inside the stage band scaled by the metrics
/// factor, and its own equity ask inside the style's slice of the configured band.
pub fn generate_term_sheets<R: Rng>(
    stage: RoundStage,
    metrics: &CompanyMetrics,
    rng: &mut R,
    cfg: &EngineConfig,
) -> Vec<TermSheet> {
    let (lo, hi) = cfg.pre_money_band(stage);
    let factor = metrics.valuation_factor(stage);
    let mut styles = vec![SheetStyle::FounderFriendly, SheetStyle::Standard, SheetStyle::Growth];
    if rng.gen_bool(cfg.fourth_sheet_prob) {
        styles.push(SheetStyle::InvestorHeavy);
    }

    styles
        .into_iter()
        .map(|style| {
            let pre_money = (rng.gen_range(lo..=hi) * factor).round();
            let (w_lo, w_hi) = style.ask_window();
            let band = cfg.equity_ask_max_pct - cfg.equity_ask_min_pct;
            let ask_pct = cfg.equity_ask_min_pct + band * rng.gen_range(w_lo..=w_hi);
            let ask = ask_pct / 100.0;
            let amount = (pre_money * ask / (1.0 - ask)).round();
            TermSheet {
                stage,
                style,
                pre_money,
                amount,
                terms: style.terms(),
            }
        })
        .collect()
}

/// Sequence-checked sheet generation for a specific company.
pub fn open_term_sheets<R: Rng>(
    ledger: &OwnershipLedger,
    stage: RoundStage,
    metrics: &CompanyMetrics,
    rng: &mut R,
    cfg: &EngineConfig,
) -> EquityResult<Vec<TermSheet>> {
    check_sequence(ledger, stage).map_err(|e| ledger.rejected("open_term_sheets", e))?;
    let sheets = generate_term_sheets(stage, metrics, rng, cfg);
    logging::log(
        Level::Debug,
        Domain::Funding,
        "term_sheets",
        logging::obj(&[
            ("company", logging::v_str(ledger.company_id())),
            ("stage", logging::v_str(stage.as_str())),
            ("count", serde_json::json!(sheets.len())),
        ]),
    );
    Ok(sheets)
}
