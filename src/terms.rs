//! Negotiated investor rights and their numeric effect.
//!
//! Terms never change a ledger percentage by themselves. They decide how a SAFE converts
//! at a priced round, how much extra equity a protected holder gets on a down round, and
//! where a holder sits in the exit waterfall.

use serde::{Deserialize, Serialize};

use crate::units::MicroPct;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instrument {
    Common,
    Preferred,
    Safe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentTerms {
    pub instrument: Instrument,
    /// 0 for none, 1.0 for 1x, 2.0 for 2x
    pub liquidation_preference_multiple: f64,
    /// Preference plus pro-rata share, instead of the greater of the two
    pub participating: bool,
    /// Broad-based weighted-average protection on down rounds
    pub anti_dilution: bool,
    pub pro_rata_rights: bool,
    pub info_rights: bool,
    pub board_seats: u32,
    /// SAFE discount to the next priced round, 0.20 = 20%
    pub conversion_discount: f64,
    /// SAFE valuation cap in dollars, 0 = uncapped
    pub valuation_cap: f64,
}

impl InvestmentTerms {
    pub fn common() -> Self {
        Self {
            instrument: Instrument::Common,
            liquidation_preference_multiple: 0.0,
            participating: false,
            anti_dilution: false,
            pro_rata_rights: false,
            info_rights: false,
            board_seats: 0,
            conversion_discount: 0.0,
            valuation_cap: 0.0,
        }
    }

    /// Standard VC preferred: non-participating, pro-rata, info rights, anti-dilution.
    pub fn preferred(multiple: f64) -> Self {
        Self {
            instrument: Instrument::Preferred,
            liquidation_preference_multiple: multiple.max(0.0),
            anti_dilution: true,
            pro_rata_rights: true,
            info_rights: true,
            ..Self::common()
        }
    }

    pub fn participating_preferred(multiple: f64) -> Self {
        Self {
            participating: true,
            ..Self::preferred(multiple)
        }
    }

    pub fn safe(discount: f64, cap: f64) -> Self {
        Self {
            instrument: Instrument::Safe,
            pro_rata_rights: true,
            conversion_discount: discount.clamp(0.0, 0.99),
            valuation_cap: cap.max(0.0),
            ..Self::common()
        }
    }

    pub fn with_board_seats(mut self, seats: u32) -> Self {
        self.board_seats = seats;
        self
    }

    pub fn with_pro_rata(mut self, rights: bool) -> Self {
        self.pro_rata_rights = rights;
        self
    }

    pub fn has_preference(&self) -> bool {
        self.liquidation_preference_multiple > 0.0
    }

    /// Preference claim in dollars for a given invested amount.
    pub fn preference_claim(&self, amount_invested: f64) -> f64 {
        amount_invested * self.liquidation_preference_multiple
    }

    /// Terms a SAFE holder receives once converted at a priced round: standard 1x
    /// non-participating preferred, keeping its pro-rata right.
    pub fn converted(&self) -> Self {
        Self {
            board_seats: self.board_seats,
            pro_rata_rights: self.pro_rata_rights,
            ..Self::preferred(1.0)
        }
    }
}

/// Votes carried on a company board: one per seat, doubled when the embedding game grants
/// a modifier to this position.
pub fn board_vote_weight(terms: &InvestmentTerms, doubled: bool) -> u32 {
    let base = terms.board_seats;
    if doubled {
        base * 2
    } else {
        base
    }
}

// =============================================================================
// Priced round context
// =============================================================================

/// The numbers of a priced round that terms react to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricedRound {
    pub pre_money: f64,
    pub amount: f64,
    /// Notional fully diluted shares before the round
    pub shares_outstanding: f64,
}

impl PricedRound {
    pub fn post_money(&self) -> f64 {
        self.pre_money + self.amount
    }

    pub fn price_per_share(&self) -> f64 {
        if self.shares_outstanding > 0.0 {
            self.pre_money / self.shares_outstanding
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveEquity {
    /// Per-share price the holder effectively pays (SAFE) or paid (priced)
    pub conversion_price: f64,
    /// New notional shares created by a conversion, 0 for priced instruments
    pub new_shares: f64,
    /// Share of the cap table immediately before the round's new money
    pub pre_round: MicroPct,
    /// Share of the cap table after the round closes
    pub post_round: MicroPct,
}

/// Equity a position ends up with across a priced round.
///
/// A SAFE converts at the lower of the discounted round price and the cap price, which
/// is the option that gives the holder more shares. Conversion happens inside the
/// pre-money, so the round's own investors still get `amount / post`. Priced
/// instruments are simply diluted by `pre / post`.
pub fn effective_equity(
    terms: &InvestmentTerms,
    amount_invested: f64,
    current: MicroPct,
    round: &PricedRound,
) -> EffectiveEquity {
    let post = round.post_money();
    let dilution = |pct: MicroPct| -> MicroPct {
        if post <= 0.0 {
            return pct;
        }
        MicroPct::from_ratio(pct.as_fraction() * round.pre_money, post).unwrap_or(pct)
    };

    if terms.instrument != Instrument::Safe {
        return EffectiveEquity {
            conversion_price: round.price_per_share(),
            new_shares: 0.0,
            pre_round: current,
            post_round: dilution(current),
        };
    }

    let conversion_price = safe_conversion_price(terms, round);
    if conversion_price <= 0.0 || amount_invested <= 0.0 {
        return EffectiveEquity {
            conversion_price,
            new_shares: 0.0,
            pre_round: MicroPct::ZERO,
            post_round: MicroPct::ZERO,
        };
    }
    let new_shares = amount_invested / conversion_price;
    let pre_round = MicroPct::from_ratio(new_shares, round.shares_outstanding + new_shares)
        .unwrap_or(MicroPct::ZERO);
    EffectiveEquity {
        conversion_price,
        new_shares,
        pre_round,
        post_round: dilution(pre_round),
    }
}

/// min(round price × (1 − discount), cap / shares). Falls back to the round price when
/// the SAFE has neither a discount nor a cap.
pub fn safe_conversion_price(terms: &InvestmentTerms, round: &PricedRound) -> f64 {
    let price = round.price_per_share();
    let discounted = price * (1.0 - terms.conversion_discount.clamp(0.0, 0.99));
    let capped = if terms.valuation_cap > 0.0 && round.shares_outstanding > 0.0 {
        terms.valuation_cap / round.shares_outstanding
    } else {
        f64::INFINITY
    };
    discounted.min(capped)
}

/// Broad-based weighted-average conversion price after a down round.
///
/// `CP2 = CP1 × (A + B) / (A + C)` where A is shares outstanding before the round, B the
/// shares the new money would have bought at CP1 and C the shares it actually buys.
/// Returns `old_price` unchanged when the round is not priced below it.
pub fn weighted_average_price(
    old_price: f64,
    shares_outstanding: f64,
    amount: f64,
    new_price: f64,
) -> f64 {
    if new_price <= 0.0 || old_price <= 0.0 || new_price >= old_price {
        return old_price;
    }
    let a = shares_outstanding;
    let b = amount / old_price;
    let c = amount / new_price;
    old_price * (a + b) / (a + c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round() -> PricedRound {
        // $8M pre on 8M shares = $1.00/share, raising $2M
        PricedRound {
            pre_money: 8_000_000.0,
            amount: 2_000_000.0,
            shares_outstanding: 8_000_000.0,
        }
    }

    #[test]
    fn test_board_vote_weight() {
        let terms = InvestmentTerms::preferred(1.0).with_board_seats(1);
        assert_eq!(board_vote_weight(&terms, false), 1);
        assert_eq!(board_vote_weight(&terms, true), 2);
        assert_eq!(board_vote_weight(&InvestmentTerms::common(), true), 0);
    }

    #[test]
    fn test_safe_discount_beats_high_cap() {
        // 20% discount → $0.80; cap $10M / 8M shares = $1.25 → discount wins
        let terms = InvestmentTerms::safe(0.20, 10_000_000.0);
        let price = safe_conversion_price(&terms, &round());
        assert!((price - 0.80).abs() < 1e-12);
    }

    #[test]
    fn test_safe_cap_beats_small_discount() {
        // 10% discount → $0.90; cap $4M / 8M = $0.50 → cap wins
        let terms = InvestmentTerms::safe(0.10, 4_000_000.0);
        let eff = effective_equity(&terms, 500_000.0, MicroPct::ZERO, &round());
        assert!((eff.conversion_price - 0.50).abs() < 1e-12);
        assert!((eff.new_shares - 1_000_000.0).abs() < 1e-6);
        // 1M / 9M pre-round, then × 8/10
        let expected_pre = 1.0 / 9.0 * 100.0;
        assert!((eff.pre_round.as_percent() - expected_pre).abs() < 1e-5);
        assert!((eff.post_round.as_percent() - expected_pre * 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_safe_without_discount_or_cap_converts_at_round_price() {
        let terms = InvestmentTerms::safe(0.0, 0.0);
        assert!((safe_conversion_price(&terms, &round()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_priced_instrument_dilutes_by_pre_over_post() {
        let terms = InvestmentTerms::preferred(1.0);
        let eff = effective_equity(&terms, 1_000_000.0, MicroPct::from_percent(10.0).unwrap(), &round());
        assert_eq!(eff.post_round, MicroPct::from_percent(8.0).unwrap());
        assert_eq!(eff.new_shares, 0.0);
    }

    #[test]
    fn test_weighted_average_only_on_down_round() {
        assert_eq!(weighted_average_price(2.0, 1_000.0, 500.0, 2.5), 2.0);
        // A=1000, B=500/2=250, C=500/1=500 → 2 × 1250/1500
        let cp2 = weighted_average_price(2.0, 1_000.0, 500.0, 1.0);
        assert!((cp2 - 2.0 * 1250.0 / 1500.0).abs() < 1e-12);
        assert!(cp2 > 1.0 && cp2 < 2.0);
    }

    #[test]
    fn test_converted_safe_gets_one_x_preferred() {
        let safe = InvestmentTerms::safe(0.2, 0.0);
        let conv = safe.converted();
        assert_eq!(conv.instrument, Instrument::Preferred);
        assert_eq!(conv.liquidation_preference_multiple, 1.0);
        assert!(conv.pro_rata_rights);
        assert!(!conv.participating);
    }
}
