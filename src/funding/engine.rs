use serde::{Deserialize, Serialize};

use super::round::{FundingRound, RoundStage};
use super::term_sheet::TermSheet;
use crate::error::{positive, EquityError, EquityResult};
use crate::ledger::{Allocation, DilutionReport, HolderId, InvestorStake, OwnershipLedger};
use crate::logging::{self, log_round, Domain, Level};
use crate::portfolio::PortfolioPosition;
use crate::terms::{self, PricedRound};
use crate::units::MicroPct;

/// An existing holder buying into the round to hold its percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProRataElection {
    pub holder: HolderId,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeConversion {
    pub holder: HolderId,
    pub amount: f64,
    pub conversion_price: f64,
    pub shares: f64,
    /// Percent held right after conversion, before the round's new money
    pub equity: MicroPct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiDilutionAdjustment {
    pub holder: HolderId,
    pub old_price: f64,
    pub new_price: f64,
    /// Extra percent moved from the founders to the holder
    pub extra: MicroPct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub round: FundingRound,
    pub dilution: DilutionReport,
    pub conversions: Vec<SafeConversion>,
    pub adjustments: Vec<AntiDilutionAdjustment>,
}

/// The stage's predecessor must be closed and the stage itself must not be.
pub fn check_sequence(ledger: &OwnershipLedger, stage: RoundStage) -> EquityResult<()> {
    if ledger.has_closed(stage) {
        return Err(EquityError::InvalidRoundSequence {
            requested: stage,
            missing: "a stage that has not closed yet".to_string(),
        });
    }
    if let Some(prev) = stage.required_predecessor() {
        if !ledger.has_closed(prev) {
            return Err(EquityError::InvalidRoundSequence {
                requested: stage,
                missing: prev.to_string(),
            });
        }
    }
    Ok(())
}

/// Dollars `holder` must put into `sheet` to keep its current percent: percent × amount,
/// rounded up, plus two micro-percent units of slack so flooring during dilution can
/// never leave the holder below where it started.
pub fn pro_rata_allocation(
    ledger: &OwnershipLedger,
    holder: &HolderId,
    sheet: &TermSheet,
) -> EquityResult<f64> {
    let entry = ledger
        .entry(holder)
        .ok_or_else(|| EquityError::UnknownHolder(holder.clone()))?;
    let has_rights = entry
        .kind
        .stake()
        .map(|s| s.terms.pro_rata_rights)
        .unwrap_or(false);
    if !has_rights {
        return Err(EquityError::NoProRataRights(holder.clone()));
    }
    let slack = 2.0 * sheet.post_money() / MicroPct::ONE_HUNDRED.units() as f64;
    Ok((entry.equity.as_fraction() * sheet.amount + slack).ceil())
}

/// Close `sheet` on `ledger`.
///
/// Works on a copy of the ledger and swaps it in only when every step succeeded, so a
/// rejected round leaves both the ledger and `positions` untouched.
pub fn apply_round(
    ledger: &mut OwnershipLedger,
    sheet: &TermSheet,
    investors: &[HolderId],
    elections: &[ProRataElection],
    positions: &mut [PortfolioPosition],
) -> EquityResult<RoundOutcome> {
    let mut next = ledger.clone();
    let outcome = close_round(&mut next, sheet, investors, elections)
        .map_err(|e| ledger.rejected("apply_round", e))?;

    for position in positions
        .iter_mut()
        .filter(|p| p.company_id == next.company_id())
    {
        position.record_round(&next, sheet.stage);
    }
    *ledger = next;

    log_round(
        ledger.company_id(),
        sheet.stage.as_str(),
        sheet.amount,
        sheet.pre_money,
        outcome.round.equity_issued().as_percent(),
    );
    Ok(outcome)
}

fn close_round(
    ledger: &mut OwnershipLedger,
    sheet: &TermSheet,
    investors: &[HolderId],
    elections: &[ProRataElection],
) -> EquityResult<RoundOutcome> {
    check_sequence(ledger, sheet.stage)?;
    let pre_money = positive("pre_money", sheet.pre_money)?;
    let amount = positive("amount", sheet.amount)?;
    if investors.is_empty() && elections.is_empty() {
        return Err(EquityError::InvalidAmount {
            field: "investors",
            value: 0.0,
        });
    }
    let post_money = pre_money + amount;
    let previous_price = ledger.last_price_per_share();

    let conversions = convert_safes(ledger, sheet)?;

    // Conversions sit inside the pre-money, so the price uses the enlarged share count.
    let shares_before = ledger.share_count();
    let price = pre_money / shares_before;
    let issue = sheet.equity_issued();

    let elected = validate_elections(ledger, elections, amount)?;
    // Without a new investor the elections must take the whole round, or the round would
    // record money nobody put in.
    if investors.is_empty() && elected < amount {
        return Err(EquityError::InvalidAmount {
            field: "unallocated_round_amount",
            value: amount - elected,
        });
    }
    let mut allocations = Vec::new();
    let mut pro_rata_total = MicroPct::ZERO;
    for election in elections {
        let pct = MicroPct::from_ratio(election.amount, post_money).unwrap_or(MicroPct::ZERO);
        pro_rata_total += pct;
        let mut stake = InvestorStake::new(election.amount, sheet.terms.clone(), Some(sheet.stage));
        stake.issue_price = price;
        allocations.push(Allocation::investor(election.holder.clone(), pct, stake));
    }

    // New investors split what pro-rata left over; the lead takes the floor residue.
    let remaining = issue.saturating_sub(pro_rata_total);
    let remaining_dollars = (amount - elected).max(0.0);
    if !investors.is_empty() && !remaining.is_zero() {
        let n = investors.len() as u64;
        let each = remaining.scale(1, n);
        let lead_extra = remaining.saturating_sub(MicroPct::from_units(each.units() * n));
        for (i, holder) in investors.iter().enumerate() {
            let share = if i == 0 { each + lead_extra } else { each };
            let mut stake = InvestorStake::new(
                remaining_dollars / n as f64,
                sheet.terms.clone(),
                Some(sheet.stage),
            );
            stake.issue_price = price;
            allocations.push(Allocation::investor(holder.clone(), share, stake));
        }
    }
    allocations.retain(|a| !a.equity.is_zero());
    let dilution = ledger.dilute_into(allocations)?;

    let down_round = previous_price.map(|p| price < p).unwrap_or(false);
    let adjustments = if down_round {
        anti_dilution(ledger, sheet, investors, elections, shares_before, price)?
    } else {
        Vec::new()
    };

    let mut participants: Vec<HolderId> = investors.to_vec();
    for election in elections {
        if !participants.contains(&election.holder) {
            participants.push(election.holder.clone());
        }
    }
    let round = FundingRound {
        stage: sheet.stage,
        amount_raised: amount,
        pre_money,
        investors: participants,
        month: ledger.month(),
        price_per_share: price,
        down_round,
    };
    ledger.record_round(round.clone(), shares_before + amount / price);

    Ok(RoundOutcome {
        round,
        dilution,
        conversions,
        adjustments,
    })
}

/// Every election needs a holder with pro-rata rights; together they cannot exceed the
/// round. Returns the total elected dollars.
fn validate_elections(
    ledger: &OwnershipLedger,
    elections: &[ProRataElection],
    amount: f64,
) -> EquityResult<f64> {
    let mut total = 0.0;
    for election in elections {
        positive("pro_rata_amount", election.amount)?;
        let entry = ledger
            .entry(&election.holder)
            .ok_or_else(|| EquityError::UnknownHolder(election.holder.clone()))?;
        let has_rights = entry
            .kind
            .stake()
            .map(|s| s.terms.pro_rata_rights)
            .unwrap_or(false);
        if !has_rights {
            return Err(EquityError::NoProRataRights(election.holder.clone()));
        }
        total += election.amount;
    }
    if total > amount {
        return Err(EquityError::ProRataExceedsRound {
            elected: total,
            round: amount,
        });
    }
    Ok(total)
}

/// Convert every pending SAFE at this round's price inside the pre-money. Holders get
/// `shares / (S + N)` of the company before the new money comes in.
fn convert_safes(
    ledger: &mut OwnershipLedger,
    sheet: &TermSheet,
) -> EquityResult<Vec<SafeConversion>> {
    if ledger.pending_safes().is_empty() {
        return Ok(Vec::new());
    }
    let shares = ledger.share_count();
    let priced = PricedRound {
        pre_money: sheet.pre_money,
        amount: sheet.amount,
        shares_outstanding: shares,
    };
    let notes = ledger.pending_safes().to_vec();
    let mut conversions = Vec::new();
    let mut new_shares = 0.0;
    for note in &notes {
        let price = terms::safe_conversion_price(&note.terms, &priced);
        if price <= 0.0 || !price.is_finite() {
            return Err(EquityError::InvalidAmount {
                field: "conversion_price",
                value: price,
            });
        }
        let n = note.amount / price;
        new_shares += n;
        conversions.push(SafeConversion {
            holder: note.holder.clone(),
            amount: note.amount,
            conversion_price: price,
            shares: n,
            equity: MicroPct::ZERO,
        });
    }
    let total_shares = shares + new_shares;
    let mut allocations = Vec::new();
    for (note, conv) in notes.iter().zip(conversions.iter_mut()) {
        conv.equity = MicroPct::from_ratio(conv.shares, total_shares).unwrap_or(MicroPct::ZERO);
        let mut stake = InvestorStake::new(note.amount, note.terms.converted(), Some(sheet.stage));
        stake.issue_price = conv.conversion_price;
        let mut alloc = Allocation::investor(note.holder.clone(), conv.equity, stake);
        alloc.name = note.name.clone();
        allocations.push(alloc);
    }
    allocations.retain(|a| !a.equity.is_zero());
    if !allocations.is_empty() {
        ledger.dilute_into(allocations)?;
    }
    ledger.take_pending_safes();
    ledger.set_share_count(total_shares);
    for conv in &conversions {
        logging::log(
            Level::Info,
            Domain::Terms,
            "safe_converted",
            logging::obj(&[
                ("company", logging::v_str(ledger.company_id())),
                ("holder", logging::v_str(conv.holder.as_str())),
                ("conversion_price", logging::v_num(conv.conversion_price)),
                ("pct", logging::v_num(conv.equity.as_percent())),
            ]),
        );
    }
    Ok(conversions)
}

/// Broad-based weighted-average protection. Each protected holder that bought above
/// the new price is re-priced, and the extra shares it is owed come out of the
/// founders' vested equity. Holders that are new in this round are not protected by it.
fn anti_dilution(
    ledger: &mut OwnershipLedger,
    sheet: &TermSheet,
    investors: &[HolderId],
    elections: &[ProRataElection],
    shares_before: f64,
    new_price: f64,
) -> EquityResult<Vec<AntiDilutionAdjustment>> {
    let mut adjustments = Vec::new();
    for entry in ledger.entries() {
        let Some(stake) = entry.kind.stake() else {
            continue;
        };
        let fresh = stake.stage == Some(sheet.stage)
            && (investors.contains(&entry.id) || elections.iter().any(|e| e.holder == entry.id));
        if fresh || !stake.terms.anti_dilution || stake.issue_price <= new_price {
            continue;
        }
        let old_price = stake.issue_price;
        let adjusted =
            terms::weighted_average_price(old_price, shares_before, sheet.amount, new_price);
        if adjusted >= old_price {
            continue;
        }
        let extra_fraction = entry.equity.as_fraction() * (old_price / adjusted - 1.0);
        let extra = MicroPct::from_ratio(extra_fraction, 1.0).unwrap_or(MicroPct::ZERO);
        if extra.is_zero() {
            continue;
        }
        adjustments.push(AntiDilutionAdjustment {
            holder: entry.id.clone(),
            old_price,
            new_price: adjusted,
            extra,
        });
    }
    if adjustments.is_empty() {
        return Ok(adjustments);
    }

    // Founders can only give what has vested; scale every adjustment down together.
    let needed: MicroPct = adjustments.iter().map(|a| a.extra).sum();
    let available: MicroPct = ledger
        .entries()
        .iter()
        .filter(|e| e.is_founder())
        .map(|e| e.realizable())
        .sum();
    if needed > available {
        for adj in adjustments.iter_mut() {
            adj.extra = adj.extra.scale(available.units(), needed.units());
        }
    }
    let grants: Vec<(HolderId, MicroPct)> = adjustments
        .iter()
        .filter(|a| !a.extra.is_zero())
        .map(|a| (a.holder.clone(), a.extra))
        .collect();
    ledger.reallocate_from_founders(&grants)?;

    for adj in &adjustments {
        if let Some(stake) = ledger.stake_mut(&adj.holder) {
            stake.issue_price = adj.new_price;
        }
        logging::log(
            Level::Info,
            Domain::Terms,
            "anti_dilution",
            logging::obj(&[
                ("company", logging::v_str(ledger.company_id())),
                ("holder", logging::v_str(adj.holder.as_str())),
                ("old_price", logging::v_num(adj.old_price)),
                ("new_price", logging::v_num(adj.new_price)),
                ("extra_pct", logging::v_num(adj.extra.as_percent())),
            ]),
        );
    }
    Ok(adjustments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terms::InvestmentTerms;

    fn pct(p: f64) -> MicroPct {
        MicroPct::from_percent(p).unwrap()
    }

    fn seed_sheet() -> TermSheet {
        TermSheet::new(RoundStage::Seed, 8_000_000.0, 2_000_000.0, InvestmentTerms::preferred(1.0))
    }

    #[test]
    fn test_sequence_rules() {
        let mut ledger = OwnershipLedger::new("acme", "alice");
        assert!(check_sequence(&ledger, RoundStage::PreSeed).is_ok());
        assert!(check_sequence(&ledger, RoundStage::Seed).is_ok());
        assert!(check_sequence(&ledger, RoundStage::SeriesA).is_err());
        apply_round(&mut ledger, &seed_sheet(), &["vc".into()], &[], &mut []).unwrap();
        assert!(check_sequence(&ledger, RoundStage::SeriesA).is_ok());
        assert!(matches!(
            check_sequence(&ledger, RoundStage::Seed),
            Err(EquityError::InvalidRoundSequence { .. })
        ));
    }

    #[test]
    fn test_round_records_and_prices() {
        let mut ledger = OwnershipLedger::new("acme", "alice");
        let outcome = apply_round(&mut ledger, &seed_sheet(), &["vc".into()], &[], &mut []).unwrap();
        assert_eq!(outcome.round.post_money(), 10_000_000.0);
        assert_eq!(outcome.round.equity_issued(), pct(20.0));
        assert!((outcome.round.price_per_share - 0.8).abs() < 1e-12);
        assert!((ledger.share_count() - 12_500_000.0).abs() < 1e-6);
        assert_eq!(ledger.percent_of(&"vc".into()), pct(20.0));
        assert_eq!(ledger.rounds().len(), 1);
    }

    #[test]
    fn test_investors_split_evenly_lead_takes_residue() {
        let mut ledger = OwnershipLedger::new("acme", "alice");
        let sheet = TermSheet::new(RoundStage::Seed, 7_000_000.0, 3_000_000.0, InvestmentTerms::preferred(1.0));
        apply_round(&mut ledger, &sheet, &["a".into(), "b".into(), "c".into()], &[], &mut []).unwrap();
        let a = ledger.percent_of(&"a".into());
        let b = ledger.percent_of(&"b".into());
        assert_eq!(a.units(), 10_000_000);
        assert_eq!(b.units(), 10_000_000);
        let stake = ledger.entry(&"b".into()).unwrap().kind.stake().unwrap();
        assert!((stake.amount_invested - 1_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_election_without_rights_rejected() {
        let mut ledger = OwnershipLedger::new("acme", "alice");
        let sheet = TermSheet::new(RoundStage::Seed, 8_000_000.0, 2_000_000.0, InvestmentTerms::common());
        apply_round(&mut ledger, &sheet, &["angel".into()], &[], &mut []).unwrap();
        let before = ledger.clone();
        let a = TermSheet::new(RoundStage::SeriesA, 30_000_000.0, 10_000_000.0, InvestmentTerms::preferred(1.0));
        let err = apply_round(
            &mut ledger,
            &a,
            &["fund".into()],
            &[ProRataElection {
                holder: "angel".into(),
                amount: 100_000.0,
            }],
            &mut [],
        )
        .unwrap_err();
        assert!(matches!(err, EquityError::NoProRataRights(_)));
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_elections_over_round_rejected() {
        let mut ledger = OwnershipLedger::new("acme", "alice");
        apply_round(&mut ledger, &seed_sheet(), &["vc".into()], &[], &mut []).unwrap();
        let a = TermSheet::new(RoundStage::SeriesA, 30_000_000.0, 10_000_000.0, InvestmentTerms::preferred(1.0));
        let err = apply_round(
            &mut ledger,
            &a,
            &["fund".into()],
            &[ProRataElection {
                holder: "vc".into(),
                amount: 11_000_000.0,
            }],
            &mut [],
        )
        .unwrap_err();
        assert!(matches!(err, EquityError::ProRataExceedsRound { .. }));
    }

    #[test]
    fn test_elections_alone_must_cover_round() {
        let mut ledger = OwnershipLedger::new("acme", "alice");
        apply_round(&mut ledger, &seed_sheet(), &["vc".into()], &[], &mut []).unwrap();
        let before = ledger.clone();
        let a = TermSheet::new(RoundStage::SeriesA, 40_000_000.0, 10_000_000.0, InvestmentTerms::preferred(1.0));
        let partial = [ProRataElection {
            holder: "vc".into(),
            amount: 2_000_000.0,
        }];
        let err = apply_round(&mut ledger, &a, &[], &partial, &mut []).unwrap_err();
        assert!(matches!(
            err,
            EquityError::InvalidAmount { field: "unallocated_round_amount", value } if (value - 8_000_000.0).abs() < 1e-6
        ));
        assert_eq!(ledger, before);

        // The same holder taking the whole round is a consistent insider round.
        let full = [ProRataElection {
            holder: "vc".into(),
            amount: 10_000_000.0,
        }];
        let outcome = apply_round(&mut ledger, &a, &[], &full, &mut []).unwrap();
        assert_eq!(outcome.round.equity_issued(), pct(20.0));
        assert_eq!(outcome.dilution.issued, outcome.round.equity_issued());
    }

    #[test]
    fn test_safe_converts_inside_pre_money() {
        let mut ledger = OwnershipLedger::new("acme", "alice");
        ledger
            .issue_safe("angel".into(), 500_000.0, InvestmentTerms::safe(0.2, 0.0))
            .unwrap();
        let outcome = apply_round(&mut ledger, &seed_sheet(), &["vc".into()], &[], &mut []).unwrap();
        assert_eq!(outcome.conversions.len(), 1);
        // $8M pre on 10M shares = $0.80, discounted 20% → $0.64
        assert!((outcome.conversions[0].conversion_price - 0.64).abs() < 1e-12);
        assert!(ledger.pending_safes().is_empty());
        // New money still buys amount / post
        assert_eq!(ledger.percent_of(&"vc".into()), pct(20.0));
        let angel = ledger.entry(&"angel".into()).unwrap();
        assert!(angel.kind.stake().unwrap().terms.has_preference());
        assert_eq!(ledger.total(), MicroPct::ONE_HUNDRED);
    }

    #[test]
    fn test_down_round_adjusts_protected_holder() {
        let mut ledger = OwnershipLedger::new("acme", "alice");
        apply_round(&mut ledger, &seed_sheet(), &["vc".into()], &[], &mut []).unwrap();
        let vc_before = ledger.percent_of(&"vc".into());
        // Seed price $0.80 on 12.5M shares; $5M pre is $0.40
        let a = TermSheet::new(RoundStage::SeriesA, 5_000_000.0, 1_000_000.0, InvestmentTerms::preferred(1.0));
        let outcome = apply_round(&mut ledger, &a, &["fund".into()], &[], &mut []).unwrap();
        assert!(outcome.round.down_round);
        assert_eq!(outcome.adjustments.len(), 1);
        let adj = &outcome.adjustments[0];
        assert!(adj.new_price < adj.old_price && adj.new_price > 0.4);
        let plain = vc_before.scale(5, 6);
        assert!(ledger.percent_of(&"vc".into()) > plain);
        assert_eq!(ledger.total(), MicroPct::ONE_HUNDRED);
    }
}
