//! Exit proceeds, distributed in seniority order.
//!
//! 1. Preferred holders (investors with a liquidation multiple, plus unconverted SAFEs)
//!    are paid from the preference stack, latest stage first, pari passu within a stage.
//!    A non-participating holder converts to common and skips the stack when its share
//!    of what the stack leaves behind beats its preference. Conversions are settled one
//!    holder at a time against the real stack until no holder gains by switching.
//! 2. The remainder goes to common, converted and participating holders in proportion
//!    to their percent, re-normalized over those participants. The pool gets nothing.
//! 3. The last participant absorbs float residue, so payouts add up to the exact
//!    consideration.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EquityError, EquityResult};
use crate::ledger::{HolderId, LedgerSnapshot};
use crate::logging::{self, Domain, Level};
use crate::units::MicroPct;
use crate::verify::invariants;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    Ipo,
    Acquisition,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub kind: ExitKind,
    pub total_consideration: f64,
    pub month: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub holder: HolderId,
    pub equity: MicroPct,
    /// Paid out of the preference stack
    pub preference: f64,
    /// Share of the remainder
    pub participation: f64,
    /// Non-participating preferred that took its percent instead of its preference
    pub converted: bool,
    /// Payout over invested capital, investors only
    pub multiple: Option<f64>,
}

impl Payout {
    pub fn total(&self) -> f64 {
        self.preference + self.participation
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitOutcome {
    pub event: ExitEvent,
    pub payouts: Vec<Payout>,
    pub preference_paid: f64,
    pub remainder: f64,
}

impl ExitOutcome {
    pub fn payout_of(&self, holder: &HolderId) -> f64 {
        self.payouts
            .iter()
            .filter(|p| &p.holder == holder)
            .map(|p| p.total())
            .sum()
    }

    pub fn total(&self) -> f64 {
        self.payouts.iter().map(|p| p.total()).sum()
    }

    /// Immediate and deferred cash per holder for this exit kind.
    pub fn releases(&self, cfg: &EngineConfig) -> Vec<(HolderId, Release)> {
        self.payouts
            .iter()
            .map(|p| (p.holder.clone(), Release::for_exit(self.event.kind, p.total(), cfg)))
            .collect()
    }
}

/// When computed proceeds actually reach the holder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub immediate: f64,
    /// Lock-up for an IPO, the retained half of the stake for a secondary
    pub deferred: f64,
}

impl Release {
    pub fn for_exit(kind: ExitKind, payout: f64, cfg: &EngineConfig) -> Self {
        let fraction = match kind {
            ExitKind::Ipo => cfg.ipo_release,
            ExitKind::Acquisition => cfg.acquisition_release,
            ExitKind::Secondary => cfg.secondary_release,
        };
        let immediate = payout * fraction;
        Self {
            immediate,
            deferred: payout - immediate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Role {
    Common,
    Preferred {
        claim: f64,
        participating: bool,
        /// 0 for unconverted SAFEs, otherwise stage order + 1
        seniority: u8,
    },
}

#[derive(Clone)]
struct Line {
    payout: Payout,
    /// Role in the current distribution
    role: Role,
    /// Role the holder's terms give it before any conversion
    stacked: Role,
    invested: Option<f64>,
}

pub fn distribute(snapshot: &LedgerSnapshot, event: &ExitEvent) -> EquityResult<ExitOutcome> {
    let value = event.total_consideration;
    if !value.is_finite() || value < 0.0 {
        return Err(EquityError::NegativeConsideration {
            consideration: value,
        });
    }
    invariants::assert_ledger_invariants(&snapshot.entries)?;

    let mut lines = build_lines(snapshot);
    choose_conversions(&mut lines, value);
    let preference_paid = settle_lines(&mut lines, value);
    let remainder = (value - preference_paid).max(0.0);

    let payouts: Vec<Payout> = lines
        .into_iter()
        .map(|mut line| {
            line.payout.multiple = line
                .invested
                .filter(|amount| *amount > 0.0)
                .map(|amount| line.payout.total() / amount);
            line.payout
        })
        .collect();

    logging::log(
        Level::Info,
        Domain::Waterfall,
        "distributed",
        logging::obj(&[
            ("company", logging::v_str(&snapshot.company_id)),
            ("consideration", logging::v_num(value)),
            ("preference_paid", logging::v_num(preference_paid)),
            ("remainder", logging::v_num(remainder)),
            ("holders", serde_json::json!(payouts.len())),
        ]),
    );

    Ok(ExitOutcome {
        event: *event,
        payouts,
        preference_paid,
        remainder,
    })
}

fn build_lines(snapshot: &LedgerSnapshot) -> Vec<Line> {
    let mut lines = Vec::new();
    for entry in snapshot.entries.iter().filter(|e| !e.is_pool()) {
        let stake = entry.kind.stake();
        let role = match stake {
            Some(s) if s.terms.has_preference() => Role::Preferred {
                claim: s.preference_claim(),
                participating: s.terms.participating,
                seniority: s.stage.map(|st| st as u8 + 1).unwrap_or(1),
            },
            _ => Role::Common,
        };
        lines.push(Line {
            payout: Payout {
                holder: entry.id.clone(),
                equity: entry.equity,
                preference: 0.0,
                participation: 0.0,
                converted: false,
                multiple: None,
            },
            role,
            stacked: role,
            invested: stake.map(|s| s.amount_invested),
        });
    }
    for note in &snapshot.pending_safes {
        let role = Role::Preferred {
            claim: note.amount,
            participating: false,
            seniority: 0,
        };
        lines.push(Line {
            payout: Payout {
                holder: note.holder.clone(),
                equity: MicroPct::ZERO,
                preference: 0.0,
                participation: 0.0,
                converted: false,
                multiple: None,
            },
            role,
            stacked: role,
            invested: Some(note.amount),
        });
    }
    lines
}

/// Non-participating preferred holding a percent can take the greater of its
/// preference or its share of the remainder.
fn can_convert(line: &Line) -> bool {
    matches!(line.stacked, Role::Preferred { participating: false, .. }) && !line.payout.equity.is_zero()
}

fn flip(line: &mut Line) {
    if line.payout.converted {
        line.role = line.stacked;
        line.payout.converted = false;
    } else {
        line.role = Role::Common;
        line.payout.converted = true;
    }
}

/// Every non-participating holder starts on the stack. Each pass flips the holder that
/// gains most from switching, given everyone else's choice, until nobody gains.
fn choose_conversions(lines: &mut [Line], value: f64) {
    let candidates: Vec<usize> = (0..lines.len()).filter(|&i| can_convert(&lines[i])).collect();
    if candidates.is_empty() || value <= 0.0 {
        return;
    }
    let threshold = 1e-9 * value.max(1.0);
    for _ in 0..=candidates.len() * 4 {
        settle_lines(lines, value);
        let mut best: Option<(usize, f64)> = None;
        for &i in &candidates {
            let current = lines[i].payout.total();
            let mut trial = lines.to_vec();
            flip(&mut trial[i]);
            settle_lines(&mut trial, value);
            let gain = trial[i].payout.total() - current;
            if gain > threshold && best.map_or(true, |(_, g)| gain > g) {
                best = Some((i, gain));
            }
        }
        match best {
            Some((i, _)) => flip(&mut lines[i]),
            None => return,
        }
    }
    logging::log(
        Level::Warn,
        Domain::Waterfall,
        "conversion_unsettled",
        logging::obj(&[
            ("consideration", logging::v_num(value)),
            ("candidates", serde_json::json!(candidates.len())),
        ]),
    );
}

/// Pay the stack and split the remainder under the current roles. Returns the amount
/// paid out of the stack.
fn settle_lines(lines: &mut [Line], value: f64) -> f64 {
    for line in lines.iter_mut() {
        line.payout.preference = 0.0;
        line.payout.participation = 0.0;
    }
    let preference_paid = pay_preferences(lines, value);
    let remainder = (value - preference_paid).max(0.0);
    split_remainder(lines, remainder, value);
    preference_paid
}

/// Pay the stack senior-first. Returns total paid.
fn pay_preferences(lines: &mut [Line], value: f64) -> f64 {
    let mut tiers: Vec<u8> = lines
        .iter()
        .filter_map(|l| match l.role {
            Role::Preferred { seniority, .. } => Some(seniority),
            Role::Common => None,
        })
        .collect();
    tiers.sort_unstable_by(|a, b| b.cmp(a));
    tiers.dedup();

    let mut left = value;
    for tier in tiers {
        let members: Vec<usize> = (0..lines.len())
            .filter(|&i| matches!(lines[i].role, Role::Preferred { seniority, .. } if seniority == tier))
            .collect();
        let claims: f64 = members.iter().map(|&i| claim_of(&lines[i])).sum();
        if claims <= 0.0 {
            continue;
        }
        let ratio = if claims <= left { 1.0 } else { left / claims };
        let mut paid = 0.0;
        for (k, &i) in members.iter().enumerate() {
            let amount = if ratio < 1.0 && k + 1 == members.len() {
                // Last member of a short tier takes what is left, so the tier empties
                // the stack exactly.
                (left - paid).max(0.0)
            } else {
                claim_of(&lines[i]) * ratio
            };
            lines[i].payout.preference = amount;
            paid += amount;
        }
        left = (left - paid).max(0.0);
        if left <= 0.0 {
            break;
        }
    }
    value - left
}

fn claim_of(line: &Line) -> f64 {
    match line.role {
        Role::Preferred { claim, .. } => claim,
        Role::Common => 0.0,
    }
}

fn split_remainder(lines: &mut [Line], remainder: f64, value: f64) {
    let in_split = |l: &Line| match l.role {
        Role::Common => true,
        Role::Preferred { participating, .. } => participating,
    };
    let mut members: Vec<usize> = (0..lines.len())
        .filter(|&i| in_split(&lines[i]) && !lines[i].payout.equity.is_zero())
        .collect();
    // Nobody left to take the remainder: the preference takers own what is left.
    if members.is_empty() {
        members = (0..lines.len())
            .filter(|&i| !lines[i].payout.equity.is_zero())
            .collect();
    }
    let weight: u64 = members.iter().map(|&i| lines[i].payout.equity.units()).sum();
    if members.is_empty() || weight == 0 {
        return;
    }
    let mut given = 0.0;
    for (k, &i) in members.iter().enumerate() {
        let amount = if k + 1 == members.len() {
            remainder - given
        } else {
            remainder * lines[i].payout.equity.units() as f64 / weight as f64
        };
        lines[i].payout.participation = amount.max(0.0);
        given += amount;
    }
    // Float residue across the whole distribution lands on the last participant.
    let total: f64 = lines.iter().map(|l| l.payout.total()).sum();
    let residue = value - total;
    if let Some(&last) = members.last() {
        let fixed = lines[last].payout.participation + residue;
        lines[last].payout.participation = fixed.max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funding::RoundStage;
    use crate::ledger::{HolderKind, InvestorStake, OwnershipLedger};
    use crate::terms::InvestmentTerms;

    fn pct(p: f64) -> MicroPct {
        MicroPct::from_percent(p).unwrap()
    }

    fn exit(v: f64) -> ExitEvent {
        ExitEvent {
            kind: ExitKind::Acquisition,
            total_consideration: v,
            month: 24,
        }
    }

    fn with_investor(terms: InvestmentTerms, amount: f64, equity: f64) -> OwnershipLedger {
        let mut ledger = OwnershipLedger::new("acme", "alice");
        ledger
            .dilute_all(pct(equity), "vc".into(), InvestorStake::new(amount, terms, Some(RoundStage::Seed)))
            .unwrap();
        ledger
    }

    #[test]
    fn test_two_x_preference_wins() {
        let mut ledger = OwnershipLedger::new("acme", "alice");
        ledger.expand_pool(pct(10.0)).unwrap();
        ledger.grant("eng".into(), HolderKind::Employee, pct(5.0), None).unwrap();
        ledger
            .dilute_all(
                pct(10.0),
                "vc".into(),
                InvestorStake::new(1_000_000.0, InvestmentTerms::preferred(2.0), Some(RoundStage::Seed)),
            )
            .unwrap();
        let out = distribute(&ledger.snapshot(), &exit(5_000_000.0)).unwrap();
        assert!((out.payout_of(&"vc".into()) - 2_000_000.0).abs() < 1e-6);
        // 3M over alice 81% and eng 4.5%, pool excluded
        let alice = out.payout_of(&"alice".into());
        let eng = out.payout_of(&"eng".into());
        assert!((alice - 3_000_000.0 * 81.0 / 85.5).abs() < 1e-3);
        assert!((eng - 3_000_000.0 * 4.5 / 85.5).abs() < 1e-3);
        assert_eq!(out.payout_of(&"pool".into()), 0.0);
        assert!((out.total() - 5_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_non_participating_converts_when_percent_is_worth_more() {
        let ledger = with_investor(InvestmentTerms::preferred(1.0), 1_000_000.0, 10.0);
        let out = distribute(&ledger.snapshot(), &exit(50_000_000.0)).unwrap();
        let vc = out.payouts.iter().find(|p| p.holder.as_str() == "vc").unwrap();
        assert!(vc.converted);
        assert!((vc.total() - 5_000_000.0).abs() < 1e-3);
        assert!((vc.multiple.unwrap() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_participating_takes_both() {
        let ledger = with_investor(InvestmentTerms::participating_preferred(1.0), 1_000_000.0, 10.0);
        let out = distribute(&ledger.snapshot(), &exit(5_000_000.0)).unwrap();
        let vc = out.payouts.iter().find(|p| p.holder.as_str() == "vc").unwrap();
        assert!((vc.preference - 1_000_000.0).abs() < 1e-6);
        assert!((vc.participation - 400_000.0).abs() < 1e-3);
        assert!((out.total() - 5_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_later_stage_is_senior() {
        let mut ledger = with_investor(InvestmentTerms::preferred(1.0), 1_000_000.0, 10.0);
        ledger
            .dilute_all(
                pct(20.0),
                "growth".into(),
                InvestorStake::new(5_000_000.0, InvestmentTerms::preferred(1.0), Some(RoundStage::SeriesA)),
            )
            .unwrap();
        let out = distribute(&ledger.snapshot(), &exit(4_000_000.0)).unwrap();
        assert!((out.payout_of(&"growth".into()) - 4_000_000.0).abs() < 1e-6);
        assert_eq!(out.payout_of(&"vc".into()), 0.0);
        assert_eq!(out.payout_of(&"alice".into()), 0.0);
    }

    #[test]
    fn test_conversion_judged_after_senior_stack() {
        let mut ledger = with_investor(InvestmentTerms::preferred(1.0), 1_000_000.0, 10.0);
        ledger
            .dilute_all(
                pct(10.0),
                "growth".into(),
                InvestorStake::new(8_000_000.0, InvestmentTerms::preferred(1.0), Some(RoundStage::SeriesA)),
            )
            .unwrap();
        // vc holds 9%: 9% of $12M beats $1M, but only $4M is left after Series A.
        let out = distribute(&ledger.snapshot(), &exit(12_000_000.0)).unwrap();
        let vc = out.payouts.iter().find(|p| p.holder.as_str() == "vc").unwrap();
        assert!(!vc.converted);
        assert!((vc.preference - 1_000_000.0).abs() < 1e-6);
        assert_eq!(vc.participation, 0.0);
    }

    #[test]
    fn test_pari_passu_when_short() {
        let mut ledger = OwnershipLedger::new("acme", "alice");
        let seed = |amount| InvestorStake::new(amount, InvestmentTerms::preferred(1.0), Some(RoundStage::Seed));
        ledger.dilute_all(pct(10.0), "a".into(), seed(3_000_000.0)).unwrap();
        ledger.dilute_all(pct(10.0), "b".into(), seed(1_000_000.0)).unwrap();
        let out = distribute(&ledger.snapshot(), &exit(2_000_000.0)).unwrap();
        assert!((out.payout_of(&"a".into()) - 1_500_000.0).abs() < 1e-6);
        assert!((out.payout_of(&"b".into()) - 500_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_unconverted_safe_is_junior_preference() {
        let mut ledger = with_investor(InvestmentTerms::preferred(1.0), 1_000_000.0, 10.0);
        ledger
            .issue_safe("angel".into(), 250_000.0, InvestmentTerms::safe(0.2, 0.0))
            .unwrap();
        let out = distribute(&ledger.snapshot(), &exit(1_100_000.0)).unwrap();
        assert!((out.payout_of(&"vc".into()) - 1_000_000.0).abs() < 1e-6);
        assert!((out.payout_of(&"angel".into()) - 100_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_bad_input() {
        let ledger = OwnershipLedger::new("acme", "alice");
        assert!(matches!(
            distribute(&ledger.snapshot(), &exit(-1.0)),
            Err(EquityError::NegativeConsideration { .. })
        ));
        let mut snap = ledger.snapshot();
        snap.entries[0].equity = pct(90.0);
        assert!(matches!(
            distribute(&snap, &exit(1.0)),
            Err(EquityError::LedgerInvariantViolation { .. })
        ));
    }

    #[test]
    fn test_release_fractions() {
        let cfg = EngineConfig::default();
        let ipo = Release::for_exit(ExitKind::Ipo, 1_000.0, &cfg);
        assert!((ipo.immediate - 200.0).abs() < 1e-9 && (ipo.deferred - 800.0).abs() < 1e-9);
        let acq = Release::for_exit(ExitKind::Acquisition, 1_000.0, &cfg);
        assert_eq!((acq.immediate, acq.deferred), (1_000.0, 0.0));
        let sec = Release::for_exit(ExitKind::Secondary, 1_000.0, &cfg);
        assert_eq!((sec.immediate, sec.deferred), (500.0, 500.0));
    }
}
