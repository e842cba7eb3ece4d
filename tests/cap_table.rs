//! Ledger properties exercised through the public API.
//!
//! Test categories:
//!   1. Sum invariant       -- random operation sequences always total 100%
//!   2. Dilution            -- textbook 80/20 case, pro-rata preservation
//!   3. Sequencing          -- out-of-order rounds rejected, ledger untouched
//!   4. Vesting             -- monotone under time and dilution, forfeiture on exit
//!   5. Terms               -- SAFE cap vs discount, weighted-average down round

use captable::config::EngineConfig;
use captable::error::EquityError;
use captable::funding::{self, ProRataElection, RoundStage, TermSheet};
use captable::ledger::{HolderKind, InvestorStake, OwnershipLedger};
use captable::terms::InvestmentTerms;
use captable::verify::invariants;
use captable::vesting::{self, VestingSchedule};
use captable::{HolderId, MicroPct};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn pct(p: f64) -> MicroPct {
    MicroPct::from_percent(p).unwrap()
}

fn id(s: &str) -> HolderId {
    HolderId::new(s)
}

fn seed_stake(amount: f64) -> InvestorStake {
    InvestorStake::new(amount, InvestmentTerms::preferred(1.0), Some(RoundStage::Seed))
}

// ---------------------------------------------------------------------------
// 1. Sum invariant
// ---------------------------------------------------------------------------

#[test]
fn random_operations_keep_exactly_one_hundred_percent() {
    let cfg = EngineConfig::default();
    for seed in 0..20u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut ledger = OwnershipLedger::new("acme", "alice");
        for step in 0..150 {
            let holders: Vec<HolderId> = ledger
                .entries()
                .iter()
                .filter(|e| !e.is_pool() && e.id != id("alice"))
                .map(|e| e.id.clone())
                .collect();
            let before = ledger.clone();
            let result = match rng.gen_range(0..7) {
                0 => ledger.expand_pool(pct(rng.gen_range(0.5..8.0))).map(|_| ()),
                1 => {
                    let p = pct(rng.gen_range(0.01..3.0));
                    let vesting = VestingSchedule::standard(p, &cfg);
                    ledger
                        .grant(id(&format!("emp-{}", step)), HolderKind::Employee, p, Some(vesting))
                        .map(|_| ())
                }
                2 => ledger
                    .dilute_all(
                        pct(rng.gen_range(0.5..25.0)),
                        id(&format!("inv-{}", step)),
                        seed_stake(rng.gen_range(1e5..1e7)),
                    )
                    .map(|_| ()),
                3 if !holders.is_empty() => {
                    let h = &holders[rng.gen_range(0..holders.len())];
                    ledger.buy_back(h, pct(rng.gen_range(0.01..2.0)), 1e7).map(|_| ())
                }
                4 if !holders.is_empty() => {
                    let h = &holders[rng.gen_range(0..holders.len())];
                    ledger.terminate(h, None).map(|_| ())
                }
                5 => ledger
                    .secondary_sale(&id("alice"), id(&format!("buyer-{}", step)), pct(rng.gen_range(0.01..2.0)), 1e7)
                    .map(|_| ()),
                _ => {
                    ledger.advance_month();
                    Ok(())
                }
            };
            assert_eq!(ledger.total(), MicroPct::ONE_HUNDRED, "seed {} step {}", seed, step);
            invariants::assert_snapshot_invariants(&ledger.snapshot())
                .unwrap_or_else(|v| panic!("seed {} step {}: {}", seed, step, v.msg));
            if let Err(e) = result {
                assert!(!e.is_fatal(), "seed {} step {}: {}", seed, step, e);
                assert_eq!(ledger, before, "rejected op changed the ledger");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Dilution
// ---------------------------------------------------------------------------

#[test]
fn twenty_percent_round_on_eighty_twenty_table() {
    let mut ledger = OwnershipLedger::new("acme", "alice");
    ledger.expand_pool(pct(20.0)).unwrap();
    let report = ledger.dilute_all(pct(20.0), id("vc"), seed_stake(2e6)).unwrap();

    assert_eq!(ledger.percent_of(&id("alice")), pct(64.0));
    assert_eq!(ledger.pool(), pct(16.0));
    assert_eq!(ledger.percent_of(&id("vc")), pct(20.0));
    let row = report.row(&id("alice")).unwrap();
    assert_eq!((row.before, row.after), (pct(80.0), pct(64.0)));
}

#[test]
fn pro_rata_election_holds_the_line() {
    let mut ledger = OwnershipLedger::new("acme", "alice");
    let stake = InvestorStake::new(500_000.0, InvestmentTerms::preferred(1.0), Some(RoundStage::PreSeed));
    ledger.dilute_all(pct(10.0), id("angel"), stake).unwrap();

    let sheet = TermSheet::new(RoundStage::Seed, 8_000_000.0, 2_000_000.0, InvestmentTerms::preferred(1.0));
    assert_eq!(sheet.equity_issued(), pct(20.0));
    let amount = funding::pro_rata_allocation(&ledger, &id("angel"), &sheet).unwrap();
    let election = ProRataElection {
        holder: id("angel"),
        amount,
    };
    funding::apply_round(&mut ledger, &sheet, &[id("vc")], &[election], &mut []).unwrap();

    assert!(ledger.percent_of(&id("angel")) >= pct(10.0));
    assert_eq!(ledger.total(), MicroPct::ONE_HUNDRED);
    let stake = ledger.entry(&id("angel")).unwrap().kind.stake().unwrap();
    assert!((stake.amount_invested - (500_000.0 + amount)).abs() < 1e-6);
}

#[test]
fn several_investors_share_one_round() {
    let mut ledger = OwnershipLedger::new("acme", "alice");
    let sheet = TermSheet::new(RoundStage::Seed, 7_000_000.0, 3_000_000.0, InvestmentTerms::preferred(1.0));
    let outcome = funding::apply_round(&mut ledger, &sheet, &[id("a"), id("b"), id("c")], &[], &mut []).unwrap();
    let issued: MicroPct = ["a", "b", "c"].iter().map(|h| ledger.percent_of(&id(h))).sum();
    assert_eq!(issued, pct(30.0));
    assert!(ledger.percent_of(&id("a")) >= ledger.percent_of(&id("b")));
    assert_eq!(outcome.round.investors.len(), 3);
}

// ---------------------------------------------------------------------------
// 3. Sequencing
// ---------------------------------------------------------------------------

#[test]
fn series_b_before_series_a_is_rejected() {
    let mut ledger = OwnershipLedger::new("acme", "alice");
    let seed = TermSheet::new(RoundStage::Seed, 8e6, 2e6, InvestmentTerms::preferred(1.0));
    funding::apply_round(&mut ledger, &seed, &[id("seed-vc")], &[], &mut []).unwrap();

    let before = ledger.clone();
    let b = TermSheet::new(RoundStage::SeriesB, 100e6, 25e6, InvestmentTerms::preferred(1.0));
    let err = funding::apply_round(&mut ledger, &b, &[id("growth")], &[], &mut []).unwrap_err();
    match err {
        EquityError::InvalidRoundSequence { requested, missing } => {
            assert_eq!(requested, RoundStage::SeriesB);
            assert_eq!(missing, "Series A");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(ledger, before);
}

#[test]
fn every_stage_in_order_then_no_repeats() {
    let mut ledger = OwnershipLedger::new("acme", "alice");
    let mut pre = 3e6;
    for stage in RoundStage::ALL {
        let sheet = TermSheet::new(stage, pre, pre / 4.0, InvestmentTerms::preferred(1.0));
        funding::apply_round(&mut ledger, &sheet, &[id(&format!("{}-vc", stage.as_str()))], &[], &mut []).unwrap();
        assert!(ledger.has_closed(stage));
        pre *= 3.0;
    }
    assert_eq!(ledger.rounds().len(), RoundStage::ALL.len());
    let again = TermSheet::new(RoundStage::SeriesC, pre, pre / 4.0, InvestmentTerms::preferred(1.0));
    assert!(funding::apply_round(&mut ledger, &again, &[id("late")], &[], &mut []).is_err());
}

// ---------------------------------------------------------------------------
// 4. Vesting
// ---------------------------------------------------------------------------

#[test]
fn vesting_never_runs_backwards() {
    let cfg = EngineConfig::default();
    let mut ledger = OwnershipLedger::new("acme", "alice");
    ledger.expand_pool(pct(15.0)).unwrap();
    ledger
        .grant(id("eng"), HolderKind::Employee, pct(4.0), Some(VestingSchedule::standard(pct(4.0), &cfg)))
        .unwrap();

    let mut last_fraction = 0.0;
    for month in 1..=60u32 {
        let before = ledger.snapshot();
        ledger.advance_month();
        if month % 18 == 0 {
            ledger.dilute_all(pct(10.0), id(&format!("vc-{}", month)), seed_stake(1e6)).unwrap();
        }
        invariants::assert_vesting_monotone(&before, &ledger.snapshot()).unwrap();
        let schedule = ledger.entry(&id("eng")).unwrap().vesting.clone().unwrap();
        let fraction = vesting::vested_percent(&schedule).as_fraction() / schedule.grant.as_fraction();
        assert!(fraction + 1e-6 >= last_fraction, "month {}", month);
        if month < 12 {
            assert_eq!(fraction, 0.0);
        }
        last_fraction = fraction;
    }
    assert!((last_fraction - 1.0).abs() < 1e-9);
}

#[test]
fn termination_before_cliff_forfeits_everything() {
    let cfg = EngineConfig::default();
    let mut ledger = OwnershipLedger::new("acme", "alice");
    ledger.expand_pool(pct(10.0)).unwrap();
    ledger
        .grant(id("eng"), HolderKind::Employee, pct(2.0), Some(VestingSchedule::standard(pct(2.0), &cfg)))
        .unwrap();
    for _ in 0..6 {
        ledger.advance_month();
    }
    let report = ledger.terminate(&id("eng"), None).unwrap();
    assert_eq!(report.forfeited, pct(2.0));
    assert_eq!(report.retained, MicroPct::ZERO);
    assert_eq!(ledger.pool(), pct(10.0));
    assert!(ledger.entry(&id("eng")).is_none());
    assert_eq!(ledger.archived().len(), 1);
}

#[test]
fn termination_after_two_years_keeps_half() {
    let cfg = EngineConfig::default();
    let mut ledger = OwnershipLedger::new("acme", "alice");
    ledger.expand_pool(pct(10.0)).unwrap();
    ledger
        .grant(id("eng"), HolderKind::Employee, pct(4.0), Some(VestingSchedule::standard(pct(4.0), &cfg)))
        .unwrap();
    for _ in 0..24 {
        ledger.advance_month();
    }
    let report = ledger.terminate(&id("eng"), None).unwrap();
    assert_eq!(report.retained, pct(2.0));
    assert_eq!(report.forfeited, pct(2.0));
    assert_eq!(ledger.percent_of(&id("eng")), pct(2.0));
    assert_eq!(ledger.pool(), pct(8.0));
}

// ---------------------------------------------------------------------------
// 5. Terms through the round engine
// ---------------------------------------------------------------------------

#[test]
fn safe_converts_at_cap_when_cap_is_cheaper() {
    let mut ledger = OwnershipLedger::new("acme", "alice");
    // Cap 4M on 10M shares = $0.40; 20% discount on $0.80 = $0.64. Cap wins.
    ledger
        .issue_safe(id("capped"), 400_000.0, InvestmentTerms::safe(0.2, 4_000_000.0))
        .unwrap();
    let sheet = TermSheet::new(RoundStage::Seed, 8_000_000.0, 2_000_000.0, InvestmentTerms::preferred(1.0));
    let outcome = funding::apply_round(&mut ledger, &sheet, &[id("vc")], &[], &mut []).unwrap();
    let conv = &outcome.conversions[0];
    assert!((conv.conversion_price - 0.40).abs() < 1e-9);
    assert!((conv.shares - 1_000_000.0).abs() < 1e-6);
    assert!(ledger.pending_safes().is_empty());
    assert_eq!(ledger.percent_of(&id("vc")), pct(20.0));
    let stake = ledger.entry(&id("capped")).unwrap().kind.stake().unwrap();
    assert_eq!(stake.terms.liquidation_preference_multiple, 1.0);
}

#[test]
fn safe_converts_at_discount_when_cap_is_high() {
    let mut ledger = OwnershipLedger::new("acme", "alice");
    ledger
        .issue_safe(id("angel"), 640_000.0, InvestmentTerms::safe(0.2, 50_000_000.0))
        .unwrap();
    let sheet = TermSheet::new(RoundStage::Seed, 8_000_000.0, 2_000_000.0, InvestmentTerms::preferred(1.0));
    let outcome = funding::apply_round(&mut ledger, &sheet, &[id("vc")], &[], &mut []).unwrap();
    assert!((outcome.conversions[0].conversion_price - 0.64).abs() < 1e-9);
    assert!((outcome.conversions[0].shares - 1_000_000.0).abs() < 1e-6);
}

#[test]
fn down_round_reprices_protected_seed_investor() {
    let mut ledger = OwnershipLedger::new("acme", "alice");
    let seed = TermSheet::new(RoundStage::Seed, 8e6, 2e6, InvestmentTerms::preferred(1.0));
    funding::apply_round(&mut ledger, &seed, &[id("seed-vc")], &[], &mut []).unwrap();
    let seed_pct = ledger.percent_of(&id("seed-vc"));

    // Seed price 0.80; Series A at 4M pre on 12.5M shares is 0.32.
    let a = TermSheet::new(RoundStage::SeriesA, 4e6, 1e6, InvestmentTerms::preferred(1.0));
    let outcome = funding::apply_round(&mut ledger, &a, &[id("a-vc")], &[], &mut []).unwrap();
    assert!(outcome.round.down_round);
    let adj = &outcome.adjustments[0];
    assert_eq!(adj.holder, id("seed-vc"));
    assert!(adj.new_price < adj.old_price && adj.new_price > 0.32);
    // Better off than plain 20% dilution, and the founders paid for it.
    assert!(ledger.percent_of(&id("seed-vc")) > seed_pct.scale(80, 100));
    assert_eq!(ledger.percent_of(&id("a-vc")), pct(20.0));
    assert_eq!(ledger.total(), MicroPct::ONE_HUNDRED);
}
