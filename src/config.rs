use crate::funding::RoundStage;

/// Tunables for the engine. Every field has an env override so a simulation can be
/// re-balanced without a rebuild.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Months before any of a standard grant vests
    pub vesting_cliff_months: u32,
    /// Full term of a standard grant
    pub vesting_total_months: u32,
    /// Equity ask band for generated term sheets, in percent
    pub equity_ask_min_pct: f64,
    pub equity_ask_max_pct: f64,
    /// Probability that a fourth (investor-heavy) sheet is offered
    pub fourth_sheet_prob: f64,
    /// Share of an exit payout released immediately
    pub ipo_release: f64,
    pub acquisition_release: f64,
    pub secondary_release: f64,
    /// Tolerance for float comparisons of dollar sums
    pub money_epsilon: f64,
    /// Discount applied by default to generated SAFE terms
    pub default_safe_discount: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vesting_cliff_months: 12,
            vesting_total_months: 48,
            equity_ask_min_pct: 15.0,
            equity_ask_max_pct: 25.0,
            fourth_sheet_prob: 0.5,
            ipo_release: 0.2,
            acquisition_release: 1.0,
            secondary_release: 0.5,
            money_epsilon: 1e-6,
            default_safe_discount: 0.20,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            vesting_cliff_months: env_or("CAPTABLE_VESTING_CLIFF", d.vesting_cliff_months),
            vesting_total_months: env_or("CAPTABLE_VESTING_MONTHS", d.vesting_total_months),
            equity_ask_min_pct: env_or("CAPTABLE_ASK_MIN_PCT", d.equity_ask_min_pct),
            equity_ask_max_pct: env_or("CAPTABLE_ASK_MAX_PCT", d.equity_ask_max_pct),
            fourth_sheet_prob: env_or("CAPTABLE_FOURTH_SHEET_PROB", d.fourth_sheet_prob),
            ipo_release: env_or("CAPTABLE_IPO_RELEASE", d.ipo_release),
            acquisition_release: env_or("CAPTABLE_ACQ_RELEASE", d.acquisition_release),
            secondary_release: env_or("CAPTABLE_SECONDARY_RELEASE", d.secondary_release),
            money_epsilon: env_or("CAPTABLE_MONEY_EPS", d.money_epsilon),
            default_safe_discount: env_or("CAPTABLE_SAFE_DISCOUNT", d.default_safe_discount),
        }
        .sanitized()
    }

    /// Clamp values an env override could have pushed out of range.
    fn sanitized(mut self) -> Self {
        let d = Self::default();
        for (value, default) in [
            (&mut self.equity_ask_min_pct, d.equity_ask_min_pct),
            (&mut self.equity_ask_max_pct, d.equity_ask_max_pct),
            (&mut self.fourth_sheet_prob, d.fourth_sheet_prob),
            (&mut self.ipo_release, d.ipo_release),
            (&mut self.acquisition_release, d.acquisition_release),
            (&mut self.secondary_release, d.secondary_release),
            (&mut self.money_epsilon, d.money_epsilon),
            (&mut self.default_safe_discount, d.default_safe_discount),
        ] {
            if !value.is_finite() {
                *value = default;
            }
        }
        if self.vesting_total_months == 0 {
            self.vesting_total_months = 1;
        }
        self.vesting_cliff_months = self.vesting_cliff_months.min(self.vesting_total_months);
        self.equity_ask_min_pct = self.equity_ask_min_pct.clamp(0.1, 90.0);
        self.equity_ask_max_pct = self.equity_ask_max_pct.clamp(self.equity_ask_min_pct, 90.0);
        self.fourth_sheet_prob = self.fourth_sheet_prob.clamp(0.0, 1.0);
        self.ipo_release = self.ipo_release.clamp(0.0, 1.0);
        self.acquisition_release = self.acquisition_release.clamp(0.0, 1.0);
        self.secondary_release = self.secondary_release.clamp(0.0, 1.0);
        self.default_safe_discount = self.default_safe_discount.clamp(0.0, 0.9);
        self
    }

    /// Pre-money band (min, max) in dollars for a stage before metrics scaling.
    pub fn pre_money_band(&self, stage: RoundStage) -> (f64, f64) {
        match stage {
            RoundStage::PreSeed => (1_500_000.0, 5_000_000.0),
            RoundStage::Seed => (6_000_000.0, 16_000_000.0),
            RoundStage::SeriesA => (25_000_000.0, 60_000_000.0),
            RoundStage::SeriesB => (90_000_000.0, 220_000_000.0),
            RoundStage::SeriesC => (250_000_000.0, 600_000_000.0),
            RoundStage::SeriesD => (600_000_000.0, 1_500_000_000.0),
            RoundStage::SeriesE => (1_500_000_000.0, 4_000_000_000.0),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
