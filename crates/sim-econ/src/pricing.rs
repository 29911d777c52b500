//! Step-capped pricing inside a class margin band.
//!
//! Price pressure combines four signals: stock below target (scarcity),
//! sell-through above its steady-state level, the demand trend, and the gap to
//! competitors. The summed pressure becomes a relative step that is clamped to
//! `±max_step` before anything else happens, then the result is clipped into
//! `[cost * (1 + min_margin), cost * (1 + max_margin)]`.

use crate::cost_plus;
use crate::demand::DemandSignal;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use sim_core::{ClassParams, EngineConfig, GoodClass};

/// Decimal places kept on the step fraction.
const STEP_SCALE: u32 = 6;

/// Allowed price range for one firm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceBand {
    pub floor: Decimal,
    pub ceiling: Decimal,
}

impl PriceBand {
    pub fn clip(&self, price: Decimal) -> Decimal {
        price.max(self.floor).min(self.ceiling)
    }
}

/// Margin band around a cost basis.
pub fn price_band(cost_basis: Decimal, class: &ClassParams) -> PriceBand {
    PriceBand {
        floor: cost_plus(cost_basis, class.min_margin),
        ceiling: cost_plus(cost_basis, class.max_margin),
    }
}

/// Uniform jitter in `[-amplitude, amplitude]` for one firm and tick.
/// Zero amplitude returns exactly zero.
pub fn price_jitter(amplitude: f64, seed: u64, tick: u64) -> f64 {
    if !(amplitude.is_finite() && amplitude > 0.0) {
        return 0.0;
    }
    let mut rng = ChaCha8Rng::seed_from_u64(crate::derive_seed(seed, tick, 0x5052_4943));
    rng.gen_range(-amplitude..=amplitude)
}

/// Everything the price update reads.
#[derive(Clone, Debug, PartialEq)]
pub struct PricingInputs {
    pub price: Decimal,
    /// Post-sale inventory.
    pub inventory: f64,
    pub target_inventory: f64,
    pub signal: DemandSignal,
    pub cost_basis: Decimal,
    pub good_class: GoodClass,
    /// Units sold this tick.
    pub realized_sales: f64,
    /// Inventory on hand when the market opened.
    pub inventory_before_sales: f64,
    pub competitor_price: Option<Decimal>,
    /// Explicit random component; zero for a deterministic update.
    pub noise: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct PricingStrategy<'a> {
    config: &'a EngineConfig,
}

impl<'a> PricingStrategy<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Unclamped relative price pressure. Positive pushes the price up.
    pub fn pressure(&self, inputs: &PricingInputs) -> f64 {
        let p = &self.config.pricing;
        let class = self.config.class(inputs.good_class);

        let ratio = if inputs.target_inventory > 0.0 {
            inputs.inventory / inputs.target_inventory
        } else {
            1.0
        };
        let scarcity = (1.0 - ratio).clamp(-1.0, 1.0);

        let sell_through =
            inputs.realized_sales / inputs.inventory_before_sales.max(p.sell_through_epsilon);
        // fraction sold per tick when stock sits exactly at target
        let neutral = 1.0 / (1.0 + class.inventory_multiple);

        let competition = match inputs.competitor_price {
            Some(c) if inputs.price > Decimal::ZERO => ((c - inputs.price) / inputs.price)
                .to_f64()
                .unwrap_or(0.0)
                .clamp(-1.0, 1.0),
            _ => 0.0,
        };

        let total = p.inventory_sensitivity * scarcity
            + p.sell_through_sensitivity * (sell_through - neutral)
            + p.trend_weight * inputs.signal.trend.sign()
            + p.competitor_weight * competition
            + inputs.noise;
        if total.is_finite() {
            total
        } else {
            0.0
        }
    }

    /// Relative step actually applied, within `±max_step`.
    pub fn step_fraction(&self, inputs: &PricingInputs) -> f64 {
        let cap = self.config.pricing.max_step;
        self.pressure(inputs).clamp(-cap, cap)
    }

    /// Next unit price.
    pub fn compute(&self, inputs: &PricingInputs) -> Decimal {
        let band = price_band(inputs.cost_basis, self.config.class(inputs.good_class));
        let step = Decimal::from_f64(self.step_fraction(inputs))
            .unwrap_or(Decimal::ZERO)
            .round_dp_with_strategy(STEP_SCALE, RoundingStrategy::ToZero);
        let raw = inputs.price * (Decimal::ONE + step);
        // round toward the previous price so rounding never widens the step
        let strategy = if step.is_sign_negative() {
            RoundingStrategy::AwayFromZero
        } else {
            RoundingStrategy::ToZero
        };
        let stepped = raw.round_dp_with_strategy(self.config.pricing.price_scale, strategy);
        band.clip(stepped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::Trend;
    use proptest::prelude::*;

    fn inputs(price: Decimal, class: GoodClass) -> PricingInputs {
        PricingInputs {
            price,
            inventory: 100.0,
            target_inventory: 100.0,
            signal: DemandSignal {
                short_avg: 10.0,
                long_avg: 10.0,
                trend: Trend::Stable,
            },
            cost_basis: Decimal::new(5, 0),
            good_class: class,
            realized_sales: 44.0,
            inventory_before_sales: 110.0,
            competitor_price: None,
            noise: 0.0,
        }
    }

    #[test]
    fn neutral_conditions_hold_price() {
        let cfg = EngineConfig::default();
        // necessity steady state sells 1/(1+1.5) = 40% of stock
        let i = inputs(Decimal::new(6, 0), GoodClass::Necessity);
        assert!(PricingStrategy::new(&cfg).pressure(&i).abs() < 1e-12);
        assert_eq!(PricingStrategy::new(&cfg).compute(&i), Decimal::new(6, 0));
    }

    #[test]
    fn scarcity_and_rising_trend_raise_price() {
        let cfg = EngineConfig::default();
        let mut i = inputs(Decimal::new(6, 0), GoodClass::Necessity);
        i.inventory = 20.0;
        i.signal.trend = Trend::Rising;
        let next = PricingStrategy::new(&cfg).compute(&i);
        assert!(next > Decimal::new(6, 0));
    }

    #[test]
    fn glut_lowers_price() {
        let cfg = EngineConfig::default();
        let mut i = inputs(Decimal::new(6, 0), GoodClass::Necessity);
        i.inventory = 400.0;
        i.realized_sales = 1.0;
        i.signal.trend = Trend::Falling;
        assert!(PricingStrategy::new(&cfg).compute(&i) < Decimal::new(6, 0));
    }

    #[test]
    fn step_is_capped() {
        let cfg = EngineConfig::default();
        let mut i = inputs(Decimal::new(6, 0), GoodClass::Necessity);
        i.noise = 10.0;
        let next = PricingStrategy::new(&cfg).compute(&i);
        assert!(next <= Decimal::new(63, 1));
        assert!(next >= Decimal::new(6299, 3));
    }

    #[test]
    fn band_clips_after_step() {
        let cfg = EngineConfig::default();
        let mut i = inputs(Decimal::new(551, 2), GoodClass::Necessity);
        i.noise = -10.0;
        assert_eq!(PricingStrategy::new(&cfg).compute(&i), Decimal::new(55, 1));
        let mut i = inputs(Decimal::new(749, 2), GoodClass::Necessity);
        i.noise = 10.0;
        assert_eq!(PricingStrategy::new(&cfg).compute(&i), Decimal::new(75, 1));
    }

    #[test]
    fn cheaper_competitor_pulls_price_down() {
        let cfg = EngineConfig::default();
        let mut i = inputs(Decimal::new(7, 0), GoodClass::Necessity);
        i.competitor_price = Some(Decimal::new(6, 0));
        assert!(PricingStrategy::new(&cfg).compute(&i) < Decimal::new(7, 0));
    }

    #[test]
    fn zero_target_is_neutral_on_stock() {
        let cfg = EngineConfig::default();
        let mut i = inputs(Decimal::new(6, 0), GoodClass::Necessity);
        i.target_inventory = 0.0;
        i.inventory = 0.0;
        assert!(PricingStrategy::new(&cfg).pressure(&i).abs() < 1e-12);
    }

    #[test]
    fn jitter_is_seeded() {
        assert_eq!(price_jitter(0.0, 1, 1), 0.0);
        let a = price_jitter(0.01, 9, 3);
        assert_eq!(a, price_jitter(0.01, 9, 3));
        assert!(a.abs() <= 0.01);
    }

    proptest! {
        #[test]
        fn price_stays_in_band_and_step(
            cents in 1250i64..=3000,
            inv in 0.0f64..1000.0,
            target in 0.0f64..1000.0,
            sales in 0.0f64..500.0,
            noise in -1.0f64..1.0,
        ) {
            let cfg = EngineConfig::default();
            let price = Decimal::new(cents, 2);
            let mut i = inputs(price, GoodClass::Luxury);
            i.cost_basis = Decimal::new(10, 0);
            i.inventory = inv;
            i.target_inventory = target;
            i.realized_sales = sales;
            i.inventory_before_sales = inv + sales;
            i.noise = noise;
            let next = PricingStrategy::new(&cfg).compute(&i);
            let band = price_band(i.cost_basis, &cfg.luxury);
            prop_assert!(next >= band.floor && next <= band.ceiling);
            let moved = ((next - price).abs() / price).to_f64().unwrap();
            prop_assert!(moved <= cfg.pricing.max_step + 1e-12);
        }
    }
}
