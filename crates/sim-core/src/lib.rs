#![deny(warnings)]

//! Core domain models and invariants for the economy simulation.
//!
//! This crate defines the serializable configuration and record types shared by
//! the firm engine, the host loop and the analysis layer, together with
//! validation helpers that guarantee construction-time invariants.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Stable identifier for a firm, unique within a scenario.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FirmId(pub u32);

impl fmt::Display for FirmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "firm-{}", self.0)
    }
}

/// Classification of the single good a firm sells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoodClass {
    /// Staple goods: thin margins, small stock buffers.
    Necessity,
    /// Discretionary goods: wide margins, deep stock buffers.
    Luxury,
}

impl GoodClass {
    pub const ALL: [GoodClass; 2] = [GoodClass::Necessity, GoodClass::Luxury];

    pub fn as_str(&self) -> &'static str {
        match self {
            GoodClass::Necessity => "necessity",
            GoodClass::Luxury => "luxury",
        }
    }
}

/// Weight schedule for the demand moving averages. Both schedules put more
/// weight on recent ticks.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weighting {
    /// Weight `i` for the i-th oldest observation in the window (1-based).
    Linear,
    /// Weight `decay^age`, where age 0 is the most recent tick.
    Exponential { decay: f64 },
}

/// Window lengths and trend threshold for demand tracking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemandWindows {
    /// Ring buffer capacity for realized sales.
    pub history_len: usize,
    /// Ticks in the short (near-term forecast) window.
    pub short_window: usize,
    /// Ticks in the long (baseline) window.
    pub long_window: usize,
    /// Weight schedule shared by both windows.
    pub weighting: Weighting,
    /// Relative gap between short and long averages that counts as a trend.
    pub trend_threshold: f64,
}

impl Default for DemandWindows {
    fn default() -> Self {
        Self {
            history_len: 24,
            short_window: 3,
            long_window: 12,
            weighting: Weighting::Linear,
            trend_threshold: 0.05,
        }
    }
}

/// Tunables for the price update shared by both good classes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingParams {
    /// Largest relative price move per tick, in (0, 1).
    pub max_step: f64,
    /// Weight of the inventory shortfall (1 - inventory/target).
    pub inventory_sensitivity: f64,
    /// Weight of sell-through above or below its steady-state level.
    pub sell_through_sensitivity: f64,
    /// Step contributed by a rising or falling trend.
    pub trend_weight: f64,
    /// Weight of the relative gap to the competitor price signal.
    pub competitor_weight: f64,
    /// Denominator floor for sell-through.
    pub sell_through_epsilon: f64,
    /// Half-width of the uniform price jitter. Zero disables it.
    pub jitter_amplitude: f64,
    /// Decimal places kept on prices.
    pub price_scale: u32,
}

impl Default for PricingParams {
    fn default() -> Self {
        Self {
            max_step: 0.05,
            inventory_sensitivity: 0.05,
            sell_through_sensitivity: 0.05,
            trend_weight: 0.01,
            competitor_weight: 0.02,
            sell_through_epsilon: 1e-6,
            jitter_amplitude: 0.0,
            price_scale: 6,
        }
    }
}

/// Policy bands for one good class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassParams {
    /// Lowest allowed margin over cost basis (0.10 = 10%).
    pub min_margin: Decimal,
    /// Highest allowed margin over cost basis.
    pub max_margin: Decimal,
    /// Target inventory as a multiple of long-window demand.
    pub inventory_multiple: f64,
    /// Staffing floor.
    pub min_staff: u32,
    /// Staffing ceiling.
    pub max_staff: u32,
    /// Employees added or shed per adjustment.
    pub staff_step: u32,
    /// Units one employee can produce per tick.
    pub output_per_employee: f64,
    /// Revenue per employee below which the firm sheds staff.
    pub efficiency_low: Decimal,
    /// Revenue per employee above which the firm hires.
    pub efficiency_high: Decimal,
    /// Wage paid per employee per tick.
    pub base_wage: Decimal,
    /// Relative wage uplift offered on ticks the firm is hiring.
    pub hiring_premium: Decimal,
}

impl ClassParams {
    pub fn necessity() -> Self {
        Self {
            min_margin: Decimal::new(10, 2),
            max_margin: Decimal::new(50, 2),
            inventory_multiple: 1.5,
            min_staff: 2,
            max_staff: 200,
            staff_step: 1,
            output_per_employee: 50.0,
            efficiency_low: Decimal::new(200, 0),
            efficiency_high: Decimal::new(600, 0),
            base_wage: Decimal::new(100, 0),
            hiring_premium: Decimal::new(5, 2),
        }
    }

    pub fn luxury() -> Self {
        Self {
            min_margin: Decimal::new(25, 2),
            max_margin: Decimal::new(200, 2),
            inventory_multiple: 3.0,
            min_staff: 1,
            max_staff: 50,
            staff_step: 1,
            output_per_employee: 5.0,
            efficiency_low: Decimal::new(400, 0),
            efficiency_high: Decimal::new(1500, 0),
            base_wage: Decimal::new(150, 0),
            hiring_premium: Decimal::new(10, 2),
        }
    }
}

/// Full configuration of the firm decision engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub necessity: ClassParams,
    pub luxury: ClassParams,
    pub demand: DemandWindows,
    pub pricing: PricingParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            necessity: ClassParams::necessity(),
            luxury: ClassParams::luxury(),
            demand: DemandWindows::default(),
            pricing: PricingParams::default(),
        }
    }
}

impl EngineConfig {
    /// Parameters for the given good class.
    pub fn class(&self, class: GoodClass) -> &ClassParams {
        match class {
            GoodClass::Necessity => &self.necessity,
            GoodClass::Luxury => &self.luxury,
        }
    }
}

/// Creation-time description of a firm.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FirmSpec {
    pub id: FirmId,
    pub good_class: GoodClass,
    pub initial_price: Decimal,
    pub initial_inventory: f64,
    pub production_capacity: f64,
    pub cost_basis: Decimal,
    pub initial_staff: u32,
}

/// Per-tick market observation for one firm, resolved by the host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub firm_id: FirmId,
    /// Units buyers asked for at the firm's advertised price.
    pub demand_observed: f64,
    /// Mean advertised price of same-class competitors, if any.
    pub competitor_price: Option<Decimal>,
}

/// Tick-end firm state written to the output dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FirmTickRecord {
    pub firm_id: FirmId,
    pub price: Decimal,
    pub inventory: f64,
    pub production_quantity: f64,
    pub employee_count: u32,
    pub revenue: Decimal,
    pub unmet_demand: f64,
}

/// What a firm puts on the market for the next tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FirmOffer {
    pub firm_id: FirmId,
    pub goods_available: f64,
    pub wage_offer: Decimal,
}

/// Units a firm actually sold during a tick and the price it charged for them.
///
/// The charged price is the one advertised when the market opened, which is
/// not the tick-end price on the firm's [`FirmTickRecord`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FirmSales {
    pub firm_id: FirmId,
    pub units_sold: f64,
    pub price_charged: Decimal,
}

/// All firm records of one tick.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TickFrame {
    pub tick: u64,
    pub records: Vec<FirmTickRecord>,
    /// Trades behind `records`, in the same order.
    #[serde(default)]
    pub sales: Vec<FirmSales>,
}

/// Household demand curve for one good class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassMarket {
    /// Units demanded from each firm when it prices at the class reference.
    pub base_demand_units: u64,
    /// Price elasticity (< 0).
    pub price_elasticity: f32,
    /// Multiplicative demand noise half-width in [0, 1).
    pub noise_frac: f32,
}

/// Demand side of the simulated economy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub necessity: ClassMarket,
    pub luxury: ClassMarket,
    /// Per-tick public budget spent on necessity goods.
    pub government_necessity_budget: Decimal,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            necessity: ClassMarket {
                base_demand_units: 2_500,
                price_elasticity: -0.6,
                noise_frac: 0.05,
            },
            luxury: ClassMarket {
                base_demand_units: 80,
                price_elasticity: -1.8,
                noise_frac: 0.15,
            },
            government_necessity_budget: Decimal::new(2_000, 0),
        }
    }
}

impl MarketConfig {
    pub fn class(&self, class: GoodClass) -> &ClassMarket {
        match class {
            GoodClass::Necessity => &self.necessity,
            GoodClass::Luxury => &self.luxury,
        }
    }
}

/// Run-level settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed for all derived RNG streams.
    pub rng_seed: u64,
    /// Default run length.
    pub ticks: u64,
    /// Consecutive ticks at the floor price before a firm is reported.
    pub floor_alert_ticks: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            rng_seed: 42,
            ticks: 150,
            floor_alert_ticks: 10,
        }
    }
}

/// Everything needed to start a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub sim: SimConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub market: MarketConfig,
    pub firms: Vec<FirmSpec>,
}

impl Scenario {
    /// Four necessity producers and two luxury producers.
    pub fn baseline() -> Self {
        let mut firms = Vec::new();
        for i in 0..4u32 {
            firms.push(FirmSpec {
                id: FirmId(i),
                good_class: GoodClass::Necessity,
                initial_price: Decimal::new(600 + i as i64 * 10, 2),
                initial_inventory: 2_500.0,
                production_capacity: 4_000.0,
                cost_basis: Decimal::new(5, 0),
                initial_staff: 40,
            });
        }
        for i in 4..6u32 {
            firms.push(FirmSpec {
                id: FirmId(i),
                good_class: GoodClass::Luxury,
                initial_price: Decimal::new(60, 0),
                initial_inventory: 100.0,
                production_capacity: 150.0,
                cost_basis: Decimal::new(40, 0),
                initial_staff: 10,
            });
        }
        Self {
            name: "baseline".to_string(),
            sim: SimConfig::default(),
            engine: EngineConfig::default(),
            market: MarketConfig::default(),
            firms,
        }
    }
}

/// Validation errors for configuration invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Numeric field must be finite.
    #[error("non-finite numeric value in {0}")]
    NonFinite(&'static str),
    /// Field must be strictly positive.
    #[error("{0} must be > 0")]
    NonPositive(&'static str),
    /// Field must be non-negative.
    #[error("{0} must be >= 0")]
    Negative(&'static str),
    /// Margin band is inverted or negative.
    #[error("invalid margin band for {0:?}: need 0 <= min_margin <= max_margin")]
    InvalidMarginBand(GoodClass),
    /// Efficiency band is inverted or negative.
    #[error("invalid efficiency band for {0:?}: need 0 <= low <= high")]
    InvalidEfficiencyBand(GoodClass),
    /// Staff bounds are inverted or the step is zero.
    #[error("invalid staffing bounds for {0:?}")]
    InvalidStaffBounds(GoodClass),
    /// Inventory multiple outside (0, 50].
    #[error("inventory multiple {1} for {0:?} must be within (0, 50]")]
    InvalidInventoryMultiple(GoodClass, f64),
    /// Necessity goods must carry the smaller buffer and the narrower band.
    #[error("necessity bands must be tighter than luxury bands")]
    ClassOrdering,
    /// Demand windows must satisfy 0 < short < long <= history.
    #[error("demand windows must satisfy 0 < short < long <= history")]
    InvalidWindows,
    /// Exponential decay must lie within (0, 1).
    #[error("exponential decay {0} must be within (0, 1)")]
    InvalidDecay(f64),
    /// Price step cap must lie within (0, 1).
    #[error("price step cap {0} must be within (0, 1)")]
    InvalidStep(f64),
    /// Initial price outside the class margin band.
    #[error("initial price of {0} lies outside its margin band")]
    InitialPriceOutsideBand(FirmId),
    /// Initial staff outside the class staffing bounds.
    #[error("initial staff of {0} lies outside its staffing bounds")]
    InitialStaffOutOfBounds(FirmId),
    /// Elasticity must be strictly negative.
    #[error("price elasticity must be < 0")]
    ElasticityNonNegative,
    /// Noise fraction must lie within [0, 1).
    #[error("noise fraction {0} must be within [0, 1)")]
    InvalidNoise(f32),
    /// Two firms share an id.
    #[error("duplicate firm id: {0}")]
    DuplicateFirm(FirmId),
    /// A scenario without firms cannot run.
    #[error("scenario has no firms")]
    NoFirms,
}

fn finite(v: f64, field: &'static str) -> Result<(), ValidationError> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFinite(field))
    }
}

/// Validate the policy bands of one good class.
pub fn validate_class_params(class: GoodClass, p: &ClassParams) -> Result<(), ValidationError> {
    if p.min_margin < Decimal::ZERO || p.min_margin > p.max_margin {
        return Err(ValidationError::InvalidMarginBand(class));
    }
    finite(p.inventory_multiple, "inventory_multiple")?;
    if p.inventory_multiple <= 0.0 || p.inventory_multiple > 50.0 {
        return Err(ValidationError::InvalidInventoryMultiple(
            class,
            p.inventory_multiple,
        ));
    }
    if p.staff_step == 0 || p.min_staff > p.max_staff || p.max_staff == 0 {
        return Err(ValidationError::InvalidStaffBounds(class));
    }
    finite(p.output_per_employee, "output_per_employee")?;
    if p.output_per_employee <= 0.0 {
        return Err(ValidationError::NonPositive("output_per_employee"));
    }
    if p.efficiency_low < Decimal::ZERO || p.efficiency_low > p.efficiency_high {
        return Err(ValidationError::InvalidEfficiencyBand(class));
    }
    if p.base_wage < Decimal::ZERO {
        return Err(ValidationError::Negative("base_wage"));
    }
    if p.hiring_premium < Decimal::ZERO {
        return Err(ValidationError::Negative("hiring_premium"));
    }
    Ok(())
}

/// Validate demand window lengths and weighting.
pub fn validate_demand_windows(w: &DemandWindows) -> Result<(), ValidationError> {
    if w.short_window == 0 || w.short_window >= w.long_window || w.long_window > w.history_len {
        return Err(ValidationError::InvalidWindows);
    }
    if let Weighting::Exponential { decay } = w.weighting {
        if !(decay.is_finite() && decay > 0.0 && decay < 1.0) {
            return Err(ValidationError::InvalidDecay(decay));
        }
    }
    finite(w.trend_threshold, "trend_threshold")?;
    if w.trend_threshold < 0.0 {
        return Err(ValidationError::Negative("trend_threshold"));
    }
    Ok(())
}

/// Validate pricing tunables.
pub fn validate_pricing(p: &PricingParams) -> Result<(), ValidationError> {
    if !(p.max_step.is_finite() && p.max_step > 0.0 && p.max_step < 1.0) {
        return Err(ValidationError::InvalidStep(p.max_step));
    }
    for (v, field) in [
        (p.inventory_sensitivity, "inventory_sensitivity"),
        (p.sell_through_sensitivity, "sell_through_sensitivity"),
        (p.trend_weight, "trend_weight"),
        (p.competitor_weight, "competitor_weight"),
        (p.jitter_amplitude, "jitter_amplitude"),
    ] {
        finite(v, field)?;
        if v < 0.0 {
            return Err(ValidationError::Negative(field));
        }
    }
    finite(p.sell_through_epsilon, "sell_through_epsilon")?;
    if p.sell_through_epsilon <= 0.0 {
        return Err(ValidationError::NonPositive("sell_through_epsilon"));
    }
    Ok(())
}

/// Validate the whole engine configuration, including the cross-class ordering.
pub fn validate_engine_config(cfg: &EngineConfig) -> Result<(), ValidationError> {
    for class in GoodClass::ALL {
        validate_class_params(class, cfg.class(class))?;
    }
    let (n, l) = (&cfg.necessity, &cfg.luxury);
    if n.inventory_multiple > l.inventory_multiple
        || (n.max_margin - n.min_margin) > (l.max_margin - l.min_margin)
    {
        return Err(ValidationError::ClassOrdering);
    }
    validate_demand_windows(&cfg.demand)?;
    validate_pricing(&cfg.pricing)
}

/// Validate a firm against the engine configuration it will run under.
pub fn validate_firm_spec(spec: &FirmSpec, cfg: &EngineConfig) -> Result<(), ValidationError> {
    let class = cfg.class(spec.good_class);
    if spec.cost_basis <= Decimal::ZERO {
        return Err(ValidationError::NonPositive("cost_basis"));
    }
    finite(spec.production_capacity, "production_capacity")?;
    if spec.production_capacity <= 0.0 {
        return Err(ValidationError::NonPositive("production_capacity"));
    }
    finite(spec.initial_inventory, "initial_inventory")?;
    if spec.initial_inventory < 0.0 {
        return Err(ValidationError::Negative("initial_inventory"));
    }
    let floor = spec.cost_basis * (Decimal::ONE + class.min_margin);
    let ceiling = spec.cost_basis * (Decimal::ONE + class.max_margin);
    if spec.initial_price < floor || spec.initial_price > ceiling {
        return Err(ValidationError::InitialPriceOutsideBand(spec.id));
    }
    if spec.initial_staff < class.min_staff || spec.initial_staff > class.max_staff {
        return Err(ValidationError::InitialStaffOutOfBounds(spec.id));
    }
    Ok(())
}

/// Validate the household demand curves.
pub fn validate_market(m: &MarketConfig) -> Result<(), ValidationError> {
    for class in GoodClass::ALL {
        let c = m.class(class);
        if !c.price_elasticity.is_finite() {
            return Err(ValidationError::NonFinite("price_elasticity"));
        }
        if c.price_elasticity >= 0.0 {
            return Err(ValidationError::ElasticityNonNegative);
        }
        if !(c.noise_frac.is_finite() && (0.0..1.0).contains(&c.noise_frac)) {
            return Err(ValidationError::InvalidNoise(c.noise_frac));
        }
    }
    if m.government_necessity_budget < Decimal::ZERO {
        return Err(ValidationError::Negative("government_necessity_budget"));
    }
    Ok(())
}

/// Validate a scenario end to end.
pub fn validate_scenario(s: &Scenario) -> Result<(), ValidationError> {
    validate_engine_config(&s.engine)?;
    validate_market(&s.market)?;
    if s.firms.is_empty() {
        return Err(ValidationError::NoFirms);
    }
    let mut ids = BTreeSet::new();
    for f in &s.firms {
        if !ids.insert(f.id) {
            return Err(ValidationError::DuplicateFirm(f.id));
        }
        validate_firm_spec(f, &s.engine)?;
    }
    Ok(())
}
