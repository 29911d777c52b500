//! Per-tick orchestration of the four firm policies.
//!
//! Step order, per firm:
//! 1. realize sales against current inventory and price
//! 2. update the demand tracker with realized sales
//! 3. plan inventory target and production
//! 4. price from post-sale inventory and this tick's sales
//! 5. staff for revenue efficiency and planned production
//! 6. add production to inventory
//! 7. commit price, staff and production
//!
//! Prices therefore react to this tick's demand but not to this tick's
//! production, which only becomes visible to pricing one tick later.
//!
//! [`FirmDecisionEngine::decide`] runs steps 1-6 without touching the firm;
//! [`FirmDecisionEngine::commit`] performs step 7. Hosts that want
//! simultaneous updates decide every firm first and commit afterwards.

use crate::demand::{DemandSignal, DemandTracker};
use crate::firm::Firm;
use crate::inventory::InventoryPolicy;
use crate::pricing::{price_band, price_jitter, PricingInputs, PricingStrategy};
use crate::staffing::StaffingPolicy;
use crate::units;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_core::{
    validate_engine_config, EngineConfig, FirmId, FirmOffer, FirmSales, FirmSpec,
    FirmTickRecord, MarketState, ValidationError,
};
use tracing::{debug, warn};

/// Decimal places kept on revenue and costs.
const MONEY_SCALE: u32 = 6;

/// Internal defect caught and clipped during a tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Anomaly {
    /// Market state addressed to a different firm.
    MismatchedMarket { expected: FirmId, got: FirmId },
    /// Observed demand was negative or not finite; treated as zero.
    InvalidDemand { observed: f64 },
    /// Inventory went negative after sales; reset to zero.
    NegativeInventory { value: f64 },
    /// Pricing produced a price under the cost floor; raised to the floor.
    PriceBelowFloor { computed: Decimal, floor: Decimal },
    /// Planned production exceeded capacity; capped.
    ProductionOverCapacity { planned: f64, capacity: f64 },
    /// Staffing produced a headcount under the class floor; raised.
    StaffBelowFloor { computed: u32, floor: u32 },
    /// A quantity too large for money arithmetic; its value saturated.
    QuantityOutOfRange { quantity: f64 },
    /// Price times quantity overflowed; the amount saturated.
    AmountOverflow { unit_price: Decimal, quantity: f64 },
}

/// Money flows of one tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FirmAccounts {
    pub revenue: Decimal,
    /// Wages of the staff that worked this tick plus unit cost of production.
    pub costs: Decimal,
    pub profit: Decimal,
}

/// Result of one firm's tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickOutcome {
    pub record: FirmTickRecord,
    pub offer: FirmOffer,
    pub accounts: FirmAccounts,
    pub signal: DemandSignal,
    pub target_inventory: f64,
    pub sales: FirmSales,
    /// Whether the committed price equals the cost floor.
    pub at_price_floor: bool,
    pub anomalies: Vec<Anomaly>,
}

/// A computed but not yet applied tick for one firm.
#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    firm_id: FirmId,
    tracker: DemandTracker,
    inventory: f64,
    price: Decimal,
    employee_count: u32,
    production_quantity: f64,
    outcome: TickOutcome,
}

impl Decision {
    pub fn firm_id(&self) -> FirmId {
        self.firm_id
    }

    pub fn outcome(&self) -> &TickOutcome {
        &self.outcome
    }
}

/// Runs the firm policies in their fixed order.
#[derive(Clone, Debug)]
pub struct FirmDecisionEngine {
    config: EngineConfig,
}

impl FirmDecisionEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ValidationError> {
        validate_engine_config(&config)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a firm under this engine's configuration.
    pub fn create_firm(&self, spec: &FirmSpec) -> Result<Firm, ValidationError> {
        Firm::new(spec, &self.config)
    }

    /// Compute one tick for `firm` without mutating it.
    pub fn decide(&self, firm: &Firm, market: &MarketState) -> Decision {
        let cfg = &self.config;
        let class = cfg.class(firm.good_class);
        let mut anomalies = Vec::new();

        if market.firm_id != firm.id {
            warn!(firm = %firm.id, got = %market.firm_id, "market state addressed to another firm");
            anomalies.push(Anomaly::MismatchedMarket {
                expected: firm.id,
                got: market.firm_id,
            });
        }

        // 1. realize sales
        let demand = if market.demand_observed.is_finite() && market.demand_observed >= 0.0 {
            market.demand_observed
        } else {
            warn!(firm = %firm.id, observed = market.demand_observed, "invalid observed demand");
            anomalies.push(Anomaly::InvalidDemand {
                observed: market.demand_observed,
            });
            0.0
        };
        let inventory_before_sales = firm.inventory;
        let realized_sales = demand.min(inventory_before_sales).max(0.0);
        let unmet_demand = demand - realized_sales;
        let mut inventory = inventory_before_sales - realized_sales;
        if inventory < 0.0 {
            warn!(firm = %firm.id, value = inventory, "negative inventory after sales");
            anomalies.push(Anomaly::NegativeInventory { value: inventory });
            inventory = 0.0;
        }
        let revenue =
            amount(firm.id, firm.price, realized_sales, &mut anomalies).round_dp(MONEY_SCALE);

        // 2. track demand
        let mut tracker = firm.tracker.clone();
        let signal = tracker.update(realized_sales);

        // 3. plan stock and production
        let plan = InventoryPolicy::new(cfg).compute(
            inventory,
            &signal,
            firm.good_class,
            firm.production_capacity,
        );

        // 4. price
        let inputs = PricingInputs {
            price: firm.price,
            inventory,
            target_inventory: plan.target_inventory,
            signal,
            cost_basis: firm.cost_basis,
            good_class: firm.good_class,
            realized_sales,
            inventory_before_sales,
            competitor_price: market.competitor_price,
            noise: price_jitter(cfg.pricing.jitter_amplitude, firm.jitter_seed, firm.ticks),
        };
        let mut price = PricingStrategy::new(cfg).compute(&inputs);
        let band = price_band(firm.cost_basis, class);
        if price < band.floor {
            warn!(firm = %firm.id, %price, floor = %band.floor, "price under cost floor");
            anomalies.push(Anomaly::PriceBelowFloor {
                computed: price,
                floor: band.floor,
            });
            price = band.floor;
        }

        // 5. staff
        let mut employee_count = StaffingPolicy::new(cfg).compute(
            firm.employee_count,
            revenue,
            plan.production_quantity,
            firm.good_class,
        );
        if employee_count < class.min_staff {
            warn!(firm = %firm.id, employee_count, floor = class.min_staff, "staff under floor");
            anomalies.push(Anomaly::StaffBelowFloor {
                computed: employee_count,
                floor: class.min_staff,
            });
            employee_count = class.min_staff;
        }

        // 6. produce
        let mut production_quantity = plan.production_quantity;
        if production_quantity > firm.production_capacity {
            warn!(firm = %firm.id, planned = production_quantity, "production over capacity");
            anomalies.push(Anomaly::ProductionOverCapacity {
                planned: production_quantity,
                capacity: firm.production_capacity,
            });
            production_quantity = firm.production_capacity;
        }
        inventory += production_quantity;

        let wages = class.base_wage.saturating_mul(Decimal::from(firm.employee_count));
        let costs = wages
            .saturating_add(amount(
                firm.id,
                firm.cost_basis,
                production_quantity,
                &mut anomalies,
            ))
            .round_dp(MONEY_SCALE);
        let wage_offer = if employee_count > firm.employee_count {
            class.base_wage * (Decimal::ONE + class.hiring_premium)
        } else {
            class.base_wage
        };

        debug!(
            firm = %firm.id,
            tick = firm.ticks,
            sold = realized_sales,
            unmet = unmet_demand,
            trend = ?signal.trend,
            target = plan.target_inventory,
            production = production_quantity,
            %price,
            employee_count,
            "firm decision"
        );

        let outcome = TickOutcome {
            record: FirmTickRecord {
                firm_id: firm.id,
                price,
                inventory,
                production_quantity,
                employee_count,
                revenue,
                unmet_demand,
            },
            offer: FirmOffer {
                firm_id: firm.id,
                goods_available: inventory,
                wage_offer,
            },
            accounts: FirmAccounts {
                revenue,
                costs,
                profit: revenue.saturating_sub(costs),
            },
            signal,
            target_inventory: plan.target_inventory,
            sales: FirmSales {
                firm_id: firm.id,
                units_sold: realized_sales,
                price_charged: firm.price,
            },
            at_price_floor: price == band.floor,
            anomalies,
        };

        Decision {
            firm_id: firm.id,
            tracker,
            inventory,
            price,
            employee_count,
            production_quantity,
            outcome,
        }
    }

    /// Apply a decision made by [`Self::decide`] for the same firm.
    pub fn commit(&self, firm: &mut Firm, decision: Decision) -> TickOutcome {
        debug_assert_eq!(firm.id, decision.firm_id);
        firm.tracker = decision.tracker;
        firm.inventory = decision.inventory;
        firm.price = decision.price;
        firm.employee_count = decision.employee_count;
        firm.last_production = decision.production_quantity;
        firm.ticks += 1;
        decision.outcome
    }

    /// Decide and commit in one call.
    pub fn step(&self, firm: &mut Firm, market: &MarketState) -> TickOutcome {
        let decision = self.decide(firm, market);
        self.commit(firm, decision)
    }
}

/// `unit_price * quantity`, saturating at [`Decimal::MAX`] with an anomaly
/// instead of panicking.
fn amount(
    firm: FirmId,
    unit_price: Decimal,
    quantity: f64,
    anomalies: &mut Vec<Anomaly>,
) -> Decimal {
    let Some(q) = units(quantity) else {
        warn!(%firm, quantity, "quantity out of money range");
        anomalies.push(Anomaly::QuantityOutOfRange { quantity });
        return Decimal::MAX;
    };
    unit_price.checked_mul(q).unwrap_or_else(|| {
        warn!(%firm, %unit_price, quantity, "amount overflow");
        anomalies.push(Anomaly::AmountOverflow {
            unit_price,
            quantity,
        });
        Decimal::MAX
    })
}
