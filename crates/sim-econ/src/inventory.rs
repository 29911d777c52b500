//! Inventory targeting and production planning.

use crate::demand::DemandSignal;
use serde::{Deserialize, Serialize};
use sim_core::{EngineConfig, GoodClass};

/// Stock target and the production needed to reach it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InventoryPlan {
    pub target_inventory: f64,
    pub production_quantity: f64,
}

/// Restocks toward a class-specific multiple of baseline demand.
///
/// Production covers the gap to target plus the short-window forecast, so the
/// firm restocks for expected sales instead of chasing last tick's shortfall.
#[derive(Clone, Copy, Debug)]
pub struct InventoryPolicy<'a> {
    config: &'a EngineConfig,
}

impl<'a> InventoryPolicy<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Target inventory for the given signal.
    pub fn target(&self, signal: &DemandSignal, class: GoodClass) -> f64 {
        let multiple = self.config.class(class).inventory_multiple;
        (multiple * signal.long_avg).max(0.0)
    }

    /// Plan this tick's production. Always returns a value; worst case zero.
    pub fn compute(
        &self,
        inventory: f64,
        signal: &DemandSignal,
        class: GoodClass,
        production_capacity: f64,
    ) -> InventoryPlan {
        let target_inventory = self.target(signal, class);
        let wanted = target_inventory - inventory + signal.short_avg;
        let production_quantity = if wanted.is_finite() {
            wanted.clamp(0.0, production_capacity.max(0.0))
        } else {
            0.0
        };
        InventoryPlan {
            target_inventory,
            production_quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::Trend;
    use proptest::prelude::*;

    fn signal(short: f64, long: f64) -> DemandSignal {
        DemandSignal {
            short_avg: short,
            long_avg: long,
            trend: Trend::Stable,
        }
    }

    #[test]
    fn necessity_holds_a_smaller_buffer() {
        let cfg = EngineConfig::default();
        let policy = InventoryPolicy::new(&cfg);
        let s = signal(10.0, 10.0);
        assert!(policy.target(&s, GoodClass::Necessity) < policy.target(&s, GoodClass::Luxury));
    }

    #[test]
    fn restocks_gap_plus_forecast() {
        let cfg = EngineConfig::default();
        let policy = InventoryPolicy::new(&cfg);
        let plan = policy.compute(5.0, &signal(4.0, 10.0), GoodClass::Necessity, 1e6);
        assert_eq!(plan.target_inventory, 15.0);
        assert_eq!(plan.production_quantity, 14.0);
    }

    #[test]
    fn overstock_means_no_production() {
        let cfg = EngineConfig::default();
        let policy = InventoryPolicy::new(&cfg);
        let plan = policy.compute(500.0, &signal(4.0, 10.0), GoodClass::Luxury, 1e6);
        assert_eq!(plan.production_quantity, 0.0);
    }

    #[test]
    fn capacity_caps_production() {
        let cfg = EngineConfig::default();
        let policy = InventoryPolicy::new(&cfg);
        let plan = policy.compute(0.0, &signal(100.0, 100.0), GoodClass::Luxury, 50.0);
        assert_eq!(plan.production_quantity, 50.0);
    }

    proptest! {
        #[test]
        fn production_within_bounds(
            inv in 0.0f64..1e5,
            short in 0.0f64..1e4,
            long in 0.0f64..1e4,
            cap in 0.1f64..1e4,
        ) {
            let cfg = EngineConfig::default();
            let policy = InventoryPolicy::new(&cfg);
            let plan = policy.compute(inv, &signal(short, long), GoodClass::Necessity, cap);
            prop_assert!(plan.production_quantity >= 0.0);
            prop_assert!(plan.production_quantity <= cap);
        }
    }
}
