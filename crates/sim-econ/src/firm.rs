//! Per-firm mutable state.

use crate::demand::DemandTracker;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_core::{validate_firm_spec, EngineConfig, FirmId, FirmSpec, GoodClass, ValidationError};

/// One firm: plain data, no references to other firms.
///
/// Only [`crate::FirmDecisionEngine::commit`] mutates a firm after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Firm {
    pub(crate) id: FirmId,
    pub(crate) good_class: GoodClass,
    pub(crate) inventory: f64,
    pub(crate) price: Decimal,
    pub(crate) production_capacity: f64,
    pub(crate) employee_count: u32,
    pub(crate) cost_basis: Decimal,
    pub(crate) tracker: DemandTracker,
    pub(crate) last_production: f64,
    pub(crate) ticks: u64,
    pub(crate) jitter_seed: u64,
}

impl Firm {
    /// Build a firm from its spec. Fails fast on any configuration error.
    pub fn new(spec: &FirmSpec, config: &EngineConfig) -> Result<Self, ValidationError> {
        validate_firm_spec(spec, config)?;
        Ok(Self {
            id: spec.id,
            good_class: spec.good_class,
            inventory: spec.initial_inventory,
            price: spec.initial_price,
            production_capacity: spec.production_capacity,
            employee_count: spec.initial_staff,
            cost_basis: spec.cost_basis,
            tracker: DemandTracker::new(config.demand.clone()),
            last_production: 0.0,
            ticks: 0,
            jitter_seed: u64::from(spec.id.0),
        })
    }

    /// Seed for this firm's price jitter stream.
    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = seed;
        self
    }

    pub fn id(&self) -> FirmId {
        self.id
    }

    pub fn good_class(&self) -> GoodClass {
        self.good_class
    }

    pub fn inventory(&self) -> f64 {
        self.inventory
    }

    /// Advertised price for the coming tick.
    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn production_capacity(&self) -> f64 {
        self.production_capacity
    }

    pub fn employee_count(&self) -> u32 {
        self.employee_count
    }

    pub fn cost_basis(&self) -> Decimal {
        self.cost_basis
    }

    pub fn tracker(&self) -> &DemandTracker {
        &self.tracker
    }

    pub fn last_production(&self) -> f64 {
        self.last_production
    }

    /// Ticks this firm has been stepped.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_spec_fails_fast() {
        let spec = FirmSpec {
            id: FirmId(1),
            good_class: GoodClass::Luxury,
            initial_price: Decimal::new(60, 0),
            initial_inventory: 0.0,
            production_capacity: -1.0,
            cost_basis: Decimal::new(40, 0),
            initial_staff: 3,
        };
        assert_eq!(
            Firm::new(&spec, &EngineConfig::default()),
            Err(ValidationError::NonPositive("production_capacity"))
        );
    }
}
