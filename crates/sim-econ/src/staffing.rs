//! Employment adjustment.

use rust_decimal::Decimal;
use sim_core::{EngineConfig, GoodClass};

/// Moves headcount by at most one step per tick.
///
/// Production feasibility comes first: if the current staff cannot produce the
/// planned quantity the firm hires, whatever its revenue per employee says.
/// Otherwise revenue per employee is compared against the class efficiency
/// band. The result always lies in `[min_staff, max_staff]`.
#[derive(Clone, Copy, Debug)]
pub struct StaffingPolicy<'a> {
    config: &'a EngineConfig,
}

impl<'a> StaffingPolicy<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Staff needed to produce `production_quantity` this tick.
    pub fn required_staff(&self, production_quantity: f64, class: GoodClass) -> u32 {
        let per_head = self.config.class(class).output_per_employee;
        let needed = (production_quantity.max(0.0) / per_head).ceil();
        if needed.is_finite() {
            needed.min(u32::MAX as f64) as u32
        } else {
            0
        }
    }

    pub fn compute(
        &self,
        employee_count: u32,
        revenue_last_tick: Decimal,
        production_quantity: f64,
        class: GoodClass,
    ) -> u32 {
        let p = self.config.class(class);
        let revenue_per_employee = revenue_last_tick / Decimal::from(employee_count.max(1));
        let required = self.required_staff(production_quantity, class);

        let next = if required > employee_count || revenue_per_employee > p.efficiency_high {
            employee_count.saturating_add(p.staff_step)
        } else if revenue_per_employee < p.efficiency_low {
            employee_count.saturating_sub(p.staff_step).max(required)
        } else {
            employee_count
        };
        next.clamp(p.min_staff, p.max_staff)
    }
}
