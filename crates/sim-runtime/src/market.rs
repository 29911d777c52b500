//! Goods-market clearing against frozen advertised prices.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sim_core::{FirmId, GoodClass, MarketConfig, MarketState};
use sim_econ::{demand_with_noise, derive_seed};
use std::collections::BTreeMap;
use tracing::warn;

/// A firm's advertised price at the start of a tick.
#[derive(Clone, Debug, PartialEq)]
pub struct Quote {
    pub id: FirmId,
    pub class: GoodClass,
    pub price: Decimal,
}

/// Resolve household and government purchases into one [`MarketState`] per firm.
///
/// Every firm is priced against the same snapshot of quotes, so the result does
/// not depend on the order firms are visited in.
pub fn clear(
    quotes: &[Quote],
    cfg: &MarketConfig,
    seed: u64,
    tick: u64,
) -> BTreeMap<FirmId, MarketState> {
    let mut totals: BTreeMap<GoodClass, (Decimal, u32)> = BTreeMap::new();
    for q in quotes {
        let entry = totals.entry(q.class).or_insert((Decimal::ZERO, 0));
        entry.0 += q.price;
        entry.1 += 1;
    }

    let necessity_firms = totals.get(&GoodClass::Necessity).map_or(0, |t| t.1);
    let public_share = if necessity_firms > 0 {
        cfg.government_necessity_budget / Decimal::from(necessity_firms)
    } else {
        Decimal::ZERO
    };

    let mut out = BTreeMap::new();
    for q in quotes {
        let (sum, n) = totals[&q.class];
        let reference = sum / Decimal::from(n);
        let curve = cfg.class(q.class);

        let household = demand_with_noise(
            curve.base_demand_units,
            q.price,
            reference,
            curve.price_elasticity,
            curve.noise_frac,
            derive_seed(seed, u64::from(q.id.0), tick),
        )
        .unwrap_or_else(|e| {
            warn!(firm = %q.id, error = %e, "household demand unavailable");
            0
        });

        let public = if q.class == GoodClass::Necessity && q.price > Decimal::ZERO {
            (public_share / q.price).floor().to_u64().unwrap_or(0)
        } else {
            0
        };

        let competitor_price = if n > 1 {
            Some((sum - q.price) / Decimal::from(n - 1))
        } else {
            None
        };

        out.insert(
            q.id,
            MarketState {
                firm_id: q.id,
                demand_observed: household.saturating_add(public) as f64,
                competitor_price,
            },
        );
    }
    out
}
