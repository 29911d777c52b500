#![deny(warnings)]

//! Post-run analysis over committed tick frames.

use anyhow::{ensure, Result};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_core::{FirmId, GoodClass, TickFrame};
use std::collections::BTreeMap;
use tracing::debug;

/// Gini coefficient of a non-negative distribution.
///
/// Zero for empty input or when every value is zero. Negative or non-finite
/// values are treated as zero.
pub fn compute_gini(values: &[f64]) -> f64 {
    let mut x: Vec<f64> = values
        .iter()
        .map(|v| if v.is_finite() && *v > 0.0 { *v } else { 0.0 })
        .collect();
    let n = x.len();
    let total: f64 = x.iter().sum();
    if n == 0 || total <= 0.0 {
        return 0.0;
    }
    x.sort_by(f64::total_cmp);
    let nf = n as f64;
    let b = x
        .iter()
        .enumerate()
        .map(|(i, xi)| xi * (nf - i as f64))
        .sum::<f64>()
        / (nf * total);
    1.0 + 1.0 / nf - 2.0 * b
}

/// Sales-weighted average of the prices actually charged in one tick,
/// optionally restricted to a class.
///
/// `None` when nothing sold or the weighted sum leaves the decimal range.
pub fn price_index(
    frame: &TickFrame,
    classes: &BTreeMap<FirmId, GoodClass>,
    class: Option<GoodClass>,
) -> Option<Decimal> {
    let mut value = Decimal::ZERO;
    let mut units = Decimal::ZERO;
    for s in &frame.sales {
        if class.is_some() && classes.get(&s.firm_id).copied() != class {
            continue;
        }
        if s.units_sold.is_nan() || s.units_sold <= 0.0 || s.price_charged <= Decimal::ZERO {
            continue;
        }
        let sold = Decimal::from_f64(s.units_sold)?;
        value = value.checked_add(s.price_charged.checked_mul(sold)?)?;
        units = units.checked_add(sold)?;
    }
    if units.is_zero() {
        return None;
    }
    value.checked_div(units)
}

/// Relative change between consecutive index values. Gaps yield `None`.
pub fn inflation_series(index: &[Option<Decimal>]) -> Vec<Option<f64>> {
    index
        .windows(2)
        .map(|w| match (w[0], w[1]) {
            (Some(a), Some(b)) if a > Decimal::ZERO => ((b - a) / a).to_f64(),
            _ => None,
        })
        .collect()
}

/// Change from the first to the last defined index value.
pub fn cumulative_inflation(index: &[Option<Decimal>]) -> Option<f64> {
    let first = index.iter().flatten().next()?;
    let last = index.iter().flatten().last()?;
    if *first <= Decimal::ZERO {
        return None;
    }
    ((*last - *first) / *first).to_f64()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassSummary {
    pub firms: usize,
    /// Mean revenue per firm-tick.
    pub mean_revenue: Decimal,
    /// Unweighted mean advertised price per firm-tick.
    pub mean_price: Decimal,
    pub cumulative_inflation: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub ticks: usize,
    pub firms: usize,
    pub by_class: BTreeMap<GoodClass, ClassSummary>,
    pub total_unmet_demand: f64,
    /// Revenue Gini over the final tick.
    pub final_revenue_gini: f64,
    pub floor_pinned: usize,
}

#[derive(Debug, Default)]
struct ClassTotals {
    revenue: Decimal,
    price: Decimal,
    n: u64,
    first_index: Option<Decimal>,
    last_index: Option<Decimal>,
}

/// Incremental [`RunSummary`]: frames are observed one tick at a time and
/// can be dropped afterwards.
#[derive(Debug)]
pub struct SummaryBuilder {
    classes: BTreeMap<FirmId, GoodClass>,
    totals: BTreeMap<GoodClass, ClassTotals>,
    ticks: usize,
    unmet: f64,
    last_revenue: Vec<f64>,
}

impl SummaryBuilder {
    pub fn new(classes: BTreeMap<FirmId, GoodClass>) -> Self {
        let totals = GoodClass::ALL
            .into_iter()
            .filter(|c| classes.values().any(|v| v == c))
            .map(|c| (c, ClassTotals::default()))
            .collect();
        Self {
            classes,
            totals,
            ticks: 0,
            unmet: 0.0,
            last_revenue: Vec::new(),
        }
    }

    pub fn observe(&mut self, frame: &TickFrame) {
        for r in &frame.records {
            self.unmet += r.unmet_demand;
            let Some(t) = self
                .classes
                .get(&r.firm_id)
                .and_then(|c| self.totals.get_mut(c))
            else {
                continue;
            };
            t.revenue = t.revenue.saturating_add(r.revenue);
            t.price = t.price.saturating_add(r.price);
            t.n += 1;
        }
        for (class, t) in self.totals.iter_mut() {
            if let Some(idx) = price_index(frame, &self.classes, Some(*class)) {
                if t.first_index.is_none() {
                    t.first_index = Some(idx);
                }
                t.last_index = Some(idx);
            }
        }
        self.last_revenue = frame
            .records
            .iter()
            .map(|r| r.revenue.to_f64().unwrap_or(0.0))
            .collect();
        self.ticks += 1;
    }

    pub fn ticks(&self) -> usize {
        self.ticks
    }

    pub fn finish(self, floor_pinned: usize) -> Result<RunSummary> {
        ensure!(self.ticks > 0, "no ticks to summarize");

        let mut by_class = BTreeMap::new();
        for (class, t) in self.totals {
            let firms = self.classes.values().filter(|c| **c == class).count();
            let denom = Decimal::from(t.n.max(1));
            let index = [t.first_index, t.last_index];
            by_class.insert(
                class,
                ClassSummary {
                    firms,
                    mean_revenue: (t.revenue / denom).round_dp(6),
                    mean_price: (t.price / denom).round_dp(6),
                    cumulative_inflation: cumulative_inflation(&index),
                },
            );
        }

        let summary = RunSummary {
            ticks: self.ticks,
            firms: self.classes.len(),
            by_class,
            total_unmet_demand: self.unmet,
            final_revenue_gini: compute_gini(&self.last_revenue),
            floor_pinned,
        };
        debug!(?summary, "run summarized");
        Ok(summary)
    }
}

/// Aggregate a finished run held in memory.
pub fn summarize(
    frames: &[TickFrame],
    classes: &BTreeMap<FirmId, GoodClass>,
    floor_pinned: usize,
) -> Result<RunSummary> {
    let mut builder = SummaryBuilder::new(classes.clone());
    for f in frames {
        builder.observe(f);
    }
    builder.finish(floor_pinned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sim_core::{EngineConfig, FirmSales, FirmSpec, FirmTickRecord, MarketState};
    use sim_econ::FirmDecisionEngine;

    /// `(firm, price, units sold)` per row; revenue is price × units.
    fn frame(tick: u64, rows: &[(u32, i64, u32)]) -> TickFrame {
        let records = rows
            .iter()
            .map(|&(id, price, units)| FirmTickRecord {
                firm_id: FirmId(id),
                price: Decimal::new(price, 0),
                inventory: 0.0,
                production_quantity: 0.0,
                employee_count: 1,
                revenue: Decimal::new(price * i64::from(units), 0),
                unmet_demand: 1.5,
            })
            .collect();
        let sales = rows
            .iter()
            .map(|&(id, price, units)| FirmSales {
                firm_id: FirmId(id),
                units_sold: f64::from(units),
                price_charged: Decimal::new(price, 0),
            })
            .collect();
        TickFrame {
            tick,
            records,
            sales,
        }
    }

    fn classes() -> BTreeMap<FirmId, GoodClass> {
        [
            (FirmId(0), GoodClass::Necessity),
            (FirmId(1), GoodClass::Necessity),
            (FirmId(2), GoodClass::Luxury),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn gini_edges() {
        assert_eq!(compute_gini(&[]), 0.0);
        assert_eq!(compute_gini(&[0.0, 0.0]), 0.0);
        assert!(compute_gini(&[5.0, 5.0, 5.0, 5.0]).abs() < 1e-12);
        // one holder of everything among four
        assert!((compute_gini(&[0.0, 0.0, 0.0, 8.0]) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn index_weights_by_units_sold() {
        let frame = frame(0, &[(0, 5, 10), (1, 7, 30), (2, 60, 10)]);
        let necessity = price_index(&frame, &classes(), Some(GoodClass::Necessity));
        assert_eq!(necessity, Some(Decimal::new(65, 1)));
        let luxury = price_index(&frame, &classes(), Some(GoodClass::Luxury));
        assert_eq!(luxury, Some(Decimal::new(60, 0)));
    }

    #[test]
    fn no_sales_no_index() {
        let frame = frame(0, &[(0, 5, 0)]);
        assert_eq!(price_index(&frame, &classes(), None), None);
    }

    #[test]
    fn index_uses_the_price_charged_not_the_next_price() {
        let engine = FirmDecisionEngine::new(EngineConfig::default()).unwrap();
        let spec = FirmSpec {
            id: FirmId(0),
            good_class: GoodClass::Necessity,
            initial_price: Decimal::new(6, 0),
            initial_inventory: 1_000.0,
            production_capacity: 500.0,
            cost_basis: Decimal::new(5, 0),
            initial_staff: 4,
        };
        let mut firm = engine.create_firm(&spec).unwrap();
        let market = MarketState {
            firm_id: FirmId(0),
            demand_observed: 990.0,
            competitor_price: None,
        };
        let out = engine.step(&mut firm, &market);
        assert_ne!(out.record.price, Decimal::new(6, 0));

        let frame = TickFrame {
            tick: 0,
            records: vec![out.record],
            sales: vec![out.sales],
        };
        assert_eq!(price_index(&frame, &classes(), None), Some(Decimal::new(6, 0)));
    }

    #[test]
    fn inflation_between_ticks() {
        let idx = [
            Some(Decimal::new(100, 0)),
            None,
            Some(Decimal::new(110, 0)),
            Some(Decimal::new(121, 0)),
        ];
        let s = inflation_series(&idx);
        assert_eq!(s.len(), 3);
        assert_eq!(s[0], None);
        assert_eq!(s[1], None);
        assert!((s[2].unwrap() - 0.1).abs() < 1e-12);
        assert!((cumulative_inflation(&idx).unwrap() - 0.21).abs() < 1e-12);
    }

    fn two_ticks() -> Vec<TickFrame> {
        vec![
            frame(0, &[(0, 5, 10), (1, 7, 10), (2, 60, 0)]),
            frame(1, &[(0, 5, 10), (1, 7, 10), (2, 60, 2)]),
        ]
    }

    #[test]
    fn summary_aggregates_per_class() {
        let s = summarize(&two_ticks(), &classes(), 1).unwrap();
        assert_eq!(s.ticks, 2);
        assert_eq!(s.firms, 3);
        assert_eq!(s.floor_pinned, 1);
        assert!((s.total_unmet_demand - 9.0).abs() < 1e-12);
        let n = &s.by_class[&GoodClass::Necessity];
        assert_eq!(n.firms, 2);
        assert_eq!(n.mean_revenue, Decimal::new(60, 0));
        assert_eq!(n.mean_price, Decimal::new(6, 0));
        assert_eq!(n.cumulative_inflation, Some(0.0));
        assert_eq!(s.by_class[&GoodClass::Luxury].mean_revenue, Decimal::new(60, 0));
        assert!(s.final_revenue_gini > 0.0);
    }

    #[test]
    fn builder_tracks_index_across_dropped_frames() {
        let mut b = SummaryBuilder::new(classes());
        for tick in 0..3 {
            let price = 5 + tick as i64;
            b.observe(&frame(tick, &[(0, price, 10), (1, price, 10)]));
        }
        assert_eq!(b.ticks(), 3);
        let s = b.finish(0).unwrap();
        let n = &s.by_class[&GoodClass::Necessity];
        // 5 -> 7
        assert!((n.cumulative_inflation.unwrap() - 0.4).abs() < 1e-12);
        assert_eq!(s.by_class[&GoodClass::Luxury].cumulative_inflation, None);
    }

    #[test]
    fn summary_serializes_for_the_run_folder() {
        let s = summarize(&two_ticks(), &classes(), 0).unwrap();
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["ticks"], 2);
        assert_eq!(v["by_class"]["necessity"]["firms"], 2);
        assert!(v["by_class"]["luxury"]["cumulative_inflation"].is_number());
    }

    #[test]
    fn empty_run_is_an_error() {
        assert!(summarize(&[], &classes(), 0).is_err());
    }

    proptest! {
        #[test]
        fn gini_is_bounded(values in proptest::collection::vec(0.0f64..1e6, 1..50)) {
            let g = compute_gini(&values);
            let n = values.len() as f64;
            prop_assert!(g >= -1e-9);
            prop_assert!(g <= 1.0 - 1.0 / n + 1e-9);
        }

        #[test]
        fn gini_ignores_order(mut values in proptest::collection::vec(0.0f64..1e6, 1..50)) {
            let a = compute_gini(&values);
            values.reverse();
            prop_assert!((a - compute_gini(&values)).abs() < 1e-9);
        }
    }
}
