#![deny(warnings)]

//! Firm decision engine and economic helpers.
//!
//! The engine resolves, once per tick and per firm, how much to produce, what to
//! charge and how many people to employ. It is built from four pure policies run
//! in a fixed order by [`FirmDecisionEngine`]:
//! - [`DemandTracker`]: short/long weighted moving averages of realized sales
//! - [`InventoryPolicy`]: stock target and forward-looking production
//! - [`PricingStrategy`]: step-capped price moves inside a margin band
//! - [`StaffingPolicy`]: integer, rate-limited staffing changes
//!
//! The crate also carries the demand-curve helpers the host uses to clear the
//! goods market.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use thiserror::Error;

pub mod demand;
pub mod engine;
pub mod firm;
pub mod inventory;
pub mod pricing;
pub mod staffing;

pub use demand::{DemandSignal, DemandTracker, Trend};
pub use engine::{Anomaly, Decision, FirmAccounts, FirmDecisionEngine, TickOutcome};
pub use firm::Firm;
pub use inventory::{InventoryPlan, InventoryPolicy};
pub use pricing::{price_band, price_jitter, PriceBand, PricingInputs, PricingStrategy};
pub use staffing::StaffingPolicy;

/// Errors produced by economic helpers.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// Elasticity must be strictly negative.
    #[error("invalid elasticity: {0}")]
    InvalidElasticity(f32),
    /// Monetary values must be non-negative; reference/price must be > 0.
    #[error("invalid price or cost value")]
    InvalidPrice,
    /// Numeric conversion to floating point failed.
    #[error("non-finite numeric conversion")]
    NonFinite,
}

/// Price at a given margin over unit cost.
///
/// Example:
/// let cost = Decimal::new(500, 2); // 5.00
/// let margin = Decimal::new(10, 2); // 0.10
/// assert_eq!(cost_plus(cost, margin), Decimal::new(550, 2));
pub fn cost_plus(unit_cost: Decimal, margin: Decimal) -> Decimal {
    unit_cost * (Decimal::ONE + margin)
}

/// Demand under constant elasticity with respect to a reference price.
///
/// Q = base * (price / ref_price)^{elasticity}. Requires:
/// - price > 0, ref_price > 0, elasticity < 0
/// - Returns non-negative integer quantity (floored), saturating at u64::MAX.
pub fn demand(
    base: u64,
    price: Decimal,
    ref_price: Decimal,
    elasticity: f32,
) -> Result<u64, EconError> {
    if !elasticity.is_finite() || elasticity >= 0.0 {
        return Err(EconError::InvalidElasticity(elasticity));
    }
    if price <= Decimal::ZERO || ref_price <= Decimal::ZERO {
        return Err(EconError::InvalidPrice);
    }
    let p = price.to_f64().ok_or(EconError::NonFinite)?;
    let p0 = ref_price.to_f64().ok_or(EconError::NonFinite)?;
    let ratio = p / p0;
    if !(ratio.is_finite() && ratio > 0.0) {
        return Err(EconError::NonFinite);
    }
    let q = (base as f64) * ratio.powf(elasticity as f64);
    if !q.is_finite() || q < 0.0 {
        return Ok(0);
    }
    let qi = q.floor();
    if qi > (u64::MAX as f64) {
        return Ok(u64::MAX);
    }
    Ok(qi as u64)
}

/// Demand with multiplicative uniform noise factor in [1-noise_frac, 1+noise_frac].
///
/// Noise is seeded for reproducibility. `noise_frac` must be in [0, 1).
pub fn demand_with_noise(
    base: u64,
    price: Decimal,
    ref_price: Decimal,
    elasticity: f32,
    noise_frac: f32,
    seed: u64,
) -> Result<u64, EconError> {
    if !noise_frac.is_finite() || !(0.0..1.0).contains(&noise_frac) {
        return Err(EconError::NonFinite);
    }
    let q = demand(base, price, ref_price, elasticity)?;
    if noise_frac == 0.0 {
        return Ok(q);
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let u: f32 = rng.gen_range(-noise_frac..=noise_frac);
    let noisy = (q as f64) * (1.0 + u as f64);
    if noisy < 0.0 {
        return Ok(0);
    }
    Ok(noisy.floor().clamp(0.0, u64::MAX as f64) as u64)
}

/// Mix a base seed with two stream coordinates (e.g. firm and tick) so every
/// draw gets its own reproducible ChaCha stream.
pub fn derive_seed(base: u64, a: u64, b: u64) -> u64 {
    // splitmix64 finalizer over a simple combination
    let mut z = base
        ^ a.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ b.wrapping_mul(0xC2B2_AE3D_27D4_EB4F).rotate_left(31);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Quantity as a Decimal for money arithmetic. `None` when the quantity is not
/// finite or lies outside the Decimal range.
pub(crate) fn units(q: f64) -> Option<Decimal> {
    Decimal::from_f64(q)
}
