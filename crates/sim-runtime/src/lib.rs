#![deny(warnings)]

//! ECS host loop: clears the goods market, lets every firm decide against the
//! same frozen snapshot and then commits all decisions at once.

mod market;
mod watch;

pub use market::{clear, Quote};
pub use watch::{FloorAlert, FloorWatch};

use bevy_ecs::prelude::*;
use sim_core::{
    validate_scenario, EngineConfig, FirmId, FirmSpec, MarketConfig, MarketState, Scenario,
    TickFrame, ValidationError,
};
use sim_econ::{
    derive_seed, price_band, Anomaly, Decision, Firm, FirmAccounts, FirmDecisionEngine,
};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq)]
pub enum RuntimeError {
    #[error("invalid scenario: {0}")]
    Invalid(#[from] ValidationError),
    #[error("checkpoint firm {0} is not part of the scenario")]
    UnknownFirm(FirmId),
    #[error("checkpoint holds firm {0} more than once")]
    DuplicateFirm(FirmId),
    #[error("scenario firm {0} is missing from the checkpoint")]
    MissingFirm(FirmId),
    #[error("checkpoint firm {firm} disagrees with the scenario on {field}")]
    CheckpointMismatch { firm: FirmId, field: &'static str },
}

#[derive(Component, Debug)]
pub struct FirmAgent(pub Firm);

#[derive(Component, Debug, Default)]
struct Pending(Option<Decision>);

#[derive(Resource)]
struct Engine(FirmDecisionEngine);

#[derive(Resource)]
struct Market {
    config: MarketConfig,
    seed: u64,
}

#[derive(Resource, Default)]
struct Clock {
    tick: u64,
}

#[derive(Resource, Default)]
struct DemandSnapshot(BTreeMap<FirmId, MarketState>);

#[derive(Resource, Default)]
struct Watch(FloorWatch);

/// Everything the run has produced so far.
#[derive(Resource, Debug, Default)]
pub struct TickLog {
    pub frames: Vec<TickFrame>,
    /// Per-tick accounts, aligned with `frames`.
    pub accounts: Vec<Vec<(FirmId, FirmAccounts)>>,
    pub anomalies: Vec<(u64, FirmId, Anomaly)>,
}

fn clear_market(
    clock: Res<Clock>,
    market: Res<Market>,
    firms: Query<&FirmAgent>,
    mut snapshot: ResMut<DemandSnapshot>,
) {
    let quotes: Vec<Quote> = firms
        .iter()
        .map(|a| Quote {
            id: a.0.id(),
            class: a.0.good_class(),
            price: a.0.price(),
        })
        .collect();
    snapshot.0 = clear(&quotes, &market.config, market.seed, clock.tick);
}

// Reads firms only; every decision sees the state the market was cleared on.
fn decide_firms(
    engine: Res<Engine>,
    snapshot: Res<DemandSnapshot>,
    mut firms: Query<(&FirmAgent, &mut Pending)>,
) {
    for (agent, mut pending) in firms.iter_mut() {
        let id = agent.0.id();
        let market = snapshot.0.get(&id).cloned().unwrap_or(MarketState {
            firm_id: id,
            demand_observed: 0.0,
            competitor_price: None,
        });
        pending.0 = Some(engine.0.decide(&agent.0, &market));
    }
}

fn commit_firms(
    engine: Res<Engine>,
    mut clock: ResMut<Clock>,
    mut log: ResMut<TickLog>,
    mut watch: ResMut<Watch>,
    mut firms: Query<(&mut FirmAgent, &mut Pending)>,
) {
    let tick = clock.tick;
    let mut outcomes = Vec::new();
    for (mut agent, mut pending) in firms.iter_mut() {
        if let Some(decision) = pending.0.take() {
            outcomes.push(engine.0.commit(&mut agent.0, decision));
        }
    }
    outcomes.sort_by_key(|o| o.record.firm_id);

    let mut records = Vec::with_capacity(outcomes.len());
    let mut sales = Vec::with_capacity(outcomes.len());
    let mut accounts = Vec::with_capacity(outcomes.len());
    for o in outcomes {
        let id = o.record.firm_id;
        watch.0.observe(tick, id, o.at_price_floor);
        log.anomalies
            .extend(o.anomalies.into_iter().map(|a| (tick, id, a)));
        accounts.push((id, o.accounts));
        records.push(o.record);
        sales.push(o.sales);
    }
    debug!(tick, firms = records.len(), "tick committed");
    log.frames.push(TickFrame {
        tick,
        records,
        sales,
    });
    log.accounts.push(accounts);
    clock.tick += 1;
}

/// A running economy: one entity per firm plus the schedule that moves them.
pub struct Simulation {
    world: World,
    schedule: Schedule,
}

impl Simulation {
    pub fn new(scenario: &Scenario) -> Result<Self, RuntimeError> {
        validate_scenario(scenario)?;
        let engine = FirmDecisionEngine::new(scenario.engine.clone())?;
        let seed = scenario.sim.rng_seed;

        let mut world = World::new();
        for spec in &scenario.firms {
            let firm = engine
                .create_firm(spec)?
                .with_jitter_seed(derive_seed(seed, u64::from(spec.id.0), 0));
            world.spawn((FirmAgent(firm), Pending::default()));
        }
        world.insert_resource(Engine(engine));
        world.insert_resource(Market {
            config: scenario.market.clone(),
            seed,
        });
        world.insert_resource(Clock::default());
        world.insert_resource(DemandSnapshot::default());
        world.insert_resource(TickLog::default());
        world.insert_resource(Watch(FloorWatch::new(scenario.sim.floor_alert_ticks)));

        let mut schedule = Schedule::default();
        schedule.add_systems((clear_market, decide_firms, commit_firms).chain());

        info!(
            scenario = %scenario.name,
            firms = scenario.firms.len(),
            seed,
            "simulation initialised"
        );
        Ok(Self { world, schedule })
    }

    /// Rebuild a run from checkpointed firms and floor streaks.
    ///
    /// Every scenario firm must appear exactly once, and each saved firm must
    /// still fit its spec and the scenario's engine configuration.
    pub fn restore(
        scenario: &Scenario,
        tick: u64,
        firms: Vec<Firm>,
        floor_streaks: BTreeMap<FirmId, u32>,
    ) -> Result<Self, RuntimeError> {
        let mut sim = Self::new(scenario)?;
        let specs: BTreeMap<FirmId, &FirmSpec> =
            scenario.firms.iter().map(|f| (f.id, f)).collect();

        let mut saved: BTreeMap<FirmId, Firm> = BTreeMap::new();
        for firm in firms {
            let id = firm.id();
            let spec = specs.get(&id).ok_or(RuntimeError::UnknownFirm(id))?;
            check_restored(spec, &firm, &scenario.engine)?;
            if saved.insert(id, firm).is_some() {
                return Err(RuntimeError::DuplicateFirm(id));
            }
        }
        if let Some(id) = specs.keys().find(|id| !saved.contains_key(*id)) {
            return Err(RuntimeError::MissingFirm(*id));
        }

        let mut q = sim.world.query::<&mut FirmAgent>();
        for mut agent in q.iter_mut(&mut sim.world) {
            if let Some(f) = saved.remove(&agent.0.id()) {
                agent.0 = f;
            }
        }
        let streaks = floor_streaks
            .into_iter()
            .filter(|(id, _)| specs.contains_key(id))
            .collect();
        sim.world.resource_mut::<Clock>().tick = tick;
        sim.world.insert_resource(Watch(
            FloorWatch::new(scenario.sim.floor_alert_ticks).with_streaks(streaks),
        ));
        info!(tick, firms = specs.len(), "simulation restored");
        Ok(sim)
    }

    pub fn step(&mut self) {
        self.schedule.run(&mut self.world);
    }

    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.step();
        }
        info!(tick = self.tick(), "run finished");
    }

    /// Index of the next tick to run.
    pub fn tick(&self) -> u64 {
        self.world.resource::<Clock>().tick
    }

    pub fn log(&self) -> &TickLog {
        self.world.resource::<TickLog>()
    }

    pub fn frames(&self) -> &[TickFrame] {
        &self.log().frames
    }

    /// Hand over everything logged since the last call and start a fresh log.
    pub fn take_log(&mut self) -> TickLog {
        std::mem::take(&mut *self.world.resource_mut::<TickLog>())
    }

    /// Snapshot of every firm, ordered by id.
    pub fn firms(&mut self) -> Vec<Firm> {
        let mut q = self.world.query::<&FirmAgent>();
        let mut out: Vec<Firm> = q.iter(&self.world).map(|a| a.0.clone()).collect();
        out.sort_by_key(|f| f.id());
        out
    }

    pub fn floor_alerts(&self) -> &[FloorAlert] {
        self.world.resource::<Watch>().0.alerts()
    }

    /// Firms currently pinned to their floor for at least the alert threshold.
    pub fn floor_pinned(&self) -> usize {
        self.world.resource::<Watch>().0.pinned()
    }

    /// Current floor streak per firm, as saved with a checkpoint.
    pub fn floor_streaks(&self) -> BTreeMap<FirmId, u32> {
        self.world.resource::<Watch>().0.streaks().clone()
    }
}

fn check_restored(
    spec: &FirmSpec,
    firm: &Firm,
    config: &EngineConfig,
) -> Result<(), RuntimeError> {
    let params = config.class(spec.good_class);
    let band = price_band(spec.cost_basis, params);
    let field = if firm.good_class() != spec.good_class {
        "good_class"
    } else if firm.cost_basis() != spec.cost_basis {
        "cost_basis"
    } else if firm.production_capacity() != spec.production_capacity {
        "production_capacity"
    } else if firm.price() < band.floor || firm.price() > band.ceiling {
        "price"
    } else if !(params.min_staff..=params.max_staff).contains(&firm.employee_count()) {
        "employee_count"
    } else if !firm.inventory().is_finite() || firm.inventory() < 0.0 {
        "inventory"
    } else if firm.tracker().windows() != &config.demand {
        "demand_windows"
    } else {
        return Ok(());
    };
    Err(RuntimeError::CheckpointMismatch {
        firm: spec.id,
        field,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use sim_core::GoodClass;
    use sim_econ::price_band;

    fn run(scenario: &Scenario, ticks: u64) -> Simulation {
        let mut sim = Simulation::new(scenario).expect("valid scenario");
        sim.run(ticks);
        sim
    }

    #[test]
    fn one_frame_per_tick_with_every_firm() {
        let scenario = Scenario::baseline();
        let sim = run(&scenario, 12);
        assert_eq!(sim.frames().len(), 12);
        assert_eq!(sim.tick(), 12);
        for (i, frame) in sim.frames().iter().enumerate() {
            assert_eq!(frame.tick, i as u64);
            let ids: Vec<FirmId> = frame.records.iter().map(|r| r.firm_id).collect();
            let expected: Vec<FirmId> = scenario.firms.iter().map(|f| f.id).collect();
            assert_eq!(ids, expected);
        }
    }

    #[test]
    fn same_seed_same_run() {
        let scenario = Scenario::baseline();
        let a = run(&scenario, 40);
        let b = run(&scenario, 40);
        assert_eq!(a.frames(), b.frames());
    }

    #[test]
    fn different_seed_diverges() {
        let scenario = Scenario::baseline();
        let mut other = scenario.clone();
        other.sim.rng_seed += 1;
        let a = run(&scenario, 20);
        let b = run(&other, 20);
        assert_ne!(a.frames(), b.frames());
    }

    #[test]
    fn invariants_hold_over_baseline_run() {
        let scenario = Scenario::baseline();
        let sim = run(&scenario, 60);
        let specs: BTreeMap<FirmId, _> = scenario.firms.iter().map(|f| (f.id, f)).collect();
        for frame in sim.frames() {
            for r in &frame.records {
                let spec = specs[&r.firm_id];
                let params = scenario.engine.class(spec.good_class);
                let band = price_band(spec.cost_basis, params);
                assert!(r.price >= band.floor && r.price <= band.ceiling);
                assert!(r.inventory >= 0.0);
                assert!(r.unmet_demand >= 0.0);
                assert!(r.employee_count >= params.min_staff);
                assert!(r.employee_count <= params.max_staff);
                assert!(r.revenue >= Decimal::ZERO);
            }
        }
        assert_eq!(sim.log().accounts.len(), 60);
    }

    #[test]
    fn checkpoint_restore_continues_identically() {
        let mut scenario = Scenario::baseline();
        scenario.market.luxury.base_demand_units = 0;
        scenario.sim.floor_alert_ticks = 20;
        let mut full = run(&scenario, 60);

        let mut half = run(&scenario, 30);
        let saved = half.firms();
        let mut resumed =
            Simulation::restore(&scenario, half.tick(), saved, half.floor_streaks())
                .expect("restore");
        resumed.run(30);

        let tail: Vec<TickFrame> = full.frames()[30..].to_vec();
        assert_eq!(resumed.frames(), tail.as_slice());
        assert_eq!(resumed.firms(), full.firms());
        assert_eq!(resumed.floor_streaks(), full.floor_streaks());
        assert_eq!(resumed.floor_pinned(), full.floor_pinned());
    }

    fn restore_after_one_tick(saved_from: &Scenario, into: &Scenario) -> RuntimeError {
        let mut sim = run(saved_from, 1);
        let firms = sim.firms();
        match Simulation::restore(into, 1, firms, sim.floor_streaks()) {
            Ok(_) => panic!("restore should have failed"),
            Err(e) => e,
        }
    }

    #[test]
    fn restore_rejects_foreign_firm() {
        let scenario = Scenario::baseline();
        let mut other = Scenario::baseline();
        other.firms.truncate(2);
        assert!(matches!(
            restore_after_one_tick(&scenario, &other),
            RuntimeError::UnknownFirm(FirmId(2))
        ));
    }

    #[test]
    fn restore_rejects_partial_checkpoint() {
        let scenario = Scenario::baseline();
        let mut sim = run(&scenario, 1);
        let mut firms = sim.firms();
        firms.retain(|f| f.id() != FirmId(5));
        let err = Simulation::restore(&scenario, 1, firms, BTreeMap::new()).err();
        assert_eq!(err, Some(RuntimeError::MissingFirm(FirmId(5))));
    }

    #[test]
    fn restore_rejects_duplicate_firm() {
        let scenario = Scenario::baseline();
        let mut sim = run(&scenario, 1);
        let mut firms = sim.firms();
        firms.push(firms[0].clone());
        let err = Simulation::restore(&scenario, 1, firms, BTreeMap::new()).err();
        assert_eq!(err, Some(RuntimeError::DuplicateFirm(FirmId(0))));
    }

    #[test]
    fn restore_rejects_mismatched_class() {
        let scenario = Scenario::baseline();
        let mut other = Scenario::baseline();
        // same cost and a price that still fits the necessity band
        other.firms[4].good_class = GoodClass::Necessity;
        assert_eq!(
            restore_after_one_tick(&scenario, &other),
            RuntimeError::CheckpointMismatch {
                firm: FirmId(4),
                field: "good_class"
            }
        );
    }

    #[test]
    fn restore_rejects_changed_cost_basis() {
        let scenario = Scenario::baseline();
        let mut other = Scenario::baseline();
        other.firms[1].cost_basis = Decimal::new(55, 1);
        other.firms[1].initial_price = Decimal::new(7, 0);
        assert_eq!(
            restore_after_one_tick(&scenario, &other),
            RuntimeError::CheckpointMismatch {
                firm: FirmId(1),
                field: "cost_basis"
            }
        );
    }

    #[test]
    fn restore_revalidates_price_against_engine_config() {
        let scenario = Scenario::baseline();
        let mut other = Scenario::baseline();
        // necessity floor moves from 5.5 to 6.5
        other.engine.necessity.min_margin = Decimal::new(3, 1);
        for f in other.firms.iter_mut().filter(|f| f.good_class == GoodClass::Necessity) {
            f.initial_price = Decimal::new(7, 0);
        }
        assert_eq!(
            restore_after_one_tick(&scenario, &other),
            RuntimeError::CheckpointMismatch {
                firm: FirmId(0),
                field: "price"
            }
        );
    }

    #[test]
    fn restore_rejects_other_demand_windows() {
        let scenario = Scenario::baseline();
        let mut other = Scenario::baseline();
        other.engine.demand.long_window = 10;
        assert_eq!(
            restore_after_one_tick(&scenario, &other),
            RuntimeError::CheckpointMismatch {
                firm: FirmId(0),
                field: "demand_windows"
            }
        );
    }

    #[test]
    fn taken_log_starts_fresh() {
        let scenario = Scenario::baseline();
        let mut sim = run(&scenario, 3);
        let first = sim.take_log();
        assert_eq!(first.frames.len(), 3);
        assert!(sim.frames().is_empty());
        sim.step();
        let second = sim.take_log();
        assert_eq!(second.frames.len(), 1);
        assert_eq!(second.frames[0].tick, 3);
        assert_eq!(second.frames[0].sales.len(), scenario.firms.len());
    }

    #[test]
    fn starved_luxury_firm_trips_floor_watch() {
        let mut scenario = Scenario::baseline();
        scenario.market.luxury.base_demand_units = 0;
        scenario.sim.floor_alert_ticks = 5;
        let sim = run(&scenario, 80);
        let luxury: Vec<FirmId> = scenario
            .firms
            .iter()
            .filter(|f| f.good_class == GoodClass::Luxury)
            .map(|f| f.id)
            .collect();
        for id in &luxury {
            assert!(sim.floor_alerts().iter().any(|a| a.firm_id == *id));
        }
        assert!(sim.floor_pinned() >= luxury.len());
    }

    #[test]
    fn invalid_scenario_is_rejected() {
        let mut scenario = Scenario::baseline();
        scenario.firms.clear();
        assert!(matches!(Simulation::new(&scenario), Err(RuntimeError::Invalid(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn any_seed_keeps_prices_in_band(seed in any::<u64>()) {
            let mut scenario = Scenario::baseline();
            scenario.sim.rng_seed = seed;
            let sim = run(&scenario, 10);
            for frame in sim.frames() {
                for r in &frame.records {
                    let spec = scenario
                        .firms
                        .iter()
                        .find(|f| f.id == r.firm_id)
                        .expect("known firm");
                    let params = scenario.engine.class(spec.good_class);
                    let band = price_band(spec.cost_basis, params);
                    prop_assert!(r.price >= band.floor && r.price <= band.ceiling);
                }
            }
        }
    }
}
