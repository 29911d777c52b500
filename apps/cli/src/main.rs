#![deny(warnings)]

//! Headless runner: loads or builds a scenario, runs it and writes the run folder.

use anyhow::{Context, Result};
use data_pipeline::SummaryBuilder;
use persistence::{
    create_run_folder, load_checkpoint, save_checkpoint, save_summary, Checkpoint,
    FirmParquetWriter,
};
use rust_decimal::Decimal;
use sim_core::{FirmId, GoodClass, Scenario};
use sim_runtime::Simulation;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Args {
    scenario: Option<PathBuf>,
    ticks: Option<u64>,
    seed: Option<u64>,
    out: Option<PathBuf>,
    resume: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--scenario" => args.scenario = it.next().map(PathBuf::from),
            "--ticks" => args.ticks = it.next().and_then(|s| s.parse().ok()),
            "--seed" => args.seed = it.next().and_then(|s| s.parse().ok()),
            "--out" => args.out = it.next().map(PathBuf::from),
            "--resume" => args.resume = it.next().map(PathBuf::from),
            other => warn!(arg = other, "ignoring unknown argument"),
        }
    }
    args
}

fn load_scenario(path: Option<&PathBuf>) -> Result<Scenario> {
    match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("reading scenario {}", p.display()))?;
            serde_yaml::from_str(&text).with_context(|| format!("parsing scenario {}", p.display()))
        }
        None => Ok(Scenario::baseline()),
    }
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = parse_args();
    let mut scenario = load_scenario(args.scenario.as_ref())?;
    if let Some(seed) = args.seed {
        scenario.sim.rng_seed = seed;
    }
    let ticks = args.ticks.unwrap_or(scenario.sim.ticks);
    info!(scenario = %scenario.name, ticks, seed = scenario.sim.rng_seed, "starting CLI");

    let mut sim = match &args.resume {
        Some(path) => {
            let cp = load_checkpoint(path)?;
            info!(tick = cp.tick, "resuming from checkpoint");
            Simulation::restore(&scenario, cp.tick, cp.firms, cp.floor_streaks)?
        }
        None => Simulation::new(&scenario)?,
    };

    let base = args.out.unwrap_or_else(|| PathBuf::from("data/saved_data"));
    let dir = create_run_folder(&base, Some(&scenario.name))?;
    let table = dir.join("firms.parquet");
    let mut writer = FirmParquetWriter::create(&table)?;

    let classes: BTreeMap<FirmId, GoodClass> =
        scenario.firms.iter().map(|f| (f.id, f.good_class)).collect();
    let mut builder = SummaryBuilder::new(classes);
    let mut revenue = Decimal::ZERO;
    let mut anomalies = 0usize;

    // Frames are written and folded in as they are produced, then dropped.
    for _ in 0..ticks {
        sim.step();
        let log = sim.take_log();
        for frame in &log.frames {
            writer.write_frame(frame)?;
            builder.observe(frame);
            revenue = frame
                .records
                .iter()
                .fold(revenue, |acc, r| acc.saturating_add(r.revenue));
        }
        anomalies += log.anomalies.len();
    }
    let rows = writer.finish()?;
    info!(path = %table.display(), rows, tick = sim.tick(), "run finished");

    let summary = builder.finish(sim.floor_pinned())?;
    save_summary(&dir.join("summary.json"), &summary)?;
    let checkpoint = Checkpoint {
        tick: sim.tick(),
        firms: sim.firms(),
        floor_streaks: sim.floor_streaks(),
    };
    save_checkpoint(&dir.join("checkpoint.bin"), &checkpoint)?;

    println!(
        "Run OK | scenario: {} | firms: {} | ticks: {} | out: {}",
        scenario.name,
        summary.firms,
        summary.ticks,
        dir.display()
    );
    println!(
        "KPI | revenue: {} | unmet: {:.1} | gini: {:.3} | floor-pinned: {} | anomalies: {}",
        revenue.round_dp(2),
        summary.total_unmet_demand,
        summary.final_revenue_gini,
        summary.floor_pinned,
        anomalies
    );

    Ok(())
}
