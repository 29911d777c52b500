//! Aggregate anomaly reporting across ticks.

use sim_core::FirmId;
use std::collections::BTreeMap;
use tracing::warn;

/// A firm that has sat on its cost floor for `streak` consecutive ticks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FloorAlert {
    pub tick: u64,
    pub firm_id: FirmId,
    pub streak: u32,
}

/// Counts consecutive floor-price ticks per firm and raises one alert when a
/// streak reaches the threshold. A threshold of zero disables alerts.
#[derive(Clone, Debug, Default)]
pub struct FloorWatch {
    threshold: u32,
    streaks: BTreeMap<FirmId, u32>,
    alerts: Vec<FloorAlert>,
}

impl FloorWatch {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    /// Continue counting from streaks saved with a checkpoint.
    pub fn with_streaks(mut self, streaks: BTreeMap<FirmId, u32>) -> Self {
        self.streaks = streaks;
        self
    }

    pub fn streaks(&self) -> &BTreeMap<FirmId, u32> {
        &self.streaks
    }

    pub fn observe(&mut self, tick: u64, firm_id: FirmId, at_floor: bool) {
        let streak = self.streaks.entry(firm_id).or_insert(0);
        if !at_floor {
            *streak = 0;
            return;
        }
        *streak += 1;
        if self.threshold > 0 && *streak == self.threshold {
            warn!(tick, firm = %firm_id, streak = *streak, "firm pinned at floor price");
            self.alerts.push(FloorAlert {
                tick,
                firm_id,
                streak: *streak,
            });
        }
    }

    pub fn streak(&self, firm_id: FirmId) -> u32 {
        self.streaks.get(&firm_id).copied().unwrap_or(0)
    }

    /// Firms currently on their floor for at least the threshold.
    pub fn pinned(&self) -> usize {
        self.streaks
            .values()
            .filter(|s| self.threshold > 0 && **s >= self.threshold)
            .count()
    }

    pub fn alerts(&self) -> &[FloorAlert] {
        &self.alerts
    }
}
