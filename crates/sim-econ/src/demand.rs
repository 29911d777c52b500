//! Demand trend estimation from a firm's own realized sales.

use serde::{Deserialize, Serialize};
use sim_core::{DemandWindows, Weighting};
use std::collections::VecDeque;

/// Direction of demand, short window against long window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

impl Trend {
    /// +1, -1 or 0.
    pub fn sign(&self) -> f64 {
        match self {
            Trend::Rising => 1.0,
            Trend::Falling => -1.0,
            Trend::Stable => 0.0,
        }
    }
}

/// Per-tick view of tracked demand. Recomputed every update, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DemandSignal {
    /// Weighted average over the short window; the near-term forecast.
    pub short_avg: f64,
    /// Weighted average over the long window; the baseline.
    pub long_avg: f64,
    pub trend: Trend,
}

impl DemandSignal {
    pub const EMPTY: DemandSignal = DemandSignal {
        short_avg: 0.0,
        long_avg: 0.0,
        trend: Trend::Stable,
    };
}

/// Bounded history of realized sales with weighted moving averages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DemandTracker {
    windows: DemandWindows,
    history: VecDeque<f64>,
}

impl DemandTracker {
    pub fn new(windows: DemandWindows) -> Self {
        let history = VecDeque::with_capacity(windows.history_len);
        Self { windows, history }
    }

    /// Record one tick of realized sales and return the refreshed signal.
    ///
    /// Negative or non-finite sales are recorded as zero.
    pub fn update(&mut self, realized_sales: f64) -> DemandSignal {
        let sales = if realized_sales.is_finite() {
            realized_sales.max(0.0)
        } else {
            0.0
        };
        while self.history.len() >= self.windows.history_len.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(sales);
        self.signal()
    }

    /// Signal over the current history without recording anything.
    pub fn signal(&self) -> DemandSignal {
        let w = &self.windows;
        let short_avg = weighted_average(&self.history, w.short_window, w.weighting);
        let long_avg = weighted_average(&self.history, w.long_window, w.weighting);
        // not enough history for a baseline yet
        if self.history.len() < w.long_window {
            return DemandSignal {
                short_avg,
                long_avg,
                trend: Trend::Stable,
            };
        }
        let threshold = w.trend_threshold * long_avg.max(1.0);
        let gap = short_avg - long_avg;
        let trend = if gap > threshold {
            Trend::Rising
        } else if -gap > threshold {
            Trend::Falling
        } else {
            Trend::Stable
        };
        DemandSignal {
            short_avg,
            long_avg,
            trend,
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn windows(&self) -> &DemandWindows {
        &self.windows
    }

    /// Recorded sales, oldest first.
    pub fn history(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }
}

/// Weighted mean of the newest `window` entries (fewer if the history is short).
fn weighted_average(history: &VecDeque<f64>, window: usize, weighting: Weighting) -> f64 {
    let n = window.min(history.len());
    if n == 0 {
        return 0.0;
    }
    let mut num = 0.0;
    let mut den = 0.0;
    for (age, v) in history.iter().rev().take(n).enumerate() {
        let weight = match weighting {
            Weighting::Linear => (n - age) as f64,
            Weighting::Exponential { decay } => decay.powi(age as i32),
        };
        num += weight * v;
        den += weight;
    }
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}
