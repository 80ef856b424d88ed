//! Phase query synthesis — learned cyclic tables gathered by phase.
//!
//! Each recognised cycle owns a table `T ∈ R^{cycle_len × channels}` holding
//! what every channel typically looks like at each phase. For a window whose
//! first step sits at phase `p`, the query for offset `t` is row
//! `(p + t) mod cycle_len` of the table, laid out channel-major.
//!
//! Two cycles (daily, weekly) are combined by a plain learned affine sum:
//!
//! ```text
//! q = α · gather(T_day, p_day) + β · gather(T_week, p_week)
//! ```
//!
//! α and β are free parameters: they are not tied to sum to one and may leave
//! `[0, 1]`.

use ndarray::{Array0, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::FUSION_INIT;

/// Absolute phases covered by a window of `seq_len` steps starting at `phase`.
///
/// Uses Euclidean modulo, so any integer phase (negative or past the end of
/// the cycle) wraps into `[0, cycle_len)`. A zero-length cycle has no rows to
/// point at and yields an empty index.
pub fn gather_index(phase: i64, seq_len: usize, cycle_len: usize) -> Vec<usize> {
    if cycle_len == 0 {
        return Vec::new();
    }
    let cycle = cycle_len as i64;
    let start = phase.rem_euclid(cycle);
    (0..seq_len as i64)
        .map(|t| ((start + t) % cycle) as usize)
        .collect()
}

/// Elementwise `alpha · daily + beta · weekly`.
pub fn fuse(alpha: f32, beta: f32, daily: ArrayView2<f32>, weekly: ArrayView2<f32>) -> Array2<f32> {
    &daily * alpha + &weekly * beta
}

/// One learned cyclic table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemporalQuery {
    /// Table: T ∈ R^{cycle_len × channels}
    pub table: Array2<f32>,
}

impl TemporalQuery {
    /// Zero-initialised table; it only acquires structure through training.
    pub fn zeros(cycle_len: usize, channels: usize) -> Self {
        Self {
            table: Array2::zeros((cycle_len, channels)),
        }
    }

    pub fn cycle_len(&self) -> usize {
        self.table.nrows()
    }

    pub fn channels(&self) -> usize {
        self.table.ncols()
    }

    /// Gather the rows for one sample, returned as `[channels, seq_len]`.
    ///
    /// An empty table contributes zeros of the same shape.
    pub fn gather(&self, phase: i64, seq_len: usize) -> Array2<f32> {
        if self.cycle_len() == 0 {
            return Array2::zeros((self.channels(), seq_len));
        }
        let index = gather_index(phase, seq_len, self.cycle_len());
        self.table.select(Axis(0), &index).reversed_axes()
    }

    /// Gather for a batch of phases, returned as `[batch, channels, seq_len]`.
    pub fn gather_batch(&self, phases: &[i64], seq_len: usize) -> Array3<f32> {
        let mut out = Array3::zeros((phases.len(), self.channels(), seq_len));
        for (mut slot, &phase) in out.axis_iter_mut(Axis(0)).zip(phases) {
            slot.assign(&self.gather(phase, seq_len));
        }
        out
    }

    pub fn param_count(&self) -> usize {
        self.table.len()
    }
}

/// Daily and weekly tables plus their fusion weights.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhaseQuery {
    pub daily: TemporalQuery,
    pub weekly: TemporalQuery,

    /// Weight of the daily cycle.
    pub alpha: Array0<f32>,

    /// Weight of the weekly cycle.
    pub beta: Array0<f32>,
}

impl PhaseQuery {
    /// Both tables zero, `alpha = beta = 0.5`.
    pub fn new(cycle_len: usize, channels: usize) -> Self {
        Self {
            daily: TemporalQuery::zeros(cycle_len, channels),
            weekly: TemporalQuery::zeros(cycle_len, channels),
            alpha: Array0::from_elem((), FUSION_INIT),
            beta: Array0::from_elem((), FUSION_INIT),
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha[()]
    }

    pub fn beta(&self) -> f32 {
        self.beta[()]
    }

    /// Fused query for one sample: `[channels, seq_len]`.
    pub fn query(&self, daily_phase: i64, weekly_phase: i64, seq_len: usize) -> Array2<f32> {
        let daily = self.daily.gather(daily_phase, seq_len);
        let weekly = self.weekly.gather(weekly_phase, seq_len);
        fuse(self.alpha(), self.beta(), daily.view(), weekly.view())
    }

    /// Fused query for a batch: `[batch, channels, seq_len]`.
    pub fn query_batch(&self, daily: &[i64], weekly: &[i64], seq_len: usize) -> Array3<f32> {
        let d = self.daily.gather_batch(daily, seq_len);
        let w = self.weekly.gather_batch(weekly, seq_len);
        d * self.alpha() + w * self.beta()
    }

    pub fn param_count(&self) -> usize {
        self.daily.param_count() + self.weekly.param_count() + 2
    }
}
