//! Synthetic periodic multivariate series.
//!
//! Each channel is a level plus a daily and a weekly sinusoid with Gaussian
//! noise. Every sample starts at a random hour of the week, and its phase
//! indices are derived from that hour.

use std::f32::consts::TAU;

use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::config::{HOURS_PER_DAY, HOURS_PER_WEEK};
use crate::core::model::{CycleIndex, ModelConfig};

/// Generator settings.
#[derive(Clone, Debug)]
pub struct SyntheticSeries {
    pub daily_amplitude: f32,
    pub weekly_amplitude: f32,
    pub noise_std: f32,
}

impl Default for SyntheticSeries {
    fn default() -> Self {
        Self {
            daily_amplitude: 1.0,
            weekly_amplitude: 0.5,
            noise_std: 0.1,
        }
    }
}

/// A batch shaped for `ModelConfig`, with its phase indices.
#[derive(Clone, Debug)]
pub struct SyntheticBatch {
    /// `[batch, seq_len, channels]`
    pub x: Array3<f32>,
    pub cycle_index: Vec<i64>,
    pub week_cycle_index: Vec<i64>,
}

impl SyntheticBatch {
    pub fn index(&self) -> CycleIndex<'_> {
        CycleIndex::new(&self.cycle_index, &self.week_cycle_index)
    }
}

impl SyntheticSeries {
    /// Draw `batch` windows of `config.seq_len` hours.
    pub fn generate(&self, config: &ModelConfig, batch: usize, seed: u64) -> SyntheticBatch {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = if self.noise_std.is_finite() && self.noise_std > 0.0 {
            Normal::new(0.0, self.noise_std).ok()
        } else {
            None
        };
        let cycle_len = config.cycle_len.max(1) as i64;

        let starts: Vec<usize> = (0..batch)
            .map(|_| rng.gen_range(0..HOURS_PER_WEEK))
            .collect();

        let mut x = Array3::zeros((batch, config.seq_len, config.channels));
        for ((b, t, c), v) in x.indexed_iter_mut() {
            let hour = (starts[b] + t) as f32;
            let shift = c as f32 * 0.7;
            let daily = (TAU * hour / HOURS_PER_DAY as f32 + shift).sin();
            let weekly = (TAU * hour / HOURS_PER_WEEK as f32 + shift).sin();
            *v = c as f32
                + self.daily_amplitude * (1.0 + 0.25 * c as f32) * daily
                + self.weekly_amplitude * weekly;
            if let Some(ref dist) = noise {
                *v += dist.sample(&mut rng);
            }
        }

        let cycle_index = starts
            .iter()
            .map(|&s| (s % HOURS_PER_DAY) as i64 % cycle_len)
            .collect();
        let week_cycle_index = starts.iter().map(|&s| s as i64 % cycle_len).collect();

        SyntheticBatch {
            x,
            cycle_index,
            week_cycle_index,
        }
    }
}
