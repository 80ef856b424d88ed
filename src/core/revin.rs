//! Reversible instance normalisation (RevIN).
//!
//! Each sample is standardised per channel over its own time axis before the
//! network sees it, and the forecast is mapped back with the same statistics:
//!
//! ```text
//! μ_c  = mean_t x[t, c]
//! σ²_c = mean_t (x[t, c] - μ_c)² + ε       ε = 1e-5
//! x̂    = (x - μ) / σ
//! ŷ    = y · σ + μ
//! ```
//!
//! The statistics are transient: they are computed once per forward call and
//! dropped once the forecast has been denormalised.

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::config::VARIANCE_FLOOR;

/// Per-channel statistics of one input window.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceStats {
    /// Mean over time: μ ∈ R^{channels}
    pub mean: Array1<f32>,

    /// Biased variance over time plus the floor: σ² ∈ R^{channels}
    pub var: Array1<f32>,
}

impl InstanceStats {
    /// Measure a `[seq_len, channels]` window.
    pub fn observe(window: ArrayView2<f32>) -> Self {
        let channels = window.ncols();
        let mean = window
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(channels));
        let centred = &window - &mean;
        let var = centred
            .mapv(|v| v * v)
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(channels))
            + VARIANCE_FLOOR;
        Self { mean, var }
    }

    /// Standard deviation σ (floored variance, so never zero).
    pub fn std(&self) -> Array1<f32> {
        self.var.mapv(f32::sqrt)
    }

    /// `(x - μ) / σ` for a `[time, channels]` array.
    pub fn normalize(&self, window: ArrayView2<f32>) -> Array2<f32> {
        (&window - &self.mean) / &self.std()
    }

    /// `y · σ + μ` for a `[time, channels]` array of any length.
    pub fn denormalize(&self, forecast: ArrayView2<f32>) -> Array2<f32> {
        &forecast * &self.std() + &self.mean
    }
}
