//! Top-level model: wires RevIN, the channel aggregator, the core transform
//! and the output head into the full TQNet forward pass.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::core::aggregator::{AggregatorKind, ChannelAggregator};
use crate::core::params::{Parameters, Visitor, VisitorMut};
use crate::core::revin::InstanceStats;
use crate::core::transform::{CoreTransform, OutputHead};
use crate::error::{ensure_len, Result, TqError};

/// Model configuration, fixed at construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Input window length.
    pub seq_len: usize,

    /// Forecast horizon.
    pub pred_len: usize,

    /// Number of series (`enc_in`).
    pub channels: usize,

    /// Rows of each temporal query table.
    pub cycle_len: usize,

    /// Width of the internal embedding.
    pub d_model: usize,

    /// Dropout before the output projection (training only).
    pub dropout: f32,

    /// Whether to apply reversible instance normalisation.
    pub use_revin: bool,

    /// Whether to synthesise a phase query from the cyclic tables.
    pub use_phase_query: bool,

    /// Whether to attend across channels.
    pub channel_aggregation: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            seq_len: 96,
            pred_len: 96,
            channels: 7,
            cycle_len: config::HOURS_PER_DAY,
            d_model: 512,
            dropout: 0.0,
            use_revin: true,
            use_phase_query: true,
            channel_aggregation: true,
        }
    }
}

impl ModelConfig {
    pub fn kind(&self) -> AggregatorKind {
        AggregatorKind::from_flags(self.use_phase_query, self.channel_aggregation)
    }

    /// Reject configurations that cannot produce a working model.
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("seq_len", self.seq_len),
            ("pred_len", self.pred_len),
            ("channels", self.channels),
            ("d_model", self.d_model),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(TqError::InvalidConfig(format!("{} must be positive", name)));
            }
        }
        if self.use_phase_query && self.cycle_len == 0 {
            return Err(TqError::InvalidConfig(
                "cycle_len must be positive when phase query is enabled".into(),
            ));
        }
        if self.channel_aggregation && config::head_dim(self.seq_len).is_none() {
            return Err(TqError::InvalidConfig(format!(
                "seq_len {} must be divisible by {} attention heads",
                self.seq_len,
                config::N_HEADS
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TqError::InvalidConfig(format!(
                "dropout {} outside [0, 1)",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// Per-sample phase of the first window step, one slice per cycle.
#[derive(Clone, Copy, Debug)]
pub struct CycleIndex<'a> {
    pub daily: &'a [i64],
    pub weekly: &'a [i64],
}

impl<'a> CycleIndex<'a> {
    pub fn new(daily: &'a [i64], weekly: &'a [i64]) -> Self {
        Self { daily, weekly }
    }

    /// Phase pair of sample `b`, or `None` if either slice is too short.
    pub fn get(&self, b: usize) -> Option<(i64, i64)> {
        Some((*self.daily.get(b)?, *self.weekly.get(b)?))
    }
}

/// The complete TQNet model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TqModel {
    config: ModelConfig,

    /// Source of the channel information (one of four variants).
    pub aggregator: ChannelAggregator,

    /// Input projection + residual MLP.
    pub core: CoreTransform,

    /// Dropout + projection to the horizon.
    pub head: OutputHead,
}

impl TqModel {
    /// Build and initialise a model; all randomness comes from `seed`.
    pub fn new(config: ModelConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);

        let aggregator = ChannelAggregator::new(
            config.kind(),
            config.seq_len,
            config.channels,
            config.cycle_len,
            &mut rng,
        )?;
        let core = CoreTransform::new(config.seq_len, config.d_model, &mut rng);
        let head = OutputHead::new(config.d_model, config.pred_len, config.dropout, &mut rng);

        let model = Self {
            config,
            aggregator,
            core,
            head,
        };
        tracing::debug!(
            "Built TQNet: variant={:?}, seq_len={}, pred_len={}, channels={}, params={}",
            model.kind(),
            model.config.seq_len,
            model.config.pred_len,
            model.config.channels,
            model.param_count(),
        );
        Ok(model)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn kind(&self) -> AggregatorKind {
        self.aggregator.kind()
    }

    /// Inference forward pass: `x: [batch, seq_len, channels]` →
    /// `[batch, pred_len, channels]`.
    ///
    /// `cycle_index` is required when the model uses a phase query and
    /// ignored otherwise.
    pub fn forward(
        &self,
        x: ArrayView3<f32>,
        cycle_index: Option<CycleIndex<'_>>,
    ) -> Result<Array3<f32>> {
        self.run(x, cycle_index, None)
    }

    /// Training forward pass: output-head and attention dropout are active.
    ///
    /// One seed per sample is drawn from `rng` up front, so the result only
    /// depends on `rng`'s state, not on thread scheduling.
    pub fn forward_train(
        &self,
        x: ArrayView3<f32>,
        cycle_index: Option<CycleIndex<'_>>,
        rng: &mut StdRng,
    ) -> Result<Array3<f32>> {
        let seeds: Vec<u64> = (0..x.len_of(Axis(0))).map(|_| rng.gen()).collect();
        self.run(x, cycle_index, Some(&seeds))
    }

    fn run(
        &self,
        x: ArrayView3<f32>,
        cycle_index: Option<CycleIndex<'_>>,
        seeds: Option<&[u64]>,
    ) -> Result<Array3<f32>> {
        let phases = self.check_input(x, cycle_index)?;
        let batch = x.len_of(Axis(0));
        tracing::trace!("TQNet forward: batch={}, training={}", batch, seeds.is_some());

        let samples = (0..batch)
            .into_par_iter()
            .map(|b| {
                let mut rng = seeds.map(|s| StdRng::seed_from_u64(s[b]));
                let phase = phases.and_then(|p| p.get(b));
                self.forward_sample(x.index_axis(Axis(0), b), phase, rng.as_mut())
            })
            .collect::<Result<Vec<_>>>()?;

        let mut out = Array3::zeros((batch, self.config.pred_len, self.config.channels));
        for (mut slot, sample) in out.axis_iter_mut(Axis(0)).zip(samples) {
            slot.assign(&sample);
        }
        Ok(out)
    }

    /// Validate call-time shapes; returns the indices the variant needs.
    fn check_input<'a>(
        &self,
        x: ArrayView3<f32>,
        cycle_index: Option<CycleIndex<'a>>,
    ) -> Result<Option<CycleIndex<'a>>> {
        let (batch, seq_len, channels) = x.dim();
        ensure_len("seq_len", self.config.seq_len, seq_len)?;
        ensure_len("channels", self.config.channels, channels)?;

        if !self.kind().uses_phase_query() {
            return Ok(None);
        }
        let index = cycle_index.ok_or(TqError::MissingCycleIndex)?;
        ensure_len("daily cycle index", batch, index.daily.len())?;
        ensure_len("weekly cycle index", batch, index.weekly.len())?;
        Ok(Some(index))
    }

    /// One sample: `[seq_len, channels]` → `[pred_len, channels]`.
    fn forward_sample(
        &self,
        window: ArrayView2<f32>,
        phase: Option<(i64, i64)>,
        mut dropout_rng: Option<&mut StdRng>,
    ) -> Result<Array2<f32>> {
        let stats = if self.config.use_revin {
            Some(InstanceStats::observe(window))
        } else {
            None
        };
        let normalized = match &stats {
            Some(s) => s.normalize(window),
            None => window.to_owned(),
        };

        // [seq_len, channels] → [channels, seq_len]
        let x_cm = normalized.t();
        let info = self
            .aggregator
            .channel_information(x_cm, phase, dropout_rng.as_deref_mut())?;

        let hidden = self.core.forward((&x_cm + &info).view());
        let forecast = self.head.forward(hidden, dropout_rng).reversed_axes();

        Ok(match stats {
            Some(s) => s.denormalize(forecast.view()),
            None => forecast,
        })
    }

    /// Visit every learnable tensor by name.
    pub fn visit_parameters(&self, visitor: &mut Visitor<'_>) {
        self.aggregator.visit("", visitor);
        self.core.visit("core", visitor);
        self.head.visit("head", visitor);
    }

    /// Visit every learnable tensor mutably by name.
    pub fn visit_parameters_mut(&mut self, visitor: &mut VisitorMut<'_>) {
        self.aggregator.visit_mut("", visitor);
        self.core.visit_mut("core", visitor);
        self.head.visit_mut("head", visitor);
    }

    /// Names and shapes of every learnable tensor, in visit order.
    pub fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let mut shapes = Vec::new();
        self.visit_parameters(&mut |name, t| shapes.push((name.to_string(), t.shape().to_vec())));
        shapes
    }

    /// Total learnable scalar count.
    pub fn param_count(&self) -> usize {
        self.aggregator.param_count() + self.core.param_count() + self.head.param_count()
    }

    /// Whether every parameter is finite.
    pub fn is_healthy(&self) -> bool {
        let mut healthy = true;
        self.visit_parameters(&mut |_, t| healthy &= t.iter().all(|v| v.is_finite()));
        healthy
    }
}
