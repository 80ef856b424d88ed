//! # TQNet
//!
//! **Temporal Query Network** — a forecaster for multivariate periodic time
//! series that maps a recent window `(batch, seq_len, channels)` to a future
//! window `(batch, pred_len, channels)`, using each sample's phase within a
//! daily and a weekly cycle.
//!
//! ## Forward pipeline
//!
//! 1. **RevIN** — optional per-sample instance normalisation
//! 2. **Phase query** — learned cyclic tables gathered by phase, fused by `alpha`/`beta`
//! 3. **Channel aggregator** — 4-head attention across channels
//! 4. **Core transform** — residual two-layer GELU MLP in `d_model` space
//! 5. **Output head** — dropout + projection to `pred_len`, then denormalisation
//!
//! The aggregator is one of four structural variants fixed at construction,
//! see [`core::aggregator::AggregatorKind`].

pub mod core;
pub mod error;
pub mod synthetic;

pub use crate::core::model::{CycleIndex, ModelConfig, TqModel};
pub use crate::error::{Result, TqError};

/// Model-wide constants.
pub mod config {
    /// Attention heads in the channel aggregator.
    pub const N_HEADS: usize = 4;

    /// Dropout applied to attention weights during training.
    pub const ATTENTION_DROPOUT: f32 = 0.5;

    /// Additive floor on the instance variance.
    pub const VARIANCE_FLOOR: f32 = 1e-5;

    /// Initial value of both cycle fusion scalars.
    pub const FUSION_INIT: f32 = 0.5;

    /// Hours per day, used by the synthetic generator.
    pub const HOURS_PER_DAY: usize = 24;

    /// Hours per week, used by the synthetic generator.
    pub const HOURS_PER_WEEK: usize = 7 * HOURS_PER_DAY;

    /// Per-head width of the attention block for an embedding of `seq_len`.
    /// Returns `None` if `seq_len` does not split evenly across heads.
    pub fn head_dim(seq_len: usize) -> Option<usize> {
        if seq_len == 0 || seq_len % N_HEADS != 0 {
            None
        } else {
            Some(seq_len / N_HEADS)
        }
    }
}
