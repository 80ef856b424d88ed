//! Core transform and output head.
//!
//! ```text
//! e = W_in · (x + info)                  seq_len → d_model   (per channel)
//! h = GELU(W_2 · GELU(W_1 · e))          d_model → d_model
//! y = W_out · dropout(h + e)             d_model → pred_len
//! ```
//!
//! A single skip connection spans both hidden layers.

use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::core::layers::{dropout_inplace, gelu, Linear};

/// Input projection plus the two-layer GELU MLP.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoreTransform {
    /// `seq_len → d_model`
    pub input_proj: Linear,

    /// First hidden layer `d_model → d_model`.
    pub hidden_1: Linear,

    /// Second hidden layer `d_model → d_model`.
    pub hidden_2: Linear,
}

impl CoreTransform {
    pub fn new(seq_len: usize, d_model: usize, rng: &mut StdRng) -> Self {
        Self {
            input_proj: Linear::uniform(seq_len, d_model, rng),
            hidden_1: Linear::uniform(d_model, d_model, rng),
            hidden_2: Linear::uniform(d_model, d_model, rng),
        }
    }

    /// Embed a channel-major `[channels, seq_len]` input, returning
    /// `input_embedding: [channels, d_model]`.
    pub fn embed(&self, x_cm: ArrayView2<f32>) -> Array2<f32> {
        self.input_proj.forward(x_cm)
    }

    /// The MLP alone, without the skip: `GELU(W_2 · GELU(W_1 · e))`.
    pub fn hidden(&self, embedding: ArrayView2<f32>) -> Array2<f32> {
        let h = self.hidden_1.forward(embedding).mapv(gelu);
        self.hidden_2.forward(h.view()).mapv(gelu)
    }

    /// Full stage: `hidden(e) + e` with `e = embed(x_cm)`.
    pub fn forward(&self, x_cm: ArrayView2<f32>) -> Array2<f32> {
        let embedding = self.embed(x_cm);
        self.hidden(embedding.view()) + &embedding
    }

    pub fn param_count(&self) -> usize {
        self.input_proj.param_count() + self.hidden_1.param_count() + self.hidden_2.param_count()
    }
}

/// Dropout followed by the `d_model → pred_len` projection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputHead {
    pub proj: Linear,

    /// Dropout on the residual sum (training only).
    pub dropout: f32,
}

impl OutputHead {
    pub fn new(d_model: usize, pred_len: usize, dropout: f32, rng: &mut StdRng) -> Self {
        Self {
            proj: Linear::uniform(d_model, pred_len, rng),
            dropout,
        }
    }

    /// Map `[channels, d_model]` to `[channels, pred_len]`. Dropout applies
    /// only when `dropout_rng` is given.
    pub fn forward(&self, hidden: Array2<f32>, dropout_rng: Option<&mut StdRng>) -> Array2<f32> {
        let mut hidden = hidden;
        if let Some(rng) = dropout_rng {
            dropout_inplace(&mut hidden, self.dropout, rng);
        }
        self.proj.forward(hidden.view())
    }

    pub fn param_count(&self) -> usize {
        self.proj.param_count()
    }
}
