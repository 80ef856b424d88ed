//! Multi-head attention over the channel axis.
//!
//! Inputs are channel-major rows `[channels, seq_len]`: each channel is one
//! token and its whole window is the token embedding (`E = seq_len`). With
//! `H = 4` heads of width `d_h = E / H`:
//!
//! ```text
//! q, k, v = X_q W_qᵀ + b_q,  X_k W_kᵀ + b_k,  X_v W_vᵀ + b_v
//! A_h     = softmax((q_h / √d_h) · k_hᵀ)        (dropout on A_h in training)
//! o       = concat_h(A_h · v_h) · W_oᵀ + b_o
//! ```
//!
//! Attention weights are an intermediate only; callers receive `o`.

use ndarray::{s, Array1, Array2, ArrayView2};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::core::layers::{dropout_inplace, uniform_array, Linear};
use crate::error::{ensure_len, Result, TqError};

/// Packed-projection multi-head attention block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultiheadAttention {
    /// Packed Q/K/V projection: `W_in ∈ R^{3E × E}` (rows: q, then k, then v).
    pub in_proj_weight: Array2<f32>,

    /// Packed Q/K/V bias: `b_in ∈ R^{3E}`.
    pub in_proj_bias: Array1<f32>,

    /// Output projection `E → E`.
    pub out_proj: Linear,

    /// Number of heads.
    pub num_heads: usize,

    /// Dropout on attention weights (training only).
    pub dropout: f32,
}

impl MultiheadAttention {
    /// Xavier-uniform packed projection, zero biases, output weight uniform in
    /// `±1/sqrt(E)`.
    pub fn new(embed_dim: usize, num_heads: usize, dropout: f32, rng: &mut StdRng) -> Result<Self> {
        check_heads(embed_dim, num_heads)?;
        let xavier = (6.0 / (embed_dim + 3 * embed_dim) as f32).sqrt();
        let out_bound = 1.0 / (embed_dim as f32).sqrt();
        Ok(Self {
            in_proj_weight: uniform_array((3 * embed_dim, embed_dim), xavier, rng),
            in_proj_bias: Array1::zeros(3 * embed_dim),
            out_proj: Linear {
                weight: uniform_array((embed_dim, embed_dim), out_bound, rng),
                bias: Array1::zeros(embed_dim),
            },
            num_heads,
            dropout,
        })
    }

    /// Q, K, V and output projections all identity, zero biases.
    pub fn identity(embed_dim: usize, num_heads: usize) -> Result<Self> {
        check_heads(embed_dim, num_heads)?;
        let mut in_proj_weight = Array2::zeros((3 * embed_dim, embed_dim));
        for block in 0..3 {
            for i in 0..embed_dim {
                in_proj_weight[[block * embed_dim + i, i]] = 1.0;
            }
        }
        Ok(Self {
            in_proj_weight,
            in_proj_bias: Array1::zeros(3 * embed_dim),
            out_proj: Linear::identity(embed_dim, embed_dim),
            num_heads,
            dropout: 0.0,
        })
    }

    pub fn embed_dim(&self) -> usize {
        self.in_proj_weight.ncols()
    }

    pub fn head_dim(&self) -> usize {
        self.embed_dim() / self.num_heads
    }

    /// Attend `query: [L_q, E]` over `key`/`value: [L_k, E]`, returning
    /// `[L_q, E]`. Attention dropout applies only when `dropout_rng` is given.
    pub fn forward(
        &self,
        query: ArrayView2<f32>,
        key: ArrayView2<f32>,
        value: ArrayView2<f32>,
        mut dropout_rng: Option<&mut StdRng>,
    ) -> Result<Array2<f32>> {
        let e = self.embed_dim();
        ensure_len("attention query width", e, query.ncols())?;
        ensure_len("attention key width", e, key.ncols())?;
        ensure_len("attention value width", e, value.ncols())?;
        ensure_len("attention value length", key.nrows(), value.nrows())?;

        let q = self.project(query, 0);
        let k = self.project(key, 1);
        let v = self.project(value, 2);

        let d_h = self.head_dim();
        let scale = (1.0 / d_h as f32).sqrt();
        let mut heads = Array2::<f32>::zeros((query.nrows(), e));

        for h in 0..self.num_heads {
            let (lo, hi) = (h * d_h, (h + 1) * d_h);
            let q_h = &q.slice(s![.., lo..hi]) * scale;
            let mut weights = softmax_rows(&q_h.dot(&k.slice(s![.., lo..hi]).t()));
            if let Some(rng) = dropout_rng.as_deref_mut() {
                dropout_inplace(&mut weights, self.dropout, rng);
            }
            heads
                .slice_mut(s![.., lo..hi])
                .assign(&weights.dot(&v.slice(s![.., lo..hi])));
        }

        Ok(self.out_proj.forward(heads.view()))
    }

    /// Project rows with block `which` (0 = q, 1 = k, 2 = v) of the packed weight.
    fn project(&self, x: ArrayView2<f32>, which: usize) -> Array2<f32> {
        let e = self.embed_dim();
        let rows = which * e..(which + 1) * e;
        let w = self.in_proj_weight.slice(s![rows.clone(), ..]);
        let b = self.in_proj_bias.slice(s![rows]);
        x.dot(&w.t()) + &b
    }

    pub fn param_count(&self) -> usize {
        self.in_proj_weight.len() + self.in_proj_bias.len() + self.out_proj.param_count()
    }
}

fn check_heads(embed_dim: usize, num_heads: usize) -> Result<()> {
    if num_heads == 0 || embed_dim == 0 || embed_dim % num_heads != 0 {
        return Err(TqError::InvalidConfig(format!(
            "attention width {} is not divisible into {} heads",
            embed_dim, num_heads
        )));
    }
    Ok(())
}

/// Row-wise softmax of a 2D score matrix.
pub fn softmax_rows(x: &Array2<f32>) -> Array2<f32> {
    let mut out = x.clone();
    for mut row in out.rows_mut() {
        if row.is_empty() {
            continue;
        }
        let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max_val).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        } else {
            let n = row.len() as f32;
            row.fill(1.0 / n);
        }
    }
    out
}
