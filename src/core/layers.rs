//! Dense building blocks shared by the attention block, the core transform and
//! the output head: affine [`Linear`] maps, exact GELU and inverted dropout.

use ndarray::{Array1, Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

/// Affine map applied row-wise: `y = x · Wᵀ + b`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Linear {
    /// Weight: `W ∈ R^{d_out × d_in}`
    pub weight: Array2<f32>,

    /// Bias: `b ∈ R^{d_out}`
    pub bias: Array1<f32>,
}

impl Linear {
    /// Create with zero weights and bias.
    pub fn zeros(d_in: usize, d_out: usize) -> Self {
        Self {
            weight: Array2::zeros((d_out, d_in)),
            bias: Array1::zeros(d_out),
        }
    }

    /// Identity-like map: `W[i, i] = 1` on the leading diagonal, zero bias.
    /// Rectangular maps copy the first `min(d_in, d_out)` features.
    pub fn identity(d_in: usize, d_out: usize) -> Self {
        let mut layer = Self::zeros(d_in, d_out);
        for i in 0..d_in.min(d_out) {
            layer.weight[[i, i]] = 1.0;
        }
        layer
    }

    /// Default dense initialisation: weight and bias uniform in `±1/sqrt(d_in)`.
    pub fn uniform(d_in: usize, d_out: usize, rng: &mut StdRng) -> Self {
        let bound = 1.0 / (d_in.max(1) as f32).sqrt();
        Self {
            weight: uniform_array((d_out, d_in), bound, rng),
            bias: uniform_vector(d_out, bound, rng),
        }
    }

    pub fn d_in(&self) -> usize {
        self.weight.ncols()
    }

    pub fn d_out(&self) -> usize {
        self.weight.nrows()
    }

    /// Apply to every row of `x: [rows, d_in]`, returning `[rows, d_out]`.
    pub fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        x.dot(&self.weight.t()) + &self.bias
    }

    pub fn param_count(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

/// Sample an array uniformly from `[-bound, bound]`.
pub fn uniform_array(shape: (usize, usize), bound: f32, rng: &mut StdRng) -> Array2<f32> {
    if bound <= 0.0 {
        return Array2::zeros(shape);
    }
    let dist = Uniform::new_inclusive(-bound, bound);
    Array2::from_shape_fn(shape, |_| dist.sample(rng))
}

/// Sample a vector uniformly from `[-bound, bound]`.
pub fn uniform_vector(len: usize, bound: f32, rng: &mut StdRng) -> Array1<f32> {
    if bound <= 0.0 {
        return Array1::zeros(len);
    }
    let dist = Uniform::new_inclusive(-bound, bound);
    Array1::from_shape_fn(len, |_| dist.sample(rng))
}

/// Exact Gaussian error linear unit: `0.5 · x · (1 + erf(x / √2))`.
pub fn gelu(x: f32) -> f32 {
    0.5 * x * (1.0 + libm::erff(x * std::f32::consts::FRAC_1_SQRT_2))
}

/// Inverted dropout in place: zero each element with probability `p`, scale
/// survivors by `1/(1-p)`. A no-op for `p <= 0`.
pub fn dropout_inplace(x: &mut Array2<f32>, p: f32, rng: &mut StdRng) {
    if p <= 0.0 {
        return;
    }
    if p >= 1.0 {
        x.fill(0.0);
        return;
    }
    let keep_scale = 1.0 / (1.0 - p);
    x.mapv_inplace(|v| {
        if rng.gen::<f32>() < p {
            0.0
        } else {
            v * keep_scale
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn test_linear_forward() {
        let layer = Linear {
            weight: array![[1.0, 2.0], [0.0, -1.0], [0.5, 0.5]],
            bias: array![0.0, 1.0, -1.0],
        };
        let x = array![[1.0, 1.0], [2.0, 0.0]];
        let y = layer.forward(x.view());
        assert_eq!(y, array![[3.0, 0.0, 0.0], [2.0, 1.0, 0.0]]);
    }

    #[test]
    fn test_linear_identity_rectangular() {
        let up = Linear::identity(2, 4);
        let y = up.forward(array![[3.0, 4.0]].view());
        assert_eq!(y, array![[3.0, 4.0, 0.0, 0.0]]);

        let down = Linear::identity(4, 2);
        let y = down.forward(array![[1.0, 2.0, 3.0, 4.0]].view());
        assert_eq!(y, array![[1.0, 2.0]]);
    }

    #[test]
    fn test_linear_uniform_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let layer = Linear::uniform(16, 8, &mut rng);
        assert_eq!(layer.weight.dim(), (8, 16));
        assert_eq!(layer.bias.len(), 8);
        let bound = 0.25;
        assert!(layer.weight.iter().all(|w| w.abs() <= bound));
        assert!(layer.bias.iter().all(|b| b.abs() <= bound));
        assert!(layer.weight.iter().any(|w| *w != 0.0));
        assert_eq!(layer.param_count(), 8 * 16 + 8);
    }

    #[test]
    fn test_gelu_reference_values() {
        assert_eq!(gelu(0.0), 0.0);
        assert!((gelu(1.0) - 0.841_344_7).abs() < 1e-5);
        assert!((gelu(-1.0) + 0.158_655_3).abs() < 1e-5);
        assert!((gelu(3.0) - 2.995_95).abs() < 1e-4);
    }

    #[test]
    fn test_dropout_scales_survivors() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut x = Array2::ones((40, 50));
        dropout_inplace(&mut x, 0.5, &mut rng);
        let zeros = x.iter().filter(|&&v| v == 0.0).count();
        assert!(zeros > 800 && zeros < 1200, "zeros = {}", zeros);
        assert!(x.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
    }

    #[test]
    fn test_dropout_zero_probability_is_identity() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut x = array![[1.0, -2.0], [3.0, 4.0]];
        let before = x.clone();
        dropout_inplace(&mut x, 0.0, &mut rng);
        assert_eq!(x, before);
    }
}
