//! Parameter surface handed to an external trainer.
//!
//! Every learnable tensor is visited under a stable dotted name
//! (`core.hidden_1.weight`, `phase_query.alpha`, ...). Scalars are visited as
//! 0-dimensional arrays. The mutable walk is the only way to change weights
//! after construction.

use ndarray::{ArrayViewD, ArrayViewMutD};

use crate::core::aggregator::ChannelAggregator;
use crate::core::attention::MultiheadAttention;
use crate::core::layers::Linear;
use crate::core::phase_query::PhaseQuery;
use crate::core::transform::{CoreTransform, OutputHead};

/// Callback receiving `(name, tensor)`.
pub type Visitor<'v> = dyn FnMut(&str, ArrayViewD<'_, f32>) + 'v;

/// Callback receiving `(name, mutable tensor)`.
pub type VisitorMut<'v> = dyn FnMut(&str, ArrayViewMutD<'_, f32>) + 'v;

/// A component that owns learnable tensors.
pub trait Parameters {
    fn visit(&self, prefix: &str, visitor: &mut Visitor<'_>);

    fn visit_mut(&mut self, prefix: &str, visitor: &mut VisitorMut<'_>);
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

impl Parameters for Linear {
    fn visit(&self, prefix: &str, visitor: &mut Visitor<'_>) {
        visitor(&join(prefix, "weight"), self.weight.view().into_dyn());
        visitor(&join(prefix, "bias"), self.bias.view().into_dyn());
    }

    fn visit_mut(&mut self, prefix: &str, visitor: &mut VisitorMut<'_>) {
        visitor(&join(prefix, "weight"), self.weight.view_mut().into_dyn());
        visitor(&join(prefix, "bias"), self.bias.view_mut().into_dyn());
    }
}

impl Parameters for MultiheadAttention {
    fn visit(&self, prefix: &str, visitor: &mut Visitor<'_>) {
        visitor(&join(prefix, "in_proj_weight"), self.in_proj_weight.view().into_dyn());
        visitor(&join(prefix, "in_proj_bias"), self.in_proj_bias.view().into_dyn());
        self.out_proj.visit(&join(prefix, "out_proj"), visitor);
    }

    fn visit_mut(&mut self, prefix: &str, visitor: &mut VisitorMut<'_>) {
        visitor(
            &join(prefix, "in_proj_weight"),
            self.in_proj_weight.view_mut().into_dyn(),
        );
        visitor(
            &join(prefix, "in_proj_bias"),
            self.in_proj_bias.view_mut().into_dyn(),
        );
        self.out_proj.visit_mut(&join(prefix, "out_proj"), visitor);
    }
}

impl Parameters for PhaseQuery {
    fn visit(&self, prefix: &str, visitor: &mut Visitor<'_>) {
        visitor(&join(prefix, "daily_table"), self.daily.table.view().into_dyn());
        visitor(&join(prefix, "weekly_table"), self.weekly.table.view().into_dyn());
        visitor(&join(prefix, "alpha"), self.alpha.view().into_dyn());
        visitor(&join(prefix, "beta"), self.beta.view().into_dyn());
    }

    fn visit_mut(&mut self, prefix: &str, visitor: &mut VisitorMut<'_>) {
        visitor(&join(prefix, "daily_table"), self.daily.table.view_mut().into_dyn());
        visitor(&join(prefix, "weekly_table"), self.weekly.table.view_mut().into_dyn());
        visitor(&join(prefix, "alpha"), self.alpha.view_mut().into_dyn());
        visitor(&join(prefix, "beta"), self.beta.view_mut().into_dyn());
    }
}

/// The aggregator ignores `prefix` and names its parts `phase_query.*` and
/// `channel_aggregator.*`, so names stay identical across variants.
impl Parameters for ChannelAggregator {
    fn visit(&self, _prefix: &str, visitor: &mut Visitor<'_>) {
        if let Some(pq) = self.phase_query() {
            pq.visit("phase_query", visitor);
        }
        if let Some(attn) = self.attention() {
            attn.visit("channel_aggregator", visitor);
        }
    }

    fn visit_mut(&mut self, _prefix: &str, visitor: &mut VisitorMut<'_>) {
        if let Some(pq) = self.phase_query_mut() {
            pq.visit_mut("phase_query", visitor);
        }
        if let Some(attn) = self.attention_mut() {
            attn.visit_mut("channel_aggregator", visitor);
        }
    }
}

impl Parameters for CoreTransform {
    fn visit(&self, prefix: &str, visitor: &mut Visitor<'_>) {
        self.input_proj.visit(&join(prefix, "input_proj"), visitor);
        self.hidden_1.visit(&join(prefix, "hidden_1"), visitor);
        self.hidden_2.visit(&join(prefix, "hidden_2"), visitor);
    }

    fn visit_mut(&mut self, prefix: &str, visitor: &mut VisitorMut<'_>) {
        self.input_proj.visit_mut(&join(prefix, "input_proj"), visitor);
        self.hidden_1.visit_mut(&join(prefix, "hidden_1"), visitor);
        self.hidden_2.visit_mut(&join(prefix, "hidden_2"), visitor);
    }
}

impl Parameters for OutputHead {
    fn visit(&self, prefix: &str, visitor: &mut Visitor<'_>) {
        self.proj.visit(&join(prefix, "proj"), visitor);
    }

    fn visit_mut(&mut self, prefix: &str, visitor: &mut VisitorMut<'_>) {
        self.proj.visit_mut(&join(prefix, "proj"), visitor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_names_and_shapes() {
        let layer = Linear::zeros(3, 2);
        let mut seen = Vec::new();
        layer.visit("proj", &mut |name, t| seen.push((name.to_string(), t.shape().to_vec())));
        assert_eq!(
            seen,
            vec![
                ("proj.weight".to_string(), vec![2, 3]),
                ("proj.bias".to_string(), vec![2]),
            ]
        );
    }

    #[test]
    fn test_scalars_are_zero_dimensional() {
        let pq = PhaseQuery::new(4, 2);
        let mut scalars = Vec::new();
        pq.visit("phase_query", &mut |name, t| {
            if t.ndim() == 0 {
                scalars.push((name.to_string(), t.sum()));
            }
        });
        assert_eq!(
            scalars,
            vec![
                ("phase_query.alpha".to_string(), 0.5),
                ("phase_query.beta".to_string(), 0.5),
            ]
        );
    }

    #[test]
    fn test_visit_mut_writes_through() {
        let mut pq = PhaseQuery::new(3, 2);
        pq.visit_mut("", &mut |name, mut t| {
            if name == "daily_table" {
                t.fill(1.0);
            }
            if name == "beta" {
                t.fill(-2.0);
            }
        });
        assert!(pq.daily.table.iter().all(|&v| v == 1.0));
        assert!(pq.weekly.table.iter().all(|&v| v == 0.0));
        assert_eq!(pq.beta(), -2.0);
    }
}
