//! Channel aggregator — the four structural variants.
//!
//! Whether the model synthesises a phase query and whether it attends across
//! channels are fixed at construction. Together they choose where the
//! "channel information" added to the input comes from:
//!
//! | phase query | aggregation | channel information                        |
//! |-------------|-------------|--------------------------------------------|
//! | yes         | yes         | attention(q = phase query, k = v = input)  |
//! | yes         | no          | phase query                                |
//! | no          | yes         | attention(q = k = v = input)               |
//! | no          | no          | zero                                       |

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::config::{ATTENTION_DROPOUT, N_HEADS};
use crate::core::attention::MultiheadAttention;
use crate::core::phase_query::PhaseQuery;
use crate::error::{ensure_len, Result, TqError};

/// Which of the four variants a model was built as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregatorKind {
    /// Phase query attends over the raw input.
    CrossAttention,
    /// Phase query is used directly.
    PhaseQuery,
    /// Raw input attends over itself.
    SelfAttention,
    /// No channel information.
    Disabled,
}

impl AggregatorKind {
    pub fn from_flags(use_phase_query: bool, channel_aggregation: bool) -> Self {
        match (use_phase_query, channel_aggregation) {
            (true, true) => AggregatorKind::CrossAttention,
            (true, false) => AggregatorKind::PhaseQuery,
            (false, true) => AggregatorKind::SelfAttention,
            (false, false) => AggregatorKind::Disabled,
        }
    }

    /// All four variants in table order.
    pub fn all() -> [AggregatorKind; 4] {
        [
            AggregatorKind::CrossAttention,
            AggregatorKind::PhaseQuery,
            AggregatorKind::SelfAttention,
            AggregatorKind::Disabled,
        ]
    }

    pub fn uses_phase_query(&self) -> bool {
        matches!(
            self,
            AggregatorKind::CrossAttention | AggregatorKind::PhaseQuery
        )
    }

    pub fn uses_attention(&self) -> bool {
        matches!(
            self,
            AggregatorKind::CrossAttention | AggregatorKind::SelfAttention
        )
    }
}

/// The channel aggregator with only the parameters its variant needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ChannelAggregator {
    CrossAttention {
        phase: PhaseQuery,
        attention: MultiheadAttention,
    },
    PhaseQuery(PhaseQuery),
    SelfAttention(MultiheadAttention),
    Disabled,
}

impl ChannelAggregator {
    /// Build `kind` for windows of `seq_len` steps over `channels` channels.
    pub fn new(
        kind: AggregatorKind,
        seq_len: usize,
        channels: usize,
        cycle_len: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        Ok(match kind {
            AggregatorKind::CrossAttention => ChannelAggregator::CrossAttention {
                phase: PhaseQuery::new(cycle_len, channels),
                attention: MultiheadAttention::new(seq_len, N_HEADS, ATTENTION_DROPOUT, rng)?,
            },
            AggregatorKind::PhaseQuery => {
                ChannelAggregator::PhaseQuery(PhaseQuery::new(cycle_len, channels))
            }
            AggregatorKind::SelfAttention => ChannelAggregator::SelfAttention(
                MultiheadAttention::new(seq_len, N_HEADS, ATTENTION_DROPOUT, rng)?,
            ),
            AggregatorKind::Disabled => ChannelAggregator::Disabled,
        })
    }

    pub fn kind(&self) -> AggregatorKind {
        match self {
            ChannelAggregator::CrossAttention { .. } => AggregatorKind::CrossAttention,
            ChannelAggregator::PhaseQuery(_) => AggregatorKind::PhaseQuery,
            ChannelAggregator::SelfAttention(_) => AggregatorKind::SelfAttention,
            ChannelAggregator::Disabled => AggregatorKind::Disabled,
        }
    }

    pub fn phase_query(&self) -> Option<&PhaseQuery> {
        match self {
            ChannelAggregator::CrossAttention { phase, .. } | ChannelAggregator::PhaseQuery(phase) => {
                Some(phase)
            }
            _ => None,
        }
    }

    pub fn phase_query_mut(&mut self) -> Option<&mut PhaseQuery> {
        match self {
            ChannelAggregator::CrossAttention { phase, .. } | ChannelAggregator::PhaseQuery(phase) => {
                Some(phase)
            }
            _ => None,
        }
    }

    pub fn attention(&self) -> Option<&MultiheadAttention> {
        match self {
            ChannelAggregator::CrossAttention { attention, .. }
            | ChannelAggregator::SelfAttention(attention) => Some(attention),
            _ => None,
        }
    }

    pub fn attention_mut(&mut self) -> Option<&mut MultiheadAttention> {
        match self {
            ChannelAggregator::CrossAttention { attention, .. }
            | ChannelAggregator::SelfAttention(attention) => Some(attention),
            _ => None,
        }
    }

    /// Channel information for one sample.
    ///
    /// `x_cm` is the (normalised) window in channel-major layout
    /// `[channels, seq_len]`; `phase` carries the `(daily, weekly)` phase of
    /// its first step and is required by the phase-query variants.
    pub fn channel_information(
        &self,
        x_cm: ArrayView2<f32>,
        phase: Option<(i64, i64)>,
        dropout_rng: Option<&mut StdRng>,
    ) -> Result<Array2<f32>> {
        let seq_len = x_cm.ncols();
        match self {
            ChannelAggregator::CrossAttention { phase: pq, attention } => {
                let (daily, weekly) = phase.ok_or(TqError::MissingCycleIndex)?;
                ensure_len("channels", pq.daily.channels(), x_cm.nrows())?;
                let query = pq.query(daily, weekly, seq_len);
                attention.forward(query.view(), x_cm, x_cm, dropout_rng)
            }
            ChannelAggregator::PhaseQuery(pq) => {
                let (daily, weekly) = phase.ok_or(TqError::MissingCycleIndex)?;
                ensure_len("channels", pq.daily.channels(), x_cm.nrows())?;
                Ok(pq.query(daily, weekly, seq_len))
            }
            ChannelAggregator::SelfAttention(attention) => {
                attention.forward(x_cm, x_cm, x_cm, dropout_rng)
            }
            ChannelAggregator::Disabled => Ok(Array2::zeros(x_cm.raw_dim())),
        }
    }

    /// Channel information for a channel-major batch `[batch, channels,
    /// seq_len]` in inference mode.
    pub fn channel_information_batch(
        &self,
        x_cm: ArrayView3<f32>,
        daily: Option<&[i64]>,
        weekly: Option<&[i64]>,
    ) -> Result<Array3<f32>> {
        let batch = x_cm.len_of(Axis(0));
        let phases = match (self.kind().uses_phase_query(), daily, weekly) {
            (true, Some(d), Some(w)) => {
                ensure_len("daily cycle index", batch, d.len())?;
                ensure_len("weekly cycle index", batch, w.len())?;
                Some((d, w))
            }
            (true, _, _) => return Err(TqError::MissingCycleIndex),
            (false, _, _) => None,
        };

        let mut out = Array3::zeros(x_cm.raw_dim());
        for (b, mut slot) in out.axis_iter_mut(Axis(0)).enumerate() {
            let phase = phases.map(|(d, w)| (d[b], w[b]));
            let info = self.channel_information(x_cm.index_axis(Axis(0), b), phase, None)?;
            slot.assign(&info);
        }
        Ok(out)
    }

    pub fn param_count(&self) -> usize {
        self.phase_query().map_or(0, PhaseQuery::param_count)
            + self.attention().map_or(0, MultiheadAttention::param_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const SEQ: usize = 8;
    const CH: usize = 3;
    const CYCLE: usize = 5;

    fn build(kind: AggregatorKind) -> ChannelAggregator {
        let mut rng = StdRng::seed_from_u64(17);
        let mut agg = ChannelAggregator::new(kind, SEQ, CH, CYCLE, &mut rng).unwrap();
        if let Some(pq) = agg.phase_query_mut() {
            pq.daily.table = Array2::from_shape_fn((CYCLE, CH), |(p, c)| p as f32 - c as f32);
            pq.weekly.table = Array2::from_shape_fn((CYCLE, CH), |(p, c)| 0.1 * (p * c) as f32);
            pq.alpha[()] = 0.8;
            pq.beta[()] = -0.3;
        }
        agg
    }

    fn input() -> Array3<f32> {
        Array3::from_shape_fn((2, CH, SEQ), |(b, c, t)| ((b + 2 * c + t) as f32 * 0.7).cos())
    }

    #[test]
    fn test_from_flags() {
        assert_eq!(AggregatorKind::from_flags(true, true), AggregatorKind::CrossAttention);
        assert_eq!(AggregatorKind::from_flags(true, false), AggregatorKind::PhaseQuery);
        assert_eq!(AggregatorKind::from_flags(false, true), AggregatorKind::SelfAttention);
        assert_eq!(AggregatorKind::from_flags(false, false), AggregatorKind::Disabled);
    }

    #[test]
    fn test_variant_owns_only_its_parameters() {
        for kind in AggregatorKind::all() {
            let agg = build(kind);
            assert_eq!(agg.kind(), kind);
            assert_eq!(agg.phase_query().is_some(), kind.uses_phase_query());
            assert_eq!(agg.attention().is_some(), kind.uses_attention());
        }
        assert_eq!(build(AggregatorKind::Disabled).param_count(), 0);
    }

    #[test]
    fn test_cross_attention_source() {
        let agg = build(AggregatorKind::CrossAttention);
        let x = input();
        let info = agg
            .channel_information_batch(x.view(), Some(&[1_i64, 4][..]), Some(&[0_i64, -1][..]))
            .unwrap();
        let pq = agg.phase_query().unwrap();
        let attn = agg.attention().unwrap();
        for (b, (&d, &w)) in [1_i64, 4].iter().zip(&[0_i64, -1]).enumerate() {
            let q = pq.query(d, w, SEQ);
            let xb = x.index_axis(Axis(0), b);
            let expected = attn.forward(q.view(), xb, xb, None).unwrap();
            assert_eq!(info.index_axis(Axis(0), b), expected);
        }
    }

    #[test]
    fn test_phase_query_source() {
        let agg = build(AggregatorKind::PhaseQuery);
        let x = input();
        let info = agg
            .channel_information_batch(x.view(), Some(&[2_i64, 3][..]), Some(&[7_i64, 0][..]))
            .unwrap();
        let expected = agg.phase_query().unwrap().query_batch(&[2, 3], &[7, 0], SEQ);
        assert_eq!(info, expected);
    }

    #[test]
    fn test_self_attention_source() {
        let agg = build(AggregatorKind::SelfAttention);
        let x = input();
        let info = agg.channel_information_batch(x.view(), None, None).unwrap();
        let attn = agg.attention().unwrap();
        for b in 0..2 {
            let xb = x.index_axis(Axis(0), b);
            let expected = attn.forward(xb, xb, xb, None).unwrap();
            assert_eq!(info.index_axis(Axis(0), b), expected);
        }
    }

    #[test]
    fn test_disabled_is_zero() {
        let agg = build(AggregatorKind::Disabled);
        let x = input();
        let info = agg
            .channel_information_batch(x.view(), Some(&[0_i64, 0][..]), Some(&[0_i64, 0][..]))
            .unwrap();
        assert_eq!(info.dim(), x.dim());
        assert!(info.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_phase_variants_need_indices() {
        let x = input();
        for kind in [AggregatorKind::CrossAttention, AggregatorKind::PhaseQuery] {
            let agg = build(kind);
            assert_eq!(
                agg.channel_information_batch(x.view(), None, None),
                Err(TqError::MissingCycleIndex)
            );
            assert!(matches!(
                agg.channel_information_batch(x.view(), Some(&[0_i64][..]), Some(&[0_i64, 1][..])),
                Err(TqError::ShapeMismatch { .. })
            ));
        }
    }

    #[test]
    fn test_zero_tables_give_zero_phase_query() {
        let mut rng = StdRng::seed_from_u64(0);
        let agg = ChannelAggregator::new(AggregatorKind::PhaseQuery, SEQ, CH, CYCLE, &mut rng)
            .unwrap();
        let info = agg
            .channel_information(input().index_axis(Axis(0), 0), Some((3, 9)), None)
            .unwrap();
        assert!(info.iter().all(|&v| v == 0.0));
    }
}
