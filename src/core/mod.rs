//! Core module — model stages and the assembled TQNet model.

pub mod aggregator;
pub mod attention;
pub mod layers;
pub mod model;
pub mod params;
pub mod phase_query;
pub mod revin;
pub mod transform;
