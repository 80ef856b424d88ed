//! TQNet — Temporal Query Network forecaster.
//!
//! This is the CLI binary entry point. It builds a model, synthesises a
//! periodic batch and runs one forward pass.

use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tqnet::synthetic::SyntheticSeries;
use tqnet::{ModelConfig, TqModel};
use tracing_subscriber::EnvFilter;

/// TQNet smoke-run CLI.
#[derive(Parser, Debug)]
#[command(
    name = "tqnet",
    about = "TQNet — periodic multivariate forecasting with temporal queries",
    version
)]
struct Cli {
    /// Input window length.
    #[arg(long, default_value_t = 96)]
    seq_len: usize,

    /// Forecast horizon.
    #[arg(long, default_value_t = 96)]
    pred_len: usize,

    /// Number of channels.
    #[arg(short, long, default_value_t = 7)]
    channels: usize,

    /// Rows of each temporal query table.
    #[arg(long, default_value_t = 24)]
    cycle_len: usize,

    /// Embedding width.
    #[arg(long, default_value_t = 512)]
    d_model: usize,

    /// Output-head dropout (training only).
    #[arg(long, default_value_t = 0.0)]
    dropout: f32,

    /// Disable instance normalisation.
    #[arg(long, default_value_t = false)]
    no_revin: bool,

    /// Disable the phase query.
    #[arg(long, default_value_t = false)]
    no_phase_query: bool,

    /// Disable channel aggregation.
    #[arg(long, default_value_t = false)]
    no_channel_aggregation: bool,

    /// Samples in the synthetic batch.
    #[arg(short, long, default_value_t = 32)]
    batch: usize,

    /// Seed for weights, data and dropout.
    #[arg(short, long, default_value_t = 0)]
    seed: u64,

    /// Run in training mode (dropout active).
    #[arg(long, default_value_t = false)]
    train: bool,
}

/// `RUST_LOG` directives if given and valid, `info` otherwise.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let cli = Cli::parse();

    tracing::info!("TQNet v{}", env!("CARGO_PKG_VERSION"));

    let config = ModelConfig {
        seq_len: cli.seq_len,
        pred_len: cli.pred_len,
        channels: cli.channels,
        cycle_len: cli.cycle_len,
        d_model: cli.d_model,
        dropout: cli.dropout,
        use_revin: !cli.no_revin,
        use_phase_query: !cli.no_phase_query,
        channel_aggregation: !cli.no_channel_aggregation,
    };

    let model = TqModel::new(config.clone(), cli.seed).context("building model")?;
    tracing::info!(
        "Model: variant={:?}, seq_len={}, pred_len={}, channels={}, d_model={}, {} params",
        model.kind(),
        config.seq_len,
        config.pred_len,
        config.channels,
        config.d_model,
        model.param_count(),
    );

    let data = SyntheticSeries::default().generate(&config, cli.batch, cli.seed);
    tracing::info!("Input: {:?}", data.x.dim());

    let start = Instant::now();
    let forecast = if cli.train {
        let mut rng = StdRng::seed_from_u64(cli.seed.wrapping_add(1));
        model.forward_train(data.x.view(), Some(data.index()), &mut rng)
    } else {
        model.forward(data.x.view(), Some(data.index()))
    }
    .context("forward pass")?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    let n = forecast.len().max(1) as f32;
    let mean = forecast.sum() / n;
    let var = forecast.mapv(|v| (v - mean).powi(2)).sum() / n;
    tracing::info!(
        "Forecast: {:?} in {:.1} ms (mode={})",
        forecast.dim(),
        elapsed_ms,
        if cli.train { "train" } else { "eval" },
    );
    tracing::info!("  mean={:.4}, std={:.4}", mean, var.sqrt());
    tracing::info!("  healthy={}", model.is_healthy());

    tracing::info!("Done.");
    Ok(())
}
