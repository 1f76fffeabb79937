//! Build a `ResMCS` backbone and report the feature maps it produces.
//!
//! ```text
//! cargo run -p resmcs-features -- --preset tiny --height 256 --width 320
//! RUST_LOG=resmcs=trace cargo run -p resmcs-features -- --config my_config.json
//! ```

use anyhow::{Context, bail};
use burn::backend::NdArray;
use burn::config::Config;
use burn::prelude::Tensor;
use burn::tensor::Distribution;
use clap::Parser;
use resmcs::models::resmcs::backbone::{ResMcsConfig, ResMcsMeta, ResMcsPreset};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

type B = NdArray<f32>;

#[derive(Parser, Debug)]
#[command(version, about = "Report ResMCS backbone feature shapes")]
pub struct Args {
    /// Named backbone preset.
    #[arg(long, default_value = "default")]
    preset: ResMcsPreset,

    /// Load the backbone config from JSON; overrides `--preset`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Batch size.
    #[arg(long, default_value_t = 1)]
    batch: usize,

    /// Input height; a multiple of the backbone input multiple.
    #[arg(long, default_value_t = 224)]
    height: usize,

    /// Input width; a multiple of the backbone input multiple.
    #[arg(long, default_value_t = 224)]
    width: usize,

    /// Write the resolved config to JSON.
    #[arg(long)]
    save_config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ResMcsConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => args.preset.config(),
    };

    if let Some(path) = &args.save_config {
        config
            .save(path)
            .with_context(|| format!("saving config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "saved config");
    }

    let plan = config.validate()?;
    let multiple = plan.input_multiple;
    if args.height == 0 || args.width == 0 || args.height % multiple != 0 || args.width % multiple != 0 {
        bail!(
            "--height and --width must be non-zero multiples of {multiple}; got {}x{}",
            args.height,
            args.width
        );
    }

    let device = Default::default();
    let backbone = config.try_init::<B>(&device)?;
    tracing::info!(
        preset = %args.preset,
        embed_dims = ?backbone.embed_dims(),
        depths = ?backbone.depths(),
        num_heads = ?backbone.num_heads(),
        sr_ratios = ?backbone.sr_ratios(),
        input_multiple = multiple,
        "built backbone"
    );

    let input: Tensor<B, 4> = Tensor::random(
        [args.batch, backbone.d_input(), args.height, args.width],
        Distribution::Normal(0.0, 1.0),
        &device,
    );
    let features = backbone.try_forward(input)?;

    for ((feature, channels), stride) in features
        .iter()
        .zip(backbone.feature_channels())
        .zip(backbone.feature_strides())
    {
        tracing::info!(channels, stride, shape = ?feature.dims(), "feature map");
    }

    Ok(())
}
