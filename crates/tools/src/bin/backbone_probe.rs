use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use darknet_tools::config::{Dims, ProbeConfig};
use darknet_tools::probe::{probe_backbone, Backbone};
use darknet_tools::ProbeBackend;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Build a CSPDarknet backbone, run one batch, and print its feature maps"
)]
struct Args {
    /// TOML config (defaults to $DARKNET_TOOLS_CONFIG or ./darknet-tools.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Backbone variant; switching resets backbone and input shape to that variant's defaults.
    #[arg(long, value_enum)]
    dims: Option<Dims>,
    /// Input shape as batch followed by spatial extents, e.g. `1,416,416`.
    #[arg(long, value_delimiter = ',')]
    input: Option<Vec<usize>>,
    /// Load weights from this checkpoint before probing.
    #[arg(long)]
    load: Option<PathBuf>,
    /// Save the probed weights to this checkpoint.
    #[arg(long)]
    save: Option<PathBuf>,
}

fn resolve_config(args: &Args) -> anyhow::Result<ProbeConfig> {
    let mut cfg = match &args.config {
        Some(path) => ProbeConfig::from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ProbeConfig::load(),
    };
    if let Some(dims) = args.dims {
        cfg = cfg.with_dims(dims);
    }
    if let Some(input) = &args.input {
        cfg.input_shape = input.clone();
    }
    if let Some(load) = &args.load {
        cfg.checkpoint = Some(load.clone());
    }
    cfg.validate().context("invalid probe config")?;
    Ok(cfg)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = resolve_config(&args)?;
    let device = <ProbeBackend as burn::tensor::backend::Backend>::Device::default();

    let backbone = Backbone::<ProbeBackend>::build(&cfg, &device)?;
    let report = probe_backbone(&cfg, &backbone, &device)?;
    print!("{report}");

    if let Some(out) = &args.save {
        let written = backbone.save(out)?;
        println!("Saved checkpoint to {}", written.display());
    }
    Ok(())
}
