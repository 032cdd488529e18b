use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ucfg::cli::Args;
use ucfg::decoder::ZydisDecoder;
use ucfg::pe::PeImage;
use ucfg::recover;
use ucfg::addr::Rva;

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(args.log_filter()).unwrap_or_default())
        .init();

    let bytes = fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let image = PeImage::parse(bytes).context("parsing PE image")?;

    let mut entries = image.all_entry_points();
    entries.extend(args.entry.iter().map(|&v| Rva::new(v)));
    entries.sort_by_key(Rva::value);
    entries.dedup();

    tracing::info!(count = entries.len(), "seeding recovery with entry points");

    let decoder = ZydisDecoder::new_amd64();
    let recovery = recover::recover(&image, &decoder, &entries)?;

    println!(
        "recovered {} function(s), {} basic block(s)",
        recovery.cfg.function_count(),
        recovery.cfg.block_count()
    );

    Ok(())
}
