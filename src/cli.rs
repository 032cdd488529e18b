//! Command-line argument surface (external collaborator, §6).

use std::path::PathBuf;

use clap::Parser;

/// Recovers a control-flow graph from an x86-64 PE binary.
#[derive(Debug, Parser)]
#[command(name = "ucfg", version, about, long_about = None)]
pub struct Args {
    /// Path to the PE binary to analyze.
    #[arg(short = 'f', long = "file")]
    pub file: PathBuf,

    /// Additional entry point RVAs (hex, e.g. `0x1400`) to seed recovery
    /// with, beyond the image's own entry point/exports/TLS callbacks.
    #[arg(short = 'e', long = "entry", value_parser = parse_hex)]
    pub entry: Vec<u64>,

    /// Overrides the dataflow slicer's predecessor-block recursion bound.
    #[arg(long = "max-depth")]
    pub max_depth: Option<u32>,

    /// Overrides the forward terminator scan's page budget.
    #[arg(long = "scan-pages")]
    pub scan_pages: Option<u32>,

    /// Increases log verbosity; repeatable (`-v`, `-vv`, `-vvv`).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn parse_hex(s: &str) -> Result<u64, String> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(s, 16).map_err(|e| format!("invalid hex address {s:?}: {e}"))
}

impl Args {
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
