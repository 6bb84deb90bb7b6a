use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use video_ingest::migration::fix_encoding;

/// Converts a UTF-16 database migration file to UTF-8.
#[derive(Parser)]
struct Args {
    file: PathBuf,
    /// Write the converted text here instead of in place.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
    let args = Args::parse();

    if !args.file.exists() {
        bail!("file not found: {}", args.file.display());
    }
    let written = fix_encoding(&args.file, args.output.as_deref())
        .with_context(|| format!("converting {}", args.file.display()))?;
    info!("Done: {}", written.display());
    Ok(())
}
