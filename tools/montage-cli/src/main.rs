//! Montage CLI: validate and export clip sequences.
//!
//! Usage:
//!   montage export <MANIFEST> -o <FILE>   Export a manifest to gif/mp4/webm
//!   montage validate <MANIFEST>           Validate a manifest
//!   montage check                         Check engine availability

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use montage_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "montage",
    about = "Export trimmed, retimed and blurred clip sequences",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a manifest to a gif, mp4 or webm file
    Export {
        /// Path to the export manifest (JSON)
        manifest: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Output format: gif|mp4|webm (overrides the manifest)
        #[arg(long)]
        format: Option<String>,

        /// Output width (overrides the manifest)
        #[arg(long)]
        width: Option<u32>,

        /// Output height (overrides the manifest)
        #[arg(long)]
        height: Option<u32>,

        /// Output frame rate (overrides the manifest)
        #[arg(long)]
        fps: Option<u32>,

        /// Quality 0-100 (overrides the manifest)
        #[arg(long)]
        quality: Option<u8>,
    },

    /// Validate a manifest and show the export plan
    Validate {
        /// Path to the export manifest (JSON)
        manifest: PathBuf,
    },

    /// Check that the transcoding engine is available
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load();

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    logging.json |= cli.json_logs;
    montage_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Export {
            manifest,
            output,
            format,
            width,
            height,
            fps,
            quality,
        } => {
            let overrides = commands::export::SettingsOverrides {
                format,
                width,
                height,
                fps,
                quality,
            };
            commands::export::run(&config, manifest, output, overrides).await
        }
        Commands::Validate { manifest } => commands::validate::run(&config, manifest),
        Commands::Check => commands::check::run(&config),
    }
}
